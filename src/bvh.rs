use bvh::{
    aabb::{Aabb as BvhAabb, Bounded},
    bounding_hierarchy::BHShape,
    bvh::Bvh as BVH,
};
use vivid_shared::{Aabb, BvhNode, TracerConfig};

use crate::error::{RenderError, Result};

// Type aliases for specific f32 3D types
type Point3f = nalgebra::Point3<f32>;
type BvhAabbf = BvhAabb<f32, 3>;
type BVHf = BVH<f32, 3>;

/// Bounded primitive handed to the `bvh` crate: a triangle in a bottom level,
/// an instance's world bounds in the top level
#[derive(Clone, Copy, Debug)]
pub struct BvhPrimitive {
    pub bounds: Aabb,
    pub node_index: usize,
}

impl BvhPrimitive {
    pub fn new(bounds: Aabb, node_index: usize) -> Self {
        Self { bounds, node_index }
    }

    pub fn centroid(&self) -> Point3f {
        let c = self.bounds.center();
        Point3f::new(c[0], c[1], c[2])
    }
}

impl Bounded<f32, 3> for BvhPrimitive {
    fn aabb(&self) -> BvhAabbf {
        let min = Point3f::new(self.bounds.min[0], self.bounds.min[1], self.bounds.min[2]);
        let max = Point3f::new(self.bounds.max[0], self.bounds.max[1], self.bounds.max[2]);
        BvhAabbf::with_bounds(min, max)
    }
}

impl BHShape<f32, 3> for BvhPrimitive {
    fn set_bh_node_index(&mut self, index: usize) {
        self.node_index = index;
    }

    fn bh_node_index(&self) -> usize {
        self.node_index
    }
}

/// SAH BVH builder producing the flattened node layout used by traversal
pub struct BvhBuilder;

impl BvhBuilder {
    /// Build a BVH over primitive bounds. Leaves hold one primitive each; the
    /// returned indices map leaf slots back to positions in `bounds`.
    pub fn build(bounds: &[Aabb]) -> BvhResult {
        if bounds.is_empty() {
            return BvhResult {
                nodes: vec![BvhNode::leaf(Aabb::empty(), 0, 0)],
                primitive_indices: Vec::new(),
            };
        }

        let mut primitives: Vec<BvhPrimitive> = bounds
            .iter()
            .enumerate()
            .map(|(i, aabb)| BvhPrimitive::new(*aabb, i))
            .collect();

        let bvh = BVHf::build(&mut primitives);
        Self::convert_bvh_nodes(&bvh, &primitives)
    }

    /// Convert bvh crate nodes to our BvhNode format
    fn convert_bvh_nodes(bvh: &BVHf, primitives: &[BvhPrimitive]) -> BvhResult {
        let mut nodes = Vec::with_capacity(bvh.nodes.len());
        let mut primitive_indices = Vec::with_capacity(primitives.len());

        Self::convert_node_recursive(&bvh.nodes, 0, primitives, &mut nodes, &mut primitive_indices);

        BvhResult {
            nodes,
            primitive_indices,
        }
    }

    /// Depth-first conversion; the root ends up at index 0
    fn convert_node_recursive(
        bvh_nodes: &[bvh::bvh::BvhNode<f32, 3>],
        node_index: usize,
        primitives: &[BvhPrimitive],
        result_nodes: &mut Vec<BvhNode>,
        primitive_indices: &mut Vec<u32>,
    ) -> u32 {
        let current_result_index = result_nodes.len() as u32;
        let bvh_node = &bvh_nodes[node_index];

        let bvh_aabb = bvh_node.get_node_aabb(primitives);
        let aabb = Aabb::new(bvh_aabb.min.coords.into(), bvh_aabb.max.coords.into());

        match bvh_node {
            bvh::bvh::BvhNode::Node {
                child_l_index,
                child_r_index,
                ..
            } => {
                // Placeholder until both children have indices
                result_nodes.push(BvhNode::internal(aabb, 0, 0));

                let left_index =
                    Self::convert_node_recursive(bvh_nodes, *child_l_index, primitives, result_nodes, primitive_indices);
                let right_index =
                    Self::convert_node_recursive(bvh_nodes, *child_r_index, primitives, result_nodes, primitive_indices);

                result_nodes[current_result_index as usize] = BvhNode::internal(aabb, left_index, right_index);
            }
            bvh::bvh::BvhNode::Leaf { shape_index, .. } => {
                let start = primitive_indices.len() as u32;
                primitive_indices.push(*shape_index as u32);
                result_nodes.push(BvhNode::leaf(aabb, start, 1));
            }
        }

        current_result_index
    }
}

/// Result of BVH construction
pub struct BvhResult {
    pub nodes: Vec<BvhNode>,
    pub primitive_indices: Vec<u32>,
}

impl BvhResult {
    /// Peak occupancy of the traversal stack when no node is culled. Replays
    /// the device order: pop, then push right before left.
    pub fn stack_depth(&self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }
        let mut stack = vec![0u32];
        let mut peak = 1;
        while let Some(index) = stack.pop() {
            let Some(node) = self.nodes.get(index as usize) else {
                continue;
            };
            if !node.is_leaf() {
                stack.push(node.right_child);
                stack.push(node.left_child);
                peak = peak.max(stack.len());
            }
        }
        peak
    }

    /// Fails when traversal would overflow its fixed stack and drop subtrees
    pub fn check_traversal_stack(&self) -> Result<()> {
        RenderError::check_limit(
            "BVH traversal stack entries",
            self.stack_depth(),
            TracerConfig::TRAVERSAL_STACK_SIZE as u32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vivid_shared::Triangle;

    fn bounds_of(triangles: &[Triangle]) -> Vec<Aabb> {
        triangles.iter().map(Triangle::bounding_box).collect()
    }

    #[test]
    fn test_primitive_centroid_and_bounds() {
        let triangle = Triangle::new([0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [1.0, 2.0, 0.0], 0, 0);
        let primitive = BvhPrimitive::new(triangle.bounding_box(), 0);
        assert_eq!(primitive.centroid(), Point3f::new(1.0, 1.0, 0.0));

        let bbox = primitive.aabb();
        assert_eq!(bbox.min.coords, nalgebra::Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(bbox.max.coords, nalgebra::Vector3::new(2.0, 2.0, 0.0));
    }

    #[test]
    fn test_bvh_build_empty() {
        let result = BvhBuilder::build(&[]);

        assert_eq!(result.nodes.len(), 1);
        assert!(result.nodes[0].is_leaf());
        assert_eq!(result.nodes[0].primitive_count, 0);
        assert!(result.primitive_indices.is_empty());
    }

    #[test]
    fn test_bvh_build_single_triangle() {
        let triangles = vec![Triangle::new([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0], 0, 0)];

        let result = BvhBuilder::build(&bounds_of(&triangles));

        assert_eq!(result.nodes.len(), 1);
        assert!(result.nodes[0].is_leaf());
        assert_eq!(result.nodes[0].primitive_count, 1);
        assert_eq!(result.primitive_indices, vec![0]);
    }

    #[test]
    fn test_bvh_build_multiple_triangles() {
        let triangles = vec![
            Triangle::new([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0], 0, 0),
            Triangle::new([2.0, 0.0, 0.0], [3.0, 0.0, 0.0], [2.5, 1.0, 0.0], 0, 1),
            Triangle::new([4.0, 0.0, 0.0], [5.0, 0.0, 0.0], [4.5, 1.0, 0.0], 0, 2),
        ];

        let result = BvhBuilder::build(&bounds_of(&triangles));

        assert_eq!(result.nodes.len(), 5);
        let mut indices = result.primitive_indices.clone();
        indices.sort();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    /// Each internal node has a leaf on the right and continues on the left
    fn chain(levels: u32) -> BvhResult {
        let mut nodes = Vec::new();
        for level in 0..levels {
            nodes.push(BvhNode::internal(Aabb::empty(), 2 * level + 2, 2 * level + 1));
            nodes.push(BvhNode::leaf(Aabb::empty(), level, 1));
        }
        nodes.push(BvhNode::leaf(Aabb::empty(), levels, 1));
        BvhResult {
            nodes,
            primitive_indices: (0..=levels).collect(),
        }
    }

    #[test]
    fn test_stack_depth_follows_traversal_order() {
        assert_eq!(BvhBuilder::build(&[]).stack_depth(), 1);
        assert_eq!(chain(1).stack_depth(), 2);
        assert_eq!(chain(10).stack_depth(), 11);

        let triangles: Vec<Triangle> = (0..64)
            .map(|i| {
                let x = i as f32 * 2.0;
                Triangle::new([x, 0.0, 0.0], [x + 1.0, 0.0, 0.0], [x + 0.5, 1.0, 0.0], 0, i)
            })
            .collect();
        let result = BvhBuilder::build(&bounds_of(&triangles));
        assert!(result.stack_depth() <= 16);
        assert!(result.check_traversal_stack().is_ok());
    }

    #[test]
    fn test_deep_hierarchies_are_rejected() {
        assert!(chain(63).check_traversal_stack().is_ok());
        assert!(matches!(
            chain(70).check_traversal_stack(),
            Err(RenderError::ResourceExhausted { requested: 71, limit: 64, .. })
        ));
    }

    #[test]
    fn test_bvh_node_bounds() {
        let triangles = vec![
            Triangle::new([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0], 0, 0),
            Triangle::new([2.0, 0.0, 0.0], [3.0, 0.0, 0.0], [2.5, 1.0, 0.0], 0, 1),
        ];

        let result = BvhBuilder::build(&bounds_of(&triangles));

        // Root node should encompass all triangles
        let root = &result.nodes[0];
        assert!(root.bounds.min[0] <= 0.0);
        assert!(root.bounds.max[0] >= 3.0);
        assert!(root.bounds.min[1] <= 0.0);
        assert!(root.bounds.max[1] >= 1.0);
        assert!(!root.is_leaf());
    }
}
