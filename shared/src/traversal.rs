//! Two-level BVH traversal over the combined acceleration structure buffer.
//!
//! Both the CPU backend and the compute kernel run this code, so the layout is
//! read word by word instead of through typed slices.

use glam::{Vec2, Vec3};
#[cfg(target_arch = "spirv")]
use spirv_std::num_traits::Float;

use crate::{transform_3x4, AccelOffsets, BvhNode, InstanceRecord, Triangle, TracerConfig};

const NODE_WORDS: u32 = (core::mem::size_of::<BvhNode>() / 4) as u32;
const INSTANCE_WORDS: u32 = (core::mem::size_of::<InstanceRecord>() / 4) as u32;
const TRIANGLE_WORDS: u32 = (core::mem::size_of::<Triangle>() / 4) as u32;
const BLAS_WORDS: u32 = 4;
const EMPTY_SLOT: u32 = 0xFFFF_FFFF;

pub struct RayFlags;

impl RayFlags {
    pub const NONE: u32 = 0;
    /// Every candidate is committed without running any-hit
    pub const OPAQUE: u32 = 0x01;
    pub const TERMINATE_ON_FIRST_HIT: u32 = 0x04;
    pub const SKIP_CLOSEST_HIT: u32 = 0x08;
    pub const CULL_BACK_FACING_TRIANGLES: u32 = 0x10;
}

#[derive(Copy, Clone, Debug)]
pub struct RayDesc {
    pub origin: Vec3,
    pub direction: Vec3,
    pub t_min: f32,
    pub t_max: f32,
    pub flags: u32,
    pub cull_mask: u32,
}

impl RayDesc {
    pub fn new(origin: Vec3, direction: Vec3, t_min: f32, t_max: f32, flags: u32) -> Self {
        Self {
            origin,
            direction,
            t_min,
            t_max,
            flags,
            cull_mask: 0xFF,
        }
    }
}

/// Candidate or committed intersection
#[derive(Copy, Clone, Debug)]
pub struct HitInfo {
    pub t: f32,
    pub instance_index: u32,
    pub instance_custom_index: u32,
    pub geometry_index: u32,
    pub primitive_id: u32,
    /// Weights of vertex 1 and vertex 2
    pub barycentrics: Vec2,
    /// Hit record index: instance SBT offset + geometry index
    pub sbt_record: u32,
    pub front_face: bool,
}

impl HitInfo {
    pub fn none() -> Self {
        Self {
            t: f32::MAX,
            instance_index: EMPTY_SLOT,
            instance_custom_index: 0,
            geometry_index: 0,
            primitive_id: 0,
            barycentrics: Vec2::ZERO,
            sbt_record: EMPTY_SLOT,
            front_face: false,
        }
    }
}

/// Result of a traced ray - using GPU-friendly representation
#[derive(Copy, Clone, Debug)]
pub struct TraceResult {
    pub hit: bool,
    pub info: HitInfo,
}

/// Any-hit program: return `true` to commit the candidate, `false` to ignore it
pub trait AnyHit {
    fn any_hit(&mut self, candidate: &HitInfo) -> bool;
}

/// Accepts every candidate
pub struct AcceptAll;

impl AnyHit for AcceptAll {
    fn any_hit(&mut self, _candidate: &HitInfo) -> bool {
        true
    }
}

/// Provides access to acceleration structure data stored in the combined buffer
#[derive(Copy, Clone)]
pub struct AccelView<'a> {
    words: &'a [u32],
    offsets: AccelOffsets,
}

impl<'a> AccelView<'a> {
    pub fn new(words: &'a [u32], offsets: AccelOffsets) -> Self {
        Self { words, offsets }
    }

    pub fn offsets(&self) -> &AccelOffsets {
        &self.offsets
    }

    pub fn instance_count(&self) -> u32 {
        self.offsets.instance_count
    }

    fn f32_at(&self, word: u32) -> f32 {
        f32::from_bits(self.words[word as usize])
    }

    fn vec3_at(&self, word: u32) -> Vec3 {
        Vec3::new(self.f32_at(word), self.f32_at(word + 1), self.f32_at(word + 2))
    }

    fn rows_at(&self, word: u32) -> [[f32; 4]; 3] {
        let mut rows = [[0.0; 4]; 3];
        for r in 0..3 {
            for c in 0..4 {
                rows[r][c] = self.f32_at(word + (r * 4 + c) as u32);
            }
        }
        rows
    }

    pub fn instance(&self, index: u32) -> InstanceRecord {
        let base = self.offsets.instances + index * INSTANCE_WORDS;
        InstanceRecord {
            object_to_world: self.rows_at(base),
            world_to_object: self.rows_at(base + 12),
            blas_index: self.words[(base + 24) as usize],
            sbt_offset: self.words[(base + 25) as usize],
            mask: self.words[(base + 26) as usize],
            custom_index: self.words[(base + 27) as usize],
        }
    }

    fn blas_node_base(&self, blas_index: u32) -> (u32, u32, u32, u32) {
        let base = (self.offsets.blas_table + blas_index * BLAS_WORDS) as usize;
        (
            self.offsets.blas_nodes + self.words[base] * NODE_WORDS,
            self.words[base + 1],
            self.offsets.blas_indices + self.words[base + 2],
            self.offsets.triangles + self.words[base + 3] * TRIANGLE_WORDS,
        )
    }

    fn triangle_vertices(&self, base: u32) -> (Vec3, Vec3, Vec3) {
        (self.vec3_at(base), self.vec3_at(base + 4), self.vec3_at(base + 8))
    }
}

/// Slab test against the ray interval
pub fn ray_aabb_intersect(origin: Vec3, inv_dir: Vec3, aabb_min: Vec3, aabb_max: Vec3, t_min: f32, t_max: f32) -> bool {
    let t1 = (aabb_min - origin) * inv_dir;
    let t2 = (aabb_max - origin) * inv_dir;

    let near = t1.min(t2);
    let far = t1.max(t2);

    let t_enter = near.x.max(near.y).max(near.z).max(t_min);
    let t_exit = far.x.min(far.y).min(far.z).min(t_max);

    t_enter <= t_exit
}

#[derive(Copy, Clone, Debug)]
pub struct TriangleHit {
    pub hit: bool,
    pub t: f32,
    pub barycentrics: Vec2,
    pub front_face: bool,
}

/// Möller-Trumbore ray-triangle intersection; counter-clockwise faces are front faces
pub fn intersect_triangle(
    origin: Vec3,
    direction: Vec3,
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
    t_min: f32,
    t_max: f32,
    cull_back_faces: bool,
) -> TriangleHit {
    let miss = TriangleHit {
        hit: false,
        t: t_max,
        barycentrics: Vec2::ZERO,
        front_face: false,
    };

    let edge1 = v1 - v0;
    let edge2 = v2 - v0;
    let h = direction.cross(edge2);
    let a = edge1.dot(h);

    if a.abs() < TracerConfig::PARALLEL_EPSILON {
        return miss;
    }
    let front_face = a > 0.0;
    if cull_back_faces && !front_face {
        return miss;
    }

    let f = 1.0 / a;
    let s = origin - v0;
    let u = f * s.dot(h);
    if u < 0.0 || u > 1.0 {
        return miss;
    }

    let q = s.cross(edge1);
    let v = f * direction.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return miss;
    }

    let t = f * edge2.dot(q);
    if t < t_min || t >= t_max {
        return miss;
    }

    TriangleHit {
        hit: true,
        t,
        barycentrics: Vec2::new(u, v),
        front_face,
    }
}

/// Direction components below this magnitude get a clamped reciprocal
const MIN_DIRECTION: f32 = 1e-20;

/// Component-wise reciprocal that stays finite, so a slab test never forms
/// `0 * inf` for a ray lying in a box face plane
fn safe_inverse(d: Vec3) -> Vec3 {
    Vec3::new(safe_reciprocal(d.x), safe_reciprocal(d.y), safe_reciprocal(d.z))
}

fn safe_reciprocal(x: f32) -> f32 {
    if x.abs() >= MIN_DIRECTION {
        1.0 / x
    } else if x.is_sign_negative() {
        -1.0 / MIN_DIRECTION
    } else {
        1.0 / MIN_DIRECTION
    }
}

/// Traverses the top level, then each reached instance's bottom level.
///
/// Candidates are handed to `any_hit` unless the ray is opaque; committed hits
/// shrink the ray interval. Returns the closest committed hit.
pub fn trace_ray<A: AnyHit>(accel: &AccelView, ray: &RayDesc, any_hit: &mut A) -> TraceResult {
    let mut result = TraceResult {
        hit: false,
        info: HitInfo::none(),
    };
    if accel.offsets.tlas_node_count == 0 || accel.offsets.instance_count == 0 {
        return result;
    }

    let opaque = ray.flags & RayFlags::OPAQUE != 0;
    let terminate_on_first = ray.flags & RayFlags::TERMINATE_ON_FIRST_HIT != 0;
    let cull_back = ray.flags & RayFlags::CULL_BACK_FACING_TRIANGLES != 0;

    let mut closest_t = ray.t_max;
    let mut done = false;
    let inv_dir = safe_inverse(ray.direction);

    // Stack for BVH traversal (GPU-friendly - fixed size)
    let mut tlas_stack: [u32; TracerConfig::TRAVERSAL_STACK_SIZE] = [EMPTY_SLOT; TracerConfig::TRAVERSAL_STACK_SIZE];
    let mut tlas_ptr = 1;
    tlas_stack[0] = 0;

    while tlas_ptr > 0 && !done {
        tlas_ptr -= 1;
        let node = tlas_stack[tlas_ptr];
        if node == EMPTY_SLOT || node >= accel.offsets.tlas_node_count {
            continue;
        }

        let node_base = accel.offsets.tlas_nodes + node * NODE_WORDS;
        let bounds_min = accel.vec3_at(node_base);
        let bounds_max = accel.vec3_at(node_base + 4);
        if !ray_aabb_intersect(ray.origin, inv_dir, bounds_min, bounds_max, ray.t_min, closest_t) {
            continue;
        }

        let left_child = accel.words[(node_base + 8) as usize];
        let right_child = accel.words[(node_base + 9) as usize];

        if left_child != EMPTY_SLOT {
            // Internal node: push right first for left-first traversal
            if right_child != EMPTY_SLOT && tlas_ptr < TracerConfig::TRAVERSAL_STACK_SIZE {
                tlas_stack[tlas_ptr] = right_child;
                tlas_ptr += 1;
            }
            if tlas_ptr < TracerConfig::TRAVERSAL_STACK_SIZE {
                tlas_stack[tlas_ptr] = left_child;
                tlas_ptr += 1;
            }
            continue;
        }

        let leaf_start = accel.words[(node_base + 10) as usize];
        let leaf_count = accel.words[(node_base + 11) as usize];

        let mut i = 0;
        while i < leaf_count && !done {
            let instance_index = accel.words[(accel.offsets.tlas_indices + leaf_start + i) as usize];
            i += 1;

            let instance = accel.instance(instance_index);
            if instance.mask & ray.cull_mask & 0xFF == 0 {
                continue;
            }

            let origin = transform_3x4(&instance.world_to_object, ray.origin, 1.0);
            let direction = transform_3x4(&instance.world_to_object, ray.direction, 0.0);
            let object_inv_dir = safe_inverse(direction);
            let (blas_nodes, blas_node_count, blas_indices, blas_triangles) = accel.blas_node_base(instance.blas_index);
            if blas_node_count == 0 {
                continue;
            }

            let mut stack: [u32; TracerConfig::TRAVERSAL_STACK_SIZE] = [EMPTY_SLOT; TracerConfig::TRAVERSAL_STACK_SIZE];
            let mut ptr = 1;
            stack[0] = 0;

            while ptr > 0 && !done {
                ptr -= 1;
                let current = stack[ptr];
                if current == EMPTY_SLOT || current >= blas_node_count {
                    continue;
                }

                let base = blas_nodes + current * NODE_WORDS;
                if !ray_aabb_intersect(origin, object_inv_dir, accel.vec3_at(base), accel.vec3_at(base + 4), ray.t_min, closest_t) {
                    continue;
                }

                let left = accel.words[(base + 8) as usize];
                let right = accel.words[(base + 9) as usize];
                if left != EMPTY_SLOT {
                    if right != EMPTY_SLOT && ptr < TracerConfig::TRAVERSAL_STACK_SIZE {
                        stack[ptr] = right;
                        ptr += 1;
                    }
                    if ptr < TracerConfig::TRAVERSAL_STACK_SIZE {
                        stack[ptr] = left;
                        ptr += 1;
                    }
                    continue;
                }

                let start = accel.words[(base + 10) as usize];
                let count = accel.words[(base + 11) as usize];
                let mut j = 0;
                while j < count && !done {
                    let triangle = accel.words[(blas_indices + start + j) as usize];
                    j += 1;

                    let tri_base = blas_triangles + triangle * TRIANGLE_WORDS;
                    let (v0, v1, v2) = accel.triangle_vertices(tri_base);
                    let hit = intersect_triangle(origin, direction, v0, v1, v2, ray.t_min, closest_t, cull_back);
                    if !hit.hit {
                        continue;
                    }

                    let geometry_index = accel.words[(tri_base + 3) as usize];
                    let candidate = HitInfo {
                        t: hit.t,
                        instance_index,
                        instance_custom_index: instance.custom_index,
                        geometry_index,
                        primitive_id: accel.words[(tri_base + 7) as usize],
                        barycentrics: hit.barycentrics,
                        sbt_record: instance.sbt_offset + geometry_index,
                        front_face: hit.front_face,
                    };

                    if opaque || any_hit.any_hit(&candidate) {
                        closest_t = hit.t;
                        result.hit = true;
                        result.info = candidate;
                        done = terminate_on_first;
                    }
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triangle_hit_reports_barycentrics_and_facing() {
        let v0 = Vec3::new(0.0, 0.0, 0.0);
        let v1 = Vec3::new(1.0, 0.0, 0.0);
        let v2 = Vec3::new(0.0, 1.0, 0.0);
        // Counter-clockwise seen from +z
        let hit = intersect_triangle(Vec3::new(0.25, 0.5, 1.0), -Vec3::Z, v0, v1, v2, 0.0, 10.0, true);
        assert!(hit.hit);
        assert!(hit.front_face);
        assert!((hit.t - 1.0).abs() < 1e-6);
        assert!((hit.barycentrics - Vec2::new(0.25, 0.5)).length() < 1e-6);

        let back = intersect_triangle(Vec3::new(0.25, 0.5, -1.0), Vec3::Z, v0, v1, v2, 0.0, 10.0, true);
        assert!(!back.hit);
        let back = intersect_triangle(Vec3::new(0.25, 0.5, -1.0), Vec3::Z, v0, v1, v2, 0.0, 10.0, false);
        assert!(back.hit && !back.front_face);
    }

    #[test]
    fn triangle_outside_interval_is_missed() {
        let v0 = Vec3::new(-1.0, -1.0, 0.0);
        let v1 = Vec3::new(1.0, -1.0, 0.0);
        let v2 = Vec3::new(0.0, 1.0, 0.0);
        let o = Vec3::new(0.0, 0.0, 5.0);
        assert!(!intersect_triangle(o, -Vec3::Z, v0, v1, v2, 0.0, 4.0, false).hit);
        assert!(!intersect_triangle(o, -Vec3::Z, v0, v1, v2, 6.0, 10.0, false).hit);
        assert!(intersect_triangle(o, -Vec3::Z, v0, v1, v2, 4.0, 6.0, false).hit);
    }

    #[test]
    fn slab_test_respects_interval() {
        let inv = safe_inverse(Vec3::new(1.0, 0.0, 0.0));
        let o = Vec3::new(-5.0, 0.5, 0.5);
        assert!(ray_aabb_intersect(o, inv, Vec3::ZERO, Vec3::ONE, 0.0, 100.0));
        assert!(!ray_aabb_intersect(o, inv, Vec3::ZERO, Vec3::ONE, 0.0, 4.0));
        assert!(!ray_aabb_intersect(o, inv, Vec3::ZERO, Vec3::ONE, 7.0, 100.0));
        assert!(!ray_aabb_intersect(Vec3::new(-5.0, 2.0, 0.5), inv, Vec3::ZERO, Vec3::ONE, 0.0, 100.0));
    }

    #[test]
    fn rays_in_a_face_plane_still_hit() {
        let inv = safe_inverse(Vec3::new(1.0, 0.0, -0.0));
        assert!(inv.is_finite());
        assert!(inv.z < 0.0);

        // Origin in the plane of the y = 0 face
        let o = Vec3::new(-5.0, 0.0, 0.5);
        assert!(ray_aabb_intersect(o, inv, Vec3::ZERO, Vec3::ONE, 0.0, 100.0));
        assert!(!ray_aabb_intersect(o, inv, Vec3::ZERO, Vec3::ONE, 0.0, 4.0));
        assert!(!ray_aabb_intersect(Vec3::new(-5.0, -0.1, 0.0), inv, Vec3::ZERO, Vec3::ONE, 0.0, 100.0));
    }

    #[test]
    fn empty_structure_misses() {
        let words: [u32; 0] = [];
        let view = AccelView::new(&words, AccelOffsets::default());
        let ray = RayDesc::new(Vec3::ZERO, Vec3::Z, 0.0, 1.0, RayFlags::NONE);
        assert!(!trace_ray(&view, &ray, &mut AcceptAll).hit);
    }
}
