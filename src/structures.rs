//! Host-built two-level acceleration structures and their flattening into the
//! single word buffer read by traversal.

use log::debug;
use vivid_shared::{AccelOffsets, Aabb, BlasRecord, BvhNode, InstanceRecord, Triangle, TracerConfig};

use crate::backend::{BlasGeometryDesc, BlasHandle, DeviceLimits, TlasHandle, TlasInstanceDesc};
use crate::accel::GeometryBuffers;
use crate::bvh::BvhBuilder;
use crate::error::{RenderError, Result};

struct BuiltBlas {
    nodes: Vec<BvhNode>,
    indices: Vec<u32>,
    triangles: Vec<Triangle>,
    geometry_count: u32,
}

impl BuiltBlas {
    fn bounds(&self) -> Aabb {
        self.nodes[0].bounds
    }
}

struct BuiltTlas {
    nodes: Vec<BvhNode>,
    indices: Vec<u32>,
    instances: Vec<InstanceRecord>,
    required_hit_records: u32,
}

/// Flattened structures ready for traversal
pub struct FlatAccel {
    pub words: Vec<u32>,
    pub offsets: AccelOffsets,
    /// Smallest hit region that covers every instance's records
    pub required_hit_records: u32,
}

#[derive(Default)]
pub struct AccelerationStore {
    blas: Vec<BuiltBlas>,
    tlas: Vec<BuiltTlas>,
}

impl AccelerationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blas_count(&self) -> usize {
        self.blas.len()
    }

    pub fn build_blas(
        &mut self,
        geometries: &[BlasGeometryDesc],
        buffers: &GeometryBuffers,
        limits: &DeviceLimits,
    ) -> Result<BlasHandle> {
        let total: usize = geometries.iter().map(|g| g.triangle_count as usize).sum();
        RenderError::check_limit("bottom-level primitives", total, limits.max_primitive_count)?;
        if total == 0 {
            return Err(RenderError::geometry("bottom-level structure without triangles"));
        }

        let mut triangles = Vec::with_capacity(total);
        for (geometry_index, desc) in geometries.iter().enumerate() {
            for primitive in 0..desc.triangle_count {
                let corner = |k: u32| -> Result<[f32; 3]> {
                    let local = if desc.index_offset == TracerConfig::NO_INDEX_BUFFER {
                        primitive * 3 + k
                    } else {
                        let slot = (desc.index_offset + primitive * 3 + k) as usize;
                        *buffers
                            .indices
                            .get(slot)
                            .ok_or_else(|| RenderError::geometry(format!("index slot {slot} outside the index buffer")))?
                    };
                    if local >= desc.vertex_count {
                        return Err(RenderError::geometry(format!(
                            "vertex {local} outside geometry of {} vertices",
                            desc.vertex_count
                        )));
                    }
                    buffers.position(desc.vertex_offset + local)
                };
                triangles.push(Triangle::new(
                    corner(0)?,
                    corner(1)?,
                    corner(2)?,
                    geometry_index as u32,
                    primitive,
                ));
            }
        }

        let bounds: Vec<Aabb> = triangles.iter().map(Triangle::bounding_box).collect();
        let bvh = BvhBuilder::build(&bounds);
        bvh.check_traversal_stack()?;
        debug!(
            "Built BLAS {} over {} triangles ({} nodes)",
            self.blas.len(),
            triangles.len(),
            bvh.nodes.len()
        );

        self.blas.push(BuiltBlas {
            nodes: bvh.nodes,
            indices: bvh.primitive_indices,
            triangles,
            geometry_count: geometries.len() as u32,
        });
        Ok(BlasHandle(self.blas.len() as u32 - 1))
    }

    pub fn build_tlas(&mut self, instances: &[TlasInstanceDesc], limits: &DeviceLimits) -> Result<TlasHandle> {
        RenderError::check_limit("instances", instances.len(), limits.max_instance_count)?;

        let mut records = Vec::with_capacity(instances.len());
        let mut bounds = Vec::with_capacity(instances.len());
        let mut required_hit_records = 0;
        for desc in instances {
            let blas = self.blas.get(desc.blas.0 as usize).ok_or(RenderError::UnknownHandle {
                kind: "bottom-level structure",
                index: desc.blas.0,
            })?;
            records.push(InstanceRecord::new(
                desc.transform,
                desc.blas.0,
                desc.sbt_offset,
                desc.mask as u32,
                desc.custom_index,
            ));
            bounds.push(blas.bounds().transformed(&desc.transform));
            required_hit_records = required_hit_records.max(desc.sbt_offset + blas.geometry_count);
        }

        let bvh = BvhBuilder::build(&bounds);
        bvh.check_traversal_stack()?;
        self.tlas.push(BuiltTlas {
            nodes: bvh.nodes,
            indices: bvh.primitive_indices,
            instances: records,
            required_hit_records,
        });
        Ok(TlasHandle(self.tlas.len() as u32 - 1))
    }

    /// Packs one top level and every bottom level into a single word buffer
    pub fn flatten(&self, tlas: TlasHandle) -> Result<FlatAccel> {
        let top = self.tlas.get(tlas.0 as usize).ok_or(RenderError::NotReady("top-level structure"))?;

        let mut words: Vec<u32> = Vec::new();
        let mut offsets = AccelOffsets::default();

        offsets.tlas_nodes = words.len() as u32;
        offsets.tlas_node_count = if top.instances.is_empty() { 0 } else { top.nodes.len() as u32 };
        words.extend_from_slice(bytemuck::cast_slice(&top.nodes));

        offsets.tlas_indices = words.len() as u32;
        words.extend_from_slice(&top.indices);

        offsets.instances = words.len() as u32;
        offsets.instance_count = top.instances.len() as u32;
        words.extend_from_slice(bytemuck::cast_slice(&top.instances));

        let mut table = Vec::with_capacity(self.blas.len());
        let (mut node_offset, mut index_offset, mut triangle_offset) = (0u32, 0u32, 0u32);
        for blas in &self.blas {
            table.push(BlasRecord {
                node_offset,
                node_count: blas.nodes.len() as u32,
                index_offset,
                triangle_offset,
            });
            node_offset += blas.nodes.len() as u32;
            index_offset += blas.indices.len() as u32;
            triangle_offset += blas.triangles.len() as u32;
        }

        offsets.blas_table = words.len() as u32;
        offsets.blas_count = table.len() as u32;
        words.extend_from_slice(bytemuck::cast_slice(&table));

        offsets.blas_nodes = words.len() as u32;
        for blas in &self.blas {
            words.extend_from_slice(bytemuck::cast_slice(&blas.nodes));
        }
        offsets.blas_indices = words.len() as u32;
        for blas in &self.blas {
            words.extend_from_slice(&blas.indices);
        }
        offsets.triangles = words.len() as u32;
        offsets.triangle_count = triangle_offset;
        for blas in &self.blas {
            words.extend_from_slice(bytemuck::cast_slice(&blas.triangles));
        }

        Ok(FlatAccel {
            words,
            offsets,
            required_hit_records: top.required_hit_records,
        })
    }

    pub fn clear(&mut self) {
        self.blas.clear();
        self.tlas.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Vec3};
    use vivid_shared::traversal::{trace_ray, AcceptAll, AccelView, RayDesc, RayFlags};

    /// Unit quad in the xy plane facing +z, two indexed triangles
    fn quad_buffers() -> (GeometryBuffers, BlasGeometryDesc) {
        let corners = [[-1.0, -1.0, 0.0], [1.0, -1.0, 0.0], [1.0, 1.0, 0.0], [-1.0, 1.0, 0.0]];
        let mut buffers = GeometryBuffers::new(3);
        for c in corners {
            buffers.vertices.extend_from_slice(&c);
        }
        buffers.indices.extend_from_slice(&[0, 1, 2, 0, 2, 3]);
        let desc = BlasGeometryDesc {
            vertex_offset: 0,
            vertex_count: 4,
            index_offset: 0,
            triangle_count: 2,
        };
        (buffers, desc)
    }

    fn instance(transform: Mat4, blas: BlasHandle, sbt_offset: u32) -> TlasInstanceDesc {
        TlasInstanceDesc {
            transform,
            blas,
            sbt_offset,
            mask: 0xFF,
            custom_index: 0,
        }
    }

    #[test]
    fn two_instances_of_one_blas() {
        let limits = DeviceLimits::default();
        let (buffers, desc) = quad_buffers();
        let mut store = AccelerationStore::new();
        let blas = store.build_blas(&[desc], &buffers, &limits).unwrap();
        let near = Mat4::from_translation(Vec3::new(0.0, 0.0, -2.0));
        let far = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0)) * Mat4::from_scale(Vec3::splat(3.0));
        let tlas = store
            .build_tlas(&[instance(far, blas, 0), instance(near, blas, 1)], &limits)
            .unwrap();
        let flat = store.flatten(tlas).unwrap();
        assert_eq!(flat.required_hit_records, 2);

        let view = AccelView::new(&flat.words, flat.offsets);
        let ray = RayDesc::new(Vec3::ZERO, -Vec3::Z, 0.0, 100.0, RayFlags::OPAQUE);
        let hit = trace_ray(&view, &ray, &mut AcceptAll);
        assert!(hit.hit);
        assert!((hit.info.t - 2.0).abs() < 1e-5);
        assert_eq!(hit.info.instance_index, 1);
        assert_eq!(hit.info.sbt_record, 1);

        // Past the near quad only the scaled far one remains
        let ray = RayDesc::new(Vec3::new(2.0, 0.0, 0.0), -Vec3::Z, 0.0, 100.0, RayFlags::OPAQUE);
        let hit = trace_ray(&view, &ray, &mut AcceptAll);
        assert!(hit.hit);
        assert!((hit.info.t - 5.0).abs() < 1e-4);
        assert_eq!(hit.info.sbt_record, 0);
    }

    #[test]
    fn back_faces_are_culled_on_request() {
        let limits = DeviceLimits::default();
        let (buffers, desc) = quad_buffers();
        let mut store = AccelerationStore::new();
        let blas = store.build_blas(&[desc], &buffers, &limits).unwrap();
        let tlas = store.build_tlas(&[instance(Mat4::IDENTITY, blas, 0)], &limits).unwrap();
        let flat = store.flatten(tlas).unwrap();
        let view = AccelView::new(&flat.words, flat.offsets);

        let from_behind = RayDesc::new(Vec3::new(0.2, 0.1, -3.0), Vec3::Z, 0.0, 100.0, RayFlags::OPAQUE);
        assert!(trace_ray(&view, &from_behind, &mut AcceptAll).hit);
        let culled = RayDesc {
            flags: RayFlags::OPAQUE | RayFlags::CULL_BACK_FACING_TRIANGLES,
            ..from_behind
        };
        assert!(!trace_ray(&view, &culled, &mut AcceptAll).hit);
    }

    #[test]
    fn cull_mask_hides_instances() {
        let limits = DeviceLimits::default();
        let (buffers, desc) = quad_buffers();
        let mut store = AccelerationStore::new();
        let blas = store.build_blas(&[desc], &buffers, &limits).unwrap();
        let mut masked = instance(Mat4::from_translation(Vec3::new(0.0, 0.0, -1.0)), blas, 0);
        masked.mask = 0x02;
        let tlas = store.build_tlas(&[masked], &limits).unwrap();
        let flat = store.flatten(tlas).unwrap();
        let view = AccelView::new(&flat.words, flat.offsets);

        let mut ray = RayDesc::new(Vec3::ZERO, -Vec3::Z, 0.0, 10.0, RayFlags::OPAQUE);
        ray.cull_mask = 0x01;
        assert!(!trace_ray(&view, &ray, &mut AcceptAll).hit);
        ray.cull_mask = 0x03;
        assert!(trace_ray(&view, &ray, &mut AcceptAll).hit);
    }

    #[test]
    fn limits_are_enforced() {
        let limits = DeviceLimits {
            max_primitive_count: 1,
            max_instance_count: 0,
            ..DeviceLimits::default()
        };
        let (buffers, desc) = quad_buffers();
        let mut store = AccelerationStore::new();
        assert!(matches!(
            store.build_blas(&[desc], &buffers, &limits),
            Err(RenderError::ResourceExhausted { requested: 2, limit: 1, .. })
        ));

        let blas = store.build_blas(&[desc], &buffers, &DeviceLimits::default()).unwrap();
        assert!(matches!(
            store.build_tlas(&[instance(Mat4::IDENTITY, blas, 0)], &limits),
            Err(RenderError::ResourceExhausted { .. })
        ));
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let limits = DeviceLimits::default();
        let (mut buffers, desc) = quad_buffers();
        buffers.indices[4] = 9;
        let mut store = AccelerationStore::new();
        assert!(matches!(
            store.build_blas(&[desc], &buffers, &limits),
            Err(RenderError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn flatten_requires_a_built_tlas() {
        let store = AccelerationStore::new();
        assert!(matches!(store.flatten(TlasHandle(0)), Err(RenderError::NotReady(_))));
    }
}
