//! Scene compiler: packs geometry once per distinct handle, builds one bottom
//! level per distinct part list and one top level over every instance.

use ahash::AHashMap;
use glam::Mat4;
use log::{info, warn};
use vivid_shared::TracerConfig;

use crate::backend::{BlasGeometryDesc, BlasHandle, RayTracingBackend, TlasHandle, TlasInstanceDesc};
use crate::error::{RenderError, Result};
use crate::gaussian::{instance_transform, unit_icosahedron, GaussianCloud};
use crate::scene::{Geometry, GeometryId, Scene};

/// Packed vertex and index data for every geometry in a build
#[derive(Clone, Debug, Default)]
pub struct GeometryBuffers {
    pub vertices: Vec<f32>,
    pub indices: Vec<u32>,
    /// Floats per packed vertex; the first three are always the position
    pub vertex_stride: u32,
}

impl GeometryBuffers {
    pub fn new(vertex_stride: u32) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            vertex_stride,
        }
    }

    pub fn vertex_count(&self) -> u32 {
        if self.vertex_stride == 0 {
            return 0;
        }
        (self.vertices.len() / self.vertex_stride as usize) as u32
    }

    pub fn position(&self, vertex: u32) -> Result<[f32; 3]> {
        let base = vertex as usize * self.vertex_stride as usize;
        match self.vertices.get(base..base + 3) {
            Some(p) => Ok([p[0], p[1], p[2]]),
            None => Err(RenderError::geometry(format!(
                "vertex {vertex} outside a buffer of {} vertices",
                self.vertex_count()
            ))),
        }
    }
}

/// Writes one geometry vertex into the packed buffer
pub trait VertexPacker {
    /// Floats written per vertex, at least 3
    fn stride(&self) -> u32;

    fn pack(&self, geometry: &Geometry, vertex: usize, out: &mut Vec<f32>);
}

/// pos.xyz, uv.x, normal.xyz, uv.y; the layout the surface programs read
pub struct InterleavedVertex;

impl VertexPacker for InterleavedVertex {
    fn stride(&self) -> u32 {
        TracerConfig::VERTEX_STRIDE_FLOATS
    }

    fn pack(&self, geometry: &Geometry, vertex: usize, out: &mut Vec<f32>) {
        let p = geometry.positions()[vertex];
        let n = geometry.normals()[vertex];
        let uv = geometry.uvs()[vertex];
        out.extend_from_slice(&[p[0], p[1], p[2], uv[0], n[0], n[1], n[2], uv[1]]);
    }
}

/// Positions only, for structures whose hit programs never read vertices
pub struct PositionOnly;

impl VertexPacker for PositionOnly {
    fn stride(&self) -> u32 {
        3
    }

    fn pack(&self, geometry: &Geometry, vertex: usize, out: &mut Vec<f32>) {
        out.extend_from_slice(&geometry.positions()[vertex]);
    }
}

/// Where one geometry landed in the packed buffers
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GeometrySlice {
    pub vertex_offset: u32,
    pub vertex_count: u32,
    /// `NO_INDEX_BUFFER` for unindexed geometry
    pub index_offset: u32,
    pub triangle_count: u32,
}

impl GeometrySlice {
    pub fn blas_desc(&self) -> BlasGeometryDesc {
        BlasGeometryDesc {
            vertex_offset: self.vertex_offset,
            vertex_count: self.vertex_count,
            index_offset: self.index_offset,
            triangle_count: self.triangle_count,
        }
    }
}

/// Appends `geometry` to `buffers`
pub fn pack_geometry(buffers: &mut GeometryBuffers, geometry: &Geometry, packer: &dyn VertexPacker) -> GeometrySlice {
    let vertex_offset = buffers.vertex_count();
    for vertex in 0..geometry.vertex_count() {
        packer.pack(geometry, vertex, &mut buffers.vertices);
    }
    let index_offset = match geometry.indices() {
        Some(indices) => {
            let offset = buffers.indices.len() as u32;
            buffers.indices.extend_from_slice(indices);
            offset
        }
        None => TracerConfig::NO_INDEX_BUFFER,
    };
    GeometrySlice {
        vertex_offset,
        vertex_count: geometry.vertex_count() as u32,
        index_offset,
        triangle_count: geometry.triangle_count() as u32,
    }
}

/// Inline words of one surface hit record
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PartRecord {
    pub vertex_offset: u32,
    pub index_offset: u32,
    pub material: u32,
}

impl PartRecord {
    pub const WORDS: u32 = 3;

    pub fn words(&self) -> [u32; 3] {
        [self.vertex_offset, self.index_offset, self.material]
    }
}

pub struct CompiledScene {
    pub buffers: GeometryBuffers,
    pub slices: AHashMap<GeometryId, GeometrySlice>,
    pub tlas: TlasHandle,
    pub blas_count: usize,
    /// One record per mesh part, instance order then part order
    pub part_records: Vec<PartRecord>,
}

/// Builds the structures for every instance of `scene`.
///
/// Part records come out in the same order the top level assigns record
/// offsets, so record `sbt_offset + part` belongs to that instance's part.
pub fn compile_scene<B: RayTracingBackend + ?Sized>(
    scene: &Scene,
    backend: &mut B,
    packer: &dyn VertexPacker,
) -> Result<CompiledScene> {
    let mut buffers = GeometryBuffers::new(packer.stride());
    let mut slices: AHashMap<GeometryId, GeometrySlice> = AHashMap::new();
    let mut part_records = Vec::new();

    for (_, instance) in scene.instances() {
        for part in &instance.parts {
            let slice = match slices.get(&part.geometry) {
                Some(slice) => *slice,
                None => {
                    let slice = pack_geometry(&mut buffers, scene.geometry(part.geometry)?, packer);
                    slices.insert(part.geometry, slice);
                    slice
                }
            };
            scene.material(part.material)?;
            part_records.push(PartRecord {
                vertex_offset: slice.vertex_offset,
                index_offset: slice.index_offset,
                material: part.material.0,
            });
        }
    }

    let mut blas_cache: AHashMap<Vec<GeometryId>, BlasHandle> = AHashMap::new();
    let mut instances = Vec::with_capacity(scene.instance_count());
    let mut sbt_offset = 0u32;
    for (id, instance) in scene.instances() {
        let key: Vec<GeometryId> = instance.parts.iter().map(|part| part.geometry).collect();
        let blas = match blas_cache.get(&key) {
            Some(handle) => *handle,
            None => {
                let descs: Vec<BlasGeometryDesc> = key.iter().map(|g| slices[g].blas_desc()).collect();
                let handle = backend.build_bottom_level(&descs, &buffers)?;
                blas_cache.insert(key, handle);
                handle
            }
        };
        instances.push(TlasInstanceDesc {
            transform: instance.transform,
            blas,
            sbt_offset,
            mask: instance.mask,
            custom_index: id.0,
        });
        sbt_offset += instance.parts.len() as u32;
    }
    let tlas = backend.build_top_level(&instances)?;

    info!(
        "Compiled {} instances: {} geometries, {} BLAS, {} hit records",
        instances.len(),
        slices.len(),
        blas_cache.len(),
        part_records.len()
    );

    Ok(CompiledScene {
        buffers,
        slices,
        tlas,
        blas_count: blas_cache.len(),
        part_records,
    })
}

pub struct CompiledSplats {
    pub buffers: GeometryBuffers,
    pub tlas: TlasHandle,
    /// Original particle index of each hit record
    pub included: Vec<u32>,
}

/// One icosahedron instance per particle whose opacity exceeds `alpha_min`
pub fn compile_gaussians<B: RayTracingBackend + ?Sized>(
    cloud: &GaussianCloud,
    alpha_min: f32,
    backend: &mut B,
) -> Result<CompiledSplats> {
    let icosahedron = unit_icosahedron()?;
    let mut buffers = GeometryBuffers::new(PositionOnly.stride());
    let slice = pack_geometry(&mut buffers, &icosahedron, &PositionOnly);

    let mut included = Vec::with_capacity(cloud.len());
    let mut transforms: Vec<(u32, Mat4)> = Vec::with_capacity(cloud.len());
    for (index, particle) in cloud.particles().iter().enumerate() {
        if let Some(transform) = instance_transform(particle, alpha_min) {
            included.push(index as u32);
            transforms.push((index as u32, transform));
        }
    }
    let excluded = cloud.len() - included.len();
    if excluded > 0 {
        warn!("Excluded {excluded} particles at or below alpha_min {alpha_min}");
    }

    let instances: Vec<TlasInstanceDesc> = if transforms.is_empty() {
        Vec::new()
    } else {
        let blas = backend.build_bottom_level(&[slice.blas_desc()], &buffers)?;
        transforms
            .iter()
            .enumerate()
            .map(|(record, (index, transform))| TlasInstanceDesc {
                transform: *transform,
                blas,
                sbt_offset: record as u32,
                mask: 0xFF,
                custom_index: *index,
            })
            .collect()
    };
    let tlas = backend.build_top_level(&instances)?;
    info!("Compiled {} of {} particles", included.len(), cloud.len());

    Ok(CompiledSplats { buffers, tlas, included })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Material, MeshPart};
    use crate::software::SoftwareBackend;
    use glam::Vec3;

    fn triangle(indexed: bool) -> Geometry {
        Geometry::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![[0.0, 0.0, 1.0]; 3],
            Some(vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]),
            indexed.then(|| vec![0, 1, 2]),
        )
        .unwrap()
    }

    #[test]
    fn interleaved_layout() {
        let mut buffers = GeometryBuffers::new(InterleavedVertex.stride());
        let slice = pack_geometry(&mut buffers, &triangle(true), &InterleavedVertex);
        assert_eq!(slice.vertex_count, 3);
        assert_eq!(buffers.vertices.len(), 24);
        assert_eq!(&buffers.vertices[8..16], &[1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0]);
        assert_eq!(buffers.position(2).unwrap(), [0.0, 1.0, 0.0]);
        assert!(buffers.position(3).is_err());
    }

    #[test]
    fn shared_geometry_is_packed_once() {
        let mut scene = Scene::new();
        let indexed = scene.add_geometry(triangle(true));
        let loose = scene.add_geometry(triangle(false));
        let m0 = scene.add_material(Material::default()).unwrap();
        let m1 = scene.add_material(Material::lambert([0.5; 3])).unwrap();

        let two_parts = vec![
            MeshPart { geometry: indexed, material: m0 },
            MeshPart { geometry: loose, material: m1 },
        ];
        scene.add_instance("a", two_parts.clone(), Mat4::IDENTITY, false).unwrap();
        scene
            .add_instance("b", two_parts, Mat4::from_translation(Vec3::X * 3.0), false)
            .unwrap();
        scene
            .add_instance("c", vec![MeshPart { geometry: loose, material: m0 }], Mat4::IDENTITY, false)
            .unwrap();

        let mut backend = SoftwareBackend::new();
        let compiled = compile_scene(&scene, &mut backend, &InterleavedVertex).unwrap();

        assert_eq!(compiled.buffers.vertex_count(), 6);
        assert_eq!(compiled.buffers.indices, vec![0, 1, 2]);
        assert_eq!(compiled.blas_count, 2);
        assert_eq!(compiled.part_records.len(), 5);

        let loose_slice = compiled.slices[&loose];
        assert_eq!(loose_slice.vertex_offset, 3);
        assert_eq!(loose_slice.index_offset, TracerConfig::NO_INDEX_BUFFER);
        assert_eq!(
            compiled.part_records[3],
            PartRecord {
                vertex_offset: 3,
                index_offset: TracerConfig::NO_INDEX_BUFFER,
                material: m1.0,
            }
        );
        assert_eq!(compiled.part_records[4].material, m0.0);
    }

    #[test]
    fn empty_scene_compiles() {
        let scene = Scene::new();
        let mut backend = SoftwareBackend::new();
        let compiled = compile_scene(&scene, &mut backend, &InterleavedVertex).unwrap();
        assert!(compiled.part_records.is_empty());
        assert_eq!(compiled.blas_count, 0);
    }

    #[test]
    fn gaussians_below_threshold_are_excluded() {
        let particles = [0.5, 0.01, 0.2, 0.009]
            .iter()
            .map(|&opacity| crate::gaussian::particle(Vec3::ZERO, Vec3::ONE, glam::Quat::IDENTITY, opacity, [0.0; 48]))
            .collect();
        let cloud = GaussianCloud::from_particles(particles).unwrap();
        let mut backend = SoftwareBackend::new();
        let compiled = compile_gaussians(&cloud, 0.01, &mut backend).unwrap();
        assert_eq!(compiled.included, vec![0, 2]);
        assert!(compiled
            .included
            .iter()
            .all(|&i| cloud.particles()[i as usize].opacity > 0.01));
    }
}
