//! Seam between the scene compilers and whatever executes ray tracing.

use glam::Mat4;
use vivid_shared::{GaussianParticle, MaterialParams, TextureInfo, Uniforms};

use crate::accel::GeometryBuffers;
use crate::environment::EnvironmentMap;
use crate::error::Result;
use crate::sbt::ShaderBindingTable;

/// Fixed constants the structure compiler and the table builder must honour
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeviceLimits {
    pub handle_size: u32,
    pub handle_alignment: u32,
    pub base_alignment: u32,
    pub max_instance_count: u32,
    pub max_primitive_count: u32,
    pub max_hit_records: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            handle_size: 32,
            handle_alignment: 32,
            base_alignment: 64,
            max_instance_count: 1 << 24,
            max_primitive_count: 1 << 29,
            max_hit_records: 1 << 24,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlasHandle(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TlasHandle(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub u32);

/// One triangle geometry inside a bottom-level structure
#[derive(Copy, Clone, Debug)]
pub struct BlasGeometryDesc {
    /// First vertex in the packed vertex buffer
    pub vertex_offset: u32,
    pub vertex_count: u32,
    /// First index in the packed index buffer, or `NO_INDEX_BUFFER`
    pub index_offset: u32,
    pub triangle_count: u32,
}

#[derive(Copy, Clone, Debug)]
pub struct TlasInstanceDesc {
    pub transform: Mat4,
    pub blas: BlasHandle,
    pub sbt_offset: u32,
    pub mask: u8,
    pub custom_index: u32,
}

/// Which shared ray-generation program a pipeline launches
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RayGenProgram {
    PathTracer,
    GaussianSplats,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HitGroupDesc {
    pub closest_hit: bool,
    pub any_hit: bool,
}

/// Program groups in declaration order: ray generation, misses, hit groups
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramSet {
    pub raygen: RayGenProgram,
    pub miss_count: u32,
    pub hit_groups: Vec<HitGroupDesc>,
}

impl ProgramSet {
    pub fn group_count(&self) -> u32 {
        1 + self.miss_count + self.hit_groups.len() as u32
    }

    pub fn first_hit_group(&self) -> u32 {
        1 + self.miss_count
    }
}

/// Bulk data a launch reads besides the structures and the table
#[derive(Copy, Clone)]
pub struct SceneResources<'a> {
    pub geometry: &'a GeometryBuffers,
    pub materials: &'a [MaterialParams],
    pub textures: &'a [TextureInfo],
    pub texels: &'a [[f32; 4]],
    pub environment: Option<&'a EnvironmentMap>,
    pub particles: &'a [GaussianParticle],
}

pub struct LaunchDesc<'a> {
    pub pipeline: PipelineHandle,
    pub tlas: TlasHandle,
    pub sbt: &'a ShaderBindingTable,
    pub uniforms: Uniforms,
    pub resources: SceneResources<'a>,
}

impl LaunchDesc<'_> {
    pub fn width(&self) -> u32 {
        self.uniforms.launch_width
    }

    pub fn height(&self) -> u32 {
        self.uniforms.launch_height
    }
}

pub trait RayTracingBackend {
    fn limits(&self) -> &DeviceLimits;

    fn build_bottom_level(&mut self, geometries: &[BlasGeometryDesc], buffers: &GeometryBuffers) -> Result<BlasHandle>;

    fn build_top_level(&mut self, instances: &[TlasInstanceDesc]) -> Result<TlasHandle>;

    fn create_pipeline(&mut self, programs: &ProgramSet) -> Result<PipelineHandle>;

    /// One opaque `handle_size`-byte handle per program group, in declaration order
    fn shader_group_handles(&self, pipeline: PipelineHandle) -> Result<Vec<Vec<u8>>>;

    /// Runs ray generation over the launch grid, updating `output` in place
    fn trace_rays(&mut self, launch: &LaunchDesc, output: &mut [[f32; 4]]) -> Result<()>;

    /// Drops every bottom- and top-level structure ahead of a rebuild
    fn release_acceleration_structures(&mut self);
}

/// Handles whose first word is the group index, padded with zeros. Handles
/// shorter than a word are truncated; table builds reject those limits.
pub(crate) fn indexed_group_handles(limits: &DeviceLimits, group_count: u32) -> Vec<Vec<u8>> {
    (0..group_count)
        .map(|group| {
            let mut handle = vec![0u8; limits.handle_size as usize];
            let index = group.to_le_bytes();
            let len = handle.len().min(index.len());
            handle[..len].copy_from_slice(&index[..len]);
            handle
        })
        .collect()
}
