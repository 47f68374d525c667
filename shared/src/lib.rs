#![cfg_attr(target_arch = "spirv", no_std)]

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

pub mod accumulate;
pub mod brdf;
pub mod camera;
pub mod environment;
pub mod path;
pub mod random;
pub mod sampling;
pub mod sbt;
pub mod splat;
pub mod surface;
pub mod traversal;

/// Configuration constants shared by the host and the kernels
pub struct TracerConfig;

impl TracerConfig {
    pub const WORKGROUP_SIZE: (u32, u32) = (8, 8);
    pub const TRAVERSAL_STACK_SIZE: usize = 64;
    pub const MAX_SPLAT_HITS: usize = 32;
    pub const VERTEX_STRIDE_FLOATS: u32 = 8;
    pub const SEED_ROUNDS: u32 = 8;
    pub const SPLAT_RESTART_EPSILON: f32 = 1e-4;
    pub const PARALLEL_EPSILON: f32 = 1e-9;

    /// Marks a geometry without an index buffer
    pub const NO_INDEX_BUFFER: u32 = u32::MAX;
    /// Marks an unused slot in the k-nearest splat buffer
    pub const INVALID_PARTICLE: u32 = u32::MAX;
    pub const NO_TEXTURE: u32 = u32::MAX;
}

/// Axis-Aligned Bounding Box for BVH
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Aabb {
    pub min: [f32; 3],      // Minimum bounds
    pub _padding0: f32,     // Padding for alignment
    pub max: [f32; 3],      // Maximum bounds
    pub _padding1: f32,     // Padding for alignment
}

/// BVH node shared by the top and bottom levels
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct BvhNode {
    pub bounds: Aabb,         // Bounding box of this node
    pub left_child: u32,      // Index to left child (0xFFFFFFFF if leaf)
    pub right_child: u32,     // Index to right child (0xFFFFFFFF if leaf)
    pub primitive_start: u32, // Starting index in the primitive index list (if leaf)
    pub primitive_count: u32, // Number of primitives (if leaf)
}

/// Object-space triangle stored inside a bottom-level structure
/// 48 bytes
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct Triangle {
    pub v0: [f32; 3],         // First vertex (12 bytes)
    pub geometry_index: u32,  // Geometry slot within the owning BLAS (4 bytes)
    pub v1: [f32; 3],         // Second vertex (12 bytes)
    pub primitive_id: u32,    // Triangle index within its geometry (4 bytes)
    pub v2: [f32; 3],         // Third vertex (12 bytes)
    pub _padding: u32,        // Padding for alignment (4 bytes)
}

/// Top-level instance record
/// 112 bytes
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct InstanceRecord {
    pub object_to_world: [[f32; 4]; 3], // 3x4 row-major affine transform (48 bytes)
    pub world_to_object: [[f32; 4]; 3], // Inverse of the above (48 bytes)
    pub blas_index: u32,                // Index into the BLAS table (4 bytes)
    pub sbt_offset: u32,                // Base hit record for this instance (4 bytes)
    pub mask: u32,                      // Visibility mask, low 8 bits (4 bytes)
    pub custom_index: u32,              // User index (4 bytes)
}

/// Location of one bottom-level structure inside the combined buffers
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct BlasRecord {
    pub node_offset: u32,     // First node, relative to the BLAS node region
    pub node_count: u32,
    pub index_offset: u32,    // First leaf index, relative to the BLAS index region
    pub triangle_offset: u32, // First triangle, relative to the triangle region
}

/// Acceleration structure offsets into the combined word buffer (in u32 units)
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct AccelOffsets {
    pub tlas_nodes: u32,
    pub tlas_node_count: u32,
    pub tlas_indices: u32,
    pub instances: u32,
    pub instance_count: u32,
    pub blas_table: u32,
    pub blas_count: u32,
    pub blas_nodes: u32,
    pub blas_indices: u32,
    pub triangles: u32,
    pub triangle_count: u32,
    pub _padding: u32,
}

/// Flattened material record
/// 80 bytes
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct MaterialParams {
    pub emittance: [f32; 3],     // Emitted radiance (12 bytes)
    pub kind: u32,               // Low byte = material class, 0x100/0x200 = Fresnel toggles (4 bytes)
    pub base_color: [f32; 3],    // Linear base color (12 bytes)
    pub base_color_texture: u32, // Texture index or u32::MAX (4 bytes)
    pub roughness: f32,
    pub specular: f32,
    pub metallic: f32,
    pub subsurface: f32,
    pub specular_tint: f32,
    pub sheen: f32,
    pub sheen_tint: f32,
    pub clearcoat: f32,
    pub clearcoat_gloss: f32,
    pub _padding: [f32; 3],
}

/// Texture information
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct TextureInfo {
    pub width: u32,
    pub height: u32,
    pub offset: u32,               // Offset in texel buffer
    pub _padding: u32,
}

/// Anisotropic Gaussian particle
/// 240 bytes
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct GaussianParticle {
    pub position: [f32; 3],   // Center (12 bytes)
    pub opacity: f32,         // Peak opacity (4 bytes)
    pub scale: [f32; 3],      // Per-axis standard deviation (12 bytes)
    pub _padding: f32,        // Padding for alignment (4 bytes)
    pub rotation: [f32; 4],   // Unit quaternion (w, x, y, z) (16 bytes)
    pub sh: [f32; 48],        // 16 RGB spherical-harmonics coefficients (192 bytes)
}

/// Per-frame parameter block consumed by both integrators
/// 160 bytes
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct Uniforms {
    pub to_world: [[f32; 4]; 4],  // Camera-to-world, column-major (64 bytes)
    pub camera_aspect: [f32; 2],  // tan(fov/2) scaled by aspect per axis
    pub lens_radius: f32,
    pub focus_distance: f32,
    pub t_min: f32,
    pub t_max: f32,
    pub transmittance_min: f32,
    pub alpha_min: f32,
    pub k: u32,
    pub sh_degree_max: u32,
    pub accumulated_frames: u32,
    pub early_stop: u32,          // 0 = unlimited
    pub samples_per_frame: u32,
    pub max_path_length: u32,
    pub sampling_method: u32,     // 0=BRDF, 1=light, 2=MIS
    pub debug_mode: u32,          // 0=composite, 1=closest particle, 2=hit count
    pub env_width: u32,
    pub env_height: u32,
    pub draw_background: u32,
    pub env_rotation: f32,        // Fraction of a full turn
    pub launch_width: u32,
    pub launch_height: u32,
    pub splat_jitter: u32,
    pub texture_count: u32,
}

/// Shader binding table regions (in u32 units)
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct ShaderTableRegions {
    pub raygen_offset: u32,
    pub miss_offset: u32,
    pub miss_count: u32,
    pub hit_offset: u32,
    pub hit_count: u32,
    pub stride: u32,
    pub handle_words: u32,
    pub _padding: u32,
}

/// Everything a kernel launch reads besides the bulk buffers
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct LaunchParams {
    pub uniforms: Uniforms,
    pub accel: AccelOffsets,
    pub sbt: ShaderTableRegions,
}

impl Aabb {
    /// Create a new AABB
    pub fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self {
            min,
            _padding0: 0.0,
            max,
            _padding1: 0.0,
        }
    }

    /// Create an empty AABB
    pub fn empty() -> Self {
        Self::new(
            [f32::INFINITY; 3],
            [f32::NEG_INFINITY; 3],
        )
    }

    /// Combine this AABB with another
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::new(
            [
                self.min[0].min(other.min[0]),
                self.min[1].min(other.min[1]),
                self.min[2].min(other.min[2]),
            ],
            [
                self.max[0].max(other.max[0]),
                self.max[1].max(other.max[1]),
                self.max[2].max(other.max[2]),
            ],
        )
    }

    pub fn grow(&self, point: [f32; 3]) -> Aabb {
        self.union(&Aabb::new(point, point))
    }

    /// True when every bound is finite and min <= max on all axes
    pub fn is_valid(&self) -> bool {
        let mut valid = true;
        for axis in 0..3 {
            valid &= self.min[axis].is_finite() && self.max[axis].is_finite();
            valid &= self.min[axis] <= self.max[axis];
        }
        valid
    }

    /// Get the center point of the AABB
    pub fn center(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    /// Bounds of this box after an affine transform
    pub fn transformed(&self, transform: &Mat4) -> Aabb {
        let mut result = Aabb::empty();
        for corner in 0..8u32 {
            let p = Vec3::new(
                if corner & 1 == 0 { self.min[0] } else { self.max[0] },
                if corner & 2 == 0 { self.min[1] } else { self.max[1] },
                if corner & 4 == 0 { self.min[2] } else { self.max[2] },
            );
            result = result.grow(transform.transform_point3(p).to_array());
        }
        result
    }
}

impl BvhNode {
    /// Create a new leaf node
    pub fn leaf(bounds: Aabb, primitive_start: u32, primitive_count: u32) -> Self {
        Self {
            bounds,
            left_child: u32::MAX,
            right_child: u32::MAX,
            primitive_start,
            primitive_count,
        }
    }

    /// Create a new internal node
    pub fn internal(bounds: Aabb, left_child: u32, right_child: u32) -> Self {
        Self {
            bounds,
            left_child,
            right_child,
            primitive_start: 0,
            primitive_count: 0,
        }
    }

    /// Check if this node is a leaf
    pub fn is_leaf(&self) -> bool {
        self.left_child == u32::MAX
    }
}

impl Triangle {
    pub fn new(v0: [f32; 3], v1: [f32; 3], v2: [f32; 3], geometry_index: u32, primitive_id: u32) -> Self {
        Self {
            v0,
            geometry_index,
            v1,
            primitive_id,
            v2,
            _padding: 0,
        }
    }

    pub fn bounding_box(&self) -> Aabb {
        Aabb::new(self.v0, self.v0).grow(self.v1).grow(self.v2)
    }
}

impl InstanceRecord {
    /// Build a record from an affine object-to-world matrix
    pub fn new(object_to_world: Mat4, blas_index: u32, sbt_offset: u32, mask: u32, custom_index: u32) -> Self {
        Self {
            object_to_world: rows_3x4(&object_to_world),
            world_to_object: rows_3x4(&object_to_world.inverse()),
            blas_index,
            sbt_offset,
            mask,
            custom_index,
        }
    }
}

/// Top three rows of an affine matrix, row-major
pub fn rows_3x4(m: &Mat4) -> [[f32; 4]; 3] {
    [m.row(0).to_array(), m.row(1).to_array(), m.row(2).to_array()]
}

/// Apply a row-major 3x4 affine transform; `w` selects point (1) or vector (0)
pub fn transform_3x4(rows: &[[f32; 4]; 3], v: Vec3, w: f32) -> Vec3 {
    let p = v.extend(w);
    Vec3::new(
        Vec4::from_array(rows[0]).dot(p),
        Vec4::from_array(rows[1]).dot(p),
        Vec4::from_array(rows[2]).dot(p),
    )
}

impl MaterialParams {
    pub const LAMBERT: u32 = 0;
    pub const GGX: u32 = 1;
    pub const PLASTIC: u32 = 2;
    pub const BLEND: u32 = 3;
    pub const DISNEY: u32 = 4;

    pub const FRESNEL_DIFFUSE: u32 = 0x100;
    pub const FRESNEL_SPECULAR: u32 = 0x200;

    pub fn class(&self) -> u32 {
        self.kind & 0xFF
    }
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            emittance: [0.0; 3],
            kind: Self::DISNEY | Self::FRESNEL_DIFFUSE | Self::FRESNEL_SPECULAR,
            base_color: [1.0; 3],
            base_color_texture: TracerConfig::NO_TEXTURE,
            roughness: 0.5,
            specular: 0.5,
            metallic: 0.0,
            subsurface: 0.0,
            specular_tint: 0.0,
            sheen: 0.0,
            sheen_tint: 0.5,
            clearcoat: 0.0,
            clearcoat_gloss: 1.0,
            _padding: [0.0; 3],
        }
    }
}

impl Uniforms {
    pub const SAMPLE_BRDF: u32 = 0;
    pub const SAMPLE_LIGHT: u32 = 1;
    pub const SAMPLE_MIS: u32 = 2;

    pub const DEBUG_NONE: u32 = 0;
    pub const DEBUG_CLOSEST_PARTICLE: u32 = 1;
    pub const DEBUG_HIT_COUNT: u32 = 2;
}
