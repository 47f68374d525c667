//! Hit attribute reconstruction for triangle meshes.
//!
//! Each surface hit record carries three inline words: the first vertex of the
//! geometry in the shared vertex buffer, the first index (or `NO_INDEX_BUFFER`)
//! and the material slot.

use glam::{Vec2, Vec3, Vec4};
#[cfg(target_arch = "spirv")]
use spirv_std::num_traits::Float;

use crate::brdf::ShadingMaterial;
use crate::sbt::ShaderTable;
use crate::traversal::{AccelView, HitInfo};
use crate::{MaterialParams, TextureInfo, TracerConfig};

/// Bulk buffers shared by every surface hit record
#[derive(Copy, Clone)]
pub struct SurfaceBuffers<'a> {
    /// Interleaved pos.xyz, uv.x, normal.xyz, uv.y
    pub vertices: &'a [f32],
    pub indices: &'a [u32],
    pub materials: &'a [MaterialParams],
    pub textures: &'a [TextureInfo],
    pub texels: &'a [[f32; 4]],
}

#[derive(Copy, Clone, Debug)]
pub struct VertexAttributes {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

impl<'a> SurfaceBuffers<'a> {
    pub fn vertex(&self, index: u32) -> VertexAttributes {
        let base = (index * TracerConfig::VERTEX_STRIDE_FLOATS) as usize;
        let v = self.vertices;
        VertexAttributes {
            position: Vec3::new(v[base], v[base + 1], v[base + 2]),
            normal: Vec3::new(v[base + 4], v[base + 5], v[base + 6]),
            uv: Vec2::new(v[base + 3], v[base + 7]),
        }
    }

    /// Nearest texel with repeat wrapping
    pub fn sample_texture(&self, texture: u32, uv: Vec2) -> Vec3 {
        let info = self.textures[texture as usize];
        if info.width == 0 || info.height == 0 {
            return Vec3::ONE;
        }
        let u = uv.x - uv.x.floor();
        let v = uv.y - uv.y.floor();
        let x = ((u * info.width as f32) as u32).min(info.width - 1);
        let y = ((v * info.height as f32) as u32).min(info.height - 1);
        let t = self.texels[(info.offset + y * info.width + x) as usize];
        Vec4::from_array(t).truncate()
    }
}

/// World-space shading data at a committed hit
#[derive(Copy, Clone, Debug)]
pub struct SurfaceHit {
    pub position: Vec3,
    /// Shading normal, flipped towards the viewer
    pub normal: Vec3,
    /// Unflipped geometric normal
    pub geometric_normal: Vec3,
    pub uv: Vec2,
    pub material: ShadingMaterial,
}

/// Normal transform by the inverse transpose, taken from the world-to-object rows
pub fn transform_normal(world_to_object: &[[f32; 4]; 3], n: Vec3) -> Vec3 {
    let r = world_to_object;
    Vec3::new(r[0][0], r[0][1], r[0][2]) * n.x
        + Vec3::new(r[1][0], r[1][1], r[1][2]) * n.y
        + Vec3::new(r[2][0], r[2][1], r[2][2]) * n.z
}

pub fn surface_hit(
    buffers: &SurfaceBuffers,
    accel: &AccelView,
    table: &ShaderTable,
    hit: &HitInfo,
    ray_origin: Vec3,
    ray_direction: Vec3,
) -> SurfaceHit {
    let vertex_offset = table.hit_word(hit.sbt_record, 0);
    let index_offset = table.hit_word(hit.sbt_record, 1);
    let material_index = table.hit_word(hit.sbt_record, 2);

    let first = hit.primitive_id * 3;
    let (i0, i1, i2) = if index_offset == TracerConfig::NO_INDEX_BUFFER {
        (first, first + 1, first + 2)
    } else {
        let base = (index_offset + first) as usize;
        (buffers.indices[base], buffers.indices[base + 1], buffers.indices[base + 2])
    };
    let a0 = buffers.vertex(vertex_offset + i0);
    let a1 = buffers.vertex(vertex_offset + i1);
    let a2 = buffers.vertex(vertex_offset + i2);

    let b = hit.barycentrics;
    let w = 1.0 - b.x - b.y;
    let object_normal = a1.normal * b.x + a2.normal * b.y + a0.normal * w;
    let uv = a1.uv * b.x + a2.uv * b.y + a0.uv * w;

    let instance = accel.instance(hit.instance_index);
    let mut normal = transform_normal(&instance.world_to_object, object_normal).normalize();
    let geometric_normal = transform_normal(
        &instance.world_to_object,
        (a1.position - a0.position).cross(a2.position - a1.position),
    )
    .normalize();

    let v = -ray_direction.normalize();
    if v.dot(geometric_normal) < 0.0 {
        normal = -normal;
    }
    // Bend normals that face away from the viewer back into its hemisphere
    if v.dot(normal) <= 0.0 {
        normal = (v.cross(normal.cross(v)) + v * 0.01).normalize();
    }

    let params = buffers.materials[material_index as usize];
    let base_color = if params.base_color_texture == TracerConfig::NO_TEXTURE {
        Vec3::from_array(params.base_color)
    } else {
        Vec3::from_array(params.base_color) * buffers.sample_texture(params.base_color_texture, uv)
    };

    SurfaceHit {
        position: ray_origin + ray_direction * hit.t,
        normal,
        geometric_normal,
        uv,
        material: ShadingMaterial::resolve(&params, base_color),
    }
}
