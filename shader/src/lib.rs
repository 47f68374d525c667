#![no_std]

use spirv_std::glam::{UVec2, UVec3};
use spirv_std::spirv;
use vivid_shared::environment::EnvironmentView;
use vivid_shared::path::{self, PathScene};
use vivid_shared::sbt::ShaderTable;
use vivid_shared::splat::{self, SplatScene};
use vivid_shared::surface::SurfaceBuffers;
use vivid_shared::traversal::AccelView;
use vivid_shared::{GaussianParticle, LaunchParams, MaterialParams, TextureInfo};

fn outside_launch(id: UVec3, params: &LaunchParams) -> bool {
    id.x >= params.uniforms.launch_width || id.y >= params.uniforms.launch_height
}

#[spirv(compute(threads(8, 8)))]
pub fn path_trace_cs(
    #[spirv(global_invocation_id)] id: UVec3,
    #[spirv(descriptor_set = 0, binding = 0, storage_buffer)] params: &LaunchParams,
    #[spirv(descriptor_set = 0, binding = 1, storage_buffer)] accel_words: &[u32],
    #[spirv(descriptor_set = 0, binding = 2, storage_buffer)] sbt_words: &[u32],
    #[spirv(descriptor_set = 0, binding = 3, storage_buffer)] vertices: &[f32],
    #[spirv(descriptor_set = 0, binding = 4, storage_buffer)] indices: &[u32],
    #[spirv(descriptor_set = 0, binding = 5, storage_buffer)] materials: &[MaterialParams],
    #[spirv(descriptor_set = 0, binding = 6, storage_buffer)] textures: &[TextureInfo],
    #[spirv(descriptor_set = 0, binding = 7, storage_buffer)] env_texels: &[[f32; 4]],
    #[spirv(descriptor_set = 0, binding = 8, storage_buffer)] env_cdf: &[f32],
    #[spirv(descriptor_set = 0, binding = 9, storage_buffer)] _particles: &[GaussianParticle],
    #[spirv(descriptor_set = 0, binding = 10, storage_buffer)] output: &mut [[f32; 4]],
    #[spirv(descriptor_set = 0, binding = 11, storage_buffer)] texels: &[[f32; 4]],
) {
    if outside_launch(id, params) {
        return;
    }
    let index = (id.y * params.uniforms.launch_width + id.x) as usize;
    let u = &params.uniforms;

    let scene = PathScene {
        uniforms: u,
        accel: AccelView::new(accel_words, params.accel),
        table: ShaderTable::new(sbt_words, params.sbt),
        surface: SurfaceBuffers {
            vertices,
            indices,
            materials,
            textures,
            texels,
        },
        environment: EnvironmentView::new(env_texels, env_cdf, u.env_width, u.env_height, u.env_rotation),
    };

    output[index] = path::render_pixel(&scene, UVec2::new(id.x, id.y), output[index]);
}

#[spirv(compute(threads(8, 8)))]
pub fn splat_trace_cs(
    #[spirv(global_invocation_id)] id: UVec3,
    #[spirv(descriptor_set = 0, binding = 0, storage_buffer)] params: &LaunchParams,
    #[spirv(descriptor_set = 0, binding = 1, storage_buffer)] accel_words: &[u32],
    #[spirv(descriptor_set = 0, binding = 2, storage_buffer)] sbt_words: &[u32],
    #[spirv(descriptor_set = 0, binding = 9, storage_buffer)] particles: &[GaussianParticle],
    #[spirv(descriptor_set = 0, binding = 10, storage_buffer)] output: &mut [[f32; 4]],
) {
    if outside_launch(id, params) {
        return;
    }
    let index = (id.y * params.uniforms.launch_width + id.x) as usize;

    let scene = SplatScene {
        uniforms: &params.uniforms,
        accel: AccelView::new(accel_words, params.accel),
        table: ShaderTable::new(sbt_words, params.sbt),
        particles,
    };

    output[index] = splat::render_pixel(&scene, UVec2::new(id.x, id.y), output[index]);
}
