//! Unidirectional path tracer with environment light sampling.

use glam::{UVec2, Vec2, Vec3};

use crate::accumulate::accumulate;
use crate::brdf::{evaluate, evaluate_angles, reflection_pdf, sample_reflection};
use crate::camera::CameraFrame;
use crate::environment::{to_solid_angle_pdf, EnvironmentView};
use crate::random::RandomStream;
use crate::sampling::power_heuristic;
use crate::sbt::ShaderTable;
use crate::surface::{surface_hit, SurfaceBuffers};
use crate::traversal::{trace_ray, AcceptAll, AccelView, HitInfo, RayDesc, RayFlags};
use crate::{TracerConfig, Uniforms};

/// Everything the path programs read
#[derive(Copy, Clone)]
pub struct PathScene<'a> {
    pub uniforms: &'a Uniforms,
    pub accel: AccelView<'a>,
    pub table: ShaderTable<'a>,
    pub surface: SurfaceBuffers<'a>,
    pub environment: EnvironmentView<'a>,
}

/// State carried between bounces
#[derive(Copy, Clone, Debug)]
pub struct PathPayload {
    /// Radiance gathered at the current vertex
    pub radiance: Vec3,
    /// Throughput factor for the next bounce
    pub attenuation: Vec3,
    pub depth: u32,
    pub rng: RandomStream,
    pub origin: Vec3,
    pub direction: Vec3,
    /// Solid-angle density of `direction` when it was BRDF sampled
    pub bounce_pdf: f32,
}

impl PathPayload {
    pub fn new(rng: RandomStream, origin: Vec3, direction: Vec3) -> Self {
        Self {
            radiance: Vec3::ZERO,
            attenuation: Vec3::ONE,
            depth: 0,
            rng,
            origin,
            direction,
            bounce_pdf: 0.0,
        }
    }
}

/// True when anything blocks the segment `[t_min, t_max]`
pub fn occluded(accel: &AccelView, origin: Vec3, direction: Vec3, t_min: f32, t_max: f32) -> bool {
    let ray = RayDesc::new(
        origin,
        direction,
        t_min,
        t_max,
        RayFlags::OPAQUE | RayFlags::TERMINATE_ON_FIRST_HIT | RayFlags::SKIP_CLOSEST_HIT,
    );
    trace_ray(accel, &ray, &mut AcceptAll).hit
}

/// Surface program: emission, next-event estimation and the next bounce
pub fn closest_hit(scene: &PathScene, payload: &mut PathPayload, hit: &HitInfo) {
    let u = scene.uniforms;
    let surface = surface_hit(&scene.surface, &scene.accel, &scene.table, hit, payload.origin, payload.direction);
    let m = &surface.material;
    let n = surface.normal;
    let v = -payload.direction.normalize();

    payload.radiance = if v.dot(surface.geometric_normal) > 0.0 {
        m.emittance
    } else {
        Vec3::ZERO
    };

    let light_sampling = u.sampling_method != Uniforms::SAMPLE_BRDF;
    if light_sampling && payload.depth + 1 < u.max_path_length && scene.environment.is_enabled() {
        let sample = scene.environment.sample(payload.rng.next_vec2());
        let l = scene.environment.direction(sample.uv);
        let ln = l.dot(n);
        let pdf = to_solid_angle_pdf(sample.pdf, sample.uv);
        if ln > 0.0 && pdf > 0.0 && !occluded(&scene.accel, surface.position, l, u.t_min, u.t_max) {
            let weight = if u.sampling_method == Uniforms::SAMPLE_MIS {
                power_heuristic(pdf, reflection_pdf(m, n, v, l))
            } else {
                1.0
            };
            let brdf = evaluate(m, n, v, l);
            payload.radiance += scene.environment.radiance(sample.uv) * brdf * (ln * weight / pdf);
        }
    }

    let bounce = sample_reflection(m, n, v, &mut payload.rng);
    if bounce.angles.ln > 0.0 && bounce.pdf > 0.0 {
        payload.attenuation = evaluate_angles(m, &bounce.angles) * (bounce.angles.ln / bounce.pdf);
        payload.depth += 1;
    } else {
        payload.attenuation = Vec3::ZERO;
        payload.depth = u.max_path_length;
    }
    payload.origin = surface.position;
    payload.direction = bounce.direction;
    payload.bounce_pdf = bounce.pdf;
}

/// Miss program: environment radiance, weighted against light sampling
pub fn miss(scene: &PathScene, payload: &mut PathPayload) {
    let u = scene.uniforms;
    let hidden_background = payload.depth == 0 && u.draw_background == 0;
    let counted_by_light_sampling = payload.depth > 0 && u.sampling_method == Uniforms::SAMPLE_LIGHT;

    payload.radiance = Vec3::ZERO;
    if !hidden_background && !counted_by_light_sampling && scene.environment.is_enabled() {
        let uv = scene.environment.uv(payload.direction);
        let mut radiance = scene.environment.radiance(uv);
        if payload.depth > 0 && u.sampling_method == Uniforms::SAMPLE_MIS {
            let light_pdf = to_solid_angle_pdf(scene.environment.pdf(uv), uv);
            radiance *= power_heuristic(payload.bounce_pdf, light_pdf);
        }
        payload.radiance = radiance;
    }
    payload.attenuation = Vec3::ZERO;
    payload.depth = u.max_path_length;
}

/// Radiance along one camera path
pub fn trace_path(scene: &PathScene, origin: Vec3, direction: Vec3, rng: &mut RandomStream) -> Vec3 {
    let u = scene.uniforms;
    let mut payload = PathPayload::new(*rng, origin, direction);
    let mut radiance = Vec3::ZERO;
    let mut attenuation = Vec3::ONE;

    while payload.depth < u.max_path_length {
        let ray = RayDesc::new(payload.origin, payload.direction, u.t_min, u.t_max, RayFlags::OPAQUE);
        let result = trace_ray(&scene.accel, &ray, &mut AcceptAll);
        if result.hit {
            closest_hit(scene, &mut payload, &result.info);
        } else {
            miss(scene, &mut payload);
        }
        radiance += attenuation * payload.radiance;
        attenuation *= payload.attenuation;
    }

    *rng = payload.rng;
    radiance
}

/// Ray generation for one pixel: averages `samples_per_frame` paths and
/// folds the estimate into the running mean in `previous`
pub fn render_pixel(scene: &PathScene, pixel: UVec2, previous: [f32; 4]) -> [f32; 4] {
    let u = scene.uniforms;
    let frame = CameraFrame::from_uniforms(u);
    let size = Vec2::new(u.launch_width as f32, u.launch_height as f32);
    let pixel_index = pixel.y * u.launch_width + pixel.x;
    let mut rng = RandomStream::new(pixel_index, u.accumulated_frames, TracerConfig::SEED_ROUNDS);

    let samples = if u.samples_per_frame == 0 { 1 } else { u.samples_per_frame };
    let mut sum = Vec3::ZERO;
    for _ in 0..samples {
        let jitter = rng.next_vec2();
        let lens = rng.next_vec2();
        let (origin, direction) = frame.primary_ray(pixel.as_vec2(), size, jitter, lens);
        sum += trace_path(scene, origin, direction, &mut rng);
    }

    accumulate(previous, sum / samples as f32, u.accumulated_frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::build_environment_cdf;
    use crate::{AccelOffsets, ShaderTableRegions};
    use bytemuck::Zeroable;

    fn uniforms(method: u32, draw_background: u32) -> Uniforms {
        Uniforms {
            to_world: glam::Mat4::IDENTITY.to_cols_array_2d(),
            camera_aspect: [1.0, 1.0],
            t_min: 1e-3,
            t_max: 1e5,
            samples_per_frame: 1,
            max_path_length: 5,
            sampling_method: method,
            draw_background,
            launch_width: 4,
            launch_height: 4,
            env_width: 4,
            env_height: 2,
            ..Uniforms::zeroed()
        }
    }

    #[test]
    fn empty_scene_shows_environment_only_when_background_is_drawn() {
        let texels = vec![[0.5, 0.25, 1.0, 1.0]; 8];
        let mut cdf = vec![0.0; 10];
        build_environment_cdf(&texels, 4, 2, &mut cdf);
        let words: [u32; 0] = [];
        for (draw, expected) in [(1, Vec3::new(0.5, 0.25, 1.0)), (0, Vec3::ZERO)] {
            let u = uniforms(Uniforms::SAMPLE_MIS, draw);
            let scene = PathScene {
                uniforms: &u,
                accel: AccelView::new(&words, AccelOffsets::default()),
                table: ShaderTable::new(&words, ShaderTableRegions::default()),
                surface: SurfaceBuffers {
                    vertices: &[],
                    indices: &[],
                    materials: &[],
                    textures: &[],
                    texels: &[],
                },
                environment: EnvironmentView::new(&texels, &cdf, 4, 2, 0.0),
            };
            let out = render_pixel(&scene, UVec2::new(1, 2), [0.0; 4]);
            assert!((Vec3::new(out[0], out[1], out[2]) - expected).length() < 1e-6);
        }
    }

    #[test]
    fn miss_terminates_the_path() {
        let u = uniforms(Uniforms::SAMPLE_LIGHT, 1);
        let texels = vec![[1.0; 4]; 8];
        let mut cdf = vec![0.0; 10];
        build_environment_cdf(&texels, 4, 2, &mut cdf);
        let words: [u32; 0] = [];
        let scene = PathScene {
            uniforms: &u,
            accel: AccelView::new(&words, AccelOffsets::default()),
            table: ShaderTable::new(&words, ShaderTableRegions::default()),
            surface: SurfaceBuffers {
                vertices: &[],
                indices: &[],
                materials: &[],
                textures: &[],
                texels: &[],
            },
            environment: EnvironmentView::new(&texels, &cdf, 4, 2, 0.0),
        };
        let mut payload = PathPayload::new(RandomStream::from_state(1), Vec3::ZERO, Vec3::Y);
        payload.depth = 2;
        miss(&scene, &mut payload);
        // Already counted by next-event estimation
        assert_eq!(payload.radiance, Vec3::ZERO);
        assert_eq!(payload.depth, u.max_path_length);
    }
}
