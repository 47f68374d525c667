//! Gaussian particle compositing over k-nearest hit batches.
//!
//! Particles are enclosed by icosahedron instances; each traversal collects
//! the `k` closest front-face entries past the current distance, shades them
//! in order and restarts behind the last one.

use glam::{Quat, UVec2, Vec2, Vec3};
#[cfg(target_arch = "spirv")]
use spirv_std::num_traits::Float;

use crate::accumulate::accumulate;
use crate::camera::CameraFrame;
use crate::random::RandomStream;
use crate::sbt::ShaderTable;
use crate::traversal::{trace_ray, AccelView, AnyHit, HitInfo, RayDesc, RayFlags};
use crate::{GaussianParticle, TracerConfig, Uniforms};

const SH_C0: f32 = 0.282_094_8;
const SH_C1: f32 = 0.488_602_5;
const SH_C2: [f32; 5] = [1.092_548_4, -1.092_548_4, 0.315_391_57, -1.092_548_4, 0.546_274_2];
const SH_C3: [f32; 7] = [
    -0.590_043_6,
    2.890_611_4,
    -0.457_045_8,
    0.373_176_33,
    -0.457_045_8,
    1.445_305_7,
    -0.590_043_6,
];

#[derive(Copy, Clone, Debug)]
pub struct SplatHit {
    pub t: f32,
    pub particle: u32,
}

/// Any-hit program keeping the `k` closest entries in ascending order
pub struct KNearestHits<'a> {
    table: ShaderTable<'a>,
    pub hits: [SplatHit; TracerConfig::MAX_SPLAT_HITS],
    pub k: u32,
    pub hit_count: u32,
}

impl<'a> KNearestHits<'a> {
    pub fn new(table: ShaderTable<'a>, k: u32) -> Self {
        let mut hits = Self {
            table,
            hits: [SplatHit {
                t: 0.0,
                particle: TracerConfig::INVALID_PARTICLE,
            }; TracerConfig::MAX_SPLAT_HITS],
            k: k.clamp(1, TracerConfig::MAX_SPLAT_HITS as u32),
            hit_count: 0,
        };
        hits.reset(f32::MAX);
        hits
    }

    pub fn reset(&mut self, t_max: f32) {
        for slot in self.hits.iter_mut() {
            *slot = SplatHit {
                t: t_max,
                particle: TracerConfig::INVALID_PARTICLE,
            };
        }
    }

    pub fn kth(&self) -> SplatHit {
        self.hits[(self.k - 1) as usize]
    }

    /// Swap-insert; returns whether the candidate is now among the k closest
    pub fn insert(&mut self, t: f32, particle: u32) -> bool {
        let mut carried = SplatHit { t, particle };
        for i in 0..self.k as usize {
            if carried.t < self.hits[i].t {
                let tmp = self.hits[i];
                self.hits[i] = carried;
                carried = tmp;
            }
        }
        t <= self.kth().t
    }
}

impl<'a> AnyHit for KNearestHits<'a> {
    fn any_hit(&mut self, candidate: &HitInfo) -> bool {
        self.hit_count += 1;
        let particle = self.table.hit_word(candidate.sbt_record, 0);
        self.insert(candidate.t, particle);
        // Commit only the k-th distance so later candidates are clipped to it
        !(candidate.t < self.kth().t)
    }
}

/// Peak response of the particle along the ray, in [0, 1]
pub fn particle_response(particle: &GaussianParticle, origin: Vec3, direction: Vec3) -> f32 {
    let r = particle.rotation;
    let rotation = Quat::from_xyzw(r[1], r[2], r[3], r[0]).normalize();
    let inv_scale = Vec3::ONE / Vec3::from_array(particle.scale);
    let to_local = rotation.inverse();

    let o = to_local * (origin - Vec3::from_array(particle.position)) * inv_scale;
    let d = to_local * direction * inv_scale;
    let dd = d.dot(d);
    if dd <= 0.0 {
        return 0.0;
    }
    let t = -o.dot(d) / dd;
    let closest = o + d * t;
    (-0.5 * closest.dot(closest)).exp()
}

fn sh_coefficient(particle: &GaussianParticle, i: usize) -> Vec3 {
    Vec3::new(particle.sh[i * 3], particle.sh[i * 3 + 1], particle.sh[i * 3 + 2])
}

/// View-dependent color from up to degree-3 spherical harmonics
pub fn sh_radiance(particle: &GaussianParticle, direction: Vec3, degree: u32) -> Vec3 {
    let mut result = Vec3::splat(0.5) + sh_coefficient(particle, 0) * SH_C0;
    if degree > 0 {
        let x = direction.x;
        let y = direction.y;
        let z = direction.z;
        result += (sh_coefficient(particle, 1) * -y + sh_coefficient(particle, 2) * z - sh_coefficient(particle, 3) * x)
            * SH_C1;

        if degree > 1 {
            let (xx, yy, zz) = (x * x, y * y, z * z);
            let (xy, yz, xz) = (x * y, y * z, x * z);
            result += sh_coefficient(particle, 4) * (SH_C2[0] * xy)
                + sh_coefficient(particle, 5) * (SH_C2[1] * yz)
                + sh_coefficient(particle, 6) * (SH_C2[2] * (2.0 * zz - xx - yy))
                + sh_coefficient(particle, 7) * (SH_C2[3] * xz)
                + sh_coefficient(particle, 8) * (SH_C2[4] * (xx - yy));

            if degree > 2 {
                result += sh_coefficient(particle, 9) * (SH_C3[0] * y * (3.0 * xx - yy))
                    + sh_coefficient(particle, 10) * (SH_C3[1] * xy * z)
                    + sh_coefficient(particle, 11) * (SH_C3[2] * y * (4.0 * zz - xx - yy))
                    + sh_coefficient(particle, 12) * (SH_C3[3] * z * (2.0 * zz - 3.0 * xx - 3.0 * yy))
                    + sh_coefficient(particle, 13) * (SH_C3[4] * x * (4.0 * zz - xx - yy))
                    + sh_coefficient(particle, 14) * (SH_C3[5] * z * (xx - yy))
                    + sh_coefficient(particle, 15) * (SH_C3[6] * x * (xx - 3.0 * yy));
            }
        }
    }
    result.max(Vec3::ZERO)
}

fn particle_color(particle: &GaussianParticle, origin: Vec3, degree: u32) -> Vec3 {
    let to_particle = Vec3::from_array(particle.position) - origin;
    let length = to_particle.length();
    let direction = if length > 0.0 { to_particle / length } else { Vec3::Z };
    sh_radiance(particle, direction, degree)
}

#[derive(Copy, Clone)]
pub struct SplatScene<'a> {
    pub uniforms: &'a Uniforms,
    pub accel: AccelView<'a>,
    pub table: ShaderTable<'a>,
    pub particles: &'a [GaussianParticle],
}

#[derive(Copy, Clone, Debug)]
pub struct SplatResult {
    pub radiance: Vec3,
    pub transmittance: f32,
    pub steps: u32,
}

/// Front-to-back compositing along one ray
pub fn composite(scene: &SplatScene, origin: Vec3, direction: Vec3) -> SplatResult {
    let u = scene.uniforms;
    let mut collector = KNearestHits::new(scene.table, u.k);
    let k = collector.k as usize;

    let mut radiance = Vec3::ZERO;
    let mut transmittance = 1.0;
    let mut t_curr = u.t_min;
    let mut steps = 0;

    while u.transmittance_min < transmittance && t_curr < u.t_max {
        if u.early_stop != 0 && steps >= u.early_stop {
            break;
        }
        steps += 1;

        collector.reset(u.t_max);
        let ray = RayDesc::new(
            origin,
            direction,
            t_curr,
            u.t_max,
            RayFlags::CULL_BACK_FACING_TRIANGLES | RayFlags::SKIP_CLOSEST_HIT,
        );
        trace_ray(&scene.accel, &ray, &mut collector);
        t_curr = collector.kth().t + TracerConfig::SPLAT_RESTART_EPSILON;

        for i in 0..k {
            let entry = collector.hits[i];
            if entry.particle == TracerConfig::INVALID_PARTICLE {
                t_curr = u.t_max;
                break;
            }
            let particle = scene.particles[entry.particle as usize];
            let alpha = particle_response(&particle, origin, direction) * particle.opacity;
            if u.alpha_min < alpha {
                radiance += particle_color(&particle, origin, u.sh_degree_max) * (transmittance * alpha);
                transmittance *= 1.0 - alpha;
            }
        }
    }

    SplatResult {
        radiance,
        transmittance,
        steps,
    }
}

/// Color of the nearest enclosing icosahedron, ignoring opacity
pub fn closest_particle_color(scene: &SplatScene, origin: Vec3, direction: Vec3) -> Vec3 {
    let u = scene.uniforms;
    let ray = RayDesc::new(origin, direction, u.t_min, u.t_max, RayFlags::OPAQUE);
    let mut collector = KNearestHits::new(scene.table, 1);
    let result = trace_ray(&scene.accel, &ray, &mut collector);
    if !result.hit {
        return Vec3::ZERO;
    }
    let index = scene.table.hit_word(result.info.sbt_record, 0);
    particle_color(&scene.particles[index as usize], origin, u.sh_degree_max)
}

/// Palette for the any-hit invocation count of a single k-nearest traversal
pub fn hit_count_color(hit_count: u32) -> Vec3 {
    if hit_count == 0 {
        Vec3::ZERO
    } else if hit_count < 20 {
        Vec3::new(0.5, 0.5, 0.0)
    } else if hit_count < 40 {
        Vec3::new(0.5, 0.0, 0.5)
    } else if hit_count < 60 {
        Vec3::new(0.0, 0.5, 0.5)
    } else if hit_count < 80 {
        Vec3::new(0.5, 0.0, 0.0)
    } else if hit_count < 100 {
        Vec3::new(0.0, 0.5, 0.0)
    } else if hit_count < 150 {
        Vec3::new(0.0, 0.0, 0.5)
    } else {
        Vec3::splat(0.5)
    }
}

fn count_hits(scene: &SplatScene, origin: Vec3, direction: Vec3) -> u32 {
    let u = scene.uniforms;
    let mut collector = KNearestHits::new(scene.table, u.k);
    collector.reset(u.t_max);
    let ray = RayDesc::new(
        origin,
        direction,
        u.t_min,
        u.t_max,
        RayFlags::CULL_BACK_FACING_TRIANGLES | RayFlags::SKIP_CLOSEST_HIT,
    );
    trace_ray(&scene.accel, &ray, &mut collector);
    collector.hit_count
}

/// Ray generation for one pixel of the splat renderer
pub fn render_pixel(scene: &SplatScene, pixel: UVec2, previous: [f32; 4]) -> [f32; 4] {
    let u = scene.uniforms;
    let frame = CameraFrame::from_uniforms(u);
    let size = Vec2::new(u.launch_width as f32, u.launch_height as f32);
    let jitter = if u.splat_jitter != 0 {
        let mut rng = RandomStream::new(pixel.y * u.launch_width + pixel.x, u.accumulated_frames, TracerConfig::SEED_ROUNDS);
        rng.next_vec2()
    } else {
        Vec2::splat(0.5)
    };
    let origin = frame.position;
    let direction = frame.image_plane_direction(pixel.as_vec2(), size, jitter).normalize();

    let color = if u.debug_mode == Uniforms::DEBUG_CLOSEST_PARTICLE {
        closest_particle_color(scene, origin, direction)
    } else if u.debug_mode == Uniforms::DEBUG_HIT_COUNT {
        hit_count_color(count_hits(scene, origin, direction))
    } else {
        composite(scene, origin, direction).radiance
    };

    accumulate(previous, color, u.accumulated_frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ShaderTableRegions;
    use approx::assert_relative_eq;
    use bytemuck::Zeroable;

    fn particle(position: Vec3, scale: Vec3, opacity: f32) -> GaussianParticle {
        GaussianParticle {
            position: position.to_array(),
            opacity,
            scale: scale.to_array(),
            _padding: 0.0,
            rotation: [1.0, 0.0, 0.0, 0.0],
            sh: [0.0; 48],
        }
    }

    fn empty_table(words: &[u32]) -> ShaderTable<'_> {
        ShaderTable::new(words, ShaderTableRegions::default())
    }

    #[test]
    fn insertion_keeps_k_closest_sorted() {
        let words: [u32; 0] = [];
        let mut hits = KNearestHits::new(empty_table(&words), 3);
        hits.reset(100.0);
        for (t, p) in [(5.0, 0), (2.0, 1), (9.0, 2), (1.0, 3), (7.0, 4)] {
            hits.insert(t, p);
        }
        let order: Vec<u32> = hits.hits[..3].iter().map(|h| h.particle).collect();
        assert_eq!(order, vec![3, 1, 0]);
        assert_eq!(hits.kth().t, 5.0);
        assert!(!hits.insert(50.0, 9));
    }

    #[test]
    fn response_peaks_through_the_centre() {
        let p = particle(Vec3::new(0.0, 0.0, -5.0), Vec3::splat(0.5), 1.0);
        assert_relative_eq!(particle_response(&p, Vec3::ZERO, -Vec3::Z), 1.0, epsilon = 1e-6);
        // One standard deviation off axis
        let off = particle_response(&p, Vec3::new(0.5, 0.0, 0.0), -Vec3::Z);
        assert_relative_eq!(off, (-0.5f32).exp(), epsilon = 1e-5);
    }

    #[test]
    fn response_follows_rotation() {
        let mut p = particle(Vec3::ZERO, Vec3::new(2.0, 0.1, 0.1), 1.0);
        // 90 degrees about z: the long axis now points along y
        let half = core::f32::consts::FRAC_PI_4;
        p.rotation = [half.cos(), 0.0, 0.0, half.sin()];
        let along_y = particle_response(&p, Vec3::new(0.0, 1.0, 5.0), -Vec3::Z);
        let along_x = particle_response(&p, Vec3::new(1.0, 0.0, 5.0), -Vec3::Z);
        assert!(along_y > 0.8);
        assert!(along_x < 1e-6);
    }

    #[test]
    fn degree_zero_color_is_dc_term() {
        let mut p = particle(Vec3::ZERO, Vec3::ONE, 1.0);
        p.sh[0] = 1.0;
        p.sh[1] = -10.0;
        p.sh[3] = 5.0; // degree one, ignored
        let c = sh_radiance(&p, Vec3::Z, 0);
        assert_relative_eq!(c.x, 0.5 + SH_C0, epsilon = 1e-6);
        assert_eq!(c.y, 0.0);
        assert_relative_eq!(c.z, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn first_degree_band_uses_direction() {
        let mut p = particle(Vec3::ZERO, Vec3::ONE, 1.0);
        // coefficient 2 pairs with +z
        p.sh[6] = 0.2;
        let towards = sh_radiance(&p, Vec3::Z, 1);
        let away = sh_radiance(&p, -Vec3::Z, 1);
        assert_relative_eq!(towards.x - 0.5, 0.2 * SH_C1, epsilon = 1e-6);
        assert_relative_eq!(away.x - 0.5, -0.2 * SH_C1, epsilon = 1e-6);
    }

    #[test]
    fn palette_buckets() {
        assert_eq!(hit_count_color(0), Vec3::ZERO);
        assert_eq!(hit_count_color(19), Vec3::new(0.5, 0.5, 0.0));
        assert_eq!(hit_count_color(20), Vec3::new(0.5, 0.0, 0.5));
        assert_eq!(hit_count_color(149), Vec3::new(0.0, 0.0, 0.5));
        assert_eq!(hit_count_color(150), Vec3::splat(0.5));
    }
}
