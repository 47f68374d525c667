use core::f32::consts::PI;
use glam::{Vec2, Vec3};
#[cfg(target_arch = "spirv")]
use spirv_std::num_traits::Float;

/// Cosine-weighted direction around +Y
pub fn sample_cosine_hemisphere(u: Vec2) -> Vec3 {
    let r = u.x.sqrt();
    let phi = 2.0 * PI * u.y;
    Vec3::new(r * phi.cos(), (1.0 - r * r).max(0.0).sqrt(), r * phi.sin())
}

/// GGX (Trowbridge-Reitz) half vector around +Y, distributed as D(h)·cosθh
pub fn sample_ggx_half_vector(u: Vec2, alpha2: f32) -> Vec3 {
    let tan2_theta = alpha2 * (u.x / (1.0 - u.x));
    let cos2_theta = 1.0 / (1.0 + tan2_theta);
    let sin_theta = (1.0 - cos2_theta).max(0.0).sqrt();
    let phi = 2.0 * PI * u.y;
    Vec3::new(sin_theta * phi.cos(), cos2_theta.sqrt(), sin_theta * phi.sin())
}

/// Uniform point on the unit disk
pub fn sample_uniform_disk(u: Vec2) -> Vec2 {
    let r = u.x.sqrt();
    let theta = 2.0 * PI * u.y;
    Vec2::new(r * theta.cos(), r * theta.sin())
}

/// Orthogonal map taking +Y onto `n`, used to orient hemisphere samples
pub fn rotate_to_normal(n: Vec3, v: Vec3) -> Vec3 {
    let s = if n.y >= 0.0 { 1.0 } else { -1.0 };
    let v = Vec3::new(v.x, v.y * s, v.z);
    let h = Vec3::new(n.x, n.y + s, n.z);
    let k = v.dot(h) / (1.0 + n.y.abs());
    h * k - v
}

/// One draw from a piecewise-constant distribution
#[derive(Copy, Clone, Debug)]
pub struct InverseCdfSample {
    pub index: u32,
    /// Continuous coordinate in [0, 1)
    pub coordinate: f32,
    /// Density over the unit interval
    pub pdf: f32,
}

/// Inverts the normalized CDF stored at `cdf[start..start + count]`.
///
/// Bucket `i` spans `(cdf[start + i - 1], cdf[start + i]]`, with an implicit
/// zero before the first entry.
pub fn find_inverse_cdf(cdf: &[f32], start: u32, count: u32, u: f32) -> InverseCdfSample {
    let mut first = start;
    let mut len = count;
    while len > 0 {
        let half = len >> 1;
        let middle = first + half;
        if cdf[middle as usize] <= u {
            first = middle + 1;
            len -= half + 1;
        } else {
            len = half;
        }
    }

    let last = start + count - 1;
    let bucket = if first > last { last } else { first };
    let lower = if bucket > start { cdf[bucket as usize - 1] } else { 0.0 };
    let upper = cdf[bucket as usize];
    let width = upper - lower;
    let fraction = if width > 0.0 { ((u - lower) / width).clamp(0.0, 1.0) } else { 0.0 };
    let index = bucket - start;

    InverseCdfSample {
        index,
        coordinate: ((index as f32 + fraction) / count as f32).min(1.0 - f32::EPSILON),
        pdf: width * count as f32,
    }
}

/// Density of bucket `index` in the CDF at `cdf[start..start + count]`
pub fn cdf_bucket_pdf(cdf: &[f32], start: u32, count: u32, index: u32) -> f32 {
    let i = start + index.min(count - 1);
    let lower = if i > start { cdf[i as usize - 1] } else { 0.0 };
    (cdf[i as usize] - lower) * count as f32
}

/// Power heuristic with exponent 2
pub fn power_heuristic(pdf: f32, other_pdf: f32) -> f32 {
    let a = pdf * pdf;
    let b = other_pdf * other_pdf;
    if a + b > 0.0 {
        a / (a + b)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cosine_samples_lie_on_upper_hemisphere() {
        for i in 0..16 {
            for j in 0..16 {
                let u = Vec2::new(i as f32 / 16.0, j as f32 / 16.0);
                let d = sample_cosine_hemisphere(u);
                assert_relative_eq!(d.length(), 1.0, epsilon = 1e-5);
                assert!(d.y >= 0.0);
            }
        }
    }

    #[test]
    fn ggx_with_tiny_roughness_hugs_the_axis() {
        let h = sample_ggx_half_vector(Vec2::new(0.9, 0.3), 1e-8);
        assert!(h.y > 0.999);
        assert_relative_eq!(h.length(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn disk_samples_stay_inside_unit_circle() {
        for i in 0..32 {
            let p = sample_uniform_disk(Vec2::new(i as f32 / 32.0, 0.37));
            assert!(p.length() <= 1.0 + 1e-6);
        }
    }

    #[test]
    fn rotation_maps_up_onto_normal() {
        let normals = [
            Vec3::Y,
            -Vec3::Y,
            Vec3::X,
            Vec3::new(0.3, -0.4, 0.866).normalize(),
            Vec3::new(-0.6, 0.1, -0.2).normalize(),
        ];
        for n in normals {
            let mapped = rotate_to_normal(n, Vec3::Y);
            assert!((mapped - n).length() < 1e-5, "{n:?} -> {mapped:?}");

            let v = Vec3::new(0.2, 0.9, -0.3).normalize();
            let r = rotate_to_normal(n, v);
            assert_relative_eq!(r.length(), 1.0, epsilon = 1e-5);
            assert_relative_eq!(r.dot(n), v.y, epsilon = 1e-5);
        }
    }

    #[test]
    fn inverse_cdf_selects_bracketing_bucket() {
        let cdf = [0.25, 0.25, 0.75, 1.0];
        let s = find_inverse_cdf(&cdf, 0, 4, 0.1);
        assert_eq!(s.index, 0);
        assert_relative_eq!(s.coordinate, 0.1, epsilon = 1e-6);
        assert_relative_eq!(s.pdf, 1.0);

        // The empty bucket is never chosen
        let s = find_inverse_cdf(&cdf, 0, 4, 0.25);
        assert_eq!(s.index, 2);
        assert_relative_eq!(s.pdf, 2.0);
        assert_relative_eq!(s.coordinate, 0.5, epsilon = 1e-6);

        let s = find_inverse_cdf(&cdf, 0, 4, 0.999);
        assert_eq!(s.index, 3);
        assert_relative_eq!(cdf_bucket_pdf(&cdf, 0, 4, s.index), s.pdf);
    }

    #[test]
    fn inverse_cdf_honours_start_offset() {
        let cdf = [9.0, 9.0, 0.5, 1.0];
        let s = find_inverse_cdf(&cdf, 2, 2, 0.7);
        assert_eq!(s.index, 1);
        assert_relative_eq!(s.coordinate, 0.5 + 0.2, epsilon = 1e-6);
    }

    #[test]
    fn power_heuristic_weights_sum_to_one() {
        let w = power_heuristic(2.0, 1.0) + power_heuristic(1.0, 2.0);
        assert_relative_eq!(w, 1.0);
        assert_eq!(power_heuristic(0.0, 0.0), 0.0);
    }
}
