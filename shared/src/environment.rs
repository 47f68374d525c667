//! Latitude-longitude environment light: lookup and importance sampling.
//!
//! The CDF buffer holds `width * height` per-row conditional entries followed
//! by `height` marginal entries, all normalized to end at 1.

use core::f32::consts::PI;
use glam::{Vec2, Vec3};
#[cfg(target_arch = "spirv")]
use spirv_std::num_traits::Float;

use crate::sampling::{cdf_bucket_pdf, find_inverse_cdf};

pub fn luminance(rgb: Vec3) -> f32 {
    0.212671 * rgb.x + 0.715160 * rgb.y + 0.072169 * rgb.z
}

/// Fills `cdf` (length `width * height + height`) from RGBA texels.
/// Returns the unnormalized total, which is zero for an all-black map.
pub fn build_environment_cdf(texels: &[[f32; 4]], width: u32, height: u32, cdf: &mut [f32]) -> f32 {
    let marginal = (width * height) as usize;

    for row in 0..height as usize {
        let sin_theta = ((row as f32 + 0.5) / height as f32 * PI).sin();
        let base = row * width as usize;
        let mut sum = 0.0;
        for col in 0..width as usize {
            let t = texels[base + col];
            sum += sin_theta * luminance(Vec3::new(t[0], t[1], t[2]));
            cdf[base + col] = sum;
        }
        if sum > 0.0 {
            for col in 0..width as usize {
                cdf[base + col] /= sum;
            }
        }
        cdf[marginal + row] = sum;
    }

    let mut total = 0.0;
    for row in 0..height as usize {
        total += cdf[marginal + row];
        cdf[marginal + row] = total;
    }
    if total > 0.0 {
        for row in 0..height as usize {
            cdf[marginal + row] /= total;
        }
    }
    total
}

#[derive(Copy, Clone, Debug)]
pub struct EnvironmentSample {
    pub uv: Vec2,
    /// Density with respect to the unit square
    pub pdf: f32,
}

/// Read-only view over an uploaded environment map
#[derive(Copy, Clone)]
pub struct EnvironmentView<'a> {
    pub texels: &'a [[f32; 4]],
    pub cdf: &'a [f32],
    pub width: u32,
    pub height: u32,
    /// Rotation as a fraction of a full turn
    pub rotation: f32,
}

impl<'a> EnvironmentView<'a> {
    pub fn new(texels: &'a [[f32; 4]], cdf: &'a [f32], width: u32, height: u32, rotation: f32) -> Self {
        Self { texels, cdf, width, height, rotation }
    }

    pub fn is_enabled(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    fn texel_coords(&self, uv: Vec2) -> (u32, u32) {
        let u = uv.x - uv.x.floor();
        let v = uv.y.clamp(0.0, 1.0);
        let col = ((u * self.width as f32) as u32).min(self.width - 1);
        let row = ((v * self.height as f32) as u32).min(self.height - 1);
        (col, row)
    }

    /// Nearest-texel radiance
    pub fn radiance(&self, uv: Vec2) -> Vec3 {
        if !self.is_enabled() {
            return Vec3::ZERO;
        }
        let (col, row) = self.texel_coords(uv);
        let t = self.texels[(row * self.width + col) as usize];
        Vec3::new(t[0], t[1], t[2])
    }

    pub fn sample(&self, u: Vec2) -> EnvironmentSample {
        let marginal = self.width * self.height;
        let row = find_inverse_cdf(self.cdf, marginal, self.height, u.y);
        let col = find_inverse_cdf(self.cdf, self.width * row.index, self.width, u.x);
        EnvironmentSample {
            uv: Vec2::new(col.coordinate, row.coordinate),
            pdf: col.pdf * row.pdf,
        }
    }

    /// Density over the unit square at `uv`, matching what `sample` reports
    pub fn pdf(&self, uv: Vec2) -> f32 {
        let (col, row) = self.texel_coords(uv);
        let marginal = self.width * self.height;
        let pdf_row = cdf_bucket_pdf(self.cdf, marginal, self.height, row);
        let pdf_col = cdf_bucket_pdf(self.cdf, self.width * row, self.width, col);
        pdf_row * pdf_col
    }

    pub fn direction(&self, uv: Vec2) -> Vec3 {
        let theta = uv.y * PI;
        let phi = (uv.x + 0.25 - self.rotation) * 2.0 * PI;
        let sin_theta = theta.sin();
        Vec3::new(sin_theta * phi.cos(), theta.cos(), sin_theta * phi.sin())
    }

    pub fn uv(&self, direction: Vec3) -> Vec2 {
        let d = direction.normalize();
        let u = 0.5 + 0.5 * d.x.atan2(-d.z) / PI + self.rotation;
        let v = d.y.clamp(-1.0, 1.0).acos() / PI;
        Vec2::new(u - u.floor(), v)
    }
}

/// Converts a unit-square density to solid angle
pub fn to_solid_angle_pdf(pdf_uv: f32, uv: Vec2) -> f32 {
    let sin_theta = (uv.y * PI).sin();
    if sin_theta > 0.0 {
        pdf_uv / (2.0 * PI * PI * sin_theta)
    } else {
        0.0
    }
}
