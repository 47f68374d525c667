//! Gaussian particle clouds and their bounding icosahedra.

use std::path::Path;

use glam::{Mat4, Quat, Vec3};
use log::info;
use vivid_shared::GaussianParticle;

use crate::error::{RenderError, Result};
use crate::scene::Geometry;

/// Floats per particle in the packed file layout:
/// position 3, scale 3, rotation 4 (w, x, y, z), opacity 1, SH 48
pub const PARTICLE_FLOATS: usize = 59;
pub const PARTICLE_BYTES: usize = PARTICLE_FLOATS * 4;

/// Builds a device particle; `rotation` is stored as (w, x, y, z)
pub fn particle(position: Vec3, scale: Vec3, rotation: Quat, opacity: f32, sh: [f32; 48]) -> GaussianParticle {
    GaussianParticle {
        position: position.to_array(),
        opacity,
        scale: scale.to_array(),
        _padding: 0.0,
        rotation: [rotation.w, rotation.x, rotation.y, rotation.z],
        sh,
    }
}

fn rotation_of(p: &GaussianParticle) -> Quat {
    let r = p.rotation;
    Quat::from_xyzw(r[1], r[2], r[3], r[0])
}

/// Immutable set of particles in file order
#[derive(Clone, Debug, Default)]
pub struct GaussianCloud {
    particles: Vec<GaussianParticle>,
}

impl GaussianCloud {
    /// Validates every particle and normalizes its rotation
    pub fn from_particles(mut particles: Vec<GaussianParticle>) -> Result<Self> {
        for (index, p) in particles.iter_mut().enumerate() {
            let finite = p.position.iter().chain(&p.scale).chain(&p.rotation).all(|v| v.is_finite())
                && p.opacity.is_finite();
            if !finite {
                return Err(RenderError::InvalidParticleData(format!("particle {index} has non-finite fields")));
            }
            if p.scale.iter().any(|&s| s <= 0.0) {
                return Err(RenderError::InvalidParticleData(format!(
                    "particle {index} has non-positive scale {:?}",
                    p.scale
                )));
            }
            let q = rotation_of(p);
            let length = q.length();
            if length <= 0.0 {
                return Err(RenderError::InvalidParticleData(format!("particle {index} has a zero quaternion")));
            }
            let q = q / length;
            p.rotation = [q.w, q.x, q.y, q.z];
        }
        Ok(Self { particles })
    }

    pub fn from_packed_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % PARTICLE_BYTES != 0 {
            return Err(RenderError::InvalidParticleData(format!(
                "{} bytes is not a multiple of the {PARTICLE_BYTES}-byte particle record",
                bytes.len()
            )));
        }

        let particles = bytes
            .chunks_exact(PARTICLE_BYTES)
            .map(|record| {
                let mut f = [0.0f32; PARTICLE_FLOATS];
                for (value, word) in f.iter_mut().zip(record.chunks_exact(4)) {
                    *value = f32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                }
                let mut sh = [0.0; 48];
                sh.copy_from_slice(&f[11..59]);
                GaussianParticle {
                    position: [f[0], f[1], f[2]],
                    opacity: f[10],
                    scale: [f[3], f[4], f[5]],
                    _padding: 0.0,
                    rotation: [f[6], f[7], f[8], f[9]],
                    sh,
                }
            })
            .collect();
        Self::from_particles(particles)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let cloud = Self::from_packed_bytes(&bytes)?;
        info!("Loaded {} particles from {}", cloud.len(), path.as_ref().display());
        Ok(cloud)
    }

    pub fn particles(&self) -> &[GaussianParticle] {
        &self.particles
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
}

/// Mahalanobis radius at which the response drops to `alpha_min`,
/// or `None` when the particle never reaches it
pub fn bounding_scale(opacity: f32, alpha_min: f32) -> Option<f32> {
    if opacity > alpha_min && alpha_min > 0.0 {
        Some((2.0 * (opacity / alpha_min).ln()).sqrt())
    } else {
        None
    }
}

/// Object-to-world transform of the particle's bounding icosahedron
pub fn instance_transform(p: &GaussianParticle, alpha_min: f32) -> Option<Mat4> {
    let s = bounding_scale(p.opacity, alpha_min)?;
    Some(Mat4::from_scale_rotation_translation(
        Vec3::from_array(p.scale) * s,
        rotation_of(p),
        Vec3::from_array(p.position),
    ))
}

/// Icosahedron whose inscribed sphere has radius 1, wound counter-clockwise
/// when seen from outside
pub fn unit_icosahedron() -> Result<Geometry> {
    let r = (3.0 + 5.0f32.sqrt()) / (2.0 * 3.0f32.sqrt());
    let s = 1.0 / r;
    let t = (1.0 + 5.0f32.sqrt()) / (2.0 * r);

    let positions = vec![
        [-s, t, 0.0],
        [s, t, 0.0],
        [-s, -t, 0.0],
        [s, -t, 0.0],
        [0.0, -s, t],
        [0.0, s, t],
        [0.0, -s, -t],
        [0.0, s, -t],
        [t, 0.0, -s],
        [t, 0.0, s],
        [-t, 0.0, -s],
        [-t, 0.0, s],
    ];
    let normals = positions
        .iter()
        .map(|p| Vec3::from_array(*p).normalize().to_array())
        .collect();
    let indices = vec![
        0, 11, 5, 0, 5, 1, 0, 1, 7, 0, 7, 10, 0, 10, 11, //
        1, 5, 9, 5, 11, 4, 11, 10, 2, 10, 7, 6, 7, 1, 8, //
        3, 9, 4, 3, 4, 2, 3, 2, 6, 3, 6, 8, 3, 8, 9, //
        4, 9, 5, 2, 4, 11, 6, 2, 10, 8, 6, 7, 9, 8, 1,
    ];
    Geometry::new(positions, normals, None, Some(indices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn packed(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn parses_packed_layout() {
        let mut record = vec![0.0f32; PARTICLE_FLOATS];
        record[..3].copy_from_slice(&[1.0, 2.0, 3.0]);
        record[3..6].copy_from_slice(&[0.1, 0.2, 0.3]);
        record[6..10].copy_from_slice(&[2.0, 0.0, 0.0, 0.0]);
        record[10] = 0.75;
        record[11] = 0.5;
        record[58] = -0.25;

        let cloud = GaussianCloud::from_packed_bytes(&packed(&record)).unwrap();
        assert_eq!(cloud.len(), 1);
        let p = cloud.particles()[0];
        assert_eq!(p.position, [1.0, 2.0, 3.0]);
        assert_eq!(p.scale, [0.1, 0.2, 0.3]);
        assert_eq!(p.opacity, 0.75);
        assert_eq!(p.sh[0], 0.5);
        assert_eq!(p.sh[47], -0.25);
        // Normalized on load
        assert_eq!(p.rotation, [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn rejects_truncated_and_degenerate_records() {
        let record = vec![0u8; PARTICLE_BYTES - 4];
        assert!(matches!(
            GaussianCloud::from_packed_bytes(&record),
            Err(RenderError::InvalidParticleData(_))
        ));

        let mut zero_quat = vec![0.0f32; PARTICLE_FLOATS];
        zero_quat[3..6].copy_from_slice(&[1.0, 1.0, 1.0]);
        assert!(GaussianCloud::from_packed_bytes(&packed(&zero_quat)).is_err());
    }

    #[test]
    fn bounding_scale_matches_response_threshold() {
        assert_eq!(bounding_scale(0.01, 0.01), None);
        assert_eq!(bounding_scale(0.005, 0.01), None);
        let s = bounding_scale(0.8, 0.01).unwrap();
        // At distance s the Gaussian falls to alpha_min
        assert_relative_eq!(0.8 * (-0.5 * s * s).exp(), 0.01, epsilon = 1e-6);
    }

    #[test]
    fn icosahedron_is_outward_and_encloses_unit_sphere() {
        let ico = unit_icosahedron().unwrap();
        let p = ico.positions();
        let indices = ico.indices().unwrap();
        assert_eq!(indices.len(), 60);
        for face in indices.chunks_exact(3) {
            let a = Vec3::from_array(p[face[0] as usize]);
            let b = Vec3::from_array(p[face[1] as usize]);
            let c = Vec3::from_array(p[face[2] as usize]);
            let normal = (b - a).cross(c - a).normalize();
            let centroid = (a + b + c) / 3.0;
            assert!(normal.dot(centroid) > 0.0);
            // Distance from origin to the face plane is the inradius
            assert_relative_eq!(normal.dot(a), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn instance_transform_scales_by_bounding_radius() {
        let p = particle(
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.5, 1.0, 2.0),
            Quat::IDENTITY,
            0.5,
            [0.0; 48],
        );
        let s = bounding_scale(0.5, 0.01).unwrap();
        let m = instance_transform(&p, 0.01).unwrap();
        let x = m.transform_point3(Vec3::X);
        assert_relative_eq!(x.x, 1.0 + 0.5 * s, epsilon = 1e-5);
        assert!(instance_transform(&p, 0.6).is_none());
    }
}
