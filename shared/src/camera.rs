use glam::{Vec2, Vec3, Vec4};

use crate::sampling::sample_uniform_disk;
use crate::Uniforms;

/// Pinhole or thin-lens camera frame decoded from the uniforms
#[derive(Copy, Clone, Debug)]
pub struct CameraFrame {
    pub position: Vec3,
    pub right: Vec3,
    /// Image rows grow along this axis
    pub down: Vec3,
    pub forward: Vec3,
    pub aspect: Vec2,
    pub lens_radius: f32,
    pub focus_distance: f32,
}

impl CameraFrame {
    pub fn from_uniforms(uniforms: &Uniforms) -> Self {
        let m = &uniforms.to_world;
        Self {
            position: column(m, 3),
            right: column(m, 0),
            down: -column(m, 1),
            forward: -column(m, 2),
            aspect: Vec2::from_array(uniforms.camera_aspect),
            lens_radius: uniforms.lens_radius,
            focus_distance: uniforms.focus_distance,
        }
    }

    /// Unnormalized direction through the image-plane point `pixel + jitter`
    pub fn image_plane_direction(&self, pixel: Vec2, size: Vec2, jitter: Vec2) -> Vec3 {
        let ndc = (pixel + jitter) / size * 2.0 - Vec2::ONE;
        self.right * (ndc.x * self.aspect.x) + self.down * (ndc.y * self.aspect.y) + self.forward
    }

    /// Primary ray; `lens_sample` is only used when the lens radius is positive
    pub fn primary_ray(&self, pixel: Vec2, size: Vec2, jitter: Vec2, lens_sample: Vec2) -> (Vec3, Vec3) {
        let direction = self.image_plane_direction(pixel, size, jitter);
        if self.lens_radius <= 0.0 {
            return (self.position, direction.normalize());
        }

        let focus_point = self.position + direction * self.focus_distance;
        let disk = sample_uniform_disk(lens_sample) * self.lens_radius;
        let origin = self.position + self.right * disk.x + self.down * disk.y;
        (origin, (focus_point - origin).normalize())
    }
}

fn column(m: &[[f32; 4]; 4], i: usize) -> Vec3 {
    Vec4::from_array(m[i]).truncate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;
    use glam::Mat4;

    fn uniforms(to_world: Mat4, tan_half: f32, aspect: f32, lens_radius: f32) -> Uniforms {
        Uniforms {
            to_world: to_world.to_cols_array_2d(),
            camera_aspect: [tan_half * aspect, tan_half],
            lens_radius,
            focus_distance: 4.0,
            ..Uniforms::zeroed()
        }
    }

    #[test]
    fn centre_pixel_looks_down_negative_z() {
        let frame = CameraFrame::from_uniforms(&uniforms(Mat4::IDENTITY, 1.0, 1.0, 0.0));
        let (o, d) = frame.primary_ray(Vec2::new(1.0, 1.0), Vec2::new(2.0, 2.0), Vec2::ZERO, Vec2::ZERO);
        assert_eq!(o, Vec3::ZERO);
        assert!((d - Vec3::new(0.0, 0.0, -1.0)).length() < 1e-6);
    }

    #[test]
    fn top_left_pixel_points_up_and_left() {
        let frame = CameraFrame::from_uniforms(&uniforms(Mat4::IDENTITY, 1.0, 2.0, 0.0));
        let d = frame.image_plane_direction(Vec2::ZERO, Vec2::new(4.0, 2.0), Vec2::ZERO);
        assert!((d - Vec3::new(-2.0, 1.0, -1.0)).length() < 1e-6);
    }

    #[test]
    fn thin_lens_rays_converge_on_focus_plane() {
        let to_world = Mat4::from_translation(Vec3::new(0.0, 1.0, 5.0));
        let frame = CameraFrame::from_uniforms(&uniforms(to_world, 0.5, 1.0, 0.2));
        let pixel = Vec2::new(3.0, 1.0);
        let size = Vec2::new(8.0, 8.0);
        let jitter = Vec2::splat(0.5);
        let target = frame.position + frame.image_plane_direction(pixel, size, jitter) * 4.0;
        for lens in [Vec2::new(0.1, 0.2), Vec2::new(0.9, 0.7), Vec2::new(0.5, 0.5)] {
            let (o, d) = frame.primary_ray(pixel, size, jitter, lens);
            // Plane at distance 4 along the forward axis
            let t = (target - o).dot(frame.forward) / d.dot(frame.forward);
            assert!((o + d * t - target).length() < 1e-4);
        }
    }
}
