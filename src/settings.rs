//! User-facing render configuration and the uniform block built from it.

use std::path::Path;

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};
use vivid_shared::{TracerConfig, Uniforms};

use crate::environment::EnvironmentMap;
use crate::error::Result;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingStrategy {
    Brdf,
    Light,
    #[default]
    Mis,
}

impl SamplingStrategy {
    fn code(self) -> u32 {
        match self {
            SamplingStrategy::Brdf => Uniforms::SAMPLE_BRDF,
            SamplingStrategy::Light => Uniforms::SAMPLE_LIGHT,
            SamplingStrategy::Mis => Uniforms::SAMPLE_MIS,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplatDebugMode {
    #[default]
    Composite,
    ClosestParticle,
    HitCount,
}

impl SplatDebugMode {
    fn code(self) -> u32 {
        match self {
            SplatDebugMode::Composite => Uniforms::DEBUG_NONE,
            SplatDebugMode::ClosestParticle => Uniforms::DEBUG_CLOSEST_PARTICLE,
            SplatDebugMode::HitCount => Uniforms::DEBUG_HIT_COUNT,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub t_min: f32,
    pub t_max: f32,
    pub transmittance_min: f32,
    pub alpha_min: f32,
    /// Nearest hits gathered per splat traversal, at most 32
    pub k: u32,
    pub sh_degree_max: u32,
    /// Maximum splat traversals per ray, 0 for no limit
    pub early_stop: u32,
    pub debug_mode: SplatDebugMode,
    /// Jitter splat rays inside the pixel so frames average into antialiasing
    pub splat_jitter: bool,
    pub samples_per_frame: u32,
    pub max_path_length: u32,
    pub sampling: SamplingStrategy,
    pub draw_background: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            t_min: 1e-3,
            t_max: 1e5,
            transmittance_min: 0.03,
            alpha_min: 0.01,
            k: 16,
            sh_degree_max: 3,
            early_stop: 0,
            debug_mode: SplatDebugMode::Composite,
            splat_jitter: false,
            samples_per_frame: 4,
            max_path_length: 5,
            sampling: SamplingStrategy::Mis,
            draw_background: true,
        }
    }
}

impl RenderSettings {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Uniform block for one frame of a `width` x `height` launch
    pub fn to_uniforms(
        &self,
        camera: &Camera,
        width: u32,
        height: u32,
        accumulated_frames: u32,
        environment: Option<&EnvironmentMap>,
    ) -> Uniforms {
        let (env_width, env_height, env_rotation) = match environment {
            Some(map) => (map.width(), map.height(), map.rotation_fraction()),
            None => (0, 0, 0.0),
        };

        Uniforms {
            to_world: camera.to_world().to_cols_array_2d(),
            camera_aspect: camera.aspect_terms(width, height),
            lens_radius: camera.lens_radius,
            focus_distance: camera.focus_distance,
            t_min: self.t_min,
            t_max: self.t_max,
            transmittance_min: self.transmittance_min,
            alpha_min: self.alpha_min,
            k: self.k.clamp(1, TracerConfig::MAX_SPLAT_HITS as u32),
            sh_degree_max: self.sh_degree_max.min(3),
            accumulated_frames,
            early_stop: self.early_stop,
            samples_per_frame: self.samples_per_frame.max(1),
            max_path_length: self.max_path_length,
            sampling_method: self.sampling.code(),
            debug_mode: self.debug_mode.code(),
            env_width,
            env_height,
            draw_background: self.draw_background as u32,
            env_rotation,
            launch_width: width,
            launch_height: height,
            splat_jitter: self.splat_jitter as u32,
            texture_count: 0,
        }
    }
}

/// Look-at camera. Its frame is X = right, Y = down, Z = forward.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Camera {
    pub eye: [f32; 3],
    pub target: [f32; 3],
    pub up: [f32; 3],
    pub fov_y_degrees: f32,
    pub lens_radius: f32,
    pub focus_distance: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: [0.0, 0.0, 5.0],
            target: [0.0; 3],
            up: [0.0, 1.0, 0.0],
            fov_y_degrees: 45.0,
            lens_radius: 0.0,
            focus_distance: 1.0,
        }
    }
}

impl Camera {
    pub fn look_at(eye: Vec3, target: Vec3) -> Self {
        Self {
            eye: eye.to_array(),
            target: target.to_array(),
            ..Self::default()
        }
    }

    /// Camera-to-world; columns are right, up, backward and the eye
    pub fn to_world(&self) -> Mat4 {
        Mat4::look_at_rh(
            Vec3::from_array(self.eye),
            Vec3::from_array(self.target),
            Vec3::from_array(self.up),
        )
        .inverse()
    }

    /// `(tan(fov/2) * w/h, tan(fov/2))`
    pub fn aspect_terms(&self, width: u32, height: u32) -> [f32; 2] {
        let tan_half = (self.fov_y_degrees.to_radians() * 0.5).tan();
        let aspect = if height == 0 { 1.0 } else { width as f32 / height as f32 };
        [tan_half * aspect, tan_half]
    }
}
