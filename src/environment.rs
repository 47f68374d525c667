//! Latitude-longitude environment maps and their sampling distribution.

use std::path::Path;

use log::info;
use vivid_shared::environment::{build_environment_cdf, EnvironmentView};

use crate::error::{RenderError, Result};

#[derive(Clone, Debug)]
pub struct EnvironmentMap {
    width: u32,
    height: u32,
    texels: Vec<[f32; 4]>,
    /// `width * height` conditional entries followed by `height` marginal entries
    cdf: Vec<f32>,
    rotation_degrees: f32,
}

impl EnvironmentMap {
    pub fn from_rgba32f(width: u32, height: u32, texels: Vec<[f32; 4]>) -> Result<Self> {
        if width == 0 || height == 0 || texels.len() != (width * height) as usize {
            return Err(RenderError::invalid_image(format!(
                "environment map of {width}x{height} with {} texels",
                texels.len()
            )));
        }

        let mut cdf = vec![0.0; (width * height + height) as usize];
        let total = build_environment_cdf(&texels, width, height, &mut cdf);
        if !(total > 0.0 && total.is_finite()) {
            return Err(RenderError::DegenerateEnvironment);
        }

        Ok(Self {
            width,
            height,
            texels,
            cdf,
            rotation_degrees: 0.0,
        })
    }

    /// Loads any format `image` decodes, including Radiance HDR and OpenEXR
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let image = image::open(path.as_ref())?.into_rgba32f();
        let (width, height) = image.dimensions();
        let texels = image
            .into_raw()
            .chunks_exact(4)
            .map(|t| [t[0], t[1], t[2], t[3]])
            .collect();
        let map = Self::from_rgba32f(width, height, texels)?;
        info!("Loaded {width}x{height} environment from {}", path.as_ref().display());
        Ok(map)
    }

    /// Uniform radiance everywhere
    pub fn constant(width: u32, height: u32, radiance: [f32; 3]) -> Result<Self> {
        let texel = [radiance[0], radiance[1], radiance[2], 1.0];
        Self::from_rgba32f(width, height, vec![texel; (width * height) as usize])
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn texels(&self) -> &[[f32; 4]] {
        &self.texels
    }

    pub fn cdf(&self) -> &[f32] {
        &self.cdf
    }

    pub fn rotation_degrees(&self) -> f32 {
        self.rotation_degrees
    }

    pub fn set_rotation_degrees(&mut self, degrees: f32) {
        self.rotation_degrees = degrees;
    }

    /// Rotation as a fraction of a full turn, as the uniform block stores it
    pub fn rotation_fraction(&self) -> f32 {
        self.rotation_degrees / 360.0
    }

    pub fn view(&self) -> EnvironmentView<'_> {
        EnvironmentView::new(&self.texels, &self.cdf, self.width, self.height, self.rotation_fraction())
    }
}
