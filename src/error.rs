//! Error type shared by every host-side operation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    /// Geometry rejected at import: missing attributes, bad indices or a degenerate bounding box
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Texture or environment dimensions that disagree with the texel count
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Invalid particle data: {0}")]
    InvalidParticleData(String),

    /// Importance sampling needs a non-zero total luminance
    #[error("Environment map has zero total luminance")]
    DegenerateEnvironment,

    /// A build would exceed a fixed device limit
    #[error("Too many {what}: requested {requested}, device limit is {limit}")]
    ResourceExhausted {
        what: &'static str,
        requested: usize,
        limit: usize,
    },

    /// A structure or table was used before it was built
    #[error("{0} has not been built")]
    NotReady(&'static str),

    #[error("Unknown {kind} handle {index}")]
    UnknownHandle { kind: &'static str, index: u32 },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("EXR error: {0}")]
    Exr(#[from] exr::error::Error),

    #[error("Invalid settings: {0}")]
    Settings(#[from] serde_json::Error),
}

impl RenderError {
    pub fn geometry(msg: impl Into<String>) -> Self {
        Self::InvalidGeometry(msg.into())
    }

    pub fn invalid_image(msg: impl Into<String>) -> Self {
        Self::InvalidImage(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub(crate) fn check_limit(what: &'static str, requested: usize, limit: u32) -> Result<()> {
        if requested > limit as usize {
            return Err(Self::ResourceExhausted {
                what,
                requested,
                limit: limit as usize,
            });
        }
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;
