//! Progressive ray tracer built around a two-level acceleration structure and
//! a shader binding table. Two front-ends share the machinery: a Disney BRDF
//! path tracer with environment importance sampling, and a k-nearest
//! Gaussian-splat compositor.

pub mod accel;
pub mod accumulator;
pub mod backend;
pub mod bvh;
pub mod environment;
pub mod error;
pub mod gaussian;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod output;
pub mod renderer;
pub mod sbt;
pub mod scene;
pub mod scenes;
pub mod settings;
pub mod software;
pub mod structures;

pub use backend::{DeviceLimits, RayTracingBackend};
pub use environment::EnvironmentMap;
pub use error::{RenderError, Result};
pub use gaussian::GaussianCloud;
pub use renderer::{PathTracer, SplatRenderer};
pub use scene::{Geometry, Material, MaterialKind, MeshPart, Scene, Texture};
pub use settings::{Camera, RenderSettings, SamplingStrategy, SplatDebugMode};
pub use software::SoftwareBackend;
