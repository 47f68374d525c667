use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use vivid_raytracer::output::save_image;
use vivid_raytracer::scenes::{cornell_box, furnace, material_showcase, DemoScene};
use vivid_raytracer::{
    Camera, EnvironmentMap, GaussianCloud, PathTracer, RayTracingBackend, RenderSettings, SamplingStrategy,
    SoftwareBackend, SplatDebugMode, SplatRenderer,
};

#[derive(Debug, Default, Clone, Copy, ValueEnum)]
pub enum AvailableScene {
    #[default]
    Cornell,
    Showcase,
    Furnace,
}

impl AvailableScene {
    fn build(self) -> vivid_raytracer::Result<DemoScene> {
        match self {
            AvailableScene::Cornell => cornell_box(),
            AvailableScene::Showcase => material_showcase(),
            AvailableScene::Furnace => furnace(0.8),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Sampling {
    Brdf,
    Light,
    Mis,
}

impl From<Sampling> for SamplingStrategy {
    fn from(value: Sampling) -> Self {
        match value {
            Sampling::Brdf => SamplingStrategy::Brdf,
            Sampling::Light => SamplingStrategy::Light,
            Sampling::Mis => SamplingStrategy::Mis,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DebugView {
    Composite,
    Closest,
    Hits,
}

impl From<DebugView> for SplatDebugMode {
    fn from(value: DebugView) -> Self {
        match value {
            DebugView::Composite => SplatDebugMode::Composite,
            DebugView::Closest => SplatDebugMode::ClosestParticle,
            DebugView::Hits => SplatDebugMode::HitCount,
        }
    }
}

#[derive(clap::Args, Debug)]
struct Common {
    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 480)]
    height: u32,

    #[arg(short, long, default_value_t = 64)]
    /// Frames to accumulate before writing the image
    frames: u32,

    #[arg(short, long, default_value = "render.exr")]
    /// Output file; `.png` is clamped sRGB, anything else linear EXR
    output: PathBuf,

    #[arg(long)]
    /// JSON render settings; missing fields keep their defaults
    settings: Option<PathBuf>,

    #[arg(long)]
    /// JSON camera replacing the default one
    camera: Option<PathBuf>,

    #[arg(long)]
    /// Trace on the GPU instead of the CPU backend
    gpu: bool,
}

impl Common {
    fn render_settings(&self) -> anyhow::Result<RenderSettings> {
        Ok(match &self.settings {
            Some(path) => RenderSettings::load_json(path)?,
            None => RenderSettings::default(),
        })
    }

    fn camera_override(&self) -> anyhow::Result<Option<Camera>> {
        let Some(path) = &self.camera else {
            return Ok(None);
        };
        let text = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Path trace a built-in scene
    Path {
        #[arg(long, value_enum, default_value_t)]
        scene: AvailableScene,

        #[arg(long)]
        /// Equirectangular environment map replacing the scene's sky
        env: Option<PathBuf>,

        #[arg(long, default_value_t = 0.0)]
        /// Environment rotation about the vertical axis, in degrees
        env_rotation: f32,

        #[arg(long = "spp")]
        /// Samples per pixel per frame
        samples_per_frame: Option<u32>,

        #[arg(long)]
        max_path_length: Option<u32>,

        #[arg(long, value_enum)]
        sampling: Option<Sampling>,

        #[command(flatten)]
        common: Common,
    },
    /// Composite a packed Gaussian particle file
    Splat {
        #[arg(long)]
        particles: PathBuf,

        #[arg(short)]
        /// Nearest hits gathered per traversal
        k: Option<u32>,

        #[arg(long)]
        alpha_min: Option<f32>,

        #[arg(long, value_enum)]
        debug: Option<DebugView>,

        #[command(flatten)]
        common: Common,
    },
}

#[derive(Parser, Debug)]
#[command(about = "Progressive path tracer and Gaussian-splat renderer")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

fn run_path<B: RayTracingBackend>(
    backend: B,
    demo: DemoScene,
    settings: RenderSettings,
    environment: Option<EnvironmentMap>,
    common: &Common,
) -> anyhow::Result<()> {
    let mut tracer = PathTracer::new(backend, common.width, common.height)?;
    tracer.set_settings(settings);
    tracer.set_camera(common.camera_override()?.unwrap_or(demo.camera));
    tracer.set_environment(environment.or(demo.environment));

    let start = Instant::now();
    for frame in 0..common.frames {
        tracer.render_frame(&demo.scene)?;
        if (frame + 1) % 16 == 0 {
            info!("Frame {}/{}", frame + 1, common.frames);
        }
    }
    info!("Rendered {} frames in {:.2}s", common.frames, start.elapsed().as_secs_f32());
    save_image(&common.output, common.width, common.height, tracer.accumulator().texels())?;
    Ok(())
}

fn run_splat<B: RayTracingBackend>(
    backend: B,
    cloud: GaussianCloud,
    settings: RenderSettings,
    common: &Common,
) -> anyhow::Result<()> {
    let mut renderer = SplatRenderer::new(backend, cloud, common.width, common.height)?;
    renderer.set_settings(settings);
    if let Some(camera) = common.camera_override()? {
        renderer.set_camera(camera);
    }

    let start = Instant::now();
    for _ in 0..common.frames {
        renderer.render_frame()?;
    }
    info!("Composited {} frames in {:.2}s", common.frames, start.elapsed().as_secs_f32());
    save_image(&common.output, common.width, common.height, renderer.accumulator().texels())?;
    Ok(())
}

#[cfg(feature = "gpu")]
fn gpu_backend() -> anyhow::Result<vivid_raytracer::gpu::GpuBackend> {
    Ok(vivid_raytracer::gpu::GpuBackend::new()?)
}

#[cfg(not(feature = "gpu"))]
fn gpu_backend() -> anyhow::Result<SoftwareBackend> {
    anyhow::bail!("built without the `gpu` feature")
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Path {
            scene,
            env,
            env_rotation,
            samples_per_frame,
            max_path_length,
            sampling,
            common,
        } => {
            let demo = scene.build()?;
            let environment = match env {
                Some(path) => {
                    let mut map = EnvironmentMap::load(path)?;
                    map.set_rotation_degrees(env_rotation);
                    Some(map)
                }
                None => None,
            };

            let mut settings = common.render_settings()?;
            if let Some(spp) = samples_per_frame {
                settings.samples_per_frame = spp;
            }
            if let Some(length) = max_path_length {
                settings.max_path_length = length;
            }
            if let Some(sampling) = sampling {
                settings.sampling = sampling.into();
            }

            info!("Path tracing {scene:?} at {}x{}", common.width, common.height);
            if common.gpu {
                run_path(gpu_backend()?, demo, settings, environment, &common)
            } else {
                run_path(SoftwareBackend::new(), demo, settings, environment, &common)
            }
        }
        Command::Splat {
            particles,
            k,
            alpha_min,
            debug,
            common,
        } => {
            let cloud = GaussianCloud::load(particles)?;
            let mut settings = common.render_settings()?;
            if let Some(k) = k {
                settings.k = k;
            }
            if let Some(alpha_min) = alpha_min {
                settings.alpha_min = alpha_min;
            }
            if let Some(debug) = debug {
                settings.debug_mode = debug.into();
            }

            info!("Compositing {} particles at {}x{}", cloud.len(), common.width, common.height);
            if common.gpu {
                run_splat(gpu_backend()?, cloud, settings, &common)
            } else {
                run_splat(SoftwareBackend::new(), cloud, settings, &common)
            }
        }
    }
}
