//! Renderer front-ends: rebuild structures when their inputs change, fill the
//! uniform block and launch one progressive frame at a time.

use log::info;
use vivid_shared::{MaterialParams, TextureInfo};

use crate::accel::{compile_gaussians, compile_scene, CompiledScene, CompiledSplats, InterleavedVertex, PartRecord};
use crate::accumulator::ProgressiveAccumulator;
use crate::backend::{
    HitGroupDesc, LaunchDesc, PipelineHandle, ProgramSet, RayGenProgram, RayTracingBackend, SceneResources,
};
use crate::environment::EnvironmentMap;
use crate::error::{RenderError, Result};
use crate::gaussian::GaussianCloud;
use crate::sbt::{ShaderBindingTable, TableLayout};
use crate::scene::Scene;
use crate::settings::{Camera, RenderSettings};

/// Ray generation, radiance and shadow misses, one closest-hit group
fn path_programs() -> ProgramSet {
    ProgramSet {
        raygen: RayGenProgram::PathTracer,
        miss_count: 2,
        hit_groups: vec![HitGroupDesc {
            closest_hit: true,
            any_hit: false,
        }],
    }
}

/// Ray generation, one miss, and the k-nearest any-hit group
fn splat_programs() -> ProgramSet {
    ProgramSet {
        raygen: RayGenProgram::GaussianSplats,
        miss_count: 1,
        hit_groups: vec![HitGroupDesc {
            closest_hit: false,
            any_hit: true,
        }],
    }
}

fn miss_groups(programs: &ProgramSet) -> Vec<u32> {
    (1..programs.first_hit_group()).collect()
}

struct BuiltScene {
    scene_id: u64,
    revision: u64,
    compiled: CompiledScene,
    sbt: ShaderBindingTable,
    materials: Vec<MaterialParams>,
    textures: Vec<TextureInfo>,
    texels: Vec<[f32; 4]>,
}

/// Progressive path tracer over a triangle [`Scene`]
pub struct PathTracer<B: RayTracingBackend> {
    backend: B,
    pipeline: PipelineHandle,
    handles: Vec<Vec<u8>>,
    settings: RenderSettings,
    camera: Camera,
    environment: Option<EnvironmentMap>,
    accumulator: ProgressiveAccumulator,
    built: Option<BuiltScene>,
}

impl<B: RayTracingBackend> PathTracer<B> {
    pub fn new(mut backend: B, width: u32, height: u32) -> Result<Self> {
        let pipeline = backend.create_pipeline(&path_programs())?;
        let handles = backend.shader_group_handles(pipeline)?;
        Ok(Self {
            backend,
            pipeline,
            handles,
            settings: RenderSettings::default(),
            camera: Camera::default(),
            environment: None,
            accumulator: ProgressiveAccumulator::new(width, height),
            built: None,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Any edit invalidates the running average
    pub fn settings_mut(&mut self) -> &mut RenderSettings {
        self.accumulator.reset();
        &mut self.settings
    }

    pub fn set_settings(&mut self, settings: RenderSettings) {
        self.settings = settings;
        self.accumulator.reset();
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
        self.accumulator.reset();
    }

    pub fn environment(&self) -> Option<&EnvironmentMap> {
        self.environment.as_ref()
    }

    pub fn set_environment(&mut self, environment: Option<EnvironmentMap>) {
        self.environment = environment;
        self.accumulator.reset();
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.accumulator.resize(width, height);
    }

    pub fn accumulator(&self) -> &ProgressiveAccumulator {
        &self.accumulator
    }

    fn rebuild(&mut self, scene: &Scene) -> Result<()> {
        self.built = None;
        self.accumulator.reset();
        self.backend.release_acceleration_structures();
        scene.validate_materials()?;

        let compiled = compile_scene(scene, &mut self.backend, &InterleavedVertex)?;
        let programs = path_programs();
        let mut layout = TableLayout::new(0, miss_groups(&programs), PartRecord::WORDS);
        for record in &compiled.part_records {
            layout.push_hit(programs.first_hit_group(), &record.words());
        }
        let sbt = ShaderBindingTable::build(self.backend.limits(), &self.handles, &layout)?;
        let (textures, texels) = scene.texture_table();

        self.built = Some(BuiltScene {
            scene_id: scene.id(),
            revision: scene.revision(),
            compiled,
            sbt,
            materials: scene.material_params(),
            textures,
            texels,
        });
        Ok(())
    }

    /// Traces one frame of `scene`, rebuilding first if it is a different
    /// scene or changed since the last frame, and returns the accumulated image
    pub fn render_frame(&mut self, scene: &Scene) -> Result<&[[f32; 4]]> {
        let key = (scene.id(), scene.revision());
        if self.built.as_ref().map(|b| (b.scene_id, b.revision)) != Some(key) {
            self.rebuild(scene)?;
        }
        let built = self.built.as_ref().ok_or(RenderError::NotReady("scene structures"))?;

        let mut uniforms = self.settings.to_uniforms(
            &self.camera,
            self.accumulator.width(),
            self.accumulator.height(),
            self.accumulator.frame_index(),
            self.environment.as_ref(),
        );
        uniforms.texture_count = built.textures.len() as u32;

        let launch = LaunchDesc {
            pipeline: self.pipeline,
            tlas: built.compiled.tlas,
            sbt: &built.sbt,
            uniforms,
            resources: SceneResources {
                geometry: &built.compiled.buffers,
                materials: &built.materials,
                textures: &built.textures,
                texels: &built.texels,
                environment: self.environment.as_ref(),
                particles: &[],
            },
        };
        self.backend.trace_rays(&launch, self.accumulator.texels_mut())?;
        self.accumulator.advance();
        Ok(self.accumulator.texels())
    }
}

struct BuiltSplats {
    alpha_min: f32,
    compiled: CompiledSplats,
    sbt: ShaderBindingTable,
}

/// Progressive Gaussian-splat compositor over an immutable particle cloud
pub struct SplatRenderer<B: RayTracingBackend> {
    backend: B,
    pipeline: PipelineHandle,
    handles: Vec<Vec<u8>>,
    settings: RenderSettings,
    camera: Camera,
    cloud: GaussianCloud,
    accumulator: ProgressiveAccumulator,
    built: Option<BuiltSplats>,
}

impl<B: RayTracingBackend> SplatRenderer<B> {
    pub fn new(mut backend: B, cloud: GaussianCloud, width: u32, height: u32) -> Result<Self> {
        let pipeline = backend.create_pipeline(&splat_programs())?;
        let handles = backend.shader_group_handles(pipeline)?;
        Ok(Self {
            backend,
            pipeline,
            handles,
            settings: RenderSettings::default(),
            camera: Camera::default(),
            cloud,
            accumulator: ProgressiveAccumulator::new(width, height),
            built: None,
        })
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut RenderSettings {
        self.accumulator.reset();
        &mut self.settings
    }

    pub fn set_settings(&mut self, settings: RenderSettings) {
        self.settings = settings;
        self.accumulator.reset();
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
        self.accumulator.reset();
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.accumulator.resize(width, height);
    }

    pub fn accumulator(&self) -> &ProgressiveAccumulator {
        &self.accumulator
    }

    /// Hit records in the current build; one per included particle
    pub fn record_count(&self) -> Option<u32> {
        self.built.as_ref().map(|b| b.sbt.record_count())
    }

    fn rebuild(&mut self) -> Result<()> {
        self.built = None;
        self.backend.release_acceleration_structures();

        let alpha_min = self.settings.alpha_min;
        let compiled = compile_gaussians(&self.cloud, alpha_min, &mut self.backend)?;
        let programs = splat_programs();
        let mut layout = TableLayout::new(0, miss_groups(&programs), 1);
        for &particle in &compiled.included {
            layout.push_hit(programs.first_hit_group(), &[particle]);
        }
        let sbt = ShaderBindingTable::build(self.backend.limits(), &self.handles, &layout)?;
        info!("Splat build ready: {} records at alpha_min {alpha_min}", sbt.record_count());

        self.built = Some(BuiltSplats {
            alpha_min,
            compiled,
            sbt,
        });
        self.accumulator.reset();
        Ok(())
    }

    pub fn render_frame(&mut self) -> Result<&[[f32; 4]]> {
        if self.built.as_ref().map(|b| b.alpha_min) != Some(self.settings.alpha_min) {
            self.rebuild()?;
        }
        let built = self.built.as_ref().ok_or(RenderError::NotReady("splat structures"))?;

        let uniforms = self.settings.to_uniforms(
            &self.camera,
            self.accumulator.width(),
            self.accumulator.height(),
            self.accumulator.frame_index(),
            None,
        );
        let launch = LaunchDesc {
            pipeline: self.pipeline,
            tlas: built.compiled.tlas,
            sbt: &built.sbt,
            uniforms,
            resources: SceneResources {
                geometry: &built.compiled.buffers,
                materials: &[],
                textures: &[],
                texels: &[],
                environment: None,
                particles: self.cloud.particles(),
            },
        };
        self.backend.trace_rays(&launch, self.accumulator.texels_mut())?;
        self.accumulator.advance();
        Ok(self.accumulator.texels())
    }
}
