//! CPU ray tracing backend. Structures are built on the host and every pixel
//! runs the same shared programs the compute kernels run, in parallel rows.

use glam::UVec2;
use log::debug;
use rayon::prelude::*;
use vivid_shared::environment::EnvironmentView;
use vivid_shared::path::{self, PathScene};
use vivid_shared::splat::{self, SplatScene};
use vivid_shared::surface::SurfaceBuffers;
use vivid_shared::traversal::AccelView;

use crate::accel::GeometryBuffers;
use crate::backend::{
    indexed_group_handles, BlasGeometryDesc, BlasHandle, DeviceLimits, LaunchDesc, PipelineHandle, ProgramSet,
    RayGenProgram, RayTracingBackend, TlasHandle, TlasInstanceDesc,
};
use crate::error::{RenderError, Result};
use crate::sbt::ShaderBindingTable;
use crate::structures::{AccelerationStore, FlatAccel};

#[derive(Default)]
pub struct SoftwareBackend {
    limits: DeviceLimits,
    store: AccelerationStore,
    pipelines: Vec<ProgramSet>,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    fn pipeline(&self, handle: PipelineHandle) -> Result<&ProgramSet> {
        self.pipelines.get(handle.0 as usize).ok_or(RenderError::UnknownHandle {
            kind: "pipeline",
            index: handle.0,
        })
    }
}

/// Checks a launch against its pipeline and structures before any pixel runs
pub(crate) fn validate_launch(
    programs: &ProgramSet,
    flat: &FlatAccel,
    sbt: &ShaderBindingTable,
    output_len: usize,
    width: u32,
    height: u32,
) -> Result<()> {
    if output_len != width as usize * height as usize {
        return Err(RenderError::backend(format!(
            "output of {output_len} texels for a {width}x{height} launch"
        )));
    }
    let table = sbt.view();
    if table.raygen_group() != 0 {
        return Err(RenderError::backend("ray generation record does not reference group 0"));
    }
    if sbt.record_count() < flat.required_hit_records {
        return Err(RenderError::backend(format!(
            "shader table has {} hit records, structures reference {}",
            sbt.record_count(),
            flat.required_hit_records
        )));
    }
    let hit_groups = programs.first_hit_group()..programs.group_count();
    if let Some(record) = (0..sbt.record_count()).find(|&r| !hit_groups.contains(&table.hit_group(r))) {
        return Err(RenderError::UnknownHandle {
            kind: "hit group",
            index: table.hit_group(record),
        });
    }
    Ok(())
}

impl RayTracingBackend for SoftwareBackend {
    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn build_bottom_level(&mut self, geometries: &[BlasGeometryDesc], buffers: &GeometryBuffers) -> Result<BlasHandle> {
        self.store.build_blas(geometries, buffers, &self.limits)
    }

    fn build_top_level(&mut self, instances: &[TlasInstanceDesc]) -> Result<TlasHandle> {
        self.store.build_tlas(instances, &self.limits)
    }

    fn create_pipeline(&mut self, programs: &ProgramSet) -> Result<PipelineHandle> {
        self.pipelines.push(programs.clone());
        Ok(PipelineHandle(self.pipelines.len() as u32 - 1))
    }

    fn shader_group_handles(&self, pipeline: PipelineHandle) -> Result<Vec<Vec<u8>>> {
        let programs = self.pipeline(pipeline)?;
        Ok(indexed_group_handles(&self.limits, programs.group_count()))
    }

    fn trace_rays(&mut self, launch: &LaunchDesc, output: &mut [[f32; 4]]) -> Result<()> {
        let programs = self.pipeline(launch.pipeline)?;
        let flat = self.store.flatten(launch.tlas)?;
        let (width, height) = (launch.width(), launch.height());
        validate_launch(programs, &flat, launch.sbt, output.len(), width, height)?;
        if width == 0 || height == 0 {
            return Ok(());
        }

        let uniforms = launch.uniforms;
        let accel = AccelView::new(&flat.words, flat.offsets);
        let table = launch.sbt.view();
        let resources = launch.resources;
        debug!(
            "Tracing {width}x{height} ({:?}), frame {}",
            programs.raygen, uniforms.accumulated_frames
        );

        match programs.raygen {
            RayGenProgram::PathTracer => {
                let environment = match resources.environment {
                    Some(map) => EnvironmentView::new(
                        map.texels(),
                        map.cdf(),
                        map.width(),
                        map.height(),
                        uniforms.env_rotation,
                    ),
                    None => EnvironmentView::new(&[], &[], 0, 0, 0.0),
                };
                let scene = PathScene {
                    uniforms: &uniforms,
                    accel,
                    table,
                    surface: SurfaceBuffers {
                        vertices: &resources.geometry.vertices,
                        indices: &resources.geometry.indices,
                        materials: resources.materials,
                        textures: resources.textures,
                        texels: resources.texels,
                    },
                    environment,
                };
                output
                    .par_chunks_mut(width as usize)
                    .enumerate()
                    .for_each(|(y, row)| {
                        for (x, texel) in row.iter_mut().enumerate() {
                            *texel = path::render_pixel(&scene, UVec2::new(x as u32, y as u32), *texel);
                        }
                    });
            }
            RayGenProgram::GaussianSplats => {
                let scene = SplatScene {
                    uniforms: &uniforms,
                    accel,
                    table,
                    particles: resources.particles,
                };
                output
                    .par_chunks_mut(width as usize)
                    .enumerate()
                    .for_each(|(y, row)| {
                        for (x, texel) in row.iter_mut().enumerate() {
                            *texel = splat::render_pixel(&scene, UVec2::new(x as u32, y as u32), *texel);
                        }
                    });
            }
        }
        Ok(())
    }

    fn release_acceleration_structures(&mut self) {
        self.store.clear();
    }
}
