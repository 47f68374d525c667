//! wgpu compute backend. Structures are built and flattened on the host, then
//! the rust-gpu kernels run the shared programs over the launch grid.

use bytemuck::{Pod, Zeroable};
use log::{debug, info};
use wgpu::util::{make_spirv, BufferInitDescriptor, DeviceExt};
use vivid_shared::{LaunchParams, TracerConfig};

use crate::accel::GeometryBuffers;
use crate::backend::{
    indexed_group_handles, BlasGeometryDesc, BlasHandle, DeviceLimits, LaunchDesc, PipelineHandle, ProgramSet,
    RayGenProgram, RayTracingBackend, TlasHandle, TlasInstanceDesc,
};
use crate::error::{RenderError, Result};
use crate::software::validate_launch;
use crate::structures::AccelerationStore;

/// Storage buffers bound by the path kernel
const BINDING_COUNT: u32 = 12;
const OUTPUT_BINDING: u32 = 10;

struct GpuPipeline {
    programs: ProgramSet,
    pipeline: wgpu::ComputePipeline,
}

pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    shader_module: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    limits: DeviceLimits,
    store: AccelerationStore,
    pipelines: Vec<GpuPipeline>,
}

impl GpuBackend {
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| RenderError::backend("no compatible GPU adapter"))?;
        info!("Using adapter {}", adapter.get_info().name);

        let adapter_limits = adapter.limits();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Ray Tracing Device"),
                    features: wgpu::Features::empty(),
                    limits: wgpu::Limits {
                        max_storage_buffers_per_shader_stage: BINDING_COUNT,
                        max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
                        max_buffer_size: adapter_limits.max_buffer_size,
                        ..Default::default()
                    },
                },
                None,
            )
            .await
            .map_err(|e| RenderError::backend(e.to_string()))?;

        let shader_binary = include_bytes!(env!("shader.spv"));
        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Ray Tracing Kernels"),
            source: make_spirv(shader_binary),
        });

        let entries: Vec<wgpu::BindGroupLayoutEntry> = (0..BINDING_COUNT)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage {
                        read_only: binding != OUTPUT_BINDING,
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Launch Bind Group Layout"),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Launch Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        Ok(Self {
            device,
            queue,
            shader_module,
            bind_group_layout,
            pipeline_layout,
            limits: DeviceLimits::default(),
            store: AccelerationStore::new(),
            pipelines: Vec::new(),
        })
    }

    fn pipeline(&self, handle: PipelineHandle) -> Result<&GpuPipeline> {
        self.pipelines.get(handle.0 as usize).ok_or(RenderError::UnknownHandle {
            kind: "pipeline",
            index: handle.0,
        })
    }

    /// Read-only storage buffer; empty slices get one zeroed element so every
    /// binding is backed
    fn storage<T: Pod>(&self, label: &str, data: &[T]) -> wgpu::Buffer {
        let padding = [T::zeroed()];
        let contents: &[u8] = if data.is_empty() {
            bytemuck::cast_slice(&padding)
        } else {
            bytemuck::cast_slice(data)
        };
        self.device.create_buffer_init(&BufferInitDescriptor {
            label: Some(label),
            contents,
            usage: wgpu::BufferUsages::STORAGE,
        })
    }

    fn read_back(&self, buffer: &wgpu::Buffer, output: &mut [[f32; 4]]) -> Result<()> {
        let slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| RenderError::backend(e.to_string()))?
            .map_err(|e| RenderError::backend(e.to_string()))?;

        {
            let mapped = slice.get_mapped_range();
            output.copy_from_slice(bytemuck::cast_slice(&mapped));
        }
        buffer.unmap();
        Ok(())
    }
}

impl RayTracingBackend for GpuBackend {
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
        let entry_point = match programs.raygen {
            RayGenProgram::PathTracer => "path_trace_cs",
            RayGenProgram::GaussianSplats => "splat_trace_cs",
        };
        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(entry_point),
            layout: Some(&self.pipeline_layout),
            module: &self.shader_module,
            entry_point,
        });
        self.pipelines.push(GpuPipeline {
            programs: programs.clone(),
            pipeline,
        });
        Ok(PipelineHandle(self.pipelines.len() as u32 - 1))
    }

    fn shader_group_handles(&self, pipeline: PipelineHandle) -> Result<Vec<Vec<u8>>> {
        let pipeline = self.pipeline(pipeline)?;
        Ok(indexed_group_handles(&self.limits, pipeline.programs.group_count()))
    }

    fn trace_rays(&mut self, launch: &LaunchDesc, output: &mut [[f32; 4]]) -> Result<()> {
        let gpu_pipeline = self.pipeline(launch.pipeline)?;
        let flat = self.store.flatten(launch.tlas)?;
        let (width, height) = (launch.width(), launch.height());
        validate_launch(&gpu_pipeline.programs, &flat, launch.sbt, output.len(), width, height)?;
        if width == 0 || height == 0 {
            return Ok(());
        }

        let params = LaunchParams {
            uniforms: launch.uniforms,
            accel: flat.offsets,
            sbt: launch.sbt.regions(),
        };
        let resources = launch.resources;
        let (env_texels, env_cdf) = match resources.environment {
            Some(map) => (map.texels(), map.cdf()),
            None => (&[][..], &[][..]),
        };

        let buffers = [
            self.storage("Launch Params", std::slice::from_ref(&params)),
            self.storage("Acceleration Words", &flat.words),
            self.storage("Shader Binding Table", launch.sbt.words()),
            self.storage("Vertices", &resources.geometry.vertices),
            self.storage("Indices", &resources.geometry.indices),
            self.storage("Materials", resources.materials),
            self.storage("Texture Infos", resources.textures),
            self.storage("Environment Texels", env_texels),
            self.storage("Environment CDF", env_cdf),
            self.storage("Particles", resources.particles),
        ];
        let output_size = std::mem::size_of_val(output) as u64;
        let output_buffer = self.device.create_buffer_init(&BufferInitDescriptor {
            label: Some("Accumulation Buffer"),
            contents: bytemuck::cast_slice(output),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        });
        let texel_buffer = self.storage("Material Texels", resources.texels);
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: output_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: OUTPUT_BINDING,
            resource: output_buffer.as_entire_binding(),
        });
        entries.push(wgpu::BindGroupEntry {
            binding: OUTPUT_BINDING + 1,
            resource: texel_buffer.as_entire_binding(),
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Launch Bind Group"),
            layout: &self.bind_group_layout,
            entries: &entries,
        });

        let (group_width, group_height) = TracerConfig::WORKGROUP_SIZE;
        let groups_x = width.div_ceil(group_width);
        let groups_y = height.div_ceil(group_height);
        debug!(
            "Dispatching {groups_x}x{groups_y} workgroups ({:?}), frame {}",
            gpu_pipeline.programs.raygen, launch.uniforms.accumulated_frames
        );

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Trace Encoder"),
        });
        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Trace Pass"),
            });
            compute_pass.set_pipeline(&gpu_pipeline.pipeline);
            compute_pass.set_bind_group(0, &bind_group, &[]);
            compute_pass.dispatch_workgroups(groups_x, groups_y, 1);
        }
        encoder.copy_buffer_to_buffer(&output_buffer, 0, &staging_buffer, 0, output_size);
        self.queue.submit(std::iter::once(encoder.finish()));

        self.read_back(&staging_buffer, output)
    }

    fn release_acceleration_structures(&mut self) {
        self.store.clear();
    }
}
