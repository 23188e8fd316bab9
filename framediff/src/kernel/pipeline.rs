use crate::common::{Error, Result};
use crate::gpu::{Gpu, WorkgroupSize};

const DIFFERENCE_SHADER: &str = include_str!("difference.wgsl");

/// Cached GPU pipeline for the difference kernel.
/// Create once per device and reuse for every render.
#[derive(Debug)]
pub struct GpuDifferencePipeline {
    pub(super) compute_pipeline: wgpu::ComputePipeline,
    pub(super) bind_group_layout: wgpu::BindGroupLayout,
    pub(super) workgroup_size: WorkgroupSize,
}

impl GpuDifferencePipeline {
    /// Compiles the kernel with the device's preferred workgroup shape.
    pub fn new(gpu: &Gpu) -> Result<Self> {
        Self::with_workgroup_size(gpu, gpu.preferred_workgroup_size())
    }

    pub fn with_workgroup_size(gpu: &Gpu, workgroup_size: WorkgroupSize) -> Result<Self> {
        let device = gpu.device();
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let source = DIFFERENCE_SHADER
            .replace("{{WORKGROUP_X}}", &workgroup_size.x.to_string())
            .replace("{{WORKGROUP_Y}}", &workgroup_size.y.to_string());

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("difference_shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("difference_bind_group_layout"),
            entries: &[
                // Params uniform
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Previous frame
                storage_entry(1, true),
                // Current frame
                storage_entry(2, true),
                // Output
                storage_entry(3, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("difference_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let compute_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("difference_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(Error::Gpu(format!("difference pipeline creation failed: {}", err)));
        }

        tracing::debug!("compiled difference kernel with workgroup {}", workgroup_size);

        Ok(Self {
            compute_pipeline,
            bind_group_layout,
            workgroup_size,
        })
    }

    pub fn workgroup_size(&self) -> WorkgroupSize {
        self.workgroup_size
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}
