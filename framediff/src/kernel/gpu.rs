use wgpu::util::DeviceExt;

use super::pipeline::GpuDifferencePipeline;
use super::DifferenceKernel;
use crate::common::{Error, Result};
use crate::gpu::{Gpu, OutputTexture, Texture};

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Params {
    width: u32,
    height: u32,
    threshold: f32,
    _padding: u32,
}

/// Dispatches the difference kernel and copies the result to staging.
///
/// # Panics
/// Panics if the three textures differ in size.
pub(super) fn apply(
    kernel: &DifferenceKernel,
    gpu: &Gpu,
    pipeline: &GpuDifferencePipeline,
    previous: &Texture,
    current: &Texture,
    output: &OutputTexture,
) -> Result<()> {
    let device = gpu.device();
    let queue = gpu.queue();

    assert_eq!(previous.format(), current.format(), "previous/current desc mismatch");
    assert_eq!(
        (current.width(), current.height()),
        (output.texture().width(), output.texture().height()),
        "input/output size mismatch"
    );

    let width = current.width();
    let height = current.height();

    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let uniform_params = Params {
        width,
        height,
        threshold: kernel.threshold,
        _padding: 0,
    };

    let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("difference_params_buffer"),
        contents: bytemuck::cast_slice(&[uniform_params]),
        usage: wgpu::BufferUsages::UNIFORM,
    });

    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("difference_bind_group"),
        layout: &pipeline.bind_group_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: params_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: previous.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: current.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: output.texture().as_entire_binding(),
            },
        ],
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("difference_encoder"),
    });

    {
        let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("difference_pass"),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(&pipeline.compute_pipeline);
        compute_pass.set_bind_group(0, &bind_group, &[]);

        let (groups_x, groups_y) = pipeline.workgroup_size.dispatch_size(width, height);
        compute_pass.dispatch_workgroups(groups_x, groups_y, 1);
    }

    encoder.copy_buffer_to_buffer(
        output.texture().buffer(),
        0,
        output.staging(),
        0,
        output.size(),
    );

    queue.submit(std::iter::once(encoder.finish()));

    let validation = pollster::block_on(device.pop_error_scope());
    let out_of_memory = pollster::block_on(device.pop_error_scope());
    if let Some(err) = validation.or(out_of_memory) {
        return Err(Error::Submission(err.to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::test_utils::{frame_with_square, solid_frame, test_gpu};
    use crate::gpu::TextureBinder;
    use crate::kernel::is_changed;
    use crate::pool::FrameBufferPool;

    #[test]
    fn gpu_matches_cpu_reference() {
        let Some(gpu) = test_gpu() else {
            return;
        };

        // 37x23 does not divide into 16x16 workgroups
        let previous = frame_with_square(37, 23, 20, (3, 4), 6, 230);
        let current = frame_with_square(37, 23, 20, (9, 11), 6, 230);
        let format = *current.format();

        let kernel = DifferenceKernel::default();
        let pipeline = GpuDifferencePipeline::new(&gpu).unwrap();
        let pool = FrameBufferPool::configure(format, 1, 0).unwrap();
        let mut binder = TextureBinder::new(gpu.clone(), format, 2);

        binder.begin_pass();
        let prev_tex = binder.bind_frame(&previous).unwrap();
        let cur_tex = binder.bind_frame(&current).unwrap();
        let buffer = pool.acquire().unwrap();
        let out_tex = binder.bind_output(&buffer).unwrap();

        kernel
            .apply_gpu(&gpu, &pipeline, &prev_tex, &cur_tex, &out_tex)
            .unwrap();
        buffer.set_pending(crate::gpu::PendingReadback::new(
            gpu.clone(),
            out_tex.staging().clone(),
            out_tex.size(),
        ));

        let mut expected = vec![0u8; format.size_in_bytes()];
        kernel.apply_cpu(&previous, &current, &mut expected);

        let guard = buffer.lock().unwrap();
        for (i, (e, g)) in expected.chunks_exact(4).zip(guard.chunks_exact(4)).enumerate() {
            let e = [e[0], e[1], e[2], e[3]];
            let g = [g[0], g[1], g[2], g[3]];
            assert_eq!(is_changed(e), is_changed(g), "pixel {} sentinel differs", i);
            for c in 0..4 {
                let diff = (e[c] as i32 - g[c] as i32).abs();
                assert!(diff <= 1, "pixel {} channel {}: cpu={} gpu={}", i, c, e[c], g[c]);
            }
        }
    }

    #[test]
    fn small_workgroups_cover_whole_image() {
        let Some(gpu) = test_gpu() else {
            return;
        };

        let previous = solid_frame(19, 7, 0);
        let current = solid_frame(19, 7, 255);
        let format = *current.format();

        let pipeline = GpuDifferencePipeline::with_workgroup_size(
            &gpu,
            crate::gpu::WorkgroupSize { x: 8, y: 2 },
        )
        .unwrap();
        let pool = FrameBufferPool::configure(format, 1, 0).unwrap();
        let mut binder = TextureBinder::new(gpu.clone(), format, 2);

        binder.begin_pass();
        let prev_tex = binder.bind_frame(&previous).unwrap();
        let cur_tex = binder.bind_frame(&current).unwrap();
        let buffer = pool.acquire().unwrap();
        let out_tex = binder.bind_output(&buffer).unwrap();

        DifferenceKernel::default()
            .apply_gpu(&gpu, &pipeline, &prev_tex, &cur_tex, &out_tex)
            .unwrap();
        buffer.set_pending(crate::gpu::PendingReadback::new(
            gpu.clone(),
            out_tex.staging().clone(),
            out_tex.size(),
        ));

        let guard = buffer.lock().unwrap();
        assert!(guard
            .chunks_exact(4)
            .all(|px| is_changed([px[0], px[1], px[2], px[3]])));
    }
}
