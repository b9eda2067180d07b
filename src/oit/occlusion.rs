//! Occlusion query used as the depth-peeling termination oracle.

use std::sync::mpsc::channel;

use crate::error::RenderError;
use crate::gpu::GpuContext;

const RESULT_SIZE: wgpu::BufferAddress = std::mem::size_of::<u64>() as wgpu::BufferAddress;

/// A single-slot occlusion query with its resolve and readback buffers.
///
/// Usage per peel pass: attach [`OcclusionQuery::query_set`] to the render pass,
/// wrap the draw in `begin_occlusion_query(0)` / `end_occlusion_query()`, call
/// [`OcclusionQuery::resolve`] on the encoder, submit, then [`OcclusionQuery::read_samples`].
pub struct OcclusionQuery {
    query_set: wgpu::QuerySet,
    resolve_buffer: wgpu::Buffer,
    readback_buffer: wgpu::Buffer,
}

impl OcclusionQuery {
    pub fn new(gpu: &GpuContext) -> Self {
        let query_set = gpu.device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("Peel Occlusion Query"),
            ty: wgpu::QueryType::Occlusion,
            count: 1,
        });

        let resolve_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Occlusion Resolve Buffer"),
            size: RESULT_SIZE,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let readback_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Occlusion Readback Buffer"),
            size: RESULT_SIZE,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            query_set,
            resolve_buffer,
            readback_buffer,
        }
    }

    pub fn query_set(&self) -> &wgpu::QuerySet {
        &self.query_set
    }

    /// Records the resolve of slot 0 and the copy into the mappable buffer.
    pub fn resolve(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.resolve_query_set(&self.query_set, 0..1, &self.resolve_buffer, 0);
        encoder.copy_buffer_to_buffer(
            &self.resolve_buffer,
            0,
            &self.readback_buffer,
            0,
            RESULT_SIZE,
        );
    }

    /// Blocks until the submitted query result is available and returns the
    /// number of samples that passed.
    ///
    /// Backends may report any non-zero value for "some samples passed"; only
    /// zero versus non-zero is meaningful.
    pub fn read_samples(&self, gpu: &GpuContext) -> Result<u64, RenderError> {
        let slice = self.readback_buffer.slice(..);
        let (sender, receiver) = channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = sender.send(res);
        });

        loop {
            gpu.device
                .poll(wgpu::PollType::Wait)
                .map_err(|e| RenderError::Readback(e.to_string()))?;
            if let Ok(res) = receiver.try_recv() {
                res?;
                break;
            }
        }

        let samples = {
            let mapped = slice.get_mapped_range();
            bytemuck::pod_read_unaligned::<u64>(&mapped[..RESULT_SIZE as usize])
        };
        self.readback_buffer.unmap();

        Ok(samples)
    }
}
