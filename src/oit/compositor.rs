//! Fullscreen passes: under-blending a peeled layer into the accumulation
//! buffer, and the final composite over the background.

use super::blend;
use super::pipelines::{PipelineCache, PipelineKey, Program, ProgramInput};
use super::state::{DrawState, StateGuard};
use super::targets::{PingPong, TargetPool};
use crate::error::RenderError;
use crate::gpu::GpuContext;

/// Depth off, under-blending on.
pub fn composite_state(state: &mut DrawState) {
    state.depth_write = false;
    state.depth_compare = wgpu::CompareFunction::Always;
    state.blend = Some(blend::UNDER);
    state.color_writes = wgpu::ColorWrites::ALL;
}

/// Depth off, blending off; the shader does the background blend itself.
pub fn resolve_state(state: &mut DrawState) {
    state.depth_write = false;
    state.depth_compare = wgpu::CompareFunction::Always;
    state.blend = None;
    state.color_writes = wgpu::ColorWrites::ALL;
}

pub struct LayerCompositor {
    /// `layer_inputs[i]` binds `pair[i].color`.
    layer_inputs: [wgpu::BindGroup; 2],
    accumulation_input: wgpu::BindGroup,
}

impl LayerCompositor {
    pub fn new(gpu: &GpuContext, pool: &TargetPool, cache: &PipelineCache) -> Self {
        let layouts = cache.layouts();
        let layer_inputs = [0, 1].map(|i| {
            layouts.texture_bind_group(
                gpu,
                ProgramInput::Color,
                &pool.target(i).color.view,
                &format!("Peeled Layer {}", i),
            )
        });
        let accumulation_input = layouts.texture_bind_group(
            gpu,
            ProgramInput::Color,
            &pool.accumulation().color.view,
            "Accumulation Input",
        );

        Self {
            layer_inputs,
            accumulation_input,
        }
    }

    /// Under-blends the layer in `pair[pp.write]` into the accumulation target.
    ///
    /// The accumulation target is loaded, not cleared. Depth testing and depth
    /// writes are off for the pass and `state` is restored afterwards.
    pub fn composite(
        &self,
        gpu: &GpuContext,
        cache: &mut PipelineCache,
        pool: &TargetPool,
        state: &mut DrawState,
        scene: &wgpu::BindGroup,
        pp: PingPong,
    ) -> Result<(), RenderError> {
        let mut guard = StateGuard::acquire(state);
        composite_state(&mut guard);

        let accumulation = &pool.accumulation().color;
        self.fullscreen(
            gpu,
            cache,
            PipelineKey {
                program: Program::Composite,
                state: *guard,
                format: accumulation.format,
            },
            &accumulation.view,
            scene,
            &self.layer_inputs[pp.write],
            "Layer Composite Pass",
        )
    }

    /// Writes `accumulation.rgb + accumulation.a * background` into `view`.
    pub fn resolve(
        &self,
        gpu: &GpuContext,
        cache: &mut PipelineCache,
        state: &mut DrawState,
        scene: &wgpu::BindGroup,
        view: &wgpu::TextureView,
    ) -> Result<(), RenderError> {
        let mut guard = StateGuard::acquire(state);
        resolve_state(&mut guard);

        self.fullscreen(
            gpu,
            cache,
            PipelineKey {
                program: Program::Resolve,
                state: *guard,
                format: gpu.config.format,
            },
            view,
            scene,
            &self.accumulation_input,
            "Final Composite Pass",
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn fullscreen(
        &self,
        gpu: &GpuContext,
        cache: &mut PipelineCache,
        key: PipelineKey,
        view: &wgpu::TextureView,
        scene: &wgpu::BindGroup,
        input: &wgpu::BindGroup,
        label: &str,
    ) -> Result<(), RenderError> {
        let pipeline = cache.get(gpu, key)?;

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, scene, &[]);
            pass.set_bind_group(1, input, &[]);
            pass.draw(0..3, 0..1);
        }
        gpu.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_state_disables_depth_and_under_blends() {
        let mut state = DrawState::default();
        {
            let mut guard = StateGuard::acquire(&mut state);
            composite_state(&mut guard);
            assert!(!guard.depth_write);
            assert_eq!(guard.blend, Some(blend::UNDER));
        }
        // Depth writes are back on for whatever draws next.
        assert!(state.depth_write);
        assert_eq!(state, DrawState::default());
    }

    #[test]
    fn resolve_state_writes_without_blending() {
        let mut state = DrawState::default();
        resolve_state(&mut state);
        assert!(!state.blending_enabled());
        assert!(!state.depth_write);
    }
}
