//! Seed and peel passes.
//!
//! The seed pass renders the nearest surface into the accumulation target and
//! leaves its depth in `pair[0]`. Each peel pass then renders only what lies
//! strictly behind the depth the previous pass left, into the other member of
//! the pair, counting the samples that survive.

use super::occlusion::OcclusionQuery;
use super::pipelines::{PipelineCache, PipelineKey, Program, ProgramInput};
use super::state::DrawState;
use super::targets::{LAYER_COLOR_FORMAT, PingPong, TargetPool};
use crate::error::RenderError;
use crate::gpu::GpuContext;
use crate::mesh::Mesh;

/// What a mesh pass draws: the geometry and the frame's scene bind group.
#[derive(Clone, Copy)]
pub struct MeshDraw<'a> {
    pub mesh: &'a Mesh,
    pub scene: &'a wgpu::BindGroup,
}

pub struct LayerPeeler {
    query: OcclusionQuery,
    /// `depth_inputs[i]` binds `pair[i].depth` as the peel frontier.
    depth_inputs: [wgpu::BindGroup; 2],
}

impl LayerPeeler {
    pub fn new(gpu: &GpuContext, pool: &TargetPool, cache: &PipelineCache) -> Self {
        let layouts = cache.layouts();
        let depth_inputs = [0, 1].map(|i| {
            layouts.texture_bind_group(
                gpu,
                ProgramInput::Depth,
                &pool.target(i).depth.view,
                &format!("Peel Frontier {}", i),
            )
        });

        Self {
            query: OcclusionQuery::new(gpu),
            depth_inputs,
        }
    }

    /// Clears the accumulation target to opaque black and renders the nearest
    /// layer into it with a `Less` depth test, seeding `pair[0].depth`.
    pub fn seed(
        &self,
        gpu: &GpuContext,
        cache: &mut PipelineCache,
        pool: &TargetPool,
        state: &DrawState,
        draw: MeshDraw<'_>,
    ) -> Result<(), RenderError> {
        let accumulation = &pool.accumulation().color;
        let pipeline = cache.get(
            gpu,
            PipelineKey {
                program: Program::Seed,
                state: *state,
                format: accumulation.format,
            },
        )?;

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Peel Seed Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Peel Seed Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &accumulation.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &pool.accumulation_depth().view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, draw.scene, &[]);
            draw.mesh.draw(&mut pass);
        }
        gpu.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    /// Renders the layer behind `pair[pp.read].depth` into `pair[pp.write]`
    /// and returns how many samples passed.
    pub fn peel(
        &self,
        gpu: &GpuContext,
        cache: &mut PipelineCache,
        pool: &TargetPool,
        state: &DrawState,
        draw: MeshDraw<'_>,
        pp: PingPong,
    ) -> Result<u64, RenderError> {
        let target = pool.target(pp.write);
        let pipeline = cache.get(
            gpu,
            PipelineKey {
                program: Program::Peel,
                state: *state,
                format: LAYER_COLOR_FORMAT,
            },
        )?;

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Peel Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Peel Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.color.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &target.depth.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: Some(self.query.query_set()),
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, draw.scene, &[]);
            pass.set_bind_group(1, &self.depth_inputs[pp.read], &[]);
            pass.begin_occlusion_query(0);
            draw.mesh.draw(&mut pass);
            pass.end_occlusion_query();
        }
        self.query.resolve(&mut encoder);
        gpu.queue.submit(Some(encoder.finish()));

        self.query.read_samples(gpu)
    }
}
