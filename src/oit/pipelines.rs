//! Shader programs and the pipeline cache.
//!
//! Every program is assembled from the shared `scene.wgsl` prelude, a vertex
//! stage (`model.wgsl` for the mesh, `fullscreen.wgsl` for screen passes), and
//! one fragment file. Pipelines are built lazily per [`PipelineKey`] and kept
//! for the lifetime of the renderer.
//!
//! # Bind groups
//!
//! - **Group 0**: [`SceneUniforms`](crate::material::SceneUniforms), all programs
//! - **Group 1**: the program's texture input, if any (see [`ProgramInput`])

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use super::state::DrawState;
use super::targets::DEPTH_FORMAT;
use crate::error::{ErrorScope, RenderError};
use crate::gpu::GpuContext;
use crate::mesh::Vertex3d;

const SCENE: &str = include_str!("../shaders/scene.wgsl");
const MODEL: &str = include_str!("../shaders/model.wgsl");
const FULLSCREEN: &str = include_str!("../shaders/fullscreen.wgsl");
const ALPHA_TEST: &str = include_str!("../shaders/alpha_test.wgsl");
const ALPHA_BLEND: &str = include_str!("../shaders/alpha_blend.wgsl");
const OIT_INIT: &str = include_str!("../shaders/oit_init.wgsl");
const OIT_PEEL: &str = include_str!("../shaders/oit_peel.wgsl");
const OIT_BLEND: &str = include_str!("../shaders/oit_blend.wgsl");
const OIT_FINAL: &str = include_str!("../shaders/oit_final.wgsl");

/// A linked vertex + fragment program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Program {
    /// Mask-texture cutout, opaque output.
    AlphaTest,
    /// Lit color with `1 - transparency` alpha.
    AlphaBlend,
    /// Nearest layer into the accumulation buffer.
    Seed,
    /// Next layer behind the previous depth frontier.
    Peel,
    /// Fullscreen pass that under-blends a peeled layer.
    Composite,
    /// Fullscreen pass that puts the accumulation over the background.
    Resolve,
}

/// Texture bound at group 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgramInput {
    /// Filterable mask texture and sampler.
    Mask,
    /// Depth texture read with `textureLoad`.
    Depth,
    /// Unfilterable float color texture read with `textureLoad`.
    Color,
}

impl Program {
    pub const ALL: [Program; 6] = [
        Program::AlphaTest,
        Program::AlphaBlend,
        Program::Seed,
        Program::Peel,
        Program::Composite,
        Program::Resolve,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Program::AlphaTest => "Alpha Test Program",
            Program::AlphaBlend => "Alpha Blend Program",
            Program::Seed => "Peel Seed Program",
            Program::Peel => "Peel Program",
            Program::Composite => "Layer Composite Program",
            Program::Resolve => "Final Composite Program",
        }
    }

    /// Fullscreen programs draw three vertices without a vertex buffer or depth.
    pub fn is_fullscreen(self) -> bool {
        matches!(self, Program::Composite | Program::Resolve)
    }

    pub fn input(self) -> Option<ProgramInput> {
        match self {
            Program::AlphaTest => Some(ProgramInput::Mask),
            Program::AlphaBlend | Program::Seed => None,
            Program::Peel => Some(ProgramInput::Depth),
            Program::Composite | Program::Resolve => Some(ProgramInput::Color),
        }
    }

    /// Complete WGSL source of the program.
    pub fn source(self) -> String {
        let fragment = match self {
            Program::AlphaTest => ALPHA_TEST,
            Program::AlphaBlend => ALPHA_BLEND,
            Program::Seed => OIT_INIT,
            Program::Peel => OIT_PEEL,
            Program::Composite => OIT_BLEND,
            Program::Resolve => OIT_FINAL,
        };
        let vertex = if self.is_fullscreen() { FULLSCREEN } else { MODEL };
        [SCENE, vertex, fragment].join("\n")
    }

    fn vertex_entry(self) -> &'static str {
        if self.is_fullscreen() { "vs_fullscreen" } else { "vs" }
    }
}

/// Cache key: a program drawn with a given state into a given color format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub program: Program,
    pub state: DrawState,
    pub format: wgpu::TextureFormat,
}

/// Bind group layouts shared by all programs.
pub struct BindLayouts {
    pub scene: wgpu::BindGroupLayout,
    pub mask: wgpu::BindGroupLayout,
    pub depth_input: wgpu::BindGroupLayout,
    pub color_input: wgpu::BindGroupLayout,
}

impl BindLayouts {
    fn new(device: &wgpu::Device) -> Self {
        let scene = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Scene Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let mask = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Mask Bind Group Layout"),
            entries: &[
                texture_entry(0, wgpu::TextureSampleType::Float { filterable: true }),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let depth_input = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Previous Depth Bind Group Layout"),
            entries: &[texture_entry(0, wgpu::TextureSampleType::Depth)],
        });

        let color_input = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Layer Color Bind Group Layout"),
            entries: &[texture_entry(
                0,
                wgpu::TextureSampleType::Float { filterable: false },
            )],
        });

        Self {
            scene,
            mask,
            depth_input,
            color_input,
        }
    }

    pub fn input(&self, input: ProgramInput) -> &wgpu::BindGroupLayout {
        match input {
            ProgramInput::Mask => &self.mask,
            ProgramInput::Depth => &self.depth_input,
            ProgramInput::Color => &self.color_input,
        }
    }

    /// Binds a single texture view for [`ProgramInput::Depth`] or [`ProgramInput::Color`].
    pub fn texture_bind_group(
        &self,
        gpu: &GpuContext,
        input: ProgramInput,
        view: &wgpu::TextureView,
        label: &str,
    ) -> wgpu::BindGroup {
        gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: self.input(input),
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(view),
            }],
        })
    }
}

fn texture_entry(binding: u32, sample_type: wgpu::TextureSampleType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

/// Render pipelines keyed by program, draw state and target format.
pub struct PipelineCache {
    layouts: BindLayouts,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

impl PipelineCache {
    pub fn new(gpu: &GpuContext) -> Self {
        Self {
            layouts: BindLayouts::new(&gpu.device),
            pipelines: HashMap::new(),
        }
    }

    pub fn layouts(&self) -> &BindLayouts {
        &self.layouts
    }

    /// Number of pipelines built so far.
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Returns the pipeline for `key`, building it on first use.
    pub fn get(
        &mut self,
        gpu: &GpuContext,
        key: PipelineKey,
    ) -> Result<&wgpu::RenderPipeline, RenderError> {
        match self.pipelines.entry(key) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let pipeline = build_pipeline(gpu, &self.layouts, key)?;
                log::debug!(
                    target: "oit",
                    "built {} for {:?} ({:?})",
                    key.program.label(),
                    key.format,
                    key.state
                );
                Ok(entry.insert(pipeline))
            }
        }
    }
}

fn build_pipeline(
    gpu: &GpuContext,
    layouts: &BindLayouts,
    key: PipelineKey,
) -> Result<wgpu::RenderPipeline, RenderError> {
    let device = &gpu.device;
    let program = key.program;
    let label = program.label();

    let scope = ErrorScope::push(device, label);

    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(program.source().into()),
    });

    let mut groups = vec![&layouts.scene];
    if let Some(input) = program.input() {
        groups.push(layouts.input(input));
    }
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &groups,
        push_constant_ranges: &[],
    });

    let state = key.state;
    let depth_stencil = (!program.is_fullscreen()).then(|| wgpu::DepthStencilState {
        format: DEPTH_FORMAT,
        depth_write_enabled: state.depth_write,
        depth_compare: state.depth_compare,
        stencil: wgpu::StencilState::default(),
        bias: wgpu::DepthBiasState::default(),
    });
    let vertex_buffers: &[wgpu::VertexBufferLayout] = if program.is_fullscreen() {
        &[]
    } else {
        &[Vertex3d::LAYOUT]
    };

    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some(program.vertex_entry()),
            buffers: vertex_buffers,
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs"),
            targets: &[Some(wgpu::ColorTargetState {
                format: key.format,
                blend: state.blend,
                write_mask: state.color_writes,
            })],
            compilation_options: Default::default(),
        }),
        // Peeling needs back faces; no culling anywhere.
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });

    scope.finish().map_err(|message| RenderError::ShaderLink {
        label: label.to_string(),
        message,
    })?;

    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_program_has_both_stages() {
        for program in Program::ALL {
            let src = program.source();
            assert!(src.contains("struct Scene"), "{:?}", program);
            assert!(src.contains("fn fs("), "{:?}", program);
            assert!(src.contains(&format!("fn {}(", program.vertex_entry())), "{:?}", program);
        }
    }

    #[test]
    fn mesh_programs_use_invariant_position() {
        for program in Program::ALL.into_iter().filter(|p| !p.is_fullscreen()) {
            assert!(program.source().contains("@invariant"), "{:?}", program);
        }
    }

    #[test]
    fn group_one_matches_shader_bindings() {
        assert!(Program::Peel.source().contains("texture_depth_2d"));
        assert_eq!(Program::Peel.input(), Some(ProgramInput::Depth));
        assert!(Program::AlphaTest.source().contains("mask_sampler"));
        assert_eq!(Program::AlphaTest.input(), Some(ProgramInput::Mask));
        assert!(!Program::Seed.source().contains("@group(1)"));
        assert_eq!(Program::Seed.input(), None);
        assert_eq!(Program::Resolve.input(), Some(ProgramInput::Color));
    }

    #[test]
    fn peel_discards_at_or_before_the_frontier() {
        let src = Program::Peel.source();
        assert!(src.contains("in.clip_position.z <= frontier"));
    }
}
