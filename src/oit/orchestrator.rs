//! Per-frame sequencing of the three transparency modes.
//!
//! [`TransparencyRenderer::render`] clears the screen, then dispatches on
//! [`RenderMode`]:
//!
//! - **Alpha testing**: one pass, fragments below the mask threshold discarded.
//! - **Alpha blending**: a depth-only prime followed by a source-over color
//!   pass, both run through [`two_pass_blend`].
//! - **Depth peeling**: seed pass, then [`run_peel_loop`] alternating peel and
//!   composite until a peel comes back empty or the [`PeelCap`] is hit, then
//!   the final composite over the background.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use glam::Vec4;

use super::capture;
use super::compositor::{self, LayerCompositor};
use super::peeler::{LayerPeeler, MeshDraw};
use super::pipelines::{PipelineCache, PipelineKey, Program};
use super::state::{DrawState, two_pass_blend};
use super::targets::{Attachment, DEPTH_FORMAT, LAYER_COLOR_FORMAT, PingPong, TargetPool};
use crate::camera::Camera;
use crate::error::RenderError;
use crate::gpu::GpuContext;
use crate::material::{DirectionalLight, Material, SceneUniforms};
use crate::mesh::{Mesh, Transform};
use crate::texture::Texture;

/// How the transparent mesh is drawn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RenderMode {
    AlphaTesting,
    AlphaBlending,
    #[default]
    DepthPeeling,
}

impl RenderMode {
    pub const ALL: [RenderMode; 3] = [
        RenderMode::AlphaTesting,
        RenderMode::AlphaBlending,
        RenderMode::DepthPeeling,
    ];

    /// The following mode, wrapping around.
    pub fn next(self) -> Self {
        match self {
            RenderMode::AlphaTesting => RenderMode::AlphaBlending,
            RenderMode::AlphaBlending => RenderMode::DepthPeeling,
            RenderMode::DepthPeeling => RenderMode::AlphaTesting,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RenderMode::AlphaTesting => "Alpha Testing",
            RenderMode::AlphaBlending => "Alpha Blending",
            RenderMode::DepthPeeling => "Depth Peeling",
        }
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unrecognized render mode name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseModeError(pub String);

impl fmt::Display for ParseModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown render mode '{}' (expected alpha-testing, alpha-blending or depth-peeling)",
            self.0
        )
    }
}

impl std::error::Error for ParseModeError {}

impl FromStr for RenderMode {
    type Err = ParseModeError;

    /// Accepts the display name in any case, with spaces, `-` or `_`
    /// between words, or the short forms `test`, `blend` and `peel`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "alphatesting" | "alphatest" | "test" => Ok(RenderMode::AlphaTesting),
            "alphablending" | "alphablend" | "blend" => Ok(RenderMode::AlphaBlending),
            "depthpeeling" | "depthpeel" | "peel" => Ok(RenderMode::DepthPeeling),
            _ => Err(ParseModeError(s.to_string())),
        }
    }
}

/// Upper bound on peel passes per frame. Always at least one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeelCap(u32);

impl PeelCap {
    pub const DEFAULT: PeelCap = PeelCap(10);

    /// `None` for zero.
    pub fn new(cap: u32) -> Option<Self> {
        (cap > 0).then_some(PeelCap(cap))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for PeelCap {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Why the peel loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// A peel pass produced zero samples.
    EmptyLayer,
    /// The cap was reached with layers possibly left unpeeled.
    CapReached,
}

/// Outcome of one depth-peeling frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeelReport {
    /// Peel passes executed, including the final empty one.
    pub peel_passes: u32,
    /// Layers in the accumulation buffer, counting the seed layer.
    pub layers_composited: u32,
    pub termination: Termination,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameStats {
    pub mode: RenderMode,
    /// Present only for [`RenderMode::DepthPeeling`].
    pub peel: Option<PeelReport>,
}

/// One peel iteration's two halves, as seen by [`run_peel_loop`].
pub trait LayerPass {
    type Error;

    /// Renders the layer behind `pair[pp.read]` into `pair[pp.write]` and
    /// returns the number of samples that passed.
    fn peel(&mut self, iteration: u32, pp: PingPong) -> Result<u64, Self::Error>;

    /// Blends the layer just written to `pair[pp.write]` into the accumulation.
    fn composite(&mut self, iteration: u32, pp: PingPong) -> Result<(), Self::Error>;
}

/// Peels and composites until a layer comes back empty or `cap` passes ran.
///
/// Assumes the seed layer is already in the accumulation buffer with its
/// depth in `pair[0]`.
pub fn run_peel_loop<P: LayerPass>(layers: &mut P, cap: PeelCap) -> Result<PeelReport, P::Error> {
    let mut report = PeelReport {
        peel_passes: 0,
        layers_composited: 1,
        termination: Termination::CapReached,
    };

    for iteration in 0..cap.get() {
        let pp = PingPong::for_iteration(iteration);
        let samples = layers.peel(iteration, pp)?;
        report.peel_passes += 1;
        log::trace!(
            target: "oit",
            "peel {} (read {}, write {}): {} samples",
            iteration,
            pp.read,
            pp.write,
            samples
        );

        if samples == 0 {
            report.termination = Termination::EmptyLayer;
            return Ok(report);
        }

        layers.composite(iteration, pp)?;
        report.layers_composited += 1;
    }

    Ok(report)
}

/// Everything one frame draws.
#[derive(Clone, Copy)]
pub struct FrameParams<'a> {
    pub mode: RenderMode,
    pub mesh: &'a Mesh,
    pub transform: &'a Transform,
    pub camera: &'a Camera,
    pub light: &'a DirectionalLight,
    pub material: &'a Material,
    /// Straight (non-premultiplied) background color.
    pub background: Vec4,
}

/// Owns every GPU resource the three modes use.
pub struct TransparencyRenderer {
    pool: TargetPool,
    cache: PipelineCache,
    peeler: LayerPeeler,
    compositor: LayerCompositor,
    /// Current draw state; pipelines are selected by it.
    state: DrawState,
    scene_buffer: wgpu::Buffer,
    scene_bind_group: wgpu::BindGroup,
    mask_bind_group: wgpu::BindGroup,
    screen_depth: Attachment,
    peel_cap: PeelCap,
    alpha_threshold: f32,
}

impl TransparencyRenderer {
    /// Allocates the target pool and builds every pipeline the modes need.
    ///
    /// Fails if a render target is incomplete or a program does not link.
    pub fn new(
        gpu: &GpuContext,
        mask: &Texture,
        peel_cap: PeelCap,
        alpha_threshold: f32,
    ) -> Result<Self, RenderError> {
        let pool = TargetPool::new(gpu)?;
        let mut cache = PipelineCache::new(gpu);
        let peeler = LayerPeeler::new(gpu, &pool, &cache);
        let compositor = LayerCompositor::new(gpu, &pool, &cache);

        let scene_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Scene Uniforms"),
            size: std::mem::size_of::<SceneUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let layouts = cache.layouts();
        let scene_bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Scene Bind Group"),
            layout: &layouts.scene,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: scene_buffer.as_entire_binding(),
            }],
        });
        let mask_bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Mask Bind Group"),
            layout: &layouts.mask,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&mask.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&mask.sampler),
                },
            ],
        });

        let state = DrawState::default();
        for key in pipeline_keys(state, gpu.config.format, pool.accumulation().color.format) {
            cache.get(gpu, key)?;
        }
        log::info!(
            target: "oit",
            "linked {} pipelines, accumulation {:?} (rgba32f flags {:?}), peel cap {}",
            cache.len(),
            pool.accumulation().color.format,
            gpu.rgba32_float_features().flags,
            peel_cap.get()
        );

        let screen_depth = Attachment::new(gpu, "Screen Depth", DEPTH_FORMAT, (gpu.width(), gpu.height()));

        Ok(Self {
            pool,
            cache,
            peeler,
            compositor,
            state,
            scene_buffer,
            scene_bind_group,
            mask_bind_group,
            screen_depth,
            peel_cap,
            alpha_threshold,
        })
    }

    /// Renders one frame into `view`, which must have the context's format.
    pub fn render(
        &mut self,
        gpu: &GpuContext,
        view: &wgpu::TextureView,
        params: &FrameParams<'_>,
    ) -> Result<FrameStats, RenderError> {
        self.ensure_extent(gpu)?;

        let uniforms = SceneUniforms::new(
            params.camera,
            params.transform.matrix(),
            params.light,
            params.material,
            params.background,
            self.alpha_threshold,
        );
        gpu.queue
            .write_buffer(&self.scene_buffer, 0, bytemuck::bytes_of(&uniforms));

        self.clear_screen(gpu, view, params.background);

        let peel = match params.mode {
            RenderMode::AlphaTesting => {
                self.render_alpha_testing(gpu, view, params.mesh)?;
                None
            }
            RenderMode::AlphaBlending => {
                self.render_alpha_blending(gpu, view, params.mesh)?;
                None
            }
            RenderMode::DepthPeeling => Some(self.render_depth_peeling(gpu, view, params.mesh)?),
        };

        let stats = FrameStats {
            mode: params.mode,
            peel,
        };
        log::trace!(target: "oit", "{:?}", stats);
        Ok(stats)
    }

    fn render_alpha_testing(
        &mut self,
        gpu: &GpuContext,
        view: &wgpu::TextureView,
        mesh: &Mesh,
    ) -> Result<(), RenderError> {
        let pipeline = self.cache.get(
            gpu,
            PipelineKey {
                program: Program::AlphaTest,
                state: self.state,
                format: gpu.config.format,
            },
        )?;
        screen_pass(gpu, view, &self.screen_depth.view, "Alpha Test Pass", |pass| {
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &self.scene_bind_group, &[]);
            pass.set_bind_group(1, &self.mask_bind_group, &[]);
            mesh.draw(pass);
        });
        Ok(())
    }

    fn render_alpha_blending(
        &mut self,
        gpu: &GpuContext,
        view: &wgpu::TextureView,
        mesh: &Mesh,
    ) -> Result<(), RenderError> {
        let Self {
            cache,
            state,
            scene_bind_group,
            screen_depth,
            ..
        } = self;

        two_pass_blend(state, |pass_state| {
            let pipeline = cache.get(
                gpu,
                PipelineKey {
                    program: Program::AlphaBlend,
                    state: *pass_state,
                    format: gpu.config.format,
                },
            )?;
            let label = if pass_state.color_writes.is_empty() {
                "Depth Prime Pass"
            } else {
                "Alpha Blend Pass"
            };
            screen_pass(gpu, view, &screen_depth.view, label, |pass| {
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &*scene_bind_group, &[]);
                mesh.draw(pass);
            });
            Ok(())
        })
    }

    fn render_depth_peeling(
        &mut self,
        gpu: &GpuContext,
        view: &wgpu::TextureView,
        mesh: &Mesh,
    ) -> Result<PeelReport, RenderError> {
        let draw = MeshDraw {
            mesh,
            scene: &self.scene_bind_group,
        };
        self.peeler
            .seed(gpu, &mut self.cache, &self.pool, &self.state, draw)?;

        let mut layers = GpuLayers {
            gpu,
            cache: &mut self.cache,
            pool: &self.pool,
            peeler: &self.peeler,
            compositor: &self.compositor,
            state: &mut self.state,
            draw,
        };
        let report = run_peel_loop(&mut layers, self.peel_cap)?;
        if report.termination == Termination::CapReached {
            log::trace!(target: "oit", "peel cap {} reached", self.peel_cap.get());
        }

        self.compositor.resolve(
            gpu,
            &mut self.cache,
            &mut self.state,
            &self.scene_bind_group,
            view,
        )?;
        Ok(report)
    }

    fn clear_screen(&self, gpu: &GpuContext, view: &wgpu::TextureView, background: Vec4) {
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Clear Encoder"),
            });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: background.x as f64,
                        g: background.y as f64,
                        b: background.z as f64,
                        a: background.w as f64,
                    }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.screen_depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        gpu.queue.submit(Some(encoder.finish()));
    }

    /// Reallocates the screen depth and the peel targets when the surface
    /// size no longer matches them. The bind groups reading the old targets
    /// are rebuilt with them; pipelines do not depend on the size.
    fn ensure_extent(&mut self, gpu: &GpuContext) -> Result<(), RenderError> {
        let extent = (gpu.width(), gpu.height());

        let texture = &self.screen_depth.texture;
        if (texture.width(), texture.height()) != extent {
            self.screen_depth = Attachment::new(gpu, "Screen Depth", DEPTH_FORMAT, extent);
        }

        if self.pool.extent() != extent {
            log::info!(
                target: "oit",
                "surface is {}x{}, reallocating peel targets",
                extent.0,
                extent.1
            );
            let pool = TargetPool::new(gpu)?;
            self.peeler = LayerPeeler::new(gpu, &pool, &self.cache);
            self.compositor = LayerCompositor::new(gpu, &pool, &self.cache);
            self.pool = pool;
        }
        Ok(())
    }

    /// Writes the accumulation and ping-pong targets to PNG files in `dir`.
    pub fn capture(&self, gpu: &GpuContext, dir: &Path) -> Result<(), RenderError> {
        capture::capture_targets(gpu, &self.pool, dir)
    }

    /// The state the next mesh draw would use.
    pub fn state(&self) -> DrawState {
        self.state
    }

    pub fn pool(&self) -> &TargetPool {
        &self.pool
    }

    pub fn peel_cap(&self) -> PeelCap {
        self.peel_cap
    }

    pub fn set_peel_cap(&mut self, cap: PeelCap) {
        self.peel_cap = cap;
    }
}

/// Every pipeline the three modes can select starting from `base`.
fn pipeline_keys(
    base: DrawState,
    surface: wgpu::TextureFormat,
    accumulation: wgpu::TextureFormat,
) -> Vec<PipelineKey> {
    let key = |program, state, format| PipelineKey {
        program,
        state,
        format,
    };
    let mut keys = vec![
        key(Program::AlphaTest, base, surface),
        key(Program::Seed, base, accumulation),
        key(Program::Peel, base, LAYER_COLOR_FORMAT),
    ];

    let mut state = base;
    let _ = two_pass_blend::<()>(&mut state, |s| {
        keys.push(key(Program::AlphaBlend, *s, surface));
        Ok(())
    });

    let mut composite = base;
    compositor::composite_state(&mut composite);
    keys.push(key(Program::Composite, composite, accumulation));

    let mut resolve = base;
    compositor::resolve_state(&mut resolve);
    keys.push(key(Program::Resolve, resolve, surface));

    keys
}

/// Records and submits one pass against the screen color and depth, loading both.
fn screen_pass(
    gpu: &GpuContext,
    color: &wgpu::TextureView,
    depth: &wgpu::TextureView,
    label: &str,
    record: impl FnOnce(&mut wgpu::RenderPass<'_>),
) {
    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
    {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: color,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        record(&mut pass);
    }
    gpu.queue.submit(Some(encoder.finish()));
}

/// The GPU side of [`LayerPass`].
struct GpuLayers<'a> {
    gpu: &'a GpuContext,
    cache: &'a mut PipelineCache,
    pool: &'a TargetPool,
    peeler: &'a LayerPeeler,
    compositor: &'a LayerCompositor,
    state: &'a mut DrawState,
    draw: MeshDraw<'a>,
}

impl LayerPass for GpuLayers<'_> {
    type Error = RenderError;

    fn peel(&mut self, _iteration: u32, pp: PingPong) -> Result<u64, RenderError> {
        self.peeler
            .peel(self.gpu, self.cache, self.pool, self.state, self.draw, pp)
    }

    fn composite(&mut self, _iteration: u32, pp: PingPong) -> Result<(), RenderError> {
        self.compositor.composite(
            self.gpu,
            self.cache,
            self.pool,
            self.state,
            self.draw.scene,
            pp,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns a scripted sample count per iteration and records the calls.
    struct Scripted {
        samples: Vec<u64>,
        calls: Vec<(&'static str, u32, PingPong)>,
    }

    impl Scripted {
        fn new(samples: &[u64]) -> Self {
            Self {
                samples: samples.to_vec(),
                calls: Vec::new(),
            }
        }
    }

    impl LayerPass for Scripted {
        type Error = String;

        fn peel(&mut self, iteration: u32, pp: PingPong) -> Result<u64, String> {
            self.calls.push(("peel", iteration, pp));
            // Past the script: the backend keeps reporting samples.
            Ok(self.samples.get(iteration as usize).copied().unwrap_or(1))
        }

        fn composite(&mut self, iteration: u32, pp: PingPong) -> Result<(), String> {
            self.calls.push(("composite", iteration, pp));
            Ok(())
        }
    }

    #[test]
    fn stops_on_first_empty_layer() {
        let mut layers = Scripted::new(&[120, 40, 0, 7]);
        let report = run_peel_loop(&mut layers, PeelCap::DEFAULT).unwrap();

        assert_eq!(
            report,
            PeelReport {
                peel_passes: 3,
                layers_composited: 3,
                termination: Termination::EmptyLayer,
            }
        );
        let names: Vec<_> = layers.calls.iter().map(|c| c.0).collect();
        assert_eq!(names, ["peel", "composite", "peel", "composite", "peel"]);
    }

    #[test]
    fn never_exceeds_the_cap() {
        for cap in 1..=12 {
            let mut layers = Scripted::new(&[]);
            let report = run_peel_loop(&mut layers, PeelCap::new(cap).unwrap()).unwrap();
            assert_eq!(report.peel_passes, cap);
            assert_eq!(report.termination, Termination::CapReached);
            assert_eq!(report.layers_composited, cap + 1);
        }
    }

    #[test]
    fn composite_reads_the_target_the_peel_wrote() {
        let mut layers = Scripted::new(&[5, 5, 5, 0]);
        run_peel_loop(&mut layers, PeelCap::DEFAULT).unwrap();

        for pair in layers.calls.chunks(2).filter(|c| c.len() == 2) {
            let (peel, composite) = (pair[0], pair[1]);
            assert_eq!(peel.1, composite.1);
            assert_eq!(peel.2, composite.2);
            assert_eq!(peel.2, PingPong::for_iteration(peel.1));
        }
    }

    #[test]
    fn errors_stop_the_loop() {
        struct Failing;
        impl LayerPass for Failing {
            type Error = &'static str;
            fn peel(&mut self, iteration: u32, _: PingPong) -> Result<u64, &'static str> {
                if iteration == 1 { Err("lost device") } else { Ok(3) }
            }
            fn composite(&mut self, _: u32, _: PingPong) -> Result<(), &'static str> {
                Ok(())
            }
        }
        assert_eq!(run_peel_loop(&mut Failing, PeelCap::DEFAULT), Err("lost device"));
    }

    #[test]
    fn peel_cap_rejects_zero() {
        assert_eq!(PeelCap::new(0), None);
        assert_eq!(PeelCap::new(3).map(PeelCap::get), Some(3));
        assert_eq!(PeelCap::default().get(), 10);
    }

    #[test]
    fn modes_cycle_through_all_three() {
        let mut mode = RenderMode::AlphaTesting;
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(mode);
            mode = mode.next();
        }
        assert_eq!(seen, RenderMode::ALL);
        assert_eq!(mode, RenderMode::AlphaTesting);
    }

    #[test]
    fn modes_parse_from_names() {
        for mode in RenderMode::ALL {
            assert_eq!(mode.to_string().parse::<RenderMode>(), Ok(mode));
        }
        assert_eq!("depth-peeling".parse(), Ok(RenderMode::DepthPeeling));
        assert_eq!("ALPHA_BLENDING".parse(), Ok(RenderMode::AlphaBlending));
        assert_eq!("test".parse(), Ok(RenderMode::AlphaTesting));
        assert!("sorting".parse::<RenderMode>().is_err());
    }

    #[test]
    fn every_mode_pipeline_is_prebuilt() {
        let keys = pipeline_keys(
            DrawState::default(),
            wgpu::TextureFormat::Bgra8UnormSrgb,
            wgpu::TextureFormat::Rgba16Float,
        );
        for program in Program::ALL {
            assert!(keys.iter().any(|k| k.program == program), "{:?}", program);
        }
        // Depth prime and color pass are distinct pipelines.
        assert_eq!(keys.iter().filter(|k| k.program == Program::AlphaBlend).count(), 2);
    }
}
