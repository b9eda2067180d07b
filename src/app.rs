//! Windowed demo: one rotating transparent mesh, three selectable modes.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, anyhow};
use glam::{Quat, Vec4};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowAttributes, WindowId};

use crate::camera::Camera;
use crate::config::{AppConfig, BACKGROUND_PRESETS};
use crate::geometry::RawGeometry;
use crate::gpu::GpuContext;
use crate::input::{Command, Input};
use crate::material::{DirectionalLight, Material};
use crate::mesh::{Mesh, Transform};
use crate::oit::{FrameParams, RenderMode, TransparencyRenderer};
use crate::texture::Texture;

/// Radians per second about +Y.
const SPIN_RATE: f32 = 0.1;
const KNOT_SCALE: f32 = 0.8;

/// The runtime-tunable parameters: mode, material and background.
#[derive(Clone, Debug, PartialEq)]
pub struct Controls {
    pub mode: RenderMode,
    pub material: Material,
    pub background: Vec4,
    background_index: Option<usize>,
}

/// What the application loop must do after a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    None,
    Capture,
    Quit,
}

impl Controls {
    pub fn new(config: &AppConfig) -> Self {
        let material = Material {
            transparent: config.transparency.clamp(0.0, 1.0),
            ..Material::default()
        };
        Self {
            mode: config.mode,
            material,
            background: config.background,
            background_index: BACKGROUND_PRESETS
                .iter()
                .position(|&c| c == config.background),
        }
    }

    pub fn apply(&mut self, command: Command, escape_closes: bool) -> Action {
        match command {
            Command::SelectMode(mode) => self.set_mode(mode),
            Command::CycleMode => self.set_mode(self.mode.next()),
            Command::AdjustTransparency(delta) => {
                let t = &mut self.material.transparent;
                *t = (*t + delta).clamp(0.0, 1.0);
                log::debug!(target: "oit", "transparency {:.2}", t);
            }
            Command::CycleBackground => {
                let next = self.background_index.map_or(0, |i| (i + 1) % BACKGROUND_PRESETS.len());
                self.background_index = Some(next);
                self.background = BACKGROUND_PRESETS[next];
                log::debug!(target: "oit", "background {:?}", self.background);
            }
            Command::Capture => return Action::Capture,
            Command::Quit if escape_closes => return Action::Quit,
            Command::Quit => {}
        }
        Action::None
    }

    fn set_mode(&mut self, mode: RenderMode) {
        if mode != self.mode {
            log::debug!(target: "oit", "render mode {} -> {}", self.mode, mode);
            self.mode = mode;
        }
    }
}

/// Frames per second, refreshed once a second.
struct FpsCounter {
    frames: u32,
    since: Instant,
}

impl FpsCounter {
    fn new(now: Instant) -> Self {
        Self { frames: 0, since: now }
    }

    fn tick(&mut self, now: Instant) -> Option<f32> {
        self.frames += 1;
        let elapsed = now.duration_since(self.since).as_secs_f32();
        if elapsed < 1.0 {
            return None;
        }
        let fps = self.frames as f32 / elapsed;
        self.frames = 0;
        self.since = now;
        Some(fps)
    }
}

/// The mesh to render: the configured STL file, or the default torus knot.
pub fn load_geometry(config: &AppConfig) -> anyhow::Result<RawGeometry> {
    match &config.mesh {
        Some(path) => {
            let mut geometry = RawGeometry::from_file(path)
                .with_context(|| format!("failed to load mesh {}", path.display()))?;
            geometry.recenter();
            geometry.normalize();
            geometry.recalculate_normals();
            log::info!(
                target: "oit",
                "loaded {} ({} triangles)",
                path.display(),
                geometry.triangle_count()
            );
            Ok(geometry)
        }
        None => Ok(RawGeometry::torus_knot(2.0, 0.5, 2, 3, 256, 32)),
    }
}

fn load_mask(gpu: &GpuContext, config: &AppConfig) -> anyhow::Result<Texture> {
    let mask = match &config.mask {
        Some(path) => Texture::from_file(gpu, path)
            .with_context(|| format!("failed to load mask {}", path.display()))?,
        None => Texture::stripe_mask(gpu, 256, 16),
    };
    log::info!(target: "oit", "alpha mask {}x{}", mask.width, mask.height);
    Ok(mask)
}

struct Running {
    window: Arc<Window>,
    gpu: GpuContext,
    renderer: TransparencyRenderer,
    mesh: Mesh,
    transform: Transform,
    camera: Camera,
    light: DirectionalLight,
    controls: Controls,
    input: Input,
    fps: FpsCounter,
    last_frame: Instant,
    captures: u32,
    config: AppConfig,
}

impl Running {
    fn start(event_loop: &ActiveEventLoop, config: AppConfig) -> anyhow::Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(&config.title)
            .with_inner_size(winit::dpi::LogicalSize::new(config.width, config.height))
            .with_resizable(false);
        let window = Arc::new(
            event_loop
                .create_window(attrs)
                .context("failed to create window")?,
        );

        let gpu = GpuContext::new(window.clone(), config.vsync)?;
        let mask = load_mask(&gpu, &config)?;
        let renderer =
            TransparencyRenderer::new(&gpu, &mask, config.peel_cap, config.alpha_threshold)?;
        let mesh = Mesh::from_raw(&gpu, &load_geometry(&config)?);

        let now = Instant::now();
        Ok(Self {
            window,
            renderer,
            mesh,
            transform: Transform::new().uniform_scale(KNOT_SCALE),
            camera: Camera::new().with_aspect(gpu.aspect()),
            light: DirectionalLight::default(),
            controls: Controls::new(&config),
            input: Input::new(),
            fps: FpsCounter::new(now),
            last_frame: now,
            captures: 0,
            gpu,
            config,
        })
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        for command in self.input.commands() {
            match self.controls.apply(command, self.config.escape_closes) {
                Action::None => {}
                Action::Quit => {
                    event_loop.exit();
                    return Ok(());
                }
                Action::Capture => self.capture(),
            }
        }
        self.input.begin_frame();

        self.transform.rotate(Quat::from_rotation_y(SPIN_RATE * dt));
        self.camera.aspect = self.gpu.aspect();

        if let Some(fps) = self.fps.tick(now) {
            self.window.set_title(&format!(
                "{} | {:.0} fps | {} | transparency {:.2}",
                self.config.title, fps, self.controls.mode, self.controls.material.transparent
            ));
        }

        let Some(surface) = &self.gpu.surface else {
            return Err(anyhow!("window context has no surface"));
        };
        let frame = match surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::warn!(target: "oit", "surface lost, reconfiguring");
                self.gpu.reconfigure();
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!(target: "oit", "surface acquire timed out");
                return Ok(());
            }
            Err(e) => return Err(anyhow!("failed to acquire surface texture: {}", e)),
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        self.renderer.render(
            &self.gpu,
            &view,
            &FrameParams {
                mode: self.controls.mode,
                mesh: &self.mesh,
                transform: &self.transform,
                camera: &self.camera,
                light: &self.light,
                material: &self.controls.material,
                background: self.controls.background,
            },
        )?;

        frame.present();
        Ok(())
    }

    /// Failures are logged; a failed capture never stops the demo.
    fn capture(&mut self) {
        let dir = self
            .config
            .capture_dir
            .join(format!("frame_{:04}", self.captures));
        self.captures += 1;
        if let Err(e) = self.renderer.capture(&self.gpu, &dir) {
            log::error!(target: "oit", "{}", e);
        }
    }
}

enum AppState {
    Pending(AppConfig),
    Running(Box<Running>),
    Exited,
}

struct App {
    state: AppState,
    error: Option<anyhow::Error>,
}

impl App {
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!(target: "oit", "{:#}", error);
        self.error = Some(error);
        self.state = AppState::Exited;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if !matches!(self.state, AppState::Pending(_)) {
            return;
        }
        let AppState::Pending(config) = std::mem::replace(&mut self.state, AppState::Exited) else {
            return;
        };
        match Running::start(event_loop, config) {
            Ok(running) => {
                running.window.request_redraw();
                self.state = AppState::Running(Box::new(running));
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let AppState::Running(running) = &mut self.state else {
            return;
        };

        running.input.handle_event(&event);

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => running.gpu.resize(size.width, size.height),
            WindowEvent::RedrawRequested => match running.redraw(event_loop) {
                Ok(()) => running.window.request_redraw(),
                Err(e) => self.fail(event_loop, e),
            },
            _ => {}
        }
    }
}

/// Opens the window and runs until it is closed.
///
/// Initialization failures (no adapter, incomplete targets, shader link
/// errors, unreadable assets) end the loop and are returned.
pub fn run(config: AppConfig) -> anyhow::Result<()> {
    let event_loop = EventLoop::new().context("failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App {
        state: AppState::Pending(config),
        error: None,
    };
    event_loop.run_app(&mut app).context("event loop failed")?;

    match app.error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::TRANSPARENCY_STEP;
    use std::time::Duration;

    #[test]
    fn transparency_steps_are_clamped() {
        let mut controls = Controls::new(&AppConfig::new().transparency(0.98));
        controls.apply(Command::AdjustTransparency(TRANSPARENCY_STEP), true);
        assert_eq!(controls.material.transparent, 1.0);

        let mut controls = Controls::new(&AppConfig::new().transparency(0.02));
        controls.apply(Command::AdjustTransparency(-TRANSPARENCY_STEP), true);
        assert_eq!(controls.material.transparent, 0.0);
    }

    #[test]
    fn mode_commands() {
        let mut controls = Controls::new(&AppConfig::new().mode(RenderMode::AlphaTesting));
        controls.apply(Command::CycleMode, true);
        assert_eq!(controls.mode, RenderMode::AlphaBlending);
        controls.apply(Command::SelectMode(RenderMode::DepthPeeling), true);
        assert_eq!(controls.mode, RenderMode::DepthPeeling);
    }

    #[test]
    fn background_cycles_through_presets() {
        let mut controls = Controls::new(&AppConfig::new());
        for expected in BACKGROUND_PRESETS.iter().skip(1).chain(&BACKGROUND_PRESETS[..1]) {
            controls.apply(Command::CycleBackground, true);
            assert_eq!(controls.background, *expected);
        }
    }

    #[test]
    fn custom_background_cycles_from_first_preset() {
        let custom = Vec4::new(0.5, 0.0, 0.5, 1.0);
        let mut controls = Controls::new(&AppConfig::new().background(custom));
        controls.apply(Command::CycleBackground, true);
        assert_eq!(controls.background, BACKGROUND_PRESETS[0]);
    }

    #[test]
    fn escape_respects_config() {
        let mut controls = Controls::new(&AppConfig::new());
        assert_eq!(controls.apply(Command::Quit, true), Action::Quit);
        assert_eq!(controls.apply(Command::Quit, false), Action::None);
        assert_eq!(controls.apply(Command::Capture, false), Action::Capture);
    }

    #[test]
    fn fps_reports_once_per_second() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(start);
        for i in 1..60 {
            assert_eq!(fps.tick(start + Duration::from_millis(i * 10)), None);
        }
        let reported = fps.tick(start + Duration::from_secs(1)).unwrap();
        assert!((reported - 60.0).abs() < 1e-3);
    }

    #[test]
    fn default_geometry_is_the_knot() {
        let geometry = load_geometry(&AppConfig::new()).unwrap();
        assert_eq!(geometry.triangle_count(), 256 * 32 * 2);
    }

    #[test]
    fn missing_mesh_file_is_an_error() {
        let config = AppConfig::new().mesh("does/not/exist.stl");
        let err = load_geometry(&config).unwrap_err();
        assert!(format!("{:#}", err).contains("exist.stl"));
    }
}
