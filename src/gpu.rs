//! Core GPU context and device management.
//!
//! This module provides [`GpuContext`], the struct that holds the wgpu device, queue and
//! (optionally) the window surface. It is passed by reference to every pass in the renderer.
//!
//! # Initialization
//!
//! [`GpuContext::new`] creates a context presenting to a winit window. [`GpuContext::headless`]
//! creates one without a surface, used for offscreen rendering and tests; its
//! `config` still records the color format and extent the renderer should target.
//!
//! Both constructors enable `TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES` when the adapter
//! offers it and record the `Rgba32Float` capabilities the device ends up with, so the
//! depth-peeling accumulation buffer can stay at full 32-bit float precision where the
//! hardware can blend into it.

use std::sync::Arc;
use winit::window::Window;

use crate::error::RenderError;

/// Core GPU context holding wgpu resources.
///
/// All fields are public to allow direct access to wgpu APIs when needed.
pub struct GpuContext {
    /// The surface for presenting rendered frames, `None` when headless.
    pub surface: Option<wgpu::Surface<'static>>,
    /// The logical GPU device for creating resources and pipelines.
    pub device: wgpu::Device,
    /// The command queue for submitting work to the GPU.
    pub queue: wgpu::Queue,
    /// Current target configuration (format, size, present mode).
    pub config: wgpu::SurfaceConfiguration,
    rgba32_float: wgpu::TextureFormatFeatures,
}

impl GpuContext {
    /// Create a new GPU context presenting to a winit window.
    ///
    /// Picks an sRGB surface format and Fifo (vsync) or Immediate present mode.
    pub fn new(window: Arc<Window>, vsync: bool) -> Result<Self, RenderError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .map_err(|e| RenderError::Surface(e.to_string()))?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(|e| RenderError::Adapter(e.to_string()))?;

        let (device, queue, rgba32_float) = Self::request_device(&adapter)?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| RenderError::Surface("surface reports no formats".to_string()))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: if vsync {
                wgpu::PresentMode::Fifo
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        log::info!(
            target: "oit",
            "using adapter '{}' ({:?}), surface {:?} {}x{}",
            adapter.get_info().name,
            adapter.get_info().backend,
            surface_format,
            config.width,
            config.height
        );

        Ok(Self {
            surface: Some(surface),
            device,
            queue,
            config,
            rgba32_float,
        })
    }

    /// Create a GPU context with no surface, rendering into `width` x `height`
    /// offscreen targets of an sRGB RGBA format.
    pub fn headless(width: u32, height: u32) -> Result<Self, RenderError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| RenderError::Adapter(e.to_string()))?;

        let (device, queue, rgba32_float) = Self::request_device(&adapter)?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        log::info!(
            target: "oit",
            "using headless adapter '{}' ({:?})",
            adapter.get_info().name,
            adapter.get_info().backend
        );

        Ok(Self {
            surface: None,
            device,
            queue,
            config,
            rgba32_float,
        })
    }

    /// Creates the device and reports what it can do with `Rgba32Float`.
    ///
    /// Without adapter-specific format features only the guaranteed set may be
    /// used, and that never includes blending into 32-bit float.
    fn request_device(
        adapter: &wgpu::Adapter,
    ) -> Result<(wgpu::Device, wgpu::Queue, wgpu::TextureFormatFeatures), RenderError> {
        let optional = wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES;
        let required_features = adapter.features() & optional;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Peelite Device"),
            required_features,
            required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
            memory_hints: Default::default(),
            trace: Default::default(),
        }))
        .map_err(|e| RenderError::Device(e.to_string()))?;

        let format = wgpu::TextureFormat::Rgba32Float;
        let rgba32_float = if required_features.contains(optional) {
            adapter.get_texture_format_features(format)
        } else {
            format.guaranteed_format_features(device.features())
        };

        Ok((device, queue, rgba32_float))
    }

    /// Resize the surface to new dimensions.
    ///
    /// Ignores zero-sized dimensions (window minimize). The transparency
    /// renderer reallocates its offscreen targets on the next frame it draws.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            if let Some(surface) = &self.surface {
                surface.configure(&self.device, &self.config);
            }
        }
    }

    /// Reconfigures the surface after it was lost or became outdated.
    pub fn reconfigure(&self) {
        if let Some(surface) = &self.surface {
            surface.configure(&self.device, &self.config);
        }
    }

    /// Returns the current surface width in pixels.
    pub fn width(&self) -> u32 {
        self.config.width
    }

    /// Returns the current surface height in pixels.
    pub fn height(&self) -> u32 {
        self.config.height
    }

    /// Returns the current aspect ratio (width / height).
    pub fn aspect(&self) -> f32 {
        self.config.width as f32 / self.config.height as f32
    }

    /// What this device supports for `Rgba32Float` textures.
    pub fn rgba32_float_features(&self) -> wgpu::TextureFormatFeatures {
        self.rgba32_float
    }
}
