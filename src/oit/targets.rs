//! Offscreen render targets for depth peeling.
//!
//! A [`TargetPool`] owns two symmetric color+depth targets used in strict
//! alternation (ping-pong) plus one accumulation color target, all at one
//! fixed extent. A pool is never resized in place; the renderer replaces it
//! when the surface extent changes.
//!
//! ```text
//!   iteration i:   read depth of pair[i % 2]  ──▶  write color+depth of pair[(i + 1) % 2]
//!   accumulation:  own color  +  pair[0].depth  (shared with the seed pass)
//! ```

use std::fmt;

use crate::error::{ErrorScope, RenderError};
use crate::gpu::GpuContext;

/// Color format of the ping-pong layers.
pub const LAYER_COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
/// Depth format of every target.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Why a render target could not be made complete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetStatus {
    /// Width or height is zero.
    ZeroExtent,
    /// An edge exceeds the device's `max_texture_dimension_2d`.
    ExceedsLimit { requested: u32, max: u32 },
    /// The attachment format cannot be rendered to.
    UnrenderableFormat(wgpu::TextureFormat),
    /// The backend rejected the allocation.
    Rejected(String),
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetStatus::ZeroExtent => write!(f, "zero-sized attachment"),
            TargetStatus::ExceedsLimit { requested, max } => {
                write!(f, "attachment edge {} exceeds device limit {}", requested, max)
            }
            TargetStatus::UnrenderableFormat(format) => {
                write!(f, "format {:?} is not renderable", format)
            }
            TargetStatus::Rejected(msg) => write!(f, "backend rejected attachment: {}", msg),
        }
    }
}

/// Checks the extent against the device limit.
pub fn check_extent(width: u32, height: u32, max_dimension: u32) -> Result<(), TargetStatus> {
    if width == 0 || height == 0 {
        return Err(TargetStatus::ZeroExtent);
    }
    let requested = width.max(height);
    if requested > max_dimension {
        return Err(TargetStatus::ExceedsLimit {
            requested,
            max: max_dimension,
        });
    }
    Ok(())
}

/// Checks that `format` can be used as a render attachment on any device
/// with `features`.
pub fn check_renderable(
    format: wgpu::TextureFormat,
    features: wgpu::Features,
) -> Result<(), TargetStatus> {
    let caps = format.guaranteed_format_features(features);
    if caps
        .allowed_usages
        .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
    {
        Ok(())
    } else {
        Err(TargetStatus::UnrenderableFormat(format))
    }
}

/// Accumulation color format: `Rgba32Float` when `rgba32_float` says the
/// device can render and blend into it, `Rgba16Float` otherwise.
pub fn accumulation_format(rgba32_float: wgpu::TextureFormatFeatures) -> wgpu::TextureFormat {
    let usable = rgba32_float
        .allowed_usages
        .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
        && rgba32_float
            .flags
            .contains(wgpu::TextureFormatFeatureFlags::BLENDABLE);
    if usable {
        wgpu::TextureFormat::Rgba32Float
    } else {
        wgpu::TextureFormat::Rgba16Float
    }
}

/// Which ping-pong member an iteration reads depth from and which it writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PingPong {
    pub read: usize,
    pub write: usize,
}

impl PingPong {
    pub fn for_iteration(iteration: u32) -> Self {
        let read = (iteration % 2) as usize;
        Self {
            read,
            write: 1 - read,
        }
    }
}

/// A texture together with its default view.
#[derive(Debug)]
pub struct Attachment {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub format: wgpu::TextureFormat,
}

impl Attachment {
    pub(crate) fn new(
        gpu: &GpuContext,
        label: &str,
        format: wgpu::TextureFormat,
        (w, h): (u32, u32),
    ) -> Self {
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            format,
        }
    }
}

/// One color attachment and one depth attachment of identical size.
#[derive(Debug)]
pub struct RenderTarget {
    pub color: Attachment,
    pub depth: Attachment,
}

/// The accumulation buffer. Its depth attachment is borrowed from the pair.
#[derive(Debug)]
pub struct AccumulationTarget {
    pub color: Attachment,
}

/// All offscreen targets used by one depth-peeling frame.
pub struct TargetPool {
    pair: [RenderTarget; 2],
    accumulation: AccumulationTarget,
    extent: (u32, u32),
}

impl TargetPool {
    /// Allocates the ping-pong pair and the accumulation target at the
    /// context's current size.
    pub fn new(gpu: &GpuContext) -> Result<Self, RenderError> {
        let extent = (gpu.width(), gpu.height());
        let pair = Self::create_target_pair(gpu, extent)?;
        let accumulation = Self::create_accumulation_target(gpu, extent)?;

        log::info!(
            target: "oit",
            "allocated peel targets {}x{} (layer {:?}, accumulation {:?})",
            extent.0,
            extent.1,
            LAYER_COLOR_FORMAT,
            accumulation.color.format
        );

        Ok(Self {
            pair,
            accumulation,
            extent,
        })
    }

    /// Two color+depth targets of identical dimensions.
    pub fn create_target_pair(
        gpu: &GpuContext,
        extent: (u32, u32),
    ) -> Result<[RenderTarget; 2], RenderError> {
        let first = Self::create_target(gpu, "Peel Target 0", extent)?;
        let second = Self::create_target(gpu, "Peel Target 1", extent)?;
        Ok([first, second])
    }

    fn create_target(
        gpu: &GpuContext,
        label: &str,
        extent: (u32, u32),
    ) -> Result<RenderTarget, RenderError> {
        Self::check(gpu, label, extent, &[LAYER_COLOR_FORMAT, DEPTH_FORMAT])?;

        let scope = ErrorScope::push(&gpu.device, label);
        let color = Attachment::new(gpu, &format!("{} Color", label), LAYER_COLOR_FORMAT, extent);
        let depth = Attachment::new(gpu, &format!("{} Depth", label), DEPTH_FORMAT, extent);
        scope.finish().map_err(|msg| RenderError::TargetIncomplete {
            label: label.to_string(),
            status: TargetStatus::Rejected(msg),
        })?;

        Ok(RenderTarget { color, depth })
    }

    /// The accumulation color attachment. Depth comes from `pair[0]`.
    pub fn create_accumulation_target(
        gpu: &GpuContext,
        extent: (u32, u32),
    ) -> Result<AccumulationTarget, RenderError> {
        let label = "Accumulation Target";
        let format = accumulation_format(gpu.rgba32_float_features());
        Self::check(gpu, label, extent, &[format])?;

        let scope = ErrorScope::push(&gpu.device, label);
        let color = Attachment::new(gpu, "Accumulation Color", format, extent);
        scope.finish().map_err(|msg| RenderError::TargetIncomplete {
            label: label.to_string(),
            status: TargetStatus::Rejected(msg),
        })?;

        Ok(AccumulationTarget { color })
    }

    fn check(
        gpu: &GpuContext,
        label: &str,
        (w, h): (u32, u32),
        formats: &[wgpu::TextureFormat],
    ) -> Result<(), RenderError> {
        let incomplete = |status| RenderError::TargetIncomplete {
            label: label.to_string(),
            status,
        };
        check_extent(w, h, gpu.device.limits().max_texture_dimension_2d).map_err(incomplete)?;
        for &format in formats {
            check_renderable(format, gpu.device.features()).map_err(incomplete)?;
        }
        Ok(())
    }

    pub fn target(&self, index: usize) -> &RenderTarget {
        &self.pair[index % 2]
    }

    pub fn accumulation(&self) -> &AccumulationTarget {
        &self.accumulation
    }

    /// Depth attachment the accumulation target shares with the seed pass.
    pub fn accumulation_depth(&self) -> &Attachment {
        &self.pair[0].depth
    }

    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_pong_alternates_by_parity() {
        for i in 0..8 {
            let pp = PingPong::for_iteration(i);
            assert_ne!(pp.read, pp.write);
            assert_eq!(pp.read, (i % 2) as usize);
            assert_eq!(pp.write, ((i + 1) % 2) as usize);
        }
    }

    #[test]
    fn consecutive_iterations_read_what_the_previous_wrote() {
        for i in 0..8 {
            assert_eq!(
                PingPong::for_iteration(i).write,
                PingPong::for_iteration(i + 1).read
            );
        }
    }

    #[test]
    fn first_iteration_reads_seed_depth() {
        // The seed pass writes pair[0].depth through the accumulation target.
        assert_eq!(PingPong::for_iteration(0).read, 0);
    }

    #[test]
    fn extent_checks() {
        assert_eq!(check_extent(0, 10, 8192), Err(TargetStatus::ZeroExtent));
        assert_eq!(
            check_extent(10000, 10, 8192),
            Err(TargetStatus::ExceedsLimit {
                requested: 10000,
                max: 8192
            })
        );
        assert!(check_extent(1280, 720, 8192).is_ok());
    }

    #[test]
    fn peel_formats_are_renderable() {
        assert!(check_renderable(LAYER_COLOR_FORMAT, wgpu::Features::empty()).is_ok());
        assert!(check_renderable(DEPTH_FORMAT, wgpu::Features::empty()).is_ok());
    }

    #[test]
    fn compressed_formats_are_not_renderable() {
        let bc = wgpu::TextureFormat::Bc1RgbaUnorm;
        assert_eq!(
            check_renderable(bc, wgpu::Features::TEXTURE_COMPRESSION_BC),
            Err(TargetStatus::UnrenderableFormat(bc))
        );
    }

    #[test]
    fn guaranteed_rgba32_float_is_never_blendable() {
        let guaranteed = wgpu::TextureFormat::Rgba32Float
            .guaranteed_format_features(wgpu::Features::all());
        assert_eq!(accumulation_format(guaranteed), wgpu::TextureFormat::Rgba16Float);
    }

    #[test]
    fn accumulation_uses_rgba32_float_only_when_blendable() {
        let adapter = |flags| wgpu::TextureFormatFeatures {
            allowed_usages: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            flags,
        };
        assert_eq!(
            accumulation_format(adapter(wgpu::TextureFormatFeatureFlags::BLENDABLE)),
            wgpu::TextureFormat::Rgba32Float
        );
        assert_eq!(
            accumulation_format(adapter(wgpu::TextureFormatFeatureFlags::empty())),
            wgpu::TextureFormat::Rgba16Float
        );

        // Blendable but not renderable cannot be an accumulation target.
        let sample_only = wgpu::TextureFormatFeatures {
            allowed_usages: wgpu::TextureUsages::TEXTURE_BINDING,
            flags: wgpu::TextureFormatFeatureFlags::BLENDABLE,
        };
        assert_eq!(accumulation_format(sample_only), wgpu::TextureFormat::Rgba16Float);
    }
}
