use std::path::Path;

use crate::gpu::GpuContext;

/// A sampled GPU texture. Used as the cutout mask in alpha-testing mode.
#[derive(Debug)]
pub struct Texture {
    pub(crate) view: wgpu::TextureView,
    pub(crate) sampler: wgpu::Sampler,
    pub width: u32,
    pub height: u32,
}

impl Texture {
    /// Create a texture from raw RGBA8 data.
    ///
    /// The data is stored as linear `Rgba8Unorm` since the mask's alpha channel
    /// is compared against a threshold, not displayed.
    pub fn from_rgba(gpu: &GpuContext, data: &[u8], width: u32, height: u32, label: &str) -> Self {
        use wgpu::util::DeviceExt;

        let texture = gpu.device.create_texture_with_data(
            &gpu.queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            data,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&format!("{} Sampler", label)),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            view,
            sampler,
            width,
            height,
        }
    }

    /// Load a texture from an image file.
    pub fn from_file(gpu: &GpuContext, path: impl AsRef<Path>) -> Result<Self, image::ImageError> {
        let path = path.as_ref();
        let img = image::open(path)?.to_rgba8();
        let (width, height) = img.dimensions();
        Ok(Self::from_rgba(gpu, &img, width, height, &path.display().to_string()))
    }

    /// Procedural cutout mask: opaque white stripes separated by fully transparent gaps.
    pub fn stripe_mask(gpu: &GpuContext, size: u32, stripes: u32) -> Self {
        let data = stripe_mask_pixels(size, stripes);
        Self::from_rgba(gpu, &data, size, size, "Stripe Mask")
    }
}

/// RGBA8 pixels of a `size`×`size` mask with `stripes` diagonal bands.
///
/// Each band is half opaque (alpha 255) and half transparent (alpha 0).
pub(crate) fn stripe_mask_pixels(size: u32, stripes: u32) -> Vec<u8> {
    let size = size.max(1);
    let period = (size / stripes.max(1)).max(2);
    let mut data = Vec::with_capacity((size * size * 4) as usize);

    for y in 0..size {
        for x in 0..size {
            let opaque = (x + y) % period < period / 2;
            let alpha = if opaque { 255 } else { 0 };
            data.extend_from_slice(&[255, 255, 255, alpha]);
        }
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stripe_mask_is_half_opaque() {
        let data = stripe_mask_pixels(64, 8);
        assert_eq!(data.len(), 64 * 64 * 4);

        let opaque = data.chunks_exact(4).filter(|px| px[3] == 255).count();
        let clear = data.chunks_exact(4).filter(|px| px[3] == 0).count();
        assert_eq!(opaque + clear, 64 * 64);
        assert_eq!(opaque, clear);
    }

    #[test]
    fn stripe_mask_survives_degenerate_arguments() {
        assert_eq!(stripe_mask_pixels(0, 0).len(), 4);
        assert_eq!(stripe_mask_pixels(3, 100).len(), 3 * 3 * 4);
    }
}
