//! PNG dumps of the offscreen targets, for inspecting individual layers.
//!
//! Writes `color_accumulation.png`, `color_layer_{0,1}.png` and
//! `depth_layer_{0,1}.png`. Float colors are clamped to `[0, 1]`; depth is
//! written as 8-bit grey (`depth * 255`).

use std::path::Path;
use std::sync::mpsc::channel;

use super::targets::{Attachment, TargetPool};
use crate::error::RenderError;
use crate::gpu::GpuContext;

/// Reads back every target in `pool` and writes it to `dir`.
pub fn capture_targets(gpu: &GpuContext, pool: &TargetPool, dir: &Path) -> Result<(), RenderError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| RenderError::Capture(format!("{}: {}", dir.display(), e)))?;

    let (width, height) = pool.extent();
    save_color(gpu, &pool.accumulation().color, &dir.join("color_accumulation.png"))?;
    for i in 0..2 {
        let target = pool.target(i);
        save_color(gpu, &target.color, &dir.join(format!("color_layer_{}.png", i)))?;

        let depth = read_texture(
            gpu,
            &target.depth.texture,
            target.depth.format,
            wgpu::TextureAspect::DepthOnly,
        )?;
        let grey = depth_to_grey(&depth);
        image::GrayImage::from_raw(width, height, grey)
            .ok_or_else(|| size_mismatch(target.depth.format))?
            .save(dir.join(format!("depth_layer_{}.png", i)))?;
    }

    log::info!(target: "oit", "captured peel targets to {}", dir.display());
    Ok(())
}

fn save_color(gpu: &GpuContext, attachment: &Attachment, path: &Path) -> Result<(), RenderError> {
    read_color(gpu, &attachment.texture)?.save(path)?;
    Ok(())
}

/// Reads a color texture back as RGBA8.
///
/// Float channels are clamped to `[0, 1]`. sRGB formats keep their encoded
/// bytes. The texture needs `COPY_SRC` usage.
pub fn read_color(gpu: &GpuContext, texture: &wgpu::Texture) -> Result<image::RgbaImage, RenderError> {
    let format = texture.format();
    let raw = read_texture(gpu, texture, format, wgpu::TextureAspect::All)?;
    let rgba = color_to_rgba8(&raw, format)
        .ok_or_else(|| RenderError::Capture(format!("cannot convert {:?} to RGBA8", format)))?;
    let size = texture.size();
    image::RgbaImage::from_raw(size.width, size.height, rgba).ok_or_else(|| size_mismatch(format))
}

fn size_mismatch(format: wgpu::TextureFormat) -> RenderError {
    RenderError::Capture(format!("readback of {:?} does not match its extent", format))
}

/// Copies one aspect of `texture` into tightly packed rows.
fn read_texture(
    gpu: &GpuContext,
    texture: &wgpu::Texture,
    format: wgpu::TextureFormat,
    aspect: wgpu::TextureAspect,
) -> Result<Vec<u8>, RenderError> {
    let size = texture.size();
    let bytes_per_pixel = format
        .block_copy_size(Some(aspect))
        .ok_or_else(|| RenderError::Capture(format!("{:?} is not copyable", format)))?;
    let row_bytes = size.width * bytes_per_pixel;
    let padded_row = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
        * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

    let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Capture Readback"),
        size: u64::from(padded_row) * u64::from(size.height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Capture Encoder"),
        });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_row),
                rows_per_image: Some(size.height),
            },
        },
        wgpu::Extent3d {
            depth_or_array_layers: 1,
            ..size
        },
    );
    gpu.queue.submit(Some(encoder.finish()));

    let slice = buffer.slice(..);
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

    let data = {
        let mapped = slice.get_mapped_range();
        unpad_rows(&mapped, row_bytes as usize, padded_row as usize, size.height as usize)
    };
    buffer.unmap();
    Ok(data)
}

fn unpad_rows(padded: &[u8], row_bytes: usize, padded_row: usize, rows: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(row_bytes * rows);
    for row in padded.chunks(padded_row).take(rows) {
        data.extend_from_slice(&row[..row_bytes]);
    }
    data
}

/// Converts packed texels of a color format to RGBA8. `None` for formats
/// the targets never use.
fn color_to_rgba8(raw: &[u8], format: wgpu::TextureFormat) -> Option<Vec<u8>> {
    use wgpu::TextureFormat as F;
    match format {
        F::Rgba32Float => Some(
            raw.chunks_exact(4)
                .map(|c| unorm8(bytemuck::pod_read_unaligned::<f32>(c)))
                .collect(),
        ),
        F::Rgba16Float => Some(
            raw.chunks_exact(2)
                .map(|c| unorm8(f16_to_f32(bytemuck::pod_read_unaligned::<u16>(c))))
                .collect(),
        ),
        F::Rgba8Unorm | F::Rgba8UnormSrgb => Some(raw.to_vec()),
        F::Bgra8Unorm | F::Bgra8UnormSrgb => Some(
            raw.chunks_exact(4)
                .flat_map(|c| [c[2], c[1], c[0], c[3]])
                .collect(),
        ),
        _ => None,
    }
}

fn depth_to_grey(raw: &[u8]) -> Vec<u8> {
    raw.chunks_exact(4)
        .map(|c| unorm8(bytemuck::pod_read_unaligned::<f32>(c)))
        .collect()
}

fn unorm8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// IEEE 754 binary16 to f32.
fn f16_to_f32(bits: u16) -> f32 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = i32::from((bits >> 10) & 0x1f);
    let mantissa = f32::from(bits & 0x3ff);
    match exponent {
        0 => sign * mantissa * 2f32.powi(-24),
        0x1f if mantissa == 0.0 => sign * f32::INFINITY,
        0x1f => f32::NAN,
        _ => sign * (1.0 + mantissa / 1024.0) * 2f32.powi(exponent - 15),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_floats_decode() {
        assert_eq!(f16_to_f32(0x3c00), 1.0);
        assert_eq!(f16_to_f32(0x3800), 0.5);
        assert_eq!(f16_to_f32(0xc000), -2.0);
        assert_eq!(f16_to_f32(0x0000), 0.0);
        assert_eq!(f16_to_f32(0x0001), 2f32.powi(-24));
        assert_eq!(f16_to_f32(0x7c00), f32::INFINITY);
        assert!(f16_to_f32(0x7e00).is_nan());
    }

    #[test]
    fn float_colors_are_clamped() {
        let raw: Vec<u8> = [-1.0f32, 0.5, 2.0, 1.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        assert_eq!(
            color_to_rgba8(&raw, wgpu::TextureFormat::Rgba32Float),
            Some(vec![0, 128, 255, 255])
        );
    }

    #[test]
    fn bgra_is_swizzled() {
        let raw = [1, 2, 3, 4];
        assert_eq!(
            color_to_rgba8(&raw, wgpu::TextureFormat::Bgra8UnormSrgb),
            Some(vec![3, 2, 1, 4])
        );
    }

    #[test]
    fn depth_maps_to_grey() {
        let raw: Vec<u8> = [0.0f32, 1.0, 0.5].iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(depth_to_grey(&raw), vec![0, 255, 128]);
    }

    #[test]
    fn padding_is_stripped_per_row() {
        let padded = [1, 2, 0, 0, 3, 4, 0, 0];
        assert_eq!(unpad_rows(&padded, 2, 4, 2), vec![1, 2, 3, 4]);
    }
}
