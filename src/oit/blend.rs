//! Blend equations used by the transparency passes.
//!
//! The constants here are the exact [`wgpu::BlendState`] values handed to the
//! pipelines. [`evaluate`] interprets any blend state on the CPU, so the math
//! the fixed-function blender performs can be checked without a GPU.
//!
//! Depth peeling keeps the accumulation buffer in a front-to-back form:
//! `rgb` holds premultiplied color composited so far, `a` holds the remaining
//! transmittance. Each new (farther) layer goes *under* what is already there.

use glam::{Vec3, Vec4};

/// Under-blend for compositing a peeled layer beneath the accumulation buffer.
///
/// `dst.rgb = dst.a * src.rgb + dst.rgb` and `dst.a = (1 - src.a) * dst.a`,
/// with `src` a premultiplied layer color.
pub const UNDER: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::DstAlpha,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::Zero,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
};

/// Standard source-over blending used by the alpha-blending mode's color pass.
pub const SOURCE_OVER: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::SrcAlpha,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::SrcAlpha,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
};

/// Applies `state` to a source and destination color, as the blender would.
///
/// Constant factors read `constant`. Dual-source factors are not used by any
/// pass here and evaluate to zero.
pub fn evaluate(state: &wgpu::BlendState, src: Vec4, dst: Vec4, constant: Vec4) -> Vec4 {
    let rgb = component(&state.color, src, dst, constant, |v| v.truncate());
    let a = component(&state.alpha, src, dst, constant, |v| Vec3::splat(v.w)).x;
    rgb.extend(a)
}

fn component(
    c: &wgpu::BlendComponent,
    src: Vec4,
    dst: Vec4,
    constant: Vec4,
    pick: impl Fn(Vec4) -> Vec3,
) -> Vec3 {
    let s = pick(src);
    let d = pick(dst);
    let sf = factor(c.src_factor, src, dst, constant, &pick);
    let df = factor(c.dst_factor, src, dst, constant, &pick);
    match c.operation {
        wgpu::BlendOperation::Add => s * sf + d * df,
        wgpu::BlendOperation::Subtract => s * sf - d * df,
        wgpu::BlendOperation::ReverseSubtract => d * df - s * sf,
        wgpu::BlendOperation::Min => s.min(d),
        wgpu::BlendOperation::Max => s.max(d),
    }
}

fn factor(
    f: wgpu::BlendFactor,
    src: Vec4,
    dst: Vec4,
    constant: Vec4,
    pick: &impl Fn(Vec4) -> Vec3,
) -> Vec3 {
    use wgpu::BlendFactor as F;
    match f {
        F::Zero => Vec3::ZERO,
        F::One => Vec3::ONE,
        F::Src => pick(src),
        F::OneMinusSrc => Vec3::ONE - pick(src),
        F::SrcAlpha => Vec3::splat(src.w),
        F::OneMinusSrcAlpha => Vec3::splat(1.0 - src.w),
        F::Dst => pick(dst),
        F::OneMinusDst => Vec3::ONE - pick(dst),
        F::DstAlpha => Vec3::splat(dst.w),
        F::OneMinusDstAlpha => Vec3::splat(1.0 - dst.w),
        F::SrcAlphaSaturated => Vec3::splat(src.w.min(1.0 - dst.w)),
        F::Constant => pick(constant),
        F::OneMinusConstant => Vec3::ONE - pick(constant),
        F::Src1 | F::OneMinusSrc1 | F::Src1Alpha | F::OneMinusSrc1Alpha => Vec3::ZERO,
    }
}

/// Color the seed pass writes for the nearest surface: premultiplied color and
/// the transmittance left behind it. Mirrors `oit_init.wgsl`.
pub fn seed(color: Vec3, alpha: f32) -> Vec4 {
    (color * alpha).extend(1.0 - alpha)
}

/// Color a peel pass writes for one layer: premultiplied color and its alpha.
/// Mirrors `oit_peel.wgsl`.
pub fn peeled(color: Vec3, alpha: f32) -> Vec4 {
    (color * alpha).extend(alpha)
}

/// Final composite of the accumulation buffer over an opaque background.
/// Mirrors `oit_final.wgsl`.
pub fn resolve(accumulation: Vec4, background: Vec3) -> Vec3 {
    accumulation.truncate() + accumulation.w * background
}

/// Accumulated coverage (`1 - transmittance`) of an accumulation texel.
pub fn coverage(accumulation: Vec4) -> f32 {
    1.0 - accumulation.w
}
