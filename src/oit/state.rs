//! Fixed-function draw state and its scoped modification.
//!
//! wgpu bakes depth and blend configuration into immutable pipelines. The
//! renderer keeps a current [`DrawState`] and looks pipelines up by it, so
//! changing the state is what selects a different pipeline for the next draw.
//!
//! Any pass that changes the state does so through a [`StateGuard`], which puts
//! the previous state back when it goes out of scope, on every exit path.

use std::ops::{Deref, DerefMut};

use super::blend;

/// Depth, blend, and color-write configuration for a mesh draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DrawState {
    pub depth_write: bool,
    pub depth_compare: wgpu::CompareFunction,
    /// `None` means blending is disabled.
    pub blend: Option<wgpu::BlendState>,
    pub color_writes: wgpu::ColorWrites,
}

impl Default for DrawState {
    /// Depth writes on, `Less`, blending off, all color channels written.
    fn default() -> Self {
        Self {
            depth_write: true,
            depth_compare: wgpu::CompareFunction::Less,
            blend: None,
            color_writes: wgpu::ColorWrites::ALL,
        }
    }
}

impl DrawState {
    /// Whether a fragment at `depth` passes against the stored depth.
    pub fn depth_passes(&self, depth: f32, stored: f32) -> bool {
        use wgpu::CompareFunction as C;
        match self.depth_compare {
            C::Never => false,
            C::Less => depth < stored,
            C::Equal => depth == stored,
            C::LessEqual => depth <= stored,
            C::Greater => depth > stored,
            C::NotEqual => depth != stored,
            C::GreaterEqual => depth >= stored,
            C::Always => true,
        }
    }

    pub fn blending_enabled(&self) -> bool {
        self.blend.is_some()
    }
}

/// Scoped modification of a [`DrawState`].
///
/// Derefs to the guarded state so a pass can change it freely; the snapshot
/// taken at [`StateGuard::acquire`] is written back on drop.
pub struct StateGuard<'a> {
    state: &'a mut DrawState,
    saved: DrawState,
}

impl<'a> StateGuard<'a> {
    pub fn acquire(state: &'a mut DrawState) -> Self {
        let saved = *state;
        Self { state, saved }
    }

    /// The state that will be restored.
    pub fn saved(&self) -> DrawState {
        self.saved
    }
}

impl Deref for StateGuard<'_> {
    type Target = DrawState;

    fn deref(&self) -> &DrawState {
        self.state
    }
}

impl DerefMut for StateGuard<'_> {
    fn deref_mut(&mut self) -> &mut DrawState {
        self.state
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        *self.state = self.saved;
    }
}

/// Runs the alpha-blending mode's two passes against `state`.
///
/// Pass 1 writes depth only (color masked off) so the mesh occludes itself.
/// Pass 2 writes color only with source-over blending, depth writes off and
/// `LessEqual` so fragments coincident with pass 1's depth still pass.
/// `draw` is invoked once per pass with the state that pass must use.
///
/// The state seen by the caller afterwards is the state it passed in, whether
/// the passes succeed or `draw` fails.
pub fn two_pass_blend<E>(
    state: &mut DrawState,
    mut draw: impl FnMut(&DrawState) -> Result<(), E>,
) -> Result<(), E> {
    let mut guard = StateGuard::acquire(state);

    guard.depth_write = true;
    guard.color_writes = wgpu::ColorWrites::empty();
    draw(&guard)?;

    guard.depth_write = false;
    guard.depth_compare = wgpu::CompareFunction::LessEqual;
    guard.color_writes = wgpu::ColorWrites::ALL;
    guard.blend = Some(blend::SOURCE_OVER);
    draw(&guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn guard_restores_on_scope_exit() {
        let mut state = DrawState::default();
        let before = state;
        {
            let mut guard = StateGuard::acquire(&mut state);
            guard.depth_write = false;
            guard.depth_compare = wgpu::CompareFunction::Always;
            guard.blend = Some(blend::UNDER);
            assert!(guard.blending_enabled());
            assert_eq!(guard.saved(), before);
        }
        assert_eq!(state, before);
    }

    #[test]
    fn two_pass_blend_sequences_depth_then_color() {
        let mut state = DrawState::default();
        let mut passes = Vec::new();
        two_pass_blend::<()>(&mut state, |s| {
            passes.push(*s);
            Ok(())
        })
        .unwrap();

        assert_eq!(passes.len(), 2);
        assert!(passes[0].depth_write);
        assert!(passes[0].color_writes.is_empty());
        assert!(!passes[0].blending_enabled());

        assert!(!passes[1].depth_write);
        assert_eq!(passes[1].depth_compare, wgpu::CompareFunction::LessEqual);
        assert_eq!(passes[1].color_writes, wgpu::ColorWrites::ALL);
        assert_eq!(passes[1].blend, Some(blend::SOURCE_OVER));
    }

    #[test]
    fn state_after_alpha_blend_frame_equals_state_before() {
        let mut state = DrawState::default();
        let snapshot = state;
        two_pass_blend::<()>(&mut state, |_| Ok(())).unwrap();

        assert_eq!(state, snapshot);
        assert!(state.depth_write);
        assert_eq!(state.depth_compare, wgpu::CompareFunction::Less);
        assert!(!state.blending_enabled());
    }

    #[test]
    fn state_is_restored_when_a_pass_fails() {
        let mut state = DrawState::default();
        let snapshot = state;
        let mut calls = 0;
        let result = two_pass_blend(&mut state, |s| {
            calls += 1;
            if s.blending_enabled() { Err("draw failed") } else { Ok(()) }
        });

        assert_eq!(result, Err("draw failed"));
        assert_eq!(calls, 2);
        assert_eq!(state, snapshot);
    }

    /// Software depth buffer + blender over one pixel, driven by the real pass states.
    fn draw_pixel(state: &DrawState, depth: f32, color: Vec4, zbuf: &mut f32, fb: &mut Vec4) {
        if !state.depth_passes(depth, *zbuf) {
            return;
        }
        if state.depth_write {
            *zbuf = depth;
        }
        if !state.color_writes.is_empty() {
            *fb = match state.blend {
                Some(b) => blend::evaluate(&b, color, *fb, Vec4::ZERO),
                None => color,
            };
        }
    }

    #[test]
    fn self_occluding_quad_matches_single_layer_blend() {
        let mut state = DrawState::default();
        let quad_color = Vec4::new(1.0, 0.6, 0.2, 0.5); // transparency 0.5
        let quad_depth = 0.4;
        let mut zbuf = 1.0;
        let mut fb = Vec4::new(0.0, 0.0, 0.0, 1.0); // black background

        two_pass_blend::<()>(&mut state, |s| {
            draw_pixel(s, quad_depth, quad_color, &mut zbuf, &mut fb);
            Ok(())
        })
        .unwrap();

        // One source-over of the quad onto black: rgb * a.
        let expected = quad_color.truncate() * 0.5;
        assert!(fb.truncate().abs_diff_eq(expected, 1e-6));
        assert_eq!(zbuf, quad_depth);
    }

    #[test]
    fn depth_prime_hides_back_surface_in_color_pass() {
        let mut state = DrawState::default();
        let front = (0.3, Vec4::new(1.0, 0.0, 0.0, 0.5));
        let back = (0.6, Vec4::new(0.0, 0.0, 1.0, 0.5));
        let mut zbuf = 1.0;
        let mut fb = Vec4::new(0.0, 0.0, 0.0, 1.0);

        two_pass_blend::<()>(&mut state, |s| {
            // Back drawn first to show order does not matter after the depth prime.
            for (d, c) in [back, front] {
                draw_pixel(s, d, c, &mut zbuf, &mut fb);
            }
            Ok(())
        })
        .unwrap();

        assert!(fb.truncate().abs_diff_eq(glam::Vec3::new(0.5, 0.0, 0.0), 1e-6));
    }

    #[test]
    fn compare_functions() {
        let mut s = DrawState::default();
        assert!(s.depth_passes(0.2, 0.5));
        assert!(!s.depth_passes(0.5, 0.5));
        s.depth_compare = wgpu::CompareFunction::LessEqual;
        assert!(s.depth_passes(0.5, 0.5));
        s.depth_compare = wgpu::CompareFunction::Greater;
        assert!(s.depth_passes(0.6, 0.5));
    }
}
