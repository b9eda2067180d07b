//! CPU model of the seed/peel/composite passes over per-pixel fragment lists.
//!
//! Uses the same depth rule as `oit_peel.wgsl`, the same outputs as the seed
//! and peel shaders, and [`blend::evaluate`] with the real [`blend::UNDER`]
//! state, driven through [`run_peel_loop`].

use std::convert::Infallible;

use glam::{Vec3, Vec4};

use super::blend;
use super::orchestrator::LayerPass;
use super::targets::PingPong;
use crate::camera::Camera;

const FAR: f32 = 1.0;

/// One rasterized fragment at a pixel.
#[derive(Clone, Copy, Debug)]
pub struct Fragment {
    pub depth: f32,
    pub color: Vec3,
    pub alpha: f32,
}

pub struct SoftwareLayers {
    fragments: Vec<Vec<Fragment>>,
    color: [Vec<Vec4>; 2],
    depth: [Vec<f32>; 2],
    pub accumulation: Vec<Vec4>,
    /// Depth each peel pass wrote, in order.
    pub written_depths: Vec<Vec<f32>>,
}

impl SoftwareLayers {
    /// Runs the seed pass over `fragments` (one list per pixel).
    pub fn seeded(fragments: Vec<Vec<Fragment>>) -> Self {
        let n = fragments.len();
        let mut layers = Self {
            fragments,
            color: [vec![Vec4::ZERO; n], vec![Vec4::ZERO; n]],
            depth: [vec![FAR; n], vec![FAR; n]],
            accumulation: vec![Vec4::new(0.0, 0.0, 0.0, 1.0); n],
            written_depths: Vec::new(),
        };

        for (p, list) in layers.fragments.iter().enumerate() {
            // Less test against a cleared depth of 1.0.
            if let Some(nearest) = nearest(list.iter().filter(|f| f.depth < FAR)) {
                layers.accumulation[p] = blend::seed(nearest.color, nearest.alpha);
                layers.depth[0][p] = nearest.depth;
            }
        }
        layers
    }
}

fn nearest<'a>(fragments: impl Iterator<Item = &'a Fragment>) -> Option<&'a Fragment> {
    fragments.min_by(|a, b| a.depth.total_cmp(&b.depth))
}

impl LayerPass for SoftwareLayers {
    type Error = Infallible;

    fn peel(&mut self, _iteration: u32, pp: PingPong) -> Result<u64, Infallible> {
        let mut samples = 0;
        let mut written = vec![FAR; self.fragments.len()];

        for (p, list) in self.fragments.iter().enumerate() {
            let frontier = self.depth[pp.read][p];
            let survivors = list
                .iter()
                .filter(|f| f.depth > frontier && f.depth < FAR);
            samples += survivors.clone().count() as u64;

            let (color, depth) = match nearest(survivors) {
                Some(f) => (blend::peeled(f.color, f.alpha), f.depth),
                None => (Vec4::ZERO, FAR),
            };
            self.color[pp.write][p] = color;
            self.depth[pp.write][p] = depth;
            written[p] = depth;
        }

        self.written_depths.push(written);
        Ok(samples)
    }

    fn composite(&mut self, _iteration: u32, pp: PingPong) -> Result<(), Infallible> {
        for (accum, &layer) in self.accumulation.iter_mut().zip(&self.color[pp.write]) {
            *accum = blend::evaluate(&blend::UNDER, layer, *accum, Vec4::ZERO);
        }
        Ok(())
    }
}

/// Ray-casts spheres centred at the origin for a `size` x `size` image and
/// returns each pixel's fragments with NDC depth.
pub fn ray_cast_spheres(camera: &Camera, size: u32, radii: &[f32], alpha: f32) -> Vec<Vec<Fragment>> {
    let view_proj = camera.view_projection();
    let inverse = view_proj.inverse();
    let mut pixels = Vec::with_capacity((size * size) as usize);

    for y in 0..size {
        for x in 0..size {
            let ndc_x = (x as f32 + 0.5) / size as f32 * 2.0 - 1.0;
            let ndc_y = 1.0 - (y as f32 + 0.5) / size as f32 * 2.0;
            let near = inverse.project_point3(Vec3::new(ndc_x, ndc_y, 0.0));
            let far = inverse.project_point3(Vec3::new(ndc_x, ndc_y, 1.0));
            let dir = (far - near).normalize();

            let mut list = Vec::new();
            for &radius in radii {
                // |near + t*dir|^2 = r^2
                let b = near.dot(dir);
                let c = near.length_squared() - radius * radius;
                let disc = b * b - c;
                if disc <= 0.0 {
                    continue;
                }
                for t in [-b - disc.sqrt(), -b + disc.sqrt()] {
                    let hit = near + dir * t;
                    list.push(Fragment {
                        depth: view_proj.project_point3(hit).z,
                        color: Vec3::ONE,
                        alpha,
                    });
                }
            }
            pixels.push(list);
        }
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oit::orchestrator::{PeelCap, Termination, run_peel_loop};

    const SIZE: u32 = 32;

    fn camera() -> Camera {
        Camera::new()
            .at(0.0, 0.0, 10.0)
            .looking_at(Vec3::ZERO)
            .with_aspect(1.0)
    }

    fn center(size: u32) -> usize {
        (size / 2 * size + size / 2) as usize
    }

    #[test]
    fn convex_sphere_stops_after_two_peels() {
        let pixels = ray_cast_spheres(&camera(), SIZE, &[1.0], 0.8);
        let mut layers = SoftwareLayers::seeded(pixels);
        let report = run_peel_loop(&mut layers, PeelCap::new(10).unwrap()).unwrap();

        assert_eq!(report.peel_passes, 2);
        assert_eq!(report.layers_composited, 2);
        assert_eq!(report.termination, Termination::EmptyLayer);
    }

    #[test]
    fn sphere_center_reaches_ninety_six_percent_coverage() {
        let pixels = ray_cast_spheres(&camera(), SIZE, &[1.0], 0.8);
        let mut layers = SoftwareLayers::seeded(pixels);
        run_peel_loop(&mut layers, PeelCap::DEFAULT).unwrap();

        let texel = layers.accumulation[center(SIZE)];
        assert!((blend::coverage(texel) - 0.96).abs() < 1e-5);
        // Background corners stay untouched.
        assert_eq!(layers.accumulation[0], Vec4::new(0.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn frontier_only_moves_away_from_the_camera() {
        let pixels = ray_cast_spheres(&camera(), SIZE, &[0.5, 1.0, 1.5], 0.3);
        let seed_depth: Vec<f32> = {
            let layers = SoftwareLayers::seeded(pixels.clone());
            layers.depth[0].clone()
        };
        let mut layers = SoftwareLayers::seeded(pixels);
        run_peel_loop(&mut layers, PeelCap::DEFAULT).unwrap();

        let mut previous = seed_depth;
        for written in &layers.written_depths {
            for (p, (&prev, &next)) in previous.iter().zip(written).enumerate() {
                if prev < FAR && next < FAR {
                    assert!(next > prev, "pixel {}: {} after {}", p, next, prev);
                }
            }
            previous = written.clone();
        }
    }

    #[test]
    fn nested_spheres_peel_every_layer_under_a_large_cap() {
        // Three nested spheres: depth complexity 6 through the centre.
        let pixels = ray_cast_spheres(&camera(), SIZE, &[0.5, 1.0, 1.5], 0.5);
        let mut layers = SoftwareLayers::seeded(pixels);
        let report = run_peel_loop(&mut layers, PeelCap::DEFAULT).unwrap();

        assert_eq!(report.layers_composited, 6);
        assert_eq!(report.peel_passes, 6);
        let expected = 1.0 - 0.5f32.powi(6);
        assert!((blend::coverage(layers.accumulation[center(SIZE)]) - expected).abs() < 1e-5);
    }

    #[test]
    fn small_cap_bounds_the_work() {
        let pixels = ray_cast_spheres(&camera(), SIZE, &[0.5, 1.0, 1.5], 0.5);
        for cap in 1..=4 {
            let mut layers = SoftwareLayers::seeded(pixels.clone());
            let report = run_peel_loop(&mut layers, PeelCap::new(cap).unwrap()).unwrap();
            assert_eq!(report.peel_passes, cap);
            assert_eq!(report.termination, Termination::CapReached);
        }
    }

    #[test]
    fn empty_scene_terminates_on_first_peel() {
        let pixels = vec![Vec::new(); 16];
        let mut layers = SoftwareLayers::seeded(pixels);
        let report = run_peel_loop(&mut layers, PeelCap::DEFAULT).unwrap();
        assert_eq!(report.peel_passes, 1);
        assert_eq!(report.layers_composited, 1);
    }
}
