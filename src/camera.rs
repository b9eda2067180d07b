use glam::{Mat4, Vec3};

/// A perspective camera looking at a target point.
///
/// Produces the view and projection matrices uploaded to every mesh pass.
/// Depth is mapped to wgpu's `[0, 1]` range (`perspective_rh`), so the far plane
/// clears to `1.0` and nearer fragments compare `Less`.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov: f32, // radians, vertical
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 10.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov: 50.0f32.to_radians(),
            aspect: 1.0,
            near: 0.1,
            far: 10000.0,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, x: f32, y: f32, z: f32) -> Self {
        self.position = Vec3::new(x, y, z);
        self
    }

    pub fn looking_at(mut self, target: Vec3) -> Self {
        self.target = target;
        self
    }

    pub fn with_aspect(mut self, aspect: f32) -> Self {
        self.aspect = aspect;
        self
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
    }

    /// Combined `projection * view`.
    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_projects_to_screen_center() {
        let camera = Camera::new();
        let clip = camera.view_projection() * glam::Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-6);
        assert!(ndc.y.abs() < 1e-6);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn farther_points_have_larger_depth() {
        let camera = Camera::new();
        let vp = camera.view_projection();
        let depth = |z: f32| {
            let clip = vp * glam::Vec4::new(0.0, 0.0, z, 1.0);
            clip.z / clip.w
        };
        // Camera sits at +10 looking down -Z: z = 1 is nearer than z = -1.
        assert!(depth(1.0) < depth(-1.0));
    }
}
