//! Shading inputs: material, light, and the per-frame uniform block.

use glam::{Mat4, Quat, Vec3, Vec4};

use crate::camera::Camera;

/// Surface parameters shared by all three render modes.
///
/// `transparent` runs from 0 (opaque) to 1 (fully transparent); shaders use
/// `1 - transparent` as fragment alpha.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    pub albedo: Vec3,
    /// Ambient coefficient.
    pub ka: f32,
    /// Diffuse coefficient per channel.
    pub kd: Vec3,
    pub transparent: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            albedo: Vec3::ONE,
            ka: 0.03,
            kd: Vec3::ONE,
            transparent: 0.8,
        }
    }
}

impl Material {
    /// Fragment alpha used by the blending and peeling shaders.
    pub fn opacity(&self) -> f32 {
        1.0 - self.transparent.clamp(0.0, 1.0)
    }

    /// Lit color of a surface with unit `normal` facing the viewer, as
    /// `shade()` in `shaders/scene.wgsl` computes it.
    pub fn shade(&self, normal: Vec3, light: &DirectionalLight) -> Vec3 {
        let l = -light.direction().normalize_or_zero();
        let diffuse = normal.dot(l).max(0.0) * light.color * light.intensity;
        self.albedo * (Vec3::splat(self.ka) + self.kd * diffuse)
    }
}

/// A directional light. Its direction is the rotated forward (-Z) axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionalLight {
    pub rotation: Quat,
    pub color: Vec3,
    pub intensity: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            rotation: Quat::from_axis_angle(Vec3::splat(-1.0).normalize(), 45f32.to_radians()),
            color: Vec3::ONE,
            intensity: 1.0,
        }
    }
}

impl DirectionalLight {
    /// Direction the light travels in world space.
    pub fn direction(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }
}

/// Uniform block bound at group 0 by every mesh and fullscreen program.
///
/// Mirrors `struct Scene` in `shaders/scene.wgsl`; packed into `vec4`s so the
/// std140-style layout needs no padding fields.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SceneUniforms {
    pub projection: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub model: [[f32; 4]; 4],
    /// Inverse transpose of `model`.
    pub normal_matrix: [[f32; 4]; 4],
    /// xyz: light direction, w: intensity.
    pub light_direction: [f32; 4],
    /// rgb: light color.
    pub light_color: [f32; 4],
    /// rgb: albedo, w: ambient coefficient.
    pub albedo: [f32; 4],
    /// rgb: diffuse coefficient, w: transparency.
    pub kd: [f32; 4],
    /// rgba: background color used by the final composite.
    pub background: [f32; 4],
    /// x: alpha-test threshold. The rest pads the block to a `vec4`.
    pub params: [f32; 4],
}

impl SceneUniforms {
    pub fn new(
        camera: &Camera,
        model: Mat4,
        light: &DirectionalLight,
        material: &Material,
        background: Vec4,
        alpha_threshold: f32,
    ) -> Self {
        let light_dir = light.direction().normalize_or_zero();
        Self {
            projection: camera.projection_matrix().to_cols_array_2d(),
            view: camera.view_matrix().to_cols_array_2d(),
            model: model.to_cols_array_2d(),
            normal_matrix: model.inverse().transpose().to_cols_array_2d(),
            light_direction: light_dir.extend(light.intensity).to_array(),
            light_color: light.color.extend(1.0).to_array(),
            albedo: material.albedo.extend(material.ka).to_array(),
            kd: material
                .kd
                .extend(material.transparent.clamp(0.0, 1.0))
                .to_array(),
            background: background.to_array(),
            params: [alpha_threshold, 0.0, 0.0, 0.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opacity_is_complement_of_transparency() {
        let mut material = Material::default();
        assert!((material.opacity() - 0.2).abs() < 1e-6);
        material.transparent = 1.5;
        assert_eq!(material.opacity(), 0.0);
        material.transparent = -1.0;
        assert_eq!(material.opacity(), 1.0);
    }

    #[test]
    fn default_light_points_into_the_scene() {
        let dir = DirectionalLight::default().direction();
        assert!((dir.length() - 1.0).abs() < 1e-5);
        // Rotated away from pure -Z but still mostly facing forward.
        assert!(dir.z < 0.0);
        assert!(dir.x.abs() > 1e-3 || dir.y.abs() > 1e-3);
    }

    #[test]
    fn shading_is_ambient_plus_lambert() {
        let material = Material::default();
        let light = DirectionalLight {
            rotation: Quat::IDENTITY,
            color: Vec3::ONE,
            intensity: 1.0,
        };
        // Light travels down -Z: a +Z normal is fully lit, a -Z normal only ambient.
        let lit = material.shade(Vec3::Z, &light);
        assert!(lit.abs_diff_eq(Vec3::splat(1.03), 1e-6));
        let unlit = material.shade(Vec3::NEG_Z, &light);
        assert!(unlit.abs_diff_eq(Vec3::splat(0.03), 1e-6));
    }

    #[test]
    fn uniform_block_is_vec4_aligned() {
        assert_eq!(std::mem::size_of::<SceneUniforms>() % 16, 0);
        assert_eq!(std::mem::size_of::<SceneUniforms>(), 4 * 64 + 6 * 16);
    }

    #[test]
    fn uniforms_pack_material_scalars() {
        let u = SceneUniforms::new(
            &Camera::new(),
            Mat4::IDENTITY,
            &DirectionalLight::default(),
            &Material::default(),
            Vec4::new(0.1, 0.2, 0.3, 1.0),
            0.5,
        );
        assert_eq!(u.albedo[3], 0.03);
        assert_eq!(u.kd[3], 0.8);
        assert_eq!(u.params, [0.5, 0.0, 0.0, 0.0]);
        assert_eq!(u.background, [0.1, 0.2, 0.3, 1.0]);
    }
}
