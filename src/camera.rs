// camera.rs — 由视角参数计算投影矩阵与模型视图矩阵

use crate::panorama::ViewState;
use glam::{Mat4, Vec3};

pub const Z_NEAR: f32 = 0.1;
pub const Z_FAR: f32 = 100.0;

/// Layout must match `CameraUniform` in `sphere.vert.wgsl`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    pub projection: [[f32; 4]; 4],
    pub model_view: [[f32; 4]; 4],
}

impl CameraUniform {
    pub fn new(projection: Mat4, model_view: Mat4) -> Self {
        Self {
            projection: projection.to_cols_array_2d(),
            model_view: model_view.to_cols_array_2d(),
        }
    }
}

/// Right-handed perspective with wgpu's [0, 1] depth range.
pub fn projection_matrix(field_of_view_deg: f32, aspect: f32) -> Mat4 {
    Mat4::perspective_rh(field_of_view_deg.to_radians(), aspect, Z_NEAR, Z_FAR)
}

/// Identity, then pitch about -X, then yaw about +Y, each post-multiplied.
///
/// Points are therefore yawed first and pitched second. Do not reorder.
pub fn model_view_matrix(vertical_angle: f32, horizontal_angle: f32) -> Mat4 {
    let mut m = Mat4::IDENTITY;
    m *= Mat4::from_axis_angle(Vec3::NEG_X, vertical_angle);
    m *= Mat4::from_axis_angle(Vec3::Y, horizontal_angle);
    m
}

/// 宽高任一为 0 时（最小化窗口）退回 1.0，避免 NaN 矩阵
pub fn aspect_ratio(width: u32, height: u32) -> f32 {
    if width == 0 || height == 0 {
        1.0
    } else {
        width as f32 / height as f32
    }
}

pub fn camera_uniform(view: &ViewState, aspect: f32) -> CameraUniform {
    CameraUniform::new(
        projection_matrix(view.field_of_view, aspect),
        model_view_matrix(view.vertical_angle, view.horizontal_angle),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;
    use std::f32::consts::FRAC_PI_2;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).abs().max_element() < 1e-5
    }

    #[test]
    fn level_view_is_identity() {
        assert_eq!(model_view_matrix(0.0, 0.0), Mat4::IDENTITY);
    }

    #[test]
    fn yaw_is_applied_before_pitch() {
        let m = model_view_matrix(FRAC_PI_2, FRAC_PI_2);
        // +X yaws to -Z, then pitches to -Y
        assert!(approx(m.transform_point3(Vec3::X), Vec3::NEG_Y));
        let yawed = Mat4::from_rotation_y(FRAC_PI_2).transform_point3(Vec3::X);
        let expected = Mat4::from_rotation_x(-FRAC_PI_2).transform_point3(yawed);
        assert!(approx(m.transform_point3(Vec3::X), expected));

        // the other order gives a different point
        let pitched = Mat4::from_rotation_x(-FRAC_PI_2).transform_point3(Vec3::X);
        let wrong = Mat4::from_rotation_y(FRAC_PI_2).transform_point3(pitched);
        assert!(!approx(m.transform_point3(Vec3::X), wrong));
    }

    #[test]
    fn pitch_rotates_about_negative_x() {
        let m = model_view_matrix(FRAC_PI_2, 0.0);
        // rotating +Y by 90° about -X lands on -Z
        assert!(approx(m.transform_point3(Vec3::Y), Vec3::NEG_Z));
    }

    #[test]
    fn projection_uses_fov_and_clip_planes() {
        let p = projection_matrix(90.0, 2.0);
        let f = 1.0 / (45.0f32.to_radians()).tan();
        assert!((p.x_axis.x - f / 2.0).abs() < 1e-5);
        assert!((p.y_axis.y - f).abs() < 1e-5);

        let near = p * Vec4::new(0.0, 0.0, -Z_NEAR, 1.0);
        let far = p * Vec4::new(0.0, 0.0, -Z_FAR, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn degenerate_surface_has_unit_aspect() {
        assert_eq!(aspect_ratio(0, 720), 1.0);
        assert_eq!(aspect_ratio(1280, 0), 1.0);
        assert_eq!(aspect_ratio(1280, 640), 2.0);
    }

    #[test]
    fn uniform_is_two_column_major_matrices() {
        assert_eq!(std::mem::size_of::<CameraUniform>(), 128);
        let u = camera_uniform(&ViewState::new(), 1.0);
        assert_eq!(u.model_view, Mat4::IDENTITY.to_cols_array_2d());
    }
}
