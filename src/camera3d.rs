use crate::surface::SurfaceSize;
use glam::{Mat4, Quat, Vec2, Vec3};

const PITCH_LIMIT: f32 = std::f32::consts::FRAC_PI_2 - 0.01;
const MIN_RADIUS: f32 = 0.1;
const MAX_RADIUS: f32 = 10_000.0;

/// Perspective camera handed to the renderer each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera3D {
    pub eye: Vec3,
    pub look_at: Vec3,
    pub fov_y: f32,
    pub clip: (f32, f32),
}

impl Camera3D {
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.look_at, Vec3::Y)
    }

    pub fn projection(&self, viewport: SurfaceSize) -> Mat4 {
        let (near, far) = self.clip;
        Mat4::perspective_rh_gl(self.fov_y, viewport.aspect().max(0.0001), near, far)
    }

    pub fn view_projection(&self, viewport: SurfaceSize) -> Mat4 {
        self.projection(viewport) * self.view()
    }
}

/// Orbit controls around a target with a remembered home pose.
#[derive(Debug, Clone)]
pub struct OrbitCamera {
    pub target: Vec3,
    pub radius: f32,
    pub yaw: f32,
    pub pitch: f32,
    home: (Vec3, f32, f32, f32),
}

impl OrbitCamera {
    pub fn new(target: Vec3, radius: f32) -> Self {
        let radius = radius.clamp(MIN_RADIUS, MAX_RADIUS);
        Self { target, radius, yaw: 0.0, pitch: 0.0, home: (target, radius, 0.0, 0.0) }
    }

    /// Aims at a bounding sphere so it fills the vertical field of view, and makes that the home pose.
    pub fn frame_sphere(&mut self, center: Vec3, radius: f32, fov_y: f32) {
        let half = (fov_y * 0.5).max(0.01);
        self.target = center;
        self.radius = (radius.max(MIN_RADIUS) / half.sin()).clamp(MIN_RADIUS, MAX_RADIUS);
        self.home = (self.target, self.radius, self.yaw, self.pitch);
    }

    pub fn reset(&mut self) {
        (self.target, self.radius, self.yaw, self.pitch) = self.home;
    }

    pub fn eye(&self) -> Vec3 {
        let rotation = Quat::from_euler(glam::EulerRot::YXZ, self.yaw, self.pitch, 0.0);
        self.target + rotation * Vec3::new(0.0, 0.0, self.radius)
    }

    pub fn camera(&self, fov_y: f32, clip: (f32, f32)) -> Camera3D {
        Camera3D { eye: self.eye(), look_at: self.target, fov_y, clip }
    }

    pub fn orbit(&mut self, delta: Vec2) {
        if !delta.is_finite() {
            return;
        }
        self.yaw = crate::wrap_angle(self.yaw + delta.x);
        self.pitch = (self.pitch + delta.y).clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    pub fn zoom(&mut self, factor: f32) {
        self.radius = (self.radius * factor).clamp(MIN_RADIUS, MAX_RADIUS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eye_stays_on_the_orbit_sphere() {
        let mut orbit = OrbitCamera::new(Vec3::new(1.0, 0.0, 0.0), 5.0);
        orbit.orbit(Vec2::new(0.5, 0.25));
        assert!((orbit.eye().distance(orbit.target) - 5.0).abs() < 1e-3);
        let vp = orbit.camera(0.8, (0.1, 100.0)).view_projection(SurfaceSize::new(1280, 720));
        assert!(vp.to_cols_array().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn pitch_never_flips_over_the_pole() {
        let mut orbit = OrbitCamera::new(Vec3::ZERO, 5.0);
        orbit.orbit(Vec2::new(0.0, 10.0));
        assert!(orbit.pitch < std::f32::consts::FRAC_PI_2);
    }

    #[test]
    fn framing_sets_the_home_pose() {
        let mut orbit = OrbitCamera::new(Vec3::ZERO, 5.0);
        orbit.frame_sphere(Vec3::ZERO, 2.0, std::f32::consts::FRAC_PI_3);
        assert!((orbit.radius - 4.0).abs() < 1e-4);
        orbit.orbit(Vec2::new(1.0, 0.5));
        orbit.zoom(3.0);
        orbit.reset();
        assert_eq!(orbit.yaw, 0.0);
        assert!((orbit.radius - 4.0).abs() < 1e-4);
    }
}
