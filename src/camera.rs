use crate::surface::SurfaceSize;
use glam::{Affine2, Vec2};

const ZOOM_RANGE: (f32, f32) = (0.1, 20.0);

/// Canvas view transform: world units to surface pixels, y pointing up in world space.
#[derive(Debug, Clone)]
pub struct Camera2D {
    pub position: Vec2,
    pub zoom: f32,
    pub rotation: f32,
    /// World units visible above and below the centre at zoom 1.
    half_span: f32,
}

impl Camera2D {
    pub fn new(half_span: f32) -> Self {
        Self { position: Vec2::ZERO, zoom: 1.0, rotation: 0.0, half_span: half_span.max(f32::EPSILON) }
    }

    pub fn reset(&mut self) {
        self.position = Vec2::ZERO;
        self.zoom = 1.0;
        self.rotation = 0.0;
    }

    pub fn zoom_by_wheel(&mut self, delta: f32) {
        self.set_zoom(self.zoom * (delta * 0.1).exp());
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.zoom = zoom.clamp(ZOOM_RANGE.0, ZOOM_RANGE.1);
    }

    pub fn rotate(&mut self, radians: f32) {
        self.rotation = crate::wrap_angle(self.rotation + radians);
    }

    /// Surface pixels per world unit.
    pub fn pixels_per_unit(&self, size: SurfaceSize) -> f32 {
        size.height as f32 * 0.5 * self.zoom / self.half_span
    }

    /// World-to-pixel transform for a surface, `None` while the surface has no area.
    pub fn transform(&self, size: SurfaceSize) -> Option<Affine2> {
        if size.is_empty() {
            return None;
        }
        let scale = self.pixels_per_unit(size);
        let centre = Vec2::new(size.width as f32, size.height as f32) * 0.5;
        Some(
            Affine2::from_translation(centre)
                * Affine2::from_scale(Vec2::new(scale, -scale))
                * Affine2::from_angle(-self.rotation)
                * Affine2::from_translation(-self.position),
        )
    }

    pub fn world_to_screen(&self, world: Vec2, size: SurfaceSize) -> Option<Vec2> {
        self.transform(size).map(|t| t.transform_point2(world))
    }

    pub fn screen_to_world(&self, screen: Vec2, size: SurfaceSize) -> Option<Vec2> {
        self.transform(size).map(|t| t.inverse().transform_point2(screen))
    }

    /// Moves the view so the world point under the pointer follows a drag of `delta` pixels.
    pub fn pan_pixels(&mut self, delta: Vec2, size: SurfaceSize) {
        let Some(transform) = self.transform(size) else {
            return;
        };
        self.position -= transform.inverse().transform_vector2(delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec2, b: Vec2) -> bool {
        (a - b).length() < 1e-3
    }

    #[test]
    fn rotated_zoomed_view_maps_back_to_the_same_world_point() {
        let size = SurfaceSize::new(800, 600);
        let mut camera = Camera2D::new(10.0);
        camera.position = Vec2::new(3.0, -2.0);
        camera.set_zoom(2.0);
        camera.rotate(0.7);
        let world = Vec2::new(1.5, 4.0);
        let screen = camera.world_to_screen(world, size).unwrap();
        assert!(approx(camera.screen_to_world(screen, size).unwrap(), world));
    }

    #[test]
    fn surface_centre_shows_the_camera_position() {
        let size = SurfaceSize::new(640, 480);
        let mut camera = Camera2D::new(5.0);
        camera.position = Vec2::new(7.0, 1.0);
        let world = camera.screen_to_world(Vec2::new(320.0, 240.0), size).unwrap();
        assert!(approx(world, camera.position));
        let above = camera.world_to_screen(camera.position + Vec2::Y, size).unwrap();
        assert!(above.y < 240.0, "world up is screen up");
    }

    #[test]
    fn empty_surface_has_no_mapping() {
        let camera = Camera2D::new(5.0);
        assert!(camera.screen_to_world(Vec2::ZERO, SurfaceSize::new(0, 10)).is_none());
    }

    #[test]
    fn zoom_is_clamped_and_reset_restores_defaults() {
        let mut camera = Camera2D::new(5.0);
        camera.pan_pixels(Vec2::new(40.0, 10.0), SurfaceSize::new(100, 100));
        for _ in 0..100 {
            camera.zoom_by_wheel(3.0);
        }
        assert_eq!(camera.zoom, ZOOM_RANGE.1);
        camera.rotate(1.0);
        camera.reset();
        assert_eq!(camera.position, Vec2::ZERO);
        assert_eq!(camera.zoom, 1.0);
        assert_eq!(camera.rotation, 0.0);
    }
}
