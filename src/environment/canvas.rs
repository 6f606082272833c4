use super::{Capability, EnvironmentCore, RenderingEnvironment};
use crate::camera::Camera2D;
use crate::surface::{SurfaceEvent, SurfaceEventKind, SurfaceSize, Theme};
use glam::Vec2;

const CANVAS_EVENTS: &[SurfaceEventKind] = &[
    SurfaceEventKind::PointerDown,
    SurfaceEventKind::PointerMove,
    SurfaceEventKind::PointerUp,
    SurfaceEventKind::Wheel,
    SurfaceEventKind::DoubleClick,
];

/// World-space units visible above and below the centre at zoom 1.
const BASE_HALF_HEIGHT: f32 = 10.0;

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Circle { center: Vec2, radius: f32, color: [f32; 4], filled: bool },
    Line { from: Vec2, to: Vec2, color: [f32; 4], width: f32 },
    Polyline { points: Vec<Vec2>, color: [f32; 4], width: f32, closed: bool },
    Rect { min: Vec2, max: Vec2, color: [f32; 4], filled: bool },
    Text { position: Vec2, text: String, color: [f32; 4] },
}

/// Retained command list standing in for the drawing surface.
#[derive(Debug, Clone, Default)]
pub struct DrawList {
    clear_color: [f32; 3],
    commands: Vec<DrawCommand>,
}

impl DrawList {
    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn clear_color(&self) -> [f32; 3] {
        self.clear_color
    }

    pub fn push(&mut self, command: DrawCommand) {
        self.commands.push(command);
    }

    pub fn circle(&mut self, center: Vec2, radius: f32, color: [f32; 4], filled: bool) {
        self.push(DrawCommand::Circle { center, radius, color, filled });
    }

    pub fn line(&mut self, from: Vec2, to: Vec2, color: [f32; 4], width: f32) {
        self.push(DrawCommand::Line { from, to, color, width });
    }

    pub fn polyline(&mut self, points: Vec<Vec2>, color: [f32; 4], width: f32, closed: bool) {
        self.push(DrawCommand::Polyline { points, color, width, closed });
    }

    pub fn rect(&mut self, min: Vec2, max: Vec2, color: [f32; 4], filled: bool) {
        self.push(DrawCommand::Rect { min, max, color, filled });
    }

    pub fn text(&mut self, position: Vec2, text: impl Into<String>, color: [f32; 4]) {
        self.push(DrawCommand::Text { position, text: text.into(), color });
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

pub struct Canvas2DEnvironment {
    core: EnvironmentCore,
    camera: Camera2D,
    draw_list: DrawList,
    drag_origin: Option<Vec2>,
}

impl Default for Canvas2DEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl Canvas2DEnvironment {
    pub fn new() -> Self {
        Self {
            core: EnvironmentCore::new(Capability::Canvas2D),
            camera: Camera2D::new(BASE_HALF_HEIGHT),
            draw_list: DrawList::default(),
            drag_origin: None,
        }
    }

    pub fn draw_list(&self) -> &DrawList {
        &self.draw_list
    }

    pub fn draw_list_mut(&mut self) -> &mut DrawList {
        &mut self.draw_list
    }

    pub fn camera(&self) -> &Camera2D {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera2D {
        &mut self.camera
    }

    pub fn size(&self) -> SurfaceSize {
        self.core.size()
    }

    pub fn to_world(&self, x: f32, y: f32) -> Option<Vec2> {
        self.camera.screen_to_world(Vec2::new(x, y), self.core.size())
    }

    pub fn to_screen(&self, x: f32, y: f32) -> Option<Vec2> {
        self.camera.world_to_screen(Vec2::new(x, y), self.core.size())
    }
}

impl RenderingEnvironment for Canvas2DEnvironment {
    fn core(&self) -> &EnvironmentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EnvironmentCore {
        &mut self.core
    }

    fn event_kinds(&self) -> &'static [SurfaceEventKind] {
        CANVAS_EVENTS
    }

    fn release_resources(&mut self) {
        self.draw_list.clear();
        self.drag_origin = None;
    }

    fn on_resize(&mut self, _size: SurfaceSize) {
        self.drag_origin = None;
    }

    fn on_theme(&mut self, theme: &Theme) {
        self.draw_list.clear_color = theme.background;
    }

    fn reset_camera(&mut self) {
        self.camera.reset();
    }

    fn on_event(&mut self, event: &SurfaceEvent) -> bool {
        match *event {
            SurfaceEvent::PointerDown { x, y } => {
                self.drag_origin = Some(Vec2::new(x, y));
                true
            }
            SurfaceEvent::PointerMove { x, y } => {
                let Some(origin) = self.drag_origin else {
                    return false;
                };
                let current = Vec2::new(x, y);
                self.camera.pan_pixels(current - origin, self.core.size());
                self.drag_origin = Some(current);
                true
            }
            SurfaceEvent::PointerUp { .. } => self.drag_origin.take().is_some(),
            SurfaceEvent::Wheel { delta } => {
                self.camera.zoom_by_wheel(delta);
                true
            }
            SurfaceEvent::DoubleClick { .. } => {
                self.camera.reset();
                true
            }
        }
    }

    fn command_count(&self) -> usize {
        self.draw_list.len()
    }
}
