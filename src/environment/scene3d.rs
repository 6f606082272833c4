use super::{Capability, EnvironmentCore, RenderingEnvironment};
use crate::camera3d::{Camera3D, OrbitCamera};
use crate::scene::{NodeId, SceneGraph};
use crate::surface::{ContextId, SurfaceEvent, SurfaceEventKind, SurfaceSize, Theme};
use glam::{Mat4, Vec2, Vec3};

const SCENE_EVENTS: &[SurfaceEventKind] = &[
    SurfaceEventKind::PointerDown,
    SurfaceEventKind::PointerMove,
    SurfaceEventKind::PointerUp,
    SurfaceEventKind::Wheel,
    SurfaceEventKind::DoubleClick,
];

const ORBIT_RADIANS_PER_PIXEL: f32 = 0.005;
const DEFAULT_ORBIT_RADIUS: f32 = 8.0;

/// What the bound plugin sees of the renderer.
#[derive(Debug, Clone)]
pub struct RendererHandle {
    pub clear_color: [f32; 3],
    pub shadows_enabled: bool,
    pub pixel_ratio: f32,
    view_projection: Mat4,
    context: Option<ContextId>,
    frames_rendered: u64,
}

impl RendererHandle {
    fn new() -> Self {
        Self {
            clear_color: [0.0; 3],
            shadows_enabled: true,
            pixel_ratio: 1.0,
            view_projection: Mat4::IDENTITY,
            context: None,
            frames_rendered: 0,
        }
    }

    pub fn context(&self) -> Option<ContextId> {
        self.context
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Camera matrix used for the last presented frame.
    pub fn view_projection(&self) -> Mat4 {
        self.view_projection
    }
}

pub struct Scene3DEnvironment {
    core: EnvironmentCore,
    scene: SceneGraph,
    orbit: OrbitCamera,
    fov_y: f32,
    clip: (f32, f32),
    renderer: RendererHandle,
    drag_origin: Option<Vec2>,
}

impl Default for Scene3DEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene3DEnvironment {
    pub fn new() -> Self {
        Self {
            core: EnvironmentCore::new(Capability::Scene3D),
            scene: SceneGraph::new(),
            orbit: OrbitCamera::new(Vec3::ZERO, DEFAULT_ORBIT_RADIUS),
            fov_y: 50.0_f32.to_radians(),
            clip: (0.1, 1000.0),
            renderer: RendererHandle::new(),
            drag_origin: None,
        }
    }

    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut SceneGraph {
        &mut self.scene
    }

    pub fn scene_root(&self) -> NodeId {
        self.scene.root()
    }

    pub fn camera(&self) -> Camera3D {
        self.orbit.camera(self.fov_y, self.clip)
    }

    pub fn fov_y(&self) -> f32 {
        self.fov_y
    }

    pub fn orbit(&self) -> &OrbitCamera {
        &self.orbit
    }

    pub fn orbit_mut(&mut self) -> &mut OrbitCamera {
        &mut self.orbit
    }

    pub fn renderer(&self) -> &RendererHandle {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut RendererHandle {
        &mut self.renderer
    }

    pub fn size(&self) -> SurfaceSize {
        self.core.size()
    }
}

impl RenderingEnvironment for Scene3DEnvironment {
    fn core(&self) -> &EnvironmentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EnvironmentCore {
        &mut self.core
    }

    fn event_kinds(&self) -> &'static [SurfaceEventKind] {
        SCENE_EVENTS
    }

    fn release_resources(&mut self) {
        let dropped = self.scene.len().saturating_sub(1);
        self.scene.clear();
        self.renderer.context = None;
        self.drag_origin = None;
        if dropped > 0 {
            log::debug!("[env:3D] released {dropped} scene node(s)");
        }
    }

    fn on_resize(&mut self, size: SurfaceSize) {
        self.renderer.context = self.core.context();
        self.renderer.pixel_ratio = size.pixel_ratio;
    }

    fn on_theme(&mut self, theme: &Theme) {
        self.renderer.clear_color = theme.background;
    }

    fn reset_camera(&mut self) {
        self.orbit.reset();
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
                self.orbit.orbit((current - origin) * ORBIT_RADIANS_PER_PIXEL);
                self.drag_origin = Some(current);
                true
            }
            SurfaceEvent::PointerUp { .. } => self.drag_origin.take().is_some(),
            SurfaceEvent::Wheel { delta } => {
                self.orbit.zoom((-delta * 0.1).exp());
                true
            }
            SurfaceEvent::DoubleClick { .. } => {
                self.orbit.reset();
                true
            }
        }
    }

    fn command_count(&self) -> usize {
        self.scene.len()
    }

    fn present(&mut self, surface: &mut dyn crate::surface::SurfaceBackend) -> bool {
        let Some(context) = self.core.context().filter(|_| self.core.is_active()) else {
            log::trace!("[env:3D] ignoring frame while {:?}", self.core.state());
            return false;
        };
        let presented = surface.present(context, self.scene.len());
        if presented {
            self.renderer.view_projection = self.camera().view_projection(self.core.size());
            self.renderer.frames_rendered += 1;
        }
        presented
    }
}
