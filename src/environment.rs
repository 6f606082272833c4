//! Rendering environments and the manager that switches between them.
//!
//! Exactly one environment may be `Active`. Switching tears the previous environment down
//! (event bindings, drawing context, attachment) before the next one is initialized and
//! attached to the shared output surface.

mod canvas;
mod scene3d;

pub use canvas::{Canvas2DEnvironment, DrawCommand, DrawList};
pub use scene3d::{RendererHandle, Scene3DEnvironment};

use crate::error::{HostError, Result};
use crate::surface::{BindingId, ContextId, SurfaceBackend, SurfaceEvent, SurfaceEventKind, SurfaceSize, Theme};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    #[serde(rename = "2D")]
    Canvas2D,
    #[serde(rename = "3D")]
    Scene3D,
}

impl Capability {
    pub const ALL: [Capability; 2] = [Capability::Canvas2D, Capability::Scene3D];

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Canvas2D => "2D",
            Capability::Scene3D => "3D",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentState {
    Uninitialized,
    Initialized,
    Active,
    Inactive,
    Disposed,
}

/// Lifecycle bookkeeping shared by both environments.
#[derive(Debug)]
pub struct EnvironmentCore {
    capability: Capability,
    state: EnvironmentState,
    context: Option<ContextId>,
    bindings: Vec<(BindingId, SurfaceEventKind)>,
    size: SurfaceSize,
    theme: Theme,
}

impl EnvironmentCore {
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            state: EnvironmentState::Uninitialized,
            context: None,
            bindings: Vec::new(),
            size: SurfaceSize::default(),
            theme: Theme::default(),
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn state(&self) -> EnvironmentState {
        self.state
    }

    pub fn context(&self) -> Option<ContextId> {
        self.context
    }

    pub fn size(&self) -> SurfaceSize {
        self.size
    }

    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_active(&self) -> bool {
        self.state == EnvironmentState::Active
    }

    fn listens_for(&self, kind: SurfaceEventKind) -> bool {
        self.bindings.iter().any(|(_, bound)| *bound == kind)
    }
}

pub trait RenderingEnvironment {
    fn core(&self) -> &EnvironmentCore;
    fn core_mut(&mut self) -> &mut EnvironmentCore;

    /// Platform events this environment listens to while active.
    fn event_kinds(&self) -> &'static [SurfaceEventKind];
    /// Drops backend specific contents (draw lists, scene nodes) on teardown.
    fn release_resources(&mut self);
    fn on_resize(&mut self, size: SurfaceSize);
    fn on_theme(&mut self, theme: &Theme);
    fn reset_camera(&mut self);
    fn on_event(&mut self, event: &SurfaceEvent) -> bool;
    /// Work submitted per presented frame.
    fn command_count(&self) -> usize;

    fn capability(&self) -> Capability {
        self.core().capability
    }

    fn state(&self) -> EnvironmentState {
        self.core().state
    }

    fn initialize(&mut self, surface: &mut dyn SurfaceBackend, size: SurfaceSize, theme: &Theme) -> anyhow::Result<()> {
        let core = self.core_mut();
        match core.state {
            EnvironmentState::Disposed => anyhow::bail!("{} environment is disposed", core.capability),
            EnvironmentState::Initialized | EnvironmentState::Active => return Ok(()),
            EnvironmentState::Uninitialized | EnvironmentState::Inactive => {}
        }
        let context = surface.create_context(core.capability, size)?;
        core.context = Some(context);
        core.size = size;
        core.theme = theme.clone();
        core.state = EnvironmentState::Initialized;
        log::debug!("[env:{}] initialized with context {context:?}", core.capability);
        Ok(())
    }

    fn activate(&mut self, surface: &mut dyn SurfaceBackend) -> anyhow::Result<()> {
        let kinds = self.event_kinds();
        let core = self.core_mut();
        match core.state {
            EnvironmentState::Active => return Ok(()),
            EnvironmentState::Initialized => {}
            other => anyhow::bail!("{} environment cannot activate from {other:?}", core.capability),
        }
        let Some(context) = core.context else {
            anyhow::bail!("{} environment has no drawing context", core.capability);
        };
        surface.attach(context);
        for kind in kinds {
            let binding = surface.bind_event(context, *kind);
            core.bindings.push((binding, *kind));
        }
        core.state = EnvironmentState::Active;
        let (size, theme) = (core.size, core.theme.clone());
        self.on_resize(size);
        self.on_theme(&theme);
        Ok(())
    }

    /// Unbinds events, detaches and releases the context. Safe to call in any state.
    /// Returns the number of event bindings removed.
    fn teardown(&mut self, surface: &mut dyn SurfaceBackend, next_state: EnvironmentState) -> usize {
        let core = self.core_mut();
        let removed = core.bindings.len();
        for (binding, _) in core.bindings.drain(..) {
            surface.unbind_event(binding);
        }
        if let Some(context) = core.context.take() {
            surface.detach(context);
            surface.release_context(context);
        }
        let was = core.state;
        if was != EnvironmentState::Disposed {
            core.state = match (was, next_state) {
                (EnvironmentState::Uninitialized, EnvironmentState::Inactive) => EnvironmentState::Uninitialized,
                (_, next) => next,
            };
        }
        let capability = core.capability;
        self.release_resources();
        log::debug!("[env:{capability}] torn down from {was:?}, {removed} binding(s) removed");
        removed
    }

    fn handle_resize(&mut self, surface: &mut dyn SurfaceBackend, size: SurfaceSize) {
        let core = self.core_mut();
        core.size = size;
        if let Some(context) = core.context {
            surface.resize_context(context, size);
        }
        if core.state == EnvironmentState::Active {
            self.on_resize(size);
        }
    }

    fn apply_theme(&mut self, theme: &Theme) {
        let core = self.core_mut();
        core.theme = theme.clone();
        if core.state == EnvironmentState::Active {
            self.on_theme(theme);
        }
    }

    fn handle_event(&mut self, event: &SurfaceEvent) -> bool {
        let core = self.core();
        if !core.is_active() || !core.listens_for(event.kind()) {
            return false;
        }
        self.on_event(event)
    }

    /// Presents one frame. Frames arriving after the environment left `Active` are dropped.
    fn present(&mut self, surface: &mut dyn SurfaceBackend) -> bool {
        let core = self.core();
        let (Some(context), true) = (core.context, core.is_active()) else {
            log::trace!("[env:{}] ignoring frame while {:?}", core.capability, core.state);
            return false;
        };
        let commands = self.command_count();
        surface.present(context, commands)
    }
}

/// Borrowed view of whichever environment a plugin is bound to.
pub enum EnvironmentHandle<'a> {
    Canvas(&'a mut Canvas2DEnvironment),
    Scene(&'a mut Scene3DEnvironment),
}

impl<'a> EnvironmentHandle<'a> {
    pub fn capability(&self) -> Capability {
        match self {
            EnvironmentHandle::Canvas(_) => Capability::Canvas2D,
            EnvironmentHandle::Scene(_) => Capability::Scene3D,
        }
    }

    pub fn reset_camera(&mut self) {
        match self {
            EnvironmentHandle::Canvas(env) => env.reset_camera(),
            EnvironmentHandle::Scene(env) => env.reset_camera(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentPolicy {
    /// Keep torn-down environments around as `Inactive` instead of disposing them.
    pub reuse_environments: bool,
}

impl Default for EnvironmentPolicy {
    fn default() -> Self {
        Self { reuse_environments: true }
    }
}

pub struct EnvironmentManager {
    surface: Box<dyn SurfaceBackend>,
    canvas: Canvas2DEnvironment,
    scene: Scene3DEnvironment,
    active: Option<Capability>,
    size: SurfaceSize,
    theme: Theme,
    policy: EnvironmentPolicy,
    switches: u64,
    shut_down: bool,
}

impl EnvironmentManager {
    pub fn new(surface: Box<dyn SurfaceBackend>, size: SurfaceSize, theme: Theme) -> Self {
        Self {
            surface,
            canvas: Canvas2DEnvironment::new(),
            scene: Scene3DEnvironment::new(),
            active: None,
            size,
            theme,
            policy: EnvironmentPolicy::default(),
            switches: 0,
            shut_down: false,
        }
    }

    pub fn with_policy(mut self, policy: EnvironmentPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn active_capability(&self) -> Option<Capability> {
        self.active
    }

    pub fn state_of(&self, capability: Capability) -> EnvironmentState {
        self.environment(capability).state()
    }

    pub fn size(&self) -> SurfaceSize {
        self.size
    }

    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    pub fn switch_count(&self) -> u64 {
        self.switches
    }

    pub fn canvas(&self) -> &Canvas2DEnvironment {
        &self.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut Canvas2DEnvironment {
        &mut self.canvas
    }

    pub fn scene(&self) -> &Scene3DEnvironment {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene3DEnvironment {
        &mut self.scene
    }

    pub fn active_handle(&mut self) -> Option<EnvironmentHandle<'_>> {
        match self.active? {
            Capability::Canvas2D if self.canvas.core().is_active() => Some(EnvironmentHandle::Canvas(&mut self.canvas)),
            Capability::Scene3D if self.scene.core().is_active() => Some(EnvironmentHandle::Scene(&mut self.scene)),
            _ => None,
        }
    }

    /// The active environment, but only when it provides `capability`.
    pub fn handle_for(&mut self, capability: Capability) -> Option<EnvironmentHandle<'_>> {
        self.active_handle().filter(|handle| handle.capability() == capability)
    }

    /// Drops whatever a plugin left in `capability`'s environment and re-centres its camera.
    pub fn clear_contents(&mut self, capability: Capability) {
        match capability {
            Capability::Canvas2D => {
                self.canvas.draw_list_mut().clear();
                self.canvas.reset_camera();
            }
            Capability::Scene3D => {
                self.scene.scene_mut().clear();
                self.scene.reset_camera();
            }
        }
    }

    /// Makes `capability` the single active environment.
    ///
    /// On failure no environment is active and the error is returned unchanged to the caller.
    pub fn switch_to(&mut self, capability: Capability) -> Result<()> {
        if self.shut_down {
            return Err(HostError::EnvironmentDisposed(capability));
        }
        if self.active == Some(capability) && self.environment(capability).core().is_active() {
            return Ok(());
        }
        if let Some(current) = self.active.take() {
            self.retire(current);
        }
        if self.environment(capability).state() == EnvironmentState::Disposed {
            log::debug!("[env:{capability}] replacing disposed environment");
            match capability {
                Capability::Canvas2D => self.canvas = Canvas2DEnvironment::new(),
                Capability::Scene3D => self.scene = Scene3DEnvironment::new(),
            }
        }

        let (size, theme) = (self.size, self.theme.clone());
        let Self { surface, canvas, scene, .. } = self;
        let target: &mut dyn RenderingEnvironment = match capability {
            Capability::Canvas2D => canvas,
            Capability::Scene3D => scene,
        };
        let outcome = target.initialize(surface.as_mut(), size, &theme).and_then(|()| target.activate(surface.as_mut()));
        if let Err(source) = outcome {
            target.teardown(surface.as_mut(), EnvironmentState::Inactive);
            log::error!("[env:{capability}] switch failed: {source:#}");
            return Err(HostError::EnvironmentInit { capability, source });
        }
        self.active = Some(capability);
        self.switches += 1;
        log::info!("[env] switched to {capability}");
        Ok(())
    }

    /// Tears down the active environment, leaving none active.
    pub fn deactivate(&mut self) {
        if let Some(current) = self.active.take() {
            self.retire(current);
        }
    }

    pub fn resize(&mut self, size: SurfaceSize) {
        self.size = size;
        let Self { surface, canvas, scene, .. } = self;
        canvas.handle_resize(surface.as_mut(), size);
        scene.handle_resize(surface.as_mut(), size);
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.canvas.apply_theme(&theme);
        self.scene.apply_theme(&theme);
        self.theme = theme;
    }

    pub fn reset_camera(&mut self) {
        if let Some(mut handle) = self.active_handle() {
            handle.reset_camera();
        }
    }

    /// Routes a platform event to the active environment if it bound that event kind.
    pub fn handle_event(&mut self, event: &SurfaceEvent) -> bool {
        match self.active {
            Some(Capability::Canvas2D) => self.canvas.handle_event(event),
            Some(Capability::Scene3D) => self.scene.handle_event(event),
            None => false,
        }
    }

    /// Presents a frame from `capability`; a no-op unless that environment is active.
    pub fn present(&mut self, capability: Capability) -> bool {
        let Self { surface, canvas, scene, .. } = self;
        match capability {
            Capability::Canvas2D => canvas.present(surface.as_mut()),
            Capability::Scene3D => scene.present(surface.as_mut()),
        }
    }

    /// Disposes both environments. The manager refuses further switches afterwards.
    pub fn shutdown(&mut self) {
        self.active = None;
        let Self { surface, canvas, scene, .. } = self;
        canvas.teardown(surface.as_mut(), EnvironmentState::Disposed);
        scene.teardown(surface.as_mut(), EnvironmentState::Disposed);
        self.shut_down = true;
    }

    fn retire(&mut self, capability: Capability) {
        let next_state =
            if self.policy.reuse_environments { EnvironmentState::Inactive } else { EnvironmentState::Disposed };
        let Self { surface, canvas, scene, .. } = self;
        let env: &mut dyn RenderingEnvironment = match capability {
            Capability::Canvas2D => canvas,
            Capability::Scene3D => scene,
        };
        env.teardown(surface.as_mut(), next_state);
    }

    fn environment(&self, capability: Capability) -> &dyn RenderingEnvironment {
        match capability {
            Capability::Canvas2D => &self.canvas,
            Capability::Scene3D => &self.scene,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::HeadlessSurface;

    fn manager() -> (EnvironmentManager, HeadlessSurface) {
        let headless = HeadlessSurface::new();
        let manager = EnvironmentManager::new(Box::new(headless.clone()), SurfaceSize::new(320, 200), Theme::dark());
        (manager, headless)
    }

    #[test]
    fn switching_is_exclusive() {
        let (mut envs, headless) = manager();
        envs.switch_to(Capability::Canvas2D).unwrap();
        assert_eq!(envs.state_of(Capability::Canvas2D), EnvironmentState::Active);
        envs.switch_to(Capability::Scene3D).unwrap();
        assert_eq!(envs.state_of(Capability::Canvas2D), EnvironmentState::Inactive);
        assert_eq!(envs.state_of(Capability::Scene3D), EnvironmentState::Active);
        assert_eq!(headless.live_contexts(), 1);
        assert_eq!(headless.attached_capability(), Some(Capability::Scene3D));
    }

    #[test]
    fn switching_to_the_active_environment_is_a_noop() {
        let (mut envs, headless) = manager();
        envs.switch_to(Capability::Scene3D).unwrap();
        envs.switch_to(Capability::Scene3D).unwrap();
        assert_eq!(envs.switch_count(), 1);
        assert_eq!(headless.contexts_created(), 1);
    }

    #[test]
    fn failed_initialization_leaves_nothing_active() {
        let (mut envs, headless) = manager();
        envs.switch_to(Capability::Canvas2D).unwrap();
        headless.fail_next_context(Capability::Scene3D);
        let err = envs.switch_to(Capability::Scene3D).unwrap_err();
        assert!(matches!(err, HostError::EnvironmentInit { capability: Capability::Scene3D, .. }));
        assert_eq!(envs.active_capability(), None);
        assert_eq!(headless.live_contexts(), 0);
        assert_eq!(headless.live_bindings(), 0);
    }

    #[test]
    fn non_reusing_policy_disposes_and_recreates() {
        let (envs, headless) = manager();
        let mut envs = envs.with_policy(EnvironmentPolicy { reuse_environments: false });
        envs.switch_to(Capability::Canvas2D).unwrap();
        envs.switch_to(Capability::Scene3D).unwrap();
        assert_eq!(envs.state_of(Capability::Canvas2D), EnvironmentState::Disposed);
        envs.switch_to(Capability::Canvas2D).unwrap();
        assert_eq!(envs.state_of(Capability::Canvas2D), EnvironmentState::Active);
        assert_eq!(headless.live_contexts(), 1);
    }

    #[test]
    fn late_frames_are_ignored() {
        let (mut envs, headless) = manager();
        envs.switch_to(Capability::Canvas2D).unwrap();
        assert!(envs.present(Capability::Canvas2D));
        envs.switch_to(Capability::Scene3D).unwrap();
        assert!(!envs.present(Capability::Canvas2D));
        assert_eq!(headless.frames_presented(), 1);
    }

    #[test]
    fn shutdown_disposes_everything() {
        let (mut envs, headless) = manager();
        envs.switch_to(Capability::Scene3D).unwrap();
        envs.shutdown();
        assert_eq!(envs.state_of(Capability::Scene3D), EnvironmentState::Disposed);
        assert_eq!(headless.live_contexts(), 0);
        assert!(matches!(envs.switch_to(Capability::Canvas2D), Err(HostError::EnvironmentDisposed(_))));
    }

    #[test]
    fn resize_reaches_the_context() {
        let (mut envs, headless) = manager();
        envs.switch_to(Capability::Canvas2D).unwrap();
        envs.resize(SurfaceSize::new(800, 600));
        let context = envs.canvas().core().context().unwrap();
        assert_eq!(headless.context_size(context), Some(SurfaceSize::new(800, 600)));
        assert_eq!(envs.canvas().core().size(), SurfaceSize::new(800, 600));
    }
}
