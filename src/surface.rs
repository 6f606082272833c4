//! The single output surface every environment renders into.
//!
//! [`SurfaceBackend`] is the platform seam: it hands out drawing contexts, records event
//! bindings and tracks which context is attached to the visible surface. [`HeadlessSurface`]
//! is the in-process implementation used by the binary and the tests.

use crate::environment::Capability;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
    #[serde(default = "SurfaceSize::default_pixel_ratio")]
    pub pixel_ratio: f32,
}

impl SurfaceSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, pixel_ratio: 1.0 }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    fn default_pixel_ratio() -> f32 {
        1.0
    }
}

impl Default for SurfaceSize {
    fn default() -> Self {
        Self::new(1280, 720)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub name: String,
    pub background: [f32; 3],
    pub foreground: [f32; 3],
    pub accent: [f32; 3],
}

impl Theme {
    pub fn dark() -> Self {
        Self {
            name: "dark".to_string(),
            background: [0.07, 0.07, 0.09],
            foreground: [0.92, 0.92, 0.95],
            accent: [0.25, 0.62, 1.0],
        }
    }

    pub fn light() -> Self {
        Self {
            name: "light".to_string(),
            background: [0.96, 0.96, 0.97],
            foreground: [0.1, 0.1, 0.12],
            accent: [0.0, 0.45, 0.85],
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "dark" => Some(Self::dark()),
            "light" => Some(Self::light()),
            _ => None,
        }
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::dark()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceEventKind {
    PointerDown,
    PointerMove,
    PointerUp,
    Wheel,
    DoubleClick,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SurfaceEvent {
    PointerDown { x: f32, y: f32 },
    PointerMove { x: f32, y: f32 },
    PointerUp { x: f32, y: f32 },
    Wheel { delta: f32 },
    DoubleClick { x: f32, y: f32 },
}

impl SurfaceEvent {
    pub fn kind(&self) -> SurfaceEventKind {
        match self {
            SurfaceEvent::PointerDown { .. } => SurfaceEventKind::PointerDown,
            SurfaceEvent::PointerMove { .. } => SurfaceEventKind::PointerMove,
            SurfaceEvent::PointerUp { .. } => SurfaceEventKind::PointerUp,
            SurfaceEvent::Wheel { .. } => SurfaceEventKind::Wheel,
            SurfaceEvent::DoubleClick { .. } => SurfaceEventKind::DoubleClick,
        }
    }
}

pub trait SurfaceBackend {
    fn create_context(&mut self, capability: Capability, size: SurfaceSize) -> Result<ContextId>;
    fn release_context(&mut self, context: ContextId);
    fn resize_context(&mut self, context: ContextId, size: SurfaceSize);
    fn bind_event(&mut self, context: ContextId, kind: SurfaceEventKind) -> BindingId;
    fn unbind_event(&mut self, binding: BindingId);
    fn attach(&mut self, context: ContextId);
    fn detach(&mut self, context: ContextId);
    /// Submits one frame. Returns false when the context is unknown or not attached.
    fn present(&mut self, context: ContextId, commands: usize) -> bool;
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_id: u64,
    contexts: BTreeMap<ContextId, (Capability, SurfaceSize)>,
    bindings: BTreeMap<BindingId, (ContextId, SurfaceEventKind)>,
    attached: Option<ContextId>,
    frames: u64,
    submitted_commands: u64,
    fail_next: HashSet<Capability>,
    fail_always: HashSet<Capability>,
    created: u64,
}

impl HeadlessState {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Surface that keeps every allocation in memory.
///
/// Clones share state, so a test can keep one clone for inspection while the environment
/// manager owns another.
#[derive(Debug, Clone, Default)]
pub struct HeadlessSurface {
    state: Rc<RefCell<HeadlessState>>,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_contexts(&self) -> usize {
        self.state.borrow().contexts.len()
    }

    pub fn live_contexts_for(&self, capability: Capability) -> usize {
        self.state.borrow().contexts.values().filter(|(cap, _)| *cap == capability).count()
    }

    pub fn live_bindings(&self) -> usize {
        self.state.borrow().bindings.len()
    }

    pub fn contexts_created(&self) -> u64 {
        self.state.borrow().created
    }

    pub fn attached(&self) -> Option<ContextId> {
        self.state.borrow().attached
    }

    pub fn attached_capability(&self) -> Option<Capability> {
        let state = self.state.borrow();
        state.attached.and_then(|id| state.contexts.get(&id).map(|(cap, _)| *cap))
    }

    pub fn context_size(&self, context: ContextId) -> Option<SurfaceSize> {
        self.state.borrow().contexts.get(&context).map(|(_, size)| *size)
    }

    pub fn frames_presented(&self) -> u64 {
        self.state.borrow().frames
    }

    pub fn commands_submitted(&self) -> u64 {
        self.state.borrow().submitted_commands
    }

    /// The next context request for `capability` fails once.
    pub fn fail_next_context(&self, capability: Capability) {
        self.state.borrow_mut().fail_next.insert(capability);
    }

    /// Every context request for `capability` fails until cleared.
    pub fn set_context_failure(&self, capability: Capability, fail: bool) {
        let mut state = self.state.borrow_mut();
        if fail {
            state.fail_always.insert(capability);
        } else {
            state.fail_always.remove(&capability);
        }
    }
}

impl SurfaceBackend for HeadlessSurface {
    fn create_context(&mut self, capability: Capability, size: SurfaceSize) -> Result<ContextId> {
        let mut state = self.state.borrow_mut();
        if state.fail_next.remove(&capability) || state.fail_always.contains(&capability) {
            bail!("{capability} context unavailable on this surface");
        }
        let id = ContextId(state.next());
        state.contexts.insert(id, (capability, size));
        state.created += 1;
        Ok(id)
    }

    fn release_context(&mut self, context: ContextId) {
        let mut state = self.state.borrow_mut();
        if state.attached == Some(context) {
            state.attached = None;
        }
        if state.contexts.remove(&context).is_none() {
            log::trace!("[surface] release of unknown context {context:?}");
        }
    }

    fn resize_context(&mut self, context: ContextId, size: SurfaceSize) {
        if let Some((_, current)) = self.state.borrow_mut().contexts.get_mut(&context) {
            *current = size;
        }
    }

    fn bind_event(&mut self, context: ContextId, kind: SurfaceEventKind) -> BindingId {
        let mut state = self.state.borrow_mut();
        let id = BindingId(state.next());
        state.bindings.insert(id, (context, kind));
        id
    }

    fn unbind_event(&mut self, binding: BindingId) {
        self.state.borrow_mut().bindings.remove(&binding);
    }

    fn attach(&mut self, context: ContextId) {
        let mut state = self.state.borrow_mut();
        if state.contexts.contains_key(&context) {
            state.attached = Some(context);
        }
    }

    fn detach(&mut self, context: ContextId) {
        let mut state = self.state.borrow_mut();
        if state.attached == Some(context) {
            state.attached = None;
        }
    }

    fn present(&mut self, context: ContextId, commands: usize) -> bool {
        let mut state = self.state.borrow_mut();
        if state.attached != Some(context) {
            return false;
        }
        state.frames += 1;
        state.submitted_commands += commands as u64;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releasing_a_context_keeps_forgotten_bindings_visible() {
        let headless = HeadlessSurface::new();
        let mut surface = headless.clone();
        let ctx = surface.create_context(Capability::Canvas2D, SurfaceSize::default()).unwrap();
        let wheel = surface.bind_event(ctx, SurfaceEventKind::Wheel);
        surface.bind_event(ctx, SurfaceEventKind::PointerDown);
        surface.attach(ctx);
        assert_eq!(headless.attached(), Some(ctx));
        surface.unbind_event(wheel);
        surface.release_context(ctx);
        assert_eq!(headless.live_contexts(), 0);
        assert_eq!(headless.attached(), None);
        assert_eq!(headless.live_bindings(), 1, "a binding nobody removed is a leak");
    }

    #[test]
    fn failure_injection_is_one_shot() {
        let mut surface = HeadlessSurface::new();
        surface.fail_next_context(Capability::Scene3D);
        assert!(surface.create_context(Capability::Scene3D, SurfaceSize::default()).is_err());
        assert!(surface.create_context(Capability::Scene3D, SurfaceSize::default()).is_ok());
    }

    #[test]
    fn present_requires_attachment() {
        let mut surface = HeadlessSurface::new();
        let ctx = surface.create_context(Capability::Canvas2D, SurfaceSize::default()).unwrap();
        assert!(!surface.present(ctx, 4));
        surface.attach(ctx);
        assert!(surface.present(ctx, 4));
        assert_eq!(surface.frames_presented(), 1);
        assert_eq!(surface.commands_submitted(), 4);
    }
}
