//! Plugin contract: descriptors, the hook trait and the factory registry.

use crate::app::PluginRuntime;
use crate::environment::{Canvas2DEnvironment, Capability, EnvironmentHandle, Scene3DEnvironment};
use crate::error::{HostError, Result as HostResult};
use crate::params::{ParameterChange, ParameterDef, ParameterGroupKind, ParameterStore, ParameterValue};
use crate::render_modes::{AppliedMode, ApplyOptions, ModeProperties, RenderModeCompositor};
use crate::scene::NodeId;
use crate::scheduler::{AnimationHandle, DeferredRequests, RequestOwner};
use crate::surface::{SurfaceSize, Theme};
use crate::ui::{PluginListing, UiBridge, DEFAULT_NOTIFICATION};
use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "renderingCapability")]
    pub capability: Capability,
}

impl PluginDescriptor {
    pub fn new(id: &str, name: &str, capability: Capability) -> Self {
        Self { id: id.to_string(), name: name.to_string(), description: String::new(), capability }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
}

impl ActionDescriptor {
    pub fn new(id: &str, label: &str) -> Self {
        Self { id: id.to_string(), label: label.to_string(), description: String::new() }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Render-mode defaults handed to plugins.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub default_mode: String,
    pub shadows: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self { default_mode: crate::render_modes::DEFAULT_MODE.to_string(), shadows: true }
    }
}

/// Everything a hook may touch while it runs.
pub struct PluginContext<'a> {
    plugin_id: &'a str,
    environment: Option<EnvironmentHandle<'a>>,
    pub params: &'a mut ParameterStore,
    pub compositor: &'a mut RenderModeCompositor,
    pub ui: &'a mut dyn UiBridge,
    pub render: &'a RenderSettings,
    animations: &'a mut DeferredRequests<PluginRuntime>,
    actions: &'a mut Vec<ActionDescriptor>,
}

impl<'a> PluginContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        plugin_id: &'a str,
        environment: Option<EnvironmentHandle<'a>>,
        params: &'a mut ParameterStore,
        compositor: &'a mut RenderModeCompositor,
        ui: &'a mut dyn UiBridge,
        render: &'a RenderSettings,
        animations: &'a mut DeferredRequests<PluginRuntime>,
        actions: &'a mut Vec<ActionDescriptor>,
    ) -> Self {
        Self { plugin_id, environment, params, compositor, ui, render, animations, actions }
    }

    pub fn plugin_id(&self) -> &str {
        self.plugin_id
    }

    /// Capability of the bound environment, `None` while it is not active.
    pub fn capability(&self) -> Option<Capability> {
        self.environment.as_ref().map(EnvironmentHandle::capability)
    }

    pub fn canvas(&mut self) -> Option<&mut Canvas2DEnvironment> {
        match self.environment.as_mut()? {
            EnvironmentHandle::Canvas(canvas) => Some(&mut **canvas),
            EnvironmentHandle::Scene(_) => None,
        }
    }

    pub fn scene(&mut self) -> Option<&mut Scene3DEnvironment> {
        match self.environment.as_mut()? {
            EnvironmentHandle::Scene(scene) => Some(&mut **scene),
            EnvironmentHandle::Canvas(_) => None,
        }
    }

    pub fn reset_camera(&mut self) {
        if let Some(environment) = self.environment.as_mut() {
            environment.reset_camera();
        }
    }

    pub fn define_parameters(&mut self, group: ParameterGroupKind, schema: Vec<ParameterDef>) -> HostResult<()> {
        self.params.define(group, schema)
    }

    /// Registers an action, replacing an earlier one with the same id.
    pub fn register_action(&mut self, action: ActionDescriptor) {
        match self.actions.iter_mut().find(|existing| existing.id == action.id) {
            Some(existing) => *existing = action,
            None => self.actions.push(action),
        }
    }

    pub fn actions(&self) -> &[ActionDescriptor] {
        self.actions
    }

    /// Keeps calling this plugin's `animate` hook every frame until it returns `false`.
    pub fn request_animation(&mut self) -> AnimationHandle {
        let owner = self.plugin_id.to_string();
        let callback = PluginRuntime::animation_callback(owner.clone());
        self.animations.request_animation(RequestOwner::Plugin(owner), callback)
    }

    /// Calls this plugin's `render` hook once on the next frame.
    pub fn request_render(&mut self) -> AnimationHandle {
        let owner = self.plugin_id.to_string();
        let callback = PluginRuntime::render_callback(owner.clone());
        self.animations.request_frame(RequestOwner::Plugin(owner), callback)
    }

    pub fn cancel_animation(&mut self, handle: AnimationHandle) {
        self.animations.cancel(handle);
    }

    pub fn notify(&mut self, message: &str) {
        self.ui.show_notification(message, DEFAULT_NOTIFICATION);
    }

    pub fn apply_options(&self) -> ApplyOptions {
        ApplyOptions { shadows: self.render.shadows, ..ApplyOptions::default() }
    }

    /// Applies a render mode to `group` in the bound scene. `None` outside a 3D environment.
    pub fn apply_render_mode(&mut self, group: NodeId, mode: &str, options: &ApplyOptions) -> Option<AppliedMode> {
        match self.environment.as_mut()? {
            EnvironmentHandle::Scene(scene) => Some(self.compositor.apply_mode(scene.scene_mut(), group, mode, options)),
            EnvironmentHandle::Canvas(_) => None,
        }
    }

    pub fn update_render_properties(&mut self, group: NodeId, props: &ModeProperties) -> usize {
        match self.environment.as_mut() {
            Some(EnvironmentHandle::Scene(scene)) => self.compositor.update_properties(props, scene.scene_mut(), group),
            _ => 0,
        }
    }
}

/// A swappable visualization. Every hook is optional.
pub trait VisualizationPlugin {
    fn load(&mut self, _ctx: &mut PluginContext<'_>) -> Result<()> {
        Ok(())
    }

    fn unload(&mut self, _ctx: &mut PluginContext<'_>) -> Result<()> {
        Ok(())
    }

    fn on_parameter_changed(&mut self, _ctx: &mut PluginContext<'_>, _change: &ParameterChange) -> Result<()> {
        Ok(())
    }

    /// Advances by `dt` seconds. Returning `false` stops the animation.
    fn animate(&mut self, _ctx: &mut PluginContext<'_>, _dt: f32) -> Result<bool> {
        Ok(false)
    }

    fn render(&mut self, _ctx: &mut PluginContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Returns `false` when the action id is not handled.
    fn execute_action(&mut self, _ctx: &mut PluginContext<'_>, _id: &str, _args: &[ParameterValue]) -> Result<bool> {
        Ok(false)
    }

    fn on_theme_changed(&mut self, _ctx: &mut PluginContext<'_>, _theme: &Theme) -> Result<()> {
        Ok(())
    }

    fn on_resize(&mut self, _ctx: &mut PluginContext<'_>, _size: SurfaceSize) -> Result<()> {
        Ok(())
    }

    /// Scene group that render modes apply to. Defaults to the scene root.
    fn mesh_group(&self) -> Option<NodeId> {
        None
    }
}

type LoadHook = Box<dyn FnMut(&mut PluginContext<'_>) -> Result<()>>;
type AnimateHook = Box<dyn FnMut(&mut PluginContext<'_>, f32) -> Result<bool>>;
type ParameterHook = Box<dyn FnMut(&mut PluginContext<'_>, &ParameterChange) -> Result<()>>;
type ActionHook = Box<dyn FnMut(&mut PluginContext<'_>, &str, &[ParameterValue]) -> Result<bool>>;

/// Plugin assembled from individual hook closures.
#[derive(Default)]
pub struct HookPlugin {
    load: Option<LoadHook>,
    unload: Option<LoadHook>,
    render: Option<LoadHook>,
    animate: Option<AnimateHook>,
    parameter: Option<ParameterHook>,
    action: Option<ActionHook>,
}

impl HookPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_load(mut self, hook: impl FnMut(&mut PluginContext<'_>) -> Result<()> + 'static) -> Self {
        self.load = Some(Box::new(hook));
        self
    }

    pub fn on_unload(mut self, hook: impl FnMut(&mut PluginContext<'_>) -> Result<()> + 'static) -> Self {
        self.unload = Some(Box::new(hook));
        self
    }

    pub fn on_render(mut self, hook: impl FnMut(&mut PluginContext<'_>) -> Result<()> + 'static) -> Self {
        self.render = Some(Box::new(hook));
        self
    }

    pub fn on_animate(mut self, hook: impl FnMut(&mut PluginContext<'_>, f32) -> Result<bool> + 'static) -> Self {
        self.animate = Some(Box::new(hook));
        self
    }

    pub fn on_parameter(
        mut self,
        hook: impl FnMut(&mut PluginContext<'_>, &ParameterChange) -> Result<()> + 'static,
    ) -> Self {
        self.parameter = Some(Box::new(hook));
        self
    }

    pub fn on_action(
        mut self,
        hook: impl FnMut(&mut PluginContext<'_>, &str, &[ParameterValue]) -> Result<bool> + 'static,
    ) -> Self {
        self.action = Some(Box::new(hook));
        self
    }
}

impl VisualizationPlugin for HookPlugin {
    fn load(&mut self, ctx: &mut PluginContext<'_>) -> Result<()> {
        self.load.as_mut().map_or(Ok(()), |hook| hook(ctx))
    }

    fn unload(&mut self, ctx: &mut PluginContext<'_>) -> Result<()> {
        self.unload.as_mut().map_or(Ok(()), |hook| hook(ctx))
    }

    fn on_parameter_changed(&mut self, ctx: &mut PluginContext<'_>, change: &ParameterChange) -> Result<()> {
        self.parameter.as_mut().map_or(Ok(()), |hook| hook(ctx, change))
    }

    fn animate(&mut self, ctx: &mut PluginContext<'_>, dt: f32) -> Result<bool> {
        self.animate.as_mut().map_or(Ok(false), |hook| hook(ctx, dt))
    }

    fn render(&mut self, ctx: &mut PluginContext<'_>) -> Result<()> {
        self.render.as_mut().map_or(Ok(()), |hook| hook(ctx))
    }

    fn execute_action(&mut self, ctx: &mut PluginContext<'_>, id: &str, args: &[ParameterValue]) -> Result<bool> {
        self.action.as_mut().map_or(Ok(false), |hook| hook(ctx, id, args))
    }
}

pub type PluginFactory = Box<dyn Fn() -> Box<dyn VisualizationPlugin>>;

struct RegistryEntry {
    descriptor: PluginDescriptor,
    factory: PluginFactory,
    enabled: bool,
}

/// Static table resolving plugin ids to descriptors and factories.
#[derive(Default)]
pub struct PluginRegistry {
    entries: Vec<RegistryEntry>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, descriptor: PluginDescriptor, factory: F) -> HostResult<()>
    where
        F: Fn() -> Box<dyn VisualizationPlugin> + 'static,
    {
        if descriptor.id.trim().is_empty() || descriptor.id.contains('.') {
            return Err(HostError::schema(&descriptor.id, "plugin ids must be non-empty and contain no '.'"));
        }
        if self.contains(&descriptor.id) {
            return Err(HostError::DuplicatePlugin(descriptor.id));
        }
        self.entries.push(RegistryEntry { descriptor, factory: Box::new(factory), enabled: true });
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entry(id).is_some()
    }

    pub fn descriptor(&self, id: &str) -> Option<&PluginDescriptor> {
        self.entry(id).map(|entry| &entry.descriptor)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.entries.iter().map(|entry| &entry.descriptor)
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.entry(id).map_or(false, |entry| entry.enabled)
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> HostResult<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.descriptor.id == id)
            .ok_or_else(|| HostError::UnknownPlugin(id.to_string()))?;
        entry.enabled = enabled;
        Ok(())
    }

    pub fn instantiate(&self, id: &str) -> HostResult<Box<dyn VisualizationPlugin>> {
        let entry = self.entry(id).ok_or_else(|| HostError::UnknownPlugin(id.to_string()))?;
        if !entry.enabled {
            return Err(HostError::PluginDisabled(id.to_string()));
        }
        Ok((entry.factory)())
    }

    pub fn listings(&self) -> Vec<PluginListing> {
        self.entries
            .iter()
            .map(|entry| PluginListing {
                id: entry.descriptor.id.clone(),
                name: entry.descriptor.name.clone(),
                description: entry.descriptor.description.clone(),
                capability: entry.descriptor.capability,
                enabled: entry.enabled,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, id: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|entry| entry.descriptor.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_accepts_both_capability_spellings() {
        let native: PluginDescriptor =
            serde_json::from_str(r#"{"id":"circle","name":"Circle","capability":"2D"}"#).expect("parse");
        let legacy: PluginDescriptor =
            serde_json::from_str(r#"{"id":"knot","name":"Knot","renderingCapability":"3D"}"#).expect("parse");
        assert_eq!(native.capability, Capability::Canvas2D);
        assert_eq!(legacy.capability, Capability::Scene3D);
        assert!(native.description.is_empty());
    }

    #[test]
    fn registry_rejects_duplicates_and_bad_ids() {
        let mut registry = PluginRegistry::new();
        registry
            .register(PluginDescriptor::new("circle", "Circle", Capability::Canvas2D), || Box::new(HookPlugin::new()))
            .expect("first registration");
        let dup = registry
            .register(PluginDescriptor::new("circle", "Again", Capability::Scene3D), || Box::new(HookPlugin::new()));
        assert!(matches!(dup, Err(HostError::DuplicatePlugin(_))));
        let bad =
            registry.register(PluginDescriptor::new("a.b", "Dotted", Capability::Scene3D), || Box::new(HookPlugin::new()));
        assert!(matches!(bad, Err(HostError::InvalidSchema { .. })));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn disabled_entries_refuse_instantiation() {
        let mut registry = PluginRegistry::new();
        registry
            .register(PluginDescriptor::new("knot", "Knot", Capability::Scene3D), || Box::new(HookPlugin::new()))
            .expect("register");
        registry.set_enabled("knot", false).expect("toggle");
        assert!(matches!(registry.instantiate("knot"), Err(HostError::PluginDisabled(_))));
        assert!(matches!(registry.instantiate("nope"), Err(HostError::UnknownPlugin(_))));
        assert!(!registry.listings()[0].enabled);
    }
}
