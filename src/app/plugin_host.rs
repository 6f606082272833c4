use super::plugin_runtime::{ActivePlugin, PluginRuntime};
use crate::config::AppConfig;
use crate::environment::{Capability, EnvironmentHandle, EnvironmentManager, EnvironmentPolicy};
use crate::error::{HostError, Result};
use crate::params::{
    ChangeCause, ListenerId, ListenerOwner, ParameterGroupKind, ParameterGroupView, ParameterListener,
    ParameterStore, ParameterValue,
};
use crate::plugins::{ActionDescriptor, PluginDescriptor, PluginRegistry, RenderSettings, VisualizationPlugin};
use crate::render_modes::{AppliedMode, ApplyOptions};
use crate::scheduler::{
    AnimationHandle, AnimationScheduler, ContinuousCallback, OneShotCallback, RequestOwner, TickReport,
};
use crate::session::SessionState;
use crate::surface::{SurfaceBackend, SurfaceEvent, SurfaceSize, Theme};
use crate::ui::{PluginListing, UiBridge, DEFAULT_NOTIFICATION};
use std::collections::HashMap;

/// Upper bound on parameter changes delivered in one drain.
const MAX_CHANGE_CASCADE: usize = 4_096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Unregistered,
    Registered,
    Loading,
    Active,
    Unloading,
}

#[derive(Debug, Clone)]
pub struct HostSettings {
    pub size: SurfaceSize,
    pub theme: Theme,
    pub max_delta_seconds: f32,
    pub policy: EnvironmentPolicy,
    pub render: RenderSettings,
    pub default_plugin: Option<String>,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            size: SurfaceSize::default(),
            theme: Theme::default(),
            max_delta_seconds: 0.25,
            policy: EnvironmentPolicy::default(),
            render: RenderSettings::default(),
            default_plugin: None,
        }
    }
}

impl HostSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            size: config.surface.size(),
            theme: config.resolved_theme(),
            max_delta_seconds: config.scheduler.max_delta_seconds,
            policy: EnvironmentPolicy { reuse_environments: config.render.reuse_environments },
            render: RenderSettings { default_mode: config.render.default_mode.clone(), shadows: config.render.shadows },
            default_plugin: config.plugins.default.clone(),
        }
    }
}

/// Owns the plugin lifecycle: which plugin is active, which environment it is bound to and
/// who hears about parameter changes.
pub struct PluginHost {
    registry: PluginRegistry,
    states: HashMap<String, PluginState>,
    scheduler: AnimationScheduler<PluginRuntime>,
    runtime: PluginRuntime,
    session: Option<SessionState>,
    default_plugin: Option<String>,
    shut_down: bool,
}

impl PluginHost {
    pub fn new(surface: Box<dyn SurfaceBackend>, ui: Box<dyn UiBridge>, settings: HostSettings) -> Self {
        let environments =
            EnvironmentManager::new(surface, settings.size, settings.theme).with_policy(settings.policy);
        Self {
            registry: PluginRegistry::new(),
            states: HashMap::new(),
            scheduler: AnimationScheduler::new(settings.max_delta_seconds),
            runtime: PluginRuntime::new(environments, ui, settings.render),
            session: None,
            default_plugin: settings.default_plugin,
            shut_down: false,
        }
    }

    pub fn with_session(mut self, session: SessionState) -> Self {
        self.session = Some(session);
        self
    }

    pub fn register<F>(&mut self, descriptor: PluginDescriptor, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn VisualizationPlugin> + 'static,
    {
        let id = descriptor.id.clone();
        self.registry.register(descriptor, factory)?;
        self.states.insert(id.clone(), PluginState::Registered);
        log::debug!("[plugin:{id}] registered");
        self.publish_plugins();
        Ok(())
    }

    pub fn set_plugin_enabled(&mut self, id: &str, enabled: bool) -> Result<()> {
        self.registry.set_enabled(id, enabled)?;
        if !enabled && self.active_plugin_id() == Some(id) {
            self.deactivate()?;
        }
        self.publish_plugins();
        Ok(())
    }

    pub fn plugins(&self) -> Vec<PluginListing> {
        self.registry.listings()
    }

    pub fn descriptor(&self, id: &str) -> Option<&PluginDescriptor> {
        self.registry.descriptor(id)
    }

    pub fn active_plugin_id(&self) -> Option<&str> {
        self.runtime.active_plugin_id()
    }

    pub fn state_of(&self, id: &str) -> PluginState {
        if !self.registry.contains(id) {
            return PluginState::Unregistered;
        }
        self.states.get(id).copied().unwrap_or(PluginState::Registered)
    }

    pub fn environments(&self) -> &EnvironmentManager {
        &self.runtime.environments
    }

    pub fn params(&self) -> &ParameterStore {
        &self.runtime.params
    }

    pub fn runtime(&self) -> &PluginRuntime {
        &self.runtime
    }

    pub fn scheduler(&self) -> &AnimationScheduler<PluginRuntime> {
        &self.scheduler
    }

    pub fn session(&self) -> Option<&SessionState> {
        self.session.as_ref()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Makes `id` the single active plugin.
    ///
    /// A plugin that fails to come up is unloaded and the previously active plugin, if
    /// any, gets exactly one attempt to come back.
    pub fn activate(&mut self, id: &str) -> Result<()> {
        if self.active_plugin_id() == Some(id) {
            return Ok(());
        }
        if let Err(err) = self.check_activatable(id) {
            self.runtime.ui.show_error(&err.to_string());
            return Err(err);
        }
        let rollback_candidate = self.active_plugin_id().map(str::to_string);
        let outcome = match self.try_activate(id) {
            Ok(()) => Ok(()),
            Err(cause) => Err(self.recover(id, cause, rollback_candidate)),
        };
        self.runtime.ui.hide_loading();
        self.publish_plugins();
        outcome
    }

    /// Unloads the active plugin and deactivates its environment. Calling it with nothing
    /// active is a no-op.
    pub fn deactivate(&mut self) -> Result<()> {
        if self.unload_active() {
            self.runtime.environments.deactivate();
            if let Some(session) = self.session.as_mut() {
                session.set_active_plugin(None);
            }
            self.publish_plugins();
        }
        Ok(())
    }

    /// Returns `Ok(false)` when no active parameter has that id.
    pub fn set_parameter(
        &mut self,
        id: &str,
        value: impl Into<ParameterValue>,
        group: Option<ParameterGroupKind>,
    ) -> Result<bool> {
        match self.runtime.params.set(id, value.into(), group) {
            Ok(applied) => {
                if applied {
                    self.deliver_parameter_changes();
                    self.flush_deferred();
                }
                Ok(applied)
            }
            Err(err) => {
                self.runtime.ui.show_error(&err.to_string());
                Err(err)
            }
        }
    }

    /// Restores defaults for `groups` (every group when `None`) with one notification per
    /// parameter in schema order.
    pub fn reset_parameters(&mut self, groups: Option<&[ParameterGroupKind]>) -> usize {
        let restored = self.runtime.params.reset(groups);
        self.deliver_parameter_changes();
        self.flush_deferred();
        restored
    }

    pub fn parameter(&self, id: &str) -> Option<&ParameterValue> {
        self.runtime.params.get(id)
    }

    pub fn parameter_groups(&self) -> Vec<ParameterGroupView> {
        self.runtime.params.views()
    }

    pub fn add_parameter_listener(&mut self, listener: ParameterListener) -> ListenerId {
        self.runtime.params.add_listener(ListenerOwner::External, listener)
    }

    pub fn remove_parameter_listener(&mut self, id: ListenerId) -> bool {
        self.runtime.params.remove_listener(id)
    }

    pub fn actions(&self) -> &[ActionDescriptor] {
        self.runtime.actions()
    }

    /// Routes an action to the active plugin. Returns whether it was handled.
    pub fn execute_action(&mut self, id: &str, args: &[ParameterValue]) -> bool {
        let Some(plugin_id) = self.active_plugin_id().map(str::to_string) else {
            log::warn!("[plugin] action '{id}' ignored: no active plugin");
            return false;
        };
        if !self.runtime.actions().iter().any(|action| action.id == id) {
            log::warn!("[plugin:{plugin_id}] unknown action '{id}'");
            return false;
        }
        let handled = match self.runtime.with_plugin(|plugin, ctx| plugin.execute_action(ctx, id, args)) {
            Some(Ok(handled)) => handled,
            Some(Err(err)) => {
                log::error!("[plugin:{plugin_id}] action '{id}' failed: {err:#}");
                self.runtime.ui.show_error(&format!("Action '{id}' failed: {err}"));
                false
            }
            None => false,
        };
        self.deliver_parameter_changes();
        self.request_render();
        self.flush_deferred();
        self.publish_actions();
        handled
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.runtime.environments.set_theme(theme.clone());
        self.call_hook("theme hook", |plugin, ctx| plugin.on_theme_changed(ctx, &theme));
        if let Some(session) = self.session.as_mut() {
            session.set_theme(&theme.name);
        }
        self.request_render();
        self.flush_deferred();
    }

    pub fn resize(&mut self, size: SurfaceSize) {
        self.runtime.environments.resize(size);
        self.call_hook("resize hook", |plugin, ctx| plugin.on_resize(ctx, size));
        self.request_render();
        self.flush_deferred();
    }

    pub fn reset_camera(&mut self) {
        self.runtime.environments.reset_camera();
        self.request_render();
        self.flush_deferred();
    }

    /// Forwards a platform event to the active environment.
    pub fn handle_event(&mut self, event: &SurfaceEvent) -> bool {
        let handled = self.runtime.environments.handle_event(event);
        if handled {
            self.request_render();
            self.flush_deferred();
        }
        handled
    }

    /// Options seeded from the render settings and the current theme.
    pub fn default_apply_options(&self) -> ApplyOptions {
        ApplyOptions {
            shadows: self.runtime.render.shadows,
            accent: self.runtime.environments.theme().accent,
            ..ApplyOptions::default()
        }
    }

    /// Swaps the render mode of the active 3D plugin's mesh group.
    pub fn apply_render_mode(&mut self, mode: &str, options: &ApplyOptions) -> Result<AppliedMode> {
        let runtime = &mut self.runtime;
        let Some(active) = runtime.active.as_ref() else {
            return Err(HostError::EnvironmentUnavailable(Capability::Scene3D));
        };
        let group = active.instance.mesh_group();
        let Some(EnvironmentHandle::Scene(scene)) = runtime.environments.handle_for(Capability::Scene3D) else {
            return Err(HostError::EnvironmentUnavailable(Capability::Scene3D));
        };
        let target = group.unwrap_or_else(|| scene.scene_root());
        let applied = runtime.compositor.apply_mode(scene.scene_mut(), target, mode, options);
        self.request_render();
        self.flush_deferred();
        Ok(applied)
    }

    pub fn request_animation(&mut self, callback: ContinuousCallback<PluginRuntime>) -> AnimationHandle {
        self.scheduler.request_animation(RequestOwner::External, callback)
    }

    pub fn request_frame(&mut self, callback: OneShotCallback<PluginRuntime>) -> AnimationHandle {
        self.scheduler.request_frame(RequestOwner::External, callback)
    }

    /// Unknown handles are ignored.
    pub fn cancel_animation(&mut self, handle: AnimationHandle) -> bool {
        self.scheduler.cancel_animation(handle) || self.scheduler.cancel_frame(handle)
    }

    pub fn is_animating(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Drives one scheduler tick at `now` seconds.
    pub fn frame(&mut self, now: f64) -> TickReport {
        self.flush_deferred();
        let report = self.scheduler.tick(now, &mut self.runtime);
        self.deliver_parameter_changes();
        self.flush_deferred();
        report
    }

    /// Re-applies the stored theme and activates the stored plugin, falling back to the
    /// configured default. Returns the plugin active afterwards.
    pub fn restore_session(&mut self) -> Option<String> {
        let stored_theme = self.session.as_ref().and_then(SessionState::theme);
        if let Some(theme) = stored_theme.as_deref().and_then(Theme::by_name) {
            if theme != *self.runtime.environments.theme() {
                self.set_theme(theme);
            }
        }
        let stored = self.session.as_ref().and_then(SessionState::active_plugin);
        let mut candidates: Vec<String> = stored.into_iter().collect();
        if let Some(default) = self.default_plugin.clone() {
            if !candidates.contains(&default) {
                candidates.push(default);
            }
        }
        for candidate in candidates {
            if !self.registry.contains(&candidate) || !self.registry.is_enabled(&candidate) {
                log::debug!("[session] skipping unavailable plugin '{candidate}'");
                continue;
            }
            match self.activate(&candidate) {
                Ok(()) => return Some(candidate),
                Err(err) => log::warn!("[session] could not restore '{candidate}': {err}"),
            }
        }
        self.active_plugin_id().map(str::to_string)
    }

    /// Unloads the active plugin and disposes both environments. Further activations fail.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.unload_active();
        self.scheduler.clear();
        self.runtime.deferred.take();
        self.runtime.render_pending = false;
        let scene_id = self.runtime.environments.scene().scene().id();
        self.runtime.compositor.forget(scene_id);
        self.runtime.environments.shutdown();
        self.shut_down = true;
        log::info!("[host] shut down");
    }

    fn check_activatable(&self, id: &str) -> Result<()> {
        if !self.registry.contains(id) {
            return Err(HostError::UnknownPlugin(id.to_string()));
        }
        if !self.registry.is_enabled(id) {
            return Err(HostError::PluginDisabled(id.to_string()));
        }
        Ok(())
    }

    fn try_activate(&mut self, id: &str) -> Result<()> {
        let descriptor = self.registry.descriptor(id).cloned().ok_or_else(|| HostError::UnknownPlugin(id.to_string()))?;
        self.runtime.ui.show_loading(&format!("Loading {}", descriptor.name));
        self.unload_active();
        self.set_state(id, PluginState::Loading);

        if let Err(err) = self.runtime.environments.switch_to(descriptor.capability) {
            self.set_state(id, PluginState::Registered);
            return Err(err);
        }
        let instance = match self.registry.instantiate(id) {
            Ok(instance) => instance,
            Err(err) => {
                self.set_state(id, PluginState::Registered);
                return Err(err);
            }
        };
        self.runtime.active = Some(ActivePlugin {
            id: id.to_string(),
            capability: descriptor.capability,
            instance,
            actions: Vec::new(),
        });

        let loaded = self.runtime.with_plugin(|plugin, ctx| plugin.load(ctx)).unwrap_or(Ok(()));
        if let Err(source) = loaded {
            log::error!("[plugin:{id}] load failed: {source:#}");
            self.unload_active();
            return Err(HostError::LoadFailed { id: id.to_string(), source });
        }

        self.restore_parameters(id);
        self.deliver_parameter_changes();
        if let Some(Err(source)) = self.runtime.with_plugin(|plugin, ctx| plugin.render(ctx)) {
            log::error!("[plugin:{id}] first render failed: {source:#}");
            self.unload_active();
            return Err(HostError::LoadFailed { id: id.to_string(), source });
        }
        self.runtime.present();
        self.flush_deferred();

        self.set_state(id, PluginState::Active);
        if let Some(session) = self.session.as_mut() {
            session.set_active_plugin(Some(id));
        }
        self.publish_parameters();
        self.publish_actions();
        self.runtime.ui.show_notification(&format!("{} ready", descriptor.name), DEFAULT_NOTIFICATION);
        log::info!("[plugin:{id}] active on {}", descriptor.capability);
        Ok(())
    }

    /// Turns an activation failure into the reported error, trying the rollback candidate
    /// once on the way.
    fn recover(&mut self, requested: &str, cause: HostError, rollback_candidate: Option<String>) -> HostError {
        log::error!("[plugin:{requested}] activation failed: {cause}");
        let mut rolled_back_to = None;
        if let Some(previous) = rollback_candidate.filter(|previous| previous != requested) {
            match self.try_activate(&previous) {
                Ok(()) => {
                    log::info!("[plugin:{previous}] restored after failed switch to '{requested}'");
                    rolled_back_to = Some(previous);
                }
                Err(err) => log::error!("[plugin:{previous}] rollback failed: {err}"),
            }
        }
        if rolled_back_to.is_none() && self.active_plugin_id().is_none() {
            self.runtime.environments.deactivate();
        }
        let err = HostError::ActivationFailed { requested: requested.to_string(), rolled_back_to, cause: Box::new(cause) };
        self.runtime.ui.show_error(&err.to_string());
        err
    }

    /// Cancels the active plugin's animations, drops its listeners and runs its cleanup
    /// hook. Returns false when nothing was active.
    fn unload_active(&mut self) -> bool {
        let Some((id, capability)) = self.runtime.active.as_ref().map(|active| (active.id.clone(), active.capability))
        else {
            return false;
        };
        self.set_state(&id, PluginState::Unloading);
        let cancelled = self.scheduler.cancel_owned_by(&id) + self.runtime.deferred.discard_owned_by(&id);
        let listeners = self.runtime.params.remove_listeners_owned_by(&id);
        if let Some(Err(err)) = self.runtime.with_plugin(|plugin, ctx| plugin.unload(ctx)) {
            log::warn!("[plugin:{id}] cleanup failed: {err:#}");
        }
        // The cleanup hook may have queued work of its own.
        self.runtime.deferred.discard_owned_by(&id);
        self.runtime.params.remove_listeners_owned_by(&id);
        self.runtime.active = None;
        self.runtime.render_pending = false;
        self.runtime.params.clear();

        if capability == Capability::Scene3D {
            let runtime = &mut self.runtime;
            let removed = runtime.compositor.clear(runtime.environments.scene_mut().scene_mut());
            log::trace!("[plugin:{id}] removed {removed} render-mode object(s)");
        }
        self.runtime.environments.clear_contents(capability);
        self.set_state(&id, PluginState::Registered);
        self.runtime.ui.update_actions(&[]);
        self.runtime.ui.update_parameter_groups(&[]);
        log::debug!("[plugin:{id}] unloaded ({cancelled} request(s) cancelled, {listeners} listener(s) removed)");
        true
    }

    fn restore_parameters(&mut self, id: &str) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        for stored in session.parameters(id) {
            let outcome =
                self.runtime.params.set_with_cause(&stored.id, stored.value, Some(stored.group), ChangeCause::Restore);
            if let Err(err) = outcome {
                log::debug!("[session] ignoring stored value for '{}': {err}", stored.id);
            }
        }
    }

    fn deliver_parameter_changes(&mut self) {
        let mut delivered = 0;
        while let Some(change) = self.runtime.params.pop_pending() {
            delivered += 1;
            if delivered > MAX_CHANGE_CASCADE {
                log::warn!("[params] change cascade exceeded {MAX_CHANGE_CASCADE}, dropping the rest");
                while self.runtime.params.pop_pending().is_some() {}
                break;
            }
            self.runtime.dispatch_parameter_change(&change);
            if change.cause != ChangeCause::Restore {
                if let (Some(session), Some(plugin)) = (self.session.as_mut(), self.runtime.active_plugin_id()) {
                    session.save_parameter(plugin, &change);
                }
            }
        }
        if delivered > 0 {
            self.request_render();
            self.publish_parameters();
        }
    }

    fn call_hook(
        &mut self,
        label: &str,
        f: impl FnOnce(&mut dyn VisualizationPlugin, &mut crate::plugins::PluginContext<'_>) -> anyhow::Result<()>,
    ) {
        if let Some(Err(err)) = self.runtime.with_plugin(f) {
            let id = self.active_plugin_id().unwrap_or("?");
            log::warn!("[plugin:{id}] {label} failed: {err:#}");
        }
        self.deliver_parameter_changes();
    }

    /// Queues one render of the active plugin for the next frame. Further requests coalesce
    /// into it until it runs.
    fn request_render(&mut self) {
        if self.runtime.render_pending {
            return;
        }
        let Some(id) = self.active_plugin_id().map(str::to_string) else {
            return;
        };
        let callback = PluginRuntime::queued_render_callback(id.clone());
        self.runtime.deferred.request_frame(RequestOwner::Plugin(id), callback);
        self.runtime.render_pending = true;
    }

    fn flush_deferred(&mut self) {
        if self.runtime.deferred.is_empty() {
            return;
        }
        let requests = self.runtime.deferred.take();
        self.scheduler.apply(requests);
    }

    fn set_state(&mut self, id: &str, state: PluginState) {
        self.states.insert(id.to_string(), state);
    }

    fn publish_plugins(&mut self) {
        let listings = self.registry.listings();
        let active = self.active_plugin_id().map(str::to_string);
        self.runtime.ui.update_plugins(&listings, active.as_deref());
    }

    fn publish_parameters(&mut self) {
        let views = self.runtime.params.views();
        self.runtime.ui.update_parameter_groups(&views);
    }

    fn publish_actions(&mut self) {
        let actions = self.runtime.actions().to_vec();
        self.runtime.ui.update_actions(&actions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::HookPlugin;
    use crate::surface::HeadlessSurface;
    use crate::ui::RecordingUi;

    fn host() -> (PluginHost, HeadlessSurface, RecordingUi) {
        let surface = HeadlessSurface::new();
        let ui = RecordingUi::new();
        let host = PluginHost::new(Box::new(surface.clone()), Box::new(ui.clone()), HostSettings::default());
        (host, surface, ui)
    }

    #[test]
    fn load_failure_without_candidate_leaves_nothing_active() {
        let (mut host, surface, ui) = host();
        host.register(PluginDescriptor::new("broken", "Broken", Capability::Scene3D), || {
            Box::new(HookPlugin::new().on_load(|_| anyhow::bail!("no geometry")))
        })
        .unwrap();
        let err = host.activate("broken").unwrap_err();
        assert!(matches!(err, HostError::ActivationFailed { rolled_back_to: None, .. }));
        assert_eq!(host.active_plugin_id(), None);
        assert_eq!(host.environments().active_capability(), None);
        assert_eq!(surface.live_contexts(), 0);
        assert_eq!(host.state_of("broken"), PluginState::Registered);
        assert_eq!(ui.errors().len(), 1);
    }

    #[test]
    fn unknown_and_disabled_plugins_are_validation_errors() {
        let (mut host, _surface, ui) = host();
        host.register(PluginDescriptor::new("circle", "Circle", Capability::Canvas2D), || Box::new(HookPlugin::new()))
            .unwrap();
        host.set_plugin_enabled("circle", false).unwrap();
        assert!(matches!(host.activate("ghost"), Err(HostError::UnknownPlugin(_))));
        assert!(matches!(host.activate("circle"), Err(HostError::PluginDisabled(_))));
        assert_eq!(ui.errors().len(), 2);
        assert_eq!(host.state_of("ghost"), PluginState::Unregistered);
    }

    #[test]
    fn panicking_load_is_treated_as_failure() {
        let (mut host, _surface, _ui) = host();
        host.register(PluginDescriptor::new("panics", "Panics", Capability::Canvas2D), || {
            Box::new(HookPlugin::new().on_load(|_| panic!("boom")))
        })
        .unwrap();
        let err = host.activate("panics").unwrap_err();
        assert!(matches!(err.root_cause(), HostError::LoadFailed { .. }));
    }
}
