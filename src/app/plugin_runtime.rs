use crate::environment::{Capability, EnvironmentManager};
use crate::error::isolate;
use crate::params::{ParameterChange, ParameterStore};
use crate::plugins::{ActionDescriptor, PluginContext, RenderSettings, VisualizationPlugin};
use crate::render_modes::RenderModeCompositor;
use crate::scheduler::{ContinuousCallback, DeferredRequests, OneShotCallback};
use crate::ui::UiBridge;

pub(crate) struct ActivePlugin {
    pub(crate) id: String,
    pub(crate) capability: Capability,
    pub(crate) instance: Box<dyn VisualizationPlugin>,
    pub(crate) actions: Vec<ActionDescriptor>,
}

/// State shared between the host and scheduled callbacks.
///
/// The animation scheduler hands a `&mut PluginRuntime` to every callback, so callbacks
/// reach the active plugin through the runtime instead of holding references to it.
pub struct PluginRuntime {
    pub(crate) environments: EnvironmentManager,
    pub(crate) params: ParameterStore,
    pub(crate) compositor: RenderModeCompositor,
    pub(crate) ui: Box<dyn UiBridge>,
    pub(crate) deferred: DeferredRequests<PluginRuntime>,
    pub(crate) render: RenderSettings,
    pub(crate) active: Option<ActivePlugin>,
    /// Set while a host-requested render is queued and has not run yet.
    pub(crate) render_pending: bool,
}

impl PluginRuntime {
    pub(crate) fn new(environments: EnvironmentManager, ui: Box<dyn UiBridge>, render: RenderSettings) -> Self {
        Self {
            environments,
            params: ParameterStore::new(),
            compositor: RenderModeCompositor::with_builtin_modes(),
            ui,
            deferred: DeferredRequests::default(),
            render,
            active: None,
            render_pending: false,
        }
    }

    pub fn environments(&self) -> &EnvironmentManager {
        &self.environments
    }

    pub fn params(&self) -> &ParameterStore {
        &self.params
    }

    pub fn compositor(&self) -> &RenderModeCompositor {
        &self.compositor
    }

    pub fn active_plugin_id(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.id.as_str())
    }

    pub(crate) fn active_capability(&self) -> Option<Capability> {
        self.active.as_ref().map(|active| active.capability)
    }

    pub(crate) fn actions(&self) -> &[ActionDescriptor] {
        self.active.as_ref().map(|active| active.actions.as_slice()).unwrap_or(&[])
    }

    /// Runs `f` against the active plugin with a freshly assembled context. Panics inside
    /// the hook come back as errors. `None` when no plugin is active.
    pub(crate) fn with_plugin<R>(
        &mut self,
        f: impl FnOnce(&mut dyn VisualizationPlugin, &mut PluginContext<'_>) -> anyhow::Result<R>,
    ) -> Option<anyhow::Result<R>> {
        let Self { environments, params, compositor, ui, deferred, render, active, .. } = self;
        let active = active.as_mut()?;
        let environment = environments.handle_for(active.capability);
        let mut ctx = PluginContext::new(
            &active.id,
            environment,
            params,
            compositor,
            ui.as_mut(),
            render,
            deferred,
            &mut active.actions,
        );
        let instance = active.instance.as_mut();
        Some(isolate(|| f(instance, &mut ctx)))
    }

    pub(crate) fn animation_callback(owner: String) -> ContinuousCallback<PluginRuntime> {
        Box::new(move |runtime: &mut PluginRuntime, dt| runtime.animate_plugin(&owner, dt))
    }

    pub(crate) fn render_callback(owner: String) -> OneShotCallback<PluginRuntime> {
        Box::new(move |runtime: &mut PluginRuntime, _dt| runtime.render_plugin(&owner))
    }

    fn animate_plugin(&mut self, owner: &str, dt: f32) -> anyhow::Result<bool> {
        if self.active_plugin_id() != Some(owner) {
            log::trace!("[plugin:{owner}] dropping animation for inactive plugin");
            return Ok(false);
        }
        let Some(outcome) = self.with_plugin(|plugin, ctx| {
            let keep = plugin.animate(ctx, dt)?;
            if keep {
                plugin.render(ctx)?;
            }
            Ok(keep)
        }) else {
            return Ok(false);
        };
        let keep = outcome?;
        if keep {
            self.present();
        }
        Ok(keep)
    }

    pub(crate) fn queued_render_callback(owner: String) -> OneShotCallback<PluginRuntime> {
        Box::new(move |runtime: &mut PluginRuntime, _dt| {
            runtime.render_pending = false;
            runtime.render_plugin(&owner)
        })
    }

    fn render_plugin(&mut self, owner: &str) -> anyhow::Result<()> {
        if self.active_plugin_id() != Some(owner) {
            return Ok(());
        }
        if let Some(outcome) = self.with_plugin(|plugin, ctx| plugin.render(ctx)) {
            outcome?;
        }
        self.present();
        Ok(())
    }

    /// Presents the active plugin's environment. Dropped silently if it is no longer active.
    pub(crate) fn present(&mut self) -> bool {
        match self.active_capability() {
            Some(capability) => self.environments.present(capability),
            None => false,
        }
    }

    /// Delivers one change to the active plugin, then to registered listeners.
    pub(crate) fn dispatch_parameter_change(&mut self, change: &ParameterChange) {
        if let Some(Err(err)) = self.with_plugin(|plugin, ctx| plugin.on_parameter_changed(ctx, change)) {
            let id = self.active_plugin_id().unwrap_or("?");
            log::warn!("[plugin:{id}] parameter hook failed on '{}': {err:#}", change.id);
        }
        self.params.notify_listeners(change);
    }
}
