use crate::builtin::register_builtins;
use crate::config::{AppConfig, AppConfigOverrides};
use crate::session::{JsonFileStore, MemoryStore, SessionState};
use crate::surface::{HeadlessSurface, SurfaceBackend};
use crate::ui::{LogUi, UiBridge};
use anyhow::{Context, Result};

mod plugin_host;
mod plugin_runtime;
mod runtime_loop;

pub use plugin_host::{HostSettings, PluginHost, PluginState};
pub use plugin_runtime::PluginRuntime;
pub use runtime_loop::{FrameClock, RuntimeLoop, RuntimeTick};

const CONFIG_PATH: &str = "config/app.json";
const DEFAULT_FRAMES: u32 = 120;
const HEADLESS_STEP_SECONDS: f64 = 1.0 / 60.0;

pub fn run() -> Result<()> {
    run_with_overrides(AppConfigOverrides::default())
}

pub fn run_with_overrides(overrides: AppConfigOverrides) -> Result<()> {
    let mut config = AppConfig::load_or_default(CONFIG_PATH);
    if !overrides.is_empty() {
        log::info!("[config] command line overrides: {}", overrides.applied_fields().join(", "));
        config.apply_overrides(&overrides);
    }
    let frames = overrides.frames.unwrap_or(DEFAULT_FRAMES);
    let mut app = App::headless(config).context("Failed to start plugin host")?;
    let active = app.start();
    log::info!("[app] started with plugin {}", active.as_deref().unwrap_or("<none>"));
    let ran = app.run_frames(frames);
    log::info!("[app] ran {ran} frame(s), scheduler idle: {}", !app.host().is_animating());
    app.shutdown();
    Ok(())
}

/// Wires configuration, session storage and builtin plugins around a [`PluginHost`].
pub struct App {
    host: PluginHost,
    runtime: RuntimeLoop,
    config: AppConfig,
}

impl App {
    pub fn new(config: AppConfig, surface: Box<dyn SurfaceBackend>, ui: Box<dyn UiBridge>, clock: FrameClock) -> Result<Self> {
        let settings = HostSettings::from_config(&config);
        let mut host = PluginHost::new(surface, ui, settings);
        if let Some(session) = Self::open_session(&config) {
            host = host.with_session(session);
        }
        register_builtins(&mut host, &config)?;
        let runtime = RuntimeLoop::new(clock, config.scheduler.max_delta_seconds);
        Ok(Self { host, runtime, config })
    }

    /// In-process surface, log-backed UI and a fixed 60 Hz clock.
    pub fn headless(config: AppConfig) -> Result<Self> {
        Self::new(config, Box::new(HeadlessSurface::new()), Box::new(LogUi), FrameClock::fixed(HEADLESS_STEP_SECONDS))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn host(&self) -> &PluginHost {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut PluginHost {
        &mut self.host
    }

    /// Restores the previous session, or the configured default plugin.
    pub fn start(&mut self) -> Option<String> {
        self.host.restore_session()
    }

    pub fn tick(&mut self) -> RuntimeTick {
        self.runtime.tick(&mut self.host)
    }

    /// Runs up to `frames` ticks, stopping early once nothing is scheduled.
    pub fn run_frames(&mut self, frames: u32) -> u32 {
        self.runtime.run_until_idle(&mut self.host, frames)
    }

    pub fn shutdown(&mut self) {
        self.host.shutdown();
    }

    fn open_session(config: &AppConfig) -> Option<SessionState> {
        if !config.session.enabled {
            return None;
        }
        let session = match &config.session.path {
            Some(path) => SessionState::new(Box::new(JsonFileStore::open(path.clone()))),
            None => SessionState::new(Box::new(MemoryStore::new())),
        };
        Some(session)
    }
}
