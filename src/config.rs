use crate::surface::{SurfaceSize, Theme};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct SurfaceConfig {
    #[serde(default = "SurfaceConfig::default_width")]
    pub width: u32,
    #[serde(default = "SurfaceConfig::default_height")]
    pub height: u32,
    #[serde(default = "SurfaceConfig::default_pixel_ratio")]
    pub device_pixel_ratio: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound for the elapsed time handed to animation callbacks.
    #[serde(default = "SchedulerConfig::default_max_delta")]
    pub max_delta_seconds: f32,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PluginsConfig {
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "SessionConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "RenderConfig::default_mode")]
    pub default_mode: String,
    #[serde(default = "RenderConfig::default_shadows")]
    pub shadows: bool,
    /// Keep switched-away environments around as `Inactive` rather than disposing them.
    #[serde(default = "RenderConfig::default_reuse")]
    pub reuse_environments: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub surface: SurfaceConfig,
    #[serde(default = "AppConfig::default_theme")]
    pub theme: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Default)]
pub struct AppConfigOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub plugin: Option<String>,
    pub theme: Option<String>,
    pub frames: Option<u32>,
}

impl SurfaceConfig {
    const fn default_width() -> u32 {
        1280
    }

    const fn default_height() -> u32 {
        720
    }

    const fn default_pixel_ratio() -> f32 {
        1.0
    }

    pub fn size(&self) -> SurfaceSize {
        SurfaceSize { width: self.width, height: self.height, pixel_ratio: self.device_pixel_ratio }
    }
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            width: Self::default_width(),
            height: Self::default_height(),
            device_pixel_ratio: Self::default_pixel_ratio(),
        }
    }
}

impl SchedulerConfig {
    const fn default_max_delta() -> f32 {
        0.25
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_delta_seconds: Self::default_max_delta() }
    }
}

impl SessionConfig {
    const fn default_enabled() -> bool {
        true
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { enabled: Self::default_enabled(), path: None }
    }
}

impl RenderConfig {
    fn default_mode() -> String {
        crate::render_modes::DEFAULT_MODE.to_string()
    }

    const fn default_shadows() -> bool {
        true
    }

    const fn default_reuse() -> bool {
        true
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            default_mode: Self::default_mode(),
            shadows: Self::default_shadows(),
            reuse_environments: Self::default_reuse(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surface: SurfaceConfig::default(),
            theme: Self::default_theme(),
            scheduler: SchedulerConfig::default(),
            plugins: PluginsConfig::default(),
            session: SessionConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl AppConfig {
    fn default_theme() -> String {
        "dark".to_string()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("[config] {err:#}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &AppConfigOverrides) {
        if let Some(width) = overrides.width {
            self.surface.width = width;
        }
        if let Some(height) = overrides.height {
            self.surface.height = height;
        }
        if let Some(plugin) = &overrides.plugin {
            self.plugins.default = Some(plugin.clone());
        }
        if let Some(theme) = &overrides.theme {
            self.theme = theme.clone();
        }
    }

    /// Resolves the configured theme name, falling back to the dark theme.
    pub fn resolved_theme(&self) -> Theme {
        Theme::by_name(&self.theme).unwrap_or_else(|| {
            log::warn!("[config] unknown theme '{}', using dark", self.theme);
            Theme::dark()
        })
    }

    pub fn is_plugin_disabled(&self, id: &str) -> bool {
        self.plugins.disabled.iter().any(|disabled| disabled == id)
    }
}

impl AppConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.width.is_none()
            && self.height.is_none()
            && self.plugin.is_none()
            && self.theme.is_none()
            && self.frames.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.width.is_some() {
            fields.push("width");
        }
        if self.height.is_some() {
            fields.push("height");
        }
        if self.plugin.is_some() {
            fields.push("plugin");
        }
        if self.theme.is_some() {
            fields.push("theme");
        }
        if self.frames.is_some() {
            fields.push("frames");
        }
        fields
    }
}
