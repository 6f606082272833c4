use crate::config::AppConfigOverrides;
use anyhow::{anyhow, bail, Context, Result};
use std::env;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliOverrides {
    width: Option<u32>,
    height: Option<u32>,
    plugin: Option<String>,
    theme: Option<String>,
    frames: Option<u32>,
}

impl CliOverrides {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = CliOverrides::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            let Some(key) = flag.strip_prefix("--") else {
                bail!("Unexpected argument '{flag}'. Flags take the form --name value.");
            };
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "width" => {
                    overrides.width =
                        Some(value.parse::<u32>().with_context(|| format!("Invalid width '{value}'"))?);
                }
                "height" => {
                    overrides.height =
                        Some(value.parse::<u32>().with_context(|| format!("Invalid height '{value}'"))?);
                }
                "frames" => {
                    overrides.frames =
                        Some(value.parse::<u32>().with_context(|| format!("Invalid frame count '{value}'"))?);
                }
                "plugin" => overrides.plugin = Some(non_empty("plugin", value)?),
                "theme" => overrides.theme = Some(non_empty("theme", value)?),
                _ => bail!(
                    "Unknown flag '{flag}'. Supported flags: --width, --height, --plugin, --theme, --frames."
                ),
            }
        }
        Ok(overrides)
    }

    pub fn into_config_overrides(self) -> AppConfigOverrides {
        AppConfigOverrides {
            width: self.width,
            height: self.height,
            plugin: self.plugin,
            theme: self.theme,
            frames: self.frames,
        }
    }
}

fn non_empty(flag: &str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        bail!("--{flag} needs a non-empty value");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_flag() {
        let args = ["app", "--width", "1600", "--height", "900", "--plugin", "knot", "--theme", "light", "--frames", "30"];
        let overrides = CliOverrides::parse(args).expect("parse overrides").into_config_overrides();
        assert_eq!(overrides.width, Some(1600));
        assert_eq!(overrides.height, Some(900));
        assert_eq!(overrides.plugin.as_deref(), Some("knot"));
        assert_eq!(overrides.theme.as_deref(), Some("light"));
        assert_eq!(overrides.frames, Some(30));
    }

    #[test]
    fn latest_flag_wins() {
        let args = ["app", "--width", "800", "--width", "1920", "--plugin", "circle", "--plugin", "knot"];
        let overrides = CliOverrides::parse(args).expect("parse overrides").into_config_overrides();
        assert_eq!(overrides.width, Some(1920));
        assert_eq!(overrides.plugin.as_deref(), Some("knot"));
        assert_eq!(overrides.height, None);
    }

    #[test]
    fn missing_value_errors() {
        let err = CliOverrides::parse(["app", "--width"]).unwrap_err();
        assert!(err.to_string().contains("Expected a value"), "error should mention missing value");
    }

    #[test]
    fn rejects_unknown_flags() {
        let err = CliOverrides::parse(["app", "--vsync", "on"]).unwrap_err();
        assert!(err.to_string().contains("Unknown flag"), "unknown flags should error");
    }

    #[test]
    fn rejects_empty_plugin() {
        assert!(CliOverrides::parse(["app", "--plugin", " "]).is_err());
    }
}
