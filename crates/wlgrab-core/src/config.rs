use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Settings for one capture source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Wayland display name or socket path. Empty selects `$WAYLAND_DISPLAY`.
    #[serde(alias = "wlDisplay")]
    pub display: String,
    /// Output name as reported by xdg-output (e.g. `DP-1`).
    pub output: String,
    #[serde(alias = "showCursor")]
    pub show_cursor: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            display: String::new(),
            output: String::new(),
            show_cursor: true,
        }
    }
}

impl SourceConfig {
    /// Read a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Apply `WLGRAB_DISPLAY`, `WLGRAB_OUTPUT` and `WLGRAB_SHOW_CURSOR`.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(display) = lookup("WLGRAB_DISPLAY") {
            self.display = display;
        }
        if let Some(output) = lookup("WLGRAB_OUTPUT") {
            self.output = output;
        }
        if let Some(cursor) = lookup("WLGRAB_SHOW_CURSOR") {
            self.show_cursor = match cursor.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(ConfigError::Invalid {
                        reason: format!("WLGRAB_SHOW_CURSOR: unrecognised value '{other}'"),
                    })
                }
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_camel_case_fields() {
        let json = r#"{ "wlDisplay": "wayland-1", "output": "DP-1", "showCursor": false }"#;
        let cfg: SourceConfig = serde_json::from_str(json).expect("valid camelCase config");
        assert_eq!(cfg.display, "wayland-1");
        assert_eq!(cfg.output, "DP-1");
        assert!(!cfg.show_cursor);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let cfg: SourceConfig = serde_json::from_str(r#"{ "output": "HDMI-A-1" }"#).unwrap();
        assert_eq!(cfg.display, "");
        assert_eq!(cfg.output, "HDMI-A-1");
        assert!(cfg.show_cursor);
    }

    #[test]
    fn load_reads_file_and_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wlgrab.json");
        assert_eq!(SourceConfig::load(&path).unwrap(), SourceConfig::default());

        std::fs::write(&path, r#"{ "display": "wayland-0", "show_cursor": false }"#).unwrap();
        let cfg = SourceConfig::load(&path).unwrap();
        assert_eq!(cfg.display, "wayland-0");
        assert!(!cfg.show_cursor);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(SourceConfig::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut cfg = SourceConfig::default();
        cfg.apply_overrides(|key| match key {
            "WLGRAB_OUTPUT" => Some("eDP-1".into()),
            "WLGRAB_SHOW_CURSOR" => Some("off".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.output, "eDP-1");
        assert!(!cfg.show_cursor);

        let err = cfg
            .apply_overrides(|key| (key == "WLGRAB_SHOW_CURSOR").then(|| "maybe".into()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
