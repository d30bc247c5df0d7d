//! Configuration management for the gateway
//!
//! Handles loading, parsing and validating the YAML configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::device::http::HttpOptions;
use crate::device::streamdeck::tcp_proxy::StreamDeckTcpOptions;
use crate::device::streamdeck::StreamDeckOptions;
use crate::error::GatewayError;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// Controller bridge API
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_api_port(),
        }
    }
}

/// Bitmap rendering
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RenderConfig {
    /// Extra directories searched for the bundled fonts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub font_paths: Vec<PathBuf>,
}

/// One configured input device
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub id: String,
    #[serde(flatten)]
    pub kind: DeviceKind,
}

/// Device variant and its options
///
/// ```yaml
/// - id: desk
///   type: stream_deck_tcp
///   options:
///     ip: 10.0.0.20
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", content = "options", rename_all = "snake_case")]
pub enum DeviceKind {
    StreamDeck(StreamDeckOptions),
    StreamDeckTcp(StreamDeckTcpOptions),
    Http(HttpOptions),
}

impl DeviceKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::StreamDeck(_) => "stream_deck",
            Self::StreamDeckTcp(_) => "stream_deck_tcp",
            Self::Http(_) => "http",
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<(), GatewayError> {
        let mut ids = HashSet::new();

        for (index, device) in self.devices.iter().enumerate() {
            if device.id.trim().is_empty() {
                return Err(GatewayError::Config(format!("Device {} id cannot be empty", index)));
            }
            if !ids.insert(device.id.as_str()) {
                return Err(GatewayError::Config(format!("Duplicate device id '{}'", device.id)));
            }

            let brightness = match &device.kind {
                DeviceKind::StreamDeck(options) => options.brightness,
                DeviceKind::StreamDeckTcp(options) => {
                    if options.feedback_cache_limit == Some(0) {
                        return Err(GatewayError::Config(format!(
                            "Device '{}' feedback_cache_limit must be at least 1",
                            device.id
                        )));
                    }
                    options.brightness
                }
                DeviceKind::Http(_) => None,
            };
            if let Some(brightness) = brightness.filter(|b| *b > 100) {
                return Err(GatewayError::Config(format!(
                    "Device '{}' has invalid brightness {} (must be 0-100)",
                    device.id, brightness
                )));
            }
        }

        Ok(())
    }
}

fn default_true() -> bool { true }
fn default_api_port() -> u16 { crate::api::DEFAULT_API_PORT }

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r##"
api:
  port: 9000
render:
  font_paths: [/opt/fonts]
devices:
  - id: desk
    type: stream_deck
    options:
      serial_number: CL123
      brightness: 70
      style_presets:
        - id: live:active
          background_color: "#c00000"
  - id: stage
    type: stream_deck_tcp
    options:
      ip: 10.0.0.20
  - id: web
    type: http
    options:
      port: 5001
"##;

    fn parse(yaml: &str) -> AppConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = AppConfig::load(file.path()).await.unwrap();
        assert!(config.api.enabled);
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.render.font_paths, vec![PathBuf::from("/opt/fonts")]);
        assert_eq!(config.devices.len(), 3);

        match &config.devices[0].kind {
            DeviceKind::StreamDeck(options) => {
                assert_eq!(options.serial_number.as_deref(), Some("CL123"));
                assert_eq!(options.brightness, Some(70));
                assert_eq!(options.style_presets[0].id, "live:active");
            }
            other => panic!("unexpected kind {:?}", other),
        }
        match &config.devices[1].kind {
            DeviceKind::StreamDeckTcp(options) => {
                assert_eq!(options.ip.as_deref(), Some("10.0.0.20"));
                assert_eq!(options.port, None);
            }
            other => panic!("unexpected kind {:?}", other),
        }
        assert_eq!(config.devices[2].kind.type_name(), "http");
    }

    #[tokio::test]
    async fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(&dir.path().join("nope.yaml")).await.unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"devices:\n  - id: a\n    type: http\n    options: {port: 1}\n  - id: a\n    type: http\n    options: {port: 2}\n")
            .unwrap();

        let err = AppConfig::load(file.path()).await.unwrap_err();
        assert!(err.to_string().contains("Duplicate device id 'a'"));
    }

    #[test]
    fn test_defaults() {
        let config = parse("{}");
        assert!(config.api.enabled);
        assert_eq!(config.api.port, crate::api::DEFAULT_API_PORT);
        assert!(config.devices.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_device_type_rejected() {
        let result: Result<AppConfig, _> =
            serde_yaml::from_str("devices:\n  - id: x\n    type: midi\n    options: {}\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let empty_id = parse("devices:\n  - id: ''\n    type: http\n    options: {port: 1}\n");
        assert!(matches!(empty_id.validate(), Err(GatewayError::Config(_))));

        let too_bright = parse("devices:\n  - id: d\n    type: stream_deck\n    options: {brightness: 150}\n");
        let err = too_bright.validate().unwrap_err();
        assert!(err.to_string().contains("invalid brightness 150"));

        let no_cache = parse("devices:\n  - id: d\n    type: stream_deck_tcp\n    options: {ip: x, feedback_cache_limit: 0}\n");
        assert!(matches!(no_cache.validate(), Err(GatewayError::Config(_))));
    }
}
