use std::path::{Path, PathBuf};

use gattlink_core::{BleConfig, ConfigError, ConfigOverrides};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Echo session settings file.
///
/// ```toml
/// device_name = "gattlink-echo"
/// peers = 2
/// messages = 3
///
/// [ble]
/// preset = "ble5_default"
///
/// [ble.ext_adv]
/// interval_min = 0x100
/// interval_max = 0x180
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EchoSettings {
    pub device_name: Option<String>,
    pub peers: Option<u16>,
    pub messages: Option<u16>,
    #[serde(default)]
    pub ble: ConfigOverrides,
}

impl EchoSettings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Resolves the BLE config, letting `preset` (from the command line)
    /// win over the file.
    pub fn ble_config(&self, preset: Option<&str>) -> Result<BleConfig, SettingsError> {
        let mut overrides = self.ble.clone();
        if let Some(preset) = preset {
            overrides.preset = Some(preset.to_string());
        }
        Ok(overrides.into_config()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gattlink_core::Preset;

    #[test]
    fn parses_nested_ble_overrides() {
        let settings = EchoSettings::from_toml_str(
            r#"
device_name = "bench"
peers = 3

[ble]
preset = "ble5_ultra_perf"

[ble.controller]
tx_power_dbm = 3
"#,
        )
        .expect("settings parse");
        assert_eq!(settings.device_name.as_deref(), Some("bench"));
        assert_eq!(settings.peers, Some(3));
        assert_eq!(settings.messages, None);

        let config = settings.ble_config(None).expect("config");
        assert_eq!(config.preset, Preset::Ble5UltraPerf);
        assert_eq!(config.controller.tx_power_dbm, 3);
    }

    #[test]
    fn command_line_preset_wins() {
        let settings = EchoSettings::from_toml_str("[ble]\npreset = \"ble5_default\"\n")
            .expect("settings parse");
        let config = settings.ble_config(Some("ble4_low_power")).expect("config");
        assert_eq!(config.preset, Preset::Ble4LowPower);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = EchoSettings::load(Path::new("/definitely/not/here.toml"))
            .expect_err("missing file");
        assert!(matches!(err, SettingsError::Read { .. }));
    }
}
