//! Session configuration and quick-action presets
//!
//! Values are merged from three layers, highest priority last:
//! built-in defaults, the config file, command-line overrides.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

/// Default serial device
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Default baud rate (common for Marlin/GRBL firmware)
pub const DEFAULT_BAUD: u32 = 115200;

/// Default per-poll read timeout
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Button color used when a preset does not set one
pub const DEFAULT_COLOR: &str = "#c0c0c0";

/// Resolved settings for opening a serial session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Serial device path (e.g., /dev/ttyUSB0, /dev/ttyACM0)
    pub device_path: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Upper bound on how long one receive poll waits for data
    pub read_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_path: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// A preset's payload: one line, or several sent in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Single(String),
    Sequence(Vec<String>),
}

impl CommandSpec {
    /// Lines this preset sends, in order
    pub fn lines(&self) -> Vec<String> {
        match self {
            CommandSpec::Single(line) => vec![line.clone()],
            CommandSpec::Sequence(lines) => lines.clone(),
        }
    }
}

/// Quick-action preset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEntry {
    pub title: String,
    pub command: CommandSpec,
    #[serde(default)]
    pub color: Option<String>,
}

impl CommandEntry {
    /// Display color, falling back to neutral gray
    pub fn color(&self) -> &str {
        self.color.as_deref().unwrap_or(DEFAULT_COLOR)
    }
}

/// Contents of the config file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub baud: Option<u32>,
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
    #[serde(default)]
    pub commands: Vec<CommandEntry>,
}

/// Values given on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub port: Option<String>,
    pub baud: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Yaml,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "YAML",
            ConfigFormat::Toml => "TOML",
        }
    }
}

impl FileConfig {
    /// Parse config text; the format is picked from the path's extension
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let format = ConfigFormat::from_path(path);
        let parse_err = |reason: String| ConfigError::Parse {
            path: path.to_path_buf(),
            format: format.name(),
            reason,
        };

        match format {
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| parse_err(e.to_string())),
            ConfigFormat::Yaml => {
                // An empty YAML document is null, not a mapping
                if content.trim().is_empty() {
                    return Ok(Self::default());
                }
                serde_yaml::from_str(content).map_err(|e| parse_err(e.to_string()))
            }
        }
    }

    /// Load the config file. `Ok(None)` if it does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        Self::parse(&content, path).map(Some)
    }

    /// Load the config file, falling back to an empty config on any problem
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(Some(config)) => {
                log::info!("Loaded config from {}", path.display());
                config
            }
            Ok(None) => {
                log::debug!("No config file at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                log::warn!("{}; using defaults", e);
                Self::default()
            }
        }
    }

    /// Merge defaults, this file, and command-line overrides
    pub fn resolve(&self, overrides: &Overrides) -> SessionConfig {
        let defaults = SessionConfig::default();

        SessionConfig {
            device_path: overrides
                .port
                .clone()
                .or_else(|| self.port.clone())
                .unwrap_or(defaults.device_path),
            baud_rate: overrides.baud.or(self.baud).unwrap_or(defaults.baud_rate),
            read_timeout: match self.read_timeout_ms {
                Some(0) => {
                    log::warn!(
                        "read_timeout_ms must be positive, using {} ms",
                        defaults.read_timeout.as_millis()
                    );
                    defaults.read_timeout
                }
                Some(ms) => Duration::from_millis(ms),
                None => defaults.read_timeout,
            },
        }
    }
}
