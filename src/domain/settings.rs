use crate::domain::gatt;
use crate::domain::models::{ScanFilter, ScanningMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "ble_discovery".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Exact local name to match, empty for no filter
    #[serde(default)]
    pub name_filter: String,
    /// Advertised service UUID to match (full or 16-bit short form),
    /// empty for no filter
    #[serde(default)]
    pub service_filter: String,
    #[serde(default)]
    pub scanning_mode: ScanningMode,
}

impl ScanSettings {
    pub fn to_filter(&self) -> anyhow::Result<ScanFilter> {
        let name = Some(self.name_filter.trim())
            .filter(|n| !n.is_empty())
            .map(str::to_string);

        let service_uuid = match self.service_filter.trim() {
            "" => None,
            raw => Some(
                gatt::parse_uuid(raw)
                    .map_err(|e| anyhow::anyhow!("Invalid service filter {:?}: {}", raw, e))?,
            ),
        };

        Ok(ScanFilter {
            name,
            service_uuid,
            mode: self.scanning_mode,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_enumerations: usize,
    #[serde(default = "default_enumeration_timeout_ms")]
    pub enumeration_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub echo_advertisements: bool,
    #[serde(default = "default_true")]
    pub show_descriptions: bool,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            max_concurrent_enumerations: default_max_concurrent(),
            enumeration_timeout_ms: default_enumeration_timeout_ms(),
            echo_advertisements: default_true(),
            show_descriptions: default_true(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl DiscoverySettings {
    pub fn enumeration_timeout(&self) -> Duration {
        Duration::from_millis(self.enumeration_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Concurrency cap, never below one
    pub fn concurrency_limit(&self) -> usize {
        self.max_concurrent_enumerations.max(1)
    }
}

fn default_max_concurrent() -> usize {
    8
}
fn default_enumeration_timeout_ms() -> u64 {
    10_000
}
fn default_shutdown_grace_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,
    #[serde(default)]
    pub scan: ScanSettings,
    #[serde(default)]
    pub discovery: DiscoverySettings,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
    load_error: Option<String>,
}

impl SettingsService {
    /// Load from the per-user config directory
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    /// Load from an explicit file. A missing file yields defaults; an
    /// unreadable or malformed one also yields defaults and is recorded in
    /// [`SettingsService::load_error`].
    pub fn from_path(settings_path: PathBuf) -> Self {
        let (settings, load_error) = match Self::load_from_file(&settings_path) {
            Ok(settings) => (settings, None),
            Err(_) if !settings_path.exists() => (Settings::default(), None),
            Err(e) => (
                Settings::default(),
                Some(format!(
                    "Ignoring unreadable settings at {}: {}",
                    settings_path.display(),
                    e
                )),
            ),
        };

        Self {
            settings,
            settings_path,
            load_error,
        }
    }

    /// Why the settings file was ignored, if it was. Loading happens before
    /// logging is set up, so the caller reports this.
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BleDiscovery");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
