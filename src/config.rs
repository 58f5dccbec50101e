use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{HostError, Result};

pub const DEFAULT_UPDATE_RATE: u32 = 30;
pub const MAX_UPDATE_RATE: u32 = 60;
pub const MIN_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub trace: bool,
    pub verbose: bool,
    /// Log every decoded envelope.
    pub dump: bool,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub update_rate: u32,
    pub buffer_size: usize,
    pub preset_paths: Vec<PathBuf>,
    pub preset_save_dir: Option<PathBuf>,
    pub prefix_plugin_name: bool,
    pub show_hidden: bool,
    pub print_controls: bool,
    pub preset: Option<String>,
    pub controls: Vec<String>,
    pub log: LogConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            update_rate: DEFAULT_UPDATE_RATE,
            buffer_size: MIN_BUFFER_SIZE,
            preset_paths: default_preset_paths(),
            preset_save_dir: None,
            prefix_plugin_name: true,
            show_hidden: false,
            print_controls: false,
            preset: None,
            controls: vec![],
            log: LogConfig::default(),
        }
    }
}

fn default_preset_paths() -> Vec<PathBuf> {
    dirs::home_dir()
        .map(|home| vec![home.join(".lv2")])
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlAssignment {
    pub symbol: String,
    pub value: String,
}

pub fn parse_control_arg(arg: &str) -> Result<ControlAssignment> {
    let (symbol, value) = arg
        .split_once('=')
        .ok_or_else(|| HostError::Config(format!("Expected symbol=value, got '{arg}'")))?;
    let symbol = symbol.trim();
    if symbol.is_empty() {
        return Err(HostError::Config(format!("Missing control symbol in '{arg}'")));
    }
    Ok(ControlAssignment {
        symbol: symbol.to_string(),
        value: value.trim().to_string(),
    })
}

impl HostConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// UI update rate in Hz, limited to what a UI can usefully show.
    pub fn effective_update_rate(&self) -> u32 {
        self.update_rate.clamp(1, MAX_UPDATE_RATE)
    }

    pub fn effective_buffer_size(&self) -> usize {
        self.buffer_size.max(MIN_BUFFER_SIZE)
    }

    pub fn save_dir(&self) -> PathBuf {
        self.preset_save_dir
            .clone()
            .or_else(|| self.preset_paths.first().cloned())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Valid `controls` entries. Malformed ones are logged and skipped.
    pub fn assignments(&self) -> Vec<ControlAssignment> {
        self.controls
            .iter()
            .filter_map(|arg| match parse_control_arg(arg) {
                Ok(assignment) => Some(assignment),
                Err(e) => {
                    warn!("Ignoring control assignment: {e}");
                    None
                }
            })
            .collect()
    }
}
