/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! webnode application configuration

use crate::node::NodeOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid resolution '{0}': expected WIDTHxHEIGHT")]
    InvalidResolution(String),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Main webnode configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebnodeConfig {
    /// Application window
    #[serde(default)]
    pub app: AppConfig,

    /// Browser plugin and engine
    #[serde(default)]
    pub plugin: PluginConfig,

    /// The browser node shown by the app
    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl WebnodeConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_str(&contents)
    }

    /// Load configuration from string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: WebnodeConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.app.resolution()?;
        if !(0.0..=1.0).contains(&self.node.volume) {
            return Err(ConfigError::Invalid {
                field: "node.volume",
                reason: format!("{} is outside 0.0..=1.0", self.node.volume),
            });
        }
        if self.node.id.is_empty() {
            return Err(ConfigError::Invalid {
                field: "node.id",
                reason: "must not be empty".to_string(),
            });
        }
        if self.node.width == Some(0) || self.node.height == Some(0) {
            return Err(ConfigError::Invalid {
                field: "node.size",
                reason: "width and height must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Node options; the node fills the window unless sized explicitly
    pub fn node_options(&self) -> Result<NodeOptions, ConfigError> {
        let (width, height) = self.app.resolution()?;
        let node = &self.node;
        Ok(NodeOptions::new(
            node.id.clone(),
            node.width.unwrap_or(width),
            node.height.unwrap_or(height),
        )
        .with_position(node.x, node.y)
        .with_transparent(node.transparent)
        .with_mouse_input(node.mouse_input)
        .with_keyboard_input(node.keyboard_input)
        .with_scrollbars(node.scrollbars)
        .with_volume(node.volume)
        .with_zoom(node.zoom))
    }
}

/// Application window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,

    /// Window size as `WIDTHxHEIGHT`
    #[serde(default = "default_resolution")]
    pub resolution: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            resolution: default_resolution(),
        }
    }
}

impl AppConfig {
    pub fn resolution(&self) -> Result<(u32, u32), ConfigError> {
        let invalid = || ConfigError::InvalidResolution(self.resolution.clone());
        let (w, h) = self.resolution.split_once(['x', 'X']).ok_or_else(invalid)?;
        let w: u32 = w.trim().parse().map_err(|_| invalid())?;
        let h: u32 = h.trim().parse().map_err(|_| invalid())?;
        if w == 0 || h == 0 {
            return Err(invalid());
        }
        Ok((w, h))
    }
}

fn default_name() -> String {
    "webnode".to_string()
}

fn default_resolution() -> String {
    "1024x600".to_string()
}

/// Which engine backend renders the pages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Engine threads inside this process
    #[default]
    Headless,
    /// One helper process per renderer
    Process,
}

/// Browser plugin configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Plugin name
    #[serde(default = "default_plugin_name")]
    pub name: String,

    #[serde(default)]
    pub backend: BackendKind,

    /// Engine helper binary (defaults to this executable)
    pub helper: Option<PathBuf>,

    /// Simulated page load time in milliseconds
    #[serde(default)]
    pub load_delay_ms: u64,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            name: default_plugin_name(),
            backend: BackendKind::default(),
            helper: None,
            load_delay_ms: 0,
        }
    }
}

impl PluginConfig {
    pub fn load_delay(&self) -> Duration {
        Duration::from_millis(self.load_delay_ms)
    }
}

fn default_plugin_name() -> String {
    "webnode-engine".to_string()
}

/// Browser node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_node_id")]
    pub id: String,

    /// URL or local path to load at startup
    pub url: Option<String>,

    #[serde(default)]
    pub x: f32,

    #[serde(default)]
    pub y: f32,

    /// Width (defaults to the window width)
    pub width: Option<u32>,

    /// Height (defaults to the window height)
    pub height: Option<u32>,

    #[serde(default)]
    pub transparent: bool,

    #[serde(default = "default_true")]
    pub mouse_input: bool,

    #[serde(default = "default_true")]
    pub keyboard_input: bool,

    #[serde(default = "default_true")]
    pub scrollbars: bool,

    #[serde(default = "default_volume")]
    pub volume: f64,

    #[serde(default)]
    pub zoom: i32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: default_node_id(),
            url: None,
            x: 0.0,
            y: 0.0,
            width: None,
            height: None,
            transparent: false,
            mouse_input: true,
            keyboard_input: true,
            scrollbars: true,
            volume: default_volume(),
            zoom: 0,
        }
    }
}

fn default_node_id() -> String {
    "cef".to_string()
}

fn default_true() -> bool {
    true
}

fn default_volume() -> f64 {
    1.0
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level for everything not covered by a category
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `NAME:SEVERITY` pairs, e.g. `"APP:DBG PLUGIN:WARNING"`
    #[serde(default)]
    pub categories: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            categories: String::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
