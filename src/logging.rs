/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Log categories
//!
//! Hosts configure logging per category with `NAME:SEVERITY` pairs separated
//! by whitespace, e.g. `"APP:DBG PLUGIN:WARNING BRIDGE:30"`. Severities are
//! names or numbers on the host's scale and are converted to
//! [`LevelFilter`]s:
//!
//! | name                      | number   | level   |
//! |---------------------------|----------|---------|
//! | `TRACE`                   |          | trace   |
//! | `DBG`, `DEBUG`            | `<= 10`  | debug   |
//! | `INFO`                    | `11..=20`| info    |
//! | `WARN`, `WARNING`         | `21..=30`| warn    |
//! | `ERR`, `ERROR`, `CRIT`    | `> 30`   | error   |
//! | `NONE`, `OFF`             |          | off     |
//!
//! Categories this crate does not log under (`SHADER`, `VIDEO`, ...) are
//! accepted and ignored.

use log::{debug, LevelFilter};
use thiserror::Error;

/// Overrides the configured categories when set
pub const CATEGORIES_ENV: &str = "WEBNODE_LOG_CATEGORIES";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoggingError {
    #[error("Invalid category entry '{0}': expected NAME:SEVERITY")]
    Malformed(String),

    #[error("Unknown severity '{severity}' for {category}")]
    UnknownSeverity { category: String, severity: String },

    #[error("Failed to install logger: {0}")]
    Init(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    App,
    Config,
    Events,
    Plugin,
    Bridge,
    Renderer,
    Supervisor,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::App,
        Category::Config,
        Category::Events,
        Category::Plugin,
        Category::Bridge,
        Category::Renderer,
        Category::Supervisor,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Category::App => "APP",
            Category::Config => "CONFIG",
            Category::Events => "EVENTS",
            Category::Plugin => "PLUGIN",
            Category::Bridge => "BRIDGE",
            Category::Renderer => "RENDERER",
            Category::Supervisor => "SUPERVISOR",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
    }

    /// Log targets covered by the category
    pub fn targets(self) -> &'static [&'static str] {
        match self {
            Category::App => &["webnode::app"],
            Category::Config => &["webnode::config", "webnode::logging"],
            Category::Events => &["webnode::scene"],
            Category::Plugin => &["webnode::plugin"],
            Category::Bridge => &["webnode::bridge"],
            Category::Renderer => &["webnode::renderer", "webnode::engine"],
            Category::Supervisor => &["webnode::supervisor", "webnode::node"],
        }
    }
}

/// Convert a host severity, named or numeric
pub fn parse_severity(severity: &str) -> Option<LevelFilter> {
    let severity = severity.trim();
    if let Ok(n) = severity.parse::<i64>() {
        return Some(match n {
            n if n <= 10 => LevelFilter::Debug,
            11..=20 => LevelFilter::Info,
            21..=30 => LevelFilter::Warn,
            _ => LevelFilter::Error,
        });
    }
    let level = match severity.to_ascii_uppercase().as_str() {
        "TRACE" => LevelFilter::Trace,
        "DBG" | "DEBUG" => LevelFilter::Debug,
        "INFO" => LevelFilter::Info,
        "WARN" | "WARNING" => LevelFilter::Warn,
        "ERR" | "ERROR" | "CRIT" | "CRITICAL" => LevelFilter::Error,
        "NONE" | "OFF" => LevelFilter::Off,
        _ => return None,
    };
    Some(level)
}

/// Parsed category configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryFilter {
    levels: Vec<(Category, LevelFilter)>,
    ignored: Vec<String>,
}

impl CategoryFilter {
    pub fn parse(input: &str) -> Result<Self, LoggingError> {
        let mut filter = CategoryFilter::default();
        for entry in input.split_whitespace() {
            let (name, severity) = entry
                .split_once(':')
                .ok_or_else(|| LoggingError::Malformed(entry.to_string()))?;
            let level = parse_severity(severity).ok_or_else(|| LoggingError::UnknownSeverity {
                category: name.to_string(),
                severity: severity.to_string(),
            })?;

            match Category::from_name(name) {
                Some(category) => {
                    filter.levels.retain(|(c, _)| *c != category);
                    filter.levels.push((category, level));
                }
                None => filter.ignored.push(name.to_string()),
            }
        }
        Ok(filter)
    }

    pub fn level(&self, category: Category) -> Option<LevelFilter> {
        self.levels
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, level)| *level)
    }

    /// Category names that were not recognised
    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }

    /// `env_logger` filter string with `default` for everything else
    pub fn directives(&self, default: LevelFilter) -> String {
        let mut parts = vec![default.as_str().to_ascii_lowercase()];
        for (category, level) in &self.levels {
            for target in category.targets() {
                parts.push(format!("{}={}", target, level.as_str().to_ascii_lowercase()));
            }
        }
        parts.join(",")
    }
}

/// Install the global logger.
///
/// `RUST_LOG` wins over everything; otherwise the categories come from
/// [`CATEGORIES_ENV`] or `categories`.
pub fn init(default_level: &str, categories: &str) -> Result<CategoryFilter, LoggingError> {
    let configured = std::env::var(CATEGORIES_ENV).unwrap_or_else(|_| categories.to_string());
    let filter = CategoryFilter::parse(&configured)?;

    let default = default_level
        .parse::<LevelFilter>()
        .ok()
        .or_else(|| parse_severity(default_level))
        .ok_or_else(|| LoggingError::UnknownSeverity {
            category: "default level".to_string(),
            severity: default_level.to_string(),
        })?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(filter.directives(default)),
    )
    .format_timestamp_millis()
    .try_init()
    .map_err(|e| LoggingError::Init(e.to_string()))?;

    for name in filter.ignored() {
        debug!("Ignoring unknown log category {}", name);
    }
    Ok(filter)
}
