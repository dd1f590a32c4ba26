/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Process-wide browser plugin state
//!
//! The engine plugin is loaded once per process and shared by every browser
//! node. Each live renderer handle holds a [`PluginLease`]; the registry can
//! only be cleaned up once all leases are gone, and only once.

use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors from plugin registry operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("No browser plugin is loaded")]
    NotLoaded,

    #[error("Plugin '{loaded}' is already loaded, refusing to load '{requested}'")]
    AlreadyLoaded { loaded: String, requested: String },

    #[error("Cannot clean up the browser plugin while {0} renderer handle(s) are alive")]
    HandlesAlive(usize),

    #[error("Browser plugin was already cleaned up")]
    AlreadyCleanedUp,
}

/// Identifies the shared engine binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    /// Short plugin name used in log output
    pub name: String,
    /// Path of the engine binary
    pub path: PathBuf,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[derive(Debug)]
enum PluginState {
    Unloaded,
    Loaded(PluginDescriptor),
    CleanedUp,
}

/// Reference-counted owner of the process-wide plugin
#[derive(Debug)]
pub struct PluginRegistry {
    state: Mutex<PluginState>,
    live: AtomicUsize,
    peak: AtomicUsize,
    crashes: AtomicUsize,
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PluginState::Unloaded),
            live: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            crashes: AtomicUsize::new(0),
        })
    }

    fn state(&self) -> MutexGuard<'_, PluginState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Load the plugin. Loading the same plugin again is a no-op that returns
    /// `Ok(false)`.
    pub fn load(&self, descriptor: PluginDescriptor) -> Result<bool, PluginError> {
        let mut state = self.state();
        match &*state {
            PluginState::Loaded(current) if *current == descriptor => {
                debug!("Plugin '{}' already loaded", descriptor.name);
                Ok(false)
            }
            PluginState::Loaded(current) => Err(PluginError::AlreadyLoaded {
                loaded: current.name.clone(),
                requested: descriptor.name,
            }),
            PluginState::CleanedUp => Err(PluginError::AlreadyCleanedUp),
            PluginState::Unloaded => {
                info!(
                    "Loading browser plugin '{}' from {}",
                    descriptor.name,
                    descriptor.path.display()
                );
                *state = PluginState::Loaded(descriptor);
                Ok(true)
            }
        }
    }

    /// Whether a plugin is currently loaded
    pub fn is_loaded(&self) -> bool {
        matches!(*self.state(), PluginState::Loaded(_))
    }

    /// The loaded plugin, if any
    pub fn plugin(&self) -> Option<PluginDescriptor> {
        match &*self.state() {
            PluginState::Loaded(descriptor) => Some(descriptor.clone()),
            _ => None,
        }
    }

    /// Take a lease for one renderer handle
    pub fn acquire(self: &Arc<Self>) -> Result<PluginLease, PluginError> {
        let plugin = match &*self.state() {
            PluginState::Loaded(descriptor) => descriptor.clone(),
            PluginState::Unloaded => return Err(PluginError::NotLoaded),
            PluginState::CleanedUp => return Err(PluginError::AlreadyCleanedUp),
        };

        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(live, Ordering::SeqCst);
        debug!("Plugin lease acquired ({} live)", live);

        Ok(PluginLease {
            registry: Arc::clone(self),
            plugin,
        })
    }

    /// Number of renderer handles currently holding a lease
    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live handles seen so far
    pub fn peak_handles(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Record a crash of the shared engine binary, returning the new total
    pub fn record_crash(&self) -> usize {
        let total = self.crashes.fetch_add(1, Ordering::SeqCst) + 1;
        warn!("Browser plugin crashed ({} crash(es) so far)", total);
        total
    }

    /// Number of recorded plugin crashes
    pub fn crash_count(&self) -> usize {
        self.crashes.load(Ordering::SeqCst)
    }

    /// Unload the plugin for the rest of the process lifetime.
    ///
    /// Fails while any renderer handle is alive, and on a second call.
    pub fn cleanup(&self) -> Result<(), PluginError> {
        let mut state = self.state();
        if matches!(*state, PluginState::CleanedUp) {
            error!("Browser plugin cleanup called twice");
            return Err(PluginError::AlreadyCleanedUp);
        }

        let live = self.live_handles();
        if live > 0 {
            error!("Browser plugin cleanup called with {} live handle(s)", live);
            return Err(PluginError::HandlesAlive(live));
        }

        if let PluginState::Loaded(descriptor) = &*state {
            info!("Cleaning up browser plugin '{}'", descriptor.name);
        }
        *state = PluginState::CleanedUp;
        Ok(())
    }
}

/// Keeps the plugin pinned while a renderer handle is alive
#[derive(Debug)]
pub struct PluginLease {
    registry: Arc<PluginRegistry>,
    plugin: PluginDescriptor,
}

impl PluginLease {
    /// Path of the plugin binary this lease pins
    pub fn plugin_path(&self) -> &Path {
        &self.plugin.path
    }

    /// The pinned plugin
    pub fn plugin(&self) -> &PluginDescriptor {
        &self.plugin
    }
}

impl Drop for PluginLease {
    fn drop(&mut self) {
        let left = self.registry.live.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!("Plugin lease released ({} live)", left);
    }
}
