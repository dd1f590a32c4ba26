/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Renderer handle: the host-side owner of one engine instance
//!
//! The handle knows nothing about scenes or nodes. It issues commands to its
//! engine, holds a lease on the plugin registry while alive, and filters the
//! events coming back: completions of superseded navigations and anything
//! arriving after a crash or destroy are dropped.

use crate::engine::{
    EngineCommand, EngineError, EngineEvent, EventSink, HandleId, RendererBackend, RendererConnection, SpawnConfig,
};
use crate::input::InputEvent;
use crate::plugin::{PluginLease, PluginRegistry};
use log::{debug, info, trace, warn};
use std::path::Path;
use std::sync::Arc;

/// Largest width or height an engine viewport may have
pub const MAX_DIMENSION: u32 = 16384;

/// Whether `width` x `height` is a usable viewport size
pub fn valid_size(width: u32, height: u32) -> bool {
    (1..=MAX_DIMENSION).contains(&width) && (1..=MAX_DIMENSION).contains(&height)
}

/// Lifecycle of a renderer handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Alive,
    /// The engine died. Terminal; recreate the handle to recover.
    Crashed,
    Destroyed,
}

/// Host-side handle to one engine instance
pub struct RendererHandle {
    id: HandleId,
    connection: Box<dyn RendererConnection>,
    lease: Option<PluginLease>,
    state: HandleState,
    nav_seq: u64,
    current_url: Option<String>,
    loading: bool,
    size: (u32, u32),
    transparent: bool,
}

impl RendererHandle {
    /// Start an engine instance sized `size`.
    ///
    /// Fails with [`EngineError::Init`] when the plugin is not loaded, the
    /// size is empty or larger than [`MAX_DIMENSION`], or the engine does
    /// not start.
    pub fn create(
        backend: &dyn RendererBackend,
        registry: &Arc<PluginRegistry>,
        sink: EventSink,
        size: (u32, u32),
        transparent: bool,
    ) -> Result<Self, EngineError> {
        let id = sink.handle();
        if !valid_size(size.0, size.1) {
            return Err(EngineError::Init(format!(
                "invalid renderer size {}x{}",
                size.0, size.1
            )));
        }

        let lease = registry
            .acquire()
            .map_err(|e| EngineError::Init(e.to_string()))?;

        let config = SpawnConfig {
            width: size.0,
            height: size.1,
            transparent,
            plugin_path: lease.plugin_path().to_path_buf(),
        };
        let connection = backend.spawn(&config, sink)?;

        info!(
            "Renderer {} created on {} backend ({}x{})",
            id,
            backend.name(),
            size.0,
            size.1
        );

        Ok(Self {
            id,
            connection,
            lease: Some(lease),
            state: HandleState::Alive,
            nav_seq: 0,
            current_url: None,
            loading: false,
            size,
            transparent,
        })
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_alive(&self) -> bool {
        self.state == HandleState::Alive
    }

    /// URL of the most recent navigation
    pub fn url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    /// Whether the most recent navigation is still in flight
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn transparent(&self) -> bool {
        self.transparent
    }

    /// Sequence number of the most recent navigation
    pub fn nav_seq(&self) -> u64 {
        self.nav_seq
    }

    /// Path of the plugin this handle holds a lease on
    pub fn plugin_path(&self) -> Option<&Path> {
        self.lease.as_ref().map(|l| l.plugin_path())
    }

    /// Begin navigating to `url`. Completion is reported by a `LoadEnd`
    /// event; a later call supersedes this one.
    pub fn load_url(&mut self, url: &str) {
        if !self.is_alive() {
            warn!("Renderer {} is {:?}, not loading {}", self.id, self.state, url);
            return;
        }
        self.nav_seq += 1;
        self.current_url = Some(url.to_string());
        self.loading = true;
        debug!("Renderer {} navigating to {} (seq {})", self.id, url, self.nav_seq);
        self.send(EngineCommand::Navigate {
            seq: self.nav_seq,
            url: url.to_string(),
        });
    }

    /// Re-issue the current URL. Without one this does nothing.
    pub fn refresh(&mut self) {
        match self.current_url.clone() {
            Some(url) => self.load_url(&url),
            None => debug!("Renderer {}: nothing to refresh", self.id),
        }
    }

    /// Run `script` in the page. Dropped when no page was ever requested.
    pub fn execute_script(&mut self, script: &str) {
        if self.current_url.is_none() {
            warn!("Renderer {}: no page loaded, script dropped", self.id);
            return;
        }
        if !self.is_alive() {
            debug!("Renderer {} is {:?}, script dropped", self.id, self.state);
            return;
        }
        self.send(EngineCommand::ExecuteScript {
            script: script.to_string(),
        });
    }

    pub fn send_input_event(&mut self, event: InputEvent) {
        if !self.is_alive() {
            trace!("Renderer {} is {:?}, input dropped", self.id, self.state);
            return;
        }
        self.send(EngineCommand::Input { event });
    }

    /// Resize the engine viewport. Returns false for empty or oversized
    /// sizes.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if !valid_size(width, height) {
            warn!("Renderer {}: ignoring resize to {}x{}", self.id, width, height);
            return false;
        }
        self.size = (width, height);
        if self.is_alive() {
            self.send(EngineCommand::Resize { width, height });
        }
        true
    }

    pub fn set_transparent(&mut self, transparent: bool) {
        self.transparent = transparent;
        if self.is_alive() {
            self.send(EngineCommand::SetTransparent { transparent });
        }
    }

    pub fn set_zoom(&mut self, level: i32) {
        if self.is_alive() {
            self.send(EngineCommand::SetZoom { level });
        }
    }

    /// Terminate the engine and release the plugin lease. Idempotent.
    pub fn destroy(&mut self) {
        if self.state == HandleState::Destroyed {
            return;
        }
        self.connection.terminate();
        self.lease = None;
        self.state = HandleState::Destroyed;
        self.loading = false;
        info!("Renderer {} destroyed", self.id);
    }

    /// Mark the engine dead without waiting for its report
    pub(crate) fn mark_crashed(&mut self) {
        if self.state == HandleState::Alive {
            self.state = HandleState::Crashed;
            self.loading = false;
        }
    }

    /// Filter an engine event, updating navigation and crash state.
    /// Returns the event if it should reach the owner.
    pub(crate) fn accept(&mut self, event: EngineEvent) -> Option<EngineEvent> {
        if self.state != HandleState::Alive {
            debug!("Renderer {} is {:?}, dropping {:?}", self.id, self.state, event);
            return None;
        }

        match &event {
            EngineEvent::LoadStart { seq, .. } if *seq != self.nav_seq => {
                debug!("Renderer {}: dropping start of superseded navigation {}", self.id, seq);
                return None;
            }
            EngineEvent::LoadEnd { seq, .. } if *seq != self.nav_seq => {
                debug!("Renderer {}: dropping end of superseded navigation {}", self.id, seq);
                return None;
            }
            EngineEvent::LoadEnd { .. } => self.loading = false,
            EngineEvent::RendererCrashed { .. } | EngineEvent::PluginCrashed { .. } => self.mark_crashed(),
            _ => {}
        }
        Some(event)
    }

    fn send(&mut self, command: EngineCommand) {
        if let Err(e) = self.connection.send(command) {
            warn!("Renderer {}: command not delivered: {}", self.id, e);
        }
    }
}

impl Drop for RendererHandle {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for RendererHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererHandle")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("nav_seq", &self.nav_seq)
            .field("url", &self.current_url)
            .field("loading", &self.loading)
            .field("size", &self.size)
            .finish()
    }
}

/// `file://` URL for `path`, resolved against the working directory
pub fn file_url<P: AsRef<Path>>(path: P) -> std::io::Result<String> {
    let path = path.as_ref();
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut url = String::from("file://");
    for c in absolute.to_string_lossy().chars() {
        match c {
            '%' => url.push_str("%25"),
            ' ' => url.push_str("%20"),
            '#' => url.push_str("%23"),
            '?' => url.push_str("%3F"),
            c => url.push(c),
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::recording::{Lifecycle, RecordingBackend};
    use crate::plugin::PluginDescriptor;
    use std::sync::mpsc;

    fn loaded_registry() -> Arc<PluginRegistry> {
        let registry = PluginRegistry::new();
        registry
            .load(PluginDescriptor::new("engine", "/opt/engine"))
            .unwrap();
        registry
    }

    fn handle(backend: &RecordingBackend, registry: &Arc<PluginRegistry>, id: u64) -> RendererHandle {
        let (tx, _rx) = mpsc::channel();
        RendererHandle::create(backend, registry, EventSink::new(HandleId(id), tx), (64, 48), false).unwrap()
    }

    #[test]
    fn test_create_requires_plugin() {
        let backend = RecordingBackend::new();
        let registry = PluginRegistry::new();
        let (tx, _rx) = mpsc::channel();

        let result = RendererHandle::create(&backend, &registry, EventSink::new(HandleId(1), tx), (10, 10), false);
        assert!(matches!(result, Err(EngineError::Init(_))));
        assert!(backend.lifecycle().is_empty());
    }

    #[test]
    fn test_oversized_create_is_init_error() {
        let backend = RecordingBackend::new();
        let registry = loaded_registry();

        for size in [(u32::MAX, u32::MAX), (MAX_DIMENSION + 1, 1), (1, MAX_DIMENSION + 1)] {
            let (tx, _rx) = mpsc::channel();
            let result = RendererHandle::create(&backend, &registry, EventSink::new(HandleId(1), tx), size, false);
            assert!(matches!(result, Err(EngineError::Init(_))));
        }
        assert!(backend.lifecycle().is_empty());
        assert_eq!(registry.live_handles(), 0);
        assert!(valid_size(MAX_DIMENSION, MAX_DIMENSION));
    }

    #[test]
    fn test_failed_spawn_releases_lease() {
        let backend = RecordingBackend::new();
        backend.refuse_spawn(true);
        let registry = loaded_registry();
        let (tx, _rx) = mpsc::channel();

        let result = RendererHandle::create(&backend, &registry, EventSink::new(HandleId(1), tx), (10, 10), false);
        assert!(matches!(result, Err(EngineError::Init(_))));
        assert_eq!(registry.live_handles(), 0);
    }

    #[test]
    fn test_spawn_config() {
        let backend = RecordingBackend::new();
        let registry = loaded_registry();
        let h = handle(&backend, &registry, 1);

        let configs = backend.configs();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].width, 64);
        assert_eq!(configs[0].plugin_path, Path::new("/opt/engine"));
        assert_eq!(h.plugin_path(), Some(Path::new("/opt/engine")));
    }

    #[test]
    fn test_only_latest_navigation_completes() {
        let backend = RecordingBackend::new();
        let registry = loaded_registry();
        let mut h = handle(&backend, &registry, 1);

        h.load_url("about:blank");
        h.load_url("data:text/html,second");
        assert_eq!(h.nav_seq(), 2);
        assert!(h.is_loading());

        let stale = EngineEvent::LoadEnd {
            seq: 1,
            url: "about:blank".into(),
            status: 200,
        };
        assert_eq!(h.accept(stale), None);
        assert!(h.is_loading());

        let current = EngineEvent::LoadEnd {
            seq: 2,
            url: "data:text/html,second".into(),
            status: 200,
        };
        assert_eq!(h.accept(current.clone()), Some(current));
        assert!(!h.is_loading());
    }

    #[test]
    fn test_refresh_and_script_without_page() {
        let backend = RecordingBackend::new();
        let registry = loaded_registry();
        let mut h = handle(&backend, &registry, 1);

        h.refresh();
        h.execute_script("1 + 1");
        assert!(backend.commands_for(HandleId(1)).is_empty());

        h.load_url("about:blank");
        h.refresh();
        h.execute_script("1 + 1");
        let commands = backend.commands_for(HandleId(1));
        assert_eq!(commands.len(), 3);
        assert_eq!(
            commands[1],
            EngineCommand::Navigate {
                seq: 2,
                url: "about:blank".into()
            }
        );
    }

    #[test]
    fn test_inputs_keep_call_order() {
        let backend = RecordingBackend::new();
        let registry = loaded_registry();
        let mut h = handle(&backend, &registry, 1);

        h.send_input_event(InputEvent::key_down(1));
        h.send_input_event(InputEvent::key_down(2));
        h.send_input_event(InputEvent::key_up(1));

        let commands = backend.commands_for(HandleId(1));
        assert_eq!(
            commands,
            vec![
                EngineCommand::Input {
                    event: InputEvent::key_down(1)
                },
                EngineCommand::Input {
                    event: InputEvent::key_down(2)
                },
                EngineCommand::Input {
                    event: InputEvent::key_up(1)
                },
            ]
        );
    }

    #[test]
    fn test_zero_resize_rejected() {
        let backend = RecordingBackend::new();
        let registry = loaded_registry();
        let mut h = handle(&backend, &registry, 1);

        assert!(!h.resize(0, 10));
        assert!(!h.resize(MAX_DIMENSION + 1, 10));
        assert!(!h.resize(u32::MAX, u32::MAX));
        assert_eq!(h.size(), (64, 48));
        assert!(backend.commands_for(HandleId(1)).is_empty());
        assert!(h.resize(32, 16));
        assert_eq!(h.size(), (32, 16));
    }

    #[test]
    fn test_crash_is_terminal() {
        let backend = RecordingBackend::new();
        let registry = loaded_registry();
        let mut h = handle(&backend, &registry, 1);

        let crash = EngineEvent::RendererCrashed {
            reason: "gone".into(),
        };
        assert!(h.accept(crash).is_some());
        assert_eq!(h.state(), HandleState::Crashed);

        h.load_url("about:blank");
        assert!(backend.commands_for(HandleId(1)).is_empty());
        assert_eq!(
            h.accept(EngineEvent::ScriptError {
                message: "late".into()
            }),
            None
        );
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let backend = RecordingBackend::new();
        let registry = loaded_registry();
        let mut h = handle(&backend, &registry, 7);
        assert_eq!(registry.live_handles(), 1);

        h.destroy();
        h.destroy();
        assert_eq!(h.state(), HandleState::Destroyed);
        assert_eq!(registry.live_handles(), 0);
        assert_eq!(
            backend.lifecycle(),
            vec![Lifecycle::Spawned(HandleId(7)), Lifecycle::Terminated(HandleId(7))]
        );

        drop(h);
        assert_eq!(backend.lifecycle().len(), 2);
    }

    #[test]
    fn test_file_url() {
        assert_eq!(file_url("/tmp/my page.html").unwrap(), "file:///tmp/my%20page.html");

        let relative = file_url("testpage.html").unwrap();
        assert!(relative.starts_with("file:///"));
        assert!(relative.ends_with("/testpage.html"));
    }
}
