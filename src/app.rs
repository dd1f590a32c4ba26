/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! webnode demo application
//!
//! A small host shell around one browser node: it loads the plugin, creates
//! the node from configuration, wires the page callbacks and prints status
//! lines on load and crash. The host drives it through `on_init`, `on_frame`
//! and `on_exit`, or lets [`WebnodeApp::run`] pace the frames.

use crate::bridge::{BridgeError, PageContext, Toggle};
use crate::config::{BackendKind, ConfigError, WebnodeConfig};
use crate::engine::headless::HeadlessBackend;
use crate::engine::process::ProcessBackend;
use crate::engine::RendererBackend;
use crate::node::NodeError;
use crate::plugin::{PluginDescriptor, PluginError, PluginRegistry};
use crate::renderer::file_url;
use crate::scene::Scene;
use log::{debug, error, info};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Time between two frames of [`WebnodeApp::run`]
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Errors that can occur with webnode apps
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

type Messages = Rc<RefCell<Vec<String>>>;

fn say(messages: &Messages, message: String) {
    println!("{}", message);
    messages.borrow_mut().push(message);
}

/// A webnode application instance
pub struct WebnodeApp {
    config: WebnodeConfig,
    registry: Arc<PluginRegistry>,
    scene: Option<Scene>,
    messages: Messages,
    frames: u64,
}

impl WebnodeApp {
    /// Create a new app from configuration
    pub fn new(config: WebnodeConfig) -> Self {
        Self {
            config,
            registry: PluginRegistry::new(),
            scene: None,
            messages: Rc::new(RefCell::new(Vec::new())),
            frames: 0,
        }
    }

    /// Load an app from a TOML file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, AppError> {
        let config = WebnodeConfig::load(path)?;
        Ok(Self::new(config))
    }

    /// Get the application name
    pub fn name(&self) -> &str {
        &self.config.app.name
    }

    pub fn config(&self) -> &WebnodeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn scene(&self) -> Option<&Scene> {
        self.scene.as_ref()
    }

    pub fn scene_mut(&mut self) -> Option<&mut Scene> {
        self.scene.as_mut()
    }

    /// Status lines printed so far
    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }

    /// Frames run so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn backend(&self) -> Box<dyn RendererBackend> {
        let delay = self.config.plugin.load_delay();
        match self.config.plugin.backend {
            BackendKind::Headless => Box::new(HeadlessBackend::new().with_load_delay(delay)),
            BackendKind::Process => Box::new(ProcessBackend::new().with_load_delay(delay)),
        }
    }

    fn plugin_descriptor(&self) -> Result<PluginDescriptor, AppError> {
        let path = match &self.config.plugin.helper {
            Some(path) => path.clone(),
            None => std::env::current_exe()?,
        };
        Ok(PluginDescriptor::new(self.config.plugin.name.clone(), path))
    }

    /// Load the plugin, create the node and start loading its page
    pub fn on_init(&mut self, url: Option<&str>) -> Result<(), AppError> {
        self.registry.load(self.plugin_descriptor()?)?;

        let mut scene = Scene::new(Arc::clone(&self.registry), self.backend());
        let node = scene.create_node(self.config.node_options()?)?;

        let messages = Rc::clone(&self.messages);
        node.add_js_callback("load", move |data: String, page: &mut PageContext| {
            say(&messages, format!("onload called with: {}", data));
            page.execute_script("document.getElementById('main').innerHTML = 'Hello JS';");
            page.remove_callback("load");
            // The reloaded page calls "load" again, which now only warns
            page.refresh();
        })?;
        node.add_js_callback("setvolume", |volume: f64, page: &mut PageContext| {
            page.set_volume(volume)
        })?;
        node.add_js_callback("setscroll", |toggle: Toggle, page: &mut PageContext| {
            page.set_scrollbars(toggle.is_enabled())
        })?;

        let messages = Rc::clone(&self.messages);
        node.on_renderer_crash().subscribe(move |crash| {
            say(&messages, format!("renderer was terminated: {}", crash.reason))
        });
        let messages = Rc::clone(&self.messages);
        node.on_plugin_crash().subscribe(move |crash| {
            say(&messages, format!("plugin {} crashed", crash.path))
        });
        let messages = Rc::clone(&self.messages);
        node.on_load_end()
            .subscribe(move |_| say(&messages, "Load finished".to_string()));

        if let Some(url) = url.or(self.config.node.url.as_deref()) {
            let url = resolve_url(url)?;
            node.load_url(&url);
        }

        info!("App '{}' initialized", self.config.app.name);
        self.scene = Some(scene);
        Ok(())
    }

    /// Deliver pending engine events. Returns how many were delivered.
    pub fn on_frame(&mut self) -> usize {
        self.frames += 1;
        match self.scene.as_mut() {
            Some(scene) => scene.pump(),
            None => 0,
        }
    }

    /// Remove all nodes and release the plugin
    pub fn on_exit(&mut self) -> Result<(), AppError> {
        say(&self.messages, "exiting".to_string());
        if let Some(mut scene) = self.scene.take() {
            scene.clear();
            scene.cleanup()?;
        }
        Ok(())
    }

    /// Run the frame loop until `running` turns false or `max_frames`
    /// frames have run. Returns the number of frames.
    pub async fn run(
        &mut self,
        url: Option<&str>,
        max_frames: Option<u64>,
        running: Arc<AtomicBool>,
    ) -> Result<u64, AppError> {
        self.on_init(url)?;

        let mut interval = tokio::time::interval(FRAME_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while running.load(Ordering::SeqCst) && max_frames.map_or(true, |max| self.frames < max) {
            interval.tick().await;
            let delivered = self.on_frame();
            if delivered > 0 {
                debug!("Frame {}: {} engine event(s)", self.frames, delivered);
            }
        }

        self.on_exit()?;
        Ok(self.frames)
    }
}

impl Drop for WebnodeApp {
    fn drop(&mut self) {
        if let Some(mut scene) = self.scene.take() {
            scene.clear();
            if let Err(e) = scene.cleanup() {
                error!("Error releasing plugin on drop: {}", e);
            }
        }
    }
}

/// Turn a configured location into a URL. Anything without a scheme is a
/// path relative to the working directory.
pub fn resolve_url(location: &str) -> Result<String, AppError> {
    let has_scheme = location.contains("://")
        || ["about:", "data:", "chrome:", "javascript:"]
            .iter()
            .any(|scheme| location.starts_with(scheme));
    if has_scheme {
        Ok(location.to_string())
    } else {
        Ok(file_url(location)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "data:text/html,<p id='main'></p><script>bridge.send('load', 'ready')</script>";

    #[test]
    fn test_resolve_url() {
        assert_eq!(resolve_url("about:blank").unwrap(), "about:blank");
        assert_eq!(resolve_url("https://example.org/").unwrap(), "https://example.org/");
        assert!(resolve_url("testpage.html").unwrap().starts_with("file:///"));
    }

    #[test]
    fn test_load_callback_runs_once() {
        let mut app = WebnodeApp::new(WebnodeConfig::default());
        app.on_init(Some(PAGE)).unwrap();

        let scene = app.scene_mut().unwrap();
        let settled = scene.pump_until(Duration::from_secs(5), |scene| {
            scene
                .node("cef")
                .is_some_and(|n| n.last_status() == Some(200) && n.bridge().stats().unhandled == 1)
        });
        assert!(settled);

        let messages = app.messages();
        assert_eq!(
            messages
                .iter()
                .filter(|m| m.as_str() == "onload called with: ready")
                .count(),
            1
        );
        assert!(messages.contains(&"Load finished".to_string()));

        app.on_exit().unwrap();
        assert_eq!(app.registry().live_handles(), 0);
        assert!(!app.registry().is_loaded());
    }

    #[test]
    fn test_page_controls_volume_and_scrollbars() {
        let mut app = WebnodeApp::new(WebnodeConfig::default());
        let page = "data:text/html,<script>bridge.send('setvolume', '0.25'); bridge.send('setscroll', 'disable')</script>";
        app.on_init(Some(page)).unwrap();

        let scene = app.scene_mut().unwrap();
        let settled = scene.pump_until(Duration::from_secs(5), |scene| {
            scene.node("cef").is_some_and(|n| n.last_status().is_some())
        });
        assert!(settled);

        let node = scene.node("cef").unwrap();
        assert_eq!(node.volume(), 0.25);
        assert!(!node.scrollbars());
    }

    #[test]
    fn test_crash_is_reported() {
        let mut app = WebnodeApp::new(WebnodeConfig::default());
        app.on_init(Some("chrome://crash")).unwrap();

        let scene = app.scene_mut().unwrap();
        assert!(scene.pump_until(Duration::from_secs(5), |scene| {
            scene.node("cef").is_some_and(|n| n.state().is_crashed())
        }));
        assert!(app
            .messages()
            .iter()
            .any(|m| m.starts_with("renderer was terminated:")));
    }

    #[tokio::test]
    async fn test_run_stops_after_frames() {
        let mut app = WebnodeApp::new(WebnodeConfig::default());
        let running = Arc::new(AtomicBool::new(true));

        let frames = app.run(Some("about:blank"), Some(3), running).await.unwrap();
        assert_eq!(frames, 3);
        assert_eq!(app.messages().last().map(String::as_str), Some("exiting"));
        assert!(app.scene().is_none());
    }
}
