/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Browser node
//!
//! A [`BrowserNode`] is the scene-visible unit. It owns one
//! [`RendererHandle`] and one [`CallBridge`], gates and translates input,
//! keeps the last painted frame in a [`Surface`] and tells subscribers about
//! load completion and crashes.
//!
//! Nodes are created through [`Scene`](crate::scene::Scene), which also
//! routes engine events to them on the host turn.

use crate::bridge::{
    bootstrap_script, click_binding_script, scrollbar_script, volume_script, BridgeError, CallBridge, PageAction,
    PageContext, Payload,
};
use crate::engine::{EngineError, EngineEvent, EventSink, HandleId, Rect, RendererBackend};
use crate::input::{HostEvent, InputEvent};
use crate::plugin::{PluginError, PluginRegistry};
use crate::renderer::RendererHandle;
use crate::signal::Signal;
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use thiserror::Error;

/// Zoom levels accepted by [`BrowserNode::set_zoom`]
pub const ZOOM_RANGE: std::ops::RangeInclusive<i32> = -10..=10;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Browser plugin is not loaded")]
    PluginNotLoaded,

    #[error("A node with id '{0}' already exists")]
    IdInUse(String),

    #[error("No node with id '{0}'")]
    NotFound(String),

    #[error("Renderer error: {0}")]
    Engine(#[from] EngineError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),
}

/// Lifecycle of a browser node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Uninitialized,
    PluginLoading,
    Ready,
    Navigating,
    RendererCrashed,
    PluginCrashed,
    Destroyed,
}

impl NodeState {
    pub fn is_crashed(self) -> bool {
        matches!(self, NodeState::RendererCrashed | NodeState::PluginCrashed)
    }
}

/// Position in scene coordinates and size in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub x: f32,
    pub y: f32,
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn new(x: f32, y: f32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn origin(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    /// Whether the scene point lies inside the node
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width as f32 && y < self.y + self.height as f32
    }
}

/// Construction parameters of a browser node
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub id: String,
    pub geometry: Geometry,
    pub transparent: bool,
    pub mouse_input: bool,
    pub keyboard_input: bool,
    pub scrollbars: bool,
    pub volume: f64,
    pub zoom: i32,
    /// Loaded right after construction
    pub url: Option<String>,
}

impl NodeOptions {
    pub fn new(id: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            geometry: Geometry::new(0.0, 0.0, width, height),
            transparent: false,
            mouse_input: true,
            keyboard_input: true,
            scrollbars: true,
            volume: 1.0,
            zoom: 0,
            url: None,
        }
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.geometry.x = x;
        self.geometry.y = y;
        self
    }

    pub fn with_transparent(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    pub fn with_mouse_input(mut self, enabled: bool) -> Self {
        self.mouse_input = enabled;
        self
    }

    pub fn with_keyboard_input(mut self, enabled: bool) -> Self {
        self.keyboard_input = enabled;
        self
    }

    pub fn with_scrollbars(mut self, enabled: bool) -> Self {
        self.scrollbars = enabled;
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_zoom(mut self, level: i32) -> Self {
        self.zoom = level;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// A completed navigation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadEnd {
    pub url: String,
    pub status: u16,
}

/// The renderer of a node died
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererCrash {
    pub node: String,
    pub reason: String,
}

/// The shared plugin died
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginCrash {
    pub node: String,
    pub path: String,
}

/// Last painted frame of a node, BGRA
#[derive(Debug, Clone)]
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    dirty: Vec<Rect>,
    frames: u64,
}

impl Surface {
    /// Sizes are checked by the renderer handle before a surface exists
    fn new(width: u32, height: u32) -> Self {
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .unwrap_or(0);
        Self {
            width,
            height,
            pixels: vec![0; len],
            dirty: Vec::new(),
            frames: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let mut px = [0; 4];
        px.copy_from_slice(&self.pixels[i..i + 4]);
        Some(px)
    }

    /// Number of paints applied
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Regions changed since the last call
    pub fn take_dirty(&mut self) -> Vec<Rect> {
        std::mem::take(&mut self.dirty)
    }

    fn resize(&mut self, width: u32, height: u32) {
        *self = Surface::new(width, height);
    }

    /// Fill `dirty` with `fill`. Frames of another size are stale and dropped.
    fn apply_paint(&mut self, width: u32, height: u32, dirty: &[Rect], fill: [u8; 4]) -> bool {
        if width != self.width || height != self.height {
            debug!(
                "Dropping {}x{} paint for {}x{} surface",
                width, height, self.width, self.height
            );
            return false;
        }
        for rect in dirty {
            let x_end = rect.x.saturating_add(rect.width).min(width);
            let y_end = rect.y.saturating_add(rect.height).min(height);
            for y in rect.y.min(height)..y_end {
                let row = y as usize * width as usize;
                for x in rect.x.min(width)..x_end {
                    let i = (row + x as usize) * 4;
                    self.pixels[i..i + 4].copy_from_slice(&fill);
                }
            }
            self.dirty.push(*rect);
        }
        self.frames += 1;
        true
    }
}

/// Scene-visible browser element
pub struct BrowserNode {
    id: String,
    geometry: Geometry,
    mouse_input: bool,
    keyboard_input: bool,
    scrollbars: bool,
    volume: f64,
    zoom: i32,
    state: NodeState,
    last_status: Option<u16>,
    plugin_crash_reported: bool,
    bridge: CallBridge,
    renderer: RendererHandle,
    surface: Surface,
    on_load_end: Signal<LoadEnd>,
    on_renderer_crash: Signal<RendererCrash>,
    on_plugin_crash: Signal<PluginCrash>,
}

impl BrowserNode {
    pub(crate) fn create(
        options: NodeOptions,
        backend: &dyn RendererBackend,
        registry: &Arc<PluginRegistry>,
        sink: EventSink,
    ) -> Result<Self, NodeError> {
        if !registry.is_loaded() {
            return Err(NodeError::PluginNotLoaded);
        }
        trace!("Node '{}': {:?}", options.id, NodeState::PluginLoading);

        let geometry = options.geometry;
        let renderer = RendererHandle::create(
            backend,
            registry,
            sink,
            (geometry.width, geometry.height),
            options.transparent,
        )?;

        let mut node = Self {
            bridge: CallBridge::new(options.id.clone()),
            id: options.id,
            geometry,
            mouse_input: options.mouse_input,
            keyboard_input: options.keyboard_input,
            scrollbars: options.scrollbars,
            volume: options.volume.clamp(0.0, 1.0),
            zoom: 0,
            state: NodeState::Ready,
            last_status: None,
            plugin_crash_reported: false,
            renderer,
            surface: Surface::new(geometry.width, geometry.height),
            on_load_end: Signal::new(),
            on_renderer_crash: Signal::new(),
            on_plugin_crash: Signal::new(),
        };

        if options.zoom != 0 {
            node.set_zoom(options.zoom);
        }
        if let Some(url) = options.url {
            node.load_url(&url);
        }

        info!("Node '{}' created ({}x{})", node.id, geometry.width, geometry.height);
        Ok(node)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn is_destroyed(&self) -> bool {
        self.state == NodeState::Destroyed
    }

    pub fn handle_id(&self) -> HandleId {
        self.renderer.id()
    }

    pub fn renderer(&self) -> &RendererHandle {
        &self.renderer
    }

    pub fn bridge(&self) -> &CallBridge {
        &self.bridge
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn set_position(&mut self, x: f32, y: f32) {
        self.geometry.x = x;
        self.geometry.y = y;
    }

    /// Resize the node and its renderer. Returns false for empty sizes.
    pub fn set_size(&mut self, width: u32, height: u32) -> bool {
        if !self.renderer.resize(width, height) {
            return false;
        }
        self.geometry.width = width;
        self.geometry.height = height;
        self.surface.resize(width, height);
        true
    }

    pub fn transparent(&self) -> bool {
        self.renderer.transparent()
    }

    pub fn set_transparent(&mut self, transparent: bool) {
        self.renderer.set_transparent(transparent);
    }

    pub fn mouse_input(&self) -> bool {
        self.mouse_input
    }

    pub fn set_mouse_input(&mut self, enabled: bool) {
        self.mouse_input = enabled;
    }

    pub fn keyboard_input(&self) -> bool {
        self.keyboard_input
    }

    pub fn set_keyboard_input(&mut self, enabled: bool) {
        self.keyboard_input = enabled;
    }

    pub fn scrollbars(&self) -> bool {
        self.scrollbars
    }

    pub fn set_scrollbars(&mut self, enabled: bool) {
        self.scrollbars = enabled;
        if self.renderer.url().is_some() {
            self.renderer.execute_script(&scrollbar_script(enabled));
        }
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Set media volume, clamped to `0.0..=1.0`
    pub fn set_volume(&mut self, volume: f64) {
        let clamped = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        if clamped != volume {
            warn!("Node '{}': volume {} clamped to {}", self.id, volume, clamped);
        }
        self.volume = clamped;
        if self.renderer.url().is_some() {
            self.renderer.execute_script(&volume_script(clamped));
        }
    }

    pub fn zoom(&self) -> i32 {
        self.zoom
    }

    /// Set the zoom level, clamped to [`ZOOM_RANGE`]
    pub fn set_zoom(&mut self, level: i32) {
        let clamped = level.clamp(*ZOOM_RANGE.start(), *ZOOM_RANGE.end());
        if clamped == self.zoom {
            return;
        }
        self.zoom = clamped;
        self.renderer.set_zoom(clamped);
    }

    pub fn zoom_in(&mut self) {
        self.set_zoom(self.zoom + 1);
    }

    pub fn zoom_out(&mut self) {
        self.set_zoom(self.zoom - 1);
    }

    pub fn url(&self) -> Option<&str> {
        self.renderer.url()
    }

    pub fn is_loading(&self) -> bool {
        self.renderer.is_loading()
    }

    /// Status of the last completed navigation
    pub fn last_status(&self) -> Option<u16> {
        self.last_status
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut Surface {
        &mut self.surface
    }

    /// Whether a frame was painted since creation
    pub fn painted(&self) -> bool {
        self.surface.frames() > 0
    }

    pub fn load_url(&mut self, url: &str) {
        self.renderer.load_url(url);
        if self.renderer.is_loading() {
            self.state = NodeState::Navigating;
        }
    }

    pub fn refresh(&mut self) {
        self.renderer.refresh();
        if self.renderer.is_loading() {
            self.state = NodeState::Navigating;
        }
    }

    pub fn execute_script(&mut self, script: &str) {
        self.renderer.execute_script(script);
    }

    /// Register a page callback, see [`CallBridge::register`]
    pub fn add_js_callback<P, F>(&mut self, name: &str, handler: F) -> Result<(), BridgeError>
    where
        P: Payload + 'static,
        F: FnMut(P, &mut PageContext) + 'static,
    {
        self.bridge.register(name, handler)
    }

    pub fn remove_js_callback(&mut self, name: &str) -> bool {
        self.bridge.unregister(name)
    }

    pub fn add_click_callback<F>(&mut self, dom_id: &str, handler: F) -> Result<(), BridgeError>
    where
        F: FnMut(&mut PageContext) + 'static,
    {
        let first = !self.bridge.has_click_callbacks();
        self.bridge.add_click_callback(dom_id, handler)?;
        if first && self.renderer.url().is_some() {
            self.renderer.execute_script(&click_binding_script());
        }
        Ok(())
    }

    pub fn remove_click_callback(&mut self, dom_id: &str) -> bool {
        self.bridge.remove_click_callback(dom_id)
    }

    pub fn on_load_end(&mut self) -> &mut Signal<LoadEnd> {
        &mut self.on_load_end
    }

    pub fn on_renderer_crash(&mut self) -> &mut Signal<RendererCrash> {
        &mut self.on_renderer_crash
    }

    pub fn on_plugin_crash(&mut self) -> &mut Signal<PluginCrash> {
        &mut self.on_plugin_crash
    }

    /// Forward a key event. Dropped while keyboard input is off.
    pub fn send_key_event(&mut self, event: InputEvent) -> bool {
        if !event.is_keyboard() {
            return self.send_mouse_event(event);
        }
        if !self.keyboard_input {
            trace!("Node '{}': keyboard input off, dropping {:?}", self.id, event);
            return false;
        }
        self.renderer.send_input_event(event);
        true
    }

    /// Forward a node-local mouse event. Dropped while mouse input is off.
    pub fn send_mouse_event(&mut self, event: InputEvent) -> bool {
        if event.is_keyboard() {
            return self.send_key_event(event);
        }
        if !self.mouse_input {
            trace!("Node '{}': mouse input off, dropping {:?}", self.id, event);
            return false;
        }
        self.renderer.send_input_event(event);
        true
    }

    /// Translate a host event into node coordinates and forward it
    pub fn handle_event(&mut self, event: &HostEvent) -> bool {
        let enabled = if event.is_keyboard() {
            self.keyboard_input
        } else {
            self.mouse_input
        };
        if !enabled {
            return false;
        }
        match event.translate(self.geometry.origin()) {
            Some(input) => {
                self.renderer.send_input_event(input);
                true
            }
            None => false,
        }
    }

    /// Tear down: callbacks first, then the renderer. Idempotent.
    pub fn destroy(&mut self) {
        if self.state == NodeState::Destroyed {
            return;
        }
        self.bridge.clear();
        self.renderer.destroy();
        self.state = NodeState::Destroyed;
        info!("Node '{}' destroyed", self.id);
    }

    /// Mark the node as hit by a plugin crash. Notifies at most once.
    pub(crate) fn mark_plugin_crashed(&mut self, path: &str) -> bool {
        if self.plugin_crash_reported || self.state == NodeState::Destroyed {
            return false;
        }
        self.plugin_crash_reported = true;
        self.renderer.mark_crashed();
        self.state = NodeState::PluginCrashed;
        error!("Node '{}': plugin {} crashed", self.id, path);
        self.on_plugin_crash.emit(&PluginCrash {
            node: self.id.clone(),
            path: path.to_string(),
        });
        true
    }

    /// Handle one engine event on the host turn
    pub(crate) fn handle_engine_event(&mut self, event: EngineEvent) {
        if let EngineEvent::PluginCrashed { path } = &event {
            self.mark_plugin_crashed(path);
            return;
        }
        let Some(event) = self.renderer.accept(event) else {
            return;
        };

        match event {
            EngineEvent::LoadStart { url, .. } => {
                debug!("Node '{}': loading {}", self.id, url);
                self.state = NodeState::Navigating;
                self.renderer.execute_script(bootstrap_script());
                self.renderer.execute_script(&scrollbar_script(self.scrollbars));
                self.renderer.execute_script(&volume_script(self.volume));
            }
            EngineEvent::LoadEnd { url, status, .. } => {
                self.state = NodeState::Ready;
                self.last_status = Some(status);
                if status == 0 || status >= 400 {
                    warn!("Node '{}': {} finished with status {}", self.id, url, status);
                } else {
                    info!("Node '{}': loaded {}", self.id, url);
                }
                if self.bridge.has_click_callbacks() {
                    self.renderer.execute_script(&click_binding_script());
                }
                self.on_load_end.emit(&LoadEnd { url, status });
            }
            EngineEvent::BridgeCall { name, payload } => {
                let mut page = PageContext::new();
                self.bridge.dispatch(&name, &payload, &mut page);
                self.apply_actions(page);
            }
            EngineEvent::Paint {
                width,
                height,
                dirty,
                fill,
            } => {
                self.surface.apply_paint(width, height, &dirty, fill);
            }
            EngineEvent::ScriptError { message } => {
                warn!("Node '{}': script error: {}", self.id, message);
            }
            EngineEvent::RendererCrashed { reason } => {
                self.state = NodeState::RendererCrashed;
                error!("Node '{}': renderer terminated: {}", self.id, reason);
                self.on_renderer_crash.emit(&RendererCrash {
                    node: self.id.clone(),
                    reason,
                });
            }
            EngineEvent::PluginCrashed { path } => {
                self.mark_plugin_crashed(&path);
            }
        }
    }

    fn apply_actions(&mut self, mut page: PageContext) {
        for action in page.take_actions() {
            match action {
                PageAction::ExecuteScript(script) => self.execute_script(&script),
                PageAction::LoadUrl(url) => self.load_url(&url),
                PageAction::Refresh => self.refresh(),
                PageAction::RemoveCallback(name) => {
                    self.remove_js_callback(&name);
                }
                PageAction::RemoveClickCallback(dom_id) => {
                    self.remove_click_callback(&dom_id);
                }
                PageAction::SetVolume(volume) => self.set_volume(volume),
                PageAction::SetScrollbars(enabled) => self.set_scrollbars(enabled),
            }
        }
    }
}

impl Drop for BrowserNode {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for BrowserNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserNode")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("geometry", &self.geometry)
            .field("renderer", &self.renderer)
            .field("bridge", &self.bridge)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::recording::RecordingBackend;
    use crate::engine::EngineCommand;
    use crate::input::{CursorPhase, HostButton, MouseButton};
    use crate::plugin::PluginDescriptor;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::mpsc;

    struct Fixture {
        backend: RecordingBackend,
        registry: Arc<PluginRegistry>,
        node: BrowserNode,
    }

    fn fixture(options: NodeOptions) -> Fixture {
        let backend = RecordingBackend::new();
        let registry = PluginRegistry::new();
        registry
            .load(PluginDescriptor::new("engine", "/opt/engine"))
            .unwrap();
        let (tx, _rx) = mpsc::channel();
        let node = BrowserNode::create(options, &backend, &registry, EventSink::new(HandleId(1), tx)).unwrap();
        Fixture {
            backend,
            registry,
            node,
        }
    }

    fn scripts(backend: &RecordingBackend) -> Vec<String> {
        backend
            .commands_for(HandleId(1))
            .into_iter()
            .filter_map(|c| match c {
                EngineCommand::ExecuteScript { script } => Some(script),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_requires_loaded_plugin() {
        let backend = RecordingBackend::new();
        let registry = PluginRegistry::new();
        let (tx, _rx) = mpsc::channel();
        let result = BrowserNode::create(
            NodeOptions::new("cef", 10, 10),
            &backend,
            &registry,
            EventSink::new(HandleId(1), tx),
        );
        assert!(matches!(result, Err(NodeError::PluginNotLoaded)));
    }

    #[test]
    fn test_key_gating() {
        let mut f = fixture(NodeOptions::new("cef", 10, 10).with_keyboard_input(false));

        assert!(!f.node.send_key_event(InputEvent::key_down('A' as u32)));
        assert_eq!(f.backend.inputs_for(HandleId(1)), 0);

        f.node.set_keyboard_input(true);
        assert!(f.node.send_key_event(InputEvent::key_down('A' as u32)));
        assert_eq!(
            f.backend.commands_for(HandleId(1)),
            vec![EngineCommand::Input {
                event: InputEvent::key_down('A' as u32)
            }]
        );

        f.node.set_keyboard_input(false);
        f.node.send_key_event(InputEvent::key_up('A' as u32));
        assert_eq!(f.backend.inputs_for(HandleId(1)), 1);
    }

    #[test]
    fn test_host_mouse_events_are_node_local() {
        let mut f = fixture(NodeOptions::new("cef", 100, 100).with_position(50.0, 20.0));

        let click = HostEvent::Cursor {
            phase: CursorPhase::Up,
            button: Some(HostButton::Right),
            x: 60.0,
            y: 30.0,
        };
        assert!(f.node.handle_event(&click));
        assert_eq!(
            f.backend.commands_for(HandleId(1)),
            vec![EngineCommand::Input {
                event: InputEvent::MouseClick {
                    x: 10,
                    y: 10,
                    button: MouseButton::Right,
                    released: true,
                    clicks: 1,
                }
            }]
        );

        f.node.set_mouse_input(false);
        assert!(!f.node.handle_event(&click));
        assert_eq!(f.backend.inputs_for(HandleId(1)), 1);
    }

    #[test]
    fn test_volume_and_zoom_are_clamped() {
        let mut f = fixture(NodeOptions::new("cef", 10, 10).with_volume(3.0));
        assert_eq!(f.node.volume(), 1.0);

        f.node.set_volume(-0.5);
        assert_eq!(f.node.volume(), 0.0);

        f.node.set_zoom(25);
        assert_eq!(f.node.zoom(), 10);
        f.node.zoom_in();
        assert_eq!(f.node.zoom(), 10);
        f.node.zoom_out();
        assert_eq!(f.node.zoom(), 9);

        let zooms: Vec<_> = f
            .backend
            .commands_for(HandleId(1))
            .into_iter()
            .filter(|c| matches!(c, EngineCommand::SetZoom { .. }))
            .collect();
        assert_eq!(
            zooms,
            vec![EngineCommand::SetZoom { level: 10 }, EngineCommand::SetZoom { level: 9 }]
        );
    }

    #[test]
    fn test_load_start_injects_page_setup() {
        let mut f = fixture(NodeOptions::new("cef", 10, 10).with_scrollbars(false).with_volume(0.5));
        f.node.load_url("about:blank");
        assert_eq!(f.node.state(), NodeState::Navigating);

        f.node.handle_engine_event(EngineEvent::LoadStart {
            seq: 1,
            url: "about:blank".into(),
        });
        assert_eq!(
            scripts(&f.backend),
            vec![
                bootstrap_script().to_string(),
                scrollbar_script(false),
                volume_script(0.5)
            ]
        );
    }

    #[test]
    fn test_load_end_notifies() {
        let mut f = fixture(NodeOptions::new("cef", 10, 10));
        let ends = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&ends);
        f.node.on_load_end().subscribe(move |end| sink.borrow_mut().push(end.clone()));

        f.node.load_url("about:blank");
        f.node.load_url("data:text/html,hi");
        f.node.handle_engine_event(EngineEvent::LoadEnd {
            seq: 1,
            url: "about:blank".into(),
            status: 200,
        });
        assert!(ends.borrow().is_empty());

        f.node.handle_engine_event(EngineEvent::LoadEnd {
            seq: 2,
            url: "data:text/html,hi".into(),
            status: 200,
        });
        assert_eq!(
            *ends.borrow(),
            vec![LoadEnd {
                url: "data:text/html,hi".into(),
                status: 200
            }]
        );
        assert_eq!(f.node.state(), NodeState::Ready);
        assert_eq!(f.node.last_status(), Some(200));
    }

    #[test]
    fn test_handler_can_remove_itself_and_refresh() {
        let mut f = fixture(NodeOptions::new("cef", 10, 10));
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&calls);
        f.node
            .add_js_callback("load", move |data: String, page: &mut PageContext| {
                sink.borrow_mut().push(data);
                page.execute_script("document.getElementById('main').innerHTML = 'Hello JS';");
                page.remove_callback("load");
                page.refresh();
            })
            .unwrap();
        f.node.load_url("about:blank");

        let call = EngineEvent::BridgeCall {
            name: "load".into(),
            payload: "ready".into(),
        };
        f.node.handle_engine_event(call.clone());
        f.node.handle_engine_event(call);

        assert_eq!(*calls.borrow(), vec!["ready".to_string()]);
        assert!(!f.node.bridge().is_registered("load"));
        assert_eq!(f.node.renderer().nav_seq(), 2);
        assert_eq!(f.node.bridge().stats().unhandled, 1);
    }

    #[test]
    fn test_paint_updates_surface() {
        let mut f = fixture(NodeOptions::new("cef", 4, 2));
        assert!(!f.node.painted());

        f.node.handle_engine_event(EngineEvent::Paint {
            width: 4,
            height: 2,
            dirty: vec![Rect::new(1, 0, 2, 1)],
            fill: [1, 2, 3, 4],
        });
        assert!(f.node.painted());
        assert_eq!(f.node.surface().pixel(1, 0), Some([1, 2, 3, 4]));
        assert_eq!(f.node.surface().pixel(0, 0), Some([0, 0, 0, 0]));
        assert_eq!(f.node.surface_mut().take_dirty(), vec![Rect::new(1, 0, 2, 1)]);

        // stale size
        f.node.handle_engine_event(EngineEvent::Paint {
            width: 8,
            height: 8,
            dirty: vec![Rect::new(0, 0, 8, 8)],
            fill: [9, 9, 9, 9],
        });
        assert_eq!(f.node.surface().frames(), 1);
    }

    #[test]
    fn test_renderer_crash() {
        let mut f = fixture(NodeOptions::new("cef", 10, 10));
        let reasons = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&reasons);
        f.node
            .on_renderer_crash()
            .subscribe(move |crash| sink.borrow_mut().push(crash.reason.clone()));

        f.node.handle_engine_event(EngineEvent::RendererCrashed {
            reason: "killed".into(),
        });
        f.node.handle_engine_event(EngineEvent::RendererCrashed {
            reason: "again".into(),
        });

        assert_eq!(*reasons.borrow(), vec!["killed".to_string()]);
        assert_eq!(f.node.state(), NodeState::RendererCrashed);

        f.node.destroy();
        assert_eq!(f.node.state(), NodeState::Destroyed);
        assert_eq!(f.registry.live_handles(), 0);
    }

    #[test]
    fn test_plugin_crash_notifies_once() {
        let mut f = fixture(NodeOptions::new("cef", 10, 10));
        let paths = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&paths);
        f.node
            .on_plugin_crash()
            .subscribe(move |crash| sink.borrow_mut().push(crash.path.clone()));

        assert!(f.node.mark_plugin_crashed("/opt/engine"));
        assert!(!f.node.mark_plugin_crashed("/opt/engine"));
        f.node.handle_engine_event(EngineEvent::PluginCrashed {
            path: "/opt/engine".into(),
        });

        assert_eq!(*paths.borrow(), vec!["/opt/engine".to_string()]);
        assert_eq!(f.node.state(), NodeState::PluginCrashed);
        assert!(f.node.state().is_crashed());
    }

    #[test]
    fn test_destroy_clears_bridge_first() {
        let mut f = fixture(NodeOptions::new("cef", 10, 10));
        f.node
            .add_js_callback("load", |_: String, _: &mut PageContext| {})
            .unwrap();

        f.node.destroy();
        assert!(f.node.bridge().is_empty());
        assert_eq!(f.backend.live(), 0);

        f.node.destroy();
        assert_eq!(f.backend.lifecycle().len(), 2);
    }
}
