/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! webnode - Embedded browser scene node
//!
//! webnode hosts web pages inside a scene: each [`BrowserNode`] owns one
//! renderer and a call bridge through which page script invokes named host
//! callbacks. Renderer and plugin crashes are reported to subscribers instead
//! of taking the host down.
//!
//! # Overview
//!
//! webnode provides:
//! - Browser nodes with input gating, navigation and painted surfaces
//! - A typed page-to-host call bridge
//! - A reference-counted plugin registry with checked cleanup
//! - In-process and out-of-process renderer backends
//! - Configuration-based demo app definition (TOML)
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use webnode::engine::headless::HeadlessBackend;
//! use webnode::{NodeOptions, PageContext, PluginDescriptor, PluginRegistry, Scene};
//!
//! let registry = PluginRegistry::new();
//! registry.load(PluginDescriptor::new("engine", "/usr/lib/webnode/engine")).unwrap();
//!
//! let mut scene = Scene::new(registry, Box::new(HeadlessBackend::new()));
//! let node = scene.create_node(NodeOptions::new("cef", 1024, 600)).unwrap();
//! node.add_js_callback("load", |data: String, page: &mut PageContext| {
//!     println!("page says {}", data);
//!     page.remove_callback("load");
//! })
//! .unwrap();
//! node.load_url("data:text/html,<script>bridge.send('load', 'ready')</script>");
//!
//! scene.pump_until(Duration::from_secs(1), |s| {
//!     s.node("cef").is_some_and(|n| !n.is_loading())
//! });
//! scene.clear();
//! scene.cleanup().unwrap();
//! ```

pub mod app;
pub mod bridge;
pub mod config;
pub mod engine;
pub mod input;
pub mod logging;
pub mod node;
pub mod plugin;
pub mod renderer;
pub mod scene;
pub mod signal;
pub mod supervisor;

pub use app::{AppError, WebnodeApp};
pub use bridge::{BridgeError, CallBridge, DispatchOutcome, PageContext, Payload, PayloadDecodeError, Toggle};
pub use config::WebnodeConfig;
pub use engine::{EngineError, EngineEvent, HandleId, RendererBackend};
pub use input::{HostEvent, InputEvent, Modifiers};
pub use node::{BrowserNode, NodeError, NodeOptions, NodeState};
pub use plugin::{PluginDescriptor, PluginError, PluginRegistry};
pub use renderer::{file_url, RendererHandle};
pub use scene::Scene;
pub use signal::{Signal, SubscriptionId};
