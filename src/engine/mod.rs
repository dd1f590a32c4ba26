/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Engine boundary
//!
//! Everything the crate knows about the browser engine goes through the two
//! traits in this module. A [`RendererBackend`] starts engine instances; each
//! instance is driven through a [`RendererConnection`] and reports back by
//! pushing [`EngineEvent`]s into an [`EventSink`].
//!
//! ```text
//!   host thread                          engine side
//!  ┌──────────────────┐  EngineCommand  ┌──────────────────────────┐
//!  │ RendererHandle   │ ──────────────▶ │ engine thread / process  │
//!  │                  │                 │                          │
//!  │ Supervisor queue │ ◀────────────── │ EventSink (HandleId tag) │
//!  └──────────────────┘   EngineEvent   └──────────────────────────┘
//! ```
//!
//! Engine threads never call host code directly. They only enqueue events,
//! which the supervisor delivers on the host turn.
//!
//! Two backends ship with the crate:
//! - [`headless::HeadlessBackend`]: one engine thread per instance
//! - [`process::ProcessBackend`]: one helper process per instance

pub mod headless;
pub mod page;
pub mod process;

#[cfg(test)]
pub(crate) mod recording;

use crate::input::InputEvent;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use thiserror::Error;

/// Errors from engine instances
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to initialize engine: {0}")]
    Init(String),

    #[error("Engine connection is closed")]
    Closed,

    #[error("Engine protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Identity of one renderer handle. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Parameters for starting an engine instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnConfig {
    pub width: u32,
    pub height: u32,
    pub transparent: bool,
    /// Engine binary the instance belongs to
    pub plugin_path: PathBuf,
}

/// Pixel rectangle in node-local coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Commands from the host to an engine instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum EngineCommand {
    /// Start loading `url`. `seq` tags the resulting load events.
    Navigate { seq: u64, url: String },
    ExecuteScript { script: String },
    Input { event: InputEvent },
    Resize { width: u32, height: u32 },
    SetTransparent { transparent: bool },
    SetZoom { level: i32 },
    Shutdown,
}

/// Events from an engine instance to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    LoadStart {
        seq: u64,
        url: String,
    },
    LoadEnd {
        seq: u64,
        url: String,
        status: u16,
    },
    /// Page script called a bridge function
    BridgeCall {
        name: String,
        payload: String,
    },
    /// Part of the frame changed. The headless engine paints solid fills.
    Paint {
        width: u32,
        height: u32,
        dirty: Vec<Rect>,
        fill: [u8; 4],
    },
    ScriptError {
        message: String,
    },
    RendererCrashed {
        reason: String,
    },
    PluginCrashed {
        path: String,
    },
}

/// Sending half of the supervisor queue, bound to one handle
#[derive(Debug, Clone)]
pub struct EventSink {
    handle: HandleId,
    tx: Sender<(HandleId, EngineEvent)>,
}

impl EventSink {
    pub fn new(handle: HandleId, tx: Sender<(HandleId, EngineEvent)>) -> Self {
        Self { handle, tx }
    }

    /// The handle this sink tags events with
    pub fn handle(&self) -> HandleId {
        self.handle
    }

    /// Queue an event. Returns false once the host side is gone.
    pub fn send(&self, event: EngineEvent) -> bool {
        self.tx.send((self.handle, event)).is_ok()
    }
}

/// Starts engine instances
pub trait RendererBackend {
    /// Backend name for log output
    fn name(&self) -> &str;

    /// Start one engine instance reporting into `sink`
    fn spawn(
        &self,
        config: &SpawnConfig,
        sink: EventSink,
    ) -> Result<Box<dyn RendererConnection>, EngineError>;
}

/// Control channel of one running engine instance
pub trait RendererConnection {
    /// Queue a command. Commands are delivered in call order.
    fn send(&mut self, command: EngineCommand) -> Result<(), EngineError>;

    /// Stop the instance and release its resources. Blocks until released;
    /// calling it again is a no-op.
    fn terminate(&mut self);

    /// Whether the instance is still running
    fn is_alive(&self) -> bool;
}
