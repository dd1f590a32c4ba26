/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Lifecycle supervisor
//!
//! Engine threads push `(HandleId, EngineEvent)` pairs into one queue. The
//! supervisor drains it on the host turn and routes each event to the node
//! owning the handle. Events of handles nobody owns anymore are dropped.
//! A plugin crash is process-wide and is fanned out to every live node.

use crate::engine::{EngineEvent, EventSink, HandleId};
use crate::node::BrowserNode;
use crate::plugin::PluginRegistry;
use log::{debug, error, trace};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Allocate a handle id unique within the process
fn next_handle_id() -> HandleId {
    HandleId(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
}

pub struct Supervisor {
    tx: Sender<(HandleId, EngineEvent)>,
    rx: Receiver<(HandleId, EngineEvent)>,
    registry: Arc<PluginRegistry>,
    delivered: u64,
    dropped: u64,
}

impl Supervisor {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            registry,
            delivered: 0,
            dropped: 0,
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Sink for a new renderer handle
    pub fn next_sink(&self) -> EventSink {
        EventSink::new(next_handle_id(), self.tx.clone())
    }

    /// Route every queued event. Returns the number of events taken off
    /// the queue.
    pub fn deliver(&mut self, nodes: &mut [BrowserNode]) -> usize {
        let mut count = 0;
        while let Ok((handle, event)) = self.rx.try_recv() {
            self.route(nodes, handle, event);
            count += 1;
        }
        count
    }

    /// Like [`deliver`](Self::deliver), but waits up to `timeout` for the
    /// first event
    pub fn deliver_timeout(&mut self, nodes: &mut [BrowserNode], timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok((handle, event)) => {
                self.route(nodes, handle, event);
                1 + self.deliver(nodes)
            }
            Err(RecvTimeoutError::Timeout) => 0,
            // The supervisor holds a sender, so the queue never disconnects
            Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    fn route(&mut self, nodes: &mut [BrowserNode], handle: HandleId, event: EngineEvent) {
        // Plugin crashes apply to every node, whether or not the reporter
        // is still alive
        if let EngineEvent::PluginCrashed { path } = event {
            debug!("Renderer {} reported plugin crash of {}", handle, path);
            self.delivered += 1;
            self.plugin_crashed(nodes, &path);
            return;
        }

        let Some(node) = nodes
            .iter_mut()
            .find(|n| n.handle_id() == handle && !n.is_destroyed())
        else {
            debug!("Dropping event of released renderer {}: {:?}", handle, event);
            self.dropped += 1;
            return;
        };
        trace!("Routing {:?} to node '{}'", event, node.id());
        self.delivered += 1;
        node.handle_engine_event(event);
    }

    /// Mark every live node as hit by a plugin crash. Returns the number of
    /// nodes newly notified.
    pub fn plugin_crashed(&mut self, nodes: &mut [BrowserNode], path: &str) -> usize {
        let mut notified = 0;
        for node in nodes.iter_mut() {
            if node.mark_plugin_crashed(path) {
                notified += 1;
            }
        }
        if notified > 0 {
            let total = self.registry.record_crash();
            error!(
                "Plugin {} crashed, {} node(s) affected ({} crash(es) total)",
                path, notified, total
            );
        }
        notified
    }

    /// Events routed to a node so far
    pub fn delivered_events(&self) -> u64 {
        self.delivered
    }

    /// Events dropped because their handle was released
    pub fn dropped_events(&self) -> u64 {
        self.dropped
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("delivered", &self.delivered)
            .field("dropped", &self.dropped)
            .finish()
    }
}
