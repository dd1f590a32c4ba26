/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Minimal scene container for browser nodes
//!
//! Children are kept in paint order; the last child is on top. The scene
//! owns the renderer backend and the supervisor, so it is the one place that
//! creates, replaces and removes nodes, and the one place engine events are
//! pumped from.

use crate::engine::RendererBackend;
use crate::input::HostEvent;
use crate::node::{BrowserNode, NodeError, NodeOptions};
use crate::plugin::PluginRegistry;
use crate::supervisor::Supervisor;
use log::{debug, info};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Scene {
    nodes: Vec<BrowserNode>,
    backend: Box<dyn RendererBackend>,
    supervisor: Supervisor,
    registry: Arc<PluginRegistry>,
}

impl Scene {
    pub fn new(registry: Arc<PluginRegistry>, backend: Box<dyn RendererBackend>) -> Self {
        info!("Scene using {} renderer backend", backend.name());
        Self {
            nodes: Vec::new(),
            backend,
            supervisor: Supervisor::new(Arc::clone(&registry)),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Create a node on top of the existing ones
    pub fn create_node(&mut self, options: NodeOptions) -> Result<&mut BrowserNode, NodeError> {
        if self.nodes.iter().any(|n| n.id() == options.id) {
            return Err(NodeError::IdInUse(options.id));
        }
        let sink = self.supervisor.next_sink();
        let node = BrowserNode::create(options, self.backend.as_ref(), &self.registry, sink)?;

        let index = self.nodes.len();
        self.nodes.push(node);
        Ok(&mut self.nodes[index])
    }

    /// Destroy the node with the same id, if any, then create a new one.
    /// The old renderer is released before the new one starts.
    pub fn replace_node(&mut self, options: NodeOptions) -> Result<&mut BrowserNode, NodeError> {
        match self.remove_node(&options.id) {
            Ok(()) => debug!("Replacing node '{}'", options.id),
            Err(NodeError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.create_node(options)
    }

    /// Tear down and detach a node
    pub fn remove_node(&mut self, id: &str) -> Result<(), NodeError> {
        let index = self
            .nodes
            .iter()
            .position(|n| n.id() == id)
            .ok_or_else(|| NodeError::NotFound(id.to_string()))?;

        self.nodes[index].destroy();
        self.nodes.remove(index);
        debug!("Node '{}' detached", id);
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&BrowserNode> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut BrowserNode> {
        self.nodes.iter_mut().find(|n| n.id() == id)
    }

    /// Node ids in paint order
    pub fn ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id()).collect()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &BrowserNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Deliver queued engine events on this turn
    pub fn pump(&mut self) -> usize {
        self.supervisor.deliver(&mut self.nodes)
    }

    /// Deliver queued engine events, waiting up to `timeout` for the first
    pub fn pump_timeout(&mut self, timeout: Duration) -> usize {
        self.supervisor.deliver_timeout(&mut self.nodes, timeout)
    }

    /// Pump until `done` holds or `timeout` passes. Returns whether `done`
    /// held.
    pub fn pump_until<F>(&mut self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut(&Scene) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if done(self) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let wait = (deadline - now).min(Duration::from_millis(50));
            self.pump_timeout(wait);
        }
    }

    /// Route a host input event. Keys go to every node, pointer events to
    /// the topmost node under the pointer.
    pub fn dispatch_event(&mut self, event: &HostEvent) -> bool {
        match event.position() {
            None => {
                let mut handled = false;
                for node in self.nodes.iter_mut() {
                    handled |= node.handle_event(event);
                }
                handled
            }
            Some((x, y)) => match self.nodes.iter_mut().rev().find(|n| n.geometry().contains(x, y)) {
                Some(node) => node.handle_event(event),
                None => {
                    debug!("No node under pointer at ({}, {})", x, y);
                    false
                }
            },
        }
    }

    /// Remove every node, topmost first
    pub fn clear(&mut self) {
        while let Some(mut node) = self.nodes.pop() {
            node.destroy();
        }
        self.pump();
    }

    /// Release the plugin. Fails while nodes are alive and on a second call.
    pub fn cleanup(&mut self) -> Result<(), NodeError> {
        self.registry.cleanup()?;
        Ok(())
    }
}

impl Drop for Scene {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("backend", &self.backend.name())
            .field("nodes", &self.ids())
            .field("supervisor", &self.supervisor)
            .finish()
    }
}
