/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Backend that records commands instead of running an engine.
//! Tests inject engine events by hand with [`RecordingBackend::emit`].

use super::{EngineCommand, EngineError, EngineEvent, EventSink, HandleId, RendererBackend, RendererConnection, SpawnConfig};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Spawned(HandleId),
    Terminated(HandleId),
}

#[derive(Default)]
struct Recorded {
    commands: Vec<(HandleId, EngineCommand)>,
    sinks: Vec<EventSink>,
    lifecycle: Vec<Lifecycle>,
    configs: Vec<SpawnConfig>,
    refuse_spawn: bool,
}

#[derive(Clone, Default)]
pub(crate) struct RecordingBackend {
    inner: Rc<RefCell<Recorded>>,
}

impl RecordingBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make every following spawn fail with `EngineError::Init`
    pub(crate) fn refuse_spawn(&self, refuse: bool) {
        self.inner.borrow_mut().refuse_spawn = refuse;
    }

    pub(crate) fn commands_for(&self, handle: HandleId) -> Vec<EngineCommand> {
        self.inner
            .borrow()
            .commands
            .iter()
            .filter(|(h, _)| *h == handle)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub(crate) fn inputs_for(&self, handle: HandleId) -> usize {
        self.commands_for(handle)
            .iter()
            .filter(|c| matches!(c, EngineCommand::Input { .. }))
            .count()
    }

    pub(crate) fn clear_commands(&self) {
        self.inner.borrow_mut().commands.clear();
    }

    pub(crate) fn lifecycle(&self) -> Vec<Lifecycle> {
        self.inner.borrow().lifecycle.clone()
    }

    pub(crate) fn configs(&self) -> Vec<SpawnConfig> {
        self.inner.borrow().configs.clone()
    }

    /// Number of spawned connections not yet terminated
    pub(crate) fn live(&self) -> usize {
        let recorded = self.inner.borrow();
        let spawned = recorded
            .lifecycle
            .iter()
            .filter(|l| matches!(l, Lifecycle::Spawned(_)))
            .count();
        spawned - (recorded.lifecycle.len() - spawned)
    }

    /// Push an event as if the engine of `handle` had produced it
    pub(crate) fn emit(&self, handle: HandleId, event: EngineEvent) -> bool {
        let recorded = self.inner.borrow();
        recorded
            .sinks
            .iter()
            .find(|s| s.handle() == handle)
            .is_some_and(|s| s.send(event))
    }
}

impl RendererBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn spawn(
        &self,
        config: &SpawnConfig,
        sink: EventSink,
    ) -> Result<Box<dyn RendererConnection>, EngineError> {
        let mut recorded = self.inner.borrow_mut();
        if recorded.refuse_spawn {
            return Err(EngineError::Init("recording backend refused to spawn".into()));
        }
        let handle = sink.handle();
        recorded.lifecycle.push(Lifecycle::Spawned(handle));
        recorded.configs.push(config.clone());
        recorded.sinks.push(sink);

        Ok(Box::new(RecordingConnection {
            handle,
            inner: Rc::clone(&self.inner),
            alive: true,
        }))
    }
}

struct RecordingConnection {
    handle: HandleId,
    inner: Rc<RefCell<Recorded>>,
    alive: bool,
}

impl RendererConnection for RecordingConnection {
    fn send(&mut self, command: EngineCommand) -> Result<(), EngineError> {
        if !self.alive {
            return Err(EngineError::Closed);
        }
        self.inner.borrow_mut().commands.push((self.handle, command));
        Ok(())
    }

    fn terminate(&mut self) {
        if self.alive {
            self.alive = false;
            self.inner
                .borrow_mut()
                .lifecycle
                .push(Lifecycle::Terminated(self.handle));
        }
    }

    fn is_alive(&self) -> bool {
        self.alive
    }
}
