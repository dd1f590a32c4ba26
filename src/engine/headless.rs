/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! In-process engine: one thread per renderer running a [`HeadlessPage`]

use super::page::{HeadlessPage, PageExit};
use super::{EngineCommand, EngineError, EngineEvent, EventSink, RendererBackend, RendererConnection, SpawnConfig};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Backend running each renderer on its own thread
#[derive(Debug, Clone, Default)]
pub struct HeadlessBackend {
    load_delay: Duration,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time between the start and the end of every navigation
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }
}

impl RendererBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "headless"
    }

    fn spawn(
        &self,
        config: &SpawnConfig,
        sink: EventSink,
    ) -> Result<Box<dyn RendererConnection>, EngineError> {
        let (tx, rx) = mpsc::channel::<EngineCommand>();
        let alive = Arc::new(AtomicBool::new(true));
        let page = HeadlessPage::new(config.clone());
        let delay = self.load_delay;
        let handle = sink.handle();

        let thread_alive = Arc::clone(&alive);
        let thread = thread::Builder::new()
            .name(format!("webnode-renderer-{}", handle.0))
            .spawn(move || {
                let exit = page.run(&rx, delay, |event| sink.send(event));
                thread_alive.store(false, Ordering::SeqCst);
                match exit {
                    PageExit::Crashed(reason) => {
                        warn!("Renderer {} crashed: {}", handle, reason);
                        sink.send(EngineEvent::RendererCrashed { reason });
                    }
                    PageExit::PluginCrashed => warn!("Renderer {} lost its plugin", handle),
                    other => debug!("Renderer {} stopped ({:?})", handle, other),
                }
            })
            .map_err(|e| EngineError::Init(format!("failed to start renderer thread: {}", e)))?;

        info!(
            "Headless renderer {} started ({}x{})",
            handle, config.width, config.height
        );

        Ok(Box::new(HeadlessConnection {
            tx: Some(tx),
            thread: Some(thread),
            alive,
        }))
    }
}

struct HeadlessConnection {
    tx: Option<Sender<EngineCommand>>,
    thread: Option<JoinHandle<()>>,
    alive: Arc<AtomicBool>,
}

impl RendererConnection for HeadlessConnection {
    fn send(&mut self, command: EngineCommand) -> Result<(), EngineError> {
        if !self.is_alive() {
            return Err(EngineError::Closed);
        }
        let tx = self.tx.as_ref().ok_or(EngineError::Closed)?;
        tx.send(command).map_err(|_| EngineError::Closed)
    }

    fn terminate(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(EngineCommand::Shutdown);
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Renderer thread panicked during shutdown");
            }
        }
        self.alive.store(false, Ordering::SeqCst);
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl Drop for HeadlessConnection {
    fn drop(&mut self) {
        self.terminate();
    }
}
