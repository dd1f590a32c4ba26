/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Out-of-process engine
//!
//! Each renderer runs in its own helper process: the plugin binary started
//! with the `helper` argument. Host and helper exchange one JSON object per
//! line over the helper's stdin/stdout:
//!
//! 1. host -> helper: a [`SpawnConfig`] line
//! 2. host -> helper: [`EngineCommand`] lines
//! 3. helper -> host: [`EngineEvent`] lines
//!
//! A helper that exits without being asked to is reported as a renderer
//! crash, carrying its exit status as the reason.

use super::page::{HeadlessPage, PageExit};
use super::{EngineCommand, EngineError, EngineEvent, EventSink, RendererBackend, RendererConnection, SpawnConfig};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Argument that switches the plugin binary into helper mode
pub const HELPER_ARG: &str = "helper";

/// Exit code of a helper whose renderer crashed
pub const CRASH_EXIT_CODE: i32 = 3;

/// Backend running each renderer in a helper process
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    args: Vec<String>,
    load_delay: Duration,
    shutdown_grace: Duration,
}

impl Default for ProcessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessBackend {
    pub fn new() -> Self {
        Self {
            args: vec![HELPER_ARG.to_string()],
            load_delay: Duration::ZERO,
            shutdown_grace: Duration::from_secs(2),
        }
    }

    /// Replace the arguments used to start the helper
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Navigation latency passed to the helper
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// How long a helper may take to exit after a shutdown request
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

impl RendererBackend for ProcessBackend {
    fn name(&self) -> &str {
        "process"
    }

    fn spawn(
        &self,
        config: &SpawnConfig,
        sink: EventSink,
    ) -> Result<Box<dyn RendererConnection>, EngineError> {
        let program = &config.plugin_path;
        if !program.is_file() {
            return Err(EngineError::Init(format!(
                "engine binary not found: {}",
                program.display()
            )));
        }

        let mut cmd = Command::new(program);
        cmd.args(&self.args);
        cmd.arg("--load-delay-ms");
        cmd.arg(self.load_delay.as_millis().to_string());

        // Keep helper logging quiet unless asked for
        if std::env::var("RUST_LOG").is_err() {
            cmd.env("RUST_LOG", "warn");
        }

        debug!("Launching renderer helper: {:?}", cmd);

        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| EngineError::Init(format!("{}: {}", program.display(), e)))?;

        let pid = child.id();
        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EngineError::Init("helper stdio unavailable".into()));
        };

        if let Err(e) = write_line(&mut stdin, config) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EngineError::Init(format!("helper handshake failed: {}", e)));
        }

        let child = Arc::new(Mutex::new(child));
        let alive = Arc::new(AtomicBool::new(true));
        let expected_exit = Arc::new(AtomicBool::new(false));
        let handle = sink.handle();

        let spawned = {
            let child = Arc::clone(&child);
            let alive = Arc::clone(&alive);
            let expected_exit = Arc::clone(&expected_exit);

            thread::Builder::new()
                .name(format!("webnode-helper-{}", handle.0))
                .spawn(move || {
                    let mut plugin_crashed = false;
                    for line in BufReader::new(stdout).lines() {
                        let line = match line {
                            Ok(line) => line,
                            Err(e) => {
                                warn!("Renderer {} output error: {}", handle, e);
                                break;
                            }
                        };
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<EngineEvent>(&line) {
                            Ok(event) => {
                                plugin_crashed |= matches!(event, EngineEvent::PluginCrashed { .. });
                                if !sink.send(event) {
                                    break;
                                }
                            }
                            Err(e) => warn!("Renderer {} sent malformed event: {}", handle, e),
                        }
                    }

                    alive.store(false, Ordering::SeqCst);
                    if expected_exit.load(Ordering::SeqCst) || plugin_crashed {
                        return;
                    }
                    let reason = exit_reason(&child);
                    warn!("Renderer {} terminated: {}", handle, reason);
                    sink.send(EngineEvent::RendererCrashed { reason });
                })
        };
        let reader = match spawned {
            Ok(reader) => reader,
            Err(e) => {
                reap(&child);
                return Err(EngineError::Init(format!("failed to start reader thread: {}", e)));
            }
        };

        info!(
            "Renderer helper {} started with PID {} ({}x{})",
            handle,
            pid,
            config.width,
            config.height
        );

        Ok(Box::new(ProcessConnection {
            child,
            stdin: Some(stdin),
            reader: Some(reader),
            alive,
            expected_exit,
            grace: self.shutdown_grace,
        }))
    }
}

/// Kill a helper that never got a reader and collect its status
fn reap(child: &Mutex<Child>) {
    if let Ok(mut child) = child.lock() {
        let _ = child.kill();
        let _ = child.wait();
    }
}

/// Describe how a helper ended, waiting briefly for it to be reaped
fn exit_reason(child: &Mutex<Child>) -> String {
    let deadline = Instant::now() + Duration::from_secs(1);
    loop {
        let status = match child.lock() {
            Ok(mut child) => child.try_wait(),
            Err(poisoned) => poisoned.into_inner().try_wait(),
        };
        match status {
            Ok(Some(status)) => return format!("renderer process exited unexpectedly ({})", status),
            Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
            Ok(None) => return "renderer process closed its output".to_string(),
            Err(e) => return format!("renderer process state unknown: {}", e),
        }
    }
}

struct ProcessConnection {
    child: Arc<Mutex<Child>>,
    stdin: Option<ChildStdin>,
    reader: Option<JoinHandle<()>>,
    alive: Arc<AtomicBool>,
    expected_exit: Arc<AtomicBool>,
    grace: Duration,
}

impl ProcessConnection {
    fn try_wait(&self) -> std::io::Result<bool> {
        let mut child = self.child.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(child.try_wait()?.is_some())
    }

    fn wait_for_exit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.try_wait() {
                Ok(true) => return true,
                Ok(false) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
                Ok(false) => return false,
                Err(e) => {
                    warn!("Failed to poll renderer helper: {}", e);
                    return false;
                }
            }
        }
    }

    fn stop_child(&self) {
        if self.wait_for_exit(self.grace) {
            return;
        }

        // Try graceful shutdown first
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = self.child.lock().map(|c| c.id()).unwrap_or_else(|p| p.into_inner().id());
            if let Ok(pid) = pid.try_into() {
                let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
                if self.wait_for_exit(Duration::from_millis(500)) {
                    return;
                }
            }
        }

        warn!("Renderer helper didn't stop gracefully, forcing kill");
        let mut child = self.child.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = child.kill() {
            error!("Failed to kill renderer helper: {}", e);
        }
        let _ = child.wait();
    }
}

impl RendererConnection for ProcessConnection {
    fn send(&mut self, command: EngineCommand) -> Result<(), EngineError> {
        if !self.is_alive() {
            return Err(EngineError::Closed);
        }
        let stdin = self.stdin.as_mut().ok_or(EngineError::Closed)?;
        write_line(stdin, &command)
    }

    fn terminate(&mut self) {
        if self.stdin.is_none() && self.reader.is_none() {
            return;
        }
        self.expected_exit.store(true, Ordering::SeqCst);

        if let Some(mut stdin) = self.stdin.take() {
            if self.alive.load(Ordering::SeqCst) {
                let _ = write_line(&mut stdin, &EngineCommand::Shutdown);
            }
        }
        self.stop_child();

        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("Renderer helper reader panicked");
            }
        }
        self.alive.store(false, Ordering::SeqCst);
        debug!("Renderer helper stopped");
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl Drop for ProcessConnection {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn write_line<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<(), EngineError> {
    serde_json::to_writer(&mut *out, value).map_err(|e| EngineError::Protocol(e.to_string()))?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

/// Helper-side entry point. Returns the process exit code.
///
/// Reads the spawn configuration and then commands from `input`, runs a
/// headless page, and writes events to `output`.
pub fn run_helper<R, W>(mut input: R, mut output: W, load_delay: Duration) -> Result<i32, EngineError>
where
    R: BufRead + Send + 'static,
    W: Write,
{
    let mut first = String::new();
    if input.read_line(&mut first)? == 0 {
        return Err(EngineError::Protocol("missing spawn configuration".into()));
    }
    let config: SpawnConfig =
        serde_json::from_str(first.trim()).map_err(|e| EngineError::Protocol(e.to_string()))?;
    debug!("Helper starting with {:?}", config);

    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("webnode-helper-stdin".into())
        .spawn(move || {
            for line in input.lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<EngineCommand>(&line) {
                    Ok(command) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Ignoring malformed command: {}", e),
                }
            }
        })?;

    let page = HeadlessPage::new(config);
    let exit = page.run(&rx, load_delay, |event| match write_line(&mut output, &event) {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to write event: {}", e);
            false
        }
    });

    Ok(match exit {
        PageExit::Crashed(reason) => {
            error!("Renderer crashed: {}", reason);
            CRASH_EXIT_CODE
        }
        other => {
            debug!("Helper exiting ({:?})", other);
            0
        }
    })
}
