/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Headless page model shared by the built-in backends
//!
//! The model does not lay out or render HTML. It tracks navigation, runs the
//! bridge calls found in executed script and inline `<script>` blocks, paints
//! solid frames and reacts to the crash URLs. That is enough to exercise every
//! host-side path of the crate, in-process or out-of-process.
//!
//! Conventions:
//! - `about:blank`, `data:text/html,...` and `file://` documents are loaded;
//!   other schemes complete with status 0 (not fetched)
//! - missing files complete with status 404
//! - `bridge.send('name', 'payload')` with two string literals is delivered as
//!   a bridge call; calls with computed arguments are skipped
//! - [`CRASH_URL`] kills the renderer, [`PLUGIN_CRASH_URL`] kills the plugin

use super::{EngineCommand, EngineEvent, Rect, SpawnConfig};
use log::{debug, trace};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

/// Navigating here terminates the renderer
pub const CRASH_URL: &str = "chrome://crash";

/// Navigating here terminates the shared plugin
pub const PLUGIN_CRASH_URL: &str = "chrome://plugin-crash";

const BRIDGE_CALL: &str = "bridge.send(";

/// Why a page loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageExit {
    /// The host asked for shutdown
    Shutdown,
    /// The host side went away
    Disconnected,
    /// The renderer died
    Crashed(String),
    /// The shared plugin died; a `PluginCrashed` event was already emitted
    PluginCrashed,
}

/// State of one headless page
#[derive(Debug)]
pub struct HeadlessPage {
    config: SpawnConfig,
    url: Option<String>,
    pending: Option<(u64, String)>,
    deadline: Option<Instant>,
    zoom: i32,
    inputs: u64,
}

impl HeadlessPage {
    pub fn new(config: SpawnConfig) -> Self {
        Self {
            config,
            url: None,
            pending: None,
            deadline: None,
            zoom: 0,
            inputs: 0,
        }
    }

    /// URL of the last completed load
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Whether a navigation is waiting to complete
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn zoom(&self) -> i32 {
        self.zoom
    }

    /// Number of input events received so far
    pub fn inputs_received(&self) -> u64 {
        self.inputs
    }

    /// Apply one command, appending resulting events to `out`
    pub fn apply(&mut self, command: EngineCommand, out: &mut Vec<EngineEvent>) -> Option<PageExit> {
        match command {
            EngineCommand::Navigate { seq, url } => return self.begin_load(seq, url, out),
            EngineCommand::ExecuteScript { script } => run_script(&script, out),
            EngineCommand::Input { event } => {
                self.inputs += 1;
                trace!("Page input #{}: {:?}", self.inputs, event);
            }
            EngineCommand::Resize { width, height } => {
                if width > 0 && height > 0 {
                    self.config.width = width;
                    self.config.height = height;
                    self.repaint(out);
                }
            }
            EngineCommand::SetTransparent { transparent } => {
                self.config.transparent = transparent;
                self.repaint(out);
            }
            EngineCommand::SetZoom { level } => {
                self.zoom = level;
                self.repaint(out);
            }
            EngineCommand::Shutdown => return Some(PageExit::Shutdown),
        }
        None
    }

    fn begin_load(&mut self, seq: u64, url: String, out: &mut Vec<EngineEvent>) -> Option<PageExit> {
        if url == CRASH_URL {
            return Some(PageExit::Crashed(format!("renderer navigated to {}", CRASH_URL)));
        }
        if url == PLUGIN_CRASH_URL {
            out.push(EngineEvent::PluginCrashed {
                path: self.config.plugin_path.display().to_string(),
            });
            return Some(PageExit::PluginCrashed);
        }

        if let Some((old, old_url)) = self.pending.take() {
            debug!("Navigation {} to {} superseded by {}", old, old_url, seq);
        }
        out.push(EngineEvent::LoadStart {
            seq,
            url: url.clone(),
        });
        self.pending = Some((seq, url));
        None
    }

    /// Finish the pending navigation, if any
    pub fn complete_pending(&mut self, out: &mut Vec<EngineEvent>) {
        let Some((seq, url)) = self.pending.take() else {
            return;
        };
        self.deadline = None;

        let (status, document) = resolve_document(&url);
        self.url = Some(url.clone());

        for script in extract_scripts(&document) {
            run_script(script, out);
        }
        self.repaint(out);
        out.push(EngineEvent::LoadEnd { seq, url, status });
    }

    fn repaint(&self, out: &mut Vec<EngineEvent>) {
        if self.url.is_none() {
            return;
        }
        let fill = if self.config.transparent {
            [0, 0, 0, 0]
        } else {
            [255, 255, 255, 255]
        };
        out.push(EngineEvent::Paint {
            width: self.config.width,
            height: self.config.height,
            dirty: vec![Rect::new(0, 0, self.config.width, self.config.height)],
            fill,
        });
    }

    /// Drive the page from `commands` until shutdown, disconnect or crash.
    ///
    /// Navigations complete `load_delay` after they start unless a newer
    /// navigation arrives first. `emit` returns false when nobody listens
    /// anymore.
    pub fn run<F>(mut self, commands: &Receiver<EngineCommand>, load_delay: Duration, mut emit: F) -> PageExit
    where
        F: FnMut(EngineEvent) -> bool,
    {
        let mut out = Vec::new();
        loop {
            let command = if self.pending.is_some() {
                let deadline = *self.deadline.get_or_insert_with(|| Instant::now() + load_delay);
                let wait = deadline.saturating_duration_since(Instant::now());
                match commands.recv_timeout(wait) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => return PageExit::Disconnected,
                }
            } else {
                match commands.recv() {
                    Ok(command) => Some(command),
                    Err(_) => return PageExit::Disconnected,
                }
            };

            let exit = match command {
                Some(command) => {
                    let navigating = matches!(command, EngineCommand::Navigate { .. });
                    let exit = self.apply(command, &mut out);
                    if navigating {
                        self.deadline = None;
                    }
                    exit
                }
                None => {
                    self.complete_pending(&mut out);
                    None
                }
            };

            for event in out.drain(..) {
                if !emit(event) {
                    return PageExit::Disconnected;
                }
            }
            if let Some(exit) = exit {
                return exit;
            }
        }
    }
}

/// Deliver the bridge calls found in `script`
pub fn run_script(script: &str, out: &mut Vec<EngineEvent>) {
    let mut rest = script;
    while let Some(pos) = rest.find(BRIDGE_CALL) {
        let args = &rest[pos + BRIDGE_CALL.len()..];
        match parse_call(args) {
            Ok(Some((name, payload, used))) => {
                out.push(EngineEvent::BridgeCall { name, payload });
                rest = &args[used..];
            }
            Ok(None) => rest = args,
            Err(message) => {
                out.push(EngineEvent::ScriptError { message });
                return;
            }
        }
    }
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_whitespace();
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    /// A quoted string literal, or `None` if the next token is not one
    fn string_literal(&mut self) -> Result<Option<String>, String> {
        self.skip_whitespace();
        let quote = match self.peek() {
            Some(q @ ('\'' | '"' | '`')) => q,
            _ => return Ok(None),
        };
        self.bump();

        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err("unterminated string literal in bridge.send".to_string()),
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some(other) => value.push(other),
                    None => return Err("unterminated escape in bridge.send".to_string()),
                },
                Some(c) if c == quote => return Ok(Some(value)),
                Some(c) => value.push(c),
            }
        }
    }
}

/// Parse `'name', 'payload')`. Returns the bytes consumed.
fn parse_call(args: &str) -> Result<Option<(String, String, usize)>, String> {
    let mut cursor = Cursor { src: args, pos: 0 };

    let Some(name) = cursor.string_literal()? else {
        return Ok(None);
    };
    if !cursor.eat(',') {
        return Err(format!("bridge.send('{}') expects a name and a data argument", name));
    }
    let Some(payload) = cursor.string_literal()? else {
        return Ok(None);
    };
    if !cursor.eat(')') {
        return Err(format!("bridge.send('{}', ...) takes exactly two arguments", name));
    }
    Ok(Some((name, payload, cursor.pos)))
}

/// Bodies of the inline `<script>` elements of `html`
fn extract_scripts(html: &str) -> Vec<&str> {
    let lower = html.to_ascii_lowercase();
    let mut scripts = Vec::new();
    let mut from = 0;

    while let Some(open) = lower[from..].find("<script") {
        let open = from + open;
        let Some(body_start) = lower[open..].find('>').map(|p| open + p + 1) else {
            break;
        };
        let Some(body_end) = lower[body_start..].find("</script>").map(|p| body_start + p) else {
            break;
        };
        scripts.push(&html[body_start..body_end]);
        from = body_end + "</script>".len();
    }
    scripts
}

/// Status code and document text for `url`
fn resolve_document(url: &str) -> (u16, String) {
    if url == "about:blank" {
        return (200, String::new());
    }
    if let Some(rest) = url.strip_prefix("data:") {
        return match rest.split_once(',') {
            Some((_, body)) => (200, percent_decode(body)),
            None => (400, String::new()),
        };
    }
    if let Some(path) = url.strip_prefix("file://") {
        let path = percent_decode(path);
        return match std::fs::read_to_string(&path) {
            Ok(content) => (200, content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (404, String::new()),
            Err(e) => {
                debug!("Failed to read {}: {}", path, e);
                (500, String::new())
            }
        };
    }
    (0, String::new())
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                decoded.push(byte);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::mpsc;

    fn page() -> HeadlessPage {
        HeadlessPage::new(SpawnConfig {
            width: 4,
            height: 2,
            transparent: false,
            plugin_path: PathBuf::from("/opt/engine"),
        })
    }

    fn bridge_calls(events: &[EngineEvent]) -> Vec<(String, String)> {
        events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::BridgeCall { name, payload } => Some((name.clone(), payload.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_run_script_finds_literal_calls() {
        let mut out = Vec::new();
        run_script(
            r#"bridge.send('load', "ready"); var x = 1; bridge.send( "setvolume" , '0.5' );"#,
            &mut out,
        );
        assert_eq!(
            bridge_calls(&out),
            vec![
                ("load".to_string(), "ready".to_string()),
                ("setvolume".to_string(), "0.5".to_string())
            ]
        );
    }

    #[test]
    fn test_run_script_skips_computed_arguments() {
        let mut out = Vec::new();
        run_script("bridge.send('onclick', name); bridge.send(cmd, 'x');", &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_run_script_reports_malformed_calls() {
        let mut out = Vec::new();
        run_script("bridge.send('load', 'never closed", &mut out);
        assert!(matches!(out.as_slice(), [EngineEvent::ScriptError { .. }]));

        out.clear();
        run_script("bridge.send('load')", &mut out);
        assert!(matches!(out.as_slice(), [EngineEvent::ScriptError { .. }]));
    }

    #[test]
    fn test_escapes() {
        let mut out = Vec::new();
        run_script(r#"bridge.send('msg', 'it\'s\nfine')"#, &mut out);
        assert_eq!(bridge_calls(&out), vec![("msg".to_string(), "it's\nfine".to_string())]);
    }

    #[test]
    fn test_extract_scripts() {
        let html = "<html><SCRIPT type='text/javascript'>a()</SCRIPT><p>x</p><script>b()</script>";
        assert_eq!(extract_scripts(html), vec!["a()", "b()"]);
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("a%20b%27c"), "a b'c");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }

    #[test]
    fn test_load_sequence() {
        let mut page = page();
        let mut out = Vec::new();

        let url = "data:text/html,<script>bridge.send('load','ready')</script>";
        assert_eq!(
            page.apply(
                EngineCommand::Navigate {
                    seq: 1,
                    url: url.into()
                },
                &mut out
            ),
            None
        );
        assert!(page.has_pending());
        page.complete_pending(&mut out);

        assert!(matches!(out[0], EngineEvent::LoadStart { seq: 1, .. }));
        assert_eq!(
            out[1],
            EngineEvent::BridgeCall {
                name: "load".into(),
                payload: "ready".into()
            }
        );
        assert!(matches!(out[2], EngineEvent::Paint { width: 4, height: 2, fill: [255, 255, 255, 255], .. }));
        assert_eq!(
            out[3],
            EngineEvent::LoadEnd {
                seq: 1,
                url: url.into(),
                status: 200
            }
        );
        assert_eq!(page.url(), Some(url));
    }

    #[test]
    fn test_missing_file_is_404() {
        let mut page = page();
        let mut out = Vec::new();
        page.apply(
            EngineCommand::Navigate {
                seq: 1,
                url: "file:///definitely/not/here.html".into(),
            },
            &mut out,
        );
        page.complete_pending(&mut out);
        assert!(matches!(out.last(), Some(EngineEvent::LoadEnd { status: 404, .. })));
    }

    #[test]
    fn test_crash_urls() {
        let mut out = Vec::new();
        let exit = page().apply(
            EngineCommand::Navigate {
                seq: 1,
                url: CRASH_URL.into(),
            },
            &mut out,
        );
        assert!(matches!(exit, Some(PageExit::Crashed(_))));
        assert!(out.is_empty());

        let exit = page().apply(
            EngineCommand::Navigate {
                seq: 1,
                url: PLUGIN_CRASH_URL.into(),
            },
            &mut out,
        );
        assert_eq!(exit, Some(PageExit::PluginCrashed));
        assert_eq!(
            out,
            vec![EngineEvent::PluginCrashed {
                path: "/opt/engine".into()
            }]
        );
    }

    #[test]
    fn test_run_supersedes_pending_navigation() {
        let (tx, rx) = mpsc::channel();
        tx.send(EngineCommand::Navigate {
            seq: 1,
            url: "about:blank".into(),
        })
        .unwrap();
        tx.send(EngineCommand::Navigate {
            seq: 2,
            url: "about:blank".into(),
        })
        .unwrap();

        let mut events = Vec::new();
        let exit = page().run(&rx, Duration::from_millis(50), |event| {
            let done = matches!(event, EngineEvent::LoadEnd { .. });
            events.push(event);
            if done {
                tx.send(EngineCommand::Shutdown).unwrap();
            }
            true
        });

        assert_eq!(exit, PageExit::Shutdown);
        let ends: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::LoadEnd { seq, .. } => Some(*seq),
                _ => None,
            })
            .collect();
        assert_eq!(ends, vec![2]);
    }
}
