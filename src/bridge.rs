/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Call bridge between page script and host callbacks
//!
//! Page script calls `bridge.send(name, data)`. The engine forwards the pair
//! to the host, where the bridge of the owning node looks up `name` and runs
//! the registered handler on the host turn. Each callback declares the
//! payload type it expects ([`Payload`]); payloads that do not decode are
//! rejected before the handler sees them.
//!
//! Handlers never touch the node directly. They queue follow-up work on a
//! [`PageContext`], which the node applies once the handler has returned.
//! That is also how a handler removes itself.

use log::{debug, warn};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Bridge name used by the click binding script
pub const CLICK_CALLBACK: &str = "onclick";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Callback '{0}' is already registered")]
    DuplicateName(String),

    #[error("Callback name '{0}' is reserved")]
    ReservedName(String),
}

/// A payload that does not match the callback's declared type
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Payload {payload:?} for callback '{name}' is not a valid {expected}: {reason}")]
pub struct PayloadDecodeError {
    pub name: String,
    pub payload: String,
    pub expected: &'static str,
    pub reason: String,
}

/// Typed view of a string payload
pub trait Payload: Sized {
    /// Human-readable type name for diagnostics
    const KIND: &'static str;

    fn decode(raw: &str) -> Result<Self, String>;
}

impl Payload for String {
    const KIND: &'static str = "string";

    fn decode(raw: &str) -> Result<Self, String> {
        Ok(raw.to_string())
    }
}

impl Payload for f64 {
    const KIND: &'static str = "number";

    fn decode(raw: &str) -> Result<Self, String> {
        let value: f64 = raw.trim().parse().map_err(|e| format!("{}", e))?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err("number is not finite".to_string())
        }
    }
}

impl Payload for i64 {
    const KIND: &'static str = "integer";

    fn decode(raw: &str) -> Result<Self, String> {
        raw.trim().parse().map_err(|e| format!("{}", e))
    }
}

impl Payload for bool {
    const KIND: &'static str = "boolean";

    fn decode(raw: &str) -> Result<Self, String> {
        raw.trim().parse().map_err(|e| format!("{}", e))
    }
}

/// The `"enable"` / `"disable"` tokens pages use for switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Enable,
    Disable,
}

impl Toggle {
    pub fn is_enabled(self) -> bool {
        self == Toggle::Enable
    }
}

impl Payload for Toggle {
    const KIND: &'static str = "toggle";

    fn decode(raw: &str) -> Result<Self, String> {
        match raw.trim() {
            "enable" => Ok(Toggle::Enable),
            "disable" => Ok(Toggle::Disable),
            other => Err(format!("expected \"enable\" or \"disable\", got {:?}", other)),
        }
    }
}

/// JSON payload decoded into `T`
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T: DeserializeOwned> Payload for Json<T> {
    const KIND: &'static str = "JSON document";

    fn decode(raw: &str) -> Result<Self, String> {
        serde_json::from_str(raw).map(Json).map_err(|e| e.to_string())
    }
}

/// Follow-up work a handler asks of its node
#[derive(Debug, Clone, PartialEq)]
pub enum PageAction {
    ExecuteScript(String),
    LoadUrl(String),
    Refresh,
    RemoveCallback(String),
    RemoveClickCallback(String),
    SetVolume(f64),
    SetScrollbars(bool),
}

/// Queue of [`PageAction`]s filled by a handler
#[derive(Debug, Default)]
pub struct PageContext {
    actions: Vec<PageAction>,
}

impl PageContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn execute_script(&mut self, script: impl Into<String>) {
        self.actions.push(PageAction::ExecuteScript(script.into()));
    }

    pub fn load_url(&mut self, url: impl Into<String>) {
        self.actions.push(PageAction::LoadUrl(url.into()));
    }

    pub fn refresh(&mut self) {
        self.actions.push(PageAction::Refresh);
    }

    pub fn remove_callback(&mut self, name: impl Into<String>) {
        self.actions.push(PageAction::RemoveCallback(name.into()));
    }

    pub fn remove_click_callback(&mut self, dom_id: impl Into<String>) {
        self.actions.push(PageAction::RemoveClickCallback(dom_id.into()));
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.actions.push(PageAction::SetVolume(volume));
    }

    pub fn set_scrollbars(&mut self, enabled: bool) {
        self.actions.push(PageAction::SetScrollbars(enabled));
    }

    pub fn actions(&self) -> &[PageAction] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn take_actions(&mut self) -> Vec<PageAction> {
        std::mem::take(&mut self.actions)
    }
}

/// Result of routing one page call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// No callback with that name; a warning was logged
    Unhandled,
    /// The payload did not decode; the handler did not run
    Rejected(PayloadDecodeError),
}

/// Dispatch counters of one bridge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub delivered: u64,
    pub unhandled: u64,
    pub rejected: u64,
}

type RawHandler = Box<dyn FnMut(&str, &mut PageContext) -> Result<(), String>>;
type ClickHandler = Box<dyn FnMut(&mut PageContext)>;

struct Callback {
    kind: &'static str,
    handler: RawHandler,
}

/// Named callbacks of one node
pub struct CallBridge {
    owner: String,
    callbacks: HashMap<String, Callback>,
    clicks: HashMap<String, ClickHandler>,
    stats: BridgeStats,
}

impl CallBridge {
    /// Empty bridge; `owner` names the node in log output
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            callbacks: HashMap::new(),
            clicks: HashMap::new(),
            stats: BridgeStats::default(),
        }
    }

    /// Register `handler` for page calls to `name`.
    ///
    /// A name can only be registered once; remove the existing callback
    /// before registering a new one.
    pub fn register<P, F>(&mut self, name: &str, mut handler: F) -> Result<(), BridgeError>
    where
        P: Payload + 'static,
        F: FnMut(P, &mut PageContext) + 'static,
    {
        if name == CLICK_CALLBACK {
            return Err(BridgeError::ReservedName(name.to_string()));
        }
        if self.callbacks.contains_key(name) {
            return Err(BridgeError::DuplicateName(name.to_string()));
        }

        let raw: RawHandler = Box::new(move |payload, page| {
            let value = P::decode(payload)?;
            handler(value, page);
            Ok(())
        });
        self.callbacks.insert(
            name.to_string(),
            Callback {
                kind: P::KIND,
                handler: raw,
            },
        );
        debug!("Node '{}': registered callback '{}' ({})", self.owner, name, P::KIND);
        Ok(())
    }

    /// Remove the callback for `name`. Unknown names only log a warning.
    pub fn unregister(&mut self, name: &str) -> bool {
        if self.callbacks.remove(name).is_some() {
            debug!("Node '{}': removed callback '{}'", self.owner, name);
            true
        } else {
            warn!("Node '{}': no callback named '{}' to remove", self.owner, name);
            false
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    /// Registered callback names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.callbacks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run `handler` when the element with id `dom_id` is clicked
    pub fn add_click_callback<F>(&mut self, dom_id: &str, handler: F) -> Result<(), BridgeError>
    where
        F: FnMut(&mut PageContext) + 'static,
    {
        if self.clicks.contains_key(dom_id) {
            return Err(BridgeError::DuplicateName(dom_id.to_string()));
        }
        self.clicks.insert(dom_id.to_string(), Box::new(handler));
        debug!("Node '{}': registered click callback for '#{}'", self.owner, dom_id);
        Ok(())
    }

    pub fn remove_click_callback(&mut self, dom_id: &str) -> bool {
        if self.clicks.remove(dom_id).is_some() {
            true
        } else {
            warn!("Node '{}': no click callback for '#{}' to remove", self.owner, dom_id);
            false
        }
    }

    pub fn has_click_callbacks(&self) -> bool {
        !self.clicks.is_empty()
    }

    /// Route a page call to its handler
    pub fn dispatch(&mut self, name: &str, payload: &str, page: &mut PageContext) -> DispatchOutcome {
        if name == CLICK_CALLBACK {
            return self.dispatch_click(payload, page);
        }

        let Some(callback) = self.callbacks.get_mut(name) else {
            warn!("Node '{}': page called unknown callback '{}'", self.owner, name);
            self.stats.unhandled += 1;
            return DispatchOutcome::Unhandled;
        };

        match (callback.handler)(payload, page) {
            Ok(()) => {
                self.stats.delivered += 1;
                DispatchOutcome::Delivered
            }
            Err(reason) => {
                let err = PayloadDecodeError {
                    name: name.to_string(),
                    payload: payload.to_string(),
                    expected: callback.kind,
                    reason,
                };
                warn!("Node '{}': {}", self.owner, err);
                self.stats.rejected += 1;
                DispatchOutcome::Rejected(err)
            }
        }
    }

    fn dispatch_click(&mut self, dom_id: &str, page: &mut PageContext) -> DispatchOutcome {
        match self.clicks.get_mut(dom_id) {
            Some(handler) => {
                handler(page);
                self.stats.delivered += 1;
                DispatchOutcome::Delivered
            }
            None => {
                debug!("Node '{}': click on '#{}' has no callback", self.owner, dom_id);
                self.stats.unhandled += 1;
                DispatchOutcome::Unhandled
            }
        }
    }

    /// Drop every callback
    pub fn clear(&mut self) {
        let count = self.callbacks.len() + self.clicks.len();
        self.callbacks.clear();
        self.clicks.clear();
        if count > 0 {
            debug!("Node '{}': dropped {} callbacks", self.owner, count);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty() && self.clicks.is_empty()
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }
}

impl fmt::Debug for CallBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallBridge")
            .field("owner", &self.owner)
            .field("callbacks", &self.names())
            .field("clicks", &self.clicks.len())
            .field("stats", &self.stats)
            .finish()
    }
}

/// Page-side shim defining `bridge.send(name, data)`
pub fn bootstrap_script() -> &'static str {
    "window.bridge = window.bridge || { send: function (name, data) { \
     if (window.__webnode_post) { window.__webnode_post(String(name), String(data)); } } };"
}

/// Makes every element with an id report clicks through the bridge
pub fn click_binding_script() -> String {
    format!(
        "document.querySelectorAll('[id]').forEach(function (el) {{ \
         el.addEventListener('click', function () {{ bridge.send('{}', el.id); }}); }});",
        CLICK_CALLBACK
    )
}

pub fn scrollbar_script(enabled: bool) -> String {
    let overflow = if enabled { "auto" } else { "hidden" };
    format!("document.documentElement.style.overflow = '{}';", overflow)
}

/// Applies `volume` to every media element of the page
pub fn volume_script(volume: f64) -> String {
    format!(
        "document.querySelectorAll('audio, video').forEach(function (m) {{ m.volume = {}; }});",
        volume
    )
}
