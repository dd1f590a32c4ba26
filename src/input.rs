/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Host input events and their translation into engine input
//!
//! The host delivers keyboard and mouse events in its own coordinate space
//! ([`HostEvent`]). Browser nodes translate them into node-local
//! [`InputEvent`]s before forwarding them to the renderer.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Wheel motion from the host is in "lines"; the engine expects pixels.
pub const WHEEL_SCALE: f32 = 40.0;

bitflags! {
    /// Modifier keys held during an input event
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Modifiers: u32 {
        const SHIFT = 1;
        const CONTROL = 1 << 1;
        const ALT = 1 << 2;
        const NUM_LOCK = 1 << 3;
        const CAPS_LOCK = 1 << 4;
    }
}

/// Kind of key event delivered to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAction {
    Down,
    Up,
    /// A key press that produced text
    Char,
}

/// Mouse buttons the engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

/// Input event in node-local pixel coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputEvent {
    Key {
        action: KeyAction,
        code: u32,
        character: Option<char>,
        modifiers: Modifiers,
    },
    MouseMove {
        x: i32,
        y: i32,
    },
    MouseClick {
        x: i32,
        y: i32,
        button: MouseButton,
        released: bool,
        clicks: u32,
    },
    MouseWheel {
        x: i32,
        y: i32,
        dx: i32,
        dy: i32,
    },
}

impl InputEvent {
    /// Key-down event for a key code
    pub fn key_down(code: u32) -> Self {
        InputEvent::Key {
            action: KeyAction::Down,
            code,
            character: None,
            modifiers: Modifiers::empty(),
        }
    }

    /// Key-up event for a key code
    pub fn key_up(code: u32) -> Self {
        InputEvent::Key {
            action: KeyAction::Up,
            code,
            character: None,
            modifiers: Modifiers::empty(),
        }
    }

    /// Text input for a single character
    pub fn character(c: char) -> Self {
        InputEvent::Key {
            action: KeyAction::Char,
            code: c as u32,
            character: Some(c),
            modifiers: Modifiers::empty(),
        }
    }

    pub fn is_keyboard(&self) -> bool {
        matches!(self, InputEvent::Key { .. })
    }

    pub fn is_mouse(&self) -> bool {
        !self.is_keyboard()
    }
}

/// Cursor event phase as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorPhase {
    Down,
    Up,
    Motion,
}

/// Buttons as reported by the host, wheel "buttons" included
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostButton {
    Left,
    Middle,
    Right,
    WheelUp,
    WheelDown,
}

/// An input event in host (scene) coordinates
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Key {
        pressed: bool,
        scan_code: u32,
        /// Text produced by the key, empty for non-printing keys
        text: String,
        modifiers: Modifiers,
    },
    Cursor {
        phase: CursorPhase,
        button: Option<HostButton>,
        x: f32,
        y: f32,
    },
    Wheel {
        x: f32,
        y: f32,
        motion_x: f32,
        motion_y: f32,
    },
}

impl HostEvent {
    pub fn is_keyboard(&self) -> bool {
        matches!(self, HostEvent::Key { .. })
    }

    /// Scene position of pointer events
    pub fn position(&self) -> Option<(f32, f32)> {
        match self {
            HostEvent::Key { .. } => None,
            HostEvent::Cursor { x, y, .. } | HostEvent::Wheel { x, y, .. } => Some((*x, *y)),
        }
    }

    /// Translate into an engine event relative to `origin`.
    ///
    /// Returns `None` for events the engine has no equivalent for, such as a
    /// press of a wheel "button".
    pub fn translate(&self, origin: (f32, f32)) -> Option<InputEvent> {
        let local = |x: f32, y: f32| ((x - origin.0) as i32, (y - origin.1) as i32);

        match self {
            HostEvent::Key {
                pressed,
                scan_code,
                text,
                modifiers,
            } => {
                let character = text.chars().next().filter(|_| *pressed);
                let event = match character {
                    Some(c) => InputEvent::Key {
                        action: KeyAction::Char,
                        code: c as u32,
                        character: Some(c),
                        modifiers: *modifiers,
                    },
                    None => InputEvent::Key {
                        action: if *pressed { KeyAction::Down } else { KeyAction::Up },
                        code: *scan_code,
                        character: None,
                        modifiers: *modifiers,
                    },
                };
                Some(event)
            }
            HostEvent::Cursor { phase, button, x, y } => {
                let (x, y) = local(*x, *y);
                if *phase == CursorPhase::Motion {
                    return Some(InputEvent::MouseMove { x, y });
                }
                let button = match button {
                    Some(HostButton::Left) => MouseButton::Left,
                    Some(HostButton::Middle) => MouseButton::Middle,
                    Some(HostButton::Right) => MouseButton::Right,
                    _ => return None,
                };
                Some(InputEvent::MouseClick {
                    x,
                    y,
                    button,
                    released: *phase == CursorPhase::Up,
                    clicks: 1,
                })
            }
            HostEvent::Wheel {
                x,
                y,
                motion_x,
                motion_y,
            } => {
                let (x, y) = local(*x, *y);
                Some(InputEvent::MouseWheel {
                    x,
                    y,
                    dx: (motion_x * WHEEL_SCALE) as i32,
                    dy: (motion_y * WHEEL_SCALE) as i32,
                })
            }
        }
    }
}
