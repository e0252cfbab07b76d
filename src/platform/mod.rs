// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The desktop backend: window enumeration, the accessibility tree and raw
//! mouse/keyboard injection.
//!
//! `windows` talks to UI Automation and `SendInput`. `memory` is a scripted
//! desktop that records every injected event; it backs the test-suite,
//! including the loopback daemon tests. The binary only ever uses `native()`.

use std::rc::Rc;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::keys::Chord;
use crate::targets::Rect;

pub mod memory;
#[cfg(windows)]
pub mod windows;

/// Native accessibility handle to one element.
pub type ControlRef = Rc<dyn Control>;

/// A visible top-level window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub handle: isize,
    pub title: String,
    /// Executable name of the owning process, e.g. `notepad.exe`.
    pub process: String,
    pub pid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl FromStr for MouseButton {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "left" => Ok(MouseButton::Left),
            "right" => Ok(MouseButton::Right),
            "middle" => Ok(MouseButton::Middle),
            other => Err(Error::invalid("button", format!("unknown mouse button '{other}'"))),
        }
    }
}

impl std::fmt::Display for MouseButton {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        })
    }
}

/// One accessibility element. Read accessors never fail; they return empty
/// values when the element has gone away.
pub trait Control {
    fn name(&self) -> String;
    fn control_type(&self) -> String;
    fn class_name(&self) -> String;
    fn automation_id(&self) -> String;
    fn rect(&self) -> Option<Rect>;
    fn is_visible(&self) -> bool;
    fn is_enabled(&self) -> bool;
    /// Checked or selected state, when the element exposes one.
    fn is_selected(&self) -> Option<bool>;

    /// LegacyIAccessible value.
    fn legacy_value(&self) -> Option<String>;
    /// ValuePattern value.
    fn value(&self) -> Option<String>;
    fn texts(&self) -> Vec<String>;
    fn children(&self) -> Vec<ControlRef>;

    fn set_focus(&self) -> Result<()>;
    fn set_value(&self, text: &str) -> Result<()>;
    fn invoke(&self) -> Result<()>;
}

pub trait Desktop {
    /// Visible, titled top-level windows in enumeration order.
    fn windows(&self) -> Result<Vec<WindowInfo>>;
    fn foreground(&self) -> Option<WindowInfo>;
    /// Live title, `None` once the window is gone.
    fn window_title(&self, handle: isize) -> Option<String>;
    fn window_rect(&self, handle: isize) -> Result<Rect>;
    fn activate(&self, handle: isize) -> Result<()>;
    fn close(&self, handle: isize) -> Result<()>;
    fn launch(&self, command: &str) -> Result<()>;

    /// Visible and enabled descendants whose control type is in `types`,
    /// in tree order.
    fn controls(&self, handle: isize, types: &[&str]) -> Result<Vec<ControlRef>>;
    /// Direct children of the window element.
    fn children(&self, handle: isize) -> Result<Vec<ControlRef>>;
    fn capture(&self, handle: isize) -> Result<image::RgbaImage>;

    fn click(&self, x: i32, y: i32, button: MouseButton, double: bool) -> Result<()>;
    fn drag(&self, from: (i32, i32), to: (i32, i32), button: MouseButton, duration: Duration) -> Result<()>;
    /// Wheel input at a point, in notches. Positive is up / right.
    fn scroll(&self, x: i32, y: i32, notches: i32, horizontal: bool) -> Result<()>;
    fn send_chords(&self, chords: &[Chord]) -> Result<()>;
    fn type_text(&self, text: &str, pause: Duration) -> Result<()>;
}

/// The desktop of the machine we run on.
#[cfg(windows)]
pub fn native() -> Result<Rc<dyn Desktop>> {
    Ok(Rc::new(windows::UiaDesktop::new()?))
}

#[cfg(not(windows))]
pub fn native() -> Result<Rc<dyn Desktop>> {
    Err(Error::Platform(
        "UI Automation is only available on Windows".to_string(),
    ))
}
