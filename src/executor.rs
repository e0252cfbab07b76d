// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Action execution bound to one window.
//!
//! [`Executor::on_control`] drives a native control (Tier 1). [`Executor::global`]
//! acts on the window as a whole or at absolute screen coordinates, which is
//! also what coordinate-only targets are mapped onto.

use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::{ActionConfig, ClickApi, InputTextApi};
use crate::error::{Error, Result};
use crate::keys::{self, Chord, Key, VK_BACK, VK_CONTROL, VK_RETURN};
use crate::platform::{Control, Desktop, MouseButton, WindowInfo};

const ENABLE_POLL: Duration = Duration::from_millis(500);
const ENABLE_TIMEOUT: Duration = Duration::from_secs(10);
const VK_A: u16 = 0x41;

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Click { button: MouseButton, double: bool },
    SetText { text: String },
    Keys { keys: String },
    Texts,
    /// Wheel notches, positive is up / right.
    Wheel { dist: i32, horizontal: bool },
    ClickAt { x: i32, y: i32, button: MouseButton, double: bool },
    DragAt {
        start: (i32, i32),
        end: (i32, i32),
        button: MouseButton,
        /// Seconds.
        duration: f64,
    },
    Type { text: String },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Click { .. } => "click_input",
            Action::SetText { .. } => "set_edit_text",
            Action::Keys { .. } => "keyboard_input",
            Action::Texts => "texts",
            Action::Wheel { .. } => "wheel_mouse_input",
            Action::ClickAt { .. } => "click_on_coordinates",
            Action::DragAt { .. } => "drag_on_coordinates",
            Action::Type { .. } => "type",
        }
    }
}

pub struct Executor {
    desktop: Rc<dyn Desktop>,
    window: WindowInfo,
    config: ActionConfig,
}

impl Executor {
    pub fn new(desktop: Rc<dyn Desktop>, window: WindowInfo, config: ActionConfig) -> Self {
        Self { desktop, window, config }
    }

    pub fn window(&self) -> &WindowInfo {
        &self.window
    }

    /// Run `action` against a native control.
    pub fn on_control(&self, control: &dyn Control, action: &Action) -> Result<Value> {
        self.desktop.activate(self.window.handle)?;
        debug!(action = action.name(), control = %control.name(), "native action");
        match action {
            Action::Click { button, double } => {
                self.click_control(control, *button, *double)?;
                thread::sleep(self.config.after_click_wait);
                Ok(json!(format!(
                    "Click action has been executed, with parameters: button={button}, double={double}"
                )))
            }
            Action::SetText { text } => {
                self.set_text(control, text)?;
                Ok(Value::Null)
            }
            Action::Keys { keys } => {
                control.set_focus()?;
                let chords = keys::parse(keys)?;
                self.desktop.send_chords(&chords)?;
                Ok(json!(keys))
            }
            Action::Texts => Ok(json!(control.texts())),
            Action::Wheel { dist, horizontal } => {
                let (x, y) = match control.rect() {
                    Some(r) => r.center(),
                    None => self.desktop.window_rect(self.window.handle)?.center(),
                };
                self.desktop.scroll(x, y, *dist, *horizontal)?;
                Ok(json!(if *horizontal {
                    "The horizontal wheel mouse input action has been executed."
                } else {
                    "The wheel mouse input action has been executed on the selected control."
                }))
            }
            Action::ClickAt { .. } | Action::DragAt { .. } | Action::Type { .. } => self.global(action),
        }
    }

    /// Run `action` against the window as a whole.
    pub fn global(&self, action: &Action) -> Result<Value> {
        self.desktop.activate(self.window.handle)?;
        debug!(action = action.name(), window = %self.window.title, "global action");
        match action {
            Action::Click { .. } | Action::SetText { .. } | Action::Texts => Err(Error::NeedsTarget(action.name())),
            Action::Keys { keys } => {
                let chords = keys::parse(keys)?;
                self.desktop.send_chords(&chords)?;
                Ok(json!(keys))
            }
            Action::Wheel { dist, horizontal } => {
                let (x, y) = self.desktop.window_rect(self.window.handle)?.center();
                self.desktop.scroll(x, y, *dist, *horizontal)?;
                Ok(json!(if *horizontal {
                    "The horizontal wheel mouse input action has been executed."
                } else {
                    "The wheel mouse input action has been executed on the application window."
                }))
            }
            Action::ClickAt { x, y, button, double } => {
                self.desktop.click(*x, *y, *button, *double)?;
                thread::sleep(self.config.after_click_wait);
                let kind = if *double { "double" } else { "single" };
                Ok(json!(format!(
                    "The click action has been executed at ({x}, {y}) with button '{button}' and {kind} click."
                )))
            }
            Action::DragAt { start, end, button, duration } => {
                let d = Duration::try_from_secs_f64(*duration)
                    .map_err(|e| Error::invalid("duration", e.to_string()))?;
                self.desktop.drag(*start, *end, *button, d)?;
                Ok(json!(format!(
                    "The drag action has been executed from ({}, {}) to ({}, {}), with a duration of {duration:?} and a button '{button}' held down.",
                    start.0, start.1, end.0, end.1
                )))
            }
            Action::Type { text } => {
                self.desktop.type_text(text, self.config.input_text_inter_key_pause)?;
                Ok(Value::Null)
            }
        }
    }

    fn click_control(&self, control: &dyn Control, button: MouseButton, double: bool) -> Result<()> {
        if self.config.click_api == ClickApi::Invoke && button == MouseButton::Left && !double {
            match control.invoke() {
                Ok(()) => return Ok(()),
                Err(e) => warn!(error = %e, control = %control.name(), "invoke failed, clicking instead"),
            }
        }
        let (x, y) = control
            .rect()
            .map(|r| r.center())
            .ok_or_else(|| Error::Platform(format!("control '{}' has no on-screen rect", control.name())))?;
        self.desktop.click(x, y, button, double)
    }

    fn set_text(&self, control: &dyn Control, text: &str) -> Result<()> {
        control.set_focus()?;
        wait_enabled(control);
        let pause = self.config.input_text_inter_key_pause;
        match self.config.input_text_api {
            InputTextApi::SetText => {
                if let Err(e) = control.set_value(text) {
                    warn!(error = %e, control = %control.name(), "set_value failed, typing instead");
                    self.desktop.send_chords(&[
                        Chord { modifiers: vec![VK_CONTROL], key: Some(Key::Vk(VK_A)) },
                        Chord { modifiers: Vec::new(), key: Some(Key::Vk(VK_BACK)) },
                    ])?;
                    // The typed fallback never appends Enter.
                    return self.desktop.type_text(text, pause);
                }
            }
            InputTextApi::TypeKeys => self.desktop.type_text(text, pause)?,
        }
        if self.config.input_text_enter {
            self.desktop
                .send_chords(&[Chord { modifiers: Vec::new(), key: Some(Key::Vk(VK_RETURN)) }])?;
        }
        Ok(())
    }
}

fn wait_enabled(control: &dyn Control) {
    let deadline = Instant::now() + ENABLE_TIMEOUT;
    while !control.is_enabled() {
        if Instant::now() >= deadline {
            warn!(control = %control.name(), "control still disabled, typing anyway");
            return;
        }
        thread::sleep(ENABLE_POLL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::{InputEvent, MemoryControl, MemoryDesktop};
    use crate::targets::Rect;

    fn setup(config: ActionConfig) -> (Rc<MemoryDesktop>, Executor, isize) {
        let desktop = Rc::new(MemoryDesktop::new());
        let h = desktop.add_window(
            "Form",
            "form.exe",
            Rect::new(0, 0, 400, 300),
            vec![
                MemoryControl::new("Button", "OK").with_rect(10, 10, 30, 30),
                MemoryControl::new("Edit", "Name").with_rect(50, 10, 150, 30).with_value("old"),
                MemoryControl::new("Text", "Label").with_rect(50, 40, 150, 60),
            ],
        );
        let window = desktop.windows().unwrap().remove(0);
        let executor = Executor::new(desktop.clone(), window, config);
        desktop.clear_events();
        (desktop, executor, h)
    }

    fn no_pause() -> ActionConfig {
        ActionConfig {
            input_text_inter_key_pause: Duration::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn click_lands_on_centre_after_activation() {
        let (desktop, ex, h) = setup(no_pause());
        let ok = desktop.find(h, "OK").unwrap();
        let out = ex
            .on_control(ok.as_ref(), &Action::Click { button: MouseButton::Left, double: false })
            .unwrap();
        assert_eq!(out, "Click action has been executed, with parameters: button=left, double=false");
        assert_eq!(
            desktop.events(),
            vec![
                InputEvent::Activate { handle: h },
                InputEvent::Click { x: 20, y: 20, button: MouseButton::Left, double: false },
            ]
        );
    }

    #[test]
    fn invoke_api_skips_the_mouse() {
        let cfg = ActionConfig { click_api: ClickApi::Invoke, ..no_pause() };
        let (desktop, ex, h) = setup(cfg);
        let ok = desktop.find(h, "OK").unwrap();
        ex.on_control(ok.as_ref(), &Action::Click { button: MouseButton::Left, double: false })
            .unwrap();
        assert_eq!(desktop.events()[1], InputEvent::Invoke { name: "OK".into() });
        assert_eq!(desktop.events().len(), 2);
    }

    #[test]
    fn set_text_falls_back_to_typing() {
        let cfg = ActionConfig { input_text_api: InputTextApi::SetText, ..no_pause() };
        let (desktop, ex, h) = setup(cfg);

        let edit = desktop.find(h, "Name").unwrap();
        let out = ex.on_control(edit.as_ref(), &Action::SetText { text: "Ada".into() }).unwrap();
        assert!(out.is_null());
        assert_eq!(edit.value().as_deref(), Some("Ada"));

        desktop.clear_events();
        let label = desktop.find(h, "Label").unwrap();
        ex.on_control(label.as_ref(), &Action::SetText { text: "x".into() }).unwrap();
        let events = desktop.events();
        assert!(matches!(&events[2], InputEvent::Chords(c) if c.len() == 2));
        assert_eq!(events[3], InputEvent::Text("x".into()));
    }

    #[test]
    fn typed_text_can_end_with_enter() {
        let cfg = ActionConfig { input_text_enter: true, ..no_pause() };
        let (desktop, ex, h) = setup(cfg);
        let edit = desktop.find(h, "Name").unwrap();
        ex.on_control(edit.as_ref(), &Action::SetText { text: "hi".into() }).unwrap();
        let events = desktop.events();
        assert_eq!(events[1], InputEvent::Focus { name: "Name".into() });
        assert_eq!(events[2], InputEvent::Text("hi".into()));
        assert_eq!(
            events[3],
            InputEvent::Chords(vec![Chord { modifiers: vec![], key: Some(Key::Vk(VK_RETURN)) }])
        );
    }

    #[test]
    fn wheel_on_control_and_window() {
        let (desktop, ex, h) = setup(no_pause());
        let ok = desktop.find(h, "OK").unwrap();
        let out = ex
            .on_control(ok.as_ref(), &Action::Wheel { dist: -3, horizontal: false })
            .unwrap();
        assert_eq!(out, "The wheel mouse input action has been executed on the selected control.");
        assert_eq!(desktop.events()[1], InputEvent::Scroll { x: 20, y: 20, notches: -3, horizontal: false });

        let out = ex.global(&Action::Wheel { dist: 2, horizontal: true }).unwrap();
        assert_eq!(out, "The horizontal wheel mouse input action has been executed.");
        assert_eq!(desktop.events()[3], InputEvent::Scroll { x: 200, y: 150, notches: 2, horizontal: true });
    }

    #[test]
    fn coordinate_actions_report_what_they_did() {
        let (desktop, ex, _) = setup(no_pause());
        let out = ex
            .global(&Action::ClickAt { x: 5, y: 6, button: MouseButton::Right, double: true })
            .unwrap();
        assert_eq!(out, "The click action has been executed at (5, 6) with button 'right' and double click.");

        let out = ex
            .global(&Action::DragAt { start: (1, 2), end: (3, 4), button: MouseButton::Left, duration: 1.0 })
            .unwrap();
        assert_eq!(
            out,
            "The drag action has been executed from (1, 2) to (3, 4), with a duration of 1.0 and a button 'left' held down."
        );
        assert_eq!(
            desktop.events()[3],
            InputEvent::Drag { from: (1, 2), to: (3, 4), button: MouseButton::Left }
        );
    }

    #[test]
    fn target_actions_refuse_to_run_globally() {
        let (_, ex, _) = setup(no_pause());
        let err = ex.global(&Action::Texts).unwrap_err();
        assert_eq!(err.to_string(), "action 'texts' needs a target control");
    }

    #[test]
    fn keys_are_parsed_before_sending() {
        let (desktop, ex, _) = setup(no_pause());
        assert_eq!(ex.global(&Action::Keys { keys: "ctrl+s".into() }).unwrap(), "ctrl+s");
        assert!(matches!(&desktop.events()[1], InputEvent::Chords(c) if c[0].modifiers == vec![VK_CONTROL]));
        assert!(ex.global(&Action::Keys { keys: "ctrl+bogus".into() }).is_err());
    }
}
