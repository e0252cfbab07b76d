// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Request router. [`Dispatcher::handle`] turns any request into a response
//! and never fails; it is shared by the daemon and the in-process CLI path.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::executor::Action;
use crate::platform::{Control, MouseButton};
use crate::protocol::{Flags, Request, Response, PING, SHUTDOWN};
use crate::session::DesktopSession;

/// Nominal seconds one wait poll counts against the timeout.
const WAIT_STEP_SECS: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    State,
    Windows,
    Inspect,
    Screenshot,
    Click,
    DblClick,
    RightClick,
    Input,
    Type,
    Keys,
    Scroll,
    Select,
    Drag,
    ClickAt,
    DragAt,
    Focus,
    Launch,
    Close,
    GetText,
    GetRect,
    GetValue,
    Wait,
}

impl Command {
    pub const ALL: [Command; 22] = [
        Command::State,
        Command::Windows,
        Command::Inspect,
        Command::Screenshot,
        Command::Click,
        Command::DblClick,
        Command::RightClick,
        Command::Input,
        Command::Type,
        Command::Keys,
        Command::Scroll,
        Command::Select,
        Command::Drag,
        Command::ClickAt,
        Command::DragAt,
        Command::Focus,
        Command::Launch,
        Command::Close,
        Command::GetText,
        Command::GetRect,
        Command::GetValue,
        Command::Wait,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::State => "state",
            Command::Windows => "windows",
            Command::Inspect => "inspect",
            Command::Screenshot => "screenshot",
            Command::Click => "click",
            Command::DblClick => "dblclick",
            Command::RightClick => "rightclick",
            Command::Input => "input",
            Command::Type => "type",
            Command::Keys => "keys",
            Command::Scroll => "scroll",
            Command::Select => "select",
            Command::Drag => "drag",
            Command::ClickAt => "click-at",
            Command::DragAt => "drag-at",
            Command::Focus => "focus",
            Command::Launch => "launch",
            Command::Close => "close",
            Command::GetText => "get text",
            Command::GetRect => "get rect",
            Command::GetValue => "get value",
            Command::Wait => "wait",
        }
    }

    pub fn from_name(name: &str) -> Option<Command> {
        static TABLE: OnceLock<HashMap<&'static str, Command>> = OnceLock::new();
        TABLE
            .get_or_init(|| Command::ALL.iter().map(|c| (c.name(), *c)).collect())
            .get(name)
            .copied()
    }
}

/// Pauses used by handlers. Tests shrink them.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Before re-perceiving for `return_state`.
    pub settle: Duration,
    /// Between the click and the text of `select`.
    pub select_pause: Duration,
    /// Poll interval of `wait --visible/--enabled`.
    pub poll: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(500),
            select_pause: Duration::from_millis(300),
            poll: Duration::from_millis(500),
        }
    }
}

pub struct Dispatcher {
    session: DesktopSession,
    default_vision: bool,
    default_infer: bool,
    timing: Timing,
}

impl Dispatcher {
    /// The session's current provider flags become the defaults requests
    /// fall back to.
    pub fn new(session: DesktopSession) -> Self {
        Self {
            default_vision: session.vision(),
            default_infer: session.infer(),
            session,
            timing: Timing::default(),
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn session(&self) -> &DesktopSession {
        &self.session
    }

    pub fn handle(&mut self, request: &Request) -> Response {
        match request.command.as_str() {
            PING => return Response::ok("pong"),
            SHUTDOWN => return Response::ok("shutdown"),
            _ => {}
        }
        let Some(command) = Command::from_name(&request.command) else {
            return Response::error(format!("Unknown command: {}", request.command));
        };
        debug!(command = command.name(), "dispatching");
        let outcome = self
            .maybe_switch_provider(&request.flags)
            .and_then(|()| self.maybe_switch_window(&request.flags))
            .and_then(|()| self.run(command, &request.args, &request.flags));
        match outcome {
            Ok(response) => response,
            Err(e) => {
                error!(command = command.name(), error = %e, "handler failed");
                Response::error(e.to_string()).with_command(command.name())
            }
        }
    }

    fn run(&mut self, command: Command, args: &Map<String, Value>, flags: &Flags) -> Result<Response> {
        match command {
            Command::State => self.state(args, flags),
            Command::Windows => Ok(Response::ok(self.session.list_windows()?)),
            Command::Inspect => self.inspect(args, flags),
            Command::Screenshot => self.screenshot(args, flags),
            Command::Click => {
                let button = if arg_bool(args, "right") { MouseButton::Right } else { MouseButton::Left };
                self.on_target(args, flags, Action::Click { button, double: false })
            }
            Command::DblClick => self.on_target(args, flags, Action::Click { button: MouseButton::Left, double: true }),
            Command::RightClick => {
                self.on_target(args, flags, Action::Click { button: MouseButton::Right, double: false })
            }
            Command::Input => {
                let text = arg_str(args, "text").unwrap_or_default();
                self.on_target(args, flags, Action::SetText { text })
            }
            Command::Type => {
                self.ensure_state(flags)?;
                let text = arg_str(args, "text").unwrap_or_default();
                let result = self.session.execute_global(&Action::Type { text })?;
                Ok(self.action_response(result, flags))
            }
            Command::Keys => self.keys(args, flags),
            Command::Scroll => self.scroll(args, flags),
            Command::Select => self.select(args, flags),
            Command::Drag => self.drag(args, flags),
            Command::ClickAt => {
                self.ensure_window(flags)?;
                let action = Action::ClickAt {
                    x: arg_i32(args, "x", 0)?,
                    y: arg_i32(args, "y", 0)?,
                    button: arg_button(args)?,
                    double: arg_bool(args, "double"),
                };
                let result = self.session.execute_global(&action)?;
                Ok(self.action_response(result, flags))
            }
            Command::DragAt => {
                self.ensure_window(flags)?;
                let action = Action::DragAt {
                    start: (arg_i32(args, "x1", 0)?, arg_i32(args, "y1", 0)?),
                    end: (arg_i32(args, "x2", 0)?, arg_i32(args, "y2", 0)?),
                    button: arg_button(args)?,
                    duration: arg_f64(args, "duration", 1.0)?,
                };
                let result = self.session.execute_global(&action)?;
                Ok(self.action_response(result, flags))
            }
            Command::Focus => self.focus(args),
            Command::Launch => self.launch(args),
            Command::Close => {
                self.ensure_window(flags)?;
                Ok(if self.session.close_window() {
                    Response::ok("Window closed")
                } else {
                    Response::error("Failed to close window")
                })
            }
            Command::GetText => {
                self.ensure_state(flags)?;
                let index = arg_str(args, "index").unwrap_or_default();
                Ok(Response::ok(self.session.execute_on_target(&index, &Action::Texts)?))
            }
            Command::GetRect => {
                self.ensure_state(flags)?;
                let index = arg_str(args, "index").unwrap_or_default();
                Ok(match self.session.target_rect(&index) {
                    Some(r) => Response::ok(json!({
                        "left": r.left,
                        "top": r.top,
                        "right": r.right,
                        "bottom": r.bottom,
                    })),
                    None => Response::error(format!("Control {index} not found")),
                })
            }
            Command::GetValue => self.get_value(args, flags),
            Command::Wait => self.wait(args, flags),
        }
    }

    // ── Setup ───────────────────────────────────────

    fn maybe_switch_provider(&mut self, flags: &Flags) -> Result<()> {
        let vision = flags.vision.unwrap_or(self.default_vision);
        let infer = flags.infer.unwrap_or(self.default_infer);
        if (vision, infer) != (self.session.vision(), self.session.infer()) {
            self.session.set_providers(vision, infer)?;
        }
        Ok(())
    }

    fn maybe_switch_window(&mut self, flags: &Flags) -> Result<()> {
        let Some(wanted) = flags.window.as_deref().filter(|w| !w.is_empty()) else {
            return Ok(());
        };
        if let Some(title) = self.session.live_title() {
            if title.to_lowercase().contains(&wanted.to_lowercase()) {
                return Ok(());
            }
        }
        if self.session.focus_window(wanted)? {
            Ok(())
        } else {
            Err(Error::WindowNotFound(wanted.to_string()))
        }
    }

    fn ensure_window(&mut self, flags: &Flags) -> Result<()> {
        if self.session.window().is_some() {
            return Ok(());
        }
        match flags.window.as_deref().filter(|w| !w.is_empty()) {
            Some(w) => {
                if !self.session.focus_window(w)? {
                    return Err(Error::WindowNotFound(w.to_string()));
                }
            }
            None => {
                self.session.focus_foreground()?;
            }
        }
        Ok(())
    }

    fn ensure_state(&mut self, flags: &Flags) -> Result<()> {
        self.ensure_window(flags)?;
        if self.session.state().is_none() {
            self.session.refresh_state(false)?;
        }
        Ok(())
    }

    /// Wrap an action result, re-perceiving first when the caller asked.
    fn action_response(&mut self, result: Value, flags: &Flags) -> Response {
        let result = match result {
            Value::Null => json!("OK"),
            Value::String(s) if s.is_empty() => json!("OK"),
            other => other,
        };
        let mut response = Response::ok(result);
        if flags.return_state {
            thread::sleep(self.timing.settle);
            let refreshed = self
                .ensure_window(flags)
                .and_then(|()| self.session.refresh_state(false).map(|s| s.to_json(false)));
            match refreshed {
                Ok(state) => response.state = Some(state),
                Err(e) => response.state_error = Some(e.to_string()),
            }
        }
        response
    }

    // ── Handlers ────────────────────────────────────

    fn state(&mut self, args: &Map<String, Value>, flags: &Flags) -> Result<Response> {
        self.ensure_window(flags)?;
        let state = self.session.refresh_state(arg_bool(args, "screenshot"))?;
        if arg_bool(args, "tree") {
            return Ok(Response::ok(self.session.get_control_tree()));
        }
        Ok(Response::ok(state.to_json(arg_bool(args, "verbose"))))
    }

    fn inspect(&mut self, args: &Map<String, Value>, flags: &Flags) -> Result<Response> {
        self.ensure_state(flags)?;
        let index = arg_str(args, "index").unwrap_or_default();
        Ok(match self.session.inspect(&index) {
            Some(info) => Response::ok(info),
            None => Response::error(format!("Control with index {index} not found")),
        })
    }

    fn screenshot(&mut self, args: &Map<String, Value>, flags: &Flags) -> Result<Response> {
        self.ensure_window(flags)?;
        let path = arg_str(args, "path").filter(|p| !p.is_empty());
        let saved = self.session.screenshot(path.as_deref().map(Path::new))?;
        Ok(Response::ok(json!({ "path": saved })))
    }

    fn on_target(&mut self, args: &Map<String, Value>, flags: &Flags, action: Action) -> Result<Response> {
        self.ensure_state(flags)?;
        let index = arg_str(args, "index").unwrap_or_default();
        let result = self.session.execute_on_target(&index, &action)?;
        Ok(self.action_response(result, flags))
    }

    fn keys(&mut self, args: &Map<String, Value>, flags: &Flags) -> Result<Response> {
        self.ensure_state(flags)?;
        let action = Action::Keys {
            keys: arg_str(args, "keys").unwrap_or_default(),
        };
        let result = match arg_str(args, "target") {
            Some(target) => self.session.execute_on_target(&target, &action)?,
            None => self.session.execute_global(&action)?,
        };
        Ok(self.action_response(result, flags))
    }

    fn scroll(&mut self, args: &Map<String, Value>, flags: &Flags) -> Result<Response> {
        let direction = arg_str(args, "direction").unwrap_or_else(|| "down".to_string());
        let amount = arg_i32(args, "amount", 3)?;
        let (dist, horizontal) = match direction.as_str() {
            "up" => (amount, false),
            "down" => (-amount, false),
            "left" => (-amount, true),
            "right" => (amount, true),
            other => {
                return Err(Error::invalid(
                    "direction",
                    format!("'{other}' is not one of up, down, left, right"),
                ))
            }
        };
        self.on_target(args, flags, Action::Wheel { dist, horizontal })
    }

    fn select(&mut self, args: &Map<String, Value>, flags: &Flags) -> Result<Response> {
        self.ensure_state(flags)?;
        let index = arg_str(args, "index").unwrap_or_default();
        let value = arg_str(args, "value").unwrap_or_default();
        self.session
            .execute_on_target(&index, &Action::Click { button: MouseButton::Left, double: false })?;
        thread::sleep(self.timing.select_pause);
        let result = self.session.execute_on_target(&index, &Action::SetText { text: value })?;
        Ok(self.action_response(result, flags))
    }

    fn drag(&mut self, args: &Map<String, Value>, flags: &Flags) -> Result<Response> {
        self.ensure_state(flags)?;
        let index = arg_str(args, "index").unwrap_or_default();
        let Some(start) = self.session.target_rect(&index).map(|r| r.center()) else {
            return Ok(Response::error(format!("Control {index} not found or has no rect")));
        };
        let action = Action::DragAt {
            start,
            end: (arg_i32(args, "x2", 0)?, arg_i32(args, "y2", 0)?),
            button: arg_button(args)?,
            duration: arg_f64(args, "duration", 1.0)?,
        };
        let result = self.session.execute_global(&action)?;
        Ok(self.action_response(result, flags))
    }

    fn focus(&mut self, args: &Map<String, Value>) -> Result<Response> {
        let window = arg_str(args, "window").unwrap_or_default();
        if self.session.focus_window(&window)? {
            let title = self.current_title();
            info!(%title, "focused");
            return Ok(Response::ok(format!("Focused: \"{title}\"")));
        }
        Ok(Response::error(Error::WindowNotFound(window).to_string()))
    }

    fn launch(&mut self, args: &Map<String, Value>) -> Result<Response> {
        let app = arg_str(args, "app").unwrap_or_default();
        if self.session.launch_app(&app) {
            return Ok(Response::ok(format!("Launched: \"{}\"", self.current_title())));
        }
        Ok(Response::error(format!("Failed to launch {app}")))
    }

    fn current_title(&self) -> String {
        self.session
            .live_title()
            .or_else(|| self.session.window().map(|w| w.title.clone()))
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn get_value(&mut self, args: &Map<String, Value>, flags: &Flags) -> Result<Response> {
        self.ensure_state(flags)?;
        let index = arg_str(args, "index").unwrap_or_default();
        let Some(control) = self.session.state().and_then(|s| s.resolve(&index)) else {
            return Ok(Response::error(format!("Control {index} not found")));
        };
        Ok(Response::ok(read_value(control.as_ref())))
    }

    fn wait(&mut self, args: &Map<String, Value>, flags: &Flags) -> Result<Response> {
        let timeout = arg_f64(args, "timeout", 10.0)?;
        for key in ["visible", "enabled"] {
            let Some(index) = arg_str(args, key).filter(|s| !s.is_empty()) else {
                continue;
            };
            self.ensure_state(flags)?;
            let Some(control) = self.session.state().and_then(|s| s.resolve(&index)) else {
                return Ok(Response::error(format!("Control {index} not found")));
            };
            let ready = |c: &dyn Control| if key == "visible" { c.is_visible() } else { c.is_enabled() };
            let mut remaining = timeout;
            while !ready(control.as_ref()) && remaining > 0.0 {
                thread::sleep(self.timing.poll);
                remaining -= WAIT_STEP_SECS;
            }
            return Ok(if ready(control.as_ref()) {
                Response::ok(format!("Control {index} is {key}"))
            } else {
                Response::error(format!("Timeout: control {index} not {key} after {timeout:?}s"))
            });
        }

        let seconds = arg_f64(args, "seconds", 1.0)?;
        let pause = Duration::try_from_secs_f64(seconds).map_err(|e| Error::invalid("seconds", e.to_string()))?;
        thread::sleep(pause);
        Ok(Response::ok(format!("Waited {seconds:?}s")))
    }
}

/// First non-empty of the legacy value, the value pattern and the first text.
fn read_value(control: &dyn Control) -> String {
    let strategies: [&dyn Fn() -> Option<String>; 3] = [
        &|| control.legacy_value(),
        &|| control.value(),
        &|| control.texts().into_iter().next(),
    ];
    strategies
        .iter()
        .find_map(|read| read().filter(|v| !v.is_empty()))
        .unwrap_or_default()
}

// ── Argument access ─────────────────────────────────
//
// Clients send numbers either as JSON numbers or as the strings typed on a
// command line, so both are accepted.

fn arg_str(args: &Map<String, Value>, key: &str) -> Option<String> {
    match args.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn arg_bool(args: &Map<String, Value>, key: &str) -> bool {
    match args.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.to_lowercase().as_str(), "1" | "true" | "yes"),
        Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    }
}

fn arg_f64(args: &Map<String, Value>, key: &str, default: f64) -> Result<f64> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| Error::invalid(key, n.to_string())),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| Error::invalid(key, format!("'{s}' is not a number"))),
        Some(other) => Err(Error::invalid(key, format!("'{other}' is not a number"))),
    }
}

fn arg_i32(args: &Map<String, Value>, key: &str, default: i32) -> Result<i32> {
    let v = arg_f64(args, key, f64::from(default))?;
    if v.fract() != 0.0 || v < f64::from(i32::MIN) || v > f64::from(i32::MAX) {
        return Err(Error::invalid(key, format!("'{v}' is not an integer")));
    }
    Ok(v as i32)
}

fn arg_button(args: &Map<String, Value>) -> Result<MouseButton> {
    arg_str(args, "button").map_or(Ok(MouseButton::Left), |b| b.parse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ActionConfig, ProviderConfig, ENV_API_KEY, ENV_API_KEY_FALLBACK, ENV_BASE_URL};
    use crate::platform::memory::{InputEvent, MemoryControl, MemoryDesktop};
    use crate::platform::Desktop;
    use crate::protocol::Status;
    use crate::targets::Rect;
    use serial_test::serial;
    use std::rc::Rc;

    fn fast() -> Timing {
        Timing {
            settle: Duration::ZERO,
            select_pause: Duration::ZERO,
            poll: Duration::from_millis(1),
        }
    }

    fn dispatcher() -> (Rc<MemoryDesktop>, Dispatcher) {
        let desktop = Rc::new(MemoryDesktop::new());
        desktop.add_window("Inbox - Mail", "mail.exe", Rect::new(0, 0, 640, 480), vec![]);
        let h = desktop.add_window(
            "Untitled - Notepad",
            "notepad.exe",
            Rect::new(0, 0, 800, 600),
            vec![
                MemoryControl::new("Edit", "Text Editor").with_rect(0, 30, 800, 580).with_value(""),
                MemoryControl::new("Button", "Save").with_rect(10, 10, 30, 30),
                MemoryControl::new("Text", "Status").with_rect(0, 580, 800, 600).with_legacy("Ln 1, Col 1"),
            ],
        );
        desktop.set_foreground(Some(h));
        let actions = ActionConfig {
            input_text_inter_key_pause: Duration::ZERO,
            ..Default::default()
        };
        let session = DesktopSession::new(desktop.clone(), ProviderConfig::default(), actions)
            .unwrap()
            .with_launch_settle(Duration::ZERO);
        (desktop, Dispatcher::new(session).with_timing(fast()))
    }

    fn send(d: &mut Dispatcher, command: &str, args: Value) -> Response {
        let args = match args {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        d.handle(&Request {
            command: command.to_string(),
            args,
            flags: Flags::default(),
        })
    }

    #[test]
    fn every_command_is_registered_once() {
        for c in Command::ALL {
            assert_eq!(Command::from_name(c.name()), Some(c));
        }
        assert_eq!(Command::from_name("get"), None);
    }

    #[test]
    fn unknown_commands_leave_the_session_alone() {
        let (_, mut d) = dispatcher();
        let v = serde_json::to_value(send(&mut d, "bogus", json!({}))).unwrap();
        assert_eq!(v, json!({"status": "error", "error": "Unknown command: bogus"}));
        assert!(d.session().window().is_none());
    }

    #[test]
    fn meta_commands_skip_setup() {
        let (_, mut d) = dispatcher();
        assert_eq!(send(&mut d, "_ping", json!({})).result, Some(json!("pong")));
        assert_eq!(send(&mut d, "_shutdown", json!({})).result, Some(json!("shutdown")));
        assert!(d.session().window().is_none());
    }

    #[test]
    fn state_auto_focuses_the_foreground_window() {
        let (_, mut d) = dispatcher();
        let r = send(&mut d, "state", json!({}));
        assert!(r.is_ok());
        let state = r.result.unwrap();
        assert_eq!(state["window"], "Untitled - Notepad");
        assert_eq!(state["targets"].as_array().unwrap().len(), 3);
        assert!(state["targets"][0].get("rect").is_none());

        let verbose = send(&mut d, "state", json!({"verbose": true})).result.unwrap();
        assert_eq!(verbose["targets"][1]["rect"], json!([10, 10, 30, 30]));
    }

    #[test]
    fn click_then_return_state() {
        let (desktop, mut d) = dispatcher();
        let r = d.handle(&Request::new("click").arg("index", "2").with_flags(Flags {
            return_state: true,
            ..Default::default()
        }));
        assert!(r.is_ok(), "{r:?}");
        assert_eq!(r.state.unwrap()["process"], "notepad.exe");
        assert!(desktop
            .events()
            .contains(&InputEvent::Click { x: 20, y: 20, button: MouseButton::Left, double: false }));
    }

    #[test]
    fn null_results_become_ok() {
        let (_, mut d) = dispatcher();
        let r = send(&mut d, "input", json!({"index": "1", "text": "hello"}));
        assert_eq!(r.result, Some(json!("OK")));
        let r = send(&mut d, "type", json!({"text": "x"}));
        assert_eq!(r.result, Some(json!("OK")));
    }

    #[test]
    fn handler_failures_name_the_command() {
        let (_, mut d) = dispatcher();
        let r = send(&mut d, "click", json!({"index": "99"}));
        assert_eq!(r.status, Status::Error);
        assert_eq!(r.error.as_deref(), Some("Target 99 not found in state."));
        assert_eq!(r.command.as_deref(), Some("click"));
    }

    #[test]
    fn window_flag_switches_focus_or_fails() {
        let (_, mut d) = dispatcher();
        let flags = Flags { window: Some("inbox".into()), ..Default::default() };
        let r = d.handle(&Request::new("windows").with_flags(flags));
        assert!(r.is_ok());
        assert_eq!(d.session().window().unwrap().process, "mail.exe");

        let flags = Flags { window: Some("excel".into()), ..Default::default() };
        let r = d.handle(&Request::new("windows").with_flags(flags));
        assert_eq!(r.error.as_deref(), Some("No window matching \"excel\" found"));
        assert_eq!(r.command.as_deref(), Some("windows"));
    }

    #[test]
    #[serial]
    fn provider_flags_rebuild_once_and_drop_state() {
        std::env::remove_var(ENV_API_KEY);
        std::env::remove_var(ENV_API_KEY_FALLBACK);
        // Vision calls made below fail fast against a closed port.
        std::env::set_var(ENV_BASE_URL, "http://127.0.0.1:9");
        let (_, mut d) = dispatcher();
        assert!(send(&mut d, "state", json!({})).is_ok());
        assert!(d.session().state().is_some());

        // No key: the rebuild fails and nothing changes.
        let flags = Flags { vision: Some(true), ..Default::default() };
        let r = d.handle(&Request::new("windows").with_flags(flags.clone()));
        assert!(r.error.unwrap().starts_with("Vision API key required for --vision."));
        assert!(d.session().state().is_some());
        assert!(!d.session().vision());

        std::env::set_var(ENV_API_KEY, "sk-test");
        assert!(d.handle(&Request::new("windows").with_flags(flags.clone())).is_ok());
        assert_eq!(d.session().provider_label(), "composite");
        assert!(d.session().state().is_none());
        assert!(d.session().window().is_some());

        // Same flags again: no rebuild, state survives.
        d.session.refresh_state(false).unwrap();
        assert!(d.handle(&Request::new("windows").with_flags(flags)).is_ok());
        assert!(d.session().state().is_some());

        // Omitted flags fall back to the daemon's defaults.
        assert!(send(&mut d, "windows", json!({})).is_ok());
        assert_eq!(d.session().provider_label(), "uia");
        std::env::remove_var(ENV_API_KEY);
        std::env::remove_var(ENV_BASE_URL);
    }

    #[test]
    fn scroll_directions() {
        let (desktop, mut d) = dispatcher();
        send(&mut d, "scroll", json!({"index": "1"}));
        send(&mut d, "scroll", json!({"index": "1", "direction": "left", "amount": "2"}));
        let scrolls: Vec<_> = desktop
            .events()
            .into_iter()
            .filter(|e| matches!(e, InputEvent::Scroll { .. }))
            .collect();
        assert_eq!(scrolls[0], InputEvent::Scroll { x: 400, y: 305, notches: -3, horizontal: false });
        assert_eq!(scrolls[1], InputEvent::Scroll { x: 400, y: 305, notches: -2, horizontal: true });
        let r = send(&mut d, "scroll", json!({"index": "1", "direction": "sideways"}));
        assert!(r.error.unwrap().contains("sideways"));
    }

    #[test]
    fn drag_starts_at_the_target_centre() {
        let (desktop, mut d) = dispatcher();
        let r = send(&mut d, "drag", json!({"index": "2", "x2": 300, "y2": "400", "duration": 0.0}));
        assert!(r.is_ok(), "{r:?}");
        assert!(desktop
            .events()
            .contains(&InputEvent::Drag { from: (20, 20), to: (300, 400), button: MouseButton::Left }));
        let r = send(&mut d, "drag", json!({"index": "42"}));
        assert_eq!(r.error.as_deref(), Some("Control 42 not found or has no rect"));
        assert!(r.command.is_none());
    }

    #[test]
    fn data_extraction() {
        let (_, mut d) = dispatcher();
        send(&mut d, "input", json!({"index": "1", "text": "hello"}));
        assert_eq!(send(&mut d, "get text", json!({"index": "2"})).result, Some(json!(["Save"])));
        assert_eq!(
            send(&mut d, "get rect", json!({"index": "2"})).result,
            Some(json!({"left": 10, "top": 10, "right": 30, "bottom": 30}))
        );
        assert_eq!(send(&mut d, "get value", json!({"index": "3"})).result, Some(json!("Ln 1, Col 1")));
        assert_eq!(send(&mut d, "get value", json!({"index": "2"})).result, Some(json!("Save")));
        assert_eq!(
            send(&mut d, "get value", json!({"index": "9"})).error.as_deref(),
            Some("Control 9 not found")
        );
    }

    #[test]
    fn window_management() {
        let (desktop, mut d) = dispatcher();
        assert_eq!(send(&mut d, "focus", json!({"window": "mail"})).result, Some(json!("Focused: \"Inbox - Mail\"")));
        assert_eq!(
            send(&mut d, "focus", json!({"window": "excel"})).error.as_deref(),
            Some("No window matching \"excel\" found")
        );
        desktop.on_launch("calc.exe", "Calculator", "calc.exe", Rect::new(0, 0, 300, 400), vec![]);
        assert_eq!(send(&mut d, "launch", json!({"app": "calc.exe"})).result, Some(json!("Launched: \"Calculator\"")));
        assert_eq!(send(&mut d, "launch", json!({"app": "nope.exe"})).error.as_deref(), Some("Failed to launch nope.exe"));
        assert_eq!(send(&mut d, "close", json!({})).result, Some(json!("Window closed")));
        assert_eq!(desktop.windows().unwrap().len(), 2);
    }

    #[test]
    fn wait_variants() {
        let (desktop, mut d) = dispatcher();
        assert_eq!(send(&mut d, "wait", json!({"seconds": "0"})).result, Some(json!("Waited 0.0s")));
        assert_eq!(send(&mut d, "wait", json!({"visible": "2"})).result, Some(json!("Control 2 is visible")));

        let h = desktop.foreground().unwrap().handle;
        desktop.find(h, "Save").unwrap().set_enabled(false);
        let r = send(&mut d, "wait", json!({"enabled": "2", "timeout": 0.5}));
        assert_eq!(r.error.as_deref(), Some("Timeout: control 2 not enabled after 0.5s"));
    }

    #[test]
    fn screenshot_writes_where_asked() {
        let (_, mut d) = dispatcher();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        let r = send(&mut d, "screenshot", json!({"path": path.to_string_lossy()}));
        assert_eq!(r.result.unwrap()["path"], json!(path));
        assert!(path.exists());
    }

    #[test]
    fn argument_coercion() {
        let args = json!({"n": "7", "f": 2.5, "b": "true", "s": 3, "bad": "x"});
        let args = args.as_object().unwrap();
        assert_eq!(arg_i32(args, "n", 0).unwrap(), 7);
        assert_eq!(arg_i32(args, "missing", 3).unwrap(), 3);
        assert!(arg_i32(args, "f", 0).is_err());
        assert_eq!(arg_f64(args, "f", 0.0).unwrap(), 2.5);
        assert!(arg_bool(args, "b"));
        assert_eq!(arg_str(args, "s").as_deref(), Some("3"));
        assert!(arg_f64(args, "bad", 0.0).is_err());
    }
}
