// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The focused window, its latest snapshot and the provider chain that
//! produces snapshots. One `DesktopSession` lives for the whole daemon.

use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::config::{ActionConfig, ProviderConfig};
use crate::error::{Error, Result};
use crate::executor::{Action, Executor};
use crate::perception::{build_chain, StateProvider, UiState};
use crate::platform::{Control, ControlRef, Desktop, MouseButton, WindowInfo};
use crate::targets::Rect;

const LAUNCH_SETTLE: Duration = Duration::from_secs(2);
const TREE_DEPTH: usize = 3;
const OUTLINE: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// What `save` writes and `load` reads back.
#[derive(Debug, Serialize, Deserialize)]
struct Persisted {
    window_handle: Option<isize>,
    window_title: Option<String>,
}

pub struct DesktopSession {
    desktop: Rc<dyn Desktop>,
    providers: ProviderConfig,
    actions: ActionConfig,
    provider: Box<dyn StateProvider>,
    window: Option<WindowInfo>,
    executor: Option<Executor>,
    state: Option<UiState>,
    launch_settle: Duration,
}

impl DesktopSession {
    /// Fails when `providers` enables a source whose credentials are missing.
    pub fn new(desktop: Rc<dyn Desktop>, providers: ProviderConfig, actions: ActionConfig) -> Result<Self> {
        let provider = build_chain(Rc::clone(&desktop), &providers)?;
        Ok(Self {
            desktop,
            providers,
            actions,
            provider,
            window: None,
            executor: None,
            state: None,
            launch_settle: LAUNCH_SETTLE,
        })
    }

    pub fn with_launch_settle(mut self, settle: Duration) -> Self {
        self.launch_settle = settle;
        self
    }

    pub fn desktop(&self) -> &Rc<dyn Desktop> {
        &self.desktop
    }

    pub fn vision(&self) -> bool {
        self.providers.vision
    }

    pub fn infer(&self) -> bool {
        self.providers.infer
    }

    pub fn provider_label(&self) -> &'static str {
        self.provider.label()
    }

    /// Swap the optional sources. The focused window is kept, the snapshot
    /// is dropped.
    pub fn set_providers(&mut self, vision: bool, infer: bool) -> Result<()> {
        let providers = self.providers.with_flags(vision, infer);
        self.provider = build_chain(Rc::clone(&self.desktop), &providers)?;
        self.providers = providers;
        self.state = None;
        info!(vision, infer, "provider chain rebuilt");
        Ok(())
    }

    pub fn window(&self) -> Option<&WindowInfo> {
        self.window.as_ref()
    }

    pub fn state(&self) -> Option<&UiState> {
        self.state.as_ref()
    }

    /// Current title of the focused window as the OS reports it now.
    pub fn live_title(&self) -> Option<String> {
        self.window.as_ref().and_then(|w| self.desktop.window_title(w.handle))
    }

    // ── Window management ───────────────────────────

    /// `{id, title, process, handle}` per visible window, ids from "1".
    pub fn list_windows(&self) -> Result<Vec<Value>> {
        Ok(self
            .desktop
            .windows()?
            .into_iter()
            .enumerate()
            .map(|(i, w)| {
                json!({
                    "id": (i + 1).to_string(),
                    "title": w.title,
                    "process": w.process,
                    "handle": w.handle,
                })
            })
            .collect())
    }

    /// Focus by 1-based index, then title substring, then process substring.
    pub fn focus_window(&mut self, identifier: &str) -> Result<bool> {
        let windows = self.desktop.windows()?;
        if !identifier.is_empty() && identifier.chars().all(|c| c.is_ascii_digit()) {
            if let Some(w) = identifier
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| windows.get(i))
            {
                self.set_window(w.clone());
                return Ok(true);
            }
        }

        let needle = identifier.to_lowercase();
        let found = windows
            .iter()
            .find(|w| w.title.to_lowercase().contains(&needle))
            .or_else(|| windows.iter().find(|w| w.process.to_lowercase().contains(&needle)));
        match found {
            Some(w) => {
                self.set_window(w.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The OS foreground window, else the first visible one.
    pub fn focus_foreground(&mut self) -> Result<bool> {
        if let Some(w) = self.desktop.foreground() {
            self.set_window(w);
            return Ok(true);
        }
        match self.desktop.windows()?.into_iter().next() {
            Some(w) => {
                self.set_window(w);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn set_window(&mut self, window: WindowInfo) {
        debug!(title = %window.title, process = %window.process, "window focused");
        self.state = None;
        self.executor = Some(Executor::new(Rc::clone(&self.desktop), window.clone(), self.actions.clone()));
        self.window = Some(window);
    }

    /// Start `command`, give it time to draw, then focus it by executable name.
    pub fn launch_app(&mut self, command: &str) -> bool {
        if let Err(e) = self.desktop.launch(command) {
            error!(command, error = %e, "launch failed");
            return false;
        }
        thread::sleep(self.launch_settle);
        let program = command.split_whitespace().next().unwrap_or(command);
        let base = program.rsplit(['\\', '/']).next().unwrap_or(program).to_lowercase();
        let base = base.strip_suffix(".exe").unwrap_or(&base).to_string();
        match self.focus_window(&base) {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "could not enumerate windows after launch");
                false
            }
        }
    }

    pub fn close_window(&mut self) -> bool {
        let Some(window) = self.window.as_ref() else {
            return false;
        };
        match self.desktop.close(window.handle) {
            Ok(()) => {
                self.window = None;
                self.executor = None;
                self.state = None;
                true
            }
            Err(e) => {
                error!(error = %e, "failed to close window");
                false
            }
        }
    }

    // ── Perception ──────────────────────────────────

    /// Re-scan the focused window and replace the snapshot.
    pub fn refresh_state(&mut self, screenshot: bool) -> Result<&UiState> {
        let window = self.window.clone().ok_or(Error::NoWindow)?;
        let detection = self.provider.detect(&window)?;
        let mut state = UiState::new(&window, detection);
        // The OS title may have changed since focus.
        if let Some(title) = self.desktop.window_title(window.handle) {
            state.window_title = title;
        }
        if screenshot {
            if let Err(e) = self.capture_screenshots(&window, &mut state) {
                warn!(error = %e, "screenshot capture failed");
            }
        }
        info!(provider = self.provider.label(), targets = state.target_count(), "state refreshed");
        Ok(&*self.state.insert(state))
    }

    fn capture_screenshots(&self, window: &WindowInfo, state: &mut UiState) -> Result<()> {
        let image = self.desktop.capture(window.handle)?;
        let origin = self.desktop.window_rect(window.handle)?;

        let plain = keep_temp("_screenshot.png")?;
        image.save(&plain)?;
        state.screenshot_path = Some(plain);

        let mut annotated = image;
        for target in state.targets.all() {
            if let Some(r) = target.rect {
                outline(&mut annotated, r.offset(origin.left.saturating_neg(), origin.top.saturating_neg()));
            }
        }
        let path = keep_temp("_annotated.png")?;
        annotated.save(&path)?;
        state.annotated_screenshot_path = Some(path);
        Ok(())
    }

    /// Capture the focused window to `path`, or a fresh temp file.
    pub fn screenshot(&self, path: Option<&Path>) -> Result<PathBuf> {
        let window = self.window.as_ref().ok_or(Error::NoWindow)?;
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => keep_temp(".png")?,
        };
        self.desktop.capture(window.handle)?.save(&path)?;
        Ok(path)
    }

    /// Nested `{type, name, id?, children?}` below the window, three levels
    /// deep. `id` is filled where a snapshot target has the same rect and type.
    pub fn get_control_tree(&self) -> Vec<Value> {
        let Some(window) = self.window.as_ref() else {
            return Vec::new();
        };
        match self.desktop.children(window.handle) {
            Ok(children) => children.iter().map(|c| self.tree_node(c, 0)).collect(),
            Err(e) => {
                debug!(error = %e, "control tree unavailable");
                Vec::new()
            }
        }
    }

    fn tree_node(&self, control: &ControlRef, depth: usize) -> Value {
        let control_type = control.control_type();
        let mut node = Map::new();
        node.insert("type".into(), json!(control_type));
        node.insert("name".into(), json!(control.name()));

        let id = match (&self.state, control.rect()) {
            (Some(state), Some(rect)) => state
                .targets
                .all()
                .iter()
                .find(|t| t.rect == Some(rect) && t.control_type == control_type)
                .map(|t| t.id_str().to_string()),
            _ => None,
        };
        if let Some(id) = id {
            node.insert("id".into(), json!(id));
        }

        if depth < TREE_DEPTH {
            let children: Vec<Value> = control.children().iter().map(|c| self.tree_node(c, depth + 1)).collect();
            if !children.is_empty() {
                node.insert("children".into(), Value::Array(children));
            }
        }
        Value::Object(node)
    }

    /// Property map for a native target, `None` when `id` has no handle.
    pub fn inspect(&self, id: &str) -> Option<Value> {
        let control = self.state.as_ref()?.resolve(id)?;
        Some(control_info(control.as_ref()))
    }

    // ── Execution ───────────────────────────────────

    /// Run `action` on target `id`. Native targets go through the control;
    /// coordinate-only targets are mapped onto their rect centre.
    pub fn execute_on_target(&self, id: &str, action: &Action) -> Result<Value> {
        let state = self.state.as_ref().ok_or(Error::NoState)?;
        let executor = self.executor.as_ref().ok_or(Error::NoWindow)?;

        if let Some(control) = state.resolve(id) {
            return executor.on_control(control.as_ref(), action);
        }

        let target = state.target(id).ok_or_else(|| Error::TargetNotFound(id.to_string()))?;
        let rect = target.rect.ok_or_else(|| Error::NoGeometry(id.to_string()))?;
        let (x, y) = rect.center();
        info!(target = id, x, y, "no native handle, falling back to coordinates");

        let click = |button, double| Action::ClickAt { x, y, button, double };
        match action {
            Action::Click { button, double } | Action::ClickAt { button, double, .. } => {
                executor.global(&click(*button, *double))
            }
            Action::SetText { text } => {
                executor.global(&click(MouseButton::Left, false))?;
                executor.global(&Action::Type { text: text.clone() })
            }
            other => {
                warn!(action = other.name(), target = id, "mapped to a click at the centre");
                executor.global(&click(MouseButton::Left, false))
            }
        }
    }

    /// Run `action` against the focused window without a target.
    pub fn execute_global(&self, action: &Action) -> Result<Value> {
        self.executor.as_ref().ok_or(Error::NoWindow)?.global(action)
    }

    /// Rect of target `id`: the live native rect, else the snapshot rect.
    pub fn target_rect(&self, id: &str) -> Option<Rect> {
        let state = self.state.as_ref()?;
        state
            .resolve(id)
            .and_then(|c| c.rect())
            .or_else(|| state.target(id).and_then(|t| t.rect))
    }

    // ── Persistence ─────────────────────────────────

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = Persisted {
            window_handle: self.window.as_ref().map(|w| w.handle),
            window_title: self.window.as_ref().map(|w| w.title.clone()),
        };
        fs::write(path, serde_json::to_vec(&data)?)?;
        Ok(())
    }

    /// Re-focus the window recorded by [`save`](Self::save). `false` when the
    /// file is unreadable or the window is gone.
    pub fn load(&mut self, path: &Path) -> bool {
        let data: Persisted = match fs::read(path)
            .map_err(Error::from)
            .and_then(|raw| serde_json::from_slice(&raw).map_err(Error::from))
        {
            Ok(d) => d,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load session");
                return false;
            }
        };
        let Some(handle) = data.window_handle else {
            return false;
        };
        let found = self
            .desktop
            .windows()
            .ok()
            .and_then(|ws| ws.into_iter().find(|w| w.handle == handle));
        match found {
            Some(w) => {
                self.set_window(w);
                true
            }
            None => {
                warn!(handle, title = ?data.window_title, "saved window no longer exists");
                false
            }
        }
    }
}

/// The fields `inspect` reports for a native control.
pub fn control_info(control: &dyn Control) -> Value {
    let rect = control
        .rect()
        .map_or(Value::Null, |r| json!([r.left, r.top, r.right, r.bottom]));
    let name = control.name();
    json!({
        "control_type": control.control_type(),
        "control_id": control.automation_id(),
        "control_class": control.class_name(),
        "control_name": name,
        "control_rect": rect,
        "control_text": name,
        "control_title": name,
        "selected": control.is_selected(),
        "source": "uia",
    })
}

fn keep_temp(suffix: &str) -> Result<PathBuf> {
    let file = tempfile::Builder::new().prefix("winctl_").suffix(suffix).tempfile()?;
    let (_, path) = file.keep().map_err(|e| Error::Io(e.error))?;
    Ok(path)
}

/// Two-pixel outline, clipped to the image.
fn outline(image: &mut RgbaImage, r: Rect) {
    let (w, h) = (i64::from(image.width()), i64::from(image.height()));
    // Edges far outside the image are pulled in to just past its border so
    // neither the arithmetic nor the loops scale with the rect.
    let clamp = |v: i32, max: i64| i64::from(v).clamp(-2, max + 2);
    let (left, top) = (clamp(r.left, w), clamp(r.top, h));
    let (right, bottom) = (clamp(r.right, w), clamp(r.bottom, h));
    let mut put = |x: i64, y: i64| {
        if (0..w).contains(&x) && (0..h).contains(&y) {
            image.put_pixel(x as u32, y as u32, OUTLINE);
        }
    };
    for inset in 0..2 {
        let (l, t, rr, b) = (left + inset, top + inset, right - 1 - inset, bottom - 1 - inset);
        if l > rr || t > b {
            break;
        }
        for x in l..=rr {
            put(x, t);
            put(x, b);
        }
        for y in t..=b {
            put(l, y);
            put(rr, y);
        }
    }
}
