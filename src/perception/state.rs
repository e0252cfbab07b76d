// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::{json, Value};

use super::Detection;
use crate::platform::{ControlRef, WindowInfo};
use crate::targets::{TargetInfo, TargetRegistry};

/// One perception snapshot of the focused window.
///
/// Ids are only meaningful against the snapshot that produced them; the next
/// refresh renumbers from scratch.
pub struct UiState {
    pub window_title: String,
    pub window_handle: isize,
    pub process_name: String,
    pub targets: TargetRegistry,
    /// `None` marks a target with no native handle (coordinate-only).
    pub control_map: HashMap<String, Option<ControlRef>>,
    pub screenshot_path: Option<PathBuf>,
    pub annotated_screenshot_path: Option<PathBuf>,
    pub timestamp: String,
}

impl UiState {
    pub fn new(window: &WindowInfo, detection: Detection) -> Self {
        let mut control_map = HashMap::with_capacity(detection.len());
        let mut targets = TargetRegistry::new();
        for (target, handle) in detection.targets.into_iter().zip(detection.handles) {
            let mut target = target;
            if target.id.is_none() {
                target.id = Some((targets.len() + 1).to_string());
            }
            control_map.insert(target.id_str().to_string(), handle);
            targets.register([target]);
        }
        Self {
            window_title: window.title.clone(),
            window_handle: window.handle,
            process_name: window.process.clone(),
            targets,
            control_map,
            screenshot_path: None,
            annotated_screenshot_path: None,
            timestamp: chrono::Local::now().to_rfc3339(),
        }
    }

    /// Native handle for `id`, if it has one.
    pub fn resolve(&self, id: &str) -> Option<ControlRef> {
        self.control_map.get(id).cloned().flatten()
    }

    pub fn target(&self, id: &str) -> Option<&TargetInfo> {
        self.targets.get(id)
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    fn is_native(&self, t: &TargetInfo) -> bool {
        matches!(self.control_map.get(t.id_str()), Some(Some(_)))
    }

    pub fn to_text(&self, verbose: bool) -> String {
        let mut lines = vec![format!("Window: \"{}\" ({})", self.window_title, self.process_name)];
        for t in self.targets.all() {
            let mut line = format!("[{}] [{}] \"{}\"", t.id_str(), t.control_type, t.name);
            if let Some(rect) = t.rect {
                if verbose || !self.is_native(t) {
                    line.push_str(&format!(" rect={rect}"));
                }
            }
            lines.push(line);
        }
        lines.join("\n")
    }

    pub fn to_json(&self, verbose: bool) -> Value {
        let targets: Vec<Value> = self
            .targets
            .all()
            .iter()
            .map(|t| {
                if verbose || (!self.is_native(t) && t.rect.is_some()) {
                    t.to_filtered_json(&["id", "name", "type", "rect"])
                } else {
                    t.to_filtered_json(&["id", "name", "type"])
                }
            })
            .collect();
        json!({
            "window": self.window_title,
            "handle": self.window_handle,
            "process": self.process_name,
            "targets": targets,
            "screenshot": self.screenshot_path,
            "annotated_screenshot": self.annotated_screenshot_path,
            "timestamp": self.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::MemoryControl;
    use crate::targets::Rect;
    use std::rc::Rc;

    fn snapshot() -> UiState {
        let window = WindowInfo {
            handle: 0x42,
            title: "Untitled - Notepad".into(),
            process: "notepad.exe".into(),
            pid: 7,
        };
        let native: ControlRef = Rc::new(MemoryControl::new("Edit", "Text Editor"));
        let mut det = Detection::default();
        det.push(
            TargetInfo::control("Text Editor", "Edit").with_rect(Some(Rect::new(0, 30, 800, 580))),
            Some(native),
        );
        det.push(
            TargetInfo::control("grip", "ResizeHandle").with_rect(Some(Rect::new(790, 590, 800, 600))),
            None,
        );
        det.push(TargetInfo::control("ghost", "VisionElement"), None);
        det.renumber();
        UiState::new(&window, det)
    }

    #[test]
    fn compact_text_shows_rects_only_for_coordinate_targets() {
        let s = snapshot();
        assert_eq!(
            s.to_text(false),
            "Window: \"Untitled - Notepad\" (notepad.exe)\n\
             [1] [Edit] \"Text Editor\"\n\
             [2] [ResizeHandle] \"grip\" rect=[790, 590, 800, 600]\n\
             [3] [VisionElement] \"ghost\""
        );
    }

    #[test]
    fn verbose_text_shows_every_rect() {
        let text = snapshot().to_text(true);
        assert!(text.contains("[1] [Edit] \"Text Editor\" rect=[0, 30, 800, 580]"));
        assert!(text.ends_with("[3] [VisionElement] \"ghost\""));
    }

    #[test]
    fn json_follows_the_same_rect_rule() {
        let s = snapshot();
        let v = s.to_json(false);
        assert_eq!(v["window"], "Untitled - Notepad");
        assert_eq!(v["handle"], 0x42);
        assert_eq!(v["process"], "notepad.exe");
        assert!(v["screenshot"].is_null());
        assert!(v["targets"][0].get("rect").is_none());
        assert_eq!(v["targets"][1]["rect"], json!([790, 590, 800, 600]));
        assert!(v["targets"][2].get("rect").is_none());

        let v = s.to_json(true);
        assert_eq!(v["targets"][0]["rect"], json!([0, 30, 800, 580]));
        assert!(v["targets"][2]["rect"].is_null());
        assert_eq!(v["targets"][2]["id"], "3");
    }

    #[test]
    fn resolve_distinguishes_native_from_coordinate_targets() {
        let s = snapshot();
        assert_eq!(s.resolve("1").map(|c| c.name()), Some("Text Editor".to_string()));
        assert!(s.resolve("2").is_none());
        assert!(s.resolve("99").is_none());
        assert_eq!(s.target("2").map(|t| t.name.as_str()), Some("grip"));
        assert_eq!(s.target_count(), 3);
    }
}
