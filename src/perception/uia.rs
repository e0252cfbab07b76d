// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::rc::Rc;

use tracing::debug;

use super::{Detection, StateProvider};
use crate::error::Result;
use crate::platform::{Desktop, WindowInfo};
use crate::targets::TargetInfo;

/// Control types scanned by default.
pub const DEFAULT_CONTROL_TYPES: &[&str] = &[
    "Button", "Edit", "TabItem", "Document", "ListItem", "MenuItem",
    "ScrollBar", "TreeItem", "Hyperlink", "ComboBox", "RadioButton", "CheckBox",
    "Slider", "Spinner", "DataItem", "Custom", "Group", "HeaderItem",
    "Header", "SplitButton", "MenuBar", "ToolBar", "Text", "Pane",
    "Window", "Table", "TitleBar", "Image", "List", "DataGrid",
    "Tree", "Tab",
];

/// Accessibility-tree source. Every target carries its native handle.
pub struct UiaProvider {
    desktop: Rc<dyn Desktop>,
    control_types: Vec<&'static str>,
}

impl UiaProvider {
    pub fn new(desktop: Rc<dyn Desktop>) -> Self {
        Self {
            desktop,
            control_types: DEFAULT_CONTROL_TYPES.to_vec(),
        }
    }

    pub fn with_control_types(mut self, types: &[&'static str]) -> Self {
        self.control_types = types.to_vec();
        self
    }
}

impl StateProvider for UiaProvider {
    fn label(&self) -> &'static str {
        "uia"
    }

    fn detect(&self, window: &WindowInfo) -> Result<Detection> {
        let controls = self.desktop.controls(window.handle, &self.control_types)?;
        let mut out = Detection::default();
        for (i, control) in controls.into_iter().enumerate() {
            let target = TargetInfo::control(control.name(), control.control_type())
                .with_id((i + 1).to_string())
                .with_rect(control.rect());
            out.push(target, Some(control));
        }
        debug!(window = %window.title, count = out.len(), "uia scan");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::{MemoryControl, MemoryDesktop};
    use crate::targets::Rect;

    #[test]
    fn ids_follow_tree_order() {
        let desktop = Rc::new(MemoryDesktop::new());
        let h = desktop.add_window(
            "Form",
            "form.exe",
            Rect::new(0, 0, 400, 300),
            vec![
                MemoryControl::new("Button", "OK").with_rect(10, 10, 60, 30),
                MemoryControl::new("Separator", "ignored"),
                MemoryControl::new("Edit", "Name").with_rect(10, 40, 200, 60).with_value(""),
            ],
        );
        let window = desktop.windows().unwrap().into_iter().find(|w| w.handle == h).unwrap();
        let provider = UiaProvider::new(desktop);
        let found = provider.detect(&window).unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found.targets[0].id_str(), "1");
        assert_eq!(found.targets[0].name, "OK");
        assert_eq!(found.targets[1].id_str(), "2");
        assert_eq!(found.targets[1].control_type, "Edit");
        assert_eq!(found.targets[1].rect, Some(Rect::new(10, 40, 200, 60)));
        assert!(found.handles.iter().all(Option::is_some));
    }

    #[test]
    fn control_type_list_can_be_narrowed() {
        let desktop = Rc::new(MemoryDesktop::new());
        let h = desktop.add_window(
            "Form",
            "form.exe",
            Rect::new(0, 0, 400, 300),
            vec![
                MemoryControl::new("Button", "OK"),
                MemoryControl::new("Edit", "Name"),
            ],
        );
        let window = desktop.windows().unwrap().into_iter().find(|w| w.handle == h).unwrap();
        let provider = UiaProvider::new(desktop).with_control_types(&["Edit"]);
        let found = provider.detect(&window).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found.targets[0].name, "Name");
    }
}
