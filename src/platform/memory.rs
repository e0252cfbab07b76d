// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Scripted desktop. Windows and controls are declared up front, injected
//! input is recorded instead of delivered.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use super::{Control, ControlRef, Desktop, MouseButton, WindowInfo};
use crate::error::{Error, Result};
use crate::keys::Chord;
use crate::targets::Rect;

#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Activate { handle: isize },
    Click { x: i32, y: i32, button: MouseButton, double: bool },
    Drag { from: (i32, i32), to: (i32, i32), button: MouseButton },
    Scroll { x: i32, y: i32, notches: i32, horizontal: bool },
    Chords(Vec<Chord>),
    Text(String),
    Invoke { name: String },
    SetValue { name: String, text: String },
    Focus { name: String },
}

pub struct MemoryControl {
    name: String,
    control_type: String,
    class_name: String,
    rect: Option<Rect>,
    visible: Cell<bool>,
    enabled: Cell<bool>,
    legacy_value: Option<String>,
    value: RefCell<Option<String>>,
    children: Vec<Rc<MemoryControl>>,
    events: RefCell<Option<Rc<RefCell<Vec<InputEvent>>>>>,
}

impl MemoryControl {
    pub fn new(control_type: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            control_type: control_type.to_string(),
            class_name: String::new(),
            rect: None,
            visible: Cell::new(true),
            enabled: Cell::new(true),
            legacy_value: None,
            value: RefCell::new(None),
            children: Vec::new(),
            events: RefCell::new(None),
        }
    }

    pub fn with_rect(mut self, l: i32, t: i32, r: i32, b: i32) -> Self {
        self.rect = Some(Rect::new(l, t, r, b));
        self
    }

    pub fn with_class(mut self, class_name: &str) -> Self {
        self.class_name = class_name.to_string();
        self
    }

    pub fn with_value(self, value: &str) -> Self {
        *self.value.borrow_mut() = Some(value.to_string());
        self
    }

    pub fn with_legacy(mut self, value: &str) -> Self {
        self.legacy_value = Some(value.to_string());
        self
    }

    pub fn hidden(self) -> Self {
        self.visible.set(false);
        self
    }

    pub fn disabled(self) -> Self {
        self.enabled.set(false);
        self
    }

    pub fn with_child(mut self, child: MemoryControl) -> Self {
        self.children.push(Rc::new(child));
        self
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.set(visible);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    fn attach(&self, log: &Rc<RefCell<Vec<InputEvent>>>) {
        *self.events.borrow_mut() = Some(Rc::clone(log));
        for c in &self.children {
            c.attach(log);
        }
    }

    fn record(&self, event: InputEvent) {
        if let Some(log) = self.events.borrow().as_ref() {
            log.borrow_mut().push(event);
        }
    }

    fn walk(&self, out: &mut Vec<Rc<MemoryControl>>) {
        for c in &self.children {
            out.push(Rc::clone(c));
            c.walk(out);
        }
    }
}

impl Control for MemoryControl {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn control_type(&self) -> String {
        self.control_type.clone()
    }

    fn class_name(&self) -> String {
        self.class_name.clone()
    }

    fn automation_id(&self) -> String {
        String::new()
    }

    fn rect(&self) -> Option<Rect> {
        self.rect
    }

    fn is_visible(&self) -> bool {
        self.visible.get()
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn is_selected(&self) -> Option<bool> {
        None
    }

    fn legacy_value(&self) -> Option<String> {
        self.legacy_value.clone()
    }

    fn value(&self) -> Option<String> {
        self.value.borrow().clone()
    }

    fn texts(&self) -> Vec<String> {
        match self.value.borrow().as_deref() {
            Some(v) if !v.is_empty() => v.lines().map(str::to_string).collect(),
            _ if self.name.is_empty() => Vec::new(),
            _ => vec![self.name.clone()],
        }
    }

    fn children(&self) -> Vec<ControlRef> {
        self.children.iter().map(|c| Rc::clone(c) as ControlRef).collect()
    }

    fn set_focus(&self) -> Result<()> {
        self.record(InputEvent::Focus { name: self.name.clone() });
        Ok(())
    }

    fn set_value(&self, text: &str) -> Result<()> {
        if self.value.borrow().is_none() {
            return Err(Error::Platform(format!("'{}' has no ValuePattern", self.name)));
        }
        *self.value.borrow_mut() = Some(text.to_string());
        self.record(InputEvent::SetValue {
            name: self.name.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    fn invoke(&self) -> Result<()> {
        self.record(InputEvent::Invoke { name: self.name.clone() });
        Ok(())
    }
}

struct MemoryWindow {
    info: WindowInfo,
    rect: Rect,
    root: Rc<MemoryControl>,
}

#[derive(Default)]
struct State {
    windows: Vec<MemoryWindow>,
    foreground: Option<isize>,
    launchable: HashMap<String, MemoryWindow>,
    next_handle: isize,
}

/// In-memory desktop.
pub struct MemoryDesktop {
    state: RefCell<State>,
    events: Rc<RefCell<Vec<InputEvent>>>,
}

impl Default for MemoryDesktop {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDesktop {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State {
                next_handle: 0x1000,
                ..Default::default()
            }),
            events: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn build(&self, title: &str, process: &str, rect: Rect, controls: Vec<MemoryControl>) -> MemoryWindow {
        let mut st = self.state.borrow_mut();
        let handle = st.next_handle;
        st.next_handle += 0x10;
        let mut root = MemoryControl::new("Window", title);
        root.rect = Some(rect);
        for c in controls {
            root = root.with_child(c);
        }
        let root = Rc::new(root);
        root.attach(&self.events);
        MemoryWindow {
            info: WindowInfo {
                handle,
                title: title.to_string(),
                process: process.to_string(),
                pid: 1000 + handle as u32,
            },
            rect,
            root,
        }
    }

    /// Add a visible window. Returns its handle.
    pub fn add_window(&self, title: &str, process: &str, rect: Rect, controls: Vec<MemoryControl>) -> isize {
        let w = self.build(title, process, rect, controls);
        let handle = w.info.handle;
        self.state.borrow_mut().windows.push(w);
        handle
    }

    /// Make `command` open a window when launched.
    pub fn on_launch(&self, command: &str, title: &str, process: &str, rect: Rect, controls: Vec<MemoryControl>) {
        let w = self.build(title, process, rect, controls);
        self.state.borrow_mut().launchable.insert(command.to_string(), w);
    }

    pub fn set_foreground(&self, handle: Option<isize>) {
        self.state.borrow_mut().foreground = handle;
    }

    pub fn set_title(&self, handle: isize, title: &str) {
        if let Some(w) = self.state.borrow_mut().windows.iter_mut().find(|w| w.info.handle == handle) {
            w.info.title = title.to_string();
        }
    }

    /// Descendant of window `handle` by name, for flipping state in tests.
    pub fn find(&self, handle: isize, name: &str) -> Option<Rc<MemoryControl>> {
        let st = self.state.borrow();
        let w = st.windows.iter().find(|w| w.info.handle == handle)?;
        let mut all = Vec::new();
        w.root.walk(&mut all);
        all.into_iter().find(|c| c.name == name)
    }

    pub fn events(&self) -> Vec<InputEvent> {
        self.events.borrow().clone()
    }

    pub fn clear_events(&self) {
        self.events.borrow_mut().clear();
    }

    fn record(&self, event: InputEvent) {
        self.events.borrow_mut().push(event);
    }

    fn with_window<T>(&self, handle: isize, f: impl FnOnce(&MemoryWindow) -> T) -> Result<T> {
        let st = self.state.borrow();
        st.windows
            .iter()
            .find(|w| w.info.handle == handle)
            .map(f)
            .ok_or_else(|| Error::Platform(format!("window 0x{handle:X} no longer exists")))
    }
}

impl Desktop for MemoryDesktop {
    fn windows(&self) -> Result<Vec<WindowInfo>> {
        Ok(self.state.borrow().windows.iter().map(|w| w.info.clone()).collect())
    }

    fn foreground(&self) -> Option<WindowInfo> {
        let st = self.state.borrow();
        let handle = st.foreground?;
        st.windows.iter().find(|w| w.info.handle == handle).map(|w| w.info.clone())
    }

    fn window_title(&self, handle: isize) -> Option<String> {
        self.with_window(handle, |w| w.info.title.clone()).ok()
    }

    fn window_rect(&self, handle: isize) -> Result<Rect> {
        self.with_window(handle, |w| w.rect)
    }

    fn activate(&self, handle: isize) -> Result<()> {
        self.with_window(handle, |_| ())?;
        self.state.borrow_mut().foreground = Some(handle);
        self.record(InputEvent::Activate { handle });
        Ok(())
    }

    fn close(&self, handle: isize) -> Result<()> {
        let mut st = self.state.borrow_mut();
        let before = st.windows.len();
        st.windows.retain(|w| w.info.handle != handle);
        if st.windows.len() == before {
            return Err(Error::Platform(format!("window 0x{handle:X} no longer exists")));
        }
        if st.foreground == Some(handle) {
            st.foreground = None;
        }
        Ok(())
    }

    fn launch(&self, command: &str) -> Result<()> {
        let mut st = self.state.borrow_mut();
        let w = st
            .launchable
            .remove(command)
            .ok_or_else(|| Error::Platform(format!("cannot launch '{command}'")))?;
        st.foreground = Some(w.info.handle);
        st.windows.push(w);
        Ok(())
    }

    fn controls(&self, handle: isize, types: &[&str]) -> Result<Vec<ControlRef>> {
        let root = self.with_window(handle, |w| Rc::clone(&w.root))?;
        let mut all = Vec::new();
        root.walk(&mut all);
        Ok(all
            .into_iter()
            .filter(|c| c.is_visible() && c.is_enabled())
            .filter(|c| types.contains(&c.control_type.as_str()))
            .map(|c| c as ControlRef)
            .collect())
    }

    fn children(&self, handle: isize) -> Result<Vec<ControlRef>> {
        let root = self.with_window(handle, |w| Rc::clone(&w.root))?;
        Ok(root.children())
    }

    fn capture(&self, handle: isize) -> Result<image::RgbaImage> {
        let rect = self.window_rect(handle)?;
        let (w, h) = (rect.width().max(1) as u32, rect.height().max(1) as u32);
        Ok(image::RgbaImage::from_pixel(w, h, image::Rgba([255, 255, 255, 255])))
    }

    fn click(&self, x: i32, y: i32, button: MouseButton, double: bool) -> Result<()> {
        self.record(InputEvent::Click { x, y, button, double });
        Ok(())
    }

    fn drag(&self, from: (i32, i32), to: (i32, i32), button: MouseButton, _duration: Duration) -> Result<()> {
        self.record(InputEvent::Drag { from, to, button });
        Ok(())
    }

    fn scroll(&self, x: i32, y: i32, notches: i32, horizontal: bool) -> Result<()> {
        self.record(InputEvent::Scroll { x, y, notches, horizontal });
        Ok(())
    }

    fn send_chords(&self, chords: &[Chord]) -> Result<()> {
        self.record(InputEvent::Chords(chords.to_vec()));
        Ok(())
    }

    fn type_text(&self, text: &str, _pause: Duration) -> Result<()> {
        self.record(InputEvent::Text(text.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desktop() -> (MemoryDesktop, isize) {
        let d = MemoryDesktop::new();
        let h = d.add_window(
            "Untitled - Notepad",
            "notepad.exe",
            Rect::new(0, 0, 800, 600),
            vec![
                MemoryControl::new("Pane", "Body")
                    .with_rect(0, 30, 800, 600)
                    .with_child(MemoryControl::new("Edit", "Text Editor").with_rect(0, 30, 800, 580).with_value("")),
                MemoryControl::new("Button", "Hidden").hidden(),
                MemoryControl::new("Button", "Greyed").disabled(),
            ],
        );
        (d, h)
    }

    #[test]
    fn controls_are_filtered_and_in_tree_order() {
        let (d, h) = desktop();
        let found = d.controls(h, &["Pane", "Edit", "Button"]).unwrap();
        let names: Vec<String> = found.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["Body", "Text Editor"]);
    }

    #[test]
    fn control_actions_are_recorded() {
        let (d, h) = desktop();
        let edit = d.controls(h, &["Edit"]).unwrap().remove(0);
        edit.set_value("hello").unwrap();
        assert_eq!(edit.value().as_deref(), Some("hello"));
        assert_eq!(
            d.events(),
            vec![InputEvent::SetValue { name: "Text Editor".into(), text: "hello".into() }]
        );
    }

    #[test]
    fn launch_and_close() {
        let (d, h) = desktop();
        d.on_launch("calc.exe", "Calculator", "calc.exe", Rect::new(0, 0, 300, 400), vec![]);
        d.launch("calc.exe").unwrap();
        assert_eq!(d.windows().unwrap().len(), 2);
        assert_eq!(d.foreground().unwrap().title, "Calculator");
        d.close(h).unwrap();
        assert!(d.window_title(h).is_none());
        assert!(d.launch("calc.exe").is_err());
    }
}
