// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! UI Automation + SendInput backend.

use std::mem;
use std::process::Command;
use std::rc::Rc;
use std::thread::sleep;
use std::time::Duration;

use screenshots::Screen;
use windows::core::*;
use windows::Win32::Foundation::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_FORMAT, PROCESS_QUERY_LIMITED_INFORMATION,
};
use windows::Win32::UI::Accessibility::*;
use windows::Win32::UI::Input::KeyboardAndMouse::*;
use windows::Win32::UI::WindowsAndMessaging::*;

use super::{Control, ControlRef, Desktop, MouseButton, WindowInfo};
use crate::error::{Error, Result};
use crate::keys::{is_extended_key, Chord, Key, VK_RETURN};
use crate::targets::Rect;

const CONNECTION_TIMEOUT_MS: u32 = 2000;
const WHEEL_DELTA: i32 = 120;
const STATE_SYSTEM_SELECTED: u32 = 0x2;
const STATE_SYSTEM_CHECKED: u32 = 0x10;
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

fn hwnd(handle: isize) -> HWND {
    HWND(handle as *mut _)
}

// ── Shell windows ───────────────────────────────────
unsafe fn is_shell(hwnd: HWND) -> bool {
    if hwnd == GetDesktopWindow() { return true; }
    let mut buf = [0u16; 64];
    let len = GetClassNameW(hwnd, &mut buf);
    if len == 0 { return false; }
    let cls = String::from_utf16_lossy(&buf[..len as usize]);
    matches!(cls.as_str(),
        "Progman" | "WorkerW" | "Shell_TrayWnd" |
        "Shell_SecondaryTrayWnd" | "SHELLDLL_DefView"
    )
}

fn role_name(ct: i32) -> &'static str {
    match ct {
        50000 => "Button",     50001 => "Calendar",   50002 => "CheckBox",
        50003 => "ComboBox",   50004 => "Edit",       50005 => "Hyperlink",
        50006 => "Image",      50007 => "ListItem",   50008 => "List",
        50009 => "Menu",       50010 => "MenuBar",    50011 => "MenuItem",
        50012 => "ProgressBar",50013 => "RadioButton",50014 => "ScrollBar",
        50015 => "Slider",     50016 => "Spinner",    50017 => "StatusBar",
        50018 => "Tab",        50019 => "TabItem",    50020 => "Text",
        50021 => "ToolBar",    50022 => "ToolTip",    50023 => "Tree",
        50024 => "TreeItem",   50025 => "Custom",     50026 => "Group",
        50027 => "Thumb",      50028 => "DataGrid",   50029 => "DataItem",
        50030 => "Document",   50031 => "SplitButton",50032 => "Window",
        50033 => "Pane",       50034 => "Header",     50035 => "HeaderItem",
        50036 => "Table",      50037 => "TitleBar",   50038 => "Separator",
        _ => "Unknown",
    }
}

unsafe fn window_text(hwnd: HWND) -> String {
    let mut buf = [0u16; 512];
    let len = GetWindowTextW(hwnd, &mut buf);
    if len <= 0 { return String::new(); }
    String::from_utf16_lossy(&buf[..len as usize])
}

unsafe extern "system" fn enum_windows_cb(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let vec = &mut *(lparam.0 as *mut Vec<isize>);
    vec.push(hwnd.0 as isize);
    TRUE
}

unsafe fn collect_windows() -> Vec<isize> {
    let mut hwnds: Vec<isize> = Vec::new();
    let _ = EnumWindows(Some(enum_windows_cb), LPARAM(&mut hwnds as *mut Vec<isize> as isize));
    hwnds
}

unsafe fn get_exe_name(pid: u32) -> String {
    if pid == 0 { return String::new(); }
    let handle = match OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, FALSE, pid) {
        Ok(h) => h,
        Err(_) => return String::new(),
    };
    let mut buf = [0u16; 260];
    let mut len = buf.len() as u32;
    let ok = QueryFullProcessImageNameW(
        handle, PROCESS_NAME_FORMAT(0), PWSTR(buf.as_mut_ptr()), &mut len,
    );
    let _ = CloseHandle(handle);
    if ok.is_ok() {
        let path = String::from_utf16_lossy(&buf[..len as usize]);
        path.rsplit('\\').next().unwrap_or("").to_string()
    } else {
        String::new()
    }
}

unsafe fn window_info(hwnd: HWND) -> Option<WindowInfo> {
    if hwnd.0.is_null() || !IsWindowVisible(hwnd).as_bool() || is_shell(hwnd) {
        return None;
    }
    let title = window_text(hwnd);
    if title.trim().is_empty() { return None; }
    let mut pid: u32 = 0;
    GetWindowThreadProcessId(hwnd, Some(&mut pid));
    Some(WindowInfo {
        handle: hwnd.0 as isize,
        title,
        process: get_exe_name(pid),
        pid,
    })
}

fn to_rect(r: RECT) -> Option<Rect> {
    let rect = Rect::new(r.left, r.top, r.right, r.bottom);
    (rect.width() > 0 && rect.height() > 0).then_some(rect)
}

// ── Controls ────────────────────────────────────────

pub struct UiaControl {
    elem: IUIAutomationElement,
    walker: IUIAutomationTreeWalker,
}

impl UiaControl {
    unsafe fn pattern<T: Interface>(&self, id: UIA_PATTERN_ID) -> Option<T> {
        self.elem.GetCurrentPattern(id).ok()?.cast::<T>().ok()
    }

    unsafe fn legacy(&self) -> Option<IUIAutomationLegacyIAccessiblePattern> {
        self.pattern(UIA_LegacyIAccessiblePatternId)
    }
}

unsafe fn children_of(elem: &IUIAutomationElement, walker: &IUIAutomationTreeWalker) -> Vec<ControlRef> {
    let mut out: Vec<ControlRef> = Vec::new();
    let mut next = walker.GetFirstChildElement(elem).ok();
    while let Some(child) = next {
        next = walker.GetNextSiblingElement(&child).ok();
        out.push(Rc::new(UiaControl { elem: child, walker: walker.clone() }));
    }
    out
}

impl Control for UiaControl {
    fn name(&self) -> String {
        unsafe { self.elem.CurrentName().map(|s| s.to_string()).unwrap_or_default() }
    }

    fn control_type(&self) -> String {
        unsafe {
            let ct = self.elem.CurrentControlType().unwrap_or_default();
            role_name(ct.0).to_string()
        }
    }

    fn class_name(&self) -> String {
        unsafe { self.elem.CurrentClassName().map(|s| s.to_string()).unwrap_or_default() }
    }

    fn automation_id(&self) -> String {
        unsafe { self.elem.CurrentAutomationId().map(|s| s.to_string()).unwrap_or_default() }
    }

    fn rect(&self) -> Option<Rect> {
        unsafe { self.elem.CurrentBoundingRectangle().ok().and_then(to_rect) }
    }

    fn is_visible(&self) -> bool {
        unsafe { !self.elem.CurrentIsOffscreen().map(|b| b.as_bool()).unwrap_or(true) }
    }

    fn is_enabled(&self) -> bool {
        unsafe { self.elem.CurrentIsEnabled().map(|b| b.as_bool()).unwrap_or(false) }
    }

    fn is_selected(&self) -> Option<bool> {
        unsafe {
            let state = self.legacy()?.CurrentState().ok()?;
            Some(state & (STATE_SYSTEM_CHECKED | STATE_SYSTEM_SELECTED) != 0)
        }
    }

    fn legacy_value(&self) -> Option<String> {
        unsafe { self.legacy()?.CurrentValue().ok().map(|s| s.to_string()) }
    }

    fn value(&self) -> Option<String> {
        unsafe {
            let vp: IUIAutomationValuePattern = self.pattern(UIA_ValuePatternId)?;
            vp.CurrentValue().ok().map(|s| s.to_string())
        }
    }

    fn texts(&self) -> Vec<String> {
        if let Some(v) = self.value().filter(|v| !v.is_empty()) {
            return v.lines().map(str::to_string).collect();
        }
        let name = self.name();
        if name.is_empty() { Vec::new() } else { vec![name] }
    }

    fn children(&self) -> Vec<ControlRef> {
        unsafe { children_of(&self.elem, &self.walker) }
    }

    fn set_focus(&self) -> Result<()> {
        unsafe { self.elem.SetFocus()? };
        Ok(())
    }

    fn set_value(&self, text: &str) -> Result<()> {
        unsafe {
            let vp: IUIAutomationValuePattern = self
                .pattern(UIA_ValuePatternId)
                .ok_or_else(|| Error::Platform(format!("'{}' has no ValuePattern", self.name())))?;
            vp.SetValue(&BSTR::from(text))?;
        }
        Ok(())
    }

    fn invoke(&self) -> Result<()> {
        unsafe {
            let ip: IUIAutomationInvokePattern = self
                .pattern(UIA_InvokePatternId)
                .ok_or_else(|| Error::Platform(format!("'{}' has no InvokePattern", self.name())))?;
            ip.Invoke()?;
        }
        Ok(())
    }
}

// ── Input injection ─────────────────────────────────

unsafe fn send(inputs: &[INPUT]) -> Result<()> {
    let sent = SendInput(inputs, mem::size_of::<INPUT>() as i32);
    if sent as usize != inputs.len() {
        return Err(Error::Platform(format!("SendInput delivered {sent} of {} events", inputs.len())));
    }
    Ok(())
}

fn key_input(vk: u16, scan: u16, flags: KEYBD_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY(vk), wScan: scan,
                dwFlags: flags,
                time: 0, dwExtraInfo: 0,
            },
        },
    }
}

fn vk_flags(vk: u16) -> KEYBD_EVENT_FLAGS {
    if is_extended_key(vk) { KEYEVENTF_EXTENDEDKEY } else { KEYBD_EVENT_FLAGS(0) }
}

unsafe fn send_vk_down(vk: u16) -> Result<()> {
    send(&[key_input(vk, 0, vk_flags(vk))])
}

unsafe fn send_vk_up(vk: u16) -> Result<()> {
    send(&[key_input(vk, 0, vk_flags(vk) | KEYEVENTF_KEYUP)])
}

unsafe fn inject_char(ch: char) -> Result<()> {
    let mut units = [0u16; 2];
    for &code in ch.encode_utf16(&mut units).iter() {
        send(&[
            key_input(0, code, KEYEVENTF_UNICODE),
            key_input(0, code, KEYEVENTF_UNICODE | KEYEVENTF_KEYUP),
        ])?;
    }
    Ok(())
}

/// Screen point to the 0..65535 absolute virtual-desk space.
unsafe fn to_absolute(x: i32, y: i32) -> (i32, i32) {
    let screen_w = GetSystemMetrics(SM_CXVIRTUALSCREEN).max(1);
    let screen_h = GetSystemMetrics(SM_CYVIRTUALSCREEN).max(1);
    let screen_x = GetSystemMetrics(SM_XVIRTUALSCREEN);
    let screen_y = GetSystemMetrics(SM_YVIRTUALSCREEN);
    ((x - screen_x) * 65535 / screen_w, (y - screen_y) * 65535 / screen_h)
}

fn mouse_input(abs: (i32, i32), data: i32, flags: MOUSE_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT {
                dx: abs.0, dy: abs.1,
                mouseData: data as u32,
                dwFlags: MOUSEEVENTF_ABSOLUTE | MOUSEEVENTF_VIRTUALDESK | MOUSEEVENTF_MOVE | flags,
                time: 0, dwExtraInfo: 0,
            },
        },
    }
}

fn button_flags(button: MouseButton) -> (MOUSE_EVENT_FLAGS, MOUSE_EVENT_FLAGS) {
    match button {
        MouseButton::Left => (MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP),
        MouseButton::Right => (MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP),
        MouseButton::Middle => (MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP),
    }
}

// ── Desktop ─────────────────────────────────────────

pub struct UiaDesktop {
    uia: IUIAutomation,
}

impl UiaDesktop {
    pub fn new() -> Result<Self> {
        unsafe {
            let _ = CoInitializeEx(None, COINIT_MULTITHREADED);
            let uia: IUIAutomation = CoCreateInstance(&CUIAutomation8, None, CLSCTX_INPROC_SERVER)?;
            if let Ok(uia6) = uia.cast::<IUIAutomation6>() {
                let _ = uia6.SetConnectionTimeout(CONNECTION_TIMEOUT_MS);
            }
            Ok(Self { uia })
        }
    }

    unsafe fn root(&self, handle: isize) -> Result<(IUIAutomationElement, IUIAutomationTreeWalker)> {
        let root = self.uia.ElementFromHandle(hwnd(handle))?;
        let walker = self.uia.RawViewWalker()?;
        Ok((root, walker))
    }
}

unsafe fn collect_controls(
    elem: &IUIAutomationElement,
    walker: &IUIAutomationTreeWalker,
    types: &[&str],
    out: &mut Vec<ControlRef>,
) {
    let mut next = walker.GetFirstChildElement(elem).ok();
    while let Some(child) = next {
        next = walker.GetNextSiblingElement(&child).ok();
        let ct = role_name(child.CurrentControlType().unwrap_or_default().0);
        let offscreen = child.CurrentIsOffscreen().map(|b| b.as_bool()).unwrap_or(true);
        let enabled = child.CurrentIsEnabled().map(|b| b.as_bool()).unwrap_or(false);
        if !offscreen && enabled && types.contains(&ct) {
            out.push(Rc::new(UiaControl { elem: child.clone(), walker: walker.clone() }));
        }
        collect_controls(&child, walker, types, out);
    }
}

impl Desktop for UiaDesktop {
    fn windows(&self) -> Result<Vec<WindowInfo>> {
        unsafe {
            Ok(collect_windows()
                .into_iter()
                .filter_map(|raw| window_info(hwnd(raw)))
                .collect())
        }
    }

    fn foreground(&self) -> Option<WindowInfo> {
        unsafe { window_info(GetForegroundWindow()) }
    }

    fn window_title(&self, handle: isize) -> Option<String> {
        unsafe {
            let h = hwnd(handle);
            IsWindow(h).as_bool().then(|| window_text(h))
        }
    }

    fn window_rect(&self, handle: isize) -> Result<Rect> {
        unsafe {
            let mut rc = RECT::default();
            GetWindowRect(hwnd(handle), &mut rc)?;
            Ok(Rect::new(rc.left, rc.top, rc.right, rc.bottom))
        }
    }

    fn activate(&self, handle: isize) -> Result<()> {
        unsafe {
            let h = hwnd(handle);
            if !IsWindow(h).as_bool() {
                return Err(Error::Platform(format!("window 0x{handle:X} no longer exists")));
            }
            if IsIconic(h).as_bool() {
                let _ = ShowWindow(h, SW_RESTORE);
            }
            let _ = SetForegroundWindow(h);
        }
        sleep(Duration::from_millis(30));
        Ok(())
    }

    fn close(&self, handle: isize) -> Result<()> {
        unsafe { PostMessageW(hwnd(handle), WM_CLOSE, WPARAM(0), LPARAM(0))? };
        Ok(())
    }

    fn launch(&self, command: &str) -> Result<()> {
        use std::os::windows::process::CommandExt;
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| Error::invalid("app", "empty command line"))?;
        Command::new(program)
            .args(parts)
            .creation_flags(CREATE_NEW_PROCESS_GROUP)
            .spawn()
            .map_err(|e| Error::Platform(format!("cannot launch '{command}': {e}")))?;
        Ok(())
    }

    fn controls(&self, handle: isize, types: &[&str]) -> Result<Vec<ControlRef>> {
        unsafe {
            let (root, walker) = self.root(handle)?;
            let mut out = Vec::new();
            collect_controls(&root, &walker, types, &mut out);
            Ok(out)
        }
    }

    fn children(&self, handle: isize) -> Result<Vec<ControlRef>> {
        unsafe {
            let (root, walker) = self.root(handle)?;
            Ok(children_of(&root, &walker))
        }
    }

    fn capture(&self, handle: isize) -> Result<image::RgbaImage> {
        let rect = self.window_rect(handle)?;
        let screen = Screen::from_point(rect.left + 1, rect.top + 1)
            .map_err(|e| Error::Platform(format!("screen lookup failed: {e}")))?;
        screen
            .capture_area(
                rect.left - screen.display_info.x,
                rect.top - screen.display_info.y,
                rect.width().max(1) as u32,
                rect.height().max(1) as u32,
            )
            .map_err(|e| Error::Platform(format!("capture failed: {e}")))
    }

    fn click(&self, x: i32, y: i32, button: MouseButton, double: bool) -> Result<()> {
        unsafe {
            let abs = to_absolute(x, y);
            let (down, up) = button_flags(button);
            let presses = if double { 2 } else { 1 };
            for _ in 0..presses {
                send(&[mouse_input(abs, 0, down), mouse_input(abs, 0, up)])?;
            }
        }
        Ok(())
    }

    fn drag(&self, from: (i32, i32), to: (i32, i32), button: MouseButton, duration: Duration) -> Result<()> {
        const STEPS: i32 = 20;
        let (down, up) = button_flags(button);
        let pause = duration / STEPS as u32;
        unsafe {
            send(&[mouse_input(to_absolute(from.0, from.1), 0, down)])?;
            for i in 1..=STEPS {
                let x = from.0 + (to.0 - from.0) * i / STEPS;
                let y = from.1 + (to.1 - from.1) * i / STEPS;
                send(&[mouse_input(to_absolute(x, y), 0, MOUSE_EVENT_FLAGS(0))])?;
                sleep(pause);
            }
            send(&[mouse_input(to_absolute(to.0, to.1), 0, up)])?;
        }
        Ok(())
    }

    fn scroll(&self, x: i32, y: i32, notches: i32, horizontal: bool) -> Result<()> {
        let flag = if horizontal { MOUSEEVENTF_HWHEEL } else { MOUSEEVENTF_WHEEL };
        unsafe { send(&[mouse_input(to_absolute(x, y), notches * WHEEL_DELTA, flag)]) }
    }

    fn send_chords(&self, chords: &[Chord]) -> Result<()> {
        unsafe {
            for chord in chords {
                for &m in &chord.modifiers {
                    send_vk_down(m)?;
                }
                match chord.key {
                    Some(Key::Vk(vk)) => {
                        send_vk_down(vk)?;
                        send_vk_up(vk)?;
                    }
                    Some(Key::Char(c)) => inject_char(c)?,
                    None => {}
                }
                for &m in chord.modifiers.iter().rev() {
                    send_vk_up(m)?;
                }
            }
        }
        Ok(())
    }

    fn type_text(&self, text: &str, pause: Duration) -> Result<()> {
        unsafe {
            for ch in text.chars() {
                match ch {
                    '\r' => continue,
                    '\n' => {
                        send_vk_down(VK_RETURN)?;
                        send_vk_up(VK_RETURN)?;
                    }
                    c => inject_char(c)?,
                }
                if !pause.is_zero() {
                    sleep(pause);
                }
            }
        }
        Ok(())
    }
}
