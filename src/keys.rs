// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Key strings to chords.
//!
//! Two notations are accepted and may be mixed:
//! - human: `ctrl+a`, `alt+f4`, `Enter`, `ctrl+shift+esc`
//! - brace: `{ENTER}`, `^a`, `%{F4}`, `+{TAB}`, `{TAB 3}`, `~`
//!
//! `ctrl+a{DELETE}` sends ctrl+a followed by Delete. Modifiers bind to the
//! next key only.

use crate::error::{Error, Result};

pub const VK_BACK: u16 = 0x08;
pub const VK_TAB: u16 = 0x09;
pub const VK_RETURN: u16 = 0x0D;
pub const VK_SHIFT: u16 = 0x10;
pub const VK_CONTROL: u16 = 0x11;
pub const VK_MENU: u16 = 0x12;
pub const VK_PAUSE: u16 = 0x13;
pub const VK_CAPITAL: u16 = 0x14;
pub const VK_ESCAPE: u16 = 0x1B;
pub const VK_SPACE: u16 = 0x20;
pub const VK_PRIOR: u16 = 0x21;
pub const VK_NEXT: u16 = 0x22;
pub const VK_END: u16 = 0x23;
pub const VK_HOME: u16 = 0x24;
pub const VK_LEFT: u16 = 0x25;
pub const VK_UP: u16 = 0x26;
pub const VK_RIGHT: u16 = 0x27;
pub const VK_DOWN: u16 = 0x28;
pub const VK_SNAPSHOT: u16 = 0x2C;
pub const VK_INSERT: u16 = 0x2D;
pub const VK_DELETE: u16 = 0x2E;
pub const VK_LWIN: u16 = 0x5B;
pub const VK_RWIN: u16 = 0x5C;
pub const VK_APPS: u16 = 0x5D;
pub const VK_NUMPAD0: u16 = 0x60;
pub const VK_MULTIPLY: u16 = 0x6A;
pub const VK_ADD: u16 = 0x6B;
pub const VK_SUBTRACT: u16 = 0x6D;
pub const VK_DECIMAL: u16 = 0x6E;
pub const VK_DIVIDE: u16 = 0x6F;
pub const VK_F1: u16 = 0x70;
pub const VK_NUMLOCK: u16 = 0x90;
pub const VK_SCROLL: u16 = 0x91;
pub const VK_VOLUME_MUTE: u16 = 0xAD;
pub const VK_VOLUME_DOWN: u16 = 0xAE;
pub const VK_VOLUME_UP: u16 = 0xAF;
pub const VK_MEDIA_NEXT_TRACK: u16 = 0xB0;
pub const VK_MEDIA_PREV_TRACK: u16 = 0xB1;
pub const VK_MEDIA_STOP: u16 = 0xB2;
pub const VK_MEDIA_PLAY_PAUSE: u16 = 0xB3;
pub const VK_OEM_1: u16 = 0xBA;
pub const VK_OEM_PLUS: u16 = 0xBB;
pub const VK_OEM_COMMA: u16 = 0xBC;
pub const VK_OEM_MINUS: u16 = 0xBD;
pub const VK_OEM_PERIOD: u16 = 0xBE;
pub const VK_OEM_2: u16 = 0xBF;
pub const VK_OEM_3: u16 = 0xC0;
pub const VK_OEM_4: u16 = 0xDB;
pub const VK_OEM_5: u16 = 0xDC;
pub const VK_OEM_6: u16 = 0xDD;
pub const VK_OEM_7: u16 = 0xDE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Virtual-key code.
    Vk(u16),
    /// Literal character, injected as Unicode.
    Char(char),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Chord {
    /// Held down in order, released in reverse.
    pub modifiers: Vec<u16>,
    pub key: Option<Key>,
}

impl Chord {
    fn new(modifiers: Vec<u16>, key: Key) -> Self {
        Self { modifiers, key: Some(key) }
    }
}

/// Map a key name to its VK code.
pub fn key_to_vk(name: &str) -> Option<u16> {
    let lower = name.to_lowercase();
    let mut chars = lower.chars();
    if let (Some(c), None) = (chars.next(), chars.clone().next()) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            return Some(c.to_ascii_uppercase() as u16);
        }
    }
    if let Some(n) = lower.strip_prefix('f').and_then(|n| n.parse::<u16>().ok()) {
        if (1..=24).contains(&n) {
            return Some(VK_F1 + n - 1);
        }
    }
    if let Some(n) = lower.strip_prefix("num").and_then(|n| n.parse::<u16>().ok()) {
        if n <= 9 {
            return Some(VK_NUMPAD0 + n);
        }
    }
    let vk = match lower.as_str() {
        // Modifiers
        "ctrl" | "control" => VK_CONTROL,
        "alt" | "menu" => VK_MENU,
        "shift" => VK_SHIFT,
        "win" | "lwin" => VK_LWIN,
        "rwin" => VK_RWIN,
        "apps" | "contextmenu" => VK_APPS,
        // Navigation
        "enter" | "return" => VK_RETURN,
        "tab" => VK_TAB,
        "escape" | "esc" => VK_ESCAPE,
        "space" => VK_SPACE,
        "backspace" | "bs" | "back" => VK_BACK,
        "delete" | "del" => VK_DELETE,
        "insert" | "ins" => VK_INSERT,
        "home" => VK_HOME,
        "end" => VK_END,
        "pageup" | "pgup" => VK_PRIOR,
        "pagedown" | "pgdn" => VK_NEXT,
        "up" => VK_UP,
        "down" => VK_DOWN,
        "left" => VK_LEFT,
        "right" => VK_RIGHT,
        // Special keys
        "printscreen" | "prtsc" => VK_SNAPSHOT,
        "scrolllock" => VK_SCROLL,
        "pause" | "break" => VK_PAUSE,
        "numlock" => VK_NUMLOCK,
        "capslock" | "caps" => VK_CAPITAL,
        // Punctuation
        ";" | "semicolon" => VK_OEM_1,
        "=" | "equals" => VK_OEM_PLUS,
        "," | "comma" => VK_OEM_COMMA,
        "-" | "minus" => VK_OEM_MINUS,
        "." | "period" => VK_OEM_PERIOD,
        "/" | "slash" => VK_OEM_2,
        "`" | "backtick" => VK_OEM_3,
        "[" | "lbracket" => VK_OEM_4,
        "\\" | "backslash" => VK_OEM_5,
        "]" | "rbracket" => VK_OEM_6,
        "'" | "quote" => VK_OEM_7,
        // Numpad operators
        "multiply" | "num*" => VK_MULTIPLY,
        "add" | "num+" => VK_ADD,
        "subtract" | "num-" => VK_SUBTRACT,
        "decimal" | "num." => VK_DECIMAL,
        "divide" | "num/" => VK_DIVIDE,
        // Media
        "volumeup" => VK_VOLUME_UP,
        "volumedown" => VK_VOLUME_DOWN,
        "volumemute" => VK_VOLUME_MUTE,
        "nexttrack" => VK_MEDIA_NEXT_TRACK,
        "prevtrack" => VK_MEDIA_PREV_TRACK,
        "playpause" => VK_MEDIA_PLAY_PAUSE,
        "stop" => VK_MEDIA_STOP,
        _ => return None,
    };
    Some(vk)
}

pub fn is_modifier(vk: u16) -> bool {
    matches!(vk, VK_CONTROL | VK_MENU | VK_SHIFT | VK_LWIN | VK_RWIN)
}

/// Keys that need KEYEVENTF_EXTENDEDKEY when injected.
pub fn is_extended_key(vk: u16) -> bool {
    matches!(
        vk,
        VK_UP | VK_DOWN | VK_LEFT | VK_RIGHT
            | VK_INSERT | VK_DELETE | VK_HOME | VK_END | VK_PRIOR | VK_NEXT
            | VK_NUMLOCK | VK_SNAPSHOT | VK_RWIN | VK_DIVIDE
    )
}

fn modifier_word(word: &str) -> Option<u16> {
    match word.to_lowercase().as_str() {
        "ctrl" | "control" => Some(VK_CONTROL),
        "shift" => Some(VK_SHIFT),
        "alt" => Some(VK_MENU),
        "win" => Some(VK_LWIN),
        _ => None,
    }
}

/// Parse a key string into chords.
pub fn parse(keys: &str) -> Result<Vec<Chord>> {
    let mut rest = keys.trim();
    if rest.is_empty() {
        return Ok(Vec::new());
    }

    // Leading human modifiers, e.g. the "ctrl+" in "ctrl+a{DELETE}".
    let mut modifiers = Vec::new();
    while let Some((head, tail)) = rest.split_once('+') {
        match modifier_word(head.trim()) {
            Some(vk) => {
                modifiers.push(vk);
                rest = tail;
            }
            None => break,
        }
    }

    if rest.contains('{') || rest.starts_with(['^', '%', '~']) {
        return parse_brace(rest, modifiers);
    }
    if rest.is_empty() {
        // "ctrl+" on its own: tap the modifiers.
        let last = modifiers.pop().ok_or_else(|| Error::UnknownKey(keys.to_string()))?;
        return Ok(vec![Chord::new(modifiers, Key::Vk(last))]);
    }

    // Plain human notation. Anything still containing '+' is a key list
    // whose last element is the main key.
    let parts: Vec<&str> = rest.split('+').map(str::trim).collect();
    let (main, extra_mods) = match parts.split_last() {
        Some((main, mods)) if !main.is_empty() => (*main, mods),
        _ => return Err(Error::UnknownKey(keys.to_string())),
    };
    for part in extra_mods {
        let vk = key_to_vk(part).ok_or_else(|| Error::UnknownKey(part.to_string()))?;
        modifiers.push(vk);
    }
    let vk = key_to_vk(main).ok_or_else(|| Error::UnknownKey(main.to_string()))?;
    Ok(vec![Chord::new(modifiers, Key::Vk(vk))])
}

fn parse_brace(input: &str, mut pending: Vec<u16>) -> Result<Vec<Chord>> {
    let mut chords = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '^' => pending.push(VK_CONTROL),
            '%' => pending.push(VK_MENU),
            '+' => pending.push(VK_SHIFT),
            '~' => chords.push(Chord::new(std::mem::take(&mut pending), Key::Vk(VK_RETURN))),
            '{' => {
                let mut body = String::new();
                // "{}}" and "{{}" name the brace characters themselves.
                if let Some(&first) = chars.peek() {
                    if first == '}' || first == '{' {
                        body.push(first);
                        chars.next();
                    }
                }
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => body.push(ch),
                        None => return Err(Error::UnknownKey(format!("{{{body}"))),
                    }
                }
                let (name, count) = match body.rsplit_once(' ') {
                    Some((name, n)) => match n.parse::<usize>() {
                        Ok(n) => (name.to_string(), n),
                        Err(_) => (body.clone(), 1),
                    },
                    None => (body.clone(), 1),
                };
                let key = braced_key(&name)?;
                let mods = std::mem::take(&mut pending);
                for _ in 0..count {
                    chords.push(Chord::new(mods.clone(), key));
                }
            }
            ch => {
                let mods = std::mem::take(&mut pending);
                let key = if mods.is_empty() {
                    Key::Char(ch)
                } else {
                    let vk = key_to_vk(&ch.to_string())
                        .ok_or_else(|| Error::UnknownKey(ch.to_string()))?;
                    Key::Vk(vk)
                };
                chords.push(Chord::new(mods, key));
            }
        }
    }
    // Dangling modifiers ("^" alone) are tapped.
    if let Some(last) = pending.pop() {
        chords.push(Chord::new(pending, Key::Vk(last)));
    }
    Ok(chords)
}

fn braced_key(name: &str) -> Result<Key> {
    let stripped = name.strip_prefix("VK_").unwrap_or(name);
    if let Some(vk) = key_to_vk(stripped) {
        return Ok(Key::Vk(vk));
    }
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Key::Char(c)),
        _ => Err(Error::UnknownKey(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(keys: &str) -> Chord {
        let chords = parse(keys).unwrap();
        assert_eq!(chords.len(), 1, "{keys} -> {chords:?}");
        chords.into_iter().next().unwrap()
    }

    #[test]
    fn ctrl_a() {
        assert_eq!(single("ctrl+a"), Chord::new(vec![VK_CONTROL], Key::Vk(0x41)));
    }

    #[test]
    fn bare_named_key() {
        assert_eq!(single("Enter"), Chord::new(vec![], Key::Vk(VK_RETURN)));
        assert_eq!(single("esc"), Chord::new(vec![], Key::Vk(VK_ESCAPE)));
    }

    #[test]
    fn alt_f4_both_notations() {
        let human = single("alt+f4");
        assert_eq!(human, Chord::new(vec![VK_MENU], Key::Vk(VK_F1 + 3)));
        assert_eq!(single("%{F4}"), human);
    }

    #[test]
    fn stacked_modifiers() {
        assert_eq!(
            single("ctrl+shift+esc"),
            Chord::new(vec![VK_CONTROL, VK_SHIFT], Key::Vk(VK_ESCAPE))
        );
    }

    #[test]
    fn brace_names_and_aliases() {
        assert_eq!(single("{ENTER}"), Chord::new(vec![], Key::Vk(VK_RETURN)));
        assert_eq!(single("{PGDN}"), Chord::new(vec![], Key::Vk(VK_NEXT)));
        assert_eq!(single("{BS}"), Chord::new(vec![], Key::Vk(VK_BACK)));
        assert_eq!(single("^a"), Chord::new(vec![VK_CONTROL], Key::Vk(0x41)));
    }

    #[test]
    fn mixed_notation_binds_modifier_to_first_key() {
        let chords = parse("ctrl+a{DELETE}").unwrap();
        assert_eq!(
            chords,
            vec![
                Chord::new(vec![VK_CONTROL], Key::Vk(0x41)),
                Chord::new(vec![], Key::Vk(VK_DELETE)),
            ]
        );
    }

    #[test]
    fn repeat_count_and_literal_text() {
        let chords = parse("{TAB 3}").unwrap();
        assert_eq!(chords.len(), 3);
        let text = parse("Hi{ENTER}").unwrap();
        assert_eq!(text[0].key, Some(Key::Char('H')));
        assert_eq!(text[1].key, Some(Key::Char('i')));
        assert_eq!(text[2].key, Some(Key::Vk(VK_RETURN)));
    }

    #[test]
    fn unknown_key_is_reported() {
        let err = parse("ctrl+frobnicate").unwrap_err();
        assert_eq!(err.to_string(), "unknown key 'frobnicate'");
        assert!(parse("{NOPE}").is_err());
    }

    #[test]
    fn extended_keys() {
        assert!(is_extended_key(VK_DELETE));
        assert!(!is_extended_key(VK_RETURN));
        assert!(is_modifier(VK_LWIN));
    }
}
