// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Turning responses into terminal output.

use serde_json::{json, Map, Value};

use crate::protocol::Response;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

impl OutputMode {
    pub fn from_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Text
        }
    }
}

/// What to print for a response: stdout text, or the stderr error line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Stdout(String),
    Stderr(String),
}

pub fn render(command: &str, response: &Response, mode: OutputMode) -> Rendered {
    if !response.is_ok() {
        let msg = response.error.as_deref().unwrap_or("unknown error");
        return Rendered::Stderr(render_error(msg, mode));
    }

    let result = response.result.clone().unwrap_or(Value::Null);
    let mut out = match mode {
        OutputMode::Json => pretty(&json_result(result)),
        OutputMode::Text => text_result(command, &result),
    };

    if let Some(state) = &response.state {
        out.push('\n');
        out.push_str(&match mode {
            OutputMode::Json => pretty(state),
            OutputMode::Text => state_text(state),
        });
    }
    if let Some(err) = &response.state_error {
        out.push('\n');
        out.push_str(&match mode {
            OutputMode::Json => pretty(&json!({ "state_error": err })),
            OutputMode::Text => format!("State unavailable: {err}"),
        });
    }
    Rendered::Stdout(out)
}

pub fn render_error(message: &str, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => pretty(&json!({ "error": message })),
        OutputMode::Text => format!("Error: {message}"),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Strings that are themselves JSON are passed through; others are wrapped.
fn json_result(result: Value) -> Value {
    match result {
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(v @ (Value::Object(_) | Value::Array(_))) => v,
            _ => json!({ "message": s }),
        },
        other => other,
    }
}

fn text_result(command: &str, result: &Value) -> String {
    match result {
        Value::Array(items) if command == "windows" => items.iter().map(window_line).collect::<Vec<_>>().join("\n"),
        Value::Array(items) => items.iter().map(scalar).collect::<Vec<_>>().join("\n"),
        Value::Object(map) if is_state(map) => state_text(result),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{k}: {}", scalar(v)))
            .collect::<Vec<_>>()
            .join("\n"),
        other => scalar(other),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn window_line(w: &Value) -> String {
    format!(
        "[{}] {} ({})",
        scalar(&w["id"]),
        scalar(&w["title"]),
        scalar(&w["process"])
    )
}

fn is_state(map: &Map<String, Value>) -> bool {
    map.contains_key("targets") && map.contains_key("window")
}

/// Text view of a state object as sent over the wire. The sender already
/// decided which targets carry a rect.
pub fn state_text(state: &Value) -> String {
    let mut lines = vec![format!(
        "Window: \"{}\" ({})",
        scalar(&state["window"]),
        scalar(&state["process"])
    )];
    if let Some(targets) = state["targets"].as_array() {
        for t in targets {
            let mut line = format!(
                "[{}] [{}] \"{}\"",
                scalar(&t["id"]),
                scalar(&t["type"]),
                scalar(&t["name"])
            );
            if let Some(rect) = t.get("rect").and_then(Value::as_array) {
                let parts: Vec<String> = rect.iter().map(scalar).collect();
                line.push_str(&format!(" rect=[{}]", parts.join(", ")));
            }
            lines.push(line);
        }
    }
    for key in ["screenshot", "annotated_screenshot"] {
        if let Some(path) = state.get(key).and_then(Value::as_str) {
            lines.push(format!("{key}: {path}"));
        }
    }
    lines.join("\n")
}
