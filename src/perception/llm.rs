// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Anthropic Messages API client and the parsing of model element lists.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};

const API_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn png_base64(data: String) -> Self {
        ContentBlock::Image {
            source: ImageSource {
                kind: "base64".to_string(),
                media_type: "image/png".to_string(),
                data,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub media_type: String,
    pub data: String,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [Message; 1],
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ResponseBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

/// A single-turn model call. Returns the concatenated text blocks.
pub trait ModelClient {
    fn complete(&self, content: Vec<ContentBlock>) -> Result<String>;
}

pub struct MessagesClient {
    http: Client,
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
}

impl MessagesClient {
    pub fn new(api_key: String, base_url: String, model: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Provider(format!("http client: {e}")))?;
        Ok(Self {
            http,
            api_key,
            endpoint: format!("{}/v1/messages", base_url.trim_end_matches('/')),
            model: model.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl ModelClient for MessagesClient {
    fn complete(&self, content: Vec<ContentBlock>) -> Result<String> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: [Message { role: "user", content }],
        };
        debug!(model = %self.model, endpoint = %self.endpoint, "calling model");
        let resp = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .map_err(|e| Error::Provider(format!("model request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(Error::Provider(format!("model returned HTTP {status}: {text}")));
        }
        let parsed: MessagesResponse = resp
            .json()
            .map_err(|e| Error::Provider(format!("model response: {e}")))?;
        Ok(parsed
            .content
            .into_iter()
            .filter_map(|b| match b {
                ResponseBlock::Text { text } => Some(text),
                ResponseBlock::Other => None,
            })
            .collect())
    }
}

/// One element as the model reports it. Every field is optional; callers
/// decide the defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawElement {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub element_type: Option<String>,
    #[serde(default)]
    pub rect: Option<Vec<f64>>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl RawElement {
    /// The rect, when it has exactly four numbers.
    pub fn rect4(&self) -> Option<[f64; 4]> {
        match self.rect.as_deref() {
            Some(&[l, t, r, b]) => Some([l, t, r, b]),
            _ => None,
        }
    }
}

/// Extract the element array from a model reply.
///
/// Code fences are dropped and the outermost balanced `[...]` is parsed, so
/// prose around the array is tolerated. Anything that is not a JSON array
/// yields no elements. Malformed entries are skipped individually.
pub fn parse_elements(reply: &str) -> Vec<RawElement> {
    let mut text = reply.trim().to_string();
    if text.starts_with("```") {
        text = text
            .lines()
            .filter(|l| !l.trim_start().starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n");
    }
    let slice = outermost_array(&text).unwrap_or(&text);

    match serde_json::from_str::<Value>(slice) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match serde_json::from_value::<RawElement>(v) {
                Ok(e) => Some(e),
                Err(e) => {
                    debug!(error = %e, "skipping malformed element");
                    None
                }
            })
            .collect(),
        Ok(other) => {
            warn!(kind = json_kind(&other), "model returned a non-array");
            Vec::new()
        }
        Err(e) => {
            warn!(error = %e, "failed to parse model response");
            debug!(raw = %slice.chars().take(500).collect::<String>(), "raw response");
            Vec::new()
        }
    }
}

fn outermost_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let mut depth = 0usize;
    for (i, c) in text[start..].char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Canned replies, recording what was asked.
    pub(crate) struct Scripted {
        pub reply: Result<String>,
        pub seen: RefCell<Vec<Vec<ContentBlock>>>,
    }

    impl Scripted {
        pub fn ok(reply: &str) -> Self {
            Self { reply: Ok(reply.to_string()), seen: RefCell::new(Vec::new()) }
        }

        pub fn failing() -> Self {
            Self {
                reply: Err(Error::Provider("HTTP 529 overloaded".into())),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl ModelClient for Scripted {
        fn complete(&self, content: Vec<ContentBlock>) -> Result<String> {
            self.seen.borrow_mut().push(content);
            match &self.reply {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(Error::Provider(e.to_string())),
            }
        }
    }

    #[test]
    fn plain_array() {
        let els = parse_elements(r#"[{"name":"grip","type":"ResizeHandle","rect":[1,2,3,4]}]"#);
        assert_eq!(els.len(), 1);
        assert_eq!(els[0].name.as_deref(), Some("grip"));
        assert_eq!(els[0].rect4(), Some([1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn fenced_with_trailing_prose() {
        let reply = "```json\n[{\"name\":\"a\",\"rect\":[0,0,1,1]}]\n```\nThose are all [sic].";
        let els = parse_elements(reply);
        assert_eq!(els.len(), 1);
        assert_eq!(els[0].element_type, None);
    }

    #[test]
    fn nested_brackets_are_balanced() {
        let els = parse_elements("Here: [{\"rect\":[1,2,3,4]},{\"rect\":[5,6,7,8]}] done");
        assert_eq!(els.len(), 2);
        assert_eq!(els[1].rect4(), Some([5.0, 6.0, 7.0, 8.0]));
    }

    #[test]
    fn non_array_yields_nothing() {
        assert!(parse_elements(r#"{"name":"x"}"#).is_empty());
        assert!(parse_elements("no elements found").is_empty());
        assert!(parse_elements("[1, 2").is_empty());
        assert!(parse_elements("[]").is_empty());
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let els = parse_elements(r#"[{"name":"ok"}, {"rect":"nope"}, 7]"#);
        assert_eq!(els.len(), 1);
        assert_eq!(els[0].name.as_deref(), Some("ok"));
    }

    #[test]
    fn short_rect_is_ignored() {
        let els = parse_elements(r#"[{"rect":[1,2,3]}]"#);
        assert_eq!(els[0].rect4(), None);
    }

    #[test]
    fn content_blocks_serialize_in_api_shape() {
        let v = serde_json::to_value(ContentBlock::png_base64("QUJD".into())).unwrap();
        assert_eq!(v["type"], "image");
        assert_eq!(v["source"]["type"], "base64");
        assert_eq!(v["source"]["media_type"], "image/png");
        let v = serde_json::to_value(ContentBlock::text("hi")).unwrap();
        assert_eq!(v, serde_json::json!({"type": "text", "text": "hi"}));
    }

    #[test]
    fn response_ignores_non_text_blocks() {
        let raw = r#"{"content":[{"type":"thinking","thinking":"..."},{"type":"text","text":"[]"}]}"#;
        let parsed: MessagesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.content.len(), 2);
        assert!(matches!(parsed.content[1], ResponseBlock::Text { .. }));
    }
}
