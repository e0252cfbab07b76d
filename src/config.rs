// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Explicit configuration handed to constructors. Nothing here is global.

use std::env;
use std::time::Duration;

use crate::error::{Error, Result};

pub const ENV_API_KEY: &str = "WINACTIONS_API_KEY";
pub const ENV_API_KEY_FALLBACK: &str = "ANTHROPIC_API_KEY";
pub const ENV_BASE_URL: &str = "WINACTIONS_BASE_URL";
pub const ENV_BASE_URL_FALLBACK: &str = "ANTHROPIC_BASE_URL";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

// ── Action execution ────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClickApi {
    /// Real mouse input at the control centre.
    #[default]
    ClickInput,
    /// UIA InvokePattern.
    Invoke,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputTextApi {
    /// Character-by-character keyboard injection.
    #[default]
    TypeKeys,
    /// UIA ValuePattern.SetValue, falling back to typing.
    SetText,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionConfig {
    pub click_api: ClickApi,
    pub after_click_wait: Duration,
    pub input_text_api: InputTextApi,
    pub input_text_enter: bool,
    pub input_text_inter_key_pause: Duration,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            click_api: ClickApi::ClickInput,
            after_click_wait: Duration::ZERO,
            input_text_api: InputTextApi::TypeKeys,
            input_text_enter: false,
            input_text_inter_key_pause: Duration::from_millis(50),
        }
    }
}

impl ActionConfig {
    /// Defaults overridden by `WINCTL_*` variables. Malformed values are
    /// rejected rather than silently ignored.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Ok(v) = env::var("WINCTL_CLICK_API") {
            cfg.click_api = match v.as_str() {
                "click_input" => ClickApi::ClickInput,
                "click" | "invoke" => ClickApi::Invoke,
                other => return Err(Error::invalid("WINCTL_CLICK_API", other)),
            };
        }
        if let Ok(v) = env::var("WINCTL_AFTER_CLICK_WAIT") {
            cfg.after_click_wait = seconds("WINCTL_AFTER_CLICK_WAIT", &v)?;
        }
        if let Ok(v) = env::var("WINCTL_INPUT_TEXT_API") {
            cfg.input_text_api = match v.as_str() {
                "type_keys" => InputTextApi::TypeKeys,
                "set_text" => InputTextApi::SetText,
                other => return Err(Error::invalid("WINCTL_INPUT_TEXT_API", other)),
            };
        }
        if let Ok(v) = env::var("WINCTL_INPUT_TEXT_ENTER") {
            cfg.input_text_enter = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = env::var("WINCTL_INPUT_PAUSE") {
            cfg.input_text_inter_key_pause = seconds("WINCTL_INPUT_PAUSE", &v)?;
        }
        Ok(cfg)
    }
}

fn seconds(name: &str, raw: &str) -> Result<Duration> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::invalid(name, format!("'{raw}' is not a number")))?;
    Duration::try_from_secs_f64(secs).map_err(|e| Error::invalid(name, e.to_string()))
}

// ── Perception providers ────────────────────────────

/// Which optional perception sources to stack on top of the UIA tree, and
/// the credentials they need.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderConfig {
    pub vision: bool,
    pub infer: bool,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl ProviderConfig {
    pub fn with_flags(&self, vision: bool, infer: bool) -> Self {
        Self {
            vision,
            infer,
            ..self.clone()
        }
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| non_empty_env(ENV_API_KEY))
            .or_else(|| non_empty_env(ENV_API_KEY_FALLBACK))
    }

    pub fn resolve_base_url(&self) -> String {
        self.base_url
            .clone()
            .or_else(|| non_empty_env(ENV_BASE_URL))
            .or_else(|| non_empty_env(ENV_BASE_URL_FALLBACK))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    /// Key for a provider enabled by `flag` (`--vision` / `--infer`).
    pub fn require_api_key(&self, flag: &str) -> Result<String> {
        self.resolve_api_key().ok_or_else(|| {
            Error::Config(format!(
                "Vision API key required for {flag}. Set {ENV_API_KEY} or \
                 {ENV_API_KEY_FALLBACK} environment variable, or pass --vision-api-key."
            ))
        })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for k in [ENV_API_KEY, ENV_API_KEY_FALLBACK, ENV_BASE_URL, ENV_BASE_URL_FALLBACK] {
            env::remove_var(k);
        }
    }

    #[test]
    fn action_defaults() {
        let cfg = ActionConfig::default();
        assert_eq!(cfg.click_api, ClickApi::ClickInput);
        assert_eq!(cfg.after_click_wait, Duration::ZERO);
        assert_eq!(cfg.input_text_api, InputTextApi::TypeKeys);
        assert!(!cfg.input_text_enter);
        assert_eq!(cfg.input_text_inter_key_pause, Duration::from_millis(50));
    }

    #[test]
    #[serial]
    fn action_config_reads_env() {
        env::set_var("WINCTL_CLICK_API", "click");
        env::set_var("WINCTL_INPUT_PAUSE", "0.2");
        let cfg = ActionConfig::from_env().unwrap();
        env::remove_var("WINCTL_CLICK_API");
        env::remove_var("WINCTL_INPUT_PAUSE");
        assert_eq!(cfg.click_api, ClickApi::Invoke);
        assert_eq!(cfg.input_text_inter_key_pause, Duration::from_millis(200));
    }

    #[test]
    #[serial]
    fn action_config_rejects_garbage() {
        env::set_var("WINCTL_INPUT_TEXT_API", "telepathy");
        let err = ActionConfig::from_env().unwrap_err();
        env::remove_var("WINCTL_INPUT_TEXT_API");
        assert!(err.to_string().contains("telepathy"));
    }

    #[test]
    #[serial]
    fn api_key_precedence() {
        clear_env();
        env::set_var(ENV_API_KEY_FALLBACK, "fallback");
        let cfg = ProviderConfig::default();
        assert_eq!(cfg.resolve_api_key().as_deref(), Some("fallback"));
        env::set_var(ENV_API_KEY, "primary");
        assert_eq!(cfg.resolve_api_key().as_deref(), Some("primary"));
        let explicit = ProviderConfig {
            api_key: Some("explicit".into()),
            ..Default::default()
        };
        assert_eq!(explicit.resolve_api_key().as_deref(), Some("explicit"));
        clear_env();
    }

    #[test]
    #[serial]
    fn missing_key_names_the_flag() {
        clear_env();
        let err = ProviderConfig::default().require_api_key("--infer").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Vision API key required for --infer. Set WINACTIONS_API_KEY or \
             ANTHROPIC_API_KEY environment variable, or pass --vision-api-key."
        );
    }

    #[test]
    #[serial]
    fn base_url_defaults_to_anthropic() {
        clear_env();
        assert_eq!(ProviderConfig::default().resolve_base_url(), DEFAULT_BASE_URL);
    }
}
