// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error taxonomy shared by the library. Every variant renders as the
//! one-line message that ends up in a wire response.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    // ── Configuration ───────────────────────────────
    #[error("{0}")]
    Config(String),

    // ── Resolution ──────────────────────────────────
    #[error("No window focused. Use 'winctl focus <window>' or 'winctl windows' first.")]
    NoWindow,
    #[error("No state available. Run 'winctl state' first.")]
    NoState,
    #[error("Target {0} not found in state.")]
    TargetNotFound(String),
    #[error(
        "Target {0} is a vision-only element with no bounding rect; cannot use coordinate fallback."
    )]
    NoGeometry(String),
    #[error("Control {0} not found")]
    ControlNotFound(String),
    #[error("No window matching \"{0}\" found")]
    WindowNotFound(String),
    #[error("invalid value for '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },
    #[error("unknown key '{0}'")]
    UnknownKey(String),
    #[error("action '{0}' needs a target control")]
    NeedsTarget(&'static str),

    // ── Backends ────────────────────────────────────
    #[error("{0}")]
    Platform(String),
    #[error("{0}")]
    Provider(String),

    // ── Transport ───────────────────────────────────
    #[error("No response from daemon")]
    NoResponse,
    #[error("Daemon response timeout")]
    Timeout,
    #[error("Daemon connection refused")]
    Refused,
    #[error("Invalid response JSON: {0}")]
    InvalidResponse(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("message exceeds {0} bytes")]
    MessageTooLarge(usize),
    #[error("{0}")]
    Spawn(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Platform(format!("image: {e}"))
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for Error {
    fn from(e: windows::core::Error) -> Self {
        Error::Platform(e.to_string())
    }
}
