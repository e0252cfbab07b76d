// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Daemon wire format and session bookkeeping.
//!
//! One JSON object per line in each direction, one request per connection.
//! A session name fixes both the TCP port and the PID file path.

use std::fs;
use std::io::{BufRead, Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};

/// Longest accepted line, newline excluded.
pub const MAX_LINE: usize = 1 << 20;
pub const PORT_MIN: u16 = 49152;
const PORT_SPAN: u32 = 65535 - PORT_MIN as u32 + 1;

pub const PING: &str = "_ping";
pub const SHUTDOWN: &str = "_shutdown";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Flags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub return_state: bool,
    /// `None` means "whatever the daemon started with".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infer: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default)]
    pub flags: Flags,
}

impl Request {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set on handler failures, naming the command that failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl Response {
    pub fn ok(result: impl Into<Value>) -> Self {
        Self {
            status: Status::Ok,
            result: Some(result.into()),
            error: None,
            command: None,
            state: None,
            state_error: None,
            session: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            result: None,
            error: Some(message.into()),
            command: None,
            state: None,
            state_error: None,
            session: None,
        }
    }

    pub fn with_command(mut self, command: &str) -> Self {
        self.command = Some(command.to_string());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

impl From<Error> for Response {
    fn from(e: Error) -> Self {
        Response::error(e.to_string())
    }
}

/// Read one newline-terminated JSON message. `Ok(None)` on a clean EOF.
pub fn read_message<T: DeserializeOwned>(reader: &mut impl BufRead) -> Result<Option<T>> {
    let mut buf = Vec::new();
    reader.take(MAX_LINE as u64 + 1).read_until(b'\n', &mut buf)?;
    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > MAX_LINE {
        return Err(Error::MessageTooLarge(MAX_LINE));
    }
    if buf.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(&buf)?))
}

pub fn write_message<T: Serialize>(writer: &mut impl Write, message: &T) -> Result<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()?;
    Ok(())
}

/// Deterministic port in 49152..=65535 from the SHA-256 of `name`.
pub fn session_port(name: &str) -> u16 {
    let digest = Sha256::digest(name.as_bytes());
    // The span is 2^14, so the low 16 bits of the digest decide it.
    let low = u32::from(u16::from_be_bytes([digest[30], digest[31]]));
    (u32::from(PORT_MIN) + low % PORT_SPAN) as u16
}

/// Contents of a session PID file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidInfo {
    pub pid: u32,
    pub port: u16,
    pub session_name: String,
}

/// PID files of every session live in one directory, by default the
/// system temp dir.
#[derive(Debug, Clone)]
pub struct PidDir {
    dir: PathBuf,
}

impl Default for PidDir {
    fn default() -> Self {
        Self { dir: std::env::temp_dir() }
    }
}

impl PidDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("winctl_{name}.pid"))
    }

    pub fn write(&self, name: &str, port: u16) -> Result<PathBuf> {
        let path = self.path(name);
        let info = PidInfo {
            pid: std::process::id(),
            port,
            session_name: name.to_string(),
        };
        fs::write(&path, serde_json::to_vec(&info)?)?;
        debug!(path = %path.display(), port, "pid file written");
        Ok(path)
    }

    /// `None` when missing or unreadable.
    pub fn read(&self, name: &str) -> Option<PidInfo> {
        let raw = fs::read(self.path(name)).ok()?;
        serde_json::from_slice(&raw).ok()
    }

    /// Best effort.
    pub fn remove(&self, name: &str) {
        let _ = fs::remove_file(self.path(name));
    }
}
