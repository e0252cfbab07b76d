// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Perceive a desktop window as a numbered list of targets and act on them
//! by number. A named session keeps that list alive in a background daemon
//! so that many short CLI invocations share one view of the UI.

pub mod cli;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod format;
pub mod keys;
pub mod logging;
pub mod perception;
pub mod platform;
pub mod protocol;
pub mod server;
pub mod session;
pub mod targets;

pub use error::{Error, Result};
