// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

fn filter(debug: bool) -> EnvFilter {
    // Without --debug we pin `info` so a stray RUST_LOG in the user's
    // environment does not flood the console.
    if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::new("info")
    }
}

/// Console logging for the short-lived client. Everything goes to stderr so
/// stdout stays clean for command output.
pub fn init(debug: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(debug))
        .with_writer(std::io::stderr)
        .try_init();
}

/// Daemon logging: stderr plus a daily-rolling file named after the session.
/// Keep the returned guard alive for as long as the daemon runs, dropping it
/// flushes the file writer.
pub fn init_daemon(debug: bool, dir: &Path, session_name: &str) -> Option<WorkerGuard> {
    let appender = tracing_appender::rolling::daily(dir, format!("winctl_{session_name}.log"));
    let (file, guard) = tracing_appender::non_blocking(appender);
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter(debug))
        .with_ansi(false)
        .with_writer(std::io::stderr.and(file))
        .try_init()
        .is_ok();
    installed.then_some(guard)
}
