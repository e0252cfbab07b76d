// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Client side of a named session: talk to its daemon, check whether it is
//! alive, and start it when it is not.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{read_message, session_port, write_message, PidDir, Request, Response, PING, SHUTDOWN};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const PING_TIMEOUT: Duration = Duration::from_secs(2);
const SPAWN_POLL: Duration = Duration::from_millis(300);
const SPAWN_DEADLINE: Duration = Duration::from_secs(10);

/// Send one request and wait for its response. Transport failures come
/// back as error responses, never as `Err`.
pub fn send_command(port: u16, request: &Request, timeout: Duration) -> Response {
    match exchange(port, request, timeout) {
        Ok(r) => r,
        Err(e) => {
            debug!(port, error = %e, "exchange failed");
            Response::from(e)
        }
    }
}

fn exchange(port: u16, request: &Request, timeout: Duration) -> Result<Response> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let mut stream = TcpStream::connect_timeout(&addr, timeout).map_err(transport)?;
    stream.set_read_timeout(Some(timeout)).map_err(transport)?;
    stream.set_write_timeout(Some(timeout)).map_err(transport)?;
    write_message(&mut stream, request).map_err(|e| match e {
        Error::Io(io) => transport(io),
        other => other,
    })?;
    let _ = stream.shutdown(Shutdown::Write);

    let mut reader = BufReader::new(stream);
    match read_message::<Response>(&mut reader) {
        Ok(Some(r)) => Ok(r),
        Ok(None) => Err(Error::NoResponse),
        Err(Error::Json(e)) => Err(Error::InvalidResponse(e.to_string())),
        Err(Error::Io(io)) => Err(transport(io)),
        Err(e) => Err(e),
    }
}

fn transport(e: std::io::Error) -> Error {
    match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => Error::Timeout,
        ErrorKind::ConnectionRefused => Error::Refused,
        _ => Error::Connection(e.to_string()),
    }
}

/// Outcome of a `_ping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ping {
    Alive,
    /// Another session's daemon owns the port.
    Collision,
    Unreachable,
}

/// `_ping` the daemon on `port`; `expected` guards against another session
/// answering on a colliding port.
pub fn ping(port: u16, expected: &str) -> Ping {
    let resp = send_command(port, &Request::new(PING), PING_TIMEOUT);
    if !resp.is_ok() {
        return Ping::Unreachable;
    }
    match resp.session.as_deref() {
        Some(name) if name != expected => {
            warn!(port, expected, found = name, "port collision with another session");
            Ping::Collision
        }
        _ => Ping::Alive,
    }
}

fn process_exists(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, ProcessRefreshKind::nothing());
    system.process(pid).is_some()
}

/// How the daemon should be started.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub vision: bool,
    pub infer: bool,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub session: String,
    pub alive: bool,
    pub pid: Option<u32>,
    pub port: Option<u16>,
}

/// One named session as seen from a client process.
#[derive(Debug, Clone)]
pub struct SessionClient {
    name: String,
    pids: PidDir,
    timeout: Duration,
}

impl SessionClient {
    pub fn new(name: &str) -> Self {
        Self::with_pid_dir(name, PidDir::default())
    }

    pub fn with_pid_dir(name: &str, pids: PidDir) -> Self {
        Self {
            name: name.to_string(),
            pids,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// PID file present, process running and `_ping` answered by this
    /// session. A stale PID file is removed; one whose port answers for a
    /// different session is left alone.
    pub fn is_alive(&self) -> bool {
        let Some(info) = self.pids.read(&self.name) else {
            return false;
        };
        if !process_exists(info.pid) {
            debug!(pid = info.pid, "daemon process gone");
            self.pids.remove(&self.name);
            return false;
        }
        match ping(info.port, &self.name) {
            Ping::Alive => true,
            Ping::Collision => false,
            Ping::Unreachable => {
                self.pids.remove(&self.name);
                false
            }
        }
    }

    pub fn status(&self) -> SessionStatus {
        let alive = self.is_alive();
        let info = if alive { self.pids.read(&self.name) } else { None };
        SessionStatus {
            session: self.name.clone(),
            alive,
            pid: info.as_ref().map(|i| i.pid),
            port: info.map(|i| i.port),
        }
    }

    /// Port of a running daemon, starting one first if needed.
    pub fn ensure_server(&self, options: &SpawnOptions) -> Result<u16> {
        if self.is_alive() {
            if let Some(info) = self.pids.read(&self.name) {
                return Ok(info.port);
            }
        }
        let port = session_port(&self.name);
        self.spawn(port, options)?;
        Ok(port)
    }

    fn spawn(&self, port: u16, options: &SpawnOptions) -> Result<()> {
        let exe = std::env::current_exe()?;
        let err_path = self.pids.dir().join(format!("winctl_{}.err", self.name));
        let err_file = File::create(&err_path)?;

        let mut cmd = Command::new(exe);
        cmd.arg("_serve")
            .arg("--session-name")
            .arg(&self.name)
            .arg("--port")
            .arg(port.to_string());
        if options.vision {
            cmd.arg("--vision");
        }
        if options.infer {
            cmd.arg("--infer");
        }
        if let Some(key) = &options.api_key {
            cmd.arg("--vision-api-key").arg(key);
        }
        if let Some(url) = &options.base_url {
            cmd.arg("--vision-base-url").arg(url);
        }
        cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(err_file);
        detach(&mut cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Spawn(format!("failed to start daemon: {e}")))?;
        info!(session = %self.name, port, pid = child.id(), "daemon starting");
        self.wait_ready(&mut child, port, err_path)
    }

    fn wait_ready(&self, child: &mut Child, port: u16, err_path: PathBuf) -> Result<()> {
        let deadline = Instant::now() + SPAWN_DEADLINE;
        while Instant::now() < deadline {
            thread::sleep(SPAWN_POLL);
            if ping(port, &self.name) == Ping::Alive {
                return Ok(());
            }
            if let Some(status) = child.try_wait()? {
                let mut stderr = String::new();
                if let Ok(mut f) = File::open(&err_path) {
                    let _ = f.read_to_string(&mut stderr);
                }
                return Err(Error::Spawn(format!(
                    "Daemon process exited with code {}: {}",
                    status.code().map_or_else(|| "?".to_string(), |c| c.to_string()),
                    stderr.trim()
                )));
            }
        }
        Err(Error::Spawn(format!(
            "Daemon for session '{}' did not become ready within {}s",
            self.name,
            SPAWN_DEADLINE.as_secs()
        )))
    }

    /// Send `request` to the daemon on `port`.
    pub fn send(&self, port: u16, request: &Request) -> Response {
        send_command(port, request, self.timeout)
    }

    /// Ask a running daemon to exit. `false` when none was running.
    pub fn stop(&self) -> Result<bool> {
        if !self.is_alive() {
            return Ok(false);
        }
        let Some(info) = self.pids.read(&self.name) else {
            return Ok(false);
        };
        let resp = send_command(info.port, &Request::new(SHUTDOWN), self.timeout);
        match resp.error {
            Some(e) if !resp.is_ok() => Err(Error::Connection(e)),
            _ => Ok(true),
        }
    }
}

/// Keep the daemon alive after this console process exits.
#[cfg(windows)]
fn detach(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP | DETACHED_PROCESS);
}

#[cfg(not(windows))]
fn detach(_cmd: &mut Command) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn refused_connections_become_error_responses() {
        // Bind then drop to find a port nobody listens on.
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let resp = send_command(port, &Request::new("windows"), Duration::from_secs(2));
        assert!(!resp.is_ok());
        assert_eq!(resp.error.as_deref(), Some("Daemon connection refused"));
    }

    #[test]
    fn silent_peer_is_no_response() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            let mut sink = Vec::new();
            let _ = s.read_to_end(&mut sink);
        });
        let resp = send_command(port, &Request::new("windows"), Duration::from_secs(5));
        assert_eq!(resp.error.as_deref(), Some("No response from daemon"));
        server.join().unwrap();
    }

    #[test]
    fn garbage_reply_is_invalid_json() {
        use std::io::{BufRead, Write};
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (s, _) = listener.accept().unwrap();
            let mut line = String::new();
            BufReader::new(s.try_clone().unwrap()).read_line(&mut line).unwrap();
            (&s).write_all(b"not json\n").unwrap();
        });
        let resp = send_command(port, &Request::new("windows"), Duration::from_secs(5));
        assert!(resp.error.unwrap().starts_with("Invalid response JSON: "));
        server.join().unwrap();
    }

    #[test]
    fn missing_pid_file_is_not_alive() {
        let dir = tempfile::tempdir().unwrap();
        let client = SessionClient::with_pid_dir("ghost", PidDir::new(dir.path()));
        assert!(!client.is_alive());
        let status = client.status();
        assert!(!status.alive);
        assert_eq!(status.pid, None);
        assert!(!client.stop().unwrap());
    }

    #[test]
    fn stale_pid_file_is_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let pids = PidDir::new(dir.path());
        // Our own pid is alive, but nothing answers on the port.
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        pids.write("stale", port).unwrap();
        let client = SessionClient::with_pid_dir("stale", pids.clone());
        assert!(!client.is_alive());
        assert!(pids.read("stale").is_none());
    }
}
