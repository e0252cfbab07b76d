// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session daemon accept loop.
//!
//! Single-threaded: accept, read one request line, dispatch, write one
//! response line, close. The listener is non-blocking and polled so a
//! `_shutdown` (or the shared stop flag) ends the loop promptly.

use std::io::{BufReader, ErrorKind};
use std::net::{TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::protocol::{read_message, write_message, PidDir, Request, Response, PING, SHUTDOWN};

const ACCEPT_POLL: Duration = Duration::from_millis(100);
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Server {
    listener: TcpListener,
    port: u16,
    session_name: String,
    pids: PidDir,
    running: Arc<AtomicBool>,
}

impl Server {
    /// Bind `127.0.0.1:port` (0 picks a free port) and record the PID file.
    /// A port already taken by another daemon fails here.
    pub fn bind(port: u16, session_name: &str, pids: PidDir) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        pids.write(session_name, port)?;
        Ok(Self {
            listener,
            port,
            session_name: session_name.to_string(),
            pids,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Clearing the flag stops the loop within one poll interval.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Serve until `_shutdown`. The PID file is removed on the way out.
    pub fn serve(self, dispatcher: &mut Dispatcher) -> Result<()> {
        info!(
            session = %self.session_name,
            port = self.port,
            pid = std::process::id(),
            "session daemon listening"
        );
        let outcome = self.accept_loop(dispatcher);
        self.pids.remove(&self.session_name);
        info!(session = %self.session_name, "session daemon shut down");
        outcome
    }

    fn accept_loop(&self, dispatcher: &mut Dispatcher) -> Result<()> {
        while self.running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "connection");
                    if let Err(e) = self.handle_connection(stream, dispatcher) {
                        warn!(error = %e, "connection failed");
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream, dispatcher: &mut Dispatcher) -> Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(CONNECTION_TIMEOUT))?;
        stream.set_write_timeout(Some(CONNECTION_TIMEOUT))?;
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut writer = stream;

        let request: Request = match read_message(&mut reader) {
            Ok(Some(r)) => r,
            Ok(None) => return Ok(()),
            Err(Error::Json(e)) => {
                return write_message(&mut writer, &Response::error(format!("Invalid JSON: {e}")));
            }
            Err(e @ Error::MessageTooLarge(_)) => return write_message(&mut writer, &Response::from(e)),
            Err(e) => return Err(e),
        };

        let mut response = guarded(&request.command, || dispatcher.handle(&request));
        match request.command.as_str() {
            PING => response.session = Some(self.session_name.clone()),
            SHUTDOWN => {
                info!("shutdown requested");
                self.running.store(false, Ordering::SeqCst);
            }
            _ => {}
        }
        write_message(&mut writer, &response)
    }
}

/// Run a handler, turning a panic into an error response so one bad
/// request cannot take the daemon down.
fn guarded(command: &str, handler: impl FnOnce() -> Response) -> Response {
    match panic::catch_unwind(AssertUnwindSafe(handler)) {
        Ok(response) => response,
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(command, panic = %detail, "handler panicked");
            Response::error(format!("Internal error: {detail}")).with_command(command)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panicking_handlers_become_error_responses() {
        let r = guarded("state", || panic!("attempt to add with overflow"));
        assert!(!r.is_ok());
        assert_eq!(r.error.as_deref(), Some("Internal error: attempt to add with overflow"));
        assert_eq!(r.command.as_deref(), Some("state"));

        let r = guarded("windows", || Response::ok("fine"));
        assert!(r.is_ok());
    }
}
