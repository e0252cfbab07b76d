// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! A session daemon on loopback, backed by the in-memory desktop.

use std::rc::Rc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::json;
use winctl::client::{send_command, SessionClient};
use winctl::config::{ActionConfig, ProviderConfig};
use winctl::dispatch::{Dispatcher, Timing};
use winctl::platform::memory::{MemoryControl, MemoryDesktop};
use winctl::protocol::{PidDir, Request};
use winctl::server::Server;
use winctl::session::DesktopSession;
use winctl::targets::Rect;

const TIMEOUT: Duration = Duration::from_secs(10);

fn dispatcher() -> Dispatcher {
    let desktop = Rc::new(MemoryDesktop::new());
    let h = desktop.add_window(
        "Untitled - Notepad",
        "notepad.exe",
        Rect::new(0, 0, 800, 600),
        vec![
            MemoryControl::new("Edit", "Text Editor").with_rect(0, 30, 800, 580).with_value(""),
            MemoryControl::new("Button", "Save").with_rect(10, 10, 30, 30),
        ],
    );
    desktop.set_foreground(Some(h));
    let actions = ActionConfig {
        input_text_inter_key_pause: Duration::ZERO,
        ..Default::default()
    };
    let session = DesktopSession::new(desktop, ProviderConfig::default(), actions)
        .unwrap()
        .with_launch_settle(Duration::ZERO);
    Dispatcher::new(session).with_timing(Timing {
        settle: Duration::ZERO,
        select_pause: Duration::ZERO,
        poll: Duration::from_millis(1),
    })
}

fn start(name: &str, pids: &PidDir) -> (u16, JoinHandle<()>) {
    let server = Server::bind(0, name, pids.clone()).unwrap();
    let port = server.port();
    let handle = thread::spawn(move || {
        let mut d = dispatcher();
        server.serve(&mut d).unwrap();
    });
    (port, handle)
}

#[test]
fn ping_reports_the_session_and_shutdown_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let pids = PidDir::new(dir.path());
    let (port, handle) = start("alpha", &pids);

    let info = pids.read("alpha").unwrap();
    assert_eq!(info.port, port);
    assert_eq!(info.pid, std::process::id());

    for _ in 0..2 {
        let pong = send_command(port, &Request::new("_ping"), TIMEOUT);
        assert!(pong.is_ok());
        assert_eq!(pong.result, Some(json!("pong")));
        assert_eq!(pong.session.as_deref(), Some("alpha"));
    }

    let bye = send_command(port, &Request::new("_shutdown"), TIMEOUT);
    assert_eq!(bye.result, Some(json!("shutdown")));
    handle.join().unwrap();
    assert!(pids.read("alpha").is_none());
}

#[test]
fn state_then_act_over_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let pids = PidDir::new(dir.path());
    let (port, handle) = start("beta", &pids);

    let state = send_command(port, &Request::new("state"), TIMEOUT);
    assert!(state.is_ok(), "{:?}", state.error);
    let result = state.result.unwrap();
    assert_eq!(result["window"], "Untitled - Notepad");
    assert_eq!(result["targets"][1]["name"], "Save");

    let click = send_command(port, &Request::new("click").arg("index", "2"), TIMEOUT);
    assert!(click.is_ok(), "{:?}", click.error);
    assert!(click.result.unwrap().as_str().unwrap().contains("button=left"));

    let text = send_command(port, &Request::new("get text").arg("index", "2"), TIMEOUT);
    assert_eq!(text.result, Some(json!(["Save"])));

    let missing = send_command(port, &Request::new("click").arg("index", "42"), TIMEOUT);
    assert!(!missing.is_ok());
    assert_eq!(missing.command.as_deref(), Some("click"));

    let unknown = send_command(port, &Request::new("bogus"), TIMEOUT);
    assert_eq!(unknown.error.as_deref(), Some("Unknown command: bogus"));

    send_command(port, &Request::new("_shutdown"), TIMEOUT);
    handle.join().unwrap();
}

#[test]
fn client_sees_a_running_session() {
    let dir = tempfile::tempdir().unwrap();
    let pids = PidDir::new(dir.path());
    let (port, handle) = start("gamma", &pids);

    let client = SessionClient::with_pid_dir("gamma", pids.clone());
    assert!(client.is_alive());
    let status = client.status();
    assert!(status.alive);
    assert_eq!(status.port, Some(port));
    assert_eq!(status.pid, Some(std::process::id()));

    assert!(client.stop().unwrap());
    handle.join().unwrap();
    assert!(!client.is_alive());
    assert!(pids.read("gamma").is_none());
}

#[test]
fn a_port_owned_by_another_session_is_not_ours() {
    let dir = tempfile::tempdir().unwrap();
    let pids = PidDir::new(dir.path());
    let (port, handle) = start("delta", &pids);

    // A PID file for "epsilon" pointing at delta's daemon.
    pids.write("epsilon", port).unwrap();
    let client = SessionClient::with_pid_dir("epsilon", pids.clone());
    assert!(!client.is_alive());
    assert!(pids.read("epsilon").is_some());

    send_command(port, &Request::new("_shutdown"), TIMEOUT);
    handle.join().unwrap();
}

#[test]
fn malformed_requests_get_an_error_line() {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpStream;

    let dir = tempfile::tempdir().unwrap();
    let pids = PidDir::new(dir.path());
    let (port, handle) = start("zeta", &pids);

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.write_all(b"{not json\n").unwrap();
    let mut line = String::new();
    BufReader::new(&stream).read_line(&mut line).unwrap();
    let v: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(v["status"], "error");
    assert!(v["error"].as_str().unwrap().starts_with("Invalid JSON: "));

    send_command(port, &Request::new("_shutdown"), TIMEOUT);
    handle.join().unwrap();
}
