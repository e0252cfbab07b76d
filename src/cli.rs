// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Command line front end.
//!
//! Without `--session` every invocation builds a one-shot session and runs
//! the command in-process. With `--session NAME` the request is forwarded to
//! that session's daemon, which is started on first use.

use std::io::Write;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::client::{SessionClient, SpawnOptions};
use crate::config::{ActionConfig, ProviderConfig};
use crate::dispatch::Dispatcher;
use crate::format::{render, render_error, OutputMode, Rendered};
use crate::logging;
use crate::platform;
use crate::protocol::{Flags, PidDir, Request, Response};
use crate::server::Server;
use crate::session::DesktopSession;

const DEFAULT_SESSION: &str = "default";

#[derive(Debug, Parser)]
#[command(name = "winctl", version, about = "Index-addressed Windows UI automation")]
pub struct Cli {
    /// Print results as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    /// Route the command through a named background session.
    #[arg(long, global = true, value_name = "NAME")]
    pub session: Option<String>,

    /// Focus a window (index, title or process substring) before running.
    #[arg(long, global = true, value_name = "WINDOW")]
    pub window: Option<String>,

    /// Re-read the UI after an action and print the new state.
    #[arg(long = "return-state", global = true)]
    pub return_state: bool,

    /// Add screenshot-based detection.
    #[arg(long, global = true)]
    pub vision: bool,

    /// Add model-inferred elements on top of the accessibility tree.
    #[arg(long, global = true)]
    pub infer: bool,

    #[arg(long = "vision-api-key", global = true, value_name = "KEY")]
    pub vision_api_key: Option<String>,

    #[arg(long = "vision-base-url", global = true, value_name = "URL")]
    pub vision_base_url: Option<String>,

    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Perceive the focused window and list its targets.
    State {
        #[arg(long)]
        screenshot: bool,
        /// Print the raw control tree instead.
        #[arg(long)]
        tree: bool,
        #[arg(long)]
        verbose: bool,
    },
    /// List top-level windows.
    Windows,
    Inspect {
        index: String,
    },
    Screenshot {
        path: Option<String>,
    },
    Click {
        index: String,
        #[arg(long)]
        right: bool,
    },
    #[command(name = "dblclick")]
    DblClick {
        index: String,
    },
    #[command(name = "rightclick")]
    RightClick {
        index: String,
    },
    /// Replace the text of a control.
    Input {
        index: String,
        #[arg(allow_hyphen_values = true)]
        text: String,
    },
    /// Type into whatever has focus.
    Type {
        #[arg(allow_hyphen_values = true)]
        text: String,
    },
    /// Send a key chord such as `ctrl+s` or `{ENTER}`.
    Keys {
        keys: String,
        #[arg(long, value_name = "INDEX")]
        target: Option<String>,
    },
    Scroll {
        index: String,
        #[arg(default_value = "down")]
        direction: String,
        #[arg(default_value_t = 3)]
        amount: i32,
    },
    Select {
        index: String,
        value: String,
    },
    Drag {
        index: String,
        #[arg(allow_negative_numbers = true)]
        x2: i32,
        #[arg(allow_negative_numbers = true)]
        y2: i32,
        #[arg(long, default_value = "left")]
        button: String,
        #[arg(long, default_value_t = 1.0)]
        duration: f64,
    },
    #[command(name = "click-at")]
    ClickAt {
        #[arg(allow_negative_numbers = true)]
        x: i32,
        #[arg(allow_negative_numbers = true)]
        y: i32,
        #[arg(long, default_value = "left")]
        button: String,
    },
    #[command(name = "drag-at")]
    DragAt {
        #[arg(allow_negative_numbers = true)]
        x1: i32,
        #[arg(allow_negative_numbers = true)]
        y1: i32,
        #[arg(allow_negative_numbers = true)]
        x2: i32,
        #[arg(allow_negative_numbers = true)]
        y2: i32,
        #[arg(long, default_value = "left")]
        button: String,
        #[arg(long, default_value_t = 1.0)]
        duration: f64,
    },
    Focus {
        #[arg(value_name = "WINDOW")]
        identifier: String,
    },
    Launch {
        app: String,
    },
    Close,
    /// Read a property of a control.
    Get {
        #[command(subcommand)]
        what: GetCommand,
    },
    /// Sleep, or wait for a control to become visible or enabled.
    Wait {
        seconds: Option<f64>,
        #[arg(long, value_name = "INDEX")]
        visible: Option<String>,
        #[arg(long, value_name = "INDEX")]
        enabled: Option<String>,
        #[arg(long, default_value_t = 10.0)]
        timeout: f64,
    },
    /// Manage background sessions.
    Session {
        #[command(subcommand)]
        action: SessionCommand,
    },
    #[command(name = "_serve", hide = true)]
    Serve {
        #[arg(long = "session-name")]
        session_name: String,
        #[arg(long)]
        port: u16,
    },
}

#[derive(Debug, Subcommand)]
pub enum GetCommand {
    Text { index: String },
    Rect { index: String },
    Value { index: String },
}

#[derive(Debug, Subcommand)]
pub enum SessionCommand {
    Start,
    Stop,
    Status,
}

impl Commands {
    /// Wire name and arguments. `None` for commands handled by the client.
    pub fn to_request(&self) -> Option<(String, Map<String, Value>)> {
        let (name, args) = match self {
            Commands::State { screenshot, tree, verbose } => (
                "state",
                json!({"screenshot": screenshot, "tree": tree, "verbose": verbose}),
            ),
            Commands::Windows => ("windows", json!({})),
            Commands::Inspect { index } => ("inspect", json!({ "index": index })),
            Commands::Screenshot { path } => match path {
                Some(p) => ("screenshot", json!({ "path": p })),
                None => ("screenshot", json!({})),
            },
            Commands::Click { index, right } => ("click", json!({"index": index, "right": right})),
            Commands::DblClick { index } => ("dblclick", json!({ "index": index })),
            Commands::RightClick { index } => ("rightclick", json!({ "index": index })),
            Commands::Input { index, text } => ("input", json!({"index": index, "text": text})),
            Commands::Type { text } => ("type", json!({ "text": text })),
            Commands::Keys { keys, target } => match target {
                Some(t) => ("keys", json!({"keys": keys, "target": t})),
                None => ("keys", json!({ "keys": keys })),
            },
            Commands::Scroll { index, direction, amount } => (
                "scroll",
                json!({"index": index, "direction": direction, "amount": amount}),
            ),
            Commands::Select { index, value } => ("select", json!({"index": index, "value": value})),
            Commands::Drag { index, x2, y2, button, duration } => (
                "drag",
                json!({"index": index, "x2": x2, "y2": y2, "button": button, "duration": duration}),
            ),
            Commands::ClickAt { x, y, button } => ("click-at", json!({"x": x, "y": y, "button": button})),
            Commands::DragAt { x1, y1, x2, y2, button, duration } => (
                "drag-at",
                json!({
                    "x1": x1, "y1": y1, "x2": x2, "y2": y2,
                    "button": button, "duration": duration,
                }),
            ),
            Commands::Focus { identifier } => ("focus", json!({ "window": identifier })),
            Commands::Launch { app } => ("launch", json!({ "app": app })),
            Commands::Close => ("close", json!({})),
            Commands::Get { what } => match what {
                GetCommand::Text { index } => ("get text", json!({ "index": index })),
                GetCommand::Rect { index } => ("get rect", json!({ "index": index })),
                GetCommand::Value { index } => ("get value", json!({ "index": index })),
            },
            Commands::Wait { seconds, visible, enabled, timeout } => {
                let mut args = Map::new();
                if let Some(s) = seconds {
                    args.insert("seconds".into(), json!(s));
                }
                if let Some(v) = visible {
                    args.insert("visible".into(), json!(v));
                }
                if let Some(e) = enabled {
                    args.insert("enabled".into(), json!(e));
                }
                args.insert("timeout".into(), json!(timeout));
                ("wait", Value::Object(args))
            }
            Commands::Session { .. } | Commands::Serve { .. } => return None,
        };
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Some((name.to_string(), args))
    }
}

impl Cli {
    fn providers(&self) -> ProviderConfig {
        ProviderConfig {
            vision: self.vision,
            infer: self.infer,
            api_key: self.vision_api_key.clone(),
            base_url: self.vision_base_url.clone(),
        }
    }

    /// Per-request flags. Provider switches are only sent when given so a
    /// daemon keeps the providers it was started with.
    pub fn flags(&self) -> Flags {
        Flags {
            window: self.window.clone(),
            return_state: self.return_state,
            vision: self.vision.then_some(true),
            infer: self.infer.then_some(true),
        }
    }

    fn spawn_options(&self) -> SpawnOptions {
        SpawnOptions {
            vision: self.vision,
            infer: self.infer,
            api_key: self.vision_api_key.clone(),
            base_url: self.vision_base_url.clone(),
        }
    }

    fn mode(&self) -> OutputMode {
        OutputMode::from_flag(self.json)
    }
}

/// Parse the command line and run it.
pub fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Commands::Serve { session_name, port } = &cli.command {
        return match serve(&cli, session_name, *port) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {e:#}");
                ExitCode::FAILURE
            }
        };
    }

    logging::init(cli.debug);
    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", render_error(&format!("{e:#}"), cli.mode()));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    if let Commands::Session { action } = &cli.command {
        return session_command(cli, action);
    }
    let Some((command, args)) = cli.command.to_request() else {
        return Ok(ExitCode::SUCCESS);
    };
    let request = Request {
        command: command.clone(),
        args,
        flags: cli.flags(),
    };

    let response = match &cli.session {
        Some(name) => forward(cli, name, &request)?,
        None => run_local(cli, &request)?,
    };
    Ok(print_response(&command, &response, cli.mode()))
}

fn forward(cli: &Cli, name: &str, request: &Request) -> anyhow::Result<Response> {
    let client = SessionClient::new(name);
    let port = client
        .ensure_server(&cli.spawn_options())
        .with_context(|| format!("could not reach session '{name}'"))?;
    debug!(session = name, port, command = %request.command, "forwarding");
    Ok(client.send(port, request))
}

fn run_local(cli: &Cli, request: &Request) -> anyhow::Result<Response> {
    let desktop = platform::native()?;
    let session = DesktopSession::new(desktop, cli.providers(), ActionConfig::from_env()?)?;
    let mut dispatcher = Dispatcher::new(session);
    Ok(dispatcher.handle(request))
}

fn print_response(command: &str, response: &Response, mode: OutputMode) -> ExitCode {
    match render(command, response, mode) {
        Rendered::Stdout(out) => {
            println!("{out}");
            ExitCode::SUCCESS
        }
        Rendered::Stderr(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn session_command(cli: &Cli, action: &SessionCommand) -> anyhow::Result<ExitCode> {
    let name = cli.session.as_deref().unwrap_or(DEFAULT_SESSION);
    let client = SessionClient::new(name);
    let result = match action {
        SessionCommand::Start => {
            let port = client.ensure_server(&cli.spawn_options())?;
            json!(format!("Session '{name}' running on port {port}"))
        }
        SessionCommand::Stop => {
            if client.stop()? {
                json!(format!("Session '{name}' stopped"))
            } else {
                json!(format!("Session '{name}' is not running"))
            }
        }
        SessionCommand::Status => {
            let status = client.status();
            match cli.mode() {
                OutputMode::Json => serde_json::to_value(&status)?,
                OutputMode::Text => match (status.pid, status.port) {
                    (Some(pid), Some(port)) if status.alive => {
                        json!(format!("Session '{name}': running (pid {pid}, port {port})"))
                    }
                    _ => json!(format!("Session '{name}': not running")),
                },
            }
        }
    };
    Ok(print_response("session", &Response::ok(result), cli.mode()))
}

/// Daemon entry point, reached through the hidden `_serve` command.
fn serve(cli: &Cli, session_name: &str, port: u16) -> anyhow::Result<()> {
    let pids = PidDir::default();
    let _guard = logging::init_daemon(cli.debug, pids.dir(), session_name);

    let desktop = platform::native()?;
    let session = DesktopSession::new(desktop, cli.providers(), ActionConfig::from_env()?)
        .context("could not create desktop session")?;
    info!(session = session_name, providers = session.provider_label(), "session ready");
    let mut dispatcher = Dispatcher::new(session);

    let server = Server::bind(port, session_name, pids)
        .with_context(|| format!("could not bind port {port} for session '{session_name}'"))?;
    println!("READY {}", server.port());
    std::io::stdout().flush()?;
    server.serve(&mut dispatcher)?;
    Ok(())
}
