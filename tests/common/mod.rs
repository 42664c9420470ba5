//! A scripted fake adapter: a TCP listener that speaks just enough DAP to
//! drive the runtime through startup, breakpoint syncs, reverse requests,
//! and termination. Each accepted connection is one adapter "instance",
//! which is how `startDebugging` children get their own conversations.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};

use dap_client::reverse_requests::ReverseCommand;
use dap_client::transport::{recv_message, AdapterConfig, Message};

pub type SetBreakpointsFn = Box<dyn Fn(&Value) -> Value + Send + Sync>;

pub struct AdapterBehavior {
    /// When true, the `initialized` event is held back until after the
    /// launch/attach response; otherwise it fires right after the
    /// initialize response.
    pub initialized_after_launch: bool,
    pub capabilities: Value,
    /// Source descriptors announced via `loadedSource(new)` after launch.
    pub loaded_sources: Vec<Value>,
    /// Maps `setBreakpoints` arguments to the response body.
    pub on_set_breakpoints: SetBreakpointsFn,
    /// Valid columns reported by `breakpointLocations` (on the requested
    /// line). `None` answers an empty list.
    pub breakpoint_columns: Option<Vec<i64>>,
    /// After a sync that verified at least one breakpoint, emit a
    /// `stopped(breakpoint)` event hitting the first verified id.
    pub stop_on_breakpoint_after_sync: bool,
}

impl Default for AdapterBehavior {
    fn default() -> Self {
        Self {
            initialized_after_launch: false,
            capabilities: json!({
                "supportsConfigurationDoneRequest": true,
                "supportsTerminateRequest": true,
                "supportsConditionalBreakpoints": true,
            }),
            loaded_sources: Vec::new(),
            on_set_breakpoints: verify_as_requested(),
            breakpoint_columns: None,
            stop_on_breakpoint_after_sync: false,
        }
    }
}

/// Verifies every requested breakpoint exactly where it was requested,
/// assigning sequential ids.
pub fn verify_as_requested() -> SetBreakpointsFn {
    let next_id = Mutex::new(1i64);
    Box::new(move |args| {
        let entries = args["breakpoints"].as_array().cloned().unwrap_or_default();
        let breakpoints: Vec<Value> = entries
            .iter()
            .map(|entry| {
                let id = match entry.get("id").and_then(Value::as_i64) {
                    Some(id) => id,
                    None => {
                        let mut next = next_id.lock();
                        let id = *next;
                        *next += 1;
                        id
                    }
                };
                json!({
                    "id": id,
                    "verified": true,
                    "line": entry["line"],
                    "column": entry.get("column").cloned().unwrap_or(Value::Null),
                })
            })
            .collect();
        json!({ "breakpoints": breakpoints })
    })
}

/// New breakpoints land one line below the requested line at column 2;
/// entries that already carry an adapter id echo back untouched.
pub fn adjust_new_to_next_line() -> SetBreakpointsFn {
    let next_id = Mutex::new(7i64);
    Box::new(move |args| {
        let entries = args["breakpoints"].as_array().cloned().unwrap_or_default();
        let breakpoints: Vec<Value> = entries
            .iter()
            .map(|entry| match entry.get("id").and_then(Value::as_i64) {
                Some(id) => json!({
                    "id": id,
                    "verified": true,
                    "line": entry["line"],
                    "column": entry.get("column").cloned().unwrap_or(Value::Null),
                }),
                None => {
                    let mut next = next_id.lock();
                    let id = *next;
                    *next += 1;
                    json!({
                        "id": id,
                        "verified": true,
                        "line": entry["line"].as_i64().unwrap() + 1,
                        "column": 2,
                    })
                }
            })
            .collect();
        json!({ "breakpoints": breakpoints })
    })
}

#[derive(Clone)]
pub struct FakeAdapter {
    addr: SocketAddr,
    /// Every request received, as (connection, command, arguments).
    pub requests: Arc<Mutex<Vec<(usize, String, Value)>>>,
    /// Every response the client sent to our reverse requests, as
    /// (success, message).
    pub reverse_replies: Arc<Mutex<Vec<(bool, Option<String>)>>>,
}

impl FakeAdapter {
    pub async fn spawn(behavior: AdapterBehavior) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let reverse_replies = Arc::new(Mutex::new(Vec::new()));
        let behavior = Arc::new(behavior);

        {
            let requests = Arc::clone(&requests);
            let reverse_replies = Arc::clone(&reverse_replies);
            tokio::spawn(async move {
                let mut next_connection = 0usize;
                while let Ok((stream, _)) = listener.accept().await {
                    let connection = next_connection;
                    next_connection += 1;
                    tokio::spawn(handle_connection(
                        stream,
                        connection,
                        Arc::clone(&behavior),
                        Arc::clone(&requests),
                        Arc::clone(&reverse_replies),
                    ));
                }
            });
        }

        Self {
            addr,
            requests,
            reverse_replies,
        }
    }

    pub fn config(&self) -> AdapterConfig {
        AdapterConfig::Tcp {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
        }
    }

    /// The recorded (connection, arguments) pairs for one command.
    pub fn requests_for(&self, command: &str) -> Vec<(usize, Value)> {
        self.requests
            .lock()
            .iter()
            .filter(|(_, name, _)| name == command)
            .map(|(connection, _, args)| (*connection, args.clone()))
            .collect()
    }

    /// Index of the first recorded (connection, command) occurrence.
    pub fn position_of(&self, connection: usize, command: &str) -> Option<usize> {
        self.requests
            .lock()
            .iter()
            .position(|(conn, name, _)| *conn == connection && name == command)
    }
}

async fn handle_connection(
    stream: TcpStream,
    connection: usize,
    behavior: Arc<AdapterBehavior>,
    requests: Arc<Mutex<Vec<(usize, String, Value)>>>,
    reverse_replies: Arc<Mutex<Vec<(bool, Option<String>)>>>,
) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut seq = 1000i64;

    loop {
        let message = match recv_message(&mut reader).await {
            Ok(Some(message)) => message,
            Ok(None) | Err(_) => break,
        };
        match message {
            Message::Request(request) => {
                let command = request.command.name().to_string();
                let arguments = match &request.command {
                    ReverseCommand::Unknown { arguments, .. } => {
                        arguments.clone().unwrap_or(Value::Null)
                    }
                    _ => Value::Null,
                };
                requests
                    .lock()
                    .push((connection, command.clone(), arguments.clone()));

                match command.as_str() {
                    "initialize" => {
                        respond(&mut write, &mut seq, request.seq, &command, Some(behavior.capabilities.clone()))
                            .await;
                        if !behavior.initialized_after_launch {
                            send_event(&mut write, &mut seq, "initialized", None).await;
                        }
                    }
                    "launch" | "attach" => {
                        let nested = arguments
                            .get("nested")
                            .and_then(Value::as_i64)
                            .unwrap_or(0);
                        let spawn = arguments
                            .get("spawn")
                            .and_then(Value::as_i64)
                            .unwrap_or(0);
                        respond(&mut write, &mut seq, request.seq, &command, None).await;
                        if behavior.initialized_after_launch {
                            send_event(&mut write, &mut seq, "initialized", None).await;
                        }
                        for source in &behavior.loaded_sources {
                            send_event(
                                &mut write,
                                &mut seq,
                                "loadedSource",
                                Some(json!({ "reason": "new", "source": source })),
                            )
                            .await;
                        }
                        if nested > 0 {
                            send_reverse_start_debugging(
                                &mut write,
                                &mut seq,
                                json!({ "nested": nested - 1 }),
                            )
                            .await;
                        }
                        for _ in 0..spawn {
                            send_reverse_start_debugging(&mut write, &mut seq, json!({})).await;
                        }
                    }
                    "setBreakpoints" => {
                        let body = (behavior.on_set_breakpoints)(&arguments);
                        let first_hit = body["breakpoints"]
                            .as_array()
                            .and_then(|entries| {
                                entries.iter().find(|entry| {
                                    entry["verified"].as_bool().unwrap_or(false)
                                })
                            })
                            .and_then(|entry| entry["id"].as_i64());
                        respond(&mut write, &mut seq, request.seq, &command, Some(body)).await;
                        if behavior.stop_on_breakpoint_after_sync {
                            if let Some(id) = first_hit {
                                // Leave the client room to reconcile the
                                // response before the stop arrives.
                                tokio::time::sleep(Duration::from_millis(50)).await;
                                send_event(
                                    &mut write,
                                    &mut seq,
                                    "stopped",
                                    Some(json!({
                                        "reason": "breakpoint",
                                        "threadId": 1,
                                        "hitBreakpointIds": [id],
                                    })),
                                )
                                .await;
                            }
                        }
                    }
                    "breakpointLocations" => {
                        let line = arguments["line"].as_i64().unwrap_or(1);
                        let locations: Vec<Value> = behavior
                            .breakpoint_columns
                            .clone()
                            .unwrap_or_default()
                            .into_iter()
                            .map(|column| json!({ "line": line, "column": column }))
                            .collect();
                        respond(
                            &mut write,
                            &mut seq,
                            request.seq,
                            &command,
                            Some(json!({ "breakpoints": locations })),
                        )
                        .await;
                    }
                    "threads" => {
                        respond(
                            &mut write,
                            &mut seq,
                            request.seq,
                            &command,
                            Some(json!({ "threads": [{ "id": 1, "name": "main" }] })),
                        )
                        .await;
                    }
                    "disconnect" => {
                        respond(&mut write, &mut seq, request.seq, &command, None).await;
                        break;
                    }
                    _ => {
                        respond(&mut write, &mut seq, request.seq, &command, None).await;
                    }
                }
            }
            Message::Response(response) => {
                reverse_replies
                    .lock()
                    .push((response.success, response.message));
            }
            Message::Event(_) => {}
        }
    }
}

async fn send_value(write: &mut OwnedWriteHalf, value: &Value) {
    let body = value.to_string();
    let framed = format!("Content-Length: {}\r\n\r\n{body}", body.len());
    let _ = write.write_all(framed.as_bytes()).await;
    let _ = write.flush().await;
}

async fn respond(
    write: &mut OwnedWriteHalf,
    seq: &mut i64,
    request_seq: i64,
    command: &str,
    body: Option<Value>,
) {
    *seq += 1;
    let mut value = json!({
        "seq": *seq,
        "type": "response",
        "request_seq": request_seq,
        "success": true,
        "command": command,
    });
    if let Some(body) = body {
        value["body"] = body;
    }
    send_value(write, &value).await;
}

async fn send_event(write: &mut OwnedWriteHalf, seq: &mut i64, event: &str, body: Option<Value>) {
    *seq += 1;
    let mut value = json!({
        "seq": *seq,
        "type": "event",
        "event": event,
    });
    if let Some(body) = body {
        value["body"] = body;
    }
    send_value(write, &value).await;
}

async fn send_reverse_start_debugging(
    write: &mut OwnedWriteHalf,
    seq: &mut i64,
    configuration: Value,
) {
    *seq += 1;
    let value = json!({
        "seq": *seq,
        "type": "request",
        "command": "startDebugging",
        "arguments": {
            "request": "launch",
            "configuration": configuration,
        },
    });
    send_value(write, &value).await;
}

/// Polls `predicate` until it holds or the deadline passes.
pub async fn wait_until(deadline: Duration, predicate: impl Fn() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}
