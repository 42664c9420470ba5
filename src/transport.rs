//! The wire: `Content-Length`-framed JSON over a subprocess's stdio or a
//! TCP socket. A started transport runs one read pump and one write pump;
//! the session consumes parsed [`Message`]s from a channel and enqueues
//! [`Sendable`]s without ever touching the socket itself.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::errors::{DeserializationError, TransportError};
use crate::events::Event;
use crate::requests::Request;
use crate::responses::Response;
use crate::reverse_requests::ReverseRequest;

pub type DynRead = Box<dyn AsyncBufRead + Unpin + Send>;
pub type DynWrite = Box<dyn AsyncWrite + Unpin + Send>;

/// A message arriving from the adapter.
#[derive(Debug, Clone)]
pub enum Message {
    Response(Response),
    Event(Event),
    /// A reverse request: the adapter asking the client to do something.
    Request(ReverseRequest),
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        let value = Value::deserialize(deserializer)?;
        match value.get("type").and_then(Value::as_str) {
            Some("response") => Ok(Message::Response(
                serde_json::from_value(value).map_err(D::Error::custom)?,
            )),
            Some("event") => Ok(Message::Event(
                serde_json::from_value(value).map_err(D::Error::custom)?,
            )),
            Some("request") => Ok(Message::Request(
                serde_json::from_value(value).map_err(D::Error::custom)?,
            )),
            other => Err(D::Error::custom(format!(
                "unknown message type: {other:?}"
            ))),
        }
    }
}

/// A message going to the adapter: our requests, and our responses to the
/// adapter's reverse requests.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Sendable {
    Request(Request),
    Response(Response),
}

#[derive(Debug, Clone)]
enum FramerState {
    /// Expecting a header.
    Header,
    /// Expecting the "\r\n" separator between header block and content.
    Sep,
    /// Expecting content.
    Content,
}

fn escape_crlf(instr: &str) -> String {
    instr.replace('\n', "\\n").replace('\r', "\\r")
}

/// Accepts a single message from the stream. `Ok(None)` is a clean EOF at
/// a frame boundary; EOF inside a frame is [`TransportError::UnexpectedEnd`].
pub async fn recv_message<R>(input: &mut R) -> Result<Option<Message>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut state = FramerState::Header;
    let mut content_length: usize = 0;

    loop {
        match state {
            FramerState::Header => {
                let mut buffer = String::new();
                let read = input.read_line(&mut buffer).await?;
                if read == 0 {
                    return Ok(None);
                }
                tracing::trace!("HEADER: read line: {}", escape_crlf(&buffer));

                let parts: Vec<&str> = buffer.trim_end().split(':').collect();
                if parts.len() == 2 {
                    match parts[0] {
                        "Content-Length" => {
                            content_length = match parts[1].trim().parse() {
                                Ok(val) => val,
                                Err(_) => {
                                    return Err(TransportError::HeaderParseError { line: buffer })
                                }
                            };
                            state = FramerState::Sep;
                        }
                        other => {
                            return Err(TransportError::UnknownHeader {
                                header: other.to_string(),
                            })
                        }
                    }
                } else if buffer.eq("\r\n") || buffer.eq("\n") {
                    tracing::trace!("HEADER: skipping empty line");
                    continue;
                } else {
                    return Err(TransportError::HeaderParseError { line: buffer });
                }
            }
            FramerState::Sep => {
                let mut buffer = String::new();
                let read = input.read_line(&mut buffer).await?;
                if read == 0 {
                    return Err(TransportError::UnexpectedEnd);
                }
                tracing::trace!("SEP: read line: {}", escape_crlf(&buffer));
                if buffer == "\r\n" || buffer == "\n" {
                    state = FramerState::Content;
                } else {
                    return Err(TransportError::HeaderParseError { line: buffer });
                }
            }
            FramerState::Content => {
                let mut payload = BytesMut::zeroed(content_length);
                input
                    .read_exact(&mut payload)
                    .await
                    .map_err(|err| match err.kind() {
                        std::io::ErrorKind::UnexpectedEof => TransportError::UnexpectedEnd,
                        _ => TransportError::IoError(err),
                    })?;

                let payload = String::from_utf8_lossy(&payload).to_string();
                tracing::trace!("CONTENT: read content: {}", escape_crlf(&payload));
                let message: Message = serde_json::from_str(&payload)
                    .map_err(|err| TransportError::ParseError(DeserializationError::SerdeError(err)))?;
                return Ok(Some(message));
            }
        }
    }
}

/// Serializes a message and writes it with its `Content-Length` header.
pub async fn send_message<W>(output: &mut W, message: &Sendable) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(message)
        .map_err(|err| TransportError::ParseError(DeserializationError::SerdeError(err)))?;
    tracing::trace!("SEND: {}", json);
    output
        .write_all(format!("Content-Length: {}\r\n\r\n", json.len()).as_bytes())
        .await?;
    output.write_all(json.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

struct TransportInner {
    process: Option<Child>,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
    stderr_task: Option<JoinHandle<()>>,
    closed: bool,
}

/// One adapter connection. Cloneable; all clones share the same pumps and
/// the same close state.
#[derive(Clone)]
pub struct Transport {
    outbound: UnboundedSender<Sendable>,
    inner: Arc<Mutex<TransportInner>>,
    failure: Arc<Mutex<Option<TransportError>>>,
}

impl Transport {
    /// Starts the read and write pumps over the given streams. Inbound
    /// messages arrive on the returned channel; the channel closing means
    /// the connection ended (check [`Transport::failure`] for the cause).
    pub fn start(
        reader: DynRead,
        writer: DynWrite,
        stderr: Option<DynRead>,
        process: Option<Child>,
    ) -> (Self, UnboundedReceiver<Message>) {
        let (inbound_tx, inbound_rx) = unbounded_channel();
        let (outbound_tx, outbound_rx) = unbounded_channel();
        let failure: Arc<Mutex<Option<TransportError>>> = Arc::new(Mutex::new(None));

        let reader_task = tokio::spawn(Self::read_pump(reader, inbound_tx, Arc::clone(&failure)));
        let writer_task = tokio::spawn(Self::write_pump(writer, outbound_rx));
        let stderr_task = stderr.map(|err| tokio::spawn(Self::stderr_pump(err)));

        let transport = Self {
            outbound: outbound_tx,
            inner: Arc::new(Mutex::new(TransportInner {
                process,
                reader_task: Some(reader_task),
                writer_task: Some(writer_task),
                stderr_task,
                closed: false,
            })),
            failure,
        };
        (transport, inbound_rx)
    }

    async fn read_pump(
        mut reader: DynRead,
        inbound: UnboundedSender<Message>,
        failure: Arc<Mutex<Option<TransportError>>>,
    ) {
        loop {
            match recv_message(&mut reader).await {
                Ok(Some(message)) => {
                    if inbound.send(message).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::error!("transport read failed: {err}");
                    *failure.lock() = Some(err);
                    break;
                }
            }
        }
        // Dropping `inbound` closes the channel; the session observes the
        // disconnect on its next recv.
    }

    async fn write_pump(mut writer: DynWrite, mut outbound: UnboundedReceiver<Sendable>) {
        while let Some(message) = outbound.recv().await {
            if let Err(err) = send_message(&mut writer, &message).await {
                tracing::error!("transport write failed: {err}");
                break;
            }
        }
    }

    async fn stderr_pump(mut stderr: DynRead) {
        let mut line = String::new();
        loop {
            line.clear();
            match stderr.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => tracing::debug!(target: "dap_client::adapter_stderr", "{}", line.trim_end()),
            }
        }
    }

    /// Enqueues a message for the write pump. Errors when the transport has
    /// closed.
    pub fn send(&self, message: Sendable) -> Result<(), TransportError> {
        self.outbound.send(message).map_err(|_| TransportError::ConnectError {
            reason: "transport closed".to_string(),
        })
    }

    /// The error that ended the connection, when there was one.
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().as_ref().map(|err| err.to_string())
    }

    /// Terminates the adapter process (when this transport owns one) and
    /// stops both pumps. Buffered inbound bytes are dropped. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        if let Some(process) = inner.process.as_mut() {
            // kill_on_drop covers us if this races process exit.
            let _ = process.start_kill();
        }
        if let Some(task) = inner.reader_task.take() {
            task.abort();
        }
        if let Some(task) = inner.writer_task.take() {
            task.abort();
        }
        if let Some(task) = inner.stderr_task.take() {
            task.abort();
        }
    }
}

/// Extracts `(host, port)` from an adapter server's banner line. The
/// conventional banner is `Debug server listening at HOST:PORT`.
pub fn default_server_banner(line: &str) -> Option<(String, u16)> {
    let rest = line.trim().strip_prefix("Debug server listening at ")?;
    let (host, port) = rest.rsplit_once(':')?;
    let port = port.trim().parse().ok()?;
    Some((host.trim().to_string(), port))
}

pub type BannerExtract = Arc<dyn Fn(&str) -> Option<(String, u16)> + Send + Sync>;

/// How to reach an adapter. A session keeps its config so `startDebugging`
/// children can open further connections to the same adapter.
#[derive(Clone)]
pub enum AdapterConfig {
    /// Spawn the adapter and speak DAP over its stdio.
    Executable {
        command: String,
        args: Vec<String>,
        cwd: Option<PathBuf>,
        env: HashMap<String, String>,
    },
    /// Connect to an adapter that is already listening.
    Tcp { host: String, port: u16 },
    /// Spawn a server process, scan its stdout for the listening banner,
    /// then connect over TCP.
    TcpServer {
        command: String,
        args: Vec<String>,
        cwd: Option<PathBuf>,
        env: HashMap<String, String>,
        extract: BannerExtract,
    },
}

impl std::fmt::Debug for AdapterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Executable { command, args, .. } => f
                .debug_struct("Executable")
                .field("command", command)
                .field("args", args)
                .finish_non_exhaustive(),
            Self::Tcp { host, port } => f
                .debug_struct("Tcp")
                .field("host", host)
                .field("port", port)
                .finish(),
            Self::TcpServer { command, args, .. } => f
                .debug_struct("TcpServer")
                .field("command", command)
                .field("args", args)
                .finish_non_exhaustive(),
        }
    }
}

impl AdapterConfig {
    /// Opens a fresh connection to the adapter this config describes.
    pub async fn connect(&self) -> Result<(Transport, UnboundedReceiver<Message>), TransportError> {
        match self {
            Self::Executable {
                command,
                args,
                cwd,
                env,
            } => {
                let mut child = spawn_piped(command, args, cwd.as_deref(), env)?;
                let stdin = child.stdin.take().ok_or_else(|| TransportError::ConnectError {
                    reason: "adapter stdin unavailable".to_string(),
                })?;
                let stdout = child.stdout.take().ok_or_else(|| TransportError::ConnectError {
                    reason: "adapter stdout unavailable".to_string(),
                })?;
                let stderr = child.stderr.take().map(|err| {
                    Box::new(BufReader::new(err)) as DynRead
                });
                Ok(Transport::start(
                    Box::new(BufReader::new(stdout)),
                    Box::new(stdin),
                    stderr,
                    Some(child),
                ))
            }
            Self::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(|err| TransportError::ConnectError {
                        reason: format!("{host}:{port}: {err}"),
                    })?;
                let (rx, tx) = stream.into_split();
                Ok(Transport::start(
                    Box::new(BufReader::new(rx)),
                    Box::new(tx),
                    None,
                    None,
                ))
            }
            Self::TcpServer {
                command,
                args,
                cwd,
                env,
                extract,
            } => {
                let mut child = spawn_piped(command, args, cwd.as_deref(), env)?;
                let stdout = child.stdout.take().ok_or_else(|| TransportError::ConnectError {
                    reason: "server stdout unavailable".to_string(),
                })?;
                let mut lines = BufReader::new(stdout).lines();
                let (host, port) = loop {
                    match lines.next_line().await? {
                        Some(line) => {
                            tracing::debug!(target: "dap_client::adapter_stdout", "{}", line);
                            if let Some(found) = extract(&line) {
                                break found;
                            }
                        }
                        None => {
                            return Err(TransportError::ConnectError {
                                reason: "server exited before announcing its port".to_string(),
                            })
                        }
                    }
                };
                // Keep draining the banner stream so the server never
                // blocks on a full pipe.
                tokio::spawn(async move {
                    while let Ok(Some(line)) = lines.next_line().await {
                        tracing::debug!(target: "dap_client::adapter_stdout", "{}", line);
                    }
                });
                let stream = TcpStream::connect((host.as_str(), port)).await.map_err(|err| {
                    TransportError::ConnectError {
                        reason: format!("{host}:{port}: {err}"),
                    }
                })?;
                let (rx, tx) = stream.into_split();
                let stderr = child.stderr.take().map(|err| {
                    Box::new(BufReader::new(err)) as DynRead
                });
                Ok(Transport::start(
                    Box::new(BufReader::new(rx)),
                    Box::new(tx),
                    stderr,
                    Some(child),
                ))
            }
        }
    }
}

fn spawn_piped(
    command: &str,
    args: &[String],
    cwd: Option<&std::path::Path>,
    env: &HashMap<String, String>,
) -> Result<Child, TransportError> {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // make sure the adapter is reaped when the transport goes away
        .kill_on_drop(true);
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    cmd.envs(env);
    cmd.spawn().map_err(|err| TransportError::ConnectError {
        reason: format!("{command}: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBody;

    const STOPPED_EVENT: &str = r#"{"seq":4,"type":"event","event":"stopped","body":{"reason":"pause","threadId":1}}"#;

    #[tokio::test]
    async fn recv_message_reads_a_framed_event() {
        let framed = format!("Content-Length: {}\r\n\r\n{}", STOPPED_EVENT.len(), STOPPED_EVENT);
        let mut reader = BufReader::new(framed.as_bytes());
        let message = recv_message(&mut reader).await.unwrap().unwrap();
        match message {
            Message::Event(event) => assert!(matches!(event.body, EventBody::Stopped(_))),
            other => panic!("expected event, got {other:?}"),
        }
        assert!(recv_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_header_is_fatal() {
        let mut reader = BufReader::new("X-Custom: 1\r\n\r\n".as_bytes());
        match recv_message(&mut reader).await {
            Err(TransportError::UnknownHeader { header }) => assert_eq!(header, "X-Custom"),
            other => panic!("expected unknown header error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn eof_inside_a_frame_is_unexpected_end() {
        let mut reader = BufReader::new("Content-Length: 99\r\n\r\n{\"tru".as_bytes());
        assert!(matches!(
            recv_message(&mut reader).await,
            Err(TransportError::UnexpectedEnd)
        ));
    }

    #[tokio::test]
    async fn send_message_round_trips_through_the_framer() {
        use crate::requests::{Command, Request};

        let (client, server) = tokio::io::duplex(1024);
        let (_read_half, mut write_half) = tokio::io::split(client);
        let message = Sendable::Request(Request {
            seq: 1,
            command: Command::Threads,
        });
        send_message(&mut write_half, &message).await.unwrap();
        drop(write_half);

        let (server_read, _server_write) = tokio::io::split(server);
        let mut reader = BufReader::new(server_read);
        // A request parses as a reverse request on the receiving side; the
        // framing is what this test is about.
        let received = recv_message(&mut reader).await.unwrap().unwrap();
        match received {
            Message::Request(request) => {
                assert_eq!(request.seq, 1);
                assert_eq!(request.command.name(), "threads");
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn banner_extracts_host_and_port() {
        assert_eq!(
            default_server_banner("Debug server listening at 127.0.0.1:9229\n"),
            Some(("127.0.0.1".to_string(), 9229))
        );
        assert_eq!(default_server_banner("warming up"), None);
    }
}
