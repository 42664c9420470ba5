//! Request correlation. The client assigns outbound sequence numbers,
//! parks a waker per in-flight request, resolves it when the matching
//! response arrives, and dispatches adapter-initiated (reverse) requests
//! to registered handlers.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::errors::{ClientError, Result};
use crate::requests::{Command, Request};
use crate::responses::Response;
use crate::reverse_requests::ReverseRequest;
use crate::transport::{Sendable, Transport};

/// What a reverse-request handler produces: a response body, or an error
/// string sent back as `success = false`.
pub type ReverseOutcome = std::result::Result<Option<Value>, String>;
pub type ReverseFuture = Pin<Box<dyn Future<Output = ReverseOutcome> + Send>>;
pub type ReverseHandler = Arc<dyn Fn(ReverseRequest) -> ReverseFuture + Send + Sync>;

type Waiter = oneshot::Sender<Result<Response>>;

/// One correlated conversation with an adapter. Cloneable; clones share
/// the sequence counter and the pending-request map.
#[derive(Clone)]
pub struct Client {
    transport: Transport,
    seq: Arc<AtomicI64>,
    pending: Arc<Mutex<FxHashMap<i64, Waiter>>>,
    handlers: Arc<Mutex<FxHashMap<String, ReverseHandler>>>,
}

impl Client {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            seq: Arc::new(AtomicI64::new(0)),
            pending: Arc::new(Mutex::new(FxHashMap::default())),
            handlers: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    fn next_seq(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Sends `command` and waits for the matching response. Responses may
    /// arrive in any order; matching is on `request_seq`. An unsuccessful
    /// response resolves to [`ClientError::Adapter`].
    pub async fn send_request(&self, command: Command) -> Result<Option<Value>> {
        let seq = self.next_seq();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(seq, tx);

        let request = Request { seq, command };
        tracing::debug!(seq, command = request.command.name(), "sending request");
        if self.transport.send(Sendable::Request(request)).is_err() {
            self.pending.lock().remove(&seq);
            return Err(ClientError::ConnectionClosed);
        }

        match rx.await {
            Ok(result) => result?.into_body(),
            // The waiter was dropped without an answer: the connection went
            // away between send and receive.
            Err(_) => Err(ClientError::ConnectionClosed),
        }
    }

    /// Routes an adapter response to the request that is waiting for it.
    pub fn handle_response(&self, response: Response) {
        let waiter = self.pending.lock().remove(&response.request_seq);
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(Ok(response));
            }
            None => {
                tracing::debug!(
                    request_seq = response.request_seq,
                    command = %response.command,
                    "dropping response with no pending request"
                );
            }
        }
    }

    /// Registers `handler` for a reverse-request command, replacing any
    /// previous handler for that command.
    pub fn on_reverse_request(&self, command: impl Into<String>, handler: ReverseHandler) {
        self.handlers.lock().insert(command.into(), handler);
    }

    /// Dispatches a reverse request on its own task and answers it when the
    /// handler finishes. Unhandled commands are answered `unsupported`.
    pub fn handle_reverse_request(&self, request: ReverseRequest) {
        let command = request.command.name().to_string();
        let request_seq = request.seq;
        let handler = self.handlers.lock().get(&command).cloned();
        match handler {
            Some(handler) => {
                let client = self.clone();
                tokio::spawn(async move {
                    let outcome = handler(request).await;
                    client.answer(request_seq, &command, outcome);
                });
            }
            None => {
                tracing::debug!(command = %command, "unsupported reverse request");
                self.answer(request_seq, &command, Err("unsupported".to_string()));
            }
        }
    }

    /// Sends our response to a reverse request.
    pub fn answer(&self, request_seq: i64, command: &str, outcome: ReverseOutcome) {
        let response = match outcome {
            Ok(body) => Response {
                seq: self.next_seq(),
                request_seq,
                success: true,
                command: command.to_string(),
                message: None,
                body,
            },
            Err(message) => Response {
                seq: self.next_seq(),
                request_seq,
                success: false,
                command: command.to_string(),
                message: Some(message),
                body: None,
            },
        };
        if self.transport.send(Sendable::Response(response)).is_err() {
            tracing::debug!(request_seq, "could not answer reverse request: transport closed");
        }
    }

    /// Fails every pending request. Called when the transport closes with
    /// requests outstanding.
    pub fn fail_all(&self) {
        let waiters: Vec<Waiter> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, waiter)| waiter).collect()
        };
        for waiter in waiters {
            let _ = waiter.send(Err(ClientError::ConnectionClosed));
        }
    }
}
