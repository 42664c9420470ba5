use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeserializationError {
    #[error("could not parse value '{value}' to enum variant of '{enum_name}'")]
    StringToEnumParseError { enum_name: String, value: String },
    #[error("error while deserializing")]
    SerdeError(#[from] serde_json::Error),
}

/// Failures of the framing layer. All of these are fatal for the
/// connection they occur on.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error")]
    IoError(#[from] std::io::Error),

    #[error("unknown header: {header}")]
    UnknownHeader { header: String },

    #[error("could not parse header line '{line}'")]
    HeaderParseError { line: String },

    #[error("parse error")]
    ParseError(#[from] DeserializationError),

    #[error("connection ended inside a frame")]
    UnexpectedEnd,

    #[error("could not reach the adapter. {reason}")]
    ConnectError { reason: String },
}

/// The public failure sum of the runtime. Every fallible operation on a
/// session or one of its entities resolves to one of these.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Framing or JSON was invalid. Tears the session down.
    #[error("protocol error: {0}")]
    Protocol(#[from] TransportError),

    /// The adapter answered `success = false`.
    #[error("adapter rejected '{command}': {message}")]
    Adapter { command: String, message: String },

    /// The adapter never advertised the capability this call relies on.
    /// The adapter was not contacted.
    #[error("adapter does not support {0}")]
    Capability(&'static str),

    /// The transport closed while the request was pending.
    #[error("connection to the adapter closed")]
    ConnectionClosed,

    /// Session startup did not reach readiness within the deadline.
    #[error("session startup timed out")]
    StartupTimeout,

    /// A `startDebugging` chain went deeper than the session tree allows.
    #[error("Maximum session depth exceeded")]
    DepthExceeded,

    #[error("error while deserializing")]
    Deserialization(#[from] serde_json::Error),

    /// The session already terminated; the operation was not attempted.
    #[error("session is terminated")]
    Terminated,

    /// The owning thread resumed or exited; this stack snapshot is gone.
    #[error("stack is no longer valid")]
    InvalidStack,
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
