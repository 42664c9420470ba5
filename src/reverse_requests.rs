//! Requests initiated by the adapter. A client has to answer these like an
//! adapter answers ours; the two the protocol defines are `runInTerminal`
//! and `startDebugging`. Anything else is preserved so the dispatcher can
//! reply `unsupported` with the right sequence number.

use std::collections::HashMap;
use std::convert::Infallible;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer};
use serde_json::Value;

use crate::types::{via_str, StartDebuggingRequestKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunInTerminalKind {
    Integrated,
    External,
}

impl FromStr for RunInTerminalKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "external" => Self::External,
            _ => Self::Integrated,
        })
    }
}

via_str!(deserialize RunInTerminalKind);

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RunInTerminalRequestArguments {
    /// What kind of terminal to launch. Values: 'integrated', 'external'.
    pub kind: Option<RunInTerminalKind>,
    /// Title of the terminal.
    pub title: Option<String>,
    /// Working directory for the command.
    pub cwd: String,
    /// List of arguments; the first argument is the command to run.
    pub args: Vec<String>,
    /// Environment key-value pairs that are added to or removed from the
    /// default environment. A `None` value removes the variable.
    pub env: Option<HashMap<String, Option<String>>>,
    pub args_can_be_interpreted_by_shell: Option<bool>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StartDebuggingRequestArguments {
    /// Arguments for the new session's `launch` or `attach` request. They
    /// must not contain client-specific properties and are passed through
    /// verbatim.
    pub configuration: Value,
    /// Whether the new session starts with `launch` or `attach`.
    pub request: StartDebuggingRequestKind,
}

#[derive(Debug, Clone)]
pub enum ReverseCommand {
    RunInTerminal(RunInTerminalRequestArguments),
    StartDebugging(StartDebuggingRequestArguments),
    /// A reverse request this runtime does not handle. The dispatcher
    /// answers it with `success = false`.
    Unknown {
        command: String,
        arguments: Option<Value>,
    },
}

impl ReverseCommand {
    pub fn name(&self) -> &str {
        match self {
            Self::RunInTerminal(_) => "runInTerminal",
            Self::StartDebugging(_) => "startDebugging",
            Self::Unknown { command, .. } => command,
        }
    }
}

/// An adapter-initiated request as received from the wire.
#[derive(Debug, Clone)]
pub struct ReverseRequest {
    pub seq: i64,
    pub command: ReverseCommand,
}

#[derive(Deserialize)]
struct RawReverseRequest {
    #[serde(default)]
    seq: i64,
    command: String,
    arguments: Option<Value>,
}

impl<'de> Deserialize<'de> for ReverseRequest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawReverseRequest::deserialize(deserializer)?;
        let missing = || de::Error::custom(format!("missing arguments for '{}'", raw.command));
        let command = match raw.command.as_str() {
            "runInTerminal" => {
                let arguments = raw.arguments.ok_or_else(missing)?;
                ReverseCommand::RunInTerminal(
                    serde_json::from_value(arguments).map_err(de::Error::custom)?,
                )
            }
            "startDebugging" => {
                let arguments = raw.arguments.ok_or_else(missing)?;
                ReverseCommand::StartDebugging(
                    serde_json::from_value(arguments).map_err(de::Error::custom)?,
                )
            }
            _ => ReverseCommand::Unknown {
                command: raw.command,
                arguments: raw.arguments,
            },
        };
        Ok(ReverseRequest {
            seq: raw.seq,
            command,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_debugging_parses_kind_and_configuration() {
        let json = r#"{
            "seq": 40, "type": "request", "command": "startDebugging",
            "arguments": {"request": "attach", "configuration": {"port": 9230}}
        }"#;
        let request: ReverseRequest = serde_json::from_str(json).unwrap();
        match request.command {
            ReverseCommand::StartDebugging(args) => {
                assert_eq!(args.request, StartDebuggingRequestKind::Attach);
                assert_eq!(args.configuration["port"], 9230);
            }
            other => panic!("expected startDebugging, got {other:?}"),
        }
    }

    #[test]
    fn unknown_reverse_request_is_kept() {
        let json = r#"{"seq": 41, "type": "request", "command": "customProbe"}"#;
        let request: ReverseRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.command.name(), "customProbe");
    }
}
