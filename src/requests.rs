//! Requests the client issues to the adapter. The `Command` enum carries
//! the command name and its arguments; `launch` and `attach` stay opaque
//! because their shape belongs to the adapter, not to this runtime.

use serde::Serialize;
use serde_json::Value;

use crate::types::{Source, SourceBreakpoint, SteppingGranularity};

/// Arguments for an `initialize` request.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InitializeArguments {
    /// The ID of the client using this runtime.
    #[serde(rename = "clientID", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// The human-readable name of the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    /// The ID of the debug adapter.
    #[serde(rename = "adapterID")]
    pub adapter_id: String,
    /// The ISO-639 locale of the client, e.g. en-US or de-CH.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    pub lines_start_at1: bool,
    pub columns_start_at1: bool,
    /// `path` or `uri`. This runtime always sends `path`.
    pub path_format: String,
    pub supports_variable_type: bool,
    pub supports_variable_paging: bool,
    pub supports_run_in_terminal_request: bool,
    pub supports_memory_references: bool,
    pub supports_progress_reporting: bool,
    pub supports_invalidated_event: bool,
    pub supports_memory_event: bool,
    pub supports_start_debugging_request: bool,
}

impl Default for InitializeArguments {
    fn default() -> Self {
        Self {
            client_id: Some("dap-client".to_string()),
            client_name: Some("dap-client".to_string()),
            adapter_id: String::new(),
            locale: Some("en-US".to_string()),
            lines_start_at1: true,
            columns_start_at1: true,
            path_format: "path".to_string(),
            supports_variable_type: true,
            supports_variable_paging: true,
            supports_run_in_terminal_request: true,
            supports_memory_references: false,
            supports_progress_reporting: true,
            supports_invalidated_event: true,
            supports_memory_event: true,
            supports_start_debugging_request: true,
        }
    }
}

#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectArguments {
    /// Indicates whether the debuggee should stay suspended for a restart.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<bool>,
    /// Indicates whether the debuggee should be terminated when the
    /// debugger is disconnected. Only honored when the adapter advertises
    /// `supportTerminateDebuggee`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminate_debuggee: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspend_debuggee: Option<bool>,
}

#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct TerminateArguments {
    /// A value of true indicates that this request is part of a restart
    /// sequence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<bool>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    /// The source location of the breakpoints; either `source.path` or
    /// `source.sourceReference` must be specified.
    pub source: Source,
    /// The code locations of the breakpoints. This set *replaces* whatever
    /// the adapter currently holds for the source.
    pub breakpoints: Vec<SourceBreakpoint>,
    /// A value of true indicates that the underlying source has been
    /// modified, which results in new breakpoint locations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_modified: Option<bool>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointLocationsArguments {
    pub source: Source,
    /// Start line of the range to search possible breakpoint locations in.
    pub line: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_column: Option<i64>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionFilterOptions {
    /// ID of an exception filter from the `exceptionBreakpointFilters`
    /// capability.
    pub filter_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SetExceptionBreakpointsArguments {
    /// Set of exception filters specified by their ID.
    pub filters: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_options: Option<Vec<ExceptionFilterOptions>>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceArguments {
    pub thread_id: i64,
    /// The index of the first frame to return; if omitted frames start at 0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_frame: Option<i64>,
    /// The maximum number of frames to return. If absent or 0, all frames
    /// are returned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub levels: Option<i64>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ScopesArguments {
    /// Retrieve the scopes for the stack frame identified by `frameId`.
    pub frame_id: i64,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VariablesArguments {
    pub variables_reference: i64,
    /// Filter to limit the child variables to either named or indexed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SourceArguments {
    /// Specifies the source content to load; either `source.path` or
    /// `source.sourceReference` must be specified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// The reference to the source; kept for backward compatibility with
    /// adapters that ignore `source`.
    pub source_reference: i64,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PauseArguments {
    pub thread_id: i64,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ContinueArguments {
    pub thread_id: i64,
    /// If true, execution is resumed only for the thread with the given id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single_thread: Option<bool>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NextArguments {
    pub thread_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single_thread: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granularity: Option<SteppingGranularity>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StepInArguments {
    pub thread_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single_thread: Option<bool>,
    /// The id of the target to step into, from the `stepInTargets` request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granularity: Option<SteppingGranularity>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StepOutArguments {
    pub thread_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single_thread: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granularity: Option<SteppingGranularity>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateArguments {
    /// The expression to evaluate.
    pub expression: String,
    /// Evaluate in the scope of this stack frame; global scope when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<i64>,
    /// The context in which the evaluate request is used, e.g. `watch`,
    /// `repl`, `hover`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionInfoArguments {
    pub thread_id: i64,
}

/// The commands this runtime issues, with their arguments.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "command", content = "arguments", rename_all = "camelCase")]
pub enum Command {
    Initialize(InitializeArguments),
    /// Arguments pass through verbatim from the user's configuration.
    Launch(Value),
    Attach(Value),
    ConfigurationDone,
    Disconnect(DisconnectArguments),
    Terminate(TerminateArguments),
    SetBreakpoints(SetBreakpointsArguments),
    BreakpointLocations(BreakpointLocationsArguments),
    SetExceptionBreakpoints(SetExceptionBreakpointsArguments),
    Threads,
    StackTrace(StackTraceArguments),
    Scopes(ScopesArguments),
    Variables(VariablesArguments),
    Source(SourceArguments),
    Pause(PauseArguments),
    Continue(ContinueArguments),
    Next(NextArguments),
    StepIn(StepInArguments),
    StepOut(StepOutArguments),
    Evaluate(EvaluateArguments),
    ExceptionInfo(ExceptionInfoArguments),
}

impl Command {
    /// The wire name of the command, as echoed back in responses.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialize(_) => "initialize",
            Self::Launch(_) => "launch",
            Self::Attach(_) => "attach",
            Self::ConfigurationDone => "configurationDone",
            Self::Disconnect(_) => "disconnect",
            Self::Terminate(_) => "terminate",
            Self::SetBreakpoints(_) => "setBreakpoints",
            Self::BreakpointLocations(_) => "breakpointLocations",
            Self::SetExceptionBreakpoints(_) => "setExceptionBreakpoints",
            Self::Threads => "threads",
            Self::StackTrace(_) => "stackTrace",
            Self::Scopes(_) => "scopes",
            Self::Variables(_) => "variables",
            Self::Source(_) => "source",
            Self::Pause(_) => "pause",
            Self::Continue(_) => "continue",
            Self::Next(_) => "next",
            Self::StepIn(_) => "stepIn",
            Self::StepOut(_) => "stepOut",
            Self::Evaluate(_) => "evaluate",
            Self::ExceptionInfo(_) => "exceptionInfo",
        }
    }
}

/// A client-initiated request message.
#[derive(Serialize, Debug, Clone)]
pub struct Request {
    /// Sequence number of the message; the first message sent by each actor
    /// is 1 and each subsequent one is 1 greater.
    pub seq: i64,
    #[serde(flatten)]
    pub command: Command,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_serializes_with_command_tag_and_arguments() {
        let request = Request {
            seq: 3,
            command: Command::StackTrace(StackTraceArguments {
                thread_id: 4,
                start_frame: None,
                levels: None,
            }),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["seq"], 3);
        assert_eq!(json["command"], "stackTrace");
        assert_eq!(json["arguments"]["threadId"], 4);
        assert!(json["arguments"].get("startFrame").is_none());
    }

    #[test]
    fn unit_command_serializes_without_arguments() {
        let request = Request {
            seq: 9,
            command: Command::ConfigurationDone,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["command"], "configurationDone");
        assert!(json.get("arguments").is_none());
    }
}
