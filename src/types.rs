//! Shared DAP value types, typed for the client direction: the runtime
//! serializes what it sends (sources, source breakpoints, stepping options)
//! and deserializes what adapters produce (capabilities, frames, scopes,
//! variables, breakpoint descriptors).

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// DAP models many of its enums as open string sets, so the types below
/// implement `FromStr`/`Display` and route serde through those. One arm
/// per direction; a type that goes both ways invokes both.
macro_rules! via_str {
    (deserialize $ty:ty) => {
        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let raw: std::borrow::Cow<'de, str> =
                    serde::Deserialize::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
    (serialize $ty:ty) => {
        impl serde::Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }
    };
}

pub(crate) use via_str;

/// A `Source` is a descriptor for source code. It is returned from the
/// adapter in events and stack frames, and sent back verbatim in requests
/// such as `setBreakpoints`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// The short name of the source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The path of the source to be shown in the UI. It is only used to
    /// locate and load the content of the source if no `sourceReference` is
    /// specified (or its value is 0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// If the value > 0 the contents of the source must be retrieved through
    /// the `source` request (even if a path is specified). The value is only
    /// valid for one session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_reference: Option<i64>,
    /// A hint for how to present the source in the UI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presentation_hint: Option<SourcePresentationHint>,
    /// The origin of this source, e.g. 'internal module' or
    /// 'inlined content from source map'.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// A list of sources that are related to this source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    /// Additional data that a debug adapter might want to loop through the
    /// client. The client should leave the data intact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter_data: Option<Value>,
    /// The checksums associated with this file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksums: Option<Vec<Checksum>>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SourcePresentationHint {
    Normal,
    Emphasize,
    Deemphasize,
}

impl FromStr for SourcePresentationHint {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "emphasize" => Self::Emphasize,
            "deemphasize" => Self::Deemphasize,
            _ => Self::Normal,
        })
    }
}

via_str!(deserialize SourcePresentationHint);

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    MD5,
    SHA1,
    SHA256,
    #[serde(rename = "timestamp")]
    Timestamp,
}

impl FromStr for ChecksumAlgorithm {
    type Err = crate::errors::DeserializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MD5" => Ok(Self::MD5),
            "SHA1" => Ok(Self::SHA1),
            "SHA256" => Ok(Self::SHA256),
            "timestamp" => Ok(Self::Timestamp),
            other => Err(crate::errors::DeserializationError::StringToEnumParseError {
                enum_name: "ChecksumAlgorithm".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

via_str!(deserialize ChecksumAlgorithm);

/// The checksum of an item calculated by the specified algorithm.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    /// Value of the checksum, encoded as a hexadecimal value.
    pub checksum: String,
}

/// A breakpoint location as the client requests it in `setBreakpoints`.
#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    /// The adapter-assigned id to re-announce when resyncing an existing
    /// binding, so the adapter keeps its state for it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// The source line of the breakpoint or logpoint.
    pub line: i64,
    /// Start position within the line. The client capability
    /// `columnsStartAt1` determines whether it is 0- or 1-based.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
    /// The expression for conditional breakpoints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// The expression that controls how many hits of the breakpoint are
    /// ignored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_condition: Option<String>,
    /// If this attribute exists and is non-empty, the adapter must not
    /// 'break' (stop) but log the message instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_message: Option<String>,
}

/// Information about a breakpoint as reported by the adapter in
/// `setBreakpoints` responses and `breakpoint` events.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointInfo {
    /// The identifier for the breakpoint. It is used by the adapter in
    /// subsequent `breakpoint` events to update or remove it.
    pub id: Option<i64>,
    /// If true, the breakpoint could be set (but not necessarily at the
    /// desired location).
    pub verified: bool,
    /// A message about the state of the breakpoint. Typically explains why
    /// a breakpoint could not be verified.
    pub message: Option<String>,
    pub source: Option<Source>,
    /// The start line of the actual range covered by the breakpoint.
    pub line: Option<i64>,
    pub column: Option<i64>,
    pub end_line: Option<i64>,
    pub end_column: Option<i64>,
    /// A memory reference to where the breakpoint is set.
    pub instruction_reference: Option<String>,
    pub offset: Option<i64>,
}

/// A possible breakpoint position returned by `breakpointLocations`.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointLocation {
    pub line: i64,
    pub column: Option<i64>,
    pub end_line: Option<i64>,
    pub end_column: Option<i64>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionBreakpointsFilter {
    /// The internal ID of the filter option, passed to
    /// `setExceptionBreakpoints`.
    pub filter: String,
    /// The name of the filter option, shown in the UI.
    pub label: String,
    pub description: Option<String>,
    pub default: Option<bool>,
    pub supports_condition: Option<bool>,
    pub condition_description: Option<String>,
}

/// The capabilities the adapter announces in its `initialize` response.
/// Only fields this runtime gates behavior on, plus the commonly-present
/// ones; unknown fields are ignored.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub supports_configuration_done_request: Option<bool>,
    pub supports_function_breakpoints: Option<bool>,
    pub supports_conditional_breakpoints: Option<bool>,
    pub supports_hit_conditional_breakpoints: Option<bool>,
    pub supports_evaluate_for_hovers: Option<bool>,
    pub exception_breakpoint_filters: Option<Vec<ExceptionBreakpointsFilter>>,
    pub supports_step_back: Option<bool>,
    pub supports_set_variable: Option<bool>,
    pub supports_restart_frame: Option<bool>,
    pub supports_goto_targets_request: Option<bool>,
    pub supports_step_in_targets_request: Option<bool>,
    pub supports_completions_request: Option<bool>,
    pub supports_modules_request: Option<bool>,
    pub supported_checksum_algorithms: Option<Vec<ChecksumAlgorithm>>,
    pub supports_restart_request: Option<bool>,
    pub supports_exception_options: Option<bool>,
    pub supports_value_formatting_options: Option<bool>,
    pub supports_exception_info_request: Option<bool>,
    pub support_terminate_debuggee: Option<bool>,
    pub support_suspend_debuggee: Option<bool>,
    pub supports_delayed_stack_trace_loading: Option<bool>,
    pub supports_loaded_sources_request: Option<bool>,
    pub supports_log_points: Option<bool>,
    pub supports_terminate_threads_request: Option<bool>,
    pub supports_set_expression: Option<bool>,
    pub supports_terminate_request: Option<bool>,
    pub supports_data_breakpoints: Option<bool>,
    pub supports_read_memory_request: Option<bool>,
    pub supports_write_memory_request: Option<bool>,
    pub supports_disassemble_request: Option<bool>,
    pub supports_cancel_request: Option<bool>,
    pub supports_breakpoint_locations_request: Option<bool>,
    pub supports_clipboard_context: Option<bool>,
    pub supports_stepping_granularity: Option<bool>,
    pub supports_instruction_breakpoints: Option<bool>,
    pub supports_exception_filter_options: Option<bool>,
    pub supports_single_thread_execution_requests: Option<bool>,
}

/// A thread as reported by the `threads` request.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ThreadInfo {
    pub id: i64,
    pub name: String,
}

/// A stack frame as reported by the `stackTrace` request.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    /// Unique within the debug session as long as the thread is suspended.
    pub id: i64,
    pub name: String,
    pub source: Option<Source>,
    /// The line within the source of the frame. 0 means no line is
    /// associated with the frame.
    pub line: i64,
    pub column: i64,
    pub end_line: Option<i64>,
    pub end_column: Option<i64>,
    /// Indicates whether this frame can be restarted with the
    /// `restartFrame` request.
    pub can_restart: Option<bool>,
    pub instruction_pointer_reference: Option<String>,
    pub module_id: Option<Value>,
    pub presentation_hint: Option<StackFramePresentationHint>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StackFramePresentationHint {
    Normal,
    Label,
    Subtle,
}

impl FromStr for StackFramePresentationHint {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "label" => Self::Label,
            "subtle" => Self::Subtle,
            _ => Self::Normal,
        })
    }
}

via_str!(deserialize StackFramePresentationHint);

/// A scope as reported by the `scopes` request.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ScopeInfo {
    /// Name of the scope such as 'Arguments' or 'Locals', shown in the UI
    /// as is.
    pub name: String,
    /// A hint for how to present this scope in the UI.
    pub presentation_hint: Option<String>,
    /// The variables of this scope can be retrieved by passing the value to
    /// the `variables` request.
    pub variables_reference: i64,
    pub named_variables: Option<i64>,
    pub indexed_variables: Option<i64>,
    /// If true, the number of variables in this scope is large or expensive
    /// to retrieve.
    pub expensive: Option<bool>,
    pub source: Option<Source>,
    pub line: Option<i64>,
    pub column: Option<i64>,
    pub end_line: Option<i64>,
    pub end_column: Option<i64>,
}

/// A variable as reported by the `variables` request.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VariableInfo {
    pub name: String,
    /// The value of the variable. Can be a multi-line text, e.g. for a
    /// function the body of a function.
    pub value: String,
    /// The type of the variable's value. Typically shown in the UI when
    /// hovering over the value.
    #[serde(rename = "type")]
    pub type_field: Option<String>,
    pub presentation_hint: Option<VariablePresentationHint>,
    /// The evaluatable name of this variable which can be passed to the
    /// `evaluate` request to fetch the variable's value.
    pub evaluate_name: Option<String>,
    /// If > 0, the variable is structured and its children can be retrieved
    /// by passing the value to the `variables` request.
    pub variables_reference: i64,
    pub named_variables: Option<i64>,
    pub indexed_variables: Option<i64>,
    pub memory_reference: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct VariablePresentationHint {
    /// The kind of variable, e.g. 'property', 'method', 'class'.
    pub kind: Option<String>,
    pub attributes: Option<Vec<String>>,
    pub visibility: Option<String>,
    /// If true, the value is lazy and must be retrieved by fetching its one
    /// and only child through the `variables` request.
    pub lazy: Option<bool>,
}

/// The granularity of one 'step' in stepping requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SteppingGranularity {
    Statement,
    Line,
    Instruction,
}

impl fmt::Display for SteppingGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Statement => "statement",
            Self::Line => "line",
            Self::Instruction => "instruction",
        })
    }
}

via_str!(serialize SteppingGranularity);

/// The reason carried by a `stopped` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoppedEventReason {
    Step,
    Breakpoint,
    Exception,
    Pause,
    Entry,
    Goto,
    FunctionBreakpoint,
    DataBreakpoint,
    InstructionBreakpoint,
    /// Adapters are allowed to invent reasons of their own.
    Other(String),
}

impl FromStr for StoppedEventReason {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "step" => Self::Step,
            "breakpoint" => Self::Breakpoint,
            "exception" => Self::Exception,
            "pause" => Self::Pause,
            "entry" => Self::Entry,
            "goto" => Self::Goto,
            "function breakpoint" => Self::FunctionBreakpoint,
            "data breakpoint" => Self::DataBreakpoint,
            "instruction breakpoint" => Self::InstructionBreakpoint,
            other => Self::Other(other.to_string()),
        })
    }
}

via_str!(deserialize StoppedEventReason);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadEventReason {
    Started,
    Exited,
    Other(String),
}

impl FromStr for ThreadEventReason {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "started" => Self::Started,
            "exited" => Self::Exited,
            other => Self::Other(other.to_string()),
        })
    }
}

via_str!(deserialize ThreadEventReason);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEventCategory {
    Console,
    Important,
    Stdout,
    Stderr,
    Telemetry,
    Other(String),
}

impl FromStr for OutputEventCategory {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "console" => Self::Console,
            "important" => Self::Important,
            "stdout" => Self::Stdout,
            "stderr" => Self::Stderr,
            "telemetry" => Self::Telemetry,
            other => Self::Other(other.to_string()),
        })
    }
}

via_str!(deserialize OutputEventCategory);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointEventReason {
    Changed,
    New,
    Removed,
    Other(String),
}

impl FromStr for BreakpointEventReason {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "changed" => Self::Changed,
            "new" => Self::New,
            "removed" => Self::Removed,
            other => Self::Other(other.to_string()),
        })
    }
}

via_str!(deserialize BreakpointEventReason);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadedSourceEventReason {
    New,
    Changed,
    Removed,
}

impl FromStr for LoadedSourceEventReason {
    type Err = crate::errors::DeserializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "changed" => Ok(Self::Changed),
            "removed" => Ok(Self::Removed),
            other => Err(crate::errors::DeserializationError::StringToEnumParseError {
                enum_name: "LoadedSourceEventReason".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

via_str!(deserialize LoadedSourceEventReason);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEventStartMethod {
    Launch,
    Attach,
    AttachForSuspendedLaunch,
}

impl FromStr for ProcessEventStartMethod {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "attach" => Self::Attach,
            "attachForSuspendedLaunch" => Self::AttachForSuspendedLaunch,
            _ => Self::Launch,
        })
    }
}

via_str!(deserialize ProcessEventStartMethod);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidatedAreas {
    All,
    Stacks,
    Threads,
    Variables,
    Other(String),
}

impl FromStr for InvalidatedAreas {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "all" => Self::All,
            "stacks" => Self::Stacks,
            "threads" => Self::Threads,
            "variables" => Self::Variables,
            other => Self::Other(other.to_string()),
        })
    }
}

via_str!(deserialize InvalidatedAreas);

/// Whether a child session should be started with `launch` or `attach`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartDebuggingRequestKind {
    Launch,
    Attach,
}

impl FromStr for StartDebuggingRequestKind {
    type Err = crate::errors::DeserializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "launch" => Ok(Self::Launch),
            "attach" => Ok(Self::Attach),
            other => Err(crate::errors::DeserializationError::StringToEnumParseError {
                enum_name: "StartDebuggingRequestKind".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

via_str!(deserialize StartDebuggingRequestKind);

/// A descriptor for an exception as returned by `exceptionInfo`.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    pub message: Option<String>,
    pub type_name: Option<String>,
    pub full_type_name: Option<String>,
    pub evaluate_name: Option<String>,
    pub stack_trace: Option<String>,
    pub inner_exception: Option<Vec<ExceptionDetails>>,
}
