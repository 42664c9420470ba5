//! Response messages. The envelope keeps its body as raw JSON; callers
//! that know which command they issued parse the body with the matching
//! typed struct from this module.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ClientError;
use crate::types::{
    BreakpointInfo, BreakpointLocation, ExceptionDetails, ScopeInfo, StackFrame, ThreadInfo,
    VariableInfo,
};

/// A response message. Sent by the adapter for our requests, and by us for
/// the adapter's reverse requests. Note that `request_seq` is snake_case on
/// the wire, unlike almost every other protocol field.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Response {
    /// Sequence number of this message.
    #[serde(default)]
    pub seq: i64,
    /// Sequence number of the corresponding request.
    pub request_seq: i64,
    /// Outcome of the request. If true, the request was successful and the
    /// `body` attribute may contain the result. If false, `message` holds
    /// the error.
    pub success: bool,
    /// The command requested.
    pub command: String,
    /// Error message in short form when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Response {
    /// Converts the envelope into its body, mapping `success = false` to an
    /// [`ClientError::Adapter`] failure.
    pub fn into_body(self) -> Result<Option<Value>, ClientError> {
        if self.success {
            Ok(self.body)
        } else {
            Err(ClientError::Adapter {
                command: self.command,
                message: self
                    .message
                    .unwrap_or_else(|| "request failed".to_string()),
            })
        }
    }

    /// Parses the body into the typed response for the issued command. A
    /// missing body deserializes from an empty object so commands with
    /// optional bodies still produce their (all-`None`) type.
    pub fn parse<T>(body: Option<Value>) -> Result<T, ClientError>
    where
        T: serde::de::DeserializeOwned,
    {
        Ok(serde_json::from_value(
            body.unwrap_or(Value::Object(Default::default())),
        )?)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsResponse {
    /// In the same order as the `breakpoints` array of the request.
    pub breakpoints: Vec<BreakpointInfo>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointLocationsResponse {
    /// Sorted set of possible breakpoint locations.
    pub breakpoints: Vec<BreakpointLocation>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ThreadsResponse {
    pub threads: Vec<ThreadInfo>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceResponse {
    pub stack_frames: Vec<StackFrame>,
    /// The total number of frames available, which may exceed the returned
    /// window when the request was paged.
    pub total_frames: Option<i64>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ScopesResponse {
    pub scopes: Vec<ScopeInfo>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VariablesResponse {
    pub variables: Vec<VariableInfo>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SourceResponse {
    /// Content of the source reference.
    pub content: String,
    pub mime_type: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContinueResponse {
    /// True (or missing) signals that all threads have been resumed.
    pub all_threads_continued: Option<bool>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponse {
    /// The result of the evaluate request.
    pub result: String,
    #[serde(rename = "type")]
    pub type_field: Option<String>,
    /// If > 0, the result is structured and its children can be fetched
    /// through the `variables` request.
    #[serde(default)]
    pub variables_reference: i64,
    pub named_variables: Option<i64>,
    pub indexed_variables: Option<i64>,
    pub memory_reference: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionInfoResponse {
    /// ID of the exception that was thrown.
    pub exception_id: String,
    pub description: Option<String>,
    /// Mode that caused the exception notification to be raised.
    pub break_mode: Option<String>,
    pub details: Option<ExceptionDetails>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RunInTerminalResponse {
    /// The process ID as started by the client.
    pub process_id: Option<i64>,
    pub shell_process_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_response_becomes_adapter_error() {
        let response: Response = serde_json::from_str(
            r#"{"seq": 5, "type": "response", "request_seq": 2, "success": false,
                "command": "launch", "message": "no such program"}"#,
        )
        .unwrap();
        match response.into_body() {
            Err(ClientError::Adapter { command, message }) => {
                assert_eq!(command, "launch");
                assert_eq!(message, "no such program");
            }
            other => panic!("expected adapter error, got {other:?}"),
        }
    }

    #[test]
    fn missing_body_parses_into_defaultable_types() {
        let parsed: ContinueResponse = Response::parse(None).unwrap();
        assert_eq!(parsed.all_threads_continued, None);
    }
}
