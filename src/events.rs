//! Events produced by the adapter. The client only ever deserializes
//! these; the envelope keeps unrecognized events instead of failing so a
//! session survives adapters that emit vendor extensions.

use serde::Deserialize;
use serde_json::Value;

use crate::types::{
    BreakpointEventReason, BreakpointInfo, Capabilities, InvalidatedAreas, LoadedSourceEventReason,
    OutputEventCategory, ProcessEventStartMethod, Source, StoppedEventReason, ThreadEventReason,
};

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEventBody {
    /// The reason for the event.
    pub reason: StoppedEventReason,
    /// The full reason, displayed in the UI as is.
    pub description: Option<String>,
    /// The thread which was stopped.
    pub thread_id: Option<i64>,
    pub preserve_focus_hint: Option<bool>,
    /// Additional information, e.g. if reason is `exception`, text contains
    /// the exception name.
    pub text: Option<String>,
    /// If true, a debug adapter can announce that all threads have stopped.
    pub all_threads_stopped: Option<bool>,
    /// Ids of the breakpoints that triggered the event.
    pub hit_breakpoint_ids: Option<Vec<i64>>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ContinuedEventBody {
    /// The thread which was continued.
    pub thread_id: i64,
    /// If true, the adapter announces that all threads have continued.
    pub all_threads_continued: Option<bool>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExitedEventBody {
    /// The exit code returned from the debuggee.
    pub exit_code: i64,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct TerminatedEventBody {
    /// A debug adapter may set this to request that the client restarts the
    /// session; the value is handed back in the new launch request.
    pub restart: Option<Value>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ThreadEventBody {
    /// Values: 'started', 'exited'.
    pub reason: ThreadEventReason,
    pub thread_id: i64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OutputEventBody {
    /// `console` is assumed when absent.
    pub category: Option<OutputEventCategory>,
    pub output: String,
    pub group: Option<String>,
    /// If > 0, the output contains objects which can be retrieved through
    /// the `variables` request.
    pub variables_reference: Option<i64>,
    pub source: Option<Source>,
    pub line: Option<i64>,
    pub column: Option<i64>,
    pub data: Option<Value>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointEventBody {
    /// Values: 'changed', 'new', 'removed'.
    pub reason: BreakpointEventReason,
    /// The `id` attribute is used to find the target breakpoint, the other
    /// attributes are used as the new values.
    pub breakpoint: BreakpointInfo,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LoadedSourceEventBody {
    /// Values: 'new', 'changed', 'removed'.
    pub reason: LoadedSourceEventReason,
    pub source: Source,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ModuleEventBody {
    pub reason: String,
    /// The new, changed, or removed module. In case of `removed` only the
    /// module id is used. Kept raw; the runtime forwards it untouched.
    pub module: Value,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEventBody {
    /// The logical name of the process.
    pub name: String,
    /// The process ID as assigned by the system.
    pub system_process_id: Option<i64>,
    pub is_local_process: Option<bool>,
    pub start_method: Option<ProcessEventStartMethod>,
    pub pointer_size: Option<i64>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesEventBody {
    pub capabilities: Capabilities,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStartEventBody {
    /// An ID that can be used in subsequent `progressUpdate` and
    /// `progressEnd` events.
    pub progress_id: String,
    pub title: String,
    pub request_id: Option<i64>,
    pub cancellable: Option<bool>,
    pub message: Option<String>,
    pub percentage: Option<f64>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdateEventBody {
    pub progress_id: String,
    pub message: Option<String>,
    pub percentage: Option<f64>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEndEventBody {
    pub progress_id: String,
    pub message: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InvalidatedEventBody {
    /// When missing or not understood, assume `all`.
    pub areas: Option<Vec<InvalidatedAreas>>,
    pub thread_id: Option<i64>,
    /// If specified, only data related to this stack frame needs to be
    /// refetched (`threadId` is then ignored).
    pub stack_frame_id: Option<i64>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEventBody {
    pub memory_reference: String,
    /// Starting offset in bytes where memory has been updated. Can be
    /// negative.
    pub offset: i64,
    pub count: i64,
}

#[derive(Debug, Clone)]
pub enum EventBody {
    Initialized,
    Stopped(StoppedEventBody),
    Continued(ContinuedEventBody),
    Exited(ExitedEventBody),
    Terminated(TerminatedEventBody),
    Thread(ThreadEventBody),
    Output(OutputEventBody),
    Breakpoint(BreakpointEventBody),
    LoadedSource(LoadedSourceEventBody),
    Module(ModuleEventBody),
    Process(ProcessEventBody),
    Capabilities(CapabilitiesEventBody),
    ProgressStart(ProgressStartEventBody),
    ProgressUpdate(ProgressUpdateEventBody),
    ProgressEnd(ProgressEndEventBody),
    Invalidated(InvalidatedEventBody),
    Memory(MemoryEventBody),
    /// An event this runtime does not model. Carried through verbatim so
    /// listeners can still observe it.
    Unknown { event: String, body: Option<Value> },
}

impl EventBody {
    /// The wire name of the event, used as the fan-out key.
    pub fn name(&self) -> &str {
        match self {
            Self::Initialized => "initialized",
            Self::Stopped(_) => "stopped",
            Self::Continued(_) => "continued",
            Self::Exited(_) => "exited",
            Self::Terminated(_) => "terminated",
            Self::Thread(_) => "thread",
            Self::Output(_) => "output",
            Self::Breakpoint(_) => "breakpoint",
            Self::LoadedSource(_) => "loadedSource",
            Self::Module(_) => "module",
            Self::Process(_) => "process",
            Self::Capabilities(_) => "capabilities",
            Self::ProgressStart(_) => "progressStart",
            Self::ProgressUpdate(_) => "progressUpdate",
            Self::ProgressEnd(_) => "progressEnd",
            Self::Invalidated(_) => "invalidated",
            Self::Memory(_) => "memory",
            Self::Unknown { event, .. } => event,
        }
    }
}

/// An event message as received from the adapter.
#[derive(Debug, Clone)]
pub struct Event {
    pub seq: i64,
    pub body: EventBody,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(default)]
    seq: i64,
    event: String,
    body: Option<Value>,
}

fn body_or_default<T>(body: Option<Value>) -> Result<T, serde_json::Error>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_value(body.unwrap_or(Value::Object(Default::default())))
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        let raw = RawEvent::deserialize(deserializer)?;
        let body = match raw.event.as_str() {
            "initialized" => EventBody::Initialized,
            "stopped" => EventBody::Stopped(body_or_default(raw.body).map_err(D::Error::custom)?),
            "continued" => {
                EventBody::Continued(body_or_default(raw.body).map_err(D::Error::custom)?)
            }
            "exited" => EventBody::Exited(body_or_default(raw.body).map_err(D::Error::custom)?),
            "terminated" => {
                EventBody::Terminated(body_or_default(raw.body).map_err(D::Error::custom)?)
            }
            "thread" => EventBody::Thread(body_or_default(raw.body).map_err(D::Error::custom)?),
            "output" => EventBody::Output(body_or_default(raw.body).map_err(D::Error::custom)?),
            "breakpoint" => {
                EventBody::Breakpoint(body_or_default(raw.body).map_err(D::Error::custom)?)
            }
            "loadedSource" => {
                EventBody::LoadedSource(body_or_default(raw.body).map_err(D::Error::custom)?)
            }
            "module" => EventBody::Module(body_or_default(raw.body).map_err(D::Error::custom)?),
            "process" => EventBody::Process(body_or_default(raw.body).map_err(D::Error::custom)?),
            "capabilities" => {
                EventBody::Capabilities(body_or_default(raw.body).map_err(D::Error::custom)?)
            }
            "progressStart" => {
                EventBody::ProgressStart(body_or_default(raw.body).map_err(D::Error::custom)?)
            }
            "progressUpdate" => {
                EventBody::ProgressUpdate(body_or_default(raw.body).map_err(D::Error::custom)?)
            }
            "progressEnd" => {
                EventBody::ProgressEnd(body_or_default(raw.body).map_err(D::Error::custom)?)
            }
            "invalidated" => {
                EventBody::Invalidated(body_or_default(raw.body).map_err(D::Error::custom)?)
            }
            "memory" => EventBody::Memory(body_or_default(raw.body).map_err(D::Error::custom)?),
            _ => EventBody::Unknown {
                event: raw.event,
                body: raw.body,
            },
        };
        Ok(Event {
            seq: raw.seq,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_event_parses_reason_and_hit_ids() {
        let json = r#"{
            "seq": 11, "type": "event", "event": "stopped",
            "body": {"reason": "breakpoint", "threadId": 1, "hitBreakpointIds": [7]}
        }"#;
        let event: Event = serde_json::from_str(json).unwrap();
        match event.body {
            EventBody::Stopped(body) => {
                assert_eq!(body.reason, StoppedEventReason::Breakpoint);
                assert_eq!(body.thread_id, Some(1));
                assert_eq!(body.hit_breakpoint_ids, Some(vec![7]));
            }
            other => panic!("expected stopped event, got {other:?}"),
        }
    }

    #[test]
    fn initialized_event_tolerates_missing_body() {
        let json = r#"{"seq": 2, "type": "event", "event": "initialized"}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert!(matches!(event.body, EventBody::Initialized));
    }

    #[test]
    fn unknown_events_are_preserved() {
        let json = r#"{"seq": 3, "type": "event", "event": "custom/heapStats", "body": {"used": 1}}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        match event.body {
            EventBody::Unknown { event, body } => {
                assert_eq!(event, "custom/heapStats");
                assert!(body.is_some());
            }
            other => panic!("expected unknown event, got {other:?}"),
        }
    }
}
