#[doc(hidden)]
pub use crate::{
    breakpoint_manager::BreakpointManager,
    breakpoints::{Binding, Breakpoint, BreakpointEvent, BreakpointOptions},
    client::Client,
    errors::{ClientError, Result, TransportError},
    events::{self, Event, EventBody},
    hookable::{Cleanup, Disposer, Hookable, HookOptions},
    manager::SessionManager,
    requests::{self, Command, Request},
    responses::{self, Response},
    reverse_requests::{ReverseCommand, ReverseRequest},
    runtime::Runtime,
    session::{Session, SessionOptions, SessionState},
    source::{Location, Source, SourceId},
    stack::{Frame, Stack},
    thread::{Thread, ThreadEvent},
    transport::{AdapterConfig, Message, Sendable, Transport},
    types,
    variables::{Scope, ScopeKind, Variable},
};
