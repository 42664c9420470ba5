//! The per-thread mirror of adapter state. A thread flips between running
//! and stopped on `stopped`/`continued` events, owns at most one stack
//! snapshot while stopped, and synthesizes a `resumed` event exactly once
//! per stop→resume cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::errors::{ClientError, Result};
use crate::events::{ContinuedEventBody, StoppedEventBody};
use crate::hookable::Hookable;
use crate::requests::{
    Command, ContinueArguments, ExceptionInfoArguments, NextArguments, PauseArguments,
    StackTraceArguments, StepInArguments, StepOutArguments,
};
use crate::responses::{ExceptionInfoResponse, Response, StackTraceResponse};
use crate::session::Session;
use crate::stack::Stack;
use crate::types::SteppingGranularity;

/// Payload of the thread-level hookable.
#[derive(Debug, Clone)]
pub enum ThreadEvent {
    /// The thread stopped; the body says why.
    Stopped(StoppedEventBody),
    /// The adapter announced the thread continued.
    Continued(ContinuedEventBody),
    /// Synthesized: fired once when a previously stopped thread starts
    /// running again, whether the adapter said so or we inferred it from a
    /// successful resume request.
    Resumed,
    /// The thread is gone.
    Exited,
}

impl ThreadEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stopped(_) => "stopped",
            Self::Continued(_) => "continued",
            Self::Resumed => "resumed",
            Self::Exited => "exited",
        }
    }
}

pub struct Thread {
    session: Weak<Session>,
    id: i64,
    name: Mutex<String>,
    stopped: AtomicBool,
    stack: Mutex<Option<Arc<Stack>>>,
    events: Hookable<ThreadEvent>,
}

impl Thread {
    pub(crate) fn new(session: &Arc<Session>, id: i64, name: String) -> Arc<Self> {
        let events = Hookable::scoped_under(session.events());
        Arc::new(Self {
            session: Arc::downgrade(session),
            id,
            name: Mutex::new(name),
            stopped: AtomicBool::new(false),
            stack: Mutex::new(None),
            events,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub(crate) fn set_name(&self, name: String) {
        *self.name.lock() = name;
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// The thread's event bus: `stopped`, `continued`, `resumed`, `exited`.
    pub fn events(&self) -> &Hookable<ThreadEvent> {
        &self.events
    }

    fn session(&self) -> Result<Arc<Session>> {
        self.session.upgrade().ok_or(ClientError::Terminated)
    }

    fn drop_stack(&self) {
        if let Some(stack) = self.stack.lock().take() {
            stack.invalidate();
        }
    }

    /// Applies a `stopped` event to this thread. Invalidates any previous
    /// snapshot before listeners observe the event.
    pub(crate) fn handle_stopped(&self, body: &StoppedEventBody) {
        self.drop_stack();
        self.stopped.store(true, Ordering::SeqCst);
        self.events.emit("stopped", &ThreadEvent::Stopped(body.clone()));
    }

    /// Applies a `continued` event (or an inferred resume after a resume
    /// request succeeded). The synthesized `resumed` fires only when the
    /// thread was actually stopped.
    pub(crate) fn handle_continued(&self, body: &ContinuedEventBody) {
        let was_stopped = self.stopped.swap(false, Ordering::SeqCst);
        self.drop_stack();
        self.events
            .emit("continued", &ThreadEvent::Continued(body.clone()));
        if was_stopped {
            self.events.emit("resumed", &ThreadEvent::Resumed);
        }
    }

    pub(crate) fn handle_exited(&self) {
        self.stopped.store(false, Ordering::SeqCst);
        self.drop_stack();
        self.events.emit("exited", &ThreadEvent::Exited);
        self.events.destroy();
    }

    /// The current stack snapshot, fetching it from the adapter on first
    /// use. `None` while the thread is running.
    pub async fn stack(self: &Arc<Self>) -> Result<Option<Arc<Stack>>> {
        if !self.stopped() {
            return Ok(None);
        }
        if let Some(stack) = self.stack.lock().clone() {
            if stack.valid() {
                return Ok(Some(stack));
            }
        }

        let session = self.session()?;
        let body = session
            .request(Command::StackTrace(StackTraceArguments {
                thread_id: self.id,
                start_frame: None,
                levels: None,
            }))
            .await?;
        let response: StackTraceResponse = Response::parse(body)?;

        // The thread may have resumed while the request was in flight; a
        // snapshot taken across a resume is already stale.
        if !self.stopped() {
            return Ok(None);
        }
        let stack = Stack::new(&session, self.id, response.stack_frames);
        *self.stack.lock() = Some(Arc::clone(&stack));
        Ok(Some(stack))
    }

    pub async fn pause(&self) -> Result<()> {
        let session = self.session()?;
        session
            .request(Command::Pause(PauseArguments { thread_id: self.id }))
            .await?;
        Ok(())
    }

    pub async fn continue_(&self) -> Result<()> {
        let session = self.session()?;
        session
            .request(Command::Continue(ContinueArguments {
                thread_id: self.id,
                single_thread: Some(true),
            }))
            .await?;
        self.resumed_by_request();
        Ok(())
    }

    pub async fn step_over(&self) -> Result<()> {
        let session = self.session()?;
        session
            .request(Command::Next(NextArguments {
                thread_id: self.id,
                single_thread: Some(true),
                granularity: Some(SteppingGranularity::Line),
            }))
            .await?;
        self.resumed_by_request();
        Ok(())
    }

    pub async fn step_in(&self) -> Result<()> {
        let session = self.session()?;
        session
            .request(Command::StepIn(StepInArguments {
                thread_id: self.id,
                single_thread: Some(true),
                target_id: None,
                granularity: Some(SteppingGranularity::Line),
            }))
            .await?;
        self.resumed_by_request();
        Ok(())
    }

    pub async fn step_out(&self) -> Result<()> {
        let session = self.session()?;
        session
            .request(Command::StepOut(StepOutArguments {
                thread_id: self.id,
                single_thread: Some(true),
                granularity: Some(SteppingGranularity::Line),
            }))
            .await?;
        self.resumed_by_request();
        Ok(())
    }

    /// Details of the exception this thread stopped on. Requires the
    /// `exceptionInfo` capability.
    pub async fn exception_info(&self) -> Result<ExceptionInfoResponse> {
        let session = self.session()?;
        if !session
            .capabilities()
            .supports_exception_info_request
            .unwrap_or(false)
        {
            return Err(ClientError::Capability("exceptionInfo"));
        }
        let body = session
            .request(Command::ExceptionInfo(ExceptionInfoArguments {
                thread_id: self.id,
            }))
            .await?;
        Response::parse(body)
    }

    /// Adapters are not required to emit `continued` after a resume-style
    /// request succeeds, so infer the transition; a duplicate event later
    /// is harmless because the stop flag already flipped.
    fn resumed_by_request(&self) {
        if self.stopped() {
            self.handle_continued(&ContinuedEventBody {
                thread_id: self.id,
                all_threads_continued: None,
            });
        }
    }
}
