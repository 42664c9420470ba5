//! Stack snapshots. A stack is a point-in-time view of a stopped thread;
//! the owning thread invalidates it on resume or exit, and invalidation
//! cascades: frames of an invalid stack refuse to fetch anything further.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::errors::{ClientError, Result};
use crate::requests::{Command, EvaluateArguments, ScopesArguments};
use crate::responses::{EvaluateResponse, Response, ScopesResponse};
use crate::session::Session;
use crate::source::SourceId;
use crate::types::StackFrame;
use crate::variables::Scope;

pub struct Stack {
    thread_id: i64,
    valid: Arc<AtomicBool>,
    frames: Vec<Arc<Frame>>,
}

impl Stack {
    pub(crate) fn new(session: &Arc<Session>, thread_id: i64, frames: Vec<StackFrame>) -> Arc<Self> {
        let valid = Arc::new(AtomicBool::new(true));
        let frames = frames
            .into_iter()
            .map(|info| Frame::new(session, Arc::clone(&valid), info))
            .collect();
        Arc::new(Self {
            thread_id,
            valid,
            frames,
        })
    }

    pub fn thread_id(&self) -> i64 {
        self.thread_id
    }

    pub fn valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    /// Marks the snapshot stale. Cascades to every frame.
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    /// Frames ordered innermost first, as the adapter reported them.
    pub fn frames(&self) -> &[Arc<Frame>] {
        &self.frames
    }

    /// The innermost frame.
    pub fn top(&self) -> Option<Arc<Frame>> {
        self.frames.first().cloned()
    }

    fn position_of(&self, frame_id: i64) -> Option<usize> {
        self.frames.iter().position(|frame| frame.id() == frame_id)
    }

    /// The frame one step towards the outermost caller of `frame_id`.
    pub fn up_of(&self, frame_id: i64) -> Option<Arc<Frame>> {
        let index = self.position_of(frame_id)?;
        self.frames.get(index + 1).cloned()
    }

    /// The frame one step towards the innermost callee of `frame_id`.
    pub fn down_of(&self, frame_id: i64) -> Option<Arc<Frame>> {
        let index = self.position_of(frame_id)?;
        index.checked_sub(1).and_then(|i| self.frames.get(i)).cloned()
    }

    /// Frames whose source matches `source_id`.
    pub fn frames_for_source(&self, source_id: &SourceId) -> Vec<Arc<Frame>> {
        self.frames
            .iter()
            .filter(|frame| frame.source_id().as_ref() == Some(source_id))
            .cloned()
            .collect()
    }
}

pub struct Frame {
    session: Weak<Session>,
    session_id: i64,
    stack_valid: Arc<AtomicBool>,
    info: StackFrame,
    scopes: parking_lot::Mutex<Option<Vec<Arc<Scope>>>>,
}

impl Frame {
    fn new(session: &Arc<Session>, stack_valid: Arc<AtomicBool>, info: StackFrame) -> Arc<Self> {
        Arc::new(Self {
            session: Arc::downgrade(session),
            session_id: session.id(),
            stack_valid,
            info,
            scopes: parking_lot::Mutex::new(None),
        })
    }

    pub fn id(&self) -> i64 {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn line(&self) -> i64 {
        self.info.line
    }

    pub fn column(&self) -> i64 {
        self.info.column
    }

    pub fn info(&self) -> &StackFrame {
        &self.info
    }

    pub fn valid(&self) -> bool {
        self.stack_valid.load(Ordering::SeqCst)
    }

    /// The identifier of this frame's source, when it has one.
    pub fn source_id(&self) -> Option<SourceId> {
        self.info
            .source
            .as_ref()
            .and_then(|source| SourceId::from_descriptor(self.session_id, source))
    }

    fn guard(&self) -> Result<Arc<Session>> {
        if !self.valid() {
            return Err(ClientError::InvalidStack);
        }
        self.session.upgrade().ok_or(ClientError::Terminated)
    }

    /// The scopes of this frame, fetched on first use.
    pub async fn scopes(&self) -> Result<Vec<Arc<Scope>>> {
        if let Some(scopes) = self.scopes.lock().clone() {
            return Ok(scopes);
        }
        let session = self.guard()?;
        let body = session
            .request(Command::Scopes(ScopesArguments {
                frame_id: self.info.id,
            }))
            .await?;
        let response: ScopesResponse = Response::parse(body)?;
        let scopes: Vec<Arc<Scope>> = response
            .scopes
            .into_iter()
            .map(|info| Scope::new(&session, Arc::clone(&self.stack_valid), info))
            .collect();
        *self.scopes.lock() = Some(scopes.clone());
        Ok(scopes)
    }

    /// Evaluates `expression` in this frame.
    pub async fn evaluate(
        &self,
        expression: impl Into<String>,
        context: Option<&str>,
    ) -> Result<EvaluateResponse> {
        let session = self.guard()?;
        let body = session
            .request(Command::Evaluate(EvaluateArguments {
                expression: expression.into(),
                frame_id: Some(self.info.id),
                context: context.map(str::to_string),
            }))
            .await?;
        Response::parse(body)
    }
}
