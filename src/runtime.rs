//! The top-level handle. One `Runtime` per client instance: it owns the
//! session registry and the breakpoint manager and wires new sessions
//! (children included) into the breakpoint engine.

use std::sync::Arc;

use crate::breakpoint_manager::BreakpointManager;
use crate::errors::Result;
use crate::manager::SessionManager;
use crate::session::{Session, SessionOptions};
use crate::transport::AdapterConfig;

pub struct Runtime {
    sessions: Arc<SessionManager>,
    breakpoints: Arc<BreakpointManager>,
}

impl Runtime {
    pub fn new() -> Arc<Self> {
        let sessions = SessionManager::new();
        let breakpoints = BreakpointManager::new();

        let attach = Arc::clone(&breakpoints);
        sessions.on_session(move |session| {
            attach.attach_session(session);
        });

        Arc::new(Self {
            sessions,
            breakpoints,
        })
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn breakpoints(&self) -> &Arc<BreakpointManager> {
        &self.breakpoints
    }

    /// Connects to an adapter, runs the startup sequence, and returns the
    /// ready session. Child sessions the adapter spawns through
    /// `startDebugging` are attached to the same managers automatically.
    pub async fn start(&self, adapter: AdapterConfig, options: SessionOptions) -> Result<Arc<Session>> {
        let session = Session::spawn(&self.sessions, adapter, options, None).await?;
        session.start().await?;
        Ok(session)
    }

    /// Terminates every root session (cascading through their children)
    /// and tears down both managers.
    pub async fn shutdown(&self) {
        for root in self.sessions.roots() {
            let _ = root.terminate().await;
        }
        self.breakpoints.destroy();
        self.sessions.destroy();
    }
}
