//! The reconciliation engine between user breakpoints and adapter state.
//!
//! All adapter traffic happens per source: `setBreakpoints` replaces the
//! whole set for one source in one session, and its response lines up with
//! the request by array index. The manager batches changes in a short
//! debounce window, keeps at most one request in flight per
//! (source, session), and carries adapter-assigned ids and adjusted
//! positions forward so re-syncs do not reset adapter-side state.

use std::sync::{Arc, Weak};
use std::time::Duration;

use itertools::Itertools;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::breakpoints::{
    Binding, Breakpoint, BreakpointEvent, BreakpointOptions, Breakpoints, Bindings,
};
use crate::errors::{ClientError, Result};
use crate::events::EventBody;
use crate::hookable::{Hookable, HookOptions};
use crate::requests::{Command, SetBreakpointsArguments};
use crate::responses::{Response, SetBreakpointsResponse};
use crate::session::{Session, SessionState, INTERNAL_PRIORITY};
use crate::source::{Location, SourceId};
use crate::types::{self, SourceBreakpoint, StoppedEventReason};

/// Changes within this window collapse into one sync per (source, session).
pub const SYNC_DEBOUNCE: Duration = Duration::from_millis(50);

/// Runs after the session's own bookkeeping but before user listeners.
const SOURCE_SYNC_PRIORITY: i32 = INTERNAL_PRIORITY - 10;
/// Runs after user listeners but before the session tears itself down.
const TEARDOWN_SWEEP_PRIORITY: i32 = 10;

type SyncKey = (SourceId, i64);

pub struct BreakpointManager {
    breakpoints: Mutex<Breakpoints>,
    bindings: Mutex<Bindings>,
    sessions: Mutex<Vec<Weak<Session>>>,
    /// Keys waiting out the debounce window.
    pending: Mutex<FxHashSet<SyncKey>>,
    /// Keys with a request in flight.
    syncing: Mutex<FxHashSet<SyncKey>>,
    /// Keys that changed while their request was in flight.
    dirty: Mutex<FxHashSet<SyncKey>>,
    events: Hookable<BreakpointEvent>,
    debounce: Duration,
}

impl BreakpointManager {
    pub fn new() -> Arc<Self> {
        Self::with_debounce(SYNC_DEBOUNCE)
    }

    pub fn with_debounce(debounce: Duration) -> Arc<Self> {
        Arc::new(Self {
            breakpoints: Mutex::new(Breakpoints::default()),
            bindings: Mutex::new(Bindings::default()),
            sessions: Mutex::new(Vec::new()),
            pending: Mutex::new(FxHashSet::default()),
            syncing: Mutex::new(FxHashSet::default()),
            dirty: Mutex::new(FxHashSet::default()),
            events: Hookable::new(),
            debounce,
        })
    }

    /// The manager-level event bus: `added`, `syncFailed`.
    pub fn events(&self) -> &Hookable<BreakpointEvent> {
        &self.events
    }

    // ------------------------------------------------------------------
    // Queries

    pub fn breakpoints(&self) -> Vec<Arc<Breakpoint>> {
        self.breakpoints.lock().all()
    }

    pub fn breakpoint_count(&self) -> usize {
        self.breakpoints.lock().len()
    }

    pub fn breakpoints_at_source(&self, source: &SourceId) -> Vec<Arc<Breakpoint>> {
        self.breakpoints.lock().at_source(source)
    }

    /// Breakpoints whose requested-or-actual span covers `query`; see
    /// [`Breakpoints::at_location`].
    pub fn breakpoints_at_location(&self, query: &Location) -> Vec<Arc<Breakpoint>> {
        let breakpoints = self.breakpoints.lock();
        let bindings = self.bindings.lock();
        breakpoints.at_location(query, &bindings)
    }

    pub fn find_binding(&self, breakpoint: &Arc<Breakpoint>, session: &Arc<Session>) -> Option<Arc<Binding>> {
        self.bindings.lock().find(breakpoint.id(), session.id())
    }

    pub fn bindings_for_session(&self, session_id: i64) -> Vec<Arc<Binding>> {
        self.bindings.lock().for_session(session_id)
    }

    pub fn bindings_for_source(&self, source: &SourceId) -> Vec<Arc<Binding>> {
        self.bindings.lock().for_source(source)
    }

    // ------------------------------------------------------------------
    // Mutations

    /// Creates a breakpoint at `location`, or returns the existing one
    /// when the location (after smart placement) is already taken. Queues
    /// a sync for every attached session that has the source loaded.
    pub async fn add_breakpoint(
        self: &Arc<Self>,
        location: Location,
        options: BreakpointOptions,
    ) -> Arc<Breakpoint> {
        let location = self.smart_place(location).await;
        let id = location.to_string();
        if let Some(existing) = self.breakpoints.lock().get(&id) {
            return existing;
        }
        let breakpoint = Breakpoint::new(location, options);
        self.events.adopt(Box::new(breakpoint.events().clone()));
        self.breakpoints.lock().insert(Arc::clone(&breakpoint));
        tracing::debug!(breakpoint = %breakpoint.id(), "breakpoint added");
        self.events
            .emit("added", &BreakpointEvent::Added(Arc::clone(&breakpoint)));
        self.enqueue_for_breakpoint(&breakpoint);
        breakpoint
    }

    /// Destroys a breakpoint. Its bindings are removed immediately; the
    /// queued syncs then omit the breakpoint, which makes the adapters
    /// drop their side of it.
    pub fn remove_breakpoint(self: &Arc<Self>, breakpoint: &Arc<Breakpoint>) {
        let Some(breakpoint) = self.breakpoints.lock().remove(breakpoint.id()) else {
            return;
        };
        tracing::debug!(breakpoint = %breakpoint.id(), "breakpoint removed");

        let stale: Vec<Arc<Binding>> = {
            let mut bindings = self.bindings.lock();
            let sessions: Vec<i64> = bindings
                .for_breakpoint(breakpoint.id())
                .iter()
                .map(|binding| binding.session_id())
                .collect();
            sessions
                .into_iter()
                .filter_map(|session_id| bindings.remove(breakpoint.id(), session_id))
                .collect()
        };
        let affected: Vec<i64> = stale.iter().map(|binding| binding.session_id()).collect();
        for binding in stale {
            binding
                .events()
                .emit("unbound", &BreakpointEvent::Unbound(Arc::clone(&binding)));
            binding.events().destroy();
        }

        breakpoint
            .events()
            .emit("removed", &BreakpointEvent::Removed(Arc::clone(&breakpoint)));
        breakpoint.events().destroy();

        for session_id in affected {
            self.enqueue((breakpoint.source_id().clone(), session_id));
        }
    }

    /// Removes the breakpoint that spans `location`, or creates one there.
    pub async fn toggle_breakpoint(self: &Arc<Self>, location: Location) -> Option<Arc<Breakpoint>> {
        let matching = self.breakpoints_at_location(&location);
        if !matching.is_empty() {
            for breakpoint in matching {
                self.remove_breakpoint(&breakpoint);
            }
            return None;
        }
        Some(self.add_breakpoint(location, BreakpointOptions::default()).await)
    }

    pub fn set_condition(self: &Arc<Self>, breakpoint: &Arc<Breakpoint>, condition: Option<String>) {
        breakpoint.set_condition(condition);
        breakpoint.events().emit(
            "conditionChanged",
            &BreakpointEvent::ConditionChanged(Arc::clone(breakpoint)),
        );
        self.enqueue_for_breakpoint(breakpoint);
    }

    pub fn set_hit_condition(
        self: &Arc<Self>,
        breakpoint: &Arc<Breakpoint>,
        hit_condition: Option<String>,
    ) {
        breakpoint.set_hit_condition(hit_condition);
        breakpoint.events().emit(
            "hitConditionChanged",
            &BreakpointEvent::HitConditionChanged(Arc::clone(breakpoint)),
        );
        self.enqueue_for_breakpoint(breakpoint);
    }

    pub fn set_log_message(
        self: &Arc<Self>,
        breakpoint: &Arc<Breakpoint>,
        log_message: Option<String>,
    ) {
        breakpoint.set_log_message(log_message);
        breakpoint.events().emit(
            "logMessageChanged",
            &BreakpointEvent::LogMessageChanged(Arc::clone(breakpoint)),
        );
        self.enqueue_for_breakpoint(breakpoint);
    }

    pub fn set_enabled(self: &Arc<Self>, breakpoint: &Arc<Breakpoint>, enabled: bool) {
        breakpoint.set_enabled(enabled);
        self.enqueue_for_breakpoint(breakpoint);
    }

    // ------------------------------------------------------------------
    // Listener sugar. Each of these builds the cross-layer hierarchy for
    // the caller: manager → breakpoint → binding.

    /// Called for every breakpoint that comes into existence.
    pub fn on_breakpoint<F>(&self, mut listener: F)
    where
        F: FnMut(&Arc<Breakpoint>) + Send + 'static,
    {
        self.events.on(
            "added",
            move |event| {
                if let BreakpointEvent::Added(breakpoint) = event {
                    listener(breakpoint);
                }
                None
            },
            HookOptions::default(),
        );
    }

    /// Called for every binding of every breakpoint.
    pub fn on_binding<F>(&self, listener: F)
    where
        F: Fn(&Arc<Binding>) + Send + Sync + 'static,
    {
        let listener = Arc::new(listener);
        self.on_breakpoint(move |breakpoint| {
            let listener = Arc::clone(&listener);
            breakpoint.on_binding(move |binding| listener(binding));
        });
    }

    /// Called whenever execution stops on any binding.
    pub fn on_binding_hit<F>(&self, listener: F)
    where
        F: Fn(&Arc<Binding>, &Location) + Send + Sync + 'static,
    {
        let listener = Arc::new(listener);
        self.on_binding(move |binding| {
            let listener = Arc::clone(&listener);
            binding.on_hit(move |binding, location| listener(binding, location));
        });
    }

    /// Called when any binding goes away.
    pub fn on_binding_unbound<F>(&self, listener: F)
    where
        F: Fn(&Arc<Binding>) + Send + Sync + 'static,
    {
        let listener = Arc::new(listener);
        self.on_binding(move |binding| {
            let listener = Arc::clone(&listener);
            binding.on_unbound(move |binding| listener(binding));
        });
    }

    /// Called when any breakpoint is removed.
    pub fn on_breakpoint_removed<F>(&self, listener: F)
    where
        F: Fn(&Arc<Breakpoint>) + Send + Sync + 'static,
    {
        let listener = Arc::new(listener);
        self.on_breakpoint(move |breakpoint| {
            let listener = Arc::clone(&listener);
            breakpoint.on_removed(move |breakpoint| listener(breakpoint));
        });
    }

    /// Called when a `setBreakpoints` round-trip fails with an adapter
    /// error. The binding set is left untouched.
    pub fn on_sync_failed<F>(&self, mut listener: F)
    where
        F: FnMut(&SourceId, i64, &str) + Send + 'static,
    {
        self.events.on(
            "syncFailed",
            move |event| {
                if let BreakpointEvent::SyncFailed {
                    source,
                    session_id,
                    error,
                } = event
                {
                    listener(source, *session_id, error);
                }
                None
            },
            HookOptions::default(),
        );
    }

    // ------------------------------------------------------------------
    // Session wiring

    /// Attaches a session: hit detection, source-load syncs, and binding
    /// teardown when the session ends.
    pub fn attach_session(self: &Arc<Self>, session: &Arc<Session>) {
        self.sessions.lock().push(Arc::downgrade(session));
        let session_id = session.id();

        let weak = Arc::downgrade(self);
        session.events().on(
            "stopped",
            move |event| {
                let Some(manager) = weak.upgrade() else { return None };
                let EventBody::Stopped(body) = event else { return None };
                if body.reason == StoppedEventReason::Breakpoint {
                    manager.detect_hits(session_id, body.hit_breakpoint_ids.as_deref());
                }
                None
            },
            HookOptions::named("breakpoints:hits"),
        );

        let weak = Arc::downgrade(self);
        session.events().on(
            "loadedSource",
            move |event| {
                let Some(manager) = weak.upgrade() else { return None };
                let EventBody::LoadedSource(body) = event else { return None };
                let Some(source_id) = SourceId::from_descriptor(session_id, &body.source) else {
                    return None;
                };
                if !manager.breakpoints.lock().at_source(&source_id).is_empty() {
                    manager.enqueue((source_id, session_id));
                }
                None
            },
            HookOptions::named("breakpoints:sources").priority(SOURCE_SYNC_PRIORITY),
        );

        let weak = Arc::downgrade(self);
        session.events().on(
            "terminated",
            move |_| {
                if let Some(manager) = weak.upgrade() {
                    manager.drop_session(session_id);
                }
                None
            },
            HookOptions::named("breakpoints:teardown")
                .priority(TEARDOWN_SWEEP_PRIORITY)
                .permanent(),
        );
    }

    fn detect_hits(self: &Arc<Self>, session_id: i64, hit_ids: Option<&[i64]>) {
        let Some(hit_ids) = hit_ids else { return };
        for id in hit_ids {
            let binding = self.bindings.lock().by_adapter_id(session_id, *id);
            if let Some(binding) = binding {
                let location = binding.actual_location();
                tracing::debug!(breakpoint = %binding.breakpoint().id(), session = session_id, "breakpoint hit");
                binding.events().emit(
                    "hit",
                    &BreakpointEvent::Hit {
                        binding: Arc::clone(&binding),
                        location,
                    },
                );
            }
        }
    }

    fn drop_session(self: &Arc<Self>, session_id: i64) {
        self.sessions
            .lock()
            .retain(|weak| weak.upgrade().map(|s| s.id()) != Some(session_id));
        let removed = self.bindings.lock().remove_session(session_id);
        for binding in removed {
            binding
                .events()
                .emit("unbound", &BreakpointEvent::Unbound(Arc::clone(&binding)));
            binding.events().destroy();
        }
        let drop_keys = |set: &mut FxHashSet<SyncKey>| {
            set.retain(|(_, id)| *id != session_id);
        };
        drop_keys(&mut self.pending.lock());
        drop_keys(&mut self.dirty.lock());
    }

    fn live_sessions(&self) -> Vec<Arc<Session>> {
        let mut list = self.sessions.lock();
        list.retain(|weak| weak.strong_count() > 0);
        list.iter().filter_map(Weak::upgrade).collect()
    }

    fn session_by_id(&self, session_id: i64) -> Option<Arc<Session>> {
        self.live_sessions()
            .into_iter()
            .find(|session| session.id() == session_id)
    }

    // ------------------------------------------------------------------
    // Smart placement

    /// When a capable session has the source loaded, move the requested
    /// column to a position the adapter would accept anyway: the exact
    /// requested column when valid, otherwise the earliest valid position
    /// on the line. Prevents duplicate breakpoints that differ only by an
    /// adjustment the adapter would make on its own.
    async fn smart_place(&self, location: Location) -> Location {
        let sessions = self.live_sessions();
        if sessions.is_empty() {
            return Location::new(location.source.clone(), location.line, 0);
        }
        for session in sessions {
            if !session.supports_breakpoint_locations() {
                continue;
            }
            let Some(source) = session.source(&location.source) else {
                continue;
            };
            let Ok(valid) = source.breakpoint_locations(location.line).await else {
                continue;
            };
            let on_line: Vec<_> = valid
                .iter()
                .filter(|candidate| candidate.line == location.line)
                .collect();
            if let Some(exact) = on_line
                .iter()
                .find(|candidate| candidate.column.unwrap_or(0) == location.column)
            {
                return Location::new(location.source.clone(), exact.line, exact.column.unwrap_or(0));
            }
            if let Some(earliest) = on_line
                .iter()
                .min_by_key(|candidate| candidate.column.unwrap_or(0))
            {
                return Location::new(
                    location.source.clone(),
                    earliest.line,
                    earliest.column.unwrap_or(0),
                );
            }
        }
        location
    }

    // ------------------------------------------------------------------
    // Sync

    fn enqueue_for_breakpoint(self: &Arc<Self>, breakpoint: &Arc<Breakpoint>) {
        let source_id = breakpoint.source_id();
        let loaded: Vec<i64> = self
            .live_sessions()
            .into_iter()
            .filter(|session| session.source(source_id).is_some())
            .map(|session| session.id())
            .collect();
        let bound: Vec<i64> = self
            .bindings
            .lock()
            .for_breakpoint(breakpoint.id())
            .iter()
            .map(|binding| binding.session_id())
            .collect();
        for session_id in loaded.into_iter().chain(bound).unique() {
            self.enqueue((source_id.clone(), session_id));
        }
    }

    fn enqueue(self: &Arc<Self>, key: SyncKey) {
        if self.syncing.lock().contains(&key) {
            self.dirty.lock().insert(key);
            return;
        }
        if !self.pending.lock().insert(key.clone()) {
            return;
        }
        let weak = Arc::downgrade(self);
        let debounce = self.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let Some(manager) = weak.upgrade() else { return };
            manager.pending.lock().remove(&key);
            manager.run_sync(key).await;
        });
    }

    /// Serialized per key: one request in flight, changes during the
    /// flight collapse into one follow-up round.
    async fn run_sync(self: &Arc<Self>, key: SyncKey) {
        {
            let mut syncing = self.syncing.lock();
            if syncing.contains(&key) {
                self.dirty.lock().insert(key);
                return;
            }
            syncing.insert(key.clone());
        }
        loop {
            match self.sync_once(&key).await {
                Ok(()) => {}
                Err(ClientError::Adapter { message, .. }) => {
                    tracing::debug!(source = %key.0, session = key.1, "setBreakpoints rejected: {message}");
                    self.events.emit(
                        "syncFailed",
                        &BreakpointEvent::SyncFailed {
                            source: key.0.clone(),
                            session_id: key.1,
                            error: message,
                        },
                    );
                }
                Err(err) => {
                    // Session died mid-sync; the reconciliation is simply
                    // dropped.
                    tracing::debug!(source = %key.0, session = key.1, "breakpoint sync dropped: {err}");
                }
            }
            if !self.dirty.lock().remove(&key) {
                break;
            }
        }
        self.syncing.lock().remove(&key);
    }

    async fn sync_once(self: &Arc<Self>, key: &SyncKey) -> Result<()> {
        let (source_id, session_id) = key;
        let Some(session) = self.session_by_id(*session_id) else {
            return Ok(());
        };
        if session.state() == SessionState::Terminated {
            return Ok(());
        }

        let descriptor = match session.source(source_id) {
            Some(source) => source.descriptor(),
            None => match source_id {
                SourceId::File(path) => types::Source {
                    path: Some(path.display().to_string()),
                    ..Default::default()
                },
                SourceId::Reference { .. } => return Ok(()),
            },
        };

        // The plan fixes the request order; the response is reconciled
        // strictly by the same index.
        let plan: Vec<(Arc<Breakpoint>, Option<Arc<Binding>>)> = {
            let breakpoints = self.breakpoints.lock();
            let bindings = self.bindings.lock();
            breakpoints
                .at_source(source_id)
                .into_iter()
                .filter(|breakpoint| breakpoint.enabled())
                .map(|breakpoint| {
                    let binding = bindings.find(breakpoint.id(), *session_id);
                    (breakpoint, binding)
                })
                .collect()
        };

        let supports_condition = session.supports_conditional_breakpoints();
        let supports_hit_condition = session.supports_hit_conditional_breakpoints();
        let supports_log_points = session.supports_log_points();

        let entries: Vec<SourceBreakpoint> = plan
            .iter()
            .map(|(breakpoint, binding)| {
                // An existing binding re-announces the adapter's own id and
                // adjusted position so the adapter keeps its state for it.
                let (line, column, id) = match binding {
                    Some(binding) => (
                        binding.actual_line(),
                        binding.actual_column(),
                        binding.adapter_id(),
                    ),
                    None => (breakpoint.location().line, breakpoint.location().column, None),
                };
                SourceBreakpoint {
                    id,
                    line,
                    column: (column > 0).then_some(column),
                    condition: if supports_condition {
                        breakpoint.condition()
                    } else {
                        None
                    },
                    hit_condition: if supports_hit_condition {
                        breakpoint.hit_condition()
                    } else {
                        None
                    },
                    log_message: if supports_log_points {
                        breakpoint.log_message()
                    } else {
                        None
                    },
                }
            })
            .collect();

        tracing::debug!(
            source = %source_id,
            session = session_id,
            count = entries.len(),
            "syncing breakpoints"
        );
        let body = session
            .request(Command::SetBreakpoints(SetBreakpointsArguments {
                source: descriptor,
                breakpoints: entries,
                source_modified: None,
            }))
            .await?;
        let response: SetBreakpointsResponse = Response::parse(body)?;

        for (index, (breakpoint, _)) in plan.iter().enumerate() {
            let Some(info) = response.breakpoints.get(index) else {
                tracing::debug!(
                    source = %source_id,
                    session = session_id,
                    "setBreakpoints response shorter than request"
                );
                break;
            };
            // The breakpoint may have been removed while the request was in
            // flight; the follow-up sync (queued by the removal) will tell
            // the adapter. Until then, no binding may reference it.
            if self.breakpoints.lock().get(breakpoint.id()).is_none() {
                continue;
            }
            let current = self.bindings.lock().find(breakpoint.id(), *session_id);
            if info.verified {
                match current {
                    Some(binding) => {
                        binding.update(info);
                        binding
                            .events()
                            .emit("bound", &BreakpointEvent::Bound(Arc::clone(&binding)));
                    }
                    None => {
                        let binding = Binding::new(breakpoint, *session_id, info);
                        self.bindings.lock().insert(Arc::clone(&binding));
                        breakpoint.events().emit(
                            "newBinding",
                            &BreakpointEvent::NewBinding(Arc::clone(&binding)),
                        );
                        binding
                            .events()
                            .emit("bound", &BreakpointEvent::Bound(Arc::clone(&binding)));
                    }
                }
            } else if let Some(binding) = current {
                // The adapter withdrew its verification.
                self.bindings.lock().remove(breakpoint.id(), *session_id);
                binding
                    .events()
                    .emit("unbound", &BreakpointEvent::Unbound(Arc::clone(&binding)));
                binding.events().destroy();
            }
        }

        // Bindings in this source whose breakpoint was not part of the
        // request (disabled or racing a removal) are orphaned adapter-side.
        let requested: FxHashSet<&str> = plan
            .iter()
            .map(|(breakpoint, _)| breakpoint.id())
            .collect();
        let orphans: Vec<Arc<Binding>> = self
            .bindings
            .lock()
            .for_session(*session_id)
            .into_iter()
            .filter(|binding| {
                binding.breakpoint().source_id() == source_id
                    && !requested.contains(binding.breakpoint().id())
            })
            .collect();
        for binding in orphans {
            self.bindings
                .lock()
                .remove(binding.breakpoint().id(), *session_id);
            binding
                .events()
                .emit("unbound", &BreakpointEvent::Unbound(Arc::clone(&binding)));
            binding.events().destroy();
        }
        Ok(())
    }

    /// Tears down the listener surface and with it every breakpoint's and
    /// binding's hookable.
    pub(crate) fn destroy(&self) {
        self.events.destroy();
    }
}
