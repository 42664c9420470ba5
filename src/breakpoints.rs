//! Breakpoints and bindings. A `Breakpoint` is what the user asked for:
//! a location plus optional condition state, identified by its location
//! key, alive across sessions. A `Binding` is the adapter-verified
//! projection of one breakpoint inside one session; it exists only after
//! a `setBreakpoints` response confirmed it, never in a pending state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::hookable::Hookable;
use crate::source::{Location, SourceId};
use crate::types::BreakpointInfo;

/// Payload of the breakpoint-layer hookables (manager, breakpoint, and
/// binding level).
#[derive(Clone)]
pub enum BreakpointEvent {
    /// A breakpoint came into existence (manager level).
    Added(Arc<Breakpoint>),
    /// The breakpoint was removed by user action (breakpoint level).
    Removed(Arc<Breakpoint>),
    ConditionChanged(Arc<Breakpoint>),
    HitConditionChanged(Arc<Breakpoint>),
    LogMessageChanged(Arc<Breakpoint>),
    /// A new binding appeared for a breakpoint (breakpoint level).
    NewBinding(Arc<Binding>),
    /// The adapter confirmed (or re-confirmed, possibly moving) a binding
    /// (binding level).
    Bound(Arc<Binding>),
    /// The binding is gone: its breakpoint or session went away, or the
    /// adapter withdrew verification (binding level).
    Unbound(Arc<Binding>),
    /// Execution stopped on this binding (binding level).
    Hit {
        binding: Arc<Binding>,
        location: Location,
    },
    /// A `setBreakpoints` round-trip failed; the binding set was left as
    /// it was (manager level).
    SyncFailed {
        source: SourceId,
        session_id: i64,
        error: String,
    },
}

/// Optional user state attached to a breakpoint at creation.
#[derive(Debug, Clone, Default)]
pub struct BreakpointOptions {
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
}

pub struct Breakpoint {
    id: String,
    location: Location,
    condition: Mutex<Option<String>>,
    hit_condition: Mutex<Option<String>>,
    log_message: Mutex<Option<String>>,
    enabled: AtomicBool,
    events: Hookable<BreakpointEvent>,
}

impl Breakpoint {
    pub(crate) fn new(location: Location, options: BreakpointOptions) -> Arc<Self> {
        Arc::new(Self {
            id: location.to_string(),
            location,
            condition: Mutex::new(options.condition),
            hit_condition: Mutex::new(options.hit_condition),
            log_message: Mutex::new(options.log_message),
            enabled: AtomicBool::new(true),
            events: Hookable::new(),
        })
    }

    /// The stable identity: the location key this breakpoint was created
    /// with. Condition changes never change it.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn source_id(&self) -> &SourceId {
        &self.location.source
    }

    pub fn condition(&self) -> Option<String> {
        self.condition.lock().clone()
    }

    pub fn hit_condition(&self) -> Option<String> {
        self.hit_condition.lock().clone()
    }

    pub fn log_message(&self) -> Option<String> {
        self.log_message.lock().clone()
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub(crate) fn set_condition(&self, condition: Option<String>) {
        *self.condition.lock() = condition;
    }

    pub(crate) fn set_hit_condition(&self, hit_condition: Option<String>) {
        *self.hit_condition.lock() = hit_condition;
    }

    pub(crate) fn set_log_message(&self, log_message: Option<String>) {
        *self.log_message.lock() = log_message;
    }

    /// The breakpoint's own event bus: `newBinding`, `conditionChanged`,
    /// `hitConditionChanged`, `logMessageChanged`, `removed`.
    pub fn events(&self) -> &Hookable<BreakpointEvent> {
        &self.events
    }

    /// Registers `listener` for every binding this breakpoint acquires.
    pub fn on_binding<F>(&self, mut listener: F)
    where
        F: FnMut(&Arc<Binding>) + Send + 'static,
    {
        self.events.on(
            "newBinding",
            move |event| {
                if let BreakpointEvent::NewBinding(binding) = event {
                    listener(binding);
                }
                None
            },
            Default::default(),
        );
    }

    /// Registers `listener` for this breakpoint's removal.
    pub fn on_removed<F>(&self, mut listener: F)
    where
        F: FnMut(&Arc<Breakpoint>) + Send + 'static,
    {
        self.events.on(
            "removed",
            move |event| {
                if let BreakpointEvent::Removed(breakpoint) = event {
                    listener(breakpoint);
                }
                None
            },
            Default::default(),
        );
    }
}

/// The verified projection of one breakpoint in one session.
pub struct Binding {
    breakpoint: Arc<Breakpoint>,
    session_id: i64,
    adapter_id: Mutex<Option<i64>>,
    requested_line: i64,
    requested_column: i64,
    actual: Mutex<(i64, i64)>,
    events: Hookable<BreakpointEvent>,
}

impl Binding {
    pub(crate) fn new(
        breakpoint: &Arc<Breakpoint>,
        session_id: i64,
        info: &BreakpointInfo,
    ) -> Arc<Self> {
        let requested = breakpoint.location();
        let binding = Arc::new(Self {
            breakpoint: Arc::clone(breakpoint),
            session_id,
            adapter_id: Mutex::new(info.id),
            requested_line: requested.line,
            requested_column: requested.column,
            actual: Mutex::new((
                info.line.unwrap_or(requested.line),
                info.column.unwrap_or(requested.column),
            )),
            events: Hookable::scoped_under(breakpoint.events()),
        });
        binding
    }

    pub fn breakpoint(&self) -> &Arc<Breakpoint> {
        &self.breakpoint
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    /// The id the adapter assigned, echoed back on re-sync so the adapter
    /// keeps its state (hit counts and the like) for this breakpoint.
    pub fn adapter_id(&self) -> Option<i64> {
        *self.adapter_id.lock()
    }

    /// A binding only exists once verified.
    pub fn verified(&self) -> bool {
        true
    }

    pub fn requested_line(&self) -> i64 {
        self.requested_line
    }

    pub fn requested_column(&self) -> i64 {
        self.requested_column
    }

    pub fn actual_line(&self) -> i64 {
        self.actual.lock().0
    }

    pub fn actual_column(&self) -> i64 {
        self.actual.lock().1
    }

    /// Where the breakpoint actually sits in this session.
    pub fn actual_location(&self) -> Location {
        let (line, column) = *self.actual.lock();
        Location::new(self.breakpoint.source_id().clone(), line, column)
    }

    pub(crate) fn update(&self, info: &BreakpointInfo) {
        if info.id.is_some() {
            *self.adapter_id.lock() = info.id;
        }
        let mut actual = self.actual.lock();
        actual.0 = info.line.unwrap_or(self.requested_line);
        actual.1 = info.column.unwrap_or(self.requested_column);
    }

    /// The binding's own event bus: `bound`, `hit`, `unbound`.
    pub fn events(&self) -> &Hookable<BreakpointEvent> {
        &self.events
    }

    /// Registers `listener` for hits on this binding.
    pub fn on_hit<F>(&self, mut listener: F)
    where
        F: FnMut(&Arc<Binding>, &Location) + Send + 'static,
    {
        self.events.on(
            "hit",
            move |event| {
                if let BreakpointEvent::Hit { binding, location } = event {
                    listener(binding, location);
                }
                None
            },
            Default::default(),
        );
    }

    /// Registers `listener` for this binding's removal.
    pub fn on_unbound<F>(&self, mut listener: F)
    where
        F: FnMut(&Arc<Binding>) + Send + 'static,
    {
        self.events.on(
            "unbound",
            move |event| {
                if let BreakpointEvent::Unbound(binding) = event {
                    listener(binding);
                }
                None
            },
            Default::default(),
        );
    }
}

/// The application-wide breakpoint set: unique by id, indexed by source.
#[derive(Default)]
pub struct Breakpoints {
    by_id: FxHashMap<String, Arc<Breakpoint>>,
    order: Vec<String>,
    by_source: FxHashMap<SourceId, Vec<String>>,
}

impl Breakpoints {
    pub fn insert(&mut self, breakpoint: Arc<Breakpoint>) {
        let id = breakpoint.id().to_string();
        if self.by_id.contains_key(&id) {
            return;
        }
        self.by_source
            .entry(breakpoint.source_id().clone())
            .or_default()
            .push(id.clone());
        self.order.push(id.clone());
        self.by_id.insert(id, breakpoint);
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<Breakpoint>> {
        let breakpoint = self.by_id.remove(id)?;
        self.order.retain(|entry| entry != id);
        if let Some(ids) = self.by_source.get_mut(breakpoint.source_id()) {
            ids.retain(|entry| entry != id);
            if ids.is_empty() {
                self.by_source.remove(breakpoint.source_id());
            }
        }
        Some(breakpoint)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Breakpoint>> {
        self.by_id.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// All breakpoints, in creation order.
    pub fn all(&self) -> Vec<Arc<Breakpoint>> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id).cloned())
            .collect()
    }

    /// The breakpoints within one source, in creation order.
    pub fn at_source(&self, source: &SourceId) -> Vec<Arc<Breakpoint>> {
        self.by_source
            .get(source)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The breakpoints whose requested-or-actual span covers `query`.
    ///
    /// A breakpoint visibly sits wherever the adapter moved it, which may
    /// differ per session; the span from the requested position to each
    /// binding's actual position (closed, ordered by line then column) is
    /// what a user can click on to mean "this breakpoint".
    pub fn at_location(&self, query: &Location, bindings: &Bindings) -> Vec<Arc<Breakpoint>> {
        self.at_source(&query.source)
            .into_iter()
            .filter(|breakpoint| {
                let requested = (breakpoint.location().line, breakpoint.location().column);
                let point = (query.line, query.column);
                let spans = bindings.for_breakpoint(breakpoint.id());
                if spans.is_empty() {
                    return requested == point;
                }
                spans.iter().any(|binding| {
                    let actual = (binding.actual_line(), binding.actual_column());
                    span_contains(requested, actual, point)
                })
            })
            .collect()
    }
}

fn span_contains(a: (i64, i64), b: (i64, i64), point: (i64, i64)) -> bool {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    low <= point && point <= high
}

/// Session-scoped verified state, unique per (breakpoint, session).
#[derive(Default)]
pub struct Bindings {
    by_key: FxHashMap<(String, i64), Arc<Binding>>,
    by_session: FxHashMap<i64, Vec<String>>,
}

impl Bindings {
    pub fn insert(&mut self, binding: Arc<Binding>) {
        let key = (binding.breakpoint().id().to_string(), binding.session_id());
        if self.by_key.contains_key(&key) {
            self.remove(&key.0, key.1);
        }
        self.by_session
            .entry(binding.session_id())
            .or_default()
            .push(key.0.clone());
        self.by_key.insert(key, binding);
    }

    pub fn find(&self, breakpoint_id: &str, session_id: i64) -> Option<Arc<Binding>> {
        self.by_key
            .get(&(breakpoint_id.to_string(), session_id))
            .cloned()
    }

    pub fn remove(&mut self, breakpoint_id: &str, session_id: i64) -> Option<Arc<Binding>> {
        let binding = self
            .by_key
            .remove(&(breakpoint_id.to_string(), session_id))?;
        if let Some(ids) = self.by_session.get_mut(&session_id) {
            ids.retain(|id| id != breakpoint_id);
            if ids.is_empty() {
                self.by_session.remove(&session_id);
            }
        }
        Some(binding)
    }

    pub fn for_session(&self, session_id: i64) -> Vec<Arc<Binding>> {
        self.by_session
            .get(&session_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.by_key.get(&(id.clone(), session_id)).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn for_breakpoint(&self, breakpoint_id: &str) -> Vec<Arc<Binding>> {
        self.by_key
            .iter()
            .filter(|((id, _), _)| id == breakpoint_id)
            .map(|(_, binding)| Arc::clone(binding))
            .collect()
    }

    pub fn for_source(&self, source: &SourceId) -> Vec<Arc<Binding>> {
        self.by_key
            .values()
            .filter(|binding| binding.breakpoint().source_id() == source)
            .cloned()
            .collect()
    }

    /// In a session: the binding the adapter knows under `adapter_id`.
    pub fn by_adapter_id(&self, session_id: i64, adapter_id: i64) -> Option<Arc<Binding>> {
        self.for_session(session_id)
            .into_iter()
            .find(|binding| binding.adapter_id() == Some(adapter_id))
    }

    /// Drains every binding of a session, e.g. when it terminates.
    pub fn remove_session(&mut self, session_id: i64) -> Vec<Arc<Binding>> {
        let ids = self.by_session.remove(&session_id).unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.by_key.remove(&(id.clone(), session_id)))
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<Binding>> {
        self.by_key.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breakpoint_at(line: i64, column: i64) -> Arc<Breakpoint> {
        Breakpoint::new(
            Location::in_file("/tmp/loop.js", line, column),
            BreakpointOptions::default(),
        )
    }

    fn verified(line: i64, column: i64) -> BreakpointInfo {
        BreakpointInfo {
            id: Some(1),
            verified: true,
            message: None,
            source: None,
            line: Some(line),
            column: Some(column),
            end_line: None,
            end_column: None,
            instruction_reference: None,
            offset: None,
        }
    }

    fn collections_with(
        breakpoint: &Arc<Breakpoint>,
        binding_pos: Option<(i64, i64)>,
    ) -> (Breakpoints, Bindings) {
        let mut breakpoints = Breakpoints::default();
        breakpoints.insert(Arc::clone(breakpoint));
        let mut bindings = Bindings::default();
        if let Some((line, column)) = binding_pos {
            bindings.insert(Binding::new(breakpoint, 1, &verified(line, column)));
        }
        (breakpoints, bindings)
    }

    fn query(line: i64, column: i64) -> Location {
        Location::in_file("/tmp/loop.js", line, column)
    }

    #[test]
    fn range_matching_spans_forward_adjustment() {
        // Requested 3:0, adapter moved it to 4:2.
        let breakpoint = breakpoint_at(3, 0);
        let (breakpoints, bindings) = collections_with(&breakpoint, Some((4, 2)));

        for (line, column) in [(3, 0), (3, 5), (3, 10), (4, 0), (4, 1), (4, 2)] {
            assert_eq!(
                breakpoints.at_location(&query(line, column), &bindings).len(),
                1,
                "expected {line}:{column} to match"
            );
        }
        for (line, column) in [(2, 0), (5, 0), (4, 3)] {
            assert_eq!(
                breakpoints.at_location(&query(line, column), &bindings).len(),
                0,
                "expected {line}:{column} not to match"
            );
        }
    }

    #[test]
    fn range_matching_spans_backward_adjustment() {
        // Requested 5:10, adapter moved it up to 3:2.
        let breakpoint = breakpoint_at(5, 10);
        let (breakpoints, bindings) = collections_with(&breakpoint, Some((3, 2)));

        for (line, column) in [(3, 2), (3, 5), (4, 0), (4, 15), (5, 0), (5, 10)] {
            assert_eq!(
                breakpoints.at_location(&query(line, column), &bindings).len(),
                1,
                "expected {line}:{column} to match"
            );
        }
        for (line, column) in [(2, 0), (6, 0), (3, 1)] {
            assert_eq!(
                breakpoints.at_location(&query(line, column), &bindings).len(),
                0,
                "expected {line}:{column} not to match"
            );
        }
    }

    #[test]
    fn unbound_breakpoint_matches_only_its_exact_location() {
        let breakpoint = breakpoint_at(3, 0);
        let (breakpoints, bindings) = collections_with(&breakpoint, None);
        assert_eq!(breakpoints.at_location(&query(3, 0), &bindings).len(), 1);
        assert_eq!(breakpoints.at_location(&query(3, 5), &bindings).len(), 0);
    }

    #[test]
    fn insert_then_remove_leaves_collection_unchanged() {
        let mut breakpoints = Breakpoints::default();
        let breakpoint = breakpoint_at(3, 0);
        breakpoints.insert(Arc::clone(&breakpoint));
        assert_eq!(breakpoints.len(), 1);
        breakpoints.remove(breakpoint.id());
        assert!(breakpoints.is_empty());
        assert!(breakpoints
            .at_source(&SourceId::file("/tmp/loop.js"))
            .is_empty());
    }

    #[test]
    fn duplicate_insert_is_ignored() {
        let mut breakpoints = Breakpoints::default();
        let breakpoint = breakpoint_at(3, 0);
        breakpoints.insert(Arc::clone(&breakpoint));
        breakpoints.insert(Arc::clone(&breakpoint));
        assert_eq!(breakpoints.len(), 1);
        assert_eq!(breakpoints.at_source(breakpoint.source_id()).len(), 1);
    }

    #[test]
    fn bindings_are_unique_per_breakpoint_and_session() {
        let breakpoint = breakpoint_at(3, 0);
        let mut bindings = Bindings::default();
        bindings.insert(Binding::new(&breakpoint, 1, &verified(3, 0)));
        bindings.insert(Binding::new(&breakpoint, 2, &verified(4, 2)));
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings.for_breakpoint(breakpoint.id()).len(), 2);
        assert_eq!(bindings.for_session(1).len(), 1);

        let removed = bindings.remove_session(1);
        assert_eq!(removed.len(), 1);
        assert!(bindings.find(breakpoint.id(), 1).is_none());
        assert!(bindings.find(breakpoint.id(), 2).is_some());
    }
}
