//! A small in-process event bus with the listener semantics the session
//! tree needs: named listeners, priorities, one-shot registration, and
//! scoped teardown. Hookables form a parent-linked tree; destroying a
//! parent destroys its descendants first and runs every listener's cleanup
//! closure exactly once.
//!
//! Listeners registered `preemptible: false` survive into the teardown
//! phase: emits that happen while a hookable is being destroyed (from
//! cleanup closures or from a child's teardown) still reach them. After
//! destruction completes, `on` and `emit` are no-ops.

use std::sync::Arc;

use parking_lot::Mutex;

/// Runs when its listener is disposed, replaced, destroyed with the
/// hookable, or (for `once` listeners) after the single invocation.
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// A listener. Returning a closure registers it as the listener's cleanup;
/// returning a new closure from a later invocation runs the superseded one
/// first.
pub type Listener<P> = Box<dyn FnMut(&P) -> Option<Cleanup> + Send>;

pub const DEFAULT_PRIORITY: i32 = 50;

/// Registration options for [`Hookable::on`].
pub struct HookOptions {
    /// Optional listener name. Registering the same name again for the same
    /// event replaces the previous listener.
    pub name: Option<String>,
    /// Listeners fire in descending priority; ties fire in registration
    /// order.
    pub priority: i32,
    /// Dispose the listener after its first invocation.
    pub once: bool,
    /// When false, the listener survives into the teardown phase and still
    /// observes emits that happen while the hookable is being destroyed.
    pub preemptible: bool,
}

impl Default for HookOptions {
    fn default() -> Self {
        Self {
            name: None,
            priority: DEFAULT_PRIORITY,
            once: false,
            preemptible: true,
        }
    }
}

impl HookOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn permanent(mut self) -> Self {
        self.preemptible = false;
        self
    }
}

/// Anything that can be adopted into a hookable's scope and torn down with
/// it.
pub trait Scoped: Send {
    fn destroy_scope(&self);
    fn is_destroyed(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifeState {
    Active,
    Destroying,
    Destroyed,
}

struct Entry<P> {
    id: u64,
    event: String,
    name: Option<String>,
    priority: i32,
    order: u64,
    once: bool,
    preemptible: bool,
    /// Taken while the listener runs so dispatch never holds the lock
    /// across user code.
    callback: Option<Listener<P>>,
    cleanup: Option<Cleanup>,
    /// Tombstone: disposed while its callback was checked out.
    removed: bool,
}

struct Inner<P> {
    state: LifeState,
    next_id: u64,
    entries: Vec<Entry<P>>,
    children: Vec<Box<dyn Scoped>>,
}

pub struct Hookable<P> {
    inner: Arc<Mutex<Inner<P>>>,
}

impl<P> Clone for Hookable<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> Default for Hookable<P>
where
    P: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Disposes one listener registration.
pub struct Disposer<P> {
    inner: Arc<Mutex<Inner<P>>>,
    id: u64,
}

impl<P> Disposer<P> {
    pub fn dispose(&self) {
        let cleanup = {
            let mut inner = self.inner.lock();
            take_entry_cleanup(&mut inner, self.id)
        };
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

/// Removes (or tombstones) the entry and hands back its cleanup so the
/// caller can run it outside the lock.
fn take_entry_cleanup<P>(inner: &mut Inner<P>, id: u64) -> Option<Cleanup> {
    let index = inner.entries.iter().position(|entry| entry.id == id)?;
    if inner.entries[index].callback.is_some() {
        let entry = inner.entries.remove(index);
        entry.cleanup
    } else {
        // The listener is running right now; leave a tombstone for the
        // dispatcher to collect.
        let entry = &mut inner.entries[index];
        entry.removed = true;
        entry.cleanup.take()
    }
}

impl<P> Hookable<P>
where
    P: 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: LifeState::Active,
                next_id: 0,
                entries: Vec::new(),
                children: Vec::new(),
            })),
        }
    }

    /// Creates a hookable scoped under `parent`: destroying the parent
    /// destroys it.
    pub fn scoped_under<Q>(parent: &Hookable<Q>) -> Self
    where
        Q: 'static,
        P: Send,
    {
        let child = Self::new();
        parent.adopt(Box::new(child.clone()));
        child
    }

    /// Registers `listener` for `event`. Returns a disposer; dropping the
    /// disposer does NOT unregister the listener.
    pub fn on<F>(&self, event: impl Into<String>, listener: F, options: HookOptions) -> Disposer<P>
    where
        F: FnMut(&P) -> Option<Cleanup> + Send + 'static,
    {
        let event = event.into();
        let mut replaced_cleanup = None;
        let id;
        {
            let mut inner = self.inner.lock();
            id = inner.next_id;
            inner.next_id += 1;
            if inner.state == LifeState::Destroyed {
                // Keep the disposer valid but register nothing.
                return Disposer {
                    inner: Arc::clone(&self.inner),
                    id,
                };
            }
            if let Some(name) = options.name.as_deref() {
                if let Some(existing) = inner
                    .entries
                    .iter()
                    .find(|entry| entry.event == event && entry.name.as_deref() == Some(name))
                    .map(|entry| entry.id)
                {
                    replaced_cleanup = take_entry_cleanup(&mut inner, existing);
                }
            }
            let order = id;
            inner.entries.push(Entry {
                id,
                event,
                name: options.name,
                priority: options.priority,
                order,
                once: options.once,
                preemptible: options.preemptible,
                callback: Some(Box::new(listener)),
                cleanup: None,
                removed: false,
            });
        }
        if let Some(cleanup) = replaced_cleanup {
            cleanup();
        }
        Disposer {
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    /// Invokes the listeners registered for `event` in descending priority
    /// order. Listeners may register or dispose listeners mid-emit; the
    /// current dispatch keeps its snapshot.
    pub fn emit(&self, event: &str, payload: &P) {
        let batch: Vec<u64> = {
            let inner = self.inner.lock();
            let teardown = match inner.state {
                LifeState::Destroyed => return,
                LifeState::Destroying => true,
                LifeState::Active => false,
            };
            let mut snapshot: Vec<(i32, u64, u64)> = inner
                .entries
                .iter()
                .filter(|entry| {
                    entry.event == event && !entry.removed && !(teardown && entry.preemptible)
                })
                .map(|entry| (entry.priority, entry.order, entry.id))
                .collect();
            snapshot.sort_by_key(|&(priority, order, _)| (std::cmp::Reverse(priority), order));
            snapshot.into_iter().map(|(_, _, id)| id).collect()
        };

        for id in batch {
            let (mut callback, once) = {
                let mut inner = self.inner.lock();
                let Some(entry) = inner.entries.iter_mut().find(|entry| entry.id == id) else {
                    continue;
                };
                if entry.removed {
                    continue;
                }
                let Some(callback) = entry.callback.take() else {
                    continue;
                };
                (callback, entry.once)
            };

            let returned = callback(payload);

            let cleanups = {
                let mut inner = self.inner.lock();
                let mut cleanups: Vec<Cleanup> = Vec::new();
                match inner.entries.iter().position(|entry| entry.id == id) {
                    Some(index) if inner.entries[index].removed => {
                        // Disposed while running; its stored cleanup already
                        // ran. A cleanup returned by this very call still
                        // must.
                        inner.entries.remove(index);
                        cleanups.extend(returned);
                    }
                    Some(index) => {
                        if let Some(new_cleanup) = returned {
                            if let Some(old) = inner.entries[index].cleanup.replace(new_cleanup) {
                                cleanups.push(old);
                            }
                        }
                        if once {
                            let entry = inner.entries.remove(index);
                            cleanups.extend(entry.cleanup);
                        } else {
                            inner.entries[index].callback = Some(callback);
                        }
                    }
                    None => cleanups.extend(returned),
                }
                cleanups
            };
            for cleanup in cleanups {
                cleanup();
            }
        }
    }

    /// Ties `child` to this hookable's lifetime. Adopting into an already
    /// destroyed scope destroys the child immediately.
    pub fn adopt(&self, child: Box<dyn Scoped>) {
        let adopt_failed = {
            let mut inner = self.inner.lock();
            if inner.state == LifeState::Active {
                inner.children.push(child);
                None
            } else {
                Some(child)
            }
        };
        if let Some(child) = adopt_failed {
            child.destroy_scope();
        }
    }

    /// Destroys children post-order, then runs every cleanup: preemptible
    /// listeners first, non-preemptible last so they can still observe
    /// teardown emits. Idempotent.
    pub fn destroy(&self) {
        let children = {
            let mut inner = self.inner.lock();
            if inner.state != LifeState::Active {
                return;
            }
            inner.state = LifeState::Destroying;
            std::mem::take(&mut inner.children)
        };
        for child in children {
            child.destroy_scope();
        }

        self.drain_entries(true);
        self.drain_entries(false);

        self.inner.lock().state = LifeState::Destroyed;
    }

    fn drain_entries(&self, preemptible: bool) {
        loop {
            let id = {
                let inner = self.inner.lock();
                inner
                    .entries
                    .iter()
                    .find(|entry| entry.preemptible == preemptible)
                    .map(|entry| entry.id)
            };
            let Some(id) = id else { break };
            let cleanup = {
                let mut inner = self.inner.lock();
                take_entry_cleanup(&mut inner, id)
            };
            if let Some(cleanup) = cleanup {
                cleanup();
            } else {
                // No cleanup but the entry may still be present as a
                // tombstone; make sure it is gone before the next round.
                let mut inner = self.inner.lock();
                inner.entries.retain(|entry| entry.id != id);
            }
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().state == LifeState::Destroyed
    }
}

impl<P> Scoped for Hookable<P>
where
    P: Send + 'static,
{
    fn destroy_scope(&self) {
        self.destroy();
    }

    fn is_destroyed(&self) -> bool {
        Hookable::is_destroyed(self)
    }
}
