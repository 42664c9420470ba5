//! The session registry: id allocation, root tracking, and the listener
//! surface for session creation. Root sessions are owned here; child
//! sessions are owned by their parents.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::hookable::{Disposer, Hookable, HookOptions};
use crate::session::Session;

pub struct SessionManager {
    next_id: AtomicI64,
    sessions: Mutex<FxHashMap<i64, Weak<Session>>>,
    roots: Mutex<Vec<Arc<Session>>>,
    events: Hookable<Arc<Session>>,
}

impl SessionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI64::new(0),
            sessions: Mutex::new(FxHashMap::default()),
            roots: Mutex::new(Vec::new()),
            events: Hookable::new(),
        })
    }

    pub fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Registers a session, wiring it into the tree. Fires the `session`
    /// listeners for roots and children alike.
    pub(crate) fn add(&self, session: &Arc<Session>, parent: Option<&Arc<Session>>) {
        self.sessions
            .lock()
            .insert(session.id(), Arc::downgrade(session));
        match parent {
            Some(parent) => {
                session.set_parent(Some(parent));
                parent.push_child(Arc::clone(session));
            }
            None => self.roots.lock().push(Arc::clone(session)),
        }
        self.events.emit("session", session);
    }

    /// Called on every session registration, children included.
    pub fn on_session<F>(&self, mut listener: F) -> Disposer<Arc<Session>>
    where
        F: FnMut(&Arc<Session>) + Send + 'static,
    {
        self.events.on(
            "session",
            move |session| {
                listener(session);
                None
            },
            HookOptions::default(),
        )
    }

    pub fn get(&self, id: i64) -> Option<Arc<Session>> {
        self.sessions.lock().get(&id).and_then(Weak::upgrade)
    }

    pub fn roots(&self) -> Vec<Arc<Session>> {
        self.roots.lock().clone()
    }

    /// Takes a session out of the registry without destroying it. Its
    /// children are re-parented to its parent, or promoted to roots when
    /// it had none.
    pub fn remove(&self, session: &Arc<Session>) {
        let children = session.take_children();
        let parent = session.parent();
        match &parent {
            Some(parent) => {
                for child in children {
                    child.set_parent(Some(parent));
                    parent.push_child(child);
                }
                parent.remove_child(session.id());
            }
            None => {
                let mut roots = self.roots.lock();
                for child in children {
                    child.set_parent(None);
                    roots.push(child);
                }
            }
        }
        session.set_parent(None);
        self.unregister(session.id());
    }

    /// Drops the registry entry for a terminated session.
    pub(crate) fn unregister(&self, id: i64) {
        self.sessions.lock().remove(&id);
        self.roots.lock().retain(|root| root.id() != id);
    }

    /// Destroys the listener surface. Sessions themselves are terminated
    /// by [`crate::runtime::Runtime::shutdown`].
    pub(crate) fn destroy(&self) {
        self.events.destroy();
    }
}
