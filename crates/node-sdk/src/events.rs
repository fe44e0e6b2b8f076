//! Observer registration with explicit unregister handles.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Observer<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct ObserverList<E> {
    next_id: u64,
    entries: Vec<(u64, Observer<E>)>,
}

/// An ordered list of observers for events of type `E`.
///
/// Observers run in registration order, outside the internal lock, so an
/// observer may register or unregister others while being notified.
pub struct Observers<E> {
    list: Arc<Mutex<ObserverList<E>>>,
}

impl<E: 'static> Observers<E> {
    pub fn new() -> Self {
        Self {
            list: Arc::new(Mutex::new(ObserverList {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    pub fn register<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut list = self.list.lock();
            let id = list.next_id;
            list.next_id += 1;
            list.entries.push((id, Arc::new(observer)));
            id
        };

        let weak: Weak<Mutex<ObserverList<E>>> = Arc::downgrade(&self.list);
        ObserverHandle {
            id,
            remove: Some(Box::new(move || {
                if let Some(list) = weak.upgrade() {
                    list.lock().entries.retain(|(i, _)| *i != id);
                }
            })),
        }
    }

    pub fn notify(&self, event: &E) {
        let snapshot: Vec<Observer<E>> = self
            .list
            .lock()
            .entries
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        for observer in snapshot {
            observer(event);
        }
    }

    pub fn len(&self) -> usize {
        self.list.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: 'static> Default for Observers<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Returned by every observer registration.
///
/// Dropping the handle leaves the observer registered; call
/// [`unregister`](Self::unregister) to remove it.
pub struct ObserverHandle {
    id: u64,
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ObserverHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unregister(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHandle").field("id", &self.id).finish()
    }
}
