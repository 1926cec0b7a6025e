//! Observable value cell.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

/// Handle returned by [`ReactiveCell::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener<T> = Rc<dyn Fn(&T, &T)>;

struct Inner<T> {
    value: RefCell<T>,
    listeners: RefCell<Vec<(SubscriptionId, Listener<T>)>>,
    next_id: Cell<u64>,
    pending: RefCell<VecDeque<(T, T)>>,
    notifying: Cell<bool>,
}

/// A shared, observable value.
///
/// Cloning the cell clones the handle; all clones see the same value.
/// Listeners receive `(old, new)` in registration order. A `set` issued from
/// inside a listener takes effect immediately, but its notification is queued
/// and delivered after the current one has reached every listener.
pub struct ReactiveCell<T> {
    inner: Rc<Inner<T>>,
}

/// Non-owning handle to a [`ReactiveCell`].
pub struct WeakReactiveCell<T> {
    inner: Weak<Inner<T>>,
}

/// Resets the notifying flag even if a listener panics.
struct NotifyGuard<'a>(&'a Cell<bool>);

impl Drop for NotifyGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl<T: Clone + PartialEq + 'static> ReactiveCell<T> {
    /// Create a cell holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(Inner {
                value: RefCell::new(value),
                listeners: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
                pending: RefCell::new(VecDeque::new()),
                notifying: Cell::new(false),
            }),
        }
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value.
    ///
    /// Do not call `set` on the same cell from inside `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Replace the value. Returns `false` (and notifies nobody) when `value`
    /// equals the current value.
    pub fn set(&self, value: T) -> bool {
        let old = {
            let mut current = self.inner.value.borrow_mut();
            if *current == value {
                return false;
            }
            std::mem::replace(&mut *current, value.clone())
        };
        self.inner.pending.borrow_mut().push_back((old, value));
        self.drain();
        true
    }

    /// Modify a copy of the value and store it.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        let mut value = self.get();
        f(&mut value);
        self.set(value)
    }

    /// Register a listener called with `(old, new)` after every change.
    pub fn subscribe(&self, listener: impl Fn(&T, &T) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);
        self.inner
            .listeners
            .borrow_mut()
            .push((id, Rc::new(listener)));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    ///
    /// A listener removed during a notification is not called for the rest
    /// of it.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.inner.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// Non-owning handle.
    pub fn downgrade(&self) -> WeakReactiveCell<T> {
        WeakReactiveCell {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Whether both handles point at the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.inner.listeners.borrow().iter().any(|(sid, _)| *sid == id)
    }

    fn drain(&self) {
        if self.inner.notifying.get() {
            return;
        }
        self.inner.notifying.set(true);
        let _guard = NotifyGuard(&self.inner.notifying);

        loop {
            let next = self.inner.pending.borrow_mut().pop_front();
            let Some((old, new)) = next else { break };

            let listeners: Vec<(SubscriptionId, Listener<T>)> =
                self.inner.listeners.borrow().clone();
            for (id, listener) in listeners {
                if self.is_subscribed(id) {
                    listener(&old, &new);
                }
            }
        }
    }
}

impl<T: Clone + PartialEq + Default + 'static> Default for ReactiveCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Clone for ReactiveCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ReactiveCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.value.try_borrow() {
            Ok(value) => f.debug_tuple("ReactiveCell").field(&*value).finish(),
            Err(_) => f.write_str("ReactiveCell(<borrowed>)"),
        }
    }
}

impl<T> WeakReactiveCell<T> {
    /// The cell, if it is still alive.
    pub fn upgrade(&self) -> Option<ReactiveCell<T>> {
        self.inner.upgrade().map(|inner| ReactiveCell { inner })
    }
}

impl<T> Clone for WeakReactiveCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}
