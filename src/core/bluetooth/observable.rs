//! Observable value holders
//! A snapshot accessor plus ordered change notifications for any number of subscribers.

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

struct Inner<T> {
    value: T,
    subscribers: Vec<UnboundedSender<T>>,
}

/// Holds the current value and fans out every published update in order.
pub struct Observable<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: Clone + PartialEq> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(Inner {
                value,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Current snapshot
    pub fn get(&self) -> T {
        self.inner.lock().value.clone()
    }

    /// Returns the current snapshot together with a receiver for every later update.
    pub fn subscribe(&self) -> (T, UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        inner.subscribers.push(tx);
        (inner.value.clone(), rx)
    }

    /// Stores `value` and notifies subscribers if it differs from the current one.
    /// Returns whether anything was published.
    pub fn set(&self, value: T) -> bool {
        let mut inner = self.inner.lock();
        if inner.value == value {
            return false;
        }
        inner.value = value;
        Self::notify(&mut inner);
        true
    }

    /// Stores `value` and notifies subscribers unconditionally.
    pub fn publish(&self, value: T) {
        let mut inner = self.inner.lock();
        inner.value = value;
        Self::notify(&mut inner);
    }

    /// Runs `f` against the current value while holding the lock.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.lock().value)
    }

    fn notify(inner: &mut Inner<T>) {
        let value = inner.value.clone();
        inner.subscribers.retain(|tx| tx.send(value.clone()).is_ok());
    }
}

impl<T: Clone + PartialEq + Default> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
