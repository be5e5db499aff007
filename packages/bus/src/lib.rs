#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Synchronous listener bus for dashboard state changes.
//!
//! [`SubscriptionBus::publish`] calls every listener on the publishing task,
//! in registration order, before returning. The listener list is copied
//! before dispatch, so listeners may subscribe or unsubscribe (themselves
//! or others) while an event is being delivered: an unsubscribed listener
//! is never called again, even later in the same dispatch.
//!
//! A listener that returns an error or panics does not stop delivery to
//! the remaining listeners. The failure is recorded on the session's
//! [`Diagnostics`] channel and never reaches the publisher.

pub mod diagnostics;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

pub use diagnostics::{Diagnostic, DiagnosticCounts, Diagnostics};

/// Error a listener returns to report that it could not handle an event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ListenerError {
    /// Human-readable failure description.
    pub message: String,
}

impl ListenerError {
    /// Creates a listener error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result type returned by listeners.
pub type ListenerResult = Result<(), ListenerError>;

type Listener<E> = Arc<dyn Fn(&E) -> ListenerResult + Send + Sync>;

struct Entry<E> {
    id: u64,
    active: Arc<AtomicBool>,
    listener: Listener<E>,
}

impl<E> Clone for Entry<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            active: Arc::clone(&self.active),
            listener: Arc::clone(&self.listener),
        }
    }
}

struct BusInner<E> {
    name: String,
    next_id: AtomicU64,
    listeners: Mutex<Vec<Entry<E>>>,
    diagnostics: Diagnostics,
}

impl<E> BusInner<E> {
    fn remove(&self, id: u64) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|entry| entry.id != id);
    }
}

/// Outcome of one [`SubscriptionBus::publish`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Listeners that handled the event.
    pub delivered: usize,
    /// Listeners that returned an error or panicked.
    pub failed: usize,
}

/// A named, cloneable registry of listeners for events of type `E`.
pub struct SubscriptionBus<E> {
    inner: Arc<BusInner<E>>,
}

impl<E> Clone for SubscriptionBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: 'static> std::fmt::Debug for SubscriptionBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionBus")
            .field("name", &self.inner.name)
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

impl<E: 'static> SubscriptionBus<E> {
    /// Creates an empty bus. `name` identifies the bus in diagnostics.
    #[must_use]
    pub fn new(name: impl Into<String>, diagnostics: Diagnostics) -> Self {
        Self {
            inner: Arc::new(BusInner {
                name: name.into(),
                next_id: AtomicU64::new(1),
                listeners: Mutex::new(Vec::new()),
                diagnostics,
            }),
        }
    }

    /// Registers a listener. It stays registered until
    /// [`Subscription::unsubscribe`] is called; dropping the handle does
    /// not unsubscribe.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) -> ListenerResult + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));

        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Entry {
                id,
                active: Arc::clone(&active),
                listener: Arc::new(listener),
            });

        let weak: Weak<BusInner<E>> = Arc::downgrade(&self.inner);
        Subscription {
            id,
            active,
            remove: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.remove(id);
                }
            })),
        }
    }

    /// Registers a listener that is removed when the returned guard drops.
    pub fn subscribe_scoped<F>(&self, listener: F) -> ScopedSubscription
    where
        F: Fn(&E) -> ListenerResult + Send + Sync + 'static,
    {
        ScopedSubscription(Some(self.subscribe(listener)))
    }

    /// Delivers `event` to every listener registered at call time.
    pub fn publish(&self, event: &E) -> PublishReport {
        let snapshot: Vec<Entry<E>> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut report = PublishReport::default();

        for entry in snapshot {
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| (entry.listener)(event)));
            let message = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => e.message,
                Err(payload) => panic_message(payload.as_ref()),
            };

            report.failed += 1;
            self.inner.diagnostics.record(Diagnostic::ListenerFailed {
                bus: self.inner.name.clone(),
                listener: entry.id,
                message,
            });
        }

        report
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Removes every listener.
    pub fn clear(&self) {
        let drained: Vec<Entry<E>> = std::mem::take(
            &mut *self
                .inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for entry in drained {
            entry.active.store(false, Ordering::Release);
        }
    }

    /// The diagnostics channel this bus reports listener failures to.
    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.inner.diagnostics
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// Handle returned by [`SubscriptionBus::subscribe`].
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Subscription {
    /// Subscription id, as reported in [`Diagnostic::ListenerFailed`].
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Whether the listener is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Removes the listener. Takes effect immediately, including for a
    /// dispatch that is currently in progress.
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

/// Guard that unsubscribes its listener when dropped.
#[derive(Debug)]
pub struct ScopedSubscription(Option<Subscription>);

impl ScopedSubscription {
    /// Releases the guard without unsubscribing; the listener then lives
    /// as long as the bus.
    pub fn detach(mut self) {
        self.0.take();
    }
}

impl Drop for ScopedSubscription {
    fn drop(&mut self) {
        if let Some(mut subscription) = self.0.take() {
            subscription.cancel();
        }
    }
}
