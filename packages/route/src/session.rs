//! Lifecycle of the single live route.
//!
//! Every request and every reset bumps the session generation. A
//! computation carries the generation it was issued under and is applied
//! only if that generation is still current, so a superseded request can
//! never overwrite the path of a newer one, whatever order they resolve in.
//!
//! State changes are queued while the slot is locked and delivered in that
//! order, so listeners on any thread observe them in mutation order.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt as _;
use tokio::task::{AbortHandle, JoinHandle};
use traffic_watch_bus::{Diagnostic, Diagnostics, ListenerResult, Subscription, SubscriptionBus};
use traffic_watch_route_models::{Endpoint, RequestState, RoutePath, RouteState};
use traffic_watch_spatial::Gazetteer;

use crate::{RouteError, RoutePlanner, resolve_endpoint, validate_endpoints};

/// Name used for this component in diagnostics.
const SOURCE: &str = "route";

/// How a route request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteResolution {
    /// The result was applied; this is the state it produced.
    Applied(RouteState),
    /// A newer request or reset arrived first; the result was discarded.
    Superseded,
    /// The computation was aborted by a reset or disposal.
    Cancelled,
}

/// Handle to an issued route computation.
#[derive(Debug)]
pub struct RouteRequest {
    generation: u64,
    handle: JoinHandle<RouteResolution>,
}

impl RouteRequest {
    /// Session generation this request was issued under.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Waits for the computation to finish.
    pub async fn finished(self) -> RouteResolution {
        self.handle.await.unwrap_or(RouteResolution::Cancelled)
    }
}

struct Slot {
    state: RouteState,
    pending: Option<AbortHandle>,
}

impl Slot {
    /// Moves to a fresh generation, forgetting any path or error.
    fn advance(&mut self, request: RequestState) -> u64 {
        self.state.generation += 1;
        self.state.request = request;
        self.state.path = None;
        self.state.error = None;
        self.state.generation
    }

    fn abort_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}

/// States waiting to be published, in the order they were installed.
#[derive(Default)]
struct Outbox {
    queue: VecDeque<RouteState>,
    draining: bool,
}

struct Inner {
    planner: Arc<dyn RoutePlanner>,
    slot: Mutex<Slot>,
    outbox: Mutex<Outbox>,
    bus: SubscriptionBus<RouteState>,
    diagnostics: Diagnostics,
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues the slot's current state. Must be called with the slot
    /// locked so that queue order matches mutation order.
    fn enqueue(&self, slot: &Slot) {
        self.outbox().queue.push_back(slot.state.clone());
    }

    /// Delivers queued states. If another caller is already delivering,
    /// it picks up whatever was queued here, including from listeners
    /// that change the session while being notified.
    fn flush(&self) {
        {
            let mut outbox = self.outbox();
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }
        loop {
            let next = {
                let mut outbox = self.outbox();
                let Some(next) = outbox.queue.pop_front() else {
                    outbox.draining = false;
                    return;
                };
                next
            };
            self.bus.publish(&next);
        }
    }

    fn complete(&self, generation: u64, result: Result<RoutePath, RouteError>) -> RouteResolution {
        let mut slot = self.slot();
        let current = slot.state.generation;
        if current != generation {
            drop(slot);
            self.diagnostics.record(Diagnostic::StaleResultDiscarded {
                source: SOURCE.to_string(),
                generation,
                current,
            });
            return RouteResolution::Superseded;
        }

        slot.pending = None;
        let failure = match result {
            Ok(path) => {
                slot.state.request = RequestState::Ready;
                slot.state.path = Some(path);
                None
            }
            Err(e) => {
                let message = e.to_string();
                slot.state.request = RequestState::Failed;
                slot.state.error = Some(message.clone());
                Some(message)
            }
        };
        let state = slot.state.clone();
        self.enqueue(&slot);
        drop(slot);

        if let Some(message) = failure {
            self.diagnostics.record(Diagnostic::NetworkFailure {
                source: SOURCE.to_string(),
                message,
            });
        } else {
            log::debug!(
                "Route {} -> {} ready ({:.0} m)",
                display(state.start.as_ref()),
                display(state.end.as_ref()),
                state.path.as_ref().map_or(0.0, |p| p.distance_m)
            );
        }

        self.flush();
        RouteResolution::Applied(state)
    }
}

fn display(endpoint: Option<&Endpoint>) -> String {
    endpoint.map_or_else(|| "?".to_string(), ToString::to_string)
}

/// The route-check state shared by every view of one dashboard session.
pub struct RouteSession {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RouteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteSession")
            .field("planner", &self.inner.planner.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl RouteSession {
    /// Creates an idle session computing paths with `planner`.
    #[must_use]
    pub fn new(planner: Arc<dyn RoutePlanner>, diagnostics: Diagnostics) -> Self {
        Self {
            inner: Arc::new(Inner {
                planner,
                slot: Mutex::new(Slot {
                    state: RouteState::default(),
                    pending: None,
                }),
                outbox: Mutex::new(Outbox::default()),
                bus: SubscriptionBus::new("route-session", diagnostics.clone()),
                diagnostics,
            }),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RouteState {
        self.inner.slot().state.clone()
    }

    /// Registers a listener called with the new state after every change.
    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&RouteState) -> ListenerResult + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(listener)
    }

    /// The bus carrying state changes.
    #[must_use]
    pub fn changes(&self) -> &SubscriptionBus<RouteState> {
        &self.inner.bus
    }

    /// Selects the start. A different value resets the session to
    /// [`RequestState::Idle`] and invalidates any pending request.
    pub fn set_start(&self, start: Option<Endpoint>) {
        self.change_endpoints(|state| &mut state.start, start);
    }

    /// Selects the destination. A different value resets the session to
    /// [`RequestState::Idle`] and invalidates any pending request.
    pub fn set_end(&self, end: Option<Endpoint>) {
        self.change_endpoints(|state| &mut state.end, end);
    }

    fn change_endpoints(
        &self,
        field: impl Fn(&mut RouteState) -> &mut Option<Endpoint>,
        value: Option<Endpoint>,
    ) {
        let mut slot = self.inner.slot();
        if *field(&mut slot.state) == value {
            return;
        }
        *field(&mut slot.state) = value;
        slot.abort_pending();
        slot.advance(RequestState::Idle);
        self.inner.enqueue(&slot);
        drop(slot);

        log::debug!("Route endpoints changed; session reset");
        self.inner.flush();
    }

    /// Selects both endpoints and computes the route between them.
    ///
    /// Invalid endpoints are rejected before any computation and leave the
    /// session untouched. Otherwise the session becomes
    /// [`RequestState::Pending`] and any earlier request is superseded: its
    /// result will be discarded when it arrives.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidEndpoints`] if either endpoint is
    /// missing or invalid, or both are the same place.
    ///
    /// # Panics
    ///
    /// Panics if called outside a `tokio` runtime.
    pub fn request_route(
        &self,
        start: Option<Endpoint>,
        end: Option<Endpoint>,
    ) -> Result<RouteRequest, RouteError> {
        let (from, to) = match validate_endpoints(start.as_ref(), end.as_ref()) {
            Ok((from, to)) => (from.position, to.position),
            Err(e) => {
                log::debug!("Route request rejected: {e}");
                return Err(e.into());
            }
        };

        let mut slot = self.inner.slot();
        if slot.pending.take().is_some() {
            log::debug!("Superseding pending route request");
        }
        slot.state.start = start;
        slot.state.end = end;
        let generation = slot.advance(RequestState::Pending);
        self.inner.enqueue(&slot);
        drop(slot);

        self.inner.flush();

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let result = AssertUnwindSafe(inner.planner.plan(from, to))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(RouteError::Backend {
                        message: "route planner panicked".to_string(),
                    })
                });
            inner.complete(generation, result)
        });

        let mut slot = self.inner.slot();
        if slot.state.generation == generation && slot.state.request == RequestState::Pending {
            slot.pending = Some(handle.abort_handle());
        }
        drop(slot);

        Ok(RouteRequest { generation, handle })
    }

    /// Computes the route between the currently selected endpoints.
    ///
    /// # Errors
    ///
    /// See [`RouteSession::request_route`].
    pub fn check_route(&self) -> Result<RouteRequest, RouteError> {
        let (start, end) = {
            let slot = self.inner.slot();
            (slot.state.start.clone(), slot.state.end.clone())
        };
        self.request_route(start, end)
    }

    /// Resolves two location names and computes the route between them.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidEndpoints`] for unknown names, plus
    /// everything [`RouteSession::request_route`] rejects.
    pub fn request_named(
        &self,
        gazetteer: &Gazetteer,
        start: &str,
        end: &str,
    ) -> Result<RouteRequest, RouteError> {
        let start = resolve_endpoint(gazetteer, start)?;
        let end = resolve_endpoint(gazetteer, end)?;
        self.request_route(Some(start), Some(end))
    }

    /// Returns to [`RequestState::Idle`], keeping the selected endpoints and
    /// aborting any pending computation.
    pub fn reset(&self) {
        let mut slot = self.inner.slot();
        slot.abort_pending();
        slot.advance(RequestState::Idle);
        self.inner.enqueue(&slot);
        drop(slot);

        self.inner.flush();
    }

    /// Tears the session down: aborts pending work, clears both endpoints,
    /// and drops every listener. Listeners are told about the final idle
    /// state before they are removed.
    pub fn dispose(&self) {
        let mut slot = self.inner.slot();
        slot.abort_pending();
        slot.state.start = None;
        slot.state.end = None;
        slot.advance(RequestState::Idle);
        self.inner.enqueue(&slot);
        drop(slot);

        self.inner.flush();
        self.inner.bus.clear();
        log::debug!("Route session disposed");
    }
}

impl Drop for RouteSession {
    fn drop(&mut self) {
        self.inner.slot().abort_pending();
    }
}
