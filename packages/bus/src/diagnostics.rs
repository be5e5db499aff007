//! Shared diagnostics channel.
//!
//! Non-fatal failures from every component of a dashboard session land
//! here: they are logged, kept in a bounded history, counted, and fanned
//! out to live observers over a `tokio` broadcast channel.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::broadcast;

/// Number of diagnostics retained for [`Diagnostics::recent`].
const HISTORY_LEN: usize = 256;

/// Capacity of the live broadcast channel.
const CHANNEL_CAPACITY: usize = 64;

/// A non-fatal condition worth surfacing to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A bus listener returned an error or panicked.
    ListenerFailed {
        /// Name of the bus that dispatched the event.
        bus: String,
        /// Subscription id of the failing listener.
        listener: u64,
        /// Error or panic message.
        message: String,
    },
    /// An incoming record failed validation and was dropped.
    MalformedRecord {
        /// Validation failure.
        message: String,
    },
    /// A network operation failed; the previous state was kept.
    NetworkFailure {
        /// Component that issued the request.
        source: String,
        /// Error message.
        message: String,
    },
    /// An async result arrived after being superseded and was dropped.
    StaleResultDiscarded {
        /// Component that issued the request.
        source: String,
        /// Generation carried by the stale result.
        generation: u64,
        /// Generation that was current when it arrived.
        current: u64,
    },
}

/// Running totals per diagnostic kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticCounts {
    /// Failed listener invocations.
    pub listener_failures: u64,
    /// Dropped malformed records.
    pub malformed_records: u64,
    /// Failed network operations.
    pub network_failures: u64,
    /// Discarded stale results.
    pub stale_results: u64,
}

#[derive(Debug, Default)]
struct DiagnosticsState {
    history: VecDeque<Diagnostic>,
    counts: DiagnosticCounts,
}

/// Cloneable handle to one session's diagnostics channel.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    state: Arc<Mutex<DiagnosticsState>>,
    sender: broadcast::Sender<Diagnostic>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    /// Creates an empty diagnostics channel.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(DiagnosticsState::default())),
            sender,
        }
    }

    /// Records a diagnostic: logs it, stores it, and broadcasts it.
    pub fn record(&self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::ListenerFailed {
                bus,
                listener,
                message,
            } => log::warn!("{bus} listener #{listener} failed: {message}"),
            Diagnostic::NetworkFailure { source, message } => {
                log::warn!("{source} request failed: {message}");
            }
            Diagnostic::MalformedRecord { message } => {
                log::debug!("Dropped malformed record: {message}");
            }
            Diagnostic::StaleResultDiscarded {
                source,
                generation,
                current,
            } => log::debug!(
                "{source} discarded stale result (generation {generation}, current {current})"
            ),
        }

        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match &diagnostic {
                Diagnostic::ListenerFailed { .. } => state.counts.listener_failures += 1,
                Diagnostic::MalformedRecord { .. } => state.counts.malformed_records += 1,
                Diagnostic::NetworkFailure { .. } => state.counts.network_failures += 1,
                Diagnostic::StaleResultDiscarded { .. } => state.counts.stale_results += 1,
            }
            if state.history.len() == HISTORY_LEN {
                state.history.pop_front();
            }
            state.history.push_back(diagnostic.clone());
        }

        // No live receivers is the common case.
        let _ = self.sender.send(diagnostic);
    }

    /// Subscribes to diagnostics recorded from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Diagnostic> {
        self.sender.subscribe()
    }

    /// Returns the retained history, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<Diagnostic> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .cloned()
            .collect()
    }

    /// Returns the running totals.
    #[must_use]
    pub fn counts(&self) -> DiagnosticCounts {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .counts
    }
}
