#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Canonical in-memory incident table for one dashboard session.
//!
//! The store holds exactly one [`Snapshot`] at a time. Each poll hands the
//! full incident collection to [`IncidentStore::replace_all`], which
//! validates it, installs a new snapshot keyed by incident id, and then
//! notifies every listener once. Incidents missing from the new collection
//! are gone; there is no history.

mod snapshot;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use traffic_watch_bus::{Diagnostic, Diagnostics, ListenerResult, Subscription, SubscriptionBus};
use traffic_watch_incident_models::{Incident, IncidentId, RawIncident};

pub use snapshot::Snapshot;

/// What changed in one [`IncidentStore::replace_all`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceReport {
    /// Revision of the installed snapshot.
    pub revision: u64,
    /// Records that passed validation (after id dedup).
    pub accepted: usize,
    /// Records dropped as malformed.
    pub skipped: usize,
    /// Ids present now but not before.
    pub added: Vec<IncidentId>,
    /// Ids present before but not now.
    pub removed: Vec<IncidentId>,
    /// Ids present in both whose record changed.
    pub updated: Vec<IncidentId>,
}

impl ReplaceReport {
    /// Whether the new snapshot has the same contents as the previous one.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Event published after every successful replace.
#[derive(Debug, Clone)]
pub struct StoreChange {
    /// The snapshot that was just installed.
    pub snapshot: Snapshot,
    /// Diff against the previous snapshot.
    pub report: ReplaceReport,
}

/// The session's single source of truth for incidents.
///
/// Intended to have one writer (the poller). Readers on any task call
/// [`IncidentStore::get`]; the lock is never held across an await or
/// while listeners run.
#[derive(Debug)]
pub struct IncidentStore {
    current: RwLock<Snapshot>,
    revision: AtomicU64,
    last_skipped: AtomicUsize,
    skipped_total: AtomicU64,
    bus: SubscriptionBus<StoreChange>,
    diagnostics: Diagnostics,
}

impl IncidentStore {
    /// Creates an empty store reporting to `diagnostics`.
    #[must_use]
    pub fn new(diagnostics: Diagnostics) -> Self {
        Self {
            current: RwLock::new(Snapshot::default()),
            revision: AtomicU64::new(0),
            last_skipped: AtomicUsize::new(0),
            skipped_total: AtomicU64::new(0),
            bus: SubscriptionBus::new("incident-store", diagnostics.clone()),
            diagnostics,
        }
    }

    /// Replaces the whole incident set with `records`.
    ///
    /// Never fails: malformed records are dropped and counted. Listeners
    /// are notified exactly once per call, after the new snapshot is
    /// visible through [`IncidentStore::get`], even if nothing changed.
    pub fn replace_all(&self, records: impl IntoIterator<Item = RawIncident>) -> ReplaceReport {
        let mut skipped = 0;
        let mut valid = Vec::new();

        for raw in records {
            match Incident::try_from(raw) {
                Ok(incident) => valid.push(incident),
                Err(e) => {
                    skipped += 1;
                    self.diagnostics.record(Diagnostic::MalformedRecord {
                        message: e.to_string(),
                    });
                }
            }
        }

        let (snapshot, report) = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
            let next = Snapshot::from_incidents(revision, valid);
            let report = diff(&current, &next, skipped);
            *current = next.clone();
            (next, report)
        };

        self.last_skipped.store(skipped, Ordering::Release);
        self.skipped_total
            .fetch_add(skipped as u64, Ordering::AcqRel);

        log::debug!(
            "Store revision {}: {} incidents ({} added, {} removed, {} updated, {} skipped)",
            report.revision,
            report.accepted,
            report.added.len(),
            report.removed.len(),
            report.updated.len(),
            report.skipped,
        );

        self.bus.publish(&StoreChange {
            snapshot,
            report: report.clone(),
        });

        report
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn get(&self) -> Snapshot {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Registers a listener called once per [`IncidentStore::replace_all`].
    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StoreChange) -> ListenerResult + Send + Sync + 'static,
    {
        self.bus.subscribe(listener)
    }

    /// The bus change events are published on.
    #[must_use]
    pub const fn changes(&self) -> &SubscriptionBus<StoreChange> {
        &self.bus
    }

    /// Number of successful replaces so far.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Records skipped by the most recent replace.
    #[must_use]
    pub fn last_skipped(&self) -> usize {
        self.last_skipped.load(Ordering::Acquire)
    }

    /// Records skipped over the store's lifetime.
    #[must_use]
    pub fn skipped_total(&self) -> u64 {
        self.skipped_total.load(Ordering::Acquire)
    }

    /// Drops every listener. The snapshot stays readable.
    pub fn dispose(&self) {
        self.bus.clear();
    }
}

fn diff(previous: &Snapshot, next: &Snapshot, skipped: usize) -> ReplaceReport {
    let mut added = Vec::new();
    let mut updated = Vec::new();

    for incident in next {
        match previous.get(&incident.id) {
            None => added.push(incident.id.clone()),
            Some(old) if old != incident => updated.push(incident.id.clone()),
            Some(_) => {}
        }
    }

    let removed: BTreeSet<IncidentId> = previous
        .iter()
        .filter(|incident| !next.contains(&incident.id))
        .map(|incident| incident.id.clone())
        .collect();

    ReplaceReport {
        revision: next.revision(),
        accepted: next.len(),
        skipped,
        added,
        removed: removed.into_iter().collect(),
        updated,
    }
}
