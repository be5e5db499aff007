//! Immutable incident snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;

use traffic_watch_incident_models::{Coordinate, Incident, IncidentId};

#[derive(Debug, Default)]
struct SnapshotInner {
    revision: u64,
    incidents: Vec<Incident>,
    index: BTreeMap<IncidentId, usize>,
}

/// The complete incident state at one point in time.
///
/// Cloning is cheap (one reference count bump). Holding a snapshot never
/// blocks the store from installing a newer one.
#[derive(Debug, Clone, Default)]
pub struct Snapshot(Arc<SnapshotInner>);

impl Snapshot {
    /// Builds a snapshot from validated incidents, keeping the last copy of
    /// any duplicated id in the position of its first appearance.
    #[must_use]
    pub fn from_incidents(revision: u64, records: impl IntoIterator<Item = Incident>) -> Self {
        let mut incidents: Vec<Incident> = Vec::new();
        let mut index = BTreeMap::new();

        for incident in records {
            if let Some(&pos) = index.get(&incident.id) {
                incidents[pos] = incident;
            } else {
                index.insert(incident.id.clone(), incidents.len());
                incidents.push(incident);
            }
        }

        Self(Arc::new(SnapshotInner {
            revision,
            incidents,
            index,
        }))
    }

    /// Store revision that produced this snapshot. The empty initial
    /// snapshot is revision 0.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.0.revision
    }

    /// Number of incidents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.incidents.len()
    }

    /// Whether the snapshot holds no incidents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.incidents.is_empty()
    }

    /// Incidents in arrival order. Do not rely on this order for display.
    #[must_use]
    pub fn as_slice(&self) -> &[Incident] {
        &self.0.incidents
    }

    /// Iterates incidents in arrival order.
    pub fn iter(&self) -> std::slice::Iter<'_, Incident> {
        self.0.incidents.iter()
    }

    /// Looks up an incident by id.
    #[must_use]
    pub fn get(&self, id: &IncidentId) -> Option<&Incident> {
        self.0.index.get(id).map(|&pos| &self.0.incidents[pos])
    }

    /// Whether an incident with `id` is present.
    #[must_use]
    pub fn contains(&self, id: &IncidentId) -> bool {
        self.0.index.contains_key(id)
    }

    /// Incidents that can be placed on a map, with their positions.
    pub fn mappable(&self) -> impl Iterator<Item = (&Incident, Coordinate)> {
        self.iter()
            .filter_map(|incident| incident.map_position().map(|pos| (incident, pos)))
    }

    /// Incidents newest first; equal timestamps order by id.
    #[must_use]
    pub fn sorted_by_recency(&self) -> Vec<&Incident> {
        let mut sorted: Vec<&Incident> = self.iter().collect();
        sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        sorted
    }

    /// Whether both snapshots hold the same incidents, ignoring order and
    /// revision.
    #[must_use]
    pub fn same_contents(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|incident| other.get(&incident.id) == Some(incident))
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Incident;
    type IntoIter = std::slice::Iter<'a, Incident>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
