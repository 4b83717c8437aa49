//! Per-node attachment accounting.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};

use crate::error::DriverError;

#[derive(Debug, Default)]
struct NodeSlots {
    location: Option<String>,
    volumes: BTreeSet<String>,
}

/// Attachment table guarded by the tracker's mutex.
#[derive(Debug, Default)]
pub(crate) struct CapacityTable {
    nodes: HashMap<String, NodeSlots>,
}

impl CapacityTable {
    /// Claims a slot for `volume_id`; claiming an already-held slot is a no-op.
    pub(crate) fn reserve(
        &mut self,
        limit: usize,
        node_id: &str,
        volume_id: &str,
    ) -> Result<usize, DriverError> {
        let slots = self.nodes.entry(node_id.to_owned()).or_default();
        if slots.volumes.contains(volume_id) {
            return Ok(slots.volumes.len());
        }
        if slots.volumes.len() >= limit {
            return Err(DriverError::NodeAtCapacity {
                node_id: node_id.to_owned(),
                attached: slots.volumes.len(),
                limit,
            });
        }
        slots.volumes.insert(volume_id.to_owned());
        Ok(slots.volumes.len())
    }

    pub(crate) fn set_location(&mut self, node_id: &str, location: &str) {
        self.nodes.entry(node_id.to_owned()).or_default().location = Some(location.to_owned());
    }

    /// Frees the slot held by `volume_id`; returns whether one was held.
    pub(crate) fn release(&mut self, node_id: &str, volume_id: &str) -> bool {
        self.nodes
            .get_mut(node_id)
            .is_some_and(|slots| slots.volumes.remove(volume_id))
    }
}

/// Tracks which volumes each node holds and enforces the ceiling.
#[derive(Debug)]
pub struct NodeCapacityTracker {
    limit: usize,
    table: Mutex<CapacityTable>,
}

impl NodeCapacityTracker {
    /// Creates a tracker enforcing `limit` volumes per node.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            table: Mutex::new(CapacityTable::default()),
        }
    }

    /// Per-node ceiling.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Records the location of a node.
    pub fn register_node(&self, node_id: &str, location: &str) {
        self.with_table(|table| table.set_location(node_id, location));
    }

    /// Location recorded for a node, if known.
    #[must_use]
    pub fn node_location(&self, node_id: &str) -> Option<String> {
        self.with_table(|table| {
            table
                .nodes
                .get(node_id)
                .and_then(|slots| slots.location.clone())
        })
    }

    /// Number of volumes holding a slot on the node.
    #[must_use]
    pub fn attached_count(&self, node_id: &str) -> usize {
        self.with_table(|table| {
            table
                .nodes
                .get(node_id)
                .map_or(0, |slots| slots.volumes.len())
        })
    }

    /// Volumes holding a slot on the node, in identifier order.
    #[must_use]
    pub fn attached_volumes(&self, node_id: &str) -> Vec<String> {
        self.with_table(|table| {
            table
                .nodes
                .get(node_id)
                .map(|slots| slots.volumes.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Claims a slot on the node.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NodeAtCapacity`] when the node is full.
    pub fn reserve(&self, node_id: &str, volume_id: &str) -> Result<usize, DriverError> {
        let limit = self.limit;
        self.with_table(|table| table.reserve(limit, node_id, volume_id))
    }

    /// Frees a slot on the node; returns whether one was held.
    pub fn release(&self, node_id: &str, volume_id: &str) -> bool {
        self.with_table(|table| table.release(node_id, volume_id))
    }

    pub(crate) fn with_table<R>(&self, apply: impl FnOnce(&mut CapacityTable) -> R) -> R {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_stops_at_limit() {
        let tracker = NodeCapacityTracker::new(2);
        assert_eq!(tracker.reserve("n1", "a").expect("first"), 1);
        assert_eq!(tracker.reserve("n1", "b").expect("second"), 2);
        let err = tracker.reserve("n1", "c").expect_err("third exceeds");
        assert_eq!(
            err,
            DriverError::NodeAtCapacity {
                node_id: String::from("n1"),
                attached: 2,
                limit: 2,
            }
        );
        assert_eq!(tracker.attached_count("n1"), 2);
    }

    #[test]
    fn reserving_held_slot_is_idempotent() {
        let tracker = NodeCapacityTracker::new(1);
        tracker.reserve("n1", "a").expect("first");
        assert_eq!(tracker.reserve("n1", "a").expect("again"), 1);
    }

    #[test]
    fn release_frees_slot_once() {
        let tracker = NodeCapacityTracker::new(16);
        tracker.reserve("n1", "a").expect("reserve");
        assert!(tracker.release("n1", "a"));
        assert!(!tracker.release("n1", "a"));
        assert!(tracker.attached_volumes("n1").is_empty());
    }

    #[test]
    fn node_location_survives_reservations() {
        let tracker = NodeCapacityTracker::new(16);
        tracker.reserve("n1", "a").expect("reserve");
        tracker.register_node("n1", "hel1");
        assert_eq!(tracker.node_location("n1").as_deref(), Some("hel1"));
        assert_eq!(tracker.attached_volumes("n1"), vec![String::from("a")]);
    }
}
