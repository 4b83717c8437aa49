//! In-memory volume registry.
//!
//! The registry is the orchestrator's view of what is true right now. It
//! performs no synchronisation of read-modify-write sequences itself;
//! callers hold the relevant [`crate::lock::KeyedLocks`] key.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::error::DriverError;
use crate::volume::Volume;

/// Mapping of volume identity to lifecycle state.
#[derive(Debug, Default)]
pub struct VolumeRegistry {
    volumes: Mutex<HashMap<String, Volume>>,
}

impl VolumeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the volume or [`DriverError::VolumeNotFound`].
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::VolumeNotFound`] for unknown identifiers.
    pub fn get(&self, volume_id: &str) -> Result<Volume, DriverError> {
        self.find(volume_id)
            .ok_or_else(|| DriverError::VolumeNotFound {
                volume_id: volume_id.to_owned(),
            })
    }

    /// Returns the volume when registered.
    #[must_use]
    pub fn find(&self, volume_id: &str) -> Option<Volume> {
        self.with_volumes(|volumes| volumes.get(volume_id).cloned())
    }

    /// Looks a volume up by its display name.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<Volume> {
        self.with_volumes(|volumes| volumes.values().find(|vol| vol.name == name).cloned())
    }

    /// Inserts or replaces a volume record.
    pub fn put(&self, volume: Volume) {
        self.with_volumes(|volumes| {
            volumes.insert(volume.id.clone(), volume);
        });
    }

    /// Removes a volume record, returning it when present.
    pub fn delete(&self, volume_id: &str) -> Option<Volume> {
        self.with_volumes(|volumes| volumes.remove(volume_id))
    }

    /// Snapshot of all volumes ordered by identifier.
    #[must_use]
    pub fn list(&self) -> Vec<Volume> {
        let mut volumes = self.with_volumes(|volumes| volumes.values().cloned().collect::<Vec<_>>());
        volumes.sort_by(|lhs, rhs| lhs.id.cmp(&rhs.id));
        volumes
    }

    /// Number of registered volumes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.with_volumes(|volumes| volumes.len())
    }

    /// Whether the registry holds no volumes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `apply` with exclusive access to the records. Used to commit a
    /// record change in the same critical section as a capacity change.
    pub(crate) fn with_volumes<R>(&self, apply: impl FnOnce(&mut HashMap<String, Volume>) -> R) -> R {
        let mut volumes = self.volumes.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut volumes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::VolumeStatus;

    fn volume(id: &str, name: &str) -> Volume {
        Volume {
            id: id.to_owned(),
            name: name.to_owned(),
            size_gb: 10,
            location: String::from("fsn1"),
            status: VolumeStatus::Available,
            device_path: format!("/dev/disk/by-id/scsi-0HC_Volume_{id}"),
            attachment: None,
        }
    }

    #[test]
    fn get_unknown_volume_is_not_found() {
        let registry = VolumeRegistry::new();
        let err = registry.get("missing").expect_err("unknown id");
        assert_eq!(
            err,
            DriverError::VolumeNotFound {
                volume_id: String::from("missing")
            }
        );
    }

    #[test]
    fn put_replaces_and_find_by_name_matches() {
        let registry = VolumeRegistry::new();
        registry.put(volume("1", "data"));
        registry.put(volume("1", "data").with_status(VolumeStatus::Deleting));

        let found = registry.find_by_name("data").expect("name lookup");
        assert_eq!(found.status, VolumeStatus::Deleting);
        assert_eq!(registry.len(), 1);
        assert!(registry.find_by_name("other").is_none());
    }

    #[test]
    fn list_is_ordered_by_id() {
        let registry = VolumeRegistry::new();
        registry.put(volume("b", "second"));
        registry.put(volume("a", "first"));
        let ids: Vec<_> = registry.list().into_iter().map(|vol| vol.id).collect();
        assert_eq!(ids, vec![String::from("a"), String::from("b")]);
    }

    #[test]
    fn delete_returns_removed_record() {
        let registry = VolumeRegistry::new();
        registry.put(volume("1", "data"));
        assert!(registry.delete("1").is_some());
        assert!(registry.delete("1").is_none());
        assert!(registry.is_empty());
    }
}
