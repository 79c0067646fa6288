//! In-memory hot storage backed by DashMap.
//!
//! One [`PatientTables`] partition per patient, each behind its own mutex, so
//! transactions for the same patient serialize while different patients
//! proceed in parallel. All data is lost on process exit unless a durable
//! tier is attached.

use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::id::PatientId;

use super::tables::PatientTables;

/// Shared handle to one patient partition.
pub type Partition = Arc<Mutex<PatientTables>>;

/// Concurrent map of patient partitions.
#[derive(Debug, Default)]
pub struct MemStore {
    partitions: DashMap<PatientId, Partition>,
}

impl MemStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self {
            partitions: DashMap::new(),
        }
    }

    /// Partition for `patient`, if the patient is known.
    pub fn get(&self, patient: PatientId) -> Option<Partition> {
        self.partitions.get(&patient).map(|p| Arc::clone(p.value()))
    }

    /// Run `f` on the partition for `patient`. A patient seen for the first
    /// time gets a fresh partition that is published only if `f` succeeds.
    /// The vacant entry blocks other callers for the same shard until then.
    pub fn with_partition<R, E>(
        &self,
        patient: PatientId,
        f: impl FnOnce(&Partition) -> Result<R, E>,
    ) -> Result<R, E> {
        match self.partitions.entry(patient) {
            Entry::Occupied(entry) => {
                let partition = Arc::clone(entry.get());
                drop(entry);
                f(&partition)
            }
            Entry::Vacant(entry) => {
                let partition = Arc::new(Mutex::new(PatientTables::new(patient)));
                let out = f(&partition)?;
                entry.insert(partition);
                Ok(out)
            }
        }
    }

    /// Install a fully loaded partition (used when restoring from disk).
    pub fn insert(&self, tables: PatientTables) {
        self.partitions
            .insert(tables.patient(), Arc::new(Mutex::new(tables)));
    }

    pub fn contains(&self, patient: PatientId) -> bool {
        self.partitions.contains_key(&patient)
    }

    /// Snapshot of known patients, sorted.
    pub fn patients(&self) -> Vec<PatientId> {
        let mut ids: Vec<PatientId> = self.partitions.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }
}

/// Lock a partition. A panic inside an earlier transaction never reached the
/// swap step, so the guarded tables are still the last committed state.
pub fn lock(partition: &Partition) -> MutexGuard<'_, PatientTables> {
    partition.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(raw: u64) -> PatientId {
        PatientId::new(raw).unwrap()
    }

    #[test]
    fn successful_first_use_publishes_partition() {
        let store = MemStore::new();
        assert!(store.get(p(3)).is_none());
        let out: Result<u32, ()> = store.with_partition(p(3), |_| Ok(7));
        assert_eq!(out, Ok(7));
        assert!(store.contains(p(3)));

        let again: Result<(), ()> = store.with_partition(p(3), |_| Ok(()));
        assert!(again.is_ok());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn failed_first_use_publishes_nothing() {
        let store = MemStore::new();
        let out: Result<(), &str> = store.with_partition(p(9), |_| Err("rolled back"));
        assert_eq!(out, Err("rolled back"));
        assert!(!store.contains(p(9)));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn failure_on_known_patient_keeps_partition() {
        let store = MemStore::new();
        store.insert(PatientTables::new(p(4)));
        let out: Result<(), ()> = store.with_partition(p(4), |_| Err(()));
        assert!(out.is_err());
        assert!(store.contains(p(4)));
    }

    #[test]
    fn patients_are_sorted() {
        let store = MemStore::new();
        for raw in [5, 1, 3] {
            store.insert(PatientTables::new(p(raw)));
        }
        let raw: Vec<u64> = store.patients().iter().map(|p| p.get()).collect();
        assert_eq!(raw, vec![1, 3, 5]);
    }
}
