//! Two-tier storage for care-plan data.
//!
//! - [`MemStore`](mem::MemStore): hot per-patient partitions in a DashMap
//! - [`DurableStore`](durable::DurableStore): ACID row tables in redb
//!
//! [`CareStore`] composes the tiers behind a patient-scoped transaction.
//! A transaction works on a private copy of the partition; on success the
//! touched rows are written to redb in one write transaction and the copy
//! replaces the live partition. On error the copy is dropped, so every
//! operation is all-or-nothing.

pub mod durable;
pub mod mem;
pub mod tables;

use std::path::Path;

use crate::error::{CareResult, StoreError, TaskError};
use crate::id::{IdAllocator, PatientId};

pub use tables::{PatientTables, RowKey, Tx};

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Hot partitions plus an optional durable tier.
pub struct CareStore {
    hot: mem::MemStore,
    durable: Option<durable::DurableStore>,
    ids: IdAllocator,
}

impl CareStore {
    /// Create a memory-only store (no persistence).
    pub fn memory_only() -> Self {
        Self {
            hot: mem::MemStore::new(),
            durable: None,
            ids: IdAllocator::new(),
        }
    }

    /// Open (or create) the redb file under `data_dir` and restore every
    /// patient partition from it.
    pub fn with_persistence(data_dir: &Path) -> StoreResult<Self> {
        let durable = durable::DurableStore::open(data_dir)?;
        let snapshot = durable.load()?;
        let hot = mem::MemStore::new();
        let restored = snapshot.partitions.len();
        for tables in snapshot.partitions {
            hot.insert(tables);
        }
        tracing::info!(
            patients = restored,
            next_id = snapshot.next_id,
            path = %data_dir.display(),
            "restored care store"
        );
        Ok(Self {
            hot,
            durable: Some(durable),
            ids: IdAllocator::starting_from(snapshot.next_id),
        })
    }

    /// Whether writes reach disk.
    pub fn is_persistent(&self) -> bool {
        self.durable.is_some()
    }

    /// Run `f` against an existing patient's partition.
    pub fn transaction<R>(
        &self,
        patient: PatientId,
        f: impl FnOnce(&mut Tx<'_>) -> CareResult<R>,
    ) -> CareResult<R> {
        let partition = self.hot.get(patient).ok_or(TaskError::PatientNotFound {
            patient_id: patient.get(),
        })?;
        self.commit(&partition, f)
    }

    /// Like [`transaction`](Self::transaction) but creates the patient's
    /// partition on first use. The partition only becomes visible once that
    /// first transaction commits.
    pub fn transaction_or_create<R>(
        &self,
        patient: PatientId,
        f: impl FnOnce(&mut Tx<'_>) -> CareResult<R>,
    ) -> CareResult<R> {
        self.hot
            .with_partition(patient, |partition| self.commit(partition, f))
    }

    fn commit<R>(
        &self,
        partition: &mem::Partition,
        f: impl FnOnce(&mut Tx<'_>) -> CareResult<R>,
    ) -> CareResult<R> {
        let mut live = mem::lock(partition);
        let mut tx = Tx {
            tables: live.clone(),
            ids: &self.ids,
        };
        tx.tables.clear_dirty();

        let out = f(&mut tx)?;

        let mut tables = tx.tables;
        let dirty = tables.take_dirty();
        if dirty.is_empty() {
            return Ok(out);
        }
        if let Some(durable) = &self.durable {
            durable.apply(&tables, &dirty, self.ids.peek())?;
        }
        tracing::debug!(patient = %tables.patient(), rows = dirty.len(), "committed");
        *live = tables;
        Ok(out)
    }

    /// Read-only access to a patient's committed state.
    pub fn read<R>(&self, patient: PatientId, f: impl FnOnce(&PatientTables) -> R) -> CareResult<R> {
        let partition = self.hot.get(patient).ok_or(TaskError::PatientNotFound {
            patient_id: patient.get(),
        })?;
        let tables = mem::lock(&partition);
        Ok(f(&tables))
    }

    pub fn contains(&self, patient: PatientId) -> bool {
        self.hot.contains(patient)
    }

    /// All known patients, sorted.
    pub fn patients(&self) -> Vec<PatientId> {
        self.hot.patients()
    }
}

impl std::fmt::Debug for CareStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CareStore")
            .field("patients", &self.hot.len())
            .field("persistent", &self.durable.is_some())
            .finish()
    }
}
