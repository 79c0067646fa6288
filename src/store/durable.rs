//! ACID-durable row store backed by redb.
//!
//! Each logical table (cycles, plan items, tasks, metrics) is a redb table
//! keyed by `(patient, row id)` with bincode-encoded rows. A committed
//! patient transaction is written here in a single redb write transaction
//! before the in-memory partition is swapped, so a failed write leaves both
//! tiers at the previous state.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;
use crate::id::PatientId;
use crate::plan::{PlanItem, TreatmentCycle};
use crate::store::StoreResult;
use crate::task::{DailyTask, MetricRecord};

use super::tables::{PatientTables, RowKey};

type RowTable = TableDefinition<'static, (u64, u64), &'static [u8]>;

const CYCLES: RowTable = TableDefinition::new("cycles");
const PLAN_ITEMS: RowTable = TableDefinition::new("plan_items");
const TASKS: RowTable = TableDefinition::new("daily_tasks");
const METRICS: RowTable = TableDefinition::new("metrics");

/// Store-wide counters (id allocator high-water mark).
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");
const NEXT_ID_KEY: &str = "next_id";

fn redb_err(context: &str) -> impl Fn(redb::Error) -> StoreError + '_ {
    move |e| StoreError::Redb {
        message: format!("{context} failed: {e}"),
    }
}

fn encode<T: Serialize>(row: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(row).map_err(|e| StoreError::Serialization {
        message: format!("failed to encode row: {e}"),
    })
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization {
        message: format!("failed to decode row: {e}"),
    })
}

/// Everything read back from disk on open.
#[derive(Debug)]
pub struct Snapshot {
    pub partitions: Vec<PatientTables>,
    pub next_id: u64,
}

/// ACID-durable store using redb.
pub struct DurableStore {
    db: Arc<Database>,
}

impl DurableStore {
    /// Open or create the database in the given directory and make sure all
    /// tables exist.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io { source: e })?;
        let db_path = data_dir.join("careplan.redb");
        let db = Database::create(&db_path).map_err(|e| StoreError::Redb {
            message: format!("failed to open redb at {}: {e}", db_path.display()),
        })?;

        let txn = db
            .begin_write()
            .map_err(|e| redb_err("begin_write")(e.into()))?;
        for def in [CYCLES, PLAN_ITEMS, TASKS, METRICS] {
            txn.open_table(def)
                .map_err(|e| redb_err("open_table")(e.into()))?;
        }
        txn.open_table(META)
            .map_err(|e| redb_err("open_table")(e.into()))?;
        txn.commit().map_err(|e| redb_err("commit")(e.into()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Write the rows named in `dirty` as they now stand in `tables`; rows
    /// missing from `tables` are deleted.
    pub fn apply(
        &self,
        tables: &PatientTables,
        dirty: &BTreeSet<RowKey>,
        next_id: u64,
    ) -> StoreResult<()> {
        let patient = tables.patient().get();
        let txn = self
            .db
            .begin_write()
            .map_err(|e| redb_err("begin_write")(e.into()))?;
        {
            let mut cycles = txn.open_table(CYCLES).map_err(|e| redb_err("open_table")(e.into()))?;
            let mut items = txn
                .open_table(PLAN_ITEMS)
                .map_err(|e| redb_err("open_table")(e.into()))?;
            let mut tasks = txn.open_table(TASKS).map_err(|e| redb_err("open_table")(e.into()))?;
            let mut metrics = txn.open_table(METRICS).map_err(|e| redb_err("open_table")(e.into()))?;

            for key in dirty {
                let (table, id, row) = match *key {
                    RowKey::Cycle(id) => (&mut cycles, id.get(), tables.cycle(id).map(encode).transpose()?),
                    RowKey::PlanItem(id) => (&mut items, id.get(), tables.plan_item(id).map(encode).transpose()?),
                    RowKey::Task(id) => (&mut tasks, id.get(), tables.task(id).map(encode).transpose()?),
                    RowKey::Metric(id) => (&mut metrics, id.get(), tables.metric(id).map(encode).transpose()?),
                };
                match row {
                    Some(bytes) => {
                        table
                            .insert((patient, id), bytes.as_slice())
                            .map_err(|e| redb_err("insert")(e.into()))?;
                    }
                    None => {
                        table
                            .remove((patient, id))
                            .map_err(|e| redb_err("remove")(e.into()))?;
                    }
                }
            }

            let mut meta = txn.open_table(META).map_err(|e| redb_err("open_table")(e.into()))?;
            meta.insert(NEXT_ID_KEY, next_id)
                .map_err(|e| redb_err("insert")(e.into()))?;
        }
        txn.commit().map_err(|e| redb_err("commit")(e.into()))?;
        Ok(())
    }

    /// Read every row and rebuild the per-patient partitions.
    pub fn load(&self) -> StoreResult<Snapshot> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| redb_err("begin_read")(e.into()))?;
        let mut partitions: BTreeMap<u64, PatientTables> = BTreeMap::new();
        let mut max_id = 0u64;

        let mut each_row = |def: RowTable,
                            put: &mut dyn FnMut(&mut PatientTables, &[u8]) -> StoreResult<()>|
         -> StoreResult<()> {
            let table = txn
                .open_table(def)
                .map_err(|e| redb_err("open_table")(e.into()))?;
            for entry in table.iter().map_err(|e| redb_err("iter")(e.into()))? {
                let (key, value) = entry.map_err(|e| redb_err("read")(e.into()))?;
                let (patient, id) = key.value();
                max_id = max_id.max(id);
                let Some(patient_id) = PatientId::new(patient) else {
                    continue;
                };
                let tables = partitions
                    .entry(patient)
                    .or_insert_with(|| PatientTables::new(patient_id));
                put(tables, value.value())?;
            }
            Ok(())
        };

        each_row(CYCLES, &mut |t, b| {
            t.put_cycle(decode::<TreatmentCycle>(b)?);
            Ok(())
        })?;
        each_row(PLAN_ITEMS, &mut |t, b| {
            t.put_plan_item(decode::<PlanItem>(b)?);
            Ok(())
        })?;
        each_row(TASKS, &mut |t, b| {
            t.put_task(decode::<DailyTask>(b)?);
            Ok(())
        })?;
        each_row(METRICS, &mut |t, b| {
            t.put_metric(decode::<MetricRecord>(b)?);
            Ok(())
        })?;

        let meta = txn.open_table(META).map_err(|e| redb_err("open_table")(e.into()))?;
        let stored_next = meta
            .get(NEXT_ID_KEY)
            .map_err(|e| redb_err("get")(e.into()))?
            .map(|guard| guard.value())
            .unwrap_or(1);

        let partitions = partitions
            .into_values()
            .map(|mut tables| {
                tables.clear_dirty();
                tables
            })
            .collect();
        Ok(Snapshot {
            partitions,
            next_id: stored_next.max(max_id + 1),
        })
    }

}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore").finish()
    }
}
