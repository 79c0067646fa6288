//! Relational tables for one patient partition.
//!
//! `PatientTables` holds the cycles, plan items, daily tasks and metric
//! records of a single patient and enforces the constraints a relational
//! schema would: cascade delete cycle → plan items, set-null plan item →
//! tasks, and a unique `(plan_item, task_date)` index for generated tasks.
//! Every mutation records the touched row in a dirty set so the durable
//! tier can write exactly those rows on commit.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::id::{CycleId, IdAllocator, MetricId, PatientId, PlanItemId, TaskId, TemplateId};
use crate::plan::{Category, NewCycle, NewPlanItem, PlanItem, TreatmentCycle};
use crate::task::{DailyTask, MetricReading, MetricRecord, NewAdHocTask, TaskOrigin, TaskSnapshot, TaskStatus};

use super::StoreResult;

/// A row touched inside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowKey {
    Cycle(CycleId),
    PlanItem(PlanItemId),
    Task(TaskId),
    Metric(MetricId),
}

/// All rows belonging to one patient.
#[derive(Debug, Clone)]
pub struct PatientTables {
    patient: PatientId,
    cycles: BTreeMap<CycleId, TreatmentCycle>,
    plan_items: BTreeMap<PlanItemId, PlanItem>,
    tasks: BTreeMap<TaskId, DailyTask>,
    metrics: BTreeMap<MetricId, MetricRecord>,
    plan_index: BTreeMap<(PlanItemId, NaiveDate), TaskId>,
    dirty: BTreeSet<RowKey>,
}

impl PatientTables {
    pub fn new(patient: PatientId) -> Self {
        Self {
            patient,
            cycles: BTreeMap::new(),
            plan_items: BTreeMap::new(),
            tasks: BTreeMap::new(),
            metrics: BTreeMap::new(),
            plan_index: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    pub fn patient(&self) -> PatientId {
        self.patient
    }

    // ── Cycles ───────────────────────────────────────────────────────

    pub fn cycles(&self) -> impl Iterator<Item = &TreatmentCycle> {
        self.cycles.values()
    }

    pub fn cycle(&self, id: CycleId) -> Option<&TreatmentCycle> {
        self.cycles.get(&id)
    }

    pub fn cycle_mut(&mut self, id: CycleId) -> Option<&mut TreatmentCycle> {
        let cycle = self.cycles.get_mut(&id)?;
        self.dirty.insert(RowKey::Cycle(id));
        Some(cycle)
    }

    /// Delete a cycle and, by cascade, its plan items.
    pub fn delete_cycle(&mut self, id: CycleId) -> Option<TreatmentCycle> {
        let cycle = self.cycles.remove(&id)?;
        self.dirty.insert(RowKey::Cycle(id));
        let owned: Vec<PlanItemId> = self
            .plan_items
            .values()
            .filter(|item| item.cycle_id == id)
            .map(|item| item.id)
            .collect();
        for item in owned {
            self.delete_plan_item(item);
        }
        Some(cycle)
    }

    // ── Plan items ───────────────────────────────────────────────────

    pub fn plan_items(&self) -> impl Iterator<Item = &PlanItem> {
        self.plan_items.values()
    }

    pub fn plan_item(&self, id: PlanItemId) -> Option<&PlanItem> {
        self.plan_items.get(&id)
    }

    pub fn plan_item_mut(&mut self, id: PlanItemId) -> Option<&mut PlanItem> {
        let item = self.plan_items.get_mut(&id)?;
        self.dirty.insert(RowKey::PlanItem(id));
        Some(item)
    }

    /// Cycle owning a plan item.
    pub fn cycle_of(&self, item: &PlanItem) -> Option<&TreatmentCycle> {
        self.cycles.get(&item.cycle_id)
    }

    /// Delete a plan item; its tasks survive with the reference nulled.
    pub fn delete_plan_item(&mut self, id: PlanItemId) -> Option<PlanItem> {
        let item = self.plan_items.remove(&id)?;
        self.dirty.insert(RowKey::PlanItem(id));
        let linked: Vec<TaskId> = self
            .plan_index
            .range((id, NaiveDate::MIN)..=(id, NaiveDate::MAX))
            .map(|(_, task)| *task)
            .collect();
        for task_id in linked {
            if let Some(task) = self.tasks.get_mut(&task_id) {
                task.plan_item = None;
                self.dirty.insert(RowKey::Task(task_id));
            }
        }
        self.plan_index
            .retain(|(item_id, _), _| *item_id != id);
        Some(item)
    }

    // ── Tasks ────────────────────────────────────────────────────────

    pub fn tasks(&self) -> impl Iterator<Item = &DailyTask> {
        self.tasks.values()
    }

    pub fn task(&self, id: TaskId) -> Option<&DailyTask> {
        self.tasks.get(&id)
    }

    pub fn task_mut(&mut self, id: TaskId) -> Option<&mut DailyTask> {
        let task = self.tasks.get_mut(&id)?;
        self.dirty.insert(RowKey::Task(id));
        Some(task)
    }

    /// Generated task for `(plan_item, date)`, if one exists.
    pub fn task_for(&self, plan_item: PlanItemId, date: NaiveDate) -> Option<TaskId> {
        self.plan_index.get(&(plan_item, date)).copied()
    }

    /// Template a task belongs to: the live plan item's template if the item
    /// still exists, else the one snapshotted at creation.
    pub fn template_of(&self, task: &DailyTask) -> Option<TemplateId> {
        task.plan_item
            .and_then(|id| self.plan_items.get(&id))
            .map(|item| item.template_id)
            .or(task.snapshot.template_id)
    }

    /// Ids of tasks matching `pred`, in id order.
    pub fn task_ids_where(&self, pred: impl Fn(&DailyTask) -> bool) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| pred(t))
            .map(|t| t.id)
            .collect()
    }

    /// Delete every task matching `pred`. Returns the number removed.
    pub fn remove_tasks_where(&mut self, pred: impl Fn(&DailyTask) -> bool) -> usize {
        let doomed = self.task_ids_where(pred);
        for id in &doomed {
            if let Some(task) = self.tasks.remove(id) {
                if let Some(item) = task.plan_item {
                    self.plan_index.remove(&(item, task.task_date));
                }
                self.dirty.insert(RowKey::Task(*id));
            }
        }
        doomed.len()
    }

    // ── Metrics ──────────────────────────────────────────────────────

    pub fn metrics(&self) -> impl Iterator<Item = &MetricRecord> {
        self.metrics.values()
    }

    pub fn metric(&self, id: MetricId) -> Option<&MetricRecord> {
        self.metrics.get(&id)
    }

    pub fn metric_mut(&mut self, id: MetricId) -> Option<&mut MetricRecord> {
        let metric = self.metrics.get_mut(&id)?;
        self.dirty.insert(RowKey::Metric(id));
        Some(metric)
    }

    // ── Raw row access (loader + transaction) ───────────────────────

    pub(crate) fn put_cycle(&mut self, cycle: TreatmentCycle) {
        self.dirty.insert(RowKey::Cycle(cycle.id));
        self.cycles.insert(cycle.id, cycle);
    }

    pub(crate) fn put_plan_item(&mut self, item: PlanItem) {
        self.dirty.insert(RowKey::PlanItem(item.id));
        self.plan_items.insert(item.id, item);
    }

    pub(crate) fn put_task(&mut self, task: DailyTask) {
        if let Some(item) = task.plan_item {
            self.plan_index.insert((item, task.task_date), task.id);
        }
        self.dirty.insert(RowKey::Task(task.id));
        self.tasks.insert(task.id, task);
    }

    pub(crate) fn put_metric(&mut self, metric: MetricRecord) {
        self.dirty.insert(RowKey::Metric(metric.id));
        self.metrics.insert(metric.id, metric);
    }

    pub(crate) fn take_dirty(&mut self) -> BTreeSet<RowKey> {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty.clear();
    }
}

/// A patient-scoped transaction: a working copy of the partition plus the
/// shared id allocator. Dropped without commit on error.
pub struct Tx<'a> {
    pub(crate) tables: PatientTables,
    pub(crate) ids: &'a IdAllocator,
}

impl std::ops::Deref for Tx<'_> {
    type Target = PatientTables;

    fn deref(&self) -> &PatientTables {
        &self.tables
    }
}

impl std::ops::DerefMut for Tx<'_> {
    fn deref_mut(&mut self) -> &mut PatientTables {
        &mut self.tables
    }
}

impl Tx<'_> {
    pub fn insert_cycle(&mut self, new: NewCycle) -> StoreResult<CycleId> {
        let id = self.ids.next_cycle()?;
        let patient = self.tables.patient;
        self.tables.put_cycle(new.into_cycle(id, patient));
        Ok(id)
    }

    pub fn insert_plan_item(&mut self, cycle: CycleId, new: NewPlanItem) -> StoreResult<PlanItemId> {
        let id = self.ids.next_plan_item()?;
        self.tables.put_plan_item(new.into_item(id, cycle));
        Ok(id)
    }

    /// Idempotent insert keyed by `(plan_item, date)`. `build` runs only when
    /// the row is absent. Returns the task id and whether it was created.
    pub fn get_or_create_task(
        &mut self,
        plan_item: PlanItemId,
        task_date: NaiveDate,
        build: impl FnOnce() -> (Category, TaskSnapshot, TaskStatus),
    ) -> StoreResult<(TaskId, bool)> {
        if let Some(existing) = self.tables.task_for(plan_item, task_date) {
            return Ok((existing, false));
        }
        let (task_type, snapshot, status) = build();
        let id = self.ids.next_task()?;
        self.tables.put_task(DailyTask {
            id,
            patient: self.tables.patient,
            plan_item: Some(plan_item),
            origin: TaskOrigin::Plan,
            task_date,
            task_type,
            snapshot,
            status,
            completed_at: None,
        });
        Ok((id, true))
    }

    pub fn insert_adhoc_task(&mut self, new: NewAdHocTask, status: TaskStatus) -> StoreResult<TaskId> {
        let id = self.ids.next_task()?;
        self.tables.put_task(DailyTask {
            id,
            patient: self.tables.patient,
            plan_item: None,
            origin: TaskOrigin::AdHoc,
            task_date: new.task_date,
            task_type: new.task_type,
            snapshot: new.snapshot,
            status,
            completed_at: None,
        });
        Ok(id)
    }

    pub fn insert_metric(&mut self, reading: MetricReading) -> StoreResult<MetricId> {
        let id = self.ids.next_metric()?;
        self.tables.put_metric(MetricRecord {
            id,
            patient: self.tables.patient,
            metric_code: reading.metric_code,
            value_main: reading.value_main,
            value_sub: reading.value_sub,
            measured_at: reading.measured_at,
            task_id: None,
        });
        Ok(id)
    }
}
