//! Engine facade: top-level API for the careplan system.
//!
//! The `CareEngine` owns the store, the template catalog and the window
//! policy, and exposes every operation as one transaction against one
//! patient. Fleet-wide runs fan out one transaction per patient.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use rayon::prelude::*;

use crate::adherence::{self, Adherence, AdherenceReport, AdherenceScope};
use crate::catalog::TemplateCatalog;
use crate::completion::{self, Completion, MetricOutcome};
use crate::config::CareConfig;
use crate::error::{CareError, CareResult, PlanError, TaskError};
use crate::id::{CycleId, PatientId, PlanItemId, TaskId};
use crate::plan::{
    CycleStatus, NewCycle, NewPlanItem, PlanItem, PlanItemStatus, ScheduleDays, TreatmentCycle,
    validate_length,
};
use crate::scheduler::{self, GenerationReport};
use crate::status::{self, RefreshReport};
use crate::store::{CareStore, PatientTables};
use crate::summary::{self, SummaryRow};
use crate::task::{DailyTask, MetricReading, NewAdHocTask, ReportType};

/// Outcome of a fleet-wide generation run.
#[derive(Debug, Default)]
pub struct FleetReport {
    pub patients: usize,
    pub created: usize,
    pub removed: usize,
    /// Patients whose transaction rolled back, with the reason.
    pub failures: Vec<(PatientId, CareError)>,
}

impl FleetReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The careplan engine.
pub struct CareEngine {
    config: CareConfig,
    store: CareStore,
    catalog: Arc<dyn TemplateCatalog>,
}

impl CareEngine {
    /// Create an engine using the catalog from the config.
    pub fn new(config: CareConfig) -> CareResult<Self> {
        let catalog = Arc::new(config.catalog.clone().indexed());
        Self::with_catalog(config, catalog)
    }

    /// Create an engine with an external template catalog.
    pub fn with_catalog(config: CareConfig, catalog: Arc<dyn TemplateCatalog>) -> CareResult<Self> {
        config.validate()?;
        let store = match &config.data_dir {
            Some(dir) => CareStore::with_persistence(dir)?,
            None => CareStore::memory_only(),
        };
        tracing::info!(
            persistent = store.is_persistent(),
            patients = store.patients().len(),
            window_days = config.window.default_days,
            "initializing careplan engine"
        );
        Ok(Self {
            config,
            store,
            catalog,
        })
    }

    /// Validate a raw patient reference.
    pub fn patient_id(raw: u64) -> CareResult<PatientId> {
        PatientId::new(raw).ok_or_else(|| PlanError::InvalidPatient { raw }.into())
    }

    pub fn config(&self) -> &CareConfig {
        &self.config
    }

    pub fn store(&self) -> &CareStore {
        &self.store
    }

    /// Known patients, sorted.
    pub fn patients(&self) -> Vec<PatientId> {
        self.store.patients()
    }

    // ── Plan editing ─────────────────────────────────────────────────

    /// Create a treatment cycle, registering the patient on first use.
    pub fn create_cycle(&self, patient: PatientId, new: NewCycle) -> CareResult<CycleId> {
        new.validate()?;
        let id = self
            .store
            .transaction_or_create(patient, |tx| Ok(tx.insert_cycle(new)?))?;
        tracing::info!(%patient, cycle = %id, "cycle created");
        Ok(id)
    }

    pub fn set_cycle_status(
        &self,
        patient: PatientId,
        cycle: CycleId,
        status: CycleStatus,
    ) -> CareResult<()> {
        self.store.transaction(patient, |tx| {
            cycle_mut(tx, cycle)?.status = status;
            Ok(())
        })
    }

    /// Set or clear the explicit end date of a cycle.
    pub fn set_cycle_end_date(
        &self,
        patient: PatientId,
        cycle: CycleId,
        end_date: Option<NaiveDate>,
    ) -> CareResult<()> {
        self.store.transaction(patient, |tx| {
            let row = cycle_mut(tx, cycle)?;
            validate_length(row.start_date, row.cycle_days, end_date)?;
            row.end_date = end_date;
            Ok(())
        })
    }

    /// Delete a cycle and its plan items. Their tasks stay, unlinked.
    pub fn delete_cycle(&self, patient: PatientId, cycle: CycleId) -> CareResult<()> {
        self.store.transaction(patient, |tx| {
            tx.delete_cycle(cycle)
                .map(|_| ())
                .ok_or_else(|| cycle_not_found(cycle))
        })
    }

    pub fn cycles(&self, patient: PatientId) -> CareResult<Vec<TreatmentCycle>> {
        self.store
            .read(patient, |t| t.cycles().cloned().collect())
    }

    /// Plan items of one cycle.
    pub fn plan_items(&self, patient: PatientId, cycle: CycleId) -> CareResult<Vec<PlanItem>> {
        self.store.read(patient, |t| -> CareResult<Vec<PlanItem>> {
            t.cycle(cycle).ok_or_else(|| cycle_not_found(cycle))?;
            Ok(t.plan_items().filter(|i| i.cycle_id == cycle).cloned().collect())
        })?
    }

    pub fn add_plan_item(
        &self,
        patient: PatientId,
        cycle: CycleId,
        new: NewPlanItem,
    ) -> CareResult<PlanItemId> {
        new.validate()?;
        self.store.transaction(patient, |tx| {
            tx.cycle(cycle).ok_or_else(|| cycle_not_found(cycle))?;
            Ok(tx.insert_plan_item(cycle, new)?)
        })
    }

    /// Replace an item's schedule. Takes effect at the next generation run.
    pub fn set_schedule_days(
        &self,
        patient: PatientId,
        item: PlanItemId,
        days: ScheduleDays,
    ) -> CareResult<()> {
        self.store.transaction(patient, |tx| {
            item_mut(tx, item)?.schedule_days = days;
            Ok(())
        })
    }

    pub fn set_plan_item_enabled(
        &self,
        patient: PatientId,
        item: PlanItemId,
        enabled: bool,
    ) -> CareResult<()> {
        let status = if enabled {
            PlanItemStatus::Active
        } else {
            PlanItemStatus::Disabled
        };
        self.store.transaction(patient, |tx| {
            item_mut(tx, item)?.status = status;
            Ok(())
        })
    }

    /// Delete a plan item; its tasks keep their snapshot with the link nulled.
    pub fn delete_plan_item(&self, patient: PatientId, item: PlanItemId) -> CareResult<()> {
        self.store.transaction(patient, |tx| {
            tx.delete_plan_item(item)
                .map(|_| ())
                .ok_or_else(|| item_not_found(item))
        })
    }

    /// Create a task no plan item owns (e.g. ad-hoc monitoring).
    pub fn add_adhoc_task(
        &self,
        patient: PatientId,
        new: NewAdHocTask,
        today: NaiveDate,
    ) -> CareResult<TaskId> {
        if new.snapshot.title.trim().is_empty() {
            return Err(PlanError::EmptyName { field: "task title" }.into());
        }
        let status = status::initial_status(new.task_date, today);
        self.store.transaction_or_create(patient, |tx| Ok(tx.insert_adhoc_task(new, status)?))
    }

    // ── Scheduling ───────────────────────────────────────────────────

    /// Clean up and generate one patient's tasks for `date` onwards.
    pub fn generate_for_patient(
        &self,
        patient: PatientId,
        date: NaiveDate,
    ) -> CareResult<GenerationReport> {
        self.store.transaction(patient, |tx| {
            Ok(scheduler::generate_daily_tasks(tx, date, self.catalog.as_ref())?)
        })
    }

    /// Generate for every patient in parallel, one transaction each. A failing
    /// patient is recorded and the rest of the fleet carries on.
    pub fn run_daily_generation(&self, date: NaiveDate) -> FleetReport {
        let patients = self.store.patients();
        let results: Vec<(PatientId, CareResult<GenerationReport>)> = patients
            .par_iter()
            .map(|p| (*p, self.generate_for_patient(*p, date)))
            .collect();

        let mut report = FleetReport {
            patients: patients.len(),
            ..FleetReport::default()
        };
        for (patient, result) in results {
            match result {
                Ok(r) => {
                    report.created += r.created;
                    report.removed += r.removed.total();
                }
                Err(e) => {
                    tracing::warn!(%patient, error = %e, "daily generation failed");
                    report.failures.push((patient, e));
                }
            }
        }
        tracing::info!(
            %date,
            patients = report.patients,
            created = report.created,
            removed = report.removed,
            failed = report.failures.len(),
            "daily generation finished"
        );
        report
    }

    /// Fleet-wide generation returning the number of tasks created, or the
    /// first failure.
    pub fn generate_daily_tasks(&self, date: NaiveDate) -> CareResult<usize> {
        let report = self.run_daily_generation(date);
        match report.failures.into_iter().next() {
            Some((_, err)) => Err(err),
            None => Ok(report.created),
        }
    }

    // ── Status ───────────────────────────────────────────────────────

    /// Refresh one patient, or every patient when `patient` is `None`.
    pub fn refresh_task_statuses(
        &self,
        as_of: NaiveDate,
        patient: Option<PatientId>,
    ) -> CareResult<RefreshReport> {
        let policy = &self.config.window;
        let refresh_one = |p: PatientId| {
            self.store
                .transaction(p, |tx| Ok(status::refresh_task_statuses(tx, as_of, policy)))
        };
        match patient {
            Some(p) => refresh_one(p),
            None => self
                .store
                .patients()
                .par_iter()
                .map(|p| refresh_one(*p))
                .try_reduce(RefreshReport::default, |mut acc, r| {
                    acc += r;
                    Ok(acc)
                }),
        }
    }

    // ── Completion ───────────────────────────────────────────────────

    pub fn complete_medication(
        &self,
        patient: PatientId,
        occurred_at: NaiveDateTime,
        today: NaiveDate,
    ) -> CareResult<Completion> {
        self.store.transaction(patient, |tx| {
            Ok(completion::complete_medication(tx, occurred_at, today))
        })
    }

    pub fn complete_questionnaire(
        &self,
        patient: PatientId,
        occurred_at: NaiveDateTime,
        today: NaiveDate,
    ) -> CareResult<Completion> {
        self.store.transaction(patient, |tx| {
            Ok(completion::complete_questionnaire(tx, occurred_at, today))
        })
    }

    pub fn complete_checkup(
        &self,
        patient: PatientId,
        occurred_at: NaiveDateTime,
        today: NaiveDate,
        report_type: Option<ReportType>,
    ) -> CareResult<Completion> {
        self.store.transaction(patient, |tx| {
            Ok(completion::complete_checkup(tx, occurred_at, today, report_type))
        })
    }

    pub fn complete_monitoring(
        &self,
        patient: PatientId,
        metric_code: &str,
        occurred_at: NaiveDateTime,
        today: NaiveDate,
    ) -> CareResult<Completion> {
        self.store.transaction(patient, |tx| {
            Ok(completion::complete_monitoring(
                tx,
                self.catalog.as_ref(),
                metric_code,
                occurred_at,
                today,
            ))
        })
    }

    /// Store a metric reading and close the matching monitoring task.
    pub fn record_metric(
        &self,
        patient: PatientId,
        reading: MetricReading,
        today: NaiveDate,
    ) -> CareResult<MetricOutcome> {
        self.store.transaction(patient, |tx| {
            completion::record_metric(tx, self.catalog.as_ref(), reading, today)
        })
    }

    // ── Read views ───────────────────────────────────────────────────

    /// Summary rows for `date`, or for `today` with the trailing backlog when
    /// `date` is `None` (statuses are refreshed first).
    pub fn daily_summary(
        &self,
        patient: PatientId,
        date: Option<NaiveDate>,
        today: NaiveDate,
    ) -> CareResult<Vec<SummaryRow>> {
        if date.is_none() {
            self.refresh_task_statuses(today, Some(patient))?;
        }
        self.store.read(patient, |t| {
            summary::daily_summary(t, date, today, &self.config.window)
        })
    }

    pub fn adherence(&self, patient: PatientId, scope: AdherenceScope) -> CareResult<Adherence> {
        self.store
            .read(patient, |t| adherence::adherence(t, scope))
    }

    pub fn adherence_report(&self, patient: PatientId) -> CareResult<AdherenceReport> {
        self.store.read(patient, adherence::adherence_report)
    }

    /// Tasks dated within `[from, to]`, ordered by date then id.
    pub fn tasks_for(
        &self,
        patient: PatientId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> CareResult<Vec<DailyTask>> {
        self.store.read(patient, |t| {
            let mut tasks: Vec<DailyTask> = t
                .tasks()
                .filter(|task| task.task_date >= from && task.task_date <= to)
                .cloned()
                .collect();
            tasks.sort_by_key(|task| (task.task_date, task.id));
            tasks
        })
    }

    pub fn task(&self, patient: PatientId, id: TaskId) -> CareResult<DailyTask> {
        self.store.read(patient, |t| -> CareResult<DailyTask> {
            let task = t.task(id).ok_or(TaskError::TaskNotFound { task_id: id.get() })?;
            Ok(task.clone())
        })?
    }
}

impl std::fmt::Debug for CareEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CareEngine")
            .field("store", &self.store)
            .field("window", &self.config.window)
            .finish()
    }
}

fn cycle_not_found(cycle: CycleId) -> CareError {
    PlanError::CycleNotFound {
        cycle_id: cycle.get(),
    }
    .into()
}

fn item_not_found(item: PlanItemId) -> CareError {
    PlanError::PlanItemNotFound {
        plan_item_id: item.get(),
    }
    .into()
}

fn cycle_mut(tables: &mut PatientTables, cycle: CycleId) -> CareResult<&mut TreatmentCycle> {
    tables.cycle_mut(cycle).ok_or_else(|| cycle_not_found(cycle))
}

fn item_mut(tables: &mut PatientTables, item: PlanItemId) -> CareResult<&mut PlanItem> {
    tables.plan_item_mut(item).ok_or_else(|| item_not_found(item))
}
