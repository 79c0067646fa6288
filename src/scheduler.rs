//! Scheduler: materializes plan items into dated tasks.
//!
//! [`generate_daily_tasks`] runs two phases inside one patient transaction:
//!
//! 1. **Cleanup** deletes future, still-removable tasks that no longer match
//!    the plan (deleted or disabled item, terminated cycle, dropped schedule
//!    day). Completed tasks are never touched.
//! 2. **Generation** inserts the missing `(plan_item, date)` rows for every
//!    active item of an open cycle, snapshotting the item at that instant.
//!
//! Both phases are re-derivable from plan state, so a second call for the
//! same date with no plan edits in between creates nothing.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::catalog::TemplateCatalog;
use crate::id::{CycleId, PlanItemId};
use crate::plan::{Category, CycleStatus, PlanItem};
use crate::status::initial_status;
use crate::store::{PatientTables, StoreResult, Tx};
use crate::task::{TaskSnapshot, TaskStatus};

/// Rows removed by the cleanup phase, by reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub orphaned: usize,
    pub disabled: usize,
    pub terminated_cycle: usize,
    pub retracted: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.orphaned + self.disabled + self.terminated_cycle + self.retracted
    }
}

/// Outcome of one generation run for one patient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    pub removed: CleanupReport,
    pub created: usize,
}

/// Clean up and generate tasks for `target` and everything after it.
/// Returns the report; `report.created` is the number of new rows.
pub fn generate_daily_tasks(
    tx: &mut Tx<'_>,
    target: NaiveDate,
    catalog: &dyn TemplateCatalog,
) -> StoreResult<GenerationReport> {
    let removed = cleanup(tx, target);
    let created = generate(tx, target, catalog)?;
    if removed.total() > 0 || created > 0 {
        tracing::info!(
            patient = %tx.patient(),
            %target,
            created,
            orphaned = removed.orphaned,
            disabled = removed.disabled,
            terminated_cycle = removed.terminated_cycle,
            retracted = removed.retracted,
            "generated daily tasks"
        );
    }
    Ok(GenerationReport { removed, created })
}

// ═══════════════════════════════════════════════════════════════════════
// Cleanup
// ═══════════════════════════════════════════════════════════════════════

/// Remove future tasks the current plan no longer backs.
pub fn cleanup(tables: &mut PatientTables, target: NaiveDate) -> CleanupReport {
    let future_removable =
        move |date: NaiveDate, status: TaskStatus| date >= target && status.is_removable();

    let orphaned =
        tables.remove_tasks_where(|t| t.is_orphaned() && future_removable(t.task_date, t.status));

    let disabled_items: HashSet<PlanItemId> = tables
        .plan_items()
        .filter(|item| !item.is_active())
        .map(|item| item.id)
        .collect();
    let disabled = tables.remove_tasks_where(|t| {
        t.plan_item.is_some_and(|id| disabled_items.contains(&id))
            && future_removable(t.task_date, t.status)
    });

    // Only NOT_STARTED: a task already pending today stays for the care team.
    let terminated_cycles: HashSet<CycleId> = tables
        .cycles()
        .filter(|c| c.status == CycleStatus::Terminated)
        .map(|c| c.id)
        .collect();
    let terminated_items: HashSet<PlanItemId> = tables
        .plan_items()
        .filter(|item| terminated_cycles.contains(&item.cycle_id))
        .map(|item| item.id)
        .collect();
    let terminated_cycle = tables.remove_tasks_where(|t| {
        t.plan_item.is_some_and(|id| terminated_items.contains(&id))
            && t.status == TaskStatus::NotStarted
            && t.task_date >= target
    });

    let valid_dates: BTreeMap<PlanItemId, BTreeSet<NaiveDate>> = tables
        .plan_items()
        .filter(|item| item.is_active())
        .filter_map(|item| {
            let cycle = tables.cycle_of(item)?;
            cycle.status.is_open().then(|| {
                let dates = cycle.scheduled_dates(&item.schedule_days, target);
                (item.id, dates.into_iter().collect())
            })
        })
        .collect();
    let retracted = tables.remove_tasks_where(|t| {
        let Some(valid) = t.plan_item.and_then(|id| valid_dates.get(&id)) else {
            return false;
        };
        future_removable(t.task_date, t.status) && !valid.contains(&t.task_date)
    });

    CleanupReport {
        orphaned,
        disabled,
        terminated_cycle,
        retracted,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Generation
// ═══════════════════════════════════════════════════════════════════════

/// Insert missing tasks for active items of open cycles. Returns the number
/// of rows created.
pub fn generate(
    tx: &mut Tx<'_>,
    target: NaiveDate,
    catalog: &dyn TemplateCatalog,
) -> StoreResult<usize> {
    let plan: Vec<(PlanItem, Vec<NaiveDate>)> = tx
        .plan_items()
        .filter(|item| item.is_active())
        .filter_map(|item| {
            let cycle = tx.cycle_of(item)?;
            if !cycle.status.is_open() || cycle.effective_end() < target {
                return None;
            }
            let dates = cycle.scheduled_dates(&item.schedule_days, target.max(cycle.start_date));
            Some((item.clone(), dates))
        })
        .collect();

    let mut created = 0;
    for (item, dates) in plan {
        for date in dates {
            let (task_id, inserted) = tx.get_or_create_task(item.id, date, || {
                (item.category, snapshot(&item, catalog), initial_status(date, target))
            })?;
            if inserted {
                tracing::debug!(item = %item.id, task = %task_id, %date, "task created");
                created += 1;
            }
        }
    }
    Ok(created)
}

/// Point-in-time copy of a plan item for a new task.
pub fn snapshot(item: &PlanItem, catalog: &dyn TemplateCatalog) -> TaskSnapshot {
    let detail = match item.category {
        Category::Medication => {
            let mut lines = Vec::new();
            if let Some(dosage) = &item.drug_dosage {
                lines.push(format!("Dosage: {dosage}"));
            }
            if let Some(usage) = &item.drug_usage {
                lines.push(format!("Usage: {usage}"));
            }
            lines.join("\n")
        }
        _ => String::new(),
    };
    let related_report_type = match item.category {
        Category::Checkup => catalog.checkup_report_type(item.template_id),
        _ => None,
    };
    TaskSnapshot {
        title: item.item_name.clone(),
        detail,
        template_id: Some(item.template_id),
        related_report_type,
        interaction_payload: item.interaction_config.clone(),
    }
}
