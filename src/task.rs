//! Task Store records: materialized daily tasks and the metric events that
//! close monitoring tasks.
//!
//! A [`DailyTask`] is one dated occurrence of a plan item (or of an ad-hoc
//! category). Its display text lives in an immutable [`TaskSnapshot`] copied
//! when the row is created, so later plan edits never rewrite history.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::id::{MetricId, PatientId, PlanItemId, TaskId, TemplateId};
use crate::plan::{Category, InteractionPayload};

/// A task's type always mirrors the category of the plan item behind it.
pub type TaskType = Category;

/// Task status state machine.
///
/// ```text
/// NotStarted ──(date reached)──► Pending ──(event)──► Completed
///                                  │                     ▲
///                                  └─(window passed)─► Terminated ─(backfill)─┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    NotStarted,
    Pending,
    Completed,
    Terminated,
}

impl TaskStatus {
    /// Statuses the scheduler's cleanup pass is allowed to delete.
    pub const REMOVABLE: [TaskStatus; 3] = [Self::Pending, Self::NotStarted, Self::Terminated];

    pub fn is_removable(&self) -> bool {
        Self::REMOVABLE.contains(self)
    }

    /// Whether the task was actually due (counts toward adherence totals).
    pub fn is_due(&self) -> bool {
        *self != Self::NotStarted
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// How a task came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOrigin {
    /// Materialized by the scheduler from a plan item. A `None` plan item on
    /// such a task means the item was deleted.
    Plan,
    /// Created directly (e.g. ad-hoc monitoring), never linked to a plan item.
    AdHoc,
}

/// Report type code that auto-closes a checkup task on upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportType(pub u16);

/// Point-in-time copy of the plan item's display data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub title: String,
    pub detail: String,
    /// Template the source plan item pointed at when the task was created.
    pub template_id: Option<TemplateId>,
    pub related_report_type: Option<ReportType>,
    pub interaction_payload: InteractionPayload,
}

impl TaskSnapshot {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            detail: String::new(),
            template_id: None,
            related_report_type: None,
            interaction_payload: InteractionPayload::empty(),
        }
    }
}

/// One concrete, dated task for a patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTask {
    pub id: TaskId,
    pub patient: PatientId,
    /// Weak back-reference; nulled (not cascaded) when the plan item is deleted.
    pub plan_item: Option<PlanItemId>,
    pub origin: TaskOrigin,
    pub task_date: NaiveDate,
    pub task_type: TaskType,
    pub snapshot: TaskSnapshot,
    pub status: TaskStatus,
    pub completed_at: Option<NaiveDateTime>,
}

impl DailyTask {
    /// Whether the plan item this task was generated from has been deleted.
    pub fn is_orphaned(&self) -> bool {
        self.origin == TaskOrigin::Plan && self.plan_item.is_none()
    }

    /// Day the task was closed, falling back to its own date.
    pub fn completion_day(&self) -> NaiveDate {
        self.completed_at
            .map(|at| at.date())
            .unwrap_or(self.task_date)
    }

    pub(crate) fn complete(&mut self, at: NaiveDateTime) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(at);
    }
}

/// Input for an ad-hoc task that no plan item owns.
#[derive(Debug, Clone)]
pub struct NewAdHocTask {
    pub task_date: NaiveDate,
    pub task_type: TaskType,
    pub snapshot: TaskSnapshot,
}

/// A recorded physiological reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub id: MetricId,
    pub patient: PatientId,
    /// Monitoring template code, e.g. `M_WEIGHT`.
    pub metric_code: String,
    pub value_main: f64,
    pub value_sub: Option<f64>,
    pub measured_at: NaiveDateTime,
    /// Task this reading closed, once matched.
    pub task_id: Option<TaskId>,
}

/// Incoming reading from a device or manual entry.
#[derive(Debug, Clone)]
pub struct MetricReading {
    pub metric_code: String,
    pub value_main: f64,
    pub value_sub: Option<f64>,
    pub measured_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(status: TaskStatus) -> DailyTask {
        DailyTask {
            id: TaskId::new(1).unwrap(),
            patient: PatientId::new(1).unwrap(),
            plan_item: None,
            origin: TaskOrigin::Plan,
            task_date: NaiveDate::from_ymd_opt(2025, 1, 8).unwrap(),
            task_type: Category::Checkup,
            snapshot: TaskSnapshot::titled("CT"),
            status,
            completed_at: None,
        }
    }

    #[test]
    fn completed_is_never_removable() {
        assert!(!TaskStatus::Completed.is_removable());
        assert!(TaskStatus::Terminated.is_removable());
    }

    #[test]
    fn completion_day_falls_back_to_task_date() {
        let mut t = task(TaskStatus::Completed);
        assert_eq!(t.completion_day(), t.task_date);
        let at = NaiveDate::from_ymd_opt(2025, 1, 10)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        t.complete(at);
        assert_eq!(t.completion_day(), at.date());
    }

    #[test]
    fn orphaned_only_for_plan_origin() {
        let mut t = task(TaskStatus::Pending);
        assert!(t.is_orphaned());
        t.origin = TaskOrigin::AdHoc;
        assert!(!t.is_orphaned());
    }

    #[test]
    fn task_row_survives_bincode() {
        let t = task(TaskStatus::Pending);
        let bytes = bincode::serialize(&t).unwrap();
        let back: DailyTask = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, t);
    }
}
