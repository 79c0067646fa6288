//! Status Resolver: initial task status, trailing validity windows and the
//! refresh pass that moves tasks along as days pass.

use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::plan::Category;
use crate::store::PatientTables;
use crate::task::{TaskStatus, TaskType};

/// Default trailing window length, inclusive of the as-of date.
pub const DEFAULT_WINDOW_DAYS: u32 = 7;

/// Status of a task created for `task_date` when the clock reads `as_of`.
pub fn initial_status(task_date: NaiveDate, as_of: NaiveDate) -> TaskStatus {
    if task_date > as_of {
        TaskStatus::NotStarted
    } else {
        TaskStatus::Pending
    }
}

/// Inclusive date range in which a pending task may still be acted upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValidWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ValidWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Which categories expire and after how many days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowPolicy {
    /// Window length for bound categories without an override.
    #[serde(default = "default_days")]
    pub default_days: u32,
    /// Per-category window lengths.
    #[serde(default)]
    pub overrides: BTreeMap<Category, u32>,
    /// Categories subject to the window at all.
    #[serde(default = "default_bound_categories")]
    pub bound_categories: Vec<Category>,
}

fn default_days() -> u32 {
    DEFAULT_WINDOW_DAYS
}

fn default_bound_categories() -> Vec<Category> {
    vec![Category::Checkup, Category::Questionnaire, Category::Monitoring]
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            default_days: DEFAULT_WINDOW_DAYS,
            overrides: BTreeMap::new(),
            bound_categories: default_bound_categories(),
        }
    }
}

impl WindowPolicy {
    pub fn is_bound(&self, task_type: TaskType) -> bool {
        self.bound_categories.contains(&task_type)
    }

    /// Window length for a category, never less than one day.
    pub fn days_for(&self, task_type: TaskType) -> u32 {
        self.overrides
            .get(&task_type)
            .copied()
            .unwrap_or(self.default_days)
            .max(1)
    }

    /// Trailing window ending at `as_of`, or `None` for categories that never
    /// expire (medication by default).
    pub fn valid_window(&self, task_type: TaskType, as_of: NaiveDate) -> Option<ValidWindow> {
        if !self.is_bound(task_type) {
            return None;
        }
        let back = u64::from(self.days_for(task_type) - 1);
        let start = as_of.checked_sub_days(Days::new(back)).unwrap_or(NaiveDate::MIN);
        Some(ValidWindow { start, end: as_of })
    }
}

/// Transitions applied by one refresh pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    /// NOT_STARTED → PENDING because their date arrived.
    pub promoted: usize,
    /// PENDING → TERMINATED because they fell out of the window.
    pub terminated: usize,
}

impl RefreshReport {
    pub fn changed(&self) -> usize {
        self.promoted + self.terminated
    }
}

impl std::ops::AddAssign for RefreshReport {
    fn add_assign(&mut self, rhs: Self) {
        self.promoted += rhs.promoted;
        self.terminated += rhs.terminated;
    }
}

/// Refresh one patient's tasks as of `as_of`. Idempotent.
pub fn refresh_task_statuses(
    tables: &mut PatientTables,
    as_of: NaiveDate,
    policy: &WindowPolicy,
) -> RefreshReport {
    let window_start: BTreeMap<Category, NaiveDate> = Category::ALL
        .into_iter()
        .filter_map(|c| policy.valid_window(c, as_of).map(|w| (c, w.start)))
        .collect();
    let expired = |task_type: TaskType, date: NaiveDate| {
        window_start
            .get(&task_type)
            .is_some_and(|start| date < *start)
    };

    let mut report = RefreshReport::default();

    let due = tables.task_ids_where(|t| t.status == TaskStatus::NotStarted && t.task_date <= as_of);
    for id in due {
        if let Some(task) = tables.task_mut(id) {
            task.status = TaskStatus::Pending;
            report.promoted += 1;
        }
    }

    let stale = tables.task_ids_where(|t| t.status == TaskStatus::Pending && expired(t.task_type, t.task_date));
    for id in stale {
        if let Some(task) = tables.task_mut(id) {
            tracing::debug!(task = %id, date = %task.task_date, "window passed, terminating");
            task.status = TaskStatus::Terminated;
            report.terminated += 1;
        }
    }

    if report.changed() > 0 {
        tracing::info!(
            patient = %tables.patient(),
            %as_of,
            promoted = report.promoted,
            terminated = report.terminated,
            "refreshed task statuses"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{IdAllocator, PatientId};
    use crate::store::Tx;
    use crate::task::{NewAdHocTask, TaskSnapshot};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
    }

    fn add(tx: &mut Tx<'_>, task_type: Category, day: u32, status: TaskStatus) {
        tx.insert_adhoc_task(
            NewAdHocTask {
                task_date: d(day),
                task_type,
                snapshot: TaskSnapshot::titled("t"),
            },
            status,
        )
        .unwrap();
    }

    #[test]
    fn same_day_is_pending_future_is_not_started() {
        assert_eq!(initial_status(d(5), d(5)), TaskStatus::Pending);
        assert_eq!(initial_status(d(4), d(5)), TaskStatus::Pending);
        assert_eq!(initial_status(d(6), d(5)), TaskStatus::NotStarted);
    }

    #[test]
    fn default_window_is_seven_days_inclusive() {
        let policy = WindowPolicy::default();
        let w = policy.valid_window(Category::Monitoring, d(10)).unwrap();
        assert_eq!(w.start, d(4));
        assert_eq!(w.end, d(10));
        assert!(w.contains(d(4)));
        assert!(!w.contains(d(3)));
    }

    #[test]
    fn medication_is_not_window_bound() {
        let policy = WindowPolicy::default();
        assert!(policy.valid_window(Category::Medication, d(10)).is_none());
    }

    #[test]
    fn per_category_override() {
        let mut policy = WindowPolicy::default();
        policy.overrides.insert(Category::Checkup, 3);
        let w = policy.valid_window(Category::Checkup, d(10)).unwrap();
        assert_eq!(w.start, d(8));
        let w = policy.valid_window(Category::Questionnaire, d(10)).unwrap();
        assert_eq!(w.start, d(4));
    }

    #[test]
    fn zero_length_window_is_clamped_to_one_day() {
        let policy = WindowPolicy {
            default_days: 0,
            ..WindowPolicy::default()
        };
        let w = policy.valid_window(Category::Monitoring, d(10)).unwrap();
        assert_eq!(w.start, d(10));
    }

    #[test]
    fn refresh_terminates_expired_and_promotes_due() {
        let ids = IdAllocator::new();
        let mut tx = Tx {
            tables: PatientTables::new(PatientId::new(1).unwrap()),
            ids: &ids,
        };
        add(&mut tx, Category::Monitoring, 2, TaskStatus::Pending);
        add(&mut tx, Category::Monitoring, 5, TaskStatus::Pending);
        add(&mut tx, Category::Medication, 2, TaskStatus::Pending);
        add(&mut tx, Category::Questionnaire, 10, TaskStatus::NotStarted);
        add(&mut tx, Category::Questionnaire, 11, TaskStatus::NotStarted);

        let report = refresh_task_statuses(&mut tx, d(10), &WindowPolicy::default());
        assert_eq!(report, RefreshReport { promoted: 1, terminated: 1 });

        let statuses: Vec<TaskStatus> = tx.tasks().map(|t| t.status).collect();
        assert_eq!(
            statuses,
            vec![
                TaskStatus::Terminated,
                TaskStatus::Pending,
                TaskStatus::Pending,
                TaskStatus::Pending,
                TaskStatus::NotStarted,
            ]
        );

        let again = refresh_task_statuses(&mut tx, d(10), &WindowPolicy::default());
        assert_eq!(again.changed(), 0);
    }

    #[test]
    fn policy_parses_from_toml() {
        let policy: WindowPolicy = toml::from_str(
            r#"
            default_days = 5
            bound_categories = ["monitoring"]

            [overrides]
            monitoring = 2
            "#,
        )
        .unwrap();
        assert_eq!(policy.days_for(Category::Monitoring), 2);
        assert!(!policy.is_bound(Category::Checkup));
    }
}
