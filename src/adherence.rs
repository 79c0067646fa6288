//! Adherence Aggregator: completion ratios over a patient's task history.

use serde::Serialize;

use crate::id::TemplateId;
use crate::plan::Category;
use crate::store::PatientTables;
use crate::task::{DailyTask, TaskStatus};

/// Which tasks an adherence figure covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdherenceScope {
    Category(Category),
    /// Monitoring tasks of one metric template.
    Metric(TemplateId),
    /// All monitoring sub-metrics as one category.
    AllMonitoring,
}

/// Completed vs. due tasks. `rate` is `None` when nothing was due.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Adherence {
    pub completed: usize,
    pub total: usize,
    pub rate: Option<f64>,
}

impl Adherence {
    pub fn from_counts(completed: usize, total: usize) -> Self {
        let rate = (total > 0).then(|| completed as f64 / total as f64);
        Self {
            completed,
            total,
            rate,
        }
    }

    fn tally<'a>(tasks: impl Iterator<Item = &'a DailyTask>) -> Self {
        let (completed, total) = tasks
            .filter(|t| t.status.is_due())
            .fold((0, 0), |(done, due), t| {
                (done + usize::from(t.status == TaskStatus::Completed), due + 1)
            });
        Self::from_counts(completed, total)
    }
}

/// Adherence of one patient within `scope`.
pub fn adherence(tables: &PatientTables, scope: AdherenceScope) -> Adherence {
    let tasks = tables.tasks().filter(|t| match scope {
        AdherenceScope::Category(c) => t.task_type == c,
        AdherenceScope::AllMonitoring => t.task_type == Category::Monitoring,
        AdherenceScope::Metric(template) => {
            t.task_type == Category::Monitoring && tables.template_of(t) == Some(template)
        }
    });
    Adherence::tally(tasks)
}

/// The three figures shown on the care-team dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AdherenceReport {
    pub medication: Adherence,
    pub monitoring: Adherence,
    /// Checkup and questionnaire tasks combined.
    pub other: Adherence,
}

pub fn adherence_report(tables: &PatientTables) -> AdherenceReport {
    AdherenceReport {
        medication: adherence(tables, AdherenceScope::Category(Category::Medication)),
        monitoring: adherence(tables, AdherenceScope::AllMonitoring),
        other: Adherence::tally(
            tables
                .tasks()
                .filter(|t| matches!(t.task_type, Category::Checkup | Category::Questionnaire)),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{IdAllocator, PatientId};
    use crate::store::Tx;
    use crate::task::{NewAdHocTask, TaskSnapshot};
    use chrono::NaiveDate;

    fn add(tx: &mut Tx<'_>, task_type: Category, status: TaskStatus, template: Option<u64>) {
        let mut snapshot = TaskSnapshot::titled("t");
        snapshot.template_id = template.and_then(TemplateId::new);
        tx.insert_adhoc_task(
            NewAdHocTask {
                task_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                task_type,
                snapshot,
            },
            status,
        )
        .unwrap();
    }

    #[test]
    fn two_of_three_due() {
        let ids = IdAllocator::new();
        let mut tx = Tx {
            tables: PatientTables::new(PatientId::new(1).unwrap()),
            ids: &ids,
        };
        add(&mut tx, Category::Medication, TaskStatus::Completed, None);
        add(&mut tx, Category::Medication, TaskStatus::Completed, None);
        add(&mut tx, Category::Medication, TaskStatus::Terminated, None);
        add(&mut tx, Category::Medication, TaskStatus::NotStarted, None);

        let a = adherence(&tx, AdherenceScope::Category(Category::Medication));
        assert_eq!((a.completed, a.total), (2, 3));
        assert!((a.rate.unwrap() - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn nothing_due_has_no_rate() {
        let a = Adherence::from_counts(0, 0);
        assert_eq!(a.rate, None);
    }

    #[test]
    fn monitoring_scopes() {
        let ids = IdAllocator::new();
        let mut tx = Tx {
            tables: PatientTables::new(PatientId::new(1).unwrap()),
            ids: &ids,
        };
        add(&mut tx, Category::Monitoring, TaskStatus::Completed, Some(10));
        add(&mut tx, Category::Monitoring, TaskStatus::Pending, Some(11));
        add(&mut tx, Category::Checkup, TaskStatus::Completed, None);
        add(&mut tx, Category::Questionnaire, TaskStatus::Terminated, None);

        let weight = adherence(&tx, AdherenceScope::Metric(TemplateId::new(10).unwrap()));
        assert_eq!((weight.completed, weight.total), (1, 1));

        let report = adherence_report(&tx);
        assert_eq!((report.monitoring.completed, report.monitoring.total), (1, 2));
        assert_eq!((report.other.completed, report.other.total), (1, 2));
        assert_eq!(report.medication.rate, None);
    }
}
