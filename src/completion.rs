//! Completion Service: closes tasks in response to external events.
//!
//! Every operation matches tasks on the calendar day of `occurred_at` and
//! stamps `completed_at = occurred_at`. `today` is the server's current date
//! and bounds the grace rule: a TERMINATED (window-expired) or NOT_STARTED
//! task can still be closed by a late event, provided the event's day is not
//! in the future.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::catalog::TemplateCatalog;
use crate::error::{CareResult, PlanError};
use crate::id::{MetricId, TaskId};
use crate::plan::Category;
use crate::store::{PatientTables, Tx};
use crate::task::{DailyTask, MetricReading, ReportType, TaskStatus};

/// Result of one completion call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Completion {
    /// Tasks transitioned to COMPLETED by this call.
    pub completed: usize,
    /// Lowest-id task completed, if any.
    pub task_id: Option<TaskId>,
}

impl Completion {
    pub fn none() -> Self {
        Self::default()
    }
}

/// Whether a task in its current status may be closed by an event on
/// `event_day`.
fn completable(task: &DailyTask, event_day: NaiveDate, today: NaiveDate) -> bool {
    match task.status {
        TaskStatus::Pending => true,
        TaskStatus::NotStarted | TaskStatus::Terminated => event_day <= today,
        TaskStatus::Completed => false,
    }
}

/// Complete every task on `occurred_at`'s day that satisfies `matches`.
fn complete_where(
    tables: &mut PatientTables,
    occurred_at: NaiveDateTime,
    today: NaiveDate,
    matches: impl Fn(&PatientTables, &DailyTask) -> bool,
) -> Completion {
    let day = occurred_at.date();
    let ids = {
        let view: &PatientTables = tables;
        view.task_ids_where(|t| t.task_date == day && completable(t, day, today) && matches(view, t))
    };
    for id in &ids {
        if let Some(task) = tables.task_mut(*id) {
            task.complete(occurred_at);
        }
    }
    if !ids.is_empty() {
        tracing::debug!(patient = %tables.patient(), %day, completed = ids.len(), "tasks completed");
    }
    Completion {
        completed: ids.len(),
        task_id: ids.first().copied(),
    }
}

fn of_type(task_type: Category) -> impl Fn(&PatientTables, &DailyTask) -> bool {
    move |_, t| t.task_type == task_type
}

/// "I took my medication today": closes every medication task of the day.
pub fn complete_medication(
    tables: &mut PatientTables,
    occurred_at: NaiveDateTime,
    today: NaiveDate,
) -> Completion {
    complete_where(tables, occurred_at, today, of_type(Category::Medication))
}

/// A questionnaire submission closes every questionnaire task of the day.
pub fn complete_questionnaire(
    tables: &mut PatientTables,
    occurred_at: NaiveDateTime,
    today: NaiveDate,
) -> Completion {
    complete_where(tables, occurred_at, today, of_type(Category::Questionnaire))
}

/// A report upload or interpretation closes the day's checkup tasks. With a
/// `report_type`, only checkups linked to that report type close.
pub fn complete_checkup(
    tables: &mut PatientTables,
    occurred_at: NaiveDateTime,
    today: NaiveDate,
    report_type: Option<ReportType>,
) -> Completion {
    complete_where(tables, occurred_at, today, move |_, t| {
        t.task_type == Category::Checkup
            && report_type.is_none_or(|rt| t.snapshot.related_report_type == Some(rt))
    })
}

/// A metric reading closes only the monitoring task(s) of its own template.
/// Monitoring tasks that never had a template (ad-hoc, unlinked) match any
/// metric of the day.
pub fn complete_monitoring(
    tables: &mut PatientTables,
    catalog: &dyn TemplateCatalog,
    metric_code: &str,
    occurred_at: NaiveDateTime,
    today: NaiveDate,
) -> Completion {
    let Some(template) = catalog.monitoring_template(metric_code) else {
        tracing::debug!(metric_code, "no monitoring template for metric code");
        return Completion::none();
    };
    complete_where(tables, occurred_at, today, move |view, t| {
        t.task_type == Category::Monitoring
            && view.template_of(t).is_none_or(|owner| owner == template)
    })
}

/// Outcome of recording a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricOutcome {
    pub metric_id: MetricId,
    /// An existing linked reading for the same code and day was overwritten.
    pub updated: bool,
    pub completion: Completion,
}

/// Store a reading and close the matching monitoring task.
///
/// Re-recording a code on a day whose reading is already linked to a task
/// updates that reading in place and completes nothing new. A fresh reading
/// completes its task and is back-linked to it.
pub fn record_metric(
    tx: &mut Tx<'_>,
    catalog: &dyn TemplateCatalog,
    reading: MetricReading,
    today: NaiveDate,
) -> CareResult<MetricOutcome> {
    let code = reading.metric_code.trim();
    if code.is_empty() {
        return Err(PlanError::EmptyName {
            field: "metric code",
        }
        .into());
    }
    let day = reading.measured_at.date();

    let linked = tx.metrics().find(|m| {
        m.task_id.is_some()
            && m.measured_at.date() == day
            && m.metric_code.eq_ignore_ascii_case(code)
    });
    if let Some(metric_id) = linked.map(|m| m.id) {
        if let Some(row) = tx.metric_mut(metric_id) {
            row.value_main = reading.value_main;
            row.value_sub = reading.value_sub;
            row.measured_at = reading.measured_at;
        }
        tracing::debug!(metric = %metric_id, "updated linked reading in place");
        return Ok(MetricOutcome {
            metric_id,
            updated: true,
            completion: Completion::none(),
        });
    }

    let code = code.to_string();
    let measured_at = reading.measured_at;
    let metric_id = tx.insert_metric(MetricReading {
        metric_code: code.clone(),
        ..reading
    })?;
    let completion = complete_monitoring(tx, catalog, &code, measured_at, today);
    if let Some(task_id) = completion.task_id {
        if let Some(row) = tx.metric_mut(metric_id) {
            row.task_id = Some(task_id);
        }
    }
    Ok(MetricOutcome {
        metric_id,
        updated: false,
        completion,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MonitoringTemplate, StaticCatalog};
    use crate::id::{IdAllocator, PatientId, TemplateId};
    use crate::plan::{NewCycle, NewPlanItem, ScheduleDays};
    use crate::scheduler;
    use crate::task::{NewAdHocTask, TaskSnapshot};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
    }

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        d(day).and_hms_opt(hour, 0, 0).unwrap()
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog::new(
            vec![
                MonitoringTemplate {
                    id: 10,
                    code: "M_WEIGHT".into(),
                    name: "Weight".into(),
                },
                MonitoringTemplate {
                    id: 11,
                    code: "M_TEMP".into(),
                    name: "Temperature".into(),
                },
            ],
            Vec::new(),
        )
    }

    fn tx(ids: &IdAllocator) -> Tx<'_> {
        Tx {
            tables: PatientTables::new(PatientId::new(1).unwrap()),
            ids,
        }
    }

    fn add(
        tx: &mut Tx<'_>,
        task_type: Category,
        day: u32,
        status: TaskStatus,
        template: Option<u64>,
    ) -> TaskId {
        let mut snapshot = TaskSnapshot::titled(task_type.as_label());
        snapshot.template_id = template.and_then(TemplateId::new);
        tx.insert_adhoc_task(
            NewAdHocTask {
                task_date: d(day),
                task_type,
                snapshot,
            },
            status,
        )
        .unwrap()
    }

    #[test]
    fn medication_fans_out_across_the_day() {
        let ids = IdAllocator::new();
        let mut tx = tx(&ids);
        let a = add(&mut tx, Category::Medication, 5, TaskStatus::Pending, None);
        add(&mut tx, Category::Medication, 5, TaskStatus::Pending, None);
        add(&mut tx, Category::Medication, 6, TaskStatus::NotStarted, None);

        let done = complete_medication(&mut tx, at(5, 9), d(5));
        assert_eq!(done.completed, 2);
        assert_eq!(done.task_id, Some(a));
        let task = tx.task(a).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.completed_at, Some(at(5, 9)));
    }

    #[test]
    fn monitoring_matches_only_its_metric() {
        let ids = IdAllocator::new();
        let mut tx = tx(&ids);
        let weight = add(&mut tx, Category::Monitoring, 5, TaskStatus::Pending, Some(10));
        let temp = add(&mut tx, Category::Monitoring, 5, TaskStatus::Pending, Some(11));

        let done = complete_monitoring(&mut tx, &catalog(), "M_WEIGHT", at(5, 8), d(5));
        assert_eq!(done.task_id, Some(weight));
        assert_eq!(tx.task(temp).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn deleted_plan_item_still_matches_by_snapshot_template() {
        let ids = IdAllocator::new();
        let mut tx = tx(&ids);
        let cat = catalog();
        let cycle = tx.insert_cycle(NewCycle::new("Cycle 1", d(1), 21)).unwrap();
        let mut item = |template: u64, name: &str| {
            tx.insert_plan_item(
                cycle,
                NewPlanItem::new(
                    Category::Monitoring,
                    TemplateId::new(template).unwrap(),
                    name,
                    ScheduleDays::new([5]).unwrap(),
                ),
            )
            .unwrap()
        };
        let weight_item = item(10, "Weight");
        let temp_item = item(11, "Temperature");
        scheduler::generate_daily_tasks(&mut tx, d(5), &cat).unwrap();
        let weight = tx.task_for(weight_item, d(5)).unwrap();
        let temp = tx.task_for(temp_item, d(5)).unwrap();

        tx.delete_plan_item(weight_item).unwrap();
        assert_eq!(tx.task(weight).unwrap().plan_item, None);

        let outcome = record_metric(
            &mut tx,
            &cat,
            MetricReading {
                metric_code: "M_WEIGHT".into(),
                value_main: 70.5,
                value_sub: None,
                measured_at: at(5, 8),
            },
            d(5),
        )
        .unwrap();
        assert_eq!(outcome.completion.completed, 1);
        assert_eq!(outcome.completion.task_id, Some(weight));
        assert_eq!(tx.task(weight).unwrap().status, TaskStatus::Completed);
        assert_eq!(tx.task(temp).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn unknown_metric_code_completes_nothing() {
        let ids = IdAllocator::new();
        let mut tx = tx(&ids);
        add(&mut tx, Category::Monitoring, 5, TaskStatus::Pending, Some(10));
        let done = complete_monitoring(&mut tx, &catalog(), "M_SPO2", at(5, 8), d(5));
        assert_eq!(done, Completion::none());
    }

    #[test]
    fn terminated_task_is_backfilled_by_late_reading() {
        let ids = IdAllocator::new();
        let mut tx = tx(&ids);
        let yesterday = add(&mut tx, Category::Monitoring, 4, TaskStatus::Terminated, Some(10));

        let done = complete_monitoring(&mut tx, &catalog(), "m_weight", at(4, 20), d(5));
        assert_eq!(done.task_id, Some(yesterday));
        assert_eq!(tx.task(yesterday).unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn future_event_cannot_resurrect_or_preempt() {
        let ids = IdAllocator::new();
        let mut tx = tx(&ids);
        add(&mut tx, Category::Questionnaire, 7, TaskStatus::NotStarted, None);
        let done = complete_questionnaire(&mut tx, at(7, 9), d(5));
        assert_eq!(done.completed, 0);

        let done = complete_questionnaire(&mut tx, at(7, 9), d(7));
        assert_eq!(done.completed, 1);
    }

    #[test]
    fn completed_tasks_are_not_restamped() {
        let ids = IdAllocator::new();
        let mut tx = tx(&ids);
        let id = add(&mut tx, Category::Checkup, 5, TaskStatus::Pending, None);
        complete_checkup(&mut tx, at(5, 9), d(5), None);
        let again = complete_checkup(&mut tx, at(5, 15), d(5), None);
        assert_eq!(again.completed, 0);
        assert_eq!(tx.task(id).unwrap().completed_at, Some(at(5, 9)));
    }

    #[test]
    fn checkup_report_type_filter() {
        let ids = IdAllocator::new();
        let mut tx = tx(&ids);
        let blood = add(&mut tx, Category::Checkup, 5, TaskStatus::Pending, None);
        tx.task_mut(blood).unwrap().snapshot.related_report_type = Some(ReportType(4));
        let ct = add(&mut tx, Category::Checkup, 5, TaskStatus::Pending, None);
        tx.task_mut(ct).unwrap().snapshot.related_report_type = Some(ReportType(3));

        let done = complete_checkup(&mut tx, at(5, 9), d(5), Some(ReportType(3)));
        assert_eq!(done.task_id, Some(ct));
        assert_eq!(tx.task(blood).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn record_metric_links_then_updates_in_place() {
        let ids = IdAllocator::new();
        let mut tx = tx(&ids);
        let task = add(&mut tx, Category::Monitoring, 5, TaskStatus::Pending, Some(10));
        let cat = catalog();

        let first = record_metric(
            &mut tx,
            &cat,
            MetricReading {
                metric_code: "M_WEIGHT".into(),
                value_main: 70.5,
                value_sub: None,
                measured_at: at(5, 7),
            },
            d(5),
        )
        .unwrap();
        assert!(!first.updated);
        assert_eq!(first.completion.task_id, Some(task));
        assert_eq!(tx.metric(first.metric_id).unwrap().task_id, Some(task));

        let second = record_metric(
            &mut tx,
            &cat,
            MetricReading {
                metric_code: "M_WEIGHT".into(),
                value_main: 70.1,
                value_sub: None,
                measured_at: at(5, 19),
            },
            d(5),
        )
        .unwrap();
        assert!(second.updated);
        assert_eq!(second.metric_id, first.metric_id);
        assert_eq!(tx.metrics().count(), 1);
        assert_eq!(tx.metric(first.metric_id).unwrap().value_main, 70.1);
    }

    #[test]
    fn unmatched_reading_is_stored_unlinked() {
        let ids = IdAllocator::new();
        let mut tx = tx(&ids);
        let outcome = record_metric(
            &mut tx,
            &catalog(),
            MetricReading {
                metric_code: "M_TEMP".into(),
                value_main: 36.8,
                value_sub: None,
                measured_at: at(5, 7),
            },
            d(5),
        )
        .unwrap();
        assert_eq!(outcome.completion.completed, 0);
        assert_eq!(tx.metric(outcome.metric_id).unwrap().task_id, None);
    }

    #[test]
    fn blank_metric_code_is_rejected() {
        let ids = IdAllocator::new();
        let mut tx = tx(&ids);
        let err = record_metric(
            &mut tx,
            &catalog(),
            MetricReading {
                metric_code: "  ".into(),
                value_main: 1.0,
                value_sub: None,
                measured_at: at(5, 7),
            },
            d(5),
        );
        assert!(err.is_err());
        assert_eq!(tx.metrics().count(), 0);
    }
}
