//! Daily Summary View: one row per category (and per monitoring metric) for
//! a patient's day.
//!
//! Without an explicit date the view is anchored at `today` and also shows the
//! trailing window of window-bound categories, so a just-missed item stays
//! visible until it expires. Completed backlog items show only on the day
//! they were completed. With an explicit date only that day's tasks appear.

use chrono::NaiveDate;
use serde::Serialize;

use crate::id::{TaskId, TemplateId};
use crate::plan::Category;
use crate::status::WindowPolicy;
use crate::store::PatientTables;
use crate::task::{DailyTask, TaskStatus, TaskType};

/// One line of the summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub task_type: TaskType,
    pub title: String,
    pub status: TaskStatus,
    pub task_ids: Vec<TaskId>,
    /// Monitoring rows: the metric template the row stands for.
    pub template_id: Option<TemplateId>,
    /// Questionnaire rows: templates still to be filled in.
    pub questionnaire_ids: Vec<TemplateId>,
}

fn category_title(task_type: TaskType) -> &'static str {
    match task_type {
        Category::Medication => "Medication reminder",
        Category::Checkup => "Checkup reminder",
        Category::Questionnaire => "Questionnaire reminder",
        Category::Monitoring => "Monitoring reminder",
    }
}

/// Status shown for a group: completed only when every task is.
fn row_status(tasks: &[&DailyTask]) -> TaskStatus {
    if tasks.iter().all(|t| t.status == TaskStatus::Completed) {
        return TaskStatus::Completed;
    }
    [TaskStatus::Pending, TaskStatus::NotStarted, TaskStatus::Terminated]
        .into_iter()
        .find(|s| tasks.iter().any(|t| t.status == *s))
        .unwrap_or(TaskStatus::Pending)
}

/// Whether a task belongs on the default (undated) view for `today`.
fn in_default_view(task: &DailyTask, today: NaiveDate, policy: &WindowPolicy) -> bool {
    if task.status == TaskStatus::Terminated {
        return false;
    }
    let in_range = match policy.valid_window(task.task_type, today) {
        Some(window) => window.contains(task.task_date),
        None => task.task_date == today,
    };
    in_range && (task.status != TaskStatus::Completed || task.completion_day() == today)
}

/// Build the summary rows for one patient.
///
/// Callers wanting the default view fresh should run the refresh pass first;
/// this function only reads.
pub fn daily_summary(
    tables: &PatientTables,
    date: Option<NaiveDate>,
    today: NaiveDate,
    policy: &WindowPolicy,
) -> Vec<SummaryRow> {
    let anchor = date.unwrap_or(today);
    if !tables.cycles().any(|c| c.contains(anchor)) {
        return Vec::new();
    }

    let mut tasks: Vec<&DailyTask> = tables
        .tasks()
        .filter(|t| match date {
            Some(day) => t.task_date == day,
            None => in_default_view(t, today, policy),
        })
        .collect();
    tasks.sort_by_key(|t| (t.task_date, t.id));

    let mut rows = Vec::new();
    for task_type in [Category::Medication, Category::Checkup, Category::Questionnaire] {
        let group: Vec<&DailyTask> = tasks
            .iter()
            .copied()
            .filter(|t| t.task_type == task_type)
            .collect();
        if group.is_empty() {
            continue;
        }
        let questionnaire_ids = if task_type == Category::Questionnaire {
            questionnaire_templates(tables, &group)
        } else {
            Vec::new()
        };
        rows.push(SummaryRow {
            task_type,
            title: category_title(task_type).to_string(),
            status: row_status(&group),
            task_ids: group.iter().map(|t| t.id).collect(),
            template_id: None,
            questionnaire_ids,
        });
    }

    // One row per metric, in first-seen order.
    let mut metrics: Vec<(MetricKey, Vec<&DailyTask>)> = Vec::new();
    for task in tasks.iter().copied().filter(|t| t.task_type == Category::Monitoring) {
        let key = match tables.template_of(task) {
            Some(template) => MetricKey::Template(template),
            None => MetricKey::Title(task.snapshot.title.clone()),
        };
        match metrics.iter_mut().find(|(k, _)| *k == key) {
            Some((_, group)) => group.push(task),
            None => metrics.push((key, vec![task])),
        }
    }
    for (key, group) in metrics {
        let title = group
            .first()
            .map(|t| t.snapshot.title.clone())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| category_title(Category::Monitoring).to_string());
        rows.push(SummaryRow {
            task_type: Category::Monitoring,
            title,
            status: row_status(&group),
            task_ids: group.iter().map(|t| t.id).collect(),
            template_id: match key {
                MetricKey::Template(id) => Some(id),
                MetricKey::Title(_) => None,
            },
            questionnaire_ids: Vec::new(),
        });
    }
    rows
}

#[derive(Debug, PartialEq, Eq)]
enum MetricKey {
    Template(TemplateId),
    Title(String),
}

/// Templates of the open questionnaire tasks, de-duplicated in order. Only
/// tasks whose plan item still exists contribute.
fn questionnaire_templates(tables: &PatientTables, group: &[&DailyTask]) -> Vec<TemplateId> {
    let mut ids = Vec::new();
    for task in group.iter().filter(|t| t.status != TaskStatus::Completed) {
        let Some(item) = task.plan_item.and_then(|id| tables.plan_item(id)) else {
            continue;
        };
        if !ids.contains(&item.template_id) {
            ids.push(item.template_id);
        }
    }
    ids
}
