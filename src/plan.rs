//! Plan Model: treatment cycles and the recurring plan items inside them.
//!
//! A [`TreatmentCycle`] is a bounded (or open-ended, when only `cycle_days` is
//! given) care period for one patient. Each [`PlanItem`] is a task template
//! whose [`ScheduleDays`] are 1-based offsets from the cycle start: day `N`
//! lands on `start_date + (N - 1)`.
//!
//! Plan items are freely editable. Edits only steer *future* generation;
//! tasks that were already materialized keep the snapshot they were born with.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PlanError;
use crate::id::{CycleId, PatientId, PlanItemId, TemplateId};

/// Convenience alias.
pub type PlanResult<T> = std::result::Result<T, PlanError>;

// ═══════════════════════════════════════════════════════════════════════
// Enums
// ═══════════════════════════════════════════════════════════════════════

/// Lifecycle of a treatment cycle. Transitions are owned by the care team;
/// the scheduler only reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CycleStatus {
    Scheduled,
    InProgress,
    Completed,
    Terminated,
}

impl CycleStatus {
    /// Whether tasks may still be generated for this cycle.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Scheduled | Self::InProgress)
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Terminated => "terminated",
        }
    }

    /// Parse from label (case-insensitive).
    pub fn from_label(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "scheduled" => Some(Self::Scheduled),
            "in-progress" | "in_progress" | "active" => Some(Self::InProgress),
            "completed" | "done" => Some(Self::Completed),
            "terminated" => Some(Self::Terminated),
            _ => None,
        }
    }
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Category of a plan item, mirrored by the `task_type` of every task it
/// generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Medication,
    Checkup,
    Questionnaire,
    Monitoring,
}

impl Category {
    /// All categories in daily-summary display order.
    pub const ALL: [Category; 4] = [
        Self::Medication,
        Self::Checkup,
        Self::Questionnaire,
        Self::Monitoring,
    ];

    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Medication => "medication",
            Self::Checkup => "checkup",
            Self::Questionnaire => "questionnaire",
            Self::Monitoring => "monitoring",
        }
    }

    /// Parse from label (case-insensitive).
    pub fn from_label(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "medication" | "med" => Some(Self::Medication),
            "checkup" => Some(Self::Checkup),
            "questionnaire" | "survey" => Some(Self::Questionnaire),
            "monitoring" | "metric" => Some(Self::Monitoring),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Whether a plan item still produces tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanItemStatus {
    Active,
    Disabled,
}

// ═══════════════════════════════════════════════════════════════════════
// Schedule days
// ═══════════════════════════════════════════════════════════════════════

/// Ordered set of positive, 1-based cycle day offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDays(BTreeSet<u32>);

impl ScheduleDays {
    /// Validate raw day offsets. Duplicates collapse; zero, negative or
    /// out-of-range entries are rejected.
    pub fn new(days: impl IntoIterator<Item = i64>) -> PlanResult<Self> {
        let mut set = BTreeSet::new();
        for day in days {
            let valid = u32::try_from(day).ok().filter(|d| *d > 0);
            set.insert(valid.ok_or(PlanError::InvalidScheduleDay { day })?);
        }
        Ok(Self(set))
    }

    /// Parse a comma-separated list such as `"1,3,8"`.
    pub fn parse(s: &str) -> PlanResult<Self> {
        let mut days = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let day = part
                .parse::<i64>()
                .map_err(|_| PlanError::MalformedScheduleDay {
                    raw: part.to_string(),
                })?;
            days.push(day);
        }
        Self::new(days)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Interaction payload
// ═══════════════════════════════════════════════════════════════════════

/// Opaque category-specific UI configuration.
///
/// Stored as JSON text so the row stays encodable by non-self-describing
/// formats such as bincode.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InteractionPayload(pub serde_json::Value);

impl InteractionPayload {
    pub fn empty() -> Self {
        Self(serde_json::Value::Object(serde_json::Map::new()))
    }
}

impl Serialize for InteractionPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for InteractionPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        serde_json::from_str(&text)
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Treatment cycle
// ═══════════════════════════════════════════════════════════════════════

/// A care period for one patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentCycle {
    pub id: CycleId,
    pub patient: PatientId,
    pub name: String,
    pub start_date: NaiveDate,
    /// Nominal length in days; ignored when `end_date` is set.
    pub cycle_days: u32,
    pub end_date: Option<NaiveDate>,
    pub status: CycleStatus,
}

impl TreatmentCycle {
    /// `end_date` if set, else `start_date + cycle_days - 1`.
    pub fn effective_end(&self) -> NaiveDate {
        if let Some(end) = self.end_date {
            return end;
        }
        let span = u64::from(self.cycle_days.saturating_sub(1));
        self.start_date
            .checked_add_days(Days::new(span))
            .unwrap_or(NaiveDate::MAX)
    }

    /// Whether `date` lies inside the cycle (both bounds inclusive).
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.effective_end()
    }

    /// Calendar date of 1-based cycle day `day`.
    pub fn date_for_day(&self, day: u32) -> Option<NaiveDate> {
        let offset = u64::from(day.checked_sub(1)?);
        self.start_date.checked_add_days(Days::new(offset))
    }

    /// Dates of `days` that fall inside `[from, effective_end]`, ascending.
    pub fn scheduled_dates(&self, days: &ScheduleDays, from: NaiveDate) -> Vec<NaiveDate> {
        let end = self.effective_end();
        days.iter()
            .filter_map(|d| self.date_for_day(d))
            .filter(|d| *d >= from && *d <= end)
            .collect()
    }
}

/// Input for creating a treatment cycle.
#[derive(Debug, Clone)]
pub struct NewCycle {
    pub name: String,
    pub start_date: NaiveDate,
    pub cycle_days: u32,
    pub end_date: Option<NaiveDate>,
    pub status: CycleStatus,
}

impl NewCycle {
    pub fn new(name: impl Into<String>, start_date: NaiveDate, cycle_days: u32) -> Self {
        Self {
            name: name.into(),
            start_date,
            cycle_days,
            end_date: None,
            status: CycleStatus::InProgress,
        }
    }

    pub fn with_end_date(mut self, end: NaiveDate) -> Self {
        self.end_date = Some(end);
        self
    }

    pub fn with_status(mut self, status: CycleStatus) -> Self {
        self.status = status;
        self
    }

    /// Reject invalid lengths before anything is written.
    pub fn validate(&self) -> PlanResult<()> {
        if self.name.trim().is_empty() {
            return Err(PlanError::EmptyName {
                field: "cycle name",
            });
        }
        validate_length(self.start_date, self.cycle_days, self.end_date)
    }

    pub(crate) fn into_cycle(self, id: CycleId, patient: PatientId) -> TreatmentCycle {
        TreatmentCycle {
            id,
            patient,
            name: self.name,
            start_date: self.start_date,
            cycle_days: self.cycle_days,
            end_date: self.end_date,
            status: self.status,
        }
    }
}

/// Shared length check for creation and end-date edits.
pub(crate) fn validate_length(
    start: NaiveDate,
    cycle_days: u32,
    end_date: Option<NaiveDate>,
) -> PlanResult<()> {
    match end_date {
        Some(end) if end < start => Err(PlanError::InvalidCycleLength {
            message: format!("end date {end} is before start date {start}"),
        }),
        Some(_) => Ok(()),
        None if cycle_days == 0 => Err(PlanError::InvalidCycleLength {
            message: "cycle_days must be at least 1 when no end date is given".into(),
        }),
        None => Ok(()),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Plan item
// ═══════════════════════════════════════════════════════════════════════

/// A recurring task template inside one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    pub id: PlanItemId,
    pub cycle_id: CycleId,
    pub category: Category,
    pub template_id: TemplateId,
    pub item_name: String,
    pub drug_dosage: Option<String>,
    pub drug_usage: Option<String>,
    pub schedule_days: ScheduleDays,
    pub status: PlanItemStatus,
    pub interaction_config: InteractionPayload,
}

impl PlanItem {
    pub fn is_active(&self) -> bool {
        self.status == PlanItemStatus::Active
    }
}

/// Input for adding a plan item to a cycle.
#[derive(Debug, Clone)]
pub struct NewPlanItem {
    pub category: Category,
    pub template_id: TemplateId,
    pub item_name: String,
    pub drug_dosage: Option<String>,
    pub drug_usage: Option<String>,
    pub schedule_days: ScheduleDays,
    pub interaction_config: InteractionPayload,
}

impl NewPlanItem {
    pub fn new(
        category: Category,
        template_id: TemplateId,
        item_name: impl Into<String>,
        schedule_days: ScheduleDays,
    ) -> Self {
        Self {
            category,
            template_id,
            item_name: item_name.into(),
            drug_dosage: None,
            drug_usage: None,
            schedule_days,
            interaction_config: InteractionPayload::empty(),
        }
    }

    /// Attach medication dosage and usage text.
    pub fn with_interaction(mut self, config: serde_json::Value) -> Self {
        self.interaction_config = InteractionPayload(config);
        self
    }

    pub fn validate(&self) -> PlanResult<()> {
        if self.item_name.trim().is_empty() {
            return Err(PlanError::EmptyName {
                field: "plan item name",
            });
        }
        Ok(())
    }

    pub(crate) fn into_item(self, id: PlanItemId, cycle_id: CycleId) -> PlanItem {
        PlanItem {
            id,
            cycle_id,
            category: self.category,
            template_id: self.template_id,
            item_name: self.item_name,
            drug_dosage: self.drug_dosage,
            drug_usage: self.drug_usage,
            schedule_days: self.schedule_days,
            status: PlanItemStatus::Active,
            interaction_config: self.interaction_config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn cycle(days: u32, end: Option<NaiveDate>) -> TreatmentCycle {
        TreatmentCycle {
            id: CycleId::new(1).unwrap(),
            patient: PatientId::new(1).unwrap(),
            name: "Cycle 1".into(),
            start_date: d(2025, 1, 1),
            cycle_days: days,
            end_date: end,
            status: CycleStatus::InProgress,
        }
    }

    #[test]
    fn effective_end_from_cycle_days() {
        assert_eq!(cycle(21, None).effective_end(), d(2025, 1, 21));
    }

    #[test]
    fn explicit_end_date_wins() {
        assert_eq!(cycle(21, Some(d(2025, 1, 10))).effective_end(), d(2025, 1, 10));
    }

    #[test]
    fn day_one_is_start_date() {
        let c = cycle(21, None);
        assert_eq!(c.date_for_day(1), Some(d(2025, 1, 1)));
        assert_eq!(c.date_for_day(3), Some(d(2025, 1, 3)));
        assert_eq!(c.date_for_day(0), None);
    }

    #[test]
    fn scheduled_dates_clip_to_window() {
        let c = cycle(5, None);
        let days = ScheduleDays::new([1, 3, 5, 9]).unwrap();
        assert_eq!(
            c.scheduled_dates(&days, d(2025, 1, 2)),
            vec![d(2025, 1, 3), d(2025, 1, 5)]
        );
    }

    #[test]
    fn schedule_days_reject_non_positive() {
        assert!(matches!(
            ScheduleDays::new([1, 0]),
            Err(PlanError::InvalidScheduleDay { day: 0 })
        ));
        assert!(matches!(
            ScheduleDays::new([-2]),
            Err(PlanError::InvalidScheduleDay { day: -2 })
        ));
    }

    #[test]
    fn schedule_days_are_an_ordered_set() {
        let days = ScheduleDays::parse("8, 3,3,1").unwrap();
        assert_eq!(days.iter().collect::<Vec<_>>(), vec![1, 3, 8]);
    }

    #[test]
    fn non_numeric_schedule_day_names_the_input() {
        let err = ScheduleDays::parse("1,abc").unwrap_err();
        assert!(matches!(
            &err,
            PlanError::MalformedScheduleDay { raw } if raw == "abc"
        ));
        assert!(err.to_string().contains("abc"));
        assert!(matches!(
            ScheduleDays::parse("1,-2"),
            Err(PlanError::InvalidScheduleDay { day: -2 })
        ));
    }

    #[test]
    fn cycle_length_validation() {
        assert!(NewCycle::new("c", d(2025, 1, 1), 0).validate().is_err());
        assert!(
            NewCycle::new("c", d(2025, 1, 1), 0)
                .with_end_date(d(2025, 1, 5))
                .validate()
                .is_ok()
        );
        assert!(
            NewCycle::new("c", d(2025, 1, 5), 7)
                .with_end_date(d(2025, 1, 1))
                .validate()
                .is_err()
        );
        assert!(NewCycle::new(" ", d(2025, 1, 1), 7).validate().is_err());
    }

    #[test]
    fn open_cycle_statuses() {
        assert!(CycleStatus::Scheduled.is_open());
        assert!(CycleStatus::InProgress.is_open());
        assert!(!CycleStatus::Completed.is_open());
        assert!(!CycleStatus::Terminated.is_open());
    }

    #[test]
    fn category_from_label_roundtrip() {
        for cat in Category::ALL {
            assert_eq!(Category::from_label(cat.as_label()), Some(cat));
        }
    }

    #[test]
    fn interaction_payload_survives_bincode() {
        let payload = InteractionPayload(serde_json::json!({"buttons": ["taken"]}));
        let bytes = bincode::serialize(&payload).unwrap();
        let back: InteractionPayload = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, payload);
    }
}
