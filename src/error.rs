//! Rich diagnostic error types for the careplan engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so callers know exactly what
//! went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the careplan engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, sources) through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum CareError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Path(#[from] crate::paths::PathError),
}

// ---------------------------------------------------------------------------
// Plan errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum PlanError {
    #[error("invalid patient reference: {raw}")]
    #[diagnostic(
        code(careplan::plan::invalid_patient),
        help("Patient identifiers are positive integers issued by the patient directory.")
    )]
    InvalidPatient { raw: u64 },

    #[error("invalid schedule day {day}: days are 1-based and must be positive")]
    #[diagnostic(
        code(careplan::plan::invalid_schedule_day),
        help(
            "Day 1 is the cycle start date, day N is start + (N - 1). \
             Remove zero or negative entries from the schedule."
        )
    )]
    InvalidScheduleDay { day: i64 },

    #[error("malformed schedule day \"{raw}\": expected a whole number")]
    #[diagnostic(
        code(careplan::plan::malformed_schedule_day),
        help("Write schedule days as comma-separated integers, e.g. \"1,3,8\".")
    )]
    MalformedScheduleDay { raw: String },

    #[error("invalid cycle length: {message}")]
    #[diagnostic(
        code(careplan::plan::invalid_cycle_length),
        help(
            "A treatment cycle needs either `cycle_days` >= 1 or an explicit \
             end date on or after its start date."
        )
    )]
    InvalidCycleLength { message: String },

    #[error("{field} must not be empty")]
    #[diagnostic(
        code(careplan::plan::empty_name),
        help("Provide a display name; it is snapshotted into every generated task.")
    )]
    EmptyName { field: &'static str },

    #[error("treatment cycle not found: {cycle_id}")]
    #[diagnostic(
        code(careplan::plan::cycle_not_found),
        help("The cycle does not exist for this patient. List cycles with `careplan cycle list`.")
    )]
    CycleNotFound { cycle_id: u64 },

    #[error("plan item not found: {plan_item_id}")]
    #[diagnostic(
        code(careplan::plan::plan_item_not_found),
        help("The plan item may have been deleted. Deleted items keep their completed tasks.")
    )]
    PlanItemNotFound { plan_item_id: u64 },
}

// ---------------------------------------------------------------------------
// Task errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum TaskError {
    #[error("unknown patient: {patient_id}")]
    #[diagnostic(
        code(careplan::task::patient_not_found),
        help(
            "No cycles or tasks were ever recorded for this patient. \
             Create a treatment cycle first."
        )
    )]
    PatientNotFound { patient_id: u64 },

    #[error("daily task not found: {task_id}")]
    #[diagnostic(
        code(careplan::task::not_found),
        help("The task may have been retracted by a later generation run.")
    )]
    TaskNotFound { task_id: u64 },
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(careplan::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(careplan::store::redb),
        help(
            "The embedded database encountered a transaction error. \
             The in-memory state was not changed; the next run re-derives any missing tasks."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(careplan::store::serde),
        help(
            "Failed to serialize or deserialize a stored row. \
             This usually means the row format changed between versions."
        )
    )]
    Serialization { message: String },

    #[error("id allocator exhausted")]
    #[diagnostic(
        code(careplan::store::exhausted),
        help("The record ID space is exhausted. Check for allocation loops.")
    )]
    AllocatorExhausted,
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(careplan::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(careplan::config::parse),
        help("Check the TOML syntax in the config file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(careplan::config::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(careplan::config::invalid), help("{message}"))]
    Invalid { message: String },
}

/// Convenience alias for functions returning careplan results.
pub type CareResult<T> = std::result::Result<T, CareError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_error_converts_to_care_error() {
        let err = PlanError::InvalidScheduleDay { day: 0 };
        let care: CareError = err.into();
        assert!(matches!(
            care,
            CareError::Plan(PlanError::InvalidScheduleDay { day: 0 })
        ));
    }

    #[test]
    fn store_error_converts_to_care_error() {
        let err = StoreError::Redb {
            message: "boom".into(),
        };
        let care: CareError = err.into();
        assert!(matches!(care, CareError::Store(StoreError::Redb { .. })));
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let msg = format!("{}", PlanError::InvalidScheduleDay { day: -3 });
        assert!(msg.contains("-3"));
        let msg = format!("{}", PlanError::MalformedScheduleDay { raw: "abc".into() });
        assert!(msg.contains("\"abc\""));
        let msg = format!("{}", TaskError::PatientNotFound { patient_id: 42 });
        assert!(msg.contains("42"));
    }
}
