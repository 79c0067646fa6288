// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # careplan
//!
//! Daily care checklists materialized from treatment plans.
//!
//! ## Architecture
//!
//! - **Plan model** (`plan`): treatment cycles and recurring plan items
//! - **Task store** (`task`, `store`): dated tasks with snapshots, per-patient
//!   transactional partitions, optional redb durability
//! - **Scheduler** (`scheduler`): idempotent cleanup + generation for a date
//! - **Status resolver** (`status`): initial status, trailing windows, refresh
//! - **Completion** (`completion`): event-driven closing with a grace rule
//! - **Read views** (`adherence`, `summary`): completion ratios and the daily list
//!
//! ## Library usage
//!
//! ```no_run
//! use careplan::config::CareConfig;
//! use careplan::engine::CareEngine;
//! use careplan::id::{PatientId, TemplateId};
//! use careplan::plan::{Category, NewCycle, NewPlanItem, ScheduleDays};
//! use chrono::NaiveDate;
//!
//! let engine = CareEngine::new(CareConfig::default()).unwrap();
//! let patient = PatientId::new(1).unwrap();
//! let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
//! let cycle = engine.create_cycle(patient, NewCycle::new("Cycle 1", start, 21)).unwrap();
//! engine
//!     .add_plan_item(
//!         patient,
//!         cycle,
//!         NewPlanItem::new(
//!             Category::Medication,
//!             TemplateId::new(1).unwrap(),
//!             "Drug A",
//!             ScheduleDays::new([1, 3]).unwrap(),
//!         ),
//!     )
//!     .unwrap();
//! assert_eq!(engine.generate_daily_tasks(start).unwrap(), 2);
//! ```

pub mod adherence;
pub mod catalog;
pub mod completion;
pub mod config;
pub mod engine;
pub mod error;
pub mod id;
pub mod paths;
pub mod plan;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod summary;
pub mod task;
