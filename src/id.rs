//! Record identifiers for the careplan engine.
//!
//! Every stored row is identified by a niche-optimized newtype over
//! `NonZeroU64`, so `Option<TaskId>` (the weak plan-item back-reference, the
//! metric → task link) costs nothing extra. The [`IdAllocator`] hands out
//! cycle, plan-item, task and metric IDs from one shared sequence.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name(NonZeroU64);

        impl $name {
            /// Create an identifier from a raw `u64`.
            ///
            /// Returns `None` if `raw` is zero.
            pub fn new(raw: u64) -> Option<Self> {
                NonZeroU64::new(raw).map($name)
            }

            /// Get the underlying `u64` value.
            pub fn get(self) -> u64 {
                self.0.get()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

record_id!(
    /// Patient reference issued by the (external) patient directory.
    PatientId,
    "patient"
);
record_id!(
    /// Treatment cycle identifier.
    CycleId,
    "cycle"
);
record_id!(
    /// Plan item identifier.
    PlanItemId,
    "item"
);
record_id!(
    /// Materialized daily task identifier.
    TaskId,
    "task"
);
record_id!(
    /// Health-metric event record identifier.
    MetricId,
    "metric"
);
record_id!(
    /// Weak reference into an external template library (drug, checkup,
    /// questionnaire or monitoring definition).
    TemplateId,
    "template"
);

/// Thread-safe record ID allocator.
///
/// Produces monotonically increasing IDs starting from 1. The high-water mark
/// is persisted by the durable tier so IDs are never reused after a restart.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Create a new allocator that starts from ID 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Create an allocator that resumes from a given ID.
    pub fn starting_from(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start.max(1)),
        }
    }

    /// Allocate the next raw ID.
    pub fn next_raw(&self) -> Result<NonZeroU64, StoreError> {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        // fetch_add wraps to 0 once the space is used up.
        NonZeroU64::new(raw).ok_or(StoreError::AllocatorExhausted)
    }

    /// The value the next allocation will return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }

    pub fn next_cycle(&self) -> Result<CycleId, StoreError> {
        self.next_raw().map(CycleId)
    }

    pub fn next_plan_item(&self) -> Result<PlanItemId, StoreError> {
        self.next_raw().map(PlanItemId)
    }

    pub fn next_task(&self) -> Result<TaskId, StoreError> {
        self.next_raw().map(TaskId)
    }

    pub fn next_metric(&self) -> Result<MetricId, StoreError> {
        self.next_raw().map(MetricId)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_not_an_id() {
        assert!(PatientId::new(0).is_none());
        assert_eq!(PatientId::new(7).unwrap().get(), 7);
    }

    #[test]
    fn option_id_is_niche_optimized() {
        assert_eq!(
            std::mem::size_of::<Option<TaskId>>(),
            std::mem::size_of::<TaskId>()
        );
    }

    #[test]
    fn allocator_is_monotonic_across_kinds() {
        let alloc = IdAllocator::new();
        let c = alloc.next_cycle().unwrap();
        let p = alloc.next_plan_item().unwrap();
        let t = alloc.next_task().unwrap();
        assert_eq!((c.get(), p.get(), t.get()), (1, 2, 3));
        assert_eq!(alloc.peek(), 4);
    }

    #[test]
    fn allocator_resumes() {
        let alloc = IdAllocator::starting_from(100);
        assert_eq!(alloc.next_task().unwrap().get(), 100);
    }

    #[test]
    fn display_carries_prefix() {
        assert_eq!(TaskId::new(5).unwrap().to_string(), "task:5");
    }
}
