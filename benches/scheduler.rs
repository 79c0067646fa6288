//! Benchmarks for daily task generation and the read views.

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use careplan::adherence::AdherenceScope;
use careplan::config::CareConfig;
use careplan::engine::CareEngine;
use careplan::id::{PatientId, TemplateId};
use careplan::plan::{Category, NewCycle, NewPlanItem, ScheduleDays};

const PATIENTS: u64 = 200;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
}

/// A fleet of patients, each on a 21-day cycle with one item per category.
fn fleet() -> CareEngine {
    let engine = CareEngine::new(CareConfig::default()).unwrap();
    for raw in 1..=PATIENTS {
        let patient = PatientId::new(raw).unwrap();
        let cycle = engine
            .create_cycle(patient, NewCycle::new("Cycle 1", day(1), 21))
            .unwrap();
        for (i, category) in Category::ALL.into_iter().enumerate() {
            engine
                .add_plan_item(
                    patient,
                    cycle,
                    NewPlanItem::new(
                        category,
                        TemplateId::new(i as u64 + 1).unwrap(),
                        category.as_label(),
                        ScheduleDays::new(1..=21).unwrap(),
                    ),
                )
                .unwrap();
        }
    }
    engine
}

fn bench_generation(c: &mut Criterion) {
    let engine = fleet();
    engine.run_daily_generation(day(1));

    // Steady state: every task already exists, so this measures cleanup and
    // the idempotence checks.
    c.bench_function("generate_200_patients_rerun", |bench| {
        bench.iter(|| black_box(engine.run_daily_generation(black_box(day(1)))))
    });
}

fn bench_refresh(c: &mut Criterion) {
    let engine = fleet();
    engine.run_daily_generation(day(1));

    c.bench_function("refresh_200_patients", |bench| {
        bench.iter(|| black_box(engine.refresh_task_statuses(day(10), None).unwrap()))
    });
}

fn bench_read_views(c: &mut Criterion) {
    let engine = fleet();
    engine.run_daily_generation(day(1));
    let patient = PatientId::new(1).unwrap();

    c.bench_function("daily_summary", |bench| {
        bench.iter(|| black_box(engine.daily_summary(patient, Some(day(5)), day(5)).unwrap()))
    });
    c.bench_function("adherence_all_monitoring", |bench| {
        bench.iter(|| black_box(engine.adherence(patient, AdherenceScope::AllMonitoring).unwrap()))
    });
}

criterion_group!(benches, bench_generation, bench_refresh, bench_read_views);
criterion_main!(benches);
