//! careplan CLI: treatment-plan scheduling engine.

use std::path::PathBuf;

use chrono::{Local, NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;

use careplan::adherence::AdherenceScope;
use careplan::config::CareConfig;
use careplan::engine::CareEngine;
use careplan::error::{CareError, PlanError};
use careplan::id::{CycleId, PatientId, PlanItemId, TemplateId};
use careplan::paths::CarePaths;
use careplan::plan::{Category, CycleStatus, NewCycle, NewPlanItem, ScheduleDays};
use careplan::task::{MetricReading, NewAdHocTask, ReportType, TaskSnapshot};

#[derive(Parser)]
#[command(name = "careplan", version, about = "Treatment-plan scheduling engine")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/careplan/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for persistent storage (overrides the config).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config and data directories and a default config file.
    Init,

    /// Manage treatment cycles.
    Cycle {
        #[command(subcommand)]
        action: CycleAction,
    },

    /// Manage plan items inside a cycle.
    Plan {
        #[command(subcommand)]
        action: PlanAction,
    },

    /// Add a task that no plan item owns.
    Adhoc {
        #[arg(long)]
        patient: u64,
        #[arg(long)]
        date: NaiveDate,
        /// medication, checkup, questionnaire or monitoring.
        #[arg(long)]
        category: String,
        #[arg(long)]
        title: String,
        /// Template the task belongs to (metric template for monitoring).
        #[arg(long)]
        template: Option<u64>,
    },

    /// Clean up and generate daily tasks for a date (default: today).
    Generate {
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Only this patient (default: every patient).
        #[arg(long)]
        patient: Option<u64>,
    },

    /// Promote due tasks and expire tasks outside their window.
    Refresh {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        patient: Option<u64>,
    },

    /// Record a completion event.
    Complete {
        #[command(subcommand)]
        action: CompleteAction,
    },

    /// Record a metric reading and close its monitoring task.
    Metric {
        #[arg(long)]
        patient: u64,
        /// Metric code, e.g. M_WEIGHT.
        #[arg(long)]
        code: String,
        #[arg(long)]
        value: f64,
        #[arg(long)]
        sub: Option<f64>,
        /// Measurement time (default: now), e.g. 2025-01-05T08:30:00.
        #[arg(long)]
        at: Option<NaiveDateTime>,
    },

    /// Show the daily summary as JSON.
    Summary {
        #[arg(long)]
        patient: u64,
        /// Exact day to show; without it, today plus the trailing backlog.
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Show adherence rates as JSON.
    Adherence {
        #[arg(long)]
        patient: u64,
        /// Restrict to one category.
        #[arg(long, conflicts_with = "metric")]
        category: Option<String>,
        /// Restrict to one monitoring template.
        #[arg(long)]
        metric: Option<u64>,
    },

    /// List tasks in a date range as JSON.
    Tasks {
        #[arg(long)]
        patient: u64,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
}

#[derive(Subcommand)]
enum CycleAction {
    /// Create a treatment cycle.
    Create {
        #[arg(long)]
        patient: u64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        start: NaiveDate,
        /// Nominal length in days.
        #[arg(long, default_value = "21")]
        days: u32,
        /// Explicit end date (wins over --days).
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(long, default_value = "in-progress")]
        status: String,
    },
    /// List a patient's cycles.
    List {
        #[arg(long)]
        patient: u64,
    },
    /// Change a cycle's status.
    Status {
        #[arg(long)]
        patient: u64,
        #[arg(long)]
        cycle: u64,
        /// scheduled, in-progress, completed or terminated.
        status: String,
    },
    /// Set (or clear, when omitted) a cycle's end date.
    End {
        #[arg(long)]
        patient: u64,
        #[arg(long)]
        cycle: u64,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Delete a cycle and its plan items.
    Delete {
        #[arg(long)]
        patient: u64,
        #[arg(long)]
        cycle: u64,
    },
}

#[derive(Subcommand)]
enum PlanAction {
    /// Add a plan item to a cycle.
    Add {
        #[arg(long)]
        patient: u64,
        #[arg(long)]
        cycle: u64,
        #[arg(long)]
        category: String,
        #[arg(long)]
        template: u64,
        #[arg(long)]
        name: String,
        /// Comma-separated 1-based cycle days, e.g. "1,3,8".
        #[arg(long)]
        days: String,
        #[arg(long)]
        dosage: Option<String>,
        #[arg(long)]
        usage: Option<String>,
        /// Interaction configuration as JSON.
        #[arg(long)]
        interaction: Option<String>,
    },
    /// List the plan items of a cycle.
    List {
        #[arg(long)]
        patient: u64,
        #[arg(long)]
        cycle: u64,
    },
    /// Replace a plan item's schedule days.
    Schedule {
        #[arg(long)]
        patient: u64,
        #[arg(long)]
        item: u64,
        #[arg(long)]
        days: String,
    },
    /// Re-enable a plan item.
    Enable {
        #[arg(long)]
        patient: u64,
        #[arg(long)]
        item: u64,
    },
    /// Disable a plan item; its future tasks go at the next generation run.
    Disable {
        #[arg(long)]
        patient: u64,
        #[arg(long)]
        item: u64,
    },
    /// Delete a plan item.
    Delete {
        #[arg(long)]
        patient: u64,
        #[arg(long)]
        item: u64,
    },
}

#[derive(Subcommand)]
enum CompleteAction {
    /// Medication taken: closes every medication task of the day.
    Medication {
        #[arg(long)]
        patient: u64,
        #[arg(long)]
        at: Option<NaiveDateTime>,
    },
    /// Questionnaire submitted.
    Questionnaire {
        #[arg(long)]
        patient: u64,
        #[arg(long)]
        at: Option<NaiveDateTime>,
    },
    /// Checkup report uploaded.
    Checkup {
        #[arg(long)]
        patient: u64,
        #[arg(long)]
        at: Option<NaiveDateTime>,
        /// Only close checkups linked to this report type.
        #[arg(long)]
        report_type: Option<u16>,
    },
}

fn patient(raw: u64) -> Result<PatientId> {
    Ok(CareEngine::patient_id(raw)?)
}

fn cycle_id(raw: u64) -> Result<CycleId> {
    CycleId::new(raw).ok_or_else(|| CareError::from(PlanError::CycleNotFound { cycle_id: raw }).into())
}

fn item_id(raw: u64) -> Result<PlanItemId> {
    PlanItemId::new(raw)
        .ok_or_else(|| CareError::from(PlanError::PlanItemNotFound { plan_item_id: raw }).into())
}

fn category(label: &str) -> Result<Category> {
    Category::from_label(label)
        .ok_or_else(|| miette::miette!("unknown category \"{label}\" (expected medication, checkup, questionnaire or monitoring)"))
}

fn cycle_status(label: &str) -> Result<CycleStatus> {
    CycleStatus::from_label(label)
        .ok_or_else(|| miette::miette!("unknown cycle status \"{label}\" (expected scheduled, in-progress, completed or terminated)"))
}

fn template(raw: u64) -> Result<TemplateId> {
    TemplateId::new(raw).ok_or_else(|| miette::miette!("template id must be positive"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    let cli = Cli::parse();

    let paths = CarePaths::resolve()?;
    let config_path = cli.config.clone().unwrap_or_else(|| paths.config_file());
    let mut config = CareConfig::load_or_default(&config_path)?;
    if let Some(dir) = cli.data_dir.clone() {
        config.data_dir = Some(dir);
    }
    if config.data_dir.is_none() {
        config.data_dir = Some(paths.data_dir.clone());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .init();

    let now = Local::now().naive_local();
    let today = now.date();

    if let Commands::Init = cli.command {
        paths.ensure_dirs()?;
        if !config_path.exists() {
            config.save(&config_path)?;
        }
        let engine = CareEngine::new(config)?;
        println!("Initialized careplan");
        println!("  config: {}", config_path.display());
        if let Some(dir) = &engine.config().data_dir {
            println!("  data:   {}", dir.display());
        }
        return Ok(());
    }

    let engine = CareEngine::new(config)?;

    match cli.command {
        Commands::Init => {}

        Commands::Cycle { action } => match action {
            CycleAction::Create {
                patient: p,
                name,
                start,
                days,
                end,
                status,
            } => {
                let mut new = NewCycle::new(name, start, days).with_status(cycle_status(&status)?);
                if let Some(end) = end {
                    new = new.with_end_date(end);
                }
                let id = engine.create_cycle(patient(p)?, new)?;
                println!("Created {id}");
            }
            CycleAction::List { patient: p } => {
                print_json(&engine.cycles(patient(p)?)?)?;
            }
            CycleAction::Status {
                patient: p,
                cycle,
                status,
            } => {
                let status = cycle_status(&status)?;
                engine.set_cycle_status(patient(p)?, cycle_id(cycle)?, status)?;
                println!("cycle:{cycle} is now {status}");
            }
            CycleAction::End {
                patient: p,
                cycle,
                date,
            } => {
                engine.set_cycle_end_date(patient(p)?, cycle_id(cycle)?, date)?;
                match date {
                    Some(date) => println!("cycle:{cycle} ends {date}"),
                    None => println!("cycle:{cycle} end date cleared"),
                }
            }
            CycleAction::Delete { patient: p, cycle } => {
                engine.delete_cycle(patient(p)?, cycle_id(cycle)?)?;
                println!("Deleted cycle:{cycle}");
            }
        },

        Commands::Plan { action } => match action {
            PlanAction::Add {
                patient: p,
                cycle,
                category: cat,
                template: tpl,
                name,
                days,
                dosage,
                usage,
                interaction,
            } => {
                let mut new = NewPlanItem::new(
                    category(&cat)?,
                    template(tpl)?,
                    name,
                    ScheduleDays::parse(&days).map_err(CareError::from)?,
                );
                new.drug_dosage = dosage;
                new.drug_usage = usage;
                if let Some(json) = interaction {
                    new = new.with_interaction(serde_json::from_str(&json).into_diagnostic()?);
                }
                let id = engine.add_plan_item(patient(p)?, cycle_id(cycle)?, new)?;
                println!("Created {id}");
            }
            PlanAction::List { patient: p, cycle } => {
                print_json(&engine.plan_items(patient(p)?, cycle_id(cycle)?)?)?;
            }
            PlanAction::Schedule {
                patient: p,
                item,
                days,
            } => {
                let days = ScheduleDays::parse(&days).map_err(CareError::from)?;
                engine.set_schedule_days(patient(p)?, item_id(item)?, days)?;
                println!("item:{item} rescheduled; run `careplan generate` to apply");
            }
            PlanAction::Enable { patient: p, item } => {
                engine.set_plan_item_enabled(patient(p)?, item_id(item)?, true)?;
                println!("item:{item} enabled");
            }
            PlanAction::Disable { patient: p, item } => {
                engine.set_plan_item_enabled(patient(p)?, item_id(item)?, false)?;
                println!("item:{item} disabled");
            }
            PlanAction::Delete { patient: p, item } => {
                engine.delete_plan_item(patient(p)?, item_id(item)?)?;
                println!("Deleted item:{item}");
            }
        },

        Commands::Adhoc {
            patient: p,
            date,
            category: cat,
            title,
            template: tpl,
        } => {
            let mut snapshot = TaskSnapshot::titled(title);
            snapshot.template_id = tpl.map(template).transpose()?;
            let id = engine.add_adhoc_task(
                patient(p)?,
                NewAdHocTask {
                    task_date: date,
                    task_type: category(&cat)?,
                    snapshot,
                },
                today,
            )?;
            println!("Created {id}");
        }

        Commands::Generate { date, patient: p } => {
            let date = date.unwrap_or(today);
            match p {
                Some(p) => {
                    let report = engine.generate_for_patient(patient(p)?, date)?;
                    print_json(&report)?;
                }
                None => {
                    let report = engine.run_daily_generation(date);
                    println!(
                        "Generated for {date}: {} patients, {} created, {} removed",
                        report.patients, report.created, report.removed
                    );
                    if !report.is_success() {
                        for (failed, err) in &report.failures {
                            eprintln!("{failed} failed: {err}");
                        }
                        miette::bail!("{} patient(s) failed", report.failures.len());
                    }
                }
            }
        }

        Commands::Refresh { date, patient: p } => {
            let p = p.map(patient).transpose()?;
            let report = engine.refresh_task_statuses(date.unwrap_or(today), p)?;
            print_json(&report)?;
        }

        Commands::Complete { action } => {
            let completion = match action {
                CompleteAction::Medication { patient: p, at } => {
                    engine.complete_medication(patient(p)?, at.unwrap_or(now), today)?
                }
                CompleteAction::Questionnaire { patient: p, at } => {
                    engine.complete_questionnaire(patient(p)?, at.unwrap_or(now), today)?
                }
                CompleteAction::Checkup {
                    patient: p,
                    at,
                    report_type,
                } => engine.complete_checkup(
                    patient(p)?,
                    at.unwrap_or(now),
                    today,
                    report_type.map(ReportType),
                )?,
            };
            print_json(&completion)?;
        }

        Commands::Metric {
            patient: p,
            code,
            value,
            sub,
            at,
        } => {
            let outcome = engine.record_metric(
                patient(p)?,
                MetricReading {
                    metric_code: code,
                    value_main: value,
                    value_sub: sub,
                    measured_at: at.unwrap_or(now),
                },
                today,
            )?;
            print_json(&outcome)?;
        }

        Commands::Summary { patient: p, date } => {
            print_json(&engine.daily_summary(patient(p)?, date, today)?)?;
        }

        Commands::Adherence {
            patient: p,
            category: cat,
            metric,
        } => {
            let p = patient(p)?;
            match (cat, metric) {
                (Some(cat), _) => {
                    print_json(&engine.adherence(p, AdherenceScope::Category(category(&cat)?))?)?
                }
                (None, Some(m)) => {
                    print_json(&engine.adherence(p, AdherenceScope::Metric(template(m)?))?)?
                }
                (None, None) => print_json(&engine.adherence_report(p)?)?,
            }
        }

        Commands::Tasks { patient: p, from, to } => {
            print_json(&engine.tasks_for(patient(p)?, from, to)?)?;
        }
    }

    Ok(())
}
