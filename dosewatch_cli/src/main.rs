use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use dosewatch_core::analytics::StockStatus;
use dosewatch_core::schedule::parse_timezone;
use dosewatch_core::*;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "dosewatch")]
#[command(about = "Medication adherence tracking engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Load configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Pin the current instant (RFC 3339), for replay and testing
    #[arg(long, global = true)]
    now: Option<DateTime<Utc>>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage patients
    #[command(subcommand)]
    Patient(PatientCommand),

    /// Manage medications
    #[command(subcommand)]
    Med(MedCommand),

    /// Record a reported dose outcome
    Record {
        #[arg(long)]
        patient: Uuid,

        #[arg(long)]
        medication: Uuid,

        /// Scheduled slot (HH:MM)
        #[arg(long)]
        slot: String,

        /// taken, skipped or missed
        #[arg(long, default_value = "taken")]
        outcome: ReportedOutcome,

        /// Zone the dose was reported from (defaults to the patient's zone)
        #[arg(long)]
        timezone: Option<String>,
    },

    /// Run one missed-dose sweep pass
    Sweep,

    /// Send reminders for slots that just came due
    Remind,

    /// Run reminder and sweep passes on the configured interval
    Daemon {
        /// Stop after this many passes
        #[arg(long)]
        max_passes: Option<u32>,
    },

    /// Adherence analytics
    #[command(subcommand)]
    Stats(StatsCommand),

    /// Export a patient's ledger to CSV
    Export {
        #[arg(long)]
        patient: Uuid,

        /// Output file (defaults to <data-dir>/exports/<patient>.csv)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum PatientCommand {
    /// Register a patient
    Add {
        #[arg(long)]
        name: String,

        /// IANA zone, e.g. America/New_York
        #[arg(long)]
        timezone: String,
    },

    /// List patients
    List,
}

#[derive(Subcommand)]
enum MedCommand {
    /// Enroll a medication for a patient
    Add {
        #[arg(long)]
        patient: Uuid,

        #[arg(long)]
        name: String,

        #[arg(long)]
        dosage: Option<String>,

        /// scheduled or as_needed
        #[arg(long, default_value = "scheduled")]
        kind: MedicationKind,

        /// Daily slot (HH:MM); repeat for several
        #[arg(long = "slot")]
        slots: Vec<String>,

        #[arg(long)]
        quantity: u32,
    },

    /// List a patient's medications
    List {
        #[arg(long)]
        patient: Uuid,
    },

    /// Add stock
    Refill {
        #[arg(long)]
        id: Uuid,

        #[arg(long)]
        quantity: u32,
    },

    /// Replace the daily slots
    Slots {
        #[arg(long)]
        id: Uuid,

        #[arg(long = "slot")]
        slots: Vec<String>,
    },

    /// Pause tracking
    Deactivate(MedId),

    /// Resume tracking
    Activate(MedId),

    /// Soft-delete
    Delete(MedId),
}

#[derive(Args)]
struct MedId {
    #[arg(long)]
    id: Uuid,
}

#[derive(Subcommand)]
enum StatsCommand {
    /// 0-90 day streak of taken doses
    Reliability(PatientArg),
    /// Daily adherence percentage for the last 30 days
    Heatmap(PatientArg),
    /// Missed doses per time-of-day window
    Risk(PatientArg),
    /// Days of stock left per medication
    Runway(PatientArg),
    /// Soonest upcoming dose
    Next(PatientArg),
    /// Outcome counts for the last 30 days
    Summary(PatientArg),
}

#[derive(Args)]
struct PatientArg {
    #[arg(long)]
    patient: Uuid,
}

/// Shared handles for one invocation
struct App {
    config: Config,
    paths: DataPaths,
    store: FileStore,
    clock: Box<dyn Clock>,
    json: bool,
}

impl App {
    fn print<T: Serialize>(&self, value: &T, text: impl FnOnce()) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            text();
        }
        Ok(())
    }
}

fn main() -> ExitCode {
    // Initialize logging
    dosewatch_core::logging::init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Process exit status per error class
fn exit_code(e: &Error) -> u8 {
    match e.class() {
        ErrorClass::Validation => 2,
        ErrorClass::Conflict => 3,
        ErrorClass::State => 4,
        ErrorClass::Transient => 5,
        ErrorClass::Fatal => 6,
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // Determine data directory
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| config.data.data_dir.clone());
    let paths = DataPaths::new(data_dir);
    let store = FileStore::open(paths.store_dir(), &config.store)?;

    let clock: Box<dyn Clock> = match cli.now {
        Some(now) => Box::new(FixedClock::new(now)),
        None => Box::new(SystemClock),
    };

    let app = App {
        config,
        paths,
        store,
        clock,
        json: cli.json,
    };

    match cli.command {
        Commands::Patient(cmd) => cmd_patient(&app, cmd),
        Commands::Med(cmd) => cmd_med(&app, cmd),
        Commands::Record {
            patient,
            medication,
            slot,
            outcome,
            timezone,
        } => cmd_record(&app, patient, medication, slot, outcome, timezone),
        Commands::Sweep => cmd_sweep(&app),
        Commands::Remind => cmd_remind(&app),
        Commands::Daemon { max_passes } => cmd_daemon(&app, max_passes),
        Commands::Stats(cmd) => cmd_stats(&app, cmd),
        Commands::Export { patient, out } => cmd_export(&app, patient, out),
    }
}

fn cmd_patient(app: &App, cmd: PatientCommand) -> Result<()> {
    let schedule = Schedule::new(&app.store, app.clock.as_ref());

    match cmd {
        PatientCommand::Add { name, timezone } => {
            let patient = schedule.register_patient(&name, &timezone)?;
            app.print(&patient, || {
                println!("✓ Registered {} ({})", patient.name, patient.timezone);
                println!("  id: {}", patient.id);
            })
        }
        PatientCommand::List => {
            let patients = schedule.patients()?;
            app.print(&patients, || {
                if patients.is_empty() {
                    println!("No patients registered.");
                }
                for p in &patients {
                    println!("{}  {}  {}", p.id, p.name, p.timezone);
                }
            })
        }
    }
}

fn cmd_med(app: &App, cmd: MedCommand) -> Result<()> {
    let schedule = Schedule::new(&app.store, app.clock.as_ref());

    match cmd {
        MedCommand::Add {
            patient,
            name,
            dosage,
            kind,
            slots,
            quantity,
        } => {
            let med = schedule.enroll(NewMedication {
                owner_id: patient,
                name,
                dosage,
                kind,
                slots,
                quantity,
            })?;
            app.print(&med, || {
                println!("✓ Enrolled {} ({})", med.name, format_slots(&med));
                println!("  id: {}", med.id);
            })
        }
        MedCommand::List { patient } => {
            let meds = schedule.medications(patient)?;
            app.print(&meds, || {
                if meds.is_empty() {
                    println!("No medications.");
                }
                for m in &meds {
                    let state = if m.is_active { "" } else { "  [inactive]" };
                    println!(
                        "{}  {}  {}  remaining {}{}",
                        m.id,
                        m.name,
                        format_slots(m),
                        m.remaining_quantity,
                        state
                    );
                }
            })
        }
        MedCommand::Refill { id, quantity } => {
            let med = schedule.refill(id, quantity)?;
            app.print(&med, || {
                println!("✓ Refilled {}: {} remaining", med.name, med.remaining_quantity)
            })
        }
        MedCommand::Slots { id, slots } => {
            let med = schedule.set_slots(id, &slots)?;
            app.print(&med, || {
                println!("✓ Slots for {}: {}", med.name, format_slots(&med))
            })
        }
        MedCommand::Deactivate(MedId { id }) => {
            let med = schedule.set_active(id, false)?;
            app.print(&med, || println!("✓ Paused {}", med.name))
        }
        MedCommand::Activate(MedId { id }) => {
            let med = schedule.set_active(id, true)?;
            app.print(&med, || println!("✓ Resumed {}", med.name))
        }
        MedCommand::Delete(MedId { id }) => {
            schedule.soft_delete(id)?;
            app.print(&serde_json::json!({ "deleted": id }), || {
                println!("✓ Deleted medication {}", id)
            })
        }
    }
}

fn cmd_record(
    app: &App,
    patient: Uuid,
    medication: Uuid,
    slot: String,
    outcome: ReportedOutcome,
    timezone: Option<String>,
) -> Result<()> {
    let timezone = timezone.as_deref().map(parse_timezone).transpose()?;
    let recorder = Recorder::new(&app.store, app.clock.as_ref(), &app.config.adherence);

    let entry = recorder.record_dose(&DoseReport {
        medication_id: medication,
        owner_id: patient,
        scheduled_slot: slot,
        outcome,
        timezone,
    })?;

    app.print(&entry, || {
        println!(
            "✓ Recorded {} for {} on {}: {}",
            entry.outcome.label(),
            entry.scheduled_slot,
            entry.local_date,
            entry.classification()
        );
        if entry.delay_minutes() > 0 {
            println!("  {} minutes late", entry.delay_minutes());
        }
    })
}

fn sweeper_parts(app: &App) -> (JsonGuardianDirectory, OutboxNotifier, RunLock) {
    (
        JsonGuardianDirectory::new(app.paths.guardians()),
        OutboxNotifier::new(app.paths.outbox(), app.config.store.lock_timeout()),
        RunLock::new(app.paths.sweep_lock()),
    )
}

fn cmd_sweep(app: &App) -> Result<()> {
    let (guardians, outbox, run_lock) = sweeper_parts(app);
    let realtime = LogNotifier;
    let sweeper = Sweeper::new(
        &app.store,
        app.clock.as_ref(),
        &app.config,
        &guardians,
        &outbox,
        &realtime,
        run_lock,
    );

    let missed = sweeper.run_sweep_pass()?;
    app.print(&serde_json::json!({ "missed": missed }), || {
        println!("✓ Sweep complete: {} missed", missed)
    })
}

fn cmd_remind(app: &App) -> Result<()> {
    let (guardians, outbox, run_lock) = sweeper_parts(app);
    let realtime = LogNotifier;
    let sweeper = Sweeper::new(
        &app.store,
        app.clock.as_ref(),
        &app.config,
        &guardians,
        &outbox,
        &realtime,
        run_lock,
    );

    let sent = sweeper.run_reminder_pass()?;
    app.print(&serde_json::json!({ "reminders": sent }), || {
        println!("✓ Sent {} reminders", sent)
    })
}

fn cmd_daemon(app: &App, max_passes: Option<u32>) -> Result<()> {
    let (guardians, outbox, run_lock) = sweeper_parts(app);
    let realtime = LogNotifier;
    let sweeper = Sweeper::new(
        &app.store,
        app.clock.as_ref(),
        &app.config,
        &guardians,
        &outbox,
        &realtime,
        run_lock,
    );
    let interval = app.config.sweep.interval();

    tracing::info!("Sweep daemon started, interval {:?}", interval);
    let mut passes = 0u32;
    loop {
        match sweeper.run_reminder_pass() {
            Ok(_) => {}
            Err(Error::ReminderInProgress) => {
                tracing::info!("Previous reminder pass still running, skipping")
            }
            Err(e) => tracing::warn!("Reminder pass failed: {}", e),
        }
        match sweeper.run_sweep_pass() {
            Ok(missed) => tracing::info!("Pass {} complete: {} missed", passes + 1, missed),
            Err(Error::SweepInProgress) => {
                tracing::info!("Previous sweep pass still running, skipping")
            }
            Err(e) => tracing::error!("Sweep pass failed: {}", e),
        }

        passes += 1;
        if max_passes.is_some_and(|max| passes >= max) {
            break;
        }
        std::thread::sleep(interval);
    }

    println!("✓ Daemon stopped after {} passes", passes);
    Ok(())
}

fn cmd_stats(app: &App, cmd: StatsCommand) -> Result<()> {
    let analytics = Analytics::new(&app.store, app.clock.as_ref());

    match cmd {
        StatsCommand::Reliability(PatientArg { patient }) => {
            let days = analytics.reliability_index(patient)?;
            app.print(&serde_json::json!({ "reliability_index": days }), || {
                println!("Reliability index: {} days", days)
            })
        }
        StatsCommand::Heatmap(PatientArg { patient }) => {
            let days = analytics.compliance_heatmap(patient)?;
            app.print(&days, || {
                for day in &days {
                    println!("{}  {:>3}%", day.date, day.percentage);
                }
            })
        }
        StatsCommand::Risk(PatientArg { patient }) => {
            let risk = analytics.temporal_risk(patient)?;
            app.print(&risk, || {
                println!("Missed doses, last 30 days");
                println!("  morning    {}", risk.morning);
                println!("  afternoon  {}", risk.afternoon);
                println!("  evening    {}", risk.evening);
                println!("  night      {}", risk.night);
            })
        }
        StatsCommand::Runway(PatientArg { patient }) => {
            let items = analytics.inventory_runway(patient)?;
            app.print(&items, || {
                for item in &items {
                    let status = match item.status {
                        StockStatus::Critical => "critical",
                        StockStatus::Low => "low",
                        StockStatus::Healthy => "healthy",
                    };
                    println!(
                        "{}  {} left, {} days  [{}]",
                        item.name, item.remaining_quantity, item.days_remaining, status
                    );
                }
            })
        }
        StatsCommand::Next(PatientArg { patient }) => {
            let next = analytics.next_dose(patient)?;
            app.print(&next, || match &next {
                Some(dose) => println!(
                    "Next: {} at {} (in {} min)",
                    dose.medication_name, dose.slot, dose.minutes_until
                ),
                None => println!("No upcoming doses."),
            })
        }
        StatsCommand::Summary(PatientArg { patient }) => {
            let summary = analytics.adherence_summary(patient)?;
            app.print(&summary, || {
                println!("Last 30 days");
                println!("  on time  {}", summary.on_time);
                println!("  late     {}", summary.late);
                println!("  skipped  {}", summary.skipped);
                println!("  missed   {}", summary.missed);
                println!("  adherence {}%", summary.adherence_percentage);
            })
        }
    }
}

fn cmd_export(app: &App, patient: Uuid, out: Option<PathBuf>) -> Result<()> {
    let csv_path = out.unwrap_or_else(|| {
        app.paths
            .root()
            .join("exports")
            .join(format!("{}.csv", patient))
    });

    let data = app.store.read()?;
    let count = export_ledger(&data, patient, &csv_path)?;

    app.print(
        &serde_json::json!({ "rows": count, "path": csv_path.display().to_string() }),
        || {
            println!("✓ Exported {} entries", count);
            println!("  CSV: {}", csv_path.display());
        },
    )
}

fn format_slots(med: &Medication) -> String {
    if med.slots.is_empty() {
        return "as needed".into();
    }
    med.slots
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
