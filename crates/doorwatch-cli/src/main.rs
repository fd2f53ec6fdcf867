use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use clap::{Parser, Subcommand};
use doorwatch_core::memory::MemoryMismatchSink;
use doorwatch_core::{
    IdentityGallery, IdentityId, MismatchRecord, ReconcileRequest, Reconciler, Settings,
};
use doorwatch_hw::Camera;
use doorwatch_rpc::OdooClient;
use std::collections::BTreeSet;

mod report_store;

use report_store::ReportStore;

#[derive(Parser)]
#[command(name = "doorwatch", version, about = "Door attendance reconciliation CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find door detections with no matching check-in/check-out
    Reconcile {
        /// Start of the range (YYYY-MM-DD, YYYY-MM-DD HH:MM[:SS] or RFC 3339; UTC)
        #[arg(long)]
        from: String,
        /// End of the range; a bare date means the end of that day
        #[arg(long)]
        to: String,
        /// Only reconcile this employee id (repeatable)
        #[arg(long = "employee", value_name = "ID")]
        employees: Vec<i64>,
        /// Attendance window around each detection, in minutes
        #[arg(long)]
        window_mins: Option<i64>,
        /// Print the result without replacing the stored report
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show the stored mismatch report
    Report {
        #[arg(long)]
        json: bool,
    },
    /// List employees with a registered face
    Gallery,
    /// List video capture devices
    Cameras,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Reconcile {
            from,
            to,
            employees,
            window_mins,
            dry_run,
            json,
        } => {
            let settings = Settings::load().context("failed to load configuration")?;
            let window = match window_mins {
                Some(m) if m < 0 => bail!("--window-mins must not be negative"),
                Some(m) => TimeDelta::try_minutes(m).context("--window-mins is too large")?,
                None => settings.reconcile_window,
            };
            let request = ReconcileRequest {
                from: parse_bound(&from, Bound::Start)?,
                to: parse_bound(&to, Bound::End)?,
                identities: (!employees.is_empty())
                    .then(|| employees.into_iter().map(IdentityId).collect::<BTreeSet<_>>()),
            };

            let client = OdooClient::connect(&settings.server)
                .context("failed to connect to the attendance server")?;
            let reconciler = Reconciler::new(window);
            let report = if dry_run {
                reconciler.run(&request, &client, &client, &mut MemoryMismatchSink::new())?
            } else {
                let mut store = ReportStore::open(&settings.report_db)?;
                reconciler.run(&request, &client, &client, &mut store)?
            };

            if json {
                let out = serde_json::json!({
                    "run_id": report.run_id,
                    "examined": report.examined,
                    "stored": !dry_run,
                    "mismatches": report.mismatches,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                print_lines(&report.mismatches);
                println!(
                    "{} of {} detections without attendance{}",
                    report.mismatches.len(),
                    report.examined,
                    if dry_run { " (dry run, not stored)" } else { "" }
                );
            }
        }
        Commands::Report { json } => {
            let settings = Settings::load().context("failed to load configuration")?;
            let report = ReportStore::open(&settings.report_db)?
                .load()
                .context("failed to read the stored report")?;
            if json {
                let out = serde_json::json!({
                    "run_id": report.run.map(|(id, _)| id),
                    "stored_at": report.run.map(|(_, at)| at),
                    "mismatches": report.lines,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                match report.run {
                    Some((id, at)) => {
                        println!("Run {id} stored {}", at.format("%Y-%m-%d %H:%M:%S UTC"))
                    }
                    None => println!("No reconciliation has been stored yet"),
                }
                print_lines(&report.lines);
            }
        }
        Commands::Gallery => {
            let settings = Settings::load().context("failed to load configuration")?;
            let client = OdooClient::connect(&settings.server)
                .context("failed to connect to the attendance server")?;
            let gallery = IdentityGallery::load(&client, settings.encoding_dim)?;
            if gallery.is_empty() {
                println!("No faces registered");
            }
            for identity in gallery.identities() {
                println!("{:>6}  {}", identity.id.0, identity.name);
            }
        }
        Commands::Cameras => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No video capture devices found");
            }
            for d in devices {
                println!("{}  {} ({})", d.path, d.name, d.driver);
            }
        }
    }

    Ok(())
}

fn print_lines(lines: &[MismatchRecord]) {
    if lines.is_empty() {
        println!("No mismatches");
        return;
    }
    println!(
        "{:<19}  {:>6}  {:<24}  {:>6}  {:<16}  REMARK",
        "DETECTED (UTC)", "ID", "NAME", "CONF", "CAMERA"
    );
    for l in lines {
        println!(
            "{:<19}  {:>6}  {:<24}  {:>5.1}%  {:<16}  {}",
            l.detected_at.format("%Y-%m-%d %H:%M:%S"),
            l.identity.0,
            l.identity_name.as_deref().unwrap_or("-"),
            l.confidence * 100.0,
            l.camera,
            l.remark
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Start,
    End,
}

/// Parse a range bound. A bare date is the start of the day, or its last second for [`Bound::End`].
fn parse_bound(text: &str, bound: Bound) -> Result<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Ok(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(t.and_utc());
        }
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .with_context(|| format!("unrecognised date/time {text:?}"))?;
    let time = match bound {
        Bound::Start => NaiveTime::MIN,
        Bound::End => NaiveTime::from_hms_opt(23, 59, 59).context("invalid end-of-day time")?,
    };
    Ok(date.and_time(time).and_utc())
}
