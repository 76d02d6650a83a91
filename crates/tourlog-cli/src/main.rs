use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};

use tourlog_core::{line_coverage, milestones, mode_coverage, progress_percent, Visit};
use tourlog_media::{transcode, TranscodeOptions};
use tourlog_storage::{JourneyClient, LocalStore, Session, StoreMode};
use tourlog_sync::{export_bundle, import_into};

#[derive(Debug, Parser)]
#[command(name = "tourlog")]
#[command(about = "Personal transit-station visit tracker")]
struct Cli {
    /// Path of the local ledger store.
    #[arg(long, env = "TOURLOG_DATA_PATH", default_value = "tourlog.json")]
    data_path: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Roll random unvisited station suggestions.
    Roll {
        #[arg(long, default_value_t = 3)]
        count: usize,
        /// Home station for a best-effort journey-duration estimate.
        #[arg(long, env = "TOURLOG_HOME_STATION")]
        from: Option<String>,
    },
    /// Show progress and per-line/per-mode coverage.
    Stats,
    /// List milestone achievements.
    Milestones,
    /// Record a visit to a station (matched by name).
    Visit {
        station: String,
        /// Visit date as YYYY-MM-DD; defaults to today.
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        note: Option<String>,
    },
    /// Drop every visit of a station, marking it unvisited again.
    Unvisit { station: String },
    /// Transcode an image file and attach it to a visit.
    Photo {
        station: String,
        file: PathBuf,
        /// Index into the station's visit sequence; defaults to the latest.
        #[arg(long)]
        visit: Option<usize>,
    },
    /// Replace the note on a visit. An empty text clears it.
    Note {
        station: String,
        #[arg(long, default_value_t = 0)]
        visit: usize,
        text: String,
    },
    /// Merge an exported station list into the ledger.
    Import { file: PathBuf },
    /// Write a dated backup export.
    Export {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let store = Arc::new(LocalStore::new(&cli.data_path));
    let mut session = Session::open(store, StoreMode::Local).await?;

    match cli.command {
        Commands::Roll { count, from } => {
            let ids = session
                .roll(count, now_ms())
                .unwrap_or_default();
            if ids.is_empty() {
                println!("no unvisited stations left to roll");
                return Ok(());
            }
            let journeys = from
                .filter(|f| !f.trim().is_empty())
                .and_then(|f| {
                    JourneyClient::new(JourneyClient::DEFAULT_BASE_URL, Duration::from_secs(10))
                        .ok()
                        .map(|c| (c, f))
                });
            for id in ids {
                let station = session
                    .ledger()
                    .get(&id)
                    .context("rolled station disappeared from the ledger")?;
                let mut line = format!("• {}", station.label());
                if !station.lines.is_empty() {
                    line.push_str(&format!("  [{}]", station.lines.join(", ")));
                }
                if let Some((client, from)) = &journeys {
                    match client.journey_minutes(from, &station.name).await {
                        Some(minutes) => line.push_str(&format!("  ≈{minutes} min")),
                        None => line.push_str("  n/a"),
                    }
                }
                println!("{line}");
            }
        }
        Commands::Stats => {
            let ledger = session.ledger();
            println!(
                "visited {}/{} ({}%), {} photos",
                ledger.visited_count(),
                ledger.stations.len(),
                progress_percent(ledger),
                ledger.photo_count()
            );
            if let Some(date) = ledger.last_visit_date() {
                println!("last visit: {date}");
            }
            for (tag, cov) in mode_coverage(ledger) {
                println!("  {}: {}/{}", tag.name(), cov.visited, cov.total);
            }
            for (line, cov) in line_coverage(ledger) {
                println!("  line {line}: {}/{}", cov.visited, cov.total);
            }
        }
        Commands::Milestones => {
            for milestone in milestones(session.ledger()) {
                let mark = if milestone.achieved { "✓" } else { " " };
                match &milestone.achieved_on {
                    Some(date) => println!("[{mark}] {} ({date})", milestone.label),
                    None => println!("[{mark}] {}", milestone.label),
                }
            }
        }
        Commands::Visit {
            station,
            date,
            note,
        } => {
            let id = resolve_station(&session, &station)?;
            let date = match date {
                Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                    .context("visit date must be YYYY-MM-DD")?
                    .to_string(),
                None => Utc::now().date_naive().to_string(),
            };
            let visit = Visit {
                date: date.clone(),
                note: note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
                photos: Vec::new(),
            };
            session
                .apply_now(|ledger| ledger.add_visit(&id, visit))
                .await?;
            println!("recorded visit to {station} on {date}");
        }
        Commands::Unvisit { station } => {
            let id = resolve_station(&session, &station)?;
            session.apply_now(|ledger| ledger.clear_visits(&id)).await;
            println!("{station} is unvisited again");
        }
        Commands::Photo {
            station,
            file,
            visit,
        } => {
            let id = resolve_station(&session, &station)?;
            let recorded = session
                .ledger()
                .get(&id)
                .map(|s| s.visits.len())
                .unwrap_or(0);
            let visit_index = match visit {
                Some(index) => index,
                None if recorded == 0 => bail!("{station} has no visits yet"),
                None => recorded - 1,
            };
            let raw = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let embed = transcode(&raw, TranscodeOptions::default());
            println!(
                "embedding {} photo ({} bytes)",
                embed.format, embed.byte_len
            );
            session
                .apply_now(|ledger| ledger.attach_photos(&id, visit_index, vec![embed.data_uri]))
                .await?;
        }
        Commands::Note {
            station,
            visit,
            text,
        } => {
            let id = resolve_station(&session, &station)?;
            session
                .apply_now(|ledger| ledger.update_visit_note(&id, visit, &text))
                .await?;
            println!("note updated");
        }
        Commands::Import { file } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let merged = import_into(session.ledger(), &text)?;
            let station_count = merged.stations.len();
            session.apply_now(|ledger| *ledger = merged).await;
            println!("import merged; ledger now holds {station_count} stations");
        }
        Commands::Export { dir } => {
            let bundle = export_bundle(session.ledger(), "tourlog")?;
            let path = dir.join(&bundle.filename);
            tokio::fs::write(&path, &bundle.payload)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            println!("exported {}", path.display());
        }
    }

    Ok(())
}

fn resolve_station(session: &Session, name: &str) -> Result<String> {
    match session.ledger().find_by_name(name) {
        Some(station) => Ok(station.id.clone()),
        None => bail!("unknown station: {name}"),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
