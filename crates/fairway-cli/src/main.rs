//! Fairway CLI - Record golf rounds from the terminal
//!
//! Everything is written locally first; `fairway sync` (or the background
//! sync of the long-lived apps) reconciles with the remote service.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use fairway_core::api::{HttpRemoteApi, RemoteApi};
use fairway_core::models::{
    ClubType, EntityKind, FairwayStatus, GirStatus, HoleDraft, RoundPatch,
};
use fairway_core::sync::connectivity::{ApiProbe, ConnectivityMonitor};
use fairway_core::{Session, StoreService, SyncEngine, SyncSettings};
use std::sync::Arc;
use thiserror::Error;

const DEFAULT_API_URL: &str = "https://api.fairway.app";

#[derive(Parser)]
#[command(name = "fairway")]
#[command(about = "Track golf rounds offline and sync when you can")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to local database file
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new round
    Start {
        /// Course name
        course: String,
        /// Date played (defaults to today)
        #[arg(long, value_name = "YYYY-MM-DD")]
        date: Option<String>,
    },
    /// Record a hole in a round
    Hole {
        /// Round id
        round: i64,
        /// Hole number
        number: i64,
        #[arg(long)]
        par: i64,
        #[arg(long)]
        score: i64,
        #[arg(long, default_value = "2")]
        putts: i64,
        #[arg(long, value_enum, default_value_t = FairwayArg::Na)]
        fairway: FairwayArg,
        #[arg(long, value_enum, default_value_t = GirArg::Missed)]
        gir: GirArg,
        /// Approach proximity in metres
        #[arg(long)]
        proximity: Option<f64>,
        /// Clubs used (ids, repeatable)
        #[arg(long = "club", value_name = "ID")]
        clubs: Vec<i64>,
    },
    /// Finish a round
    Finish {
        /// Round id
        round: i64,
    },
    /// Delete a round
    Delete {
        /// Round id
        round: i64,
    },
    /// List rounds
    Rounds {
        /// Only rounds still being played
        #[arg(long, conflicts_with = "past")]
        active: bool,
        /// Only finished rounds
        #[arg(long)]
        past: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage clubs in the bag
    #[command(subcommand)]
    Club(ClubCommands),
    /// Sync with the remote service
    Sync {
        /// Pull canonical server state only
        #[arg(long)]
        down: bool,
        /// Push one entity immediately (round id)
        #[arg(long, value_name = "ID")]
        round: Option<i64>,
    },
    /// Show sync status
    Status,
    /// Retry failed sync items
    Retry,
    /// Stay running, syncing periodically and whenever connectivity returns
    Watch,
}

#[derive(Subcommand)]
enum ClubCommands {
    /// Add a club
    Add {
        /// Club name, e.g. "7 Iron"
        name: String,
        #[arg(long = "type", value_enum)]
        club_type: ClubTypeArg,
        /// Loft in degrees
        #[arg(long)]
        loft: Option<f64>,
    },
    /// List clubs
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a club
    Delete {
        /// Club id
        id: i64,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum FairwayArg {
    Hit,
    Left,
    Right,
    Na,
}

impl From<FairwayArg> for FairwayStatus {
    fn from(value: FairwayArg) -> Self {
        match value {
            FairwayArg::Hit => Self::Hit,
            FairwayArg::Left => Self::MissedLeft,
            FairwayArg::Right => Self::MissedRight,
            FairwayArg::Na => Self::NotApplicable,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum GirArg {
    Hit,
    Missed,
}

impl From<GirArg> for GirStatus {
    fn from(value: GirArg) -> Self {
        match value {
            GirArg::Hit => Self::Hit,
            GirArg::Missed => Self::Missed,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum ClubTypeArg {
    Driver,
    Wood,
    Hybrid,
    Iron,
    Wedge,
    Putter,
}

impl From<ClubTypeArg> for ClubType {
    fn from(value: ClubTypeArg) -> Self {
        match value {
            ClubTypeArg::Driver => Self::Driver,
            ClubTypeArg::Wood => Self::Wood,
            ClubTypeArg::Hybrid => Self::Hybrid,
            ClubTypeArg::Iron => Self::Iron,
            ClubTypeArg::Wedge => Self::Wedge,
            ClubTypeArg::Putter => Self::Putter,
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] fairway_core::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Round not found: {0}")]
    RoundNotFound(i64),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fairway=info".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let store = StoreService::open_path(&db_path).await?;

    match cli.command {
        Commands::Start { course, date } => run_start(&store, &course, date).await?,
        Commands::Hole {
            round,
            number,
            par,
            score,
            putts,
            fairway,
            gir,
            proximity,
            clubs,
        } => {
            let draft = HoleDraft {
                hole_number: number,
                par,
                score,
                putts,
                fairway_status: fairway.into(),
                gir_status: gir.into(),
                proximity_to_hole: proximity,
                club_ids: clubs,
            };
            run_hole(&store, round, draft).await?;
        }
        Commands::Finish { round } => run_finish(&store, round).await?,
        Commands::Delete { round } => {
            store.delete_round(round).await?;
            println!("Deleted round {round}");
        }
        Commands::Rounds { active, past, json } => run_rounds(&store, active, past, json).await?,
        Commands::Club(command) => run_club(&store, command).await?,
        Commands::Sync { down, round } => run_sync(&store, down, round).await?,
        Commands::Status => run_status(&store).await?,
        Commands::Retry => run_retry(&store).await?,
        Commands::Watch => run_watch(&store).await?,
    }

    Ok(())
}

async fn run_start(store: &StoreService, course: &str, date: Option<String>) -> Result<(), CliError> {
    let date = date.unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string());
    let round = store.start_round(course, &date).await?;
    println!("Started round {} at {} ({})", round.id, round.course_name, round.date);
    Ok(())
}

async fn run_hole(store: &StoreService, round_id: i64, draft: HoleDraft) -> Result<(), CliError> {
    let hole = store.record_hole(round_id, draft).await?;
    let round = store
        .get_round(round_id)
        .await?
        .ok_or(CliError::RoundNotFound(round_id))?;
    println!(
        "Hole {}: par {} score {} (total {})",
        hole.hole_number, hole.par, hole.score, round.total_score
    );
    Ok(())
}

async fn run_finish(store: &StoreService, round_id: i64) -> Result<(), CliError> {
    let patch = RoundPatch {
        ended_at: Some(chrono::Utc::now().timestamp_millis()),
        ..RoundPatch::default()
    };
    let round = store.update_round(round_id, patch).await?;
    println!(
        "Finished round at {}: total {}",
        round.course_name, round.total_score
    );
    Ok(())
}

async fn run_rounds(
    store: &StoreService,
    active: bool,
    past: bool,
    json: bool,
) -> Result<(), CliError> {
    let rounds = if active {
        store.active_rounds().await?
    } else if past {
        store.past_rounds().await?
    } else {
        store.list_rounds().await?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&rounds)?);
        return Ok(());
    }
    if rounds.is_empty() {
        println!("No rounds recorded");
        return Ok(());
    }
    for round in rounds {
        let state = if round.ended_at.is_some() {
            "finished"
        } else {
            "active"
        };
        println!(
            "{:>6}  {}  {}  total {:>3}  [{}] {}",
            round.id, round.date, round.course_name, round.total_score, state, round.sync_status
        );
    }
    Ok(())
}

async fn run_club(store: &StoreService, command: ClubCommands) -> Result<(), CliError> {
    match command {
        ClubCommands::Add {
            name,
            club_type,
            loft,
        } => {
            let club = store.add_club(&name, club_type.into(), loft).await?;
            println!("Added {} ({}) as {}", club.name, club.club_type, club.id);
        }
        ClubCommands::List { json } => {
            let clubs = store.list_clubs().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&clubs)?);
            } else if clubs.is_empty() {
                println!("The bag is empty");
            } else {
                for club in clubs {
                    let loft = club
                        .loft
                        .map_or_else(String::new, |loft| format!(" {loft:.1}°"));
                    println!(
                        "{:>6}  {} ({}{})  {}",
                        club.id, club.name, club.club_type, loft, club.sync_status
                    );
                }
            }
        }
        ClubCommands::Delete { id } => {
            store.delete_club(id).await?;
            println!("Removed club {id}");
        }
    }
    Ok(())
}

async fn run_sync(store: &StoreService, down: bool, round: Option<i64>) -> Result<(), CliError> {
    let engine = build_engine(store.clone())?;

    if down {
        let pulled = engine.sync_down().await?;
        println!("Pulled {pulled} records");
        return Ok(());
    }

    if let Some(round_id) = round {
        let outcome = engine.sync_entity(EntityKind::Round, round_id).await?;
        println!("Round {round_id}: {outcome:?}");
        return Ok(());
    }

    let summary = engine.run_cycle().await?;
    if summary.offline {
        println!("Offline; changes remain queued");
    } else {
        println!(
            "Synced: pulled {}, pushed {}, failed {}",
            summary.pulled, summary.pushed, summary.failed
        );
    }
    Ok(())
}

async fn run_status(store: &StoreService) -> Result<(), CliError> {
    let pending = store.pending_count().await?;
    let failed = store.failed_count().await?;

    if pending == 0 && failed == 0 {
        println!("Everything is synced");
    } else {
        println!("{pending} pending, {failed} failed");
    }
    for task in store.queue_items().await? {
        if let Some(error) = task.last_error {
            println!(
                "  {} {} ({}): {}",
                task.entity_kind, task.entity_id, task.state, error
            );
        }
    }
    Ok(())
}

async fn run_retry(store: &StoreService) -> Result<(), CliError> {
    let reset = store.retry_failed().await?;
    if reset == 0 {
        println!("Nothing to retry");
        return Ok(());
    }
    let engine = build_engine(store.clone())?;
    let summary = engine.run_cycle().await?;
    println!(
        "Retried {reset}: pushed {}, failed {}",
        summary.pushed, summary.failed
    );
    Ok(())
}

async fn run_watch(store: &StoreService) -> Result<(), CliError> {
    let (engine, remote, settings) = build_sync(store.clone())?;

    let probe = Arc::new(ApiProbe::new(Arc::clone(&remote)));
    let monitor = Arc::new(ConnectivityMonitor::new(
        probe,
        settings.poll_interval,
        settings.debounce,
    ));

    let mut status_rx = engine.status().subscribe();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let snapshot = *status_rx.borrow();
            if snapshot.offline {
                println!("offline; {} pending", snapshot.pending);
            } else if snapshot.syncing {
                println!("syncing...");
            } else if !snapshot.is_clear() {
                println!("{} pending, {} failed", snapshot.pending, snapshot.failed);
            }
        }
    });

    let poller = Arc::clone(&monitor);
    tokio::spawn(async move { poller.run().await });

    println!("Watching for changes; ctrl-c to stop");
    engine.run_background(monitor).await;
    Ok(())
}

fn build_engine(store: StoreService) -> Result<Arc<SyncEngine>, CliError> {
    let (engine, _, _) = build_sync(store)?;
    Ok(engine)
}

fn build_sync(
    store: StoreService,
) -> Result<(Arc<SyncEngine>, Arc<dyn RemoteApi>, SyncSettings), CliError> {
    let base_url =
        std::env::var("FAIRWAY_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
    let settings = SyncSettings::new(base_url.clone());
    settings.validate()?;

    let mut remote = HttpRemoteApi::new(base_url, settings.request_timeout)?;
    if let Ok(token) = std::env::var("FAIRWAY_AUTH_TOKEN") {
        remote = remote.with_auth_token(token);
    }
    let remote: Arc<dyn RemoteApi> = Arc::new(remote);

    // Attach the session opportunistically; offline is fine.
    let session_store = store.clone();
    let session_remote = Arc::clone(&remote);
    tokio::spawn(async move {
        if let Err(error) = Session::init(&session_store, session_remote.as_ref()).await {
            tracing::debug!("session init failed: {error}");
        }
    });

    Ok((
        SyncEngine::new(store, Arc::clone(&remote), settings.clone()),
        remote,
        settings,
    ))
}

fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_db_path {
        return path;
    }
    if let Ok(path) = std::env::var("FAIRWAY_DB_PATH") {
        return PathBuf::from(path);
    }
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("fairway")
        .join("fairway.db")
}
