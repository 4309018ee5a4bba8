//! Hemisphere session simulator
//!
//! Plays through a practice session against a flaky simulated endpoint:
//! - Rehydrates the outbox from a file-backed store
//! - Answers every queued item, optionally with a connectivity drop
//! - Waits for the outbox to drain and reports the outcome
//!
//! Usage:
//!   hemisphere-sim --items 20 --failure-rate 0.4 --state-dir .hemisphere

mod flaky;

use anyhow::Context;
use clap::Parser;
use flaky::FlakyTransport;
use hemisphere::clock::SystemClock;
use hemisphere::outbox::Outbox;
use hemisphere::response::{Modality, ResponseSubmission};
use hemisphere::stage::{StageDriver, StageReducer, TransitionResult};
use hemisphere::storage::FileStore;
use hemisphere::{RuntimeConfig, SessionRuntime};
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Simulator CLI arguments
#[derive(Parser, Debug)]
#[command(name = "hemisphere-sim")]
#[command(about = "Hemisphere session simulator - soak test for the response outbox")]
struct Args {
    /// Path to runtime configuration file (TOML format)
    #[arg(long, env = "HEMISPHERE_CONFIG_PATH")]
    config_path: Option<PathBuf>,

    /// Directory holding the persisted outbox
    #[arg(long, env = "HEMISPHERE_STATE_DIR", default_value = ".hemisphere")]
    state_dir: PathBuf,

    /// Number of items to answer
    #[arg(long, env = "HEMISPHERE_ITEMS", default_value_t = 10)]
    items: usize,

    /// Share of submissions the simulated endpoint drops (0.0 - 1.0)
    #[arg(long, env = "HEMISPHERE_FAILURE_RATE", default_value_t = 0.3)]
    failure_rate: f64,

    /// Simulated endpoint latency in milliseconds
    #[arg(long, env = "HEMISPHERE_LATENCY_MS", default_value_t = 50)]
    latency_ms: u64,

    /// Think time between answers in milliseconds
    #[arg(long, default_value_t = 200)]
    answer_interval_ms: u64,

    /// Share of answers that are graded correct
    #[arg(long, default_value_t = 0.7)]
    correct_rate: f64,

    /// Go offline after this many answers
    #[arg(long)]
    offline_after: Option<usize>,

    /// Number of answers given while offline
    #[arg(long, default_value_t = 3)]
    offline_for: usize,

    /// How long to wait for the outbox to drain, in seconds
    #[arg(long, env = "HEMISPHERE_DRAIN_TIMEOUT_SECS", default_value_t = 30)]
    drain_timeout_secs: u64,

    /// Revive dead letters after the first drain and try them once more
    #[arg(long, default_value = "false")]
    revive_dead_letters: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimPhase {
    Practice,
    Complete,
}

enum SimEvent {
    Finish,
}

/// Practice -> Complete once every item has been answered.
struct SimStage;

impl StageReducer for SimStage {
    type State = SimPhase;
    type Event = SimEvent;
    type Config = ();
    type Guards = bool;

    fn apply_event(
        &self,
        state: &SimPhase,
        event: &SimEvent,
        _config: &(),
        queue_done: &bool,
    ) -> TransitionResult<SimPhase> {
        match (state, event) {
            (SimPhase::Practice, SimEvent::Finish) if *queue_done => {
                TransitionResult::Transitioned {
                    state: SimPhase::Complete,
                }
            }
            (SimPhase::Practice, SimEvent::Finish) => TransitionResult::Rejected {
                reason: "items still queued".to_string(),
            },
            (SimPhase::Complete, SimEvent::Finish) => TransitionResult::Rejected {
                reason: "session already complete".to_string(),
            },
        }
    }
}

/// Wait until nothing is pending. Returns false on timeout.
async fn wait_for_drain(outbox: &Outbox, timeout: Duration) -> bool {
    let mut stats = outbox.subscribe();
    let drained = matches!(
        tokio::time::timeout(timeout, stats.wait_for(|s| s.pending == 0)).await,
        Ok(Ok(_))
    );
    drained
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_ansi(false)
        .init();

    let args = Args::parse();

    let config = match &args.config_path {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    config.validate()?;

    info!("Hemisphere simulator starting...");
    info!("State directory: {}", args.state_dir.display());
    info!(
        "Items: {}, failure rate: {:.2}, latency: {} ms",
        args.items, args.failure_rate, args.latency_ms
    );

    let store = Arc::new(
        FileStore::new(&args.state_dir)
            .with_context(|| format!("opening state dir {}", args.state_dir.display()))?,
    );
    let outbox = Outbox::builder(&config.outbox, store).build();
    let restored = outbox.rehydrate();
    if restored > 0 {
        info!("Restored {} entries from a previous run", restored);
    }

    let transport = Arc::new(FlakyTransport::new(
        args.failure_rate,
        Duration::from_millis(args.latency_ms),
    ));
    outbox.configure(transport.clone());

    let mut runtime = SessionRuntime::new(
        &config,
        Arc::new(SystemClock),
        StageDriver::new(SimStage, SimPhase::Practice, (), false),
        outbox.clone(),
    );
    runtime.start_stage(
        (1..=args.items).map(|i| format!("item-{:03}", i)),
        "practice",
    );

    let mut answered = 0usize;
    while !runtime.queue_progress().exhausted && runtime.begin_current().is_some() {
        if args.offline_after == Some(answered) {
            warn!("Simulating connectivity loss");
            outbox.set_online(false);
        }
        if args.offline_after.map(|n| n + args.offline_for) == Some(answered) {
            info!("Connectivity restored");
            outbox.set_online(true);
        }

        tokio::time::sleep(Duration::from_millis(args.answer_interval_ms)).await;
        let correct = rand::thread_rng().gen_bool(args.correct_rate.clamp(0.0, 1.0));
        let choice = if correct { "A" } else { "B" };
        let submission = ResponseSubmission::new(Modality::Tap)
            .with_value(serde_json::json!({ "choice": choice }))
            .graded(correct);
        if runtime.submit_current(submission).is_some() {
            answered += 1;
        }
    }
    outbox.set_online(true);

    *runtime.stage_mut().guards_mut() = true;
    runtime.send_event(&SimEvent::Finish)?;
    info!("Answered {} items; waiting for delivery", answered);

    let drain_timeout = Duration::from_secs(args.drain_timeout_secs);
    if !wait_for_drain(&outbox, drain_timeout).await {
        warn!(
            "Outbox did not drain within {:?}; {} entries stay queued for the next run",
            drain_timeout,
            outbox.pending_count()
        );
    }

    if args.revive_dead_letters && outbox.has_dead_letters() {
        for dead in outbox.dead_letters() {
            if let Err(e) = outbox.revive_dead_letter(dead.client_id()) {
                warn!("{}", e);
            }
        }
        info!("Revived dead letters; waiting for a second drain");
        wait_for_drain(&outbox, drain_timeout).await;
    }

    let stats = outbox.stats();
    info!("Session summary:");
    info!("  answered:      {}", answered);
    match runtime.accuracy() {
        Some(accuracy) => info!("  accuracy:      {:.1}%", accuracy * 100.0),
        None => info!("  accuracy:      n/a"),
    }
    info!("  delivered:     {}", stats.confirmed);
    info!("  still pending: {}", stats.pending);
    info!("  dead letters:  {}", stats.dead_letters);
    info!(
        "  endpoint:      {} accepted, {} dropped",
        transport.accepted(),
        transport.dropped()
    );

    runtime.end_session();
    Ok(())
}
