//! duel-stats: live plinko/keno bet stats for duel.com.
//!
//! `run` consumes captured network exchanges, relayed messages and display
//! controls as JSON lines on stdin, watches a page snapshot file for result markers, and
//! keeps the shared stats store up to date. `show` and `reset` operate on
//! the persisted stats directly.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use duel_live_stats::bootstrap::retry_until;
use duel_live_stats::config::{AppConfig, CONFIG_PATH, SettingsConfig};
use duel_live_stats::currency::FALLBACK_CURRENCY;
use duel_live_stats::dom::{Debouncer, DomObserver, added_markers};
use duel_live_stats::engine::{Engine, Outcome};
use duel_live_stats::game::GameKind;
use duel_live_stats::page::{PageSnapshot, PageView};
use duel_live_stats::persistence::{JsonFileStore, PersistenceBridge, purge_stale_temp_keys};
use duel_live_stats::presentation;
use duel_live_stats::reporter::{self, BetEvent};
use duel_live_stats::types::{Signal, UiPreferences};

#[derive(Parser)]
#[command(name = "duel-stats", about = "Live plinko/keno bet stats for duel.com")]
struct Cli {
    /// Path to the config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Track bets on a game page until interrupted
    Run {
        /// URL of the page being observed
        #[arg(long)]
        url: String,

        /// Page snapshot file, rewritten whenever the page changes
        #[arg(long)]
        page: PathBuf,

        /// Emit a render model after every change
        #[arg(long)]
        display: bool,
    },
    /// Print the persisted stats once
    Show {
        /// Hide the profit/wager series
        #[arg(long)]
        no_graph: bool,

        /// Hide the recent bets list
        #[arg(long)]
        no_recent: bool,

        /// Currency token used for formatting
        #[arg(long, default_value = FALLBACK_CURRENCY)]
        currency: String,
    },
    /// Zero all persisted stats
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config)?;
    info!("Using store at {}", config.store.path.display());

    let store = Arc::new(
        JsonFileStore::open(&config.store.path)
            .with_context(|| format!("failed to open {}", config.store.path.display()))?,
    );
    let bridge = PersistenceBridge::new(store);

    match cli.command {
        Command::Run { url, page, display } => {
            run(bridge, &config.settings, &url, &page, display).await
        }
        Command::Show {
            no_graph,
            no_recent,
            currency,
        } => {
            let stats = bridge.load();
            let prefs = UiPreferences {
                show_graph: !no_graph,
                show_recent_bets: !no_recent,
            };
            reporter::report_render_pretty(&presentation::render(&stats, &prefs, &currency));
            Ok(())
        }
        Command::Reset { yes } => {
            let confirmed = yes || confirm_reset()?;
            let mut engine = Engine::new(bridge, config.settings.dedup_capacity);
            if engine.reset(confirmed) {
                flush(&engine).await;
                info!("Stats reset");
            } else {
                info!("Reset cancelled");
            }
            Ok(())
        }
    }
}

fn confirm_reset() -> Result<bool> {
    eprint!("Are you sure you want to reset all stats? This action cannot be undone. [y/N] ");
    std::io::stderr().flush()?;
    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

/// Persist the current stats and wait for the write to land.
async fn flush(engine: &Engine<JsonFileStore>) {
    if let Some(handle) = engine.bridge().save(engine.stats()) {
        if let Err(e) = handle.await {
            warn!("Stats flush task failed: {e}");
        }
    }
}

fn report_outcome(engine: &Engine<JsonFileStore>, outcome: &Outcome) {
    match outcome {
        Outcome::Applied(bet) => {
            reporter::report_bet(&BetEvent {
                timestamp: Utc::now().to_rfc3339(),
                bet,
                total_bets: engine.stats().total_bets,
            });
            if engine.is_display_open() {
                reporter::report_render(&engine.render());
            }
        }
        Outcome::Duplicate(_) | Outcome::Rejected(_) => {}
    }
}

/// Wait for the page snapshot to appear and load it.
async fn bootstrap_page(path: &Path, settings: &SettingsConfig) -> Option<PageSnapshot> {
    let found = retry_until(
        settings.bootstrap_attempts,
        settings.bootstrap_interval(),
        || path.exists(),
    )
    .await;
    if !found {
        return None;
    }
    match PageSnapshot::load(path) {
        Ok(page) => Some(page),
        Err(e) => {
            warn!("Failed to load page snapshot: {e:#}");
            None
        }
    }
}

async fn run(
    bridge: PersistenceBridge<JsonFileStore>,
    settings: &SettingsConfig,
    url: &str,
    page_path: &Path,
    display: bool,
) -> Result<()> {
    let Some(game) = GameKind::from_url(url) else {
        bail!("{url} is not a duel.com plinko or keno page");
    };
    info!("Tracking {game:?} at {url}");

    let store = Arc::clone(bridge.store());
    let mut changes = bridge.subscribe();
    let mut engine = Engine::new(bridge, settings.dedup_capacity);
    if display {
        engine.open_display();
        reporter::report_render(&engine.render());
    }

    let observer = DomObserver::new(game.scope());
    let mut page = bootstrap_page(page_path, settings).await;
    let dom_active = page.is_some();
    if dom_active {
        info!("Page snapshot ready, watching {}", page_path.display());
    } else {
        warn!("Page snapshot unavailable; result markers will not be observed");
    }
    let mut debouncer = Debouncer::new(settings.debounce());

    let mut rescan_tick = tokio::time::interval_at(
        Instant::now() + observer.initial_delay(),
        settings.rescan_interval(),
    );
    let mut page_tick = tokio::time::interval(settings.page_poll_interval());
    let mut currency_tick = tokio::time::interval(settings.currency_poll_interval());
    let mut gc_tick = tokio::time::interval(settings.gc_interval());
    let mut store_tick = tokio::time::interval(settings.store_poll_interval());
    for tick in [
        &mut rescan_tick,
        &mut page_tick,
        &mut currency_tick,
        &mut gc_tick,
        &mut store_tick,
    ] {
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    }

    let max_age_ms = i64::try_from(settings.temp_max_age_secs * 1000).unwrap_or(i64::MAX);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    info!("Entering event loop. Press Ctrl+C to stop.");

    loop {
        let debounce_at = debouncer.deadline();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => handle_line(&mut engine, &line),
                    Ok(None) => {
                        info!("Signal feed closed");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!("Failed to read signal feed: {e}");
                        stdin_open = false;
                    }
                }
            }
            _ = page_tick.tick(), if dom_active => {
                match PageSnapshot::load(page_path) {
                    Ok(fresh) => {
                        if let Some(previous) = &page {
                            let added = added_markers(previous.result_markers(), fresh.result_markers());
                            if observer.batch_has_markers(&added) {
                                debouncer.arm(Instant::now());
                            }
                        }
                        page = Some(fresh);
                    }
                    Err(e) => debug!("Page snapshot not readable: {e:#}"),
                }
            }
            _ = tokio::time::sleep_until(debounce_at.unwrap_or_else(Instant::now)), if debounce_at.is_some() => {
                if debouncer.fire_if_due(Instant::now()) {
                    rescan(&mut engine, &observer, page.as_ref());
                }
            }
            _ = rescan_tick.tick(), if dom_active => {
                rescan(&mut engine, &observer, page.as_ref());
            }
            _ = currency_tick.tick(), if dom_active => {
                if let Some(current) = &page {
                    if engine.refresh_currency(current) {
                        info!("Currency now {}", engine.currency());
                        if engine.is_display_open() {
                            reporter::report_render(&engine.render());
                        }
                    }
                }
            }
            _ = gc_tick.tick() => {
                match purge_stale_temp_keys(store.as_ref(), Utc::now().timestamp_millis(), max_age_ms) {
                    Ok(0) => {}
                    Ok(n) => info!("Purged {n} stale temp key(s)"),
                    Err(e) => warn!("Temp key purge failed: {e}"),
                }
            }
            _ = store_tick.tick() => {
                if let Err(e) = store.poll_external() {
                    warn!("Store poll failed: {e}");
                }
            }
            change = changes.recv() => {
                match change {
                    Ok(change) => {
                        if engine.apply_external_change(&change) {
                            reporter::report_render(&engine.render());
                        }
                    }
                    Err(RecvError::Lagged(n)) => warn!("Missed {n} store change(s)"),
                    Err(RecvError::Closed) => {
                        warn!("Store change feed closed");
                        break;
                    }
                }
            }
        }
    }

    info!("Flushing stats ({} bets)", engine.stats().total_bets);
    flush(&engine).await;
    Ok(())
}

fn handle_line(engine: &mut Engine<JsonFileStore>, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let signal: Signal = match serde_json::from_str(line) {
        Ok(signal) => signal,
        Err(e) => {
            debug!("Ignoring malformed signal: {e}");
            return;
        }
    };
    let now = Utc::now();
    let outcome = match signal {
        Signal::Exchange(exchange) => engine.ingest_exchange(&exchange, now),
        Signal::Message(message) => engine.ingest_message(message, now),
        Signal::Control(control) => {
            debug!("Control: {control:?}");
            if engine.control(control) {
                reporter::report_render(&engine.render());
            }
            None
        }
    };
    if let Some(outcome) = outcome {
        report_outcome(engine, &outcome);
    }
}

fn rescan(engine: &mut Engine<JsonFileStore>, observer: &DomObserver, page: Option<&PageSnapshot>) {
    let Some(page) = page else {
        return;
    };
    for outcome in engine.rescan(observer, page, Utc::now()) {
        report_outcome(engine, &outcome);
    }
}
