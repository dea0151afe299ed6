//! Watches the shared log and runs the commands appended to it.
//!
//! Configuration comes from `TRINITY_*` environment variables; diagnostics go
//! to stderr, filtered by `RUST_LOG`.

mod signals;

use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use trinity_bus::{new_cancel_signal, BusConfig, DispatchStats, LogStore};

fn main() -> Result<()> {
    init_tracing()?;

    let config = BusConfig::from_env().context("invalid watcher configuration")?;
    info!(config = ?config, "loaded configuration");

    let store = Arc::new(
        LogStore::open_or_create(&config.log_path)
            .with_context(|| format!("cannot open log {}", config.log_path.display()))?,
    );
    let cancel = new_cancel_signal();
    let _signals = signals::install(cancel.clone()).context("failed to install signal handlers")?;

    let dispatchers = config.build_dispatchers(&store, &cancel)?;
    let mut workers = Vec::with_capacity(dispatchers.len());
    for mut dispatcher in dispatchers {
        let name = format!("watch-{}", dispatcher.label().to_lowercase());
        let stop_all = cancel.clone();
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let outcome = dispatcher.run();
                if outcome.is_err() {
                    trinity_bus::cancel(&stop_all);
                }
                outcome
            })
            .with_context(|| format!("failed to spawn {name}"))?;
        workers.push((name, worker));
    }

    let mut failures = Vec::new();
    for (name, worker) in workers {
        match worker.join() {
            Ok(Ok(stats)) => log_summary(&name, &stats),
            Ok(Err(err)) => {
                error!(worker = %name, error = %err, "watcher failed");
                failures.push(format!("{name}: {err}"));
            }
            Err(_) => {
                error!(worker = %name, "watcher thread panicked");
                failures.push(format!("{name}: panicked"));
                trinity_bus::cancel(&cancel);
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("watchers stopped with errors: {}", failures.join("; ")))
    }
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("parse RUST_LOG")?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("install tracing subscriber")?;
    Ok(())
}

fn log_summary(name: &str, stats: &DispatchStats) {
    info!(
        worker = %name,
        succeeded = stats.succeeded,
        failed = stats.failed,
        blocked = stats.blocked,
        duplicates = stats.duplicates,
        malformed = stats.malformed,
        source_errors = stats.source_errors,
        "watcher finished"
    );
}
