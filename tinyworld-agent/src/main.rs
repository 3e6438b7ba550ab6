//! `tinyworld`: run one character on a wall-clock timer.
//!
//! Usage: `tinyworld [path/to/tinyworld.toml]`. Without a file the
//! built-in defaults are used. `RUST_LOG` overrides `general.log_level`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use tinyworld_agent::runtime::{backend_from_config, workflow_from_config};
use tinyworld_agent::{BroadcastPublisher, CycleScheduler, LogPublisher, SchedulerSettings, StatePublisher};
use tinyworld_core::config::{GeneralConfig, TinyWorldConfig};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

fn init_tracing(general: &GeneralConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&general.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if general.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("tinyworld.toml"), PathBuf::from);
    let config = if path.exists() {
        TinyWorldConfig::from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?
    } else {
        TinyWorldConfig::default()
    };
    init_tracing(&config.general);
    info!(config = %path.display(), character = %config.character.name, "tinyworld starting");

    let backend = backend_from_config(&config).context("opening memory backend")?;
    let workflow = workflow_from_config(&config, backend).context("building workflow")?;

    let broadcast = BroadcastPublisher::new(config.scheduler.broadcast_capacity);
    let mut updates = broadcast.subscribe();
    let publisher: Arc<dyn StatePublisher> = Arc::new(broadcast);
    let scheduler = Arc::new(CycleScheduler::new(
        SchedulerSettings::from(&config.scheduler),
        publisher,
    ));
    scheduler.register(workflow)?;

    let logger = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(event) => LogPublisher.publish(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "update log lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler failed; stopping");
        }
    };
    Arc::clone(&scheduler).run_timer(shutdown).await;

    let status = scheduler.status();
    for character in &status.characters {
        info!(character = %character.id, cycles = character.cycle_count, "final state");
    }
    drop(scheduler);
    logger.abort();
    info!("tinyworld stopped");
    Ok(())
}
