//! Logging setup for the simulator.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging
///
/// Library records go through the `log` bridge, so `RUST_LOG` filters both.
///
/// # Example
///
/// ```no_run
/// logging::init();
/// tracing::info!("Simulator starting");
/// ```
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stake_duel=info,sqlx=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Structured logging initialized");
}

/// Log the result of one simulated match
///
/// # Arguments
///
/// * `index` - Match number within the run
/// * `notice` - Result line shown to the first player
/// * `moves` - Moves played
/// * `elapsed_ms` - Wall time from queueing to close
pub fn log_match_result(index: usize, notice: &str, moves: usize, elapsed_ms: u128) {
    tracing::info!(
        match_index = index,
        moves = moves,
        elapsed_ms = elapsed_ms as u64,
        "SIM: match {} finished: {}",
        index,
        notice
    );
}
