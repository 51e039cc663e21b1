//! Prometheus export for a simulation run.
//!
//! The engine records its own counters (`duel_*`); the simulator adds run
//! level ones so a dashboard can line both up.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
///
/// # Arguments
///
/// - `addr`: Address to bind the metrics server to (e.g., `0.0.0.0:9090`)
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

/// Record a finished simulated match
pub fn match_finished(game: &str, moves: usize, duration_ms: f64) {
    metrics::counter!("sim_matches_total", "game" => game.to_string()).increment(1);
    metrics::histogram!("sim_match_moves", "game" => game.to_string()).record(moves as f64);
    metrics::histogram!("sim_match_duration_ms", "game" => game.to_string()).record(duration_ms);
}

/// Record a bot quitting mid-match
pub fn bot_left() {
    metrics::counter!("sim_bot_leaves_total").increment(1);
}
