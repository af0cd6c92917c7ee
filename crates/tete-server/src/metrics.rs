//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Fails if another global recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric name constants to avoid typos across modules.

/// Conversations created (counter).
pub const CONVERSATIONS_CREATED_TOTAL: &str = "conversations_created_total";
/// Conversations terminated (counter).
pub const CONVERSATIONS_TERMINATED_TOTAL: &str = "conversations_terminated_total";
/// Live conversations (gauge).
pub const CONVERSATIONS_ACTIVE: &str = "conversations_active";
/// Parties attached to a conversation (gauge).
pub const CONNECTIONS_ACTIVE: &str = "connections_active";
/// Messages stored (counter).
pub const MESSAGES_STORED_TOTAL: &str = "messages_stored_total";
/// Messages read and removed (counter).
pub const MESSAGES_READ_TOTAL: &str = "messages_read_total";
/// Relay operations rejected with an error status (counter, labels: code).
pub const RELAY_ERRORS_TOTAL: &str = "relay_errors_total";
