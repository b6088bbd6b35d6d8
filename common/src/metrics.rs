use std::sync::Once;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tracing::warn;

static METRICS_ONCE: Once = Once::new();
static PROMETHEUS_HANDLE: OnceCell<RwLock<Option<PrometheusHandle>>> = OnceCell::new();

/// Installs the process-wide prometheus recorder. Idempotent.
pub fn init_metrics_context() {
    METRICS_ONCE.call_once(|| match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            PROMETHEUS_HANDLE
                .get_or_init(|| RwLock::new(None))
                .write()
                .replace(handle);
        }
        Err(e) => warn!("failed to install prometheus recorder: {e:?}"),
    });
}

pub fn render() -> Option<String> {
    PROMETHEUS_HANDLE
        .get()
        .and_then(|h| h.read().as_ref().map(|h| h.render()))
}

pub mod labels {
    pub const AUTH_OUTCOME: &str = "engine_backend_auth_total";
    pub const POOL_HIT: &str = "engine_backend_pool_hit_total";
    pub const POOL_MISS: &str = "engine_backend_pool_miss_total";
    pub const SESCMD_COMPLETE: &str = "engine_backend_sescmd_complete_total";
    pub const RESULTSET_COMPLETE: &str = "engine_backend_resultset_complete_total";
}

pub fn record_auth_outcome(outcome: &'static str) {
    metrics::counter!(labels::AUTH_OUTCOME, "outcome" => outcome).increment(1);
}

pub fn record_pool_hit() {
    metrics::counter!(labels::POOL_HIT).increment(1);
}

pub fn record_pool_miss() {
    metrics::counter!(labels::POOL_MISS).increment(1);
}

pub fn record_sescmd_complete() {
    metrics::counter!(labels::SESCMD_COMPLETE).increment(1);
}

pub fn record_resultset_complete() {
    metrics::counter!(labels::RESULTSET_COMPLETE).increment(1);
}
