//! Run metrics for halo finding and catalog processing.
//!
//! Metrics go through the `metrics` facade and are dropped unless a recorder
//! is installed. The CLI installs the Prometheus recorder and renders the
//! exposition text once a short-lived run finishes.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn};

/// Install the Prometheus recorder for this process.
///
/// Returns `None` if a recorder is already installed.
pub fn init_metrics() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("Prometheus recorder installed");
            Some(handle)
        }
        Err(e) => {
            warn!("Prometheus recorder install failed (possibly already installed): {}", e);
            None
        }
    }
}

/// Metrics for the finding methods
pub struct FindingMetrics;

impl FindingMetrics {
    pub fn record_run(method: &str, duration_secs: f64) {
        ::metrics::counter!("halo_catalog_finder_runs_total", "method" => method.to_string())
            .increment(1);
        ::metrics::histogram!(
            "halo_catalog_finder_duration_seconds",
            "method" => method.to_string()
        )
        .record(duration_secs);
    }

    /// The finder ran but produced nothing usable
    pub fn record_no_catalog(method: &str) {
        ::metrics::counter!("halo_catalog_finder_empty_total", "method" => method.to_string())
            .increment(1);
    }

    pub fn record_halos_parsed(count: usize) {
        ::metrics::counter!("halo_catalog_halos_parsed_total").increment(count as u64);
    }
}

/// Metrics for catalog persistence
pub struct CatalogMetrics;

impl CatalogMetrics {
    pub fn record_catalog_saved(num_halos: usize, num_fields: usize) {
        ::metrics::counter!("halo_catalog_catalogs_saved_total").increment(1);
        ::metrics::histogram!("halo_catalog_catalog_halos").record(num_halos as f64);
        ::metrics::gauge!("halo_catalog_catalog_fields").set(num_fields as f64);
    }
}

/// Metrics for per-halo callbacks
pub struct CallbackMetrics;

impl CallbackMetrics {
    pub fn record_invocation(callback: &str) {
        ::metrics::counter!(
            "halo_catalog_callback_invocations_total",
            "callback" => callback.to_string()
        )
        .increment(1);
    }

    pub fn record_failure(callback: &str) {
        ::metrics::counter!(
            "halo_catalog_callback_failures_total",
            "callback" => callback.to_string()
        )
        .increment(1);
    }
}
