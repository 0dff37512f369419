//! [`BrokerContext`]: the broker's explicit, constructed-at-startup
//! dependencies — registry, engine handle, metrics, GeoIP — threaded
//! through the HTTP layer instead of reached for as ambient globals.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::engine::EngineHandle;
use crate::geoip::GeoIp;
use crate::metrics::MetricsSink;
use crate::registry::ProxyRegistry;

/// How often the `/metrics` log file is refreshed when `--metrics-log` is
/// configured. Matches the "periodic snapshot to a log file" behavior of
/// the original broker, which dumps its scalar counters on a fixed timer
/// rather than on every request.
const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(60);

pub struct BrokerContext {
    pub registry: Arc<ProxyRegistry>,
    pub engine: EngineHandle,
    pub metrics: MetricsSink,
    pub prometheus_handle: PrometheusHandle,
    pub geoip: GeoIp,
    pub client_timeout: Duration,
    pub metrics_log_path: Option<PathBuf>,
}

impl BrokerContext {
    pub fn new(
        prometheus_handle: PrometheusHandle,
        geoip: GeoIp,
        proxy_timeout: Duration,
        client_timeout: Duration,
        metrics_log_path: Option<PathBuf>,
    ) -> BrokerContext {
        let metrics = MetricsSink::new();
        let registry = Arc::new(ProxyRegistry::new(metrics.clone()));
        let engine = crate::engine::spawn(Arc::clone(&registry), metrics.clone(), proxy_timeout);
        if let Some(path) = &metrics_log_path {
            spawn_metrics_log_writer(metrics.clone(), path.clone());
        }
        BrokerContext {
            registry,
            engine,
            metrics,
            prometheus_handle,
            geoip,
            client_timeout,
            metrics_log_path,
        }
    }
}

/// Writes `metrics.render_text()` to `path` on a fixed tick, for as long as
/// the process runs. `/metrics` (`src/http.rs::handle_metrics_log`) just
/// serves whatever this last wrote; it never renders on the request path
/// itself.
fn spawn_metrics_log_writer(metrics: MetricsSink, path: PathBuf) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(METRICS_LOG_INTERVAL);
        loop {
            tick.tick().await;
            if let Err(e) = tokio::fs::write(&path, metrics.render_text()).await {
                warn!("failed to write metrics log {}: {e}", path.display());
            }
        }
    });
}
