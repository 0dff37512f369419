//! [`MetricsSink`]: the thin counter/gauge interface the broker updates
//! at each match/deny/timeout transition.
//!
//! Two things are emitted per signal: an update through the `metrics`
//! facade crate (consumed by `/prometheus` via a
//! `metrics_exporter_prometheus::PrometheusHandle`, the same pairing
//! `KumoCorp/kumomta` and `estuary-flow` use), and a local atomic counter
//! for the handful of named scalar counters (`clientDeniedCount` and
//! friends) so they can be read back synchronously by the `/debug`
//! endpoint and by tests without depending on a process-global metrics
//! recorder.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use metrics::{counter, gauge};

use crate::slot::{NatType, ProxyType};

#[derive(Default)]
struct Counters {
    client_denied_count: AtomicU64,
    client_restricted_denied_count: AtomicU64,
    client_unrestricted_denied_count: AtomicU64,
    client_proxy_match_count: AtomicU64,
    proxy_idle_count: AtomicU64,
    client_roundtrip_estimate_ms: AtomicI64,
}

/// Cheap to clone; every clone refers to the same counters.
#[derive(Clone)]
pub struct MetricsSink {
    counters: Arc<Counters>,
}

impl MetricsSink {
    pub fn new() -> MetricsSink {
        MetricsSink {
            counters: Arc::new(Counters::default()),
        }
    }

    /// A sink that still satisfies the interface but whose facade updates
    /// go nowhere in particular; used in unit tests for the registry.
    pub fn noop() -> MetricsSink {
        MetricsSink::new()
    }

    pub fn available_proxies_inc(&self, nat: NatType, proxy_type: &ProxyType) {
        gauge!("snowflake_available_proxies", "nat" => nat.to_string(), "type" => proxy_type.to_string())
            .increment(1.0);
    }

    pub fn available_proxies_dec(&self, nat: NatType, proxy_type: &ProxyType) {
        gauge!("snowflake_available_proxies", "nat" => nat.to_string(), "type" => proxy_type.to_string())
            .decrement(1.0);
    }

    pub fn proxy_poll_idle(&self, nat: NatType) {
        counter!("snowflake_proxy_poll_total", "nat" => nat.to_string(), "status" => "idle")
            .increment(1);
        self.counters.proxy_idle_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn proxy_poll_matched(&self, nat: NatType) {
        counter!("snowflake_proxy_poll_total", "nat" => nat.to_string(), "status" => "matched")
            .increment(1);
    }

    pub fn client_poll_denied(&self, client_nat: NatType) {
        counter!("snowflake_client_poll_total", "nat" => client_nat.to_string(), "status" => "denied")
            .increment(1);
        self.counters.client_denied_count.fetch_add(1, Ordering::Relaxed);
        // Classed by the client's own (treated) NAT type: `unknown` counts
        // as `restricted` here, same as the glossary's "treat unknown
        // conservatively as restricted" rule — not by which heap the pop
        // was attempted against.
        match client_nat {
            NatType::Restricted | NatType::Unknown => {
                self.counters
                    .client_restricted_denied_count
                    .fetch_add(1, Ordering::Relaxed);
            }
            NatType::Unrestricted => {
                self.counters
                    .client_unrestricted_denied_count
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn client_poll_matched(&self, client_nat: NatType, roundtrip_ms: i64) {
        counter!("snowflake_client_poll_total", "nat" => client_nat.to_string(), "status" => "matched")
            .increment(1);
        self.counters
            .client_proxy_match_count
            .fetch_add(1, Ordering::Relaxed);
        self.counters
            .client_roundtrip_estimate_ms
            .store(roundtrip_ms, Ordering::Relaxed);
        gauge!("snowflake_client_roundtrip_estimate_ms").set(roundtrip_ms as f64);
    }

    pub fn client_denied_count(&self) -> u64 {
        self.counters.client_denied_count.load(Ordering::Relaxed)
    }

    pub fn client_restricted_denied_count(&self) -> u64 {
        self.counters
            .client_restricted_denied_count
            .load(Ordering::Relaxed)
    }

    pub fn client_unrestricted_denied_count(&self) -> u64 {
        self.counters
            .client_unrestricted_denied_count
            .load(Ordering::Relaxed)
    }

    pub fn client_proxy_match_count(&self) -> u64 {
        self.counters
            .client_proxy_match_count
            .load(Ordering::Relaxed)
    }

    pub fn proxy_idle_count(&self) -> u64 {
        self.counters.proxy_idle_count.load(Ordering::Relaxed)
    }

    pub fn client_roundtrip_estimate_ms(&self) -> i64 {
        self.counters
            .client_roundtrip_estimate_ms
            .load(Ordering::Relaxed)
    }

    /// Render a text snapshot of the scalar counters, in the style of a
    /// periodic metrics-log dump served from `/metrics`.
    pub fn render_text(&self) -> String {
        format!(
            "client-denied-count {}\n\
             client-restricted-denied-count {}\n\
             client-unrestricted-denied-count {}\n\
             client-snowflake-match-count {}\n\
             proxy-idle-count {}\n\
             client-roundtrip-estimate-ms {}\n",
            self.client_denied_count(),
            self.client_restricted_denied_count(),
            self.client_unrestricted_denied_count(),
            self.client_proxy_match_count(),
            self.proxy_idle_count(),
            self.client_roundtrip_estimate_ms(),
        )
    }
}

impl Default for MetricsSink {
    fn default() -> Self {
        MetricsSink::new()
    }
}
