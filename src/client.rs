//! [`match_client_offer`]: per-client-offer logic.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;

use crate::error::{BrokerError, Result};
use crate::metrics::MetricsSink;
use crate::registry::ProxyRegistry;
use crate::slot::{ClientOffer, NatType};

/// Default client offer->answer timeout.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// A successful match: the answer bytes, plus the matched proxy's id (for
/// the caller's own logging/metrics, not required by the spec's wire
/// contract).
pub struct MatchResult {
    pub answer_sdp: Vec<u8>,
    pub matched_proxy_id: String,
}

/// Runs the full client-offer handshake: pick a compatible proxy, deliver
/// the offer, await the answer or time out. Always leaves the registry in
/// a consistent state on return (the slot's id is removed from the index
/// exactly once, regardless of which branch was taken).
pub async fn match_client_offer(
    registry: &Arc<ProxyRegistry>,
    metrics: &MetricsSink,
    offer: ClientOffer,
    client_timeout: Duration,
) -> Result<MatchResult> {
    let start = Instant::now();
    let client_nat = offer.nat_type;

    let Some(slot) = registry.pop_best(client_nat) else {
        metrics.client_poll_denied(client_nat);
        return Err(BrokerError::NoProxyAvailable);
    };
    let slot_id = slot.id().to_string();

    // Only the matcher ever takes these, and only once per slot.
    let offer_tx = slot
        .take_offer_tx()
        .expect("PopBest-ed slot must still have an offer sender");
    let answer_rx = slot
        .take_answer_rx()
        .expect("PopBest-ed slot must still have an answer receiver");

    // A popped slot (heap_index == sentinel) is no longer eligible for the
    // engine's timeout removal, so the only way this send can fail is if
    // the engine's waiter already took its timeout branch in the narrow
    // window between `pop_best` and here. Rust's `oneshot::Sender::send`
    // never blocks, so there is nothing to bound with a deadline: it
    // resolves immediately either way.
    if offer_tx.send(offer).is_err() {
        registry.finalize_popped(&slot_id);
        return Err(BrokerError::MatchTimeout);
    }

    match tokio::time::timeout(client_timeout, answer_rx).await {
        Ok(Ok(answer_sdp)) => {
            registry.finalize_popped(&slot_id);
            let roundtrip_ms = start.elapsed().as_millis() as i64;
            metrics.client_poll_matched(client_nat, roundtrip_ms);
            Ok(MatchResult {
                answer_sdp,
                matched_proxy_id: slot_id,
            })
        }
        Ok(Err(_)) => {
            // The answer sender was dropped without sending. Not expected
            // in steady-state operation; treated the same as a timeout.
            debug!("answer channel for {slot_id} closed without an answer");
            registry.finalize_popped(&slot_id);
            Err(BrokerError::MatchTimeout)
        }
        Err(_) => {
            registry.finalize_popped(&slot_id);
            Err(BrokerError::MatchTimeout)
        }
    }
}

/// Which heap a client's own NAT type should be matched from. Delegates to
/// the registry's compatibility rule so both directions of the rule live
/// in one place.
pub fn nat_heap_for_client(client_nat: NatType) -> crate::slot::HeapClass {
    crate::registry::compatible_heap_for_client(client_nat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine;
    use crate::slot::ProxyType;
    use std::time::Duration;

    #[tokio::test]
    async fn no_proxy_available_is_denied() {
        let registry = Arc::new(ProxyRegistry::new(MetricsSink::noop()));
        let metrics = MetricsSink::noop();
        let offer = ClientOffer {
            sdp: b"OFFER".to_vec(),
            nat_type: NatType::Restricted,
        };
        let result =
            match_client_offer(&registry, &metrics, offer, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(BrokerError::NoProxyAvailable)));
        assert_eq!(metrics.client_denied_count(), 1);
        assert_eq!(metrics.client_restricted_denied_count(), 1);
    }

    #[tokio::test]
    async fn client_times_out_without_an_answer() {
        let registry = Arc::new(ProxyRegistry::new(MetricsSink::noop()));
        let metrics = MetricsSink::noop();
        let handle = engine::spawn(
            Arc::clone(&registry),
            metrics.clone(),
            Duration::from_secs(10),
        );
        let (reply_tx, _reply_rx) = tokio::sync::oneshot::channel();
        handle
            .submit(engine::ProxyPollRequest {
                id: "p1".to_string(),
                proxy_type: ProxyType::Standalone,
                nat_type: NatType::Unrestricted,
                reply_tx,
            })
            .await
            .ok();
        // Give the engine a moment to insert the slot.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let offer = ClientOffer {
            sdp: b"OFFER".to_vec(),
            nat_type: NatType::Restricted,
        };
        let result =
            match_client_offer(&registry, &metrics, offer, Duration::from_millis(30)).await;
        assert!(matches!(result, Err(BrokerError::MatchTimeout)));
        assert!(registry.lookup("p1").is_none());
    }
}
