//! [`dispatch_answer`]: routes a proxy's answer to its waiting client by
//! snowflake id.

use std::sync::Arc;

use crate::registry::ProxyRegistry;

/// Looks up the slot by id and, if it still has an un-consumed answer
/// sender, delivers `answer_sdp` to it. Returns whether a waiter was
/// actually reachable; this is exactly the `success` field of the answer
/// response — it does not mean the client actually received the bytes
/// before its own timeout, only that the slot was known and had not
/// already been answered.
pub fn dispatch_answer(registry: &Arc<ProxyRegistry>, id: &str, answer_sdp: Vec<u8>) -> bool {
    let Some(slot) = registry.lookup(id) else {
        return false;
    };
    let Some(answer_tx) = slot.take_answer_tx() else {
        return false;
    };
    // If the matcher already moved to its client-timeout branch, the
    // answer receiver was dropped and this `send` fails immediately
    // (oneshot sends never block, so there's nothing to bound with a
    // deadline). Either way the proxy already got `success=true` by the
    // time we'd know that, so the failure is discarded silently.
    let _ = answer_tx.send(answer_sdp);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSink;
    use crate::slot::{NatType, ProxyType, SlotHandle};

    #[test]
    fn unknown_id_reports_failure() {
        let registry = Arc::new(ProxyRegistry::new(MetricsSink::noop()));
        assert!(!dispatch_answer(&registry, "ghost", b"ANSWER".to_vec()));
    }

    #[test]
    fn answering_twice_reports_failure_the_second_time() {
        let registry = Arc::new(ProxyRegistry::new(MetricsSink::noop()));
        let slot = SlotHandle::new(
            "p1".to_string(),
            ProxyType::Standalone,
            NatType::Unrestricted,
            0,
            SlotHandle::next_sequence(),
        );
        let (offer_tx, _offer_rx) = tokio::sync::oneshot::channel();
        let (answer_tx, answer_rx) = tokio::sync::oneshot::channel();
        slot.install_channels(offer_tx, answer_tx, answer_rx);
        registry.insert(slot);

        assert!(dispatch_answer(&registry, "p1", b"ANSWER-1".to_vec()));
        assert!(!dispatch_answer(&registry, "p1", b"ANSWER-2".to_vec()));
    }
}
