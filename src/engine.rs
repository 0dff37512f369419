//! [`RendezvousEngine`]: the single long-lived task that turns proxy polls
//! into registry slots and races each one against its own timeout.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::{mpsc, oneshot};

use crate::metrics::MetricsSink;
use crate::registry::ProxyRegistry;
use crate::slot::{ClientOffer, NatType, ProxyType, SlotHandle};

/// Default proxy poll timeout.
pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(10);

/// A proxy's `/proxy` poll, decoded at the HTTP boundary and handed to the
/// engine to register.
pub struct ProxyPollRequest {
    pub id: String,
    pub proxy_type: ProxyType,
    pub nat_type: NatType,
    pub reply_tx: oneshot::Sender<PollOutcome>,
}

/// What a proxy poll eventually resolves to: a client's offer, or "no
/// client showed up before your poll timed out."
pub enum PollOutcome {
    Offer(ClientOffer),
    Idle,
}

/// A handle the HTTP layer uses to submit poll requests to the engine.
#[derive(Clone)]
pub struct EngineHandle {
    poll_tx: mpsc::Sender<ProxyPollRequest>,
}

impl EngineHandle {
    pub async fn submit(&self, req: ProxyPollRequest) -> Result<(), ProxyPollRequest> {
        self.poll_tx.send(req).await.map_err(|e| e.0)
    }
}

/// Spawns the engine task and returns a handle for submitting polls.
pub fn spawn(
    registry: Arc<ProxyRegistry>,
    metrics: MetricsSink,
    proxy_timeout: Duration,
) -> EngineHandle {
    let (poll_tx, poll_rx) = mpsc::channel(1024);
    tokio::spawn(run(registry, metrics, proxy_timeout, poll_rx));
    EngineHandle { poll_tx }
}

async fn run(
    registry: Arc<ProxyRegistry>,
    metrics: MetricsSink,
    proxy_timeout: Duration,
    mut poll_rx: mpsc::Receiver<ProxyPollRequest>,
) {
    while let Some(req) = poll_rx.recv().await {
        handle_poll(&registry, &metrics, proxy_timeout, req);
    }
    debug!("rendezvous engine stopped: poll channel closed");
}

/// 1. Create a fresh slot. 2. Insert it. 3. Spawn a waiter that resolves
/// the poll via exactly one of offer-arrival or proxy-timeout.
fn handle_poll(
    registry: &Arc<ProxyRegistry>,
    metrics: &MetricsSink,
    proxy_timeout: Duration,
    req: ProxyPollRequest,
) {
    let (offer_tx, offer_rx) = oneshot::channel::<ClientOffer>();
    let (answer_tx, answer_rx) = oneshot::channel::<Vec<u8>>();

    let slot = SlotHandle::new(
        req.id.clone(),
        req.proxy_type,
        req.nat_type,
        0,
        SlotHandle::next_sequence(),
    );
    slot.install_channels(offer_tx, answer_tx, answer_rx);
    registry.insert(slot);

    let registry = Arc::clone(registry);
    let metrics = metrics.clone();
    let id = req.id;
    let nat_type = req.nat_type;
    let reply_tx = req.reply_tx;

    tokio::spawn(async move {
        tokio::select! {
            offer = offer_rx => {
                // The offer branch wins a race against the timeout: once a
                // matcher has sent on `offer_rx`, `remove_if_heap_resident`
                // below can no longer observe this slot as heap-resident
                // (it was popped before the send), so the two branches can
                // never both fire for the same slot.
                if let Ok(offer) = offer {
                    metrics.proxy_poll_matched(nat_type);
                    let _ = reply_tx.send(PollOutcome::Offer(offer));
                }
                // `Err` means the sender was dropped without sending, which
                // only happens if the matcher that popped this slot itself
                // gave up before sending the offer; the matcher is
                // responsible for its own cleanup in that case, so the
                // engine does nothing further.
            }
            _ = tokio::time::sleep(proxy_timeout) => {
                if registry.remove_if_heap_resident(&id) {
                    metrics.proxy_poll_idle(nat_type);
                    let _ = reply_tx.send(PollOutcome::Idle);
                }
                // Otherwise the slot was already popped by a matcher, which
                // now owns its lifecycle; closing `reply_tx` here would
                // race a legitimate offer delivery, so we do nothing.
            }
        }
    });
}
