//! The data model shared by the registry, engine, matcher and dispatcher:
//! [`ProxySlot`]/[`SlotHandle`], [`ClientOffer`], and the small enums that
//! tag them.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Sentinel `heap_index` value meaning "this slot is not currently in a heap."
pub const NOT_IN_HEAP: usize = usize::MAX;

/// A proxy's NAT classification, or a client's.
///
/// `Unknown` is treated conservatively as `Restricted` for matching
/// purposes (see [`crate::client::nat_heap_for_client`]), but is kept as
/// its own variant because it is reported separately in metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NatType {
    Restricted,
    Unrestricted,
    Unknown,
}

impl fmt::Display for NatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NatType::Restricted => "restricted",
            NatType::Unrestricted => "unrestricted",
            NatType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl FromStr for NatType {
    type Err = std::convert::Infallible;

    /// Unrecognized or empty strings map to `Unknown` rather than an
    /// error: the broker never rejects a request over an unknown NAT tag.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "restricted" => NatType::Restricted,
            "unrestricted" => NatType::Unrestricted,
            _ => NatType::Unknown,
        })
    }
}

/// Informational proxy category. Never affects matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    Badge,
    Webext,
    Standalone,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProxyType::Badge => "badge",
            ProxyType::Webext => "webext",
            ProxyType::Standalone => "standalone",
            ProxyType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl FromStr for ProxyType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "badge" => ProxyType::Badge,
            "webext" => ProxyType::Webext,
            "standalone" => ProxyType::Standalone,
            _ => ProxyType::Unknown,
        })
    }
}

/// Which heap a NAT type belongs to when a proxy is inserted. Restricted
/// proxies get their own heap; everything else (`unrestricted`, `unknown`)
/// shares the "unrestricted" heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapClass {
    Restricted,
    Unrestricted,
}

impl HeapClass {
    pub fn of_proxy_nat(nat: NatType) -> HeapClass {
        match nat {
            NatType::Restricted => HeapClass::Restricted,
            NatType::Unrestricted | NatType::Unknown => HeapClass::Unrestricted,
        }
    }
}

/// An SDP offer from a client, handed to the proxy that will answer it.
#[derive(Debug, Clone)]
pub struct ClientOffer {
    pub sdp: Vec<u8>,
    pub nat_type: NatType,
}

/// Fields that mutate after a slot is created: its heap position and its
/// two single-shot channel halves. Guarded by one `Mutex` per slot so that
/// the engine's waiter task, the client matcher, and the registry's heap
/// operations can each touch them without contending on the registry's
/// own lock for anything but structural heap/index changes.
struct SlotState {
    heap_index: usize,
    /// Taken by the client matcher after `PopBest`, to send the offer.
    offer_tx: Option<oneshot::Sender<ClientOffer>>,
    /// Taken by the answer dispatcher, to deliver the proxy's answer.
    answer_tx: Option<oneshot::Sender<Vec<u8>>>,
    /// Taken by the client matcher after `PopBest`, to await the answer.
    /// The engine keeps `offer_rx` local to its own waiter task instead of
    /// storing it here, since the engine is always the one selecting on it.
    answer_rx: Option<oneshot::Receiver<Vec<u8>>>,
}

/// One waiting proxy. Owned by the registry while heap-resident; owned by
/// the matching client handler between `PopBest` and removal from the id
/// index; then dropped.
///
/// Invariants:
/// - `id` is present in the registry's id index iff this slot is alive.
/// - A slot is in at most one heap.
/// - `heap_index` is [`NOT_IN_HEAP`] exactly when the slot is not in a heap.
/// - Each of the offer/answer channels is used at most once (enforced by
///   `oneshot`'s consume-on-send semantics plus `Option::take`).
pub struct ProxySlot {
    id: String,
    proxy_type: ProxyType,
    nat_type: NatType,
    /// Fixed at creation: proxies are never reinserted after a match, so
    /// this never needs to change for the lifetime of a given slot.
    client_count: u64,
    /// Monotonic insertion sequence, used only to break `client_count`
    /// ties deterministically (first-come wins). Also used as the cheap
    /// global ordering key so heap comparisons never need to lock.
    sequence: u64,
    state: Mutex<SlotState>,
}

/// Shared handle to a [`ProxySlot`]. Cloning is cheap (`Arc` bump); every
/// clone refers to the same slot.
#[derive(Clone)]
pub struct SlotHandle(Arc<ProxySlot>);

static SEQUENCE: AtomicUsize = AtomicUsize::new(0);

impl SlotHandle {
    pub fn new(
        id: String,
        proxy_type: ProxyType,
        nat_type: NatType,
        client_count: u64,
        sequence: u64,
    ) -> SlotHandle {
        SlotHandle(Arc::new(ProxySlot {
            id,
            proxy_type,
            nat_type,
            client_count,
            sequence,
            state: Mutex::new(SlotState {
                heap_index: NOT_IN_HEAP,
                offer_tx: None,
                answer_tx: None,
                answer_rx: None,
            }),
        }))
    }

    /// Allocate the next insertion sequence number, used as a tie-breaker.
    pub fn next_sequence() -> u64 {
        SEQUENCE.fetch_add(1, AtomicOrdering::Relaxed) as u64
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn proxy_type(&self) -> &ProxyType {
        &self.0.proxy_type
    }

    pub fn nat_type(&self) -> NatType {
        self.0.nat_type
    }

    pub fn heap_class(&self) -> HeapClass {
        HeapClass::of_proxy_nat(self.0.nat_type)
    }

    pub fn client_count(&self) -> u64 {
        self.0.client_count
    }

    /// `(client_count, sequence)`: total order used by [`crate::heap::IndexedHeap`].
    pub fn ordering_key(&self) -> (u64, u64) {
        (self.0.client_count, self.0.sequence)
    }

    pub fn heap_index(&self) -> usize {
        self.0.state.lock().unwrap().heap_index
    }

    pub fn set_heap_index(&self, idx: usize) {
        self.0.state.lock().unwrap().heap_index = idx;
    }

    pub fn is_heap_resident(&self) -> bool {
        self.heap_index() != NOT_IN_HEAP
    }

    /// Install the channel halves stored on the slot. Called once by the
    /// engine immediately after construction, before the slot is ever
    /// shared with the registry.
    pub fn install_channels(
        &self,
        offer_tx: oneshot::Sender<ClientOffer>,
        answer_tx: oneshot::Sender<Vec<u8>>,
        answer_rx: oneshot::Receiver<Vec<u8>>,
    ) {
        let mut state = self.0.state.lock().unwrap();
        state.offer_tx = Some(offer_tx);
        state.answer_tx = Some(answer_tx);
        state.answer_rx = Some(answer_rx);
    }

    /// Take the offer sender, if it hasn't already been taken. Only the
    /// client matcher calls this, and only once per slot.
    pub fn take_offer_tx(&self) -> Option<oneshot::Sender<ClientOffer>> {
        self.0.state.lock().unwrap().offer_tx.take()
    }

    /// Take the answer sender, if it hasn't already been taken. Only the
    /// answer dispatcher calls this, and only once per slot; a second
    /// caller (or a slot that was never matched) sees `None` and reports
    /// `success=false` without touching the channel.
    pub fn take_answer_tx(&self) -> Option<oneshot::Sender<Vec<u8>>> {
        self.0.state.lock().unwrap().answer_tx.take()
    }

    /// Take the answer receiver, if it hasn't already been taken. Only the
    /// client matcher calls this, immediately after popping the slot.
    pub fn take_answer_rx(&self) -> Option<oneshot::Receiver<Vec<u8>>> {
        self.0.state.lock().unwrap().answer_rx.take()
    }
}

impl fmt::Debug for SlotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotHandle")
            .field("id", &self.id())
            .field("proxy_type", &self.proxy_type())
            .field("nat_type", &self.nat_type())
            .field("client_count", &self.client_count())
            .finish()
    }
}
