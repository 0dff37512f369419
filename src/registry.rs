//! [`ProxyRegistry`]: two priority heaps (unrestricted / restricted NAT)
//! plus an id index, all behind one lock.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::heap::IndexedHeap;
use crate::metrics::MetricsSink;
use crate::slot::{HeapClass, NatType, ProxyType, SlotHandle};

struct RegistryInner {
    unrestricted: IndexedHeap,
    restricted: IndexedHeap,
    id_index: HashMap<String, SlotHandle>,
}

/// Counts by NAT class and proxy type, used only by the `/debug` HTTP
/// surface. A point-in-time read under the registry lock.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub total: usize,
    pub by_proxy_type: HashMap<ProxyType, usize>,
    pub by_nat_type: HashMap<NatType, usize>,
}

pub struct ProxyRegistry {
    inner: Mutex<RegistryInner>,
    metrics: MetricsSink,
}

impl ProxyRegistry {
    pub fn new(metrics: MetricsSink) -> ProxyRegistry {
        ProxyRegistry {
            inner: Mutex::new(RegistryInner {
                unrestricted: IndexedHeap::new(),
                restricted: IndexedHeap::new(),
                id_index: HashMap::new(),
            }),
            metrics,
        }
    }

    /// Insert a freshly created slot into the heap matching its NAT type
    /// and into the id index. Bumps the available-proxies gauge.
    pub fn insert(&self, slot: SlotHandle) {
        let class = slot.heap_class();
        let nat = slot.nat_type();
        let proxy_type = slot.proxy_type().clone();
        let mut inner = self.inner.lock().unwrap();
        inner.id_index.insert(slot.id().to_string(), slot.clone());
        match class {
            HeapClass::Restricted => inner.restricted.push(slot),
            HeapClass::Unrestricted => inner.unrestricted.push(slot),
        }
        drop(inner);
        self.metrics.available_proxies_inc(nat, &proxy_type);
    }

    /// Pop the least-`client_count` slot from the heap selected by
    /// `client_nat` under the NAT-compatibility rule. The slot remains
    /// in the id index; its `heap_index` becomes the
    /// sentinel. Caller owns the returned slot from this point.
    pub fn pop_best(&self, client_nat: NatType) -> Option<SlotHandle> {
        let class = compatible_heap_for_client(client_nat);
        let mut inner = self.inner.lock().unwrap();
        match class {
            HeapClass::Restricted => inner.restricted.pop_min(),
            HeapClass::Unrestricted => inner.unrestricted.pop_min(),
        }
    }

    /// Remove a slot by id, but only if it is still heap-resident. No-op
    /// (returns `false`) if the slot has already been popped by a matcher
    /// or was never present — the caller (the engine's timeout branch)
    /// must not close the offer channel in that case.
    pub fn remove_if_heap_resident(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(slot) = inner.id_index.get(id).cloned() else {
            return false;
        };
        let idx = slot.heap_index();
        if idx == crate::slot::NOT_IN_HEAP {
            return false;
        }
        let class = slot.heap_class();
        let removed = match class {
            HeapClass::Restricted => inner.restricted.remove_at(idx),
            HeapClass::Unrestricted => inner.unrestricted.remove_at(idx),
        };
        if let Some(removed) = removed {
            inner.id_index.remove(removed.id());
            drop(inner);
            self.metrics
                .available_proxies_dec(removed.nat_type(), removed.proxy_type());
            true
        } else {
            false
        }
    }

    /// Finalize a slot that was popped by a matcher: drop it from the id
    /// index (it is guaranteed not heap-resident) and decrement the gauge.
    /// Idempotent: a second call for the same id is a silent no-op.
    pub fn finalize_popped(&self, id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(slot) = inner.id_index.remove(id) {
            drop(inner);
            self.metrics
                .available_proxies_dec(slot.nat_type(), slot.proxy_type());
        }
    }

    pub fn lookup(&self, id: &str) -> Option<SlotHandle> {
        self.inner.lock().unwrap().id_index.get(id).cloned()
    }

    pub fn len(&self, class: HeapClass) -> usize {
        let inner = self.inner.lock().unwrap();
        match class {
            HeapClass::Restricted => inner.restricted.len(),
            HeapClass::Unrestricted => inner.unrestricted.len(),
        }
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.lock().unwrap();
        let mut snap = RegistrySnapshot {
            total: inner.id_index.len(),
            ..Default::default()
        };
        for slot in inner.id_index.values() {
            *snap.by_proxy_type.entry(slot.proxy_type().clone()).or_insert(0) += 1;
            *snap.by_nat_type.entry(slot.nat_type()).or_insert(0) += 1;
        }
        snap
    }
}

/// **NAT-compatibility rule**: an unrestricted client is matched from the
/// *restricted* heap (restricted proxies can only help unrestricted
/// clients); all other clients (`restricted` or `unknown`) are matched
/// from the *unrestricted* heap.
pub fn compatible_heap_for_client(client_nat: NatType) -> HeapClass {
    match client_nat {
        NatType::Unrestricted => HeapClass::Restricted,
        NatType::Restricted | NatType::Unknown => HeapClass::Unrestricted,
    }
}
