// ── Peripheral registry ──
//
// Ordered, address-unique storage with push-based change notification
// via a `watch` channel. Insertion order is iteration order.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;
use tokio::sync::watch;

use crate::model::{MacAddress, Peripheral};

/// A thread-safe, reactive set of peripherals keyed by address.
///
/// Every mutation rebuilds the snapshot that subscribers receive.
pub struct Registry {
    entries: RwLock<IndexMap<MacAddress, Peripheral>>,
    snapshot: watch::Sender<Arc<Vec<Peripheral>>>,
}

impl Registry {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            entries: RwLock::new(IndexMap::new()),
            snapshot,
        }
    }

    /// Insert a peripheral unless its address is already present.
    /// Returns `true` if it was added.
    pub fn insert(&self, peripheral: Peripheral) -> bool {
        let mut entries = self.write();
        if entries.contains_key(&peripheral.address) {
            return false;
        }
        entries.insert(peripheral.address.clone(), peripheral);
        self.publish(&entries);
        true
    }

    /// Insert only when the registry is currently empty. Returns `true` if
    /// the peripheral became the sole entry.
    pub fn insert_first(&self, peripheral: Peripheral) -> bool {
        let mut entries = self.write();
        if !entries.is_empty() {
            return false;
        }
        entries.insert(peripheral.address.clone(), peripheral);
        self.publish(&entries);
        true
    }

    pub fn get(&self, index: usize) -> Option<Peripheral> {
        self.read().get_index(index).map(|(_, p)| p.clone())
    }

    pub fn get_by_address(&self, address: &MacAddress) -> Option<Peripheral> {
        self.read().get(address).cloned()
    }

    pub fn contains(&self, address: &MacAddress) -> bool {
        self.read().contains_key(address)
    }

    /// Apply `f` to the entry for `address`. Returns `false` if absent.
    pub fn update(&self, address: &MacAddress, f: impl FnOnce(&mut Peripheral)) -> bool {
        let mut entries = self.write();
        let Some(entry) = entries.get_mut(address) else {
            return false;
        };
        f(entry);
        self.publish(&entries);
        true
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn clear(&self) {
        let mut entries = self.write();
        if entries.is_empty() {
            return;
        }
        entries.clear();
        self.publish(&entries);
    }

    /// Insert every entry of `self` into `dest` (insert-if-absent).
    pub fn copy_to(&self, dest: &Registry) {
        for peripheral in self.read().values() {
            dest.insert(peripheral.clone());
        }
    }

    /// Entry with the strongest signal; the earliest wins ties.
    pub fn max_rssi(&self) -> Option<Peripheral> {
        self.read()
            .values()
            .fold(None::<&Peripheral>, |best, p| match best {
                Some(b) if b.rssi >= p.rssi => Some(b),
                _ => Some(p),
            })
            .cloned()
    }

    /// Current snapshot (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<Vec<Peripheral>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Peripheral>>> {
        self.snapshot.subscribe()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<MacAddress, Peripheral>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<MacAddress, Peripheral>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, entries: &IndexMap<MacAddress, Peripheral>) {
        let values: Vec<Peripheral> = entries.values().cloned().collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
