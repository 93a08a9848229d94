// ── Scan intake ──
//
// The scanner pushes records through a `ScanListener` into an unbounded
// channel drained by the controller's consumer task. An address stays in
// the pending map from enqueue until it is processed, so a chatty device
// is queued at most once. Stopping the scan bumps the generation, which
// invalidates everything still queued.

use std::fmt;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tracing::trace;

use crate::model::{MacAddress, RawAdvertisement};

/// Message carried from the scanner to the consumer task.
#[derive(Debug)]
pub(crate) enum ScanMessage {
    Record {
        raw: RawAdvertisement,
        generation: u64,
    },
    Failed {
        code: i32,
    },
}

/// Controller-side hooks the listener consults.
pub(crate) trait ScanSink: Send + Sync {
    /// `false` while idle or while no callback is installed.
    fn accepts_discoveries(&self) -> bool;
}

pub(crate) struct ScanIntake {
    tx: mpsc::UnboundedSender<ScanMessage>,
    pending: DashMap<MacAddress, u64>,
    generation: AtomicU64,
}

impl ScanIntake {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ScanMessage>) -> Self {
        Self {
            tx,
            pending: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    fn enqueue(&self, raw: RawAdvertisement) {
        let generation = self.generation.load(Ordering::Acquire);
        match self.pending.entry(raw.address.clone()) {
            Entry::Occupied(_) => {
                trace!(address = %raw.address, "discovery already queued");
            }
            Entry::Vacant(slot) => {
                slot.insert(generation);
                let address = raw.address.clone();
                if self.tx.send(ScanMessage::Record { raw, generation }).is_err() {
                    self.pending.remove(&address);
                }
            }
        }
    }

    fn report_failure(&self, code: i32) {
        let _ = self.tx.send(ScanMessage::Failed { code });
    }

    /// Claim a dequeued record for processing. Returns `false` if it was
    /// queued before the last reset.
    pub(crate) fn claim(&self, address: &MacAddress, generation: u64) -> bool {
        // Release the slot even for a stale record, or a reset racing the
        // enqueue would pin the address.
        self.pending.remove_if(address, |_, queued| *queued == generation);
        generation == self.generation.load(Ordering::Acquire)
    }

    /// Drop the pending map and invalidate in-flight records.
    pub(crate) fn reset(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.pending.clear();
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Handle the controller installs on the [`Scanner`](super::Scanner).
#[derive(Clone)]
pub struct ScanListener {
    intake: Arc<ScanIntake>,
    sink: Weak<dyn ScanSink>,
}

impl ScanListener {
    pub(crate) fn new(intake: Arc<ScanIntake>, sink: Weak<dyn ScanSink>) -> Self {
        Self { intake, sink }
    }

    /// A raw discovery record arrived.
    pub fn on_scan(&self, raw: RawAdvertisement) {
        let Some(sink) = self.sink.upgrade() else {
            return;
        };
        if !sink.accepts_discoveries() {
            trace!(address = %raw.address, "discovery dropped, not accepting");
            return;
        }
        self.intake.enqueue(raw);
    }

    /// The radio reported a scan failure.
    pub fn on_scan_failed(&self, code: i32) {
        self.intake.report_failure(code);
    }

    /// The radio stopped scanning.
    pub fn on_scan_stopped(&self) {
        self.intake.reset();
    }
}

impl fmt::Debug for ScanListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanListener")
            .field("pending", &self.intake.pending.len())
            .finish_non_exhaustive()
    }
}
