// ── Controller state ──
//
// Everything the mode machine reads or writes lives in one struct behind
// one mutex. Work that must happen outside the lock (collaborator calls,
// callbacks) is queued as `Effect`s and applied after the guard drops.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use crate::callback::MeshCallback;
use crate::link::Command;
use crate::model::{Gate, MacAddress, MeshName, Mode, Peripheral, Status};
use crate::notify::NotificationFrame;
use crate::params::{Parameters, RefreshSettings};

pub(super) struct ControllerState {
    pub(super) started: bool,
    pub(super) mode: Mode,
    pub(super) status: Option<Status>,
    pub(super) gate: Gate,
    pub(super) loop_enabled: bool,
    pub(super) params: Arc<Parameters>,
    pub(super) callback: Option<Arc<dyn MeshCallback>>,

    // Per-operation counters
    pub(super) next_index: usize,
    pub(super) processed: usize,
    pub(super) target_count: usize,
    /// Peripheral the outstanding connect/login was issued for.
    pub(super) active: Option<MacAddress>,

    // Timers, compared against `Instant::now()` inside loop steps
    pub(super) scan_started_at: Option<Instant>,
    pub(super) offline_since: Option<Instant>,
    pub(super) backoff_until: Option<Instant>,

    pub(super) refresh: Option<RefreshSettings>,
    /// Set while a user command awaits its response.
    pub(super) refresh_paused: bool,
}

impl ControllerState {
    pub(super) fn new() -> Self {
        Self {
            started: false,
            mode: Mode::Idle,
            status: None,
            gate: Gate::Running,
            loop_enabled: false,
            params: Arc::new(Parameters::default()),
            callback: None,
            next_index: 0,
            processed: 0,
            target_count: 0,
            active: None,
            scan_started_at: None,
            offline_since: None,
            backoff_until: None,
            refresh: None,
            refresh_paused: false,
        }
    }

    pub(super) fn reset_counters(&mut self) {
        self.next_index = 0;
        self.processed = 0;
        self.target_count = 0;
        self.active = None;
        self.scan_started_at = None;
        self.offline_since = None;
        self.backoff_until = None;
    }

    /// Return to the freshly constructed state, keeping nothing from the
    /// previous run.
    pub(super) fn reset(&mut self) {
        *self = Self::new();
    }

    pub(super) fn accepts_discoveries(&self) -> bool {
        self.started && self.mode != Mode::Idle && self.callback.is_some()
    }
}

/// Deferred side effect, applied in order once the state lock is released.
pub(super) enum Effect {
    // ── Callbacks ──
    Status {
        callback: Arc<dyn MeshCallback>,
        mode: Mode,
        old: Option<Status>,
        new: Status,
    },
    Discovered {
        callback: Arc<dyn MeshCallback>,
        mode: Mode,
        peripheral: Peripheral,
        record: Bytes,
    },
    Notify {
        callback: Arc<dyn MeshCallback>,
        mode: Mode,
        frame: NotificationFrame,
    },
    CommandResponse {
        callback: Arc<dyn MeshCallback>,
        mode: Mode,
        command: Command,
        success: bool,
    },
    ScanError {
        callback: Arc<dyn MeshCallback>,
        code: i32,
    },

    // ── Link requests ──
    Connect {
        peripheral: Peripheral,
        timeout: Duration,
    },
    Disconnect,
    Login {
        mesh_name: MeshName,
        params: Arc<Parameters>,
    },
    ResetMesh {
        params: Arc<Parameters>,
    },
    StartOta {
        firmware: Bytes,
    },
    RequestFirmware,
    Delete,
    EnableNotification,

    // ── Scanner / tasks ──
    StopScan,
    StartRefresher(RefreshSettings),
    StopRefresher,
}

#[derive(Default)]
pub(super) struct Effects(Vec<Effect>);

impl Effects {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn push(&mut self, effect: Effect) {
        self.0.push(effect);
    }

    pub(super) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for Effects {
    type Item = Effect;
    type IntoIter = std::vec::IntoIter<Effect>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
