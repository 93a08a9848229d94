// ── Scan consumer ──
//
// Drains the scan intake: filters raw records into peripherals, applies
// the mesh-membership rule of the active mode, and fills *Discovered*.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::callback::MeshCallback;
use crate::model::{Mode, Peripheral, RawAdvertisement, Status};
use crate::scan::{ScanIntake, ScanMessage};

use super::ControllerInner;
use super::state::{ControllerState, Effect, Effects};

pub(super) async fn scan_consumer_task(
    inner: Weak<ControllerInner>,
    intake: Arc<ScanIntake>,
    mut rx: mpsc::UnboundedReceiver<ScanMessage>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = rx.recv() => {
                let Some(message) = message else { break };
                let Some(inner) = inner.upgrade() else { break };
                match message {
                    ScanMessage::Record { raw, generation } => {
                        if intake.claim(&raw.address, generation) {
                            inner.process_discovery(raw);
                        } else {
                            trace!(address = %raw.address, "stale discovery dropped");
                        }
                    }
                    ScanMessage::Failed { code } => inner.scan_failed(code),
                }
            }
        }
    }
    intake.reset();
    debug!("scan consumer exited");
}

impl ControllerInner {
    fn process_discovery(self: &Arc<Self>, raw: RawAdvertisement) {
        if self.discovered.contains(&raw.address) {
            trace!(address = %raw.address, "already discovered");
            return;
        }
        let Some(peripheral) = self.filters.apply(&raw) else {
            trace!(address = %raw.address, "no filter matched");
            return;
        };

        let mut fx = Effects::new();
        {
            let mut state = self.lock_state();
            if !state.started {
                return;
            }
            let Some(callback) = state.callback.clone() else {
                return;
            };

            let mode = state.mode;
            match mode {
                Mode::ScanMesh => {
                    self.accept_scanned(&mut state, callback, peripheral, raw.record, &mut fx);
                }
                Mode::AutoConnectMesh => {
                    if peripheral.mesh_name == state.params.mesh_name_bytes() {
                        if self.discovered.insert(peripheral) {
                            debug!(address = %raw.address, "mesh member discovered");
                        }
                    } else {
                        trace!(address = %raw.address, mesh = %peripheral.mesh_name, "foreign mesh dropped");
                    }
                }
                Mode::Ota | Mode::Delete => {
                    self.discovered.insert(peripheral);
                }
                Mode::Idle | Mode::UpdateMesh => {
                    trace!(address = %raw.address, mode = %mode, "discovery ignored in this mode");
                }
            }
        }
        self.apply(fx);
    }

    fn accept_scanned(
        &self,
        state: &mut ControllerState,
        callback: Arc<dyn MeshCallback>,
        peripheral: Peripheral,
        record: Bytes,
        fx: &mut Effects,
    ) {
        let params = &state.params;
        let in_mesh = peripheral.mesh_name == params.mesh_name_bytes()
            || (params.out_of_mesh_name.is_some()
                && peripheral.mesh_name == params.out_of_mesh_name_bytes());
        if !in_mesh {
            trace!(address = %peripheral.address, mesh = %peripheral.mesh_name, "foreign mesh dropped");
            return;
        }

        if params.scan_type_single {
            if !self.discovered.insert_first(peripheral.clone()) {
                return;
            }
            debug!(address = %peripheral.address, "single scan satisfied");
            fx.push(Effect::Discovered {
                callback,
                mode: state.mode,
                peripheral,
                record,
            });
            self.set_status(state, Status::ScanCompleted, fx);
            self.enter_idle(state, false, fx);
        } else if self.discovered.insert(peripheral.clone()) {
            debug!(address = %peripheral.address, rssi = peripheral.rssi, "peripheral discovered");
            fx.push(Effect::Discovered {
                callback,
                mode: state.mode,
                peripheral,
                record,
            });
        }
    }

    fn scan_failed(self: &Arc<Self>, code: i32) {
        warn!(code, "scan failed");
        let callback = {
            let state = self.lock_state();
            if !state.started {
                return;
            }
            state.callback.clone()
        };
        if let Some(callback) = callback {
            let mut fx = Effects::new();
            fx.push(Effect::ScanError { callback, code });
            self.apply(fx);
        }
    }
}
