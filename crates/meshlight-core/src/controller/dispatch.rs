// ── Link event dispatcher ──
//
// Single consumer of the link event channel. Each event becomes a status
// update plus whatever the active mode does next.

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::link::{Command, LinkEvent};
use crate::model::{EmitPolicy, Gate, MacAddress, Mode, Peripheral, Status};
use crate::notify::NotificationFrame;

use super::ControllerInner;
use super::state::{ControllerState, Effect, Effects};

pub(super) async fn link_event_task(
    inner: Weak<ControllerInner>,
    mut rx: mpsc::UnboundedReceiver<LinkEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                let Some(inner) = inner.upgrade() else { break };
                inner.handle_link_event(event);
            }
        }
    }
    debug!("link event dispatcher exited");
}

impl ControllerInner {
    pub(super) fn handle_link_event(self: &Arc<Self>, event: LinkEvent) {
        let kind = event.kind();
        let mut fx = Effects::new();
        {
            let mut state = self.lock_state();
            if !state.started {
                trace!(event = %kind, "controller stopped, ignoring link event");
                return;
            }
            debug!(event = %kind, mode = %state.mode, "link event");

            match event {
                LinkEvent::ConnectSuccess { address } => {
                    self.on_connected(&mut state, &address, &mut fx);
                }
                LinkEvent::ConnectFailure { address } => {
                    self.on_link_lost(&mut state, Some(address), &mut fx);
                }
                LinkEvent::LoginSuccess => self.on_logged_in(&mut state, &mut fx),
                LinkEvent::LoginFailure => self.on_link_lost(&mut state, None, &mut fx),
                LinkEvent::ResetMeshSuccess => self.on_mesh_reset(&mut state, &mut fx),
                LinkEvent::ResetMeshFailure { reason } => {
                    warn!(reason = %reason, "mesh reset failed");
                    self.set_status(&mut state, Status::UpdateMeshFailure, &mut fx);
                    if state.mode == Mode::UpdateMesh {
                        state.gate = Gate::Running;
                    }
                }
                LinkEvent::OtaProgress { percent } => {
                    trace!(percent, "ota progress");
                    self.set_status_with(&mut state, Status::OtaProgress, EmitPolicy::Always, &mut fx);
                }
                LinkEvent::OtaSuccess => self.finish(&mut state, Status::OtaCompleted, &mut fx),
                LinkEvent::OtaFailure => self.finish(&mut state, Status::OtaFailure, &mut fx),
                LinkEvent::DeleteSuccess => self.finish(&mut state, Status::DeleteCompleted, &mut fx),
                LinkEvent::DeleteFailure => self.finish(&mut state, Status::DeleteFailure, &mut fx),
                LinkEvent::FirmwareSuccess { version } => {
                    debug!(version = %version, "firmware reported");
                    self.on_firmware(&mut state, Status::FirmwareCompleted, &mut fx);
                }
                LinkEvent::FirmwareFailure => {
                    self.on_firmware(&mut state, Status::FirmwareFailure, &mut fx);
                }
                LinkEvent::LtkSuccess => self.set_status(&mut state, Status::LtkCompleted, &mut fx),
                LinkEvent::LtkFailure => self.set_status(&mut state, Status::LtkFailure, &mut fx),
                LinkEvent::Notification { frame } => {
                    match NotificationFrame::parse_for_vendor(&frame, self.config.vendor_id) {
                        Ok(frame) => {
                            if let Some(callback) = state.callback.clone() {
                                fx.push(Effect::Notify {
                                    callback,
                                    mode: state.mode,
                                    frame,
                                });
                            }
                        }
                        Err(e) => trace!(error = %e, "notification dropped"),
                    }
                }
                LinkEvent::CommandSuccess { command } => {
                    on_command_response(&mut state, command, true, &mut fx);
                }
                LinkEvent::CommandFailure { command } => {
                    on_command_response(&mut state, command, false, &mut fx);
                }
            }
        }
        self.apply(fx);
    }

    fn on_connected(&self, state: &mut ControllerState, address: &MacAddress, fx: &mut Effects) {
        self.mark_connected(address, true);
        self.set_status(state, Status::Connected, fx);

        match state.mode {
            Mode::Idle => {
                fx.push(Effect::RequestFirmware);
                return;
            }
            // Firmware pre-check; the answer is not surfaced in this mode.
            Mode::UpdateMesh => fx.push(Effect::RequestFirmware),
            Mode::ScanMesh | Mode::AutoConnectMesh | Mode::Ota | Mode::Delete => {}
        }

        let mesh_name = self
            .lookup(address)
            .map_or_else(|| state.params.mesh_name_bytes(), |p| p.mesh_name);
        state.active = Some(address.clone());
        self.login_locked(state, mesh_name, fx);
    }

    fn on_logged_in(&self, state: &mut ControllerState, fx: &mut Effects) {
        self.set_status(state, Status::LoggedIn, fx);

        match state.mode {
            Mode::UpdateMesh => {
                self.set_status(state, Status::UpdatingMesh, fx);
                fx.push(Effect::ResetMesh {
                    params: Arc::clone(&state.params),
                });
            }
            Mode::AutoConnectMesh => {
                state.gate = Gate::Pending;
                fx.push(Effect::StopScan);
                self.discovered.clear();
                state.next_index = 0;
                state.offline_since = None;
                state.backoff_until = None;
                if state.params.auto_enable_notification {
                    fx.push(Effect::EnableNotification);
                    if let Some(settings) = state.refresh {
                        fx.push(Effect::StartRefresher(settings));
                    }
                }
            }
            Mode::Ota => {
                state.gate = Gate::Pending;
                if let Some(firmware) = state.params.firmware.clone() {
                    debug!(bytes = firmware.len(), "starting ota transfer");
                    fx.push(Effect::StartOta { firmware });
                } else {
                    warn!("ota requested without a firmware image");
                    self.set_status(state, Status::OtaFailure, fx);
                    self.enter_idle(state, false, fx);
                }
            }
            Mode::Delete => {
                state.gate = Gate::Pending;
                fx.push(Effect::Delete);
            }
            Mode::Idle | Mode::ScanMesh => {}
        }
    }

    /// Connect or login failed: the link is gone.
    fn on_link_lost(
        &self,
        state: &mut ControllerState,
        address: Option<MacAddress>,
        fx: &mut Effects,
    ) {
        if let Some(address) = address.or_else(|| state.active.clone()) {
            self.mark_connected(&address, false);
        }
        self.set_status(state, Status::LoggedOut, fx);

        match state.mode {
            Mode::UpdateMesh => {
                state.gate = Gate::Running;
                self.set_status(state, Status::UpdateMeshFailure, fx);
            }
            Mode::AutoConnectMesh => {
                self.discovered.clear();
                state.next_index = 0;
                state.offline_since = None;
                state.gate = Gate::Running;
                fx.push(Effect::StopRefresher);
            }
            Mode::Ota => self.finish(state, Status::OtaFailure, fx),
            Mode::Delete => self.finish(state, Status::DeleteFailure, fx),
            Mode::Idle | Mode::ScanMesh => {}
        }
    }

    fn on_mesh_reset(&self, state: &mut ControllerState, fx: &mut Effects) {
        self.set_status(state, Status::UpdateMeshCompleted, fx);
        if state.mode != Mode::UpdateMesh {
            return;
        }

        state.processed += 1;
        if let Some(address) = state.active.clone() {
            let mark = |p: &mut Peripheral| {
                p.mesh_changed = true;
                if let Some(new_address) = p.new_mesh_address {
                    p.mesh_address = new_address;
                }
            };
            self.targets.update(&address, mark);
            self.discovered.update(&address, mark);
            info!(address = %address, processed = state.processed, "peripheral re-provisioned");
        }
        state.gate = Gate::Running;
    }

    fn on_firmware(&self, state: &mut ControllerState, status: Status, fx: &mut Effects) {
        if matches!(state.mode, Mode::UpdateMesh | Mode::AutoConnectMesh | Mode::Ota) {
            return;
        }
        self.set_status(state, status, fx);
    }

    /// Terminal outcome of a single-target mode.
    fn finish(&self, state: &mut ControllerState, status: Status, fx: &mut Effects) {
        self.set_status(state, status, fx);
        self.enter_idle(state, false, fx);
    }
}

fn on_command_response(
    state: &mut ControllerState,
    command: Command,
    success: bool,
    fx: &mut Effects,
) {
    state.refresh_paused = false;
    if let Some(callback) = state.callback.clone() {
        fx.push(Effect::CommandResponse {
            callback,
            mode: state.mode,
            command,
            success,
        });
    }
}
