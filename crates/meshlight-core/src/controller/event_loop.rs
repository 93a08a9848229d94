// ── Event loop ──
//
// One step per tick, selected by the active mode. A step issues at most
// one hardware request and then holds the gate at `Pending` until the
// dispatcher sees its result.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::callback::SCAN_REFUSED;
use crate::model::{Gate, Mode, Status};

use super::ControllerInner;
use super::state::{ControllerState, Effect, Effects};

impl ControllerInner {
    pub(super) fn loop_tick(self: &Arc<Self>) -> ControlFlow<()> {
        let (mode, wants_scan) = {
            let state = self.lock_state();
            if !state.started {
                return ControlFlow::Break(());
            }
            if !state.loop_enabled {
                return ControlFlow::Continue(());
            }
            (state.mode, wants_scan(&state, Instant::now()))
        };

        if wants_scan && !self.ensure_scanning(mode) {
            return ControlFlow::Continue(());
        }

        let mut fx = Effects::new();
        {
            let mut state = self.lock_state();
            if !state.started {
                return ControlFlow::Break(());
            }
            if !state.loop_enabled || state.mode != mode {
                return ControlFlow::Continue(());
            }
            let now = Instant::now();
            match mode {
                Mode::ScanMesh => self.scan_step(&mut state, now, &mut fx),
                Mode::UpdateMesh => self.update_step(&mut state, &mut fx),
                Mode::AutoConnectMesh => self.auto_connect_step(&mut state, now, &mut fx),
                Mode::Ota => self.target_step(&mut state, Status::OtaFailure, &mut fx),
                Mode::Delete => self.target_step(&mut state, Status::DeleteFailure, &mut fx),
                Mode::Idle => {}
            }
        }
        self.apply(fx);
        ControlFlow::Continue(())
    }

    /// Start the radio if it is not scanning. On refusal the mode that
    /// needed it is abandoned, `on_error(SCAN_REFUSED)` is reported and
    /// `false` is returned.
    fn ensure_scanning(self: &Arc<Self>, mode: Mode) -> bool {
        let Ok(bound) = self.bound() else {
            return false;
        };
        if bound.scanner.is_scanning() {
            return true;
        }
        if bound.scanner.start_scan() {
            {
                let mut state = self.lock_state();
                if state.started && state.loop_enabled && state.mode == mode {
                    debug!(mode = %mode, "scan started");
                    // A fresh scan restarts the offline grace period.
                    state.offline_since = None;
                    return true;
                }
            }
            // The mode was left while the radio was starting.
            debug!(mode = %mode, "mode changed during scan start, stopping radio");
            bound.scanner.stop_scan();
            bound.intake.reset();
            return false;
        }

        warn!(mode = %mode, "scanner refused to start");
        let mut fx = Effects::new();
        {
            let mut state = self.lock_state();
            if state.mode == mode {
                if let Some(callback) = &state.callback {
                    fx.push(Effect::ScanError {
                        callback: Arc::clone(callback),
                        code: SCAN_REFUSED,
                    });
                }
                self.enter_idle(&mut state, false, &mut fx);
            }
        }
        self.apply(fx);
        false
    }

    fn scan_step(&self, state: &mut ControllerState, now: Instant, fx: &mut Effects) {
        let single = state.params.scan_type_single;
        if single && self.discovered.len() == 1 {
            self.set_status(state, Status::ScanCompleted, fx);
            self.enter_idle(state, false, fx);
            return;
        }

        let Some(timeout) = state.params.scan_timeout() else {
            return;
        };
        let elapsed = state
            .scan_started_at
            .map_or(Duration::ZERO, |started| now - started);
        if elapsed < timeout {
            return;
        }

        info!(
            found = self.discovered.len(),
            timeout_s = timeout.as_secs(),
            "scan timed out"
        );
        if single {
            self.set_status(state, Status::ScanTimeout, fx);
        }
        self.set_status(state, Status::ScanCompleted, fx);
        self.enter_idle(state, false, fx);
    }

    fn update_step(&self, state: &mut ControllerState, fx: &mut Effects) {
        if state.gate == Gate::Pending {
            return;
        }

        if state.processed >= state.target_count || state.next_index >= state.target_count {
            info!(
                processed = state.processed,
                targets = state.target_count,
                "mesh update finished"
            );
            self.set_status(state, Status::UpdateAllCompleted, fx);
            self.enter_idle(state, false, fx);
            return;
        }

        let index = state.next_index;
        state.next_index += 1;
        let Some(target) = self.targets.get(index) else {
            return;
        };
        if target.mesh_changed {
            debug!(address = %target.address, "target already updated, skipping");
            return;
        }

        state.gate = Gate::Pending;
        let timeout = state.params.connect_timeout();
        self.connect_locked(state, target, timeout, fx);
    }

    fn auto_connect_step(&self, state: &mut ControllerState, now: Instant, fx: &mut Effects) {
        if state.gate == Gate::Pending {
            return;
        }
        if let Some(until) = state.backoff_until {
            if now < until {
                return;
            }
            state.backoff_until = None;
        }

        let count = self.discovered.len();
        if count == 0 {
            self.check_offline(state, now, fx);
            return;
        }

        state.gate = Gate::Pending;
        state.offline_since = None;
        fx.push(Effect::StopScan);

        if state.next_index >= count {
            state.next_index = 0;
        }
        let index = state.next_index;
        state.next_index += 1;
        let Some(candidate) = self.discovered.get(index) else {
            state.gate = Gate::Running;
            return;
        };
        let timeout = state.params.connect_timeout();
        self.connect_locked(state, candidate, timeout, fx);
    }

    /// Offline watchdog: the first empty tick starts the grace period
    /// (backdated by one loop interval); once it runs out the scan stops,
    /// the backoff window opens and MeshOffline is reported.
    fn check_offline(&self, state: &mut ControllerState, now: Instant, fx: &mut Effects) {
        let Some(since) = state.offline_since else {
            let interval = self.config.loop_interval;
            state.offline_since = Some(now.checked_sub(interval).unwrap_or(now));
            return;
        };

        let grace = state
            .params
            .offline_timeout()
            .unwrap_or(self.config.default_offline_timeout);
        if now - since <= grace {
            return;
        }

        info!(grace_s = grace.as_secs(), "mesh offline");
        state.offline_since = None;
        state.backoff_until = Some(now + self.config.offline_backoff);
        fx.push(Effect::StopScan);
        self.set_status(state, Status::MeshOffline, fx);
    }

    /// Single-target step shared by OTA and delete.
    fn target_step(&self, state: &mut ControllerState, failure: Status, fx: &mut Effects) {
        if state.gate == Gate::Pending {
            return;
        }

        let target = state
            .params
            .device_target
            .as_ref()
            .and_then(|target| target.primary())
            .and_then(|device| self.discovered.get_by_address(&device.address));
        let Some(target) = target else {
            warn!(mode = %state.mode, "target peripheral not discovered");
            self.set_status(state, failure, fx);
            self.enter_idle(state, false, fx);
            return;
        };

        state.gate = Gate::Pending;
        if target.connected {
            debug!(address = %target.address, "target already connected, logging in");
            state.active = Some(target.address.clone());
            self.login_locked(state, target.mesh_name, fx);
        } else {
            let timeout = state.params.connect_timeout();
            self.connect_locked(state, target, timeout, fx);
        }
    }
}

/// Whether the step for the current mode needs the radio scanning.
fn wants_scan(state: &ControllerState, now: Instant) -> bool {
    match state.mode {
        Mode::ScanMesh => true,
        Mode::AutoConnectMesh => {
            state.gate == Gate::Running && state.backoff_until.is_none_or(|until| now >= until)
        }
        Mode::Idle | Mode::UpdateMesh | Mode::Ota | Mode::Delete => false,
    }
}
