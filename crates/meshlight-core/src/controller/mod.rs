// ── Mesh controller ──
//
// Owns the single active operating mode and drives it: the event loop
// issues at most one hardware request per step, the dispatcher advances
// the mode on link results, and the refresher keeps notifications alive
// while connected in auto-connect mode.

mod discovery;
mod dispatch;
mod event_loop;
mod refresh;
mod state;

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::callback::MeshCallback;
use crate::config::ControllerConfig;
use crate::error::MeshError;
use crate::link::{Command, LinkController, LinkListener};
use crate::model::{EmitPolicy, Gate, MacAddress, MeshName, Mode, Peripheral, Status};
use crate::params::{Parameters, RefreshSettings};
use crate::scan::{FilterChain, ScanIntake, ScanListener, ScanSink, Scanner};
use crate::store::Registry;
use crate::timer::{PeriodicTimer, TimerHandle};

use self::state::{ControllerState, Effect, Effects};

/// Progress counters of the current operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Index of the next target or candidate to visit.
    pub next_index: usize,
    /// Targets re-provisioned so far.
    pub processed: usize,
    /// Targets selected for re-provisioning.
    pub target_count: usize,
}

// ── MeshController ───────────────────────────────────────────────

/// The main entry point for embedders.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. Construct it, then
/// [`start()`](Self::start) it inside a tokio runtime with the radio
/// collaborators. Every operation is synchronous and returns immediately;
/// progress is reported through the [`MeshCallback`] of the running
/// operation.
#[derive(Clone)]
pub struct MeshController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: ControllerConfig,
    filters: FilterChain,
    state: Mutex<ControllerState>,
    discovered: Registry,
    targets: Registry,
    /// Collaborators of the current run. Empty before start and after stop.
    bound: ArcSwapOption<Bound>,
    event_loop: Mutex<Option<TimerHandle>>,
    refresher: Mutex<Option<TimerHandle>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

struct Bound {
    scanner: Arc<dyn Scanner>,
    link: Arc<dyn LinkController>,
    runtime: Handle,
    cancel: CancellationToken,
    intake: Arc<ScanIntake>,
}

impl MeshController {
    /// Create a controller. Does NOT touch the radio. Call
    /// [`start()`](Self::start) to bind collaborators and spawn tasks.
    pub fn new(config: ControllerConfig, filters: FilterChain) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                config,
                filters,
                state: Mutex::new(ControllerState::new()),
                discovered: Registry::new(),
                targets: Registry::new(),
                bound: ArcSwapOption::empty(),
                event_loop: Mutex::new(None),
                refresher: Mutex::new(None),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Bind the collaborators, install listeners and spawn the scan
    /// consumer, link-event dispatcher and event loop.
    ///
    /// Must be called from within a tokio runtime. Starting an already
    /// started controller is a no-op.
    pub fn start(
        &self,
        scanner: Arc<dyn Scanner>,
        link: Arc<dyn LinkController>,
    ) -> Result<(), MeshError> {
        let runtime = Handle::try_current().map_err(|_| MeshError::NoRuntime)?;
        let inner = &self.inner;

        {
            let mut state = inner.lock_state();
            if state.started {
                debug!("mesh controller already started");
                return Ok(());
            }
            state.reset();
            state.started = true;
        }

        let cancel = CancellationToken::new();
        let (scan_tx, scan_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let intake = Arc::new(ScanIntake::new(scan_tx));

        inner.bound.store(Some(Arc::new(Bound {
            scanner: Arc::clone(&scanner),
            link: Arc::clone(&link),
            runtime: runtime.clone(),
            cancel: cancel.clone(),
            intake: Arc::clone(&intake),
        })));

        let weak_inner = Arc::downgrade(inner);
        let sink: Weak<dyn ScanSink> = weak_inner.clone();
        scanner.set_listener(Some(ScanListener::new(Arc::clone(&intake), sink)));
        link.set_listener(Some(LinkListener::new(link_tx)));

        {
            let mut handles = lock(&inner.task_handles);
            handles.push(runtime.spawn(discovery::scan_consumer_task(
                weak_inner.clone(),
                intake,
                scan_rx,
                cancel.child_token(),
            )));
            handles.push(runtime.spawn(dispatch::link_event_task(
                weak_inner.clone(),
                link_rx,
                cancel.child_token(),
            )));
        }

        let timer = PeriodicTimer::new(inner.config.loop_interval).spawn(&runtime, &cancel, move || {
            weak_inner
                .upgrade()
                .map_or(ControlFlow::Break(()), |inner| inner.loop_tick())
        });
        *lock(&inner.event_loop) = Some(timer);

        info!(
            loop_interval_ms = inner.config.loop_interval.as_millis(),
            filters = inner.filters.len(),
            "mesh controller started"
        );
        Ok(())
    }

    /// Detach listeners, cancel every task, disconnect the link and forget
    /// the current operation. Events arriving afterwards are ignored.
    pub fn stop(&self) {
        let inner = &self.inner;
        let Some(bound) = inner.bound.swap(None) else {
            return;
        };

        bound.scanner.set_listener(None);
        bound.link.set_listener(None);

        inner.lock_state().reset();

        bound.cancel.cancel();
        drop(lock(&inner.event_loop).take());
        drop(lock(&inner.refresher).take());
        lock(&inner.task_handles).clear();

        bound.scanner.stop_scan();
        bound.intake.reset();
        bound.link.disconnect();

        inner.discovered.clear();
        inner.targets.clear();
        info!("mesh controller stopped");
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock_state().started
    }

    // ── Mode operations ──────────────────────────────────────────

    /// Scan for peripherals of the configured mesh.
    pub fn start_scan(
        &self,
        params: Parameters,
        callback: Arc<dyn MeshCallback>,
    ) -> Result<(), MeshError> {
        self.inner
            .begin_mode(Mode::ScanMesh, params, callback, |inner, state, fx| {
                inner.discovered.clear();
                inner.targets.clear();
                fx.push(Effect::Disconnect);
                state.scan_started_at = Some(Instant::now());
            })
    }

    /// Re-provision discovered peripherals with a new mesh name, password
    /// and mesh address, one at a time.
    pub fn update_mesh(
        &self,
        params: Parameters,
        callback: Arc<dyn MeshCallback>,
    ) -> Result<(), MeshError> {
        self.inner
            .begin_mode(Mode::UpdateMesh, params, callback, |inner, state, fx| {
                inner.targets.clear();
                match state.params.device_target.as_ref() {
                    Some(target) => {
                        for device in target.devices() {
                            let Some(mut peripheral) =
                                inner.discovered.get_by_address(&device.address)
                            else {
                                debug!(address = %device.address, "update target not discovered");
                                continue;
                            };
                            peripheral.new_mesh_address = device.mesh_address;
                            inner.targets.insert(peripheral);
                        }
                    }
                    None => inner.discovered.copy_to(&inner.targets),
                }
                state.target_count = inner.targets.len();
                fx.push(Effect::Disconnect);
            })
    }

    /// Keep a link to the mesh up: scan, connect to a member, log in, and
    /// start over when the link drops.
    pub fn auto_connect(
        &self,
        params: Parameters,
        callback: Arc<dyn MeshCallback>,
    ) -> Result<(), MeshError> {
        self.inner
            .begin_mode(Mode::AutoConnectMesh, params, callback, |inner, state, fx| {
                inner.discovered.clear();
                inner.targets.clear();
                state.refresh = state
                    .params
                    .refresh_settings(inner.config.default_refresh_delay);
                fx.push(Effect::Disconnect);
            })
    }

    /// Push `params.firmware` to the discovered `device_target`.
    pub fn start_ota(
        &self,
        params: Parameters,
        callback: Arc<dyn MeshCallback>,
    ) -> Result<(), MeshError> {
        self.inner
            .begin_mode(Mode::Ota, params, callback, |inner, _, _| inner.targets.clear())
    }

    /// Remove the discovered `device_target` from its mesh.
    pub fn delete(
        &self,
        params: Parameters,
        callback: Arc<dyn MeshCallback>,
    ) -> Result<(), MeshError> {
        self.inner
            .begin_mode(Mode::Delete, params, callback, |inner, _, _| inner.targets.clear())
    }

    /// Abandon the current operation. Scanning always stops; the link is
    /// dropped only when `disconnect` is set.
    pub fn idle_mode(&self, disconnect: bool) -> Result<(), MeshError> {
        let inner = &self.inner;
        let mut fx = Effects::new();
        {
            let mut state = inner.lock_state();
            ensure_started(&state)?;
            if state.mode == Mode::Idle {
                return Ok(());
            }
            inner.enter_idle(&mut state, disconnect, &mut fx);
        }
        inner.apply(fx);
        Ok(())
    }

    // ── Direct link operations ───────────────────────────────────

    /// Connect to a discovered peripheral.
    pub fn connect(&self, address: &MacAddress, timeout: Duration) -> Result<(), MeshError> {
        let inner = &self.inner;
        let mut fx = Effects::new();
        {
            let mut state = inner.lock_state();
            ensure_started(&state)?;
            let peripheral = inner
                .lookup(address)
                .ok_or_else(|| MeshError::PeripheralNotFound {
                    address: address.clone(),
                })?;
            inner.connect_locked(&mut state, peripheral, timeout, &mut fx);
        }
        inner.apply(fx);
        Ok(())
    }

    pub fn disconnect(&self) -> Result<(), MeshError> {
        let bound = self.inner.bound()?;
        bound.link.disconnect();
        Ok(())
    }

    /// Log in to the mesh on the connected peripheral.
    pub fn login(&self, mesh_name: &str, password: &str) -> Result<(), MeshError> {
        let inner = &self.inner;
        let bound = inner.bound()?;
        let current = connected_peripheral(&bound)?;
        let mut fx = Effects::new();
        {
            let mut state = inner.lock_state();
            state.active = Some(current.address);
            inner.set_status(&mut state, Status::LoggingIn, &mut fx);
        }
        inner.apply(fx);
        bound
            .link
            .login(&MeshName::new(mesh_name), &MeshName::new(password));
        Ok(())
    }

    /// Query the firmware version of the connected peripheral.
    pub fn request_firmware(&self) -> Result<(), MeshError> {
        let bound = self.inner.bound()?;
        connected_peripheral(&bound)?;
        bound.link.request_firmware();
        Ok(())
    }

    /// Start an OTA transfer on the logged-in link.
    pub fn push_firmware(&self, firmware: &[u8]) -> Result<(), MeshError> {
        let bound = self.inner.logged_in()?;
        debug!(bytes = firmware.len(), "pushing firmware");
        bound.link.start_ota(firmware);
        Ok(())
    }

    /// Remove the logged-in peripheral from its mesh.
    pub fn delete_current(&self) -> Result<(), MeshError> {
        let bound = self.inner.logged_in()?;
        bound.link.delete();
        Ok(())
    }

    /// Send a mesh command. Keep-alives pause until its response arrives.
    pub fn send_command(&self, command: &Command) -> Result<(), MeshError> {
        let inner = &self.inner;
        let bound = inner.logged_in()?;
        inner.lock_state().refresh_paused = true;
        if bound.link.send_command(command) {
            trace!(opcode = command.opcode, address = command.address, "command sent");
            return Ok(());
        }
        inner.lock_state().refresh_paused = false;
        warn!(opcode = command.opcode, "link rejected command");
        Err(MeshError::CommandRejected {
            opcode: command.opcode,
        })
    }

    pub fn enable_notification(&self) -> Result<(), MeshError> {
        self.inner.bound()?.link.enable_notification();
        Ok(())
    }

    pub fn disable_notification(&self) -> Result<(), MeshError> {
        self.inner.bound()?.link.disable_notification();
        Ok(())
    }

    /// (Re)start the keep-alive refresher with `settings`.
    ///
    /// A zero delay falls back to the configured default.
    pub fn enable_auto_refresh(&self, mut settings: RefreshSettings) -> Result<(), MeshError> {
        let inner = &self.inner;
        let bound = inner.bound()?;
        if settings.delay.is_zero() {
            settings.delay = inner.config.default_refresh_delay;
        }
        inner.lock_state().refresh = Some(settings);
        inner.start_refresher(&bound, settings);
        Ok(())
    }

    pub fn disable_auto_refresh(&self) -> Result<(), MeshError> {
        let inner = &self.inner;
        inner.bound()?;
        inner.lock_state().refresh = None;
        inner.stop_refresher();
        Ok(())
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn mode(&self) -> Mode {
        self.inner.lock_state().mode
    }

    pub fn status(&self) -> Option<Status> {
        self.inner.lock_state().status
    }

    pub fn progress(&self) -> Progress {
        let state = self.inner.lock_state();
        Progress {
            next_index: state.next_index,
            processed: state.processed,
            target_count: state.target_count,
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner
            .bound
            .load_full()
            .is_some_and(|bound| bound.link.is_logged_in())
    }

    /// Parameters of the running operation.
    pub fn parameters(&self) -> Arc<Parameters> {
        Arc::clone(&self.inner.lock_state().params)
    }

    pub fn discovered(&self) -> Arc<Vec<Peripheral>> {
        self.inner.discovered.snapshot()
    }

    pub fn targets(&self) -> Arc<Vec<Peripheral>> {
        self.inner.targets.snapshot()
    }

    pub fn subscribe_discovered(&self) -> watch::Receiver<Arc<Vec<Peripheral>>> {
        self.inner.discovered.subscribe()
    }
}

// ── Shared internals ─────────────────────────────────────────────

impl ControllerInner {
    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        lock(&self.state)
    }

    fn bound(&self) -> Result<Arc<Bound>, MeshError> {
        self.bound.load_full().ok_or(MeshError::NotStarted)
    }

    fn logged_in(&self) -> Result<Arc<Bound>, MeshError> {
        let bound = self.bound()?;
        if bound.link.is_logged_in() {
            Ok(bound)
        } else {
            Err(MeshError::NotLoggedIn)
        }
    }

    fn lookup(&self, address: &MacAddress) -> Option<Peripheral> {
        self.targets
            .get_by_address(address)
            .or_else(|| self.discovered.get_by_address(address))
    }

    /// Common entry of every mode-start operation.
    fn begin_mode(
        self: &Arc<Self>,
        mode: Mode,
        params: Parameters,
        callback: Arc<dyn MeshCallback>,
        prepare: impl FnOnce(&Self, &mut ControllerState, &mut Effects),
    ) -> Result<(), MeshError> {
        let mut fx = Effects::new();
        {
            let mut state = self.lock_state();
            ensure_started(&state)?;
            if state.mode == mode {
                debug!(mode = %mode, "mode already active");
                return Ok(());
            }
            if state.mode == Mode::Idle {
                fx.push(Effect::StopScan);
            } else {
                self.enter_idle(&mut state, false, &mut fx);
            }

            state.reset_counters();
            state.status = None;
            state.gate = Gate::Running;
            state.params = Arc::new(params);
            state.callback = Some(callback);
            prepare(&**self, &mut *state, &mut fx);
            state.mode = mode;
            state.loop_enabled = true;
        }
        info!(mode = %mode, "mode started");
        self.apply(fx);
        Ok(())
    }

    /// Update the status using the configured policy for `status`.
    fn set_status(&self, state: &mut ControllerState, status: Status, fx: &mut Effects) {
        let policy = self.config.status_policies.policy(status);
        self.set_status_with(state, status, policy, fx);
    }

    fn set_status_with(
        &self,
        state: &mut ControllerState,
        status: Status,
        policy: EmitPolicy,
        fx: &mut Effects,
    ) {
        let old = state.status;
        if !policy.allows(state.mode, old, status) {
            trace!(mode = %state.mode, status = %status, "status suppressed");
            return;
        }
        state.status = Some(status);
        if let Some(callback) = &state.callback {
            fx.push(Effect::Status {
                callback: Arc::clone(callback),
                mode: state.mode,
                old,
                new: status,
            });
        }
    }

    /// Force the controller into Idle. Stops scanning, and the link too
    /// when `disconnect` is set.
    fn enter_idle(&self, state: &mut ControllerState, disconnect: bool, fx: &mut Effects) {
        if state.mode != Mode::Idle {
            debug!(from = %state.mode, "entering idle");
        }
        state.mode = Mode::Idle;
        state.status = None;
        state.loop_enabled = false;
        state.gate = Gate::Running;
        if disconnect {
            fx.push(Effect::Disconnect);
        }
        fx.push(Effect::StopScan);
    }

    fn connect_locked(
        &self,
        state: &mut ControllerState,
        peripheral: Peripheral,
        timeout: Duration,
        fx: &mut Effects,
    ) {
        debug!(address = %peripheral.address, timeout_s = timeout.as_secs(), "connecting");
        state.active = Some(peripheral.address.clone());
        fx.push(Effect::Connect {
            peripheral,
            timeout,
        });
        self.set_status(state, Status::Connecting, fx);
    }

    fn login_locked(&self, state: &mut ControllerState, mesh_name: MeshName, fx: &mut Effects) {
        self.set_status(state, Status::LoggingIn, fx);
        fx.push(Effect::Login {
            mesh_name,
            params: Arc::clone(&state.params),
        });
    }

    fn mark_connected(&self, address: &MacAddress, connected: bool) {
        self.discovered.update(address, |p| p.connected = connected);
        self.targets.update(address, |p| p.connected = connected);
    }

    /// Apply deferred effects. Must be called without the state lock.
    fn apply(self: &Arc<Self>, fx: Effects) {
        if fx.is_empty() {
            return;
        }
        let Some(bound) = self.bound.load_full() else {
            trace!("controller stopped, dropping effects");
            return;
        };
        for effect in fx {
            // An earlier effect may have run a callback that stopped or
            // restarted the controller.
            if !matches!(&*self.bound.load(), Some(current) if Arc::ptr_eq(current, &bound)) {
                trace!("controller stopped mid-apply, dropping remaining effects");
                return;
            }
            self.apply_one(&bound, effect);
        }
    }

    fn apply_one(self: &Arc<Self>, bound: &Bound, effect: Effect) {
        let link = &bound.link;
        match effect {
            Effect::Status {
                callback,
                mode,
                old,
                new,
            } => {
                debug!(mode = %mode, old = ?old, new = %new, "status changed");
                callback.on_status_changed(mode, old, new);
            }
            Effect::Discovered {
                callback,
                mode,
                peripheral,
                record,
            } => {
                // Advisory only.
                let _ = callback.on_discovered(&peripheral, mode, &record);
            }
            Effect::Notify {
                callback,
                mode,
                frame,
            } => {
                let current = link.current_peripheral();
                callback.on_notify(
                    current.as_ref(),
                    mode,
                    frame.opcode,
                    frame.source_address,
                    &frame.payload,
                );
            }
            Effect::CommandResponse {
                callback,
                mode,
                command,
                success,
            } => {
                let current = link.current_peripheral();
                callback.on_command_response(current.as_ref(), mode, &command, success);
            }
            Effect::ScanError { callback, code } => callback.on_error(code),
            Effect::Connect {
                peripheral,
                timeout,
            } => {
                if link.current_peripheral().is_some_and(|p| p.connected) {
                    link.disconnect();
                }
                link.connect(&peripheral, timeout);
            }
            Effect::Disconnect => link.disconnect(),
            Effect::Login { mesh_name, params } => {
                link.login(&mesh_name, &params.mesh_password_bytes());
            }
            Effect::ResetMesh { params } => link.reset_mesh(
                &params.new_mesh_name_bytes(),
                &params.new_mesh_password_bytes(),
                params.long_term_key(),
            ),
            Effect::StartOta { firmware } => link.start_ota(&firmware),
            Effect::RequestFirmware => link.request_firmware(),
            Effect::Delete => link.delete(),
            Effect::EnableNotification => link.enable_notification(),
            Effect::StopScan => {
                bound.scanner.stop_scan();
                bound.intake.reset();
            }
            Effect::StartRefresher(settings) => self.start_refresher(bound, settings),
            Effect::StopRefresher => self.stop_refresher(),
        }
    }
}

impl ScanSink for ControllerInner {
    fn accepts_discoveries(&self) -> bool {
        self.lock_state().accepts_discoveries()
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn ensure_started(state: &ControllerState) -> Result<(), MeshError> {
    if state.started {
        Ok(())
    } else {
        Err(MeshError::NotStarted)
    }
}

fn connected_peripheral(bound: &Bound) -> Result<Peripheral, MeshError> {
    bound
        .link
        .current_peripheral()
        .filter(|p| p.connected)
        .ok_or(MeshError::NotConnected)
}
