// Recording collaborators shared by the controller integration tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meshlight_core::{
    Command, ControllerConfig, FilterChain, LinkController, LinkEvent, LinkListener, MacAddress,
    MeshCallback, MeshController, MeshName, Mode, Parameters, Peripheral, RawAdvertisement,
    ScanListener, Scanner, Status, filter_fn,
};

// ── Scanner ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockScanner {
    listener: Mutex<Option<ScanListener>>,
    scanning: AtomicBool,
    pub refuse: AtomicBool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    on_is_scanning: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl MockScanner {
    pub fn listener(&self) -> Option<ScanListener> {
        self.listener.lock().unwrap().clone()
    }

    /// Deliver a discovery record the way a radio driver would.
    pub fn advertise(&self, raw: RawAdvertisement) {
        if let Some(listener) = self.listener() {
            listener.on_scan(raw);
        }
    }

    pub fn fail(&self, code: i32) {
        if let Some(listener) = self.listener() {
            listener.on_scan_failed(code);
        }
    }

    /// Run `hook` inside the next `is_scanning` query, as another thread
    /// would between the controller's state reads.
    pub fn before_next_is_scanning(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_is_scanning.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn is_scanning_now(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }
}

impl Scanner for MockScanner {
    fn set_listener(&self, listener: Option<ScanListener>) {
        *self.listener.lock().unwrap() = listener;
    }

    fn start_scan(&self) -> bool {
        if self.refuse.load(Ordering::SeqCst) {
            return false;
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.scanning.store(true, Ordering::SeqCst);
        true
    }

    fn stop_scan(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.scanning.swap(false, Ordering::SeqCst) {
            if let Some(listener) = self.listener() {
                listener.on_scan_stopped();
            }
        }
    }

    fn is_scanning(&self) -> bool {
        let hook = self.on_is_scanning.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        self.scanning.load(Ordering::SeqCst)
    }
}

// ── Link ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCall {
    Connect { address: MacAddress, timeout: Duration },
    Disconnect,
    Login { mesh_name: String, password: String },
    ResetMesh { mesh_name: String, password: String, ltk: Option<Vec<u8>> },
    StartOta { bytes: usize },
    RequestFirmware,
    Delete,
    EnableNotification,
    DisableNotification,
    UpdateNotification,
    SendCommand { opcode: u8 },
}

/// Link that answers every request immediately through its listener.
#[derive(Default)]
pub struct MockLink {
    listener: Mutex<Option<LinkListener>>,
    calls: Mutex<Vec<LinkCall>>,
    current: Mutex<Option<Peripheral>>,
    logged_in: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_login: AtomicBool,
    pub fail_reset: AtomicBool,
    pub reject_commands: AtomicBool,
}

impl MockLink {
    pub fn listener(&self) -> Option<LinkListener> {
        self.listener.lock().unwrap().clone()
    }

    pub fn emit(&self, event: LinkEvent) {
        if let Some(listener) = self.listener() {
            listener.emit(event);
        }
    }

    pub fn calls(&self) -> Vec<LinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&LinkCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn connects(&self) -> usize {
        self.count(|c| matches!(c, LinkCall::Connect { .. }))
    }

    pub fn keep_alives(&self) -> usize {
        self.count(|c| matches!(c, LinkCall::UpdateNotification))
    }

    fn record(&self, call: LinkCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl LinkController for MockLink {
    fn set_listener(&self, listener: Option<LinkListener>) {
        *self.listener.lock().unwrap() = listener;
    }

    fn connect(&self, peripheral: &Peripheral, timeout: Duration) {
        self.record(LinkCall::Connect {
            address: peripheral.address.clone(),
            timeout,
        });
        let address = peripheral.address.clone();
        if self.fail_connect.load(Ordering::SeqCst) {
            self.emit(LinkEvent::ConnectFailure { address });
            return;
        }
        let mut connected = peripheral.clone();
        connected.connected = true;
        *self.current.lock().unwrap() = Some(connected);
        self.emit(LinkEvent::ConnectSuccess { address });
    }

    fn disconnect(&self) {
        self.record(LinkCall::Disconnect);
        *self.current.lock().unwrap() = None;
        self.logged_in.store(false, Ordering::SeqCst);
    }

    fn login(&self, mesh_name: &MeshName, password: &MeshName) {
        self.record(LinkCall::Login {
            mesh_name: mesh_name.to_lossy_string(),
            password: password.to_lossy_string(),
        });
        if self.fail_login.load(Ordering::SeqCst) {
            self.emit(LinkEvent::LoginFailure);
            return;
        }
        self.logged_in.store(true, Ordering::SeqCst);
        self.emit(LinkEvent::LoginSuccess);
    }

    fn reset_mesh(&self, mesh_name: &MeshName, password: &MeshName, long_term_key: Option<&[u8]>) {
        self.record(LinkCall::ResetMesh {
            mesh_name: mesh_name.to_lossy_string(),
            password: password.to_lossy_string(),
            ltk: long_term_key.map(<[u8]>::to_vec),
        });
        if self.fail_reset.load(Ordering::SeqCst) {
            self.emit(LinkEvent::ResetMeshFailure {
                reason: "device rejected new mesh".into(),
            });
        } else {
            self.emit(LinkEvent::ResetMeshSuccess);
        }
    }

    fn start_ota(&self, firmware: &[u8]) {
        self.record(LinkCall::StartOta {
            bytes: firmware.len(),
        });
        self.emit(LinkEvent::OtaProgress { percent: 50 });
        self.emit(LinkEvent::OtaProgress { percent: 100 });
        self.emit(LinkEvent::OtaSuccess);
    }

    fn request_firmware(&self) {
        self.record(LinkCall::RequestFirmware);
        self.emit(LinkEvent::FirmwareSuccess {
            version: "V2.1".into(),
        });
    }

    fn delete(&self) {
        self.record(LinkCall::Delete);
        self.emit(LinkEvent::DeleteSuccess);
    }

    fn enable_notification(&self) {
        self.record(LinkCall::EnableNotification);
    }

    fn disable_notification(&self) {
        self.record(LinkCall::DisableNotification);
    }

    fn update_notification(&self) {
        self.record(LinkCall::UpdateNotification);
    }

    fn send_command(&self, command: &Command) -> bool {
        self.record(LinkCall::SendCommand {
            opcode: command.opcode,
        });
        !self.reject_commands.load(Ordering::SeqCst)
    }

    fn current_peripheral(&self) -> Option<Peripheral> {
        self.current.lock().unwrap().clone()
    }

    fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }
}

// ── Callback ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Discovered(MacAddress),
    Status {
        mode: Mode,
        old: Option<Status>,
        new: Status,
    },
    Notify {
        opcode: u8,
        source: u16,
        payload: [u8; 10],
    },
    CommandResponse {
        opcode: u8,
        success: bool,
    },
    Error(i32),
}

#[derive(Default)]
pub struct RecordingCallback {
    seen: Mutex<Vec<Seen>>,
}

impl RecordingCallback {
    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Status { new, .. } => Some(new),
                _ => None,
            })
            .collect()
    }

    pub fn count_status(&self, status: Status) -> usize {
        self.statuses().iter().filter(|s| **s == status).count()
    }

    pub fn discovered(&self) -> Vec<MacAddress> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Discovered(address) => Some(address),
                _ => None,
            })
            .collect()
    }

    fn push(&self, seen: Seen) {
        self.seen.lock().unwrap().push(seen);
    }
}

impl MeshCallback for RecordingCallback {
    fn on_discovered(&self, peripheral: &Peripheral, _mode: Mode, _raw_record: &[u8]) -> bool {
        self.push(Seen::Discovered(peripheral.address.clone()));
        true
    }

    fn on_status_changed(&self, mode: Mode, old: Option<Status>, new: Status) {
        self.push(Seen::Status { mode, old, new });
    }

    fn on_notify(
        &self,
        _peripheral: Option<&Peripheral>,
        _mode: Mode,
        opcode: u8,
        source_address: u16,
        payload: &[u8; 10],
    ) {
        self.push(Seen::Notify {
            opcode,
            source: source_address,
            payload: *payload,
        });
    }

    fn on_command_response(
        &self,
        _peripheral: Option<&Peripheral>,
        _mode: Mode,
        command: &Command,
        success: bool,
    ) {
        self.push(Seen::CommandResponse {
            opcode: command.opcode,
            success,
        });
    }

    fn on_error(&self, code: i32) {
        self.push(Seen::Error(code));
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct Harness {
    pub controller: MeshController,
    pub scanner: Arc<MockScanner>,
    pub link: Arc<MockLink>,
    pub callback: Arc<RecordingCallback>,
}

impl Harness {
    /// Build and start a controller. Must run inside a tokio runtime.
    pub fn start() -> Self {
        Self::start_with(ControllerConfig::default())
    }

    pub fn start_with(config: ControllerConfig) -> Self {
        let controller = MeshController::new(config, local_name_filters());
        let scanner = Arc::new(MockScanner::default());
        let link = Arc::new(MockLink::default());
        controller.start(scanner.clone(), link.clone()).unwrap();
        Self {
            controller,
            scanner,
            link,
            callback: Arc::new(RecordingCallback::default()),
        }
    }

    pub fn callback(&self) -> Arc<dyn MeshCallback> {
        self.callback.clone()
    }

    /// Populate *Discovered* with in-mesh devices through a mesh scan.
    pub async fn discover(&self, addresses: &[&str]) {
        self.controller
            .start_scan(mesh_params(), Arc::new(RecordingCallback::default()))
            .unwrap();
        for address in addresses {
            self.scanner.advertise(advert(address, "home"));
        }
        settle().await;
        assert_eq!(self.controller.discovered().len(), addresses.len());
    }
}

/// Uses the advertised local name as mesh name; the last address byte
/// doubles as mesh address.
pub fn local_name_filters() -> FilterChain {
    FilterChain::new().with(filter_fn("local-name", |raw| {
        let Some(name) = raw.local_name.as_deref() else {
            return Ok(None);
        };
        let tail = raw.address.as_str().rsplit(':').next().unwrap_or("0");
        let mesh_address = u16::from_str_radix(tail, 16).unwrap_or(0);
        Ok(Some(
            Peripheral::new(raw.address.clone(), MeshName::new(name), mesh_address)
                .with_rssi(raw.rssi),
        ))
    }))
}

pub fn advert(address: &str, mesh: &str) -> RawAdvertisement {
    RawAdvertisement::new(address, -55, vec![0x02, 0x01, 0x06]).with_local_name(mesh)
}

pub fn mesh_params() -> Parameters {
    Parameters {
        connect_timeout_seconds: 10,
        ..Parameters::mesh("home", "secret")
    }
}

/// Let spawned tasks drain their channels without crossing a loop tick.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

pub fn notification(vendor: u16, opcode: u8, source: u16) -> Vec<u8> {
    let mut frame = vec![0u8; 20];
    frame[3..5].copy_from_slice(&source.to_le_bytes());
    frame[7] = opcode;
    frame[8..10].copy_from_slice(&vendor.to_be_bytes());
    frame[10..].copy_from_slice(&[0xA0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    frame
}
