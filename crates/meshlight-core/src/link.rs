// ── Link-layer collaborator ──
//
// The controller never speaks the mesh wire protocol itself. It drives a
// `LinkController` and receives its asynchronous results as `LinkEvent`s
// through the listener handle installed at start.

use std::time::Duration;

use bytes::Bytes;
use strum::{Display, EnumDiscriminants};
use tokio::sync::mpsc;

use crate::model::{MacAddress, MeshName, Peripheral};

/// A mesh command addressed to one device (or a group address).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub opcode: u8,
    /// Destination mesh address.
    pub address: u16,
    pub params: Bytes,
    /// Caller tag echoed back in the command response.
    pub tag: Option<String>,
}

impl Command {
    pub fn new(opcode: u8, address: u16, params: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            address,
            params: params.into(),
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// Asynchronous result reported by the link layer.
#[derive(Debug, Clone, PartialEq, Eq, EnumDiscriminants)]
#[strum_discriminants(name(LinkEventKind), derive(Display, Hash))]
#[strum_discriminants(strum(serialize_all = "snake_case"))]
pub enum LinkEvent {
    ConnectSuccess { address: MacAddress },
    ConnectFailure { address: MacAddress },
    LoginSuccess,
    LoginFailure,
    ResetMeshSuccess,
    ResetMeshFailure { reason: String },
    OtaProgress { percent: u8 },
    OtaSuccess,
    OtaFailure,
    DeleteSuccess,
    DeleteFailure,
    FirmwareSuccess { version: String },
    FirmwareFailure,
    LtkSuccess,
    LtkFailure,
    /// Raw notification frame, decoded by the controller.
    Notification { frame: Bytes },
    CommandSuccess { command: Command },
    CommandFailure { command: Command },
}

impl LinkEvent {
    pub fn kind(&self) -> LinkEventKind {
        LinkEventKind::from(self)
    }
}

/// Handle through which a [`LinkController`] reports events.
///
/// Emitting after the controller stopped is a silent no-op.
#[derive(Debug, Clone)]
pub struct LinkListener {
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkListener {
    pub(crate) fn new(tx: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, event: LinkEvent) {
        // A closed channel means the dispatcher is gone: the event is late.
        let _ = self.tx.send(event);
    }
}

/// Connect/login/command driver for a single active link.
///
/// Requests return immediately; outcomes arrive later as [`LinkEvent`]s.
/// The connect timeout is enforced by the implementation.
pub trait LinkController: Send + Sync {
    fn set_listener(&self, listener: Option<LinkListener>);

    fn connect(&self, peripheral: &Peripheral, timeout: Duration);
    fn disconnect(&self);
    fn login(&self, mesh_name: &MeshName, password: &MeshName);

    /// Re-provision the logged-in peripheral. The new mesh address is taken
    /// from the peripheral passed to [`connect`](Self::connect).
    fn reset_mesh(&self, mesh_name: &MeshName, password: &MeshName, long_term_key: Option<&[u8]>);

    fn start_ota(&self, firmware: &[u8]);
    fn request_firmware(&self);
    fn delete(&self);

    fn enable_notification(&self);
    fn disable_notification(&self);
    /// Keep-alive query sent by the notification refresher.
    fn update_notification(&self);

    /// Returns `false` if the command could not be queued.
    fn send_command(&self, command: &Command) -> bool;

    fn current_peripheral(&self) -> Option<Peripheral>;
    fn is_logged_in(&self) -> bool;
}
