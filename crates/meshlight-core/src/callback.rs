// ── Public callback surface ──

use crate::link::Command;
use crate::model::{Mode, Peripheral, Status};

/// Error code passed to [`MeshCallback::on_error`] when the radio refuses
/// to start scanning.
pub const SCAN_REFUSED: i32 = -1;

/// Observer for one running operation.
///
/// Installed by every mode-start call and replaced wholesale by the next.
/// All methods default to no-ops. Calls are made from runtime tasks with no
/// controller lock held, so implementations may call back into the
/// controller.
pub trait MeshCallback: Send + Sync {
    /// A peripheral was accepted during a mesh scan. The return value is
    /// advisory.
    fn on_discovered(&self, _peripheral: &Peripheral, _mode: Mode, _raw_record: &[u8]) -> bool {
        true
    }

    fn on_status_changed(&self, _mode: Mode, _old: Option<Status>, _new: Status) {}

    fn on_notify(
        &self,
        _peripheral: Option<&Peripheral>,
        _mode: Mode,
        _opcode: u8,
        _source_address: u16,
        _payload: &[u8; 10],
    ) {
    }

    fn on_command_response(
        &self,
        _peripheral: Option<&Peripheral>,
        _mode: Mode,
        _command: &Command,
        _success: bool,
    ) {
    }

    /// The scanner reported a failure code, or refused to scan
    /// ([`SCAN_REFUSED`]).
    fn on_error(&self, _code: i32) {}
}
