// ── Notification frame decoding ──
//
// Fixed-offset layout, at least 20 bytes:
//   [3..5)   source mesh address, little-endian
//   [7]      opcode
//   [8..10)  vendor id, big-endian
//   [10..20) parameter block, delivered verbatim

use thiserror::Error;

pub const NOTIFICATION_MIN_LEN: usize = 20;
pub const NOTIFICATION_PAYLOAD_LEN: usize = 10;

/// A decoded device notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationFrame {
    pub opcode: u8,
    pub vendor_id: u16,
    pub source_address: u16,
    pub payload: [u8; NOTIFICATION_PAYLOAD_LEN],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("notification frame too short: {len} bytes")]
    TooShort { len: usize },

    #[error("notification vendor 0x{actual:04x} does not match 0x{expected:04x}")]
    VendorMismatch { expected: u16, actual: u16 },
}

impl NotificationFrame {
    /// Decode `raw` without checking the vendor id.
    pub fn parse(raw: &[u8]) -> Result<Self, FrameError> {
        let Some(frame) = raw.get(..NOTIFICATION_MIN_LEN) else {
            return Err(FrameError::TooShort { len: raw.len() });
        };
        let mut payload = [0u8; NOTIFICATION_PAYLOAD_LEN];
        payload.copy_from_slice(&frame[10..NOTIFICATION_MIN_LEN]);
        Ok(Self {
            opcode: frame[7],
            vendor_id: u16::from_be_bytes([frame[8], frame[9]]),
            source_address: u16::from_le_bytes([frame[3], frame[4]]),
            payload,
        })
    }

    /// Decode `raw`, rejecting frames from another vendor.
    pub fn parse_for_vendor(raw: &[u8], vendor_id: u16) -> Result<Self, FrameError> {
        let frame = Self::parse(raw)?;
        if frame.vendor_id != vendor_id {
            return Err(FrameError::VendorMismatch {
                expected: vendor_id,
                actual: frame.vendor_id,
            });
        }
        Ok(frame)
    }
}
