//! The `getDeviceKey` control command and the key acknowledgment.
//!
//! Frames from a device are normally opaque payload for its clients.  One
//! shape is reserved: a JSON object with a top-level `getDeviceKey` field.
//! The relay answers it on the device's own connection with the same
//! acknowledgment it sends right after the device connects:
//!
//! ```json
//! {"deviceKey":"a1b2c3"}
//! ```
//!
//! # Classification rules
//!
//! | Inbound device frame                               | Result                      |
//! |----------------------------------------------------|-----------------------------|
//! | binary                                             | `Payload`, unchanged        |
//! | text that is not JSON, or JSON but not an object   | `Payload`, unchanged        |
//! | JSON object without `getDeviceKey`                 | `Payload`, unchanged        |
//! | JSON object with `getDeviceKey` only               | `Control`, no remainder     |
//! | JSON object with `getDeviceKey` and other fields   | `Control`, remainder = rest |
//!
//! The value of `getDeviceKey` is ignored.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::key::DeviceKey;
use crate::error::RelayError;
use crate::protocol::frame::Frame;

/// Name of the reserved control field.
pub const GET_DEVICE_KEY_FIELD: &str = "getDeviceKey";

/// Commands a device can address to the relay itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Re-send the `{"deviceKey": ...}` acknowledgment.
    GetDeviceKey,
}

/// A device frame after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFrame {
    /// Forward to bound clients exactly as received.
    Payload(Frame),
    /// Answer locally; forward `remainder` (if any) to bound clients.
    Control {
        command: ControlCommand,
        remainder: Option<Frame>,
    },
}

/// Splits an inbound device frame into control and payload parts.
///
/// Never fails: anything that is not a well-formed control object passes
/// through as payload.
pub fn classify_device_frame(frame: Frame) -> DeviceFrame {
    let Frame::Text(text) = &frame else {
        return DeviceFrame::Payload(frame);
    };

    let mut fields: Map<String, Value> = match serde_json::from_str(text) {
        Ok(fields) => fields,
        Err(_) => return DeviceFrame::Payload(frame),
    };

    if fields.remove(GET_DEVICE_KEY_FIELD).is_none() {
        return DeviceFrame::Payload(frame);
    }

    let remainder = if fields.is_empty() {
        None
    } else {
        Some(Frame::Text(Value::Object(fields).to_string()))
    };

    DeviceFrame::Control {
        command: ControlCommand::GetDeviceKey,
        remainder,
    }
}

/// Acknowledgment carrying a device's key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectPayload {
    #[serde(rename = "deviceKey")]
    pub device_key: DeviceKey,
}

impl ConnectPayload {
    pub fn new(device_key: DeviceKey) -> Self {
        Self { device_key }
    }

    /// Renders the acknowledgment as a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Encode`] if serialisation fails.
    pub fn to_frame(&self) -> Result<Frame, RelayError> {
        Ok(Frame::Text(serde_json::to_string(self)?))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
