//! Protocol module: frames, the control command, and endpoint routes.

pub mod control;
pub mod frame;
pub mod route;

pub use control::{classify_device_frame, ConnectPayload, ControlCommand, DeviceFrame};
pub use frame::Frame;
pub use route::Route;
