//! Panasonic Blu-ray player adapter: protocol codec, variant detection,
//! HTTP transport and the device session

pub mod http;
pub mod panasonic;
pub mod protocol;
pub mod traits;
pub mod variant;

pub use panasonic::{DeviceSnapshot, PanasonicDevice, SessionSettings};
pub use protocol::{CommandResult, PlayStatus};
pub use traits::{CommandStatus, Connector, DeviceCommand, Transport, TransportError};
pub use variant::ProtocolVariant;
