//! Event bus for device notifications
//!
//! Uses tokio::sync::broadcast for pub/sub pattern.
//! Subscribing returns a receiver; dropping the receiver unsubscribes.

pub mod events;

pub use events::{DeviceUpdate, PlaybackState};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Event types that can be published on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BusEvent {
    /// Transport established for a device
    DeviceConnected { device_id: String },
    /// Transport closed for a device
    DeviceDisconnected { device_id: String },
    /// Unrecoverable connection failure
    DeviceError { device_id: String, message: String },
    /// One or more of state/position/duration changed
    DeviceUpdated {
        device_id: String,
        update: DeviceUpdate,
    },
}

impl BusEvent {
    /// Identifier of the device this event concerns
    pub fn device_id(&self) -> &str {
        match self {
            Self::DeviceConnected { device_id }
            | Self::DeviceDisconnected { device_id }
            | Self::DeviceError { device_id, .. }
            | Self::DeviceUpdated { device_id, .. } => device_id,
        }
    }
}

/// Event bus handle for publishing and subscribing
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl EventBus {
    /// Create a new event bus with specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: BusEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    /// Default capacity (256 events)
    fn default() -> Self {
        Self::new(256)
    }
}

/// Shared event bus wrapped in Arc for thread-safe sharing
pub type SharedBus = Arc<EventBus>;

/// Create a new shared event bus
pub fn create_bus() -> SharedBus {
    Arc::new(EventBus::default())
}
