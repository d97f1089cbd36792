//! Event payload types shared between the device sessions and their consumers.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// PlaybackState
// =============================================================================

/// Playback state of a player, derived from the status and play-status queries.
///
/// Never set directly by callers: only a status refresh commits a new value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Unknown,
    Unavailable,
    Off,
    Stopped,
    Paused,
    Playing,
}

impl PlaybackState {
    /// States in which the player answers commands with the panel powered up
    pub fn is_on(self) -> bool {
        matches!(self, Self::Stopped | Self::Paused | Self::Playing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Unavailable => "unavailable",
            Self::Off => "off",
            Self::Stopped => "stopped",
            Self::Paused => "paused",
            Self::Playing => "playing",
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// DeviceUpdate
// =============================================================================

/// Changed-fields payload of an update event.
///
/// Only the fields that differ from the previously cached values are set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PlaybackState>,
    /// Playing time in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    /// Total title time in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
}

impl DeviceUpdate {
    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.position.is_none() && self.duration.is_none()
    }
}
