use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::bus::PlaybackState;

// =============================================================================
// Transport - request/response channel to one player
// =============================================================================

/// Transport-level failure.
///
/// Any of these means the player could not be talked to; protocol-level
/// rejections are reported through `CommandResult::Error` instead.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("session closed")]
    Closed,
    #[error("device unreachable: {0}")]
    Unreachable(String),
    #[error("request timed out")]
    Timeout,
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("failed to open transport: {0}")]
    Open(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// An open channel to a player.
///
/// Implementations are shared between the poll task and command callers, so
/// requests may be issued concurrently.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Post a form body to `url` and return the raw response body
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, TransportError>;

    /// Release the channel. Default: nothing to release.
    async fn close(&self) {}
}

/// Factory for transports, swapped out in tests.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport to `address` with the given per-request timeout
    async fn open(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn Transport>, TransportError>;
}

// =============================================================================
// Commands
// =============================================================================

/// Command that can be executed against a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Raw remote-control key (without the `RC_` prefix)
    SendKey(String),
    Toggle,
    TurnOn,
    TurnOff,
    PlayPause,
    Play,
    Pause,
    Stop,
    Eject,
    FastForward,
    Rewind,
    ChannelUp,
    ChannelDown,
}

impl DeviceCommand {
    /// Key to send for this command given the current playback state.
    ///
    /// `None` means nothing needs to be sent (e.g. turning on a player that
    /// is already on).
    pub fn key_for(&self, state: PlaybackState) -> Option<&str> {
        match self {
            Self::SendKey(key) => Some(key.as_str()),
            Self::Toggle => Some("POWER"),
            Self::TurnOn if state.is_on() => None,
            Self::TurnOn => Some("POWER"),
            Self::TurnOff if state.is_on() => Some("POWER"),
            Self::TurnOff => None,
            Self::PlayPause if state == PlaybackState::Playing => Some("PAUSE"),
            Self::PlayPause => Some("PLAYBACK"),
            Self::Play => Some("PLAYBACK"),
            Self::Pause => Some("PAUSE"),
            Self::Stop => Some("STOP"),
            Self::Eject => Some("OP_CL"),
            Self::FastForward => Some("CUE"),
            Self::Rewind => Some("REV"),
            Self::ChannelUp => Some("SKIPFWD"),
            Self::ChannelDown => Some("SKIPREV"),
        }
    }
}

/// Outcome reported to command callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Ok,
    BadRequest,
    ServiceUnavailable,
    NotImplemented,
}

impl CommandStatus {
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::BadRequest => "bad_request",
            Self::ServiceUnavailable => "service_unavailable",
            Self::NotImplemented => "not_implemented",
        }
    }
}
