//! Protocol generation detection
//!
//! Older players (BD) answer both key presses and `GET_STATUS`. UHD players
//! (UB) reject both without a firmware-side unlock, so for them key presses
//! are skipped and a fixed idle status stands in for the coarse status.
//!
//! The generation starts out unknown and is resolved by the first key press
//! or status probe that gets a definite answer. Once resolved it never
//! changes for the life of the session.

use serde::Serialize;

use super::protocol::CommandResult;

/// Coarse status substituted for UB players: playing/paused, no times
pub const IDLE_STATUS: [&str; 5] = ["1", "0", "0", "00000000", "0"];

/// Protocol generation of a player
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVariant {
    /// Not determined yet
    #[default]
    Auto,
    /// BD generation: key presses and status probe supported
    Legacy,
    /// UB generation: neither supported
    Modern,
}

impl ProtocolVariant {
    pub fn supports_key_press(self) -> bool {
        self != Self::Modern
    }

    pub fn supports_status_probe(self) -> bool {
        self != Self::Modern
    }

    pub fn is_resolved(self) -> bool {
        self != Self::Auto
    }

    /// Resolve from a key press result.
    ///
    /// While unknown, a rejected key press marks the player as UB and any
    /// other answer marks it as BD. This includes an unreachable player,
    /// which is the known weak spot of key-press detection.
    pub fn after_key_press(self, result: &CommandResult) -> ProtocolVariant {
        match self {
            Self::Auto if result.is_error() => Self::Modern,
            Self::Auto => Self::Legacy,
            resolved => resolved,
        }
    }

    /// Resolve from a status probe result.
    ///
    /// Returns the new variant and the status to use. A rejected probe while
    /// unknown marks the player as UB and substitutes the idle status; any
    /// other answer, unreachable included, marks it as BD.
    pub fn after_status_probe(self, result: CommandResult) -> (ProtocolVariant, CommandResult) {
        match (self, result) {
            (Self::Auto, CommandResult::Error) => (Self::Modern, idle_status()),
            (Self::Auto, ok) => (Self::Legacy, ok),
            (resolved, result) => (resolved, result),
        }
    }
}

/// Status result substituted when the probe is not supported
pub fn idle_status() -> CommandResult {
    CommandResult::Ok(IDLE_STATUS.iter().map(|s| s.to_string()).collect())
}
