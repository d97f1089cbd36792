//! Panasonic Blu-ray control protocol codec
//!
//! The players expose a single CGI endpoint that accepts form-encoded
//! "image button" bodies and answers with CRLF-separated lines:
//!
//! ```text
//! POST http://<address>/WAN/dvdr/dvdr_ctrl.cgi
//! cCMD_RC_PLAYBACK.x=100&cCMD_RC_PLAYBACK.y=100
//!
//! 00, "", 1\r\n
//! 2,0,0,248,5400,1,8,2,0,00000000\r\n
//! ```
//!
//! Line 0 starts with a two character status code (`00` on success, error
//! responses start with `FE` followed by binary data). On success line 1 is a
//! comma separated field list.
//!
//! The codec performs no I/O and never fails: transport errors belong to the
//! caller.

use crate::bus::PlaybackState;

/// Path of the control endpoint on the player
pub const CONTROL_PATH: &str = "/WAN/dvdr/dvdr_ctrl.cgi";

/// Identifying header the players expect from remote-control clients
pub const USER_AGENT: &str = "MEI-LAN-REMOTE-CALL";

const SUCCESS_CODE: &[u8] = b"00";

/// Remote-control keys understood by the players.
///
/// Keys outside this list are still sent; the player decides.
pub const KEYS: &[&str] = &[
    "POWER", "OP_CL", "PLAYBACK", "PAUSE", "STOP", "SKIPFWD", "SKIPREV", "REV", "CUE",
    "SHFWD", "SHREV", "D0", "D1", "D2", "D3", "D4", "D5", "D6", "D7", "D8", "D9", "SHARP",
    "CLEAR", "UP", "DOWN", "LEFT", "RIGHT", "SELECT", "RETURN", "EXIT", "MLTNAVI", "DSPSEL",
    "RED", "GREEN", "BLUE", "YELLOW", "PUPMENU", "MENU", "SETUP", "TITLE", "TITLEONOFF",
    "AUDIOSEL", "PLAYBACKINFO", "OSDONOFF", "DETAIL", "PICTMD", "CHROMA", "3D", "NETFLIX",
    "NETWORK", "MNBACK", "MNSKIP",
];

/// Check whether a key is in the known key list
pub fn is_known_key(key: &str) -> bool {
    KEYS.contains(&key)
}

/// Build the control URL for a player address (`host` or `host:port`)
pub fn control_url(address: &str) -> String {
    format!("http://{}{}", address, CONTROL_PATH)
}

/// Encode a raw command name as a form body
pub fn encode_command(name: &str) -> Vec<u8> {
    format!("cCMD_{name}.x=100&cCMD_{name}.y=100").into_bytes()
}

/// Encode a remote-control key press
pub fn encode_key_press(key: &str) -> Vec<u8> {
    encode_command(&format!("RC_{}", key))
}

/// Encode the coarse status query (power/tray state and title times)
pub fn encode_status_query() -> Vec<u8> {
    encode_command("GET_STATUS")
}

/// Encode the playback status query (stop/play/pause and playing time)
pub fn encode_play_status_query() -> Vec<u8> {
    encode_command("PST")
}

/// Result of one control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Player accepted the request; comma separated fields of line 1
    Ok(Vec<String>),
    /// Player could not be reached
    Off,
    /// Player rejected the request
    Error,
}

impl CommandResult {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }
}

/// Decode a raw response body
pub fn decode_response(raw: &[u8]) -> CommandResult {
    let mut lines = split_crlf(raw);

    let status_line = lines.next().unwrap_or_default();
    let code = status_line
        .split(|b| *b == b',')
        .next()
        .unwrap_or_default();
    if code != SUCCESS_CODE {
        return CommandResult::Error;
    }

    let fields = match lines.next() {
        Some(line) if !line.is_empty() => String::from_utf8_lossy(line)
            .split(',')
            .map(|s| s.to_string())
            .collect(),
        _ => Vec::new(),
    };
    CommandResult::Ok(fields)
}

fn split_crlf(raw: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = Some(raw);
    std::iter::from_fn(move || {
        let current = rest?;
        match current.windows(2).position(|w| w == b"\r\n") {
            Some(idx) => {
                rest = Some(&current[idx + 2..]);
                Some(&current[..idx])
            }
            None => {
                rest = None;
                Some(current)
            }
        }
    })
}

// =============================================================================
// Play status derivation
// =============================================================================

/// Combined result of the playback status and coarse status queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayStatus {
    pub state: PlaybackState,
    /// Playing time in seconds
    pub position: u32,
    /// Total title time in seconds
    pub duration: u32,
}

impl PlayStatus {
    pub fn off() -> Self {
        Self {
            state: PlaybackState::Off,
            position: 0,
            duration: 0,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            state: PlaybackState::Unavailable,
            position: 0,
            duration: 0,
        }
    }
}

/// Derive the playback state from the play-status fields and the coarse status.
///
/// Play-status fields: `0` fine state (0 stopped, 1 playing, 2 paused),
/// `1` playing time (-2 without disc).
/// Coarse status fields: `0` (0 standby/playing/paused, 2 stopped/menu),
/// `3` playing time, `4` total time.
///
/// Stopped is also reported in standby, so fine state `0` with coarse state
/// `0` is standby, which folds into off.
pub fn derive_play_status(play_status: &[String], status: &CommandResult) -> PlayStatus {
    let status = match status {
        CommandResult::Ok(fields) => fields,
        CommandResult::Off => return PlayStatus::off(),
        CommandResult::Error => return PlayStatus::unavailable(),
    };

    let coarse = status.first().map(|s| s.trim());
    let state = match play_status.first().map(|s| s.trim()) {
        Some("0") if coarse == Some("0") => PlaybackState::Off,
        Some("0") => PlaybackState::Stopped,
        Some("1") => PlaybackState::Playing,
        Some("2") => PlaybackState::Paused,
        _ => PlaybackState::Unknown,
    };

    PlayStatus {
        state,
        position: time_field(play_status, 1),
        duration: time_field(status, 4),
    }
}

/// Parse a time field, normalizing negative, missing or malformed values to 0
fn time_field(fields: &[String], index: usize) -> u32 {
    fields
        .get(index)
        .and_then(|s| s.trim().parse::<i64>().ok())
        .map(|v| v.clamp(0, u32::MAX as i64) as u32)
        .unwrap_or(0)
}
