//! Command dispatch for the media-player and remote surfaces
//!
//! Maps command identifiers (and simple-command names) onto device commands.

use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

use crate::adapters::protocol::is_known_key;
use crate::adapters::{CommandStatus, DeviceCommand, PanasonicDevice};

/// Simple commands exposed by name, mapped to their remote key
pub const SIMPLE_COMMANDS: &[(&str, &str)] = &[
    ("POWER", "POWER"),
    ("OPEN_CLOSE", "OP_CL"),
    ("PLAY", "PLAYBACK"),
    ("PAUSE", "PAUSE"),
    ("STOP", "STOP"),
    ("SKIP_NEXT", "SKIPFWD"),
    ("SKIP_PREVIOUS", "SKIPREV"),
    ("FAST_FORWARD", "CUE"),
    ("FAST_REVERSE", "REV"),
    ("SEARCH_FORWARD", "SHFWD"),
    ("SEARCH_REVERSE", "SHREV"),
    ("SHARP", "SHARP"),
    ("CLEAR", "CLEAR"),
    ("EXIT", "EXIT"),
    ("HOME_MENU", "MLTNAVI"),
    ("DISPLAY", "DSPSEL"),
    ("POPUP_MENU", "PUPMENU"),
    ("TOP_MENU", "TITLE"),
    ("OSD", "OSDONOFF"),
    ("DETAIL", "DETAIL"),
    ("PICTURE_MODE", "PICTMD"),
    ("CHROMA", "CHROMA"),
    ("3D", "3D"),
    ("NETFLIX", "NETFLIX"),
    ("NETWORK", "NETWORK"),
    ("PLAYBACK_INFO", "PLAYBACKINFO"),
    ("MANUAL_SKIP", "MNSKIP"),
    ("MANUAL_BACK", "MNBACK"),
];

/// Key behind a simple-command name
pub fn simple_command_key(name: &str) -> Option<&'static str> {
    SIMPLE_COMMANDS
        .iter()
        .find(|(command, _)| *command == name)
        .map(|(_, key)| *key)
}

/// Resolve a raw key or simple-command name to a key
fn resolve_key(command: &str) -> Option<&str> {
    if is_known_key(command) {
        Some(command)
    } else {
        simple_command_key(command)
    }
}

// =============================================================================
// Media player
// =============================================================================

/// Device command for a media-player command id
pub fn media_player_command(cmd_id: &str) -> Option<DeviceCommand> {
    let key = |k: &str| Some(DeviceCommand::SendKey(k.to_string()));
    match cmd_id {
        "on" => Some(DeviceCommand::TurnOn),
        "off" => Some(DeviceCommand::TurnOff),
        "toggle" => Some(DeviceCommand::Toggle),
        "play_pause" => Some(DeviceCommand::PlayPause),
        "stop" => Some(DeviceCommand::Stop),
        "eject" => Some(DeviceCommand::Eject),
        "fast_forward" => Some(DeviceCommand::FastForward),
        "rewind" => Some(DeviceCommand::Rewind),
        "channel_up" => Some(DeviceCommand::ChannelUp),
        "channel_down" => Some(DeviceCommand::ChannelDown),
        "cursor_up" => key("UP"),
        "cursor_down" => key("DOWN"),
        "cursor_left" => key("LEFT"),
        "cursor_right" => key("RIGHT"),
        "cursor_enter" => key("SELECT"),
        "back" => key("RETURN"),
        "menu" => key("MENU"),
        "context_menu" => key("PUPMENU"),
        "settings" => key("SETUP"),
        "home" => key("TITLE"),
        "audio_track" => key("AUDIOSEL"),
        "subtitle" => key("TITLEONOFF"),
        "info" => key("PLAYBACKINFO"),
        "function_red" => key("RED"),
        "function_green" => key("GREEN"),
        "function_yellow" => key("YELLOW"),
        "function_blue" => key("BLUE"),
        "next" => key("MNSKIP"),
        "previous" => key("MNBACK"),
        other => {
            if let Some(digit) = other.strip_prefix("digit_") {
                if digit.len() == 1 && digit.chars().all(|c| c.is_ascii_digit()) {
                    return key(&format!("D{}", digit));
                }
            }
            simple_command_key(other).map(|k| DeviceCommand::SendKey(k.to_string()))
        }
    }
}

pub async fn handle_media_player_command(
    device: Option<&PanasonicDevice>,
    cmd_id: &str,
) -> CommandStatus {
    let Some(device) = device else {
        warn!(cmd_id, "No device for media player command");
        return CommandStatus::ServiceUnavailable;
    };
    info!(device_id = device.id(), cmd_id, "Media player command");

    match media_player_command(cmd_id) {
        Some(command) => device.execute(command).await,
        None => CommandStatus::NotImplemented,
    }
}

// =============================================================================
// Remote
// =============================================================================

/// Integer parameter; numeric strings are accepted, empty strings are ignored
fn int_param(params: &Value, name: &str, default: i64) -> i64 {
    match params.get(name) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(default),
        Some(Value::String(s)) if !s.trim().is_empty() => s
            .trim()
            .parse::<f64>()
            .map(|f| f as i64)
            .unwrap_or(default),
        _ => default,
    }
}

/// Upper bound on `repeat`
pub const MAX_REPEAT: i64 = 20;

/// `repeat` param, clamped to `0..=MAX_REPEAT`
fn repeat_count(params: &Value) -> i64 {
    int_param(params, "repeat", 1).clamp(0, MAX_REPEAT)
}

/// Handle a remote command.
///
/// Params: `command` (key or simple command), `sequence` (list of those),
/// `repeat` (default 1) and `delay` (milliseconds after each send).
pub async fn handle_remote_command(
    device: Option<&PanasonicDevice>,
    cmd_id: &str,
    params: &Value,
) -> CommandStatus {
    let Some(device) = device else {
        warn!(cmd_id, "No device for remote command");
        return CommandStatus::ServiceUnavailable;
    };
    info!(device_id = device.id(), cmd_id, %params, "Remote command");

    let repeat = repeat_count(params);
    let mut status = CommandStatus::Ok;
    for _ in 0..repeat {
        status = remote_once(device, cmd_id, params).await;
    }
    status
}

async fn remote_once(device: &PanasonicDevice, cmd_id: &str, params: &Value) -> CommandStatus {
    // Milliseconds, not seconds
    let delay = Duration::from_millis(int_param(params, "delay", 0).max(0) as u64);
    let command = params.get("command").and_then(Value::as_str).unwrap_or("");

    let status = if let Some(key) = resolve_key(command) {
        device.send_key(key).await
    } else {
        match cmd_id {
            "on" => device.turn_on().await,
            "off" => device.turn_off().await,
            "toggle" => device.toggle().await,
            "send_cmd" if command.is_empty() => CommandStatus::BadRequest,
            "send_cmd" => device.send_key(command).await,
            "send_cmd_sequence" => return send_sequence(device, params, delay).await,
            _ => return CommandStatus::NotImplemented,
        }
    };

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    status
}

/// Send every entry of `sequence`; the result is the first failure, if any
async fn send_sequence(device: &PanasonicDevice, params: &Value, delay: Duration) -> CommandStatus {
    let Some(sequence) = params.get("sequence").and_then(Value::as_array) else {
        return CommandStatus::BadRequest;
    };

    let mut result = CommandStatus::Ok;
    for entry in sequence {
        let status = match entry.as_str() {
            Some(command) => device.send_key(resolve_key(command).unwrap_or(command)).await,
            None => CommandStatus::BadRequest,
        };
        if result.is_ok() && !status.is_ok() {
            result = status;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(k: &str) -> Option<DeviceCommand> {
        Some(DeviceCommand::SendKey(k.to_string()))
    }

    #[test]
    fn test_media_player_transport_commands() {
        assert_eq!(media_player_command("on"), Some(DeviceCommand::TurnOn));
        assert_eq!(media_player_command("off"), Some(DeviceCommand::TurnOff));
        assert_eq!(media_player_command("play_pause"), Some(DeviceCommand::PlayPause));
        assert_eq!(media_player_command("eject"), Some(DeviceCommand::Eject));
        assert_eq!(media_player_command("channel_down"), Some(DeviceCommand::ChannelDown));
    }

    #[test]
    fn test_media_player_key_commands() {
        assert_eq!(media_player_command("cursor_enter"), key("SELECT"));
        assert_eq!(media_player_command("back"), key("RETURN"));
        assert_eq!(media_player_command("context_menu"), key("PUPMENU"));
        assert_eq!(media_player_command("home"), key("TITLE"));
        assert_eq!(media_player_command("subtitle"), key("TITLEONOFF"));
        assert_eq!(media_player_command("digit_0"), key("D0"));
        assert_eq!(media_player_command("digit_7"), key("D7"));
        assert_eq!(media_player_command("function_yellow"), key("YELLOW"));
        assert_eq!(media_player_command("next"), key("MNSKIP"));
    }

    #[test]
    fn test_media_player_simple_and_unknown_commands() {
        assert_eq!(media_player_command("OPEN_CLOSE"), key("OP_CL"));
        assert_eq!(media_player_command("TOP_MENU"), key("TITLE"));
        assert_eq!(media_player_command("digit_10"), None);
        assert_eq!(media_player_command("shuffle"), None);
    }

    #[test]
    fn test_int_param_tolerates_strings() {
        let params = json!({"repeat": "3", "delay": "", "hold": 2.7, "bad": "x"});
        assert_eq!(int_param(&params, "repeat", 1), 3);
        assert_eq!(int_param(&params, "delay", 0), 0);
        assert_eq!(int_param(&params, "hold", 0), 2);
        assert_eq!(int_param(&params, "bad", 5), 5);
        assert_eq!(int_param(&params, "missing", 1), 1);
        assert_eq!(int_param(&Value::Null, "repeat", 1), 1);
    }

    #[test]
    fn test_repeat_is_clamped() {
        assert_eq!(repeat_count(&Value::Null), 1);
        assert_eq!(repeat_count(&json!({"repeat": 3})), 3);
        assert_eq!(repeat_count(&json!({"repeat": -4})), 0);
        assert_eq!(repeat_count(&json!({"repeat": 1e9})), MAX_REPEAT);
        assert_eq!(repeat_count(&json!({"repeat": "1000000000"})), MAX_REPEAT);
    }

    #[test]
    fn test_resolve_key() {
        assert_eq!(resolve_key("MENU"), Some("MENU"));
        assert_eq!(resolve_key("POPUP_MENU"), Some("PUPMENU"));
        assert_eq!(resolve_key(""), None);
        assert_eq!(resolve_key("WARP"), None);
    }

    #[tokio::test]
    async fn test_missing_device_is_unavailable() {
        assert_eq!(
            handle_media_player_command(None, "on").await,
            CommandStatus::ServiceUnavailable
        );
        assert_eq!(
            handle_remote_command(None, "send_cmd", &json!({"command": "MENU"})).await,
            CommandStatus::ServiceUnavailable
        );
    }
}
