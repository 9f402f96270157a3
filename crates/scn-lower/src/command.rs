use std::sync::OnceLock;

use regex::Regex;
use scn_core::{CommandChannel, CommandKind, LowerError};

/// A custom command text `Kind:field=value[,field2=value2]` after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub kind: CommandKind,
    pub value: String,
    pub offset: String,
}

pub fn command_channel(raw: &str) -> Option<CommandChannel> {
    match raw.trim() {
        "Command" => Some(CommandChannel::Command),
        "Status" => Some(CommandChannel::Status),
        _ => None,
    }
}

pub fn parse_command(channel: CommandChannel, text: &str) -> Result<ParsedCommand, LowerError> {
    let text = text.trim();
    let Some((kind_name, body)) = text.split_once(':') else {
        return Err(LowerError::UnknownCommand(text.to_string()));
    };
    let kind = command_kind(channel, kind_name.trim())
        .ok_or_else(|| LowerError::UnknownCommand(kind_name.trim().to_string()))?;

    if kind == CommandKind::UserDefine {
        return Ok(ParsedCommand {
            kind,
            value: user_defined_payload(body),
            offset: String::new(),
        });
    }

    // Only the text up to a second ':' carries fields.
    let fields = body.split(':').next().unwrap_or_default();
    let mut values = fields.split(',').map(field_value);
    let value = values.next().unwrap_or_default();
    let offset = values.next().unwrap_or_default();

    Ok(match kind {
        CommandKind::LateralSpeedToLeft
        | CommandKind::LateralSpeedToRight
        | CommandKind::LateralAccelToLeft
        | CommandKind::LateralAccelToRight => ParsedCommand {
            kind,
            value: offset,
            offset: String::new(),
        },
        CommandKind::LaneChange | CommandKind::Overtaking => ParsedCommand {
            kind,
            value,
            offset,
        },
        _ => ParsedCommand {
            kind,
            value,
            offset: String::new(),
        },
    })
}

fn field_value(field: &str) -> String {
    field
        .split_once('=')
        .map(|(_, value)| value.trim().to_string())
        .unwrap_or_default()
}

fn user_defined_payload(body: &str) -> String {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = REGEX.get_or_init(|| {
        Regex::new(r"(?s)^[^=]*=(.*?)(?:,value=0\.0)?$").expect("user command regex must compile")
    });
    regex
        .captures(body)
        .and_then(|captures| captures.get(1))
        .map(|payload| payload.as_str().to_string())
        .unwrap_or_default()
}

fn command_kind(channel: CommandChannel, name: &str) -> Option<CommandKind> {
    if name == "UserDefine" {
        return Some(CommandKind::UserDefine);
    }
    match channel {
        CommandChannel::Command => match name {
            "LaneChange" => Some(CommandKind::LaneChange),
            "Overtaking" => Some(CommandKind::Overtaking),
            "PullOver" => Some(CommandKind::PullOver),
            "EmergencyStop" => Some(CommandKind::EmergencyStop),
            "LateralSpeedToLeft" => Some(CommandKind::LateralSpeedToLeft),
            "LateralSpeedToRight" => Some(CommandKind::LateralSpeedToRight),
            "LateralAccelToLeft" => Some(CommandKind::LateralAccelToLeft),
            "LateralAccelToRight" => Some(CommandKind::LateralAccelToRight),
            _ => None,
        },
        CommandChannel::Status => match name {
            "EmergencyBrake" => Some(CommandKind::EmergencyBrake),
            "VehicleLostControl" => Some(CommandKind::VehicleLostControl),
            "HandsOnSteeringwheel" => Some(CommandKind::HandsOnSteeringwheel),
            "EyesOnRoad" => Some(CommandKind::EyesOnRoad),
            "Lidar" => Some(CommandKind::Lidar),
            "Radar" => Some(CommandKind::Radar),
            "Ultrasonic" => Some(CommandKind::Ultrasonic),
            "Camera" => Some(CommandKind::Camera),
            "Gnss" => Some(CommandKind::Gnss),
            "Imu" => Some(CommandKind::Imu),
            "Localization" => Some(CommandKind::Localization),
            "Beam" => Some(CommandKind::Beam),
            "BrakeLight" => Some(CommandKind::BrakeLight),
            "HazardLight" => Some(CommandKind::HazardLight),
            "LeftTurnLight" => Some(CommandKind::LeftTurnLight),
            "RightTurnLight" => Some(CommandKind::RightTurnLight),
            "DriverSeatbelt" => Some(CommandKind::DriverSeatbelt),
            "PassengerSeatbelt" => Some(CommandKind::PassengerSeatbelt),
            "DriverDoor" => Some(CommandKind::DriverDoor),
            "PassengerDoor" => Some(CommandKind::PassengerDoor),
            "Hood" => Some(CommandKind::Hood),
            "Trunk" => Some(CommandKind::Trunk),
            "ParkingBrake" => Some(CommandKind::ParkingBrake),
            "Wiper" => Some(CommandKind::Wiper),
            "Gear" => Some(CommandKind::Gear),
            "Key" => Some(CommandKind::Key),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_change_command_carries_value_and_offset() {
        let parsed = parse_command(CommandChannel::Command, "LaneChange:value=2,offset=1.5")
            .expect("known command");
        assert_eq!(parsed.kind, CommandKind::LaneChange);
        assert_eq!(parsed.value, "2");
        assert_eq!(parsed.offset, "1.5");
    }

    #[test]
    fn lateral_commands_read_their_value_from_the_second_field() {
        let parsed = parse_command(CommandChannel::Command, "LateralSpeedToLeft:value=0,offset=0.8")
            .expect("known command");
        assert_eq!(parsed.kind, CommandKind::LateralSpeedToLeft);
        assert_eq!(parsed.value, "0.8");
        assert_eq!(parsed.offset, "");
    }

    #[test]
    fn single_field_status_uses_its_value() {
        let parsed =
            parse_command(CommandChannel::Status, "HazardLight:value=1").expect("known status");
        assert_eq!(parsed.kind, CommandKind::HazardLight);
        assert_eq!(parsed.value, "1");
    }

    #[test]
    fn user_define_keeps_payload_without_trailing_value() {
        let parsed = parse_command(
            CommandChannel::Command,
            "UserDefine:data=a=b;c,value=0.0",
        )
        .expect("user define");
        assert_eq!(parsed.kind, CommandKind::UserDefine);
        assert_eq!(parsed.value, "a=b;c");
    }

    #[test]
    fn channel_restricts_known_kinds() {
        assert_eq!(
            parse_command(CommandChannel::Command, "Wiper:value=1"),
            Err(LowerError::UnknownCommand("Wiper".to_string()))
        );
        assert!(parse_command(CommandChannel::Status, "Wiper:value=1").is_ok());
    }

    #[test]
    fn text_without_separator_is_unknown() {
        let error = parse_command(CommandChannel::Command, "LaneChange").expect_err("no colon");
        assert_eq!(error.code(), "UNKNOWN_COMMAND");
    }

    #[test]
    fn missing_equals_yields_empty_value() {
        let parsed =
            parse_command(CommandChannel::Command, "PullOver:now").expect("known command");
        assert_eq!(parsed.value, "");
    }
}
