//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Operator command payloads and validation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use mgrid_common::types::Channel;
use mgrid_control::ControlError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("malformed command payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("command payload must be a JSON object")]
    NotAnObject,
    #[error("command field '{field}' must be finite (got {value})")]
    NonFinite { field: &'static str, value: f64 },
    #[error(transparent)]
    Control(#[from] ControlError),
}

/// Asynchronous operator command, tagged by `"type"` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Set one channel's manual offset and pause correction for the resume delay.
    ManualAdjustment {
        channel: Channel,
        value: f64,
        auto_stabilize: bool,
    },
    SetAutoStabilize {
        enabled: bool,
    },
    SetStabilizationMode {
        perfect_mode: bool,
        #[serde(default)]
        destabilize: bool,
    },
}

impl Command {
    /// Parse a JSON payload.
    ///
    /// A `"type"` of `"voltage"` or `"frequency"` is read as a legacy manual
    /// adjustment where `type` names the channel.
    pub fn from_json(payload: &str) -> Result<Self, CommandError> {
        let mut value: Value = serde_json::from_str(payload)?;
        let object = value.as_object_mut().ok_or(CommandError::NotAnObject)?;
        let legacy_channel = object
            .get("type")
            .and_then(Value::as_str)
            .and_then(|tag| tag.parse::<Channel>().ok());
        if let Some(channel) = legacy_channel {
            object.insert("channel".to_owned(), Value::from(channel.as_str()));
            object.insert("type".to_owned(), Value::from("manual_adjustment"));
        }
        let command: Command = serde_json::from_value(value)?;
        command.validate()?;
        Ok(command)
    }

    /// Reject non-finite numeric fields.
    pub fn validate(&self) -> Result<(), CommandError> {
        if let Command::ManualAdjustment { value, .. } = self {
            if !value.is_finite() {
                return Err(CommandError::NonFinite {
                    field: "value",
                    value: *value,
                });
            }
        }
        Ok(())
    }

    /// Wire name, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::ManualAdjustment { .. } => "manual_adjustment",
            Command::SetAutoStabilize { .. } => "set_auto_stabilize",
            Command::SetStabilizationMode { .. } => "set_stabilization_mode",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_commands() {
        let manual = Command::from_json(
            r#"{"type":"manual_adjustment","channel":"voltage","value":10.0,"auto_stabilize":false}"#,
        )
        .unwrap();
        assert_eq!(
            manual,
            Command::ManualAdjustment {
                channel: Channel::Voltage,
                value: 10.0,
                auto_stabilize: false
            }
        );

        let auto = Command::from_json(r#"{"type":"set_auto_stabilize","enabled":true}"#).unwrap();
        assert_eq!(auto, Command::SetAutoStabilize { enabled: true });
        assert_eq!(auto.kind(), "set_auto_stabilize");

        let mode =
            Command::from_json(r#"{"type":"set_stabilization_mode","perfect_mode":true}"#).unwrap();
        assert_eq!(
            mode,
            Command::SetStabilizationMode {
                perfect_mode: true,
                destabilize: false
            }
        );
    }

    #[test]
    fn accepts_legacy_channel_tag() {
        let legacy =
            Command::from_json(r#"{"type":"frequency","value":-0.3,"auto_stabilize":true}"#)
                .unwrap();
        assert_eq!(
            legacy,
            Command::ManualAdjustment {
                channel: Channel::Frequency,
                value: -0.3,
                auto_stabilize: true
            }
        );
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(matches!(
            Command::from_json("[1, 2]"),
            Err(CommandError::NotAnObject)
        ));
        assert!(matches!(
            Command::from_json(r#"{"type":"reboot"}"#),
            Err(CommandError::Malformed(_))
        ));
        assert!(matches!(
            Command::from_json(r#"{"type":"manual_adjustment","channel":"current","value":1,"auto_stabilize":true}"#),
            Err(CommandError::Malformed(_))
        ));
        assert!(matches!(
            Command::from_json(r#"{"type":"set_auto_stabilize"}"#),
            Err(CommandError::Malformed(_))
        ));
        assert!(Command::from_json("not json").is_err());
    }

    #[test]
    fn rejects_non_finite_values() {
        let command = Command::ManualAdjustment {
            channel: Channel::Voltage,
            value: f64::NAN,
            auto_stabilize: true,
        };
        assert!(matches!(
            command.validate(),
            Err(CommandError::NonFinite { field: "value", .. })
        ));
        // JSON has no NaN literal; overflowing numbers are rejected by the parser
        assert!(Command::from_json(
            r#"{"type":"manual_adjustment","channel":"voltage","value":1e999,"auto_stabilize":true}"#
        )
        .is_err());
    }
}
