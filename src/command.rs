// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Parsing of inbound control messages.
//!
//! A control message is a JSON object with a `command` string and, for most commands,
//! a nested `message` object carrying the parameters:
//!
//! ```json
//! {"command": "play", "message": {"file": "door.ogg", "channel": 3, "volume": 0.8}}
//! ```
//!
//! Command names are matched case-insensitively.

use std::time::Duration;

use serde_json::{Map, Value};

use crate::audio::{ChannelTarget, Loops};
use crate::samples::PlayRequest;

/// Errors for control messages that can't be turned into a command. No state is
/// changed when one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("message is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message is not a valid object")]
    NotAnObject,

    #[error("message does not have a 'command' property that is a string")]
    MissingCommand,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("{0} requires a 'message' object")]
    MissingMessage(String),

    #[error("{command} requires a '{field}' property")]
    MissingField {
        command: String,
        field: &'static str,
    },

    #[error("{command}: '{field}' must be {expected}")]
    MistypedField {
        command: String,
        field: &'static str,
        expected: &'static str,
    },

    #[error("{command}: invalid channel {channel}")]
    InvalidChannel { command: String, channel: i64 },
}

/// A typed control command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play(PlayRequest),
    StopAll { include_bgm: bool },
    FadeOut {
        channel: ChannelTarget,
        duration: Duration,
    },
    Precache { identifier: String },
    SetChannelVolume { channel: ChannelTarget, volume: f32 },
    Pause { channel: ChannelTarget },
    Resume { channel: ChannelTarget },
    SetMasterVolume { volume: f32 },
}

impl Command {
    /// Parses a raw message payload.
    pub fn from_slice(payload: &[u8]) -> Result<Command, CommandError> {
        let value: Value = serde_json::from_slice(payload)?;
        Command::from_value(&value)
    }

    /// Parses an already decoded JSON message.
    pub fn from_value(value: &Value) -> Result<Command, CommandError> {
        let object = value.as_object().ok_or(CommandError::NotAnObject)?;
        let command = object
            .get("command")
            .and_then(Value::as_str)
            .ok_or(CommandError::MissingCommand)?;
        let params = Params {
            command,
            message: object.get("message").and_then(Value::as_object),
        };

        match command.to_ascii_lowercase().as_str() {
            "play" | "soundplay" => {
                params.require_message()?;
                let channel = params.int("channel")?.unwrap_or(0);
                let channel =
                    usize::try_from(channel).map_err(|_| params.invalid_channel(channel))?;
                let max_length = params
                    .int("maxPlayLength")?
                    .filter(|ms| *ms > 0)
                    .and_then(|ms| u64::try_from(ms).ok())
                    .map(Duration::from_millis);

                Ok(Command::Play(PlayRequest {
                    identifier: params.required_string("file")?.to_string(),
                    channel,
                    loops: if params.bool("loop")?.unwrap_or(false) {
                        Loops::Forever
                    } else {
                        Loops::Once
                    },
                    volume: params.float("volume")?.unwrap_or(1.0),
                    exclusive: params.bool("exclusive")?.unwrap_or(false),
                    bgm: params.bool("bgm")?.unwrap_or(false),
                    max_length,
                    force_reload: params.bool("nocache")?.unwrap_or(false),
                }))
            }
            "stopall" | "soundstopall" => Ok(Command::StopAll {
                include_bgm: params.bool("alsoStopBgm")?.unwrap_or(true),
            }),
            "fadeout" | "soundfadeout" => {
                params.require_message()?;
                let time = params.required_int("time")?;
                Ok(Command::FadeOut {
                    channel: params.target(params.int("channel")?.unwrap_or(-1))?,
                    duration: Duration::from_millis(u64::try_from(time).unwrap_or(0)),
                })
            }
            "precache" | "soundprecache" => {
                params.require_message()?;
                Ok(Command::Precache {
                    identifier: params.required_string("file")?.to_string(),
                })
            }
            "soundsetvolume" => {
                params.require_message()?;
                Ok(Command::SetChannelVolume {
                    channel: params.target(params.required_int("channel")?)?,
                    volume: params.required_float("volume")?,
                })
            }
            "soundpause" => {
                params.require_message()?;
                Ok(Command::Pause {
                    channel: params.target(params.required_int("channel")?)?,
                })
            }
            "soundresume" => {
                params.require_message()?;
                Ok(Command::Resume {
                    channel: params.target(params.required_int("channel")?)?,
                })
            }
            "setmastervolume" => {
                params.require_message()?;
                Ok(Command::SetMasterVolume {
                    volume: params.required_float("volume")?,
                })
            }
            _ => Err(CommandError::UnknownCommand(command.to_string())),
        }
    }
}

/// Typed access to the fields of a command's `message` object. Absent fields are None;
/// present fields of the wrong type are errors.
struct Params<'a> {
    command: &'a str,
    message: Option<&'a Map<String, Value>>,
}

impl<'a> Params<'a> {
    fn require_message(&self) -> Result<(), CommandError> {
        match self.message {
            Some(_) => Ok(()),
            None => Err(CommandError::MissingMessage(self.command.to_string())),
        }
    }

    fn field<T>(
        &self,
        field: &'static str,
        expected: &'static str,
        convert: impl FnOnce(&'a Value) -> Option<T>,
    ) -> Result<Option<T>, CommandError> {
        match self.message.and_then(|message| message.get(field)) {
            None => Ok(None),
            Some(value) => convert(value)
                .map(Some)
                .ok_or_else(|| CommandError::MistypedField {
                    command: self.command.to_string(),
                    field,
                    expected,
                }),
        }
    }

    fn required<T>(&self, field: &'static str, value: Option<T>) -> Result<T, CommandError> {
        value.ok_or_else(|| CommandError::MissingField {
            command: self.command.to_string(),
            field,
        })
    }

    fn string(&self, field: &'static str) -> Result<Option<&'a str>, CommandError> {
        self.field(field, "a string", Value::as_str)
    }

    fn int(&self, field: &'static str) -> Result<Option<i64>, CommandError> {
        self.field(field, "an integer", Value::as_i64)
    }

    fn bool(&self, field: &'static str) -> Result<Option<bool>, CommandError> {
        self.field(field, "a boolean", Value::as_bool)
    }

    /// Any JSON number is accepted for float fields, including integers.
    fn float(&self, field: &'static str) -> Result<Option<f32>, CommandError> {
        self.field(field, "a number", |value| value.as_f64().map(|v| v as f32))
    }

    fn required_string(&self, field: &'static str) -> Result<&'a str, CommandError> {
        self.required(field, self.string(field)?)
    }

    fn required_int(&self, field: &'static str) -> Result<i64, CommandError> {
        self.required(field, self.int(field)?)
    }

    fn required_float(&self, field: &'static str) -> Result<f32, CommandError> {
        self.required(field, self.float(field)?)
    }

    fn target(&self, channel: i64) -> Result<ChannelTarget, CommandError> {
        ChannelTarget::from_wire(channel).ok_or_else(|| self.invalid_channel(channel))
    }

    fn invalid_channel(&self, channel: i64) -> CommandError {
        CommandError::InvalidChannel {
            command: self.command.to_string(),
            channel,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(json: &str) -> Result<Command, CommandError> {
        Command::from_slice(json.as_bytes())
    }

    #[test]
    fn test_play_defaults() {
        let command = parse(r#"{"command": "play", "message": {"file": "a.ogg"}}"#).unwrap();
        assert_eq!(Command::Play(PlayRequest::new("a.ogg")), command);
    }

    #[test]
    fn test_play_all_fields() {
        let command = parse(
            r#"{"command": "soundPlay", "message": {
                "file": "sfx/door.ogg", "channel": 3, "loop": true, "volume": 0.25,
                "exclusive": true, "bgm": true, "maxPlayLength": 1500, "nocache": true
            }}"#,
        )
        .unwrap();

        assert_eq!(
            Command::Play(PlayRequest {
                identifier: "sfx/door.ogg".to_string(),
                channel: 3,
                loops: Loops::Forever,
                volume: 0.25,
                exclusive: true,
                bgm: true,
                max_length: Some(Duration::from_millis(1500)),
                force_reload: true,
            }),
            command
        );
    }

    #[test]
    fn test_play_unbounded_length() {
        let Command::Play(request) =
            parse(r#"{"command": "play", "message": {"file": "a.ogg", "maxPlayLength": -1}}"#)
                .unwrap()
        else {
            panic!("expected play");
        };
        assert_eq!(None, request.max_length);
    }

    #[test]
    fn test_play_zero_length_is_unbounded() {
        let Command::Play(request) =
            parse(r#"{"command": "play", "message": {"file": "a.ogg", "maxPlayLength": 0}}"#)
                .unwrap()
        else {
            panic!("expected play");
        };
        assert_eq!(None, request.max_length);
    }

    #[test]
    fn test_play_integer_volume() {
        let Command::Play(request) =
            parse(r#"{"command": "play", "message": {"file": "a.ogg", "volume": 1}}"#).unwrap()
        else {
            panic!("expected play");
        };
        assert_eq!(1.0, request.volume);
    }

    #[test]
    fn test_play_errors() {
        assert!(matches!(
            parse(r#"{"command": "play"}"#),
            Err(CommandError::MissingMessage(_))
        ));
        assert!(matches!(
            parse(r#"{"command": "play", "message": {"channel": 1}}"#),
            Err(CommandError::MissingField { field: "file", .. })
        ));
        assert!(matches!(
            parse(r#"{"command": "play", "message": {"file": 12}}"#),
            Err(CommandError::MistypedField { field: "file", .. })
        ));
        assert!(matches!(
            parse(r#"{"command": "play", "message": {"file": "a.ogg", "loop": "yes"}}"#),
            Err(CommandError::MistypedField { field: "loop", .. })
        ));
        assert!(matches!(
            parse(r#"{"command": "play", "message": {"file": "a.ogg", "channel": -1}}"#),
            Err(CommandError::InvalidChannel { channel: -1, .. })
        ));
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(
            Command::StopAll { include_bgm: true },
            parse(r#"{"command": "SOUNDSTOPALL"}"#).unwrap()
        );
        assert_eq!(
            Command::StopAll { include_bgm: true },
            parse(r#"{"command": "stopAll"}"#).unwrap()
        );
        assert_eq!(
            Command::Pause {
                channel: ChannelTarget::One(2)
            },
            parse(r#"{"command": "SoundPause", "message": {"channel": 2}}"#).unwrap()
        );
    }

    #[test]
    fn test_fade_out() {
        assert_eq!(
            Command::FadeOut {
                channel: ChannelTarget::All,
                duration: Duration::from_millis(500),
            },
            parse(r#"{"command": "fadeout", "message": {"time": 500}}"#).unwrap()
        );
        assert_eq!(
            Command::FadeOut {
                channel: ChannelTarget::One(4),
                duration: Duration::from_millis(250),
            },
            parse(r#"{"command": "soundFadeOut", "message": {"time": 250, "channel": 4}}"#)
                .unwrap()
        );
        assert!(matches!(
            parse(r#"{"command": "fadeout", "message": {"channel": 4}}"#),
            Err(CommandError::MissingField { field: "time", .. })
        ));
    }

    #[test]
    fn test_precache() {
        assert_eq!(
            Command::Precache {
                identifier: "a.ogg".to_string()
            },
            parse(r#"{"command": "soundPrecache", "message": {"file": "a.ogg"}}"#).unwrap()
        );
    }

    #[test]
    fn test_volume_commands() {
        assert_eq!(
            Command::SetChannelVolume {
                channel: ChannelTarget::One(3),
                volume: 0.5,
            },
            parse(r#"{"command": "soundSetVolume", "message": {"channel": 3, "volume": 0.5}}"#)
                .unwrap()
        );
        assert_eq!(
            Command::SetChannelVolume {
                channel: ChannelTarget::All,
                volume: 0.5,
            },
            parse(r#"{"command": "soundSetVolume", "message": {"channel": -1, "volume": 0.5}}"#)
                .unwrap()
        );
        assert!(matches!(
            parse(r#"{"command": "soundSetVolume", "message": {"volume": 0.5}}"#),
            Err(CommandError::MissingField {
                field: "channel",
                ..
            })
        ));
        assert_eq!(
            Command::SetMasterVolume { volume: 0.75 },
            parse(r#"{"command": "setMasterVolume", "message": {"volume": 0.75}}"#).unwrap()
        );
        assert!(matches!(
            parse(r#"{"command": "setMasterVolume", "message": {}}"#),
            Err(CommandError::MissingField {
                field: "volume",
                ..
            })
        ));
    }

    #[test]
    fn test_resume() {
        assert_eq!(
            Command::Resume {
                channel: ChannelTarget::All
            },
            parse(r#"{"command": "soundResume", "message": {"channel": -1}}"#).unwrap()
        );
        assert!(matches!(
            parse(r#"{"command": "soundResume", "message": {"channel": -7}}"#),
            Err(CommandError::InvalidChannel { channel: -7, .. })
        ));
    }

    #[test]
    fn test_malformed_messages() {
        assert!(matches!(parse("not json"), Err(CommandError::Json(_))));
        assert!(matches!(parse("[1, 2]"), Err(CommandError::NotAnObject)));
        assert!(matches!(
            parse(r#"{"message": {}}"#),
            Err(CommandError::MissingCommand)
        ));
        assert!(matches!(
            parse(r#"{"command": 5}"#),
            Err(CommandError::MissingCommand)
        ));
        assert!(matches!(
            parse(r#"{"command": "explode"}"#),
            Err(CommandError::UnknownCommand(c)) if c == "explode"
        ));
    }
}
