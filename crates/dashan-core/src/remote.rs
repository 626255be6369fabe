//! 远程命令
//!
//! 外部中继（WebSocket 等）以 JSON 下发：`{"command": "...", "params": {...}}`。
//! `params` 可省略，缺失字段取默认值。

use crate::error::CoreError;
use serde::{Deserialize, Serialize};

fn default_brightness() -> u8 {
    255
}

fn default_servo_angle() -> u16 {
    90
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "params", rename_all = "snake_case")]
pub enum RemoteCommand {
    SetExpression {
        expression_id: u8,
        #[serde(default = "default_brightness")]
        brightness: u8,
    },
    SetServo {
        #[serde(default = "default_servo_angle")]
        servo_h: u16,
        #[serde(default = "default_servo_angle")]
        servo_v: u16,
    },
    PlayAnimation {
        animation: String,
    },
    Speak {
        text: String,
    },
    /// 状态名，大小写不敏感
    SetState {
        state: String,
    },
}

impl RemoteCommand {
    pub const NAMES: [&'static str; 5] = ["set_expression", "set_servo", "play_animation", "speak", "set_state"];

    pub fn name(&self) -> &'static str {
        match self {
            RemoteCommand::SetExpression { .. } => "set_expression",
            RemoteCommand::SetServo { .. } => "set_servo",
            RemoteCommand::PlayAnimation { .. } => "play_animation",
            RemoteCommand::Speak { .. } => "speak",
            RemoteCommand::SetState { .. } => "set_state",
        }
    }

    /// 解析一条 JSON 命令
    ///
    /// 未知命令名返回 `UnknownCommand`，其余解析失败返回 `InvalidCommand`。
    pub fn parse(json: &str) -> Result<Self, CoreError> {
        #[derive(Deserialize)]
        struct Envelope {
            command: String,
            #[serde(default)]
            params: Option<serde_json::Value>,
        }

        let envelope: Envelope =
            serde_json::from_str(json).map_err(|e| CoreError::InvalidCommand(e.to_string()))?;
        if !Self::NAMES.contains(&envelope.command.as_str()) {
            return Err(CoreError::UnknownCommand(envelope.command));
        }

        let params = envelope
            .params
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
        serde_json::from_value(serde_json::json!({
            "command": envelope.command,
            "params": params,
        }))
        .map_err(|e| CoreError::InvalidCommand(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_expression_default_brightness() {
        let cmd = RemoteCommand::parse(r#"{"command":"set_expression","params":{"expression_id":5}}"#).unwrap();
        assert_eq!(
            cmd,
            RemoteCommand::SetExpression {
                expression_id: 5,
                brightness: 255
            }
        );
    }

    #[test]
    fn test_set_servo_defaults_without_params() {
        let cmd = RemoteCommand::parse(r#"{"command":"set_servo"}"#).unwrap();
        assert_eq!(
            cmd,
            RemoteCommand::SetServo {
                servo_h: 90,
                servo_v: 90
            }
        );

        let cmd = RemoteCommand::parse(r#"{"command":"set_servo","params":{"servo_v":45}}"#).unwrap();
        assert_eq!(
            cmd,
            RemoteCommand::SetServo {
                servo_h: 90,
                servo_v: 45
            }
        );
    }

    #[test]
    fn test_text_commands() {
        let cmd = RemoteCommand::parse(r#"{"command":"speak","params":{"text":"你好"}}"#).unwrap();
        assert_eq!(cmd, RemoteCommand::Speak { text: "你好".into() });
        assert_eq!(cmd.name(), "speak");

        let cmd = RemoteCommand::parse(r#"{"command":"set_state","params":{"state":"listen"}}"#).unwrap();
        assert_eq!(cmd, RemoteCommand::SetState { state: "listen".into() });
    }

    #[test]
    fn test_unknown_command() {
        let err = RemoteCommand::parse(r#"{"command":"dance","params":{}}"#).unwrap_err();
        assert!(matches!(err, CoreError::UnknownCommand(ref name) if name == "dance"));
    }

    #[test]
    fn test_invalid_params() {
        let err = RemoteCommand::parse(r#"{"command":"play_animation","params":{}}"#).unwrap_err();
        assert!(matches!(err, CoreError::InvalidCommand(_)));

        let err = RemoteCommand::parse(r#"{"command":"set_expression","params":{"expression_id":300}}"#).unwrap_err();
        assert!(matches!(err, CoreError::InvalidCommand(_)));

        assert!(matches!(
            RemoteCommand::parse("not json").unwrap_err(),
            CoreError::InvalidCommand(_)
        ));
    }

    #[test]
    fn test_serializes_back_to_envelope() {
        let json = serde_json::to_value(RemoteCommand::PlayAnimation {
            animation: "nod".into(),
        })
        .unwrap();
        assert_eq!(json["command"], "play_animation");
        assert_eq!(json["params"]["animation"], "nod");
    }
}
