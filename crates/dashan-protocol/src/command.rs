//! 命令码与各类枚举值

use crate::ProtocolError;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 协议命令码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Command {
    Heartbeat = 0x01,
    SetExpression = 0x02,
    SetServo = 0x03,
    PlayAudio = 0x04,
    RecordAudio = 0x05,
    SendImage = 0x06,
    SetState = 0x07,
    GetStatus = 0x08,
    SensorData = 0x09,
    RecordControl = 0x0A,
    CameraControl = 0x0B,
    SetGaze = 0x0C,
    Error = 0xFF,
}

impl Command {
    /// 命令码（线上字节）
    pub fn code(self) -> u8 {
        self.into()
    }

    /// 日志用名称
    pub fn name(self) -> &'static str {
        match self {
            Command::Heartbeat => "HEARTBEAT",
            Command::SetExpression => "SET_EXPRESSION",
            Command::SetServo => "SET_SERVO",
            Command::PlayAudio => "PLAY_AUDIO",
            Command::RecordAudio => "RECORD_AUDIO",
            Command::SendImage => "SEND_IMAGE",
            Command::SetState => "SET_STATE",
            Command::GetStatus => "GET_STATUS",
            Command::SensorData => "SENSOR_DATA",
            Command::RecordControl => "RECORD_CONTROL",
            Command::CameraControl => "CAMERA_CONTROL",
            Command::SetGaze => "SET_GAZE",
            Command::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), self.code())
    }
}

/// 机器人行为状态
///
/// 任何时刻有且仅有一个当前状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
#[repr(u8)]
pub enum RobotState {
    Sleep = 1,
    Wake = 2,
    Listen = 3,
    Think = 4,
    Talk = 5,
}

impl RobotState {
    pub const ALL: [RobotState; 5] = [
        RobotState::Sleep,
        RobotState::Wake,
        RobotState::Listen,
        RobotState::Think,
        RobotState::Talk,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RobotState::Sleep => "SLEEP",
            RobotState::Wake => "WAKE",
            RobotState::Listen => "LISTEN",
            RobotState::Think => "THINK",
            RobotState::Talk => "TALK",
        }
    }

    /// 按名称解析（不区分大小写）
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.name().eq_ignore_ascii_case(name.trim()))
    }

    /// 与状态绑定的基础表情
    pub fn expression(self) -> Expression {
        match self {
            RobotState::Sleep => Expression::Sleep,
            RobotState::Wake => Expression::Wake,
            RobotState::Listen => Expression::Listen,
            RobotState::Think => Expression::Think,
            RobotState::Talk => Expression::Talk,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, ProtocolError> {
        Self::try_from(code).map_err(|_| ProtocolError::InvalidValue {
            field: "RobotState",
            value: code,
        })
    }
}

impl std::fmt::Display for RobotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 面部表情码（固件表情表）
///
/// `Angry` 与 `Love` 各自独占一个码位。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Expression {
    Sleep = 0x00,
    Wake = 0x01,
    Listen = 0x02,
    Think = 0x03,
    Talk = 0x04,
    Happy = 0x05,
    Sad = 0x06,
    Surprised = 0x07,
    Confused = 0x08,
    Curious = 0x09,
    Shy = 0x0A,
    Angry = 0x0B,
    Love = 0x0C,
    Tired = 0x0D,
    Excited = 0x0E,
    Blank = 0x0F,
}

impl Expression {
    pub fn code(self) -> u8 {
        self.into()
    }

    pub fn from_code(code: u8) -> Result<Self, ProtocolError> {
        Self::try_from(code).map_err(|_| ProtocolError::InvalidValue {
            field: "Expression",
            value: code,
        })
    }
}

/// 舵机编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ServoId {
    /// 水平（pan）
    Horizontal = 1,
    /// 垂直（tilt）
    Vertical = 2,
}

/// 固件错误码（ERROR 帧第 0 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ErrorCode {
    Ok = 0,
    Memory = 1,
    Timeout = 2,
    Sensor = 3,
    Actuator = 4,
    BatteryLow = 5,
    Overheat = 6,
    InvalidParam = 7,
}

/// 报错组件（ERROR 帧第 1 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Component {
    Led = 1,
    Servo = 2,
    Camera = 3,
    Audio = 4,
    Sensor = 5,
}
