//! 各命令的负载布局
//!
//! 所有多字节字段为小端字节序。解析时只检查最小长度，
//! 固件追加的尾部字节会被忽略（例如 GET_STATUS 响应实际为 9 字节，前 7 字节有效）。

use crate::ProtocolError;
use crate::command::{Component, ErrorCode, Expression, RobotState, ServoId};

fn ensure_len(command: &'static str, data: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if data.len() < expected {
        return Err(ProtocolError::InvalidPayload {
            command,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn u16_at(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

/// SET_EXPRESSION: `[expr][brightness][duration_ms u16]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetExpression {
    pub expression: u8,
    pub brightness: u8,
    /// 持续时间（毫秒），0 表示保持
    pub duration_ms: u16,
}

impl SetExpression {
    pub const LEN: usize = 4;

    pub fn new(expression: Expression, brightness: u8) -> Self {
        Self {
            expression: expression.code(),
            brightness,
            duration_ms: 0,
        }
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        let d = self.duration_ms.to_le_bytes();
        [self.expression, self.brightness, d[0], d[1]]
    }

    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len("SET_EXPRESSION", data, Self::LEN)?;
        Ok(Self {
            expression: data[0],
            brightness: data[1],
            duration_ms: u16_at(data, 2),
        })
    }
}

/// SET_SERVO: `[servo_id][angle u16][speed u16]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetServo {
    pub servo: ServoId,
    /// 角度（度）
    pub angle: u16,
    pub speed: u16,
}

impl SetServo {
    pub const LEN: usize = 5;
    pub const DEFAULT_SPEED: u16 = 50;

    pub fn new(servo: ServoId, angle: u16) -> Self {
        Self {
            servo,
            angle,
            speed: Self::DEFAULT_SPEED,
        }
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        let a = self.angle.to_le_bytes();
        let s = self.speed.to_le_bytes();
        [self.servo.into(), a[0], a[1], s[0], s[1]]
    }

    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len("SET_SERVO", data, Self::LEN)?;
        let servo = ServoId::try_from(data[0]).map_err(|_| ProtocolError::InvalidValue {
            field: "ServoId",
            value: data[0],
        })?;
        Ok(Self {
            servo,
            angle: u16_at(data, 1),
            speed: u16_at(data, 3),
        })
    }
}

/// SET_STATE: `[state]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetState {
    pub state: RobotState,
}

impl SetState {
    pub fn encode(&self) -> [u8; 1] {
        [self.state.into()]
    }

    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len("SET_STATE", data, 1)?;
        Ok(Self {
            state: RobotState::from_code(data[0])?,
        })
    }
}

/// SENSOR_DATA（上行）: `[distance u16][proximity][light]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorData {
    /// 距离（毫米）
    pub distance_mm: u16,
    /// 接近标志，非 0 表示有物体靠近
    pub proximity: u8,
    /// 环境光强度
    pub light: u8,
}

impl SensorData {
    pub const LEN: usize = 4;

    pub fn is_near(&self) -> bool {
        self.proximity != 0
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        let d = self.distance_mm.to_le_bytes();
        [d[0], d[1], self.proximity, self.light]
    }

    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len("SENSOR_DATA", data, Self::LEN)?;
        Ok(Self {
            distance_mm: u16_at(data, 0),
            proximity: data[2],
            light: data[3],
        })
    }
}

/// GET_STATUS 响应: `[state][battery][expression][servo_h u16][servo_v u16]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatusReport {
    /// 原始状态码（固件可能上报未登记的值）
    pub state: u8,
    /// 电量百分比
    pub battery: u8,
    pub expression: u8,
    pub servo_h: u16,
    pub servo_v: u16,
}

impl StatusReport {
    pub const LEN: usize = 7;

    pub fn robot_state(&self) -> Option<RobotState> {
        RobotState::try_from(self.state).ok()
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        let h = self.servo_h.to_le_bytes();
        let v = self.servo_v.to_le_bytes();
        [self.state, self.battery, self.expression, h[0], h[1], v[0], v[1]]
    }

    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len("GET_STATUS", data, Self::LEN)?;
        Ok(Self {
            state: data[0],
            battery: data[1],
            expression: data[2],
            servo_h: u16_at(data, 3),
            servo_v: u16_at(data, 5),
        })
    }
}

/// HEARTBEAT（上行）: `[uptime_s u32][free_heap u32]`，运行时间单位为秒
///
/// 空负载的心跳视为单纯的 ping 应答。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    pub uptime_s: Option<u32>,
    pub free_heap: Option<u32>,
}

impl Heartbeat {
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        match data.len() {
            0 => Ok(Self::default()),
            n if n >= 8 => Ok(Self {
                uptime_s: Some(u32::from_le_bytes([data[0], data[1], data[2], data[3]])),
                free_heap: Some(u32::from_le_bytes([data[4], data[5], data[6], data[7]])),
            }),
            n => Err(ProtocolError::InvalidPayload {
                command: "HEARTBEAT",
                expected: 8,
                actual: n,
            }),
        }
    }
}

/// ERROR: `[code][component][detail]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorReport {
    pub code: u8,
    pub component: u8,
    pub detail: u8,
}

impl ErrorReport {
    pub const LEN: usize = 3;

    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::try_from(self.code).ok()
    }

    pub fn component(&self) -> Option<Component> {
        Component::try_from(self.component).ok()
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        [self.code, self.component, self.detail]
    }

    /// 固件在早期版本中可能只发送错误码，缺失字段补 0
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len("ERROR", data, 1)?;
        Ok(Self {
            code: data[0],
            component: data.get(1).copied().unwrap_or(0),
            detail: data.get(2).copied().unwrap_or(0),
        })
    }
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.error_code(), self.component()) {
            (Some(code), Some(component)) => {
                write!(f, "{:?} in {:?} (detail {})", code, component, self.detail)
            },
            _ => write!(
                f,
                "code {} component {} (detail {})",
                self.code, self.component, self.detail
            ),
        }
    }
}

/// PLAY_AUDIO 头部: `[format][sample_rate u16][channels]`，其后为 PCM 数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioHeader {
    pub format: u8,
    pub sample_rate: u16,
    pub channels: u8,
}

impl Default for AudioHeader {
    fn default() -> Self {
        Self {
            format: 1, // PCM16
            sample_rate: 16_000,
            channels: 1,
        }
    }
}

impl AudioHeader {
    pub const LEN: usize = 4;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let r = self.sample_rate.to_le_bytes();
        [self.format, r[0], r[1], self.channels]
    }

    /// 拼接头部与 PCM 数据块
    pub fn with_data(&self, pcm: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN + pcm.len());
        out.extend_from_slice(&self.encode());
        out.extend_from_slice(pcm);
        out
    }

    pub fn parse(data: &[u8]) -> Result<(Self, &[u8]), ProtocolError> {
        ensure_len("PLAY_AUDIO", data, Self::LEN)?;
        Ok((
            Self {
                format: data[0],
                sample_rate: u16_at(data, 1),
                channels: data[3],
            },
            &data[Self::LEN..],
        ))
    }
}

/// 录音/拍照控制动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CaptureAction {
    Stop = 0,
    Start = 1,
}

/// RECORD_CONTROL: `[action][duration_s]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordControl {
    pub action: CaptureAction,
    pub duration_s: u8,
}

impl RecordControl {
    pub fn encode(&self) -> [u8; 2] {
        [self.action as u8, self.duration_s]
    }
}

/// CAMERA_CONTROL: `[action][interval_s]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraControl {
    pub action: CaptureAction,
    pub interval_s: u8,
}

impl CameraControl {
    pub fn encode(&self) -> [u8; 2] {
        [self.action as u8, self.interval_s]
    }
}

/// SET_GAZE: `[x i16][y i16]`，以图像中心为原点的注视偏移
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetGaze {
    pub x: i16,
    pub y: i16,
}

impl SetGaze {
    pub const LEN: usize = 4;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let x = self.x.to_le_bytes();
        let y = self.y.to_le_bytes();
        [x[0], x[1], y[0], y[1]]
    }

    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len("SET_GAZE", data, Self::LEN)?;
        Ok(Self {
            x: i16::from_le_bytes([data[0], data[1]]),
            y: i16::from_le_bytes([data[2], data[3]]),
        })
    }
}
