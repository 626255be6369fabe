//! 执行器输出
//!
//! 三个合成子系统各自在自己的节拍线程中产出 [`Actuation`]，
//! 通过 [`ActuatorSink`] 交给上层的统一写出步骤（去重、优先级、写链路）。

/// 输出来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActuationSource {
    Animation,
    Expression,
    Ptz,
    /// 状态切换副作用与远程命令的直接写
    External,
}

/// 一次执行器输出，`None` 字段表示该来源不关心此通道
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actuation {
    pub source: ActuationSource,
    pub expression: Option<u8>,
    pub brightness: Option<u8>,
    /// 水平角（度）
    pub pan: Option<u16>,
    /// 垂直角（度）
    pub tilt: Option<u16>,
}

impl Actuation {
    pub fn full(source: ActuationSource, expression: u8, brightness: u8, pan: u16, tilt: u16) -> Self {
        Self {
            source,
            expression: Some(expression),
            brightness: Some(brightness),
            pan: Some(pan),
            tilt: Some(tilt),
        }
    }

    /// 只携带云台角度
    pub fn pan_tilt(source: ActuationSource, pan: u16, tilt: u16) -> Self {
        Self {
            source,
            expression: None,
            brightness: None,
            pan: Some(pan),
            tilt: Some(tilt),
        }
    }
}

/// 执行器写出步骤
///
/// 由多个节拍线程并发调用，实现需自行保证线程安全且尽快返回。
pub trait ActuatorSink: Send + Sync {
    fn apply(&self, actuation: Actuation);
}

/// 角度取整并钳位到舵机范围
pub(crate) fn servo_angle(value: f64) -> u16 {
    value.round().clamp(0.0, 180.0) as u16
}
