//! # Dashan Protocol
//!
//! 主控与面部/舵机固件之间的串口协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `command`: 命令码、状态码、表情码等枚举
//! - `crc`: CRC8 校验
//! - `frame`: 帧编码/解码
//! - `assembler`: 字节流重组与重同步
//! - `payload`: 各命令的负载布局
//!
//! ## 帧格式
//!
//! ```text
//! [0xAA][cmd:u8][len:u16 LE][payload: len bytes][crc8:u8]
//! ```
//!
//! 多字节字段一律使用小端字节序（Intel）。

pub mod assembler;
pub mod command;
pub mod crc;
pub mod frame;
pub mod payload;

pub use assembler::{AssemblerStats, FrameAssembler, reassemble};
pub use command::{Command, Component, ErrorCode, Expression, RobotState, ServoId};
pub use crc::crc8;
pub use frame::{FRAME_HEADER, FRAME_OVERHEAD, Frame, MAX_PAYLOAD_LEN, decode, encode};
pub use payload::*;

use thiserror::Error;

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Frame too short: {actual} bytes (minimum 5)")]
    FrameTooShort { actual: usize },

    #[error("Bad frame header: 0x{found:02X}")]
    BadHeader { found: u8 },

    #[error("Frame length mismatch: declared payload {declared}, frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Payload too large: {len} bytes (limit {limit})")]
    PayloadTooLarge { len: usize, limit: usize },

    #[error("Invalid payload for {command}: expected at least {expected} bytes, got {actual}")]
    InvalidPayload {
        command: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: &'static str, value: u8 },
}

impl ProtocolError {
    /// 帧格式错误（流中遇到时应丢弃 1 字节并重新同步）
    pub fn is_frame_format(&self) -> bool {
        matches!(
            self,
            ProtocolError::FrameTooShort { .. }
                | ProtocolError::BadHeader { .. }
                | ProtocolError::LengthMismatch { .. }
                | ProtocolError::ChecksumMismatch { .. }
        )
    }
}
