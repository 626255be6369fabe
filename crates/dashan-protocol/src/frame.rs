//! 帧编码/解码
//!
//! ```text
//! +------+-----+--------+--------+-----------------+------+
//! | 0xAA | cmd | len_lo | len_hi | payload (len B) | crc8 |
//! +------+-----+--------+--------+-----------------+------+
//! ```

use crate::ProtocolError;
use crate::command::Command;
use crate::crc::{Crc8Digest, crc8};

/// 帧头标记
pub const FRAME_HEADER: u8 = 0xAA;

/// 固定开销：帧头 + 命令 + 长度(2) + 校验
pub const FRAME_OVERHEAD: usize = 5;

/// 长度字段可表示的最大负载
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// 解码后的协议帧
///
/// `cmd` 保留原始字节，未登记的命令码同样可以解码，
/// 由上层通过 [`Frame::command`] 决定如何处理。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub cmd: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(cmd: Command, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            cmd: cmd.code(),
            payload: payload.into(),
        }
    }

    /// 使用原始命令码构造
    pub fn raw(cmd: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            cmd,
            payload: payload.into(),
        }
    }

    /// 已登记的命令，未知命令码返回 `None`
    pub fn command(&self) -> Option<Command> {
        Command::try_from(self.cmd).ok()
    }

    /// 线上字节长度
    pub fn wire_len(&self) -> usize {
        self.payload.len() + FRAME_OVERHEAD
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self.cmd, &self.payload)
    }
}

/// 编码一帧
///
/// 负载超过 65535 字节时返回 `PayloadTooLarge`。
pub fn encode(cmd: u8, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge {
            len: payload.len(),
            limit: MAX_PAYLOAD_LEN,
        });
    }

    let len = (payload.len() as u16).to_le_bytes();
    let mut out = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    out.push(FRAME_HEADER);
    out.push(cmd);
    out.extend_from_slice(&len);
    out.extend_from_slice(payload);

    let mut digest = Crc8Digest::new();
    digest.update(&out);
    out.push(digest.finalize());
    Ok(out)
}

/// 解码一个完整帧
///
/// 检查顺序：最短长度 → 长度字段 → 校验 → 帧头。
/// 帧头处于校验覆盖范围内，因此任意单比特翻转只会表现为长度或校验错误；
/// 只有校验正确但帧头错误的输入才会返回 `BadHeader`。
pub fn decode(bytes: &[u8]) -> Result<Frame, ProtocolError> {
    if bytes.len() < FRAME_OVERHEAD {
        return Err(ProtocolError::FrameTooShort {
            actual: bytes.len(),
        });
    }

    let declared = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
    if declared + FRAME_OVERHEAD != bytes.len() {
        return Err(ProtocolError::LengthMismatch {
            declared,
            actual: bytes.len() - FRAME_OVERHEAD,
        });
    }

    let (body, trailer) = bytes.split_at(bytes.len() - 1);
    let expected = crc8(body);
    if expected != trailer[0] {
        return Err(ProtocolError::ChecksumMismatch {
            expected,
            actual: trailer[0],
        });
    }

    if bytes[0] != FRAME_HEADER {
        return Err(ProtocolError::BadHeader { found: bytes[0] });
    }

    Ok(Frame {
        cmd: bytes[1],
        payload: body[4..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_set_expression_literal() {
        let bytes = encode(0x02, &[5, 255, 0, 0]).unwrap();
        assert_eq!(bytes, vec![0xAA, 0x02, 0x04, 0x00, 0x05, 0xFF, 0x00, 0x00, 0x17]);
    }

    #[test]
    fn test_encode_empty_payload() {
        let bytes = encode(Command::Heartbeat.code(), &[]).unwrap();
        assert_eq!(bytes, vec![0xAA, 0x01, 0x00, 0x00, 0x08]);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert!(matches!(
            encode(0x04, &payload),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_roundtrip() {
        let frame = Frame::new(Command::SetState, vec![3]);
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(bytes, vec![0xAA, 0x07, 0x01, 0x00, 0x03, 0x2E]);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.command(), Some(Command::SetState));
    }

    #[test]
    fn test_decode_too_short() {
        assert_eq!(
            decode(&[0xAA, 0x01, 0x00]),
            Err(ProtocolError::FrameTooShort { actual: 3 })
        );
    }

    #[test]
    fn test_decode_length_mismatch() {
        let mut bytes = encode(0x02, &[1, 2, 3, 4]).unwrap();
        bytes.pop();
        assert!(matches!(
            decode(&bytes),
            Err(ProtocolError::LengthMismatch {
                declared: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_decode_checksum_mismatch() {
        let mut bytes = encode(0x02, &[1, 2, 3, 4]).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            decode(&bytes),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_bad_header_with_valid_checksum() {
        let mut bytes = vec![0x55, 0x01, 0x00, 0x00];
        bytes.push(crc8(&bytes));
        assert_eq!(decode(&bytes), Err(ProtocolError::BadHeader { found: 0x55 }));
    }

    #[test]
    fn test_unknown_command_still_decodes() {
        let bytes = encode(0x42, &[9]).unwrap();
        let frame = decode(&bytes).unwrap();
        assert_eq!(frame.cmd, 0x42);
        assert_eq!(frame.command(), None);
    }
}
