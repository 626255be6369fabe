//! 字节流重组
//!
//! 串口只保证字节顺序，不保证帧边界。`FrameAssembler` 缓存任意切分的输入，
//! 逐帧产出校验通过的 [`Frame`]；遇到非帧头字节或校验失败的候选帧时丢弃 1 字节并重新扫描。
//! 输出序列与输入的切分方式无关。

use crate::frame::{FRAME_HEADER, FRAME_OVERHEAD, Frame, MAX_PAYLOAD_LEN, decode};
use bytes::{Buf, BytesMut};

/// 重组统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    /// 成功产出的帧数
    pub frames: u64,
    /// 因重同步而丢弃的字节数
    pub discarded_bytes: u64,
    /// 被拒绝的候选帧（长度越界或校验失败）
    pub rejected_candidates: u64,
}

/// 有状态的帧重组器
#[derive(Debug)]
pub struct FrameAssembler {
    buf: BytesMut,
    max_payload: usize,
    stats: AssemblerStats,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PAYLOAD_LEN)
    }

    /// 指定可接受的最大负载长度
    ///
    /// 声明长度超过上限的候选帧视为误命中的帧头，直接丢弃 1 字节，
    /// 避免为一个伪造的超长帧等待大量字节。
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            max_payload: max_payload.min(MAX_PAYLOAD_LEN),
            stats: AssemblerStats::default(),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// 取出下一帧；缓冲区中没有完整帧时返回 `None`
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if self.buf.is_empty() {
                return None;
            }

            if self.buf[0] != FRAME_HEADER {
                let skip = self
                    .buf
                    .iter()
                    .position(|&b| b == FRAME_HEADER)
                    .unwrap_or(self.buf.len());
                self.discard(skip);
                continue;
            }

            if self.buf.len() < 4 {
                return None;
            }

            let declared = u16::from_le_bytes([self.buf[2], self.buf[3]]) as usize;
            if declared > self.max_payload {
                self.stats.rejected_candidates += 1;
                self.discard(1);
                continue;
            }

            let total = declared + FRAME_OVERHEAD;
            if self.buf.len() < total {
                return None;
            }

            match decode(&self.buf[..total]) {
                Ok(frame) => {
                    self.buf.advance(total);
                    self.stats.frames += 1;
                    return Some(frame);
                },
                Err(_) => {
                    self.stats.rejected_candidates += 1;
                    self.discard(1);
                },
            }
        }
    }

    /// 取出当前缓冲区内的全部完整帧
    pub fn drain_frames(&mut self) -> Vec<Frame> {
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    /// 尚未消费的字节
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    fn discard(&mut self, n: usize) {
        self.buf.advance(n);
        self.stats.discarded_bytes += n as u64;
    }
}

/// 无状态重组：返回缓冲区内解出的帧以及剩余字节
pub fn reassemble(buffer: &[u8]) -> (Vec<Frame>, Vec<u8>) {
    let mut assembler = FrameAssembler::new();
    assembler.push(buffer);
    let frames = assembler.drain_frames();
    (frames, assembler.pending().to_vec())
}
