//! 链路统计计数器
//!
//! 全部使用 `Relaxed` 原子操作，读线程/写线程/调用方各自累加，互不阻塞。

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct LinkMetrics {
    /// 读取的原始字节数
    pub rx_bytes: AtomicU64,
    /// 重组成功的上行帧
    pub rx_frames: AtomicU64,
    /// 写出的字节数
    pub tx_bytes: AtomicU64,
    /// 写出的帧
    pub tx_frames: AtomicU64,
    /// 重同步丢弃的字节
    pub resync_discarded_bytes: AtomicU64,
    /// 被拒绝的候选帧（校验/长度）
    pub rejected_frames: AtomicU64,
    /// 交付给同步等待者的响应
    pub responses_matched: AtomicU64,
    /// 分发给观察者的非请求帧
    pub unsolicited_frames: AtomicU64,
    /// 同步请求超时次数
    pub command_timeouts: AtomicU64,
    /// 读错误（非致命）
    pub read_errors: AtomicU64,
    /// 写错误
    pub write_errors: AtomicU64,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> LinkMetricsSnapshot {
        LinkMetricsSnapshot {
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_frames: self.rx_frames.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_frames: self.tx_frames.load(Ordering::Relaxed),
            resync_discarded_bytes: self.resync_discarded_bytes.load(Ordering::Relaxed),
            rejected_frames: self.rejected_frames.load(Ordering::Relaxed),
            responses_matched: self.responses_matched.load(Ordering::Relaxed),
            unsolicited_frames: self.unsolicited_frames.load(Ordering::Relaxed),
            command_timeouts: self.command_timeouts.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
        }
    }
}

/// 某一时刻的计数快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkMetricsSnapshot {
    pub rx_bytes: u64,
    pub rx_frames: u64,
    pub tx_bytes: u64,
    pub tx_frames: u64,
    pub resync_discarded_bytes: u64,
    pub rejected_frames: u64,
    pub responses_matched: u64,
    pub unsolicited_frames: u64,
    pub command_timeouts: u64,
    pub read_errors: u64,
    pub write_errors: u64,
}

impl LinkMetricsSnapshot {
    /// 丢弃字节占接收字节的比例
    pub fn discard_ratio(&self) -> f64 {
        if self.rx_bytes == 0 {
            0.0
        } else {
            self.resync_discarded_bytes as f64 / self.rx_bytes as f64
        }
    }
}
