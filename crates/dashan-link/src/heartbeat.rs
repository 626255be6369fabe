//! 链路活性监测
//!
//! 记录最近一次收到任意有效帧的时间。固件周期性发送 HEARTBEAT，
//! 因此长时间无上行帧即可认为对端失联。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static LINK_EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *LINK_EPOCH.get_or_init(Instant::now)
}

/// 自进程内链路时钟起点以来的微秒数
fn now_us() -> u64 {
    // 保证非 0，0 保留为“从未收到”
    (epoch().elapsed().as_micros() as u64).max(1)
}

/// 上行帧活性监测器
#[derive(Debug)]
pub struct HeartbeatMonitor {
    last_rx_us: AtomicU64,
    timeout: Duration,
}

impl HeartbeatMonitor {
    pub fn new(timeout: Duration) -> Self {
        // 提前初始化时钟起点，避免首次比较时起点晚于记录时间
        let _ = epoch();
        Self {
            last_rx_us: AtomicU64::new(0),
            timeout,
        }
    }

    /// 记录一次上行帧
    pub fn register_rx(&self) {
        self.last_rx_us.store(now_us(), Ordering::Relaxed);
    }

    /// 距最近一次上行帧的时间，从未收到过返回 `None`
    pub fn time_since_last_rx(&self) -> Option<Duration> {
        let last = self.last_rx_us.load(Ordering::Relaxed);
        if last == 0 {
            return None;
        }
        Some(Duration::from_micros(now_us().saturating_sub(last)))
    }

    /// 在超时窗口内收到过上行帧
    pub fn is_alive(&self) -> bool {
        self.time_since_last_rx()
            .is_some_and(|elapsed| elapsed < self.timeout)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
