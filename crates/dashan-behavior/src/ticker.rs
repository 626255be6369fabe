//! 固定节拍循环
//!
//! 使用 `crossbeam_channel::tick` 提供节拍，`select!` 同时监听停止通道：
//! 停止请求会立即唤醒循环，而不是等到下一次节拍。

use crate::BehaviorError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, select, tick};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, trace};

/// 停止时等待线程退出的上限
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 在独立线程中按固定周期调用回调
pub struct TickLoop {
    name: String,
    is_running: Arc<AtomicBool>,
    stop_tx: Option<Sender<()>>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl TickLoop {
    /// 启动循环，回调参数为本次节拍的时间
    pub fn spawn<F>(name: &str, period: Duration, mut on_tick: F) -> Result<Self, BehaviorError>
    where
        F: FnMut(Instant) + Send + 'static,
    {
        let is_running = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);

        let handle = {
            let is_running = is_running.clone();
            let thread_name = name.to_string();
            std::thread::Builder::new()
                .name(name.to_string())
                .spawn(move || {
                    let ticker = tick(period);
                    loop {
                        if !is_running.load(Ordering::Acquire) {
                            break;
                        }
                        select! {
                            recv(stop_rx) -> _ => break,
                            recv(ticker) -> msg => match msg {
                                Ok(at) => on_tick(at),
                                Err(_) => break,
                            },
                        }
                    }
                    trace!("{} loop exited", thread_name);
                    drop(done_tx);
                })
                .map_err(|e| BehaviorError::Spawn {
                    name: name.to_string(),
                    message: e.to_string(),
                })?
        };

        Ok(Self {
            name: name.to_string(),
            is_running,
            stop_tx: Some(stop_tx),
            done_rx,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some() && self.is_running.load(Ordering::Acquire)
    }

    /// 请求停止并有界等待线程退出
    pub fn stop(&mut self) {
        self.is_running.store(false, Ordering::Release);
        // 丢弃发送端即唤醒 select!
        self.stop_tx.take();

        let Some(handle) = self.handle.take() else {
            return;
        };
        match self.done_rx.recv_timeout(JOIN_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    error!("{} loop panicked", self.name);
                }
            },
            Err(RecvTimeoutError::Timeout) => {
                error!(
                    "{} loop failed to shut down within {:?}",
                    self.name, JOIN_TIMEOUT
                );
            },
        }
    }
}

impl Drop for TickLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_ticks_at_cadence() {
        let count = Arc::new(AtomicU32::new(0));
        let mut lp = {
            let count = count.clone();
            TickLoop::spawn("test-tick", Duration::from_millis(10), move |_| {
                count.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap()
        };
        std::thread::sleep(Duration::from_millis(105));
        lp.stop();

        let n = count.load(Ordering::Relaxed);
        assert!((5..=12).contains(&n), "ticks: {}", n);
        assert!(!lp.is_running());
    }

    #[test]
    fn test_stop_wakes_immediately() {
        let mut lp = TickLoop::spawn("slow-tick", Duration::from_secs(60), |_| {}).unwrap();
        let started = Instant::now();
        lp.stop();
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_no_ticks_after_stop() {
        let count = Arc::new(AtomicU32::new(0));
        let mut lp = {
            let count = count.clone();
            TickLoop::spawn("stop-tick", Duration::from_millis(5), move |_| {
                count.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap()
        };
        std::thread::sleep(Duration::from_millis(30));
        lp.stop();
        let after_stop = count.load(Ordering::Relaxed);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::Relaxed), after_stop);
    }
}
