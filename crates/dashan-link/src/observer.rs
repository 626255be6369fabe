//! 非请求上行帧的类型化观察者
//!
//! 读线程把没有同步等待者的帧按命令码解析为具体负载，再分发给已注册的观察者。
//! 每类事件一个方法，默认空实现，观察者只需覆盖关心的事件。
//!
//! # 性能要求
//!
//! 回调在读线程中同步执行，实现必须尽快返回，耗时工作应转交给自己的线程。

use dashan_protocol::{Command, ErrorReport, Frame, Heartbeat, SensorData, StatusReport};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{trace, warn};

pub trait LinkObserver: Send + Sync {
    fn on_heartbeat(&self, _heartbeat: &Heartbeat) {}

    /// 固件主动上报的状态（未被 `get_status` 请求消费）
    fn on_status(&self, _status: &StatusReport) {}

    fn on_sensor(&self, _sensor: &SensorData) {}

    /// RECORD_AUDIO 上行的录音数据块
    fn on_audio_chunk(&self, _data: &[u8]) {}

    /// SEND_IMAGE 上行的图像数据块
    fn on_image_chunk(&self, _data: &[u8]) {}

    fn on_error(&self, _report: &ErrorReport) {}

    /// 其余命令与未登记的命令码
    fn on_frame(&self, _frame: &Frame) {}
}

/// 观察者注册表
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<Arc<dyn LinkObserver>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn LinkObserver>) {
        self.observers.write().push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// 解析并分发一帧；负载格式错误时记录告警并丢弃
    pub fn dispatch(&self, frame: &Frame) {
        let observers = self.observers.read();
        if observers.is_empty() {
            trace!("No observer for frame 0x{:02X}", frame.cmd);
            return;
        }

        match frame.command() {
            Some(Command::Heartbeat) => match Heartbeat::parse(&frame.payload) {
                Ok(hb) => observers.iter().for_each(|o| o.on_heartbeat(&hb)),
                Err(e) => warn!("Dropping heartbeat: {}", e),
            },
            Some(Command::GetStatus) => match StatusReport::parse(&frame.payload) {
                Ok(status) => observers.iter().for_each(|o| o.on_status(&status)),
                Err(e) => warn!("Dropping status report: {}", e),
            },
            Some(Command::SensorData) => match SensorData::parse(&frame.payload) {
                Ok(sensor) => observers.iter().for_each(|o| o.on_sensor(&sensor)),
                Err(e) => warn!("Dropping sensor data: {}", e),
            },
            Some(Command::RecordAudio) => {
                observers.iter().for_each(|o| o.on_audio_chunk(&frame.payload))
            },
            Some(Command::SendImage) => {
                observers.iter().for_each(|o| o.on_image_chunk(&frame.payload))
            },
            Some(Command::Error) => match ErrorReport::parse(&frame.payload) {
                Ok(report) => {
                    warn!("Firmware reported error: {}", report);
                    observers.iter().for_each(|o| o.on_error(&report))
                },
                Err(e) => warn!("Dropping error report: {}", e),
            },
            _ => observers.iter().for_each(|o| o.on_frame(frame)),
        }
    }
}
