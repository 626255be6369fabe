//! LinkTransport：读线程、写线程与同步请求
//!
//! - 写线程按提交顺序（FIFO）写出发送队列中的帧
//! - 读线程持续读取字节、重组帧，响应帧交给等待者，其余帧交给观察者
//! - 致命读/写错误会标记链路断开并结束所有等待者，传输层本身不重连

use crate::heartbeat::HeartbeatMonitor;
use crate::metrics::{LinkMetrics, LinkMetricsSnapshot};
use crate::observer::{LinkObserver, ObserverRegistry};
use crate::pending::{PendingTable, RequestId};
use crate::{LinkError, LinkReader, LinkWriter, SplittableLink};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use dashan_protocol::{
    AssemblerStats, AudioHeader, CameraControl, Command, Frame, FrameAssembler, Heartbeat,
    MAX_PAYLOAD_LEN, RecordControl, RobotState, ServoId, SetExpression, SetGaze, SetServo,
    SetState, StatusReport, encode,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// 传输层配置
///
/// # Example
///
/// ```
/// use dashan_link::LinkConfig;
/// use std::time::Duration;
///
/// let config = LinkConfig {
///     response_timeout: Duration::from_millis(500),
///     ..LinkConfig::default()
/// };
/// assert_eq!(config.queue_capacity, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// 同步请求默认超时
    pub response_timeout: Duration,
    /// 发送队列容量
    pub queue_capacity: usize,
    /// 单次读取缓冲大小
    pub read_chunk: usize,
    /// 可接受的最大上行负载（超过视为误命中的帧头）
    pub max_payload: usize,
    /// 写线程空闲检查周期
    pub writer_idle: Duration,
    /// 关闭时等待每个线程退出的上限
    pub join_timeout: Duration,
    /// 上行帧静默多久视为失联
    pub heartbeat_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(2),
            queue_capacity: 64,
            read_chunk: 256,
            max_payload: MAX_PAYLOAD_LEN,
            writer_idle: Duration::from_millis(20),
            join_timeout: Duration::from_secs(2),
            heartbeat_timeout: Duration::from_secs(5),
        }
    }
}

/// 待写出的帧
struct Outbound {
    command: u8,
    bytes: Vec<u8>,
    request: Option<RequestId>,
}

/// 读/写线程与调用方共享的上下文
struct LinkShared {
    pending: PendingTable,
    observers: ObserverRegistry,
    metrics: LinkMetrics,
    heartbeat: HeartbeatMonitor,
    link_up: AtomicBool,
}

impl LinkShared {
    fn mark_down(&self, is_running: &AtomicBool) {
        if self.link_up.swap(false, Ordering::AcqRel) {
            error!("Link marked down");
        }
        is_running.store(false, Ordering::Release);
        self.pending.fail_all(|| LinkError::Unavailable);
    }

    fn dispatch(&self, frame: Frame) {
        self.metrics.rx_frames.fetch_add(1, Ordering::Relaxed);
        self.heartbeat.register_rx();
        trace!(
            "RX cmd=0x{:02X} payload={}",
            frame.cmd,
            hex::encode(&frame.payload)
        );

        if self.pending.resolve(&frame) {
            self.metrics.responses_matched.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.unsolicited_frames.fetch_add(1, Ordering::Relaxed);
            self.observers.dispatch(&frame);
        }
    }
}

/// Extension trait for timeout-capable thread joins
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();
        spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// 串口传输层（对外 API）
pub struct LinkTransport {
    tx: Sender<Outbound>,
    shared: Arc<LinkShared>,
    is_running: Arc<AtomicBool>,
    reader_thread: Option<JoinHandle<()>>,
    writer_thread: Option<JoinHandle<()>>,
    config: LinkConfig,
}

impl LinkTransport {
    /// 拆分链路并启动读/写线程
    pub fn start<L: SplittableLink>(link: L, config: LinkConfig) -> Result<Self, LinkError> {
        let (reader, writer) = link.split()?;

        let shared = Arc::new(LinkShared {
            pending: PendingTable::new(),
            observers: ObserverRegistry::new(),
            metrics: LinkMetrics::new(),
            heartbeat: HeartbeatMonitor::new(config.heartbeat_timeout),
            link_up: AtomicBool::new(true),
        });
        let is_running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = bounded(config.queue_capacity);

        let reader_thread = {
            let shared = shared.clone();
            let is_running = is_running.clone();
            let config = config.clone();
            std::thread::Builder::new()
                .name("dashan-link-rx".into())
                .spawn(move || reader_loop(reader, shared, config, is_running))?
        };

        let writer_thread = {
            let shared = shared.clone();
            let is_running = is_running.clone();
            let idle = config.writer_idle;
            std::thread::Builder::new()
                .name("dashan-link-tx".into())
                .spawn(move || writer_loop(writer, rx, shared, idle, is_running))?
        };

        info!("Link transport started");
        Ok(Self {
            tx,
            shared,
            is_running,
            reader_thread: Some(reader_thread),
            writer_thread: Some(writer_thread),
            config,
        })
    }

    /// 发送一帧
    ///
    /// `wait_response` 为 `true` 时阻塞到匹配的响应到达或 `timeout` 到期；
    /// 超时返回 `CommandTimeout`，不会自动重试。
    pub fn send(
        &self,
        cmd: Command,
        payload: &[u8],
        wait_response: bool,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, LinkError> {
        if !self.is_link_up() {
            return Err(LinkError::Unavailable);
        }

        let bytes = encode(cmd.code(), payload)?;
        let pending = wait_response.then(|| self.shared.pending.register(cmd));
        let outbound = Outbound {
            command: cmd.code(),
            bytes,
            request: pending.as_ref().map(|p| p.id()),
        };

        if let Err(e) = self.tx.try_send(outbound) {
            if let Some(request) = &pending {
                self.shared.pending.cancel(request.id());
            }
            return Err(match e {
                TrySendError::Full(_) => LinkError::QueueFull(self.config.queue_capacity),
                TrySendError::Disconnected(_) => LinkError::ChannelClosed,
            });
        }

        let Some(request) = pending else {
            return Ok(None);
        };

        match request.wait(&self.shared.pending, timeout) {
            Ok(response) => Ok(Some(response)),
            Err(e) => {
                if matches!(e, LinkError::CommandTimeout { .. }) {
                    self.shared
                        .metrics
                        .command_timeouts
                        .fetch_add(1, Ordering::Relaxed);
                    warn!("{}", e);
                }
                Err(e)
            },
        }
    }

    /// 只发送不等待
    pub fn post(&self, cmd: Command, payload: &[u8]) -> Result<(), LinkError> {
        self.send(cmd, payload, false, Duration::ZERO).map(|_| ())
    }

    /// 使用默认超时的同步请求
    pub fn request(&self, cmd: Command, payload: &[u8]) -> Result<Vec<u8>, LinkError> {
        self.send(cmd, payload, true, self.config.response_timeout)?
            .ok_or(LinkError::ChannelClosed)
    }

    pub fn register_observer(&self, observer: Arc<dyn LinkObserver>) {
        self.shared.observers.register(observer);
    }

    pub fn is_link_up(&self) -> bool {
        self.shared.link_up.load(Ordering::Acquire) && self.is_running.load(Ordering::Acquire)
    }

    /// 对端是否在心跳窗口内有上行帧
    pub fn is_peer_alive(&self) -> bool {
        self.shared.heartbeat.is_alive()
    }

    pub fn time_since_last_rx(&self) -> Option<Duration> {
        self.shared.heartbeat.time_since_last_rx()
    }

    pub fn metrics(&self) -> LinkMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    // ============================================================
    // 类型化命令
    // ============================================================

    /// HEARTBEAT 往返
    pub fn ping(&self) -> Result<Heartbeat, LinkError> {
        let payload = self.request(Command::Heartbeat, &[])?;
        Ok(Heartbeat::parse(&payload)?)
    }

    pub fn set_expression(&self, payload: SetExpression) -> Result<(), LinkError> {
        self.post(Command::SetExpression, &payload.encode())
    }

    pub fn set_servo(&self, payload: SetServo) -> Result<(), LinkError> {
        self.post(Command::SetServo, &payload.encode())
    }

    /// 水平、垂直两个舵机各写一帧
    pub fn set_pan_tilt(&self, pan: u16, tilt: u16) -> Result<(), LinkError> {
        self.set_servo(SetServo::new(ServoId::Horizontal, pan))?;
        self.set_servo(SetServo::new(ServoId::Vertical, tilt))
    }

    /// `confirm` 为 `true` 时等待固件回显
    pub fn set_state(&self, state: RobotState, confirm: bool) -> Result<(), LinkError> {
        let payload = SetState { state }.encode();
        if confirm {
            self.request(Command::SetState, &payload).map(|_| ())
        } else {
            self.post(Command::SetState, &payload)
        }
    }

    pub fn get_status(&self) -> Result<StatusReport, LinkError> {
        let payload = self.request(Command::GetStatus, &[])?;
        Ok(StatusReport::parse(&payload)?)
    }

    /// 以固定块大小分帧发送 PCM，每帧携带音频头
    pub fn play_audio(&self, header: AudioHeader, pcm: &[u8], chunk: usize) -> Result<usize, LinkError> {
        let chunk = chunk.clamp(1, MAX_PAYLOAD_LEN - AudioHeader::LEN);
        let mut frames = 0;
        for block in pcm.chunks(chunk) {
            self.post(Command::PlayAudio, &header.with_data(block))?;
            frames += 1;
        }
        debug!("Queued {} audio frame(s), {} bytes", frames, pcm.len());
        Ok(frames)
    }

    pub fn record_control(&self, payload: RecordControl) -> Result<(), LinkError> {
        self.post(Command::RecordControl, &payload.encode())
    }

    pub fn camera_control(&self, payload: CameraControl) -> Result<(), LinkError> {
        self.post(Command::CameraControl, &payload.encode())
    }

    pub fn set_gaze(&self, payload: SetGaze) -> Result<(), LinkError> {
        self.post(Command::SetGaze, &payload.encode())
    }

    /// 停止读/写线程（有界等待）
    pub fn shutdown(&mut self) {
        self.is_running.store(false, Ordering::Release);
        self.shared.pending.fail_all(|| LinkError::ChannelClosed);

        let join_timeout = self.config.join_timeout;
        if let Some(handle) = self.reader_thread.take()
            && handle.join_timeout(join_timeout).is_err()
        {
            error!(
                "Link reader panicked or failed to shut down within {:?}",
                join_timeout
            );
        }
        if let Some(handle) = self.writer_thread.take()
            && handle.join_timeout(join_timeout).is_err()
        {
            error!(
                "Link writer panicked or failed to shut down within {:?}",
                join_timeout
            );
        }
    }
}

impl Drop for LinkTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn reader_loop(
    mut reader: impl LinkReader,
    shared: Arc<LinkShared>,
    config: LinkConfig,
    is_running: Arc<AtomicBool>,
) {
    let mut assembler = FrameAssembler::with_max_payload(config.max_payload);
    let mut buf = vec![0u8; config.read_chunk.max(16)];
    let mut last_stats = AssemblerStats::default();

    loop {
        // Acquire: If we see false, we must see all cleanup writes from other threads
        if !is_running.load(Ordering::Acquire) {
            trace!("Link reader: is_running flag is false, exiting");
            break;
        }

        match reader.read(&mut buf) {
            Ok(0) => {
                error!("Link reader: end of stream");
                shared.mark_down(&is_running);
                break;
            },
            Ok(n) => {
                shared.metrics.rx_bytes.fetch_add(n as u64, Ordering::Relaxed);
                assembler.push(&buf[..n]);
            },
            Err(LinkError::Timeout) => continue,
            Err(e) if e.is_fatal() => {
                error!("Link reader: fatal error: {}", e);
                shared.mark_down(&is_running);
                break;
            },
            Err(e) => {
                shared.metrics.read_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Link reader: read error: {}", e);
                continue;
            },
        }

        while let Some(frame) = assembler.next_frame() {
            shared.dispatch(frame);
        }

        let stats = assembler.stats();
        let discarded = stats.discarded_bytes - last_stats.discarded_bytes;
        if discarded > 0 {
            shared
                .metrics
                .resync_discarded_bytes
                .fetch_add(discarded, Ordering::Relaxed);
            debug!("Link reader: resync discarded {} byte(s)", discarded);
        }
        shared.metrics.rejected_frames.fetch_add(
            stats.rejected_candidates - last_stats.rejected_candidates,
            Ordering::Relaxed,
        );
        last_stats = stats;
    }
}

fn writer_loop(
    mut writer: impl LinkWriter,
    rx: Receiver<Outbound>,
    shared: Arc<LinkShared>,
    idle: Duration,
    is_running: Arc<AtomicBool>,
) {
    loop {
        if !is_running.load(Ordering::Acquire) {
            trace!("Link writer: is_running flag is false, exiting");
            break;
        }

        let outbound = match rx.recv_timeout(idle) {
            Ok(outbound) => outbound,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                trace!("Link writer: queue disconnected, exiting");
                break;
            },
        };

        match writer.write_all(&outbound.bytes) {
            Ok(()) => {
                shared.metrics.tx_frames.fetch_add(1, Ordering::Relaxed);
                shared
                    .metrics
                    .tx_bytes
                    .fetch_add(outbound.bytes.len() as u64, Ordering::Relaxed);
                trace!("TX {}", hex::encode(&outbound.bytes));
            },
            Err(e) => {
                shared.metrics.write_errors.fetch_add(1, Ordering::Relaxed);
                let fatal = e.is_fatal();
                error!(
                    "Link writer: failed to write cmd 0x{:02X}: {}",
                    outbound.command, e
                );
                if let Some(id) = outbound.request {
                    shared.pending.fail(id, e);
                }
                if fatal {
                    shared.mark_down(&is_running);
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLink;
    use dashan_protocol::SensorData;
    use parking_lot::Mutex;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_millis(500);

    fn start() -> (LinkTransport, crate::mock::MockPeer) {
        let (link, peer) = MockLink::pair();
        let transport = LinkTransport::start(link, LinkConfig::default()).unwrap();
        (transport, peer)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_fire_and_forget_writes_frame() {
        let (transport, mut peer) = start();
        transport
            .set_expression(SetExpression {
                expression: 5,
                brightness: 255,
                duration_ms: 0,
            })
            .unwrap();

        let frame = peer.next_sent_frame(WAIT).unwrap();
        assert_eq!(frame, Frame::new(Command::SetExpression, vec![5, 255, 0, 0]));
    }

    #[test]
    fn test_writer_preserves_submission_order() {
        let (transport, mut peer) = start();
        for angle in [10u16, 20, 30, 40, 50] {
            transport
                .set_servo(SetServo::new(ServoId::Horizontal, angle))
                .unwrap();
        }

        let angles: Vec<u16> = (0..5)
            .map(|_| {
                let frame = peer.next_sent_frame(WAIT).unwrap();
                SetServo::parse(&frame.payload).unwrap().angle
            })
            .collect();
        assert_eq!(angles, vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_get_status_roundtrip() {
        let (transport, mut peer) = start();
        let transport = Arc::new(transport);

        let caller = {
            let transport = transport.clone();
            std::thread::spawn(move || transport.get_status())
        };

        let request = peer.next_sent_frame(WAIT).unwrap();
        assert_eq!(request.command(), Some(Command::GetStatus));
        peer.inject_frame(Command::GetStatus, &[3, 80, 2, 90, 0, 85, 0, 0, 0]);

        let status = caller.join().unwrap().unwrap();
        assert_eq!(status.battery, 80);
        assert_eq!(status.servo_v, 85);
        assert_eq!(transport.pending_requests(), 0);
        assert!(wait_until(|| transport.metrics().responses_matched == 1));
    }

    #[test]
    fn test_response_split_across_reads() {
        let (transport, mut peer) = start();
        let transport = Arc::new(transport);

        let caller = {
            let transport = transport.clone();
            std::thread::spawn(move || transport.ping())
        };
        peer.next_sent_frame(WAIT).unwrap();

        let mut payload = 1000u32.to_le_bytes().to_vec();
        payload.extend(2048u32.to_le_bytes());
        let bytes = encode(Command::Heartbeat.code(), &payload).unwrap();
        // 前导噪声 + 逐字节送达
        peer.inject_bytes(&[0x00, 0x55]);
        for b in &bytes {
            peer.inject_bytes(&[*b]);
        }

        let hb = caller.join().unwrap().unwrap();
        assert_eq!(hb.uptime_s, Some(1000));
        assert!(wait_until(|| transport.metrics().resync_discarded_bytes == 2));
    }

    #[test]
    fn test_command_timeout() {
        let (transport, _peer) = start();
        let result = transport.send(Command::GetStatus, &[], true, Duration::from_millis(30));
        assert!(matches!(
            result,
            Err(LinkError::CommandTimeout {
                command: Command::GetStatus,
                ..
            })
        ));
        assert_eq!(transport.pending_requests(), 0);
        assert_eq!(transport.metrics().command_timeouts, 1);
    }

    #[test]
    fn test_remote_error_resolves_request() {
        let (transport, mut peer) = start();
        let transport = Arc::new(transport);

        let caller = {
            let transport = transport.clone();
            std::thread::spawn(move || transport.set_state(RobotState::Think, true))
        };
        peer.next_sent_frame(WAIT).unwrap();
        peer.inject_frame(Command::Error, &[7, 2, 1]);

        match caller.join().unwrap() {
            Err(LinkError::Remote(report)) => assert_eq!(report.detail, 1),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[derive(Default)]
    struct SensorLog(Mutex<Vec<SensorData>>);

    impl LinkObserver for SensorLog {
        fn on_sensor(&self, sensor: &SensorData) {
            self.0.lock().push(*sensor);
        }
    }

    #[test]
    fn test_unsolicited_frames_reach_observers() {
        let (transport, peer) = start();
        let log = Arc::new(SensorLog::default());
        transport.register_observer(log.clone());

        peer.inject_frame(Command::SensorData, &[0x2C, 0x01, 0x01, 0x80]);
        assert!(wait_until(|| !log.0.lock().is_empty()));
        assert!(log.0.lock()[0].is_near());
        assert_eq!(transport.metrics().unsolicited_frames, 1);
        assert!(transport.is_peer_alive());
    }

    #[test]
    fn test_disconnect_marks_link_down() {
        let (transport, mut peer) = start();
        let transport = Arc::new(transport);

        let caller = {
            let transport = transport.clone();
            std::thread::spawn(move || transport.send(Command::GetStatus, &[], true, Duration::from_secs(5)))
        };
        peer.next_sent_frame(WAIT).unwrap();
        peer.disconnect();

        assert!(matches!(caller.join().unwrap(), Err(LinkError::Unavailable)));
        assert!(wait_until(|| !transport.is_link_up()));
        assert!(matches!(
            transport.post(Command::Heartbeat, &[]),
            Err(LinkError::Unavailable)
        ));
    }

    #[test]
    fn test_play_audio_chunks() {
        let (transport, mut peer) = start();
        let pcm = vec![7u8; 10];
        assert_eq!(transport.play_audio(AudioHeader::default(), &pcm, 4).unwrap(), 3);

        let sizes: Vec<usize> = (0..3)
            .map(|_| peer.next_sent_frame(WAIT).unwrap().payload.len())
            .collect();
        assert_eq!(sizes, vec![8, 8, 6]);
    }

    #[test]
    fn test_shutdown_is_bounded() {
        let (mut transport, _peer) = start();
        let started = Instant::now();
        transport.shutdown();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!transport.is_link_up());
    }
}
