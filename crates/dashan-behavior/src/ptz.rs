//! 云台（PTZ）控制
//!
//! 五种模式：
//!
//! | 模式 | 行为 |
//! |------|------|
//! | `Manual` | 依次执行排队的运动，同一时刻只有一个活动运动 |
//! | `AutoTrack` / `GazeFollow` | 按活动跟踪目标相对画面中心的偏移微调云台 |
//! | `RandomIdle` | 每 3s 缓动到下一个空闲位置 |
//! | `SceneScan` | 按固定航点巡视，每个航点停留 1s |
//!
//! 运动在 `t` 时刻的位置为 `lerp(start, target, ease(t / duration))`，
//! 到时后精确落在目标位置。

use crate::BehaviorError;
use crate::actuation::{Actuation, ActuationSource, ActuatorSink, servo_angle};
use crate::easing::Easing;
use crate::ticker::TickLoop;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const IDLE_POSITIONS: [(f64, f64); 5] = [(90.0, 90.0), (70.0, 85.0), (110.0, 95.0), (90.0, 80.0), (90.0, 100.0)];

const SCAN_WAYPOINTS: [(f64, f64); 6] = [
    (60.0, 80.0),
    (90.0, 70.0),
    (120.0, 80.0),
    (120.0, 100.0),
    (90.0, 110.0),
    (60.0, 100.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PtzMode {
    #[default]
    Manual,
    AutoTrack,
    GazeFollow,
    RandomIdle,
    SceneScan,
}

/// 云台位置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PtzPosition {
    pub pan: f64,
    pub tilt: f64,
    pub zoom: f64,
    pub brightness: u8,
    pub timestamp: Instant,
}

impl PtzPosition {
    pub fn new(pan: f64, tilt: f64, zoom: f64, timestamp: Instant) -> Self {
        Self {
            pan,
            tilt,
            zoom,
            brightness: 255,
            timestamp,
        }
    }

    /// 线性插值（亮度保持起点值）
    pub fn interpolate(&self, other: &PtzPosition, t: f64, timestamp: Instant) -> PtzPosition {
        PtzPosition {
            pan: self.pan + (other.pan - self.pan) * t,
            tilt: self.tilt + (other.tilt - self.tilt) * t,
            zoom: self.zoom + (other.zoom - self.zoom) * t,
            brightness: self.brightness,
            timestamp,
        }
    }

    pub fn distance_to(&self, other: &PtzPosition) -> f64 {
        ((self.pan - other.pan).powi(2) + (self.tilt - other.tilt).powi(2) + (self.zoom - other.zoom).powi(2)).sqrt()
    }

    /// 舵机角（取整）
    pub fn servo_angles(&self) -> (u16, u16) {
        (servo_angle(self.pan), servo_angle(self.tilt))
    }
}

/// 各轴范围
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PtzLimits {
    pub pan: (f64, f64),
    pub tilt: (f64, f64),
    pub zoom: (f64, f64),
}

impl Default for PtzLimits {
    fn default() -> Self {
        Self {
            pan: (0.0, 180.0),
            tilt: (0.0, 180.0),
            zoom: (1.0, 10.0),
        }
    }
}

impl PtzLimits {
    pub fn clamp(&self, mut position: PtzPosition) -> PtzPosition {
        position.pan = position.pan.clamp(self.pan.0, self.pan.1);
        position.tilt = position.tilt.clamp(self.tilt.0, self.tilt.1);
        position.zoom = position.zoom.clamp(self.zoom.0, self.zoom.1);
        position
    }
}

/// 一次缓动运动
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PtzMovement {
    pub start: PtzPosition,
    pub target: PtzPosition,
    pub easing: Easing,
    pub duration: Duration,
    pub started_at: Instant,
    pub completed: bool,
}

impl PtzMovement {
    /// 采样 `now` 时刻的位置；到时后标记完成并返回目标位置
    pub fn position_at(&mut self, now: Instant) -> PtzPosition {
        let elapsed = now.saturating_duration_since(self.started_at);
        if elapsed >= self.duration {
            self.completed = true;
            return PtzPosition {
                timestamp: now,
                ..self.target
            };
        }
        let t = elapsed.as_secs_f64() / self.duration.as_secs_f64();
        self.start
            .interpolate(&self.target, self.easing.apply(t), now)
    }
}

/// 外部上报的跟踪目标（画面像素坐标）
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingTarget {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub confidence: f64,
    pub last_seen: Instant,
}

impl TrackingTarget {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn is_stale(&self, now: Instant, max_age: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > max_age
    }
}

/// 云台参数
#[derive(Debug, Clone, PartialEq)]
pub struct PtzConfig {
    pub limits: PtzLimits,
    /// 跟踪时每次微调的增益
    pub gaze_velocity: f64,
    /// 归一化偏移超过此值才调整
    pub tracking_sensitivity: f64,
    pub image_width: f64,
    pub image_height: f64,
    pub target_max_age: Duration,
    pub idle_move: Duration,
    pub idle_interval: Duration,
    pub scan_move: Duration,
    pub scan_dwell: Duration,
}

impl Default for PtzConfig {
    fn default() -> Self {
        Self {
            limits: PtzLimits::default(),
            gaze_velocity: 0.5,
            tracking_sensitivity: 0.3,
            image_width: 640.0,
            image_height: 480.0,
            target_max_age: Duration::from_secs(1),
            idle_move: Duration::from_secs(2),
            idle_interval: Duration::from_secs(3),
            scan_move: Duration::from_secs(3),
            scan_dwell: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ScanPhase {
    Moving(usize),
    Dwell { index: usize, until: Instant },
}

/// 可序列化的状态快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PtzSnapshot {
    pub mode: PtzMode,
    pub pan: f64,
    pub tilt: f64,
    pub zoom: f64,
    pub brightness: u8,
    pub active_target_id: Option<String>,
    pub tracking_targets: usize,
    pub is_moving: bool,
    pub queued_movements: usize,
}

/// 云台状态机
#[derive(Debug, Clone)]
pub struct PtzState {
    config: PtzConfig,
    mode: PtzMode,
    position: PtzPosition,
    active: Option<PtzMovement>,
    queue: VecDeque<PtzMovement>,
    targets: BTreeMap<String, TrackingTarget>,
    active_target: Option<String>,
    idle_index: usize,
    next_idle_at: Option<Instant>,
    scan: Option<ScanPhase>,
}

impl PtzState {
    pub fn new(config: PtzConfig, now: Instant) -> Self {
        Self {
            config,
            mode: PtzMode::Manual,
            position: PtzPosition::new(90.0, 90.0, 1.0, now),
            active: None,
            queue: VecDeque::new(),
            targets: BTreeMap::new(),
            active_target: None,
            idle_index: 0,
            next_idle_at: None,
            scan: None,
        }
    }

    pub fn mode(&self) -> PtzMode {
        self.mode
    }

    pub fn position(&self) -> PtzPosition {
        self.position
    }

    pub fn config(&self) -> &PtzConfig {
        &self.config
    }

    pub fn is_moving(&self) -> bool {
        self.active.is_some()
    }

    /// 云台是否在主动驱动舵机（非手动模式，或有活动运动）
    pub fn is_active(&self) -> bool {
        self.mode != PtzMode::Manual || self.active.is_some()
    }

    /// 切换模式，清空运动与空闲/巡视调度
    pub fn set_mode(&mut self, mode: PtzMode) {
        if self.mode != mode {
            info!("PTZ mode set to {:?}", mode);
        }
        self.mode = mode;
        self.active = None;
        self.queue.clear();
        self.next_idle_at = None;
        self.scan = None;
    }

    /// 手动模式下排队，其余模式替换当前运动
    pub fn move_to(&mut self, pan: f64, tilt: f64, zoom: f64, easing: Easing, duration: Duration, now: Instant) {
        let target = self
            .config
            .limits
            .clamp(PtzPosition {
                pan,
                tilt,
                zoom,
                brightness: self.position.brightness,
                timestamp: now,
            });
        let movement = PtzMovement {
            start: self.position,
            target,
            easing,
            duration,
            started_at: now,
            completed: false,
        };

        if self.mode == PtzMode::Manual && self.active.is_some() {
            self.queue.push_back(movement);
        } else {
            self.active = Some(movement);
        }
    }

    pub fn move_relative(
        &mut self,
        pan_delta: f64,
        tilt_delta: f64,
        zoom_delta: f64,
        easing: Easing,
        duration: Duration,
        now: Instant,
    ) {
        let p = self.position;
        self.move_to(p.pan + pan_delta, p.tilt + tilt_delta, p.zoom + zoom_delta, easing, duration, now);
    }

    /// 立即设置角度（不经过运动）
    pub fn set_pan_tilt(&mut self, pan: f64, tilt: f64, now: Instant) {
        let mut position = self.position;
        position.pan = pan;
        position.tilt = tilt;
        position.timestamp = now;
        self.position = self.config.limits.clamp(position);
    }

    pub fn set_zoom(&mut self, zoom: f64) {
        let (lo, hi) = self.config.limits.zoom;
        self.position.zoom = zoom.clamp(lo, hi);
    }

    pub fn set_brightness(&mut self, brightness: u8) {
        self.position.brightness = brightness;
    }

    /// 添加目标；尚无活动目标时设为活动目标
    pub fn add_target(&mut self, target: TrackingTarget) {
        if self.active_target.is_none() {
            self.active_target = Some(target.id.clone());
        }
        self.targets.insert(target.id.clone(), target);
    }

    /// 更新已存在的目标，未知 id 返回 `false`
    pub fn update_target(&mut self, target: TrackingTarget) -> bool {
        match self.targets.get_mut(&target.id) {
            Some(existing) => {
                *existing = target;
                true
            },
            None => false,
        }
    }

    pub fn remove_target(&mut self, id: &str) -> bool {
        let removed = self.targets.remove(id).is_some();
        if self.active_target.as_deref() == Some(id) {
            self.active_target = self.targets.keys().next().cloned();
        }
        removed
    }

    pub fn set_active_target(&mut self, id: &str) -> bool {
        if self.targets.contains_key(id) {
            self.active_target = Some(id.to_string());
            true
        } else {
            false
        }
    }

    pub fn active_target(&self) -> Option<&TrackingTarget> {
        self.active_target.as_ref().and_then(|id| self.targets.get(id))
    }

    pub fn targets(&self) -> impl Iterator<Item = &TrackingTarget> {
        self.targets.values()
    }

    /// 移除过期目标，返回移除数量
    pub fn clear_stale_targets(&mut self, now: Instant) -> usize {
        let max_age = self.config.target_max_age;
        let stale: Vec<String> = self
            .targets
            .values()
            .filter(|t| t.is_stale(now, max_age))
            .map(|t| t.id.clone())
            .collect();
        for id in &stale {
            debug!("Evicting stale tracking target {}", id);
            self.remove_target(id);
        }
        stale.len()
    }

    /// 回到原点、手动模式并清空全部目标与运动
    pub fn reset(&mut self, now: Instant) {
        self.position = PtzPosition::new(90.0, 90.0, 1.0, now);
        self.set_mode(PtzMode::Manual);
        self.targets.clear();
        self.active_target = None;
        self.idle_index = 0;
    }

    /// 推进一次，返回更新后的位置
    pub fn tick(&mut self, now: Instant) -> PtzPosition {
        match self.mode {
            PtzMode::Manual => self.advance_movement(now),
            PtzMode::AutoTrack | PtzMode::GazeFollow => {
                self.advance_movement(now);
                self.clear_stale_targets(now);
                self.track(now);
            },
            PtzMode::RandomIdle => {
                if self.next_idle_at.is_none_or(|at| now >= at) {
                    let (pan, tilt) = IDLE_POSITIONS[self.idle_index];
                    self.idle_index = (self.idle_index + 1) % IDLE_POSITIONS.len();
                    let zoom = self.position.zoom;
                    self.move_to(pan, tilt, zoom, Easing::EaseInOut, self.config.idle_move, now);
                    self.next_idle_at = Some(now + self.config.idle_interval);
                }
                self.advance_movement(now);
            },
            PtzMode::SceneScan => self.scan(now),
        }
        self.position
    }

    pub fn snapshot(&self) -> PtzSnapshot {
        PtzSnapshot {
            mode: self.mode,
            pan: self.position.pan,
            tilt: self.position.tilt,
            zoom: self.position.zoom,
            brightness: self.position.brightness,
            active_target_id: self.active_target.clone(),
            tracking_targets: self.targets.len(),
            is_moving: self.active.is_some(),
            queued_movements: self.queue.len(),
        }
    }

    fn advance_movement(&mut self, now: Instant) {
        let Some(movement) = self.active.as_mut() else {
            return;
        };
        let mut position = movement.position_at(now);
        position.brightness = self.position.brightness;
        self.position = self.config.limits.clamp(position);

        if movement.completed {
            self.active = self.queue.pop_front().map(|mut next| {
                // 出队时以当前位置和时间重新锚定
                next.start = self.position;
                next.started_at = now;
                next
            });
        }
    }

    fn track(&mut self, now: Instant) {
        let Some(target) = self.active_target() else {
            return;
        };
        let (cx, cy) = target.center();
        let half_w = self.config.image_width / 2.0;
        let half_h = self.config.image_height / 2.0;
        let pan_offset = (cx - half_w) / half_w;
        let tilt_offset = (cy - half_h) / half_h;
        let gain = self.config.gaze_velocity * 5.0;

        let mut position = self.position;
        if pan_offset.abs() > self.config.tracking_sensitivity {
            position.pan += pan_offset * gain;
        }
        if tilt_offset.abs() > self.config.tracking_sensitivity {
            position.tilt += tilt_offset * gain;
        }
        position.timestamp = now;
        self.position = self.config.limits.clamp(position);
    }

    fn scan(&mut self, now: Instant) {
        match self.scan {
            None => self.start_scan_leg(0, now),
            Some(ScanPhase::Moving(index)) => {
                self.advance_movement(now);
                if self.active.is_none() {
                    self.scan = Some(ScanPhase::Dwell {
                        index,
                        until: now + self.config.scan_dwell,
                    });
                }
            },
            Some(ScanPhase::Dwell { index, until }) => {
                if now >= until {
                    self.start_scan_leg((index + 1) % SCAN_WAYPOINTS.len(), now);
                }
            },
        }
    }

    fn start_scan_leg(&mut self, index: usize, now: Instant) {
        let (pan, tilt) = SCAN_WAYPOINTS[index];
        let zoom = self.position.zoom;
        self.move_to(pan, tilt, zoom, Easing::Linear, self.config.scan_move, now);
        self.scan = Some(ScanPhase::Moving(index));
    }
}

/// 云台运行时：~60 Hz 推进 [`PtzState`]，角度变化时写入执行器
pub struct PtzController {
    state: Arc<Mutex<PtzState>>,
    sink: Arc<dyn ActuatorSink>,
    period: Duration,
    tick_loop: Mutex<Option<TickLoop>>,
}

impl PtzController {
    pub fn new(config: PtzConfig, sink: Arc<dyn ActuatorSink>, hz: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(PtzState::new(config, Instant::now()))),
            sink,
            period: Duration::from_secs_f64(1.0 / hz.max(1.0)),
            tick_loop: Mutex::new(None),
        }
    }

    pub fn start(&self) -> Result<(), BehaviorError> {
        let mut tick_loop = self.tick_loop.lock();
        if tick_loop.is_some() {
            return Ok(());
        }
        let state = self.state.clone();
        let sink = self.sink.clone();
        let mut last_sent: Option<(u16, u16)> = None;
        *tick_loop = Some(TickLoop::spawn("dashan-ptz", self.period, move |now| {
            let angles = state.lock().tick(now).servo_angles();
            if last_sent != Some(angles) {
                last_sent = Some(angles);
                sink.apply(Actuation::pan_tilt(ActuationSource::Ptz, angles.0, angles.1));
            }
        })?);
        Ok(())
    }

    pub fn shutdown(&self) {
        if let Some(mut tick_loop) = self.tick_loop.lock().take() {
            tick_loop.stop();
        }
    }

    /// 在锁内对状态机执行操作
    pub fn with_state<R>(&self, f: impl FnOnce(&mut PtzState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn set_mode(&self, mode: PtzMode) {
        self.state.lock().set_mode(mode);
    }

    pub fn mode(&self) -> PtzMode {
        self.state.lock().mode()
    }

    pub fn move_to(&self, pan: f64, tilt: f64, easing: Easing, duration: Duration) {
        let mut state = self.state.lock();
        let zoom = state.position().zoom;
        state.move_to(pan, tilt, zoom, easing, duration, Instant::now());
    }

    pub fn move_relative(&self, pan_delta: f64, tilt_delta: f64, easing: Easing, duration: Duration) {
        self.state
            .lock()
            .move_relative(pan_delta, tilt_delta, 0.0, easing, duration, Instant::now());
    }

    pub fn set_pan_tilt(&self, pan: f64, tilt: f64) {
        self.state.lock().set_pan_tilt(pan, tilt, Instant::now());
    }

    pub fn position(&self) -> PtzPosition {
        self.state.lock().position()
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().is_active()
    }

    pub fn reset(&self) {
        self.state.lock().reset(Instant::now());
    }

    pub fn snapshot(&self) -> PtzSnapshot {
        self.state.lock().snapshot()
    }
}

impl Drop for PtzController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(t0: Instant, ms: u64) -> Instant {
        t0 + Duration::from_millis(ms)
    }

    fn state(t0: Instant) -> PtzState {
        PtzState::new(PtzConfig::default(), t0)
    }

    fn target(id: &str, cx: f64, cy: f64, seen: Instant) -> TrackingTarget {
        TrackingTarget {
            id: id.to_string(),
            x: cx - 20.0,
            y: cy - 20.0,
            width: 40.0,
            height: 40.0,
            confidence: 0.9,
            last_seen: seen,
        }
    }

    #[test]
    fn test_linear_move_samples() {
        let t0 = Instant::now();
        let mut ptz = state(t0);
        ptz.move_to(180.0, 90.0, 1.0, Easing::Linear, Duration::from_secs(1), t0);

        assert_eq!(ptz.tick(at(t0, 500)).pan, 135.0);
        assert!(ptz.is_moving());
        assert_eq!(ptz.tick(at(t0, 1000)).pan, 180.0);
        assert!(!ptz.is_moving());
        assert_eq!(ptz.tick(at(t0, 1500)).pan, 180.0);
    }

    #[test]
    fn test_target_is_clamped() {
        let t0 = Instant::now();
        let mut ptz = state(t0);
        ptz.move_to(250.0, -10.0, 20.0, Easing::EaseOut, Duration::from_millis(100), t0);
        let p = ptz.tick(at(t0, 200));
        assert_eq!((p.pan, p.tilt, p.zoom), (180.0, 0.0, 10.0));
    }

    #[test]
    fn test_manual_queue_runs_in_order() {
        let t0 = Instant::now();
        let mut ptz = state(t0);
        let second = Duration::from_secs(1);
        ptz.move_to(120.0, 90.0, 1.0, Easing::Linear, second, t0);
        ptz.move_to(60.0, 90.0, 1.0, Easing::Linear, second, t0);
        assert_eq!(ptz.snapshot().queued_movements, 1);

        assert_eq!(ptz.tick(at(t0, 1000)).pan, 120.0);
        // 第二段从 120 出发，出队时刻为 1.0s
        assert_eq!(ptz.tick(at(t0, 1500)).pan, 90.0);
        assert_eq!(ptz.tick(at(t0, 2000)).pan, 60.0);
        assert!(!ptz.is_active());
    }

    #[test]
    fn test_tracking_nudges_toward_target() {
        let t0 = Instant::now();
        let mut ptz = state(t0);
        ptz.set_mode(PtzMode::AutoTrack);
        // 画面右侧目标：偏移 (600-320)/320 = 0.875
        ptz.add_target(target("face", 600.0, 240.0, t0));

        let p = ptz.tick(at(t0, 16));
        assert!((p.pan - (90.0 + 0.875 * 2.5)).abs() < 1e-9);
        assert_eq!(p.tilt, 90.0);
    }

    #[test]
    fn test_tracking_dead_zone() {
        let t0 = Instant::now();
        let mut ptz = state(t0);
        ptz.set_mode(PtzMode::GazeFollow);
        ptz.add_target(target("face", 380.0, 260.0, t0));
        let p = ptz.tick(at(t0, 16));
        assert_eq!((p.pan, p.tilt), (90.0, 90.0));
    }

    #[test]
    fn test_stale_targets_are_evicted() {
        let t0 = Instant::now();
        let mut ptz = state(t0);
        ptz.set_mode(PtzMode::AutoTrack);
        ptz.add_target(target("old", 600.0, 240.0, t0));
        ptz.add_target(target("new", 40.0, 240.0, at(t0, 1500)));
        assert_eq!(ptz.active_target().unwrap().id, "old");

        ptz.tick(at(t0, 1600));
        assert_eq!(ptz.targets().count(), 1);
        assert_eq!(ptz.active_target().unwrap().id, "new");
        assert!(ptz.position().pan < 90.0);
    }

    #[test]
    fn test_target_bookkeeping() {
        let t0 = Instant::now();
        let mut ptz = state(t0);
        assert!(!ptz.update_target(target("ghost", 0.0, 0.0, t0)));
        ptz.add_target(target("a", 0.0, 0.0, t0));
        ptz.add_target(target("b", 0.0, 0.0, t0));
        assert!(ptz.set_active_target("b"));
        assert!(!ptz.set_active_target("zzz"));
        assert!(ptz.remove_target("b"));
        assert_eq!(ptz.active_target().unwrap().id, "a");
        assert_eq!(ptz.clear_stale_targets(at(t0, 5000)), 1);
        assert!(ptz.active_target().is_none());
    }

    #[test]
    fn test_random_idle_cycles_positions() {
        let t0 = Instant::now();
        let mut ptz = state(t0);
        ptz.set_mode(PtzMode::RandomIdle);

        ptz.tick(t0);
        let p = ptz.tick(at(t0, 2000));
        assert_eq!((p.pan, p.tilt), (90.0, 90.0));

        ptz.tick(at(t0, 3000));
        let p = ptz.tick(at(t0, 5000));
        assert_eq!((p.pan, p.tilt), (70.0, 85.0));
        // ease-in-out 中点
        ptz.tick(at(t0, 6000));
        let p = ptz.tick(at(t0, 7000));
        assert!((p.pan - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_scene_scan_dwells_between_waypoints() {
        let t0 = Instant::now();
        let mut ptz = state(t0);
        ptz.set_mode(PtzMode::SceneScan);

        ptz.tick(t0);
        let p = ptz.tick(at(t0, 3000));
        assert_eq!((p.pan, p.tilt), (60.0, 80.0));

        // 停留期间不动
        let p = ptz.tick(at(t0, 3500));
        assert_eq!((p.pan, p.tilt), (60.0, 80.0));
        assert!(!ptz.is_moving());

        ptz.tick(at(t0, 4000));
        assert!(ptz.is_moving());
        let p = ptz.tick(at(t0, 7000));
        assert_eq!((p.pan, p.tilt), (90.0, 70.0));
    }

    #[test]
    fn test_set_mode_clears_motion() {
        let t0 = Instant::now();
        let mut ptz = state(t0);
        ptz.move_to(10.0, 10.0, 1.0, Easing::Linear, Duration::from_secs(1), t0);
        ptz.move_to(20.0, 20.0, 1.0, Easing::Linear, Duration::from_secs(1), t0);
        ptz.set_mode(PtzMode::Manual);
        assert!(!ptz.is_moving());
        assert_eq!(ptz.snapshot().queued_movements, 0);
    }

    #[test]
    fn test_non_manual_move_replaces() {
        let t0 = Instant::now();
        let mut ptz = state(t0);
        ptz.set_mode(PtzMode::GazeFollow);
        ptz.move_to(10.0, 90.0, 1.0, Easing::Linear, Duration::from_secs(1), t0);
        ptz.move_to(170.0, 90.0, 1.0, Easing::Linear, Duration::from_secs(1), t0);
        assert_eq!(ptz.snapshot().queued_movements, 0);
        assert_eq!(ptz.tick(at(t0, 1000)).pan, 170.0);
    }

    #[test]
    fn test_reset_and_setters() {
        let t0 = Instant::now();
        let mut ptz = state(t0);
        ptz.set_pan_tilt(200.0, 45.0, t0);
        ptz.set_zoom(0.5);
        ptz.set_brightness(120);
        let p = ptz.position();
        assert_eq!((p.pan, p.tilt, p.zoom, p.brightness), (180.0, 45.0, 1.0, 120));

        ptz.set_mode(PtzMode::SceneScan);
        ptz.add_target(target("a", 0.0, 0.0, t0));
        ptz.reset(t0);
        let snap = ptz.snapshot();
        assert_eq!(snap.mode, PtzMode::Manual);
        assert_eq!((snap.pan, snap.tilt), (90.0, 90.0));
        assert_eq!(snap.tracking_targets, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let t0 = Instant::now();
        let ptz = state(t0);
        let json = serde_json::to_value(ptz.snapshot()).unwrap();
        assert_eq!(json["mode"], "manual");
        assert_eq!(json["pan"], 90.0);
    }
}
