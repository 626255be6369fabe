//! 执行器写出步骤
//!
//! 三个合成子系统和外部直接写都汇到 [`ActuatorApply`]。面部（表情+亮度）与注视（pan/tilt）
//! 两组通道分别仲裁：
//!
//! | 来源 | 面部 | 注视 |
//! |------|------|------|
//! | 动画帧 | 总是 | 总是 |
//! | 外部（状态副作用、远程命令） | 总是 | 总是 |
//! | 云台 | - | 总是（只在角度变化时产生） |
//! | 合成器 | 未播放动画时 | 未播放动画且云台静止时 |
//!
//! 合成器以固定频率重复输出，只有它自己的输出发生变化，或需要收回被动画占用的通道时才会写出。
//! 最后按已写出的值去重，只发送变化的字段。

use crate::telemetry::TelemetryUpdate;
use arc_swap::ArcSwap;
use dashan_behavior::{Actuation, ActuationSource, ActuatorSink, AnimationEngine, PtzController};
use dashan_link::{LinkError, LinkTransport};
use dashan_protocol::{ServoId, SetExpression, SetServo};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{trace, warn};

/// 执行器写出的目标（通常是 [`LinkTransport`]）
pub trait ActuatorLink: Send + Sync {
    fn write_expression(&self, payload: SetExpression) -> Result<(), LinkError>;
    fn write_servo(&self, payload: SetServo) -> Result<(), LinkError>;
}

impl ActuatorLink for LinkTransport {
    fn write_expression(&self, payload: SetExpression) -> Result<(), LinkError> {
        self.set_expression(payload)
    }

    fn write_servo(&self, payload: SetServo) -> Result<(), LinkError> {
        self.set_servo(payload)
    }
}

/// 一次写出的命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActuatorCommand {
    Expression(SetExpression),
    Servo(SetServo),
}

/// 一次仲裁最多产生：表情 + 两个舵机
type CommandBatch = SmallVec<[ActuatorCommand; 3]>;

/// 最近写出的执行器值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActuatorSnapshot {
    pub expression: Option<u8>,
    pub brightness: Option<u8>,
    pub pan: Option<u16>,
    pub tilt: Option<u16>,
}

impl ActuatorSnapshot {
    /// 遥测视图
    pub fn to_telemetry(&self, state: &str) -> TelemetryUpdate {
        TelemetryUpdate {
            state: state.to_string(),
            expression: self.expression.unwrap_or(0),
            brightness: self.brightness.unwrap_or(0),
            servo_h: self.pan.unwrap_or(90),
            servo_v: self.tilt.unwrap_or(90),
            sensor: None,
            emotion: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Face {
    expression: u8,
    brightness: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Gaze {
    pan: u16,
    tilt: u16,
}

#[derive(Debug, Default)]
struct ApplyState {
    written: ActuatorSnapshot,
    face_owner: Option<ActuationSource>,
    gaze_owner: Option<ActuationSource>,
    last_composer_face: Option<Face>,
    last_composer_gaze: Option<Gaze>,
}

/// 执行器仲裁与写出
pub struct ActuatorApply {
    link: Arc<dyn ActuatorLink>,
    state: Mutex<ApplyState>,
    snapshot: ArcSwap<ActuatorSnapshot>,
    composer_enabled: AtomicBool,
    animation: OnceLock<Weak<AnimationEngine>>,
    ptz: OnceLock<Weak<PtzController>>,
    writes: AtomicU64,
    write_failures: AtomicU64,
}

impl ActuatorApply {
    pub fn new(link: Arc<dyn ActuatorLink>) -> Self {
        Self {
            link,
            state: Mutex::new(ApplyState::default()),
            snapshot: ArcSwap::from_pointee(ActuatorSnapshot::default()),
            composer_enabled: AtomicBool::new(false),
            animation: OnceLock::new(),
            ptz: OnceLock::new(),
            writes: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
        }
    }

    /// 关联动画引擎与云台，用于判断通道占用（只能关联一次）
    pub fn attach(&self, animation: &Arc<AnimationEngine>, ptz: &Arc<PtzController>) {
        let _ = self.animation.set(Arc::downgrade(animation));
        let _ = self.ptz.set(Arc::downgrade(ptz));
    }

    /// 是否允许合成器驱动面部与注视
    pub fn set_composer_enabled(&self, enabled: bool) {
        self.composer_enabled.store(enabled, Ordering::Release);
    }

    pub fn composer_enabled(&self) -> bool {
        self.composer_enabled.load(Ordering::Acquire)
    }

    /// 最近写出的值（无锁）
    pub fn snapshot(&self) -> ActuatorSnapshot {
        **self.snapshot.load()
    }

    /// 已发送的命令数
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    fn animation_playing(&self) -> bool {
        self.animation
            .get()
            .and_then(Weak::upgrade)
            .is_some_and(|a| a.is_playing())
    }

    fn ptz_active(&self) -> bool {
        self.ptz.get().and_then(Weak::upgrade).is_some_and(|p| p.is_active())
    }

    /// 决定本次输出接受哪些通道
    fn accepted(&self, state: &mut ApplyState, actuation: &Actuation) -> (Option<Face>, Option<Gaze>) {
        let face = match (actuation.expression, actuation.brightness) {
            (Some(expression), brightness) => Some(Face {
                expression,
                brightness: brightness.or(state.written.brightness).unwrap_or(255),
            }),
            (None, Some(brightness)) => state.written.expression.map(|expression| Face {
                expression,
                brightness,
            }),
            (None, None) => None,
        };
        let gaze = match (actuation.pan, actuation.tilt) {
            (None, None) => None,
            (pan, tilt) => Some(Gaze {
                pan: pan.or(state.written.pan).unwrap_or(90),
                tilt: tilt.or(state.written.tilt).unwrap_or(90),
            }),
        };

        match actuation.source {
            ActuationSource::Animation | ActuationSource::External => (face, gaze),
            ActuationSource::Ptz => (None, gaze),
            ActuationSource::Expression => {
                if !self.composer_enabled() || self.animation_playing() {
                    return (None, None);
                }
                // 自身输出变化，或动画结束后收回通道
                let face = face.filter(|f| {
                    state.last_composer_face != Some(*f) || state.face_owner == Some(ActuationSource::Animation)
                });
                let gaze = gaze.filter(|g| {
                    !self.ptz_active()
                        && (state.last_composer_gaze != Some(*g)
                            || state.gaze_owner == Some(ActuationSource::Animation))
                });
                if let Some(f) = face {
                    state.last_composer_face = Some(f);
                }
                if let Some(g) = gaze {
                    state.last_composer_gaze = Some(g);
                }
                (face, gaze)
            },
        }
    }

    fn write(&self, batch: &CommandBatch) {
        for command in batch {
            let result = match *command {
                ActuatorCommand::Expression(payload) => self.link.write_expression(payload),
                ActuatorCommand::Servo(payload) => self.link.write_servo(payload),
            };
            match result {
                Ok(()) => {
                    self.writes.fetch_add(1, Ordering::Relaxed);
                },
                Err(e) => {
                    self.write_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Actuator write failed: {}", e);
                },
            }
        }
    }
}

impl ActuatorSink for ActuatorApply {
    fn apply(&self, actuation: Actuation) {
        let mut state = self.state.lock();
        let (face, gaze) = self.accepted(&mut state, &actuation);

        let mut batch = CommandBatch::new();
        if let Some(face) = face {
            let written = &mut state.written;
            if written.expression != Some(face.expression) || written.brightness != Some(face.brightness) {
                written.expression = Some(face.expression);
                written.brightness = Some(face.brightness);
                batch.push(ActuatorCommand::Expression(SetExpression {
                    expression: face.expression,
                    brightness: face.brightness,
                    duration_ms: 0,
                }));
            }
            state.face_owner = Some(actuation.source);
        }
        if let Some(gaze) = gaze {
            let written = &mut state.written;
            if written.pan != Some(gaze.pan) {
                written.pan = Some(gaze.pan);
                batch.push(ActuatorCommand::Servo(SetServo::new(ServoId::Horizontal, gaze.pan)));
            }
            if written.tilt != Some(gaze.tilt) {
                written.tilt = Some(gaze.tilt);
                batch.push(ActuatorCommand::Servo(SetServo::new(ServoId::Vertical, gaze.tilt)));
            }
            state.gaze_owner = Some(actuation.source);
        }

        if batch.is_empty() {
            return;
        }
        trace!("{:?} -> {} command(s)", actuation.source, batch.len());
        self.snapshot.store(Arc::new(state.written));
        // 持锁写出，保持跨线程的写出顺序
        self.write(&batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<ActuatorCommand>>,
        fail: AtomicBool,
    }

    impl Recorder {
        fn take(&self) -> Vec<ActuatorCommand> {
            std::mem::take(&mut *self.sent.lock())
        }
    }

    impl ActuatorLink for Recorder {
        fn write_expression(&self, payload: SetExpression) -> Result<(), LinkError> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(LinkError::QueueFull(64));
            }
            self.sent.lock().push(ActuatorCommand::Expression(payload));
            Ok(())
        }

        fn write_servo(&self, payload: SetServo) -> Result<(), LinkError> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(LinkError::QueueFull(64));
            }
            self.sent.lock().push(ActuatorCommand::Servo(payload));
            Ok(())
        }
    }

    fn apply_with_recorder() -> (ActuatorApply, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let apply = ActuatorApply::new(recorder.clone());
        apply.set_composer_enabled(true);
        (apply, recorder)
    }

    fn composer(expression: u8, brightness: u8, pan: u16, tilt: u16) -> Actuation {
        Actuation::full(ActuationSource::Expression, expression, brightness, pan, tilt)
    }

    #[test]
    fn test_only_changed_fields_are_written() {
        let (apply, recorder) = apply_with_recorder();
        apply.apply(Actuation::full(ActuationSource::External, 0x02, 255, 90, 90));
        assert_eq!(recorder.take().len(), 3);

        apply.apply(Actuation::full(ActuationSource::External, 0x02, 255, 90, 120));
        assert_eq!(
            recorder.take(),
            vec![ActuatorCommand::Servo(SetServo::new(ServoId::Vertical, 120))]
        );

        apply.apply(Actuation::full(ActuationSource::External, 0x02, 255, 90, 120));
        assert!(recorder.take().is_empty());
        assert_eq!(apply.writes(), 4);
    }

    #[test]
    fn test_composer_repeats_are_suppressed() {
        let (apply, recorder) = apply_with_recorder();
        apply.apply(composer(0x02, 255, 90, 90));
        assert_eq!(recorder.take().len(), 3);

        // 远程命令改了舵机，合成器重复输出不会把它拉回
        apply.apply(Actuation::pan_tilt(ActuationSource::External, 120, 80));
        recorder.take();
        apply.apply(composer(0x02, 255, 90, 90));
        assert!(recorder.take().is_empty());
        assert_eq!(apply.snapshot().pan, Some(120));

        // 合成器输出变化时写出
        apply.apply(composer(0x03, 220, 88, 88));
        assert_eq!(recorder.take().len(), 3);
    }

    #[test]
    fn test_composer_reclaims_after_animation() {
        let (apply, recorder) = apply_with_recorder();
        apply.apply(composer(0x02, 255, 90, 90));
        apply.apply(Actuation::full(ActuationSource::Animation, 0x05, 255, 90, 80));
        recorder.take();

        // 未关联动画引擎视为动画已结束
        apply.apply(composer(0x02, 255, 90, 90));
        let sent = recorder.take();
        assert_eq!(
            sent,
            vec![
                ActuatorCommand::Expression(SetExpression { expression: 0x02, brightness: 255, duration_ms: 0 }),
                ActuatorCommand::Servo(SetServo::new(ServoId::Vertical, 90)),
            ]
        );
    }

    #[test]
    fn test_disabled_composer_is_ignored() {
        let (apply, recorder) = apply_with_recorder();
        apply.set_composer_enabled(false);
        apply.apply(composer(0x02, 255, 90, 90));
        assert!(recorder.take().is_empty());
        assert_eq!(apply.snapshot(), ActuatorSnapshot::default());
    }

    #[test]
    fn test_ptz_writes_only_servos() {
        let (apply, recorder) = apply_with_recorder();
        apply.apply(Actuation::pan_tilt(ActuationSource::Ptz, 100, 95));
        assert_eq!(
            recorder.take(),
            vec![
                ActuatorCommand::Servo(SetServo::new(ServoId::Horizontal, 100)),
                ActuatorCommand::Servo(SetServo::new(ServoId::Vertical, 95)),
            ]
        );
        assert_eq!(apply.snapshot().expression, None);
    }

    #[test]
    fn test_write_failures_are_counted() {
        let (apply, recorder) = apply_with_recorder();
        recorder.fail.store(true, Ordering::Relaxed);
        apply.apply(Actuation::full(ActuationSource::External, 0x00, 100, 90, 90));
        assert_eq!(apply.write_failures(), 3);
        assert_eq!(apply.writes(), 0);
    }

    #[test]
    fn test_snapshot_to_telemetry() {
        let (apply, _recorder) = apply_with_recorder();
        apply.apply(Actuation::full(ActuationSource::External, 0x04, 255, 91, 89));
        let update = apply.snapshot().to_telemetry("TALK");
        assert_eq!((update.expression, update.servo_h, update.servo_v), (0x04, 91, 89));
        assert_eq!(update.state, "TALK");
    }
}
