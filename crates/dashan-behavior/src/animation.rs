//! 关键帧动画
//!
//! [`AnimationPlayer`] 是纯状态机：`play` 复位到第 0 帧，`tick(now)` 在当前帧持续时间到达时
//! 输出该帧并前进；到末尾时循环动画回绕，单次动画清除。
//! [`AnimationEngine`] 在首次播放时启动唯一的 ~100 Hz 节拍线程，把输出帧写入 [`ActuatorSink`]。

use crate::BehaviorError;
use crate::actuation::{Actuation, ActuationSource, ActuatorSink};
use crate::ticker::TickLoop;
use dashan_protocol::Expression;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 动画关键帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keyframe {
    pub expression: u8,
    pub brightness: u8,
    /// 水平舵机角（度）
    pub servo_h: u16,
    /// 垂直舵机角（度）
    pub servo_v: u16,
    pub duration: Duration,
}

impl Keyframe {
    pub fn new(expression: Expression, brightness: u8, servo_h: u16, servo_v: u16, duration_ms: u64) -> Self {
        Self {
            expression: expression.code(),
            brightness,
            servo_h,
            servo_v,
            duration: Duration::from_millis(duration_ms),
        }
    }

    pub fn to_actuation(&self) -> Actuation {
        Actuation::full(
            ActuationSource::Animation,
            self.expression,
            self.brightness,
            self.servo_h,
            self.servo_v,
        )
    }
}

/// 有序关键帧序列
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Animation {
    pub keyframes: Vec<Keyframe>,
    pub looping: bool,
}

impl Animation {
    pub fn once(keyframes: Vec<Keyframe>) -> Self {
        Self {
            keyframes,
            looping: false,
        }
    }

    pub fn looping(keyframes: Vec<Keyframe>) -> Self {
        Self {
            keyframes,
            looping: true,
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.keyframes.iter().map(|k| k.duration).sum()
    }
}

fn default_library() -> BTreeMap<String, Animation> {
    use Expression::*;
    let k = Keyframe::new;

    let entries = [
        ("blink", vec![k(Blank, 255, 90, 90, 100), k(Sleep, 255, 90, 90, 100), k(Blank, 255, 90, 90, 100)]),
        ("nod", vec![k(Listen, 255, 90, 80, 200), k(Listen, 255, 90, 100, 200), k(Listen, 255, 90, 90, 200)]),
        ("shake", vec![k(Confused, 255, 70, 90, 200), k(Confused, 255, 110, 90, 200), k(Listen, 255, 90, 90, 200)]),
        ("tilt", vec![k(Curious, 255, 90, 85, 300), k(Curious, 255, 90, 85, 500), k(Listen, 255, 90, 90, 300)]),
        ("look_left", vec![k(Listen, 255, 70, 90, 300), k(Listen, 255, 70, 90, 500), k(Listen, 255, 90, 90, 300)]),
        ("look_right", vec![k(Listen, 255, 110, 90, 300), k(Listen, 255, 110, 90, 500), k(Listen, 255, 90, 90, 300)]),
        ("surprised", vec![k(Surprised, 255, 90, 80, 200), k(Surprised, 255, 90, 80, 500), k(Listen, 255, 90, 90, 300)]),
        ("happy", vec![k(Happy, 255, 90, 90, 300), k(Happy, 255, 90, 90, 500), k(Listen, 255, 90, 90, 300)]),
        ("shy", vec![k(Shy, 200, 90, 95, 500), k(Shy, 200, 90, 95, 300), k(Listen, 255, 90, 90, 300)]),
        ("think", vec![k(Think, 255, 85, 85, 500), k(Think, 255, 95, 95, 500), k(Think, 255, 85, 85, 500)]),
    ];

    entries
        .into_iter()
        .map(|(name, keyframes)| (name.to_string(), Animation::once(keyframes)))
        .collect()
}

#[derive(Debug, Clone)]
struct ActiveAnimation {
    name: String,
    index: usize,
    keyframe_started: Instant,
}

/// 动画播放状态机
#[derive(Debug, Clone)]
pub struct AnimationPlayer {
    library: BTreeMap<String, Animation>,
    active: Option<ActiveAnimation>,
}

impl Default for AnimationPlayer {
    fn default() -> Self {
        Self::with_default_library()
    }
}

impl AnimationPlayer {
    /// 空动画库
    pub fn new() -> Self {
        Self {
            library: BTreeMap::new(),
            active: None,
        }
    }

    /// 内置 10 个动画
    pub fn with_default_library() -> Self {
        Self {
            library: default_library(),
            active: None,
        }
    }

    pub fn register(&mut self, name: &str, animation: Animation) -> Result<(), BehaviorError> {
        if animation.keyframes.is_empty() {
            return Err(BehaviorError::EmptyAnimation(name.to_string()));
        }
        self.library.insert(name.to_string(), animation);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Animation> {
        self.library.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.library.keys().cloned().collect()
    }

    /// 从第 0 帧开始播放，抢占正在播放的动画
    pub fn play(&mut self, name: &str, now: Instant) -> Result<(), BehaviorError> {
        if !self.library.contains_key(name) {
            return Err(BehaviorError::UnknownAnimation(name.to_string()));
        }
        if let Some(previous) = &self.active {
            debug!("Animation {} preempted by {}", previous.name, name);
        }
        self.active = Some(ActiveAnimation {
            name: name.to_string(),
            index: 0,
            keyframe_started: now,
        });
        Ok(())
    }

    pub fn stop(&mut self) {
        self.active = None;
    }

    pub fn is_playing(&self) -> bool {
        self.active.is_some()
    }

    /// 当前动画名与帧序号
    pub fn current(&self) -> Option<(&str, usize)> {
        self.active.as_ref().map(|a| (a.name.as_str(), a.index))
    }

    /// 推进一次；当前帧到期时返回该帧（每次最多一帧）
    pub fn tick(&mut self, now: Instant) -> Option<Keyframe> {
        let active = self.active.as_mut()?;
        let Some(animation) = self.library.get(&active.name) else {
            self.active = None;
            return None;
        };

        let keyframe = animation.keyframes[active.index];
        if now.saturating_duration_since(active.keyframe_started) < keyframe.duration {
            return None;
        }

        // 以计划时间为锚点，避免节拍抖动累积
        active.keyframe_started += keyframe.duration;
        active.index += 1;
        if active.index >= animation.keyframes.len() {
            if animation.looping {
                active.index = 0;
            } else {
                debug!("Animation {} finished", active.name);
                self.active = None;
            }
        }
        Some(keyframe)
    }
}

/// 动画引擎运行时
pub struct AnimationEngine {
    player: Arc<Mutex<AnimationPlayer>>,
    sink: Arc<dyn ActuatorSink>,
    period: Duration,
    tick_loop: Mutex<Option<TickLoop>>,
}

impl AnimationEngine {
    pub fn new(player: AnimationPlayer, sink: Arc<dyn ActuatorSink>, hz: f64) -> Self {
        Self {
            player: Arc::new(Mutex::new(player)),
            sink,
            period: Duration::from_secs_f64(1.0 / hz.max(1.0)),
            tick_loop: Mutex::new(None),
        }
    }

    /// 播放命名动画；未知名称记录告警并忽略
    pub fn play(&self, name: &str) -> Result<(), BehaviorError> {
        if let Err(e) = self.player.lock().play(name, Instant::now()) {
            warn!("{}", e);
            return Err(e);
        }
        self.ensure_running()
    }

    pub fn stop(&self) {
        self.player.lock().stop();
    }

    pub fn is_playing(&self) -> bool {
        self.player.lock().is_playing()
    }

    pub fn current(&self) -> Option<(String, usize)> {
        self.player
            .lock()
            .current()
            .map(|(name, index)| (name.to_string(), index))
    }

    pub fn register(&self, name: &str, animation: Animation) -> Result<(), BehaviorError> {
        self.player.lock().register(name, animation)
    }

    pub fn names(&self) -> Vec<String> {
        self.player.lock().names()
    }

    /// 停止节拍线程
    pub fn shutdown(&self) {
        if let Some(mut tick_loop) = self.tick_loop.lock().take() {
            tick_loop.stop();
        }
    }

    fn ensure_running(&self) -> Result<(), BehaviorError> {
        let mut tick_loop = self.tick_loop.lock();
        if tick_loop.as_ref().is_some_and(TickLoop::is_running) {
            return Ok(());
        }

        let player = self.player.clone();
        let sink = self.sink.clone();
        *tick_loop = Some(TickLoop::spawn("dashan-animation", self.period, move |now| {
            // 释放锁后再回调
            let keyframe = player.lock().tick(now);
            if let Some(keyframe) = keyframe {
                sink.apply(keyframe.to_actuation());
            }
        })?);
        Ok(())
    }
}

impl Drop for AnimationEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
