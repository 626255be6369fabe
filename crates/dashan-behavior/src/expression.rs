//! 表情合成
//!
//! 输出由两部分决定：
//!
//! - 情绪（mood）：`current_mood` 以每次节拍 `transition_speed` 的概率整体跳到 `target_mood`
//! - 图层：带优先级和可选时长的短时表情，最高优先级图层决定表情，其余图层只调节亮度
//!
//! 没有活动图层时输出当前情绪对应的预设。

use crate::BehaviorError;
use crate::actuation::{Actuation, ActuationSource, ActuatorSink, servo_angle};
use crate::ticker::TickLoop;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 预设图层优先级
const PRESET_PRIORITY: i32 = 5;
/// 微表情图层优先级
const MICRO_PRIORITY: i32 = 15;

const IDLE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    #[default]
    Neutral,
    Happy,
    Sad,
    Surprised,
    Angry,
    Curious,
    Shy,
    Tired,
    Excited,
    Confused,
    Thinking,
    Listening,
    Speaking,
}

impl Mood {
    pub const ALL: [Mood; 13] = [
        Mood::Neutral,
        Mood::Happy,
        Mood::Sad,
        Mood::Surprised,
        Mood::Angry,
        Mood::Curious,
        Mood::Shy,
        Mood::Tired,
        Mood::Excited,
        Mood::Confused,
        Mood::Thinking,
        Mood::Listening,
        Mood::Speaking,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Mood::Neutral => "neutral",
            Mood::Happy => "happy",
            Mood::Sad => "sad",
            Mood::Surprised => "surprised",
            Mood::Angry => "angry",
            Mood::Curious => "curious",
            Mood::Shy => "shy",
            Mood::Tired => "tired",
            Mood::Excited => "excited",
            Mood::Confused => "confused",
            Mood::Thinking => "thinking",
            Mood::Listening => "listening",
            Mood::Speaking => "speaking",
        }
    }

    pub fn from_name(name: &str) -> Option<Mood> {
        let name = name.trim();
        Mood::ALL.into_iter().find(|m| m.name().eq_ignore_ascii_case(name))
    }

    /// 这些情绪下不插入空闲微动作
    pub fn suppresses_idle(&self) -> bool {
        matches!(self, Mood::Speaking | Mood::Thinking)
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 图层亮度混合方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Add,
}

impl BlendMode {
    fn blend(&self, brightness: u8, intensity: f64) -> u8 {
        let intensity = intensity.clamp(0.0, 1.0);
        match self {
            BlendMode::Normal => brightness,
            BlendMode::Multiply => (f64::from(brightness) * intensity).floor() as u8,
            BlendMode::Add => {
                let added = u16::from(brightness) + (50.0 * intensity).floor() as u16;
                added.min(255) as u8
            },
        }
    }
}

/// 表情图层
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionLayer {
    pub expression: u8,
    /// 0.0 - 1.0
    pub intensity: f64,
    pub blend: BlendMode,
    pub priority: i32,
    /// `None` 表示常驻，直到被清除
    pub duration: Option<Duration>,
    pub start: Instant,
    /// 注视方向 (pan, tilt)
    pub gaze: Option<(f64, f64)>,
}

impl ExpressionLayer {
    pub fn new(expression: u8, priority: i32, duration: Option<Duration>, start: Instant) -> Self {
        Self {
            expression,
            intensity: 1.0,
            blend: BlendMode::Normal,
            priority,
            duration,
            start,
            gaze: None,
        }
    }

    pub fn with_blend(mut self, blend: BlendMode, intensity: f64) -> Self {
        self.blend = blend;
        self.intensity = intensity;
        self
    }

    pub fn with_gaze(mut self, pan: f64, tilt: f64) -> Self {
        self.gaze = Some((pan, tilt));
        self
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.duration
            .is_some_and(|d| now.saturating_duration_since(self.start) >= d && now >= self.start)
    }

    /// 已开始且未过期
    pub fn is_active(&self, now: Instant) -> bool {
        now >= self.start && !self.is_expired(now)
    }
}

/// 预设附带的微表情
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroExpression {
    pub name: String,
    pub expression: u8,
    pub duration: Duration,
    pub intensity: f64,
}

impl MicroExpression {
    pub fn new(name: &str, expression: u8, duration_ms: u64, intensity: f64) -> Self {
        Self {
            name: name.to_string(),
            expression,
            duration: Duration::from_millis(duration_ms),
            intensity,
        }
    }
}

/// 情绪预设
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodPreset {
    pub name: String,
    pub mood: Mood,
    pub expression: u8,
    pub brightness: u8,
    pub pan: f64,
    pub tilt: f64,
    pub animations: Vec<String>,
    pub micro_expressions: Vec<MicroExpression>,
    pub transition: Duration,
}

/// 一次合成结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComposedExpression {
    pub expression: u8,
    pub brightness: u8,
    pub pan: f64,
    pub tilt: f64,
}

impl ComposedExpression {
    pub fn to_actuation(&self) -> Actuation {
        Actuation::full(
            ActuationSource::Expression,
            self.expression,
            self.brightness,
            servo_angle(self.pan),
            servo_angle(self.tilt),
        )
    }
}

/// 空闲微动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleBehavior {
    Blink,
    SubtleNod,
    LookAround,
    Yawn,
}

impl IdleBehavior {
    /// (动作, 累积权重)
    const WEIGHTS: [(IdleBehavior, f64); 4] = [
        (IdleBehavior::Blink, 0.10),
        (IdleBehavior::SubtleNod, 0.05),
        (IdleBehavior::LookAround, 0.03),
        (IdleBehavior::Yawn, 0.01),
    ];

    fn pick(draw: f64) -> Option<IdleBehavior> {
        let mut cumulative = 0.0;
        for (behavior, weight) in Self::WEIGHTS {
            cumulative += weight;
            if draw < cumulative {
                return Some(behavior);
            }
        }
        None
    }
}

/// 可序列化的合成器快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposerSnapshot {
    pub current_mood: Mood,
    pub target_mood: Mood,
    pub active_layers: usize,
    pub presets: Vec<String>,
}

fn preset(
    name: &str,
    mood: Mood,
    expression: u8,
    brightness: u8,
    (pan, tilt): (f64, f64),
    animations: &[&str],
) -> MoodPreset {
    MoodPreset {
        name: name.to_string(),
        mood,
        expression,
        brightness,
        pan,
        tilt,
        animations: animations.iter().map(|a| a.to_string()).collect(),
        micro_expressions: Vec::new(),
        transition: Duration::from_millis(300),
    }
}

fn default_presets() -> Vec<MoodPreset> {
    let mut happy = preset("happy", Mood::Happy, 0x05, 255, (90.0, 88.0), &["nod"]);
    happy.micro_expressions.push(MicroExpression::new("blink", 0x00, 200, 0.3));

    let mut surprised = preset("surprised", Mood::Surprised, 0x07, 255, (90.0, 85.0), &[]);
    surprised.transition = Duration::from_millis(100);

    let mut listening = preset("listening", Mood::Listening, 0x02, 255, (90.0, 90.0), &[]);
    listening.micro_expressions.push(MicroExpression::new("blink", 0x00, 150, 0.2));

    vec![
        preset("neutral", Mood::Neutral, 0x02, 255, (90.0, 90.0), &[]),
        happy,
        preset("sad", Mood::Sad, 0x06, 200, (90.0, 95.0), &[]),
        surprised,
        preset("angry", Mood::Angry, 0x0B, 255, (90.0, 92.0), &["shake"]),
        preset("curious", Mood::Curious, 0x09, 255, (90.0, 87.0), &["tilt"]),
        preset("shy", Mood::Shy, 0x0A, 200, (90.0, 95.0), &["look_left", "look_right"]),
        preset("tired", Mood::Tired, 0x0D, 180, (90.0, 95.0), &[]),
        preset("excited", Mood::Excited, 0x0E, 255, (90.0, 88.0), &["nod", "nod"]),
        preset("confused", Mood::Confused, 0x08, 255, (90.0, 93.0), &["tilt", "shake"]),
        preset("thinking", Mood::Thinking, 0x03, 220, (88.0, 88.0), &["think"]),
        listening,
        preset("speaking", Mood::Speaking, 0x04, 255, (90.0, 90.0), &[]),
    ]
}

/// 表情合成状态机
pub struct ExpressionComposer {
    presets: BTreeMap<String, MoodPreset>,
    layers: Vec<ExpressionLayer>,
    current_mood: Mood,
    target_mood: Mood,
    transition_speed: f64,
    rng: StdRng,
}

impl ExpressionComposer {
    /// `seed` 为 `None` 时从系统熵初始化
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            presets: default_presets()
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
            layers: Vec::new(),
            current_mood: Mood::Neutral,
            target_mood: Mood::Neutral,
            transition_speed: 0.1,
            rng,
        }
    }

    pub fn with_transition_speed(mut self, speed: f64) -> Self {
        self.transition_speed = speed.clamp(0.0, 1.0);
        self
    }

    pub fn current_mood(&self) -> Mood {
        self.current_mood
    }

    pub fn target_mood(&self) -> Mood {
        self.target_mood
    }

    pub fn set_mood(&mut self, mood: Mood) {
        if self.target_mood != mood {
            info!("Setting mood to {}", mood);
        }
        self.target_mood = mood;
    }

    /// 推进一次：情绪跳变、清理过期图层、合成
    pub fn tick(&mut self, now: Instant) -> ComposedExpression {
        if self.current_mood != self.target_mood
            && self.rng.gen_range(0.0..1.0) < self.transition_speed
        {
            self.current_mood = self.target_mood;
            debug!("Mood transitioned to {}", self.current_mood);
        }
        self.layers.retain(|layer| !layer.is_expired(now));
        self.compose(now)
    }

    /// 按当前图层合成，不改变状态
    pub fn compose(&self, now: Instant) -> ComposedExpression {
        let base = self.presets.get(self.current_mood.name());
        let (base_expression, base_brightness, pan, tilt) = match base {
            Some(p) => (p.expression, p.brightness, p.pan, p.tilt),
            None => (0x02, 255, 90.0, 90.0),
        };

        let mut active: Vec<&ExpressionLayer> = self.layers.iter().filter(|l| l.is_active(now)).collect();
        // 稳定排序：同优先级先加入的在上
        active.sort_by(|a, b| b.priority.cmp(&a.priority));

        let Some((top, rest)) = active.split_first() else {
            return ComposedExpression {
                expression: base_expression,
                brightness: base_brightness,
                pan,
                tilt,
            };
        };

        let brightness = rest
            .iter()
            .fold(255u8, |b, layer| layer.blend.blend(b, layer.intensity));
        let (pan, tilt) = top.gaze.unwrap_or((pan, tilt));

        ComposedExpression {
            expression: top.expression,
            brightness,
            pan,
            tilt,
        }
    }

    /// 空闲调度（约 1 Hz 调用一次），返回本次插入的动作
    pub fn idle_tick(&mut self, now: Instant) -> Option<IdleBehavior> {
        if self.current_mood.suppresses_idle() {
            return None;
        }
        let behavior = IdleBehavior::pick(self.rng.gen_range(0.0..1.0))?;
        match behavior {
            IdleBehavior::Blink => {
                self.add_layer(ExpressionLayer::new(0x00, 10, Some(Duration::from_millis(150)), now));
            },
            IdleBehavior::SubtleNod => {
                self.add_layer(ExpressionLayer::new(0x02, 5, Some(Duration::from_millis(500)), now));
            },
            IdleBehavior::LookAround => {
                let step = Duration::from_millis(300);
                let directions = [(85.0, 90.0), (95.0, 90.0), (90.0, 85.0), (90.0, 95.0)];
                for (i, (pan, tilt)) in directions.into_iter().enumerate() {
                    let start = now + step * i as u32;
                    self.add_layer(ExpressionLayer::new(0x02, 3, Some(step), start).with_gaze(pan, tilt));
                }
            },
            IdleBehavior::Yawn => {
                if self.current_mood != Mood::Tired {
                    return None;
                }
                self.add_layer(ExpressionLayer::new(0x0D, 8, Some(Duration::from_millis(1500)), now));
            },
        }
        debug!("Idle behavior: {:?}", behavior);
        Some(behavior)
    }

    /// 播放预设，返回需要由调用方播放的动画名
    pub fn play_preset(
        &mut self,
        name: &str,
        duration: Option<Duration>,
        now: Instant,
    ) -> Result<Vec<String>, BehaviorError> {
        let Some(preset) = self.presets.get(name).cloned() else {
            warn!("Preset not found: {}", name);
            return Err(BehaviorError::UnknownPreset(name.to_string()));
        };

        self.set_mood(preset.mood);
        self.add_layer(ExpressionLayer::new(
            preset.expression,
            PRESET_PRIORITY,
            Some(duration.unwrap_or(preset.transition)),
            now,
        ));

        for micro in &preset.micro_expressions {
            let delay = Duration::from_secs_f64(self.rng.gen_range(0.1..0.5));
            let layer = ExpressionLayer::new(micro.expression, MICRO_PRIORITY, Some(micro.duration), now + delay)
                .with_blend(BlendMode::Normal, micro.intensity);
            self.add_layer(layer);
        }

        Ok(preset.animations)
    }

    pub fn add_layer(&mut self, layer: ExpressionLayer) {
        self.layers.push(layer);
    }

    /// `Some(p)` 只清除优先级恰为 `p` 的图层，`None` 清除全部
    pub fn clear_layers(&mut self, priority: Option<i32>) {
        match priority {
            Some(p) => self.layers.retain(|l| l.priority != p),
            None => self.layers.clear(),
        }
    }

    pub fn layers(&self) -> &[ExpressionLayer] {
        &self.layers
    }

    pub fn preset(&self, name: &str) -> Option<&MoodPreset> {
        self.presets.get(name)
    }

    pub fn add_preset(&mut self, preset: MoodPreset) {
        info!("Added preset {}", preset.name);
        self.presets.insert(preset.name.clone(), preset);
    }

    pub fn remove_preset(&mut self, name: &str) -> Result<MoodPreset, BehaviorError> {
        if name == Mood::Neutral.name() {
            return Err(BehaviorError::ProtectedPreset(name.to_string()));
        }
        self.presets
            .remove(name)
            .ok_or_else(|| BehaviorError::UnknownPreset(name.to_string()))
    }

    pub fn snapshot(&self, now: Instant) -> ComposerSnapshot {
        ComposerSnapshot {
            current_mood: self.current_mood,
            target_mood: self.target_mood,
            active_layers: self.layers.iter().filter(|l| l.is_active(now)).count(),
            presets: self.presets.keys().cloned().collect(),
        }
    }
}

/// 预设构建器
#[derive(Debug, Clone)]
pub struct ExpressionBuilder {
    mood: Mood,
    expression: u8,
    brightness: u8,
    pan: f64,
    tilt: f64,
    animations: Vec<String>,
    micro_expressions: Vec<MicroExpression>,
    transition: Duration,
}

impl ExpressionBuilder {
    pub fn new(mood: Mood) -> Self {
        Self {
            mood,
            expression: 0x02,
            brightness: 255,
            pan: 90.0,
            tilt: 90.0,
            animations: Vec::new(),
            micro_expressions: Vec::new(),
            transition: Duration::from_millis(300),
        }
    }

    pub fn with_expression(mut self, expression: u8) -> Self {
        self.expression = expression;
        self
    }

    pub fn with_brightness(mut self, brightness: i32) -> Self {
        self.brightness = brightness.clamp(0, 255) as u8;
        self
    }

    /// 角度钳位到 0-180
    pub fn with_position(mut self, pan: f64, tilt: f64) -> Self {
        self.pan = pan.clamp(0.0, 180.0);
        self.tilt = tilt.clamp(0.0, 180.0);
        self
    }

    pub fn with_animation(mut self, animation: &str) -> Self {
        self.animations.push(animation.to_string());
        self
    }

    pub fn with_micro_expression(mut self, micro: MicroExpression) -> Self {
        self.micro_expressions.push(micro);
        self
    }

    pub fn with_transition(mut self, transition: Duration) -> Self {
        self.transition = transition;
        self
    }

    pub fn build(self, name: &str) -> MoodPreset {
        MoodPreset {
            name: name.to_string(),
            mood: self.mood,
            expression: self.expression,
            brightness: self.brightness,
            pan: self.pan,
            tilt: self.tilt,
            animations: self.animations,
            micro_expressions: self.micro_expressions,
            transition: self.transition,
        }
    }
}

/// 表情运行时：~60 Hz 合成循环 + 1 Hz 空闲调度
pub struct ExpressionRuntime {
    composer: Arc<Mutex<ExpressionComposer>>,
    sink: Arc<dyn ActuatorSink>,
    period: Duration,
    loops: Mutex<Vec<TickLoop>>,
}

impl ExpressionRuntime {
    pub fn new(composer: ExpressionComposer, sink: Arc<dyn ActuatorSink>, hz: f64) -> Self {
        Self {
            composer: Arc::new(Mutex::new(composer)),
            sink,
            period: Duration::from_secs_f64(1.0 / hz.max(1.0)),
            loops: Mutex::new(Vec::new()),
        }
    }

    pub fn start(&self) -> Result<(), BehaviorError> {
        let mut loops = self.loops.lock();
        if !loops.is_empty() {
            return Ok(());
        }

        let composer = self.composer.clone();
        let sink = self.sink.clone();
        loops.push(TickLoop::spawn("dashan-expression", self.period, move |now| {
            let composed = composer.lock().tick(now);
            sink.apply(composed.to_actuation());
        })?);

        let composer = self.composer.clone();
        loops.push(TickLoop::spawn("dashan-idle", IDLE_INTERVAL, move |now| {
            composer.lock().idle_tick(now);
        })?);
        Ok(())
    }

    pub fn shutdown(&self) {
        for mut tick_loop in self.loops.lock().drain(..) {
            tick_loop.stop();
        }
    }

    pub fn set_mood(&self, mood: Mood) {
        self.composer.lock().set_mood(mood);
    }

    pub fn current_mood(&self) -> Mood {
        self.composer.lock().current_mood()
    }

    pub fn target_mood(&self) -> Mood {
        self.composer.lock().target_mood()
    }

    pub fn play_preset(&self, name: &str, duration: Option<Duration>) -> Result<Vec<String>, BehaviorError> {
        self.composer.lock().play_preset(name, duration, Instant::now())
    }

    pub fn add_layer(&self, layer: ExpressionLayer) {
        self.composer.lock().add_layer(layer);
    }

    pub fn clear_layers(&self, priority: Option<i32>) {
        self.composer.lock().clear_layers(priority);
    }

    pub fn compose(&self) -> ComposedExpression {
        self.composer.lock().compose(Instant::now())
    }

    pub fn snapshot(&self) -> ComposerSnapshot {
        self.composer.lock().snapshot(Instant::now())
    }

    pub fn with_composer<R>(&self, f: impl FnOnce(&mut ExpressionComposer) -> R) -> R {
        f(&mut self.composer.lock())
    }
}

impl Drop for ExpressionRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
