//! 文本情绪检测与强度平滑
//!
//! - [`EmotionDetector`]: 关键词子串计数打分
//! - [`EmotionManager`]: 目标情绪/强度，按固定比例逼近并记录历史
//! - [`EmotionPropagator`]: 两者的组合，对外提供表情码

use crate::expression::Mood;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// 逼近目标时的吸附阈值
const SNAP_EPSILON: f64 = 0.01;
/// 低于此强度不写入历史
const HISTORY_MIN_INTENSITY: f64 = 0.1;
const MAX_HISTORY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Sad,
    Surprised,
    Angry,
    Shy,
    Curious,
    Excited,
    Confused,
    Tired,
}

impl Emotion {
    /// 枚举顺序，同分时靠前者胜出
    pub const ALL: [Emotion; 10] = [
        Emotion::Neutral,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Surprised,
        Emotion::Angry,
        Emotion::Shy,
        Emotion::Curious,
        Emotion::Excited,
        Emotion::Confused,
        Emotion::Tired,
    ];

    /// 对应的固件表情码
    pub fn expression(&self) -> u8 {
        match self {
            Emotion::Neutral => 0x02,
            Emotion::Happy => 0x05,
            Emotion::Sad => 0x06,
            Emotion::Surprised => 0x07,
            Emotion::Angry => 0x0B,
            Emotion::Shy => 0x0A,
            Emotion::Curious => 0x09,
            Emotion::Excited => 0x0E,
            Emotion::Confused => 0x08,
            Emotion::Tired => 0x0D,
        }
    }

    /// 对应的合成器情绪
    pub fn mood(&self) -> Mood {
        match self {
            Emotion::Neutral => Mood::Neutral,
            Emotion::Happy => Mood::Happy,
            Emotion::Sad => Mood::Sad,
            Emotion::Surprised => Mood::Surprised,
            Emotion::Angry => Mood::Angry,
            Emotion::Shy => Mood::Shy,
            Emotion::Curious => Mood::Curious,
            Emotion::Excited => Mood::Excited,
            Emotion::Confused => Mood::Confused,
            Emotion::Tired => Mood::Tired,
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Emotion::Neutral => &[],
            Emotion::Happy => &[
                "开心", "高兴", "棒", "太好了", "喜欢", "爱", "哈哈", "快乐", "赞", "优秀", "不错", "好耶",
                "成功", "赢了",
            ],
            Emotion::Sad => &[
                "难过", "伤心", "不好", "糟糕", "失望", "哭", "不开心", "失败", "可惜", "遗憾",
            ],
            Emotion::Surprised => &[
                "哇", "天哪", "真的", "竟然", "惊讶", "不敢相信", "天啊", "什么", "不会吧", "真的吗",
            ],
            Emotion::Angry => &["生气", "讨厌", "烦", "气死", "愤怒", "烦人", "不行", "不可以"],
            Emotion::Shy => &["嗯", "那个", "不好意思", "害羞", "脸红", "唔", "嗯哼"],
            Emotion::Curious => &["好奇", "想知道", "为什么", "怎么", "什么", "请问", "怎么回事"],
            Emotion::Excited => &["太棒了", "激动", "兴奋", "迫不及待", "好期待", "太好了", "厉害", "牛"],
            Emotion::Confused => &["不懂", "不明白", "什么意思", "为什么", "困惑", "疑惑", "搞不懂"],
            Emotion::Tired => &["累", "疲惫", "困", "想睡觉", "好累", "没精神", "不想动"],
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 历史中的一条记录
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EmotionState {
    pub emotion: Emotion,
    pub intensity: f64,
    /// 在该状态下停留的累计时长
    pub duration: Duration,
}

/// 关键词情绪检测
#[derive(Debug, Clone, Copy, Default)]
pub struct EmotionDetector;

impl EmotionDetector {
    pub fn new() -> Self {
        Self
    }

    /// 命中的不同关键词个数
    pub fn score(&self, emotion: Emotion, text: &str) -> usize {
        let text = text.to_lowercase();
        emotion
            .keywords()
            .iter()
            .filter(|keyword| text.contains(*keyword))
            .count()
    }

    pub fn detect(&self, text: &str) -> Emotion {
        self.best(text).map_or(Emotion::Neutral, |(emotion, _)| emotion)
    }

    /// 强度 = `min(1.0, 命中数 * 0.3 + 0.4)`，未命中为 NEUTRAL/0
    pub fn detect_with_intensity(&self, text: &str) -> (Emotion, f64) {
        match self.best(text) {
            Some((emotion, count)) => (emotion, (count as f64 * 0.3 + 0.4).min(1.0)),
            None => (Emotion::Neutral, 0.0),
        }
    }

    fn best(&self, text: &str) -> Option<(Emotion, usize)> {
        let mut best: Option<(Emotion, usize)> = None;
        for emotion in Emotion::ALL {
            let score = self.score(emotion, text);
            if score > 0 && best.is_none_or(|(_, top)| score > top) {
                best = Some((emotion, score));
            }
        }
        best
    }
}

/// 情绪状态平滑
#[derive(Debug, Clone)]
pub struct EmotionManager {
    current_emotion: Emotion,
    current_intensity: f64,
    target_emotion: Emotion,
    target_intensity: f64,
    transition_speed: f64,
    history: VecDeque<EmotionState>,
}

impl Default for EmotionManager {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl EmotionManager {
    pub fn new(transition_speed: f64) -> Self {
        Self {
            current_emotion: Emotion::Neutral,
            current_intensity: 0.0,
            target_emotion: Emotion::Neutral,
            target_intensity: 0.0,
            transition_speed: transition_speed.clamp(0.0, 1.0),
            history: VecDeque::with_capacity(MAX_HISTORY),
        }
    }

    pub fn set_emotion(&mut self, emotion: Emotion, intensity: f64) {
        self.target_emotion = emotion;
        self.target_intensity = intensity.clamp(0.0, 1.0);
        debug!("Set emotion: {} (intensity {:.2})", emotion, self.target_intensity);
    }

    /// 向目标逼近一步，足够接近时吸附到目标
    pub fn update(&mut self, dt: Duration) -> Emotion {
        let diff = self.target_intensity - self.current_intensity;
        self.current_intensity += diff * self.transition_speed;

        if diff.abs() < SNAP_EPSILON {
            self.current_emotion = self.target_emotion;
            self.current_intensity = self.target_intensity;
        }

        if self.current_intensity > HISTORY_MIN_INTENSITY {
            self.record(dt);
        }
        self.current_emotion
    }

    /// 线性衰减，归零时目标复位为 NEUTRAL
    pub fn decay(&mut self, rate: f64) {
        if self.current_intensity <= 0.0 {
            return;
        }
        self.current_intensity -= rate;
        self.target_intensity = (self.target_intensity - rate).max(0.0);
        if self.current_intensity <= 0.0 {
            self.current_intensity = 0.0;
            self.target_emotion = Emotion::Neutral;
            self.target_intensity = 0.0;
        }
    }

    pub fn reset(&mut self) {
        self.current_emotion = Emotion::Neutral;
        self.current_intensity = 0.0;
        self.target_emotion = Emotion::Neutral;
        self.target_intensity = 0.0;
    }

    pub fn current_emotion(&self) -> Emotion {
        self.current_emotion
    }

    pub fn current_intensity(&self) -> f64 {
        self.current_intensity
    }

    pub fn target(&self) -> (Emotion, f64) {
        (self.target_emotion, self.target_intensity)
    }

    pub fn history(&self) -> impl Iterator<Item = &EmotionState> {
        self.history.iter()
    }

    /// 历史中累计时长最长的情绪
    pub fn dominant(&self) -> Emotion {
        let mut totals = [Duration::ZERO; Emotion::ALL.len()];
        for state in &self.history {
            totals[state.emotion as usize] += state.duration;
        }
        let mut dominant = Emotion::Neutral;
        let mut longest = Duration::ZERO;
        for (emotion, total) in Emotion::ALL.into_iter().zip(totals) {
            if total > longest {
                dominant = emotion;
                longest = total;
            }
        }
        dominant
    }

    fn record(&mut self, dt: Duration) {
        if let Some(last) = self.history.back_mut() {
            last.duration += dt;
        }
        if self.history.len() == MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(EmotionState {
            emotion: self.current_emotion,
            intensity: self.current_intensity,
            duration: Duration::ZERO,
        });
    }
}

/// 检测 + 平滑
#[derive(Debug, Clone, Default)]
pub struct EmotionPropagator {
    detector: EmotionDetector,
    manager: EmotionManager,
}

impl EmotionPropagator {
    pub fn new(transition_speed: f64) -> Self {
        Self {
            detector: EmotionDetector::new(),
            manager: EmotionManager::new(transition_speed),
        }
    }

    /// 检测文本情绪；命中时更新目标，返回检测结果
    pub fn observe(&mut self, text: &str) -> (Emotion, f64) {
        let (emotion, intensity) = self.detector.detect_with_intensity(text);
        if emotion != Emotion::Neutral {
            self.manager.set_emotion(emotion, intensity);
        }
        (emotion, intensity)
    }

    /// 推进平滑，返回 (当前情绪, 强度)
    pub fn update(&mut self, dt: Duration) -> (Emotion, f64) {
        let emotion = self.manager.update(dt);
        (emotion, self.manager.current_intensity())
    }

    pub fn decay(&mut self, rate: f64) {
        self.manager.decay(rate);
    }

    pub fn reset(&mut self) {
        self.manager.reset();
    }

    pub fn current(&self) -> (Emotion, f64) {
        (self.manager.current_emotion(), self.manager.current_intensity())
    }

    pub fn detector(&self) -> &EmotionDetector {
        &self.detector
    }

    pub fn manager(&self) -> &EmotionManager {
        &self.manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(100);

    #[test]
    fn test_tired_detection() {
        let detector = EmotionDetector::new();
        let (emotion, intensity) = detector.detect_with_intensity("我好累啊");
        assert_eq!(emotion, Emotion::Tired);
        assert!(intensity >= 0.4);
    }

    #[test]
    fn test_no_keywords_is_neutral() {
        let detector = EmotionDetector::new();
        assert_eq!(detector.detect_with_intensity("hello robot"), (Emotion::Neutral, 0.0));
        assert_eq!(detector.detect(""), Emotion::Neutral);
    }

    #[test]
    fn test_intensity_scales_with_hits() {
        let detector = EmotionDetector::new();
        let (emotion, intensity) = detector.detect_with_intensity("今天真开心！");
        assert_eq!(emotion, Emotion::Happy);
        assert!((intensity - 0.7).abs() < 1e-9);

        // 哇 / 真的 / 真的吗
        assert_eq!(detector.detect_with_intensity("哇，真的吗？"), (Emotion::Surprised, 1.0));
    }

    #[test]
    fn test_ties_go_to_earlier_emotion() {
        let detector = EmotionDetector::new();
        // "什么" 同时属于 SURPRISED 和 CURIOUS
        assert_eq!(detector.detect("这个是什么？"), Emotion::Surprised);
        assert_eq!(detector.detect("我不明白"), Emotion::Confused);
    }

    #[test]
    fn test_duplicate_hits_count_once() {
        let detector = EmotionDetector::new();
        assert_eq!(detector.score(Emotion::Angry, "讨厌讨厌讨厌"), 1);
    }

    #[test]
    fn test_expression_table() {
        assert_eq!(Emotion::Angry.expression(), 0x0B);
        assert_eq!(Emotion::Tired.expression(), 0x0D);
        assert_eq!(Emotion::Neutral.expression(), 0x02);
        assert_eq!(Emotion::Shy.mood(), Mood::Shy);
    }

    #[test]
    fn test_update_converges_and_snaps() {
        let mut manager = EmotionManager::default();
        manager.set_emotion(Emotion::Happy, 1.0);

        for _ in 0..10 {
            manager.update(TICK);
        }
        assert_eq!(manager.current_emotion(), Emotion::Neutral);
        assert!((manager.current_intensity() - (1.0 - 0.9f64.powi(10))).abs() < 1e-9);

        for _ in 0..60 {
            manager.update(TICK);
        }
        assert_eq!(manager.current_emotion(), Emotion::Happy);
        assert_eq!(manager.current_intensity(), 1.0);
    }

    #[test]
    fn test_decay_resets_to_neutral() {
        let mut manager = EmotionManager::default();
        manager.set_emotion(Emotion::Sad, 0.5);
        for _ in 0..100 {
            manager.update(TICK);
        }
        assert_eq!(manager.current_intensity(), 0.5);

        manager.decay(0.2);
        assert!((manager.current_intensity() - 0.3).abs() < 1e-9);
        manager.decay(0.2);
        manager.decay(0.2);
        assert_eq!(manager.current_intensity(), 0.0);
        assert_eq!(manager.target(), (Emotion::Neutral, 0.0));

        manager.update(TICK);
        assert_eq!(manager.current_emotion(), Emotion::Neutral);
    }

    #[test]
    fn test_history_is_capped_and_dominant() {
        let mut manager = EmotionManager::default();
        manager.set_emotion(Emotion::Excited, 1.0);
        for _ in 0..300 {
            manager.update(TICK);
        }
        assert_eq!(manager.history().count(), MAX_HISTORY);
        assert_eq!(manager.dominant(), Emotion::Excited);
        assert!(manager.history().all(|s| s.intensity > HISTORY_MIN_INTENSITY));
    }

    #[test]
    fn test_empty_history_dominant_is_neutral() {
        assert_eq!(EmotionManager::default().dominant(), Emotion::Neutral);
    }

    #[test]
    fn test_propagator_observe() {
        let mut propagator = EmotionPropagator::new(0.1);
        assert_eq!(propagator.observe("天气如何"), (Emotion::Neutral, 0.0));
        assert_eq!(propagator.manager().target(), (Emotion::Neutral, 0.0));

        let (emotion, _) = propagator.observe("我好累啊");
        assert_eq!(emotion, Emotion::Tired);
        assert_eq!(propagator.manager().target(), (Emotion::Tired, 1.0));

        for _ in 0..100 {
            propagator.update(TICK);
        }
        assert_eq!(propagator.current(), (Emotion::Tired, 1.0));

        propagator.reset();
        assert_eq!(propagator.current(), (Emotion::Neutral, 0.0));
    }
}
