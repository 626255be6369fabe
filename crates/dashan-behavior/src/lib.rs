//! # Dashan Behavior
//!
//! 四个行为合成子系统，各自独占内部状态：
//!
//! - `animation`: 命名关键帧动画，同一时刻只播放一个
//! - `expression`: 情绪预设 + 优先级图层合成，空闲微表情
//! - `ptz`: 云台运动（缓动、跟踪、空闲巡视、场景扫描）
//! - `emotion`: 文本情绪检测与强度平滑
//!
//! 每个子系统都有一个不依赖时钟的纯状态机（传入 `now` 推进），
//! 以及一个在独立线程中按固定节拍驱动它的运行时包装，输出统一写入 [`ActuatorSink`]。

use thiserror::Error;

pub mod actuation;
pub mod animation;
pub mod easing;
pub mod emotion;
pub mod expression;
pub mod ptz;
pub mod ticker;

pub use actuation::{Actuation, ActuationSource, ActuatorSink};
pub use animation::{Animation, AnimationEngine, AnimationPlayer, Keyframe};
pub use easing::Easing;
pub use emotion::{Emotion, EmotionDetector, EmotionManager, EmotionPropagator, EmotionState};
pub use expression::{
    BlendMode, ComposedExpression, ComposerSnapshot, ExpressionBuilder, ExpressionComposer,
    ExpressionLayer, ExpressionRuntime, IdleBehavior, MicroExpression, Mood, MoodPreset,
};
pub use ptz::{
    PtzConfig, PtzController, PtzLimits, PtzMode, PtzMovement, PtzPosition, PtzSnapshot,
    PtzState, TrackingTarget,
};
pub use ticker::TickLoop;

/// 行为层错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BehaviorError {
    #[error("Unknown animation: {0}")]
    UnknownAnimation(String),

    #[error("Unknown preset: {0}")]
    UnknownPreset(String),

    #[error("Animation {0} has no keyframes")]
    EmptyAnimation(String),

    #[error("Preset {0} cannot be removed")]
    ProtectedPreset(String),

    #[error("Failed to spawn {name} loop: {message}")]
    Spawn { name: String, message: String },
}
