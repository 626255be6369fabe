//! 触发器与状态转移表
//!
//! | 当前 | 触发器 | 目标 |
//! |------|--------|------|
//! | SLEEP | `WakeWord` / `Proximity` | WAKE |
//! | WAKE | `DwellElapsed` | LISTEN |
//! | LISTEN | `SpeechRecognized` | THINK |
//! | THINK | `ResponseReady` | TALK |
//! | TALK | `SpeechFinished` | LISTEN |
//! | 非 SLEEP | `IdleTimeout` | SLEEP |

use dashan_behavior::{Mood, PtzMode};
use dashan_protocol::{Expression, RobotState};
use std::fmt;

/// 状态转移触发器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    WakeWord,
    Proximity,
    DwellElapsed,
    SpeechRecognized,
    ResponseReady,
    SpeechFinished,
    IdleTimeout,
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::WakeWord => "wake_word",
            Trigger::Proximity => "proximity",
            Trigger::DwellElapsed => "dwell_elapsed",
            Trigger::SpeechRecognized => "speech_recognized",
            Trigger::ResponseReady => "response_ready",
            Trigger::SpeechFinished => "speech_finished",
            Trigger::IdleTimeout => "idle_timeout",
        }
    }

    /// 计时器触发器不算作交互；其余触发器仅在被接受时刷新空闲计时
    pub fn is_interaction(&self) -> bool {
        !matches!(self, Trigger::DwellElapsed | Trigger::IdleTimeout)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 查表：`from` 状态下 `trigger` 的目标状态
pub fn next_state(from: RobotState, trigger: Trigger) -> Option<RobotState> {
    use RobotState::*;
    match (from, trigger) {
        (Sleep, Trigger::WakeWord | Trigger::Proximity) => Some(Wake),
        (Wake, Trigger::DwellElapsed) => Some(Listen),
        (Listen, Trigger::SpeechRecognized) => Some(Think),
        (Think, Trigger::ResponseReady) => Some(Talk),
        (Talk, Trigger::SpeechFinished) => Some(Listen),
        (Wake | Listen | Think | Talk, Trigger::IdleTimeout) => Some(Sleep),
        _ => None,
    }
}

/// 云台在各状态下的行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtzPlan {
    /// 回原点并切到手动模式
    Home,
    Mode(PtzMode),
}

/// 进入某状态时的副作用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateEffects {
    pub expression: Expression,
    pub brightness: u8,
    pub animation: Option<&'static str>,
    pub mood: Mood,
    pub ptz: PtzPlan,
    /// 该状态下合成器是否接管面部与注视
    pub composer_enabled: bool,
}

impl StateEffects {
    pub fn for_state(state: RobotState) -> Self {
        match state {
            RobotState::Sleep => Self {
                expression: Expression::Sleep,
                brightness: 100,
                animation: Some("shy"),
                mood: Mood::Neutral,
                ptz: PtzPlan::Home,
                composer_enabled: false,
            },
            RobotState::Wake => Self {
                expression: Expression::Wake,
                brightness: 255,
                animation: Some("surprised"),
                mood: Mood::Surprised,
                ptz: PtzPlan::Mode(PtzMode::RandomIdle),
                composer_enabled: true,
            },
            RobotState::Listen => Self {
                expression: Expression::Listen,
                brightness: 255,
                animation: Some("tilt"),
                mood: Mood::Listening,
                ptz: PtzPlan::Mode(PtzMode::RandomIdle),
                composer_enabled: true,
            },
            RobotState::Think => Self {
                expression: Expression::Think,
                brightness: 255,
                animation: Some("think"),
                mood: Mood::Thinking,
                ptz: PtzPlan::Mode(PtzMode::Manual),
                composer_enabled: true,
            },
            RobotState::Talk => Self {
                expression: Expression::Talk,
                brightness: 255,
                animation: None,
                mood: Mood::Speaking,
                ptz: PtzPlan::Mode(PtzMode::GazeFollow),
                composer_enabled: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIGGERS: [Trigger; 7] = [
        Trigger::WakeWord,
        Trigger::Proximity,
        Trigger::DwellElapsed,
        Trigger::SpeechRecognized,
        Trigger::ResponseReady,
        Trigger::SpeechFinished,
        Trigger::IdleTimeout,
    ];

    #[test]
    fn test_sleep_only_wakes_on_wake_or_proximity() {
        for trigger in TRIGGERS {
            let next = next_state(RobotState::Sleep, trigger);
            match trigger {
                Trigger::WakeWord | Trigger::Proximity => assert_eq!(next, Some(RobotState::Wake)),
                _ => assert_eq!(next, None, "{trigger} must not leave SLEEP"),
            }
        }
    }

    #[test]
    fn test_idle_timeout_from_every_awake_state() {
        for state in RobotState::ALL {
            let next = next_state(state, Trigger::IdleTimeout);
            if state == RobotState::Sleep {
                assert_eq!(next, None);
            } else {
                assert_eq!(next, Some(RobotState::Sleep));
            }
        }
    }

    #[test]
    fn test_conversation_cycle() {
        let mut state = RobotState::Sleep;
        for trigger in [
            Trigger::WakeWord,
            Trigger::DwellElapsed,
            Trigger::SpeechRecognized,
            Trigger::ResponseReady,
            Trigger::SpeechFinished,
        ] {
            state = next_state(state, trigger).unwrap();
        }
        assert_eq!(state, RobotState::Listen);
    }

    #[test]
    fn test_effects_table() {
        let sleep = StateEffects::for_state(RobotState::Sleep);
        assert_eq!(sleep.brightness, 100);
        assert_eq!(sleep.animation, Some("shy"));
        assert_eq!(sleep.ptz, PtzPlan::Home);

        assert_eq!(StateEffects::for_state(RobotState::Talk).animation, None);
        assert_eq!(StateEffects::for_state(RobotState::Think).mood, Mood::Thinking);
        for state in RobotState::ALL {
            assert_eq!(StateEffects::for_state(state).expression, state.expression());
        }
    }

    #[test]
    fn test_timer_triggers_are_not_interactions() {
        assert!(!Trigger::IdleTimeout.is_interaction());
        assert!(!Trigger::DwellElapsed.is_interaction());
        assert!(Trigger::SpeechFinished.is_interaction());
    }
}
