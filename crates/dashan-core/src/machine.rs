//! 行为状态机
//!
//! 只维护当前状态与两个计时器（WAKE 停留、空闲超时），不产生任何 I/O。
//! 副作用由调用方根据返回的 [`Transition`] 施加（见 `controller`）。

use crate::error::CoreError;
use crate::state::{Trigger, next_state};
use dashan_protocol::RobotState;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    /// 非 SLEEP 状态下无交互多久后入睡
    pub idle_timeout: Duration,
    /// WAKE 停留多久后进入 LISTEN
    pub wake_dwell: Duration,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            wake_dwell: Duration::from_secs(1),
        }
    }
}

/// 一次已发生的状态切换
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: RobotState,
    pub to: RobotState,
    /// `None` 表示管理性强制切换
    pub trigger: Option<Trigger>,
    pub at: Instant,
}

#[derive(Debug, Clone)]
pub struct RobotStateMachine {
    config: MachineConfig,
    state: RobotState,
    entered_at: Instant,
    last_interaction: Instant,
}

impl RobotStateMachine {
    /// 初始状态为 SLEEP
    pub fn new(config: MachineConfig, now: Instant) -> Self {
        Self {
            config,
            state: RobotState::Sleep,
            entered_at: now,
            last_interaction: now,
        }
    }

    pub fn state(&self) -> RobotState {
        self.state
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn time_in_state(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.entered_at)
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_interaction)
    }

    /// 记录一次交互（不改变状态）
    pub fn mark_interaction(&mut self, now: Instant) {
        self.last_interaction = now;
    }

    /// 按转移表处理触发器
    ///
    /// - 无对应转移：`InvalidStateTransition`，状态不变
    /// - 目标即当前状态：`Ok(None)`
    ///
    /// 只有被接受的交互触发器才刷新空闲计时。
    pub fn fire(&mut self, trigger: Trigger, now: Instant) -> Result<Option<Transition>, CoreError> {
        let Some(to) = next_state(self.state, trigger) else {
            return Err(CoreError::InvalidStateTransition {
                from: self.state,
                trigger,
            });
        };
        if trigger.is_interaction() {
            self.last_interaction = now;
        }
        Ok(self.enter(to, Some(trigger), now))
    }

    /// 管理性切换到任意状态
    pub fn force_state(&mut self, state: RobotState, now: Instant) -> Option<Transition> {
        self.last_interaction = now;
        self.enter(state, None, now)
    }

    /// 检查 WAKE 停留与空闲超时，到期时执行对应的转移
    pub fn check_timers(&mut self, now: Instant) -> Option<Transition> {
        if self.state == RobotState::Wake && self.time_in_state(now) >= self.config.wake_dwell {
            return self.fire(Trigger::DwellElapsed, now).ok().flatten();
        }
        if self.state != RobotState::Sleep && self.idle_for(now) >= self.config.idle_timeout {
            info!("Idle for {:?}, going to sleep", self.idle_for(now));
            return self.fire(Trigger::IdleTimeout, now).ok().flatten();
        }
        None
    }

    fn enter(&mut self, to: RobotState, trigger: Option<Trigger>, now: Instant) -> Option<Transition> {
        if to == self.state {
            debug!("Already in {}, ignoring", to);
            return None;
        }
        let from = self.state;
        self.state = to;
        self.entered_at = now;
        match trigger {
            Some(trigger) => info!("Transitioning from {} to {} ({})", from, to, trigger),
            None => info!("Transitioning from {} to {} (forced)", from, to),
        }
        Some(Transition {
            from,
            to,
            trigger,
            at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(t0: Instant, s: f64) -> Instant {
        t0 + Duration::from_secs_f64(s)
    }

    fn machine(t0: Instant) -> RobotStateMachine {
        RobotStateMachine::new(MachineConfig::default(), t0)
    }

    #[test]
    fn test_invalid_trigger_keeps_state() {
        let t0 = Instant::now();
        let mut m = machine(t0);
        let err = m.fire(Trigger::ResponseReady, t0).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidStateTransition {
                from: RobotState::Sleep,
                trigger: Trigger::ResponseReady
            }
        ));
        assert_eq!(m.state(), RobotState::Sleep);
    }

    #[test]
    fn test_wake_dwell_then_listen() {
        let t0 = Instant::now();
        let mut m = machine(t0);
        let t = m.fire(Trigger::Proximity, t0).unwrap().unwrap();
        assert_eq!((t.from, t.to), (RobotState::Sleep, RobotState::Wake));

        assert!(m.check_timers(secs(t0, 0.5)).is_none());
        let t = m.check_timers(secs(t0, 1.0)).unwrap();
        assert_eq!(t.to, RobotState::Listen);
        assert_eq!(t.trigger, Some(Trigger::DwellElapsed));
    }

    #[test]
    fn test_idle_timeout_fires_exactly_once() {
        let t0 = Instant::now();
        let mut m = machine(t0);
        m.fire(Trigger::WakeWord, t0).unwrap();
        m.check_timers(secs(t0, 1.0));
        assert_eq!(m.state(), RobotState::Listen);

        assert!(m.check_timers(secs(t0, 29.9)).is_none());
        let t = m.check_timers(secs(t0, 30.0)).unwrap();
        assert_eq!((t.from, t.to), (RobotState::Listen, RobotState::Sleep));

        for s in [30.1, 45.0, 120.0] {
            assert!(m.check_timers(secs(t0, s)).is_none());
        }
        assert_eq!(m.state(), RobotState::Sleep);
    }

    #[test]
    fn test_interaction_defers_idle_timeout() {
        let t0 = Instant::now();
        let mut m = machine(t0);
        m.fire(Trigger::WakeWord, t0).unwrap();
        m.check_timers(secs(t0, 1.0));
        m.fire(Trigger::SpeechRecognized, secs(t0, 20.0)).unwrap();
        assert!(m.check_timers(secs(t0, 40.0)).is_none());
        assert_eq!(m.check_timers(secs(t0, 50.0)).unwrap().to, RobotState::Sleep);
    }

    #[test]
    fn test_rejected_proximity_does_not_defer_idle_timeout() {
        let t0 = Instant::now();
        let mut m = machine(t0);
        m.fire(Trigger::WakeWord, t0).unwrap();
        m.check_timers(secs(t0, 1.0));
        assert_eq!(m.state(), RobotState::Listen);

        // 有人一直站在传感器前但不说话
        let mut slept_at = None;
        for step in 1..=24 {
            let now = secs(t0, step as f64 * 5.0);
            assert!(m.fire(Trigger::Proximity, now).is_err());
            if let Some(t) = m.check_timers(now) {
                slept_at = Some((step, t.to));
                break;
            }
        }
        assert_eq!(slept_at, Some((6, RobotState::Sleep)));
    }

    #[test]
    fn test_force_state_and_self_transition() {
        let t0 = Instant::now();
        let mut m = machine(t0);
        assert!(m.force_state(RobotState::Sleep, t0).is_none());
        let t = m.force_state(RobotState::Think, t0).unwrap();
        assert_eq!(t.trigger, None);
        assert_eq!(m.state(), RobotState::Think);
        assert_eq!(m.fire(Trigger::ResponseReady, t0).unwrap().unwrap().to, RobotState::Talk);
    }

    #[test]
    fn test_full_turn() {
        let t0 = Instant::now();
        let mut m = machine(t0);
        let steps = [
            (Trigger::WakeWord, RobotState::Wake),
            (Trigger::DwellElapsed, RobotState::Listen),
            (Trigger::SpeechRecognized, RobotState::Think),
            (Trigger::ResponseReady, RobotState::Talk),
            (Trigger::SpeechFinished, RobotState::Listen),
        ];
        for (trigger, expected) in steps {
            m.fire(trigger, t0).unwrap();
            assert_eq!(m.state(), expected);
        }
    }
}
