//! 机器人控制器
//!
//! 组装链路、状态机、四个行为子系统与外部协作者：
//!
//! ```text
//!  SerialLink ──> LinkTransport ──(observer)──> 事件通道 ──> 主循环 (10 Hz)
//!                      ^                                     │ 计时器 / 情绪衰减
//!                      │                                     v
//!               ActuatorApply <── 动画 / 合成器 / 云台   RobotStateMachine
//! ```
//!
//! 观察者回调运行在链路读线程中，只把事件转发到通道，
//! 状态切换（可能同步等待 SET_STATE 回显）统一在主循环或调用方线程中执行。

use crate::actuator::{ActuatorApply, ActuatorSnapshot};
use crate::collaborators::{DialogueEngine, SpeechToText, TextToSpeech};
use crate::config::RobotConfig;
use crate::error::CoreError;
use crate::machine::{RobotStateMachine, Transition};
use crate::remote::RemoteCommand;
use crate::state::{PtzPlan, StateEffects, Trigger};
use crate::telemetry::{NoopTelemetry, TelemetrySink, TelemetryUpdate};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use dashan_behavior::{
    Actuation, ActuationSource, ActuatorSink, AnimationEngine, AnimationPlayer, Emotion,
    EmotionPropagator, ExpressionComposer, ExpressionRuntime, PtzController, PtzMode, TickLoop,
};
use dashan_link::{LinkObserver, LinkTransport, SplittableLink};
use dashan_protocol::{ErrorReport, RobotState, SensorData, StatusReport};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// 读线程 -> 主循环的事件队列容量
const EVENT_QUEUE_CAPACITY: usize = 64;
/// PLAY_AUDIO 每帧的 PCM 字节数
const AUDIO_CHUNK: usize = 512;

// ==================== 链路事件 ====================

#[derive(Debug, Clone, Copy)]
enum LinkEvent {
    Sensor(SensorData),
    Status(StatusReport),
}

/// 把上行事件转交给主循环
struct EventForwarder {
    tx: Sender<LinkEvent>,
}

impl EventForwarder {
    fn forward(&self, event: LinkEvent) {
        if let Err(TrySendError::Full(event)) = self.tx.try_send(event) {
            trace!("Event queue full, dropping {:?}", event);
        }
    }
}

impl LinkObserver for EventForwarder {
    fn on_sensor(&self, sensor: &SensorData) {
        self.forward(LinkEvent::Sensor(*sensor));
    }

    fn on_status(&self, status: &StatusReport) {
        self.forward(LinkEvent::Status(*status));
    }

    fn on_error(&self, report: &ErrorReport) {
        warn!("Firmware reported error: {}", report);
    }
}

// ==================== 构建 ====================

/// [`RobotController`] 构建器
///
/// ```no_run
/// # fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// use dashan_core::{RobotConfig, RobotControllerBuilder};
/// use dashan_link::SerialLink;
/// use std::time::Duration;
///
/// let link = SerialLink::open("/dev/ttyUSB0", 115_200, Duration::from_millis(20))?;
/// let controller = RobotControllerBuilder::new(RobotConfig::default()).build(link)?;
/// controller.wake()?;
/// # Ok(())
/// # }
/// ```
pub struct RobotControllerBuilder {
    config: RobotConfig,
    stt: Option<Arc<dyn SpeechToText>>,
    tts: Option<Arc<dyn TextToSpeech>>,
    dialogue: Option<Arc<dyn DialogueEngine>>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl RobotControllerBuilder {
    pub fn new(config: RobotConfig) -> Self {
        Self {
            config,
            stt: None,
            tts: None,
            dialogue: None,
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    pub fn with_speech_to_text(mut self, stt: Arc<dyn SpeechToText>) -> Self {
        self.stt = Some(stt);
        self
    }

    pub fn with_text_to_speech(mut self, tts: Arc<dyn TextToSpeech>) -> Self {
        self.tts = Some(tts);
        self
    }

    pub fn with_dialogue(mut self, dialogue: Arc<dyn DialogueEngine>) -> Self {
        self.dialogue = Some(dialogue);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// 启动链路与全部节拍线程，初始状态为 SLEEP
    pub fn build<L: SplittableLink>(self, link: L) -> Result<RobotController, CoreError> {
        let config = self.config;
        let machine_config = config.machine_config()?;
        let main_period = config.main_period()?;
        let behavior = config.behavior.clone();

        let link = Arc::new(LinkTransport::start(link, config.link_config())?);
        let actuator = Arc::new(ActuatorApply::new(link.clone()));
        let sink: Arc<dyn ActuatorSink> = actuator.clone();

        let animation = Arc::new(AnimationEngine::new(
            AnimationPlayer::with_default_library(),
            sink.clone(),
            behavior.animation_hz,
        ));
        let composer = ExpressionComposer::new(behavior.seed).with_transition_speed(behavior.transition_speed);
        let expression = Arc::new(ExpressionRuntime::new(composer, sink.clone(), behavior.expression_hz));
        let ptz = Arc::new(PtzController::new(config.ptz_config(), sink, behavior.ptz_hz));
        actuator.attach(&animation, &ptz);

        let (event_tx, event_rx) = bounded(EVENT_QUEUE_CAPACITY);
        link.register_observer(Arc::new(EventForwarder { tx: event_tx }));

        let now = Instant::now();
        let shared = Arc::new(ControllerShared {
            machine: Mutex::new(RobotStateMachine::new(machine_config, now)),
            effects: Mutex::new(()),
            emotion: Mutex::new(EmotionPropagator::new(behavior.transition_speed)),
            speech_deadline: Mutex::new(None),
            last_sensor: Mutex::new(None),
            config,
            link,
            actuator,
            animation,
            expression,
            ptz,
            stt: self.stt,
            tts: self.tts,
            dialogue: self.dialogue,
            telemetry: self.telemetry,
        });

        // 初始 SLEEP 外观，不播放入睡动画
        shared.apply_effects(
            RobotState::Sleep,
            StateEffects {
                animation: None,
                ..StateEffects::for_state(RobotState::Sleep)
            },
        );
        shared.expression.start()?;
        shared.ptz.start()?;

        let main_loop = {
            let shared = shared.clone();
            let mut last_tick = now;
            TickLoop::spawn("dashan-main", main_period, move |at| {
                let dt = at.saturating_duration_since(last_tick);
                last_tick = at;
                shared.tick(&event_rx, at, dt);
            })?
        };
        info!("Robot controller started in {}", RobotState::Sleep);

        Ok(RobotController {
            shared,
            main_loop: Mutex::new(Some(main_loop)),
        })
    }
}

// ==================== 共享上下文 ====================

struct ControllerShared {
    config: RobotConfig,
    machine: Mutex<RobotStateMachine>,
    /// 串行化副作用施加；只在状态机锁之外获取
    effects: Mutex<()>,
    link: Arc<LinkTransport>,
    actuator: Arc<ActuatorApply>,
    animation: Arc<AnimationEngine>,
    expression: Arc<ExpressionRuntime>,
    ptz: Arc<PtzController>,
    emotion: Mutex<EmotionPropagator>,
    stt: Option<Arc<dyn SpeechToText>>,
    tts: Option<Arc<dyn TextToSpeech>>,
    dialogue: Option<Arc<dyn DialogueEngine>>,
    telemetry: Arc<dyn TelemetrySink>,
    /// TALK 预计结束时间
    speech_deadline: Mutex<Option<Instant>>,
    last_sensor: Mutex<Option<SensorData>>,
}

impl ControllerShared {
    /// 主循环一个节拍
    fn tick(&self, events: &Receiver<LinkEvent>, now: Instant, dt: Duration) {
        while let Ok(event) = events.try_recv() {
            self.handle_link_event(event, now);
        }

        let speech_done = {
            let mut deadline = self.speech_deadline.lock();
            match *deadline {
                Some(at) if now >= at => deadline.take().is_some(),
                _ => false,
            }
        };
        if speech_done {
            self.fire_logged(Trigger::SpeechFinished, now);
        }

        let expired = self.machine.lock().check_timers(now);
        if let Some(transition) = expired {
            self.commit(&transition);
        }

        let mut emotion = self.emotion.lock();
        emotion.update(dt);
        emotion.decay(self.config.behavior.emotion_decay);
    }

    fn handle_link_event(&self, event: LinkEvent, now: Instant) {
        match event {
            LinkEvent::Sensor(sensor) => {
                trace!(
                    "Sensor: distance={}mm proximity={} light={}",
                    sensor.distance_mm, sensor.proximity, sensor.light
                );
                *self.last_sensor.lock() = Some(sensor);
                if sensor.is_near() {
                    self.fire_logged(Trigger::Proximity, now);
                }
                let state = self.machine.lock().state();
                self.publish(state);
            },
            LinkEvent::Status(status) => {
                debug!(
                    "Firmware status: state={} battery={}% expression=0x{:02X}",
                    status.state, status.battery, status.expression
                );
            },
        }
    }

    /// 触发状态转移，释放状态机锁后再施加副作用
    fn fire(&self, trigger: Trigger, now: Instant) -> Result<Option<Transition>, CoreError> {
        let transition = self.machine.lock().fire(trigger, now)?;
        if let Some(transition) = &transition {
            self.commit(transition);
        }
        Ok(transition)
    }

    /// 计时器与传感器触发：无效转移属于常态，只记 debug
    fn fire_logged(&self, trigger: Trigger, now: Instant) {
        match self.fire(trigger, now) {
            Ok(_) => {},
            Err(e @ CoreError::InvalidStateTransition { .. }) => debug!("{}", e),
            Err(e) => warn!("{} failed: {}", trigger, e),
        }
    }

    fn force_state(&self, state: RobotState, now: Instant) -> Option<Transition> {
        let transition = self.machine.lock().force_state(state, now);
        if let Some(transition) = &transition {
            self.commit(transition);
        }
        transition
    }

    /// 施加转移的副作用；已被后续转移取代时跳过，由后者施加
    fn commit(&self, transition: &Transition) {
        let _effects = self.effects.lock();
        let current = self.machine.lock().state();
        if current != transition.to {
            debug!("Transition to {} superseded by {}", transition.to, current);
            return;
        }
        self.apply_transition(transition);
    }

    fn apply_transition(&self, transition: &Transition) {
        if transition.to == RobotState::Sleep {
            self.speech_deadline.lock().take();
        }
        self.apply_effects(transition.to, StateEffects::for_state(transition.to));
    }

    /// 本地副作用 -> SET_STATE -> 遥测
    fn apply_effects(&self, state: RobotState, effects: StateEffects) {
        self.actuator.set_composer_enabled(effects.composer_enabled);
        self.actuator.apply(Actuation {
            source: ActuationSource::External,
            expression: Some(effects.expression.code()),
            brightness: Some(effects.brightness),
            pan: None,
            tilt: None,
        });
        if let Some(name) = effects.animation
            && let Err(e) = self.animation.play(name)
        {
            debug!("Entry animation for {} skipped: {}", state, e);
        }
        self.expression.set_mood(effects.mood);
        match effects.ptz {
            PtzPlan::Home => self.ptz.reset(),
            PtzPlan::Mode(mode) => self.ptz.set_mode(mode),
        }

        if let Err(e) = self.link.set_state(state, self.config.link.confirm_state_changes) {
            warn!("Failed to send SET_STATE {}: {}", state, e);
        }
        self.publish(state);
    }

    fn publish(&self, state: RobotState) {
        let mut update = self.actuator.snapshot().to_telemetry(state.name());
        if let Some(sensor) = *self.last_sensor.lock() {
            update = update.with_sensor(sensor);
        }
        let (emotion, intensity) = self.emotion.lock().current();
        self.telemetry.publish(update.with_emotion(emotion, intensity));
    }

    /// 合成并播放语音，返回预计时长
    fn speak(&self, text: &str) -> Result<Duration, CoreError> {
        let Some(tts) = &self.tts else {
            warn!("No text-to-speech engine, dropping reply");
            return Ok(Duration::ZERO);
        };
        let Some(audio) = tts.synthesize(text) else {
            warn!("Speech synthesis produced no audio");
            return Ok(Duration::ZERO);
        };
        let frames = self.link.play_audio(audio.header, &audio.pcm, AUDIO_CHUNK)?;
        debug!("Speaking {:?} in {} frame(s)", audio.duration, frames);
        Ok(audio.duration)
    }
}

// ==================== 对外 API ====================

/// 机器人控制器
///
/// 所有方法都可以从任意线程调用；对话相关方法会同步调用外部协作者。
pub struct RobotController {
    shared: Arc<ControllerShared>,
    main_loop: Mutex<Option<TickLoop>>,
}

impl RobotController {
    pub fn state(&self) -> RobotState {
        self.shared.machine.lock().state()
    }

    pub fn config(&self) -> &RobotConfig {
        &self.shared.config
    }

    pub fn link(&self) -> &LinkTransport {
        &self.shared.link
    }

    pub fn animation(&self) -> &AnimationEngine {
        &self.shared.animation
    }

    pub fn expression(&self) -> &ExpressionRuntime {
        &self.shared.expression
    }

    pub fn ptz(&self) -> &PtzController {
        &self.shared.ptz
    }

    /// 最近写出的执行器值
    pub fn actuators(&self) -> ActuatorSnapshot {
        self.shared.actuator.snapshot()
    }

    pub fn emotion(&self) -> (Emotion, f64) {
        self.shared.emotion.lock().current()
    }

    /// 最近一次遥测视图
    pub fn telemetry(&self) -> TelemetryUpdate {
        let state = self.state();
        let mut update = self.actuators().to_telemetry(state.name());
        if let Some(sensor) = *self.shared.last_sensor.lock() {
            update = update.with_sensor(sensor);
        }
        let (emotion, intensity) = self.emotion();
        update.with_emotion(emotion, intensity)
    }

    /// 以触发器驱动状态机
    pub fn fire(&self, trigger: Trigger) -> Result<Option<Transition>, CoreError> {
        self.shared.fire(trigger, Instant::now())
    }

    /// 唤醒词检测命中
    pub fn wake(&self) -> Result<Option<Transition>, CoreError> {
        self.fire(Trigger::WakeWord)
    }

    /// 管理性切换状态
    pub fn force_state(&self, state: RobotState) -> Option<Transition> {
        self.shared.force_state(state, Instant::now())
    }

    /// 一轮对话：识别结果 -> 情绪 -> 回复 -> 播放
    ///
    /// 需处于 LISTEN；回复为空时结束对话回到 SLEEP。
    /// 播放结束（`SpeechFinished`）由主循环按预计时长触发。
    pub fn handle_utterance(&self, text: &str) -> Result<(), CoreError> {
        let shared = &self.shared;
        shared.fire(Trigger::SpeechRecognized, Instant::now())?;
        info!("Heard: {}", text);

        let (emotion, intensity) = shared.emotion.lock().observe(text);
        if emotion != Emotion::Neutral {
            debug!("Detected {} ({:.2})", emotion, intensity);
        }

        let Some(dialogue) = &shared.dialogue else {
            warn!("No dialogue engine configured");
            return Ok(());
        };
        let response = dialogue.respond(text);
        if response.trim().is_empty() {
            info!("Empty response, ending conversation");
            shared.force_state(RobotState::Sleep, Instant::now());
            return Ok(());
        }

        shared.fire(Trigger::ResponseReady, Instant::now())?;
        // TALK 期间以对方的情绪作为表情基调
        if emotion != Emotion::Neutral {
            shared.expression.set_mood(emotion.mood());
        }

        let duration = match shared.speak(&response) {
            Ok(duration) => duration,
            Err(e) => {
                warn!("Failed to play reply: {}", e);
                Duration::ZERO
            },
        };
        *shared.speech_deadline.lock() = Some(Instant::now() + duration);
        Ok(())
    }

    /// 录音数据：语音识别后进入对话
    pub fn handle_audio(&self, audio: &[u8]) -> Result<(), CoreError> {
        let Some(stt) = &self.shared.stt else {
            warn!("No speech-to-text engine configured");
            return Ok(());
        };
        match stt.transcribe(audio) {
            Some(text) if !text.trim().is_empty() => self.handle_utterance(&text),
            _ => {
                debug!("No speech recognised in {} bytes", audio.len());
                Ok(())
            },
        }
    }

    /// 执行一条远程命令
    pub fn handle_remote(&self, command: RemoteCommand) -> Result<(), CoreError> {
        let shared = &self.shared;
        debug!("Remote command: {:?}", command);
        shared.machine.lock().mark_interaction(Instant::now());

        match command {
            RemoteCommand::SetExpression {
                expression_id,
                brightness,
            } => shared.actuator.apply(Actuation {
                source: ActuationSource::External,
                expression: Some(expression_id),
                brightness: Some(brightness),
                pan: None,
                tilt: None,
            }),
            RemoteCommand::SetServo { servo_h, servo_v } => {
                let (pan, tilt) = (servo_h.min(180), servo_v.min(180));
                // 云台转为手动并停在该位置，避免下一个空闲/注视节拍覆盖
                shared.ptz.with_state(|ptz| {
                    ptz.set_mode(PtzMode::Manual);
                    ptz.set_pan_tilt(f64::from(pan), f64::from(tilt), Instant::now());
                });
                shared
                    .actuator
                    .apply(Actuation::pan_tilt(ActuationSource::External, pan, tilt));
            },
            RemoteCommand::PlayAnimation { animation } => shared.animation.play(&animation)?,
            RemoteCommand::Speak { text } => {
                shared.speak(&text)?;
            },
            RemoteCommand::SetState { state } => {
                let target = RobotState::from_name(&state).ok_or(CoreError::UnknownState(state))?;
                shared.force_state(target, Instant::now());
            },
        }
        Ok(())
    }

    /// 解析并执行一条 JSON 远程命令
    pub fn handle_remote_json(&self, json: &str) -> Result<(), CoreError> {
        self.handle_remote(RemoteCommand::parse(json)?)
    }

    /// 停止主循环与各子系统，链路随控制器一起释放
    pub fn shutdown(&self) {
        if let Some(mut main_loop) = self.main_loop.lock().take() {
            main_loop.stop();
            self.shared.animation.shutdown();
            self.shared.expression.shutdown();
            self.shared.ptz.shutdown();
            info!("Robot controller stopped");
        }
    }
}

impl Drop for RobotController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
