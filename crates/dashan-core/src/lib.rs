//! # Dashan Core
//!
//! 行为状态机与控制器：把感知事件（唤醒、接近、语音识别结果、远程命令）
//! 转换为状态切换，驱动各行为子系统，并把它们的输出仲裁后写入链路。
//!
//! ## 模块
//!
//! - `state`: 触发器与状态转移表
//! - `machine`: [`RobotStateMachine`]，状态与计时器
//! - `actuator`: 执行器写出步骤（优先级仲裁、去重、快照）
//! - `controller`: [`RobotController`]，组装链路、子系统和外部协作者
//! - `remote` / `telemetry` / `collaborators`: 外部接口
//! - `config` / `logging`: 配置文件与日志初始化

pub mod actuator;
pub mod collaborators;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod machine;
pub mod remote;
pub mod state;
pub mod telemetry;

pub use actuator::{ActuatorApply, ActuatorLink, ActuatorSnapshot};
pub use collaborators::{DialogueEngine, SpeechAudio, SpeechToText, TextToSpeech};
pub use config::RobotConfig;
pub use controller::{RobotController, RobotControllerBuilder};
pub use error::{ConfigError, CoreError};
pub use machine::{MachineConfig, RobotStateMachine, Transition};
pub use remote::RemoteCommand;
pub use state::{StateEffects, Trigger};
pub use telemetry::{NoopTelemetry, TelemetrySink, TelemetryUpdate};

pub use dashan_protocol::RobotState;
