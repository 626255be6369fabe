//! 错误类型

use crate::state::Trigger;
use dashan_behavior::BehaviorError;
use dashan_link::LinkError;
use dashan_protocol::RobotState;
use std::path::PathBuf;
use thiserror::Error;

/// 配置加载错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// 控制层错误
///
/// 全部可恢复：调用方记录日志后跳过该指令继续运行。
#[derive(Error, Debug)]
pub enum CoreError {
    /// 当前状态下该触发器没有对应的转移
    #[error("No transition from {from} on {trigger}")]
    InvalidStateTransition { from: RobotState, trigger: Trigger },

    #[error("Unknown state: {0}")]
    UnknownState(String),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Behavior error: {0}")]
    Behavior(#[from] BehaviorError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// 命令 JSON 无法解析或参数不合法
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}
