//! # Dashan Link
//!
//! 串口链路层：把字节流抽象为读/写两半，在其上运行读线程与写线程，
//! 并为同步请求提供按请求独立的响应关联。
//!
//! ```text
//! LinkTransport::send ──► 发送队列 ──► writer 线程 ──► LinkWriter
//!        ▲                                              │
//!        │ PendingTable            reader 线程 ◄── LinkReader
//!        └──────── 响应帧 ◄──────── FrameAssembler ──► LinkObserver（非请求帧）
//! ```

use dashan_protocol::{Command, ErrorReport, ProtocolError};
use std::time::Duration;
use thiserror::Error;

pub mod heartbeat;
pub mod metrics;
pub mod observer;
pub mod pending;
pub mod transport;

#[cfg(feature = "serial")]
pub mod serial;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use heartbeat::HeartbeatMonitor;
pub use metrics::{LinkMetrics, LinkMetricsSnapshot};
pub use observer::{LinkObserver, ObserverRegistry};
pub use pending::{PendingRequest, PendingTable, RequestId};
pub use transport::{LinkConfig, LinkTransport};

#[cfg(feature = "serial")]
pub use serial::{SerialLink, available_ports};

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockLink, MockPeer};

/// 链路层统一错误类型
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    /// 读超时（空闲，属于正常事件）
    #[error("Read timeout")]
    Timeout,

    /// 链路不可用（设备断开、流结束），重连由外部负责
    #[error("Link unavailable")]
    Unavailable,

    /// 同步请求在时限内未收到响应
    #[error("Command {command} timed out after {timeout:?}")]
    CommandTimeout { command: Command, timeout: Duration },

    /// 传输已关闭
    #[error("Link channel closed")]
    ChannelClosed,

    /// 发送队列已满
    #[error("Outbound queue full (capacity: {0})")]
    QueueFull(usize),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Device error: {0}")]
    Device(String),

    /// 固件以 ERROR 帧回应
    #[error("Remote error: {0}")]
    Remote(ErrorReport),
}

impl LinkError {
    /// 致命错误：读写线程遇到后应退出并标记链路断开
    pub fn is_fatal(&self) -> bool {
        match self {
            LinkError::Unavailable | LinkError::Device(_) => true,
            LinkError::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

/// 链路读半部
///
/// `read` 在读超时内没有数据时返回 `LinkError::Timeout`；
/// 返回 `Ok(0)` 表示流结束。
pub trait LinkReader: Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError>;
}

/// 链路写半部
pub trait LinkWriter: Send {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError>;
}

/// 可拆分为独立读/写两半的链路
pub trait SplittableLink {
    type Reader: LinkReader + 'static;
    type Writer: LinkWriter + 'static;

    fn split(self) -> Result<(Self::Reader, Self::Writer), LinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_error_display() {
        assert_eq!(LinkError::Timeout.to_string(), "Read timeout");
        assert_eq!(LinkError::Unavailable.to_string(), "Link unavailable");
        assert_eq!(
            LinkError::QueueFull(64).to_string(),
            "Outbound queue full (capacity: 64)"
        );

        let err = LinkError::CommandTimeout {
            command: Command::GetStatus,
            timeout: Duration::from_millis(200),
        };
        assert_eq!(
            err.to_string(),
            "Command GET_STATUS(0x08) timed out after 200ms"
        );

        let err = LinkError::Remote(ErrorReport {
            code: 7,
            component: 2,
            detail: 0,
        });
        assert!(err.to_string().contains("InvalidParam"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err: LinkError = ProtocolError::BadHeader { found: 0 }.into();
        assert!(matches!(err, LinkError::Protocol(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(LinkError::Unavailable.is_fatal());
        assert!(!LinkError::Timeout.is_fatal());
        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "t");
        assert!(!LinkError::Io(timed_out).is_fatal());
        let broken = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "b");
        assert!(LinkError::Io(broken).is_fatal());
    }
}
