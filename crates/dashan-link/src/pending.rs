//! 同步请求关联表
//!
//! 每个等待响应的请求分配一个单调递增的 [`RequestId`]，并持有独立的一次性通道。
//! 上行帧到达时按命令码匹配**最早**登记的同命令请求（同命令 FIFO）；
//! ERROR 帧匹配最早登记的任意请求。请求超时后自行注销，互不影响。

use crate::LinkError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use dashan_protocol::{Command, ErrorReport, Frame};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// 请求标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub fn value(self) -> u64 {
        self.0
    }
}

type Response = Result<Vec<u8>, LinkError>;

struct PendingEntry {
    id: RequestId,
    command: Command,
    responder: Sender<Response>,
}

/// 待响应请求表
pub struct PendingTable {
    next_id: AtomicU64,
    entries: Mutex<VecDeque<PendingEntry>>,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// 登记一个请求；必须在帧进入发送队列之前调用，避免响应先于登记到达
    pub fn register(&self, command: Command) -> PendingRequest {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = bounded(1);
        self.entries.lock().push_back(PendingEntry {
            id,
            command,
            responder: tx,
        });
        PendingRequest { id, command, rx }
    }

    /// 用上行帧解析一个等待者，返回帧是否已被消费
    pub fn resolve(&self, frame: &Frame) -> bool {
        let Some(command) = frame.command() else {
            return false;
        };

        let entry = {
            let mut entries = self.entries.lock();
            let position = if command == Command::Error {
                if entries.is_empty() { None } else { Some(0) }
            } else {
                entries.iter().position(|e| e.command == command)
            };
            position.and_then(|index| entries.remove(index))
        };

        let Some(entry) = entry else {
            return false;
        };

        let response = if command == Command::Error {
            match ErrorReport::parse(&frame.payload) {
                Ok(report) => Err(LinkError::Remote(report)),
                Err(e) => Err(LinkError::Protocol(e)),
            }
        } else {
            Ok(frame.payload.clone())
        };

        debug!(
            "Resolved request #{} ({}) with {}",
            entry.id.0,
            entry.command,
            if response.is_ok() { "response" } else { "error" }
        );
        // 等待者可能恰好超时离开，发送失败可以忽略
        let _ = entry.responder.try_send(response);
        true
    }

    /// 以指定错误结束某个请求（如写失败）
    pub fn fail(&self, id: RequestId, error: LinkError) -> bool {
        match self.take(id) {
            Some(entry) => {
                let _ = entry.responder.try_send(Err(error));
                true
            },
            None => false,
        }
    }

    /// 注销请求，返回是否仍在表中
    pub fn cancel(&self, id: RequestId) -> bool {
        self.take(id).is_some()
    }

    /// 以同一类错误结束全部请求（关闭/断链）
    pub fn fail_all(&self, make_error: impl Fn() -> LinkError) -> usize {
        let drained: Vec<PendingEntry> = self.entries.lock().drain(..).collect();
        if !drained.is_empty() {
            warn!("Failing {} pending request(s)", drained.len());
        }
        for entry in &drained {
            let _ = entry.responder.try_send(Err(make_error()));
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn take(&self, id: RequestId) -> Option<PendingEntry> {
        let mut entries = self.entries.lock();
        let index = entries.iter().position(|e| e.id == id)?;
        entries.remove(index)
    }
}

/// 一个已登记请求的等待端
pub struct PendingRequest {
    id: RequestId,
    command: Command,
    rx: Receiver<Response>,
}

impl PendingRequest {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn command(&self) -> Command {
        self.command
    }

    /// 阻塞等待响应（通道唤醒，不轮询）
    pub fn wait(self, table: &PendingTable, timeout: Duration) -> Result<Vec<u8>, LinkError> {
        match self.rx.recv_timeout(timeout) {
            Ok(response) => response,
            Err(RecvTimeoutError::Timeout) => {
                if table.cancel(self.id) {
                    return Err(LinkError::CommandTimeout {
                        command: self.command,
                        timeout,
                    });
                }
                // 注销前一刻被解析：解析方已取走条目，随即写入或丢弃发送端
                self.rx.recv().unwrap_or(Err(LinkError::CommandTimeout {
                    command: self.command,
                    timeout,
                }))
            },
            Err(RecvTimeoutError::Disconnected) => Err(LinkError::ChannelClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_resolve_matching_command() {
        let table = PendingTable::new();
        let request = table.register(Command::GetStatus);
        assert_eq!(table.len(), 1);

        assert!(table.resolve(&Frame::new(Command::GetStatus, vec![1, 2, 3])));
        assert!(table.is_empty());
        assert_eq!(
            request.wait(&table, Duration::from_millis(10)).unwrap(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_unmatched_frame_not_consumed() {
        let table = PendingTable::new();
        let _request = table.register(Command::GetStatus);
        assert!(!table.resolve(&Frame::new(Command::SensorData, vec![0; 4])));
        assert!(!table.resolve(&Frame::raw(0x42, vec![])));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_same_command_is_fifo() {
        let table = PendingTable::new();
        let first = table.register(Command::Heartbeat);
        let second = table.register(Command::Heartbeat);
        assert!(first.id() < second.id());

        table.resolve(&Frame::new(Command::Heartbeat, vec![1]));
        table.resolve(&Frame::new(Command::Heartbeat, vec![2]));

        let timeout = Duration::from_millis(10);
        assert_eq!(first.wait(&table, timeout).unwrap(), vec![1]);
        assert_eq!(second.wait(&table, timeout).unwrap(), vec![2]);
    }

    #[test]
    fn test_interleaved_commands_resolve_independently() {
        let table = PendingTable::new();
        let status = table.register(Command::GetStatus);
        let state = table.register(Command::SetState);

        // 后登记的请求先得到响应
        table.resolve(&Frame::new(Command::SetState, vec![3]));
        let timeout = Duration::from_millis(10);
        assert_eq!(state.wait(&table, timeout).unwrap(), vec![3]);

        table.resolve(&Frame::new(Command::GetStatus, vec![9]));
        assert_eq!(status.wait(&table, timeout).unwrap(), vec![9]);
    }

    #[test]
    fn test_error_frame_resolves_oldest_with_remote() {
        let table = PendingTable::new();
        let first = table.register(Command::SetServo);
        let _second = table.register(Command::GetStatus);

        assert!(table.resolve(&Frame::new(Command::Error, vec![7, 2, 0])));
        match first.wait(&table, Duration::from_millis(10)) {
            Err(LinkError::Remote(report)) => assert_eq!(report.code, 7),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_timeout_unregisters() {
        let table = PendingTable::new();
        let request = table.register(Command::GetStatus);
        let result = request.wait(&table, Duration::from_millis(20));
        assert!(matches!(
            result,
            Err(LinkError::CommandTimeout {
                command: Command::GetStatus,
                ..
            })
        ));
        assert!(table.is_empty());
        // 迟到的响应不会被消费
        assert!(!table.resolve(&Frame::new(Command::GetStatus, vec![])));
    }

    #[test]
    fn test_fail_all() {
        let table = PendingTable::new();
        let a = table.register(Command::GetStatus);
        let b = table.register(Command::Heartbeat);
        assert_eq!(table.fail_all(|| LinkError::Unavailable), 2);

        let timeout = Duration::from_millis(10);
        assert!(matches!(a.wait(&table, timeout), Err(LinkError::Unavailable)));
        assert!(matches!(b.wait(&table, timeout), Err(LinkError::Unavailable)));
    }

    #[test]
    fn test_concurrent_waiters() {
        let table = Arc::new(PendingTable::new());
        let requests: Vec<_> = (0..4).map(|_| table.register(Command::GetStatus)).collect();

        let handles: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let table = table.clone();
                thread::spawn(move || request.wait(&table, Duration::from_secs(1)))
            })
            .collect();

        for i in 0..4u8 {
            table.resolve(&Frame::new(Command::GetStatus, vec![i]));
        }

        let mut payloads: Vec<u8> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap()[0])
            .collect();
        payloads.sort_unstable();
        assert_eq!(payloads, vec![0, 1, 2, 3]);
    }
}
