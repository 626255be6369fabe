//! 内存回环链路（无硬件依赖）
//!
//! [`MockLink`] 交给 [`LinkTransport`](crate::LinkTransport) 使用，
//! [`MockPeer`] 扮演固件一端：注入上行字节、取出下行帧。

use crate::{LinkError, LinkReader, LinkWriter, SplittableLink};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use dashan_protocol::{Command, Frame, FrameAssembler, encode};
use std::time::{Duration, Instant};

/// 主控侧的模拟链路
pub struct MockLink {
    inbound: Receiver<Vec<u8>>,
    outbound: Sender<Vec<u8>>,
    read_timeout: Duration,
}

/// 固件侧的模拟对端
pub struct MockPeer {
    to_link: Option<Sender<Vec<u8>>>,
    from_link: Receiver<Vec<u8>>,
    assembler: FrameAssembler,
}

impl MockLink {
    pub fn pair() -> (MockLink, MockPeer) {
        Self::pair_with_timeout(Duration::from_millis(5))
    }

    pub fn pair_with_timeout(read_timeout: Duration) -> (MockLink, MockPeer) {
        let (to_link, inbound) = unbounded();
        let (outbound, from_link) = unbounded();
        (
            MockLink {
                inbound,
                outbound,
                read_timeout,
            },
            MockPeer {
                to_link: Some(to_link),
                from_link,
                assembler: FrameAssembler::new(),
            },
        )
    }
}

impl SplittableLink for MockLink {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn split(self) -> Result<(MockReader, MockWriter), LinkError> {
        Ok((
            MockReader {
                inbound: self.inbound,
                leftover: Vec::new(),
                read_timeout: self.read_timeout,
            },
            MockWriter {
                outbound: self.outbound,
            },
        ))
    }
}

pub struct MockReader {
    inbound: Receiver<Vec<u8>>,
    leftover: Vec<u8>,
    read_timeout: Duration,
}

impl LinkReader for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        if self.leftover.is_empty() {
            match self.inbound.recv_timeout(self.read_timeout) {
                Ok(chunk) => self.leftover = chunk,
                Err(RecvTimeoutError::Timeout) => return Err(LinkError::Timeout),
                Err(RecvTimeoutError::Disconnected) => return Err(LinkError::Unavailable),
            }
        }
        let n = self.leftover.len().min(buf.len());
        buf[..n].copy_from_slice(&self.leftover[..n]);
        self.leftover.drain(..n);
        Ok(n)
    }
}

pub struct MockWriter {
    outbound: Sender<Vec<u8>>,
}

impl LinkWriter for MockWriter {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.outbound
            .send(bytes.to_vec())
            .map_err(|_| LinkError::Unavailable)
    }
}

impl MockPeer {
    /// 注入原始上行字节（可为任意片段）
    pub fn inject_bytes(&self, bytes: &[u8]) {
        if let Some(tx) = &self.to_link {
            let _ = tx.send(bytes.to_vec());
        }
    }

    /// 注入一个完整上行帧
    pub fn inject_frame(&self, cmd: Command, payload: &[u8]) {
        if let Ok(bytes) = encode(cmd.code(), payload) {
            self.inject_bytes(&bytes);
        }
    }

    /// 等待下一个下行帧
    pub fn next_sent_frame(&mut self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.assembler.next_frame() {
                return Some(frame);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match self.from_link.recv_timeout(remaining) {
                Ok(bytes) => self.assembler.push(&bytes),
                Err(_) => return None,
            }
        }
    }

    /// 取出当前已写出的全部下行帧（不等待）
    pub fn drain_sent_frames(&mut self) -> Vec<Frame> {
        while let Ok(bytes) = self.from_link.try_recv() {
            self.assembler.push(&bytes);
        }
        self.assembler.drain_frames()
    }

    /// 断开上行方向，读端随后得到 `Unavailable`
    pub fn disconnect(&mut self) {
        self.to_link = None;
    }
}
