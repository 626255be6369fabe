//! 串口后端（`serialport`）

use crate::{LinkError, LinkReader, LinkWriter, SplittableLink};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, info};

impl From<serialport::Error> for LinkError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::NoDevice => LinkError::Unavailable,
            serialport::ErrorKind::Io(kind) => LinkError::Io(std::io::Error::new(kind, e.description)),
            _ => LinkError::Device(e.description),
        }
    }
}

/// 已打开的串口
pub struct SerialLink {
    port: Box<dyn serialport::SerialPort>,
    path: String,
}

impl SerialLink {
    /// 打开串口（8N1，无流控）
    pub fn open(path: &str, baud: u32, read_timeout: Duration) -> Result<Self, LinkError> {
        let port = serialport::new(path, baud).timeout(read_timeout).open()?;
        info!("Opened serial port {} @ {} baud", path, baud);
        Ok(Self {
            port,
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl SplittableLink for SerialLink {
    type Reader = SerialReader;
    type Writer = SerialWriter;

    fn split(self) -> Result<(SerialReader, SerialWriter), LinkError> {
        let writer = self.port.try_clone()?;
        debug!("Split serial port {} into reader/writer", self.path);
        Ok((SerialReader { port: self.port }, SerialWriter { port: writer }))
    }
}

pub struct SerialReader {
    port: Box<dyn serialport::SerialPort>,
}

impl LinkReader for SerialReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Err(LinkError::Timeout),
            Err(e) => Err(LinkError::Io(e)),
        }
    }
}

pub struct SerialWriter {
    port: Box<dyn serialport::SerialPort>,
}

impl LinkWriter for SerialWriter {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }
}

/// 列出系统中的串口
pub fn available_ports() -> Result<Vec<String>, LinkError> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|p| p.port_name)
        .collect())
}
