use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::serial::error::SerialPortError;

/// Serial port related errors.
pub mod error;

/// The reconnecting line source.
pub mod line_source;

/// Codecs for decoding messages from wire.
pub mod codecs;

/// The state of the link to the serial device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// Nothing attempted yet.
    Idle,

    /// An open attempt is in progress.
    Opening,

    /// The device is open and lines are being read.
    Open,

    /// The device is closed, a reopen may be pending.
    Closed,
}

impl Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkState::Idle => "idle",
            LinkState::Opening => "opening",
            LinkState::Open => "open",
            LinkState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// What a line source produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// A complete, trimmed line.
    Line(String),

    /// The link went up or down.
    Link(LinkState),
}

/// Something which can open a fresh byte stream to a device.
///
/// Called once per connection attempt, a stream is never reused.
pub trait Connector: Send + Sync + 'static {
    /// The byte stream an open connection reads from.
    type Stream: AsyncRead + Unpin + Send + 'static;

    /// Try opening the device.
    fn open(&mut self) -> Result<Self::Stream, SerialPortError>;

    /// A human readable identifier of the device.
    fn device(&self) -> &str;
}

/// Opens a real serial port.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    path: String,
    baud: u32,
}

impl SerialConnector {
    /// The path should likely be along the lines of `/dev/ttyACMx` on unix, and `COMx` on Windows.
    pub fn new(path: &str, baud: u32) -> Self {
        Self {
            path: path.to_owned(),
            baud,
        }
    }
}

impl Connector for SerialConnector {
    type Stream = SerialStream;

    fn open(&mut self) -> Result<Self::Stream, SerialPortError> {
        tokio_serial::new(&self.path, self.baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| SerialPortError::Connection {
                device: self.path.clone(),
                problem: e.to_string(),
            })
    }

    fn device(&self) -> &str {
        &self.path
    }
}
