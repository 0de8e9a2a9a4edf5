//! A mock, useful to test serial port functionality without the actual serial ports.

use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Mutex},
};

use tokio::{
    io::{duplex, DuplexStream},
    time::Instant,
};
use tracing::debug;

use crate::serial::{error::SerialPortError, Connector};

const MOCK_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug)]
enum Script {
    Device(DuplexStream),
    Fail(String),
}

#[derive(Debug, Default)]
struct Inner {
    scripts: VecDeque<Script>,
    attempts: Vec<Instant>,
}

/// A [`Connector`] which plays back a script of open outcomes.
///
/// Each call to [`Connector::open`] takes the next entry of the script.
/// When the script runs out, opening fails as if the device is missing.
///
/// Clones share the same script, so a test can keep a clone around
/// to feed it while a line source owns another.
#[derive(Debug, Clone)]
pub struct ScriptedConnector {
    name: String,
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedConnector {
    /// Create a connector with an empty script.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            inner: Arc::default(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panicking test thread is the only way to poison this.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The next open attempt succeeds.
    /// Bytes written to the returned stream arrive at the line source.
    /// Dropping it closes the connection.
    pub fn push_device(&self) -> DuplexStream {
        let (ours, theirs) = duplex(MOCK_BUFFER_SIZE);
        self.lock().scripts.push_back(Script::Device(ours));
        theirs
    }

    /// The next open attempt fails with the given problem.
    pub fn push_failure(&self, problem: &str) {
        self.lock().scripts.push_back(Script::Fail(problem.to_owned()));
    }

    /// When each open attempt was made.
    pub fn attempts(&self) -> Vec<Instant> {
        self.lock().attempts.clone()
    }
}

impl Connector for ScriptedConnector {
    type Stream = DuplexStream;

    fn open(&mut self) -> Result<Self::Stream, SerialPortError> {
        let mut inner = self.lock();
        inner.attempts.push(Instant::now());

        let problem = match inner.scripts.pop_front() {
            Some(Script::Device(stream)) => {
                debug!(name = %self.name, "Mock device opened");
                return Ok(stream);
            }
            Some(Script::Fail(problem)) => problem,
            None => io::Error::from(io::ErrorKind::NotFound).to_string(),
        };

        Err(SerialPortError::Connection {
            device: self.name.clone(),
            problem,
        })
    }

    fn device(&self) -> &str {
        &self.name
    }
}
