use std::io;

use thiserror::Error;

/// Problems the line source might encounter.
/// None of these are fatal, they all lead to a reconnect attempt.
#[derive(Debug, Error)]
pub enum SerialPortError {
    /// The device could not be opened.
    /// For example a bad path, a busy device, or missing permissions.
    #[error("Could not open `{device}`, problem: {problem}")]
    Connection {
        /// The device we tried to open.
        device: String,

        /// What went wrong.
        problem: String,
    },

    /// Runtime IO fault on an open connection.
    #[error("Underlying IO problem")]
    Stream(#[from] io::Error),
}
