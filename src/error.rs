use thiserror::Error;

/// Errors thay may occur in this library.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The configuration is not usable.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// A configuration file could not be read or parsed.
    #[error("The configuration file `{path}` could not be used. Problem: {problem}")]
    ConfigFile {
        /// Where the file was expected.
        path: String,

        /// What went wrong.
        problem: String,
    },

    /// The web server could not be started or stopped unexpectedly.
    #[error("Server problem: {0}")]
    Server(String),

    /// The event router task is no longer running.
    #[error("The event router is not running")]
    RouterGone,

    /// Problem talking to a bridge as a client.
    #[error("Client problem: {0}")]
    Client(String),
}

impl Error {
    /// Get the problem description if this is [`Error::BadConfig`].
    pub fn try_into_bad_config(self) -> Result<String, Self> {
        if let Self::BadConfig(v) = self {
            Ok(v)
        } else {
            Err(self)
        }
    }
}
