#![deny(missing_docs)]

//! Reads line-delimited text from a serial device and republishes it to web clients.
//!
//! Every line is pushed over websockets as a `serial` event.
//! Lines starting with `CAPTCHA:` are also pushed as a `captcha` event,
//! and the captcha is cached: clients connecting later get it right away,
//! and it can be queried at `/api/captcha`.
//!
//! If the serial device closes or cannot be opened, it is reopened after a fixed delay.

/// Code relating to setting up the server which sets up connections and spawns handlers for clients.
pub mod server;

/// Clients.
pub mod client;

/// The command line interface.
pub mod cli;

/// Classifies lines and fans events out to subscribers.
pub mod event_router;

/// Handles incoming websockets.
pub(crate) mod websocket;

/// Mocked serial port driver.
pub mod mock;

/// Serial port driver.
pub mod serial;

/// Relates to config files.
pub mod config;

/// Possible errors in this library.
pub mod error;

/// Logging/tracing setup.
pub mod logging;

/// Events the server pushes.
pub mod events;
