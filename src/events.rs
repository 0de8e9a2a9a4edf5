use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::serial::LinkState;

/// Events pushed to connected clients.
///
/// On the wire each event is a JSON object naming the event and carrying its data,
/// for example `{"event":"captcha","data":"X7KQ"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum Event {
    /// A line arrived from the serial device.
    Serial(String),

    /// A captcha was recognized, or is being replayed to a new client.
    Captcha(String),

    /// The serial link went up or down.
    Link(LinkState),
}

impl Event {
    /// Turn an event into serialized json.
    pub fn serialize(&self) -> String {
        serde_json::to_string(self).expect("Should serialize well")
    }

    /// An example of a captcha event.
    pub fn example_captcha() -> Self {
        Self::Captcha("X7KQ2".into())
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Serial(line) => {
                let line = line.chars().take(48).collect::<String>();
                write!(f, "serial: {line}")
            }
            Event::Captcha(captcha) => write!(f, "captcha: {captcha}"),
            Event::Link(state) => write!(f, "link: {state}"),
        }
    }
}
