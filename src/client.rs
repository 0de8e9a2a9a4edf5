use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::{error::Error, events::Event};

/// A websocket connection to a running bridge.
///
/// Connecting subscribes to events, dropping the handle unsubscribes.
pub struct ClientHandle {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl ClientHandle {
    /// Connect to the bridge at the given address and port.
    pub async fn new(address: &str, port: u16) -> Result<Self, Error> {
        let url = format!("ws://{address}:{port}/ws");
        info!(%url, "Connecting to bridge");

        let (stream, http_response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| Error::Client(e.to_string()))?;

        debug!(status = %http_response.status(), "Connected");

        Ok(Self { stream })
    }

    /// Await the next event from the bridge.
    pub async fn next_event(&mut self) -> Result<Event, Error> {
        loop {
            let text = match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => text,
                Some(Ok(tungstenite::Message::Close(_))) | None => {
                    return Err(Error::Client("Connection closed".into()))
                }
                Some(Ok(other)) => {
                    debug!(?other, "Ignoring non-text message");
                    continue;
                }
                Some(Err(e)) => return Err(Error::Client(e.to_string())),
            };

            return serde_json::from_str(&text)
                .map_err(|e| Error::Client(format!("Could not deserialize `{text}`: {e}")));
        }
    }

    /// Await the next event which is not a link state change.
    pub async fn next_data_event(&mut self) -> Result<Event, Error> {
        loop {
            match self.next_event().await? {
                Event::Link(state) => debug!(%state, "Skipping link event"),
                event => return Ok(event),
            }
        }
    }

    /// Close the connection politely.
    pub async fn close(mut self) -> Result<(), Error> {
        self.stream
            .close(None)
            .await
            .map_err(|e| Error::Client(e.to_string()))
    }
}
