use std::net::SocketAddr;

use futures::{sink::Sink, stream::Stream, SinkExt, StreamExt};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, WebSocketUpgrade,
    },
    response::IntoResponse,
    Extension, TypedHeader,
};
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, trace, warn, Instrument, Span};

use crate::{event_router::RouterHandle, events::Event};

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    user_agent: Option<TypedHeader<headers::UserAgent>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(router): Extension<RouterHandle>,
) -> impl IntoResponse {
    match user_agent {
        Some(TypedHeader(user_agent)) => info!("`{}`@`{addr}` connected", user_agent.as_str()),
        None => info!("`{addr}` connected"),
    }

    ws.on_upgrade(move |socket| {
        let span = info_span!("Client", %addr);

        handle_websocket(socket, router).instrument(span)
    })
}

/// Clients only listen, so anything they send is drained and ignored.
pub(crate) async fn read<S>(mut receiver: S)
where
    S: Unpin,
    S: Stream<Item = Result<Message, axum::Error>>,
{
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                trace!(%text, "client sent text, ignoring");
            }
            Message::Binary(_) => {
                debug!("client sent binary data");
            }
            Message::Ping(_) => {
                debug!("socket ping");
            }
            Message::Pong(_) => {
                debug!("socket pong");
            }
            Message::Close(_) => {
                debug!("client disconnected");
            }
        }
    }
}

pub(crate) async fn write(
    mut sender: impl Sink<Message> + Unpin,
    mut events: mpsc::UnboundedReceiver<Event>,
) {
    while let Some(event) = events.recv().await {
        trace!(%event, "Pushing event");

        if sender.send(Message::Text(event.serialize())).await.is_err() {
            debug!("client disconnected");
            return;
        }
    }
}

pub(crate) async fn handle_websocket(websocket: WebSocket, router: RouterHandle) {
    let subscription = match router.subscribe().await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(%e, "Could not subscribe client");
            return;
        }
    };
    let id = subscription.id;

    let (stream_sender, stream_receiver) = websocket.split();

    let span = Span::current();

    let mut read_handle =
        tokio::spawn(read(stream_receiver).instrument(info_span!(parent: &span, "Read")));
    let mut write_handle = tokio::spawn(
        write(stream_sender, subscription.events).instrument(info_span!(parent: &span, "Write")),
    );

    // Whichever side ends first ends the session.
    // Aborting the writer drops the socket, which closes the TCP connection.
    tokio::select! {
        _ = &mut read_handle => {
            debug!("Read task joined");
            write_handle.abort();
        }
        _ = &mut write_handle => {
            debug!("Write task joined");
            read_handle.abort();
        }
    }

    router.unsubscribe(id);
    info!(%id, "Session over");
}
