//! The event router classifies lines from the serial device,
//! keeps the most recent captcha, and fans events out to subscribers.
//!
//! The [`EventRouter`] itself is plain synchronous state.
//! The [`RouterHandle`] runs it inside a single task, so all mutations
//! (lines arriving, clients joining and leaving) happen one at a time.

use std::{collections::HashMap, fmt::Display};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::{
    error::Error,
    events::Event,
    serial::{LinkState, SourceEvent},
};

/// Lines starting with this are captchas.
pub const CAPTCHA_PREFIX: &str = "CAPTCHA:";

/// Extract the captcha from a line, if it is one.
///
/// Everything after the first colon is kept (later colons included), then trimmed.
pub fn parse_captcha(line: &str) -> Option<&str> {
    line.strip_prefix(CAPTCHA_PREFIX).map(str::trim)
}

/// Identifies a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live subscription.
/// Events arrive on `events` in the order the lines that caused them arrived.
#[derive(Debug)]
pub struct Subscription {
    /// Use this to unsubscribe.
    pub id: SubscriberId,

    /// Events for this subscriber.
    pub events: mpsc::UnboundedReceiver<Event>,
}

/// Classifies lines, caches the latest captcha and broadcasts events.
#[derive(Debug, Default)]
pub struct EventRouter {
    captcha: Option<String>,
    link: Option<LinkState>,
    subscribers: HashMap<SubscriberId, mpsc::UnboundedSender<Event>>,
}

impl EventRouter {
    /// Create a router with no cached captcha and no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent captcha, if any has been seen.
    pub fn captcha(&self) -> Option<&str> {
        self.captcha.as_deref()
    }

    /// The most recent link state reported by the line source.
    pub fn link(&self) -> LinkState {
        self.link.unwrap_or(LinkState::Idle)
    }

    /// How many subscribers are registered.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn broadcast(&mut self, event: Event) {
        let mut gone = vec![];

        for (id, subscriber) in &self.subscribers {
            if subscriber.send(event.clone()).is_err() {
                gone.push(*id);
            }
        }

        for id in gone {
            debug!(%id, "Pruning closed subscriber");
            self.subscribers.remove(&id);
        }

        trace!(%event, listeners = self.subscribers.len(), "Broadcasted");
    }

    /// Handle a line from the serial device.
    ///
    /// Every line is broadcast as [`Event::Serial`].
    /// Captcha lines additionally update the cached captcha and are broadcast as [`Event::Captcha`].
    pub fn on_line(&mut self, line: &str) {
        let line = line.trim();
        info!("[Serial] {line}");

        self.broadcast(Event::Serial(line.to_owned()));

        if let Some(captcha) = parse_captcha(line) {
            info!(%captcha, "New captcha");
            self.captcha = Some(captcha.to_owned());
            self.broadcast(Event::Captcha(captcha.to_owned()));
        }
    }

    /// Handle the link changing state.
    /// Repeats of the same state are not broadcast.
    pub fn on_link(&mut self, state: LinkState) {
        if self.link == Some(state) {
            return;
        }

        self.link = Some(state);
        self.broadcast(Event::Link(state));
    }

    /// Handle anything the line source produces.
    pub fn on_source_event(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::Line(line) => self.on_line(&line),
            SourceEvent::Link(state) => self.on_link(state),
        }
    }

    /// Register a new subscriber.
    ///
    /// If a captcha is cached, the new subscriber gets it as its first event.
    pub fn subscribe(&mut self) -> Subscription {
        let id = SubscriberId::new();
        let (tx, rx) = mpsc::unbounded_channel();

        if let Some(captcha) = &self.captcha {
            debug!(%id, "Replaying captcha to new subscriber");
            // The receiver is in our hands, this can't fail.
            let _ = tx.send(Event::Captcha(captcha.clone()));
        }

        self.subscribers.insert(id, tx);
        info!(%id, subscribers = self.subscribers.len(), "Subscriber joined");

        Subscription { id, events: rx }
    }

    /// Remove a subscriber. Removing one which is already gone is fine.
    pub fn unsubscribe(&mut self, id: SubscriberId) {
        if self.subscribers.remove(&id).is_some() {
            info!(%id, subscribers = self.subscribers.len(), "Subscriber left");
        }
    }
}

#[derive(Debug)]
enum Request {
    Subscribe(oneshot::Sender<Subscription>),
    Unsubscribe(SubscriberId),
    Captcha(oneshot::Sender<Option<String>>),
    Link(oneshot::Sender<LinkState>),
}

/// A clonable handle to an [`EventRouter`] running in its own task.
#[derive(Debug, Clone)]
pub struct RouterHandle(mpsc::UnboundedSender<Request>);

impl RouterHandle {
    /// Spawn the router task.
    /// It consumes `source_events` until they end,
    /// and serves requests until every handle is dropped.
    pub fn new(source_events: mpsc::UnboundedReceiver<SourceEvent>) -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();

        tokio::spawn(run(EventRouter::new(), source_events, requests_rx));

        Self(requests_tx)
    }

    async fn ask<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T, Error> {
        let (tx, rx) = oneshot::channel();

        self.0.send(make(tx)).map_err(|_| Error::RouterGone)?;

        rx.await.map_err(|_| Error::RouterGone)
    }

    /// Subscribe to events. See [`EventRouter::subscribe`].
    pub async fn subscribe(&self) -> Result<Subscription, Error> {
        self.ask(Request::Subscribe).await
    }

    /// Unsubscribe. See [`EventRouter::unsubscribe`].
    pub fn unsubscribe(&self, id: SubscriberId) {
        if self.0.send(Request::Unsubscribe(id)).is_err() {
            debug!(%id, "Router gone, nothing to unsubscribe from");
        }
    }

    /// The most recent captcha.
    pub async fn captcha(&self) -> Result<Option<String>, Error> {
        self.ask(Request::Captcha).await
    }

    /// The most recent link state.
    pub async fn link(&self) -> Result<LinkState, Error> {
        self.ask(Request::Link).await
    }
}

fn handle_request(router: &mut EventRouter, request: Request) {
    // A requester giving up before the reply is not our problem.
    match request {
        Request::Subscribe(reply) => {
            let subscription = router.subscribe();
            let id = subscription.id;
            if reply.send(subscription).is_err() {
                router.unsubscribe(id);
            }
        }
        Request::Unsubscribe(id) => router.unsubscribe(id),
        Request::Captcha(reply) => {
            let _ = reply.send(router.captcha().map(ToOwned::to_owned));
        }
        Request::Link(reply) => {
            let _ = reply.send(router.link());
        }
    }
}

async fn run(
    mut router: EventRouter,
    mut source_events: mpsc::UnboundedReceiver<SourceEvent>,
    mut requests: mpsc::UnboundedReceiver<Request>,
) {
    let mut source_alive = true;

    loop {
        tokio::select! {
            // Lines first, so a request made after a line was delivered sees its effect.
            biased;

            event = source_events.recv(), if source_alive => match event {
                Some(event) => router.on_source_event(event),
                None => {
                    warn!("Line source ended, no more lines will arrive");
                    source_alive = false;
                }
            },
            request = requests.recv() => match request {
                Some(request) => handle_request(&mut router, request),
                None => break,
            },
        }
    }

    debug!("Router stopped");
}
