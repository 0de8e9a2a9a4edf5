use std::time::Duration;

use futures::StreamExt;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::{codec::FramedRead, sync::CancellationToken};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::serial::{codecs::lines::LinesCodec, Connector, LinkState, SourceEvent};

/// The delay used between connection attempts if nothing else is set.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// How to behave when the device is closed or cannot be opened.
///
/// The delay is fixed, there is no backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Time between the link closing and the next open attempt.
    pub delay: Duration,

    /// How many open attempts in a row may fail before giving up.
    /// `None` means never give up.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Retry forever with the given delay.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Give up after this many consecutive failed open attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub(crate) fn should_retry(&self, consecutive_failures: u32) -> bool {
        self.max_attempts
            .map_or(true, |max| consecutive_failures < max)
    }
}

/// Builder for a [`LineSourceHandle`].
#[derive(Debug)]
pub struct LineSourceBuilder<C> {
    connector: C,
    codec: Option<LinesCodec>,
    policy: ReconnectPolicy,
}

impl<C: Connector> LineSourceBuilder<C> {
    /// Start a new builder which opens devices using the given connector.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            codec: None,
            policy: ReconnectPolicy::default(),
        }
    }

    /// Set the [`LinesCodec`] to use.
    /// Will split on newlines if not set.
    pub fn set_line_codec(mut self, codec: LinesCodec) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Set the [`ReconnectPolicy`] to use.
    pub fn set_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Start reading lines.
    ///
    /// Each complete line is sent on `events` in the order it arrived,
    /// along with the link going up or down.
    #[must_use]
    pub fn spawn(self, events: mpsc::UnboundedSender<SourceEvent>) -> LineSourceHandle {
        let device = self.connector.device().to_owned();

        info!(%device, policy = ?self.policy, "Starting line source");

        let (state_tx, state_rx) = watch::channel(LinkState::Idle);
        let cancel = CancellationToken::new();

        let source = LineSource {
            connector: self.connector,
            codec: self.codec.unwrap_or_default(),
            policy: self.policy,
            events,
            state: state_tx,
            cancel: cancel.clone(),
        };

        let tty_span = info_span!("tty", %device);
        let handle = tokio::spawn(source.run().instrument(tty_span));

        LineSourceHandle {
            device,
            state: state_rx,
            cancel,
            handle,
        }
    }
}

/// A handle to a running line source.
#[derive(Debug)]
pub struct LineSourceHandle {
    device: String,
    state: watch::Receiver<LinkState>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl LineSourceHandle {
    /// The device this source reads from.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// The current link state.
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Get a receiver which is notified on every state change.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    /// Stop the source, including any pending reconnect, and wait for it to finish.
    pub async fn shutdown(self) {
        debug!(device = %self.device, "Shutting down line source");
        self.cancel.cancel();
        self.join().await;
    }

    /// Wait for the source to finish on its own.
    /// This only happens if the reconnect policy gives up.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            warn!("Line source join error: {e:?}");
        }
    }
}

struct LineSource<C> {
    connector: C,
    codec: LinesCodec,
    policy: ReconnectPolicy,
    events: mpsc::UnboundedSender<SourceEvent>,
    state: watch::Sender<LinkState>,
    cancel: CancellationToken,
}

enum Session {
    /// The stream ended or failed.
    Ended,

    /// We were asked to stop.
    Cancelled,
}

impl<C: Connector> LineSource<C> {
    fn set_state(&self, state: LinkState) {
        self.state.send_replace(state);

        // Opening is internal churn, only tell listeners about the link going up or down.
        if matches!(state, LinkState::Open | LinkState::Closed)
            && self.events.send(SourceEvent::Link(state)).is_err()
        {
            trace!("No one is listening for link changes");
        }
    }

    async fn run(mut self) {
        let mut failures = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.set_state(LinkState::Opening);

            match self.connector.open() {
                Ok(stream) => {
                    failures = 0;
                    info!("Serial open");
                    self.set_state(LinkState::Open);

                    match self.read_lines(stream).await {
                        Session::Ended => warn!("Serial port closed"),
                        Session::Cancelled => {
                            self.set_state(LinkState::Closed);
                            break;
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    error!(%e, %failures, "Failed to open serial port");
                }
            }

            self.set_state(LinkState::Closed);

            if !self.policy.should_retry(failures) {
                error!(%failures, "Giving up on serial port");
                break;
            }

            info!(delay = ?self.policy.delay, "Attempting to reopen after delay");

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.policy.delay) => {}
            }
        }

        debug!("Line source stopped");
    }

    async fn read_lines(&self, stream: C::Stream) -> Session {
        let mut lines = FramedRead::new(stream, self.codec.clone());

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Session::Cancelled,
                line = lines.next() => match line {
                    Some(Ok(line)) => {
                        trace!(%line, "Line from port");

                        if self.events.send(SourceEvent::Line(line)).is_err() {
                            warn!("No one is listening for lines");
                        }
                    }
                    Some(Err(e)) => {
                        error!(%e, "Serial port error");
                        return Session::Ended;
                    }
                    None => return Session::Ended,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::mock::ScriptedConnector;

    const DELAY: Duration = Duration::from_secs(3);

    fn start(
        connector: ScriptedConnector,
    ) -> (LineSourceHandle, mpsc::UnboundedReceiver<SourceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = LineSourceBuilder::new(connector)
            .set_reconnect_policy(ReconnectPolicy::fixed(DELAY))
            .spawn(tx);

        (handle, rx)
    }

    #[test]
    fn policy_limits() {
        let forever = ReconnectPolicy::default();
        assert!(forever.should_retry(u32::MAX));

        let limited = ReconnectPolicy::default().with_max_attempts(2);
        assert!(limited.should_retry(1));
        assert!(!limited.should_retry(2));
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_lines_in_order() {
        let connector = ScriptedConnector::new("mock");
        let mut device = connector.push_device();
        let (handle, mut rx) = start(connector);

        assert_eq!(rx.recv().await, Some(SourceEvent::Link(LinkState::Open)));

        device.write_all(b"first\r\nsec").await.unwrap();
        device.write_all(b"ond\r\n  third  \n").await.unwrap();

        assert_eq!(rx.recv().await, Some(SourceEvent::Line("first".into())));
        assert_eq!(rx.recv().await, Some(SourceEvent::Line("second".into())));
        assert_eq!(rx.recv().await, Some(SourceEvent::Line("third".into())));
        assert_eq!(handle.state(), LinkState::Open);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn close_then_reopen_after_delay() {
        let connector = ScriptedConnector::new("mock");
        let mut device = connector.push_device();
        let mut second = connector.push_device();
        let (handle, mut rx) = start(connector.clone());

        assert_eq!(rx.recv().await, Some(SourceEvent::Link(LinkState::Open)));
        device.write_all(b"bye\npartial").await.unwrap();
        drop(device);

        assert_eq!(rx.recv().await, Some(SourceEvent::Line("bye".into())));
        assert_eq!(rx.recv().await, Some(SourceEvent::Link(LinkState::Closed)));
        assert_eq!(handle.state(), LinkState::Closed);

        assert_eq!(rx.recv().await, Some(SourceEvent::Link(LinkState::Open)));
        second.write_all(b"again\n").await.unwrap();
        assert_eq!(rx.recv().await, Some(SourceEvent::Line("again".into())));

        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1] - attempts[0] >= DELAY);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failures_retry_at_fixed_interval_forever() {
        let connector = ScriptedConnector::new("missing");
        let (handle, _rx) = start(connector.clone());

        // Attempts at 0, 3, 6, 9 and 12 seconds.
        tokio::time::sleep(Duration::from_millis(13_500)).await;

        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 5);

        for pair in attempts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= DELAY, "gap too short: {gap:?}");
            assert!(gap < DELAY + Duration::from_millis(10), "gap grew: {gap:?}");
        }

        assert_eq!(handle.state(), LinkState::Closed);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_policy_says_so() {
        let connector = ScriptedConnector::new("missing");
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = LineSourceBuilder::new(connector.clone())
            .set_reconnect_policy(ReconnectPolicy::fixed(DELAY).with_max_attempts(3))
            .spawn(tx);

        let state = handle.watch_state();
        handle.join().await;

        assert_eq!(connector.attempts().len(), 3);
        assert_eq!(*state.borrow(), LinkState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_pending_reconnect() {
        let connector = ScriptedConnector::new("missing");
        let (handle, _rx) = start(connector.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.shutdown().await;

        tokio::time::sleep(DELAY * 4).await;
        assert_eq!(connector.attempts().len(), 1);
    }
}
