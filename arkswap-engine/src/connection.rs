//! Connection manager: the real-time update subsystem.
//!
//! Keeps a WebSocket to the provider open, subscribing every monitored swap
//! and reconciling with periodic polls. When the socket cannot be opened or
//! drops, falls back to polling with its own backoff until a socket connects
//! again.

use crate::config::EngineConfig;
use arkswap_provider::ws::WsRequest;
use arkswap_provider::ws::WsResponse;
use arkswap_provider::ProviderClient;
use arkswap_provider::SwapStatus;
use futures::SinkExt;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Events the connection manager delivers to the lifecycle engine.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The WebSocket opened.
    Connected,
    /// The WebSocket closed or could not be opened; polling covers for it.
    Disconnected { reason: Option<String> },
    /// A swap changed status (from the socket or a poll; callers cannot tell
    /// the difference).
    StatusUpdate { id: String, status: SwapStatus },
    /// The counterparty attached an error to a swap.
    SwapError { id: String, message: String },
}

enum Command {
    Subscribe(String),
    Unsubscribe(String),
    PollNow,
    Shutdown,
}

/// Handle to a running connection manager task.
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    monitored: Arc<RwLock<HashSet<String>>>,
}

impl ConnectionHandle {
    /// Track `id`: poll it and, when the socket is open, subscribe to its
    /// updates.
    pub async fn add_swap(&self, id: String) {
        {
            let mut monitored = self.monitored.write().await;
            if !monitored.insert(id.clone()) {
                return;
            }
        }
        let _ = self.commands.send(Command::Subscribe(id));
    }

    pub async fn remove_swap(&self, id: &str) {
        {
            let mut monitored = self.monitored.write().await;
            if !monitored.remove(id) {
                return;
            }
        }
        let _ = self.commands.send(Command::Unsubscribe(id.to_string()));
    }

    /// Trigger an immediate reconcile poll of every monitored swap.
    pub fn poll_now(&self) {
        let _ = self.commands.send(Command::PollNow);
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// Exponential backoff: `initial * 2^attempt`, capped at `max`.
pub(crate) fn backoff_delay(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    initial.saturating_mul(factor).min(max)
}

/// Turn one incoming frame into engine events, dropping ids we do not
/// monitor.
pub(crate) fn events_from_frame(
    text: &str,
    monitored: &HashSet<String>,
) -> Vec<ConnectionEvent> {
    let frame = match serde_json::from_str::<WsResponse>(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring unparsable frame");
            return Vec::new();
        }
    };

    match frame {
        WsResponse::Update { args, .. } => args
            .into_iter()
            .filter(|update| {
                let known = monitored.contains(&update.id);
                if !known {
                    tracing::debug!(swap_id = update.id, "Dropping update for unmonitored swap");
                }
                known
            })
            .map(|update| match update.error {
                Some(message) => ConnectionEvent::SwapError {
                    id: update.id,
                    message,
                },
                None => ConnectionEvent::StatusUpdate {
                    id: update.id,
                    status: update.status,
                },
            })
            .collect(),
        WsResponse::Error { channel, reason } => {
            tracing::warn!(channel, reason, "Provider stream error");
            Vec::new()
        }
        WsResponse::Subscribe { .. } | WsResponse::Unsubscribe { .. } | WsResponse::Pong => {
            Vec::new()
        }
    }
}

pub struct ConnectionManager {
    provider: ProviderClient,
    config: EngineConfig,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    monitored: Arc<RwLock<HashSet<String>>>,
}

impl ConnectionManager {
    /// Spawn the connection task. Events arrive on `events`; the returned
    /// handle adds and removes monitored swaps.
    pub fn spawn(
        provider: ProviderClient,
        config: EngineConfig,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> ConnectionHandle {
        let monitored = Arc::new(RwLock::new(HashSet::new()));
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let manager = ConnectionManager {
            provider,
            config,
            events,
            monitored: Arc::clone(&monitored),
        };

        tokio::spawn(manager.run(command_rx));

        ConnectionHandle {
            commands: command_tx,
            monitored,
        }
    }

    async fn run(self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut reconnect_attempt: u32 = 0;

        loop {
            let ws_url = self.provider.ws_url();

            tracing::debug!(url = %ws_url, "Opening provider stream");

            let connect =
                tokio::time::timeout(self.config.ws_open_timeout, connect_async(&ws_url)).await;

            match connect {
                Ok(Ok((stream, _))) => {
                    reconnect_attempt = 0;

                    let reason = self.run_open(stream, &mut commands).await;

                    match reason {
                        OpenExit::Shutdown => return,
                        OpenExit::Closed(reason) => {
                            let _ = self.events.send(ConnectionEvent::Disconnected {
                                reason: reason.clone(),
                            });

                            let delay = backoff_delay(
                                self.config.reconnect_delay,
                                self.config.max_reconnect_delay,
                                reconnect_attempt,
                            );
                            reconnect_attempt = reconnect_attempt.saturating_add(1);

                            tracing::warn!(
                                ?reason,
                                ?delay,
                                "Provider stream closed; reconnecting"
                            );

                            if self.sleep_or_shutdown(&mut commands, delay).await {
                                return;
                            }
                        }
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Failed to open provider stream; polling instead");
                    let _ = self.events.send(ConnectionEvent::Disconnected {
                        reason: Some(format!("failed to open stream: {e}")),
                    });

                    if self.run_polling_fallback(&mut commands).await {
                        return;
                    }
                }
                Err(_) => {
                    tracing::warn!(
                        timeout = ?self.config.ws_open_timeout,
                        "Provider stream open timed out; polling instead"
                    );
                    let _ = self.events.send(ConnectionEvent::Disconnected {
                        reason: Some("stream open timed out".to_string()),
                    });

                    if self.run_polling_fallback(&mut commands).await {
                        return;
                    }
                }
            }
        }
    }

    /// The Open state. Returns why we left it.
    async fn run_open(
        &self,
        stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> OpenExit {
        let (mut write, mut read) = stream.split();

        // Subscribe everything we monitor, then reconcile once immediately.
        let ids: Vec<String> = {
            let monitored = self.monitored.read().await;
            monitored.iter().cloned().collect()
        };

        if !ids.is_empty() {
            let frame = WsRequest::subscribe_swaps(ids);
            if let Err(e) = send_frame(&mut write, &frame).await {
                return OpenExit::Closed(Some(format!("failed to subscribe: {e}")));
            }
        }

        let _ = self.events.send(ConnectionEvent::Connected);

        self.poll_all().await;

        let mut poll_timer = tokio::time::interval(self.config.poll_interval);
        // The first tick of an interval fires immediately; we already polled.
        poll_timer.tick().await;

        loop {
            tokio::select! {
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            let monitored = self.monitored.read().await.clone();
                            for event in events_from_frame(&text, &monitored) {
                                let _ = self.events.send(event);
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return OpenExit::Closed(
                                frame.map(|f| f.reason.to_string()),
                            );
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return OpenExit::Closed(Some(e.to_string()));
                        }
                        None => {
                            return OpenExit::Closed(Some("stream ended".to_string()));
                        }
                    }
                }
                _ = poll_timer.tick() => {
                    self.poll_all().await;
                }
                command = commands.recv() => {
                    match command {
                        Some(Command::Subscribe(id)) => {
                            let frame = WsRequest::subscribe_swaps(vec![id]);
                            if let Err(e) = send_frame(&mut write, &frame).await {
                                return OpenExit::Closed(Some(format!(
                                    "failed to subscribe: {e}"
                                )));
                            }
                        }
                        Some(Command::Unsubscribe(id)) => {
                            let frame = WsRequest::unsubscribe_swaps(vec![id]);
                            if let Err(e) = send_frame(&mut write, &frame).await {
                                return OpenExit::Closed(Some(format!(
                                    "failed to unsubscribe: {e}"
                                )));
                            }
                        }
                        Some(Command::PollNow) => {
                            self.poll_all().await;
                        }
                        Some(Command::Shutdown) | None => {
                            let _ = write.send(Message::Close(None)).await;
                            return OpenExit::Shutdown;
                        }
                    }
                }
            }
        }
    }

    /// The PollingFallback state: poll with doubling delay, retrying the
    /// socket each round. Returns true on shutdown.
    async fn run_polling_fallback(
        &self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> bool {
        let mut attempt: u32 = 0;

        loop {
            self.poll_all().await;

            let delay = backoff_delay(
                self.config.poll_retry_delay,
                self.config.max_poll_retry_delay,
                attempt,
            );
            attempt = attempt.saturating_add(1);

            tracing::debug!(?delay, "Polling fallback sleeping");

            if self.sleep_or_shutdown(commands, delay).await {
                return true;
            }

            // Probe the socket; on success hand control back to the connect
            // loop.
            let probe = tokio::time::timeout(
                self.config.ws_open_timeout,
                connect_async(&self.provider.ws_url()),
            )
            .await;

            match probe {
                Ok(Ok((stream, _))) => {
                    match self.run_open(stream, commands).await {
                        OpenExit::Shutdown => return true,
                        OpenExit::Closed(reason) => {
                            let _ = self
                                .events
                                .send(ConnectionEvent::Disconnected { reason });
                            // Socket had opened, so fall back with a fresh
                            // schedule.
                            attempt = 0;
                        }
                    }
                }
                Ok(Err(_)) | Err(_) => {}
            }
        }
    }

    /// Poll every monitored swap concurrently; individual failures are
    /// logged, never fatal.
    async fn poll_all(&self) {
        let ids: Vec<String> = {
            let monitored = self.monitored.read().await;
            monitored.iter().cloned().collect()
        };

        if ids.is_empty() {
            return;
        }

        tracing::debug!(count = ids.len(), "Polling monitored swaps");

        let results = futures::future::join_all(ids.iter().map(|id| {
            let provider = self.provider.clone();
            async move { (id.clone(), provider.get_swap_status(id).await) }
        }))
        .await;

        for (id, result) in results {
            match result {
                Ok(response) => {
                    let event = match response.error {
                        Some(message) => ConnectionEvent::SwapError { id, message },
                        None => ConnectionEvent::StatusUpdate {
                            id,
                            status: response.status,
                        },
                    };
                    let _ = self.events.send(event);
                }
                Err(e) => {
                    tracing::warn!(swap_id = id, error = %e, "Poll failed for swap");
                }
            }
        }
    }

    /// Sleep for `delay`, returning early (true) if a shutdown command
    /// arrives. Subscribe/unsubscribe commands only mutate the monitored set
    /// while no socket is open, which the handle already did.
    async fn sleep_or_shutdown(
        &self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        delay: Duration,
    ) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                command = commands.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => return true,
                        Some(Command::PollNow) => self.poll_all().await,
                        Some(Command::Subscribe(_)) | Some(Command::Unsubscribe(_)) => {}
                    }
                }
            }
        }
    }
}

enum OpenExit {
    Shutdown,
    Closed(Option<String>),
}

async fn send_frame<S>(write: &mut S, frame: &WsRequest) -> Result<(), String>
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = serde_json::to_string(frame).map_err(|e| e.to_string())?;
    write
        .send(Message::Text(text))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_backoff_doubles_to_cap() {
        let initial = Duration::from_secs(1);
        let max = Duration::from_secs(60);

        let delays: Vec<u64> = (0..8)
            .map(|attempt| backoff_delay(initial, max, attempt).as_secs())
            .collect();

        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn polling_backoff_doubles_to_cap() {
        let initial = Duration::from_secs(5);
        let max = Duration::from_secs(300);

        let delays: Vec<u64> = (0..8)
            .map(|attempt| backoff_delay(initial, max, attempt).as_secs())
            .collect();

        assert_eq!(delays, vec![5, 10, 20, 40, 80, 160, 300, 300]);
    }

    #[test]
    fn frames_for_unmonitored_swaps_are_dropped() {
        let monitored: HashSet<String> = ["r1".to_string()].into_iter().collect();

        let text = r#"{"event":"update","channel":"swap.update","args":[{"id":"r1","status":"transaction.confirmed"},{"id":"other","status":"transaction.mempool"}]}"#;

        let events = events_from_frame(text, &monitored);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ConnectionEvent::StatusUpdate { id, status } => {
                assert_eq!(id, "r1");
                assert_eq!(status, &SwapStatus::TransactionConfirmed);
            }
            ConnectionEvent::Connected
            | ConnectionEvent::Disconnected { .. }
            | ConnectionEvent::SwapError { .. } => panic!("expected status update"),
        }
    }

    #[test]
    fn frame_error_becomes_swap_error() {
        let monitored: HashSet<String> = ["s1".to_string()].into_iter().collect();

        let text = r#"{"event":"update","channel":"swap.update","args":[{"id":"s1","status":"swap.expired","error":"lockup too low"}]}"#;

        let events = events_from_frame(text, &monitored);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ConnectionEvent::SwapError { id, message } => {
                assert_eq!(id, "s1");
                assert_eq!(message, "lockup too low");
            }
            ConnectionEvent::Connected
            | ConnectionEvent::Disconnected { .. }
            | ConnectionEvent::StatusUpdate { .. } => panic!("expected swap error"),
        }
    }

    #[test]
    fn garbage_frames_are_ignored() {
        let monitored = HashSet::new();
        assert!(events_from_frame("not json", &monitored).is_empty());
        assert!(events_from_frame(r#"{"event":"pong"}"#, &monitored).is_empty());
    }
}
