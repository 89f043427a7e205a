use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::common::{
    ChatError, ChatResult, ConnectionState, Identity, OutboundFrame, TransportCommand,
};
use crate::config::ChatConfig;

use super::stomp::{StompCommand, StompFrame, parse_frames};
use super::transport::{BrokerSession, open_broker_socket};

type FrameListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Anything outbound frames can be published through.
pub trait FramePublisher: Send + Sync {
    fn publish(&self, frame: &OutboundFrame) -> ChatResult<()>;
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: String,
    pub reconnect_delay: Duration,
    pub heartbeat: Duration,
    pub connect_timeout: Duration,
}

impl From<&ChatConfig> for TransportConfig {
    fn from(config: &ChatConfig) -> Self {
        Self {
            url: config.broker_url.clone(),
            reconnect_delay: config.reconnect_delay(),
            heartbeat: config.heartbeat(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

/// The single reconnecting broker connection of a chat session.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct TransportConnection {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    config: TransportConfig,
    state: watch::Sender<ConnectionState>,
    /// Bumped by every connect/disconnect; workers from older epochs are muted.
    /// Held across each state write so a muted worker cannot land one late.
    epoch: Mutex<u64>,
    commands: Mutex<Option<mpsc::UnboundedSender<TransportCommand>>>,
    frame_listeners: Mutex<Vec<FrameListener>>,
    worker: Mutex<Option<Worker>>,
}

struct Worker {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

enum SessionEnd {
    Shutdown,
    Lost(String),
}

impl TransportConnection {
    pub fn new(config: TransportConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(TransportInner {
                config,
                state,
                epoch: Mutex::new(0),
                commands: Mutex::new(None),
                frame_listeners: Mutex::new(Vec::new()),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Starts the connection task. A no-op while a task is already running.
    pub fn connect(&self, identity: &Identity, credential: &str) {
        let mut worker = self.inner.worker.lock();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            log::debug!("Transport already active for {}", identity.email);
            return;
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        *self.inner.commands.lock() = Some(command_tx);
        let epoch = self.inner.advance_epoch(ConnectionState::Connecting);

        log::info!("Connecting to broker at {} as {}", self.inner.config.url, identity.email);
        let task = ConnectionTask {
            inner: Arc::clone(&self.inner),
            epoch,
            credential: credential.to_string(),
            commands: command_rx,
            stop: stop_rx,
        };
        *worker = Some(Worker {
            stop: stop_tx,
            handle: tokio::spawn(task.run()),
        });
    }

    /// Tears the connection down. Subscriptions die with the socket.
    pub fn disconnect(&self) {
        let worker = self.inner.worker.lock().take();
        self.inner.commands.lock().take();
        self.inner.advance_epoch(ConnectionState::Disconnected);
        if let Some(worker) = worker {
            let _ = worker.stop.send(true);
            log::info!("Disconnected from broker");
        }
    }

    /// Registers a callback invoked with the body of every inbound MESSAGE frame.
    pub fn on_frame<F>(&self, listener: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.frame_listeners.lock().push(Arc::new(listener));
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }
}

impl FramePublisher for TransportConnection {
    /// Sends when connected. Otherwise logs and drops the frame; nothing is queued.
    fn publish(&self, frame: &OutboundFrame) -> ChatResult<()> {
        if !self.is_connected() {
            log::warn!(
                "Dropping {:?} for {}: not connected",
                frame.kind,
                frame.recipient_id
            );
            return Err(ChatError::NotConnected);
        }

        let body = serde_json::to_string(frame)?;
        let commands = self.inner.commands.lock();
        let sender = commands.as_ref().ok_or(ChatError::NotConnected)?;
        sender
            .send(TransportCommand::Publish {
                destination: frame.destination(),
                body,
            })
            .map_err(|_| ChatError::NotConnected)
    }
}

impl TransportInner {
    /// Starts a new epoch in `state`, muting every older worker.
    fn advance_epoch(&self, state: ConnectionState) -> u64 {
        let mut epoch = self.epoch.lock();
        *epoch += 1;
        self.replace_state(state);
        *epoch
    }

    fn set_state(&self, epoch: u64, state: ConnectionState) {
        let current = self.epoch.lock();
        if *current == epoch {
            self.replace_state(state);
        }
    }

    fn replace_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            log::info!("Broker connection {previous} -> {state}");
        }
    }

    fn dispatch_frame(&self, body: &str) {
        let listeners: Vec<FrameListener> = self.frame_listeners.lock().clone();
        for listener in listeners {
            listener(body);
        }
    }
}

struct ConnectionTask {
    inner: Arc<TransportInner>,
    epoch: u64,
    credential: String,
    commands: mpsc::UnboundedReceiver<TransportCommand>,
    stop: watch::Receiver<bool>,
}

/// Resolves once a stop was requested or the owning handle is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

impl ConnectionTask {
    async fn run(mut self) {
        let config = self.inner.config.clone();
        loop {
            self.inner.set_state(self.epoch, ConnectionState::Connecting);

            let mut stop = self.stop.clone();
            let opened = tokio::select! {
                _ = stopped(&mut stop) => break,
                opened = open_broker_socket(
                    &config.url,
                    &self.credential,
                    config.heartbeat,
                    config.connect_timeout,
                ) => opened,
            };

            match opened {
                Ok(session) => {
                    let subscription_id = session.subscription_id.clone();
                    self.discard_stale_commands();
                    self.inner.set_state(self.epoch, ConnectionState::Connected);
                    match self.pump(session).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(reason) => {
                            log::warn!("Lost broker connection ({subscription_id}): {reason}");
                        }
                    }
                }
                Err(err) => log::warn!("Broker connection attempt failed: {err}"),
            }

            self.inner.set_state(self.epoch, ConnectionState::Connecting);
            log::info!("Reconnecting in {:?}", config.reconnect_delay);
            tokio::select! {
                _ = stopped(&mut stop) => break,
                _ = tokio::time::sleep(config.reconnect_delay) => {}
            }
        }

        self.inner.set_state(self.epoch, ConnectionState::Disconnected);
        log::debug!("Connection task {} finished", self.epoch);
    }

    /// Publishes issued before this connection existed are not replayed.
    fn discard_stale_commands(&mut self) {
        let mut dropped = 0usize;
        while self.commands.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            log::warn!("Discarded {dropped} publish(es) issued while offline");
        }
    }

    async fn pump(&mut self, session: BrokerSession) -> SessionEnd {
        let BrokerSession {
            socket, heartbeat, ..
        } = session;
        let (mut sink, mut stream) = socket.split();
        // Tolerate a couple of missed beats before calling the broker gone.
        let silence_limit = heartbeat.incoming.map(|interval| interval * 3);
        let period = match (heartbeat.outgoing, heartbeat.incoming) {
            (Some(out), Some(inc)) => out.min(inc),
            (Some(interval), None) | (None, Some(interval)) => interval,
            (None, None) => Duration::from_secs(3_600),
        };
        let mut last_seen = Instant::now();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stop = self.stop.clone();

        loop {
            tokio::select! {
                _ = stopped(&mut stop) => {
                    let goodbye = StompFrame::disconnect().encode();
                    if let Err(err) = sink.send(WsMessage::text(goodbye)).await {
                        log::debug!("DISCONNECT not delivered: {err}");
                    }
                    let _ = sink.close().await;
                    return SessionEnd::Shutdown;
                }
                command = self.commands.recv() => {
                    let Some(TransportCommand::Publish { destination, body }) = command else {
                        return SessionEnd::Shutdown;
                    };
                    log::debug!("SEND {destination}: {body}");
                    let frame = StompFrame::send(destination, body).encode();
                    if let Err(err) = sink.send(WsMessage::text(frame)).await {
                        return SessionEnd::Lost(format!("send failed: {err}"));
                    }
                }
                _ = ticker.tick(), if !heartbeat.is_off() => {
                    if let Some(limit) = silence_limit {
                        if last_seen.elapsed() > limit {
                            return SessionEnd::Lost(format!("no data from broker for {limit:?}"));
                        }
                    }
                    if heartbeat.outgoing.is_some() {
                        if let Err(err) = sink.send(WsMessage::text("\n")).await {
                            return SessionEnd::Lost(format!("heart-beat failed: {err}"));
                        }
                    }
                }
                incoming = stream.next() => {
                    last_seen = Instant::now();
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            if let Err(reason) = self.handle_payload(text.as_str()) {
                                return SessionEnd::Lost(reason);
                            }
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            return SessionEnd::Lost(format!("closed by broker: {frame:?}"));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return SessionEnd::Lost(err.to_string()),
                        None => return SessionEnd::Lost("stream ended".into()),
                    }
                }
            }
        }
    }

    /// Delivers MESSAGE bodies to listeners. A broker ERROR ends the session.
    fn handle_payload(&self, payload: &str) -> Result<(), String> {
        let frames = match parse_frames(payload) {
            Ok(frames) => frames,
            Err(err) => {
                log::warn!("Dropping malformed STOMP payload: {err}");
                return Ok(());
            }
        };

        for frame in frames {
            match frame.command {
                StompCommand::Message => self.inner.dispatch_frame(&frame.body),
                StompCommand::Error => return Err(format!("broker error: {}", frame.error_reason())),
                other => log::debug!("Ignoring {other} frame"),
            }
        }
        Ok(())
    }
}
