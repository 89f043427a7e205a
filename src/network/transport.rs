use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

use crate::common::types::USER_QUEUE;
use crate::common::{ChatError, ChatResult};

use super::stomp::{StompCommand, StompFrame, parse_frames};

pub type BrokerSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Heart-beat intervals agreed with the broker. `None` means that direction is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    pub outgoing: Option<Duration>,
    pub incoming: Option<Duration>,
}

impl Heartbeat {
    /// Negotiates from our `heart-beat` offer and the CONNECTED header.
    /// A missing or unreadable server header disables both directions.
    pub fn negotiate(offered: Duration, server: Option<&str>) -> Self {
        let ours = offered.as_millis() as u64;
        let Some((sx, sy)) = server.and_then(parse_heart_beat) else {
            return Self::default();
        };
        Self {
            outgoing: agreed(ours, sy),
            incoming: agreed(ours, sx),
        }
    }

    pub fn is_off(&self) -> bool {
        self.outgoing.is_none() && self.incoming.is_none()
    }
}

fn agreed(ours: u64, theirs: u64) -> Option<Duration> {
    (ours != 0 && theirs != 0).then(|| Duration::from_millis(ours.max(theirs)))
}

fn parse_heart_beat(value: &str) -> Option<(u64, u64)> {
    let (x, y) = value.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

/// A socket past CONNECTED and subscribed to the private queue.
pub struct BrokerSession {
    pub socket: BrokerSocket,
    pub subscription_id: String,
    pub heartbeat: Heartbeat,
}

/// Opens the WebSocket, performs the STOMP CONNECT handshake and subscribes to
/// the user's private queue.
pub async fn open_broker_socket(
    url: &str,
    credential: &str,
    heartbeat: Duration,
    connect_timeout: Duration,
) -> ChatResult<BrokerSession> {
    let handshake = async {
        let (mut socket, _) = connect_async(url).await?;

        let offer = heartbeat.as_millis() as u64;
        let connect = StompFrame::connect(&broker_host(url), credential, offer);
        socket.send(WsMessage::text(connect.encode())).await?;
        let connected = await_connected(&mut socket).await?;
        let heartbeat = Heartbeat::negotiate(heartbeat, connected.get("heart-beat"));
        log::debug!("Negotiated heart-beat {heartbeat:?}");

        let subscription_id = format!("sub-{}", Uuid::new_v4());
        let subscribe = StompFrame::subscribe(&subscription_id, USER_QUEUE);
        socket.send(WsMessage::text(subscribe.encode())).await?;
        log::debug!("Subscribed to {USER_QUEUE} as {subscription_id}");

        Ok::<_, ChatError>(BrokerSession {
            socket,
            subscription_id,
            heartbeat,
        })
    };

    tokio::time::timeout(connect_timeout, handshake)
        .await
        .map_err(|_| ChatError::Transport(format!("handshake timed out after {connect_timeout:?}")))?
}

async fn await_connected(socket: &mut BrokerSocket) -> ChatResult<StompFrame> {
    while let Some(incoming) = socket.next().await {
        let payload = match incoming? {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        for frame in parse_frames(payload.as_str())? {
            match frame.command {
                StompCommand::Connected => {
                    log::debug!(
                        "Broker accepted STOMP {}",
                        frame.get("version").unwrap_or("1.2")
                    );
                    return Ok(frame);
                }
                StompCommand::Error => return Err(ChatError::Stomp(frame.error_reason())),
                other => log::debug!("Ignoring {other} before CONNECTED"),
            }
        }
    }
    Err(ChatError::Transport(
        "connection closed during handshake".into(),
    ))
}

/// Value for the STOMP `host` header.
pub fn broker_host(url: &str) -> String {
    url.parse::<Uri>()
        .ok()
        .and_then(|uri| uri.host().map(str::to_string))
        .unwrap_or_else(|| "localhost".to_string())
}
