//! Slack RTM session: a WebSocket stream of workspace events.
//!
//! `connect` performs the `rtm.connect` call and the WebSocket handshake and
//! waits for the initial `hello` frame, so a completed connect means the
//! session is live. Events are pumped into an mpsc channel by a dedicated
//! task that dies with the socket or the session's cancellation token.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use super::types::{RtmConnectInfo, RtmEvent};
use super::{Client, Error};

/// Events delivered to the per-connection projector.
#[derive(Debug)]
pub enum SessionEvent {
    /// The RTM stream is (re-)established.
    Connected,
    /// The RTM stream ended; no further events will arrive.
    Disconnected(String),
    Event(RtmEvent),
}

/// A live RTM session.
pub struct Rtm {
    pub info: RtmConnectInfo,
    pub events: mpsc::Receiver<SessionEvent>,
}

/// Interval for client-side WebSocket keepalive pings.
const PING_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// Open an RTM session. Resolves once the `hello` frame has been read;
/// callers apply their own deadline around this future.
pub async fn connect(client: &Client, cancel: CancellationToken) -> Result<Rtm, Error> {
    let info = client.rtm_connect().await?;
    let (mut ws, _resp) = connect_async(info.url.as_str()).await.map_err(Box::new)?;

    // The server sends hello as the first frame once the session is ready.
    loop {
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                if matches!(decode_frame(&text), Some(RtmEvent::Hello)) {
                    break;
                }
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(Error::WebSocket(Box::new(e))),
            None => {
                return Err(Error::Api("RTM stream closed before hello".to_string()));
            }
        }
    }

    let (tx, events) = mpsc::channel(256);
    // Queue the initial connected notification ahead of any event.
    let _ = tx.try_send(SessionEvent::Connected);
    tokio::spawn(pump(ws, tx, cancel));

    Ok(Rtm { info, events })
}

fn decode_frame(text: &str) -> Option<RtmEvent> {
    match serde_json::from_str::<RtmEvent>(text) {
        Ok(ev) => Some(ev),
        Err(e) => {
            // Acks and reply_to frames have no type field; not an error.
            tracing::debug!(error = %e, frame = %text, "ignoring undecodable RTM frame");
            None
        }
    }
}

async fn pump(
    mut ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    tx: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
) {
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let reason;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws.send(WsMessage::Close(None)).await;
                reason = "session cancelled".to_string();
                break;
            }
            _ = ping.tick() => {
                if let Err(e) = ws.send(WsMessage::Ping(Vec::new())).await {
                    reason = format!("ping failed: {e}");
                    break;
                }
            }
            frame = ws.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    match decode_frame(&text) {
                        Some(RtmEvent::Goodbye) => {
                            reason = "server sent goodbye".to_string();
                            break;
                        }
                        Some(ev) => {
                            if tx.send(SessionEvent::Event(ev)).await.is_err() {
                                // Projector is gone; nothing left to do.
                                return;
                            }
                        }
                        None => {}
                    }
                }
                Some(Ok(WsMessage::Ping(payload))) => {
                    let _ = ws.send(WsMessage::Pong(payload)).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    reason = "stream closed".to_string();
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    reason = format!("read error: {e}");
                    break;
                }
            }
        }
    }
    tracing::info!(%reason, "RTM session ended");
    let _ = tx.send(SessionEvent::Disconnected(reason)).await;
}
