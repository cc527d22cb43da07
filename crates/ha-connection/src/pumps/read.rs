//! WebSocket read pump: turns socket frames into dispatcher events.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::transport::TransportEvent;

/// Reads frames until the socket closes, fails, goes silent for longer
/// than `liveness`, or `cancel` fires.
///
/// Any inbound frame resets the liveness deadline. Exactly one terminal
/// event (`Closed` or `Failed`) is reported unless the pump was cancelled.
pub(crate) async fn read_pump<S>(
    mut read: S,
    events: mpsc::Sender<TransportEvent>,
    write_tx: mpsc::Sender<tungstenite::Message>,
    liveness: Duration,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(liveness);
    tokio::pin!(deadline);

    let terminal = loop {
        tokio::select! {
            _ = cancel.cancelled() => return,

            () = &mut deadline => {
                warn!(timeout_secs = liveness.as_secs(), "no traffic from hub, closing connection");
                break TransportEvent::Failed("liveness timeout".into());
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + liveness);

                        match msg {
                            tungstenite::Message::Text(text) => {
                                let event = TransportEvent::Text(text.to_string());
                                if events.send(event).await.is_err() {
                                    return;
                                }
                            }
                            tungstenite::Message::Ping(data) => {
                                trace!("received ping, sending pong");
                                let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Pong(_) => trace!("received pong frame"),
                            tungstenite::Message::Close(frame) => {
                                let (code, reason) = frame
                                    .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                                    .unwrap_or((None, "closed by hub".to_string()));
                                debug!(?code, %reason, "received close frame");
                                break TransportEvent::Closed { code, reason };
                            }
                            _ => trace!("ignoring binary frame"),
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break TransportEvent::Failed(e.to_string());
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break TransportEvent::Closed {
                            code: None,
                            reason: "stream ended".into(),
                        };
                    }
                }
            }
        }
    };

    let _ = events.send(terminal).await;
}
