//! WebSocket write pump: serialises outbound frames onto the socket.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::transport::TransportEvent;

/// Writes queued frames until cancelled, then closes with a normal code.
///
/// A write error is reported to the dispatcher as a transport failure.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    events: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = write_rx.recv() => {
                match msg {
                    Some(m) => {
                        if let Err(e) = write.send(m).await {
                            error!("WebSocket write error: {e}");
                            let _ = events.send(TransportEvent::Failed(e.to_string())).await;
                            return;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    let close = CloseFrame {
        code: CloseCode::Normal,
        reason: "client closing".into(),
    };
    let _ = write.send(tungstenite::Message::Close(Some(close))).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::sink;
    use linkmate_protocol::constants::WS_CLOSE_NORMAL;

    #[tokio::test]
    async fn closes_normally_on_cancel() {
        let (sink_tx, mut sink_rx) = mpsc::channel::<tungstenite::Message>(16);
        let cancel = CancellationToken::new();

        let sink = sink::unfold(sink_tx, |tx, msg: tungstenite::Message| async move {
            let _ = tx.send(msg).await;
            Ok::<_, tungstenite::Error>(tx)
        });
        let sink = Box::pin(sink);

        let (write_tx, write_rx) = mpsc::channel(16);
        let (events_tx, _events_rx) = mpsc::channel(16);
        write_tx
            .send(tungstenite::Message::Text("hello".into()))
            .await
            .unwrap();

        let c = cancel.clone();
        let handle = tokio::spawn(async move {
            write_pump(sink, write_rx, events_tx, c).await;
        });

        assert!(matches!(
            sink_rx.recv().await,
            Some(tungstenite::Message::Text(_))
        ));
        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");

        match sink_rx.recv().await {
            Some(tungstenite::Message::Close(Some(frame))) => {
                assert_eq!(u16::from(frame.code), WS_CLOSE_NORMAL);
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn write_error_is_reported() {
        let sink = sink::unfold((), |(), _msg: tungstenite::Message| async move {
            Err::<(), _>(tungstenite::Error::ConnectionClosed)
        });
        let sink = Box::pin(sink);

        let (write_tx, write_rx) = mpsc::channel(16);
        let (events_tx, mut events_rx) = mpsc::channel(16);
        write_tx
            .send(tungstenite::Message::Text("hello".into()))
            .await
            .unwrap();

        write_pump(sink, write_rx, events_tx, CancellationToken::new()).await;

        assert!(matches!(
            events_rx.recv().await,
            Some(TransportEvent::Failed(_))
        ));
    }
}
