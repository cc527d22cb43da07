//! Socket layer seam.
//!
//! [`Transport`] opens one WebSocket and hands back its split halves. The
//! production implementation uses tokio-tungstenite; tests substitute an
//! in-memory pair.

use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream, StreamExt};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::debug;

use linkmate_protocol::constants::WS_MAX_MESSAGE_SIZE;

use crate::error::HaError;

/// Outbound half of an open socket.
pub type WsSink = Pin<Box<dyn Sink<tungstenite::Message, Error = tungstenite::Error> + Send>>;

/// Inbound half of an open socket.
pub type WsStream =
    Pin<Box<dyn Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Send>>;

pub type OpenFuture<'a> =
    Pin<Box<dyn Future<Output = Result<(WsSink, WsStream), HaError>> + Send + 'a>>;

/// Opens WebSocket connections.
pub trait Transport: Send + Sync + 'static {
    fn open<'a>(&'a self, url: &'a str) -> OpenFuture<'a>;
}

/// [`Transport`] over tokio-tungstenite with rustls.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteTransport;

impl Transport for TungsteniteTransport {
    fn open<'a>(&'a self, url: &'a str) -> OpenFuture<'a> {
        Box::pin(async move {
            crate::tls::install_crypto_provider();

            let mut ws_config = WebSocketConfig::default();
            ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
            ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);

            let (ws, response) =
                tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
            debug!(status = %response.status(), "websocket upgrade complete");

            let (write, read) = ws.split();
            Ok((Box::pin(write) as WsSink, Box::pin(read) as WsStream))
        })
    }
}

/// What the pumps report to the per-connection dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TransportEvent {
    Opened,
    Text(String),
    Closed { code: Option<u16>, reason: String },
    Failed(String),
}

impl TransportEvent {
    /// Human-readable close reason used as the cancellation cause.
    pub(crate) fn close_reason(&self) -> Option<String> {
        match self {
            Self::Closed { code, reason } => Some(match code {
                Some(code) if reason.is_empty() => format!("closed with code {code}"),
                Some(code) => format!("closed with code {code}: {reason}"),
                None => reason.clone(),
            }),
            Self::Failed(reason) => Some(reason.clone()),
            Self::Opened | Self::Text(_) => None,
        }
    }
}
