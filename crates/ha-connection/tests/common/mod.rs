//! In-memory hub used by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{sink, stream};
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::{self, Message};

use linkmate_ha_connection::transport::OpenFuture;
use linkmate_ha_connection::{ClientConfig, HaClient, HaError, Transport, WsSink, WsStream};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

type Inbound = Result<Message, tungstenite::Error>;

/// Scripted [`Transport`]: every `open` yields a [`HubConn`] the test
/// drives by hand.
pub struct MockHub {
    opens: AtomicUsize,
    refuse: AtomicBool,
    urls: std::sync::Mutex<Vec<String>>,
    accepted_tx: mpsc::UnboundedSender<HubConn>,
    accepted_rx: Mutex<mpsc::UnboundedReceiver<HubConn>>,
}

impl MockHub {
    pub fn new() -> Arc<Self> {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            opens: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
            urls: std::sync::Mutex::new(Vec::new()),
            accepted_tx,
            accepted_rx: Mutex::new(accepted_rx),
        })
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Next connection opened by the client.
    pub async fn accept(&self) -> HubConn {
        tokio::time::timeout(RECV_TIMEOUT, self.accepted_rx.lock().await.recv())
            .await
            .expect("client did not connect in time")
            .expect("hub closed")
    }
}

impl Transport for MockHub {
    fn open<'a>(&'a self, url: &'a str) -> OpenFuture<'a> {
        Box::pin(async move {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.to_string());
            if self.refuse.load(Ordering::SeqCst) {
                return Err(HaError::Transport("connection refused".into()));
            }

            let (to_client, client_rx) = mpsc::unbounded_channel::<Inbound>();
            let (client_tx, from_client) = mpsc::unbounded_channel::<Message>();

            let sink = sink::unfold(client_tx, |tx, msg: Message| async move {
                tx.send(msg)
                    .map_err(|_| tungstenite::Error::ConnectionClosed)?;
                Ok::<_, tungstenite::Error>(tx)
            });
            let stream = stream::unfold(client_rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            });

            let _ = self.accepted_tx.send(HubConn {
                to_client: Some(to_client),
                from_client,
            });
            Ok((Box::pin(sink) as WsSink, Box::pin(stream) as WsStream))
        })
    }
}

/// Hub side of one connection.
pub struct HubConn {
    to_client: Option<mpsc::UnboundedSender<Inbound>>,
    from_client: mpsc::UnboundedReceiver<Message>,
}

impl HubConn {
    pub fn send(&self, value: Value) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(Ok(Message::Text(value.to_string().into())));
        }
    }

    /// Ends the client's read stream, as if the hub went away.
    pub fn close(&mut self) {
        self.to_client = None;
    }

    /// Next raw frame, `None` once the client dropped its sink.
    pub async fn recv_frame(&mut self) -> Option<Message> {
        tokio::time::timeout(RECV_TIMEOUT, self.from_client.recv())
            .await
            .expect("no frame from client in time")
    }

    /// Next text frame as JSON, skipping control frames.
    pub async fn recv(&mut self) -> Value {
        loop {
            match self.recv_frame().await {
                Some(Message::Text(text)) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(_) => continue,
                None => panic!("client closed the connection"),
            }
        }
    }

    /// Like [`recv`](Self::recv) but `None` if nothing arrives within `wait`.
    pub async fn try_recv_within(&mut self, wait: Duration) -> Option<Value> {
        tokio::time::timeout(wait, self.recv()).await.ok()
    }

    /// Runs the hub side of authentication.
    pub async fn authenticate(&mut self) {
        self.send(json!({"type": "auth_required", "ha_version": "2024.5.0"}));
        let auth = self.recv().await;
        assert_eq!(auth["type"], "auth");
        self.send(json!({"type": "auth_ok", "ha_version": "2024.5.0"}));
    }

    /// Receives both subscription requests, returning their ids.
    pub async fn expect_subscriptions(&mut self) -> (u64, u64) {
        let first = self.recv().await;
        let second = self.recv().await;
        assert_eq!(first["type"], "subscribe_events");
        assert_eq!(first["event_type"], "state_changed");
        assert_eq!(second["type"], "subscribe_events");
        assert_eq!(second["event_type"], "call_service");
        (first["id"].as_u64().unwrap(), second["id"].as_u64().unwrap())
    }

    pub fn reply_ok(&self, id: u64, result: Value) {
        self.send(json!({"id": id, "type": "result", "success": true, "result": result}));
    }

    pub fn reply_err(&self, id: u64, code: &str, message: &str) {
        self.send(json!({
            "id": id,
            "type": "result",
            "success": false,
            "error": {"code": code, "message": message}
        }));
    }

    /// Full handshake: authentication plus both subscription acks.
    pub async fn handshake(&mut self) -> (u64, u64) {
        self.authenticate().await;
        let (a, b) = self.expect_subscriptions().await;
        self.reply_ok(a, Value::Null);
        self.reply_ok(b, Value::Null);
        (a, b)
    }

    pub fn push_event(&self, event_type: &str, data: Value) {
        self.send(json!({
            "id": 1,
            "type": "event",
            "event": {"event_type": event_type, "data": data, "origin": "LOCAL"}
        }));
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        reconnect_delay: Duration::from_millis(100),
        ping_period: Duration::from_secs(60),
        liveness_timeout: Duration::from_secs(60),
        auth_retry_delay: Duration::from_millis(20),
        ..ClientConfig::for_device("tab")
    }
}

pub fn client(hub: &Arc<MockHub>, config: ClientConfig) -> HaClient {
    HaClient::with_transport(config, hub.clone())
}

/// Connects and completes the handshake.
pub async fn ready_client(hub: &Arc<MockHub>) -> (HaClient, HubConn) {
    let client = client(hub, test_config());
    client.connect("http://hub.local:8123", "token").await.unwrap();
    let mut conn = hub.accept().await;
    conn.handshake().await;
    client.wait_until_ready().await.unwrap();
    (client, conn)
}
