//! WebSocket Mock Server for the realtime endpoint
//!
//! Accepts relay connections the way the hosted endpoint does and hands each
//! one to the test as a [`MockCall`] for scripted exchanges.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

const WAIT: Duration = Duration::from_secs(5);

/// Upgrade request as seen by the mock.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    pub uri: String,
    pub authorization: Option<String>,
    pub openai_beta: Option<String>,
}

/// One relay connection accepted by the mock.
pub struct MockCall {
    pub handshake: Handshake,
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl MockCall {
    /// Next text frame from the relay; `None` once the relay closed.
    pub async fn recv(&mut self) -> Option<String> {
        timeout(WAIT, self.inbound.recv())
            .await
            .expect("timed out waiting for relay frame")
    }

    pub async fn recv_json(&mut self) -> Value {
        let frame = self.recv().await.expect("relay closed the connection");
        serde_json::from_str(&frame).unwrap()
    }

    pub fn send(&self, frame: impl Into<String>) {
        let frame: String = frame.into();
        self.outbound.send(Message::Text(frame.into())).unwrap();
    }

    /// Close the connection from the endpoint side.
    pub fn close(&self) {
        let _ = self.outbound.send(Message::Close(None));
    }
}

/// Mock realtime endpoint listening on an ephemeral port.
pub struct MockRealtimeServer {
    pub addr: SocketAddr,
    calls: mpsc::UnboundedReceiver<MockCall>,
}

impl MockRealtimeServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (calls_tx, calls) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let calls_tx = calls_tx.clone();
                tokio::spawn(async move {
                    if let Some(call) = accept_call(stream).await {
                        let _ = calls_tx.send(call);
                    }
                });
            }
        });

        Self { addr, calls }
    }

    /// Base URL to configure as the realtime endpoint.
    pub fn url(&self) -> String {
        format!("ws://{}/v1/realtime", self.addr)
    }

    /// Wait for the relay to dial in.
    pub async fn next_call(&mut self) -> MockCall {
        timeout(WAIT, self.calls.recv())
            .await
            .expect("timed out waiting for relay to connect")
            .expect("mock server stopped")
    }
}

async fn accept_call(stream: TcpStream) -> Option<MockCall> {
    let (handshake_tx, handshake_rx) = oneshot::channel();
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let _ = handshake_tx.send(Handshake {
            uri: req.uri().to_string(),
            authorization: header("authorization"),
            openai_beta: header("openai-beta"),
        });
        Ok(resp)
    };

    let ws_stream = accept_hdr_async(stream, callback).await.ok()?;
    let handshake = handshake_rx.await.unwrap_or_default();
    let (mut write, mut read) = ws_stream.split();

    let (inbound_tx, inbound) = mpsc::unbounded_channel();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    tokio::spawn(async move {
        while let Some(Ok(msg)) = read.next().await {
            match msg {
                Message::Text(text) => {
                    if inbound_tx.send(text.as_str().to_owned()).is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if write.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    Some(MockCall {
        handshake,
        inbound,
        outbound,
    })
}
