//! Test helpers for integration tests
//!
//! A scripted HTTP transport and an in-memory gateway whose server side is
//! driven by the test.

use async_trait::async_trait;
use chat_gateway::{
    GatewayConnector, GatewayMessage, GatewaySocket, Incoming, OpCode, SocketError,
};
use chat_rest::{HttpRequest, HttpResponse, HttpTransport, Method, TransportError};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

// ============================================================================
// HTTP
// ============================================================================

/// One request seen by [`MockTransport`]
#[derive(Debug, Clone)]
pub struct Call {
    pub at: Instant,
    pub method: Method,
    pub path: String,
}

/// Scripted transport: fixed responses per path, then a FIFO script, then 200
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, HttpResponse>>,
    script: Mutex<VecDeque<HttpResponse>>,
    calls: Mutex<Vec<Call>>,
    latency: Mutex<Duration>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the response for the next unrouted call
    pub fn push(&self, response: HttpResponse) {
        self.script.lock().push_back(response);
    }

    /// Always answer `path` with `response`
    pub fn route(&self, path: &str, response: HttpResponse) {
        self.routes.lock().insert(path.to_string(), response);
    }

    /// Time every call takes
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn paths(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.path.clone()).collect()
    }

    pub fn times(&self) -> Vec<Instant> {
        self.calls.lock().iter().map(|c| c.at).collect()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls.lock().push(Call {
            at: Instant::now(),
            method: request.method,
            path: request.path.clone(),
        });

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(response) = self.routes.lock().get(&request.path) {
            return Ok(response.clone());
        }
        let next = self.script.lock().pop_front();
        Ok(next.unwrap_or_else(|| HttpResponse::new(200).with_body("{}")))
    }
}

// ============================================================================
// Gateway
// ============================================================================

/// Connector handing every new socket to the paired [`MockGateway`]
pub struct MockConnector {
    accepted: mpsc::UnboundedSender<ServerConnection>,
    refuse: AtomicUsize,
    auto_ack: Arc<AtomicBool>,
    urls: Mutex<Vec<String>>,
}

impl MockConnector {
    /// Fail the next `count` connection attempts
    pub fn refuse_next(&self, count: usize) {
        self.refuse.store(count, Ordering::SeqCst);
    }

    /// Whether sockets answer heartbeats by themselves (on by default)
    pub fn set_auto_ack(&self, enabled: bool) {
        self.auto_ack.store(enabled, Ordering::SeqCst);
    }

    /// URLs of every connection attempt, in order
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl GatewayConnector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn GatewaySocket>, SocketError> {
        self.urls.lock().push(url.to_string());

        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(SocketError::Connect("connection refused".to_string()));
        }

        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let (recv_calls, recv_calls_rx) = watch::channel(0usize);
        let closes = Arc::new(Mutex::new(Vec::new()));

        let socket = MockSocket {
            incoming,
            loopback: to_client.clone(),
            outgoing,
            recv_calls,
            closes: Arc::clone(&closes),
            auto_ack: Arc::clone(&self.auto_ack),
        };
        let server = ServerConnection {
            url: url.to_string(),
            to_client,
            from_client,
            recv_calls: recv_calls_rx,
            closes,
        };

        self.accepted
            .send(server)
            .map_err(|_| SocketError::Connect("gateway gone".to_string()))?;
        Ok(Box::new(socket))
    }
}

struct MockSocket {
    incoming: mpsc::UnboundedReceiver<Incoming>,
    loopback: mpsc::UnboundedSender<Incoming>,
    outgoing: mpsc::UnboundedSender<GatewayMessage>,
    recv_calls: watch::Sender<usize>,
    closes: Arc<Mutex<Vec<u16>>>,
    auto_ack: Arc<AtomicBool>,
}

#[async_trait]
impl GatewaySocket for MockSocket {
    async fn send(&mut self, message: &GatewayMessage) -> Result<(), SocketError> {
        if message.op == OpCode::Heartbeat && self.auto_ack.load(Ordering::SeqCst) {
            let _ = self.loopback.send(Incoming::Frame(GatewayMessage::heartbeat_ack()));
        }
        self.outgoing
            .send(message.clone())
            .map_err(|_| SocketError::Io("server side dropped".to_string()))
    }

    async fn recv(&mut self) -> Result<Incoming, SocketError> {
        self.recv_calls.send_modify(|calls| *calls += 1);
        Ok(self.incoming.recv().await.unwrap_or(Incoming::Closed(None)))
    }

    async fn close(&mut self, code: u16) -> Result<(), SocketError> {
        self.closes.lock().push(code);
        Ok(())
    }
}

/// Test-side end of the in-memory gateway
pub struct MockGateway {
    accepted: mpsc::UnboundedReceiver<ServerConnection>,
}

impl MockGateway {
    pub fn new() -> (Arc<MockConnector>, Self) {
        let (accepted_tx, accepted) = mpsc::unbounded_channel();
        let connector = Arc::new(MockConnector {
            accepted: accepted_tx,
            refuse: AtomicUsize::new(0),
            auto_ack: Arc::new(AtomicBool::new(true)),
            urls: Mutex::new(Vec::new()),
        });
        (connector, Self { accepted })
    }

    /// Wait for the session to open its next connection
    pub async fn accept(&mut self) -> ServerConnection {
        tokio::time::timeout(Duration::from_secs(120), self.accepted.recv())
            .await
            .expect("no connection attempt")
            .expect("connector dropped")
    }

    /// Connection opened since the last accept, if any
    pub fn try_accept(&mut self) -> Option<ServerConnection> {
        self.accepted.try_recv().ok()
    }
}

/// Server side of one connection
pub struct ServerConnection {
    pub url: String,
    to_client: mpsc::UnboundedSender<Incoming>,
    from_client: mpsc::UnboundedReceiver<GatewayMessage>,
    recv_calls: watch::Receiver<usize>,
    closes: Arc<Mutex<Vec<u16>>>,
}

impl ServerConnection {
    pub fn send(&self, frame: GatewayMessage) {
        let _ = self.to_client.send(Incoming::Frame(frame));
    }

    /// Send `frame` and wait until the session has handled it
    pub async fn deliver(&mut self, frame: GatewayMessage) {
        let before = *self.recv_calls.borrow_and_update();
        self.send(frame);
        self.recv_calls
            .wait_for(|&calls| calls > before)
            .await
            .expect("session dropped the socket");
    }

    /// Close the connection with a close frame
    pub fn close(&self, code: u16) {
        let _ = self.to_client.send(Incoming::Closed(Some(chat_gateway::CloseFrame {
            code,
            reason: String::new(),
        })));
    }

    /// Next frame from the client, heartbeats included
    pub async fn next_frame(&mut self) -> GatewayMessage {
        tokio::time::timeout(Duration::from_secs(120), self.from_client.recv())
            .await
            .expect("client sent nothing")
            .expect("client hung up")
    }

    /// Next non-heartbeat frame from the client
    pub async fn next_command(&mut self) -> GatewayMessage {
        loop {
            let frame = self.next_frame().await;
            if frame.op != OpCode::Heartbeat {
                return frame;
            }
        }
    }

    /// Close codes the client sent on this connection
    pub fn client_closes(&self) -> Vec<u16> {
        self.closes.lock().clone()
    }
}
