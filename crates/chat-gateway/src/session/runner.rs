//! Session task
//!
//! One task per running session. It owns the socket and the heartbeat timer
//! and drives connect, identify or resume, steady state and reconnect. Only
//! this task mutates the resume state while it runs.

use super::heartbeat::{Beat, HeartbeatMonitor};
use super::state::ConnectionState;
use super::Shared;
use crate::error::SocketError;
use crate::events::{DisconnectInfo, DispatchEvent, GatewayEvent};
use crate::protocol::{CloseCode, Disposition, GatewayMessage, HelloPayload, OpCode, READY, RESUMED};
use crate::socket::{CloseFrame, GatewaySocket, Incoming};
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Normal closure; the server invalidates the session
const CLOSE_NORMAL: u16 = 1000;
/// Any non-1000 close keeps the session resumable
const CLOSE_KEEP_SESSION: u16 = 4000;

/// Next reconnect delay before jitter: 1s, doubling, capped at `max`
pub(crate) fn next_backoff(previous: Option<Duration>, max: Duration) -> Duration {
    previous
        .map_or(INITIAL_BACKOFF, |d| d.saturating_mul(2))
        .min(max)
}

/// Somewhere in the upper half of `base`
fn jittered(base: Duration) -> Duration {
    let half = base / 2;
    half + half.mul_f64(rand::thread_rng().gen_range(0.0..=1.0))
}

fn lost(code: Option<u16>, reason: impl Into<String>, disposition: Disposition) -> DisconnectInfo {
    DisconnectInfo {
        code,
        reason: reason.into(),
        disposition,
    }
}

fn transport_lost(err: &SocketError) -> DisconnectInfo {
    lost(None, err.to_string(), Disposition::Resume)
}

fn closed(frame: Option<CloseFrame>) -> DisconnectInfo {
    match frame {
        Some(frame) => {
            let reason = match CloseCode::from_u16(frame.code) {
                Some(code) if frame.reason.is_empty() => code.description().to_string(),
                _ => frame.reason,
            };
            lost(Some(frame.code), reason, CloseCode::classify(frame.code))
        }
        None => lost(None, "connection closed", Disposition::Resume),
    }
}

enum Outcome {
    /// Explicit disconnect
    Stopped,
    Lost(DisconnectInfo),
}

enum Step {
    Stop,
    Beat,
    Command(GatewayMessage),
    Received(Result<Incoming, SocketError>),
}

pub(crate) struct Runner {
    shared: Arc<Shared>,
    url: String,
    stop: watch::Receiver<bool>,
    commands: mpsc::UnboundedReceiver<GatewayMessage>,
    backoff: Option<Duration>,
    /// The current attempt reached `Connected`
    established: bool,
}

impl Runner {
    pub(crate) fn new(
        shared: Arc<Shared>,
        url: String,
        stop: watch::Receiver<bool>,
        commands: mpsc::UnboundedReceiver<GatewayMessage>,
    ) -> Self {
        Self {
            shared,
            url,
            stop,
            commands,
            backoff: None,
            established: false,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::debug!(url = %self.url, "Gateway session started");

        while !*self.stop.borrow() {
            let info = match self.connect_once().await {
                Outcome::Stopped => break,
                Outcome::Lost(info) => info,
            };
            if self.established {
                self.backoff = None;
            }

            self.shared.resume.lock().apply(info.disposition);
            self.shared.hub.publish(GatewayEvent::Disconnected(info.clone()));

            if info.is_fatal() {
                tracing::error!(code = ?info.code, reason = %info.reason, "Gateway session closed for good");
                break;
            }

            let base = next_backoff(self.backoff, self.shared.config.max_backoff);
            self.backoff = Some(base);
            let delay = jittered(base);
            tracing::warn!(
                code = ?info.code,
                reason = %info.reason,
                disposition = ?info.disposition,
                delay_ms = delay.as_millis() as u64,
                "Gateway connection lost, reconnecting"
            );

            self.shared.set_state(ConnectionState::Reconnecting);
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = self.stop.changed() => break,
            }
        }

        self.shared.set_state(ConnectionState::Disconnected);
        tracing::debug!("Gateway session stopped");
    }

    async fn connect_once(&mut self) -> Outcome {
        self.established = false;
        self.shared.set_state(ConnectionState::Connecting);

        let url = self.shared.resume.lock().connect_url(&self.url).to_string();
        let connected = tokio::select! {
            result = self.shared.connector.connect(&url) => result,
            _ = self.stop.changed() => return Outcome::Stopped,
        };
        let mut socket = match connected {
            Ok(socket) => socket,
            Err(err) => return Outcome::Lost(transport_lost(&err)),
        };

        let hello_timeout = self.shared.config.hello_timeout;
        let hello = tokio::select! {
            result = tokio::time::timeout(hello_timeout, await_hello(&mut *socket)) => result,
            _ = self.stop.changed() => {
                let _ = socket.close(CLOSE_NORMAL).await;
                return Outcome::Stopped;
            }
        };
        let hello = match hello {
            Ok(Ok(hello)) => hello,
            Ok(Err(info)) => return Outcome::Lost(info),
            Err(_) => {
                let _ = socket.close(CLOSE_KEEP_SESSION).await;
                return Outcome::Lost(lost(None, "timed out waiting for Hello", Disposition::Resume));
            }
        };

        let interval = Duration::from_millis(hello.heartbeat_interval);
        let heartbeat = HeartbeatMonitor::new(interval, Instant::now());

        let resume = self.shared.resume.lock().resume_payload(&self.shared.config.token);
        let (state, frame) = match resume {
            Some(payload) => {
                tracing::info!(session_id = %payload.session_id, seq = payload.seq, "Resuming session");
                (ConnectionState::Resuming, GatewayMessage::resume(&payload))
            }
            None => {
                tracing::info!(intents = self.shared.config.intents, "Identifying");
                (ConnectionState::Identifying, GatewayMessage::identify(&self.shared.config.identify()))
            }
        };
        self.shared.set_state(state);
        if let Err(err) = socket.send(&frame).await {
            return Outcome::Lost(transport_lost(&err));
        }

        self.drive(&mut *socket, heartbeat).await
    }

    /// Steady state of one connection
    async fn drive(&mut self, socket: &mut dyn GatewaySocket, mut heartbeat: HeartbeatMonitor) -> Outcome {
        let mut replay = Replay::default();

        loop {
            let step = tokio::select! {
                _ = self.stop.changed() => Step::Stop,
                () = tokio::time::sleep_until(heartbeat.next_beat()) => Step::Beat,
                Some(message) = self.commands.recv() => Step::Command(message),
                incoming = socket.recv() => Step::Received(incoming),
            };

            let lost_with = match step {
                Step::Stop => {
                    let _ = socket.close(CLOSE_NORMAL).await;
                    return Outcome::Stopped;
                }
                Step::Beat => match heartbeat.tick(Instant::now()) {
                    Beat::Send => send_heartbeat(&self.shared, socket).await.err(),
                    Beat::Missed => {
                        let _ = socket.close(CLOSE_KEEP_SESSION).await;
                        Some(lost(None, "heartbeat not acknowledged", Disposition::Resume))
                    }
                },
                Step::Command(message) => {
                    tracing::trace!(%message, "Sending frame");
                    socket.send(&message).await.err().map(|err| transport_lost(&err))
                }
                Step::Received(Ok(Incoming::Frame(frame))) => {
                    self.on_frame(socket, &mut heartbeat, &mut replay, frame).await
                }
                Step::Received(Ok(Incoming::Closed(frame))) => Some(closed(frame)),
                Step::Received(Err(err)) => Some(transport_lost(&err)),
            };

            if let Some(info) = lost_with {
                return Outcome::Lost(info);
            }
        }
    }

    /// Handle one server frame; `Some` ends the connection
    async fn on_frame(
        &mut self,
        socket: &mut dyn GatewaySocket,
        heartbeat: &mut HeartbeatMonitor,
        replay: &mut Replay,
        frame: GatewayMessage,
    ) -> Option<DisconnectInfo> {
        match frame.op {
            OpCode::Dispatch => self.on_dispatch(replay, frame),
            OpCode::Heartbeat => {
                heartbeat.sent(Instant::now());
                send_heartbeat(&self.shared, socket).await.err()
            }
            OpCode::HeartbeatAck => {
                if let Some(latency) = heartbeat.ack(Instant::now()) {
                    *self.shared.latency.lock() = Some(latency);
                    tracing::trace!(latency_ms = latency.as_millis() as u64, "Heartbeat acknowledged");
                }
                None
            }
            OpCode::Reconnect => {
                let _ = socket.close(CLOSE_KEEP_SESSION).await;
                Some(lost(None, "server requested reconnect", Disposition::Resume))
            }
            OpCode::InvalidSession => {
                let disposition = if frame.as_invalid_session().unwrap_or(false) {
                    Disposition::Resume
                } else {
                    Disposition::Reidentify
                };
                let _ = socket.close(CLOSE_KEEP_SESSION).await;
                Some(lost(None, "invalid session", disposition))
            }
            op => {
                tracing::debug!(%op, "Ignoring unexpected frame");
                None
            }
        }
    }

    fn on_dispatch(&mut self, replay: &mut Replay, frame: GatewayMessage) -> Option<DisconnectInfo> {
        let resuming = self.shared.state() == ConnectionState::Resuming;
        if let Some(sequence) = frame.s {
            let fresh = if resuming {
                let committed = self.shared.resume.lock().sequence;
                replay.accept(committed, sequence)
            } else {
                self.shared.resume.lock().advance(sequence)
            };
            if !fresh {
                tracing::debug!(sequence, event = ?frame.t, "Stale dispatch dropped");
                return None;
            }
        }

        let name = frame.t.clone().unwrap_or_default();
        if name == READY {
            let Some(ready) = frame.as_ready() else {
                return Some(lost(None, "malformed READY", Disposition::Reidentify));
            };
            {
                let mut resume = self.shared.resume.lock();
                resume.session_id = Some(ready.session_id.clone());
                resume.resume_url = ready.resume_gateway_url.clone();
            }
            self.finish_replay(replay);
            tracing::info!(session_id = %ready.session_id, "Session ready");
        } else if name == RESUMED {
            tracing::info!(replayed = replay.events.len(), "Session resumed");
            self.finish_replay(replay);
        }

        let event = DispatchEvent::new(name, frame.s, frame.d.unwrap_or(Value::Null));
        if self.shared.state() == ConnectionState::Resuming {
            replay.events.push(event);
        } else {
            self.shared.hub.publish(GatewayEvent::Dispatch(Arc::new(event)));
        }
        None
    }

    /// Commit the replayed sequence and release the held events
    fn finish_replay(&mut self, replay: &mut Replay) {
        if let Some(sequence) = replay.sequence.take() {
            self.shared.resume.lock().advance(sequence);
        }
        self.established = true;
        self.shared.set_state(ConnectionState::Connected);
        for event in replay.events.drain(..) {
            self.shared.hub.publish(GatewayEvent::Dispatch(Arc::new(event)));
        }
    }
}

/// Dispatches held back until RESUMED
///
/// Their sequence stays out of the resume state until then, so a connection
/// lost mid-replay resumes from the last delivered event.
#[derive(Debug, Default)]
struct Replay {
    events: Vec<DispatchEvent>,
    sequence: Option<u64>,
}

impl Replay {
    fn accept(&mut self, committed: Option<u64>, sequence: u64) -> bool {
        if self.sequence.max(committed).is_some_and(|latest| sequence <= latest) {
            return false;
        }
        self.sequence = Some(sequence);
        true
    }
}

async fn send_heartbeat(shared: &Shared, socket: &mut dyn GatewaySocket) -> Result<(), DisconnectInfo> {
    let sequence = shared.resume.lock().sequence;
    tracing::trace!(?sequence, "Sending heartbeat");
    socket
        .send(&GatewayMessage::heartbeat(sequence))
        .await
        .map_err(|err| transport_lost(&err))
}

async fn await_hello(socket: &mut dyn GatewaySocket) -> Result<HelloPayload, DisconnectInfo> {
    loop {
        match socket.recv().await {
            Ok(Incoming::Frame(frame)) => {
                if let Some(hello) = frame.as_hello() {
                    return Ok(hello);
                }
                tracing::debug!(%frame, "Frame before Hello ignored");
            }
            Ok(Incoming::Closed(frame)) => return Err(closed(frame)),
            Err(err) => return Err(transport_lost(&err)),
        }
    }
}
