//! Gateway session
//!
//! [`GatewaySession`] is a cheap, cloneable handle. `connect` spawns the task
//! that owns the socket; `disconnect` stops it for good.

mod config;
mod heartbeat;
mod runner;
mod state;

pub use config::SessionConfig;
pub use heartbeat::{Beat, HeartbeatMonitor};
pub use state::{ConnectionState, ResumeState};

use crate::error::{GatewayError, GatewayResult};
use crate::events::{EventHandler, EventHub, EventStream};
use crate::protocol::GatewayMessage;
use crate::socket::GatewayConnector;
use parking_lot::Mutex;
use runner::Runner;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Control channels of a running session task
struct Control {
    stop: watch::Sender<bool>,
    commands: mpsc::UnboundedSender<GatewayMessage>,
    task: JoinHandle<()>,
}

pub(crate) struct Shared {
    config: SessionConfig,
    connector: Arc<dyn GatewayConnector>,
    hub: EventHub,
    state: watch::Sender<ConnectionState>,
    resume: Mutex<ResumeState>,
    latency: Mutex<Option<Duration>>,
    control: Mutex<Option<Control>>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Connection state changed");
        }
    }
}

#[derive(Clone)]
pub struct GatewaySession {
    shared: Arc<Shared>,
}

impl GatewaySession {
    pub fn new(connector: Arc<dyn GatewayConnector>, config: SessionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                hub: EventHub::new(),
                state,
                resume: Mutex::new(ResumeState::default()),
                latency: Mutex::new(None),
                control: Mutex::new(None),
            }),
        }
    }

    /// Start the session against `url`. Returns immediately; watch
    /// [`state`](Self::state) or subscribe to follow progress.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self, url: impl Into<String>) -> GatewayResult<()> {
        let mut control = self.shared.control.lock();
        if control.as_ref().is_some_and(|c| !c.task.is_finished()) {
            return Err(GatewayError::AlreadyRunning);
        }

        let (stop, stop_rx) = watch::channel(false);
        let (commands, commands_rx) = mpsc::unbounded_channel();
        self.shared.set_state(ConnectionState::Connecting);

        let runner = Runner::new(Arc::clone(&self.shared), url.into(), stop_rx, commands_rx);
        let task = tokio::spawn(runner.run());

        *control = Some(Control { stop, commands, task });
        Ok(())
    }

    /// Close the connection and stop reconnecting. The session state is
    /// discarded; a later `connect` identifies afresh.
    pub async fn disconnect(&self) {
        let Some(control) = self.shared.control.lock().take() else {
            return;
        };

        control.stop.send_replace(true);
        if let Err(err) = control.task.await {
            tracing::warn!(error = %err, "Gateway session task failed");
        }

        self.shared.resume.lock().clear();
        self.shared.set_state(ConnectionState::Disconnected);
        tracing::info!("Gateway session disconnected");
    }

    /// Queue a client frame (presence, voice state, member requests)
    pub fn send(&self, message: GatewayMessage) -> GatewayResult<()> {
        if !message.op.is_client_op() {
            return Err(GatewayError::NotClientOp(message.op));
        }
        let control = self.shared.control.lock();
        let control = control.as_ref().ok_or(GatewayError::NotRunning)?;
        control
            .commands
            .send(message)
            .map_err(|_| GatewayError::NotRunning)
    }

    pub fn subscribe(&self) -> EventStream {
        self.shared.hub.subscribe()
    }

    pub fn subscribe_handler(&self, handler: Arc<dyn EventHandler>) -> JoinHandle<()> {
        self.shared.hub.subscribe_handler(handler)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn session_id(&self) -> Option<String> {
        self.shared.resume.lock().session_id.clone()
    }

    /// Last accepted dispatch sequence
    pub fn sequence(&self) -> Option<u64> {
        self.shared.resume.lock().sequence
    }

    pub fn resume_url(&self) -> Option<String> {
        self.shared.resume.lock().resume_url.clone()
    }

    /// Round trip of the last acknowledged heartbeat
    pub fn latency(&self) -> Option<Duration> {
        *self.shared.latency.lock()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for GatewaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySession")
            .field("state", &self.state())
            .field("session_id", &self.session_id())
            .field("sequence", &self.sequence())
            .finish_non_exhaustive()
    }
}
