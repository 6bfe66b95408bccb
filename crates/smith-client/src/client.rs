//! Agent connection manager.
//!
//! Flow:
//! 1. `start()` connects to the agent socket and serves the connection until
//!    it goes inactive (peer close, I/O error, idle timeout) or `stop()`.
//! 2. Any failure schedules a single reconnect timer after the fixed delay.
//! 3. The timer fires `on_reconnect()`: drain the mailbox, then launch a new
//!    `start()` on a fresh task.
//!
//! At most one connection attempt is in flight at any time. The live
//! connection's outbound queue is published through [`OutboundSender`] so
//! `write()` can run from any thread.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bridge::protocol::{Message, Operate};
use crate::bridge::transport::{self, MessageReader, MessageWriter};
use crate::config::ClientConfig;
use crate::dispatch::{Dispatcher, MessageHandler};
use crate::mailbox::Mailbox;
use crate::outbound::OutboundSender;

/// Lifecycle of the client's single logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Live connection ended (peer close, I/O error or idle timeout).
    Inactive,
    /// Connection attempt failed.
    Failed,
    ScheduledReconnect,
    /// Terminal. Reached only through `stop()`.
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to {}: {source}", .path.display())]
    Connect { path: PathBuf, source: io::Error },
}

enum InactiveReason {
    PeerClosed,
    Io(io::Error),
    IdleTimeout(Duration),
}

impl fmt::Display for InactiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed connection"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::IdleTimeout(d) => write!(f, "no frame received for {:.1}s", d.as_secs_f64()),
        }
    }
}

enum SessionEnd {
    Inactive(InactiveReason),
    Stopped,
}

/// Clears the in-flight flag when a connection attempt ends.
struct AttemptGuard<'a> {
    in_flight: &'a watch::Sender<bool>,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.send_replace(false);
    }
}

pub struct Client<H> {
    config: ClientConfig,
    dispatcher: Dispatcher<H>,
    mailbox: Mailbox,
    outbound: OutboundSender,
    state: watch::Sender<ConnectionState>,
    in_flight: watch::Sender<bool>,
    reconnect: StdMutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl<H: MessageHandler> Client<H> {
    pub fn new(config: ClientConfig, handler: Arc<H>) -> Arc<Self> {
        let mailbox = Mailbox::new(&config.mailbox_dir, config.pid);
        Arc::new(Self {
            config,
            dispatcher: Dispatcher::new(handler),
            mailbox,
            outbound: OutboundSender::new(),
            state: watch::Sender::new(ConnectionState::Disconnected),
            in_flight: watch::Sender::new(false),
            reconnect: StdMutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn handler(&self) -> &Arc<H> {
        self.dispatcher.handler()
    }

    pub fn mailbox_path(&self) -> &Path {
        self.mailbox.path()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Handle for writing from other tasks or threads.
    pub fn sender(&self) -> OutboundSender {
        self.outbound.clone()
    }

    /// Best-effort send to the agent. See [`OutboundSender::write`].
    pub fn write<T: Serialize + ?Sized>(&self, operate: Operate, payload: &T) {
        self.outbound.write(operate, payload);
    }

    /// Run `start()` on a fresh task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move { client.start().await })
    }

    /// Make one connection attempt and serve it until it ends.
    ///
    /// Returns once the connection is gone. Unless stopped, a reconnect has
    /// been scheduled by then. Returns immediately if another attempt is
    /// already in flight.
    pub async fn start(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            tracing::debug!("Client stopped, not starting");
            return;
        }

        let reconnect = {
            let Some(_attempt) = self.begin_attempt() else {
                tracing::warn!("Connection attempt already in flight, ignoring start");
                return;
            };
            tracing::info!(path = %self.config.socket_path.display(), "Probe client starting");
            self.connect_and_serve().await
        };

        if reconnect {
            self.schedule_reconnect();
        }
    }

    /// Drain the mailbox, then launch a new connection attempt.
    pub async fn on_reconnect(self: &Arc<Self>) {
        tracing::info!("Reconnecting to agent");

        match self.mailbox.drain(&self.dispatcher).await {
            Ok(report) if report.dispatched > 0 || report.failed > 0 => {
                tracing::info!(
                    dispatched = report.dispatched,
                    failed = report.failed,
                    "Mailbox drained"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Failed to drain mailbox"),
        }

        if self.shutdown.is_cancelled() {
            return;
        }
        self.spawn();
    }

    /// Shut the client down and wait for the in-flight attempt to finish.
    ///
    /// Idempotent. Safe to call from any task.
    pub async fn stop(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!("Stopping probe client");
        }
        self.shutdown.cancel();

        let pending = self.lock_reconnect().take();
        if let Some(handle) = pending {
            let _ = handle.await;
        }

        let mut in_flight = self.in_flight.subscribe();
        let _ = in_flight.wait_for(|busy| !*busy).await;

        self.outbound.detach();
        self.state.send_replace(ConnectionState::Stopped);
    }

    fn begin_attempt(&self) -> Option<AttemptGuard<'_>> {
        let acquired = self.in_flight.send_if_modified(|busy| {
            if *busy {
                false
            } else {
                *busy = true;
                true
            }
        });
        acquired.then(|| AttemptGuard {
            in_flight: &self.in_flight,
        })
    }

    /// Returns whether a reconnect should follow.
    async fn connect_and_serve(&self) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        self.set_state(ConnectionState::Connecting);

        let (reader, writer) = match self.connect().await {
            Ok(halves) => halves,
            Err(e) => {
                tracing::warn!(error = %e, "Agent connection failed");
                self.set_state(ConnectionState::Failed);
                return true;
            }
        };

        // A live connection supersedes any reconnect still pending, so its
        // mailbox drain can never land behind live traffic.
        if let Some(pending) = self.lock_reconnect().take() {
            tracing::debug!("Connected, cancelling pending reconnect");
            pending.abort();
        }

        let (tx, rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        self.outbound.attach(tx);
        self.set_state(ConnectionState::Connected);
        tracing::info!("Connected to agent");

        let end = self.serve(reader, writer, rx).await;
        self.outbound.detach();

        match end {
            SessionEnd::Inactive(reason) => {
                tracing::info!(%reason, "Agent connection inactive");
                self.set_state(ConnectionState::Inactive);
                true
            }
            SessionEnd::Stopped => {
                tracing::info!("Agent connection closed");
                false
            }
        }
    }

    async fn connect(&self) -> Result<(MessageReader, MessageWriter), ClientError> {
        transport::connect(&self.config.socket_path)
            .await
            .map_err(|source| ClientError::Connect {
                path: self.config.socket_path.clone(),
                source,
            })
    }

    async fn serve(
        &self,
        mut reader: MessageReader,
        mut writer: MessageWriter,
        mut outbound_rx: mpsc::Receiver<Message>,
    ) -> SessionEnd {
        let idle_timeout = self.config.idle_timeout;
        let idle = tokio::time::sleep(idle_timeout.unwrap_or(Duration::MAX));
        tokio::pin!(idle);

        loop {
            tokio::select! {
                biased;

                // Dropping the halves shuts the socket down without waiting on a
                // flush the agent may never drain.
                _ = self.shutdown.cancelled() => return SessionEnd::Stopped,

                frame = reader.next() => {
                    if let Some(timeout) = idle_timeout {
                        idle.as_mut().reset(tokio::time::Instant::now() + timeout);
                    }
                    match frame {
                        Some(Ok(Ok(message))) => {
                            if let Err(e) = self.dispatcher.dispatch(message) {
                                tracing::warn!(error = %e, "Dropping undecodable message");
                            }
                        }
                        Some(Ok(Err(e))) => {
                            tracing::warn!(error = %e, "Dropping malformed frame");
                        }
                        Some(Err(e)) => return SessionEnd::Inactive(InactiveReason::Io(e)),
                        None => return SessionEnd::Inactive(InactiveReason::PeerClosed),
                    }
                }

                Some(message) = outbound_rx.recv() => {
                    // An agent that stops reading must not pin the session in
                    // `send`: shutdown and the idle timer still apply.
                    tokio::select! {
                        biased;

                        _ = self.shutdown.cancelled() => return SessionEnd::Stopped,

                        result = writer.send(message) => {
                            if let Err(e) = result {
                                return SessionEnd::Inactive(InactiveReason::Io(e));
                            }
                        }

                        () = &mut idle, if idle_timeout.is_some() => {
                            let timeout = idle_timeout.unwrap_or_default();
                            return SessionEnd::Inactive(InactiveReason::IdleTimeout(timeout));
                        }
                    }
                }

                () = &mut idle, if idle_timeout.is_some() => {
                    let timeout = idle_timeout.unwrap_or_default();
                    return SessionEnd::Inactive(InactiveReason::IdleTimeout(timeout));
                }
            }
        }
    }

    /// Arm the reconnect timer, replacing any pending one.
    fn schedule_reconnect(self: &Arc<Self>) {
        let mut pending = self.lock_reconnect();
        if self.shutdown.is_cancelled() {
            return;
        }
        if let Some(previous) = pending.take() {
            previous.abort();
        }

        let delay = self.config.reconnect_delay;
        self.set_state(ConnectionState::ScheduledReconnect);
        tracing::info!(delay_secs = delay.as_secs_f64(), "Scheduling reconnect");

        let client = Arc::clone(self);
        *pending = Some(tokio::spawn(async move {
            tokio::select! {
                _ = client.shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => client.on_reconnect().await,
            }
        }));
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Stopped || *state == next {
                return false;
            }
            tracing::debug!(from = ?*state, to = ?next, "Connection state change");
            *state = next;
            true
        });
    }

    fn lock_reconnect(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.reconnect
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
