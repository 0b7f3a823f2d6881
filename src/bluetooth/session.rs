use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::{Connector, FrameSink};
use crate::error::{ConnectError, SendError};
use crate::protocol::commands::SPP_UUID;

/// Connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Retry and timeout policy for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Consecutive failed attempts before the session is marked failed.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
            connect_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(2),
        }
    }
}

impl SessionConfig {
    /// Delay after the `failures`-th consecutive failure: doubles from
    /// `initial_backoff`, capped at `max_backoff`.
    fn backoff(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

enum Request {
    Connect {
        identifier: String,
        epoch: u64,
        reply: oneshot::Sender<Result<(), ConnectError>>,
    },
    Send {
        frame: Vec<u8>,
        epoch: u64,
        cancelled: Arc<AtomicBool>,
        reply: oneshot::Sender<Result<(), SendError>>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// A queued frame. Await [`PendingSend::wait`] for the delivery result.
///
/// Dropping it discards the result; the frame is skipped if it has not
/// started yet.
pub struct PendingSend {
    reply: oneshot::Receiver<Result<(), SendError>>,
    cancel: CancelHandle,
}

impl PendingSend {
    /// Handle that cancels this send from elsewhere while the result is awaited.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub async fn wait(self) -> Result<(), SendError> {
        self.reply.await.unwrap_or(Err(SendError::Cancelled))
    }
}

/// Cancels one queued send.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Cancel the send if the session has not started it yet. Between retry
    /// attempts it stops the send; a write already in progress runs to completion.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Owns the single transport session to the earbuds.
///
/// All work happens on one background task, so connects and writes are
/// strictly serialized in submission order.
pub struct DeviceSession {
    connector: Box<dyn Connector>,
    identifier: String,
    config: SessionConfig,
    sink: Option<Box<dyn FrameSink>>,
    failures: u32,
    epoch: Arc<AtomicU64>,
    state_tx: watch::Sender<ConnectionState>,
}

/// Cheap, cloneable handle to a running [`DeviceSession`].
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Request>,
    epoch: Arc<AtomicU64>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl DeviceSession {
    /// Spawn the session worker on the current tokio runtime.
    pub fn spawn(
        connector: Box<dyn Connector>,
        identifier: impl Into<String>,
        mut config: SessionConfig,
    ) -> SessionHandle {
        config.max_attempts = config.max_attempts.max(1);

        let (tx, rx) = mpsc::channel(32);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let epoch = Arc::new(AtomicU64::new(0));

        let session = Self {
            connector,
            identifier: identifier.into(),
            config,
            sink: None,
            failures: 0,
            epoch: epoch.clone(),
            state_tx,
        };
        tokio::spawn(session.run(rx));

        SessionHandle {
            tx,
            epoch,
            state_rx,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Request>) {
        while let Some(request) = rx.recv().await {
            match request {
                Request::Connect {
                    identifier,
                    epoch,
                    reply,
                } => {
                    if reply.is_closed() {
                        continue;
                    }
                    let result = if self.is_stale(epoch) {
                        Err(ConnectError::Cancelled)
                    } else {
                        self.ensure_connected(identifier).await
                    };
                    let _ = reply.send(result);
                }
                Request::Send {
                    frame,
                    epoch,
                    cancelled,
                    reply,
                } => {
                    if reply.is_closed() {
                        debug!("Skipping send nobody waits for");
                        continue;
                    }
                    let result = if self.is_stale(epoch) || cancelled.load(Ordering::SeqCst) {
                        Err(SendError::Cancelled)
                    } else {
                        self.send(&frame, epoch, &cancelled).await
                    };
                    if reply.send(result).is_err() {
                        debug!("Send result discarded, caller went away");
                    }
                }
                Request::Reset { reply } => {
                    self.reset();
                    let _ = reply.send(());
                }
                Request::Close { reply } => {
                    self.close().await;
                    let _ = reply.send(());
                }
            }
        }

        debug!("All session handles dropped, shutting down");
        self.close().await;
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&mut self, state: ConnectionState) {
        let previous = self.state();
        if previous != state {
            self.state_tx.send_replace(state);
            info!("Connection state: {:?} -> {:?}", previous, state);
        }
    }

    fn is_stale(&self, epoch: u64) -> bool {
        epoch != self.epoch.load(Ordering::SeqCst)
    }

    async fn ensure_connected(&mut self, identifier: String) -> Result<(), ConnectError> {
        if identifier != self.identifier {
            info!("Switching target device to {}", identifier);
            self.teardown().await;
            self.set_state(ConnectionState::Disconnected);
            self.identifier = identifier;
        }

        if self.sink.is_some() {
            return Ok(());
        }
        if self.state() == ConnectionState::Failed {
            return Err(ConnectError::ConnectFailed(session_failed()));
        }

        loop {
            match self.connect_once().await {
                Ok(()) => {
                    self.failures = 0;
                    return Ok(());
                }
                Err(ConnectError::ConnectFailed(e)) => match self.record_failure(&e) {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => return Err(ConnectError::ConnectFailed(e)),
                },
                Err(e) => {
                    // Not a link fault: the next request gets the full budget
                    self.failures = 0;
                    return Err(e);
                }
            }
        }
    }

    async fn connect_once(&mut self) -> Result<(), ConnectError> {
        self.set_state(ConnectionState::Connecting);

        let timeout = self.config.connect_timeout;
        let opened =
            tokio::time::timeout(timeout, self.connector.open(&self.identifier, SPP_UUID)).await;

        match opened {
            Ok(Ok(sink)) => {
                self.sink = Some(sink);
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
            Err(_) => {
                self.set_state(ConnectionState::Disconnected);
                Err(ConnectError::ConnectFailed(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect timed out after {:?}", timeout),
                )))
            }
        }
    }

    /// Connect if needed and write `frame`, retrying with backoff until the
    /// retry budget runs out.
    async fn send(
        &mut self,
        frame: &[u8],
        epoch: u64,
        cancelled: &AtomicBool,
    ) -> Result<(), SendError> {
        if self.state() == ConnectionState::Failed {
            warn!("Session failed, refusing to send until reset");
            return Err(SendError::SendFailed {
                attempts: 0,
                source: Some(session_failed()),
            });
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let err = match self.attempt_send(frame).await {
                Ok(()) => {
                    self.failures = 0;
                    return Ok(());
                }
                Err(Attempt::Terminal(e)) => {
                    self.failures = 0;
                    return Err(e.into());
                }
                Err(Attempt::Retry(e)) => e,
            };

            let Some(delay) = self.record_failure(&err) else {
                return Err(SendError::SendFailed {
                    attempts,
                    source: Some(err),
                });
            };
            tokio::time::sleep(delay).await;

            if self.is_stale(epoch) || cancelled.load(Ordering::SeqCst) {
                debug!("Send cancelled between attempts");
                return Err(SendError::Cancelled);
            }
        }
    }

    async fn attempt_send(&mut self, frame: &[u8]) -> Result<(), Attempt> {
        if self.sink.is_none() {
            match self.connect_once().await {
                Ok(()) => {}
                Err(ConnectError::ConnectFailed(e)) => return Err(Attempt::Retry(e)),
                Err(e) => return Err(Attempt::Terminal(e)),
            }
        }
        let Some(sink) = self.sink.as_mut() else {
            return Err(Attempt::Retry(io::Error::from(io::ErrorKind::NotConnected)));
        };

        let timeout = self.config.write_timeout;
        let written = match tokio::time::timeout(timeout, sink.write_frame(frame)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("write timed out after {:?}", timeout),
            )),
        };

        match written {
            Ok(()) => {
                debug!("TX {} bytes", frame.len());
                Ok(())
            }
            Err(e) => {
                warn!("Write failed, dropping stream: {}", e);
                self.teardown().await;
                self.set_state(ConnectionState::Disconnected);
                Err(Attempt::Retry(e))
            }
        }
    }

    /// Count a failed attempt. Returns the delay before the next one, or
    /// `None` once the budget is spent and the session is marked failed.
    fn record_failure(&mut self, err: &io::Error) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.config.max_attempts {
            warn!(
                "Attempt {}/{} failed: {}; giving up",
                self.failures, self.config.max_attempts, err
            );
            self.set_state(ConnectionState::Failed);
            return None;
        }

        let delay = self.config.backoff(self.failures);
        warn!(
            "Attempt {}/{} failed: {}; retrying in {:?}",
            self.failures, self.config.max_attempts, err, delay
        );
        Some(delay)
    }

    fn reset(&mut self) {
        self.failures = 0;
        if self.state() == ConnectionState::Failed {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    async fn close(&mut self) {
        self.teardown().await;
        self.failures = 0;
        self.set_state(ConnectionState::Disconnected);
    }

    async fn teardown(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            sink.shutdown().await;
        }
    }
}

enum Attempt {
    Retry(io::Error),
    Terminal(ConnectError),
}

fn session_failed() -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        "session failed, reset required",
    )
}

impl SessionHandle {
    /// Connect to `identifier` (name or address) unless already connected to it.
    pub async fn ensure_connected(&self, identifier: impl Into<String>) -> Result<(), ConnectError> {
        let (reply, rx) = oneshot::channel();
        let request = Request::Connect {
            identifier: identifier.into(),
            epoch: self.epoch.load(Ordering::SeqCst),
            reply,
        };
        if self.tx.send(request).await.is_err() {
            return Err(ConnectError::Cancelled);
        }
        rx.await.unwrap_or(Err(ConnectError::Cancelled))
    }

    /// Queue a frame behind any earlier requests.
    pub async fn submit(&self, frame: Vec<u8>) -> PendingSend {
        let (reply, rx) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let request = Request::Send {
            frame,
            epoch: self.epoch.load(Ordering::SeqCst),
            cancelled: cancelled.clone(),
            reply,
        };
        // On a closed queue the reply sender is dropped and wait() yields Cancelled.
        let _ = self.tx.send(request).await;
        PendingSend {
            reply: rx,
            cancel: CancelHandle(cancelled),
        }
    }

    /// Clear a failed session back to disconnected and re-arm the retry budget.
    pub async fn reset(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Request::Reset { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Cancel everything queued so far and drop the stream.
    pub async fn close(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Request::Close { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver notified on every connection state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}
