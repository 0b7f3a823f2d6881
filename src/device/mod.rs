pub mod anc;

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use crate::bluetooth::{ConnectionState, PendingSend, SessionHandle};
use crate::error::{ConnectError, SendError};
use anc::{Mode, ModeController};

/// Result of a local write. Says nothing about whether the earbuds applied it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Failed(&'static str),
    Cancelled,
}

impl From<&Result<(), SendError>> for Delivery {
    fn from(result: &Result<(), SendError>) -> Self {
        match result {
            Ok(()) => Self::Sent,
            Err(SendError::Cancelled) => Self::Cancelled,
            Err(e) => Self::Failed(e.kind()),
        }
    }
}

/// Outcome of one toggle: the mode that was requested and whether the frame
/// left the host. The two are separate facts.
#[derive(Debug)]
pub struct ToggleOutcome {
    pub mode: Mode,
    pub result: Result<(), SendError>,
}

/// Entry point for front-ends: mode selection plus delivery over one session.
#[derive(Clone)]
pub struct AncControl {
    modes: Arc<Mutex<ModeController>>,
    session: SessionHandle,
    last_delivery: Arc<std::sync::Mutex<Option<Delivery>>>,
}

impl AncControl {
    pub fn new(session: SessionHandle) -> Self {
        Self {
            modes: Arc::new(Mutex::new(ModeController::new())),
            session,
            last_delivery: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Advance to the next mode and deliver it.
    pub async fn toggle_mode(&self) -> ToggleOutcome {
        let (mode, pending) = self.begin_toggle().await;
        let result = self.finish(pending).await;
        ToggleOutcome { mode, result }
    }

    /// Advance to the next mode and queue its frame without waiting for delivery.
    ///
    /// The mode change and the enqueue happen under one lock, so frames reach
    /// the transport in the order toggles were requested.
    pub async fn begin_toggle(&self) -> (Mode, PendingSend) {
        let mut modes = self.modes.lock().await;
        let command = modes.toggle();
        let mode = modes.current();
        debug!("Toggle -> {} ({})", mode, command);
        let pending = self.session.submit(command.to_bytes()).await;
        (mode, pending)
    }

    /// Select `mode` directly and deliver it.
    pub async fn set_mode(&self, mode: Mode) -> ToggleOutcome {
        let pending = {
            let mut modes = self.modes.lock().await;
            let command = modes.select(mode);
            debug!("Select {} ({})", mode, command);
            self.session.submit(command.to_bytes()).await
        };
        let result = self.finish(pending).await;
        ToggleOutcome { mode, result }
    }

    /// Wait for a queued frame and remember its delivery result.
    pub async fn finish(&self, pending: PendingSend) -> Result<(), SendError> {
        let result = pending.wait().await;
        let delivery = Delivery::from(&result);
        info!("Delivery: {:?}", delivery);
        if let Ok(mut last) = self.last_delivery.lock() {
            *last = Some(delivery);
        }
        result
    }

    /// Last requested mode.
    pub async fn current_mode(&self) -> Mode {
        self.modes.lock().await.current()
    }

    /// Result of the most recent completed send, if any.
    pub fn last_delivery(&self) -> Option<Delivery> {
        self.last_delivery.lock().ok().and_then(|last| last.clone())
    }

    /// Open the link ahead of the first toggle.
    pub async fn connect(&self, identifier: &str) -> Result<(), ConnectError> {
        self.session.ensure_connected(identifier).await
    }

    pub async fn reset_session(&self) {
        self.session.reset().await;
    }

    pub async fn close(&self) {
        self.session.close().await;
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.session.subscribe()
    }
}
