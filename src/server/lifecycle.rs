//! Single-fire shutdown signal and the external sources that can fire it.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Why a session stopped. Only the first trigger is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// OS interrupt (Ctrl+C)
    Interrupted,
    /// User asked to quit from the keyboard
    UserCancel,
    /// Every counted browser request finished
    TransferComplete,
    /// A direct (non-browser) client downloaded the whole payload
    DirectDownloadComplete,
    /// The upload form was fully processed
    ReceiveComplete,
    /// Unrecoverable handler or server error
    Fatal(String),
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupted => write!(f, "interrupted"),
            ShutdownReason::UserCancel => write!(f, "cancelled by user"),
            ShutdownReason::TransferComplete => write!(f, "transfer complete"),
            ShutdownReason::DirectDownloadComplete => write!(f, "download complete"),
            ShutdownReason::ReceiveComplete => write!(f, "upload complete"),
            ShutdownReason::Fatal(msg) => write!(f, "error: {msg}"),
        }
    }
}

/// Idempotent shutdown event shared by handlers, watchers and cancel sources.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Returns `true` only for the first caller.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        // Reason is stored before cancelling so waiters always observe it
        let won = self.reason.set(reason.clone()).is_ok();
        if won {
            tracing::info!(%reason, "Shutdown requested");
        } else {
            tracing::debug!(%reason, "Ignoring repeated shutdown request");
        }
        self.token.cancel();
        won
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().cloned()
    }

    /// Wait until the signal fires and return the winning reason.
    pub async fn fired(&self) -> ShutdownReason {
        self.token.cancelled().await;
        self.reason()
            .unwrap_or_else(|| ShutdownReason::Fatal("shutdown without reason".to_string()))
    }

    /// Token for background tasks that must stop with the session.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

/// Anything outside the HTTP layer that may request a shutdown.
pub trait CancelSource: Send + 'static {
    fn spawn(self: Box<Self>, signal: ShutdownSignal) -> JoinHandle<()>;
}

/// OS interrupt listener.
pub struct CtrlC;

impl CancelSource for CtrlC {
    fn spawn(self: Box<Self>, signal: ShutdownSignal) -> JoinHandle<()> {
        let token = signal.child_token();
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if result.is_err() {
                        tracing::error!("Failed to listen for Ctrl+C");
                        return;
                    }
                    tracing::info!("Ctrl+C received - initiating graceful shutdown");
                    signal.trigger(ShutdownReason::Interrupted);
                }
                _ = token.cancelled() => {}
            }
        })
    }
}

/// Quits when `q` is read from the terminal.
pub struct KeyPress;

const KEY_POLL_INTERVAL: Duration = Duration::from_millis(200);

impl CancelSource for KeyPress {
    fn spawn(self: Box<Self>, signal: ShutdownSignal) -> JoinHandle<()> {
        use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};

        let token = signal.child_token();
        tokio::task::spawn_blocking(move || {
            while !token.is_cancelled() {
                match event::poll(KEY_POLL_INTERVAL) {
                    Ok(false) => continue,
                    Ok(true) => {}
                    Err(err) => {
                        tracing::warn!("Keyboard not available: {err}");
                        return;
                    }
                }
                let Ok(Event::Key(key)) = event::read() else {
                    continue;
                };
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                let quit = matches!(key.code, KeyCode::Char('q'))
                    || (key.code == KeyCode::Char('c')
                        && key.modifiers.contains(KeyModifiers::CONTROL));
                if quit {
                    signal.trigger(ShutdownReason::UserCancel);
                    return;
                }
            }
        })
    }
}
