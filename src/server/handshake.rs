//! Cookie handshake and pending-request accounting for send sessions.
//!
//! A browser download may arrive as several requests (range requests, retries).
//! The first browser request is admitted and handed the `qrcp` cookie; later
//! browser requests must present it. Direct clients skip all of this.

use std::sync::{Arc, Mutex};

use axum::http::{header, HeaderMap};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::common::AppError;
use crate::server::lifecycle::{ShutdownReason, ShutdownSignal};
use crate::server::token;

pub const COOKIE_NAME: &str = "qrcp";
const BROWSER_AGENT_PREFIX: &str = "Mozilla";

/// How a request is treated by the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Browser,
    Direct,
}

/// Browsers all announce themselves with a `Mozilla/` user agent.
pub fn classify(headers: &HeaderMap) -> ClientKind {
    let is_browser = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ua| ua.starts_with(BROWSER_AGENT_PREFIX));
    if is_browser {
        ClientKind::Browser
    } else {
        ClientKind::Direct
    }
}


//===============
// Pending group
//===============

/// In-flight counted requests. Starts at 1 for the expected first request.
#[derive(Clone)]
pub struct PendingGroup {
    count: Arc<watch::Sender<usize>>,
}

impl Default for PendingGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingGroup {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(1);
        Self {
            count: Arc::new(sender),
        }
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Guard for the initial slot; does not increment.
    fn adopt_initial(&self) -> PendingGuard {
        PendingGuard {
            group: self.clone(),
        }
    }

    /// Count one more request until the returned guard drops.
    fn join(&self) -> PendingGuard {
        self.count.send_modify(|n| *n += 1);
        PendingGuard {
            group: self.clone(),
        }
    }

    fn leave(&self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Resolve once the count reaches zero.
    pub async fn wait_idle(&self) {
        let mut receiver = self.count.subscribe();
        // Sender lives in self, so this only ends at zero
        let _ = receiver.wait_for(|n| *n == 0).await;
    }

    /// Fire `TransferComplete` the first time the group drains.
    pub fn spawn_watcher(&self, shutdown: ShutdownSignal) -> JoinHandle<()> {
        let group = self.clone();
        let token = shutdown.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = group.wait_idle() => {
                    tracing::info!("All counted requests finished");
                    shutdown.trigger(ShutdownReason::TransferComplete);
                }
                _ = token.cancelled() => {}
            }
        })
    }
}

/// Releases one pending slot on drop, whatever the request outcome.
pub struct PendingGuard {
    group: PendingGroup,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.group.leave();
    }
}

//===========
// Handshake
//===========

/// Result of admitting a send request.
pub enum Admission {
    /// Non-browser client, not tracked
    Direct,
    /// First browser request; owns the initial pending slot
    First { cookie: String, guard: PendingGuard },
    /// Later browser request with the matching cookie
    Joined(PendingGuard),
}

impl Admission {
    /// Session cookie to hand to the first admitted request.
    pub fn set_cookie(&self) -> Option<Cookie<'static>> {
        match self {
            Admission::First { cookie, .. } => Some(
                Cookie::build((COOKIE_NAME, cookie.clone()))
                    .path("/")
                    .http_only(true)
                    .same_site(SameSite::Strict)
                    .build(),
            ),
            _ => None,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Admission::Direct)
    }
}

type Minter = fn() -> anyhow::Result<String>;

/// One-time cookie minting and validation for a session.
pub struct Handshake {
    cookie: Mutex<Option<String>>,
    pending: PendingGroup,
    shutdown: ShutdownSignal,
    mint: Minter,
}

impl Handshake {
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self::with_minter(shutdown, token::session_id)
    }

    pub fn with_minter(shutdown: ShutdownSignal, mint: Minter) -> Self {
        Self {
            cookie: Mutex::new(None),
            pending: PendingGroup::new(),
            shutdown,
            mint,
        }
    }

    pub fn pending(&self) -> &PendingGroup {
        &self.pending
    }

    /// The minted cookie value, if a client has been admitted.
    pub fn cookie(&self) -> Option<String> {
        self.lock_cookie().clone()
    }

    fn lock_cookie(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        match self.cookie.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Cookie lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Decide whether a request counts toward the transfer.
    pub fn admit(&self, headers: &HeaderMap, jar: &CookieJar) -> Result<Admission, AppError> {
        if classify(headers) == ClientKind::Direct {
            return Ok(Admission::Direct);
        }

        let mut slot = self.lock_cookie();
        match slot.as_deref() {
            None => {
                let value = (self.mint)().map_err(|err| {
                    tracing::error!("Unable to generate session ID: {err:#}");
                    self.shutdown
                        .trigger(ShutdownReason::Fatal("session id generation failed".into()));
                    AppError::Internal("unable to start session".to_string())
                })?;
                *slot = Some(value.clone());
                tracing::debug!("Browser client admitted");
                Ok(Admission::First {
                    cookie: value,
                    guard: self.pending.adopt_initial(),
                })
            }
            Some(expected) => match jar.get(COOKIE_NAME).map(Cookie::value) {
                Some(presented) if presented == expected => {
                    Ok(Admission::Joined(self.pending.join()))
                }
                Some(_) => Err(AppError::BadRequest("mismatching cookie".to_string())),
                None => Err(AppError::BadRequest("missing session cookie".to_string())),
            },
        }
    }
}
