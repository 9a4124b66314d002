//! One transfer session: listener, routes, and the stop sequence.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use crate::common::AppConfig;
use crate::receive::ReceiveAppState;
use crate::send::{Payload, SendAppState};
use crate::server::address::{self, ExternalIpLookup};
use crate::server::lifecycle::{CancelSource, ShutdownReason, ShutdownSignal};
use crate::server::progress::ProgressTracker;
use crate::server::runtime::{self, ServerTask};
use crate::server::token::{self, SessionUrls};
use crate::server::{routes, tls};

/// What the session is for.
pub enum TransferMode {
    Send(Payload),
    Receive { output_dir: PathBuf },
}

pub struct Session {
    urls: SessionUrls,
    path_token: String,
    bind: IpAddr,
    port: u16,
    secure: bool,
    keep_alive: bool,
    expects_parallel: bool,
    grace: Duration,
    shutdown: ShutdownSignal,
    progress: ProgressTracker,
    server: ServerTask,
    payload: Option<Payload>,
    background: Vec<JoinHandle<()>>,
}

impl Session {
    /// Bind, resolve URLs and start serving. Nothing is retried on failure.
    pub async fn start(
        config: &AppConfig,
        mode: TransferMode,
        lookup: &dyn ExternalIpLookup,
    ) -> Result<Self> {
        Self::start_with_progress(config, mode, lookup, ProgressTracker::default()).await
    }

    pub async fn start_with_progress(
        config: &AppConfig,
        mode: TransferMode,
        lookup: &dyn ExternalIpLookup,
        progress: ProgressTracker,
    ) -> Result<Self> {
        config.validate()?;

        let bind = address::bind_address(&config.interface, config.bind)?;
        let listener = address::listen(bind, config.port)?;
        let port = listener
            .local_addr()
            .context("Failed to read listener address")?
            .port();

        let host = address::advertised_host(bind, config.fqdn.as_deref(), lookup).await?;
        let path_token = match &config.path {
            Some(path) => path.clone(),
            None => token::random_path_token()?,
        };
        let urls = SessionUrls::new(config.secure, &host, port, &path_token);

        let tls_config = if config.secure {
            Some(match config.tls_material() {
                Some((cert, key)) => tls::server_config(cert, key, config.tls_min_version)?,
                None => tls::self_signed_config(&host, config.tls_min_version)?,
            })
        } else {
            None
        };

        let shutdown = ShutdownSignal::new();
        let mut background = Vec::new();

        let (router, payload, expects_parallel, primary_url) = match mode {
            TransferMode::Send(payload) => {
                let state = SendAppState::new(
                    payload.clone(),
                    shutdown.clone(),
                    progress.clone(),
                    config.keep_alive,
                );
                if !config.keep_alive {
                    background.push(state.handshake.pending().spawn_watcher(shutdown.clone()));
                }
                let router = routes::create_send_router(&state, &path_token);
                (router, Some(payload), true, urls.send.clone())
            }
            TransferMode::Receive { output_dir } => {
                let state = ReceiveAppState::new(
                    &output_dir,
                    token::receive_route(&path_token),
                    shutdown.clone(),
                    progress.clone(),
                    config.keep_alive,
                )?;
                let router = routes::create_receive_router(&state, &path_token);
                (router, None, false, urls.receive.clone())
            }
        };

        let router = if config.browser {
            routes::with_qr_page(router, &primary_url)?
        } else {
            router
        };

        let server = runtime::serve(listener, router, tls_config, shutdown.clone());
        tracing::info!(url = %primary_url, bind = %bind, port, "Session ready");

        Ok(Self {
            urls,
            path_token,
            bind,
            port,
            secure: config.secure,
            keep_alive: config.keep_alive,
            expects_parallel,
            grace: config.shutdown_grace(),
            shutdown,
            progress,
            server,
            payload,
            background,
        })
    }

    pub fn urls(&self) -> &SessionUrls {
        &self.urls
    }

    /// The URL to show the user: send or receive, by mode.
    pub fn primary_url(&self) -> &str {
        if self.payload.is_some() {
            &self.urls.send
        } else {
            &self.urls.receive
        }
    }

    pub fn token(&self) -> &str {
        &self.path_token
    }

    pub fn bind(&self) -> IpAddr {
        self.bind
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn expects_parallel(&self) -> bool {
        self.expects_parallel
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Let an external source (signal, keyboard) end the session.
    pub fn attach(&mut self, source: Box<dyn CancelSource>) {
        self.background.push(source.spawn(self.shutdown.clone()));
    }

    /// Wait for the first shutdown trigger, stop serving, then clean up.
    pub async fn wait(self) -> Result<ShutdownReason> {
        let reason = self.shutdown.fired().await;
        tracing::info!(%reason, "Shutting down");

        let stopped = self.server.stop(self.grace).await;

        // Background tasks watch the shutdown token and exit on their own
        drop(self.background);

        if let Some(payload) = self.payload.filter(|p| p.delete_after_transfer) {
            if let Err(err) = payload.delete() {
                tracing::warn!("Could not remove temporary payload: {err:#}");
            }
        }

        stopped?;
        Ok(reason)
    }
}
