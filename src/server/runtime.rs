//! Spawns the HTTP(S) listener task and drives its graceful stop.

use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::task::JoinHandle;

use crate::server::lifecycle::{ShutdownReason, ShutdownSignal};

/// Running listener plus the handle used to stop it.
pub struct ServerTask {
    handle: Handle,
    task: JoinHandle<()>,
}

/// Serve `router` on an already bound listener. A server error fires `shutdown`.
pub fn serve(
    listener: TcpListener,
    router: Router,
    tls: Option<RustlsConfig>,
    shutdown: ShutdownSignal,
) -> ServerTask {
    let handle = Handle::new();
    let server_handle = handle.clone();
    let service = router.into_make_service_with_connect_info::<SocketAddr>();

    let task = tokio::spawn(async move {
        let result = match tls {
            Some(tls_config) => {
                axum_server::from_tcp_rustls(listener, tls_config)
                    .handle(server_handle)
                    .serve(service)
                    .await
            }
            None => {
                axum_server::from_tcp(listener)
                    .handle(server_handle)
                    .serve(service)
                    .await
            }
        };

        if let Err(e) = result {
            tracing::error!("Server error: {e}");
            shutdown.trigger(ShutdownReason::Fatal(format!("server error: {e}")));
        }
    });

    ServerTask { handle, task }
}

impl ServerTask {
    /// Stop accepting, let in-flight requests finish within `grace`, then wait for the task.
    pub async fn stop(self, grace: Duration) -> Result<()> {
        tracing::debug!(grace_secs = grace.as_secs_f64(), "Stopping HTTP server");
        self.handle.graceful_shutdown(Some(grace));
        self.task.await.context("HTTP server task failed")?;
        tracing::debug!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::address::listen;
    use axum::routing::get;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn serves_until_stopped() {
        let listener = listen(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).unwrap();
        let port = listener.local_addr().unwrap().port();
        let router = Router::new().route("/ping", get(|| async { "pong" }));

        let server = serve(listener, router, None, ShutdownSignal::new());

        let body = reqwest::get(format!("http://127.0.0.1:{port}/ping"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "pong");

        tokio::time::timeout(Duration::from_secs(5), server.stop(Duration::from_secs(1)))
            .await
            .expect("stop should not hang")
            .unwrap();

        assert!(reqwest::get(format!("http://127.0.0.1:{port}/ping")).await.is_err());
    }
}
