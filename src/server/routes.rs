//! Router definitions for send and receive sessions

use crate::{
    receive::{self, ReceiveAppState},
    send::{self, SendAppState},
    server::token,
    ui::{qr, web},
};
use anyhow::Result;
use axum::{extract::DefaultBodyLimit, routing::*, Router};
use std::sync::Arc;

/// Build the router for a send session: only the token route exists.
pub fn create_send_router(state: &SendAppState, path_token: &str) -> Router {
    Router::new()
        .route(
            &token::send_route(path_token),
            get(send::handlers::send_handler),
        )
        .with_state(state.clone())
}

/// Build the router for a receive session. Uploads are not size limited.
pub fn create_receive_router(state: &ReceiveAppState, path_token: &str) -> Router {
    Router::new()
        .route(
            &token::receive_route(path_token),
            get(receive::handlers::upload_page).post(receive::handlers::receive_handler),
        )
        .with_state(state.clone())
        .layer(DefaultBodyLimit::disable())
}

/// Add `/qr`, a page showing the session QR code.
pub fn with_qr_page(router: Router, url: &str) -> Result<Router> {
    let svg: Arc<str> = qr::qr_svg(url)?.into();
    let url: Arc<str> = url.into();
    Ok(router.route(
        "/qr",
        get(move || {
            let (svg, url) = (svg.clone(), url.clone());
            async move { web::serve_qr_page(&svg, &url) }
        }),
    ))
}
