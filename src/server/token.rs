//! Random path tokens, session cookie values, and session URL composition.

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

/// 128 bits: unguessable for the lifetime of a session.
pub const PATH_TOKEN_BYTES: usize = 16;
pub const SESSION_ID_BYTES: usize = 32;

fn random_b64(len: usize) -> Result<String> {
    let mut buf = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut buf)
        .context("OS entropy source unavailable")?;
    Ok(URL_SAFE_NO_PAD.encode(buf))
}

/// Mint the URL path segment that acts as the session capability.
pub fn random_path_token() -> Result<String> {
    random_b64(PATH_TOKEN_BYTES)
}

/// Mint the value of the `qrcp` session cookie.
pub fn session_id() -> Result<String> {
    random_b64(SESSION_ID_BYTES)
}

/// Fixed path tokens must stay a single URL path segment.
pub fn is_valid_path_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~'))
        && token != "."
        && token != ".."
}

/// Join a host and port, bracketing IPv6 literals.
pub fn host_with_port(host: &str, port: u16) -> String {
    if host.matches(':').count() >= 2 && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// URLs advertised for one session. Computed once at session start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUrls {
    pub base: String,
    pub send: String,
    pub receive: String,
}

impl SessionUrls {
    pub fn new(secure: bool, host: &str, port: u16, token: &str) -> Self {
        let scheme = if secure { "https" } else { "http" };
        let base = format!("{scheme}://{}", host_with_port(host, port));
        Self {
            send: format!("{base}{}", send_route(token)),
            receive: format!("{base}{}", receive_route(token)),
            base,
        }
    }
}

pub fn send_route(token: &str) -> String {
    format!("/send/{token}")
}

pub fn receive_route(token: &str) -> String {
    format!("/receive/{token}")
}
