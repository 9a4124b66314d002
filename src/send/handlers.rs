//! HTTP handler for the payload download endpoint.

use anyhow::Context;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Method, Response},
};
use axum_extra::extract::CookieJar;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::common::AppError;
use crate::server::handshake::Admission;
use crate::server::progress::Direction;

use super::{Completion, SendAppState, TrackedStream};

/// RFC 5987 `attr-char` minus the alphanumerics.
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// `attachment` disposition with an ASCII fallback and a UTF-8 `filename*`.
pub fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded = utf8_percent_encode(filename, ATTR_CHAR);
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}

/// Stream the payload. Browser requests pass the cookie handshake first.
pub async fn send_handler(
    State(state): State<SendAppState>,
    method: Method,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Response<Body>), AppError> {
    let payload = state.payload.as_ref();

    // Stat on every request; the file may have changed since startup.
    // Failures here must not consume a pending slot.
    let metadata = tokio::fs::metadata(&payload.path).await.map_err(|e| {
        tracing::error!(path = %payload.path.display(), "Cannot stat payload: {e}");
        AppError::Internal("payload unavailable".to_string())
    })?;
    let size = metadata.len();
    let file = tokio::fs::File::open(&payload.path).await.map_err(|e| {
        tracing::error!(path = %payload.path.display(), "Cannot open payload: {e}");
        AppError::Internal("payload unavailable".to_string())
    })?;

    let admission = state.handshake.admit(&headers, &jar)?;
    let jar = match admission.set_cookie() {
        Some(cookie) => jar.add(cookie),
        None => jar,
    };
    let completion = match admission {
        Admission::Direct => {
            Completion::direct(state.shutdown.clone(), state.keep_alive, &method)
        }
        Admission::First { guard, .. } | Admission::Joined(guard) => Completion::counted(guard),
    };

    tracing::info!(file = %payload.filename, size, "Serving payload");
    let counter = state
        .progress
        .begin(Direction::Send, payload.filename.clone(), Some(size));
    let reporter = state.progress.spawn_reporter(counter.clone());
    let body = TrackedStream::new(file, size, counter, reporter, completion);

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, size)
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&payload.filename),
        );
    let response = response
        .body(Body::from_stream(body))
        .context("build response")?;
    Ok((jar, response))
}
