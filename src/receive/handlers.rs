//! HTTP handlers for the upload form and multipart ingest.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequest, Multipart, Request, State};
use axum::http::header;
use axum::response::IntoResponse;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::common::AppError;
use crate::config::RECEIVE_CHUNK_SIZE;
use crate::receive::state::ReceiveAppState;
use crate::receive::storage;
use crate::server::lifecycle::ShutdownReason;
use crate::server::progress::{Direction, TransferCounter};
use crate::ui::web;

const WRITE_BUFFER: usize = 64 * 1024;

/// Serve the upload form.
pub async fn upload_page(State(state): State<ReceiveAppState>) -> impl IntoResponse {
    web::serve_upload_page(state.route())
}

/// Store every named file part, then answer with the completion page.
pub async fn receive_handler(
    State(state): State<ReceiveAppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Result<impl IntoResponse, AppError> {
    let total = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut multipart = Multipart::from_request(request, &state)
        .await
        .map_err(|e| state.fail(AppError::BadRequest(format!("expected a multipart upload: {e}"))))?;

    match peer {
        Some(ConnectInfo(addr)) => tracing::info!(%addr, "Receiving upload"),
        None => tracing::info!("Receiving upload"),
    }

    let existing = storage::existing_names(state.output_dir())
        .await
        .map_err(|e| state.fail(AppError::Internal(format!("cannot list output directory: {e}"))))?;

    let counter = state.progress.begin(Direction::Receive, "upload", total);
    let reporter = state.progress.spawn_reporter(counter.clone());

    let mut stored = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return Err(state.fail(AppError::BadRequest(format!(
                    "malformed multipart body: {e}"
                ))))
            }
        };

        let Some(wanted) = field.file_name().and_then(storage::client_file_name) else {
            tracing::debug!(field = ?field.name(), "Skipping part without a file name");
            continue;
        };

        let (name, file) = state.create_file(&wanted, &existing).await.map_err(|e| {
            state.fail(AppError::Internal(format!("cannot create {wanted}: {e}")))
        })?;
        counter.set_label(name.clone());
        tracing::info!(file = %name, "Storing upload");

        if let Err(err) = write_field(field, file, &counter).await {
            let _ = tokio::fs::remove_file(state.output_dir().join(&name)).await;
            return Err(state.fail(err));
        }
        stored.push(name);
    }

    reporter.finish().await;
    tracing::info!(
        files = stored.len(),
        bytes = counter.transferred(),
        "Upload complete"
    );

    if !state.keep_alive {
        state.shutdown.trigger(ShutdownReason::ReceiveComplete);
    }

    Ok(web::serve_done_page(&stored))
}

/// Copy one part to disk in `RECEIVE_CHUNK_SIZE` pieces.
async fn write_field(
    mut field: axum::extract::multipart::Field<'_>,
    file: tokio::fs::File,
    counter: &TransferCounter,
) -> Result<(), AppError> {
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER, file);
    loop {
        let chunk = field
            .chunk()
            .await
            .map_err(|e| AppError::BadRequest(format!("upload interrupted: {e}")))?;
        let Some(chunk) = chunk else {
            break;
        };
        for piece in chunk.chunks(RECEIVE_CHUNK_SIZE) {
            writer
                .write_all(piece)
                .await
                .map_err(|e| AppError::Internal(format!("write failed: {e}")))?;
            counter.add(piece.len() as u64);
        }
    }
    writer
        .flush()
        .await
        .map_err(|e| AppError::Internal(format!("write failed: {e}")))?;
    Ok(())
}
