use std::path::Path;

use axum::{
    body::Body,
    http::{header, Method, Request},
    Router,
};

use qrdrop::receive::ReceiveAppState;
use qrdrop::server::{routes, token, ShutdownSignal};

use super::{quiet_progress, TOKEN};

const BOUNDARY: &str = "----WebKitFormBoundary7MA4YWxkTrZu0gW";

//===========
// App Factory
//===========
pub fn create_receive_test_app(output_dir: &Path, keep_alive: bool) -> (Router, ReceiveAppState) {
    let state = ReceiveAppState::new(
        output_dir,
        token::receive_route(TOKEN),
        ShutdownSignal::new(),
        quiet_progress(),
        keep_alive,
    )
    .expect("Failed to build receive state");
    let app = routes::create_receive_router(&state, TOKEN);
    (app, state)
}

pub fn receive_uri() -> String {
    token::receive_route(TOKEN)
}

//=================
// Request Builders
//=================

/// One multipart part. `filename: None` makes a plain form field.
pub struct Part<'a> {
    pub name: &'a str,
    pub filename: Option<&'a str>,
    pub data: &'a [u8],
}

impl<'a> Part<'a> {
    pub fn file(filename: &'a str, data: &'a [u8]) -> Self {
        Self {
            name: "files",
            filename: Some(filename),
            data,
        }
    }

    pub fn field(name: &'a str, value: &'a str) -> Self {
        Self {
            name,
            filename: None,
            data: value.as_bytes(),
        }
    }
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part.filename {
            Some(filename) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{filename}\"\r\n",
                        part.name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            }
            None => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.name)
                        .as_bytes(),
                );
            }
        }
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn build_multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    let body = multipart_body(parts);
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .expect("Failed to build multipart request")
}

/// A multipart request whose body stops before the closing boundary.
pub fn build_truncated_multipart_request(uri: &str, filename: &str) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"files\"; filename=\"{filename}\"\r\n\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"partial data without an end");
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("Failed to build multipart request")
}
