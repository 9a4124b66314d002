use std::path::Path;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use axum_extra::extract::cookie::Cookie;
use http_body_util::BodyExt;

use qrdrop::send::{Payload, SendAppState};
use qrdrop::server::handshake::COOKIE_NAME;
use qrdrop::server::routes;
use qrdrop::server::ShutdownSignal;

use super::{quiet_progress, TOKEN};

//===========
// App Factory
//===========
pub fn create_send_test_app(file: &Path, keep_alive: bool) -> (Router, SendAppState) {
    let payload = Payload::file(file).expect("Failed to build payload");
    let state = SendAppState::new(payload, ShutdownSignal::new(), quiet_progress(), keep_alive);
    let app = routes::create_send_router(&state, TOKEN);
    (app, state)
}

/// Route for an app built by `create_send_test_app`.
pub fn send_uri() -> String {
    format!("/send/{TOKEN}")
}

//=================
// Request Builders
//=================
pub fn build_request(
    method: Method,
    uri: &str,
    user_agent: Option<&str>,
    cookie: Option<&str>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(ua) = user_agent {
        builder = builder.header(header::USER_AGENT, ua);
    }
    if let Some(value) = cookie {
        builder = builder.header(header::COOKIE, format!("{COOKIE_NAME}={value}"));
    }
    builder
        .body(Body::empty())
        .expect("Failed to build request")
}

//================
// Response Helpers
//================
pub async fn extract_json(response: axum::response::Response) -> serde_json::Value {
    let body_bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to collect body")
        .to_bytes();
    serde_json::from_slice(&body_bytes).expect("Failed to parse JSON")
}

pub async fn extract_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("Failed to collect body")
        .to_bytes()
        .to_vec()
}

/// Value of the `qrcp` cookie set by the response, if any.
pub fn set_cookie_value(response: &axum::response::Response) -> Option<String> {
    let raw = response.headers().get(header::SET_COOKIE)?.to_str().ok()?;
    let cookie = Cookie::parse(raw).ok()?;
    (cookie.name() == COOKIE_NAME).then(|| cookie.value().to_string())
}

pub async fn assert_error_response(
    response: axum::response::Response,
    expected_status: StatusCode,
    expected_type: &str,
    expected_message_contains: &str,
) {
    assert_eq!(response.status(), expected_status);
    let json = extract_json(response).await;
    assert_eq!(json["error"]["type"], expected_type);
    let message = json["error"]["message"]
        .as_str()
        .expect("error.message should be a string")
        .to_lowercase();
    assert!(
        message.contains(&expected_message_contains.to_lowercase()),
        "error message should contain '{expected_message_contains}', got '{message}'"
    );
}
