mod common;

use std::time::Duration;

use axum::http::{header, Method, StatusCode};
use tower::ServiceExt;

use common::send_http::{
    assert_error_response, build_request, create_send_test_app, extract_bytes, send_uri,
    set_cookie_value,
};
use common::{patterned_bytes, setup_temp_dir, wait_for_shutdown, BROWSER_UA, CURL_UA};
use qrdrop::server::ShutdownReason;

#[tokio::test]
async fn test_first_browser_request_gets_cookie() {
    let temp_dir = setup_temp_dir();
    let file = temp_dir.path().join("a.txt");
    std::fs::write(&file, b"hello").unwrap();
    let (app, state) = create_send_test_app(&file, true);

    let response = app
        .oneshot(build_request(Method::GET, &send_uri(), Some(BROWSER_UA), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let raw = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("cookie set")
        .to_str()
        .unwrap()
        .to_string();
    assert!(raw.contains("Path=/"));
    assert!(raw.contains("HttpOnly"));
    assert!(raw.contains("SameSite=Strict"));

    let value = set_cookie_value(&response).expect("qrcp cookie");
    assert_eq!(state.handshake.cookie(), Some(value));
    assert_eq!(state.handshake.pending().count(), 1);
    assert_eq!(extract_bytes(response).await, b"hello");
    assert_eq!(state.handshake.pending().count(), 0);
}

#[tokio::test]
async fn test_matching_cookie_joins_group() {
    let temp_dir = setup_temp_dir();
    let file = temp_dir.path().join("a.bin");
    std::fs::write(&file, patterned_bytes(4096)).unwrap();
    let (app, state) = create_send_test_app(&file, true);

    let first = app
        .clone()
        .oneshot(build_request(Method::GET, &send_uri(), Some(BROWSER_UA), None))
        .await
        .unwrap();
    let cookie = set_cookie_value(&first).unwrap();

    let second = app
        .oneshot(build_request(
            Method::GET,
            &send_uri(),
            Some(BROWSER_UA),
            Some(&cookie),
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert!(second.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(state.handshake.pending().count(), 2);

    extract_bytes(second).await;
    assert_eq!(state.handshake.pending().count(), 1);
    extract_bytes(first).await;
    assert_eq!(state.handshake.pending().count(), 0);
}

#[tokio::test]
async fn test_wrong_cookie_is_rejected() {
    let temp_dir = setup_temp_dir();
    let file = temp_dir.path().join("a.txt");
    std::fs::write(&file, b"a").unwrap();
    let (app, state) = create_send_test_app(&file, true);

    let _first = app
        .clone()
        .oneshot(build_request(Method::GET, &send_uri(), Some(BROWSER_UA), None))
        .await
        .unwrap();

    let response = app
        .oneshot(build_request(
            Method::GET,
            &send_uri(),
            Some(BROWSER_UA),
            Some("not-the-cookie"),
        ))
        .await
        .unwrap();

    assert_error_response(response, StatusCode::BAD_REQUEST, "bad_request", "mismatching cookie")
        .await;
    assert_eq!(state.handshake.pending().count(), 1);
}

#[tokio::test]
async fn test_absent_cookie_after_minting_is_rejected() {
    let temp_dir = setup_temp_dir();
    let file = temp_dir.path().join("a.txt");
    std::fs::write(&file, b"a").unwrap();
    let (app, state) = create_send_test_app(&file, true);

    let first = app
        .clone()
        .oneshot(build_request(Method::GET, &send_uri(), Some(BROWSER_UA), None))
        .await
        .unwrap();
    let cookie = set_cookie_value(&first).unwrap();

    let response = app
        .oneshot(build_request(Method::GET, &send_uri(), Some(BROWSER_UA), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(state.handshake.pending().count(), 1);
    assert_eq!(state.handshake.cookie(), Some(cookie));
}

#[tokio::test]
async fn test_direct_client_ignores_cookie_state() {
    let temp_dir = setup_temp_dir();
    let file = temp_dir.path().join("a.txt");
    std::fs::write(&file, b"a").unwrap();
    let (app, state) = create_send_test_app(&file, true);

    let _first = app
        .clone()
        .oneshot(build_request(Method::GET, &send_uri(), Some(BROWSER_UA), None))
        .await
        .unwrap();

    let response = app
        .oneshot(build_request(
            Method::GET,
            &send_uri(),
            Some(CURL_UA),
            Some("anything"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.handshake.pending().count(), 1);
}

//==========================
// Parallel cookied sends
//==========================
async fn two_cookied_sends(keep_alive: bool) -> Option<ShutdownReason> {
    let temp_dir = setup_temp_dir();
    let file = temp_dir.path().join("movie.bin");
    let content = patterned_bytes(512 * 1024);
    std::fs::write(&file, &content).unwrap();
    let (app, state) = create_send_test_app(&file, keep_alive);
    let _watcher = (!keep_alive).then(|| {
        state
            .handshake
            .pending()
            .spawn_watcher(state.shutdown.clone())
    });

    // Hold the first body open while the second request arrives
    let first = app
        .clone()
        .oneshot(build_request(Method::GET, &send_uri(), Some(BROWSER_UA), None))
        .await
        .unwrap();
    let cookie = set_cookie_value(&first).unwrap();
    let second = app
        .oneshot(build_request(
            Method::GET,
            &send_uri(),
            Some(BROWSER_UA),
            Some(&cookie),
        ))
        .await
        .unwrap();
    assert_eq!(state.handshake.pending().count(), 2);

    // Finishing one request must not end the session while the other is open
    assert_eq!(extract_bytes(first).await, content);
    assert_eq!(state.handshake.pending().count(), 1);
    assert_eq!(
        wait_for_shutdown(&state.shutdown, Duration::from_millis(100)).await,
        None
    );

    assert_eq!(extract_bytes(second).await, content);
    assert_eq!(state.handshake.pending().count(), 0);

    wait_for_shutdown(&state.shutdown, Duration::from_millis(500)).await
}

#[tokio::test]
async fn test_group_drain_shuts_down_without_keep_alive() {
    let reason = two_cookied_sends(false).await;
    assert_eq!(reason, Some(ShutdownReason::TransferComplete));
}

#[tokio::test]
async fn test_group_drain_keeps_serving_with_keep_alive() {
    let reason = two_cookied_sends(true).await;
    assert_eq!(reason, None);
}

#[tokio::test]
async fn test_abandoned_browser_download_still_releases_slot() {
    let temp_dir = setup_temp_dir();
    let file = temp_dir.path().join("big.bin");
    std::fs::write(&file, patterned_bytes(256 * 1024)).unwrap();
    let (app, state) = create_send_test_app(&file, false);
    let _watcher = state
        .handshake
        .pending()
        .spawn_watcher(state.shutdown.clone());

    let response = app
        .oneshot(build_request(Method::GET, &send_uri(), Some(BROWSER_UA), None))
        .await
        .unwrap();
    assert_eq!(state.handshake.pending().count(), 1);
    drop(response);

    assert_eq!(state.handshake.pending().count(), 0);
    let reason = wait_for_shutdown(&state.shutdown, Duration::from_millis(500)).await;
    assert_eq!(reason, Some(ShutdownReason::TransferComplete));
}
