#![allow(dead_code)]

pub mod config_test_utils;
pub mod receive_http;
pub mod send_http;

use std::sync::Arc;
use std::time::Duration;

use qrdrop::server::progress::{LogRenderer, ProgressTracker};
use qrdrop::server::ShutdownSignal;
use tempfile::TempDir;

pub const BROWSER_UA: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";
pub const CURL_UA: &str = "curl/8.5.0";
pub const TOKEN: &str = "testtoken";

pub fn setup_temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

/// Progress output goes to the log so tests never touch the terminal.
pub fn quiet_progress() -> ProgressTracker {
    ProgressTracker::new(Arc::new(LogRenderer))
}

/// Deterministic bytes so corruption shows up in comparisons.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Wait a bounded time for the signal; `None` if it never fired.
pub async fn wait_for_shutdown(
    shutdown: &ShutdownSignal,
    within: Duration,
) -> Option<qrdrop::server::ShutdownReason> {
    tokio::time::timeout(within, shutdown.fired()).await.ok()
}
