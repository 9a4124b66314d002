pub mod common;
pub mod logging;
pub mod output;
pub mod receive;
pub mod send;
pub mod server;
pub mod ui;

// Transfer tuning shared by the send and receive paths
pub mod config {
    use std::time::Duration;

    pub const SEND_CHUNK_SIZE: usize = 32 * 1024; // 32KB
    pub const RECEIVE_CHUNK_SIZE: usize = 1024; // 1KB
    pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
}
