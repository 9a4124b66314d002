use crate::send::Payload;
use crate::server::handshake::Handshake;
use crate::server::lifecycle::ShutdownSignal;
use crate::server::progress::ProgressTracker;
use std::sync::Arc;

/// Send-specific application state
/// Passed to the send handler via Axum State extractor
#[derive(Clone)]
pub struct SendAppState {
    pub payload: Arc<Payload>,
    pub handshake: Arc<Handshake>,
    pub shutdown: ShutdownSignal,
    pub progress: ProgressTracker,
    pub keep_alive: bool,
}

impl SendAppState {
    pub fn new(
        payload: Payload,
        shutdown: ShutdownSignal,
        progress: ProgressTracker,
        keep_alive: bool,
    ) -> Self {
        Self {
            payload: Arc::new(payload),
            handshake: Arc::new(Handshake::new(shutdown.clone())),
            shutdown,
            progress,
            keep_alive,
        }
    }
}
