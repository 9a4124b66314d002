// Submodules
pub mod address;
pub mod handshake;
pub mod lifecycle;
pub mod progress;
pub mod routes;
mod runtime;
mod session;
pub mod tls;
pub mod token;

// Public API (what main.rs imports)
pub use lifecycle::{CancelSource, CtrlC, KeyPress, ShutdownReason, ShutdownSignal};
pub use runtime::{serve, ServerTask};
pub use session::{Session, TransferMode};
