mod archive;
pub mod handlers;
mod payload;
mod state;
mod stream;

pub use payload::Payload;
pub use state::SendAppState;
pub use stream::{Completion, TrackedStream};
