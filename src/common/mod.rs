pub mod config;
pub mod errors;

pub use config::{AppConfig, TlsVersion};
pub use errors::AppError;
