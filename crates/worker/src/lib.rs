//! Worker process plumbing: lifecycle management, stage wiring, and the
//! session manager that runs orchestrators to completion.

pub mod lifecycle;
pub mod sessions;
pub mod stages;

pub use lifecycle::Lifecycle;
pub use sessions::SessionManager;
pub use stages::build_stages;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("configuration: {0}")]
    Config(#[from] parley_config::ConfigError),

    #[error("worker at capacity: {0} active sessions")]
    Capacity(usize),

    #[error("transport handshake timed out after {0} ms")]
    HandshakeTimeout(u64),

    #[error(transparent)]
    Core(#[from] parley_core::Error),
}
