use std::io::Error as IoError;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::ConfigError;

/// Failures that escape the service to the operator.
///
/// Everything inside the monitoring core is absorbed locally; only startup
/// problems end up here.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: IoError,
    },
    #[error("invalid listen address {0:?}")]
    InvalidAddress(String),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Io(#[from] IoError),
}
