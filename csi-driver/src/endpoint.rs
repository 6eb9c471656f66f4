//! CSI endpoint addresses.
//!
//! The orchestrator's sidecars talk to the plugin over a unix socket; a TCP
//! listener is accepted for local debugging.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EndpointError {
    #[error("unsupported endpoint scheme: {0} (expected unix:// or tcp://)")]
    UnsupportedScheme(String),

    #[error("unix endpoint must be an absolute socket path: {0}")]
    InvalidSocketPath(String),

    #[error("invalid tcp endpoint address: {0}")]
    InvalidAddress(String),
}

/// Where the gRPC server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(SocketAddr),
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix://") {
            if !path.starts_with('/') {
                return Err(EndpointError::InvalidSocketPath(s.to_string()));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }

        if let Some(addr) = s.strip_prefix("tcp://") {
            return addr
                .parse()
                .map(Endpoint::Tcp)
                .map_err(|_| EndpointError::InvalidAddress(addr.to_string()));
        }

        // Bare absolute paths are treated as unix sockets
        if s.starts_with('/') {
            return Ok(Endpoint::Unix(PathBuf::from(s)));
        }

        Err(EndpointError::UnsupportedScheme(s.to_string()))
    }
}
