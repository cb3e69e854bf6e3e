use std::io;

use thiserror::Error;

use crate::listener::client_table::ClientIdentity;

pub type NormResult<T> = Result<T, NormError>;

#[derive(Debug, Error)]
pub enum NormError {
    /// The endpoint text violates the `[localId,][source;]host:port` grammar
    #[error("malformed endpoint '{endpoint}': {reason}")]
    MalformedEndpoint {
        endpoint: String,
        reason: &'static str,
    },

    /// The resolver rejected a literal or name under its capability profile
    #[error("cannot resolve '{name}': {reason}")]
    Resolution {
        name: String,
        reason: String,
    },

    #[error("address has no family - it was never resolved")]
    UnresolvedAddress,

    /// Creating a native instance or socket failed
    #[error("NORM resource exhausted while trying to {operation}: {source}")]
    ResourceExhaustion {
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    /// Refused, unreachable and similar - retried unless the reconnect-stop policy says otherwise
    #[error("connect failed: {0}")]
    TransientConnect(#[source] io::Error),

    #[error("connect timed out")]
    ConnectTimeout,

    /// NB: This is never escalated - an accept event for a tracked client is simply ignored
    #[error("client {0} is already connected")]
    DuplicateClient(ClientIdentity),
}

impl NormError {
    pub(crate) fn malformed(endpoint: &str, reason: &'static str) -> NormError {
        NormError::MalformedEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        }
    }

    pub(crate) fn resolution(name: &str, reason: impl Into<String>) -> NormError {
        NormError::Resolution {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn exhausted(operation: &'static str, source: io::Error) -> NormError {
        NormError::ResourceExhaustion { operation, source }
    }

    /// OS-level error code for notifications, 0 if there is none
    pub fn errno(&self) -> i32 {
        match self {
            NormError::MalformedEndpoint { .. } | NormError::Resolution { .. } | NormError::UnresolvedAddress => libc::EINVAL,
            NormError::ResourceExhaustion { source, .. } => source.raw_os_error().unwrap_or(0),
            NormError::TransientConnect(e) => e.raw_os_error().unwrap_or(0),
            NormError::ConnectTimeout => libc::ETIMEDOUT,
            NormError::DuplicateClient(_) => 0,
        }
    }
}
