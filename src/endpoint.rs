use std::fmt::{Display, Formatter};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EndpointType {
    None,
    Bind,
    Connect,
}

/// The (local, remote) endpoint strings that accompany every monitor notification
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EndpointUriPair {
    pub local: String,
    pub remote: String,
    pub local_type: EndpointType,
}

impl EndpointUriPair {
    /// an outbound endpoint before there is a connection, i.e. without a local side
    pub fn unconnected_connect(endpoint: &str) -> EndpointUriPair {
        EndpointUriPair {
            local: String::new(),
            remote: endpoint.to_string(),
            local_type: EndpointType::Connect,
        }
    }

    pub fn unconnected_bind(endpoint: &str) -> EndpointUriPair {
        EndpointUriPair {
            local: endpoint.to_string(),
            remote: String::new(),
            local_type: EndpointType::Bind,
        }
    }

    pub fn connected(local: &str, remote: &str, local_type: EndpointType) -> EndpointUriPair {
        EndpointUriPair {
            local: local.to_string(),
            remote: remote.to_string(),
            local_type,
        }
    }

    /// the endpoint the user passed to `bind` or `connect`
    pub fn identifier(&self) -> &str {
        match self.local_type {
            EndpointType::Bind => &self.local,
            _ => &self.remote,
        }
    }
}

impl Display for EndpointUriPair {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.local, self.remote)
    }
}
