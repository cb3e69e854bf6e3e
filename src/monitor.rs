use std::time::Duration;

#[cfg(test)] use mockall::automock;

use crate::endpoint::EndpointUriPair;
use crate::native::{Descriptor, NormConnection, SocketHandle};

/// Notification sink of the owning socket. Events carry the endpoint pair and an OS-level
///  error code where there is one.
#[cfg_attr(test, automock)]
pub trait SocketMonitor: Send + Sync + 'static {
    fn event_connect_delayed(&self, endpoints: &EndpointUriPair, errno: i32);
    fn event_connect_retried(&self, endpoints: &EndpointUriPair, interval: Duration);
    fn event_connect_failed(&self, endpoints: &EndpointUriPair, errno: i32);
    fn event_accept_failed(&self, endpoints: &EndpointUriPair, errno: i32);
    fn event_listening(&self, endpoints: &EndpointUriPair, fd: Descriptor);
}

/// What the engine gets to work with
#[derive(Debug)]
pub enum EngineTransport {
    /// an outbound connection - the engine takes over the NORM instance and socket
    Connected(NormConnection),
    /// an accepted client - the socket stays owned by the listener's client table
    Accepted {
        socket: SocketHandle,
        fd: Descriptor,
    },
}

/// The session that owns a connecter or listener. This is where established descriptors are
///  turned into protocol engines, which is outside the scope of this crate.
#[cfg_attr(test, automock)]
pub trait Session: Send + Sync + 'static {
    fn create_engine(&self, transport: EngineTransport, endpoints: EndpointUriPair);

    /// The peer refused and the reconnect-stop policy forbids another attempt: the session
    ///  should wind down.
    fn conn_failed(&self);
}
