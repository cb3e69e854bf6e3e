//! The NORM protocol engine is consumed as an opaque capability: this module defines the
//!  operations the transport needs from it, and owned wrappers for the handles it hands out.
//!
//! NB: Native handles come in create / destroy pairs. `NormInstance` and `NormSocket` release
//!      their handle when dropped, so every exit path - including early returns on error -
//!      gives them back to the engine.

use std::fmt::{Debug, Formatter};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

#[cfg(test)] use mockall::automock;
use tracing::trace;

use crate::address::norm_address::NodeId;
use crate::error::{NormError, NormResult};

/// OS-level descriptor that becomes readable / writable when the NORM instance has events
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Descriptor(pub i32);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct InstanceHandle(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SocketHandle(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SessionHandle(pub u64);

/// A remote participant as seen by the NORM engine
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeHandle(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SocketEventKind {
    Accept,
    Connect,
    Read,
    Write,
    Closing,
    Close,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SocketEvent {
    pub kind: SocketEventKind,
    pub socket: SocketHandle,
    /// the remote node that caused the event, if NORM knows it
    pub sender: Option<NodeHandle>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectParams {
    pub server: SocketAddr,
    /// multicast group to join, `None` for unicast
    pub group: Option<IpAddr>,
    pub local_id: NodeId,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListenParams {
    pub address: SocketAddr,
    pub group: Option<IpAddr>,
    pub local_id: NodeId,
}

#[cfg_attr(test, automock)]
pub trait NormApi: Send + Sync + 'static {
    fn create_instance(&self) -> io::Result<InstanceHandle>;
    fn destroy_instance(&self, instance: InstanceHandle);

    fn descriptor(&self, instance: InstanceHandle) -> io::Result<Descriptor>;
    fn set_nonblocking(&self, fd: Descriptor) -> io::Result<()>;
    /// prevent the descriptor from leaking into child processes
    fn set_noninheritable(&self, fd: Descriptor) -> io::Result<()>;

    fn open(&self, instance: InstanceHandle) -> io::Result<SocketHandle>;
    fn close(&self, socket: SocketHandle);
    fn session(&self, socket: SocketHandle) -> SessionHandle;
    fn set_default_unicast_nack(&self, session: SessionHandle, enabled: bool);

    /// Returns an error with `EINPROGRESS` (or `EINTR`, or kind `WouldBlock`) if the connect
    ///  proceeds asynchronously.
    fn connect(&self, socket: SocketHandle, params: &ConnectParams) -> io::Result<()>;
    fn listen(&self, socket: SocketHandle, params: &ListenParams) -> io::Result<()>;
    fn accept(&self, server: SocketHandle, client: Option<NodeHandle>) -> io::Result<SocketHandle>;

    /// The pending error of an asynchronous connect, i.e. the equivalent of `SO_ERROR`. The
    ///  outer error means the query itself failed.
    fn take_error(&self, socket: SocketHandle) -> io::Result<Option<io::Error>>;

    /// Returns the next queued socket event without blocking, `None` if there is none
    fn next_socket_event(&self, instance: InstanceHandle) -> Option<SocketEvent>;

    fn node_address(&self, node: NodeHandle) -> Option<SocketAddr>;
    fn peer_name(&self, socket: SocketHandle) -> Option<SocketAddr>;
}

pub struct NormInstance {
    api: Arc<dyn NormApi>,
    handle: InstanceHandle,
}
impl Debug for NormInstance {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "NormInstance({})", self.handle.0)
    }
}

impl NormInstance {
    pub fn create(api: Arc<dyn NormApi>) -> NormResult<NormInstance> {
        let handle = api.create_instance()
            .map_err(|e| NormError::exhausted("create instance", e))?;
        trace!("created NORM instance {:?}", handle);
        Ok(NormInstance { api, handle })
    }

    pub fn handle(&self) -> InstanceHandle {
        self.handle
    }

    pub fn descriptor(&self) -> NormResult<Descriptor> {
        self.api.descriptor(self.handle)
            .map_err(|e| NormError::exhausted("get instance descriptor", e))
    }
}

impl Drop for NormInstance {
    fn drop(&mut self) {
        trace!("destroying NORM instance {:?}", self.handle);
        self.api.destroy_instance(self.handle);
    }
}

pub struct NormSocket {
    api: Arc<dyn NormApi>,
    handle: SocketHandle,
}
impl Debug for NormSocket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "NormSocket({})", self.handle.0)
    }
}

impl NormSocket {
    pub fn open(instance: &NormInstance) -> NormResult<NormSocket> {
        let handle = instance.api.open(instance.handle)
            .map_err(|e| NormError::exhausted("open socket", e))?;
        Ok(NormSocket {
            api: instance.api.clone(),
            handle,
        })
    }

    /// takes ownership of a socket NORM created on our behalf, e.g. by accepting a client
    pub fn adopt(api: Arc<dyn NormApi>, handle: SocketHandle) -> NormSocket {
        NormSocket { api, handle }
    }

    pub fn handle(&self) -> SocketHandle {
        self.handle
    }

    pub fn session(&self) -> SessionHandle {
        self.api.session(self.handle)
    }
}

impl Drop for NormSocket {
    fn drop(&mut self) {
        trace!("closing NORM socket {:?}", self.handle);
        self.api.close(self.handle);
    }
}

/// An established outbound connection, handed over to the engine as a whole.
///
/// NB: Field order is drop order - the socket must be closed before its instance goes away.
#[derive(Debug)]
pub struct NormConnection {
    pub socket: NormSocket,
    pub instance: NormInstance,
    pub fd: Descriptor,
}
