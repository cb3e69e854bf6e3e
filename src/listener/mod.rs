//! Server side: a single NORM socket listening on a bound address, turning accept events into
//!  per-client sessions.

pub mod client_table;

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::address::norm_address::NormAddress;
use crate::config::NormConfig;
use crate::endpoint::{EndpointType, EndpointUriPair};
use crate::error::{NormError, NormResult};
use crate::io_context::IoContext;
use crate::listener::client_table::{ClientIdentity, ClientSession, ClientTable};
use crate::monitor::EngineTransport;
use crate::native::{Descriptor, ListenParams, NormInstance, NormSocket, SessionHandle, SocketEvent, SocketEventKind, SocketHandle};
use crate::reactor::FdRegistration;

/// What a readable callback did
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InEventOutcome {
    Accepted(ClientIdentity),
    /// the client is tracked already, the event was dropped
    Duplicate(ClientIdentity),
    AcceptFailed,
    /// not an accept event for the listening socket
    Ignored,
}

pub struct NormListener {
    ctx: IoContext,
    config: Arc<NormConfig>,
    endpoint: String,
    address: NormAddress,

    // NB: Field order is drop order - clients and reactor interest go before the listening
    //      socket, and the socket before the instance
    clients: ClientTable,
    registration: Option<FdRegistration>,
    socket: Option<NormSocket>,
    instance: Option<NormInstance>,

    fd: Option<Descriptor>,
    session: Option<SessionHandle>,
    client_count: usize,
}
impl Debug for NormListener {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "NormListener({}, {} clients)", self.endpoint, self.clients.len())
    }
}

impl NormListener {
    pub fn new(ctx: IoContext, config: Arc<NormConfig>) -> NormListener {
        NormListener {
            ctx,
            config,
            endpoint: String::new(),
            address: NormAddress::default(),
            clients: ClientTable::new(),
            registration: None,
            socket: None,
            instance: None,
            fd: None,
            session: None,
            client_count: 0,
        }
    }

    /// the bound endpoint - the canonical URI, or the address text verbatim for an adopted
    ///  descriptor
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn address(&self) -> &NormAddress {
        &self.address
    }

    pub fn fd(&self) -> Option<Descriptor> {
        self.fd
    }

    pub fn socket(&self) -> Option<SocketHandle> {
        self.socket.as_ref().map(|s| s.handle())
    }

    pub fn session(&self) -> Option<SessionHandle> {
        self.session
    }

    /// Number of clients accepted since the address was last set.
    ///
    /// NB: Setting the address again resets this counter but keeps the sessions of clients that
    ///      are already connected, so it can be lower than `clients().len()`.
    pub fn client_count(&self) -> usize {
        self.client_count
    }

    pub fn clients(&self) -> &ClientTable {
        &self.clients
    }

    pub fn clients_mut(&mut self) -> &mut ClientTable {
        &mut self.clients
    }

    pub fn set_local_address(&mut self, addr: &str) -> NormResult<()> {
        if let Some(fd) = self.config.use_fd {
            debug!("adopting pre-opened descriptor {:?} for {}", fd, addr);
            self.fd = Some(fd);
            self.endpoint = addr.to_string();
            self.ctx.monitor.event_listening(&EndpointUriPair::unconnected_bind(&self.endpoint), fd);
            return Ok(());
        }

        let address = NormAddress::parse(addr, true, self.config.ipv6, self.ctx.lookup.as_ref())?;

        match self.bind(&address) {
            Ok(fd) => {
                self.endpoint = address.to_uri()?;
                self.address = address;
                info!("listening on {}", self.endpoint);
                self.ctx.monitor.event_listening(&EndpointUriPair::unconnected_bind(&self.endpoint), fd);
                Ok(())
            }
            Err(e) => {
                warn!("cannot listen on {}: {}", addr, e);
                self.release();
                Err(e)
            }
        }
    }

    fn bind(&mut self, address: &NormAddress) -> NormResult<Descriptor> {
        let api = self.ctx.api.clone();

        let instance = match self.instance.take() {
            Some(instance) => instance,
            None => NormInstance::create(api.clone())?,
        };
        let instance = self.instance.insert(instance);

        let socket = match self.socket.take() {
            Some(socket) => socket,
            None => NormSocket::open(instance)?,
        };
        let socket = self.socket.insert(socket);

        let session = socket.session();
        let socket_handle = socket.handle();
        self.session = Some(session);
        self.client_count = 0;

        let fd = instance.descriptor()?;
        self.fd = Some(fd);
        api.set_noninheritable(fd)
            .map_err(|e| NormError::exhausted("make descriptor non-inheritable", e))?;

        if !address.is_multicast() || self.config.norm_unicast_nack {
            api.set_default_unicast_nack(session, true);
        }

        let params = ListenParams {
            address: address.socket_addr()?,
            group: address.group(),
            local_id: address.local_id(),
        };
        trace!("listening on {:?} with {:?}", socket_handle, params);
        api.listen(socket_handle, &params)
            .map_err(|e| NormError::exhausted("listen", e))?;

        Ok(fd)
    }

    /// Registers the descriptor for read readiness
    pub fn plug(&mut self) {
        match self.fd {
            Some(fd) => {
                self.registration.insert(FdRegistration::new(self.ctx.reactor.clone(), fd))
                    .set_pollin();
            }
            None => warn!("plugging a listener that is not bound - ignoring"),
        }
    }

    /// Handles exactly one socket event. Readiness promises an event, so an empty queue means
    ///  NORM's state is corrupted.
    pub fn in_event(&mut self) -> InEventOutcome {
        let Some(instance) = &self.instance else {
            warn!("readable event for {} without a NORM instance - ignoring", self.endpoint);
            return InEventOutcome::Ignored;
        };

        let event = match self.ctx.api.next_socket_event(instance.handle()) {
            Some(event) => event,
            None => {
                error!("no NORM event available for {} although the descriptor was readable", self.endpoint);
                panic!("no NORM event available for {} although the descriptor was readable", self.endpoint);
            }
        };

        if event.kind == SocketEventKind::Accept && Some(event.socket) == self.socket() {
            self.on_accept(event)
        }
        else {
            trace!("ignoring {:?} on {}", event, self.endpoint);
            InEventOutcome::Ignored
        }
    }

    fn on_accept(&mut self, event: SocketEvent) -> InEventOutcome {
        let api = self.ctx.api.clone();

        let peer = event.sender
            .and_then(|node| api.node_address(node))
            .or_else(|| api.peer_name(event.socket));
        let identity = peer
            .map(ClientIdentity::from)
            .unwrap_or(ClientIdentity::UNKNOWN);

        if self.clients.contains(&identity) {
            debug!("client {:?} is already connected to {} - ignoring accept event", identity, self.endpoint);
            return InEventOutcome::Duplicate(identity);
        }

        let handle = match api.accept(event.socket, event.sender) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("accepting client {} on {} failed: {}", identity, self.endpoint, e);
                let errno = e.raw_os_error().unwrap_or(0);
                self.ctx.monitor.event_accept_failed(&EndpointUriPair::unconnected_bind(&self.endpoint), errno);
                return InEventOutcome::AcceptFailed;
            }
        };

        if let Err(e) = self.clients.insert(identity, ClientSession::new(NormSocket::adopt(api, handle))) {
            debug!("{}", e);
            return InEventOutcome::Duplicate(identity);
        }
        self.client_count += 1;

        let remote = match peer {
            Some(addr) => NormAddress::from(addr).to_string(),
            None => identity.to_string(),
        };
        info!("accepted client {} on {}", remote, self.endpoint);

        // NB: fd is set whenever there is an instance
        let fd = self.fd.unwrap_or(Descriptor(-1));
        self.ctx.session.create_engine(
            EngineTransport::Accepted { socket: handle, fd },
            EndpointUriPair::connected(&self.endpoint, &remote, EndpointType::Bind),
        );
        InEventOutcome::Accepted(identity)
    }

    pub fn process_term(&mut self) {
        debug!("terminating listener for {}", self.endpoint);
        self.release();
    }

    fn release(&mut self) {
        self.registration = None;
        self.clients.clear();
        self.socket = None;
        self.instance = None;
        self.fd = None;
        self.session = None;
        self.client_count = 0;
    }
}
