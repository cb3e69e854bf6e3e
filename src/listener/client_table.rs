use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::{NormError, NormResult};
use crate::native::{NormSocket, SocketHandle};

/// The listener indexes its clients by their source address and port.
///
/// NB: Field order is significant - the derived total order compares version first, then port,
///      then all 16 address bytes. IPv4 addresses are zero-padded, so the full-width comparison
///      is well-defined for both families.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ClientIdentity {
    version: u8,
    port: u16,
    addr: [u8; 16],
}

impl ClientIdentity {
    /// identity of a peer NORM could not tell us anything about
    pub const UNKNOWN: ClientIdentity = ClientIdentity {
        version: 0,
        port: 0,
        addr: [0; 16],
    };

    /// `raw_addr` has 4 bytes for version 4, 16 bytes for version 6. Anything else (including
    ///  a length that does not match the version) yields `UNKNOWN`.
    pub fn new(version: u8, raw_addr: &[u8], port: u16) -> ClientIdentity {
        let mut addr = [0u8; 16];
        match (version, raw_addr.len()) {
            (4, 4) => addr[..4].copy_from_slice(raw_addr),
            (6, 16) => addr.copy_from_slice(raw_addr),
            _ => return ClientIdentity::UNKNOWN,
        }
        ClientIdentity { version, port, addr }
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn raw_addr(&self) -> &[u8] {
        match self.version {
            4 => &self.addr[..4],
            _ => &self.addr,
        }
    }

    pub fn ip(&self) -> Option<IpAddr> {
        match self.version {
            4 => Some(IpAddr::V4(Ipv4Addr::new(self.addr[0], self.addr[1], self.addr[2], self.addr[3]))),
            6 => Some(IpAddr::V6(Ipv6Addr::from(self.addr))),
            _ => None,
        }
    }

    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.ip().map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl From<SocketAddr> for ClientIdentity {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(a) => ClientIdentity::new(4, &a.ip().octets(), a.port()),
            SocketAddr::V6(a) => ClientIdentity::new(6, &a.ip().octets(), a.port()),
        }
    }
}

impl Debug for ClientIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}@v{}]", self, self.version)
    }
}

impl Display for ClientIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.ip() {
            Some(ip) => write!(f, "{}/{}", ip, self.port),
            None => write!(f, "<unknown>/{}", self.port),
        }
    }
}

/// Per-client state of an accepted peer.
///
/// The write-ready flag and the byte counter are bookkeeping for unicast server -> client
///  traffic. They are maintained for the engine that takes over the connection; nothing in the
///  accept path reads them.
#[derive(Debug)]
pub struct ClientSession {
    socket: NormSocket,
    write_ready: bool,
    bytes_written: u64,
}

impl ClientSession {
    pub fn new(socket: NormSocket) -> ClientSession {
        ClientSession {
            socket,
            write_ready: true,
            bytes_written: 0,
        }
    }

    pub fn socket(&self) -> SocketHandle {
        self.socket.handle()
    }

    pub fn write_ready(&self) -> bool {
        self.write_ready
    }

    pub fn set_write_ready(&mut self, write_ready: bool) {
        self.write_ready = write_ready;
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn add_bytes_written(&mut self, num_bytes: u64) {
        self.bytes_written += num_bytes;
    }
}

#[derive(Debug, Default)]
pub struct ClientTable {
    clients: BTreeMap<ClientIdentity, ClientSession>,
}

impl ClientTable {
    pub fn new() -> ClientTable {
        ClientTable::default()
    }

    pub fn contains(&self, identity: &ClientIdentity) -> bool {
        self.clients.contains_key(identity)
    }

    pub fn get(&self, identity: &ClientIdentity) -> Option<&ClientSession> {
        self.clients.get(identity)
    }

    pub fn get_mut(&mut self, identity: &ClientIdentity) -> Option<&mut ClientSession> {
        self.clients.get_mut(identity)
    }

    pub fn find_socket(&self, identity: &ClientIdentity) -> Option<SocketHandle> {
        self.get(identity).map(|c| c.socket())
    }

    /// Never replaces a live session: inserting a tracked identity fails and leaves the table
    ///  untouched (the rejected session is dropped, closing its socket).
    pub fn insert(&mut self, identity: ClientIdentity, session: ClientSession) -> NormResult<&mut ClientSession> {
        match self.clients.entry(identity) {
            Entry::Occupied(_) => Err(NormError::DuplicateClient(identity)),
            Entry::Vacant(e) => Ok(e.insert(session)),
        }
    }

    pub fn remove(&mut self, identity: &ClientIdentity) -> Option<ClientSession> {
        self.clients.remove(identity)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClientIdentity, &ClientSession)> {
        self.clients.iter()
    }

    pub fn clear(&mut self) {
        self.clients.clear();
    }
}
