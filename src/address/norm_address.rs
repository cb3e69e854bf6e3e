use std::fmt::{Debug, Display, Formatter};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use tracing::debug;

use crate::address::ip_resolver::{HostLookup, IpResolver, ResolverOptions, SystemLookup};
use crate::error::{NormError, NormResult};

pub const NORM_SCHEME: &str = "norm";

/// NORM's participant identifier. Peers on the same host need distinct ids; `ANY` lets NORM
///  derive one from the host's IP address.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeId(pub u32);
impl NodeId {
    pub const ANY: NodeId = NodeId(u32::MAX);
}
impl Debug for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if *self == NodeId::ANY {
            write!(f, "NodeId(ANY)")
        }
        else {
            write!(f, "NodeId({})", self.0)
        }
    }
}
impl Default for NodeId {
    fn default() -> Self {
        NodeId::ANY
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddressFamily {
    V4,
    V6,
}

/// A resolved NORM endpoint: `[localId,][srcIface[:srcAddr:srcPort];]host:port`.
///
/// The default value is the 'zero' state: no family, and therefore unusable for connecting or
///  binding. Resolution either succeeds completely or leaves the address untouched.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NormAddress {
    address: Option<SocketAddr>,
    source: Option<SocketAddr>,
    source_interface: Option<String>,
    interface: Option<String>,
    local_id: NodeId,
}

impl From<SocketAddr> for NormAddress {
    fn from(address: SocketAddr) -> Self {
        NormAddress {
            address: Some(address),
            ..Default::default()
        }
    }
}

impl NormAddress {
    /// Parses and resolves `name`. `local` selects the bind profile (interface names, no DNS)
    ///  over the connect profile (DNS, no interface names).
    pub fn parse(name: &str, local: bool, ipv6: bool, lookup: &dyn HostLookup) -> NormResult<NormAddress> {
        let mut result = NormAddress::default();
        result.resolve_with(name, local, ipv6, lookup)?;
        Ok(result)
    }

    pub fn resolve(&mut self, name: &str, local: bool, ipv6: bool) -> NormResult<()> {
        self.resolve_with(name, local, ipv6, &SystemLookup)
    }

    pub fn resolve_with(&mut self, name: &str, local: bool, ipv6: bool, lookup: &dyn HostLookup) -> NormResult<()> {
        let mut resolved = NormAddress::default();
        let mut rest = name;

        if let Some((local_id, tail)) = rest.rsplit_once(',') {
            let id = u32::from_str(local_id.trim())
                .map_err(|_| NormError::malformed(name, "local id is not a number"))?;
            resolved.local_id = NodeId(id);
            rest = tail;
        }

        if let Some((source_spec, tail)) = rest.rsplit_once(';') {
            if source_spec.contains(':') {
                let (interface, source_addr) = Self::split_source(name, source_spec)?;
                // NB: literals only - a DNS lookup or socktype dependent service name could make
                //      the source address differ from what the user wrote
                let source_opts = ResolverOptions {
                    bindable: true,
                    allow_dns: false,
                    allow_nic_name: true,
                    ipv6,
                    expect_port: true,
                };
                resolved.source = Some(IpResolver::new(source_opts, lookup).resolve(&source_addr)?);
                resolved.source_interface = interface;
            }
            else if !source_spec.is_empty() {
                debug!("interface-only specifier '{}' in '{}' is retained but not applied", source_spec, name);
                resolved.interface = Some(source_spec.to_string());
            }
            rest = tail;
        }

        if !rest.contains(':') {
            return Err(NormError::malformed(name, "missing 'host:port'"));
        }
        let options = ResolverOptions::for_context(local, ipv6);
        resolved.address = Some(IpResolver::new(options, lookup).resolve(rest)?);

        *self = resolved;
        Ok(())
    }

    /// `[iface:]addr:port` -> (iface, `addr:port`). A bracketed or colon-free head is an address
    ///  without interface.
    fn split_source(name: &str, source_spec: &str) -> NormResult<(Option<String>, String)> {
        let (head, port) = source_spec.rsplit_once(':')
            .ok_or_else(|| NormError::malformed(name, "missing source port"))?;

        if head.starts_with('[') || !head.contains(':') {
            return Ok((None, source_spec.to_string()));
        }

        let (interface, addr) = head.split_once(':')
            .ok_or_else(|| NormError::malformed(name, "malformed source specifier"))?;
        let interface = if interface.is_empty() { None } else { Some(interface.to_string()) };
        Ok((interface, format!("{}:{}", addr, port)))
    }

    pub fn is_resolved(&self) -> bool {
        self.address.is_some()
    }

    pub fn family(&self) -> Option<AddressFamily> {
        self.address.map(|a| if a.is_ipv6() { AddressFamily::V6 } else { AddressFamily::V4 })
    }

    pub fn socket_addr(&self) -> NormResult<SocketAddr> {
        self.address.ok_or(NormError::UnresolvedAddress)
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.address.map(|a| a.ip())
    }

    pub fn port(&self) -> Option<u16> {
        self.address.map(|a| a.port())
    }

    pub fn is_multicast(&self) -> bool {
        self.ip().is_some_and(|ip| ip.is_multicast())
    }

    /// the group to join, i.e. the primary address if it is a multicast address
    pub fn group(&self) -> Option<IpAddr> {
        self.ip().filter(|ip| ip.is_multicast())
    }

    pub fn source(&self) -> Option<SocketAddr> {
        self.source
    }

    pub fn source_interface(&self) -> Option<&str> {
        self.source_interface.as_deref()
    }

    /// An interface-only specifier (`iface;host:port`).
    ///
    /// NB: This is metadata only, it does not bind or select a multicast interface
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Canonical URI: `norm://a.b.c.d:port` or `norm://[v6]:port`. Local id, source and
    ///  interface are not part of it.
    pub fn to_uri(&self) -> NormResult<String> {
        match self.address {
            Some(SocketAddr::V4(a)) => Ok(format!("{}://{}:{}", NORM_SCHEME, a.ip(), a.port())),
            Some(SocketAddr::V6(a)) => Ok(format!("{}://[{}]:{}", NORM_SCHEME, a.ip(), a.port())),
            None => Err(NormError::UnresolvedAddress),
        }
    }
}

impl Display for NormAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.to_uri() {
            Ok(uri) => write!(f, "{}", uri),
            Err(_) => write!(f, "{}://<unresolved>", NORM_SCHEME),
        }
    }
}
