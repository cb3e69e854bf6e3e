use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6, ToSocketAddrs};
use std::str::FromStr;

#[cfg(test)] use mockall::automock;
use tracing::{debug, trace};

use crate::error::{NormError, NormResult};

/// Capability profile of a resolution: what kinds of names are acceptable.
///
/// Local / bind contexts allow interface names but no DNS, outward connect contexts allow DNS
///  but no interface names.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ResolverOptions {
    /// the result is used for binding, so the `*` wildcard is acceptable
    pub bindable: bool,
    pub allow_dns: bool,
    pub allow_nic_name: bool,
    pub ipv6: bool,
    /// the name has a trailing `:port`
    pub expect_port: bool,
}

impl ResolverOptions {
    pub fn local(ipv6: bool) -> ResolverOptions {
        ResolverOptions {
            bindable: true,
            allow_dns: false,
            allow_nic_name: true,
            ipv6,
            expect_port: true,
        }
    }

    pub fn remote(ipv6: bool) -> ResolverOptions {
        ResolverOptions {
            bindable: false,
            allow_dns: true,
            allow_nic_name: false,
            ipv6,
            expect_port: true,
        }
    }

    pub fn for_context(local: bool, ipv6: bool) -> ResolverOptions {
        if local {
            ResolverOptions::local(ipv6)
        }
        else {
            ResolverOptions::remote(ipv6)
        }
    }

    fn accepts(&self, ip: &IpAddr) -> bool {
        self.ipv6 || ip.is_ipv4()
    }
}

/// Access to the host's network configuration, separated out for testability
#[cfg_attr(test, automock)]
pub trait HostLookup: Send + Sync + 'static {
    /// all (interface name, address) pairs of this host
    fn interface_addresses(&self) -> io::Result<Vec<(String, IpAddr)>>;

    fn dns(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemLookup;

impl HostLookup for SystemLookup {
    fn interface_addresses(&self) -> io::Result<Vec<(String, IpAddr)>> {
        local_ip_address::list_afinet_netifas()
            .map_err(io::Error::other)
    }

    fn dns(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        // the port is irrelevant here, it is only needed to satisfy the std API
        Ok((host, 0u16).to_socket_addrs()?
            .map(|a| a.ip())
            .collect())
    }
}

pub struct IpResolver<'a> {
    options: ResolverOptions,
    lookup: &'a dyn HostLookup,
}

impl<'a> IpResolver<'a> {
    pub fn new(options: ResolverOptions, lookup: &'a dyn HostLookup) -> IpResolver<'a> {
        IpResolver { options, lookup }
    }

    /// Resolves `name` - `addr:port` if the options expect a port, a plain address otherwise.
    ///  Without a port in the name, the resulting port is 0.
    pub fn resolve(&self, name: &str) -> NormResult<SocketAddr> {
        let (addr_str, port) = if self.options.expect_port {
            let (addr_str, port_str) = name.rsplit_once(':')
                .ok_or_else(|| NormError::malformed(name, "missing ':port' suffix"))?;
            (addr_str, self.parse_port(name, port_str)?)
        }
        else {
            (name, 0)
        };

        let (addr_str, scope_id) = Self::split_scope(name, Self::strip_brackets(addr_str))?;
        if addr_str.is_empty() {
            return Err(NormError::malformed(name, "empty address"));
        }

        let ip = self.resolve_ip(name, addr_str)?;
        trace!("resolved '{}' to {} port {}", name, ip, port);

        Ok(match ip {
            IpAddr::V6(v6) => SocketAddr::V6(SocketAddrV6::new(v6, port, 0, scope_id)),
            IpAddr::V4(v4) => SocketAddr::new(IpAddr::V4(v4), port),
        })
    }

    fn parse_port(&self, name: &str, port_str: &str) -> NormResult<u16> {
        if port_str == "*" {
            if self.options.bindable {
                return Ok(0);
            }
            return Err(NormError::malformed(name, "wildcard port is only valid for binding"));
        }
        if port_str.is_empty() || !port_str.bytes().all(|b| b.is_ascii_digit()) {
            return Err(NormError::malformed(name, "port is not a number"));
        }
        u16::from_str(port_str)
            .map_err(|_| NormError::malformed(name, "port is out of range"))
    }

    fn strip_brackets(addr_str: &str) -> &str {
        addr_str.strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .unwrap_or(addr_str)
    }

    fn split_scope<'s>(name: &str, addr_str: &'s str) -> NormResult<(&'s str, u32)> {
        match addr_str.split_once('%') {
            None => Ok((addr_str, 0)),
            Some((addr, zone)) => {
                let scope_id = u32::from_str(zone)
                    .map_err(|_| NormError::resolution(name, "IPv6 zone id must be numeric"))?;
                Ok((addr, scope_id))
            }
        }
    }

    fn resolve_ip(&self, name: &str, addr_str: &str) -> NormResult<IpAddr> {
        if self.options.bindable && addr_str == "*" {
            return Ok(if self.options.ipv6 {
                IpAddr::V6(Ipv6Addr::UNSPECIFIED)
            }
            else {
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            });
        }

        if let Ok(ip) = IpAddr::from_str(addr_str) {
            if !self.options.accepts(&ip) {
                return Err(NormError::resolution(name, "IPv6 address requires the ipv6 option"));
            }
            return Ok(ip);
        }

        if self.options.allow_nic_name {
            if let Some(ip) = self.resolve_nic_name(addr_str) {
                return Ok(ip);
            }
        }

        if self.options.allow_dns {
            return self.resolve_dns(name, addr_str);
        }

        debug!("'{}' is neither a literal address nor an acceptable name", addr_str);
        Err(NormError::resolution(name, "not a literal address or known interface"))
    }

    fn resolve_nic_name(&self, nic: &str) -> Option<IpAddr> {
        let interfaces = match self.lookup.interface_addresses() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                debug!("failed to list network interfaces: {}", e);
                return None;
            }
        };

        let mut candidates = interfaces.into_iter()
            .filter(|(name, _)| name == nic)
            .map(|(_, ip)| ip)
            .filter(|ip| self.options.accepts(ip))
            .collect::<Vec<_>>();

        // prefer the requested family if the interface has both
        candidates.sort_by_key(|ip| ip.is_ipv6() != self.options.ipv6);
        candidates.first().copied()
    }

    fn resolve_dns(&self, name: &str, host: &str) -> NormResult<IpAddr> {
        let addresses = self.lookup.dns(host)
            .map_err(|e| NormError::resolution(name, e.to_string()))?;

        addresses.into_iter()
            .find(|ip| self.options.accepts(ip))
            .ok_or_else(|| NormError::resolution(name, "no address of an acceptable family"))
    }
}
