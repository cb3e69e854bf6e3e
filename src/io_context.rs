use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::address::ip_resolver::{HostLookup, SystemLookup};
use crate::monitor::{Session, SocketMonitor};
use crate::native::NormApi;
use crate::reactor::Reactor;

/// The collaborators a connecter or listener talks to, all living on the same I/O thread
#[derive(Clone)]
pub struct IoContext {
    pub api: Arc<dyn NormApi>,
    pub reactor: Arc<dyn Reactor>,
    pub monitor: Arc<dyn SocketMonitor>,
    pub session: Arc<dyn Session>,
    pub lookup: Arc<dyn HostLookup>,
}
impl Debug for IoContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "IoContext")
    }
}

impl IoContext {
    pub fn new(
        api: Arc<dyn NormApi>,
        reactor: Arc<dyn Reactor>,
        monitor: Arc<dyn SocketMonitor>,
        session: Arc<dyn Session>,
    ) -> IoContext {
        IoContext {
            api,
            reactor,
            monitor,
            session,
            lookup: Arc::new(SystemLookup),
        }
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn HostLookup>) -> IoContext {
        self.lookup = lookup;
        self
    }
}
