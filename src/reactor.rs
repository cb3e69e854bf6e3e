use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)] use mockall::automock;
use tracing::trace;

use crate::native::Descriptor;

/// Reactor-side identity of a registered descriptor
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct IoHandle(pub u64);

/// Timer ids are scoped to the object that armed them
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TimerId(pub u32);

/// The I/O thread's poller, scoped to one object: readiness and expired timers are delivered
///  back to that object's `in_event` / `out_event` / `timer_event` by the dispatch loop.
///
/// All calls happen on the owning I/O thread; implementations never block.
#[cfg_attr(test, automock)]
pub trait Reactor: Send + Sync + 'static {
    fn add_fd(&self, fd: Descriptor) -> IoHandle;
    fn rm_fd(&self, handle: IoHandle);
    fn set_pollin(&self, handle: IoHandle);
    fn set_pollout(&self, handle: IoHandle);

    fn add_timer(&self, timeout: Duration, id: TimerId);
    fn cancel_timer(&self, id: TimerId);
}

/// A descriptor registered with the reactor. Dropping it retracts all interest.
pub struct FdRegistration {
    reactor: Arc<dyn Reactor>,
    handle: IoHandle,
    fd: Descriptor,
}
impl Debug for FdRegistration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "FdRegistration({:?} -> {:?})", self.fd, self.handle)
    }
}

impl FdRegistration {
    pub fn new(reactor: Arc<dyn Reactor>, fd: Descriptor) -> FdRegistration {
        let handle = reactor.add_fd(fd);
        trace!("registered {:?} as {:?}", fd, handle);
        FdRegistration { reactor, handle, fd }
    }

    pub fn set_pollin(&self) {
        self.reactor.set_pollin(self.handle);
    }

    pub fn set_pollout(&self) {
        self.reactor.set_pollout(self.handle);
    }

    pub fn fd(&self) -> Descriptor {
        self.fd
    }
}

impl Drop for FdRegistration {
    fn drop(&mut self) {
        trace!("deregistering {:?}", self.handle);
        self.reactor.rm_fd(self.handle);
    }
}

/// An armed timer. Dropping it cancels the timer unless the reactor already fired it, which
///  the owner acknowledges through `expired()`.
pub struct TimerGuard {
    reactor: Arc<dyn Reactor>,
    id: TimerId,
    armed: bool,
}
impl Debug for TimerGuard {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "TimerGuard({:?}, armed: {})", self.id, self.armed)
    }
}

impl TimerGuard {
    pub fn arm(reactor: Arc<dyn Reactor>, timeout: Duration, id: TimerId) -> TimerGuard {
        trace!("arming timer {:?} for {:?}", id, timeout);
        reactor.add_timer(timeout, id);
        TimerGuard { reactor, id, armed: true }
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    /// the reactor fired this timer, so there is nothing left to cancel
    pub fn expired(mut self) {
        self.armed = false;
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        if self.armed {
            trace!("cancelling timer {:?}", self.id);
            self.reactor.cancel_timer(self.id);
        }
    }
}
