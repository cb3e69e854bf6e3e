use std::sync::Mutex;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::time::Instant;

use crate::native::Descriptor;
use crate::reactor::{IoHandle, Reactor, TimerId};

#[derive(Debug)]
struct Registration {
    fd: Descriptor,
    pollin: bool,
    pollout: bool,
}

#[derive(Default)]
struct SimState {
    next_handle: u64,
    registrations: FxHashMap<IoHandle, Registration>,
    timers: FxHashMap<TimerId, Instant>,
}

/// A reactor whose timers run on tokio's clock: with the clock paused, tests move time forward
///  explicitly and collect the timers that would have fired.
#[derive(Default)]
pub struct SimReactor {
    state: Mutex<SimState>,
}

impl SimReactor {
    pub fn new() -> SimReactor {
        Default::default()
    }

    pub fn num_registered(&self) -> usize {
        self.state.lock().unwrap().registrations.len()
    }

    pub fn is_pollin(&self, fd: Descriptor) -> bool {
        self.state.lock().unwrap().registrations.values()
            .any(|r| r.fd == fd && r.pollin)
    }

    pub fn is_pollout(&self, fd: Descriptor) -> bool {
        self.state.lock().unwrap().registrations.values()
            .any(|r| r.fd == fd && r.pollout)
    }

    pub fn num_timers(&self) -> usize {
        self.state.lock().unwrap().timers.len()
    }

    pub fn is_timer_armed(&self, id: TimerId) -> bool {
        self.state.lock().unwrap().timers.contains_key(&id)
    }

    /// removes and returns the timers whose deadline has passed, earliest first
    pub fn expired_timers(&self) -> Vec<TimerId> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();

        let mut expired = state.timers.iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, deadline)| (*deadline, *id))
            .collect::<Vec<_>>();
        expired.sort();

        for (_, id) in &expired {
            state.timers.remove(id);
        }
        expired.into_iter()
            .map(|(_, id)| id)
            .collect()
    }
}

impl Reactor for SimReactor {
    fn add_fd(&self, fd: Descriptor) -> IoHandle {
        let mut state = self.state.lock().unwrap();
        state.next_handle += 1;
        let handle = IoHandle(state.next_handle);
        state.registrations.insert(handle, Registration { fd, pollin: false, pollout: false });
        handle
    }

    fn rm_fd(&self, handle: IoHandle) {
        let removed = self.state.lock().unwrap().registrations.remove(&handle);
        assert!(removed.is_some(), "{:?} is not registered", handle);
    }

    fn set_pollin(&self, handle: IoHandle) {
        self.state.lock().unwrap().registrations.get_mut(&handle)
            .expect("set_pollin on unregistered handle")
            .pollin = true;
    }

    fn set_pollout(&self, handle: IoHandle) {
        self.state.lock().unwrap().registrations.get_mut(&handle)
            .expect("set_pollout on unregistered handle")
            .pollout = true;
    }

    fn add_timer(&self, timeout: Duration, id: TimerId) {
        self.state.lock().unwrap().timers.insert(id, Instant::now() + timeout);
    }

    fn cancel_timer(&self, id: TimerId) {
        self.state.lock().unwrap().timers.remove(&id);
    }
}
