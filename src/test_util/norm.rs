use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::native::{ConnectParams, Descriptor, InstanceHandle, ListenParams, NodeHandle, NormApi, SessionHandle, SocketEvent, SocketHandle};

#[derive(Default)]
struct Failures {
    create_instance: bool,
    open: bool,
    nonblocking: bool,
    noninheritable: bool,
    listen: bool,
    accept: bool,
}

#[derive(Default)]
struct NormState {
    next_handle: u64,
    instances: FxHashSet<InstanceHandle>,
    /// open socket -> the instance it belongs to
    sockets: FxHashMap<SocketHandle, InstanceHandle>,
    peers: FxHashMap<SocketHandle, SocketAddr>,
    nodes: FxHashMap<NodeHandle, SocketAddr>,

    failures: Failures,
    connect_results: VecDeque<Option<i32>>,
    pending_errors: VecDeque<i32>,
    events: VecDeque<SocketEvent>,

    connects: Vec<ConnectParams>,
    listens: Vec<ListenParams>,
    nonblocking: Vec<Descriptor>,
    noninheritable: Vec<Descriptor>,
    unicast_nack: Vec<(SessionHandle, bool)>,
    last_instance: Option<InstanceHandle>,
}

impl NormState {
    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

fn descriptor_of(instance: InstanceHandle) -> Descriptor {
    Descriptor(100 + instance.0 as i32)
}

/// An in-memory NORM engine. Connects succeed immediately unless a result was queued, and
///  socket events are delivered in the order they were pushed.
///
/// NB: Destroying an instance that still has open sockets panics, as does releasing a handle
///      twice.
#[derive(Default)]
pub struct FakeNorm {
    state: Mutex<NormState>,
}

impl FakeNorm {
    pub fn new() -> FakeNorm {
        Default::default()
    }

    pub fn live_instances(&self) -> usize {
        self.state.lock().unwrap().instances.len()
    }

    pub fn open_sockets(&self) -> usize {
        self.state.lock().unwrap().sockets.len()
    }

    pub fn is_open(&self, socket: SocketHandle) -> bool {
        self.state.lock().unwrap().sockets.contains_key(&socket)
    }

    pub fn last_instance(&self) -> Option<InstanceHandle> {
        self.state.lock().unwrap().last_instance
    }

    pub fn last_descriptor(&self) -> Option<Descriptor> {
        self.last_instance().map(descriptor_of)
    }

    /// `None` for immediate success, `Some(errno)` for an error return
    pub fn push_connect_result(&self, result: Option<i32>) {
        self.state.lock().unwrap().connect_results.push_back(result);
    }

    pub fn push_pending_error(&self, errno: i32) {
        self.state.lock().unwrap().pending_errors.push_back(errno);
    }

    pub fn push_event(&self, event: SocketEvent) {
        self.state.lock().unwrap().events.push_back(event);
    }

    pub fn add_node(&self, addr: &str) -> NodeHandle {
        let mut state = self.state.lock().unwrap();
        let node = NodeHandle(state.next_handle());
        state.nodes.insert(node, addr.parse().unwrap());
        node
    }

    /// what `peer_name` reports for `socket` from now on
    pub fn set_peer(&self, socket: SocketHandle, addr: &str) {
        self.state.lock().unwrap().peers.insert(socket, addr.parse().unwrap());
    }

    pub fn fail_create_instance(&self, fail: bool) {
        self.state.lock().unwrap().failures.create_instance = fail;
    }
    pub fn fail_open(&self, fail: bool) {
        self.state.lock().unwrap().failures.open = fail;
    }
    pub fn fail_nonblocking(&self, fail: bool) {
        self.state.lock().unwrap().failures.nonblocking = fail;
    }
    pub fn fail_noninheritable(&self, fail: bool) {
        self.state.lock().unwrap().failures.noninheritable = fail;
    }
    pub fn fail_listen(&self, fail: bool) {
        self.state.lock().unwrap().failures.listen = fail;
    }
    pub fn fail_accept(&self, fail: bool) {
        self.state.lock().unwrap().failures.accept = fail;
    }

    pub fn connects(&self) -> Vec<ConnectParams> {
        self.state.lock().unwrap().connects.clone()
    }

    pub fn listens(&self) -> Vec<ListenParams> {
        self.state.lock().unwrap().listens.clone()
    }

    pub fn nonblocking(&self) -> Vec<Descriptor> {
        self.state.lock().unwrap().nonblocking.clone()
    }

    pub fn noninheritable(&self) -> Vec<Descriptor> {
        self.state.lock().unwrap().noninheritable.clone()
    }

    pub fn unicast_nack(&self) -> Vec<(SessionHandle, bool)> {
        self.state.lock().unwrap().unicast_nack.clone()
    }
}

fn injected(errno: i32) -> io::Error {
    io::Error::from_raw_os_error(errno)
}

impl NormApi for FakeNorm {
    fn create_instance(&self) -> io::Result<InstanceHandle> {
        let mut state = self.state.lock().unwrap();
        if state.failures.create_instance {
            return Err(injected(libc::ENOMEM));
        }
        let instance = InstanceHandle(state.next_handle());
        state.instances.insert(instance);
        state.last_instance = Some(instance);
        Ok(instance)
    }

    fn destroy_instance(&self, instance: InstanceHandle) {
        let mut state = self.state.lock().unwrap();
        assert!(state.sockets.values().all(|i| *i != instance), "{:?} destroyed while it has open sockets", instance);
        assert!(state.instances.remove(&instance), "{:?} destroyed twice", instance);
    }

    fn descriptor(&self, instance: InstanceHandle) -> io::Result<Descriptor> {
        Ok(descriptor_of(instance))
    }

    fn set_nonblocking(&self, fd: Descriptor) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failures.nonblocking {
            return Err(injected(libc::EBADF));
        }
        state.nonblocking.push(fd);
        Ok(())
    }

    fn set_noninheritable(&self, fd: Descriptor) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failures.noninheritable {
            return Err(injected(libc::EBADF));
        }
        state.noninheritable.push(fd);
        Ok(())
    }

    fn open(&self, instance: InstanceHandle) -> io::Result<SocketHandle> {
        let mut state = self.state.lock().unwrap();
        if state.failures.open {
            return Err(injected(libc::EMFILE));
        }
        assert!(state.instances.contains(&instance), "opening a socket on dead {:?}", instance);
        let socket = SocketHandle(state.next_handle());
        state.sockets.insert(socket, instance);
        Ok(socket)
    }

    fn close(&self, socket: SocketHandle) {
        let mut state = self.state.lock().unwrap();
        assert!(state.sockets.remove(&socket).is_some(), "{:?} closed twice", socket);
        state.peers.remove(&socket);
    }

    fn session(&self, socket: SocketHandle) -> SessionHandle {
        SessionHandle(socket.0)
    }

    fn set_default_unicast_nack(&self, session: SessionHandle, enabled: bool) {
        self.state.lock().unwrap().unicast_nack.push((session, enabled));
    }

    fn connect(&self, _socket: SocketHandle, params: &ConnectParams) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.connects.push(params.clone());
        match state.connect_results.pop_front().flatten() {
            None => Ok(()),
            Some(errno) => Err(injected(errno)),
        }
    }

    fn listen(&self, _socket: SocketHandle, params: &ListenParams) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failures.listen {
            return Err(injected(libc::EADDRINUSE));
        }
        state.listens.push(params.clone());
        Ok(())
    }

    fn accept(&self, server: SocketHandle, client: Option<NodeHandle>) -> io::Result<SocketHandle> {
        let mut state = self.state.lock().unwrap();
        if state.failures.accept {
            return Err(injected(libc::EMFILE));
        }
        let instance = *state.sockets.get(&server)
            .ok_or_else(|| injected(libc::EBADF))?;
        let socket = SocketHandle(state.next_handle());
        state.sockets.insert(socket, instance);

        let peer = client.and_then(|node| state.nodes.get(&node).copied());
        if let Some(peer) = peer {
            state.peers.insert(socket, peer);
        }
        Ok(socket)
    }

    fn take_error(&self, _socket: SocketHandle) -> io::Result<Option<io::Error>> {
        Ok(self.state.lock().unwrap().pending_errors.pop_front().map(injected))
    }

    fn next_socket_event(&self, _instance: InstanceHandle) -> Option<SocketEvent> {
        self.state.lock().unwrap().events.pop_front()
    }

    fn node_address(&self, node: NodeHandle) -> Option<SocketAddr> {
        self.state.lock().unwrap().nodes.get(&node).copied()
    }

    fn peer_name(&self, socket: SocketHandle) -> Option<SocketAddr> {
        self.state.lock().unwrap().peers.get(&socket).copied()
    }
}
