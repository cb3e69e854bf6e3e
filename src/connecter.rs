//! Client side: drives one logical outbound NORM connection through
//!  `Idle -> Opening -> {Connected | PendingAsync}`, `PendingAsync -> {Connected | Failed}`,
//!  `Failed -> Reconnecting -> Opening` until it is handed to an engine or terminated.
//!
//! Every attempt starts from scratch: a fresh address resolution, a fresh NORM instance and
//!  socket. Handles of a failed attempt are released before anything of the next attempt is
//!  armed.

use std::fmt::{Debug, Formatter};
use std::io;
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::address::norm_address::NormAddress;
use crate::config::{NormConfig, ReconnectStop};
use crate::endpoint::{EndpointType, EndpointUriPair};
use crate::error::{NormError, NormResult};
use crate::io_context::IoContext;
use crate::monitor::EngineTransport;
use crate::native::{ConnectParams, Descriptor, NormConnection, NormInstance, NormSocket, SocketHandle};
use crate::reactor::{FdRegistration, TimerGuard, TimerId};
use crate::reconnect::{ReconnectBackoff, ReconnectScheduler};

/// NB: must differ from the reconnect timer id
pub const CONNECT_TIMER_ID: TimerId = TimerId(2);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnecterState {
    Idle,
    Opening,
    PendingAsync,
    /// the connection was handed to an engine; this connecter's work is done
    Connected,
    Failed,
    Reconnecting,
    Terminating,
    Closed,
}

impl ConnecterState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnecterState::Connected | ConnecterState::Terminating | ConnecterState::Closed)
    }
}

/// Native resources of a single connect attempt.
///
/// NB: Field order is drop order: reactor interest is retracted before the socket is closed,
///      and the socket is closed before the instance is destroyed.
struct Attempt {
    registration: Option<FdRegistration>,
    socket: NormSocket,
    instance: NormInstance,
    fd: Descriptor,
    address: NormAddress,
}
impl Debug for Attempt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Attempt({:?}, {:?}, {})", self.socket, self.fd, self.address)
    }
}

impl Attempt {
    fn register(&mut self, ctx: &IoContext) -> &FdRegistration {
        self.registration.insert(FdRegistration::new(ctx.reactor.clone(), self.fd))
    }

    fn into_connection(self) -> NormConnection {
        let Attempt { registration, socket, instance, fd, .. } = self;
        drop(registration);
        NormConnection { socket, instance, fd }
    }
}

enum OpenResult {
    Connected(Attempt),
    /// the connect proceeds asynchronously, with the errno that said so
    InProgress(Attempt, i32),
}

pub struct NormConnecter {
    ctx: IoContext,
    config: Arc<NormConfig>,
    endpoint: String,
    endpoints: EndpointUriPair,

    state: ConnecterState,
    attempt: Option<Attempt>,
    connect_timer: Option<TimerGuard>,
    reconnect: Box<dyn ReconnectScheduler>,
    last_error: Option<NormError>,
}
impl Debug for NormConnecter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "NormConnecter({}, {:?})", self.endpoint, self.state)
    }
}

impl NormConnecter {
    /// Checks `endpoint` synchronously: grammar and resolution errors are reported here rather
    ///  than turning into an endless series of failing attempts.
    pub fn new(ctx: IoContext, config: Arc<NormConfig>, endpoint: &str, reconnect: Box<dyn ReconnectScheduler>) -> anyhow::Result<NormConnecter> {
        config.validate()?;
        let address = NormAddress::parse(endpoint, false, config.ipv6, ctx.lookup.as_ref())?;
        debug!("connecter for {} resolved to {}", endpoint, address);

        Ok(NormConnecter {
            ctx,
            config,
            endpoint: endpoint.to_string(),
            endpoints: EndpointUriPair::unconnected_connect(endpoint),
            state: ConnecterState::Idle,
            attempt: None,
            connect_timer: None,
            reconnect,
            last_error: None,
        })
    }

    pub fn with_backoff(ctx: IoContext, config: Arc<NormConfig>, endpoint: &str) -> anyhow::Result<NormConnecter> {
        let reconnect = ReconnectBackoff::new(
            ctx.reactor.clone(),
            ctx.monitor.clone(),
            config.as_ref(),
            EndpointUriPair::unconnected_connect(endpoint),
        );
        NormConnecter::new(ctx, config, endpoint, Box::new(reconnect))
    }

    pub fn state(&self) -> ConnecterState {
        self.state
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// the reason the most recent attempt failed, if it did
    pub fn last_error(&self) -> Option<&NormError> {
        self.last_error.as_ref()
    }

    pub fn is_connect_timer_armed(&self) -> bool {
        self.connect_timer.is_some()
    }

    /// Starts connecting, or with `delayed_start` waits for the reconnect interval first.
    ///
    /// NB: If reconnecting is disabled there is no interval to wait for, so a delayed start
    ///      connects right away rather than never.
    pub fn plug(&mut self, delayed_start: bool) {
        if delayed_start && self.reconnect.add_reconnect_timer() {
            self.state = ConnecterState::Reconnecting;
        }
        else {
            self.start_connecting();
        }
    }

    pub fn start_connecting(&mut self) {
        if self.state.is_terminal() {
            debug!("not connecting to {} in state {:?}", self.endpoint, self.state);
            return;
        }
        debug_assert!(self.attempt.is_none(), "previous attempt was not retired");
        debug_assert!(self.connect_timer.is_none(), "previous connect timer was not retired");

        // a pending reconnect is superseded by this attempt
        self.reconnect.cancel();
        self.state = ConnecterState::Opening;

        match self.open() {
            Ok(OpenResult::Connected(mut attempt)) => {
                // connecting may succeed synchronously
                attempt.register(&self.ctx);
                self.attempt = Some(attempt);
                self.out_event();
            }
            Ok(OpenResult::InProgress(mut attempt, errno)) => {
                attempt.register(&self.ctx)
                    .set_pollout();
                self.attempt = Some(attempt);
                self.state = ConnecterState::PendingAsync;
                self.ctx.monitor.event_connect_delayed(&self.endpoints, errno);
                self.add_connect_timer();
            }
            Err(e) => {
                self.fail_attempt(e);
            }
        }
    }

    fn add_connect_timer(&mut self) {
        if self.config.has_connect_timeout() {
            self.connect_timer = Some(TimerGuard::arm(self.ctx.reactor.clone(), self.config.connect_timeout, CONNECT_TIMER_ID));
        }
    }

    /// Creates the native resources for one attempt and issues the connect. Partially created
    ///  resources are released on every error path since they are owned by local guards.
    fn open(&self) -> NormResult<OpenResult> {
        let address = NormAddress::parse(&self.endpoint, false, self.config.ipv6, self.ctx.lookup.as_ref())?;

        let instance = NormInstance::create(self.ctx.api.clone())?;
        let fd = instance.descriptor()?;
        let socket = NormSocket::open(&instance)?;

        self.ctx.api.set_nonblocking(fd)
            .map_err(|e| NormError::exhausted("make descriptor non-blocking", e))?;

        if let Some(source) = address.source() {
            debug!("source address {} for {} is not bound", source, self.endpoint);
        }

        let params = ConnectParams {
            server: address.socket_addr()?,
            group: address.group(),
            local_id: address.local_id(),
        };
        trace!("connecting {:?} with {:?}", socket, params);

        let connect_result = self.ctx.api.connect(socket.handle(), &params);
        let attempt = Attempt {
            registration: None,
            socket,
            instance,
            fd,
            address,
        };

        match connect_result {
            Ok(()) => Ok(OpenResult::Connected(attempt)),
            Err(e) if is_in_progress(&e) => Ok(OpenResult::InProgress(attempt, libc::EINPROGRESS)),
            Err(e) => Err(NormError::TransientConnect(e)),
        }
    }

    /// The descriptor became writable, i.e. the connect completed one way or the other
    pub fn out_event(&mut self) {
        if !matches!(self.state, ConnecterState::Opening | ConnecterState::PendingAsync) {
            debug!("ignoring writable event for {} in state {:?}", self.endpoint, self.state);
            return;
        }
        self.connect_timer = None;

        let Some(mut attempt) = self.attempt.take() else {
            warn!("writable event for {} without a connect attempt", self.endpoint);
            return;
        };
        attempt.registration = None;

        match self.check_connected(attempt.socket.handle()) {
            Ok(()) => {
                if let Err(e) = self.tune_socket(attempt.socket.handle()) {
                    drop(attempt);
                    self.fail_attempt(NormError::TransientConnect(e));
                    return;
                }
                self.connected(attempt);
            }
            Err(e) => {
                drop(attempt);
                if self.config.reconnect_stop.contains(ReconnectStop::CONN_REFUSED) && e.kind() == io::ErrorKind::ConnectionRefused {
                    self.stop_on_refusal(e);
                }
                else {
                    self.fail_attempt(NormError::TransientConnect(e));
                }
            }
        }
    }

    fn connected(&mut self, attempt: Attempt) {
        let remote = attempt.address.to_uri()
            .unwrap_or_else(|_| self.endpoint.clone());
        info!("connected to {} ({})", self.endpoint, remote);

        self.state = ConnecterState::Connected;
        self.last_error = None;
        self.reconnect.reset();

        let endpoints = EndpointUriPair::connected("", &remote, EndpointType::Connect);
        self.ctx.session.create_engine(EngineTransport::Connected(attempt.into_connection()), endpoints);
    }

    fn stop_on_refusal(&mut self, e: io::Error) {
        warn!("connection to {} refused, not reconnecting: {}", self.endpoint, e);
        let errno = e.raw_os_error().unwrap_or(libc::ECONNREFUSED);
        self.last_error = Some(NormError::TransientConnect(e));

        self.reconnect.cancel();
        self.state = ConnecterState::Closed;
        self.ctx.monitor.event_connect_failed(&self.endpoints, errno);
        self.ctx.session.conn_failed();
    }

    /// Releases whatever is left of the current attempt and schedules the next one
    fn fail_attempt(&mut self, e: NormError) {
        self.connect_timer = None;
        self.attempt = None;

        warn!("connect attempt to {} failed: {}", self.endpoint, e);
        self.last_error = Some(e);
        self.state = ConnecterState::Failed;

        if self.reconnect.add_reconnect_timer() {
            self.state = ConnecterState::Reconnecting;
        }
    }

    /// The outcome of an asynchronous connect. The outer error of the query is treated the same
    ///  as a pending error.
    fn check_connected(&self, socket: SocketHandle) -> io::Result<()> {
        let pending = match self.ctx.api.take_error(socket) {
            Ok(pending) => pending,
            Err(e) => Some(e),
        };

        match pending {
            None => Ok(()),
            Some(e) => {
                if let Some(errno) = e.raw_os_error() {
                    if matches!(errno, libc::ENOPROTOOPT | libc::ENOTSOCK | libc::ENOBUFS) {
                        error!("NORM descriptor is in an unusable state: {}", e);
                        panic!("NORM descriptor is in an unusable state: {}", e);
                    }
                }
                Err(e)
            }
        }
    }

    /// Hook for per-connection tuning (transmit rate, buffer sizes) before the engine takes over.
    ///  NORM's defaults are used as they are.
    fn tune_socket(&self, socket: SocketHandle) -> io::Result<()> {
        trace!("using default tuning for {:?}", socket);
        Ok(())
    }

    pub fn timer_event(&mut self, id: TimerId) {
        if id == CONNECT_TIMER_ID {
            match self.connect_timer.take() {
                Some(timer) => timer.expired(),
                None => {
                    debug!("ignoring connect timer for {} in state {:?}", self.endpoint, self.state);
                    return;
                }
            }
            self.fail_attempt(NormError::ConnectTimeout);
        }
        else if self.reconnect.on_timer(id) {
            if self.state == ConnecterState::Reconnecting {
                self.start_connecting();
            }
            else {
                debug!("ignoring reconnect timer for {} in state {:?}", self.endpoint, self.state);
            }
        }
    }

    /// Stops everything: timers are cancelled and reactor interest is retracted before any
    ///  native handle is released, so no callback can observe freed state.
    pub fn process_term(&mut self) {
        if self.state == ConnecterState::Closed {
            return;
        }
        debug!("terminating connecter for {} in state {:?}", self.endpoint, self.state);
        self.state = ConnecterState::Terminating;

        self.connect_timer = None;
        self.reconnect.cancel();
        self.attempt = None;

        self.state = ConnecterState::Closed;
    }
}

fn is_in_progress(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::EINPROGRESS) | Some(libc::EINTR))
        || e.kind() == io::ErrorKind::WouldBlock
}
