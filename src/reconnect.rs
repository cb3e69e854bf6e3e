use std::cmp::min;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)] use mockall::automock;
use tracing::debug;

use crate::config::NormConfig;
use crate::endpoint::EndpointUriPair;
use crate::monitor::SocketMonitor;
use crate::reactor::{Reactor, TimerGuard, TimerId};

/// NB: must differ from the connecter's connect timer id
pub const RECONNECT_TIMER_ID: TimerId = TimerId(1);

/// The reconnect timer of a connecter. The connecter delegates every timer id it does not own
///  to this.
#[cfg_attr(test, automock)]
pub trait ReconnectScheduler: Send + 'static {
    /// returns `false` if reconnecting is disabled, i.e. no timer was armed
    fn add_reconnect_timer(&mut self) -> bool;

    /// returns `true` if `id` is the reconnect timer and a new attempt is due
    fn on_timer(&mut self, id: TimerId) -> bool;

    fn cancel(&mut self);

    /// a connection was established - start over with the base interval next time
    fn reset(&mut self);
}

/// Reconnect intervals with random jitter and optional exponential growth
pub struct ReconnectBackoff {
    reactor: Arc<dyn Reactor>,
    monitor: Arc<dyn SocketMonitor>,
    endpoints: EndpointUriPair,
    timer: Option<TimerGuard>,

    current_ivl: Duration,

    config_ivl: Option<Duration>,
    config_ivl_max: Duration,
}
impl Debug for ReconnectBackoff {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReconnectBackoff({:?}, current: {:?})", self.endpoints.identifier(), self.current_ivl)
    }
}

impl ReconnectBackoff {
    pub fn new(reactor: Arc<dyn Reactor>, monitor: Arc<dyn SocketMonitor>, config: &NormConfig, endpoints: EndpointUriPair) -> ReconnectBackoff {
        ReconnectBackoff {
            reactor,
            monitor,
            endpoints,
            timer: None,
            current_ivl: config.reconnect_ivl.unwrap_or_default(),
            config_ivl: config.reconnect_ivl,
            config_ivl_max: config.reconnect_ivl_max,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    fn next_interval(&mut self) -> Duration {
        let base_millis = self.config_ivl.unwrap_or_default().as_millis() as u64;
        let jitter = if base_millis > 0 { rand::random_range(0..base_millis) } else { 0 };
        self.next_interval_with_jitter(Duration::from_millis(jitter))
    }

    fn next_interval_with_jitter(&mut self, jitter: Duration) -> Duration {
        let result = self.current_ivl + jitter;

        if let Some(base) = self.config_ivl {
            if self.config_ivl_max > base {
                self.current_ivl = min(self.current_ivl * 2, self.config_ivl_max);
            }
        }
        result
    }
}

impl ReconnectScheduler for ReconnectBackoff {
    fn add_reconnect_timer(&mut self) -> bool {
        if self.config_ivl.is_none() {
            debug!("reconnecting to {} is disabled", self.endpoints.identifier());
            return false;
        }

        let interval = self.next_interval();
        debug!("next connect attempt to {} in {:?}", self.endpoints.identifier(), interval);
        // NB: a previous timer shares the id, so it must be cancelled before the new one is armed
        self.timer = None;
        self.timer = Some(TimerGuard::arm(self.reactor.clone(), interval, RECONNECT_TIMER_ID));
        self.monitor.event_connect_retried(&self.endpoints, interval);
        true
    }

    fn on_timer(&mut self, id: TimerId) -> bool {
        if id != RECONNECT_TIMER_ID {
            return false;
        }
        match self.timer.take() {
            Some(timer) => {
                timer.expired();
                true
            }
            None => {
                debug!("reconnect timer fired while not armed - ignoring");
                false
            }
        }
    }

    fn cancel(&mut self) {
        self.timer = None;
    }

    fn reset(&mut self) {
        self.current_ivl = self.config_ivl.unwrap_or_default();
    }
}
