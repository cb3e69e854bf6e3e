use std::time::Duration;

use anyhow::bail;
use bitflags::bitflags;

use crate::native::Descriptor;

bitflags! {
    /// Conditions under which a connecter gives up instead of scheduling another attempt
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct ReconnectStop: u8 {
        /// the peer explicitly refused the connection
        const CONN_REFUSED = 0x1;
    }
}

#[derive(Clone, Debug)]
pub struct NormConfig {
    /// Upper bound for an asynchronous connect to complete. `Duration::ZERO` means no bound, i.e.
    ///  the attempt stays pending until NORM reports success or failure.
    pub connect_timeout: Duration,

    /// Base interval between connect attempts. `None` disables reconnecting altogether.
    pub reconnect_ivl: Option<Duration>,

    /// If this is bigger than `reconnect_ivl`, the interval doubles after each failed attempt
    ///  until it reaches this value. Otherwise the interval stays constant.
    pub reconnect_ivl_max: Duration,

    pub reconnect_stop: ReconnectStop,

    /// Resolve names to IPv6 addresses (and accept IPv6 literals)
    pub ipv6: bool,

    /// Force unicast NACKs on the listening session even for multicast addresses
    pub norm_unicast_nack: bool,

    /// A descriptor opened by the application. If set, a listener adopts it verbatim and does
    ///  not create any NORM resources of its own.
    pub use_fd: Option<Descriptor>,
}

impl NormConfig {
    pub fn new() -> NormConfig {
        NormConfig {
            connect_timeout: Duration::ZERO,
            reconnect_ivl: Some(Duration::from_millis(100)),
            reconnect_ivl_max: Duration::ZERO,
            reconnect_stop: ReconnectStop::empty(),
            ipv6: false,
            norm_unicast_nack: false,
            use_fd: None,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(ivl) = self.reconnect_ivl {
            if ivl.is_zero() {
                bail!("reconnect interval must be positive - use `None` to disable reconnecting");
            }
            if !self.reconnect_ivl_max.is_zero() && self.reconnect_ivl_max < ivl {
                bail!("maximum reconnect interval {:?} is smaller than the base interval {:?}", self.reconnect_ivl_max, ivl);
            }
        }
        if self.connect_timeout.as_millis() > i32::MAX as u128 {
            bail!("connect timeout {:?} is too big", self.connect_timeout);
        }
        Ok(())
    }

    pub fn has_connect_timeout(&self) -> bool {
        !self.connect_timeout.is_zero()
    }
}

impl Default for NormConfig {
    fn default() -> Self {
        NormConfig::new()
    }
}
