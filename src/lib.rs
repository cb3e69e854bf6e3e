//! Connection establishment for the NORM transport: resolving `norm://` endpoints, driving
//!  outbound connects with timeouts and reconnects, and accepting clients on a listening socket.
//!
//! Endpoint grammar (everything but `host:port` is optional):
//!
//! ```ascii
//! [localId,][srcIface:srcAddr:srcPort;]host:port     connecting side
//! [localId,][iface;]addr:port                        listening side
//! ```
//!
//! Both sides are single-threaded state machines driven by a [reactor::Reactor]; the NORM engine
//!  itself is abstracted behind [native::NormApi].

pub mod address;
pub mod config;
pub mod connecter;
pub mod endpoint;
pub mod error;
pub mod io_context;
pub mod listener;
pub mod monitor;
pub mod native;
pub mod reactor;
pub mod reconnect;
