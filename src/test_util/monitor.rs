use std::sync::Mutex;
use std::time::Duration;

use crate::endpoint::EndpointUriPair;
use crate::monitor::{EngineTransport, Session, SocketMonitor};
use crate::native::{Descriptor, SocketHandle};

/// A monitor notification, reduced to the endpoint identifier and its payload
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MonitorEvent {
    ConnectDelayed(String, i32),
    ConnectRetried(String, Duration),
    ConnectFailed(String, i32),
    AcceptFailed(String, i32),
    Listening(String, Descriptor),
}

#[derive(Default)]
pub struct RecordingMonitor {
    events: Mutex<Vec<MonitorEvent>>,
}

impl RecordingMonitor {
    pub fn new() -> RecordingMonitor {
        Default::default()
    }

    pub fn events(&self) -> Vec<MonitorEvent> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: MonitorEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl SocketMonitor for RecordingMonitor {
    fn event_connect_delayed(&self, endpoints: &EndpointUriPair, errno: i32) {
        self.record(MonitorEvent::ConnectDelayed(endpoints.identifier().to_string(), errno));
    }

    fn event_connect_retried(&self, endpoints: &EndpointUriPair, interval: Duration) {
        self.record(MonitorEvent::ConnectRetried(endpoints.identifier().to_string(), interval));
    }

    fn event_connect_failed(&self, endpoints: &EndpointUriPair, errno: i32) {
        self.record(MonitorEvent::ConnectFailed(endpoints.identifier().to_string(), errno));
    }

    fn event_accept_failed(&self, endpoints: &EndpointUriPair, errno: i32) {
        self.record(MonitorEvent::AcceptFailed(endpoints.identifier().to_string(), errno));
    }

    fn event_listening(&self, endpoints: &EndpointUriPair, fd: Descriptor) {
        self.record(MonitorEvent::Listening(endpoints.identifier().to_string(), fd));
    }
}

/// Keeps every engine transport it is handed, so connections stay alive until the test drops
///  them explicitly.
#[derive(Default)]
pub struct RecordingSession {
    engines: Mutex<Vec<(EngineTransport, EndpointUriPair)>>,
    conn_failed: Mutex<usize>,
}

impl RecordingSession {
    pub fn new() -> RecordingSession {
        Default::default()
    }

    pub fn engines(&self) -> Vec<EndpointUriPair> {
        self.engines.lock().unwrap().iter()
            .map(|(_, endpoints)| endpoints.clone())
            .collect()
    }

    pub fn accepted_sockets(&self) -> Vec<SocketHandle> {
        self.engines.lock().unwrap().iter()
            .filter_map(|(transport, _)| match transport {
                EngineTransport::Accepted { socket, .. } => Some(*socket),
                EngineTransport::Connected(_) => None,
            })
            .collect()
    }

    pub fn drop_engines(&self) {
        self.engines.lock().unwrap().clear();
    }

    pub fn num_conn_failed(&self) -> usize {
        *self.conn_failed.lock().unwrap()
    }
}

impl Session for RecordingSession {
    fn create_engine(&self, transport: EngineTransport, endpoints: EndpointUriPair) {
        self.engines.lock().unwrap().push((transport, endpoints));
    }

    fn conn_failed(&self) {
        *self.conn_failed.lock().unwrap() += 1;
    }
}
