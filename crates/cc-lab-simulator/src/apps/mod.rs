//! Applications installed on nodes. Each implements `Application` and
//! only reaches the network through the `AppContext` it is handed.

pub mod generator;
pub mod onoff;
pub mod sink;

pub use generator::TrafficGenerator;
pub use onoff::OnOffSource;
pub use sink::PacketSink;

#[cfg(test)]
pub(crate) mod mock {
    use bytes::Bytes;
    use cc_lab_abstract::{AppContext, Application, EventId, Protocol, SimTime, SocketError, SocketId};
    use std::collections::HashSet;
    use std::net::SocketAddr;

    /// In-memory `AppContext` that records what the application asked for.
    #[derive(Default)]
    pub struct RecordingContext {
        pub now: SimTime,
        next_event: u64,
        pub timers: Vec<(SimTime, EventId, u64)>,
        pub cancelled: HashSet<EventId>,
        pub sends: Vec<(SimTime, usize)>,
        pub bound: Vec<SocketId>,
        pub bound6: Vec<SocketId>,
        pub connected: Vec<(SocketId, SocketAddr)>,
        pub closed: Vec<SocketId>,
        pub listening: Vec<(Protocol, u16)>,
        /// Send attempts (0-based) that fail with a full send buffer.
        pub refuse: HashSet<usize>,
        pub attempts: usize,
        pub rx_bytes: u64,
        /// Returned by every `close` once set.
        pub close_error: Option<SocketError>,
        next_socket: usize,
    }

    impl RecordingContext {
        /// Fire the earliest live timer on `app`. Returns false when none is left.
        pub fn fire_next(&mut self, app: &mut dyn Application) -> bool {
            self.timers.retain(|(_, id, _)| !self.cancelled.contains(id));
            let Some(pos) = (0..self.timers.len()).min_by_key(|&i| (self.timers[i].0, self.timers[i].1)) else {
                return false;
            };
            let (at, _, token) = self.timers.remove(pos);
            self.now = at;
            app.on_timer(self, token).unwrap();
            true
        }

        pub fn run(&mut self, app: &mut dyn Application) {
            while self.fire_next(app) {}
        }

        pub fn run_until(&mut self, app: &mut dyn Application, until: SimTime) {
            loop {
                self.timers.retain(|(_, id, _)| !self.cancelled.contains(id));
                match self.timers.iter().map(|t| t.0).min() {
                    Some(at) if at <= until => {
                        self.fire_next(app);
                    }
                    _ => break,
                }
            }
            self.now = until;
        }
    }

    impl AppContext for RecordingContext {
        fn now(&self) -> SimTime {
            self.now
        }

        fn schedule(&mut self, delay: SimTime, token: u64) -> EventId {
            let id = EventId::new(self.next_event);
            self.next_event += 1;
            self.timers.push((self.now + delay, id, token));
            id
        }

        fn cancel(&mut self, event: EventId) {
            self.cancelled.insert(event);
        }

        fn is_pending(&self, event: EventId) -> bool {
            !self.cancelled.contains(&event) && self.timers.iter().any(|t| t.1 == event)
        }

        fn open(&mut self, _protocol: Protocol) -> SocketId {
            self.next_socket += 1;
            SocketId(100 + self.next_socket)
        }

        fn bind(&mut self, socket: SocketId) -> Result<(), SocketError> {
            self.bound.push(socket);
            Ok(())
        }

        fn bind6(&mut self, socket: SocketId) -> Result<(), SocketError> {
            self.bound6.push(socket);
            Ok(())
        }

        fn connect(&mut self, socket: SocketId, remote: SocketAddr) -> Result<(), SocketError> {
            self.connected.push((socket, remote));
            Ok(())
        }

        fn listen(&mut self, protocol: Protocol, port: u16) -> Result<SocketId, SocketError> {
            self.listening.push((protocol, port));
            Ok(SocketId(port as usize))
        }

        fn send(&mut self, _socket: SocketId, payload: Bytes) -> Result<usize, SocketError> {
            let attempt = self.attempts;
            self.attempts += 1;
            if self.refuse.contains(&attempt) {
                return Err(SocketError::SendBufferFull {
                    buffered: 131_072,
                    requested: payload.len(),
                });
            }
            self.sends.push((self.now, payload.len()));
            Ok(payload.len())
        }

        fn close(&mut self, socket: SocketId) -> Result<(), SocketError> {
            self.closed.push(socket);
            match &self.close_error {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }

        fn received_bytes(&self, _socket: SocketId) -> u64 {
            self.rx_bytes
        }
    }
}
