use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::io;
use std::net::SocketAddr;

use crate::error::{AppError, SocketError};
use crate::packet::Protocol;
use crate::time::SimTime;

/// Handle to a callback scheduled on the engine.
/// Valid for cancellation until the callback fires or is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(u64);

impl EventId {
    pub const fn new(raw: u64) -> Self {
        EventId(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E#{}", self.0)
    }
}

/// Handle to a socket owned by the transport stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SocketId(pub usize);

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S#{}", self.0)
    }
}

/// The capability provided by the simulator to an application.
/// Applications call these methods to reach the engine's clock and timers
/// and the node's transport stack.
pub trait AppContext {
    /// Current virtual time.
    fn now(&self) -> SimTime;

    /// Arm a timer that calls back `Application::on_timer` with `token`
    /// after `delay`.
    fn schedule(&mut self, delay: SimTime, token: u64) -> EventId;

    /// Cancel a timer. Cancelling a fired or already-cancelled timer is a no-op.
    fn cancel(&mut self, event: EventId);

    /// Whether `event` is still waiting to fire.
    fn is_pending(&self, event: EventId) -> bool;

    /// Create a fresh, unbound socket on the application's node.
    fn open(&mut self, protocol: Protocol) -> SocketId;

    /// Bind to an ephemeral IPv4 port.
    fn bind(&mut self, socket: SocketId) -> Result<(), SocketError>;

    /// Bind to an ephemeral IPv6 port.
    fn bind6(&mut self, socket: SocketId) -> Result<(), SocketError>;

    fn connect(&mut self, socket: SocketId, remote: SocketAddr) -> Result<(), SocketError>;

    /// Create a socket accepting traffic for `port` on the application's node.
    fn listen(&mut self, protocol: Protocol, port: u16) -> Result<SocketId, SocketError>;

    /// Hand `payload` to the transport. Returns the number of bytes accepted.
    fn send(&mut self, socket: SocketId, payload: Bytes) -> Result<usize, SocketError>;

    fn close(&mut self, socket: SocketId) -> Result<(), SocketError>;

    /// Payload bytes delivered in order to a listening socket so far.
    fn received_bytes(&self, socket: SocketId) -> u64;
}

/// Lifecycle capability implemented by every installed application.
/// The engine calls `start` and `stop` at the configured times and
/// routes timers armed through `AppContext::schedule` to `on_timer`.
pub trait Application {
    fn name(&self) -> &'static str;

    fn start(&mut self, ctx: &mut dyn AppContext) -> Result<(), AppError>;

    /// Must be idempotent and safe to call without a prior `start`.
    fn stop(&mut self, ctx: &mut dyn AppContext);

    fn on_timer(&mut self, _ctx: &mut dyn AppContext, _token: u64) -> Result<(), AppError> {
        Ok(())
    }

    /// Downcast support, used to read back application state after a run.
    fn as_any(&self) -> &dyn Any;
}

/// Subscriber to a socket's congestion-window trace.
///
/// The transport stack calls `on_cwnd_change` on every window assignment,
/// even when the new value equals the old one.
pub trait CwndObserver {
    fn on_cwnd_change(&mut self, now: SimTime, old: u32, new: u32);

    /// Flush any buffered output at teardown.
    /// Returns the number of records written.
    fn finish(&mut self) -> io::Result<u64>;
}
