//! Self-paced bulk sender.
//!
//! Writes fixed-size packets into a connected socket at the rate implied
//! by the configured packet size and data rate. The cadence ignores
//! transport feedback: if the socket refuses a write, the packet is
//! counted and the next write is scheduled as usual.

use bytes::BytesMut;
use cc_lab_abstract::{
    AppContext, AppError, Application, ConfigError, DataRate, EventId, SimTime, SocketError,
    SocketId,
};
use std::any::Any;
use std::net::SocketAddr;
use tracing::{info, warn};

const SEND: u64 = 0;

#[derive(Debug, Clone)]
struct Settings {
    peer: SocketAddr,
    packet_size: u32,
    packet_count: u32,
    data_rate: DataRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    Stopped,
}

#[derive(Debug)]
pub struct TrafficGenerator {
    settings: Option<Settings>,
    socket: Option<SocketId>,
    pending: Option<EventId>,
    phase: Phase,
    sent: u32,
    refused: u32,
}

impl Default for TrafficGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficGenerator {
    pub fn new() -> Self {
        Self {
            settings: None,
            socket: None,
            pending: None,
            phase: Phase::Created,
            sent: 0,
            refused: 0,
        }
    }

    /// Store the socket and traffic parameters. Must be called exactly
    /// once, before the generator is started.
    pub fn initialize(
        &mut self,
        socket: SocketId,
        peer: SocketAddr,
        packet_size: u32,
        packet_count: u32,
        data_rate: DataRate,
    ) -> Result<(), ConfigError> {
        if self.settings.is_some() {
            return Err(ConfigError::AlreadyInitialized {
                what: "traffic generator",
            });
        }
        if data_rate.is_zero() {
            return Err(ConfigError::ZeroDataRate {
                what: "traffic generator",
            });
        }
        if packet_size == 0 {
            return Err(ConfigError::ZeroPacketSize {
                what: "traffic generator",
            });
        }
        self.socket = Some(socket);
        self.settings = Some(Settings {
            peer,
            packet_size,
            packet_count,
            data_rate,
        });
        Ok(())
    }

    /// Time between two consecutive writes: packet size × 8 / data rate.
    pub fn interval(&self) -> Option<SimTime> {
        let s = self.settings.as_ref()?;
        s.data_rate.transmission_time(s.packet_size as u64)
    }

    pub fn packets_sent(&self) -> u32 {
        self.sent
    }

    /// Writes the socket refused because its send buffer was full.
    pub fn packets_refused(&self) -> u32 {
        self.refused
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    fn send(&mut self, ctx: &mut dyn AppContext) -> Result<(), AppError> {
        let (Some(settings), Some(socket)) = (self.settings.as_ref(), self.socket) else {
            return Ok(());
        };
        let target = settings.packet_count;
        if self.sent >= target {
            return Ok(());
        }
        let payload = BytesMut::zeroed(settings.packet_size as usize).freeze();
        match ctx.send(socket, payload) {
            Ok(_) => {}
            Err(SocketError::SendBufferFull { buffered, requested }) => {
                self.refused += 1;
                warn!(
                    "Send buffer full ({} bytes queued), dropped {} byte write",
                    buffered, requested
                );
            }
            Err(e) => return Err(e.into()),
        }
        self.sent += 1;
        if self.sent < target {
            self.schedule_next(ctx);
        } else {
            info!("Traffic generator reached its target of {} packets", target);
        }
        Ok(())
    }

    fn schedule_next(&mut self, ctx: &mut dyn AppContext) {
        if self.phase != Phase::Running {
            return;
        }
        if let Some(delay) = self.interval() {
            self.pending = Some(ctx.schedule(delay, SEND));
        }
    }
}

impl Application for TrafficGenerator {
    fn name(&self) -> &'static str {
        "traffic-generator"
    }

    fn start(&mut self, ctx: &mut dyn AppContext) -> Result<(), AppError> {
        match self.phase {
            Phase::Created => {}
            Phase::Running => return Ok(()),
            Phase::Stopped => return Err(AppError::AlreadyStopped("traffic generator")),
        }
        let (Some(settings), Some(socket)) = (self.settings.as_ref(), self.socket) else {
            return Err(AppError::NotInitialized("traffic generator"));
        };
        let peer = settings.peer;
        if peer.is_ipv4() {
            ctx.bind(socket)?;
        } else {
            ctx.bind6(socket)?;
        }
        ctx.connect(socket, peer)?;

        self.sent = 0;
        self.phase = Phase::Running;
        info!("Traffic generator started towards {}", peer);
        self.send(ctx)
    }

    fn stop(&mut self, ctx: &mut dyn AppContext) {
        if self.phase == Phase::Running {
            info!(
                "Traffic generator stopped after {} packets ({} refused)",
                self.sent, self.refused
            );
        }
        self.phase = Phase::Stopped;
        if let Some(event) = self.pending.take() {
            ctx.cancel(event);
        }
        if let Some(socket) = self.socket.take() {
            if let Err(e) = ctx.close(socket) {
                warn!("Closing generator socket failed: {}", e);
            }
        }
    }

    fn on_timer(&mut self, ctx: &mut dyn AppContext, token: u64) -> Result<(), AppError> {
        if token != SEND {
            return Ok(());
        }
        self.pending = None;
        self.send(ctx)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
