use bytes::BytesMut;
use cc_lab_abstract::{
    AppContext, AppError, Application, ConfigError, DataRate, EventId, Protocol, SimTime,
    SocketId,
};
use std::any::Any;
use std::net::SocketAddr;
use tracing::{debug, info, warn};

const SEND: u64 = 0;
const OFF: u64 = 1;
const ON: u64 = 2;

/// Constant-bit-rate UDP source alternating between on and off periods.
///
/// A zero off time still ends each on period: the next period starts at
/// once, and its first packet leaves one interval later.
#[derive(Debug)]
pub struct OnOffSource {
    peer: SocketAddr,
    packet_size: u32,
    data_rate: DataRate,
    on_time: SimTime,
    off_time: SimTime,
    socket: Option<SocketId>,
    next_send: Option<EventId>,
    next_toggle: Option<EventId>,
    packets_sent: u64,
    bytes_sent: u64,
}

impl OnOffSource {
    pub fn new(
        peer: SocketAddr,
        packet_size: u32,
        data_rate: DataRate,
        on_time: SimTime,
        off_time: SimTime,
    ) -> Result<Self, ConfigError> {
        if data_rate.is_zero() {
            return Err(ConfigError::ZeroDataRate { what: "on/off source" });
        }
        if packet_size == 0 {
            return Err(ConfigError::ZeroPacketSize { what: "on/off source" });
        }
        Ok(Self {
            peer,
            packet_size,
            data_rate,
            on_time,
            off_time,
            socket: None,
            next_send: None,
            next_toggle: None,
            packets_sent: 0,
            bytes_sent: 0,
        })
    }

    pub fn interval(&self) -> SimTime {
        self.data_rate
            .transmission_time(self.packet_size as u64)
            .unwrap_or(SimTime::ZERO)
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    fn start_sending(&mut self, ctx: &mut dyn AppContext) {
        self.next_send = Some(ctx.schedule(self.interval(), SEND));
        if self.on_time > SimTime::ZERO {
            self.next_toggle = Some(ctx.schedule(self.on_time, OFF));
        }
    }

    fn stop_sending(&mut self, ctx: &mut dyn AppContext) {
        if let Some(event) = self.next_send.take() {
            ctx.cancel(event);
        }
        self.next_toggle = Some(ctx.schedule(self.off_time, ON));
    }

    fn send(&mut self, ctx: &mut dyn AppContext) -> Result<(), AppError> {
        let Some(socket) = self.socket else {
            return Ok(());
        };
        let payload = BytesMut::zeroed(self.packet_size as usize).freeze();
        let len = ctx.send(socket, payload)?;
        self.packets_sent += 1;
        self.bytes_sent += len as u64;
        self.next_send = Some(ctx.schedule(self.interval(), SEND));
        Ok(())
    }
}

impl Application for OnOffSource {
    fn name(&self) -> &'static str {
        "onoff"
    }

    fn start(&mut self, ctx: &mut dyn AppContext) -> Result<(), AppError> {
        if self.socket.is_some() {
            return Ok(());
        }
        let socket = ctx.open(Protocol::Udp);
        if self.peer.is_ipv4() {
            ctx.bind(socket)?;
        } else {
            ctx.bind6(socket)?;
        }
        ctx.connect(socket, self.peer)?;
        self.socket = Some(socket);
        debug!("On/off source started towards {}", self.peer);
        self.start_sending(ctx);
        Ok(())
    }

    fn stop(&mut self, ctx: &mut dyn AppContext) {
        for event in [self.next_send.take(), self.next_toggle.take()]
            .into_iter()
            .flatten()
        {
            ctx.cancel(event);
        }
        if let Some(socket) = self.socket.take() {
            info!(
                "On/off source stopped after {} packets ({} bytes)",
                self.packets_sent, self.bytes_sent
            );
            if let Err(e) = ctx.close(socket) {
                warn!("Closing on/off socket failed: {}", e);
            }
        }
    }

    fn on_timer(&mut self, ctx: &mut dyn AppContext, token: u64) -> Result<(), AppError> {
        match token {
            SEND => {
                self.next_send = None;
                self.send(ctx)
            }
            OFF => {
                self.next_toggle = None;
                self.stop_sending(ctx);
                Ok(())
            }
            ON => {
                self.next_toggle = None;
                self.start_sending(ctx);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
