use cc_lab_abstract::{AppContext, AppError, Application, Protocol, SocketId};
use std::any::Any;
use tracing::{info, warn};

/// Accepts traffic on a port and counts what arrives.
#[derive(Debug)]
pub struct PacketSink {
    protocol: Protocol,
    port: u16,
    socket: Option<SocketId>,
    total_rx: u64,
}

impl PacketSink {
    pub fn new(protocol: Protocol, port: u16) -> Self {
        Self {
            protocol,
            port,
            socket: None,
            total_rx: 0,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket(&self) -> Option<SocketId> {
        self.socket
    }

    /// Bytes received up to the moment the sink was stopped.
    pub fn total_rx(&self) -> u64 {
        self.total_rx
    }
}

impl Application for PacketSink {
    fn name(&self) -> &'static str {
        "packet-sink"
    }

    fn start(&mut self, ctx: &mut dyn AppContext) -> Result<(), AppError> {
        if self.socket.is_none() {
            self.socket = Some(ctx.listen(self.protocol, self.port)?);
        }
        Ok(())
    }

    fn stop(&mut self, ctx: &mut dyn AppContext) {
        let Some(socket) = self.socket.take() else {
            return;
        };
        self.total_rx = ctx.received_bytes(socket);
        info!(
            "{:?} sink on port {} received {} bytes",
            self.protocol, self.port, self.total_rx
        );
        if let Err(e) = ctx.close(socket) {
            warn!("Closing sink socket failed: {}", e);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::mock::RecordingContext;
    use cc_lab_abstract::SocketError;

    #[test]
    fn listens_on_start_and_reports_on_stop() {
        let mut sink = PacketSink::new(Protocol::Tcp, 4200);
        let mut ctx = RecordingContext::default();
        sink.start(&mut ctx).unwrap();
        assert_eq!(ctx.listening, vec![(Protocol::Tcp, 4200)]);

        ctx.rx_bytes = 9_000;
        sink.stop(&mut ctx);
        sink.stop(&mut ctx);
        assert_eq!(sink.total_rx(), 9_000);
        assert_eq!(ctx.closed, vec![SocketId(4200)]);
    }

    #[test]
    fn failed_close_still_reports_total() {
        let mut sink = PacketSink::new(Protocol::Udp, 6900);
        let mut ctx = RecordingContext::default();
        ctx.close_error = Some(SocketError::Closed);
        ctx.rx_bytes = 1_024;
        sink.start(&mut ctx).unwrap();
        sink.stop(&mut ctx);
        sink.stop(&mut ctx);
        assert_eq!(sink.total_rx(), 1_024);
        assert_eq!(ctx.closed.len(), 1);
        assert!(sink.socket().is_none());
    }
}
