pub mod config;
pub mod error;
pub mod interface;
pub mod packet;
pub mod scenario;
pub mod time;
pub mod variant;

pub use interface::{AppContext, Application, CwndObserver, EventId, SocketId};
pub use packet::{FlowKey, Packet, Protocol, TcpHeader, Transport};
// Re-export flags module from packet so callers can build TCP headers directly
pub use packet::flags;

pub use config::{
    AppWindow, CrossTrafficConfig, ExperimentConfig, GeneratorConfig, LinkConfig, ProbeConfig,
    SamplerConfig, TcpConfig,
};
pub use error::{AppError, ConfigError, SocketError};
pub use scenario::ExperimentOverride;
pub use time::{DataRate, SimTime};
pub use variant::TcpVariant;
