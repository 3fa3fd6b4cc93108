use thiserror::Error;

/// Problems detected while validating an experiment before anything runs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unknown protocol variant '{name}' (allowed: {allowed})")]
    UnknownVariant { name: String, allowed: String },

    #[error("{what}: data rate must be greater than zero")]
    ZeroDataRate { what: &'static str },

    #[error("{what}: packet size must be greater than zero")]
    ZeroPacketSize { what: &'static str },

    #[error("{what}: period must be greater than zero")]
    ZeroPeriod { what: &'static str },

    #[error("{what}: start time {start}s must be before stop time {stop}s")]
    InvalidWindow {
        what: &'static str,
        start: f64,
        stop: f64,
    },

    #[error("{what}: time {value}s must be a finite, non-negative number of seconds")]
    InvalidTime { what: &'static str, value: f64 },

    #[error("invalid data rate '{input}'")]
    InvalidDataRate { input: String },

    #[error("drop sampler needs at least one {what}")]
    EmptySelection { what: &'static str },

    #[error("{what} was already initialized")]
    AlreadyInitialized { what: &'static str },
}

/// Failures reported by the transport stack's socket layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SocketError {
    #[error("socket {0} does not exist")]
    UnknownSocket(usize),

    #[error("address family not supported by this stack: {0}")]
    AddressFamilyUnsupported(std::net::SocketAddr),

    #[error("no route to {0}")]
    Unreachable(std::net::SocketAddr),

    #[error("socket is not bound")]
    NotBound,

    #[error("socket is already bound")]
    AlreadyBound,

    #[error("socket is not connected")]
    NotConnected,

    #[error("socket is already connected")]
    AlreadyConnected,

    #[error("socket is closed")]
    Closed,

    #[error("port {0} is already in use")]
    PortInUse(u16),

    #[error("send buffer full ({buffered} bytes buffered, {requested} requested)")]
    SendBufferFull { buffered: u64, requested: usize },

    #[error("operation not supported by this socket type")]
    Unsupported,
}

/// Errors an application can raise from its lifecycle callbacks.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AppError {
    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0} was started before being initialized")]
    NotInitialized(&'static str),

    #[error("{0} cannot be restarted once stopped")]
    AlreadyStopped(&'static str),
}
