use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::command::CommandKind;

/// Errors reported by a [`Transport`](crate::transport::Transport) implementation
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// the host/port pair cannot be used to create a transport
    #[error("invalid device address: {0}")]
    InvalidAddress(String),
    /// an operation that requires a connection was attempted without one
    #[error("no connection to the device")]
    NotConnected,
    /// the device refused or dropped the connection attempt
    #[error("connection attempt failed")]
    ConnectFailed,
    /// the connection attempt did not complete in time
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),
    /// the requested start/count is not a valid Modbus range
    #[error("{0}")]
    Range(rodbus::InvalidRange),
    /// the Modbus request failed
    #[error("{0}")]
    Request(rodbus::RequestError),
    /// the device answered with fewer values than requested
    #[error("expected {expected} values but received {actual}")]
    ShortResponse {
        /// number of values requested
        expected: u16,
        /// number of values received
        actual: usize,
    },
    /// the underlying channel task is gone
    #[error("transport was shut down")]
    Shutdown,
}

impl From<rodbus::InvalidRange> for TransportError {
    fn from(err: rodbus::InvalidRange) -> Self {
        TransportError::Range(err)
    }
}

impl From<rodbus::RequestError> for TransportError {
    fn from(err: rodbus::RequestError) -> Self {
        TransportError::Request(err)
    }
}

impl From<rodbus::Shutdown> for TransportError {
    fn from(_: rodbus::Shutdown) -> Self {
        TransportError::Shutdown
    }
}

/// Failures that can occur while polling a device or dispatching a command
///
/// All of these are recovered locally by the poller or dispatcher. They exist so that each
/// failure can be classified and logged consistently.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// a transport could not be created for a configured device
    #[error("unable to create transport for '{device}': {source}")]
    TransportCreation {
        /// name of the device
        device: String,
        /// underlying error
        source: TransportError,
    },
    /// connecting to the device failed
    #[error("connect failed: {0}")]
    Connect(TransportError),
    /// reading from the device failed
    #[error("read failed: {0}")]
    Read(TransportError),
    /// writing to the device failed
    #[error("write failed: {0}")]
    Write(TransportError),
    /// the command kind or index has no mapping
    #[error("unsupported command {kind:?} on index {index}")]
    UnsupportedCommand {
        /// kind of command that was received
        kind: CommandKind,
        /// target index of the command
        index: u16,
    },
}

/// Errors detected while loading or validating the configuration
///
/// These are the only fatal errors in the gateway.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// the configuration file could not be read
    #[error("unable to read {}: {source}", path.display())]
    Io {
        /// path of the file
        path: PathBuf,
        /// underlying error
        source: std::io::Error,
    },
    /// the configuration file is not valid TOML or does not match the schema
    #[error("{0}")]
    Parse(#[from] toml::de::Error),
    /// two devices publish to the same index of the same point type
    #[error("{point} index {index} is assigned to both '{first}' and '{second}'")]
    DuplicateIndex {
        /// point type, e.g. "AnalogInput"
        point: &'static str,
        /// the conflicting index
        index: u16,
        /// device that claimed the index first
        first: String,
        /// device that claimed the index second
        second: String,
    },
    /// a value is outside of its allowed range
    #[error("{0}")]
    Invalid(String),
}

/// Errors raised while bringing up the DNP3 outstation
#[derive(Debug, thiserror::Error)]
pub enum OutstationError {
    /// a configured link-layer address is reserved or out of range
    #[error("invalid link address: {0}")]
    LinkAddress(u16),
    /// the outstation could not be registered with the server
    #[error("unable to add outstation: {0}")]
    Registration(String),
    /// the server could not listen on its configured address
    #[error("unable to listen on {address}: {source}")]
    Bind {
        /// configured listen address
        address: SocketAddr,
        /// underlying error
        source: std::io::Error,
    },
}
