//! A gateway that polls [Modbus](http://modbus.org/) devices using
//! [rodbus](https://docs.rs/rodbus) and republishes their values as an indexed,
//! event-capable point database for a supervisory (DNP3-style) master.
//!
//! # Features
//!
//! * One configurable pipeline for any number of devices
//! * Signed 16-bit and 32-bit (two register) analog values
//! * Active-high and active-low status bits
//! * Connection supervision with a fixed retry cadence and a fallback to zero after
//!   sustained failure
//! * Connection-change events published once per transition
//! * DNP3 outstation over TCP with class 1/2 change events
//! * DirectOperate commands mapped onto coil writes
//! * Sequential (one batch per round) and concurrent (one task per device) scheduling
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use rodgate::config::GatewayConfig;
//! use rodgate::gateway::Gateway;
//! use rodgate::outstation::DnpOutstation;
//! use rodgate::transport::TcpTransport;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig::load(Path::new("gateway.toml"))?;
//!
//!     let gateway = Gateway::create(&config, |device| {
//!         TcpTransport::create(&device.host, device.port)
//!     })?;
//!
//!     let outstation = DnpOutstation::bind(
//!         &config.outstation,
//!         &config.schema(),
//!         Arc::new(gateway.dispatcher()),
//!     )
//!     .await?;
//!
//!     let token = CancellationToken::new();
//!     gateway.run(Arc::new(outstation), token).await;
//!     Ok(())
//! }
//! ```

/// signed value decoding
pub mod codec;
/// inbound commands
pub mod command;
/// configuration file
pub mod config;
/// point updates and the in-memory point database
pub mod database;
/// error types
pub mod error;
/// scheduling of endpoints
pub mod gateway;
/// DNP3 outstation
pub mod outstation;
/// per-device read cycle
pub mod poller;
/// per-endpoint publish state
pub mod state;
/// per-device connection lifecycle
pub mod supervisor;
/// source-protocol transports
pub mod transport;

#[cfg(test)]
mod mock;

pub use crate::command::{CommandHandler, CommandKind, CommandStatus};
pub use crate::config::{GatewayConfig, GatewayMode};
pub use crate::database::{Outstation, PointDatabase};
pub use crate::error::{ConfigError, GatewayError, OutstationError, TransportError};
pub use crate::gateway::Gateway;
pub use crate::outstation::DnpOutstation;
pub use crate::transport::{TcpTransport, Transport};
