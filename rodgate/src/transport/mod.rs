use std::time::Duration;

use crate::error::TransportError;

/// Modbus TCP transport built on a `rodbus` client channel
pub mod tcp;

pub use tcp::TcpTransport;

/// Timeouts applied to every request made through a transport
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// maximum time to wait for a complete response (also bounds connection attempts)
    pub response: Duration,
    /// maximum time to wait between bytes of a response
    pub byte: Duration,
}

impl Timeouts {
    /// construct `Timeouts` from its fields
    pub fn new(response: Duration, byte: Duration) -> Self {
        Self { response, byte }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(1))
    }
}

/// Source-protocol transport used to reach a single device
///
/// Every call is fallible and reports failure through its return value. Calls suspend
/// the calling task for at most the configured timeouts.
#[async_trait::async_trait]
pub trait Transport: Send {
    /// set the unit identifier used for subsequent requests
    fn set_unit_id(&mut self, unit_id: u8) -> Result<(), TransportError>;
    /// Set the timeouts used for subsequent requests
    ///
    /// Implementations without an inter-byte timer may ignore [`Timeouts::byte`] and bound
    /// the whole response with [`Timeouts::response`].
    fn set_timeouts(&mut self, timeouts: Timeouts) -> Result<(), TransportError>;
    /// make a single attempt to establish a connection
    async fn connect(&mut self) -> Result<(), TransportError>;
    /// close the connection if one is open
    async fn disconnect(&mut self) -> Result<(), TransportError>;
    /// read a block of holding registers
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError>;
    /// read a block of input registers
    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError>;
    /// read a block of coils
    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>, TransportError>;
    /// read a block of discrete inputs
    async fn read_discrete_inputs(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, TransportError>;
    /// write a single coil
    async fn write_coil(&mut self, address: u16, value: bool) -> Result<(), TransportError>;
    /// discard any buffered but unprocessed data
    async fn flush(&mut self) -> Result<(), TransportError>;
}
