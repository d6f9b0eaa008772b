use std::sync::Arc;

use serde::Deserialize;

use crate::error::{GatewayError, TransportError};
use crate::transport::{Timeouts, Transport};

/// Supervisor shared between the poller and the command dispatcher of one device
///
/// The lock serializes command writes against poll cycles on the same transport.
pub type SharedSupervisor<T> = Arc<tokio::sync::Mutex<Supervisor<T>>>;

/// Connection state of a single device
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// no connection, fewer consecutive failures than the threshold
    Disconnected,
    /// connection established
    Connected,
    /// no connection and the failure threshold has been reached
    Faulted,
}

/// Register table read for an analog value
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterSource {
    /// holding registers (function code 3)
    Holding,
    /// input registers (function code 4)
    Input,
}

/// Bit table read for a status point
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitSource {
    /// coils (function code 1)
    Coil,
    /// discrete inputs (function code 2)
    Discrete,
}

/// Per-device link parameters
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LinkSettings {
    /// Modbus unit identifier
    pub unit_id: u8,
    /// request timeouts
    pub timeouts: Timeouts,
    /// consecutive failed cycles after which the device is considered faulted
    pub failure_threshold: u32,
}

/// Owns the lifecycle of one device connection
///
/// The supervisor never retries on its own. An operation attempted while disconnected
/// triggers exactly one connect attempt; the caller's poll period sets the retry cadence.
/// Any read or write failure closes the connection so that the next operation starts
/// from a fresh connect.
pub struct Supervisor<T> {
    transport: T,
    settings: LinkSettings,
    connected: bool,
    failures: u32,
}

impl<T> Supervisor<T>
where
    T: Transport,
{
    /// create a disconnected supervisor around a transport
    pub fn new(transport: T, settings: LinkSettings) -> Self {
        Self {
            transport,
            settings,
            connected: false,
            failures: 0,
        }
    }

    /// wrap the supervisor so it can be shared with a command dispatcher
    pub fn wrap(self) -> SharedSupervisor<T> {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// current state of the connection
    pub fn state(&self) -> ConnectionState {
        if self.connected {
            ConnectionState::Connected
        } else if self.is_faulted() {
            ConnectionState::Faulted
        } else {
            ConnectionState::Disconnected
        }
    }

    /// true if a connection is currently established
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// number of consecutive failed cycles
    pub fn failure_count(&self) -> u32 {
        self.failures
    }

    /// true once the failure count has reached the configured threshold
    pub fn is_faulted(&self) -> bool {
        self.failures >= self.settings.failure_threshold
    }

    /// the configured failure threshold
    pub fn failure_threshold(&self) -> u32 {
        self.settings.failure_threshold
    }

    /// count one failed cycle
    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// reset the failure count after a fully successful cycle
    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Make sure a connection exists, performing at most one connect attempt
    pub async fn ensure_connected(&mut self) -> Result<(), GatewayError> {
        if self.connected {
            return Ok(());
        }

        tracing::info!("attempting to connect");
        self.transport
            .set_unit_id(self.settings.unit_id)
            .map_err(GatewayError::Connect)?;
        self.transport
            .set_timeouts(self.settings.timeouts)
            .map_err(GatewayError::Connect)?;
        self.transport
            .connect()
            .await
            .map_err(GatewayError::Connect)?;

        self.connected = true;
        tracing::info!("connection established");
        Ok(())
    }

    /// Read `count` registers, connecting first if required
    pub async fn read_registers(
        &mut self,
        source: RegisterSource,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, GatewayError> {
        self.ensure_connected().await?;
        let result = match source {
            RegisterSource::Holding => self.transport.read_holding_registers(address, count).await,
            RegisterSource::Input => self.transport.read_input_registers(address, count).await,
        };
        let values = self.check(result).await.map_err(GatewayError::Read)?;
        self.expect_count(&values, count)
            .await
            .map_err(GatewayError::Read)?;
        Ok(values)
    }

    /// Read `count` bits, connecting first if required
    pub async fn read_bits(
        &mut self,
        source: BitSource,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, GatewayError> {
        self.ensure_connected().await?;
        let result = match source {
            BitSource::Coil => self.transport.read_coils(address, count).await,
            BitSource::Discrete => self.transport.read_discrete_inputs(address, count).await,
        };
        let values = self.check(result).await.map_err(GatewayError::Read)?;
        self.expect_count(&values, count)
            .await
            .map_err(GatewayError::Read)?;
        Ok(values)
    }

    /// Discard stale data on the transport, connecting first if required
    pub async fn flush(&mut self) -> Result<(), GatewayError> {
        self.ensure_connected().await?;
        let result = self.transport.flush().await;
        self.check(result).await.map_err(GatewayError::Read)
    }

    /// Write a single coil followed by a flush, connecting first if required
    ///
    /// Does not touch the failure count, which only tracks poll cycles.
    pub async fn write_coil(&mut self, address: u16, value: bool) -> Result<(), GatewayError> {
        self.ensure_connected().await?;
        let result = self.transport.write_coil(address, value).await;
        self.check(result).await.map_err(GatewayError::Write)?;
        let result = self.transport.flush().await;
        self.check(result).await.map_err(GatewayError::Write)
    }

    /// Close the connection, if any
    pub async fn close(&mut self) {
        if self.connected {
            self.drop_connection().await;
        }
    }

    async fn check<V>(&mut self, result: Result<V, TransportError>) -> Result<V, TransportError> {
        if result.is_err() {
            self.drop_connection().await;
        }
        result
    }

    async fn expect_count<V>(&mut self, values: &[V], expected: u16) -> Result<(), TransportError> {
        if values.len() < usize::from(expected) {
            self.drop_connection().await;
            return Err(TransportError::ShortResponse {
                expected,
                actual: values.len(),
            });
        }
        Ok(())
    }

    async fn drop_connection(&mut self) {
        self.connected = false;
        if let Err(err) = self.transport.disconnect().await {
            tracing::debug!("error while closing connection: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mock::{mock, Event};

    fn settings() -> LinkSettings {
        LinkSettings {
            unit_id: 7,
            timeouts: Timeouts::new(Duration::from_millis(500), Duration::from_millis(250)),
            failure_threshold: 3,
        }
    }

    #[tokio::test]
    async fn connect_configures_transport_before_connecting() {
        let (transport, handle) = mock();
        let mut supervisor = Supervisor::new(transport, settings());

        supervisor.ensure_connected().await.unwrap();

        assert_eq!(supervisor.state(), ConnectionState::Connected);
        assert_eq!(
            handle.events(),
            vec![
                Event::SetUnitId(7),
                Event::SetTimeouts(settings().timeouts),
                Event::Connect,
            ]
        );
    }

    #[tokio::test]
    async fn makes_exactly_one_connect_attempt_per_operation() {
        let (transport, handle) = mock();
        handle.set_online(false);
        let mut supervisor = Supervisor::new(transport, settings());

        assert!(matches!(
            supervisor
                .read_registers(RegisterSource::Holding, 0, 1)
                .await,
            Err(GatewayError::Connect(_))
        ));
        assert_eq!(handle.connect_attempts(), 1);
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn read_failure_closes_the_connection() {
        let (transport, handle) = mock();
        let mut supervisor = Supervisor::new(transport, settings());
        supervisor.ensure_connected().await.unwrap();

        handle.fail_bit_reads(true);
        assert!(matches!(
            supervisor.read_bits(BitSource::Coil, 2, 1).await,
            Err(GatewayError::Read(_))
        ));

        assert!(!supervisor.is_connected());
        assert_eq!(handle.events().last(), Some(&Event::Disconnect));
    }

    #[tokio::test]
    async fn faulted_once_threshold_reached_while_disconnected() {
        let (transport, _handle) = mock();
        let mut supervisor = Supervisor::new(transport, settings());

        supervisor.record_failure();
        supervisor.record_failure();
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
        supervisor.record_failure();
        assert_eq!(supervisor.state(), ConnectionState::Faulted);
        supervisor.record_failure();
        assert_eq!(supervisor.failure_count(), 4);

        supervisor.record_success();
        assert_eq!(supervisor.failure_count(), 0);
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn write_failure_does_not_count_as_cycle_failure() {
        let (transport, handle) = mock();
        let mut supervisor = Supervisor::new(transport, settings());
        handle.fail_writes(true);

        assert!(matches!(
            supervisor.write_coil(0, true).await,
            Err(GatewayError::Write(_))
        ));
        assert_eq!(supervisor.failure_count(), 0);
        assert!(!supervisor.is_connected());
    }

    #[tokio::test]
    async fn successful_write_is_flushed() {
        let (transport, handle) = mock();
        let mut supervisor = Supervisor::new(transport, settings());

        supervisor.write_coil(1, true).await.unwrap();

        let events = handle.events();
        assert_eq!(
            &events[events.len() - 2..],
            &[Event::WriteCoil(1, true), Event::Flush]
        );
        assert!(handle.coil(1));
    }
}
