use crate::codec::{self, Width};
use crate::error::{GatewayError, TransportError};
use crate::supervisor::{BitSource, RegisterSource, SharedSupervisor, Supervisor};
use crate::transport::Transport;

/// Registers holding the analog value of a device
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AnalogRead {
    /// register table
    pub source: RegisterSource,
    /// address of the first (high) register
    pub address: u16,
    /// how many registers make up the value
    pub width: Width,
}

/// Single bit holding an auxiliary status of a device
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StatusRead {
    /// bit table
    pub source: BitSource,
    /// address of the bit
    pub address: u16,
    /// true if the status is asserted when the bit is clear
    pub active_low: bool,
}

/// Result of one poll cycle
///
/// A sample is either valid, with every read of the cycle succeeding, or invalid, in
/// which case `value` and `status` carry nothing and must not be published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    /// decoded analog value
    pub value: i32,
    /// true if every read of the cycle succeeded
    pub valid: bool,
    /// decoded status bits in configuration order
    pub status: Vec<bool>,
}

impl Sample {
    fn valid(value: i32, status: Vec<bool>) -> Self {
        Self {
            value,
            valid: true,
            status,
        }
    }

    fn invalid() -> Self {
        Self {
            value: 0,
            valid: false,
            status: Vec::new(),
        }
    }
}

/// Sample plus the connection bookkeeping observed at the end of the cycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cycle {
    /// values read during the cycle
    pub sample: Sample,
    /// connection state after the cycle
    pub connected: bool,
    /// consecutive failed cycles after this one
    pub failure_count: u32,
}

/// Drives a device's supervisor through one read cycle at a time
pub struct Poller<T> {
    supervisor: SharedSupervisor<T>,
    analog: AnalogRead,
    status: Vec<StatusRead>,
}

impl<T> Poller<T>
where
    T: Transport,
{
    /// create a poller that reads `analog` followed by each `status` bit in order
    pub fn new(
        supervisor: SharedSupervisor<T>,
        analog: AnalogRead,
        status: Vec<StatusRead>,
    ) -> Self {
        Self {
            supervisor,
            analog,
            status,
        }
    }

    /// supervisor of the polled device
    pub fn supervisor(&self) -> &SharedSupervisor<T> {
        &self.supervisor
    }

    /// Run one full cycle
    ///
    /// The cycle is all-or-nothing: the first failing read aborts the remaining reads
    /// and the whole sample is invalid, so a value spanning two registers is never
    /// assembled from a torn read.
    pub async fn poll(&self) -> Cycle {
        let mut supervisor = self.supervisor.lock().await;

        let sample = match self.read_all(&mut supervisor).await {
            Ok((value, status)) => {
                supervisor.record_success();
                tracing::debug!("value: {value} status: {status:?}");
                Sample::valid(value, status)
            }
            Err(err) => {
                supervisor.record_failure();
                tracing::warn!("{err}");
                Sample::invalid()
            }
        };

        Cycle {
            sample,
            connected: supervisor.is_connected(),
            failure_count: supervisor.failure_count(),
        }
    }

    async fn read_all(
        &self,
        supervisor: &mut Supervisor<T>,
    ) -> Result<(i32, Vec<bool>), GatewayError> {
        supervisor.ensure_connected().await?;
        supervisor.flush().await?;

        let count = self.analog.width.register_count();
        let words = supervisor
            .read_registers(self.analog.source, self.analog.address, count)
            .await?;
        let value = self.analog.width.decode(&words).ok_or(GatewayError::Read(
            TransportError::ShortResponse {
                expected: count,
                actual: words.len(),
            },
        ))?;

        let mut status = Vec::with_capacity(self.status.len());
        for point in &self.status {
            let bits = supervisor.read_bits(point.source, point.address, 1).await?;
            let bit = bits.first().copied().ok_or(GatewayError::Read(
                TransportError::ShortResponse {
                    expected: 1,
                    actual: 0,
                },
            ))?;
            status.push(codec::decode_bool(bit, point.active_low));
        }

        Ok((value, status))
    }
}
