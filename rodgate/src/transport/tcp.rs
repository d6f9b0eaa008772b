use std::net::IpAddr;
use std::time::Duration;

use rodbus::client::*;
use rodbus::*;

use tokio::sync::mpsc::{Receiver, Sender};

use crate::error::TransportError;
use crate::transport::{Timeouts, Transport};

/// Forwards channel state changes to the transport so that `connect` can observe them
struct ConnectionListener {
    tx: Sender<ClientState>,
}

impl ConnectionListener {
    fn create() -> (Self, Receiver<ClientState>) {
        let (tx, rx) = tokio::sync::mpsc::channel(32);
        (Self { tx }, rx)
    }
}

impl Listener<ClientState> for ConnectionListener {
    fn update(&mut self, state: ClientState) -> MaybeAsync<()> {
        // a full queue only means the transport isn't waiting on a connect right now
        let _ = self.tx.try_send(state);
        MaybeAsync::ready(())
    }
}

/// [`Transport`] over a `rodbus` TCP client channel
///
/// The channel is created disabled. `connect` enables it and waits for the first
/// state reported by the channel: `Connected` completes the attempt, anything that
/// indicates a failed attempt disables the channel again so that it does not retry on
/// its own. Retry cadence is left entirely to the caller.
pub struct TcpTransport {
    peer: String,
    channel: Channel,
    states: Receiver<ClientState>,
    unit_id: UnitId,
    response_timeout: Duration,
}

impl TcpTransport {
    /// Create a transport for the device at `host:port`
    ///
    /// `host` may be an IP address or a DNS name. Must be called from within a Tokio
    /// runtime because the underlying channel task is spawned immediately.
    pub fn create(host: &str, port: u16) -> Result<Self, TransportError> {
        Self::create_with_decode(host, port, DecodeLevel::default())
    }

    /// Create a transport that logs Modbus traffic at the provided decode level
    pub fn create_with_decode(
        host: &str,
        port: u16,
        decode: DecodeLevel,
    ) -> Result<Self, TransportError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(TransportError::InvalidAddress("host is empty".to_string()));
        }
        if port == 0 {
            return Err(TransportError::InvalidAddress(format!(
                "port 0 is not valid for {host}"
            )));
        }

        let addr = match host.parse::<IpAddr>() {
            Ok(ip) => HostAddr::ip(ip, port),
            Err(_) => HostAddr::dns(host.to_string(), port),
        };

        let (listener, states) = ConnectionListener::create();
        let response_timeout = Timeouts::default().response;

        let channel = spawn_tcp_client_task(
            addr,
            1,
            doubling_retry_strategy(response_timeout, response_timeout),
            decode,
            Some(Box::new(listener)),
        );

        Ok(Self {
            peer: format!("{host}:{port}"),
            channel,
            states,
            unit_id: UnitId::new(1),
            response_timeout,
        })
    }

    /// address of the remote device formatted as `host:port`
    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn param(&self) -> RequestParam {
        RequestParam::new(self.unit_id, self.response_timeout)
    }

    async fn wait_for_connect(
        states: &mut Receiver<ClientState>,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let wait = async {
            loop {
                match states.recv().await {
                    Some(ClientState::Connected) => return Ok(()),
                    Some(ClientState::Disabled) | Some(ClientState::Connecting) => {}
                    Some(ClientState::Shutdown) | None => return Err(TransportError::Shutdown),
                    Some(state) => {
                        tracing::debug!("channel state: {state:?}");
                        return Err(TransportError::ConnectFailed);
                    }
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectTimeout(timeout)),
        }
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    fn set_unit_id(&mut self, unit_id: u8) -> Result<(), TransportError> {
        self.unit_id = UnitId::new(unit_id);
        Ok(())
    }

    fn set_timeouts(&mut self, timeouts: Timeouts) -> Result<(), TransportError> {
        // rodbus has no inter-byte timer, the response timeout bounds the whole frame
        self.response_timeout = timeouts.response;
        Ok(())
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        // discard transitions left over from the previous session
        while self.states.try_recv().is_ok() {}

        self.channel.enable().await?;

        let result = Self::wait_for_connect(&mut self.states, self.response_timeout).await;
        if result.is_err() {
            self.channel.disable().await?;
        }
        result
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.channel.disable().await?;
        Ok(())
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let range = AddressRange::try_from(address, count)?;
        let param = self.param();
        let values = self.channel.read_holding_registers(param, range).await?;
        Ok(values.into_iter().map(|x| x.value).collect())
    }

    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let range = AddressRange::try_from(address, count)?;
        let param = self.param();
        let values = self.channel.read_input_registers(param, range).await?;
        Ok(values.into_iter().map(|x| x.value).collect())
    }

    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>, TransportError> {
        let range = AddressRange::try_from(address, count)?;
        let param = self.param();
        let values = self.channel.read_coils(param, range).await?;
        Ok(values.into_iter().map(|x| x.value).collect())
    }

    async fn read_discrete_inputs(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, TransportError> {
        let range = AddressRange::try_from(address, count)?;
        let param = self.param();
        let values = self.channel.read_discrete_inputs(param, range).await?;
        Ok(values.into_iter().map(|x| x.value).collect())
    }

    async fn write_coil(&mut self, address: u16, value: bool) -> Result<(), TransportError> {
        let param = self.param();
        self.channel
            .write_single_coil(param, Indexed::new(address, value))
            .await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        // requests are framed and sent whole, nothing is ever left buffered
        Ok(())
    }
}
