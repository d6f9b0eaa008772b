use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::error::TransportError;
use crate::transport::{Timeouts, Transport};

const TABLE_SIZE: usize = 16;

pub(crate) fn mock() -> (Mock, Handle) {
    let device = Arc::new(Mutex::new(Device::new()));
    let mock = Mock {
        device: device.clone(),
    };
    let handle = Handle { device };
    (mock, handle)
}

/// Calls made on the transport, in order
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Event {
    SetUnitId(u8),
    SetTimeouts(Timeouts),
    Connect,
    Disconnect,
    ReadHolding(u16, u16),
    ReadInput(u16, u16),
    ReadCoils(u16, u16),
    ReadDiscrete(u16, u16),
    WriteCoil(u16, bool),
    Flush,
}

struct Device {
    online: bool,
    connected: bool,
    fail_register_reads: bool,
    fail_bit_reads: bool,
    fail_writes: bool,
    bit_gate: Option<Arc<Notify>>,
    holding: [u16; TABLE_SIZE],
    input: [u16; TABLE_SIZE],
    coils: [bool; TABLE_SIZE],
    discrete: [bool; TABLE_SIZE],
    events: Vec<Event>,
}

impl Device {
    fn new() -> Self {
        Self {
            online: true,
            connected: false,
            fail_register_reads: false,
            fail_bit_reads: false,
            fail_writes: false,
            bit_gate: None,
            holding: [0; TABLE_SIZE],
            input: [0; TABLE_SIZE],
            coils: [false; TABLE_SIZE],
            discrete: [false; TABLE_SIZE],
            events: Vec::new(),
        }
    }

    fn check_link(&self) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if !self.online {
            return Err(TransportError::Request(rodbus::RequestError::ResponseTimeout));
        }
        Ok(())
    }

    fn slice<V: Copy>(table: &[V], address: u16, count: u16) -> Result<Vec<V>, TransportError> {
        let start = usize::from(address);
        let end = start + usize::from(count);
        table
            .get(start..end)
            .map(|x| x.to_vec())
            .ok_or(TransportError::Request(rodbus::RequestError::ResponseTimeout))
    }
}

/// Scripted [`Transport`] backed by a small in-memory device model
pub(crate) struct Mock {
    device: Arc<Mutex<Device>>,
}

/// Test-side handle used to drive the device model and inspect calls
#[derive(Clone)]
pub(crate) struct Handle {
    device: Arc<Mutex<Device>>,
}

impl Handle {
    pub(crate) fn set_online(&self, online: bool) {
        let mut device = self.device.lock().unwrap();
        device.online = online;
    }

    pub(crate) fn set_holding(&self, address: u16, value: u16) {
        self.device.lock().unwrap().holding[usize::from(address)] = value;
    }

    pub(crate) fn set_input(&self, address: u16, value: u16) {
        self.device.lock().unwrap().input[usize::from(address)] = value;
    }

    pub(crate) fn set_coil(&self, address: u16, value: bool) {
        self.device.lock().unwrap().coils[usize::from(address)] = value;
    }

    pub(crate) fn set_discrete(&self, address: u16, value: bool) {
        self.device.lock().unwrap().discrete[usize::from(address)] = value;
    }

    pub(crate) fn coil(&self, address: u16) -> bool {
        self.device.lock().unwrap().coils[usize::from(address)]
    }

    pub(crate) fn fail_register_reads(&self, fail: bool) {
        self.device.lock().unwrap().fail_register_reads = fail;
    }

    pub(crate) fn fail_bit_reads(&self, fail: bool) {
        self.device.lock().unwrap().fail_bit_reads = fail;
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.device.lock().unwrap().fail_writes = fail;
    }

    /// suspend every coil read until the returned gate is notified once per read
    pub(crate) fn hold_bit_reads(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.device.lock().unwrap().bit_gate = Some(gate.clone());
        gate
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.device.lock().unwrap().events.clone()
    }

    pub(crate) fn clear_events(&self) {
        self.device.lock().unwrap().events.clear();
    }

    pub(crate) fn connect_attempts(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| **e == Event::Connect)
            .count()
    }

    pub(crate) fn writes(&self) -> Vec<(u16, bool)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::WriteCoil(address, value) => Some((address, value)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl Transport for Mock {
    fn set_unit_id(&mut self, unit_id: u8) -> Result<(), TransportError> {
        self.device
            .lock()
            .unwrap()
            .events
            .push(Event::SetUnitId(unit_id));
        Ok(())
    }

    fn set_timeouts(&mut self, timeouts: Timeouts) -> Result<(), TransportError> {
        self.device
            .lock()
            .unwrap()
            .events
            .push(Event::SetTimeouts(timeouts));
        Ok(())
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut device = self.device.lock().unwrap();
        device.events.push(Event::Connect);
        if !device.online {
            return Err(TransportError::ConnectFailed);
        }
        device.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut device = self.device.lock().unwrap();
        device.events.push(Event::Disconnect);
        device.connected = false;
        Ok(())
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let mut device = self.device.lock().unwrap();
        device.events.push(Event::ReadHolding(address, count));
        device.check_link()?;
        if device.fail_register_reads {
            return Err(TransportError::Request(rodbus::RequestError::ResponseTimeout));
        }
        Device::slice(&device.holding, address, count)
    }

    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let mut device = self.device.lock().unwrap();
        device.events.push(Event::ReadInput(address, count));
        device.check_link()?;
        if device.fail_register_reads {
            return Err(TransportError::Request(rodbus::RequestError::ResponseTimeout));
        }
        Device::slice(&device.input, address, count)
    }

    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>, TransportError> {
        let gate = {
            let mut device = self.device.lock().unwrap();
            device.events.push(Event::ReadCoils(address, count));
            device.bit_gate.clone()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let device = self.device.lock().unwrap();
        device.check_link()?;
        if device.fail_bit_reads {
            return Err(TransportError::Request(rodbus::RequestError::ResponseTimeout));
        }
        Device::slice(&device.coils, address, count)
    }

    async fn read_discrete_inputs(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, TransportError> {
        let mut device = self.device.lock().unwrap();
        device.events.push(Event::ReadDiscrete(address, count));
        device.check_link()?;
        if device.fail_bit_reads {
            return Err(TransportError::Request(rodbus::RequestError::ResponseTimeout));
        }
        Device::slice(&device.discrete, address, count)
    }

    async fn write_coil(&mut self, address: u16, value: bool) -> Result<(), TransportError> {
        let mut device = self.device.lock().unwrap();
        device.events.push(Event::WriteCoil(address, value));
        device.check_link()?;
        if device.fail_writes {
            return Err(TransportError::Request(rodbus::RequestError::ResponseTimeout));
        }
        match device.coils.get_mut(usize::from(address)) {
            Some(coil) => {
                *coil = value;
                Ok(())
            }
            None => Err(TransportError::Request(rodbus::RequestError::ResponseTimeout)),
        }
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        self.device.lock().unwrap().events.push(Event::Flush);
        Ok(())
    }
}
