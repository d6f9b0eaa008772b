use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::codec::Width;
use crate::command::CoilCommand;
use crate::database::DatabaseSchema;
use crate::error::ConfigError;
use crate::poller::{AnalogRead, StatusRead};
use crate::state::PointMap;
use crate::supervisor::{BitSource, LinkSettings, RegisterSource};
use crate::transport::Timeouts;

/// How endpoints are scheduled
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayMode {
    /// one loop polls every endpoint in turn and publishes one batch per round
    #[default]
    Sequential,
    /// one task per endpoint, each publishing its own batch
    Concurrent,
}

impl std::fmt::Display for GatewayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            GatewayMode::Sequential => f.write_str("sequential"),
            GatewayMode::Concurrent => f.write_str("concurrent"),
        }
    }
}

/// Complete gateway configuration, usually loaded from a TOML file
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// scheduling settings
    #[serde(default)]
    pub gateway: GatewaySettings,
    /// point database settings
    #[serde(default)]
    pub outstation: OutstationSettings,
    /// logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
    /// polled devices
    #[serde(rename = "device", default)]
    pub devices: Vec<DeviceConfig>,
}

/// `[gateway]` table
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewaySettings {
    /// scheduling model
    pub mode: GatewayMode,
    /// time between two cycles of the same endpoint
    pub poll_period_ms: u64,
    /// start offset between consecutive endpoints in the concurrent model
    pub stagger_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            mode: GatewayMode::Sequential,
            poll_period_ms: 1000,
            stagger_ms: 200,
        }
    }
}

/// `[outstation]` table
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutstationSettings {
    /// address the DNP3 server listens on
    pub listen: SocketAddr,
    /// link-layer address of the outstation
    pub outstation_address: u16,
    /// link-layer address of the master
    pub master_address: u16,
    /// maximum number of buffered events per point type
    pub event_buffer_size: u16,
}

impl Default for OutstationSettings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 20000)),
            outstation_address: 2,
            master_address: 1,
            event_buffer_size: 10,
        }
    }
}

/// `[logging]` table
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// level used when neither the command line nor `RUST_LOG` provide one
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// One `[[device]]` entry
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    /// unique name used in logs
    pub name: String,
    /// IP address or DNS name
    pub host: String,
    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Modbus unit identifier
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    /// response timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub response_timeout_ms: u64,
    /// inter-byte timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub byte_timeout_ms: u64,
    /// consecutive failed cycles after which zero is published
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// analog value
    pub analog: AnalogConfig,
    /// "connection failed" binary point
    #[serde(default)]
    pub link_status: Option<LinkStatusConfig>,
    /// status bits
    #[serde(default)]
    pub status: Vec<StatusConfig>,
    /// DirectOperate commands
    #[serde(rename = "command", default)]
    pub commands: Vec<CommandConfig>,
}

fn default_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_failure_threshold() -> u32 {
    5
}

/// `[device.analog]` table
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalogConfig {
    /// AnalogInput index
    pub index: u16,
    /// register table
    #[serde(default = "default_register_source")]
    pub source: RegisterSource,
    /// first register
    pub address: u16,
    /// value width
    #[serde(default = "default_width")]
    pub width: Width,
}

fn default_register_source() -> RegisterSource {
    RegisterSource::Holding
}

fn default_width() -> Width {
    Width::I16
}

/// `[device.link_status]` table
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkStatusConfig {
    /// BinaryInput index
    pub index: u16,
}

/// `[[device.status]]` entry
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusConfig {
    /// BinaryInput index
    pub index: u16,
    /// bit table
    #[serde(default = "default_bit_source")]
    pub source: BitSource,
    /// bit address
    pub address: u16,
    /// true if the status is asserted when the bit is clear
    #[serde(default)]
    pub active_low: bool,
}

fn default_bit_source() -> BitSource {
    BitSource::Coil
}

/// `[[device.command]]` entry
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandConfig {
    /// command index
    pub index: u16,
    /// coil written when the command is operated
    pub coil: u16,
    /// value written to the coil
    pub value: bool,
}

impl DeviceConfig {
    /// link parameters handed to the supervisor
    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            unit_id: self.unit_id,
            timeouts: Timeouts::new(
                Duration::from_millis(self.response_timeout_ms),
                Duration::from_millis(self.byte_timeout_ms),
            ),
            failure_threshold: self.failure_threshold,
        }
    }

    /// registers read for the analog value
    pub fn analog_read(&self) -> AnalogRead {
        AnalogRead {
            source: self.analog.source,
            address: self.analog.address,
            width: self.analog.width,
        }
    }

    /// status bits in poll order
    pub fn status_reads(&self) -> Vec<StatusRead> {
        self.status
            .iter()
            .map(|x| StatusRead {
                source: x.source,
                address: x.address,
                active_low: x.active_low,
            })
            .collect()
    }

    /// indices the device publishes to
    pub fn point_map(&self) -> PointMap {
        PointMap {
            analog: self.analog.index,
            link_status: self.link_status.map(|x| x.index),
            status: self.status.iter().map(|x| x.index).collect(),
        }
    }

    /// command indices and the coil write each one performs
    pub fn coil_commands(&self) -> impl Iterator<Item = (u16, CoilCommand)> + '_ {
        self.commands.iter().map(|x| {
            (
                x.index,
                CoilCommand {
                    coil: x.coil,
                    value: x.value,
                },
            )
        })
    }

    fn binary_indices(&self) -> impl Iterator<Item = u16> + '_ {
        self.link_status
            .iter()
            .map(|x| x.index)
            .chain(self.status.iter().map(|x| x.index))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("device name is empty".to_string()));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "device '{}' has an empty host",
                self.name
            )));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid(format!(
                "device '{}' has port 0",
                self.name
            )));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid(format!(
                "device '{}' must have a failure_threshold of at least 1",
                self.name
            )));
        }
        if self.response_timeout_ms == 0 {
            return Err(ConfigError::Invalid(format!(
                "device '{}' must have a non-zero response_timeout_ms",
                self.name
            )));
        }

        let mut seen = BTreeSet::new();
        for index in self.binary_indices() {
            if !seen.insert(index) {
                return Err(ConfigError::DuplicateIndex {
                    point: "BinaryInput",
                    index,
                    first: self.name.clone(),
                    second: self.name.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Tracks which device owns each index of one point type
struct IndexOwners {
    point: &'static str,
    owners: BTreeMap<u16, String>,
}

impl IndexOwners {
    fn new(point: &'static str) -> Self {
        Self {
            point,
            owners: BTreeMap::new(),
        }
    }

    fn claim(&mut self, index: u16, device: &str) -> Result<(), ConfigError> {
        if let Some(first) = self.owners.get(&index) {
            return Err(ConfigError::DuplicateIndex {
                point: self.point,
                index,
                first: first.clone(),
                second: device.to_string(),
            });
        }
        self.owners.insert(index, device.to_string());
        Ok(())
    }
}

impl GatewayConfig {
    /// Read, parse and validate the configuration file at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// parse and validate a configuration held in memory
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every rule that deserialization alone cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[device]] must be configured".to_string(),
            ));
        }
        if self.gateway.poll_period_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_period_ms must be greater than zero".to_string(),
            ));
        }

        if self.outstation.outstation_address == self.outstation.master_address {
            return Err(ConfigError::Invalid(format!(
                "outstation and master share link address {}",
                self.outstation.master_address
            )));
        }

        let mut names = BTreeSet::new();
        let mut analog = IndexOwners::new("AnalogInput");
        let mut binary = IndexOwners::new("BinaryInput");
        let mut commands = IndexOwners::new("Command");

        for device in &self.devices {
            device.validate()?;
            if !names.insert(device.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "device name '{}' is used more than once",
                    device.name
                )));
            }
            analog.claim(device.analog.index, &device.name)?;
            for index in device.binary_indices() {
                binary.claim(index, &device.name)?;
            }
            for command in &device.commands {
                commands.claim(command.index, &device.name)?;
            }
        }

        Ok(())
    }

    /// points the outstation must be configured with
    pub fn schema(&self) -> DatabaseSchema {
        let mut schema = DatabaseSchema::default();
        for device in &self.devices {
            schema.analog_inputs.insert(device.analog.index);
            schema.binary_inputs.extend(device.binary_indices());
        }
        schema
    }

    /// time between two cycles of the same endpoint
    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.gateway.poll_period_ms)
    }

    /// start offset between consecutive endpoints in the concurrent model
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.gateway.stagger_ms)
    }
}
