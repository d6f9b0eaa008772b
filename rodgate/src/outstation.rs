use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dnp3::app::control::{
    CommandStatus as ControlStatus, Group12Var1, Group41Var1, Group41Var2, Group41Var3,
    Group41Var4,
};
use dnp3::app::measurement::{AnalogInput, BinaryInput, Flags};
use dnp3::app::NullListener;
use dnp3::link::*;
use dnp3::outstation::database::*;
use dnp3::outstation::*;
use dnp3::tcp::*;

use crate::command::{CommandHandler, CommandKind, CommandStatus};
use crate::config::OutstationSettings;
use crate::database::{
    DatabaseSchema, EventClass as PointClass, Measurement, Outstation, PointType, PointUpdate,
    UpdateBatch, UpdateKind,
};
use crate::error::OutstationError;

/// [`Outstation`] served to a DNP3 master over TCP
///
/// Routine refreshes update the static value without producing an event, change events
/// are forced into the event buffer, so the master sees exactly the transitions the
/// gateway reports. Analog inputs report in class 2 and binary inputs in class 1.
pub struct DnpOutstation {
    handle: Mutex<OutstationHandle>,
    _server: ServerHandle,
}

impl DnpOutstation {
    /// Register the points in `schema`, route controls to `commands` and start listening
    ///
    /// Controls are executed on the outstation task with [`tokio::task::block_in_place`],
    /// so this must be called from a multi-threaded runtime.
    pub async fn bind(
        settings: &OutstationSettings,
        schema: &DatabaseSchema,
        commands: Arc<dyn CommandHandler>,
    ) -> Result<Self, OutstationError> {
        let mut server = Server::new_tcp_server(LinkErrorMode::Close, settings.listen);
        let handle = server
            .add_outstation(
                outstation_config(settings)?,
                Box::new(Application),
                Box::new(Information),
                Box::new(ControlAdapter::new(commands)),
                NullListener::create(),
                AddressFilter::Any,
            )
            .map_err(|err| OutstationError::Registration(err.to_string()))?;

        let server = server
            .bind()
            .await
            .map_err(|source| OutstationError::Bind {
                address: settings.listen,
                source,
            })?;

        let outstation = Self {
            handle: Mutex::new(handle),
            _server: server,
        };
        outstation.lock().transaction(|db| add_points(db, schema));

        tracing::info!(
            "DNP3 outstation {} listening on {} for master {}",
            settings.outstation_address,
            settings.listen,
            settings.master_address
        );
        Ok(outstation)
    }

    fn lock(&self) -> MutexGuard<'_, OutstationHandle> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Outstation for DnpOutstation {
    fn apply(&self, batch: UpdateBatch) {
        self.lock().transaction(|db| {
            for update in batch.updates() {
                if !write(db, update) {
                    tracing::warn!(
                        "ignoring update to unconfigured point {}[{}]",
                        update.measurement.point_type(),
                        update.index
                    );
                }
            }
        });
        tracing::trace!("applied {} updates", batch.len());
    }
}

fn outstation_config(settings: &OutstationSettings) -> Result<OutstationConfig, OutstationError> {
    let address = |value: u16| {
        EndpointAddress::try_new(value).map_err(|_| OutstationError::LinkAddress(value))
    };

    Ok(OutstationConfig::new(
        address(settings.outstation_address)?,
        address(settings.master_address)?,
        EventBufferConfig::all_types(settings.event_buffer_size),
    ))
}

fn event_class(point: PointType) -> EventClass {
    match point.event_class() {
        PointClass::Class1 => EventClass::Class1,
        PointClass::Class2 => EventClass::Class2,
    }
}

fn add_points(db: &mut Database, schema: &DatabaseSchema) {
    for index in &schema.analog_inputs {
        let config = AnalogInputConfig {
            s_var: StaticAnalogInputVariation::Group30Var1,
            e_var: EventAnalogInputVariation::Group32Var1,
            deadband: 0.0,
        };
        if !db.add(*index, Some(event_class(PointType::AnalogInput)), config) {
            tracing::warn!("AnalogInput[{index}] is already configured");
        }
    }

    for index in &schema.binary_inputs {
        let config = BinaryInputConfig {
            s_var: StaticBinaryInputVariation::Group1Var2,
            e_var: EventBinaryInputVariation::Group2Var1,
        };
        if !db.add(*index, Some(event_class(PointType::BinaryInput)), config) {
            tracing::warn!("BinaryInput[{index}] is already configured");
        }
    }
}

/// write one update, returning false if the point does not exist
fn write(db: &mut Database, update: &PointUpdate) -> bool {
    let options = match update.kind {
        UpdateKind::Static => UpdateOptions::new(true, EventMode::Suppress),
        UpdateKind::Event => UpdateOptions::new(true, EventMode::Force),
    };

    match update.measurement {
        Measurement::Analog(value) => {
            let value = AnalogInput {
                value: f64::from(value),
                flags: Flags::ONLINE,
                time: None,
            };
            db.update(update.index, &value, options)
        }
        Measurement::Binary(value) => {
            let value = BinaryInput {
                value,
                flags: Flags::ONLINE,
                time: None,
            };
            db.update(update.index, &value, options)
        }
    }
}

struct Application;

impl OutstationApplication for Application {}

struct Information;

impl OutstationInformation for Information {}

/// Forwards CROBs to the gateway's command handler
struct ControlAdapter {
    commands: Arc<dyn CommandHandler>,
    runtime: tokio::runtime::Handle,
}

impl ControlAdapter {
    fn new(commands: Arc<dyn CommandHandler>) -> Self {
        Self {
            commands,
            runtime: tokio::runtime::Handle::current(),
        }
    }

    fn execute(&self, kind: CommandKind, index: u16) -> ControlStatus {
        let status = tokio::task::block_in_place(|| {
            self.runtime.block_on(self.commands.operate(kind, index))
        });
        control_status(status)
    }
}

fn command_kind(op_type: OperateType) -> CommandKind {
    match op_type {
        OperateType::SelectBeforeOperate => CommandKind::Operate,
        OperateType::DirectOperate => CommandKind::DirectOperate,
        OperateType::DirectOperateNoAck => CommandKind::DirectOperateNoAck,
    }
}

fn control_status(status: CommandStatus) -> ControlStatus {
    match status {
        CommandStatus::Success => ControlStatus::Success,
        CommandStatus::HardwareError => ControlStatus::HardwareError,
        CommandStatus::NotSupported => ControlStatus::NotSupported,
    }
}

impl ControlHandler for ControlAdapter {}

impl ControlSupport<Group12Var1> for ControlAdapter {
    fn select(
        &mut self,
        _control: Group12Var1,
        index: u16,
        _database: &mut DatabaseHandle,
    ) -> ControlStatus {
        self.execute(CommandKind::Select, index)
    }

    fn operate(
        &mut self,
        _control: Group12Var1,
        index: u16,
        op_type: OperateType,
        _database: &mut DatabaseHandle,
    ) -> ControlStatus {
        self.execute(command_kind(op_type), index)
    }
}

// analog outputs have no mapping
macro_rules! reject_analog_outputs {
    ($($group:ty),*) => {
        $(
            impl ControlSupport<$group> for ControlAdapter {
                fn select(
                    &mut self,
                    _control: $group,
                    _index: u16,
                    _database: &mut DatabaseHandle,
                ) -> ControlStatus {
                    ControlStatus::NotSupported
                }

                fn operate(
                    &mut self,
                    _control: $group,
                    _index: u16,
                    _op_type: OperateType,
                    _database: &mut DatabaseHandle,
                ) -> ControlStatus {
                    ControlStatus::NotSupported
                }
            }
        )*
    };
}

reject_analog_outputs!(Group41Var1, Group41Var2, Group41Var3, Group41Var4);
