use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::GatewayError;
use crate::supervisor::SharedSupervisor;
use crate::transport::Transport;

/// How the master asked for a control to be executed
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommandKind {
    /// first half of select-before-operate
    Select,
    /// second half of select-before-operate
    Operate,
    /// execute immediately without a prior select
    DirectOperate,
    /// execute immediately, no response expected
    DirectOperateNoAck,
}

/// Outcome of a command reported back to the master
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommandStatus {
    /// the device write succeeded
    Success,
    /// the device write failed
    HardwareError,
    /// the kind or index is not supported
    NotSupported,
}

/// Coil write performed when a command index is operated
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CoilCommand {
    /// coil address on the device
    pub coil: u16,
    /// value written to the coil
    pub value: bool,
}

/// Receives commands from the target-protocol server
///
/// The server delivers commands for the same index one at a time and waits for the
/// returned status before delivering the next.
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync {
    /// execute a command against a point index
    async fn operate(&self, kind: CommandKind, index: u16) -> CommandStatus;
}

struct Target<T> {
    supervisor: SharedSupervisor<T>,
    command: CoilCommand,
}

impl<T> Clone for Target<T> {
    fn clone(&self) -> Self {
        Self {
            supervisor: self.supervisor.clone(),
            command: self.command,
        }
    }
}

/// Maps command indices onto coil writes of specific devices
///
/// Writes go straight through the device's supervisor and bypass the poll cycle: no
/// point state is updated, the next poll observes whatever changed on the device.
pub struct CommandDispatcher<T> {
    targets: BTreeMap<u16, Target<T>>,
}

impl<T> Clone for CommandDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            targets: self.targets.clone(),
        }
    }
}

impl<T> Default for CommandDispatcher<T> {
    fn default() -> Self {
        Self {
            targets: BTreeMap::new(),
        }
    }
}

impl<T> CommandDispatcher<T>
where
    T: Transport,
{
    /// create a dispatcher with no mapped indices
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `index` to a coil write on the device owned by `supervisor`
    ///
    /// Returns `false` and leaves the existing mapping in place if `index` is already mapped.
    pub fn add(
        &mut self,
        index: u16,
        supervisor: SharedSupervisor<T>,
        command: CoilCommand,
    ) -> bool {
        if self.targets.contains_key(&index) {
            return false;
        }
        self.targets.insert(
            index,
            Target {
                supervisor,
                command,
            },
        );
        true
    }

    /// mapped command indices in ascending order
    pub fn indices(&self) -> impl Iterator<Item = u16> + '_ {
        self.targets.keys().copied()
    }

    /// Execute a command, returning the status to report to the master
    pub async fn dispatch(&self, kind: CommandKind, index: u16) -> Result<(), GatewayError> {
        let target = match (kind, self.targets.get(&index)) {
            (CommandKind::DirectOperate, Some(target)) => target,
            _ => return Err(GatewayError::UnsupportedCommand { kind, index }),
        };

        tracing::info!(
            "direct operate on index {index}: write coil {} = {}",
            target.command.coil,
            target.command.value
        );

        let mut supervisor = target.supervisor.lock().await;
        supervisor
            .write_coil(target.command.coil, target.command.value)
            .await
    }
}

#[async_trait::async_trait]
impl<T> CommandHandler for CommandDispatcher<T>
where
    T: Transport,
{
    async fn operate(&self, kind: CommandKind, index: u16) -> CommandStatus {
        match self.dispatch(kind, index).await {
            Ok(()) => CommandStatus::Success,
            Err(err @ GatewayError::UnsupportedCommand { .. }) => {
                tracing::debug!("{err}");
                CommandStatus::NotSupported
            }
            Err(err) => {
                tracing::warn!("command on index {index} failed: {err}");
                CommandStatus::HardwareError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::codec::Width;
    use crate::mock::{mock, Event, Handle, Mock};
    use crate::poller::{AnalogRead, Poller, StatusRead};
    use crate::supervisor::{BitSource, LinkSettings, RegisterSource, Supervisor};
    use crate::transport::Timeouts;

    fn dispatcher() -> (CommandDispatcher<Mock>, SharedSupervisor<Mock>, Handle) {
        let (transport, handle) = mock();
        let supervisor = Supervisor::new(
            transport,
            LinkSettings {
                unit_id: 1,
                timeouts: Timeouts::new(Duration::from_secs(1), Duration::from_secs(1)),
                failure_threshold: 5,
            },
        )
        .wrap();

        let mut dispatcher = CommandDispatcher::new();
        assert!(dispatcher.add(
            0,
            supervisor.clone(),
            CoilCommand {
                coil: 0,
                value: true
            }
        ));
        assert!(dispatcher.add(
            1,
            supervisor.clone(),
            CoilCommand {
                coil: 1,
                value: true
            }
        ));
        (dispatcher, supervisor, handle)
    }

    #[tokio::test]
    async fn direct_operate_writes_the_mapped_coil() {
        let (dispatcher, _supervisor, handle) = dispatcher();

        assert_eq!(
            dispatcher.operate(CommandKind::DirectOperate, 1).await,
            CommandStatus::Success
        );
        assert_eq!(handle.writes(), vec![(1, true)]);
        assert!(handle.coil(1));
        assert_eq!(handle.events().last(), Some(&Event::Flush));
    }

    #[tokio::test]
    async fn unmapped_index_is_not_supported_and_writes_nothing() {
        let (dispatcher, _supervisor, handle) = dispatcher();

        assert_eq!(
            dispatcher.operate(CommandKind::DirectOperate, 7).await,
            CommandStatus::NotSupported
        );
        assert!(handle.events().is_empty());
    }

    #[tokio::test]
    async fn other_command_kinds_are_not_supported() {
        let (dispatcher, _supervisor, handle) = dispatcher();

        for kind in [
            CommandKind::Select,
            CommandKind::Operate,
            CommandKind::DirectOperateNoAck,
        ] {
            assert_eq!(
                dispatcher.operate(kind, 0).await,
                CommandStatus::NotSupported
            );
        }
        assert!(handle.writes().is_empty());
    }

    #[tokio::test]
    async fn failed_write_reports_hardware_error() {
        let (dispatcher, supervisor, handle) = dispatcher();
        handle.fail_writes(true);

        assert_eq!(
            dispatcher.operate(CommandKind::DirectOperate, 0).await,
            CommandStatus::HardwareError
        );
        assert_eq!(supervisor.lock().await.failure_count(), 0);
    }

    #[tokio::test]
    async fn unreachable_device_reports_hardware_error() {
        let (dispatcher, _supervisor, handle) = dispatcher();
        handle.set_online(false);

        assert_eq!(
            dispatcher.operate(CommandKind::DirectOperate, 0).await,
            CommandStatus::HardwareError
        );
        assert!(handle.writes().is_empty());
    }

    async fn wait_for(handle: &Handle, event: Event) {
        while !handle.events().contains(&event) {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn command_waits_for_the_in_flight_poll_cycle() {
        let (dispatcher, supervisor, handle) = dispatcher();
        let poller = Poller::new(
            supervisor,
            AnalogRead {
                source: RegisterSource::Holding,
                address: 0,
                width: Width::I16,
            },
            vec![
                StatusRead {
                    source: BitSource::Coil,
                    address: 2,
                    active_low: false,
                },
                StatusRead {
                    source: BitSource::Coil,
                    address: 3,
                    active_low: true,
                },
            ],
        );
        let gate = handle.hold_bit_reads();

        let cycle = tokio::spawn(async move { poller.poll().await });
        wait_for(&handle, Event::ReadCoils(2, 1)).await;

        let command = tokio::spawn(async move {
            dispatcher.operate(CommandKind::DirectOperate, 1).await
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(handle.writes().is_empty());

        gate.notify_one();
        wait_for(&handle, Event::ReadCoils(3, 1)).await;
        assert!(handle.writes().is_empty());
        gate.notify_one();

        assert!(cycle.await.unwrap().sample.valid);
        assert_eq!(command.await.unwrap(), CommandStatus::Success);

        let events = handle.events();
        let last_read = events
            .iter()
            .position(|e| *e == Event::ReadCoils(3, 1))
            .unwrap();
        let write = events
            .iter()
            .position(|e| *e == Event::WriteCoil(1, true))
            .unwrap();
        assert!(write > last_read);
        assert!(handle.coil(1));
    }

    #[test]
    fn duplicate_index_is_rejected() {
        let (mut dispatcher, supervisor, _handle) = dispatcher();
        assert!(!dispatcher.add(
            0,
            supervisor,
            CoilCommand {
                coil: 5,
                value: false
            }
        ));
        assert_eq!(dispatcher.indices().collect::<Vec<_>>(), vec![0, 1]);
    }
}
