use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::command::CommandDispatcher;
use crate::config::{DeviceConfig, GatewayConfig, GatewayMode};
use crate::database::{Outstation, UpdateBuilder};
use crate::error::{GatewayError, TransportError};
use crate::poller::Poller;
use crate::state::{Health, PointState};
use crate::supervisor::Supervisor;
use crate::transport::Transport;

/// One polled device together with its publish state
struct Endpoint<T> {
    name: String,
    poller: Poller<T>,
    state: PointState,
    span: tracing::Span,
}

impl<T> Endpoint<T>
where
    T: Transport,
{
    /// poll the device once and add the resulting updates to `builder`
    async fn cycle(&mut self, builder: &mut UpdateBuilder) {
        let cycle = self.poller.poll().instrument(self.span.clone()).await;
        self.state.observe(&cycle);
        self.state.publish(builder);
        self.span.in_scope(|| self.report());
    }

    fn report(&self) {
        match self.state.health() {
            Health::Ok { value } => tracing::info!("read ok, value: {value}"),
            Health::Degraded {
                last_valid,
                failures,
            } => tracing::warn!(
                "temporary failure ({failures} in a row), publishing last valid value: {last_valid}"
            ),
            Health::Failed { failures } => {
                tracing::warn!("sustained failure ({failures} in a row), publishing 0")
            }
        }
    }

    async fn close(&self) {
        self.poller.supervisor().lock().await.close().await;
        self.span.in_scope(|| tracing::info!("closed"));
    }
}

/// Polls every configured device and republishes it to an [`Outstation`]
///
/// The gateway is created first so that its [`CommandDispatcher`] can be handed to the
/// outstation, which is then passed to [`Gateway::run`].
///
/// Both scheduling models observe the cancellation token only between cycles, wait for
/// in-flight cycles to complete and then close every device connection before returning.
pub struct Gateway<T> {
    endpoints: Vec<Endpoint<T>>,
    dispatcher: CommandDispatcher<T>,
    mode: GatewayMode,
    period: Duration,
    stagger: Duration,
}

impl<T> Gateway<T>
where
    T: Transport + 'static,
{
    /// Build the gateway, creating one transport per device with `factory`
    ///
    /// Devices are not contacted here, the first connect attempt happens on the first cycle.
    pub fn create<F>(config: &GatewayConfig, mut factory: F) -> Result<Self, GatewayError>
    where
        F: FnMut(&DeviceConfig) -> Result<T, TransportError>,
    {
        let mut endpoints = Vec::with_capacity(config.devices.len());
        let mut dispatcher = CommandDispatcher::new();

        for device in &config.devices {
            let transport = factory(device).map_err(|source| GatewayError::TransportCreation {
                device: device.name.clone(),
                source,
            })?;

            let supervisor = Supervisor::new(transport, device.link_settings()).wrap();
            for (index, command) in device.coil_commands() {
                if !dispatcher.add(index, supervisor.clone(), command) {
                    tracing::warn!("command index {index} of '{}' is already mapped", device.name);
                }
            }

            endpoints.push(Endpoint {
                name: device.name.clone(),
                poller: Poller::new(supervisor, device.analog_read(), device.status_reads()),
                state: PointState::new(device.point_map(), device.failure_threshold),
                span: tracing::info_span!("Endpoint", name = %device.name),
            });
        }

        Ok(Self {
            endpoints,
            dispatcher,
            mode: config.gateway.mode,
            period: config.poll_period(),
            stagger: config.stagger(),
        })
    }

    /// command handler to hand to the outstation
    pub fn dispatcher(&self) -> CommandDispatcher<T> {
        self.dispatcher.clone()
    }

    /// names of the polled devices in configuration order
    pub fn endpoint_names(&self) -> impl Iterator<Item = &str> {
        self.endpoints.iter().map(|x| x.name.as_str())
    }

    /// Poll until `token` is cancelled, publishing every cycle to `outstation`
    pub async fn run(self, outstation: Arc<dyn Outstation>, token: CancellationToken) {
        tracing::info!(
            "polling {} device(s) every {:?} ({} mode)",
            self.endpoints.len(),
            self.period,
            self.mode
        );
        match self.mode {
            GatewayMode::Sequential => self.run_sequential(outstation, token).await,
            GatewayMode::Concurrent => self.run_concurrent(outstation, token).await,
        }
        tracing::info!("gateway stopped");
    }

    async fn run_sequential(
        mut self,
        outstation: Arc<dyn Outstation>,
        token: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }

            let mut builder = UpdateBuilder::new();
            async {
                for endpoint in self.endpoints.iter_mut() {
                    endpoint.cycle(&mut builder).await;
                }
            }
            .instrument(tracing::info_span!("Round"))
            .await;

            let batch = builder.build();
            tracing::trace!("applying {} updates", batch.len());
            outstation.apply(batch);
        }

        for endpoint in &self.endpoints {
            endpoint.close().await;
        }
    }

    async fn run_concurrent(
        self,
        outstation: Arc<dyn Outstation>,
        token: CancellationToken,
    ) {
        let mut tasks = JoinSet::new();

        for (position, endpoint) in self.endpoints.into_iter().enumerate() {
            let offset = self
                .stagger
                .saturating_mul(u32::try_from(position).unwrap_or(u32::MAX));
            tasks.spawn(run_endpoint(
                endpoint,
                outstation.clone(),
                self.period,
                offset,
                token.clone(),
            ));
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                tracing::error!("endpoint task failed: {err}");
            }
        }
    }
}

async fn run_endpoint<T>(
    mut endpoint: Endpoint<T>,
    outstation: Arc<dyn Outstation>,
    period: Duration,
    offset: Duration,
    token: CancellationToken,
) where
    T: Transport,
{
    if !offset.is_zero() {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                endpoint.close().await;
                return;
            }
            _ = tokio::time::sleep(offset) => {}
        }
    }

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let mut builder = UpdateBuilder::new();
        endpoint.cycle(&mut builder).await;
        outstation.apply(builder.build());
    }

    endpoint.close().await;
}
