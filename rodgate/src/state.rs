use crate::database::UpdateBuilder;
use crate::poller::Cycle;

/// Indices an endpoint publishes to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointMap {
    /// AnalogInput index of the device value
    pub analog: u16,
    /// BinaryInput index of the "connection failed" point
    pub link_status: Option<u16>,
    /// BinaryInput indices of the status bits, in poll order
    pub status: Vec<u16>,
}

/// What the gateway currently reports for an endpoint
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Health {
    /// the last cycle succeeded
    Ok {
        /// value read during the cycle
        value: i32,
    },
    /// recent cycles failed, the last valid value is still published
    Degraded {
        /// value being published
        last_valid: i32,
        /// consecutive failed cycles
        failures: u32,
    },
    /// the failure threshold was reached, zero is published
    Failed {
        /// consecutive failed cycles
        failures: u32,
    },
}

/// Publish state of one endpoint
///
/// Owned by the unit polling the endpoint, never shared.
#[derive(Clone, Debug)]
pub struct PointState {
    map: PointMap,
    threshold: u32,
    last_known: i32,
    failure_count: u32,
    connected: bool,
    // None until the first cycle so that start-up itself is not reported as a change
    last_published_connected: Option<bool>,
    status: Vec<bool>,
}

impl PointState {
    /// create the state for an endpoint with no cycles observed yet
    pub fn new(map: PointMap, threshold: u32) -> Self {
        let status = vec![false; map.status.len()];
        Self {
            map,
            threshold,
            last_known: 0,
            failure_count: 0,
            connected: false,
            last_published_connected: None,
            status,
        }
    }

    /// Fold the result of a poll cycle into the state
    ///
    /// Invalid samples leave the last known value and status bits untouched.
    pub fn observe(&mut self, cycle: &Cycle) {
        if cycle.sample.valid {
            self.last_known = cycle.sample.value;
            for (dst, src) in self.status.iter_mut().zip(cycle.sample.status.iter()) {
                *dst = *src;
            }
        }
        self.failure_count = cycle.failure_count;
        self.connected = cycle.connected;
    }

    /// last value read from the device
    pub fn last_known(&self) -> i32 {
        self.last_known
    }

    /// consecutive failed cycles as of the last observation
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Value to publish on the analog point
    ///
    /// Zero once the failure count reaches the threshold, the last known value otherwise.
    pub fn analog_value(&self) -> i32 {
        if self.failure_count >= self.threshold {
            0
        } else {
            self.last_known
        }
    }

    /// classification of the endpoint for status reporting
    pub fn health(&self) -> Health {
        if self.failure_count == 0 {
            Health::Ok {
                value: self.last_known,
            }
        } else if self.failure_count >= self.threshold {
            Health::Failed {
                failures: self.failure_count,
            }
        } else {
            Health::Degraded {
                last_valid: self.last_known,
                failures: self.failure_count,
            }
        }
    }

    /// Add this cycle's updates to `builder`
    ///
    /// The analog value, link status and status bits are refreshed every cycle. A change
    /// of the connection state is additionally recorded as a single flagged event.
    pub fn publish(&mut self, builder: &mut UpdateBuilder) {
        builder.analog(self.map.analog, self.analog_value());

        if let Some(index) = self.map.link_status {
            let failed = !self.connected;
            builder.binary(index, failed);
            match self.last_published_connected {
                Some(previous) if previous != self.connected => {
                    builder.binary_event(index, failed);
                }
                _ => {}
            }
        }
        self.last_published_connected = Some(self.connected);

        for (index, value) in self.map.status.iter().zip(self.status.iter()) {
            builder.binary(*index, *value);
        }
    }
}
