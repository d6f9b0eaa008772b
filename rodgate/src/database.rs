use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Point types exposed to the master
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PointType {
    /// analog input (group 30/32)
    AnalogInput,
    /// binary input (group 1/2)
    BinaryInput,
}

impl std::fmt::Display for PointType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PointType::AnalogInput => f.write_str("AnalogInput"),
            PointType::BinaryInput => f.write_str("BinaryInput"),
        }
    }
}

/// Event class a point reports its events in
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventClass {
    /// class 1
    Class1,
    /// class 2
    Class2,
}

impl PointType {
    /// class used for events of this point type
    pub fn event_class(self) -> EventClass {
        match self {
            PointType::AnalogInput => EventClass::Class2,
            PointType::BinaryInput => EventClass::Class1,
        }
    }
}

/// Quality flags attached to a point update
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct Flags {
    /// raw flag bits
    pub value: u8,
}

impl Flags {
    /// no flags set
    pub const NONE: Flags = Flags { value: 0x00 };
    /// the point is online
    pub const ONLINE: Flags = Flags { value: 0x01 };
}

/// Value carried by an update
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Measurement {
    /// analog input value
    Analog(i32),
    /// binary input value
    Binary(bool),
}

impl Measurement {
    /// point type this measurement belongs to
    pub fn point_type(&self) -> PointType {
        match self {
            Measurement::Analog(_) => PointType::AnalogInput,
            Measurement::Binary(_) => PointType::BinaryInput,
        }
    }
}

/// How the outstation should treat an update
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpdateKind {
    /// refresh the current value only
    Static,
    /// refresh the current value and record a change event
    Event,
}

/// Single update to one point
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PointUpdate {
    /// index of the point
    pub index: u16,
    /// new value
    pub measurement: Measurement,
    /// quality flags
    pub flags: Flags,
    /// static refresh or change event
    pub kind: UpdateKind,
}

/// Set of updates applied to the outstation as one transaction
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateBatch {
    updates: Vec<PointUpdate>,
}

impl UpdateBatch {
    /// updates in the order they were added
    pub fn updates(&self) -> &[PointUpdate] {
        &self.updates
    }

    /// true if the batch holds no updates
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// number of updates in the batch
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// number of change events in the batch
    pub fn event_count(&self) -> usize {
        self.updates
            .iter()
            .filter(|x| x.kind == UpdateKind::Event)
            .count()
    }
}

/// Accumulates updates for one cycle
#[derive(Debug, Default)]
pub struct UpdateBuilder {
    updates: Vec<PointUpdate>,
}

impl UpdateBuilder {
    /// create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// refresh an analog input
    pub fn analog(&mut self, index: u16, value: i32) -> &mut Self {
        self.push(index, Measurement::Analog(value), Flags::NONE, UpdateKind::Static)
    }

    /// refresh a binary input
    pub fn binary(&mut self, index: u16, value: bool) -> &mut Self {
        self.push(index, Measurement::Binary(value), Flags::NONE, UpdateKind::Static)
    }

    /// record a binary input change event, flagged with [`Flags::ONLINE`]
    pub fn binary_event(&mut self, index: u16, value: bool) -> &mut Self {
        self.push(index, Measurement::Binary(value), Flags::ONLINE, UpdateKind::Event)
    }

    /// consume the builder, producing a batch
    pub fn build(self) -> UpdateBatch {
        UpdateBatch {
            updates: self.updates,
        }
    }

    fn push(
        &mut self,
        index: u16,
        measurement: Measurement,
        flags: Flags,
        kind: UpdateKind,
    ) -> &mut Self {
        self.updates.push(PointUpdate {
            index,
            measurement,
            flags,
            kind,
        });
        self
    }
}

/// Target-protocol server that publishes the point database to a master
///
/// `apply` must make every update in the batch visible at once. Implementations that
/// are not reentrant must serialize concurrent calls internally.
pub trait Outstation: Send + Sync {
    /// apply all updates in the batch as a single transaction
    fn apply(&self, batch: UpdateBatch);
}

/// Points configured in the database
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DatabaseSchema {
    /// configured analog input indices
    pub analog_inputs: BTreeSet<u16>,
    /// configured binary input indices
    pub binary_inputs: BTreeSet<u16>,
}

impl DatabaseSchema {
    fn contains(&self, point: PointType, index: u16) -> bool {
        match point {
            PointType::AnalogInput => self.analog_inputs.contains(&index),
            PointType::BinaryInput => self.binary_inputs.contains(&index),
        }
    }
}

/// Current value of a point
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Stored<V> {
    /// last value written
    pub value: V,
    /// flags of the last update
    pub flags: Flags,
}

/// Change event waiting to be reported to the master
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Event {
    /// class the event is reported in
    pub class: EventClass,
    /// index of the point
    pub index: u16,
    /// value at the time of the event
    pub measurement: Measurement,
    /// quality flags
    pub flags: Flags,
}

/// Copy of all static values at a single point in time
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// analog inputs by index
    pub analog: BTreeMap<u16, Stored<i32>>,
    /// binary inputs by index
    pub binary: BTreeMap<u16, Stored<bool>>,
}

struct Inner {
    schema: DatabaseSchema,
    values: Snapshot,
    events: VecDeque<Event>,
    capacity: usize,
    overflow: bool,
}

/// In-memory point database implementing [`Outstation`]
///
/// Stands in for [`DnpOutstation`](crate::outstation::DnpOutstation) where no master is
/// attached, e.g. in tests, and applies the same static and event semantics.
/// Holds the static value of every configured point and a bounded buffer of change
/// events. When the buffer is full the oldest event is discarded and the overflow flag
/// is raised until the buffer is drained.
pub struct PointDatabase {
    inner: Mutex<Inner>,
}

impl PointDatabase {
    /// create a database holding the points in `schema`
    pub fn new(schema: DatabaseSchema, event_buffer_size: usize) -> Self {
        let values = Snapshot {
            analog: schema
                .analog_inputs
                .iter()
                .map(|i| (*i, Stored { value: 0, flags: Flags::NONE }))
                .collect(),
            binary: schema
                .binary_inputs
                .iter()
                .map(|i| (*i, Stored { value: false, flags: Flags::NONE }))
                .collect(),
        };

        Self {
            inner: Mutex::new(Inner {
                schema,
                values,
                events: VecDeque::with_capacity(event_buffer_size),
                capacity: event_buffer_size,
                overflow: false,
            }),
        }
    }

    /// current value of an analog input
    pub fn analog(&self, index: u16) -> Option<i32> {
        self.lock().values.analog.get(&index).map(|x| x.value)
    }

    /// current value of a binary input
    pub fn binary(&self, index: u16) -> Option<bool> {
        self.lock().values.binary.get(&index).map(|x| x.value)
    }

    /// copy of every static value, taken atomically
    pub fn snapshot(&self) -> Snapshot {
        self.lock().values.clone()
    }

    /// remove and return all buffered events, clearing the overflow flag
    pub fn drain_events(&self) -> Vec<Event> {
        let mut inner = self.lock();
        inner.overflow = false;
        inner.events.drain(..).collect()
    }

    /// true if events were discarded since the last drain
    pub fn event_overflow(&self) -> bool {
        self.lock().overflow
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn apply_one(&mut self, update: &PointUpdate) {
        let point = update.measurement.point_type();
        if !self.schema.contains(point, update.index) {
            tracing::warn!("ignoring update to unconfigured point {}[{}]", point, update.index);
            return;
        }

        match update.measurement {
            Measurement::Analog(value) => {
                self.values.analog.insert(
                    update.index,
                    Stored {
                        value,
                        flags: update.flags,
                    },
                );
            }
            Measurement::Binary(value) => {
                self.values.binary.insert(
                    update.index,
                    Stored {
                        value,
                        flags: update.flags,
                    },
                );
            }
        }

        if update.kind == UpdateKind::Event {
            self.push_event(Event {
                class: point.event_class(),
                index: update.index,
                measurement: update.measurement,
                flags: update.flags,
            });
        }
    }

    fn push_event(&mut self, event: Event) {
        if self.capacity == 0 {
            self.overflow = true;
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.overflow = true;
        }
        self.events.push_back(event);
    }
}

impl Outstation for PointDatabase {
    fn apply(&self, batch: UpdateBatch) {
        let mut inner = self.lock();
        for update in batch.updates() {
            inner.apply_one(update);
        }
        tracing::trace!("applied {} updates", batch.len());
    }
}
