//! Test support utilities - only compiled in test builds.

extern crate std;

use core::cell::{Cell, RefCell};
use std::{thread_local, vec::Vec as StdVec};

use heapless::Vec;

use crate::dataflash::{
    bus::{AddressMode, BusRegistry, CommBus},
    config::{DriverConfig, InstanceConfig, TimeoutPolicy},
    error::BusError,
    io::DigitalOutput,
    sched::{TaskScheduler, TimerAllocator},
    storage::DataFlash,
    types::{BusEvent, ChannelHandle, FlashEvent, ProviderId, TaskHandle, TimerHandle},
};

/// Provider id of the mock bus.
pub const BUS: ProviderId = ProviderId(1);
/// Write-protect pin of instance 0; protected when low.
pub const WP_PIN: u8 = 1;
/// Reset pin of instance 0; in reset when low.
pub const RESET_PIN: u8 = 2;

/// Standard test configuration: three instances, four handler slots.
pub type TestFlash<'d> = DataFlash<'d, MockBus, MockPins, MockScheduler, MockTimers, 3, 4>;

/// Instances 0 and 1 share device 0; instance 2 is alone on device 1.
pub const TEST_MAP: [InstanceConfig; 3] = [
    InstanceConfig::new(0, BUS, 0)
        .with_write_protect(WP_PIN, false)
        .with_reset(RESET_PIN, false),
    InstanceConfig::new(1, BUS, 0),
    InstanceConfig::new(2, BUS, 1),
];

/// Transport call recorded by [`MockBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    Allocate(u8),
    Register(ChannelHandle),
    Start(ChannelHandle),
    Stop(ChannelHandle),
    Write(ChannelHandle, usize),
    Read(ChannelHandle, usize),
}

/// Single-provider bus that records every call and completes nothing on
/// its own; tests deliver completions through the bus event handle.
pub struct MockBus {
    pub ops: Vec<BusOp, 64>,
    pub writes: Vec<Vec<u8, 256>, 16>,
    /// Bytes handed out by `read`, repeated to fill the buffer.
    pub read_data: Vec<u8, 16>,
    pub events_supported: bool,
    pub fail_start: bool,
    pub fail_write: bool,
    pub fail_read: bool,
}

impl MockBus {
    pub fn new() -> Self {
        Self {
            ops: Vec::new(),
            writes: Vec::new(),
            read_data: Vec::from_slice(&[0xA5]).unwrap(),
            events_supported: true,
            fail_start: false,
            fail_write: false,
            fail_read: false,
        }
    }

    /// Recorded calls that carry data, skipping `initialize` bookkeeping.
    pub fn transfers(&self) -> StdVec<BusOp> {
        self.ops
            .iter()
            .copied()
            .filter(|op| !matches!(op, BusOp::Allocate(_) | BusOp::Register(_)))
            .collect()
    }

    fn record(&mut self, op: BusOp) {
        let _ = self.ops.push(op);
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl CommBus for MockBus {
    fn get_allocation(&mut self, bound_id: u8) -> Result<ChannelHandle, BusError> {
        self.record(BusOp::Allocate(bound_id));
        Ok(ChannelHandle(bound_id))
    }

    fn register_event_handler(
        &mut self,
        channel: ChannelHandle,
        _filter: Option<u16>,
    ) -> Result<(), BusError> {
        if !self.events_supported {
            return Err(BusError::Unsupported);
        }
        self.record(BusOp::Register(channel));
        Ok(())
    }

    fn start_transaction(&mut self, channel: ChannelHandle) -> Result<(), BusError> {
        if self.fail_start {
            return Err(BusError::Failed);
        }
        self.record(BusOp::Start(channel));
        Ok(())
    }

    fn stop_transaction(&mut self, channel: ChannelHandle) -> Result<(), BusError> {
        self.record(BusOp::Stop(channel));
        Ok(())
    }

    fn write(
        &mut self,
        channel: ChannelHandle,
        bytes: &[u8],
        _mode: AddressMode,
    ) -> Result<(), BusError> {
        if self.fail_write {
            return Err(BusError::Failed);
        }
        self.record(BusOp::Write(channel, bytes.len()));
        let _ = self.writes.push(Vec::from_slice(bytes).unwrap_or_default());
        Ok(())
    }

    fn read(
        &mut self,
        channel: ChannelHandle,
        buf: &mut [u8],
        _mode: AddressMode,
    ) -> Result<(), BusError> {
        if self.fail_read {
            return Err(BusError::Failed);
        }
        self.record(BusOp::Read(channel, buf.len()));
        for (dst, src) in buf.iter_mut().zip(self.read_data.iter().cycle()) {
            *dst = *src;
        }
        Ok(())
    }
}

impl BusRegistry for MockBus {
    fn provider(&mut self, id: ProviderId) -> Option<&mut dyn CommBus> {
        (id == BUS).then_some(self as &mut dyn CommBus)
    }
}

/// Records every level written and remembers the last one per pin.
#[derive(Default)]
pub struct MockPins {
    pub writes: Vec<(u8, bool), 32>,
}

impl MockPins {
    pub fn level(&self, pin: u8) -> Option<bool> {
        self.writes
            .iter()
            .rev()
            .find(|(p, _)| *p == pin)
            .map(|(_, level)| *level)
    }
}

impl DigitalOutput for MockPins {
    fn write(&mut self, pin: u8, level: bool) {
        let _ = self.writes.push((pin, level));
    }
}

#[derive(Default)]
pub struct MockScheduler {
    pub fail_create: Cell<bool>,
    pub created: Cell<u32>,
    pub resumed: Cell<u32>,
    pub immediate: Cell<u32>,
}

impl MockScheduler {
    pub const TASK: TaskHandle = TaskHandle(7);
}

impl TaskScheduler for MockScheduler {
    fn create_task(
        &self,
        _name: &'static str,
        _period_ms: u32,
        _autostart: bool,
    ) -> Option<TaskHandle> {
        if self.fail_create.get() {
            return None;
        }
        self.created.set(self.created.get() + 1);
        Some(Self::TASK)
    }

    fn resume_task(&self, _task: TaskHandle) {
        self.resumed.set(self.resumed.get() + 1);
    }

    fn set_next_call_immediate(&self, _task: TaskHandle) {
        self.immediate.set(self.immediate.get() + 1);
    }
}

/// Timer pool whose timers only expire when a test says so.
pub struct MockTimers {
    /// `(duration, expired)` per allocated handle.
    slots: [Cell<Option<(u32, bool)>>; Self::CAPACITY],
}

impl MockTimers {
    pub const CAPACITY: usize = 4;

    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Cell::new(None)),
        }
    }

    pub fn expire_all(&self) {
        for slot in &self.slots {
            if let Some((ms, _)) = slot.get() {
                slot.set(Some((ms, true)));
            }
        }
    }

    pub fn allocated(&self) -> usize {
        self.slots.iter().filter(|slot| slot.get().is_some()).count()
    }

    pub fn last_ms(&self, timer: TimerHandle) -> u32 {
        self.slots[timer.0 as usize].get().map_or(0, |(ms, _)| ms)
    }
}

impl Default for MockTimers {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerAllocator for MockTimers {
    fn allocate_handle(&self) -> Option<TimerHandle> {
        let idx = self.slots.iter().position(|slot| slot.get().is_none())?;
        self.slots[idx].set(Some((0, false)));
        Some(TimerHandle(idx as u8))
    }

    fn set_ms(&self, timer: TimerHandle, ms: u32) {
        self.slots[timer.0 as usize].set(Some((ms, false)));
    }

    fn release_handle(&self, timer: TimerHandle) {
        self.slots[timer.0 as usize].set(None);
    }

    fn is_expired(&self, timer: TimerHandle) -> bool {
        self.slots[timer.0 as usize]
            .get()
            .is_some_and(|(_, expired)| expired)
    }
}

/// Helper to create a test driver with the given timeout policy.
pub fn test_flash<'d>(policy: TimeoutPolicy) -> TestFlash<'d> {
    DataFlash::new(
        TEST_MAP,
        DriverConfig::new().timeout_policy(policy),
        MockBus::new(),
        MockPins::default(),
        MockScheduler::default(),
        MockTimers::new(),
    )
}

/// Helper to create a test driver that has already been initialized.
pub fn ready_flash<'d>(policy: TimeoutPolicy) -> TestFlash<'d> {
    let flash = test_flash(policy);
    flash.client().initialize().unwrap();
    flash
}

/// Delivers a completion of `length` bytes on `channel`, then polls once.
pub fn complete(flash: &TestFlash<'_>, channel: u8, length: u16) {
    assert!(
        flash
            .bus_events()
            .on_bus_event(BusEvent::new(BUS, ChannelHandle(channel), length)),
        "bus event on channel {channel} matched no waiting instance"
    );
    flash.client().poll();
}

thread_local! {
    static EVENTS: RefCell<StdVec<FlashEvent>> = const { RefCell::new(StdVec::new()) };
}

/// Event handler that records into a per-thread log.
pub fn record_event(event: FlashEvent) {
    EVENTS.with(|events| events.borrow_mut().push(event));
}

/// Drains the events recorded on this thread.
pub fn take_events() -> StdVec<FlashEvent> {
    EVENTS.with(|events| events.borrow_mut().drain(..).collect())
}
