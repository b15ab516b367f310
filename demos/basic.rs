//! Basic example: paged write and read-back over a simulated bus
//!
//! This example demonstrates:
//! - Using the builder to create the driver
//! - Registering a completion handler
//! - Delivering bus completion events and polling
//! - Page splitting of a write that crosses a page boundary
//! - Getting the read buffer back with `reclaim`

use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};

use embedded_dataflash::prelude::*;

const SIM: ProviderId = ProviderId(1);

/// Small device: four 256-byte pages
const GEOMETRY: Geometry = Geometry::new(256, 4);

/// In-memory DataFlash that decodes command headers and reports each
/// queued transfer as one pending completion.
struct SimFlash {
    memory: [u8; 1024],
    cursor: Option<u32>,
    pending: Option<u16>,
    headers: u32,
}

impl SimFlash {
    fn new() -> Self {
        Self {
            memory: [0xFF; 1024],
            cursor: None,
            pending: None,
            headers: 0,
        }
    }
}

impl CommBus for SimFlash {
    fn get_allocation(&mut self, bound_id: u8) -> Result<ChannelHandle, BusError> {
        Ok(ChannelHandle(bound_id))
    }

    fn start_transaction(&mut self, _channel: ChannelHandle) -> Result<(), BusError> {
        self.cursor = None;
        Ok(())
    }

    fn stop_transaction(&mut self, _channel: ChannelHandle) -> Result<(), BusError> {
        self.cursor = None;
        Ok(())
    }

    fn write(
        &mut self,
        _channel: ChannelHandle,
        bytes: &[u8],
        _mode: AddressMode,
    ) -> Result<(), BusError> {
        match self.cursor {
            // First bytes of a transaction are the command header
            None => {
                let address = GEOMETRY.decode([bytes[1], bytes[2], bytes[3]]);
                self.cursor = Some(address);
                self.headers += 1;
            }
            Some(address) => {
                let start = address as usize;
                self.memory[start..start + bytes.len()].copy_from_slice(bytes);
                self.cursor = Some(address + bytes.len() as u32);
            }
        }
        self.pending = Some(bytes.len() as u16);
        Ok(())
    }

    fn read(
        &mut self,
        _channel: ChannelHandle,
        buf: &mut [u8],
        _mode: AddressMode,
    ) -> Result<(), BusError> {
        let start = self.cursor.ok_or(BusError::Failed)? as usize;
        buf.copy_from_slice(&self.memory[start..start + buf.len()]);
        self.pending = Some(buf.len() as u16);
        Ok(())
    }
}

impl BusRegistry for SimFlash {
    fn provider(&mut self, id: ProviderId) -> Option<&mut dyn CommBus> {
        (id == SIM).then_some(self as &mut dyn CommBus)
    }
}

struct Scheduler;

impl TaskScheduler for Scheduler {
    fn create_task(&self, _name: &'static str, _period_ms: u32, _autostart: bool) -> Option<TaskHandle> {
        Some(TaskHandle(0))
    }
    fn resume_task(&self, _task: TaskHandle) {}
    fn set_next_call_immediate(&self, _task: TaskHandle) {}
}

/// One timer that never expires
#[derive(Default)]
struct Timers(Cell<bool>);

impl TimerAllocator for Timers {
    fn allocate_handle(&self) -> Option<TimerHandle> {
        (!self.0.replace(true)).then_some(TimerHandle(0))
    }
    fn set_ms(&self, _timer: TimerHandle, _ms: u32) {}
    fn release_handle(&self, _timer: TimerHandle) {
        self.0.set(false);
    }
    fn is_expired(&self, _timer: TimerHandle) -> bool {
        false
    }
}

static LAST_EVENT: AtomicU32 = AtomicU32::new(0);

fn on_done(event: FlashEvent) {
    LAST_EVENT.store(event.value, Ordering::Relaxed);
}

pub fn main() {
    let data: [u8; 300] = core::array::from_fn(|i| i as u8);
    let mut readback = [0u8; 300];

    let flash = DataFlashBuilder::new()
        .instances([InstanceConfig::new(0, SIM, 0)])
        .config(DriverConfig::new().geometry(GEOMETRY))
        .bus(SimFlash::new())
        .no_pins()
        .scheduler(Scheduler)
        .timers(Timers::default())
        .build::<2>();

    let client = flash.client();
    client.initialize().unwrap();
    client
        .register_event_handler(on_done, EventFilter::Instance(0))
        .unwrap();

    // Stands in for the bus interrupt plus the periodic poll task
    let run_to_idle = || {
        while let Some(len) = flash.with_bus(|bus| bus.pending.take()) {
            flash
                .bus_events()
                .on_bus_event(BusEvent::new(SIM, ChannelHandle(0), len));
            client.poll();
        }
    };

    // 300 bytes at 200 cross into the next page: 56 + 244
    client.write(0, &data, 200).unwrap();
    run_to_idle();

    let done = FlashEvent {
        source_instance: 0,
        provider: flash.config().provider_id,
        value: LAST_EVENT.load(Ordering::Relaxed),
    };
    assert_eq!(done.completion(), Some(Completion::Write));
    assert_eq!(done.byte_count(), 300);
    flash.with_bus(|bus| {
        assert_eq!(bus.headers, 2, "one header per page");
        assert_eq!(&bus.memory[200..500], &data[..]);
    });

    client.read(0, &mut readback, 200).unwrap();
    run_to_idle();

    match client.reclaim(0) {
        Some(Transfer::Read(buf)) => assert_eq!(&buf[..], &data[..]),
        _ => panic!("read buffer not returned"),
    }
    assert!(!client.is_busy(0));
}
