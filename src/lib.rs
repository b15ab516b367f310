//! A `no_std`, no-alloc asynchronous driver for DataFlash-style paged memory.
//!
//! The driver turns `(address, length)` read and write requests into the
//! command sequences a DataFlash device expects over a shared,
//! transaction-oriented bus. Writes are split at page boundaries. Every
//! transfer is queued on the bus and completes asynchronously; the driver
//! advances on completion events and reports each finished operation to
//! registered handlers.
//!
//! # Features
//!
//! - **Zero heap allocation** - Client buffers are borrowed, tables are fixed-size
//! - **Interrupt-safe completion path** - Bus events are classified in a critical section
//! - **Per-instance timeouts** - Stuck transfers are reported or aborted
//! - **Pluggable collaborators** - Bus, pins, scheduler and timers are traits
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐         ┌──────────────────────────┐
//! │   Poll context   │         │   Bus event context      │
//! │                  │         │                          │
//! │  read() / write()│────────▶│  transport completes     │
//! │  (queue header)  │  bus    │  transfer                │
//! │                  │         │                          │
//! │  poll()          │◀────────│  on_bus_event()          │
//! │  (next transfer, │ process │  (advance process flag,  │
//! │   notify)        │  flag   │   schedule poll)         │
//! └──────────────────┘         └──────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use core::cell::Cell;
//! use embedded_dataflash::prelude::*;
//!
//! struct Spi;
//! impl CommBus for Spi {
//!     fn get_allocation(&mut self, bound_id: u8) -> Result<ChannelHandle, BusError> {
//!         Ok(ChannelHandle(bound_id))
//!     }
//!     fn start_transaction(&mut self, _ch: ChannelHandle) -> Result<(), BusError> {
//!         Ok(())
//!     }
//!     fn stop_transaction(&mut self, _ch: ChannelHandle) -> Result<(), BusError> {
//!         Ok(())
//!     }
//!     fn write(&mut self, _ch: ChannelHandle, _b: &[u8], _m: AddressMode) -> Result<(), BusError> {
//!         Ok(())
//!     }
//! }
//!
//! struct Scheduler;
//! impl TaskScheduler for Scheduler {
//!     fn create_task(&self, _name: &'static str, _ms: u32, _auto: bool) -> Option<TaskHandle> {
//!         Some(TaskHandle(0))
//!     }
//!     fn resume_task(&self, _task: TaskHandle) {}
//!     fn set_next_call_immediate(&self, _task: TaskHandle) {}
//! }
//!
//! #[derive(Default)]
//! struct Timers(Cell<bool>);
//! impl TimerAllocator for Timers {
//!     fn allocate_handle(&self) -> Option<TimerHandle> {
//!         (!self.0.replace(true)).then_some(TimerHandle(0))
//!     }
//!     fn set_ms(&self, _timer: TimerHandle, _ms: u32) {}
//!     fn release_handle(&self, _timer: TimerHandle) {
//!         self.0.set(false);
//!     }
//!     fn is_expired(&self, _timer: TimerHandle) -> bool {
//!         false
//!     }
//! }
//!
//! fn on_done(event: FlashEvent) {
//!     assert_eq!(event.completion(), Some(Completion::Write));
//! }
//!
//! let data = [0x42u8; 16];
//! let mut spi = Spi;
//! let mut buses: BusMap<'_, 1> = BusMap::new();
//! buses.insert(ProviderId(1), &mut spi).ok();
//!
//! let flash = DataFlashBuilder::new()
//!     .instances([InstanceConfig::new(0, ProviderId(1), 0)])
//!     .bus(buses)
//!     .no_pins()
//!     .scheduler(Scheduler)
//!     .timers(Timers::default())
//!     .build::<4>();
//!
//! let client = flash.client();
//! client.initialize().unwrap();
//! client.register_event_handler(on_done, EventFilter::Any).unwrap();
//! client.write(0, &data, 0x100).unwrap();
//!
//! // The transport's completion interrupt reports each finished transfer
//! let events = flash.bus_events();
//! events.on_bus_event(BusEvent::new(ProviderId(1), ChannelHandle(0), 4));
//! client.poll();
//! events.on_bus_event(BusEvent::new(ProviderId(1), ChannelHandle(0), 16));
//! client.poll();
//! assert!(!client.is_busy(0));
//! ```

#![deny(unsafe_code)]
#![no_std]

mod fmt;

pub mod dataflash;

pub mod prelude {
    pub use crate::dataflash::prelude::*;
}
