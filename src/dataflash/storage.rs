use core::cell::{Cell, RefCell};

use bitmaps::{Bits, BitsImpl};
use critical_section::Mutex;

use crate::dataflash::{
    bus::BusRegistry,
    config::{DriverConfig, InstanceConfig},
    handle::{BusEventHandle, ClientHandle},
    io::DigitalOutput,
    notify::CallbackRegistry,
    sched::{TaskScheduler, TimerAllocator},
    status::StatusRegister,
    table::{RunState, RunTable},
    timeout::TimeoutSupervisor,
    types::{FlashEvent, InstanceId},
};

/// Client buffer held by an instance for the duration of an operation.
#[derive(Debug)]
pub enum Transfer<'d> {
    Read(&'d mut [u8]),
    Write(&'d [u8]),
}

impl Transfer<'_> {
    pub fn len(&self) -> usize {
        match self {
            Transfer::Read(buf) => buf.len(),
            Transfer::Write(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Poll-context resources of one instance.
#[derive(Default)]
pub(crate) struct Slot<'d> {
    pub(crate) transfer: Option<Transfer<'d>>,
    pub(crate) mirror: Option<&'d mut [u8]>,
    pub(crate) status: [u8; StatusRegister::LEN],
}

/// Collaborators only the poll context touches.
pub(crate) struct Port<'d, R, IO, const N: usize> {
    pub(crate) bus: R,
    pub(crate) io: IO,
    pub(crate) slots: [Slot<'d>; N],
}

/// Driver context: instance table, run state and collaborators.
///
/// Construct it once (typically through
/// [`DataFlashBuilder`](crate::dataflash::DataFlashBuilder)) and hand out
/// [`ClientHandle`]s to the poll context and a [`BusEventHandle`] to the
/// transport's completion interrupt.
///
/// # Const Generics
/// - `N`: Number of logical instances
/// - `H`: Capacity of the event handler registry
///
/// # Type Parameters
/// - `R`: Bus provider registry
/// - `IO`: Digital output for write-protect and reset lines
/// - `S`: Task scheduler running the poll entry point
/// - `T`: Timer allocator for bus timeouts
pub struct DataFlash<'d, R, IO, S, T, const N: usize, const H: usize>
where
    R: BusRegistry,
    IO: DigitalOutput,
    S: TaskScheduler,
    T: TimerAllocator,
    BitsImpl<N>: Bits,
{
    pub(crate) map: [InstanceConfig; N],
    pub(crate) config: DriverConfig,
    pub(crate) table: Mutex<RefCell<RunTable<N>>>,
    pub(crate) port: Mutex<RefCell<Port<'d, R, IO, N>>>,
    pub(crate) callbacks: Mutex<RefCell<CallbackRegistry<H>>>,
    pub(crate) status: Mutex<Cell<StatusRegister>>,
    pub(crate) scheduler: S,
    pub(crate) timers: T,
}

impl<'d, R, IO, S, T, const N: usize, const H: usize> DataFlash<'d, R, IO, S, T, N, H>
where
    R: BusRegistry,
    IO: DigitalOutput,
    S: TaskScheduler,
    T: TimerAllocator,
    BitsImpl<N>: Bits,
{
    pub fn new(
        map: [InstanceConfig; N],
        config: DriverConfig,
        bus: R,
        io: IO,
        scheduler: S,
        timers: T,
    ) -> Self {
        debug_assert!(N <= InstanceId::MAX as usize + 1, "too many instances");

        Self {
            map,
            config,
            table: Mutex::new(RefCell::new(RunTable::new())),
            port: Mutex::new(RefCell::new(Port {
                bus,
                io,
                slots: core::array::from_fn(|_| Slot::default()),
            })),
            callbacks: Mutex::new(RefCell::new(CallbackRegistry::new())),
            status: Mutex::new(Cell::new(StatusRegister::default())),
            scheduler,
            timers,
        }
    }

    pub fn client(&self) -> ClientHandle<'_, 'd, R, IO, S, T, N, H> {
        ClientHandle::new(self)
    }

    pub fn bus_events(&self) -> BusEventHandle<'_, 'd, R, IO, S, T, N, H> {
        BusEventHandle::new(self)
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn instances(&self) -> &[InstanceConfig; N] {
        &self.map
    }

    /// Copy of an instance's run state.
    pub fn run_state(&self, id: InstanceId) -> Option<RunState> {
        let id = id as usize;
        if id >= N {
            return None;
        }
        Some(self.with_table(|table| table.runs[id]))
    }

    /// Last status register snapshot read by `refresh_status`.
    pub fn status(&self) -> StatusRegister {
        critical_section::with(|cs| self.status.borrow(cs).get())
    }

    /// Runs `f` with exclusive access to the bus registry.
    ///
    /// Must not be called from a registered event handler or from inside a
    /// transport call.
    pub fn with_bus<Ret>(&self, f: impl FnOnce(&mut R) -> Ret) -> Ret {
        self.with_port(|port| f(&mut port.bus))
    }

    pub(crate) fn with_table<Ret>(&self, f: impl FnOnce(&mut RunTable<N>) -> Ret) -> Ret {
        critical_section::with(|cs| f(&mut self.table.borrow_ref_mut(cs)))
    }

    pub(crate) fn with_port<Ret>(&self, f: impl FnOnce(&mut Port<'d, R, IO, N>) -> Ret) -> Ret {
        critical_section::with(|cs| f(&mut self.port.borrow_ref_mut(cs)))
    }

    pub(crate) fn supervisor(&self) -> TimeoutSupervisor<'_, T> {
        TimeoutSupervisor::new(&self.timers, self.config.wait_timeout_ms)
    }

    /// Dispatches `event` outside of every driver borrow, so handlers may
    /// issue new requests.
    pub(crate) fn notify(&self, event: FlashEvent) {
        log_debug!(
            "dataflash: instance {} finished, value {}",
            event.source_instance,
            event.value
        );
        let subs = critical_section::with(|cs| self.callbacks.borrow_ref(cs).clone());
        subs.notify(event);
    }
}

impl<R, IO, S, T, const N: usize, const H: usize> core::fmt::Debug
    for DataFlash<'_, R, IO, S, T, N, H>
where
    R: BusRegistry,
    IO: DigitalOutput,
    S: TaskScheduler,
    T: TimerAllocator,
    BitsImpl<N>: Bits,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DataFlash")
            .field("instances", &N)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
