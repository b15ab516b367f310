use bitmaps::{Bits, BitsImpl};

use crate::dataflash::{
    bus::BusRegistry,
    io::DigitalOutput,
    sched::{TaskScheduler, TimerAllocator},
    storage::DataFlash,
    types::BusEvent,
};

/// Entry point for the transport's completion context.
///
/// Safe to call from an interrupt that preempts the poll loop: it only
/// touches the shared run table, inside a critical section.
pub struct BusEventHandle<'a, 'd, R, IO, S, T, const N: usize, const H: usize>
where
    R: BusRegistry,
    IO: DigitalOutput,
    S: TaskScheduler,
    T: TimerAllocator,
    BitsImpl<N>: Bits,
{
    storage: &'a DataFlash<'d, R, IO, S, T, N, H>,
}

impl<R, IO, S, T, const N: usize, const H: usize> core::fmt::Debug
    for BusEventHandle<'_, '_, R, IO, S, T, N, H>
where
    R: BusRegistry,
    IO: DigitalOutput,
    S: TaskScheduler,
    T: TimerAllocator,
    BitsImpl<N>: Bits,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BusEventHandle").finish_non_exhaustive()
    }
}

impl<R, IO, S, T, const N: usize, const H: usize> Clone for BusEventHandle<'_, '_, R, IO, S, T, N, H>
where
    R: BusRegistry,
    IO: DigitalOutput,
    S: TaskScheduler,
    T: TimerAllocator,
    BitsImpl<N>: Bits,
{
    fn clone(&self) -> Self {
        *self
    }
}

impl<R, IO, S, T, const N: usize, const H: usize> Copy for BusEventHandle<'_, '_, R, IO, S, T, N, H>
where
    R: BusRegistry,
    IO: DigitalOutput,
    S: TaskScheduler,
    T: TimerAllocator,
    BitsImpl<N>: Bits,
{
}

impl<'a, 'd, R, IO, S, T, const N: usize, const H: usize> BusEventHandle<'a, 'd, R, IO, S, T, N, H>
where
    R: BusRegistry,
    IO: DigitalOutput,
    S: TaskScheduler,
    T: TimerAllocator,
    BitsImpl<N>: Bits,
{
    pub(crate) fn new(storage: &'a DataFlash<'d, R, IO, S, T, N, H>) -> Self {
        Self { storage }
    }

    /// Classifies a bus completion event.
    ///
    /// The first instance served by `event.provider` on `event.channel`
    /// that is waiting on a transfer is advanced, its timeout released and
    /// the poll task scheduled for immediate execution. The flag update and
    /// the reschedule request happen in one critical section.
    ///
    /// Returns false, touching nothing, if no waiting instance matches.
    pub fn on_bus_event(&self, event: BusEvent) -> bool {
        let storage = self.storage;
        critical_section::with(|cs| {
            let mut table = storage.table.borrow_ref_mut(cs);
            let Some((id, mut timer)) = table.classify(&storage.map, &event) else {
                log_trace!(
                    "dataflash: ignoring bus event on channel {}",
                    event.channel.0
                );
                return false;
            };

            storage.supervisor().release(&mut timer);
            if let Some(task) = table.task {
                storage.scheduler.set_next_call_immediate(task);
            }
            log_trace!(
                "dataflash: instance {} advanced by bus event ({} bytes)",
                id,
                event.length
            );
            true
        })
    }
}
