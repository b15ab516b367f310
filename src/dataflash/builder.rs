use core::marker::PhantomData;

use bitmaps::{Bits, BitsImpl};

use crate::dataflash::{
    bus::BusRegistry,
    config::{DriverConfig, InstanceConfig},
    io::{DigitalOutput, NoPins},
    sched::{TaskScheduler, TimerAllocator},
    storage::DataFlash,
    types::InstanceId,
};

// Builder states
pub struct NeedInstances;
pub struct NeedBus;
pub struct NeedIo;
pub struct NeedScheduler;
pub struct NeedTimers;
pub struct Ready;

/// Typestate builder for [`DataFlash`].
///
/// Collaborators are supplied in a fixed order; `config` may be set at any
/// step and defaults to [`DriverConfig::default`].
pub struct DataFlashBuilder<const N: usize, R, IO, S, T, State> {
    map: [InstanceConfig; N],
    config: DriverConfig,
    bus: R,
    io: IO,
    scheduler: S,
    timers: T,
    _state: PhantomData<State>,
}

// Start the builder
impl DataFlashBuilder<0, (), (), (), (), NeedInstances> {
    pub fn new() -> Self {
        DataFlashBuilder {
            map: [],
            config: DriverConfig::new(),
            bus: (),
            io: (),
            scheduler: (),
            timers: (),
            _state: PhantomData,
        }
    }
}

impl Default for DataFlashBuilder<0, (), (), (), (), NeedInstances> {
    fn default() -> Self {
        Self::new()
    }
}

// Any step
impl<const N: usize, R, IO, S, T, State> DataFlashBuilder<N, R, IO, S, T, State> {
    pub fn config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }
}

// Set instance table
impl DataFlashBuilder<0, (), (), (), (), NeedInstances> {
    /// Set the instance table.
    ///
    /// # Panics
    /// Panics if the table is empty or has more entries than an
    /// [`InstanceId`] can index.
    pub fn instances<const N: usize>(
        self,
        map: [InstanceConfig; N],
    ) -> DataFlashBuilder<N, (), (), (), (), NeedBus> {
        assert!(
            N > 0 && N <= InstanceId::MAX as usize + 1,
            "Instance count {} outside 1..={}",
            N,
            InstanceId::MAX as usize + 1
        );

        DataFlashBuilder {
            map,
            config: self.config,
            bus: (),
            io: (),
            scheduler: (),
            timers: (),
            _state: PhantomData,
        }
    }
}

// Set bus registry
impl<const N: usize> DataFlashBuilder<N, (), (), (), (), NeedBus> {
    pub fn bus<R: BusRegistry>(self, bus: R) -> DataFlashBuilder<N, R, (), (), (), NeedIo> {
        DataFlashBuilder {
            map: self.map,
            config: self.config,
            bus,
            io: (),
            scheduler: (),
            timers: (),
            _state: PhantomData,
        }
    }
}

// Set digital output
impl<const N: usize, R: BusRegistry> DataFlashBuilder<N, R, (), (), (), NeedIo> {
    pub fn io<IO: DigitalOutput>(self, io: IO) -> DataFlashBuilder<N, R, IO, (), (), NeedScheduler> {
        DataFlashBuilder {
            map: self.map,
            config: self.config,
            bus: self.bus,
            io,
            scheduler: (),
            timers: (),
            _state: PhantomData,
        }
    }

    /// No write-protect or reset lines are wired
    pub fn no_pins(self) -> DataFlashBuilder<N, R, NoPins, (), (), NeedScheduler> {
        self.io(NoPins)
    }
}

// Set scheduler
impl<const N: usize, R: BusRegistry, IO: DigitalOutput>
    DataFlashBuilder<N, R, IO, (), (), NeedScheduler>
{
    pub fn scheduler<S: TaskScheduler>(
        self,
        scheduler: S,
    ) -> DataFlashBuilder<N, R, IO, S, (), NeedTimers> {
        DataFlashBuilder {
            map: self.map,
            config: self.config,
            bus: self.bus,
            io: self.io,
            scheduler,
            timers: (),
            _state: PhantomData,
        }
    }
}

// Set timers
impl<const N: usize, R: BusRegistry, IO: DigitalOutput, S: TaskScheduler>
    DataFlashBuilder<N, R, IO, S, (), NeedTimers>
{
    pub fn timers<T: TimerAllocator>(self, timers: T) -> DataFlashBuilder<N, R, IO, S, T, Ready> {
        DataFlashBuilder {
            map: self.map,
            config: self.config,
            bus: self.bus,
            io: self.io,
            scheduler: self.scheduler,
            timers,
            _state: PhantomData,
        }
    }
}

// Build the final driver
impl<const N: usize, R, IO, S, T> DataFlashBuilder<N, R, IO, S, T, Ready>
where
    R: BusRegistry,
    IO: DigitalOutput,
    S: TaskScheduler,
    T: TimerAllocator,
    BitsImpl<N>: Bits,
{
    /// Build the driver with room for `H` event handlers.
    pub fn build<'d, const H: usize>(self) -> DataFlash<'d, R, IO, S, T, N, H> {
        DataFlash::new(
            self.map,
            self.config,
            self.bus,
            self.io,
            self.scheduler,
            self.timers,
        )
    }
}
