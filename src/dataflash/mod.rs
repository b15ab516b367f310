pub mod builder;
pub mod bus;
pub mod codec;
pub mod config;
pub mod error;
pub mod handle;
pub mod io;
pub mod notify;
pub mod sched;
mod sequencer;
pub mod status;
pub mod storage;
pub(crate) mod table;
mod timeout;
pub mod types;

#[cfg(test)]
mod test_support;

pub use builder::DataFlashBuilder;
pub use bus::{AddressMode, BusMap, BusRegistry, CommBus};
pub use codec::{FlashAddress, Geometry, ReadHeader, WriteHeader};
pub use config::{DriverConfig, InstanceConfig, PinConfig, TimeoutPolicy};
pub use error::{BusError, FlashError};
pub use handle::{BusEventHandle, ClientHandle};
pub use io::{DigitalOutput, NoPins};
pub use notify::{EventFilter, EventHandler};
pub use sched::{TaskScheduler, TimerAllocator};
pub use status::StatusRegister;
pub use storage::{DataFlash, Transfer};
pub use table::RunState;
pub use types::{
    BusEvent, ChannelHandle, Completion, FlashEvent, InstanceId, Process, ProviderId, State,
    TaskHandle, TimerHandle,
};

pub mod prelude {
    pub use super::{
        AddressMode, BusError, BusEvent, BusEventHandle, BusMap, BusRegistry, ChannelHandle,
        ClientHandle, CommBus, Completion, DataFlash, DataFlashBuilder, DigitalOutput,
        DriverConfig, EventFilter, EventHandler, FlashError, FlashEvent, Geometry,
        InstanceConfig, InstanceId, NoPins, ProviderId, StatusRegister, TaskHandle,
        TaskScheduler, TimeoutPolicy, TimerAllocator, TimerHandle, Transfer,
    };
}
