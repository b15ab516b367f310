/// Errors returned by the client-facing driver operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    /// Instance id is outside the configured table.
    InvalidInstance,
    /// Instance has no bus channel bound to it.
    Unbound,
    /// Instance already has an operation in flight.
    Busy,
    /// Another instance mapped to the same physical device is active.
    DeviceBusy,
    /// Operation attempted with zero length.
    ZeroLength,
    /// Address or length exceeds the device capacity.
    OutOfRange,
    /// Write would not fit into the registered RAM mirror.
    MirrorOutOfBounds,
    /// The bus provider lacks a required capability.
    Unsupported,
    /// The bus refused to start a transaction.
    StartFailed,
    /// The bus refused a header or command transfer.
    TransferFailed,
    /// Callback registry capacity exceeded.
    RegistryFull,
    /// The scheduler could not create the poll task.
    TaskUnavailable,
}

impl core::fmt::Display for FlashError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FlashError::InvalidInstance => write!(f, "instance id out of range"),
            FlashError::Unbound => write!(f, "instance has no bound bus channel"),
            FlashError::Busy => write!(f, "instance has an operation in flight"),
            FlashError::DeviceBusy => write!(f, "device is in use by another instance"),
            FlashError::ZeroLength => write!(f, "operation attempted with zero length"),
            FlashError::OutOfRange => write!(f, "address or length exceeds device capacity"),
            FlashError::MirrorOutOfBounds => write!(f, "write exceeds RAM mirror bounds"),
            FlashError::Unsupported => write!(f, "bus provider lacks required capability"),
            FlashError::StartFailed => write!(f, "bus transaction could not be started"),
            FlashError::TransferFailed => write!(f, "bus transfer was rejected"),
            FlashError::RegistryFull => write!(f, "callback registry capacity exceeded"),
            FlashError::TaskUnavailable => write!(f, "poll task could not be created"),
        }
    }
}

/// Errors reported by a [`CommBus`](crate::dataflash::CommBus) implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// The provider does not implement this capability.
    Unsupported,
    /// The provider implements the capability but the call failed.
    Failed,
}

impl core::fmt::Display for BusError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BusError::Unsupported => write!(f, "capability not supported by bus provider"),
            BusError::Failed => write!(f, "bus operation failed"),
        }
    }
}

impl From<BusError> for FlashError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Unsupported => FlashError::Unsupported,
            BusError::Failed => FlashError::TransferFailed,
        }
    }
}
