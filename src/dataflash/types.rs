use crate::dataflash::codec::{pack_value, unpack_value};

/// Index of a logical instance in the driver's instance table.
pub type InstanceId = u8;

/// Identifies a generic service provider (a bus driver, or this module).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProviderId(pub u8);

/// Opaque channel handle returned by a bus provider's allocation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelHandle(pub u8);

/// Handle to the periodic poll task inside the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskHandle(pub u8);

/// Handle to an allocated timeout timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerHandle(pub u8);

/// Phase marker of the operation an instance is running.
///
/// `Wait*` variants are set by the sequencer when a transfer is issued;
/// the bus event classifier advances them to the matching completed variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Process {
    #[default]
    None = 0,
    WaitRead = 1,
    Read = 2,
    WaitWrite = 3,
    Write = 4,
}

impl Process {
    #[inline]
    pub fn is_waiting(self) -> bool {
        matches!(self, Process::WaitRead | Process::WaitWrite)
    }
}

/// Sequencer state of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    #[default]
    Initialize,
    Idle,
    SendReadHeader,
    Read,
    SendWriteHeader,
    Write,
    SendStatusCommand,
    ReadStatus,
    /// Reserved for a busy-poll precondition; never entered.
    SendStatusBeforeRead,
    /// Reserved for a busy-poll precondition; never entered.
    ReadStatusBeforeRead,
    /// Reserved for a busy-poll precondition; never entered.
    SendStatusBeforeWrite,
    /// Reserved for a busy-poll precondition; never entered.
    ReadStatusBeforeWrite,
}

impl State {
    /// True for states whose outstanding transfer moves payload bytes.
    #[inline]
    pub fn is_payload(self) -> bool {
        matches!(self, State::Read | State::Write)
    }
}

/// Outcome marker carried by a [`FlashEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Completion {
    Read = Process::Read as u8,
    Write = Process::Write as u8,
    Aborted = 0xFE,
    TimedOut = 0xFF,
}

impl Completion {
    pub fn from_marker(marker: u16) -> Option<Self> {
        match marker {
            m if m == Completion::Read as u16 => Some(Completion::Read),
            m if m == Completion::Write as u16 => Some(Completion::Write),
            m if m == Completion::Aborted as u16 => Some(Completion::Aborted),
            m if m == Completion::TimedOut as u16 => Some(Completion::TimedOut),
            _ => None,
        }
    }
}

/// Notification delivered to registered handlers when an operation ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashEvent {
    pub source_instance: InstanceId,
    pub provider: ProviderId,
    /// `(completion marker << 16) | byte count`.
    pub value: u32,
}

impl FlashEvent {
    pub fn new(
        source_instance: InstanceId,
        provider: ProviderId,
        completion: Completion,
        count: u16,
    ) -> Self {
        Self {
            source_instance,
            provider,
            value: pack_value(completion as u16, count),
        }
    }

    pub fn completion(&self) -> Option<Completion> {
        Completion::from_marker(unpack_value(self.value).0)
    }

    pub fn byte_count(&self) -> u16 {
        unpack_value(self.value).1
    }
}

/// Completion event raised by a bus provider for one of its channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusEvent {
    pub provider: ProviderId,
    pub channel: ChannelHandle,
    /// Bytes moved by the transfer that just finished.
    pub length: u16,
}

impl BusEvent {
    pub fn new(provider: ProviderId, channel: ChannelHandle, length: u16) -> Self {
        Self {
            provider,
            channel,
            length,
        }
    }

    /// Decodes a transport's packed `(process << 16) | length` event value.
    pub fn from_packed(provider: ProviderId, channel: ChannelHandle, value: u32) -> Self {
        let (_process, length) = unpack_value(value);
        Self::new(provider, channel, length)
    }
}
