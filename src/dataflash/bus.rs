use heapless::LinearMap;

use crate::dataflash::{
    error::BusError,
    types::{ChannelHandle, ProviderId},
};

/// Register addressing used by a transfer. DataFlash commands carry their
/// address inside the header, so the driver always uses `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressMode {
    #[default]
    None,
    Byte(u8),
    Word(u16),
}

/// Transaction-oriented bus transport.
///
/// Every capability defaults to [`BusError::Unsupported`]; a provider
/// implements only what it offers. `read` and `write` only queue the
/// transfer: completion is reported later through
/// [`BusEventHandle::on_bus_event`](crate::dataflash::BusEventHandle::on_bus_event).
/// The provider must have consumed `bytes` (or filled `buf`) by the time it
/// reports that completion.
pub trait CommBus {
    /// Allocates the channel bound to `bound_id`.
    fn get_allocation(&mut self, _bound_id: u8) -> Result<ChannelHandle, BusError> {
        Err(BusError::Unsupported)
    }

    /// Routes completion events of `channel` to the driver's classifier.
    fn register_event_handler(
        &mut self,
        _channel: ChannelHandle,
        _filter: Option<u16>,
    ) -> Result<(), BusError> {
        Err(BusError::Unsupported)
    }

    /// Opens an exclusive-access window (chip select asserted).
    fn start_transaction(&mut self, _channel: ChannelHandle) -> Result<(), BusError> {
        Err(BusError::Unsupported)
    }

    /// Closes the window opened by `start_transaction`.
    fn stop_transaction(&mut self, _channel: ChannelHandle) -> Result<(), BusError> {
        Err(BusError::Unsupported)
    }

    fn write(
        &mut self,
        _channel: ChannelHandle,
        _bytes: &[u8],
        _mode: AddressMode,
    ) -> Result<(), BusError> {
        Err(BusError::Unsupported)
    }

    fn read(
        &mut self,
        _channel: ChannelHandle,
        _buf: &mut [u8],
        _mode: AddressMode,
    ) -> Result<(), BusError> {
        Err(BusError::Unsupported)
    }
}

/// Looks up the transport serving a provider id.
pub trait BusRegistry {
    fn provider(&mut self, id: ProviderId) -> Option<&mut dyn CommBus>;
}

/// Fixed-capacity provider-id to transport map.
///
/// ```
/// use embedded_dataflash::prelude::*;
///
/// struct Spi;
/// impl CommBus for Spi {}
///
/// let mut spi = Spi;
/// let mut buses: BusMap<'_, 2> = BusMap::new();
/// assert!(buses.insert(ProviderId(1), &mut spi).is_ok());
/// assert!(buses.provider(ProviderId(1)).is_some());
/// assert!(buses.provider(ProviderId(2)).is_none());
/// ```
pub struct BusMap<'a, const P: usize> {
    buses: LinearMap<ProviderId, &'a mut dyn CommBus, P>,
}

impl<'a, const P: usize> BusMap<'a, P> {
    pub fn new() -> Self {
        Self {
            buses: LinearMap::new(),
        }
    }

    /// Registers `bus` for `id`, replacing any previous entry.
    ///
    /// Returns the bus back if the map is full.
    pub fn insert(
        &mut self,
        id: ProviderId,
        bus: &'a mut dyn CommBus,
    ) -> Result<(), &'a mut dyn CommBus> {
        self.buses.insert(id, bus).map(|_| ()).map_err(|(_, bus)| bus)
    }

    pub fn len(&self) -> usize {
        self.buses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }
}

impl<const P: usize> Default for BusMap<'_, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const P: usize> core::fmt::Debug for BusMap<'_, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BusMap")
            .field("providers", &self.buses.len())
            .finish_non_exhaustive()
    }
}

impl<const P: usize> BusRegistry for BusMap<'_, P> {
    fn provider(&mut self, id: ProviderId) -> Option<&mut dyn CommBus> {
        match self.buses.get_mut(&id) {
            Some(bus) => Some(&mut **bus),
            None => None,
        }
    }
}
