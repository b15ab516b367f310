use crate::dataflash::{codec::Geometry, types::ProviderId};

/// A digital output line and the level that makes it active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinConfig {
    pub pin: u8,
    pub active_level: bool,
}

impl PinConfig {
    pub const fn new(pin: u8, active_level: bool) -> Self {
        Self { pin, active_level }
    }
}

/// Static description of one logical instance.
///
/// Built with `const fn`s so the whole table can live in flash:
///
/// ```
/// use embedded_dataflash::prelude::*;
///
/// static MAP: [InstanceConfig; 2] = [
///     InstanceConfig::new(0, ProviderId(1), 0).with_write_protect(12, false),
///     InstanceConfig::new(1, ProviderId(1), 0),
/// ];
/// assert!(MAP[0].write_protect.is_some());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InstanceConfig {
    /// Client channel identifier matched by `get_allocation`.
    pub channel: u8,
    /// Bus provider serving this instance.
    pub provider: ProviderId,
    /// Id the provider uses to allocate the channel.
    pub bound_id: u8,
    /// Write-protect line; `None` disables the feature.
    pub write_protect: Option<PinConfig>,
    /// Reset line; `None` disables the feature.
    pub reset: Option<PinConfig>,
}

impl InstanceConfig {
    pub const fn new(channel: u8, provider: ProviderId, bound_id: u8) -> Self {
        Self {
            channel,
            provider,
            bound_id,
            write_protect: None,
            reset: None,
        }
    }

    pub const fn with_write_protect(mut self, pin: u8, active_level: bool) -> Self {
        self.write_protect = Some(PinConfig::new(pin, active_level));
        self
    }

    pub const fn with_reset(mut self, pin: u8, active_level: bool) -> Self {
        self.reset = Some(PinConfig::new(pin, active_level));
        self
    }

    /// True if both instances address the same physical device.
    pub fn shares_device(&self, other: &InstanceConfig) -> bool {
        self.provider == other.provider && self.bound_id == other.bound_id
    }
}

/// What the poll loop does with an instance whose timeout expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimeoutPolicy {
    /// Report the expiry and keep waiting for the bus event.
    #[default]
    Ignore,
    /// Stop the transaction, reset the instance and notify `TimedOut`.
    Abort,
}

/// Driver-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriverConfig {
    pub geometry: Geometry,
    pub poll_period_ms: u32,
    pub wait_timeout_ms: u32,
    pub timeout_policy: TimeoutPolicy,
    /// Identity stamped on every [`FlashEvent`](crate::dataflash::FlashEvent).
    pub provider_id: ProviderId,
    pub task_name: &'static str,
}

impl DriverConfig {
    pub const DEFAULT_POLL_PERIOD_MS: u32 = 5;
    pub const DEFAULT_WAIT_TIMEOUT_MS: u32 = 50;
    pub const DEFAULT_PROVIDER_ID: ProviderId = ProviderId(0xE5);

    pub const fn new() -> Self {
        Self {
            geometry: Geometry::AT45_256,
            poll_period_ms: Self::DEFAULT_POLL_PERIOD_MS,
            wait_timeout_ms: Self::DEFAULT_WAIT_TIMEOUT_MS,
            timeout_policy: TimeoutPolicy::Ignore,
            provider_id: Self::DEFAULT_PROVIDER_ID,
            task_name: "dataflash::poll",
        }
    }

    pub const fn geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub const fn poll_period_ms(mut self, ms: u32) -> Self {
        self.poll_period_ms = ms;
        self
    }

    pub const fn wait_timeout_ms(mut self, ms: u32) -> Self {
        self.wait_timeout_ms = ms;
        self
    }

    pub const fn timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout_policy = policy;
        self
    }

    pub const fn provider_id(mut self, id: ProviderId) -> Self {
        self.provider_id = id;
        self
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::new()
    }
}
