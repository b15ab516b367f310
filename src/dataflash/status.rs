/// Snapshot of the device's two-byte status register.
///
/// Bit layout (MSB first per byte):
///
/// ```text
/// byte 0: RDY | COMP | DENSITY[3:0] | PROTECT | PAGE SIZE
/// byte 1: RDY | res  | EPE          | res...
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusRegister([u8; 2]);

impl StatusRegister {
    pub const LEN: usize = 2;

    pub const fn from_bytes(bytes: [u8; 2]) -> Self {
        Self(bytes)
    }

    pub const fn to_bytes(self) -> [u8; 2] {
        self.0
    }

    /// Device is ready (not busy with an internal operation).
    pub const fn is_ready(&self) -> bool {
        self.0[0] & 0x80 != 0
    }

    /// Last memory-to-buffer compare did not match.
    pub const fn compare_mismatch(&self) -> bool {
        self.0[0] & 0x40 != 0
    }

    /// Density code of the device.
    pub const fn density(&self) -> u8 {
        (self.0[0] >> 2) & 0x0F
    }

    /// Sector protection is enabled.
    pub const fn is_protected(&self) -> bool {
        self.0[0] & 0x02 != 0
    }

    /// Device is configured for binary (power-of-two) page size.
    pub const fn binary_page_size(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Last erase or program operation failed.
    pub const fn erase_program_error(&self) -> bool {
        self.0[1] & 0x20 != 0
    }
}
