//! Address and command header encoding for DataFlash devices.
//!
//! A linear byte address is split into a page index and an intra-page byte
//! offset. The device receives both packed into a 24-bit field, page index
//! in the high bits, most significant byte first:
//!
//! ```text
//!  opcode | addr[23:16] | addr[15:8] | addr[7:0] | dummy...
//!         |<-- page << byte_bits | byte ------->|
//! ```

/// Number of address bytes in every memory command header.
pub const ADDRESS_BYTES: usize = 3;

/// Command opcodes understood by the device.
pub mod opcode {
    /// Main memory page read.
    pub const READ_MEMORY: u8 = 0xD2;
    /// Main memory page program through buffer (read-modify-write).
    pub const WRITE_MEMORY: u8 = 0x58;
    /// Status register read.
    pub const READ_STATUS_REGISTER: u8 = 0xD7;
}

/// Page geometry of the attached device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Geometry {
    /// Bytes per page. One program cycle never spans two pages.
    pub page_size: u32,
    /// Number of pages in the device.
    pub page_count: u32,
}

/// A linear address split into page index and byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashAddress {
    pub page: u32,
    pub byte: u32,
}

impl Geometry {
    /// 256-byte pages, 1024 pages (binary page-size mode).
    pub const AT45_256: Geometry = Geometry::new(256, 1024);

    pub const fn new(page_size: u32, page_count: u32) -> Self {
        Self {
            page_size,
            page_count,
        }
    }

    /// Total bytes in the device.
    pub const fn capacity(&self) -> u32 {
        self.page_size * self.page_count
    }

    /// Bytes reachable through the 24-bit address field.
    ///
    /// Equals [`capacity`](Self::capacity) unless the page index of the
    /// last pages would not fit above the byte-offset field.
    pub const fn addressable(&self) -> u32 {
        let field_bits = (ADDRESS_BYTES * 8) as u32;
        let bits = self.byte_address_bits();
        if bits >= field_bits {
            return 0;
        }
        let max_pages = 1 << (field_bits - bits);
        let pages = if self.page_count < max_pages {
            self.page_count
        } else {
            max_pages
        };
        pages * self.page_size
    }

    /// Width of the byte-offset field inside the 24-bit address.
    pub const fn byte_address_bits(&self) -> u32 {
        u32::BITS - (self.page_size - 1).leading_zeros()
    }

    pub fn split(&self, address: u32) -> FlashAddress {
        FlashAddress {
            page: address / self.page_size,
            byte: address % self.page_size,
        }
    }

    pub fn join(&self, address: FlashAddress) -> u32 {
        address.page * self.page_size + address.byte
    }

    /// Encodes a linear address into the header's address bytes.
    pub fn encode(&self, address: u32) -> [u8; ADDRESS_BYTES] {
        let FlashAddress { page, byte } = self.split(address);
        let field = (page << self.byte_address_bits()) | byte;
        let [_, b2, b1, b0] = field.to_be_bytes();
        [b2, b1, b0]
    }

    /// Inverse of [`Geometry::encode`].
    pub fn decode(&self, bytes: [u8; ADDRESS_BYTES]) -> u32 {
        let field = u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]);
        let bits = self.byte_address_bits();
        self.join(FlashAddress {
            page: field >> bits,
            byte: field & ((1 << bits) - 1),
        })
    }

    /// Size of the next write chunk.
    ///
    /// Bounded by the bytes still to send and by the distance from
    /// `target + progress` to the next page boundary.
    pub fn chunk_len(&self, target: u32, progress: usize, size: usize) -> usize {
        let page = self.page_size as usize;
        let remaining = size.saturating_sub(progress);
        let in_page = (target as usize + progress) % page;
        remaining.min(page).min(page - in_page)
    }

    /// Returns true if `len` bytes starting at `address` fit in the device
    /// and every one of them can be encoded in a header.
    pub fn contains(&self, address: u32, len: usize) -> bool {
        (address as u64) + (len as u64) <= self.addressable() as u64
    }
}

/// Packs a marker and a count into a 32-bit event value.
#[inline]
pub const fn pack_value(marker: u16, count: u16) -> u32 {
    ((marker as u32) << 16) | count as u32
}

/// Splits a 32-bit event value into `(marker, count)`.
#[inline]
pub const fn unpack_value(value: u32) -> (u16, u16) {
    ((value >> 16) as u16, value as u16)
}

/// Generates a fixed-layout memory command header type.
macro_rules! define_header {
    ($(#[$meta:meta])* $name:ident, $opcode:expr, $dummy:literal) => {
        paste::paste! {
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub struct [<$name Header>]([u8; 1 + ADDRESS_BYTES + $dummy]);

            impl [<$name Header>] {
                pub const OPCODE: u8 = $opcode;
                /// Trailing dummy bytes after the address field.
                pub const DUMMY_BYTES: usize = $dummy;
                pub const LEN: usize = 1 + ADDRESS_BYTES + $dummy;

                pub fn new(geometry: &Geometry, address: u32) -> Self {
                    let mut bytes = [0u8; 1 + ADDRESS_BYTES + $dummy];
                    bytes[0] = $opcode;
                    bytes[1..1 + ADDRESS_BYTES].copy_from_slice(&geometry.encode(address));
                    Self(bytes)
                }

                /// Linear address carried by this header.
                pub fn address(&self, geometry: &Geometry) -> u32 {
                    geometry.decode([self.0[1], self.0[2], self.0[3]])
                }

                #[inline]
                pub fn as_bytes(&self) -> &[u8] {
                    &self.0
                }
            }

            #[doc = "Builds a `" $name "Header` for `address`."]
            pub fn [<$name:lower _header>](geometry: &Geometry, address: u32) -> [<$name Header>] {
                [<$name Header>]::new(geometry, address)
            }
        }
    };
}

define_header!(
    /// Page read header: one dummy byte covers the device read latency.
    Read,
    opcode::READ_MEMORY,
    1
);
define_header!(
    /// Page program header.
    Write,
    opcode::WRITE_MEMORY,
    0
);
