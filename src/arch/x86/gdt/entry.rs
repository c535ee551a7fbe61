//! Segment descriptor encoding.
//!
//! A descriptor is 8 bytes, in the order the CPU reads them:
//!
//! | byte | field                                   |
//! |------|-----------------------------------------|
//! | 0-1  | limit 15..0                             |
//! | 2-3  | base 15..0                              |
//! | 4    | base 23..16                             |
//! | 5    | access (present, DPL, type)             |
//! | 6    | flags (high nibble), limit 19..16 (low) |
//! | 7    | base 31..24                             |
//!
//! The limit field is 20 bits wide. Bits 20..31 of a requested limit are
//! dropped on encoding; with 4 KiB granularity, 0xFFFFF already covers the
//! whole 32-bit address space.

use bitflags::bitflags;

use super::selector::PrivilegeLevel;

pub const DESCRIPTOR_SIZE: usize = 8;

const LIMIT_MASK: u32 = 0x000f_ffff;

bitflags! {
    pub struct AccessFlags: u8 {
        const ACCESSED             = 1 << 0;
        // readable for code segments, writable for data segments
        const READ_WRITE           = 1 << 1;
        const DIRECTION_CONFORMING = 1 << 2;
        const EXECUTABLE           = 1 << 3;
        // code/data segment; clear for system descriptors such as the TSS
        const SEGMENT              = 1 << 4;
        const DPL_LOW              = 1 << 5;
        const DPL_HIGH             = 1 << 6;
        const PRESENT              = 1 << 7;

        const RING3 = Self::DPL_LOW.bits | Self::DPL_HIGH.bits;

        const KERNEL_CODE = Self::PRESENT.bits | Self::SEGMENT.bits | Self::EXECUTABLE.bits | Self::READ_WRITE.bits;
        const KERNEL_DATA = Self::PRESENT.bits | Self::SEGMENT.bits | Self::READ_WRITE.bits;
        const USER_CODE   = Self::KERNEL_CODE.bits | Self::RING3.bits;
        const USER_DATA   = Self::KERNEL_DATA.bits | Self::RING3.bits;
        // system type 0b1001: available 32-bit TSS
        const TSS         = Self::PRESENT.bits | Self::RING3.bits | Self::EXECUTABLE.bits | Self::ACCESSED.bits;
    }

    pub struct GranularityFlags: u8 {
        const AVAILABLE     = 1 << 4;
        const LONG_MODE     = 1 << 5;
        // 32-bit default operand size
        const SIZE_32       = 1 << 6;
        // limit counted in 4 KiB pages
        const PAGE_GRANULAR = 1 << 7;

        const FLAT = Self::PAGE_GRANULAR.bits | Self::SIZE_32.bits;
    }
}

impl AccessFlags {
    pub fn privilege_level(self) -> PrivilegeLevel {
        PrivilegeLevel::from_bits((self.bits() >> 5) & 0b11)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Descriptor {
    pub limit_low: u16,
    pub base_low: u16,
    pub base_middle: u8,
    pub access: u8,
    pub granularity: u8,
    pub base_high: u8,
}

impl Descriptor {
    pub const NULL: Descriptor = Descriptor {
        limit_low: 0,
        base_low: 0,
        base_middle: 0,
        access: 0,
        granularity: 0,
        base_high: 0,
    };

    /// Splits `base` and `limit` into their descriptor fields. Only the high
    /// nibble of `granularity` is kept; the low nibble carries limit 19..16.
    pub const fn encode(base: u32, limit: u32, access: u8, granularity: u8) -> Self {
        Self {
            limit_low: (limit & 0xffff) as u16,
            base_low: (base & 0xffff) as u16,
            base_middle: ((base >> 16) & 0xff) as u8,
            access,
            granularity: ((limit >> 16) & 0x0f) as u8 | (granularity & 0xf0),
            base_high: ((base >> 24) & 0xff) as u8,
        }
    }

    pub const fn new(base: u32, limit: u32, access: AccessFlags, flags: GranularityFlags) -> Self {
        Self::encode(base, limit, access.bits(), flags.bits())
    }

    /// Flat segment spanning the whole 32-bit address space.
    pub const fn flat(access: AccessFlags) -> Self {
        Self::new(0, 0xffff_ffff, access, GranularityFlags::FLAT)
    }

    pub const fn to_bytes(&self) -> [u8; DESCRIPTOR_SIZE] {
        let limit = self.limit_low.to_le_bytes();
        let base = self.base_low.to_le_bytes();
        [
            limit[0],
            limit[1],
            base[0],
            base[1],
            self.base_middle,
            self.access,
            self.granularity,
            self.base_high,
        ]
    }

    pub const fn from_bytes(bytes: [u8; DESCRIPTOR_SIZE]) -> Self {
        Self {
            limit_low: u16::from_le_bytes([bytes[0], bytes[1]]),
            base_low: u16::from_le_bytes([bytes[2], bytes[3]]),
            base_middle: bytes[4],
            access: bytes[5],
            granularity: bytes[6],
            base_high: bytes[7],
        }
    }

    pub const fn to_u64(&self) -> u64 {
        u64::from_le_bytes(self.to_bytes())
    }

    pub const fn from_u64(raw: u64) -> Self {
        Self::from_bytes(raw.to_le_bytes())
    }

    pub const fn base(&self) -> u32 {
        self.base_low as u32 | (self.base_middle as u32) << 16 | (self.base_high as u32) << 24
    }

    /// The 20-bit limit as stored, in units given by the granularity flag.
    pub const fn limit(&self) -> u32 {
        (self.limit_low as u32 | ((self.granularity & 0x0f) as u32) << 16) & LIMIT_MASK
    }

    /// Offset of the last addressable byte of the segment.
    pub fn byte_limit(&self) -> u32 {
        if self.flags().contains(GranularityFlags::PAGE_GRANULAR) {
            (self.limit() << 12) | 0xfff
        } else {
            self.limit()
        }
    }

    pub fn access(&self) -> AccessFlags {
        AccessFlags::from_bits_truncate(self.access)
    }

    pub fn flags(&self) -> GranularityFlags {
        GranularityFlags::from_bits_truncate(self.granularity & 0xf0)
    }

    pub fn is_present(&self) -> bool {
        self.access().contains(AccessFlags::PRESENT)
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}
