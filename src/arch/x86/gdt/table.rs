use log::trace;

use super::entry::{AccessFlags, Descriptor, DESCRIPTOR_SIZE};
use crate::{config::GDT_LENGTH, mem::VirtualAddress};

/// Descriptor slots. The table is built once at bring-up; afterwards only a
/// planned update of a single index (the TSS) happens, never a resize.
pub const NULL_INDEX: usize = 0;
pub const KERNEL_CODE_INDEX: usize = 1;
pub const KERNEL_DATA_INDEX: usize = 2;
pub const USER_CODE_INDEX: usize = 3;
pub const USER_DATA_INDEX: usize = 4;

// an 8 KiB table is the most `lgdt` can describe with a 16-bit limit
const MAX_ENTRIES: usize = 8192;

// Entries are kept in their serialized form so the memory handed to the CPU
// is exactly the encoded bytes, independent of struct layout rules.
#[derive(Debug, Clone)]
#[repr(C, align(8))]
pub struct DescriptorTable {
    entries: [[u8; DESCRIPTOR_SIZE]; GDT_LENGTH],
}

impl DescriptorTable {
    pub const fn new() -> Self {
        Self {
            entries: [[0; DESCRIPTOR_SIZE]; GDT_LENGTH],
        }
    }

    pub const fn len(&self) -> usize {
        GDT_LENGTH
    }

    pub fn set(&mut self, index: usize, descriptor: Descriptor) {
        crate::invariant!(
            index < GDT_LENGTH,
            "descriptor index {} outside a table of {} entries",
            index,
            GDT_LENGTH
        );
        self.entries[index] = descriptor.to_bytes();
    }

    /// Encodes `(base, limit, access, granularity)` into slot `index`.
    pub fn set_gate(&mut self, index: usize, base: u32, limit: u32, access: u8, granularity: u8) {
        self.set(index, Descriptor::encode(base, limit, access, granularity));
    }

    pub fn get(&self, index: usize) -> Descriptor {
        crate::invariant!(
            index < GDT_LENGTH,
            "descriptor index {} outside a table of {} entries",
            index,
            GDT_LENGTH
        );
        Descriptor::from_bytes(self.entries[index])
    }

    pub fn as_bytes(&self) -> &[[u8; DESCRIPTOR_SIZE]; GDT_LENGTH] {
        &self.entries
    }

    /// Writes the null descriptor and the four flat segments. Slot
    /// `TSS_INDEX` is left to the task-state segment.
    pub fn build_flat(&mut self) {
        self.set(NULL_INDEX, Descriptor::NULL);
        self.set(KERNEL_CODE_INDEX, Descriptor::flat(AccessFlags::KERNEL_CODE));
        self.set(KERNEL_DATA_INDEX, Descriptor::flat(AccessFlags::KERNEL_DATA));
        self.set(USER_CODE_INDEX, Descriptor::flat(AccessFlags::USER_CODE));
        self.set(USER_DATA_INDEX, Descriptor::flat(AccessFlags::USER_DATA));
        trace!("flat segments written: {:#x?}", &self.entries[..=USER_DATA_INDEX]);
    }

    pub fn address(&self) -> VirtualAddress {
        VirtualAddress::from_ptr(self.entries.as_ptr())
    }

    /// The operand for the descriptor-table register. Only meaningful while
    /// `self` stays where it is.
    pub fn pointer(&self) -> TablePointer {
        TablePointer::for_table(self.address(), GDT_LENGTH)
    }
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}

/// `(base, limit)` pair loaded with `lgdt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TablePointer {
    pub limit: u16,
    pub base: VirtualAddress,
}

impl TablePointer {
    pub const SIZE: usize = 6;

    pub fn for_table(base: VirtualAddress, entry_count: usize) -> Self {
        crate::invariant!(
            entry_count > 0 && entry_count <= MAX_ENTRIES,
            "a descriptor table holds 1..={} entries, got {}",
            MAX_ENTRIES,
            entry_count
        );
        Self {
            limit: (DESCRIPTOR_SIZE * entry_count - 1) as u16,
            base,
        }
    }

    /// Memory operand of `lgdt`: 16-bit limit, then 32-bit base, little-endian.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let limit = self.limit.to_le_bytes();
        let base = self.base.to_inner().to_le_bytes();
        [limit[0], limit[1], base[0], base[1], base[2], base[3]]
    }

    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self {
            limit: u16::from_le_bytes([bytes[0], bytes[1]]),
            base: VirtualAddress::new(u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]])),
        }
    }

    pub fn entry_count(&self) -> usize {
        (self.limit as usize + 1) / DESCRIPTOR_SIZE
    }
}
