use core::mem::size_of;
use log::trace;

use super::entry::{AccessFlags, Descriptor, GranularityFlags};
use super::selector::{PrivilegeLevel, SegmentSelector, KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR};
use super::table::DescriptorTable;
use crate::mem::VirtualAddress;

/// 32-bit task-state segment. Only `ss0`/`esp0` matter for ring3 -> ring0
/// stack switching; the segment registers hold defaults used when a
/// privilege transition happens without an explicit context restore.
///
/// Every field is 32 bits wide except the final pair, so `repr(C)` yields
/// the hardware layout without padding.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct TaskStateSegment {
    pub prev_tss: u32,
    pub esp0: u32,
    pub ss0: u32,
    pub esp1: u32,
    pub ss1: u32,
    pub esp2: u32,
    pub ss2: u32,
    pub cr3: u32,
    pub eip: u32,
    pub eflags: u32,
    pub eax: u32,
    pub ecx: u32,
    pub edx: u32,
    pub ebx: u32,
    pub esp: u32,
    pub ebp: u32,
    pub esi: u32,
    pub edi: u32,
    pub es: u32,
    pub cs: u32,
    pub ss: u32,
    pub ds: u32,
    pub fs: u32,
    pub gs: u32,
    pub ldt: u32,
    pub trap: u16,
    pub iomap_base: u16,
}

const _: () = assert!(size_of::<TaskStateSegment>() == TaskStateSegment::SIZE);

impl TaskStateSegment {
    pub const SIZE: usize = 104;

    pub const fn new() -> Self {
        Self {
            prev_tss: 0,
            esp0: 0,
            ss0: 0,
            esp1: 0,
            ss1: 0,
            esp2: 0,
            ss2: 0,
            cr3: 0,
            eip: 0,
            eflags: 0,
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            esp: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            es: 0,
            cs: 0,
            ss: 0,
            ds: 0,
            fs: 0,
            gs: 0,
            ldt: 0,
            trap: 0,
            iomap_base: 0,
        }
    }

    pub fn address(&self) -> VirtualAddress {
        VirtualAddress::from_ptr(self as *const Self)
    }

    /// System descriptor for this TSS at its current address.
    pub fn descriptor(&self) -> Descriptor {
        Descriptor::new(
            self.address().to_inner(),
            (Self::SIZE - 1) as u32,
            AccessFlags::TSS,
            GranularityFlags::empty(),
        )
    }

    /// Writes this TSS's descriptor at `index`, clears the record and sets the
    /// ring0 stack plus ring3-accessible default selectors.
    ///
    /// `self` must not move afterwards: the descriptor holds its address.
    pub fn install(
        &mut self,
        table: &mut DescriptorTable,
        index: usize,
        kernel_stack_selector: SegmentSelector,
        kernel_stack_top: VirtualAddress,
    ) {
        crate::invariant!(
            !kernel_stack_selector.is_null(),
            "ring0 stack selector must not be null"
        );
        crate::invariant!(!kernel_stack_top.is_null(), "ring0 stack top must not be null");

        table.set(index, self.descriptor());

        *self = Self::new();
        self.ss0 = kernel_stack_selector.bits() as u32;
        self.esp0 = kernel_stack_top.to_inner();

        // RPL 3 so the selectors stay usable when entered from ring3: 0x08 -> 0x0b, 0x10 -> 0x13
        let code = KERNEL_CODE_SELECTOR.with_rpl(PrivilegeLevel::Ring3).bits() as u32;
        let data = KERNEL_DATA_SELECTOR.with_rpl(PrivilegeLevel::Ring3).bits() as u32;
        self.cs = code;
        self.ss = data;
        self.ds = data;
        self.es = data;
        self.fs = data;
        self.gs = data;
        // no I/O permission bitmap
        self.iomap_base = Self::SIZE as u16;

        trace!("TSS address: {:#x}", self.address());
        trace!("TSS size: {:#x}", Self::SIZE);
        trace!("TSS ss0: {:#x}, esp0: {:#x}", self.ss0, self.esp0);
    }

    /// Points the ring0 stack at `new_top`. Called on every switch to a
    /// different process, with interrupts disabled.
    pub fn update_kernel_stack(&mut self, new_top: VirtualAddress) {
        crate::invariant!(!new_top.is_null(), "ring0 stack top must not be null");
        self.esp0 = new_top.to_inner();
    }

    pub fn kernel_stack(&self) -> VirtualAddress {
        VirtualAddress::new(self.esp0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{GDT_LENGTH, TSS_INDEX};

    fn installed(table: &mut DescriptorTable, tss: &mut TaskStateSegment) {
        table.build_flat();
        tss.install(table, TSS_INDEX, KERNEL_DATA_SELECTOR, VirtualAddress::new(0x0010_0000));
    }

    #[test]
    fn install_sets_ring0_stack_and_selectors() {
        let mut table = DescriptorTable::new();
        let mut tss = TaskStateSegment::new();
        tss.eax = 0x1234;
        installed(&mut table, &mut tss);

        assert_eq!(tss.ss0, 0x10);
        assert_eq!(tss.esp0, 0x0010_0000);
        assert_eq!(tss.cs, 0x0b);
        for selector in [tss.ss, tss.ds, tss.es, tss.fs, tss.gs] {
            assert_eq!(selector, 0x13);
        }
        // zero-filled before the fields were set
        assert_eq!(tss.eax, 0);
        assert_eq!(tss.iomap_base as usize, TaskStateSegment::SIZE);
    }

    #[test]
    fn tss_descriptor_in_table() {
        let mut table = DescriptorTable::new();
        let mut tss = TaskStateSegment::new();
        installed(&mut table, &mut tss);

        let entry = table.get(TSS_INDEX);
        assert_eq!(entry.access, 0xe9);
        assert_eq!(entry.granularity & 0xf0, 0x00);
        assert_eq!(entry.base(), tss.address().to_inner());
        assert_eq!(entry.limit() as usize, TaskStateSegment::SIZE - 1);
        assert_eq!(entry.access().privilege_level(), PrivilegeLevel::Ring3);
        assert!(!entry.access().contains(AccessFlags::SEGMENT));
        assert_eq!(table.len(), GDT_LENGTH);
    }

    #[test]
    fn update_kernel_stack_only_touches_esp0() {
        let mut table = DescriptorTable::new();
        let mut tss = TaskStateSegment::new();
        installed(&mut table, &mut tss);
        let before = tss;

        tss.update_kernel_stack(VirtualAddress::new(0x0020_0000));

        assert_eq!(tss.esp0, 0x0020_0000);
        assert_eq!(tss.kernel_stack(), VirtualAddress::new(0x0020_0000));
        assert_eq!(
            TaskStateSegment {
                esp0: before.esp0,
                ..tss
            },
            before
        );
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "invariant violated")]
    fn null_stack_top_is_rejected() {
        let mut tss = TaskStateSegment::new();
        tss.update_kernel_stack(VirtualAddress::new(0));
    }
}
