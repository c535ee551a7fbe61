//! Global descriptor table and task-state segment.
//!
//! Layout:
//!
//! | index | selector | segment                          |
//! |-------|----------|----------------------------------|
//! | 0     | 0x00     | null (required by the CPU)       |
//! | 1     | 0x08     | kernel code, ring 0              |
//! | 2     | 0x10     | kernel data, ring 0              |
//! | 3     | 0x1b     | user code, ring 3                |
//! | 4     | 0x23     | user data, ring 3                |
//! | 5     | 0x2b     | TSS                              |
//!
//! Code and data segments use the flat model: base 0, limit 4 GiB.

mod entry;
mod selector;
mod table;
mod tss;

pub use entry::{AccessFlags, Descriptor, GranularityFlags, DESCRIPTOR_SIZE};
pub use selector::{
    PrivilegeLevel, SegmentSelector, KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR, TSS_SELECTOR,
    USER_CODE_SELECTOR, USER_DATA_SELECTOR,
};
pub use table::{
    DescriptorTable, TablePointer, KERNEL_CODE_INDEX, KERNEL_DATA_INDEX, NULL_INDEX,
    USER_CODE_INDEX, USER_DATA_INDEX,
};
pub use tss::TaskStateSegment;

use core::sync::atomic::{AtomicBool, Ordering};
use log::{info, trace};

use super::cpu::DescriptorLoader;
use crate::{config::TSS_INDEX, locks::SpinLockIrq, mem::VirtualAddress};

/// The descriptor table together with the TSS it points at.
///
/// Both hold addresses of each other once built, so the instance must not
/// move after `build`. The kernel keeps exactly one, in a static, built and
/// loaded once before interrupts are enabled.
#[derive(Debug)]
pub struct ProtectionDomain {
    table: DescriptorTable,
    tss: TaskStateSegment,
}

impl ProtectionDomain {
    pub const fn new() -> Self {
        Self {
            table: DescriptorTable::new(),
            tss: TaskStateSegment::new(),
        }
    }

    pub fn build(&mut self, kernel_stack_top: VirtualAddress) {
        self.table.build_flat();
        self.tss.install(
            &mut self.table,
            TSS_INDEX,
            KERNEL_DATA_SELECTOR,
            kernel_stack_top,
        );
        trace!("gdt: {:#x?}", self.table.as_bytes());
    }

    /// # Safety
    /// `self` must have been built and must stay at its address while loaded.
    pub unsafe fn load<L: DescriptorLoader>(&self, loader: &mut L) {
        let pointer = self.table.pointer();
        trace!("gdt pointer: {:x?}", pointer);
        loader.load_descriptor_table(&pointer);
        loader.load_task_register(TSS_SELECTOR);
    }

    pub fn set_kernel_stack(&mut self, new_top: VirtualAddress) {
        self.tss.update_kernel_stack(new_top);
    }

    pub fn table(&self) -> &DescriptorTable {
        &self.table
    }

    pub fn tss(&self) -> &TaskStateSegment {
        &self.tss
    }

    pub fn tss_mut(&mut self) -> &mut TaskStateSegment {
        &mut self.tss
    }
}

impl Default for ProtectionDomain {
    fn default() -> Self {
        Self::new()
    }
}

static PROTECTION_DOMAIN: SpinLockIrq<ProtectionDomain> = SpinLockIrq::new(ProtectionDomain::new());
static INITIALISED: AtomicBool = AtomicBool::new(false);

// True for the first caller only; later callers trip the invariant in debug
// builds and are turned away in release builds.
fn claim_first_init(flag: &AtomicBool) -> bool {
    let first = !flag.swap(true, Ordering::AcqRel);
    crate::invariant!(first, "protection domain initialised twice");
    first
}

/// Builds the kernel's protection domain and loads it through `loader`.
/// Must run exactly once, before interrupts are enabled.
pub fn initialize_protection_domain_with<L: DescriptorLoader>(
    kernel_stack_top: VirtualAddress,
    loader: &mut L,
) {
    if !claim_first_init(&INITIALISED) {
        return;
    }

    let mut domain = PROTECTION_DOMAIN.lock();
    domain.build(kernel_stack_top);
    // SAFETY: the domain lives in a static and is never moved
    unsafe {
        domain.load(loader);
    }
    info!("GDT initialised, kernel stack at {:#x}", kernel_stack_top);
}

#[cfg(target_arch = "x86")]
pub fn initialize_protection_domain(kernel_stack_top: VirtualAddress) {
    initialize_protection_domain_with(kernel_stack_top, &mut super::cpu::Cpu);
}

/// Must be called whenever a different process becomes current, before it
/// can trap from ring3 into ring0.
pub fn set_kernel_stack(new_top: VirtualAddress) {
    PROTECTION_DOMAIN.lock().set_kernel_stack(new_top);
}

/// Runs `f` with the kernel's protection domain locked.
pub fn with_protection_domain<R>(f: impl FnOnce(&mut ProtectionDomain) -> R) -> R {
    f(&mut PROTECTION_DOMAIN.lock())
}
