use super::gdt::{SegmentSelector, TablePointer};

/// The two register loads that hand a built protection domain to the CPU.
pub trait DescriptorLoader {
    /// Loads the descriptor-table register and reloads every segment register
    /// from the new table.
    ///
    /// # Safety
    /// The table `pointer` describes must stay valid and unmoved for as long
    /// as the CPU uses it.
    unsafe fn load_descriptor_table(&mut self, pointer: &TablePointer);

    /// Loads the task register with the TSS descriptor named by `selector`.
    ///
    /// # Safety
    /// The descriptor table must already be loaded and contain an available
    /// TSS descriptor at `selector`'s index.
    unsafe fn load_task_register(&mut self, selector: SegmentSelector);
}

#[cfg(target_arch = "x86")]
pub struct Cpu;

#[cfg(target_arch = "x86")]
impl DescriptorLoader for Cpu {
    unsafe fn load_descriptor_table(&mut self, pointer: &TablePointer) {
        use super::gdt::{KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR};

        let operand = pointer.to_bytes();
        core::arch::asm!(
            "lgdt [{operand}]",
            "mov {tmp:x}, {kdata}",
            "mov ds, {tmp:x}",
            "mov es, {tmp:x}",
            "mov fs, {tmp:x}",
            "mov gs, {tmp:x}",
            "mov ss, {tmp:x}",
            // reload CS through a far return
            "push {kcode}",
            "lea {tmp}, [2f]",
            "push {tmp}",
            "retf",
            "2:",
            operand = in(reg) operand.as_ptr(),
            tmp = out(reg) _,
            kdata = const KERNEL_DATA_SELECTOR.bits(),
            kcode = const KERNEL_CODE_SELECTOR.bits(),
        );
    }

    unsafe fn load_task_register(&mut self, selector: SegmentSelector) {
        core::arch::asm!(
            "ltr {sel:x}",
            sel = in(reg) selector.bits(),
            options(nostack, preserves_flags),
        );
    }
}
