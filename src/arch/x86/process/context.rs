use crate::mem::VirtualAddress;

/// Registers saved while a process is off the CPU. Field order is relied on
/// by `switch_context`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Context {
    pub eip: u32,
    pub esp: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub ebp: u32,
}

const _: () = assert!(core::mem::size_of::<Context>() == 32);

impl Context {
    /// Context that starts executing `entry` on an empty stack. `entry` must
    /// never return.
    pub fn new_thread(entry: VirtualAddress, stack_top: VirtualAddress) -> Self {
        Self {
            eip: entry.to_inner(),
            esp: stack_top.to_inner(),
            ..Self::default()
        }
    }
}

/// Where the outgoing registers go and where the incoming ones come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchFrames {
    pub(super) from: *mut Context,
    pub(super) to: *const Context,
}

impl SwitchFrames {
    pub fn from(&self) -> *mut Context {
        self.from
    }

    pub fn to(&self) -> *const Context {
        self.to
    }
}

#[cfg(target_arch = "x86")]
core::arch::global_asm!(
    ".global ringfence_switch_context",
    "ringfence_switch_context:",
    // save into `from`
    "mov eax, [esp + 4]",
    "mov [eax + 8], ebx",
    "mov [eax + 12], ecx",
    "mov [eax + 16], edx",
    "mov [eax + 20], esi",
    "mov [eax + 24], edi",
    "mov [eax + 28], ebp",
    "mov ecx, [esp]",
    "mov [eax + 0], ecx",
    "lea ecx, [esp + 4]",
    "mov [eax + 4], ecx",
    // restore from `to`
    "mov eax, [esp + 8]",
    "mov ebx, [eax + 8]",
    "mov ecx, [eax + 12]",
    "mov edx, [eax + 16]",
    "mov esi, [eax + 20]",
    "mov edi, [eax + 24]",
    "mov ebp, [eax + 28]",
    "mov esp, [eax + 4]",
    "jmp dword ptr [eax + 0]",
);

#[cfg(target_arch = "x86")]
extern "C" {
    fn ringfence_switch_context(from: *mut Context, to: *const Context);
}

/// Saves the running registers into `frames.from` and resumes `frames.to`.
/// Returns once something switches back to `frames.from`.
///
/// # Safety
/// Interrupts must be disabled, both frames must point into live process
/// slots (or the boot frame) and the TSS must already carry the incoming
/// kernel stack.
#[cfg(target_arch = "x86")]
pub unsafe fn switch_context(frames: SwitchFrames) {
    ringfence_switch_context(frames.from, frames.to);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn new_thread_starts_at_entry() {
        let ctx = Context::new_thread(VirtualAddress::new(0xc000_1000), VirtualAddress::new(0xc010_0000));
        assert_eq!(ctx.eip, 0xc000_1000);
        assert_eq!(ctx.esp, 0xc010_0000);
        assert_eq!(ctx.ebp, 0);
    }
}
