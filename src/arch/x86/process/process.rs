use bitflags::bitflags;
use core::fmt;

use super::{context::Context, pid::Pid, queue::QueueId};
use crate::{
    config::PROCESS_NAME_LEN,
    mem::{PhysicalAddress, VirtualAddress},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum State {
    Uninit = 0,
    Sleeping = 1,
    // runnable, possibly running
    Runnable = 2,
    // terminated, waiting for the parent to reclaim the slot
    Zombie = 3,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Uninit => "uninit",
            State::Sleeping => "sleeping",
            State::Runnable => "runnable",
            State::Zombie => "zombie",
        };
        f.write_str(name)
    }
}

bitflags! {
    pub struct ProcessFlags: u32 {
        const KERNEL_THREAD = 1 << 0;
        const EXITING       = 1 << 1;
    }
}

/// Process name, cut to `PROCESS_NAME_LEN` bytes on a char boundary.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ProcessName {
    bytes: [u8; PROCESS_NAME_LEN],
    len: u8,
}

impl ProcessName {
    pub fn new(name: &str) -> Self {
        let mut len = name.len().min(PROCESS_NAME_LEN);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        let mut bytes = [0; PROCESS_NAME_LEN];
        bytes[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }

    pub fn as_str(&self) -> &str {
        // always built from a &str cut on a char boundary
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or_default()
    }
}

impl fmt::Debug for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A kernel stack region owned by one process. Not `Clone`: exactly one
/// process holds it, and it is handed back when the slot is reclaimed.
#[derive(Debug, PartialEq, Eq)]
pub struct KernelStack {
    base: VirtualAddress,
    size: u32,
}

impl KernelStack {
    pub const ALIGN: u32 = 16;

    /// Takes ownership of `[base, base + size)`.
    pub fn new(base: VirtualAddress, size: u32) -> Self {
        crate::invariant!(!base.is_null(), "kernel stack at address 0");
        crate::invariant!(size >= Self::ALIGN, "kernel stack of {} bytes", size);
        // the top must be a representable, non-null address
        crate::invariant!(
            base.to_inner().checked_add(size).is_some(),
            "kernel stack {:#x}+{:#x} runs past the address space",
            base,
            size
        );
        Self { base, size }
    }

    pub fn base(&self) -> VirtualAddress {
        self.base
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Highest usable address; the stack grows down from here.
    pub fn top(&self) -> VirtualAddress {
        self.base.wrapping_offset(self.size).align_down(Self::ALIGN)
    }

    pub fn into_raw(self) -> (VirtualAddress, u32) {
        (self.base, self.size)
    }
}

/// What the process-creation collaborator supplies for a new process.
#[derive(Debug)]
pub struct ProcessInit {
    pub name: ProcessName,
    pub stack: KernelStack,
    pub cr3: PhysicalAddress,
    pub parent: Option<Pid>,
    pub flags: ProcessFlags,
    pub context: Context,
}

impl ProcessInit {
    pub fn new(name: &str, stack: KernelStack, cr3: PhysicalAddress) -> Self {
        Self {
            name: ProcessName::new(name),
            stack,
            cr3,
            parent: None,
            flags: ProcessFlags::empty(),
            context: Context::default(),
        }
    }

    pub fn parent(mut self, parent: Pid) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn flags(mut self, flags: ProcessFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }
}

/// Process control block.
#[derive(Debug)]
pub struct Process {
    pub(super) state: State,
    pub(super) pid: Pid,
    pub(super) stack: KernelStack,
    pub(super) runs: u32,
    pub(super) need_resched: bool,
    // address space handle; the page tables belong to the address-space manager
    pub(super) cr3: PhysicalAddress,
    pub(super) context: Context,
    pub(super) parent: Option<Pid>,
    pub(super) real_parent: Option<Pid>,
    pub(super) flags: ProcessFlags,
    pub(super) name: ProcessName,
    pub(super) queue: Option<QueueId>,
    pub(super) on_cpu: bool,
}

impl Process {
    pub(super) fn new(pid: Pid, init: ProcessInit) -> Self {
        Self {
            state: State::Uninit,
            pid,
            stack: init.stack,
            runs: 0,
            need_resched: false,
            cr3: init.cr3,
            context: init.context,
            parent: init.parent,
            real_parent: init.parent,
            flags: init.flags,
            name: init.name,
            queue: None,
            on_cpu: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn kernel_stack(&self) -> &KernelStack {
        &self.stack
    }

    pub fn runs(&self) -> u32 {
        self.runs
    }

    pub fn need_resched(&self) -> bool {
        self.need_resched
    }

    pub fn cr3(&self) -> PhysicalAddress {
        self.cr3
    }

    /// Saved registers; `None` while the process is on the CPU, where the
    /// live registers are the only truth.
    pub fn context(&self) -> Option<&Context> {
        if self.on_cpu {
            None
        } else {
            Some(&self.context)
        }
    }

    pub fn parent(&self) -> Option<Pid> {
        self.parent
    }

    pub fn real_parent(&self) -> Option<Pid> {
        self.real_parent
    }

    pub fn flags(&self) -> ProcessFlags {
        self.flags
    }

    pub fn name(&self) -> &ProcessName {
        &self.name
    }

    pub fn queue(&self) -> Option<QueueId> {
        self.queue
    }

    pub fn is_queued(&self) -> bool {
        self.queue.is_some()
    }

    pub fn is_on_cpu(&self) -> bool {
        self.on_cpu
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn name_is_truncated_on_char_boundary() {
        assert_eq!(ProcessName::new("init").as_str(), "init");
        assert_eq!(ProcessName::new("a-very-long-process-name").as_str(), "a-very-long-pro");
        // 'é' is two bytes and would straddle byte 15
        let name = ProcessName::new("abcdefghijklmné");
        assert_eq!(name.as_str(), "abcdefghijklmn");
    }

    #[test]
    fn stack_top_is_aligned() {
        let stack = KernelStack::new(VirtualAddress::new(0xc020_0004), 0x2000);
        assert_eq!(stack.top(), VirtualAddress::new(0xc020_2000));
        assert_eq!(stack.into_raw(), (VirtualAddress::new(0xc020_0004), 0x2000));
    }

    #[test]
    fn stack_ending_just_below_four_gib() {
        let stack = KernelStack::new(VirtualAddress::new(0xffff_dff0), 0x2000);
        assert_eq!(stack.top(), VirtualAddress::new(0xffff_fff0));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "invariant violated")]
    fn stack_reaching_four_gib_is_rejected() {
        KernelStack::new(VirtualAddress::new(0xffff_e000), 0x2000);
    }

    #[test]
    fn fresh_process_is_uninit() {
        let init = ProcessInit::new("kworker", KernelStack::new(VirtualAddress::new(0x1000), 0x1000), PhysicalAddress::new(0x9000))
            .parent(Pid::new(0))
            .flags(ProcessFlags::KERNEL_THREAD);
        let process = Process::new(Pid::new(3), init);
        assert_eq!(process.state(), State::Uninit);
        assert_eq!(process.parent(), Some(Pid::new(0)));
        assert_eq!(process.real_parent(), Some(Pid::new(0)));
        assert_eq!(process.runs(), 0);
        assert!(!process.need_resched());
        assert!(process.context().is_some());
        assert!(process.flags().contains(ProcessFlags::KERNEL_THREAD));
        assert_eq!(process.name().to_string(), "kworker");
    }
}
