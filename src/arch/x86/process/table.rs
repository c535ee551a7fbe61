use alloc::{boxed::Box, vec::Vec};
use hashbrown::HashMap;
use log::trace;

use super::{
    context::{Context, SwitchFrames},
    error::{CreateError, ProcessError},
    pid::{Pid, PidAllocator},
    process::{KernelStack, Process, ProcessFlags, ProcessInit, State},
    queue::RunQueue,
};
use crate::{arch::x86::gdt::TaskStateSegment, config::MAX_PROCESS};

/// Fixed-capacity arena of process control blocks.
///
/// Parent links are pids resolved through the table, so a reclaimed process
/// is simply absent rather than dangling. Every mutation must happen with
/// preemption disabled; the kernel keeps its table behind a `SpinLockIrq`.
#[derive(Debug)]
pub struct ProcessTable {
    slots: Box<[Option<Process>]>,
    by_pid: HashMap<Pid, usize>,
    pids: PidAllocator,
    current: Option<Pid>,
    // adopts orphans; the first process created without a parent
    reaper: Option<Pid>,
    // registers of whatever ran before the first switch
    boot_context: Box<Context>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::with_capacity(MAX_PROCESS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let slots: Vec<Option<Process>> = core::iter::repeat_with(|| None).take(capacity).collect();
        Self {
            slots: slots.into_boxed_slice(),
            by_pid: HashMap::new(),
            pids: PidAllocator::new(),
            current: None,
            reaper: None,
            boot_context: Box::new(Context::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.by_pid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pid.is_empty()
    }

    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.by_pid.get(&pid).and_then(|&slot| self.slots[slot].as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> + '_ {
        self.slots.iter().flatten()
    }

    pub fn children(&self, parent: Pid) -> impl Iterator<Item = Pid> + '_ {
        self.iter()
            .filter(move |process| process.parent == Some(parent))
            .map(|process| process.pid)
    }

    pub fn parent_of(&self, pid: Pid) -> Option<&Process> {
        self.get(pid)?.parent.and_then(|parent| self.get(parent))
    }

    pub fn real_parent_of(&self, pid: Pid) -> Option<&Process> {
        self.get(pid)?.real_parent.and_then(|parent| self.get(parent))
    }

    pub fn current(&self) -> Option<Pid> {
        self.current
    }

    pub fn reaper(&self) -> Option<Pid> {
        self.reaper
    }

    fn slot_of(&self, pid: Pid) -> Result<usize, ProcessError> {
        self.by_pid
            .get(&pid)
            .copied()
            .ok_or(ProcessError::NoSuchProcess(pid))
    }

    fn process_mut(&mut self, pid: Pid) -> Result<&mut Process, ProcessError> {
        let slot = self.slot_of(pid)?;
        self.slots[slot]
            .as_mut()
            .ok_or(ProcessError::NoSuchProcess(pid))
    }

    /// Registers a new process in `State::Uninit`.
    pub fn create(&mut self, init: ProcessInit) -> Result<Pid, CreateError> {
        if let Some(parent) = init.parent {
            // a zombie has already given its children away and cannot adopt more
            let alive = self
                .get(parent)
                .map_or(false, |process| process.state != State::Zombie);
            if !alive {
                return Err(CreateError {
                    error: ProcessError::NoSuchParent(parent),
                    init,
                });
            }
        }

        let Some(slot) = self.slots.iter().position(Option::is_none) else {
            return Err(CreateError {
                error: ProcessError::TableFull,
                init,
            });
        };
        let by_pid = &self.by_pid;
        let Some(pid) = self.pids.alloc(|pid| by_pid.contains_key(&pid)) else {
            return Err(CreateError {
                error: ProcessError::TableFull,
                init,
            });
        };

        if init.parent.is_none() && self.reaper.is_none() {
            self.reaper = Some(pid);
        }
        trace!("created pid {} ({}) in slot {}", pid, init.name, slot);
        self.slots[slot] = Some(Process::new(pid, init));
        self.by_pid.insert(pid, slot);
        Ok(pid)
    }

    fn transition(&mut self, pid: Pid, allowed: &[State], to: State) -> Result<(), ProcessError> {
        let process = self.process_mut(pid)?;
        let from = process.state;
        if !allowed.contains(&from) {
            return Err(ProcessError::InvalidTransition { pid, from, to });
        }
        process.state = to;
        trace!("pid {}: {} -> {}", pid, from, to);
        Ok(())
    }

    /// Uninit -> Runnable after initialisation, Sleeping -> Runnable on wake-up.
    pub fn mark_runnable(&mut self, pid: Pid) -> Result<(), ProcessError> {
        self.transition(pid, &[State::Uninit, State::Sleeping], State::Runnable)
    }

    pub fn sleep(&mut self, pid: Pid) -> Result<(), ProcessError> {
        self.transition(pid, &[State::Runnable], State::Sleeping)
    }

    /// Turns `pid` into a zombie and hands its children to the reaper.
    /// `real_parent` links are left alone.
    pub fn exit(&mut self, pid: Pid) -> Result<(), ProcessError> {
        self.transition(pid, &[State::Runnable, State::Sleeping], State::Zombie)?;
        self.process_mut(pid)?.flags.insert(ProcessFlags::EXITING);

        let heir = self.reaper.filter(|reaper| *reaper != pid);
        for child in self
            .slots
            .iter_mut()
            .flatten()
            .filter(|process| process.parent == Some(pid))
        {
            trace!("pid {} reparented to {:?}", child.pid, heir);
            child.parent = heir;
        }
        Ok(())
    }

    /// Frees the slot of a zombie and returns its kernel stack.
    pub fn reclaim(&mut self, pid: Pid) -> Result<KernelStack, ProcessError> {
        let slot = self.slot_of(pid)?;
        match self.slots[slot].as_ref() {
            None => return Err(ProcessError::NoSuchProcess(pid)),
            Some(process) if process.state != State::Zombie => {
                return Err(ProcessError::NotZombie(pid))
            }
            Some(process) if process.on_cpu => return Err(ProcessError::OnCpu(pid)),
            Some(process) if process.queue.is_some() => {
                return Err(ProcessError::StillQueued(pid))
            }
            Some(_) => {}
        }

        let process = self.slots[slot]
            .take()
            .ok_or(ProcessError::NoSuchProcess(pid))?;
        self.by_pid.remove(&pid);
        if self.reaper == Some(pid) {
            self.reaper = None;
        }
        // the pid may be handed out again: drop links that would alias it and
        // give any remaining children to the reaper
        let heir = self.reaper;
        for other in self.slots.iter_mut().flatten() {
            if other.real_parent == Some(pid) {
                other.real_parent = None;
            }
            if other.parent == Some(pid) {
                other.parent = heir;
            }
        }
        trace!("reclaimed pid {} ({}), slot {} free", pid, process.name, slot);
        Ok(process.stack)
    }

    /// Reclaims one zombie child of `parent`, if there is one.
    pub fn reap_child(&mut self, parent: Pid) -> Result<Option<(Pid, KernelStack)>, ProcessError> {
        self.slot_of(parent)?;
        let zombie = self
            .iter()
            .find(|process| {
                process.parent == Some(parent)
                    && process.state == State::Zombie
                    && !process.on_cpu
                    && process.queue.is_none()
            })
            .map(|process| process.pid);

        match zombie {
            Some(pid) => Ok(Some((pid, self.reclaim(pid)?))),
            None => Ok(None),
        }
    }

    pub fn request_resched(&mut self, pid: Pid) -> Result<(), ProcessError> {
        self.process_mut(pid)?.need_resched = true;
        Ok(())
    }

    /// Flags the running process, if any. Returns whether one was flagged.
    pub fn request_resched_current(&mut self) -> bool {
        match self.current {
            Some(pid) => self.request_resched(pid).is_ok(),
            None => false,
        }
    }

    /// Overwrites the saved registers of a process that is off the CPU.
    pub fn save_context(&mut self, pid: Pid, context: Context) -> Result<(), ProcessError> {
        let process = self.process_mut(pid)?;
        if process.on_cpu {
            return Err(ProcessError::OnCpu(pid));
        }
        process.context = context;
        Ok(())
    }

    pub fn enqueue(&mut self, pid: Pid, queue: &mut RunQueue) -> Result<(), ProcessError> {
        let process = self.process_mut(pid)?;
        if let Some(current) = process.queue {
            return Err(ProcessError::AlreadyQueued {
                pid,
                queue: current,
            });
        }
        process.queue = Some(queue.id());
        queue.push_back(pid);
        Ok(())
    }

    pub fn dequeue(&mut self, queue: &mut RunQueue) -> Option<Pid> {
        while let Some(pid) = queue.pop_front() {
            if let Ok(process) = self.process_mut(pid) {
                process.queue = None;
                return Some(pid);
            }
        }
        None
    }

    pub fn remove_from_queue(&mut self, pid: Pid, queue: &mut RunQueue) -> Result<(), ProcessError> {
        let process = self.process_mut(pid)?;
        if process.queue != Some(queue.id()) || !queue.remove(pid) {
            return Err(ProcessError::NotQueued(pid));
        }
        process.queue = None;
        Ok(())
    }

    /// Makes `next` the current process: the outgoing one gives up the CPU
    /// and its `need_resched` is cleared, `next.runs` is bumped and the TSS
    /// is pointed at `next`'s kernel stack.
    ///
    /// Returns the frames for `switch_context`, or `None` when `next` is
    /// already current.
    pub fn prepare_switch(
        &mut self,
        next: Pid,
        tss: &mut TaskStateSegment,
    ) -> Result<Option<SwitchFrames>, ProcessError> {
        let next_slot = self.slot_of(next)?;
        match self.slots[next_slot].as_mut() {
            None => return Err(ProcessError::NoSuchProcess(next)),
            Some(process) if process.state != State::Runnable => {
                return Err(ProcessError::NotRunnable(next))
            }
            Some(process) if self.current == Some(next) => {
                process.need_resched = false;
                return Ok(None);
            }
            Some(_) => {}
        }

        let prev = self.current;
        let prev_process = match prev.and_then(|pid| self.by_pid.get(&pid).copied()) {
            Some(slot) => self.slots[slot].as_mut(),
            None => None,
        };
        let from: *mut Context = match prev_process {
            Some(process) => {
                process.on_cpu = false;
                process.need_resched = false;
                &mut process.context
            }
            None => &mut *self.boot_context,
        };

        let Some(process) = self.slots[next_slot].as_mut() else {
            return Err(ProcessError::NoSuchProcess(next));
        };
        process.on_cpu = true;
        process.runs = process.runs.wrapping_add(1);
        tss.update_kernel_stack(process.stack.top());
        let to: *const Context = &process.context;
        self.current = Some(next);

        trace!("switch {:?} -> {}", prev, next);
        Ok(Some(SwitchFrames { from, to }))
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        arch::x86::{
            gdt::{DescriptorTable, KERNEL_DATA_SELECTOR},
            process::QueueId,
        },
        config::TSS_INDEX,
        mem::{PhysicalAddress, VirtualAddress},
    };

    fn stack(n: u32) -> KernelStack {
        KernelStack::new(VirtualAddress::new(0xc100_0000 + n * 0x2000), 0x2000)
    }

    fn spawn(table: &mut ProcessTable, name: &str, parent: Option<Pid>) -> Pid {
        let n = table.len() as u32;
        let mut init = ProcessInit::new(name, stack(n), PhysicalAddress::new(0x0009_c000));
        if let Some(parent) = parent {
            init = init.parent(parent);
        }
        let pid = table.create(init).expect("free slot");
        table.mark_runnable(pid).expect("fresh process");
        pid
    }

    fn tss() -> TaskStateSegment {
        let mut table = DescriptorTable::new();
        let mut tss = TaskStateSegment::new();
        tss.install(&mut table, TSS_INDEX, KERNEL_DATA_SELECTOR, VirtualAddress::new(0x0010_0000));
        tss
    }

    #[test]
    fn lifecycle_uninit_to_reclaimed() {
        let mut table = ProcessTable::with_capacity(4);
        let init = spawn(&mut table, "init", None);
        let pid = table
            .create(ProcessInit::new("worker", stack(1), PhysicalAddress::new(0x1000)).parent(init))
            .expect("free slot");
        assert_eq!(table.get(pid).map(Process::state), Some(State::Uninit));

        table.mark_runnable(pid).unwrap();
        table.sleep(pid).unwrap();
        table.mark_runnable(pid).unwrap();
        table.exit(pid).unwrap();
        assert_eq!(table.get(pid).map(Process::state), Some(State::Zombie));
        assert!(table.get(pid).unwrap().flags().contains(ProcessFlags::EXITING));

        let (reaped, stack) = table.reap_child(init).unwrap().expect("zombie child");
        assert_eq!(reaped, pid);
        assert_eq!(stack.base(), VirtualAddress::new(0xc100_2000));
        assert!(table.get(pid).is_none());
        assert_eq!(table.reap_child(init), Ok(None));
    }

    #[test]
    fn illegal_transitions() {
        let mut table = ProcessTable::with_capacity(2);
        let pid = table
            .create(ProcessInit::new("p", stack(0), PhysicalAddress::new(0)))
            .unwrap();
        assert_eq!(
            table.sleep(pid),
            Err(ProcessError::InvalidTransition {
                pid,
                from: State::Uninit,
                to: State::Sleeping
            })
        );
        assert_eq!(table.reclaim(pid), Err(ProcessError::NotZombie(pid)));
        table.mark_runnable(pid).unwrap();
        table.exit(pid).unwrap();
        assert!(matches!(
            table.mark_runnable(pid),
            Err(ProcessError::InvalidTransition { from: State::Zombie, .. })
        ));
        assert_eq!(table.exit(Pid::new(77)), Err(ProcessError::NoSuchProcess(Pid::new(77))));
    }

    #[test]
    fn full_table_returns_the_stack() {
        let mut table = ProcessTable::with_capacity(1);
        spawn(&mut table, "only", None);
        let err = table
            .create(ProcessInit::new("extra", stack(9), PhysicalAddress::new(0)))
            .unwrap_err();
        assert_eq!(err.error, ProcessError::TableFull);
        assert_eq!(err.init.stack, stack(9));
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let mut table = ProcessTable::with_capacity(2);
        let err = table
            .create(ProcessInit::new("orphan", stack(0), PhysicalAddress::new(0)).parent(Pid::new(5)))
            .unwrap_err();
        assert_eq!(err.error, ProcessError::NoSuchParent(Pid::new(5)));
        assert!(table.is_empty());
    }

    #[test]
    fn pids_unique_and_reused_after_reclaim() {
        let mut table = ProcessTable::with_capacity(3);
        let a = spawn(&mut table, "a", None);
        let b = spawn(&mut table, "b", Some(a));
        assert_ne!(a, b);
        table.exit(b).unwrap();
        table.reclaim(b).unwrap();
        let c = spawn(&mut table, "c", Some(a));
        assert_ne!(c, a);
        assert!(c.as_u32() < crate::config::MAX_PID);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn exit_reparents_to_reaper_but_keeps_real_parent() {
        let mut table = ProcessTable::with_capacity(4);
        let init = spawn(&mut table, "init", None);
        let shell = spawn(&mut table, "shell", Some(init));
        let job = spawn(&mut table, "job", Some(shell));

        table.exit(shell).unwrap();
        assert_eq!(table.get(job).unwrap().parent(), Some(init));
        assert_eq!(table.get(job).unwrap().real_parent(), Some(shell));
        assert_eq!(table.real_parent_of(job).map(Process::pid), Some(shell));
        assert_eq!(table.children(init).collect::<Vec<_>>().len(), 2);

        // once the zombie is gone the weak link resolves to nothing
        table.reclaim(shell).unwrap();
        assert_eq!(table.get(job).unwrap().real_parent(), None);
        assert_eq!(table.parent_of(job).map(Process::pid), Some(init));
    }

    #[test]
    fn exited_process_cannot_adopt() {
        let mut table = ProcessTable::with_capacity(4);
        let init = spawn(&mut table, "init", None);
        let shell = spawn(&mut table, "shell", Some(init));
        table.exit(shell).unwrap();

        let err = table
            .create(ProcessInit::new("late", stack(7), PhysicalAddress::new(0)).parent(shell))
            .unwrap_err();
        assert_eq!(err.error, ProcessError::NoSuchParent(shell));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn reclaim_hands_leftover_children_to_reaper() {
        let mut table = ProcessTable::with_capacity(4);
        let init = spawn(&mut table, "init", None);
        let shell = spawn(&mut table, "shell", Some(init));
        let job = spawn(&mut table, "job", Some(shell));
        table.exit(shell).unwrap();
        // a child still pointing at the zombie, e.g. set up before the exit
        table.process_mut(job).unwrap().parent = Some(shell);

        table.reclaim(shell).unwrap();
        assert_eq!(table.get(job).unwrap().parent(), Some(init));

        table.exit(job).unwrap();
        assert_eq!(table.reap_child(init).unwrap().map(|(pid, _)| pid), Some(job));
    }

    #[test]
    fn switch_to_stack_at_top_of_address_space() {
        let mut table = ProcessTable::with_capacity(2);
        let mut tss = tss();
        let high = KernelStack::new(VirtualAddress::new(0xffff_dff0), 0x2000);
        let pid = table
            .create(ProcessInit::new("high", high, PhysicalAddress::new(0)))
            .unwrap();
        table.mark_runnable(pid).unwrap();
        table.prepare_switch(pid, &mut tss).unwrap();
        assert_eq!(tss.esp0, 0xffff_fff0);
    }

    #[test]
    fn queue_membership_is_exclusive() {
        let mut table = ProcessTable::with_capacity(4);
        let a = spawn(&mut table, "a", None);
        let b = spawn(&mut table, "b", None);
        let mut ready = RunQueue::new(QueueId(0));
        let mut waiting = RunQueue::new(QueueId(1));

        table.enqueue(a, &mut ready).unwrap();
        table.enqueue(b, &mut ready).unwrap();
        assert_eq!(
            table.enqueue(a, &mut waiting),
            Err(ProcessError::AlreadyQueued {
                pid: a,
                queue: QueueId(0)
            })
        );
        assert_eq!(table.get(a).unwrap().queue(), Some(QueueId(0)));
        assert_eq!(table.remove_from_queue(a, &mut waiting), Err(ProcessError::NotQueued(a)));

        assert_eq!(table.dequeue(&mut ready), Some(a));
        assert!(!table.get(a).unwrap().is_queued());
        table.enqueue(a, &mut waiting).unwrap();
        table.remove_from_queue(a, &mut waiting).unwrap();
        assert!(waiting.is_empty());
        assert_eq!(ready.iter().collect::<Vec<_>>(), [b]);
    }

    #[test]
    fn queued_zombie_is_not_reclaimed() {
        let mut table = ProcessTable::with_capacity(2);
        let a = spawn(&mut table, "a", None);
        let mut ready = RunQueue::new(QueueId(0));
        table.enqueue(a, &mut ready).unwrap();
        table.exit(a).unwrap();
        assert_eq!(table.reclaim(a), Err(ProcessError::StillQueued(a)));
        assert_eq!(table.dequeue(&mut ready), Some(a));
        assert!(table.reclaim(a).is_ok());
    }

    #[test]
    fn switch_updates_tss_and_hides_running_context() {
        let mut table = ProcessTable::with_capacity(4);
        let mut tss = tss();
        let a = spawn(&mut table, "a", None);
        let b = spawn(&mut table, "b", None);
        let b_top = table.get(b).unwrap().kernel_stack().top();

        let frames = table.prepare_switch(a, &mut tss).unwrap().expect("switch");
        assert_eq!(table.current(), Some(a));
        assert!(table.get(a).unwrap().context().is_none());
        assert_eq!(table.save_context(a, Context::default()), Err(ProcessError::OnCpu(a)));
        assert!(core::ptr::eq(frames.to(), &table.get(a).unwrap().context));

        table.request_resched_current();
        assert!(table.get(a).unwrap().need_resched());

        let before = tss;
        let frames = table.prepare_switch(b, &mut tss).unwrap().expect("switch");
        assert_eq!(tss.esp0, b_top.to_inner());
        assert_eq!(TaskStateSegment { esp0: before.esp0, ..tss }, before);
        assert!(!table.get(a).unwrap().need_resched());
        assert!(table.get(a).unwrap().context().is_some());
        assert!(table.get(b).unwrap().context().is_none());
        assert_eq!(table.get(b).unwrap().runs(), 1);
        assert!(core::ptr::eq(frames.from() as *const Context, table.get(a).unwrap().context().unwrap()));
    }

    #[test]
    fn switch_to_current_only_clears_resched() {
        let mut table = ProcessTable::with_capacity(2);
        let mut tss = tss();
        let a = spawn(&mut table, "a", None);
        table.prepare_switch(a, &mut tss).unwrap();
        table.request_resched(a).unwrap();
        assert_eq!(table.prepare_switch(a, &mut tss), Ok(None));
        assert!(!table.get(a).unwrap().need_resched());
        assert_eq!(table.get(a).unwrap().runs(), 1);
    }

    #[test]
    fn sleeping_process_cannot_be_switched_to() {
        let mut table = ProcessTable::with_capacity(2);
        let mut tss = tss();
        let a = spawn(&mut table, "a", None);
        table.sleep(a).unwrap();
        assert_eq!(table.prepare_switch(a, &mut tss), Err(ProcessError::NotRunnable(a)));
        assert_eq!(tss.esp0, 0x0010_0000);
    }

    #[test]
    fn running_zombie_is_reclaimed_after_switch_away() {
        let mut table = ProcessTable::with_capacity(3);
        let mut tss = tss();
        let init = spawn(&mut table, "init", None);
        let child = spawn(&mut table, "child", Some(init));
        table.prepare_switch(child, &mut tss).unwrap();
        table.exit(child).unwrap();
        assert_eq!(table.reclaim(child), Err(ProcessError::OnCpu(child)));
        assert_eq!(table.reap_child(init), Ok(None));

        table.prepare_switch(init, &mut tss).unwrap();
        assert_eq!(table.reap_child(init).unwrap().map(|(pid, _)| pid), Some(child));
    }
}
