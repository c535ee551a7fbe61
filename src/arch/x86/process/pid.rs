use core::fmt;

use crate::config::MAX_PID;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct Pid(u32);

impl Pid {
    pub const fn new(pid: u32) -> Self {
        Self(pid)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Next-fit allocation over [0, limit): continues after the last pid handed
// out and wraps around, skipping pids still held by a live process.
#[derive(Debug)]
pub(super) struct PidAllocator {
    next: u32,
    limit: u32,
}

impl PidAllocator {
    pub(super) const fn new() -> Self {
        Self::with_limit(MAX_PID)
    }

    pub(super) const fn with_limit(limit: u32) -> Self {
        Self { next: 0, limit }
    }

    pub(super) fn alloc(&mut self, in_use: impl Fn(Pid) -> bool) -> Option<Pid> {
        let pid = (0..self.limit)
            .map(|step| Pid((self.next + step) % self.limit))
            .find(|pid| !in_use(*pid))?;
        self.next = (pid.0 + 1) % self.limit;
        Some(pid)
    }
}
