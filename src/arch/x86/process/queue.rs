use alloc::collections::VecDeque;
use core::fmt;

use super::pid::Pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(pub u16);

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue#{}", self.0)
    }
}

/// FIFO of pids owned by the scheduler. Membership is changed only through
/// `ProcessTable`, which keeps each process's `queue` field in sync.
#[derive(Debug)]
pub struct RunQueue {
    id: QueueId,
    entries: VecDeque<Pid>,
}

impl RunQueue {
    pub fn new(id: QueueId) -> Self {
        Self {
            id,
            entries: VecDeque::new(),
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn peek(&self) -> Option<Pid> {
        self.entries.front().copied()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.entries.contains(&pid)
    }

    pub fn iter(&self) -> impl Iterator<Item = Pid> + '_ {
        self.entries.iter().copied()
    }

    pub(super) fn push_back(&mut self, pid: Pid) {
        self.entries.push_back(pid);
    }

    pub(super) fn pop_front(&mut self) -> Option<Pid> {
        self.entries.pop_front()
    }

    pub(super) fn remove(&mut self, pid: Pid) -> bool {
        match self.entries.iter().position(|queued| *queued == pid) {
            Some(position) => {
                self.entries.remove(position);
                true
            }
            None => false,
        }
    }
}
