use core::fmt;

use super::{pid::Pid, process::ProcessInit, process::State, queue::QueueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    TableFull,
    NoSuchProcess(Pid),
    NoSuchParent(Pid),
    InvalidTransition { pid: Pid, from: State, to: State },
    NotRunnable(Pid),
    AlreadyQueued { pid: Pid, queue: QueueId },
    NotQueued(Pid),
    StillQueued(Pid),
    OnCpu(Pid),
    NotZombie(Pid),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::TableFull => write!(f, "process table is full"),
            ProcessError::NoSuchProcess(pid) => write!(f, "no process with pid {}", pid),
            ProcessError::NoSuchParent(pid) => write!(f, "parent pid {} does not exist", pid),
            ProcessError::InvalidTransition { pid, from, to } => {
                write!(f, "pid {} cannot go from {} to {}", pid, from, to)
            }
            ProcessError::NotRunnable(pid) => write!(f, "pid {} is not runnable", pid),
            ProcessError::AlreadyQueued { pid, queue } => {
                write!(f, "pid {} is already on {}", pid, queue)
            }
            ProcessError::NotQueued(pid) => write!(f, "pid {} is not on that queue", pid),
            ProcessError::StillQueued(pid) => write!(f, "pid {} is still queued", pid),
            ProcessError::OnCpu(pid) => write!(f, "pid {} is on the cpu", pid),
            ProcessError::NotZombie(pid) => write!(f, "pid {} has not exited", pid),
        }
    }
}

/// Failed `ProcessTable::create`; hands the unused `ProcessInit` (and with it
/// the kernel stack) back to the caller.
#[derive(Debug)]
pub struct CreateError {
    pub error: ProcessError,
    pub init: ProcessInit,
}

impl fmt::Display for CreateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot create {:?}: {}", self.init.name, self.error)
    }
}
