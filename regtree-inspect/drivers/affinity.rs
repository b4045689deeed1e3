use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
use nix::unistd::Pid;

use crate::error::{RegtreeError, Result};

/// Pins the calling thread to one CPU until dropped
///
/// CPUID and MSR accesses are only meaningful on the CPU they describe.
pub struct AffinityGuard {
    old_affinity: CpuSet,
}

impl AffinityGuard {
    pub fn new(cpu: u32) -> Result<Self> {
        let old_affinity = sched_getaffinity(Pid::from_raw(0))?;

        let mut pinned = CpuSet::new();
        pinned.set(cpu as usize).map_err(|e| {
            RegtreeError::Args(format!("CPU {cpu} cannot be pinned: {e}"))
        })?;
        sched_setaffinity(Pid::from_raw(0), &pinned)?;
        tracing::trace!("Pinned thread to CPU {}", cpu);

        Ok(Self { old_affinity })
    }
}

impl Drop for AffinityGuard {
    fn drop(&mut self) {
        let _ = sched_setaffinity(Pid::from_raw(0), &self.old_affinity);
    }
}
