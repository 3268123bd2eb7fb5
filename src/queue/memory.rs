use std::sync::Mutex;

use sysinfo::{Pid, ProcessesToUpdate, System};

/// Reports the resident memory of the current process.
pub trait MemoryProbe: Send + Sync {
    /// Bytes in use, or `None` when the platform does not say.
    fn used_bytes(&self) -> Option<u64>;
}

/// [`MemoryProbe`] backed by `sysinfo`.
pub struct SysinfoProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| tracing::warn!(error = %e, "Cannot determine own pid, memory checks disabled"))
            .ok();
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn used_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock().ok()?;
        if system.refresh_processes(ProcessesToUpdate::Some(&[pid])) == 0 {
            return None;
        }
        system.process(pid).map(|process| process.memory())
    }
}

/// Fixed reading, for tests and for running without a memory ceiling.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedProbe(pub Option<u64>);

impl MemoryProbe for FixedProbe {
    fn used_bytes(&self) -> Option<u64> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysinfo_reports_own_process() {
        let probe = SysinfoProbe::new();
        assert!(probe.used_bytes().is_some_and(|bytes| bytes > 0));
    }

    #[test]
    fn test_sysinfo_tracks_only_own_process() {
        let probe = SysinfoProbe::new();
        assert!(probe.used_bytes().is_some());
        assert!(probe.used_bytes().is_some());

        let system = probe.system.lock().unwrap();
        assert_eq!(system.processes().len(), 1);
    }
}
