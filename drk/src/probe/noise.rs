//! Frequency-scaling noise suppression
//!
//! Timing differences between page states are a few dozen cycles, so the
//! cores must not change clock while probing. A handful of busy-loop
//! processes, pinned to the cores the probes do not use, keep the package at full speed.
//!
//! The workers are owned by a [`NoiseGuard`]. Dropping the guard, or calling
//! [`NoiseGuard::stop`], kills and reaps every worker, so they never outlive
//! the run no matter where the pipeline fails.

use crate::domain::{CpuId, DrkError};
use log::{debug, info, warn};
use std::path::Path;
use std::process::{Child, Command, Stdio};

/// Handle owning the running busy-loop workers
#[derive(Debug, Default)]
pub struct NoiseGuard {
    workers: Vec<Child>,
}

/// Core for each of `count` workers: worker `i` gets `cpus[i % cpus.len()]`.
///
/// `cpus` must already exclude the probing core. An empty slice leaves every
/// worker unpinned.
#[must_use]
pub fn worker_assignment(count: usize, cpus: &[CpuId]) -> Vec<Option<CpuId>> {
    (0..count).map(|i| (!cpus.is_empty()).then(|| cpus[i % cpus.len()])).collect()
}

impl NoiseGuard {
    /// Start `count` copies of `binary` on the cores of [`worker_assignment`].
    ///
    /// If any spawn fails, the workers already started are torn down before
    /// the error is returned.
    pub fn start(binary: &Path, count: usize, cpus: &[CpuId]) -> Result<Self, DrkError> {
        let mut guard = NoiseGuard::default();
        if count == 0 {
            return Ok(guard);
        }
        if !binary.is_file() {
            return Err(DrkError::BinaryNotFound(binary.to_path_buf()));
        }
        if cpus.is_empty() {
            warn!("No cores known besides the probing one, busy loops run unpinned");
        }

        for cpu in worker_assignment(count, cpus) {
            let mut cmd = match cpu {
                Some(cpu) => {
                    let mut cmd = Command::new("taskset");
                    cmd.arg("-c").arg(cpu.0.to_string()).arg(binary);
                    cmd
                }
                None => Command::new(binary),
            };
            let spawned =
                cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null()).spawn();
            let child = spawned.map_err(|e| DrkError::SpawnFailed {
                program: format!("{cmd:?}"),
                error: e.to_string(),
            })?;
            match cpu {
                Some(cpu) => debug!("busy loop pid {} on {cpu}", child.id()),
                None => debug!("busy loop pid {} unpinned", child.id()),
            }
            guard.workers.push(child);
        }

        info!("Started {count} busy-loop workers");
        Ok(guard)
    }

    /// Number of workers still owned by the guard
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Kill and reap every worker. Calling it again is a no-op.
    pub fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        let count = self.workers.len();
        for mut child in self.workers.drain(..) {
            // The worker may already be gone; kill reports that as an error
            if let Err(e) = child.kill() {
                debug!("busy loop pid {} already exited: {e}", child.id());
            }
            if let Err(e) = child.wait() {
                warn!("Failed to reap busy loop pid {}: {e}", child.id());
            }
        }
        info!("Stopped {count} busy-loop workers");
    }
}

impl Drop for NoiseGuard {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RegionKind;

    /// `yes` spins until killed, like the real busy loop
    fn busy_binary() -> Option<&'static Path> {
        ["/usr/bin/yes", "/bin/yes"].into_iter().map(Path::new).find(|p| p.is_file())
    }

    fn is_alive(pid: u32) -> bool {
        Path::new(&format!("/proc/{pid}")).exists()
    }

    #[test]
    fn test_zero_workers() {
        let mut guard = NoiseGuard::start(Path::new("/nonexistent/loop"), 0, &[]).unwrap();
        assert!(guard.is_empty());
        guard.stop();
        guard.stop();
    }

    #[test]
    fn test_missing_binary() {
        let err = NoiseGuard::start(Path::new("/nonexistent/loop"), 2, &[CpuId(0)]).unwrap_err();
        assert!(matches!(err, DrkError::BinaryNotFound(_)));
    }

    #[test]
    fn test_worker_assignment_wraps_over_given_cores() {
        let cpus = [CpuId(0), CpuId(1), CpuId(2)];
        let assigned = worker_assignment(5, &cpus);
        assert_eq!(
            assigned,
            vec![Some(CpuId(0)), Some(CpuId(1)), Some(CpuId(2)), Some(CpuId(0)), Some(CpuId(1))]
        );
        assert!(worker_assignment(0, &cpus).is_empty());
    }

    #[test]
    fn test_worker_assignment_never_uses_probe_core() {
        let online: Vec<CpuId> = (0..8).map(CpuId).collect();
        let cpus = crate::probe::cpu_utils::worker_cpus(&online, Some(3));
        let assigned = worker_assignment(16, &cpus);
        assert_eq!(assigned.len(), 16);
        assert!(assigned.iter().all(|cpu| cpu.is_some() && *cpu != Some(CpuId(3))));
    }

    #[test]
    fn test_worker_assignment_without_cores_is_unpinned() {
        assert_eq!(worker_assignment(2, &[]), vec![None, None]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_stop_kills_workers() {
        let Some(binary) = busy_binary() else { return };

        let mut guard = NoiseGuard::start(binary, 2, &[]).unwrap();
        let pids: Vec<u32> = guard.workers.iter().map(Child::id).collect();
        assert_eq!(guard.len(), 2);
        assert!(pids.iter().all(|&pid| is_alive(pid)));

        guard.stop();
        assert!(guard.is_empty());
        assert!(pids.iter().all(|&pid| !is_alive(pid)));
        // idempotent teardown
        guard.stop();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_workers_killed_when_run_fails() {
        fn failing_run(binary: &Path, pids: &mut Vec<u32>) -> Result<(), DrkError> {
            let guard = NoiseGuard::start(binary, 2, &[])?;
            pids.extend(guard.workers.iter().map(Child::id));
            assert!(pids.iter().all(|&pid| is_alive(pid)));
            Err(DrkError::RegionNotFound(RegionKind::Kernel))
        }

        let Some(binary) = busy_binary() else { return };

        let mut pids = Vec::new();
        let err = failing_run(binary, &mut pids).unwrap_err();
        assert!(matches!(err, DrkError::RegionNotFound(RegionKind::Kernel)));
        assert_eq!(pids.len(), 2);
        assert!(pids.iter().all(|&pid| !is_alive(pid)));
    }
}
