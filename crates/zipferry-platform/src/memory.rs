//! Point-in-time memory sampling.

use std::sync::{Arc, Mutex, PoisonError};

use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::error::{Error, Result};

/// Memory usage observed at one instant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MemorySample {
    pub heap_used_bytes: u64,
    pub heap_total_bytes: u64,
    pub usage_percentage: f64,
}

impl MemorySample {
    pub fn new(used: u64, total: u64) -> Self {
        let usage_percentage = if total == 0 {
            0.0
        } else {
            (used as f64 / total as f64) * 100.0
        };
        Self {
            heap_used_bytes: used,
            heap_total_bytes: total,
            usage_percentage,
        }
    }
}

/// Source of memory samples for the circuit breaker.
pub trait MemoryProbe: Send {
    fn sample(&mut self) -> Result<MemorySample>;
}

/// Samples this process's resident memory through `sysinfo`.
///
/// Usage is measured against `budget_bytes` when set (the memory size the
/// process was provisioned with) and against total system memory otherwise.
pub struct SysinfoProbe {
    system: System,
    pid: Pid,
    budget_bytes: Option<u64>,
}

impl SysinfoProbe {
    pub fn new() -> Result<Self> {
        let pid = sysinfo::get_current_pid().map_err(|e| Error::NoPid(e.to_string()))?;
        Ok(Self {
            system: System::new(),
            pid,
            budget_bytes: None,
        })
    }

    pub fn budget_bytes(mut self, bytes: u64) -> Self {
        self.budget_bytes = Some(bytes).filter(|b| *b > 0);
        self
    }
}

impl MemoryProbe for SysinfoProbe {
    fn sample(&mut self) -> Result<MemorySample> {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        let used = self
            .system
            .process(self.pid)
            .map(|p| p.memory())
            .ok_or(Error::ProcessNotFound {
                pid: self.pid.as_u32(),
            })?;

        let total = match self.budget_bytes {
            Some(budget) => budget,
            None => {
                self.system.refresh_memory();
                self.system.total_memory()
            }
        };
        if total == 0 {
            return Err(Error::NoTotalMemory);
        }

        Ok(MemorySample::new(used, total))
    }
}

/// Probe whose reading is set by hand; clones share the same reading.
#[derive(Clone, Debug)]
pub struct ManualProbe {
    sample: Arc<Mutex<MemorySample>>,
    total: u64,
}

impl ManualProbe {
    pub fn new(total: u64) -> Self {
        Self {
            sample: Arc::new(Mutex::new(MemorySample::new(0, total))),
            total,
        }
    }

    pub fn set_usage_percent(&self, percent: f64) {
        let used = (self.total as f64 * percent / 100.0) as u64;
        *self.sample.lock().unwrap_or_else(PoisonError::into_inner) = MemorySample::new(used, self.total);
    }
}

impl MemoryProbe for ManualProbe {
    fn sample(&mut self) -> Result<MemorySample> {
        Ok(*self.sample.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_percentage() {
        let sample = MemorySample::new(50, 200);
        assert_eq!(sample.usage_percentage, 25.0);
    }

    #[test]
    fn sample_zero_total() {
        let sample = MemorySample::new(10, 0);
        assert_eq!(sample.usage_percentage, 0.0);
    }

    #[test]
    fn manual_probe_clones_share_reading() {
        let probe = ManualProbe::new(1000);
        let mut reader = probe.clone();
        probe.set_usage_percent(42.0);
        let sample = reader.sample().unwrap();
        assert_eq!(sample.heap_used_bytes, 420);
        assert_eq!(sample.heap_total_bytes, 1000);
    }

    #[test]
    fn sysinfo_probe_reports_current_process() {
        let mut probe = SysinfoProbe::new().unwrap().budget_bytes(u64::MAX / 2);
        let sample = probe.sample().unwrap();
        assert!(sample.heap_used_bytes > 0);
        assert!(sample.usage_percentage < 1.0);
    }
}
