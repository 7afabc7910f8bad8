//! Host capability probe supplying tuning defaults.

use sysinfo::System;

pub const MIN_CHUNK_SIZE: u64 = 1024 * 1024; // 1 MiB
pub const MAX_CHUNK_SIZE: u64 = 16 * 1024 * 1024; // 16 MiB
pub const MIN_CONNECTIONS: usize = 4;
pub const MAX_CONNECTIONS: usize = 16;

/// Snapshot of the host resources used to derive download defaults.
///
/// Pure queries after construction; hosts that do not expose a metric
/// fall back to the conservative defaults.
#[derive(Debug, Clone)]
pub struct CapabilityProbe {
    cpu_count: usize,
    available_memory: u64,
}

impl CapabilityProbe {
    pub fn new(cpu_count: usize, available_memory: u64) -> Self {
        Self {
            cpu_count,
            available_memory,
        }
    }

    /// Read CPU count and available memory from the host.
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu();
        Self {
            cpu_count: sys.cpus().len().max(1),
            available_memory: sys.available_memory(),
        }
    }

    /// 1% of available memory, clamped to [1 MiB, 16 MiB].
    pub fn optimal_chunk_size(&self) -> u64 {
        if self.available_memory == 0 {
            return MIN_CHUNK_SIZE;
        }
        (self.available_memory / 100).clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
    }

    /// Twice the CPU count, clamped to [4, 16].
    pub fn optimal_connection_count(&self) -> usize {
        (self.cpu_count * 2).clamp(MIN_CONNECTIONS, MAX_CONNECTIONS)
    }
}

impl Default for CapabilityProbe {
    fn default() -> Self {
        Self::detect()
    }
}
