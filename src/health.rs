//! Local Health Capture
//!
//! Once per processing cycle the controller captures a numeric snapshot of
//! the local system. The controller only depends on the [`HealthSampler`]
//! seam; how samples are stored or rolled up is outside this crate.

use sysinfo::System;

/// One numeric snapshot of the local system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthSample {
    /// Tick the sample was captured at
    pub tick: u64,
    /// Aggregate CPU utilization, 0.0..=100.0
    pub cpu_percent: f32,
    /// Used physical memory in bytes
    pub memory_used: u64,
    /// Total physical memory in bytes
    pub memory_total: u64,
    /// One-minute load average
    pub load_avg: f64,
}

/// Collaborator seam for local health capture.
pub trait HealthSampler: Send {
    /// Capture a snapshot of the local system at the given tick.
    fn capture(&mut self, tick: u64) -> HealthSample;
}

/// Health sampler backed by the host system.
pub struct SystemHealth {
    sys: System,
}

impl SystemHealth {
    /// Create a sampler for the local host
    pub fn new() -> Self {
        Self { sys: System::new() }
    }
}

impl Default for SystemHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthSampler for SystemHealth {
    fn capture(&mut self, tick: u64) -> HealthSample {
        self.sys.refresh_cpu();
        self.sys.refresh_memory();

        HealthSample {
            tick,
            cpu_percent: self.sys.global_cpu_info().cpu_usage(),
            memory_used: self.sys.used_memory(),
            memory_total: self.sys.total_memory(),
            load_avg: System::load_average().one,
        }
    }
}

/// Sampler that reports nothing. Used where the host system is irrelevant,
/// e.g. protocol simulations.
#[derive(Debug, Default)]
pub struct NullHealth;

impl HealthSampler for NullHealth {
    fn capture(&mut self, tick: u64) -> HealthSample {
        HealthSample {
            tick,
            cpu_percent: 0.0,
            memory_used: 0,
            memory_total: 0,
            load_avg: 0.0,
        }
    }
}
