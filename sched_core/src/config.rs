//! Kernel configuration
//!
//! Tunables are plain data with defaults; they can be loaded from JSON by
//! a boot loader or a test harness and are validated once, at boot.

use crate::scheduler::AUDIT_CAPACITY;
use crate::smp::HintPolicy;
use core_types::MAX_CPUS;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors reported at boot
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("at least one CPU is required")]
    NoCpus,

    #[error("{count} CPUs configured, at most {max} supported")]
    TooManyCpus { count: usize, max: usize },

    #[error("platform provides {available} CPUs, {configured} configured")]
    PlatformCpus { configured: usize, available: usize },

    #[error("default stack size must be non-zero")]
    ZeroStack,

    #[error("tick period must be non-zero")]
    ZeroTick,

    #[error("audit trail enabled with room for no events")]
    ZeroAuditCapacity,
}

/// Boot-time kernel tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Number of CPUs brought up at boot
    pub cpu_count: usize,
    /// Stack size for threads that do not request one
    pub default_stack_size: usize,
    /// Timer tick period in nanoseconds
    pub tick_ns: u64,
    /// Which idle CPU is hinted when a thread becomes runnable
    pub hint_policy: HintPolicy,
    /// Record scheduling events in the audit trail
    pub audit: bool,
    /// Events kept in the audit trail; older ones are dropped
    pub audit_capacity: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            cpu_count: 1,
            default_stack_size: 16 * 1024,
            tick_ns: 1_000_000,
            hint_policy: HintPolicy::LastCpu,
            audit: false,
            audit_capacity: AUDIT_CAPACITY,
        }
    }
}

impl KernelConfig {
    /// Checks the configuration for values the kernel cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cpu_count == 0 {
            return Err(ConfigError::NoCpus);
        }
        if self.cpu_count > MAX_CPUS {
            return Err(ConfigError::TooManyCpus {
                count: self.cpu_count,
                max: MAX_CPUS,
            });
        }
        if self.default_stack_size == 0 {
            return Err(ConfigError::ZeroStack);
        }
        if self.tick_ns == 0 {
            return Err(ConfigError::ZeroTick);
        }
        if self.audit && self.audit_capacity == 0 {
            return Err(ConfigError::ZeroAuditCapacity);
        }
        Ok(())
    }

    /// Sets the CPU count
    pub fn with_cpus(mut self, cpu_count: usize) -> Self {
        self.cpu_count = cpu_count;
        self
    }

    /// Enables the audit trail
    pub fn with_audit(mut self) -> Self {
        self.audit = true;
        self
    }

    /// Bounds the audit trail to the newest `capacity` events
    pub fn with_audit_capacity(mut self, capacity: usize) -> Self {
        self.audit_capacity = capacity;
        self
    }

    /// Sets the hint policy
    pub fn with_hint_policy(mut self, policy: HintPolicy) -> Self {
        self.hint_policy = policy;
        self
    }
}
