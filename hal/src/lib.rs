//! # Hardware Abstraction Layer (HAL)
//!
//! This crate defines the hardware traits the concurrency core consumes.
//!
//! ## Philosophy
//!
//! **Architecture must be fully abstracted and swappable.**
//!
//! The scheduler and semaphore engine never touch an interrupt flag, an APIC
//! or a timer register directly. They go through these traits, which a real
//! architecture crate or the hosted simulation implements.
//!
//! ## Design Principles
//!
//! 1. **Per-CPU state**: Interrupt masking and halting act on the calling CPU
//! 2. **Nesting**: Interrupt masking is save/restore, never a bare enable
//! 3. **Best effort hints**: A scheduler hint to a busy CPU is harmless
//! 4. **Testable**: Every trait can be mocked

pub mod cpu;
pub mod interrupts;
pub mod timer;

pub use cpu::CpuHal;
pub use interrupts::InterruptHal;
pub use timer::TimerDevice;
