//! # Core Types
//!
//! This crate defines the identifiers shared by every layer of the Kestrel
//! concurrency core.
//!
//! ## Philosophy
//!
//! - **Handles, not pointers**: Threads are addressed by a stable arena index
//!   paired with a generation, so a handle that outlives its thread is detected
//!   instead of dereferenced.
//! - **Type safety first**: Process ids, CPU ids and thread handles are distinct
//!   types and cannot be confused.
//!
//! ## Key Types
//!
//! - [`ThreadId`]: Generation-checked handle to a thread record
//! - [`Pid`]: Process identifier (`Pid::KERNEL` for kernel-only threads)
//! - [`CpuId`]: Identifier for a physical CPU

pub mod ids;

pub use ids::{CpuId, Pid, ThreadId, MAX_CPUS};
