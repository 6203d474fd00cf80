//! Architecture-specific glue. Only one target is supported: `riscv64`.
//!
//! Everything above this module (scheduler, IPC, heap, queue) is
//! architecture-free and runs under `cargo test` on the host; this module
//! supplies the CSR access, trap entry, and context-switch assembly that
//! can't.

#[cfg(target_arch = "riscv64")]
pub mod riscv64;

#[cfg(target_arch = "riscv64")]
pub use riscv64::Riscv64Context;
