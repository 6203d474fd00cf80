//! `grass-kernel`: the preemptive round-robin kernel core described in the
//! project's design spec — trap dispatch, scheduling, rendezvous IPC, and
//! the kernel heap allocator that backs all of it.
//!
//! `no_std` except under `cfg(test)`, where the crate builds against the
//! host standard library so the architecture-free modules (`queue`,
//! `heap`, `process`, `sched`, `ipc`, `trap`) can be exercised with
//! `cargo test` without a RISC-V target or emulator. Everything that
//! genuinely needs real hardware — CSR access, the trap entry stub, the
//! context-switch assembly — lives behind the [`arch`] module and the
//! [`hal::Hal`] trait, so this split costs nothing in the core logic.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod boot;
pub mod fatal;
pub mod hal;
pub mod heap;
pub mod ipc;
pub mod process;
pub mod queue;
pub mod sched;
pub mod sync;
pub mod trap;

#[cfg(not(test))]
mod util;

/// Start of the kernel heap window, matching the `HEAP_START` boot-time
/// memory map constant in the original sources. Placed well above the
/// kernel image and below `boot::SYSCALL_ARG`.
#[cfg(not(test))]
const HEAP_START: usize = 0x0900_0000;

/// End of the kernel heap window (`HEAP_END`). One megabyte is well above
/// what steady-state PCB/queue bookkeeping needs.
#[cfg(not(test))]
const HEAP_END: usize = HEAP_START + (1 << 20);

#[cfg(not(test))]
#[global_allocator]
static ALLOCATOR: heap::KernelAllocator = heap::KernelAllocator::new(HEAP_START, HEAP_END - HEAP_START);
