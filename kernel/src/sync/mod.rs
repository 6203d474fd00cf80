// =============================================================================
// grass-kernel — Kernel Synchronization Primitives
// =============================================================================
//
// This module provides synchronization primitives for the kernel. There is
// no std here, so the kernel gets its own: a ticket spinlock that disables
// interrupts while held, sized for a single-hart, single-trap-at-a-time
// machine rather than a multi-core one.
// =============================================================================

pub mod spinlock;

