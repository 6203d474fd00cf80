//! The "earth" boundary: everything this kernel needs from the hardware-
//! abstraction layer below it, expressed as a trait rather than the global
//! `earth->` function-pointer table the original sources use.
//!
//! `mmu_switch`/`mmu_flush_cache`/`mmu_free` (paging), `disk_read` (block
//! storage), and `timer_reset` (the timer CSR dance in
//! `earth/cpu_intr.c`) are all out-of-scope external collaborators per the
//! system's purpose statement — this crate only needs to call them in the
//! right order at the right time, never implement them.

use crate::process::Pid;

/// Which machine class the kernel is running on. Selects the scheduling
/// quantum: `cpu_intr.c` ties this directly to `QUANTUM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Emulator,
    Hardware,
}

impl Platform {
    /// Timer ticks per quantum, matching the `QUANTUM` macro.
    pub const fn quantum(self) -> u64 {
        match self {
            Platform::Emulator => 100_000,
            Platform::Hardware => 50_000_000,
        }
    }
}

/// Which privilege-transition scheme is in effect. Determines which ecall
/// id user code traps with (`EXCP_ID_ECALL_U` vs `EXCP_ID_ECALL_M`) and how
/// `mstatus`'s privilege-mode bits are set up on first entry to a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation {
    SoftTlb,
    HardwarePaging,
}

/// The boundary between this kernel and the layer beneath it.
///
/// Implementations are expected to be infallible from this crate's point
/// of view: every failure case the HAL can hit (a bad pid, an unreadable
/// disk block) is a kernel-fatal condition per the error taxonomy, so
/// these methods return nothing to check.
pub trait Hal {
    /// Switches the active page table / memory mapping to `pid`'s.
    fn mmu_switch(&mut self, pid: Pid);

    /// Flushes any cached address-translation state (TLB) after a switch.
    fn mmu_flush_cache(&mut self);

    /// Releases `pid`'s address space, called during `proc_free`.
    fn mmu_free(&mut self, pid: Pid);

    /// Reads one block from the boot disk into `buf`. Used only during
    /// initialization, to load the first user process's ELF image.
    fn disk_read(&mut self, block: u32, buf: &mut [u8]);

    /// Arms the timer for one more quantum on the current hart, the
    /// three-store `mtimecmp_set` sequence from `cpu_intr.c`.
    fn timer_reset(&mut self, hart_id: u32);

    fn platform(&self) -> Platform;
    fn translation(&self) -> Translation;
}

/// A record of one HAL call, for test assertions about ordering
/// (Property 9: every process switch calls `mmu_switch`, then
/// `mmu_flush_cache`, then `timer_reset`, in that order).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalCall {
    MmuSwitch(Pid),
    MmuFlushCache,
    MmuFree(Pid),
    TimerReset(u32),
}

/// A [`Hal`] test double that records every call instead of touching real
/// hardware, so the scheduler/IPC logic above the context-switch primitive
/// can be exercised on the host under `cargo test`.
pub struct RecordingHal {
    pub calls: alloc::vec::Vec<HalCall>,
    pub platform: Platform,
    pub translation: Translation,
    disk: alloc::collections::BTreeMap<u32, alloc::vec::Vec<u8>>,
}

impl RecordingHal {
    pub fn new(platform: Platform, translation: Translation) -> Self {
        Self {
            calls: alloc::vec::Vec::new(),
            platform,
            translation,
            disk: alloc::collections::BTreeMap::new(),
        }
    }

    /// Seeds a disk block for a later `disk_read` to return.
    pub fn seed_block(&mut self, block: u32, data: alloc::vec::Vec<u8>) {
        self.disk.insert(block, data);
    }
}

impl Hal for RecordingHal {
    fn mmu_switch(&mut self, pid: Pid) {
        self.calls.push(HalCall::MmuSwitch(pid));
    }

    fn mmu_flush_cache(&mut self) {
        self.calls.push(HalCall::MmuFlushCache);
    }

    fn mmu_free(&mut self, pid: Pid) {
        self.calls.push(HalCall::MmuFree(pid));
    }

    fn disk_read(&mut self, block: u32, buf: &mut [u8]) {
        if let Some(data) = self.disk.get(&block) {
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
        }
    }

    fn timer_reset(&mut self, hart_id: u32) {
        self.calls.push(HalCall::TimerReset(hart_id));
    }

    fn platform(&self) -> Platform {
        self.platform
    }

    fn translation(&self) -> Translation {
        self.translation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantum_matches_platform() {
        assert_eq!(Platform::Emulator.quantum(), 100_000);
        assert_eq!(Platform::Hardware.quantum(), 50_000_000);
    }

    #[test]
    fn recording_hal_captures_call_order() {
        let mut hal = RecordingHal::new(Platform::Emulator, Translation::SoftTlb);
        hal.mmu_switch(Pid(2));
        hal.mmu_flush_cache();
        hal.timer_reset(0);

        assert_eq!(
            hal.calls,
            alloc::vec![HalCall::MmuSwitch(Pid(2)), HalCall::MmuFlushCache, HalCall::TimerReset(0)]
        );
    }
}
