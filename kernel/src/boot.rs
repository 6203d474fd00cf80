//! Initialization: the boundary step where the kernel stops being a bag of
//! modules and becomes a running single-core machine. Grounded on
//! `grass/init.c`'s `grass_entry`.
//!
//! The ELF loader and disk reader are out-of-scope external collaborators
//! per spec.md §1 ("used only at boot to install the initial process") —
//! this module only needs their *contracts*, expressed as the
//! [`BlockReader`]/[`ElfLoader`] traits, not an implementation. Likewise
//! the fixed addresses below (`SYSCALL_ARG`, `APPS_ENTRY`, `APPS_ARG`) are
//! an ABI agreement with user space and the boot linker script, not values
//! this crate computes.

use crate::hal::{Hal, Translation};
use crate::process::Pid;
use crate::sched::{ContextOps, Kernel};

/// Shared-memory address where a user process deposits a [`crate::process::Syscall`]
/// before executing `ecall`, and where `excp_entry` reads it back from
/// (§4.4, §6). Fixed by the boot-time memory layout, not computed here.
pub const SYSCALL_ARG: usize = 0x0A00_0000;

/// Entry point every user process starts at — the well-known address the
/// ELF loader installs the first instruction of GPID_PROCESS at, and
/// `ctx_entry` seeds `mepc` with for every later-spawned process (this
/// kernel, like the original, runs one statically linked binary image per
/// slot rather than per-process ELF loading beyond the first).
pub const APPS_ENTRY: usize = 0x0810_0000;

/// Address of the `(argc, argv)` pair handed to a freshly entered process
/// in `a0`/`a1`. Mirrors `APPS_ARG` / `APPS_ARG + 4`.
pub const APPS_ARG: usize = 0x0A00_1000;

/// `GPID_PROCESS`: the PID reserved for the first, kernel-trusted process
/// loaded from disk at boot.
pub const GPID_PROCESS: Pid = Pid(1);

/// Reads `n_blocks` disk blocks starting at `block_no` into `dst`. The
/// callback contract `elf_load` is given in the original sources —
/// `earth->disk_read` wrapped to a fixed base offset.
pub trait BlockReader {
    fn read_blocks(&mut self, block_no: u32, n_blocks: u32, dst: &mut [u8]);
}

/// Loads an ELF image via a [`BlockReader`] and returns its entry point.
/// Out of scope per spec.md §1 ("the ELF loader used only at boot") —
/// this crate only needs the call shape `elf_load(pid, reader, ...)` to
/// install `GPID_PROCESS`, never a parser.
pub trait ElfLoader {
    fn load(&mut self, pid: Pid, reader: &mut dyn BlockReader) -> usize;
}

/// Reads from the boot disk starting at `SYS_PROC_EXEC_START`, the offset
/// `sys_proc_read` in `grass/init.c` adds to every block number before
/// calling `earth->disk_read`.
pub struct DiskBlockReader<'h, H: Hal> {
    hal: &'h mut H,
    base_block: u32,
}

impl<'h, H: Hal> DiskBlockReader<'h, H> {
    pub fn new(hal: &'h mut H, base_block: u32) -> Self {
        Self { hal, base_block }
    }
}

impl<H: Hal> BlockReader for DiskBlockReader<'_, H> {
    fn read_blocks(&mut self, block_no: u32, _n_blocks: u32, dst: &mut [u8]) {
        self.hal.disk_read(self.base_block + block_no, dst);
    }
}

/// Installs the kernel→user ABI: the five function pointers the grass
/// layer exports so user code (and the one privileged system process) can
/// allocate/free processes and perform IPC. Mirrors `grass_entry`'s
/// `grass->proc_free = proc_free; ...` block — expressed here as the data
/// the boot sequence hands off, rather than literal function pointers
/// (kept behind the `Kernel<H, C>` methods instead, since every one of
/// them needs access to kernel state the original reaches through
/// globals).
pub struct GrassAbi {
    pub syscall_arg: usize,
}

impl GrassAbi {
    pub const fn new() -> Self {
        Self { syscall_arg: SYSCALL_ARG }
    }
}

impl Default for GrassAbi {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs steps 1-4 of spec.md §4.7: install the ABI (trivial here — it's
/// just the fixed `SYSCALL_ARG` address, see [`GrassAbi`]), load
/// `GPID_PROCESS` via `loader`, create the process tables, allocate the
/// first PCB, and install/flush its address space. Returns the running
/// [`Kernel`] plus the loaded entry point, ready for
/// [`enter_first_process`].
///
/// Fatal (via the allocator/table's own `fatal!` calls) on any allocation
/// failure, matching §4.7's "(fatal on any failure)".
pub fn grass_entry<H: Hal, C: ContextOps>(
    hal: H,
    hart_id: u32,
    loader: &mut dyn ElfLoader,
    reader: &mut dyn BlockReader,
) -> (Kernel<H, C>, usize) {
    log::info!("Enter the grass layer");

    log::info!("Load kernel process #{}: sys_process", GPID_PROCESS.0);
    let entry = loader.load(GPID_PROCESS, reader);

    let mut kernel: Kernel<H, C> = Kernel::new(hal, hart_id, GPID_PROCESS);
    let pid = kernel.procs.alloc();
    debug_assert_eq!(pid, GPID_PROCESS, "grass_entry: first proc_alloc must yield GPID_PROCESS");
    kernel.proc_curr = pid;

    kernel.hal.mmu_switch(pid);
    kernel.hal.mmu_flush_cache();

    (kernel, entry)
}

/// Runs step 5-6 of spec.md §4.7 on the `riscv64` target: sets the grass
/// layer's own privilege mode for `translation`, seeds `mepc`/`mscratch`/
/// argument registers for `entry`, and issues `mret`. Never returns —
/// execution continues as the first process under timer preemption.
///
/// # Safety
/// Must run exactly once, after [`super::arch::riscv64::install_kernel`]
/// and [`super::arch::riscv64::install_trap_vector`], with `ksp` pointing
/// at the first process's kernel stack top.
#[cfg(target_arch = "riscv64")]
pub unsafe fn enter_first_process(entry: usize, ksp: usize, translation: Translation) -> ! {
    crate::arch::riscv64::set_privilege_for_translation(translation);
    // SAFETY: mirrors `grass_entry`'s final `mret` sequence; `entry`/`ksp`
    // come from this same boot sequence's freshly allocated PCB.
    unsafe {
        core::arch::asm!(
            "csrw mepc, {entry}",
            "csrw mscratch, {ksp}",
            "mv a0, {argc}",
            "mv a1, {argv}",
            "mret",
            entry = in(reg) entry,
            ksp = in(reg) ksp,
            argc = in(reg) APPS_ARG,
            argv = in(reg) APPS_ARG + 4,
            options(noreturn),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{Platform, RecordingHal, Translation};
    use crate::sched::NoopContext;
    use alloc::vec;

    struct FixedLoader {
        entry: usize,
    }
    impl ElfLoader for FixedLoader {
        fn load(&mut self, _pid: Pid, _reader: &mut dyn BlockReader) -> usize {
            self.entry
        }
    }

    struct NullReader;
    impl BlockReader for NullReader {
        fn read_blocks(&mut self, _block_no: u32, _n_blocks: u32, _dst: &mut [u8]) {}
    }

    #[test]
    fn grass_entry_allocates_gpid_process_and_installs_its_address_space() {
        let hal = RecordingHal::new(Platform::Emulator, Translation::SoftTlb);
        let mut loader = FixedLoader { entry: APPS_ENTRY };
        let mut reader = NullReader;

        let (kernel, entry): (Kernel<RecordingHal, NoopContext>, usize) =
            grass_entry(hal, 0, &mut loader, &mut reader);

        assert_eq!(entry, APPS_ENTRY);
        assert_eq!(kernel.proc_curr, GPID_PROCESS);
        assert!(kernel.procs.contains(GPID_PROCESS));

        use crate::hal::HalCall::*;
        assert_eq!(kernel.hal.calls, vec![MmuSwitch(GPID_PROCESS), MmuFlushCache]);
    }
}
