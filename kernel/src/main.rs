//! The `riscv64` kernel binary: the thin entry point that wires the real
//! hardware (`EarthHal`, the trap vector, the CLINT timer) to the
//! architecture-free core in `grass_kernel`'s library half.
//!
//! Grounded on `grass/init.c`'s `grass_entry` and the boot-stack setup in
//! `earth/start.S`. Everything this file does past `_start` is a single,
//! never-returning sequence: set up a boot stack, load `GPID_PROCESS`,
//! install the kernel instance and trap vector, and drop into the first
//! process.
//!
//! Only ever built for `riscv64` (`cargo build --target
//! riscv64imac-unknown-none-elf`): the asm blocks below use RISC-V CSR
//! mnemonics that simply won't assemble for any other target, so the real
//! entry point lives behind `#[cfg(target_arch = "riscv64")]` and the host
//! build (what `cargo test` uses to exercise the library half) falls back
//! to the empty stub at the bottom of this file.

#![cfg_attr(target_arch = "riscv64", no_std)]
#![cfg_attr(target_arch = "riscv64", no_main)]

#[cfg(target_arch = "riscv64")]
mod riscv64_entry {

extern crate alloc;

use grass_kernel::arch::riscv64::{install_kernel, install_trap_vector, EarthHal};
use grass_kernel::boot::{self, BlockReader, DiskBlockReader, ElfLoader};
use grass_kernel::hal::{Platform, Translation};
use grass_kernel::process::Pid;
use grass_kernel::sched::Kernel;

/// Size of the boot-time stack `_start` switches onto before any Rust code
/// runs. 64 KiB, matching the kernel stacks allocated per-process
/// thereafter.
const BOOT_STACK_SIZE: usize = 0x1_0000;

#[unsafe(link_section = ".bss.bootstack")]
static mut BOOT_STACK: [u8; BOOT_STACK_SIZE] = [0; BOOT_STACK_SIZE];

core::arch::global_asm!(
    r#"
.section .text.start
.global _start
_start:
    la sp, {stack} + {stack_size}
    call kernel_main
1:
    wfi
    j 1b
"#,
    stack = sym BOOT_STACK,
    stack_size = const BOOT_STACK_SIZE,
);

/// Loads `GPID_PROCESS`'s flat binary from a fixed boot-disk offset with
/// no parsing — a stand-in for the out-of-scope ELF loader (spec.md §1).
/// A real boot path replaces this with an actual ELF parser; this kernel
/// only promises to call `ElfLoader::load` once, at the right point in
/// `grass_entry`, and use the entry point it returns.
struct FlatBinaryLoader;

impl ElfLoader for FlatBinaryLoader {
    fn load(&mut self, pid: Pid, reader: &mut dyn BlockReader) -> usize {
        // Read the image's first block so `reader` (and the disk_read HAL
        // call behind it) is genuinely exercised, even though this loader
        // doesn't interpret the bytes.
        let mut first_block = [0u8; 512];
        reader.read_blocks(0, 1, &mut first_block);
        debug_assert_eq!(pid, boot::GPID_PROCESS, "FlatBinaryLoader: unexpected pid");
        boot::APPS_ENTRY
    }
}

/// Runs once, on the boot stack, with interrupts still disabled.
#[unsafe(no_mangle)]
extern "C" fn kernel_main() -> ! {
    let platform = Platform::Emulator;
    let translation = Translation::SoftTlb;
    let hart_id: usize;
    // SAFETY: reading mhartid has no side effects.
    unsafe { core::arch::asm!("csrr {0}, mhartid", out(reg) hart_id) };

    let hal = EarthHal::new(platform, translation);
    let mut loader = FlatBinaryLoader;
    // `reader_hal` is a throwaway copy used only for the boot-time disk
    // read below; `hal` itself moves into `grass_entry` to become the
    // kernel's live HAL.
    let mut reader_hal = hal;
    let (kernel, entry) = {
        let mut reader = DiskBlockReader::new(&mut reader_hal, 0);
        boot::grass_entry::<EarthHal, grass_kernel::arch::riscv64::Riscv64Context>(hal, hart_id as u32, &mut loader, &mut reader)
    };
    debug_assert_eq!(entry, boot::APPS_ENTRY, "loader returned an unexpected entry point");

    // Leaked deliberately: the kernel instance lives for the rest of the
    // boot, same as the original sources' file-scope globals.
    let kernel: &'static mut Kernel<EarthHal, grass_kernel::arch::riscv64::Riscv64Context> =
        alloc::boxed::Box::leak(alloc::boxed::Box::new(kernel));

    // SAFETY: called once, before the trap vector or interrupts are live.
    unsafe { install_kernel(kernel as *mut _) };
    // SAFETY: mscratch will point at GPID_PROCESS's kernel stack by the
    // time the first trap fires, set immediately below.
    unsafe { install_trap_vector() };

    let ksp = kernel.procs.get(kernel.proc_curr).expect("kernel_main: GPID_PROCESS missing a PCB").kstack.sp();

    // SAFETY: entry/ksp come from the just-completed grass_entry boot
    // sequence; this is the one and only time execution drops into user
    // mode from the boot stack rather than from a trap return.
    unsafe { boot::enter_first_process(entry, ksp, translation) }
}

// The panic handler lives in `grass_kernel::util` (compiled whenever this
// crate isn't under `cfg(test)`) and is pulled in automatically by linking
// against the library crate.

} // mod riscv64_entry

/// Stub entry point for every non-`riscv64` build (notably the host, where
/// `cargo test` exercises `grass_kernel`'s library half). There is nothing
/// for a kernel binary to do on the host; this only exists so `cargo
/// build`/`cargo test` at the workspace root don't need `--target` to
/// succeed on this package's other targets.
#[cfg(not(target_arch = "riscv64"))]
fn main() {}
