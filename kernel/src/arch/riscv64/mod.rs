//! The `riscv64` earth boundary: CSR access, the trap entry/return stub,
//! the CLINT timer, and the concrete [`Hal`] this kernel links against on
//! real hardware or under QEMU.
//!
//! Grounded on `earth/cpu_intr.c` (timer, `trap_entry`/`mtvec` wiring) and
//! `grass/kernel.c`'s `kernel_entry` (CSR reads/writes around a trap). The
//! pieces spec.md §1 lists as out-of-scope external collaborators —
//! `mmu_switch`, `mmu_flush_cache`, `mmu_free`, `disk_read` — stay
//! `unsafe extern "C"` imports with no definition here: this crate only
//! promises to call them in the right order (Property 9), never to
//! implement paging or a disk controller. `timer_reset` is the one HAL
//! entry point §6 says the core *installs* rather than consumes, so it's
//! implemented here in full.

pub mod context;
pub mod trapframe;

pub use context::Riscv64Context;

use crate::hal::{Hal, Platform, Translation};
use crate::process::Pid;
use crate::sched::{ContextOps, Kernel};
use trapframe::TrapFrame;

bitflags::bitflags! {
    /// The two fields `mcause` packs into one register: the top bit
    /// (`INTERRUPT`) and the low 10 bits holding the cause id. Only the
    /// top bit is a real flag; the id is a value, not a flag set, so it's
    /// pulled out with [`Mcause::cause_id`] rather than more bitflags
    /// constants. `INTR_ID_TIMER` / `EXCP_ID_ECALL_M` live in
    /// [`crate::trap`].
    struct Mcause: usize {
        const INTERRUPT = 1 << (usize::BITS - 1);
    }
}

impl Mcause {
    const ID_MASK: usize = 0x3FF;

    fn is_interrupt(self) -> bool {
        self.contains(Mcause::INTERRUPT)
    }

    fn cause_id(self) -> u32 {
        (self.bits() & Self::ID_MASK) as u32
    }
}

/// Base address of the QEMU `virt` machine's CLINT (Core-Local
/// Interruptor), the source of `mtime`/`mtimecmp`. Matches
/// `earth/cpu_intr.c`'s `CLINT_BASE`.
const CLINT_BASE: usize = 0x0200_0000;
const MTIME: usize = CLINT_BASE + 0xBFF8;
const MTIMECMP: usize = CLINT_BASE + 0x4000;

#[inline]
fn reg_read(addr: usize) -> u32 {
    // SAFETY: CLINT MMIO addresses are always mapped on this platform.
    unsafe { core::ptr::read_volatile(addr as *const u32) }
}

#[inline]
fn reg_write(addr: usize, value: u32) {
    // SAFETY: CLINT MMIO addresses are always mapped on this platform.
    unsafe { core::ptr::write_volatile(addr as *mut u32, value) };
}

/// Reads the 64-bit `mtime` counter, retrying if the two 32-bit halves are
/// torn by a carry between the low and high reads. Mirrors `mtime_get`.
fn mtime_get() -> u64 {
    loop {
        let high = reg_read(MTIME + 4);
        let low = reg_read(MTIME);
        if reg_read(MTIME + 4) == high {
            return ((high as u64) << 32) | low as u64;
        }
    }
}

/// Writes `mtimecmp` for `core_id` as three stores: park the high half at
/// all-ones first so a partially-written low half can never compare equal
/// to `mtime` and fire a spurious interrupt mid-update. Mirrors
/// `mtimecmp_set`.
fn mtimecmp_set(time: u64, core_id: u32) {
    let base = MTIMECMP + core_id as usize * 8;
    reg_write(base + 4, 0xFFFF_FFFF);
    reg_write(base, time as u32);
    reg_write(base + 4, (time >> 32) as u32);
}

/// Arms the timer for ten more quanta on `core_id`. Mirrors `timer_reset`
/// in `cpu_intr.c`, including the x10 headroom (the original's comment
/// doesn't explain the factor; it's carried verbatim from
/// `original_source/earth/cpu_intr.c`).
fn timer_reset_impl(core_id: u32, platform: Platform) {
    mtimecmp_set(mtime_get() + 10 * platform.quantum(), core_id);
}

unsafe extern "C" {
    /// Switches the active page table / memory mapping to `pid`'s.
    /// External collaborator (§1, §6) — implemented by the earth layer.
    fn mmu_switch(pid: u32);
    /// Flushes cached address-translation state after a switch.
    fn mmu_flush_cache();
    /// Releases `pid`'s address space during `proc_free`.
    fn mmu_free(pid: u32);
    /// Reads `n_blocks` blocks starting at `block_no` into `dst`.
    fn disk_read(block_no: u32, n_blocks: u32, dst: *mut u8);
}

/// The concrete [`Hal`] linked into a real `riscv64` kernel binary.
/// `mmu_*`/`disk_read` forward to the earth layer; `timer_reset` is
/// implemented in-kernel (above), matching §6's "installed by the core"
/// distinction.
///
/// `Copy` because it carries no state of its own beyond two small enums —
/// every call just forwards to the earth layer or a CSR, so a second
/// handle is as good as the first. This lets boot code hold one `EarthHal`
/// for the disk read ahead of `grass_entry` and still move the original
/// into the `Kernel` it constructs.
#[derive(Clone, Copy)]
pub struct EarthHal {
    platform: Platform,
    translation: Translation,
}

impl EarthHal {
    pub const fn new(platform: Platform, translation: Translation) -> Self {
        Self { platform, translation }
    }
}

impl Hal for EarthHal {
    fn mmu_switch(&mut self, pid: Pid) {
        // SAFETY: forwarded to the earth layer per the `Hal` contract.
        unsafe { mmu_switch(pid.0) };
    }

    fn mmu_flush_cache(&mut self) {
        // SAFETY: forwarded to the earth layer per the `Hal` contract.
        unsafe { mmu_flush_cache() };
    }

    fn mmu_free(&mut self, pid: Pid) {
        // SAFETY: forwarded to the earth layer per the `Hal` contract.
        unsafe { mmu_free(pid.0) };
    }

    fn disk_read(&mut self, block: u32, buf: &mut [u8]) {
        // SAFETY: `buf` is a valid Rust slice; the earth layer writes at
        // most `buf.len()` bytes starting at its pointer.
        unsafe { disk_read(block, 1, buf.as_mut_ptr()) };
    }

    fn timer_reset(&mut self, hart_id: u32) {
        timer_reset_impl(hart_id, self.platform);
    }

    fn platform(&self) -> Platform {
        self.platform
    }

    fn translation(&self) -> Translation {
        self.translation
    }
}

/// The single per-core kernel instance. Trap entry and `ctx_entry` both
/// need to reach it; a `static` pointer set once during boot (single
/// core, single kernel image) stands in for what the original sources
/// reach through file-scope globals (`proc_curr`, `runQ`, ...).
static mut KERNEL_PTR: *mut Kernel<EarthHal, Riscv64Context> = core::ptr::null_mut();

/// Publishes the kernel instance for [`kernel_entry`] and `ctx_entry` to
/// reach. Must be called exactly once, after the kernel's global state is
/// fully constructed and before `mtvec` is installed.
///
/// # Safety
/// `kernel` must outlive every subsequent trap; in practice it is `'static`
/// (e.g. boxed and leaked, or a `static` populated lazily during boot).
pub unsafe fn install_kernel(kernel: *mut Kernel<EarthHal, Riscv64Context>) {
    // SAFETY: single core, called once before interrupts are enabled.
    unsafe { KERNEL_PTR = kernel };
}

fn kernel() -> &'static mut Kernel<EarthHal, Riscv64Context> {
    // SAFETY: `install_kernel` ran before traps were enabled; single hart,
    // single trap in flight at a time (§5), so this exclusive borrow never
    // aliases.
    unsafe { KERNEL_PTR.as_mut().expect("kernel_entry: trap before install_kernel") }
}

use core::arch::global_asm;

global_asm!(
    r#"
.section .text
.global trap_entry
.align 4
trap_entry:
    csrrw sp, mscratch, sp
    addi sp, sp, -{frame_size}
    sd ra,  0(sp)
    sd gp,  8(sp)
    sd tp,  16(sp)
    sd t0,  24(sp)
    sd t1,  32(sp)
    sd t2,  40(sp)
    sd s0,  48(sp)
    sd s1,  56(sp)
    sd a0,  64(sp)
    sd a1,  72(sp)
    sd a2,  80(sp)
    sd a3,  88(sp)
    sd a4,  96(sp)
    sd a5,  104(sp)
    sd a6,  112(sp)
    sd a7,  120(sp)
    sd s2,  128(sp)
    sd s3,  136(sp)
    sd s4,  144(sp)
    sd s5,  152(sp)
    sd s6,  160(sp)
    sd s7,  168(sp)
    sd s8,  176(sp)
    sd s9,  184(sp)
    sd s10, 192(sp)
    sd s11, 200(sp)
    sd t3,  208(sp)
    sd t4,  216(sp)
    sd t5,  224(sp)
    sd t6,  232(sp)

    mv a0, sp
    call kernel_entry

    ld ra,  0(sp)
    ld gp,  8(sp)
    ld tp,  16(sp)
    ld t0,  24(sp)
    ld t1,  32(sp)
    ld t2,  40(sp)
    ld s0,  48(sp)
    ld s1,  56(sp)
    ld a0,  64(sp)
    ld a1,  72(sp)
    ld a2,  80(sp)
    ld a3,  88(sp)
    ld a4,  96(sp)
    ld a5,  104(sp)
    ld a6,  112(sp)
    ld a7,  120(sp)
    ld s2,  128(sp)
    ld s3,  136(sp)
    ld s4,  144(sp)
    ld s5,  152(sp)
    ld s6,  160(sp)
    ld s7,  168(sp)
    ld s8,  176(sp)
    ld s9,  184(sp)
    ld s10, 192(sp)
    ld s11, 200(sp)
    ld t3,  208(sp)
    ld t4,  216(sp)
    ld t5,  224(sp)
    ld t6,  232(sp)
    addi sp, sp, {frame_size}
    csrrw sp, mscratch, sp
    mret
"#,
    frame_size = const TrapFrame::SIZE,
);

/// Called from `trap_entry` on every timer interrupt and ecall. Reads the
/// trap-classifying CSRs, stashes `mepc` in the current PCB, dispatches,
/// and writes `mepc` back so `trap_entry`'s `mret` resumes the right
/// instruction. Mirrors `kernel_entry` in `grass/kernel.c` field-for-field.
///
/// `_frame` is the saved user register file on the current process's
/// kernel stack; the dispatcher itself never touches general-purpose
/// registers, only `mepc`, so it's unused beyond documenting the ABI
/// `trap_entry` hands off.
#[unsafe(no_mangle)]
extern "C" fn kernel_entry(_frame: *mut TrapFrame) {
    let hart_id: usize;
    let mepc: usize;
    let mcause: usize;
    // SAFETY: reading CSRs has no side effects beyond what the ISA defines.
    unsafe {
        core::arch::asm!("csrr {0}, mhartid", out(reg) hart_id);
        core::arch::asm!("csrr {0}, mepc", out(reg) mepc);
        core::arch::asm!("csrr {0}, mcause", out(reg) mcause);
    }

    let kernel = kernel();
    {
        let proc = kernel.procs.get_mut(kernel.proc_curr).expect("kernel_entry: proc_curr missing a PCB");
        proc.mepc = mepc;
    }

    let mcause = Mcause::from_bits_retain(mcause);
    let is_interrupt = mcause.is_interrupt();
    let cause_id = mcause.cause_id();

    debug_assert_eq!(hart_id as u32, kernel.hart_id(), "kernel_entry: trapped on an unexpected hart");
    if !is_interrupt && (cause_id == crate::trap::EXCP_ID_ECALL_M || cause_id == crate::trap::EXCP_ID_ECALL_U) {
        copy_in_syscall(kernel);
    }

    crate::trap::dispatch(kernel, is_interrupt, cause_id, &mut SharedSyscallIo);

    let new_mepc = kernel.procs.get(kernel.proc_curr).expect("kernel_entry: proc_curr missing a PCB").mepc;
    // SAFETY: writing mepc has no side effects beyond what trap-return reads.
    unsafe { core::arch::asm!("csrw mepc, {0}", in(reg) new_mepc) };
}

/// Copies the syscall message out of the well-known `SYSCALL_ARG` shared
/// address into the trapping process's PCB, ahead of dispatch. Mirrors the
/// `memcpy(&proc_curr->syscall, (void*)SYSCALL_ARG, ...)` line in
/// `excp_entry`.
fn copy_in_syscall(kernel: &mut Kernel<EarthHal, Riscv64Context>) {
    let syscall_arg = crate::boot::SYSCALL_ARG as *const crate::process::Syscall;
    // SAFETY: SYSCALL_ARG is a fixed shared-memory address user code
    // writes to before `ecall`; reading it back here is the kernel's side
    // of that well-known-address contract.
    let msg = unsafe { core::ptr::read_volatile(syscall_arg) };
    kernel.procs.get_mut(kernel.proc_curr).expect("copy_in_syscall: proc_curr missing a PCB").syscall = msg;
}

/// The real [`crate::trap::SyscallIo`]: writes a completed syscall's result
/// back to the well-known `SYSCALL_ARG` shared address, the other half of
/// `copy_in_syscall`'s read. Mirrors `proc_try_recv`'s
/// `sc->sender = sender->pid; memcpy(sc->content, ...)` write-back against
/// the same pointer in `grass/kernel.c`, moved out to the dispatch/arch
/// boundary so `crate::trap` stays free of raw hardware addresses.
struct SharedSyscallIo;

impl crate::trap::SyscallIo for SharedSyscallIo {
    fn copy_out(&mut self, msg: &crate::process::Syscall) {
        let syscall_arg = crate::boot::SYSCALL_ARG as *mut crate::process::Syscall;
        // SAFETY: SYSCALL_ARG is the same fixed shared-memory address
        // copy_in_syscall reads from; writing the syscall result back here
        // is the kernel's side of the well-known-address contract user code
        // reads from after its `ecall` resumes.
        unsafe { core::ptr::write_volatile(syscall_arg, *msg) };
    }
}

/// The trampoline a freshly `ctx_start`ed process's synthetic stack frame
/// returns into (its `ra` is pointed here by
/// [`context::Riscv64Context::prepare_fresh_stack`]). Runs the same
/// switch-aftermath bookkeeping `proc_yield` runs for an ordinary resume,
/// then simulates a trap return straight into the application's entry
/// point — the one place user mode is entered from a never-run kernel
/// stack. Mirrors `ctx_entry` in `grass/kernel.c`.
#[unsafe(no_mangle)]
extern "C" fn ctx_entry() -> ! {
    let kernel = kernel();
    kernel.switch_aftermath();

    let entry = crate::boot::APPS_ENTRY;
    let ksp = kernel.procs.get(kernel.proc_curr).expect("ctx_entry: proc_curr missing a PCB").kstack.sp();
    let argc_addr = crate::boot::APPS_ARG;
    let argv_addr = crate::boot::APPS_ARG + 4;

    // SAFETY: this hart has no live Rust call stack left to unwind into —
    // we are simulating the tail end of a trap return, exactly what
    // `trap_entry`'s epilogue would have done for a process that had
    // actually trapped.
    unsafe {
        core::arch::asm!(
            "csrw mepc, {entry}",
            "csrw mscratch, {ksp}",
            "mv a0, {argc}",
            "mv a1, {argv}",
            "mret",
            entry = in(reg) entry,
            ksp = in(reg) ksp,
            argc = in(reg) argc_addr,
            argv = in(reg) argv_addr,
            options(noreturn),
        )
    }
}

/// Installs `trap_entry` as the direct-mode trap vector and enables the
/// machine-mode timer interrupt. Mirrors `intr_init`'s CSR writes (`mtvec`,
/// `mie`, `mstatus`), minus the initial `timer_reset` call, which the
/// scheduler already performs on every switch.
///
/// # Safety
/// Must run after [`install_kernel`], with `trap_entry`'s backing stack
/// (`mscratch`) already pointing at a valid kernel stack.
pub unsafe fn install_trap_vector() {
    unsafe extern "C" {
        fn trap_entry();
    }
    // SAFETY: direct-mode mtvec, mie.MTIE, mstatus.MIE — the standard
    // machine-mode interrupt enable sequence.
    unsafe {
        core::arch::asm!("csrw mtvec, {0}", in(reg) trap_entry as usize);
        core::arch::asm!("csrs mie, {0}", in(reg) 0x80usize);
        core::arch::asm!("csrs mstatus, {0}", in(reg) 0x88usize);
    }
}

/// Sets `mstatus`'s two-bit privilege field (bits 12:11) for the grass
/// layer's own execution: machine mode (`3`) under `SOFT_TLB`, user mode
/// (`0`) under `HARDWARE_PAGING`. Mirrors `grass_entry`'s `mstatus` dance.
pub fn set_privilege_for_translation(translation: Translation) {
    const M_MODE: usize = 3;
    const U_MODE: usize = 0;
    let mode = if translation == Translation::SoftTlb { M_MODE } else { U_MODE };

    let mut mstatus: usize;
    // SAFETY: reading/writing mstatus's MPP field is the documented way to
    // select the privilege level `mret` drops into.
    unsafe {
        core::arch::asm!("csrr {0}, mstatus", out(reg) mstatus);
        mstatus = (mstatus & !(3 << 11)) | (mode << 11);
        core::arch::asm!("csrw mstatus, {0}", in(reg) mstatus);
    }
}
