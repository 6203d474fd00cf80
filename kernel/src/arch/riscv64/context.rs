//! `ctx_switch` / `ctx_start`: the two context-transfer primitives the
//! scheduler calls through [`crate::sched::ContextOps`].
//!
//! Both save/restore the RISC-V callee-saved register set — `ra` and
//! `s0`..`s11`, 13 registers, 104 bytes — onto the current kernel stack.
//! They are bit-for-bit the same routine; `ctx_start` exists as a
//! separate symbol only because its `new_sp` points at a synthetic frame
//! built by [`prepare_fresh_stack`] instead of one saved by a previous
//! call, exactly the distinction `grass/kernel.c` draws between the two.
//!
//! Calling convention: `a0` holds `old_sp` (where to store the outgoing
//! stack pointer), `a1` holds `new_sp` (the stack pointer to load). This
//! is the RISC-V analogue of the teacher's x86_64 `context_switch_asm`,
//! which saves `rbp, rbx, r12-r15` under the System V callee-saved
//! convention instead.

use core::arch::global_asm;

use crate::process::KernelStack;
use crate::sched::ContextOps;

global_asm!(
    r#"
.section .text
.global ctx_switch
.global ctx_start
ctx_switch:
ctx_start:
    addi sp, sp, -104
    sd ra,  0(sp)
    sd s0,  8(sp)
    sd s1,  16(sp)
    sd s2,  24(sp)
    sd s3,  32(sp)
    sd s4,  40(sp)
    sd s5,  48(sp)
    sd s6,  56(sp)
    sd s7,  64(sp)
    sd s8,  72(sp)
    sd s9,  80(sp)
    sd s10, 88(sp)
    sd s11, 96(sp)

    sd sp, 0(a0)
    mv sp, a1

    ld ra,  0(sp)
    ld s0,  8(sp)
    ld s1,  16(sp)
    ld s2,  24(sp)
    ld s3,  32(sp)
    ld s4,  40(sp)
    ld s5,  48(sp)
    ld s6,  56(sp)
    ld s7,  64(sp)
    ld s8,  72(sp)
    ld s9,  80(sp)
    ld s10, 88(sp)
    ld s11, 96(sp)
    addi sp, sp, 104
    ret
"#
);

unsafe extern "C" {
    fn ctx_switch(old_sp: *mut usize, new_sp: usize);
    fn ctx_start(old_sp: *mut usize, new_sp: usize);
}

/// Number of bytes the synthetic "never run yet" frame occupies — must
/// match the 13-register save area the asm above expects.
const FRESH_FRAME_SIZE: usize = 104;

/// Called with `ret` out of `ctx_entry`'s `ra` slot the first time a
/// process scheduled via `ctx_start` is actually resumed. Runs the
/// switch-aftermath bookkeeping ctx_start's call site in `proc_yield`
/// never reaches (see module docs) and simulates a trap return into user
/// mode at `APPS_ENTRY`.
unsafe extern "C" {
    fn ctx_entry();
}

/// The `riscv64` [`ContextOps`] implementation.
pub struct Riscv64Context;

impl ContextOps for Riscv64Context {
    unsafe fn ctx_switch(old_sp: *mut usize, new_sp: usize) {
        // SAFETY: forwarded verbatim from the trait's contract.
        unsafe { ctx_switch(old_sp, new_sp) };
    }

    unsafe fn ctx_start(old_sp: *mut usize, new_sp: usize) {
        // SAFETY: forwarded verbatim from the trait's contract.
        unsafe { ctx_start(old_sp, new_sp) };
    }

    fn prepare_fresh_stack(kstack: &mut KernelStack) -> usize {
        let top = kstack.base_ptr() as usize + crate::process::SIZE_KSTACK;
        let frame_base = top - FRESH_FRAME_SIZE;

        // SAFETY: frame_base..top is this kstack's own, unused storage —
        // nothing has run on it yet.
        unsafe {
            let words = frame_base as *mut usize;
            // ra: return into ctx_entry.
            words.write(ctx_entry as usize);
            // s0..s11: zeroed, ctx_entry doesn't depend on their contents.
            for i in 1..13 {
                words.add(i).write(0);
            }
        }

        frame_base
    }
}
