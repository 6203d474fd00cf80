//! Trap dispatch: decides what a machine-mode trap means and routes it.
//!
//! Grounded on `grass/kernel.c`'s `kernel_entry`/`intr_entry`/`excp_entry`.
//! The CSR-level work — reading `mhartid`/`mepc`/`mcause`, writing `mepc`
//! back on the way out — is architecture-specific and lives in
//! `arch::riscv64`, which calls into [`dispatch`] with the two values it
//! actually needs to make a decision: whether this was an interrupt or an
//! exception, and the low-order cause id. That keeps this module testable
//! on the host, where there is no `mcause` CSR to read.

use crate::hal::Hal;
use crate::process::Syscall;
use crate::sched::{ContextOps, Kernel, YieldTarget};

/// `INTR_ID_TIMER`: the interrupt cause id for a timer tick.
pub const INTR_ID_TIMER: u32 = 7;
/// `EXCP_ID_ECALL_U`: user-mode environment call, used when `translation`
/// is `HARDWARE_PAGING` and user code actually runs at U-mode privilege.
pub const EXCP_ID_ECALL_U: u32 = 8;
/// `EXCP_ID_ECALL_M`: machine-mode environment call, the default when
/// `translation` is `SOFT_TLB` and everything runs at M-mode.
pub const EXCP_ID_ECALL_M: u32 = 11;

/// The architecture-specific other half of the syscall copy-in/copy-out
/// pair: flushing `proc_curr`'s `syscall` field back out to the shared
/// `SYSCALL_ARG` page once `try_syscall` has finished updating it, so the
/// caller's `ecall` observes the result on resume (§2, §4.6 — "copies out
/// to the receiver's shared memory location"). Copy-in happens before
/// `dispatch` is even called (the PCB has to hold the request before
/// `try_syscall` can act on it); copy-out has to happen here, between
/// `try_syscall` and the post-syscall yield, since that's the only point
/// this module can name `proc_curr`'s *final* syscall result — `try_recv`
/// may re-park the caller on `msgwaitQ` and come back to this same PCB an
/// arbitrary number of times before it has one.
///
/// Implemented with real volatile writes against the shared page on real
/// hardware ([`crate::arch::riscv64`]); host unit tests use
/// [`RecordingSyscallIo`], since there is no such page mapped there.
pub trait SyscallIo {
    fn copy_out(&mut self, msg: &Syscall);
}

/// A [`SyscallIo`] that records every copy-out instead of touching memory,
/// analogous to [`crate::hal::RecordingHal`] — the test-side seam for
/// asserting that a syscall result actually reached the shared buffer user
/// code reads back from, rather than stopping at the PCB.
#[derive(Default)]
pub struct RecordingSyscallIo {
    pub copies_out: alloc::vec::Vec<Syscall>,
}

impl SyscallIo for RecordingSyscallIo {
    fn copy_out(&mut self, msg: &Syscall) {
        self.copies_out.push(*msg);
    }
}

/// Dispatches one trap. `is_interrupt` and `cause_id` are the two fields
/// decoded out of `mcause` (its high bit, and its low 10 bits); `syscall_io`
/// is the architecture's handle for flushing a completed syscall's result
/// back to user space.
///
/// - Timer interrupt: yield the current process back onto `runQ` —
///   preemption is just an involuntary yield.
/// - Machine- or user-mode ecall: advance `mepc` past the `ecall`
///   instruction, copy in the syscall message (the caller has already done
///   this before calling `dispatch`), run it, copy the result back out via
///   `syscall_io`, then yield onto `runQ` — a syscall always yields,
///   preserving round-robin fairness even for a process that could
///   otherwise monopolize its quantum with back-to-back syscalls.
/// - Anything else is fatal, naming the offending process and cause id.
pub fn dispatch<H: Hal, C: ContextOps>(
    kernel: &mut Kernel<H, C>,
    is_interrupt: bool,
    cause_id: u32,
    syscall_io: &mut impl SyscallIo,
) {
    if is_interrupt {
        if cause_id == INTR_ID_TIMER {
            kernel.proc_yield(YieldTarget::Run);
            return;
        }
        crate::fatal!("intr_entry: proc {} got unknown id {}", kernel.proc_curr.0, cause_id);
    }

    if cause_id == EXCP_ID_ECALL_M || cause_id == EXCP_ID_ECALL_U {
        {
            let proc = kernel.procs.get_mut(kernel.proc_curr).expect("proc_curr always has a PCB");
            proc.mepc = proc.mepc.wrapping_add(4);
        }
        kernel.try_syscall();
        let result = kernel.procs.get(kernel.proc_curr).expect("proc_curr always has a PCB").syscall;
        syscall_io.copy_out(&result);
        kernel.proc_yield(YieldTarget::Run);
        return;
    }

    crate::fatal!("excp_entry: proc {} got unknown id {}", kernel.proc_curr.0, cause_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{Platform, RecordingHal, Translation};
    use crate::process::{Pid, SyscallKind, SYSCALL_MSG_LEN};
    use crate::sched::NoopContext;

    fn new_kernel() -> Kernel<RecordingHal, NoopContext> {
        let hal = RecordingHal::new(Platform::Emulator, Translation::SoftTlb);
        let mut kernel: Kernel<RecordingHal, NoopContext> = Kernel::new(hal, 0, Pid(1));
        kernel.procs.alloc();
        kernel
    }

    #[test]
    fn timer_interrupt_yields_onto_run_queue() {
        let mut kernel = new_kernel();
        let p2 = kernel.spawn();

        dispatch(&mut kernel, true, INTR_ID_TIMER, &mut RecordingSyscallIo::default());

        assert_eq!(kernel.proc_curr, p2);
        assert!(kernel.run_q.find(&Pid(1)).is_some());
    }

    #[test]
    fn solo_process_survives_three_quanta_without_fault() {
        // Scenario E1: a single spinning process, repeatedly preempted by
        // the timer, keeps getting rescheduled as itself and the HAL
        // aftermath fires in order on every quantum.
        let mut kernel = new_kernel();

        for _ in 0..3 {
            dispatch(&mut kernel, true, INTR_ID_TIMER, &mut RecordingSyscallIo::default());
            assert_eq!(kernel.proc_curr, Pid(1));
        }

        use crate::hal::HalCall::*;
        assert_eq!(
            kernel.hal.calls,
            alloc::vec![
                MmuSwitch(Pid(1)),
                MmuFlushCache,
                TimerReset(0),
                MmuSwitch(Pid(1)),
                MmuFlushCache,
                TimerReset(0),
                MmuSwitch(Pid(1)),
                MmuFlushCache,
                TimerReset(0),
            ]
        );
    }

    #[test]
    #[should_panic(expected = "intr_entry")]
    fn unknown_interrupt_is_fatal() {
        let mut kernel = new_kernel();
        kernel.spawn();
        dispatch(&mut kernel, true, 99, &mut RecordingSyscallIo::default());
    }

    #[test]
    fn machine_mode_ecall_advances_mepc_and_runs_the_syscall() {
        let mut kernel = new_kernel();
        let receiver = kernel.spawn();
        let sender = kernel.spawn();

        kernel.proc_curr = sender;
        {
            let proc = kernel.procs.get_mut(sender).unwrap();
            proc.mepc = 0x1000;
            proc.syscall.kind_raw = SyscallKind::Send as u32;
            proc.syscall.receiver = receiver.0;
            let mut content = [0u8; SYSCALL_MSG_LEN];
            content[..4].copy_from_slice(b"ping");
            proc.syscall.content = content;
        }

        dispatch(&mut kernel, false, EXCP_ID_ECALL_M, &mut RecordingSyscallIo::default());

        assert_eq!(kernel.procs.get(sender).unwrap().mepc, 0x1004);
        assert_eq!(kernel.procs.get(receiver).unwrap().sender_q.len(), 1);
    }

    #[test]
    fn ecall_flushes_the_syscall_result_back_out_through_syscall_io() {
        // The copy-out half of the syscall contract: whatever try_syscall
        // leaves in proc_curr's syscall field must reach syscall_io, not
        // just the PCB.
        let mut kernel = new_kernel();
        let receiver = kernel.spawn();
        let sender = kernel.spawn();

        kernel.procs.get_mut(receiver).unwrap().sender_q.push(sender);
        {
            let proc = kernel.procs.get_mut(sender).unwrap();
            proc.syscall.kind_raw = SyscallKind::Send as u32;
            proc.syscall.receiver = receiver.0;
            let mut content = [0u8; SYSCALL_MSG_LEN];
            content[..4].copy_from_slice(b"ping");
            proc.syscall.content = content;
        }

        kernel.proc_curr = receiver;
        {
            let proc = kernel.procs.get_mut(receiver).unwrap();
            proc.syscall.kind_raw = SyscallKind::Recv as u32;
            proc.syscall.sender = Pid::ANY.0;
        }

        let mut syscall_io = RecordingSyscallIo::default();
        dispatch(&mut kernel, false, EXCP_ID_ECALL_M, &mut syscall_io);

        assert_eq!(syscall_io.copies_out.len(), 1);
        assert_eq!(syscall_io.copies_out[0].sender, sender.0);
        assert_eq!(&syscall_io.copies_out[0].content[..4], b"ping");
    }

    #[test]
    fn user_mode_ecall_is_also_recognized() {
        let mut kernel = new_kernel();
        let receiver = kernel.spawn();
        let sender = kernel.spawn();

        kernel.proc_curr = sender;
        {
            let proc = kernel.procs.get_mut(sender).unwrap();
            proc.syscall.kind_raw = SyscallKind::Send as u32;
            proc.syscall.receiver = receiver.0;
        }

        dispatch(&mut kernel, false, EXCP_ID_ECALL_U, &mut RecordingSyscallIo::default());

        assert_eq!(kernel.procs.get(receiver).unwrap().sender_q.len(), 1);
    }

    #[test]
    #[should_panic(expected = "excp_entry")]
    fn unknown_exception_is_fatal() {
        let mut kernel = new_kernel();
        kernel.spawn();
        dispatch(&mut kernel, false, 3, &mut RecordingSyscallIo::default());
    }
}
