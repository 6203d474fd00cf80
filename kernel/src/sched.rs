//! The scheduler: preemptive round-robin across two run queues.
//!
//! Grounded on `grass/kernel.c`'s `proc_yield`/`proc_switch_aftermath`. A
//! process is scheduled from `readyQ` (never run before, needs `ctx_start`
//! to bootstrap it) in preference to `runQ` (already run at least once,
//! resumable via `ctx_switch`); `readyQ` is always drained first. Whichever
//! queue a process came from, after control returns to the kernel on its
//! behalf, `proc_switch_aftermath` brings kernel bookkeeping in line with
//! reality: `proc_curr` is updated, the new process's address space is
//! installed, caches are flushed, and a fresh quantum is armed.
//!
//! The actual register-save/restore is architecture-specific and lives
//! behind [`ContextOps`] so this module's queue and bookkeeping logic can
//! be exercised on the host under `cargo test`.

use crate::hal::Hal;
use crate::process::{KernelStack, Pid, ProcTable};
use crate::queue::{List, Queue};

/// The architecture-specific half of a context switch: saving the current
/// register file to the outgoing stack and loading it from the incoming
/// one. Implemented for real hardware in `arch::riscv64`; a no-op
/// implementation stands in for host unit tests, where there is no second
/// stack to actually jump to.
pub trait ContextOps {
    /// Saves the caller's callee-saved registers, writes the resulting
    /// stack pointer through `old_sp`, loads registers from `*new_sp`, and
    /// resumes on the other stack. Returns once this process is scheduled
    /// again.
    ///
    /// # Safety
    /// `old_sp` and `new_sp` must each point at a live process's saved
    /// stack-pointer cell.
    unsafe fn ctx_switch(old_sp: *mut usize, new_sp: usize);

    /// Like `ctx_switch`, but `new_sp` is the absolute address of a
    /// synthetic frame (prepared by [`Self::prepare_fresh_stack`]) that
    /// returns into `ctx_entry` instead of a previously-saved frame.
    ///
    /// # Safety
    /// `old_sp` must point at a live process's saved stack-pointer cell;
    /// `new_sp` must be a stack pointer produced by
    /// [`Self::prepare_fresh_stack`] for a process that has never run.
    unsafe fn ctx_start(old_sp: *mut usize, new_sp: usize);

    /// Writes a synthetic initial frame onto a never-run process's kernel
    /// stack so that loading it (via `ctx_start`) resumes execution in
    /// `ctx_entry`. Returns the resulting stack pointer.
    fn prepare_fresh_stack(kstack: &mut KernelStack) -> usize;
}

/// A [`ContextOps`] that performs no real register transfer, for testing
/// the scheduler's queue/bookkeeping logic on a single host stack. Every
/// "switch" is treated as an immediate, synchronous return.
pub struct NoopContext;

impl ContextOps for NoopContext {
    unsafe fn ctx_switch(_old_sp: *mut usize, _new_sp: usize) {}

    unsafe fn ctx_start(_old_sp: *mut usize, _new_sp: usize) {}

    fn prepare_fresh_stack(kstack: &mut KernelStack) -> usize {
        kstack.sp()
    }
}

/// Which queue a yielding process should land on. Mirrors the `queue`
/// argument to the original `proc_yield`, which could be the run queue or
/// any other process's `senderQ`/`msgwaitQ`.
pub enum YieldTarget {
    /// Ordinary preemption / post-syscall yield: rejoin the run queue.
    Run,
    /// Blocked trying to send: park on the named receiver's `senderQ`.
    SenderQueueOf(Pid),
    /// Blocked waiting for some condition on its own `msgwaitQ` (the
    /// kernel's only condition-variable-like primitive).
    OwnMsgWait,
}

/// The scheduler plus everything it needs to run: the process table and
/// both run queues, parameterized over the HAL and the context-switch
/// primitive so the core logic stays architecture-free.
pub struct Kernel<H: Hal, C: ContextOps> {
    pub procs: ProcTable,
    pub run_q: Queue<Pid>,
    pub ready_q: List<Pid>,
    pub proc_curr: Pid,
    /// The process a context transfer is currently underway to. Mirrors
    /// `proc_next` in the data model (§3): unlike `next` in a call frame,
    /// this has to be state that outlives the transfer itself, because
    /// `ctx_switch`/`ctx_start` "return" into whichever process is later
    /// switched back into — at that point this field has long since been
    /// overwritten by whoever performed *that* switch, and it is that
    /// latest write `switch_aftermath` must observe, not the value live at
    /// the moment this process originally yielded.
    proc_next: Pid,
    pub hal: H,
    hart_id: u32,
    _ctx: core::marker::PhantomData<C>,
}

impl<H: Hal, C: ContextOps> Kernel<H, C> {
    pub fn new(hal: H, hart_id: u32, proc_curr: Pid) -> Self {
        Self {
            procs: ProcTable::new(),
            run_q: Queue::new(),
            ready_q: List::new(),
            proc_curr,
            proc_next: proc_curr,
            hal,
            hart_id,
            _ctx: core::marker::PhantomData,
        }
    }

    /// Allocates a process and readies it for its first run, mirroring
    /// `proc_alloc` followed by `proc_set_ready`.
    pub fn spawn(&mut self) -> Pid {
        let pid = self.procs.alloc();
        {
            let proc = self.procs.get_mut(pid).expect("just-allocated pid missing from table");
            let sp = C::prepare_fresh_stack(&mut proc.kstack);
            proc.kstack.set_sp(sp);
        }
        crate::process::set_ready(&mut self.ready_q, pid);
        pid
    }

    /// Tears down `pid`: releases its HAL-owned address space via
    /// `mmu_free`, then its PCB, kernel stack, and queues via
    /// `ProcTable::free`. Mirrors `proc_free`, including its caller policy
    /// (§4.3) — only `GPID_PROCESS` may free another process; fatal
    /// otherwise. `ProcTable::free` itself is fatal if `pid`'s `senderQ` is
    /// non-empty (see its doc comment and DESIGN.md for the chosen
    /// resolution of that open question).
    pub fn proc_free(&mut self, pid: Pid) {
        if self.proc_curr != crate::boot::GPID_PROCESS {
            crate::fatal!("proc_free: proc {} is not permitted to free other processes", self.proc_curr.0);
        }
        self.hal.mmu_free(pid);
        self.procs.free(pid, &mut self.run_q);
    }

    /// The hart this kernel instance is bound to, `core_in_kernel` in the
    /// data model (§3) — read once at boot rather than re-derived from
    /// `mhartid` on every trap, since this design targets a single core.
    #[inline]
    pub fn hart_id(&self) -> u32 {
        self.hart_id
    }

    /// Brings kernel bookkeeping in line with the process a context switch
    /// just resumed into: updates `proc_curr` from `proc_next`, reinstalls
    /// its address space, flushes the TLB, and arms a fresh quantum.
    /// Mirrors `proc_switch_aftermath`, including its dependence on reading
    /// `proc_next` fresh rather than trusting a value captured before the
    /// switch (see the field doc on [`Self::proc_next`]). Also the entry
    /// point `ctx_entry` calls on a freshly-started process's first
    /// resume, via [`crate::arch::riscv64`].
    pub fn switch_aftermath(&mut self) {
        self.proc_curr = self.proc_next;
        self.hal.mmu_switch(self.proc_curr);
        self.hal.mmu_flush_cache();
        self.hal.timer_reset(self.hart_id);
    }

    /// Yields the current process onto `target`, then schedules and
    /// switches to the next runnable process. Returns once this process is
    /// scheduled again.
    ///
    /// Fatal if both `readyQ` and `runQ` are empty — there is always at
    /// least the system process to fall back on.
    pub fn proc_yield(&mut self, target: YieldTarget) {
        let current = self.proc_curr;

        match target {
            YieldTarget::Run => self.run_q.push(current),
            YieldTarget::SenderQueueOf(receiver) => {
                let proc = self
                    .procs
                    .get_mut(receiver)
                    .unwrap_or_else(|| crate::fatal!("proc_yield: receiver {} not found", receiver.0));
                proc.sender_q.push(current);
            }
            YieldTarget::OwnMsgWait => {
                let proc = self.procs.get_mut(current).expect("proc_curr always has a PCB");
                proc.msgwait_q.push(current);
            }
        }

        // Capture the outgoing stack-pointer cell before touching the
        // table again — no allocation/removal happens between here and the
        // ctx_switch/ctx_start call, so the address stays valid.
        let old_sp_ptr: *mut usize = {
            let proc = self.procs.get_mut(current).expect("proc_curr always has a PCB");
            proc.kstack.sp_mut_ptr()
        };

        if let Some(next) = self.ready_q.pop() {
            let new_sp = self.procs.get(next).expect("readyQ entries always have a PCB").kstack.sp();
            self.proc_next = next;
            // SAFETY: old_sp_ptr is proc_curr's live saved-sp cell; new_sp
            // was produced by `prepare_fresh_stack` for `next`, which has
            // never run.
            unsafe { C::ctx_start(old_sp_ptr, new_sp) };
            self.switch_aftermath();
            return;
        }

        if let Some(next) = self.run_q.pop() {
            let new_sp = self.procs.get(next).expect("runQ entries always have a PCB").kstack.sp();
            self.proc_next = next;
            // SAFETY: both stack-pointer cells belong to live PCBs.
            unsafe { C::ctx_switch(old_sp_ptr, new_sp) };
            self.switch_aftermath();
            return;
        }

        crate::fatal!("proc_yield: no more processes to schedule ({})", current.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{Platform, RecordingHal, Translation};

    fn new_kernel() -> Kernel<RecordingHal, NoopContext> {
        let hal = RecordingHal::new(Platform::Emulator, Translation::SoftTlb);
        let mut kernel: Kernel<RecordingHal, NoopContext> = Kernel::new(hal, 0, Pid(1));
        kernel.procs.alloc(); // pid 1: the system process, already "running"
        kernel
    }

    #[test]
    fn ready_queue_drains_before_run_queue() {
        // Property/Scenario E2: readyQ is exhausted before runQ is consulted.
        let mut kernel = new_kernel();
        let p2 = kernel.spawn();
        let p3 = kernel.spawn();

        kernel.proc_yield(YieldTarget::Run); // proc 1 yields; readyQ has 2, 3
        assert_eq!(kernel.proc_curr, p2);

        kernel.proc_yield(YieldTarget::Run); // proc 2 yields; readyQ has 3; runQ has 1
        assert_eq!(kernel.proc_curr, p3);

        kernel.proc_yield(YieldTarget::Run); // proc 3 yields; readyQ empty; runQ has 1, 2
        assert_eq!(kernel.proc_curr, Pid(1));
    }

    #[test]
    fn switch_aftermath_calls_hal_in_order() {
        let mut kernel = new_kernel();
        let p2 = kernel.spawn();
        kernel.proc_yield(YieldTarget::Run);
        assert_eq!(kernel.proc_curr, p2);

        use crate::hal::HalCall::*;
        assert_eq!(kernel.hal.calls, alloc::vec![MmuSwitch(p2), MmuFlushCache, TimerReset(0)]);
    }

    #[test]
    fn yield_onto_sender_queue_parks_in_receivers_table_entry() {
        let mut kernel = new_kernel();
        let receiver = kernel.spawn();
        let sender = kernel.spawn();

        // Move the scheduler onto `sender` directly for this unit test.
        kernel.proc_curr = sender;
        kernel.proc_yield(YieldTarget::SenderQueueOf(receiver));

        let receiver_proc = kernel.procs.get(receiver).unwrap();
        assert_eq!(receiver_proc.sender_q.len(), 1);
    }

    #[test]
    fn proc_free_releases_address_space_and_removes_the_pcb() {
        let mut kernel = new_kernel();
        let victim = kernel.spawn();
        kernel.run_q.push(victim);

        kernel.proc_free(victim); // proc_curr is still Pid(1) == GPID_PROCESS

        use crate::hal::HalCall::*;
        assert_eq!(kernel.hal.calls, alloc::vec![MmuFree(victim)]);
        assert!(!kernel.procs.contains(victim));
        assert!(kernel.run_q.find(&victim).is_none());
    }

    #[test]
    #[should_panic(expected = "not permitted to free other processes")]
    fn proc_free_from_a_non_system_process_is_fatal() {
        let mut kernel = new_kernel();
        let victim = kernel.spawn();
        let caller = kernel.spawn();

        kernel.proc_curr = caller;
        kernel.proc_free(victim);
    }

    #[test]
    #[should_panic(expected = "no more processes to schedule")]
    fn yield_with_no_runnable_process_is_fatal() {
        let hal = RecordingHal::new(Platform::Emulator, Translation::SoftTlb);
        let mut kernel: Kernel<RecordingHal, NoopContext> = Kernel::new(hal, 0, Pid(1));
        kernel.procs.alloc();
        kernel.proc_yield(YieldTarget::Run);
    }
}
