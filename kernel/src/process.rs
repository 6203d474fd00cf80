//! Process table: the PCB type and the map that owns every live process.
//!
//! Grounded on `grass/process.c` / `process.h`: `proc_alloc`, `proc_free`,
//! `proc_set_ready`, `proc_pcb_find`. The original reaches a PCB through
//! whichever structure currently holds a pointer to it — `proc_set`, a run
//! queue, another process's `senderQ`. That aliasing doesn't translate to
//! Rust ownership directly, so here a single [`ProcTable`] owns every
//! [`Process`] by [`Pid`], and every queue (run queue, ready queue,
//! `senderQ`, `msgwaitQ`) holds `Pid` values instead of PCB pointers. A
//! process's scheduling state is still exactly one of: running, on the run
//! queue, on the ready queue, on some other process's `senderQ`, or parked
//! on its own `msgwaitQ` — the table just answers "where is PCB N" instead
//! of a pointer answering it directly.

use crate::queue::{List, Queue};
use alloc::collections::BTreeMap;

/// Default kernel stack size for a new process, `SIZE_KSTACK` in the
/// original sources (16 KiB).
pub const SIZE_KSTACK: usize = 0x4000;

/// Fixed length of a syscall message's content field (`SYSCALL_MSG_LEN`).
pub const SYSCALL_MSG_LEN: usize = 32;

/// A process id. Zero is reserved and never allocated to a real process;
/// it doubles as the "any"/"all" sentinel recognized by `recv` and
/// `proc_free` respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u32);

impl Pid {
    /// The sentinel pid: "any sender" to `sys_recv`, "all processes" to
    /// `proc_free` (the latter is a reserved, unimplemented case).
    pub const ANY: Pid = Pid(0);

    #[inline]
    pub fn is_any(self) -> bool {
        self == Self::ANY
    }
}

/// The kind of a syscall message, `syscall.type` in the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SyscallKind {
    Send = 1,
    Recv = 2,
}

impl SyscallKind {
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Send),
            2 => Some(Self::Recv),
            _ => None,
        }
    }
}

/// The wire layout of a syscall message, copied in from the well-known
/// `SYSCALL_ARG` shared address on every machine-mode ecall trap, and
/// copied back out to the receiver's shared buffer on a successful `recv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Syscall {
    pub kind_raw: u32,
    pub sender: u32,
    pub receiver: u32,
    pub content: [u8; SYSCALL_MSG_LEN],
}

impl Syscall {
    pub const fn empty() -> Self {
        Self { kind_raw: 0, sender: 0, receiver: 0, content: [0; SYSCALL_MSG_LEN] }
    }

    pub fn kind(&self) -> Option<SyscallKind> {
        SyscallKind::from_u32(self.kind_raw)
    }
}

/// Owned kernel stack storage for one process.
///
/// `ksp` starts at the high end (`kstack + SIZE_KSTACK`) per `proc_alloc`,
/// and is rewritten on every context switch to track the saved stack
/// pointer of the process while it isn't running.
pub struct KernelStack {
    /// Heap-allocated backing storage. Boxed so its address is stable
    /// regardless of where the owning `Process` itself lives (e.g. inside
    /// a `BTreeMap` node that may be relocated by tree rebalancing).
    storage: alloc::boxed::Box<[u8; SIZE_KSTACK]>,
    /// Current saved stack pointer, as an absolute address into `storage`.
    sp: usize,
}

impl KernelStack {
    fn new() -> Self {
        let storage = alloc::boxed::Box::new([0; SIZE_KSTACK]);
        let sp = storage.as_ptr() as usize + SIZE_KSTACK;
        Self { storage, sp }
    }

    /// Base address of the stack's low end.
    pub fn base_ptr(&self) -> *mut u8 {
        self.storage.as_ptr() as *mut u8
    }

    /// The saved stack pointer as an address.
    pub fn sp(&self) -> usize {
        self.sp
    }

    /// Overwrites the saved stack pointer from an absolute address produced
    /// by a context-switch stub. Must lie within `[base, base + SIZE_KSTACK]`.
    pub fn set_sp(&mut self, sp: usize) {
        let base = self.base_ptr() as usize;
        debug_assert!(sp >= base && sp <= base + SIZE_KSTACK, "ksp out of range for its own kstack");
        self.sp = sp;
    }

    /// Raw pointer to the saved-stack-pointer cell itself, for passing to
    /// `ctx_switch`/`ctx_start` as the `old_sp`/`new_sp` out-parameter.
    ///
    /// # Safety for callers
    /// The returned pointer is only valid until the owning `Process` is
    /// removed from its `ProcTable`, or the table is otherwise mutated in
    /// a way that could relocate it. Callers must not hold it across such
    /// a mutation.
    pub fn sp_mut_ptr(&mut self) -> *mut usize {
        &mut self.sp as *mut usize
    }
}

/// A process control block. Every live PCB lives in exactly one
/// [`ProcTable`] slot; queues elsewhere in the kernel refer to it by
/// [`Pid`].
pub struct Process {
    pub pid: Pid,
    /// Saved `mepc` (program counter), restored into the CSR on trap return.
    pub mepc: usize,
    /// The last syscall message copied in from user space on an ecall trap.
    pub syscall: Syscall,
    pub kstack: KernelStack,
    /// Processes blocked trying to `send` to this one, waiting for it to `recv`.
    pub sender_q: Queue<Pid>,
    /// At most one process parked here at a time: this process itself,
    /// waiting on a condition (e.g. an empty `senderQ`) to become true.
    pub msgwait_q: Queue<Pid>,
}

impl Process {
    fn new(pid: Pid) -> Self {
        Self {
            pid,
            mepc: 0,
            syscall: Syscall::empty(),
            kstack: KernelStack::new(),
            sender_q: Queue::new(),
            msgwait_q: Queue::new(),
        }
    }
}

/// Owns every live process, keyed by [`Pid`]. The single point of truth
/// that `runQ`/`readyQ`/per-process `senderQ`/`msgwaitQ` all refer into by
/// key rather than by pointer.
pub struct ProcTable {
    procs: BTreeMap<Pid, Process>,
    next_pid: u32,
}

impl ProcTable {
    pub fn new() -> Self {
        Self { procs: BTreeMap::new(), next_pid: 1 }
    }

    /// Allocates a PCB and its kernel stack, and inserts it into the table.
    /// Mirrors `proc_alloc`: pids are dispensed starting at 1, monotonically.
    pub fn alloc(&mut self) -> Pid {
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        self.procs.insert(pid, Process::new(pid));
        pid
    }

    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.procs.get(&pid)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.procs.get_mut(&pid)
    }

    #[inline]
    pub fn contains(&self, pid: Pid) -> bool {
        self.procs.contains_key(&pid)
    }

    /// Frees process `pid`'s resources and removes its PCB from the table.
    ///
    /// `mmu_free` is the caller's responsibility to invoke through the HAL —
    /// this only tears down the kernel-side bookkeeping (PCB, kernel stack,
    /// queues) per `proc_free` in the original sources. Fatal if `pid`'s
    /// `senderQ` is non-empty: killing a process that other processes are
    /// still blocked trying to send to is the unresolved case the original
    /// leaves as a TODO, and this crate picks the conservative option (see
    /// DESIGN.md).
    pub fn free(&mut self, pid: Pid, run_q: &mut Queue<Pid>) {
        if pid.is_any() {
            crate::fatal!("proc_free: killing all user processes unimplemented");
        }

        let proc = match self.procs.get(&pid) {
            Some(p) => p,
            None => crate::fatal!("proc_free: failed to find pcb of proc {}", pid.0),
        };

        if !proc.sender_q.is_empty() {
            crate::fatal!("proc_free: non-empty senderQ of process being killed ({})", pid.0);
        }

        run_q.delete_value(&pid);
        self.procs.remove(&pid);
    }
}

impl Default for ProcTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Pushes `pid` onto the ready queue (for a process that has never run).
/// Mirrors `proc_set_ready`.
pub fn set_ready(ready_q: &mut List<Pid>, pid: Pid) {
    ready_q.append(pid);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_assigns_monotonic_pids_starting_at_one() {
        let mut table = ProcTable::new();
        assert_eq!(table.alloc(), Pid(1));
        assert_eq!(table.alloc(), Pid(2));
        assert_eq!(table.alloc(), Pid(3));
    }

    #[test]
    fn pid_zero_is_reserved_and_never_allocated() {
        let mut table = ProcTable::new();
        for _ in 0..5 {
            assert_ne!(table.alloc(), Pid::ANY);
        }
    }

    #[test]
    fn free_removes_from_table_and_run_queue() {
        let mut table = ProcTable::new();
        let pid = table.alloc();
        let mut run_q = Queue::new();
        run_q.push(pid);

        table.free(pid, &mut run_q);

        assert!(!table.contains(pid));
        assert_eq!(run_q.len(), 0);
    }

    #[test]
    #[should_panic(expected = "non-empty senderQ")]
    fn free_with_non_empty_sender_queue_is_fatal() {
        // Scenario E6: proc_free on a pid with blocked senders is fatal.
        let mut table = ProcTable::new();
        let pid = table.alloc();
        let blocked_sender = table.alloc();
        table.get_mut(pid).unwrap().sender_q.push(blocked_sender);

        let mut run_q = Queue::new();
        table.free(pid, &mut run_q);
    }

    #[test]
    fn kernel_stack_sp_starts_at_high_end() {
        let proc = Process::new(Pid(1));
        let base = proc.kstack.base_ptr() as usize;
        assert_eq!(proc.kstack.sp(), base + SIZE_KSTACK);
    }

    #[test]
    fn syscall_kind_round_trips_through_raw_value() {
        assert_eq!(SyscallKind::from_u32(1), Some(SyscallKind::Send));
        assert_eq!(SyscallKind::from_u32(2), Some(SyscallKind::Recv));
        assert_eq!(SyscallKind::from_u32(3), None);
    }
}
