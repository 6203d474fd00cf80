//! Userspace syscall library: safe wrappers around the grass layer's
//! rendezvous IPC ABI (`sys_send`/`sys_recv`).
//!
//! Grounded on `grass/kernel.c`'s `kernel_entry` syscall-copy-in step and
//! the original user-side wrappers in `library/mnos`: a user process
//! deposits a [`Syscall`] at the well-known shared address `SYSCALL_ARG`
//! and executes `ecall`; by the time control returns, the kernel has
//! overwritten that same buffer with the result (for `recv`, the actual
//! sender and the message content).
//!
//! `no_std`, no heap, no dependencies beyond `core` — every message is a
//! fixed-size inline buffer, so there is nothing here for an allocator to
//! do.

#![no_std]

use core::ptr::{read_volatile, write_volatile};

/// Fixed length of a syscall message's content field, matching the grass
/// layer's `SYSCALL_MSG_LEN`.
pub const SYSCALL_MSG_LEN: usize = 32;

/// Shared-memory address where a `Syscall` is deposited before `ecall` and
/// read back from afterwards. Must match the grass layer's
/// `boot::SYSCALL_ARG` — an ABI agreement fixed by the boot-time memory
/// layout, not something either side computes independently.
const SYSCALL_ARG: usize = 0x0A00_0000;

/// A process id. Zero is the "any sender" sentinel recognized by
/// [`recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pid(pub u32);

impl Pid {
    pub const ANY: Pid = Pid(0);

    #[inline]
    pub fn is_any(self) -> bool {
        self == Self::ANY
    }
}

#[repr(u32)]
enum SyscallKind {
    Send = 1,
    Recv = 2,
}

/// The wire layout of a syscall message. Field order and size must match
/// the grass layer's `process::Syscall` exactly — this is the kernel/user
/// ABI, not an internal detail either side is free to change alone.
#[repr(C)]
struct Syscall {
    kind_raw: u32,
    sender: u32,
    receiver: u32,
    content: [u8; SYSCALL_MSG_LEN],
}

/// Writes `msg` into `SYSCALL_ARG` and executes `ecall`, transferring
/// control to the grass layer's trap dispatcher. Returns once the kernel
/// has scheduled this process again (every syscall yields, so this is
/// also an involuntary preemption point).
///
/// # Safety
/// Must only run with `SYSCALL_ARG` mapped and owned exclusively by this
/// process — true for any process booted by the grass layer's init path.
unsafe fn syscall(msg: Syscall) -> Syscall {
    let arg = SYSCALL_ARG as *mut Syscall;
    // SAFETY: SYSCALL_ARG is this process's private syscall buffer.
    unsafe { write_volatile(arg, msg) };

    // SAFETY: ecall is always a valid instruction; it traps into the
    // kernel, which resumes this process (possibly much later) with
    // *arg already overwritten with the syscall's result.
    unsafe { core::arch::asm!("ecall", options(nostack)) };

    // SAFETY: the kernel has finished copying its reply into *arg by the
    // time this process is scheduled again.
    unsafe { read_volatile(arg) }
}

/// Sends `content` to `receiver`. Blocks until `receiver` calls
/// [`recv`] (directed at `receiver`'s own pid or [`Pid::ANY`]) and
/// consumes the message — there is no buffering.
///
/// `content` longer than [`SYSCALL_MSG_LEN`] is truncated.
pub fn send(receiver: Pid, content: &[u8]) {
    let mut buf = [0u8; SYSCALL_MSG_LEN];
    let n = content.len().min(SYSCALL_MSG_LEN);
    buf[..n].copy_from_slice(&content[..n]);

    let msg = Syscall { kind_raw: SyscallKind::Send as u32, sender: 0, receiver: receiver.0, content: buf };
    // SAFETY: see `syscall`.
    unsafe { syscall(msg) };
}

/// A message received from [`recv`]: who sent it, and how many content
/// bytes are valid (callers that know their protocol's message length can
/// ignore this and just read `content` directly).
pub struct Message {
    pub sender: Pid,
    pub content: [u8; SYSCALL_MSG_LEN],
}

/// Blocks until a message arrives from `desired` (or from anyone, if
/// `desired` is [`Pid::ANY`]), then returns it.
///
/// A directed receive (`desired != Pid::ANY`) returns the *first* queued
/// message from that sender; later messages from the same sender, if any,
/// stay queued for a later `recv`.
pub fn recv(desired: Pid) -> Message {
    let msg = Syscall {
        kind_raw: SyscallKind::Recv as u32,
        sender: desired.0,
        receiver: 0,
        content: [0; SYSCALL_MSG_LEN],
    };
    // SAFETY: see `syscall`.
    let reply = unsafe { syscall(msg) };
    Message { sender: Pid(reply.sender), content: reply.content }
}
