//! `init` — `GPID_PROCESS`, the first user process the grass layer loads.
//!
//! Compiled as a flat binary and entered directly at `APPS_ENTRY` with
//! `(argc, argv)` in `a0`/`a1` (spec.md §4.5, §4.7). It loops forever,
//! receiving from anyone and echoing the message straight back to its
//! sender — enough to exercise the full rendezvous path (`send` blocks,
//! `recv` wakes it, content round-trips) without needing a real shell or
//! program loader, neither of which exist in this kernel.

#![no_std]
#![no_main]

use libmnos::{recv, send, Pid};

#[unsafe(no_mangle)]
pub extern "C" fn _start(_argc: usize, _argv: usize) -> ! {
    loop {
        let msg = recv(Pid::ANY);
        send(msg.sender, &msg.content);
    }
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {
        core::hint::spin_loop();
    }
}
