// =============================================================================
// grass-kernel — Kernel Panic Handler
// =============================================================================
//
// Every error this kernel can observe is fatal (see `fatal!` in
// `crate::fatal`): a resource exhaustion, an invariant violation, or an
// unrecognized trap cause all end up here, one way or another, via
// `panic!()`. A kernel panic means the trusted computing base is in a
// state it cannot reason about further, so there is no recovery — just a
// diagnostic and a halt.
//
// No stack unwinding (the workspace builds with panic = "abort"), no core
// dump, no reboot. The hart parks on `wfi` forever so a debugger can be
// attached and the diagnostic read back.
// =============================================================================

use core::panic::PanicInfo;

/// The kernel panic handler, installed as the `#[panic_handler]` for the
/// `riscv64` target build (this module is not compiled under `cfg(test)`,
/// where the host's own panic handler runs instead).
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    if let Some(location) = info.location() {
        log::error!("KERNEL PANIC at {}:{}: {}", location.file(), location.line(), info.message());
    } else {
        log::error!("KERNEL PANIC: {}", info.message());
    }

    halt_forever()
}

/// Parks the current hart forever.
///
/// Disables interrupts (so a stray timer tick cannot wake and re-trap the
/// hart) and loops on `wfi` — no code runs after this point.
fn halt_forever() -> ! {
    unsafe { riscv::register::mstatus::clear_mie() };
    loop {
        riscv::asm::wfi();
    }
}
