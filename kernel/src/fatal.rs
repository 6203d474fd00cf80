//! Uniform fatal-error reporting.
//!
//! Every error this kernel can observe — resource exhaustion, an invariant
//! violation, an unrecognized trap cause — is fatal: there is no recovery
//! path, no error code threaded back to a caller. `fatal!` formats a
//! diagnostic, logs it, and panics. The panic handler in `crate::util::panic`
//! takes it from there.

/// Reports a fatal kernel error and halts.
///
/// Accepts the same argument forms as [`format_args!`]. Never returns —
/// the expression has type `!`.
///
/// ```ignore
/// fatal!("proc_free({}): senderQ is not empty", pid);
/// ```
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
        panic!($($arg)*)
    }};
}
