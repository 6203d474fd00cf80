//! Small bits of glue that only make sense on the real target (the panic
//! handler lang item can't coexist with the host's own under `cfg(test)`).

pub mod panic;
