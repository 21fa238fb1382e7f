//! Per-target glue: context switch primitives, trap entry, and the initial
//! stack-frame layout for a freshly `RUN` thread.
//!
//! Exactly one backend is compiled in, selected by Cargo feature, mirroring
//! the reference kernel's `arch` split.

#[cfg(feature = "cortex_m")]
pub mod cortex_m;
#[cfg(feature = "std")]
pub mod dummy;
#[cfg(feature = "rv64")]
pub mod rv64;

#[cfg(feature = "cortex_m")]
pub use self::cortex_m::*;
#[cfg(feature = "std")]
pub use dummy::*;
#[cfg(feature = "rv64")]
pub use rv64::*;
