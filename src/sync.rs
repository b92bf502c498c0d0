//! # Synchronization Primitives
//!
//! Critical sections around the global engine state in [`crate::kernel`].
//!
//! On bare-metal Cortex-M targets a critical section masks interrupts, so a
//! tick handler cannot observe the engine halfway through a weight change.
//! Hosted builds already serialize through the engine's spin lock and run
//! the closure directly.

/// Execute a closure with interrupts masked (bare-metal ARM only).
#[cfg(all(target_arch = "arm", target_os = "none"))]
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    cortex_m::interrupt::free(|_cs| f())
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}
