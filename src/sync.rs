//! Critical sections
//!
//! On Cortex-M the closure runs with interrupts masked. Hosted builds
//! rely on the `spin::Mutex` held by the caller instead.

/// Run `f` inside a critical section.
#[cfg(feature = "cortex-m")]
#[inline]
pub fn critical<R>(f: impl FnOnce() -> R) -> R {
    cortex_m::interrupt::free(|_| f())
}

/// Run `f` inside a critical section.
#[cfg(not(feature = "cortex-m"))]
#[inline]
pub fn critical<R>(f: impl FnOnce() -> R) -> R {
    #[cfg(test)]
    let _depth = depth::enter();
    f()
}


#[cfg(all(test, not(feature = "cortex-m")))]
mod tests {
    use super::*;

    #[test]
    fn test_critical_nesting() {
        assert!(!depth::in_critical());
        let inner = critical(|| critical(depth::in_critical));
        assert!(inner);
        assert!(!depth::in_critical());
    }
}
