//! Programming-Error Checks
//!
//! Thread-affinity and misuse checks. A failed check is a bug in the caller:
//! it panics in debug builds and is logged and tolerated in release builds.

/// Report a failed check. Returns `ok` so callers can fall back.
#[track_caller]
pub(crate) fn debug_check(ok: bool, msg: &str) -> bool {
    if !ok {
        let location = std::panic::Location::caller();
        tracing::error!(%location, "{}", msg);
        #[cfg(debug_assertions)]
        cold_panic(msg);
    }
    ok
}

#[cold]
#[inline(never)]
#[cfg(debug_assertions)]
#[track_caller]
fn cold_panic(msg: &str) -> ! {
    panic!("{}", msg)
}
