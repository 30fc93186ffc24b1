//! Debug-build ownership ledger for circulating frame buffers.
//!
//! The single-owner protocol is a convention, not a reference count. In
//! debug builds this module records which component currently carries the
//! return obligation for each buffer id, so a double return (double free)
//! or a double claim (double ownership) trips an assertion in tests instead
//! of corrupting a frame in the field. Release builds compile every call to
//! a no-op.

#[cfg(debug_assertions)]
use once_cell::sync::Lazy;
#[cfg(debug_assertions)]
use std::collections::HashMap;
#[cfg(debug_assertions)]
use std::sync::Mutex;

#[cfg(debug_assertions)]
static LEDGER: Lazy<Mutex<HashMap<u64, &'static str>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Record that `holder` now carries the return obligation for buffer `id`.
pub fn claim(id: u64, holder: &'static str) {
    #[cfg(debug_assertions)]
    {
        let mut ledger = LEDGER.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = ledger.insert(id, holder) {
            panic!(
                "buffer {} claimed by {} while still owed by {}",
                id, holder, previous
            );
        }
    }
    #[cfg(not(debug_assertions))]
    {
        let _ = (id, holder);
    }
}

/// Record that the obligation for buffer `id` was discharged.
pub fn release(id: u64) {
    #[cfg(debug_assertions)]
    {
        let mut ledger = LEDGER.lock().unwrap_or_else(|e| e.into_inner());
        if ledger.remove(&id).is_none() {
            panic!("buffer {} released twice", id);
        }
    }
    #[cfg(not(debug_assertions))]
    {
        let _ = id;
    }
}

/// Number of buffers currently owed to an owner. Test harnesses assert this
/// returns to zero after a terminating flush.
pub fn live_count() -> usize {
    #[cfg(debug_assertions)]
    {
        LEDGER.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
    #[cfg(not(debug_assertions))]
    {
        0
    }
}

#[cfg(all(test, debug_assertions))]
mod tests {
    use super::*;

    // Ledger state is process-global; keep ids unique per test.

    #[test]
    fn claim_and_release_balance() {
        claim(1_000_001, "stage-a");
        assert!(live_count() >= 1);
        release(1_000_001);
    }

    #[test]
    #[should_panic(expected = "claimed by")]
    fn double_claim_panics() {
        claim(1_000_002, "stage-a");
        claim(1_000_002, "stage-b");
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn double_release_panics() {
        claim(1_000_003, "stage-a");
        release(1_000_003);
        release(1_000_003);
    }
}
