//! Process-wide cancellation flag.
//!
//! Scans and the build poll this at leaf/page boundaries only; there is no
//! per-tuple polling. The embedder's signal handler requests, the worker
//! observes at the next boundary.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{IndexError, Result};

static INTERRUPT_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Request cancellation of running scans and builds
pub fn request() {
    INTERRUPT_REQUESTED.store(true, Ordering::Release);
}

/// Clear a pending request
pub fn reset() {
    INTERRUPT_REQUESTED.store(false, Ordering::Release);
}

/// Whether a request is pending
pub fn is_requested() -> bool {
    INTERRUPT_REQUESTED.load(Ordering::Acquire)
}

/// Fail with `Interrupted` when a request is pending
pub(crate) fn check() -> Result<()> {
    if is_requested() {
        Err(IndexError::Interrupted)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_observe_reset() {
        reset();
        assert!(check().is_ok());

        request();
        assert!(is_requested());
        assert!(matches!(check(), Err(IndexError::Interrupted)));

        reset();
        assert!(check().is_ok());
    }
}
