//! Cooperative cancellation of a run.
//!
//! A [`TerminationToken`] is a latched flag shared between the run loop and
//! whatever wants to stop it: a signal handler task, an operator thread, a
//! test. Setting the flag is the only thing a holder can do; the run loop
//! reads it at slice boundaries only, so a slice that has started always
//! completes and collaborators never observe torn state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared, latched termination flag.
///
/// Clones refer to the same flag.
#[derive(Debug, Clone, Default)]
pub struct TerminationToken {
    flag: Arc<AtomicBool>,
}

impl TerminationToken {
    /// Create a clear token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request termination at the next slice boundary.
    ///
    /// Safe to call from any thread, any number of times.
    pub fn terminate(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether termination has been requested.
    pub fn is_terminated(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Clear the flag. Only a full manager reset does this.
    pub(crate) fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_starts_clear() {
        assert!(!TerminationToken::new().is_terminated());
    }

    #[test]
    fn clones_share_the_flag() {
        let token = TerminationToken::new();
        let handle = token.clone();
        handle.terminate();
        assert!(token.is_terminated());
    }

    #[test]
    fn flag_stays_latched_until_cleared() {
        let token = TerminationToken::new();
        token.terminate();
        token.terminate();
        assert!(token.is_terminated());
        token.clear();
        assert!(!token.is_terminated());
    }

    #[test]
    fn terminate_from_another_thread() {
        let token = TerminationToken::new();
        let handle = token.clone();
        let joined = std::thread::spawn(move || handle.terminate()).join();
        assert!(joined.is_ok());
        assert!(token.is_terminated());
    }
}
