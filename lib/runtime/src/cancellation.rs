//! Process-wide `runId -> cancelled` signal, safe for concurrent
//! read/write across the HTTP handler issuing a cancel and the task
//! actually running the interpreter loop.

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use workforge_core::RunId;

#[derive(Default)]
pub struct CancellationRegistry {
    tokens: DashMap<RunId, CancellationToken>,
}

impl CancellationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh token for a run about to start. Call once per
    /// run; a second call replaces the previous token (the old one is
    /// dropped, not cancelled, since it belongs to a run that no longer
    /// exists under this id).
    pub fn register(&self, run_id: RunId) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.insert(run_id, token.clone());
        token
    }

    /// Cancels a run's token if one is registered. Idempotent: cancelling
    /// an already-cancelled or unknown run is a no-op, never an error.
    pub fn cancel(&self, run_id: RunId) -> bool {
        match self.tokens.get(&run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self, run_id: RunId) -> bool {
        self.tokens.get(&run_id).is_some_and(|t| t.is_cancelled())
    }

    /// Drops the token for a run that has reached a terminal state, so
    /// the map doesn't grow unbounded over the server's lifetime.
    pub fn forget(&self, run_id: RunId) {
        self.tokens.remove(&run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent_and_unknown_runs_are_a_no_op() {
        let registry = CancellationRegistry::new();
        let run_id = RunId::new();

        assert!(!registry.cancel(run_id));

        let token = registry.register(run_id);
        assert!(!token.is_cancelled());

        assert!(registry.cancel(run_id));
        assert!(registry.cancel(run_id));
        assert!(token.is_cancelled());
        assert!(registry.is_cancelled(run_id));

        registry.forget(run_id);
        assert!(!registry.cancel(run_id));
    }
}
