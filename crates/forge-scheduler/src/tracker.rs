//! Cooperative cancellation and progress checkpoints.

/// Run-level control surface the scheduler polls between task
/// completions. Production backs this with the orchestrator's task
/// record; tests and standalone runs use [`NullTracker`].
pub trait TaskTracker: Send + Sync {
    /// Whether an operator has requested cancellation. Polled, never
    /// pushed; an in-flight compile finishes before the answer matters.
    fn cancelled(&self) -> bool;

    /// Record that the run is still making progress.
    fn checkpoint(&self);
}

/// Tracker that never cancels and records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTracker;

impl TaskTracker for NullTracker {
    fn cancelled(&self) -> bool {
        false
    }

    fn checkpoint(&self) {}
}
