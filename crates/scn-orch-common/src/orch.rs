//! Base Orch trait.

use async_trait::async_trait;

/// Base trait for all orchestration agents.
///
/// Each Orch owns one slice of the controller's work (applying path
/// requests, ingesting telemetry, rebalancing) and is driven by the daemon
/// loop. The daemon serialises all calls, so an Orch never runs
/// concurrently with another one.
///
/// # Lifecycle
///
/// 1. Construction: the Orch is created with handles to shared state
/// 2. Registration: the daemon orders Orchs by [`Orch::priority`]
/// 3. Event loop: `do_task()` is called whenever `has_pending_tasks()` is true
/// 4. Shutdown: the Orch is dropped
#[async_trait]
pub trait Orch: Send + Sync {
    /// Returns the name of this Orch (for logging and debugging).
    fn name(&self) -> &str;

    /// Processes all pending work.
    ///
    /// Failures are handled inside: an Orch logs and moves on rather than
    /// stopping the daemon loop.
    async fn do_task(&mut self);

    /// Returns the priority of this Orch (lower = processed first).
    fn priority(&self) -> i32 {
        0
    }

    /// Returns true if this Orch has pending work.
    fn has_pending_tasks(&self) -> bool {
        false
    }

    /// Dumps pending work for debugging.
    fn dump_pending_tasks(&self) -> Vec<String> {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingOrch {
        remaining: usize,
        runs: usize,
    }

    #[async_trait]
    impl Orch for CountingOrch {
        fn name(&self) -> &str {
            "CountingOrch"
        }

        async fn do_task(&mut self) {
            self.runs += 1;
            self.remaining = self.remaining.saturating_sub(1);
        }

        fn has_pending_tasks(&self) -> bool {
            self.remaining > 0
        }
    }

    #[tokio::test]
    async fn test_orch_defaults() {
        let mut orch = CountingOrch {
            remaining: 1,
            runs: 0,
        };

        assert_eq!(orch.name(), "CountingOrch");
        assert_eq!(orch.priority(), 0);
        assert!(orch.dump_pending_tasks().is_empty());
        assert!(orch.has_pending_tasks());

        orch.do_task().await;
        assert_eq!(orch.runs, 1);
        assert!(!orch.has_pending_tasks());
    }
}
