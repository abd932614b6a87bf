use super::types::Route;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Route lifecycle notification, published on the store's broadcast channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteEvent {
    Installed(Route),
    Changed { old: Route, new: Route },
    Deleted(Route),
}

impl RouteEvent {
    /// The route as it stands after the event.
    pub fn route(&self) -> &Route {
        match self {
            RouteEvent::Installed(route) | RouteEvent::Deleted(route) => route,
            RouteEvent::Changed { new, .. } => new,
        }
    }
}

/// "Optimize now" flag shared between the route store, the balancing loop
/// and external collaborators.
#[derive(Debug, Default)]
pub struct OptimizeTrigger {
    requested: AtomicBool,
    notify: Notify,
}

impl OptimizeTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes one waiter.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Clears the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_trigger_take_clears() {
        let trigger = OptimizeTrigger::new();
        assert!(!trigger.take());

        trigger.request();
        assert!(trigger.is_requested());
        assert!(trigger.take());
        assert!(!trigger.is_requested());
    }

    #[tokio::test]
    async fn test_trigger_wakes_waiter() {
        let trigger = Arc::new(OptimizeTrigger::new());
        let waiter = {
            let trigger = trigger.clone();
            tokio::spawn(async move { trigger.notified().await })
        };

        trigger.request();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
