use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Shared, observable read deadline of a connection.
///
/// Setting the deadline wakes any read in progress so it re-arms against the
/// new instant. `None` means reads never time out.
#[derive(Debug, Clone)]
pub struct ReadDeadline {
    tx: Arc<watch::Sender<Option<Instant>>>,
}

impl ReadDeadline {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the deadline.
    pub fn set(&self, deadline: Option<Instant>) {
        self.tx.send_replace(deadline);
    }

    /// Move the deadline to `now + by`.
    pub fn extend(&self, by: Duration) {
        self.set(Some(Instant::now() + by));
    }

    /// The current deadline.
    #[must_use]
    pub fn get(&self) -> Option<Instant> {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<Instant>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_starts_unset() {
        assert_eq!(ReadDeadline::new().get(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_is_visible_to_clones_and_subscribers() {
        let deadline = ReadDeadline::new();
        let mut rx = deadline.subscribe();
        let clone = deadline.clone();

        clone.extend(Duration::from_secs(2));
        assert_eq!(deadline.get(), Some(Instant::now() + Duration::from_secs(2)));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), deadline.get());

        deadline.set(None);
        assert!(rx.has_changed().unwrap());
        assert_eq!(clone.get(), None);
    }
}
