//! Set-once termination latch shared by the session tasks.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::ClientError;

/// Carries the terminal error of a session. The first `set` wins; every
/// observer sees the same cause.
#[derive(Clone)]
pub(crate) struct Latch {
    tx: watch::Sender<Option<Arc<ClientError>>>,
}

impl Latch {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Latch the terminal error. Later calls are ignored.
    pub fn set(&self, err: ClientError) {
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(Arc::new(err));
                true
            } else {
                false
            }
        });
    }

    /// The terminal error, if the latch is set.
    #[allow(dead_code)] // used by tests; kept for symmetry with wait()
    pub fn get(&self) -> Option<Arc<ClientError>> {
        self.tx.borrow().clone()
    }

    /// Wait until the latch is set and return the terminal error.
    pub async fn wait(&self) -> Arc<ClientError> {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(err) = rx.borrow_and_update().clone() {
                return err;
            }
            // The sender lives at least as long as `self`.
            let _ = rx.changed().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_set_wins() {
        let latch = Latch::new();
        assert!(latch.get().is_none());

        latch.set(ClientError::Closed);
        latch.set(ClientError::Cancelled);
        assert!(matches!(*latch.wait().await, ClientError::Closed));
        assert!(matches!(
            latch.get().as_deref(),
            Some(ClientError::Closed)
        ));
    }

    #[tokio::test]
    async fn all_waiters_observe_the_same_error() {
        let latch = Latch::new();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let latch = latch.clone();
                tokio::spawn(async move { latch.wait().await })
            })
            .collect();

        latch.set(ClientError::Closed);
        for waiter in waiters {
            assert!(matches!(*waiter.await.unwrap(), ClientError::Closed));
        }
    }
}
