//! Hierarchical cooperative cancellation.
//!
//! A [`ShutdownToken`] forms a tree: server -> hub -> room -> client.
//! Cancelling a token cancels every descendant; cancelling a child leaves
//! its ancestors running. Built on `tokio::sync::watch` so waiting tasks
//! park on a channel instead of polling. Dropping the last handle of a
//! token counts as cancelling it.

use futures_util::future::select_all;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct ShutdownToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
    ancestors: Vec<watch::Receiver<bool>>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
            ancestors: Vec::new(),
        }
    }

    /// A token one level down the tree. It observes every ancestor's
    /// cancellation but cancels independently of them.
    pub fn child(&self) -> ShutdownToken {
        let (sender, receiver) = watch::channel(false);
        let mut ancestors = self.ancestors.clone();
        ancestors.push(self.receiver.clone());
        Self {
            sender: Arc::new(sender),
            receiver,
            ancestors,
        }
    }

    /// Idempotent.
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        if *self.receiver.borrow() {
            return true;
        }
        self.ancestors
            .iter()
            .any(|rx| *rx.borrow() || rx.has_changed().is_err())
    }

    /// Resolves when this token or any ancestor cancels.
    pub async fn cancelled(&self) {
        let mut receivers: Vec<watch::Receiver<bool>> = Vec::with_capacity(self.ancestors.len() + 1);
        receivers.push(self.receiver.clone());
        receivers.extend(self.ancestors.iter().cloned());

        loop {
            if receivers.iter().any(|rx| *rx.borrow()) {
                return;
            }
            let waits = receivers
                .iter_mut()
                .map(|rx| Box::pin(rx.changed()))
                .collect::<Vec<_>>();
            let (result, _, _) = select_all(waits).await;
            if result.is_err() {
                // A sender was dropped without signalling; treat as cancelled.
                return;
            }
        }
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_resolves_waiters() {
        let token = ShutdownToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should resolve")
            .unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn parent_cancel_reaches_grandchildren() {
        let parent = ShutdownToken::new();
        let child = parent.child();
        let grandchild = child.child();

        assert!(!grandchild.is_cancelled());
        parent.cancel();
        assert!(grandchild.is_cancelled());

        tokio::time::timeout(Duration::from_secs(1), grandchild.cancelled())
            .await
            .expect("grandchild should observe parent cancel");
    }

    #[tokio::test]
    async fn child_cancel_leaves_parent_running() {
        let parent = ShutdownToken::new();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let token = ShutdownToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }
}
