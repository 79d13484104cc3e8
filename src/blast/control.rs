//! Global pause switch shared by every blast.

use tokio::sync::watch;

/// Process-wide pause flag. Waiters suspend on the underlying watch channel
/// instead of polling.
pub struct PauseSwitch {
    tx: watch::Sender<bool>,
}

impl Default for PauseSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseSwitch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Set the flag. Returns `false` if it was already set.
    pub fn pause(&self) -> bool {
        self.tx.send_if_modified(|paused| !std::mem::replace(paused, true))
    }

    /// Clear the flag. Returns `false` if it was already clear.
    pub fn resume(&self) -> bool {
        self.tx.send_if_modified(|paused| std::mem::replace(paused, false))
    }

    pub fn is_paused(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the flag is clear.
    pub async fn wait_resumed(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn pause_and_resume_report_changes() {
        let switch = PauseSwitch::new();
        assert!(!switch.is_paused());
        assert!(switch.pause());
        assert!(!switch.pause());
        assert!(switch.is_paused());
        assert!(switch.resume());
        assert!(!switch.resume());
    }

    #[tokio::test]
    async fn waiters_wake_on_resume() {
        let switch = Arc::new(PauseSwitch::new());
        switch.pause();

        let waiter = {
            let switch = Arc::clone(&switch);
            tokio::spawn(async move { switch.wait_resumed().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        switch.resume();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
