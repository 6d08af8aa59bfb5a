use async_trait::async_trait;
use tokio::sync::watch;

pub type UserId = String;

/// State of the buyer identity lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityStatus {
    Pending,
    /// Lookup finished; `None` is a guest.
    Resolved(Option<UserId>),
}

/// Write half of the identity channel, held by whatever resolves the buyer.
#[derive(Debug)]
pub struct IdentityPublisher {
    tx: watch::Sender<IdentityStatus>,
}

impl IdentityPublisher {
    /// Publishes the resolved identity. May be called again if the identity
    /// changes after the first resolution.
    pub fn resolve(&self, user: Option<UserId>) {
        self.tx.send_replace(IdentityStatus::Resolved(user));
    }
}

/// Read half of the identity channel. The reconciliation flow waits on it
/// before doing any I/O.
#[derive(Debug, Clone)]
pub struct IdentityGate {
    rx: watch::Receiver<IdentityStatus>,
}

/// Creates a gate in the pending state together with its publisher.
pub fn identity_channel() -> (IdentityPublisher, IdentityGate) {
    let (tx, rx) = watch::channel(IdentityStatus::Pending);
    (IdentityPublisher { tx }, IdentityGate { rx })
}

impl IdentityGate {
    /// A gate that is already resolved, for hosts that know the buyer up front.
    pub fn resolved(user: Option<UserId>) -> Self {
        let (tx, rx) = watch::channel(IdentityStatus::Resolved(user));
        drop(tx);
        Self { rx }
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.rx.borrow(), IdentityStatus::Pending)
    }

    /// Waits until the lookup has finished and returns the identity at that
    /// moment. A publisher dropped while still pending resolves to a guest.
    pub async fn wait_resolved(&self) -> Option<UserId> {
        let mut rx = self.rx.clone();
        let user = match rx
            .wait_for(|status| !matches!(status, IdentityStatus::Pending))
            .await
        {
            Ok(status) => match &*status {
                IdentityStatus::Resolved(user) => user.clone(),
                IdentityStatus::Pending => None,
            },
            Err(_) => None,
        };
        user
    }

    /// Latest published identity; `None` while pending or for a guest.
    pub fn current_user(&self) -> Option<UserId> {
        match &*self.rx.borrow() {
            IdentityStatus::Resolved(user) => user.clone(),
            IdentityStatus::Pending => None,
        }
    }
}

/// Secondary, direct read of the signed-in user.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_user_id(&self) -> Option<UserId>;
}

/// Provider that never knows anyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIdentity;

#[async_trait]
impl IdentityProvider for NoIdentity {
    async fn current_user_id(&self) -> Option<UserId> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn gate_waits_for_publisher() {
        let (publisher, gate) = identity_channel();
        assert!(gate.is_pending());

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_resolved().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        publisher.resolve(Some("user-7".into()));
        assert_eq!(waiter.await.unwrap().as_deref(), Some("user-7"));
        assert!(!gate.is_pending());
    }

    #[tokio::test]
    async fn dropped_publisher_resolves_to_guest() {
        let (publisher, gate) = identity_channel();
        drop(publisher);
        assert_eq!(gate.wait_resolved().await, None);
    }

    #[tokio::test]
    async fn current_user_tracks_latest_value() {
        let (publisher, gate) = identity_channel();
        assert_eq!(gate.current_user(), None);
        publisher.resolve(None);
        assert_eq!(gate.wait_resolved().await, None);
        publisher.resolve(Some("late".into()));
        assert_eq!(gate.current_user().as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn pre_resolved_gate_does_not_block() {
        let gate = IdentityGate::resolved(Some("u".into()));
        assert!(!gate.is_pending());
        assert_eq!(gate.wait_resolved().await.as_deref(), Some("u"));
    }
}
