//! Client secret cache and refresh coalescing.
//!
//! A refresh is led by exactly one caller. Callers arriving while it is
//! pending subscribe to the leader's outcome instead of hitting the broker.

use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::time::Instant;

use crate::error::PanelError;

/// How long a fetched secret may be handed back without asking the broker.
pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);
/// Quiet period the leader waits before calling the broker.
pub const DEBOUNCE: Duration = Duration::from_millis(500);
/// Longest a follower waits for the leader.
pub const WAIT_LIMIT: Duration = Duration::from_secs(10);

pub type RefreshResult = Result<String, PanelError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSecret {
    pub secret: String,
    pub fetched_at: Instant,
}

#[derive(Debug)]
pub struct SessionCache {
    entry: Option<CachedSecret>,
    ttl: Duration,
}

impl SessionCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entry: None, ttl }
    }

    /// The cached secret, if still fresh and still the one the widget holds.
    pub fn lookup(&self, current: Option<&str>, now: Instant) -> Option<String> {
        let entry = self.entry.as_ref()?;
        let fresh = now.saturating_duration_since(entry.fetched_at) < self.ttl;
        (fresh && current == Some(entry.secret.as_str())).then(|| entry.secret.clone())
    }

    pub fn store(&mut self, secret: String, now: Instant) {
        self.entry = Some(CachedSecret {
            secret,
            fetched_at: now,
        });
    }

    pub fn clear(&mut self) {
        self.entry = None;
    }
}

/// Who does the work for this call.
pub enum Turn {
    Leader(RefreshLease),
    Follower(watch::Receiver<Option<RefreshResult>>),
}

/// Held by the leader; followers see the outcome once it is finished.
/// Dropping it unfinished releases the followers with `RefreshFailed`.
pub struct RefreshLease {
    tx: watch::Sender<Option<RefreshResult>>,
}

impl RefreshLease {
    pub fn finish(self, result: RefreshResult) {
        self.tx.send_replace(Some(result));
    }
}

#[derive(Default)]
pub struct RefreshGate {
    pending: Mutex<Option<watch::Receiver<Option<RefreshResult>>>>,
}

impl RefreshGate {
    pub async fn enter(&self) -> Turn {
        let mut pending = self.pending.lock().await;
        if let Some(rx) = pending.as_ref() {
            // Live leader that has not published yet.
            if rx.has_changed().is_ok() && rx.borrow().is_none() {
                return Turn::Follower(rx.clone());
            }
        }

        let (tx, rx) = watch::channel(None);
        *pending = Some(rx);
        Turn::Leader(RefreshLease { tx })
    }
}

/// Wait for a leader's outcome, failing after `limit`.
pub async fn follow(
    mut rx: watch::Receiver<Option<RefreshResult>>,
    limit: Duration,
) -> RefreshResult {
    match tokio::time::timeout(limit, rx.wait_for(Option::is_some)).await {
        Ok(Ok(outcome)) => outcome.clone().unwrap_or(Err(PanelError::RefreshFailed)),
        Ok(Err(_)) => Err(PanelError::RefreshFailed),
        Err(_) => Err(PanelError::RefreshTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn cache_requires_matching_current_secret() {
        let mut cache = SessionCache::new(CACHE_TTL);
        let now = Instant::now();
        cache.store("ek_1".into(), now);

        assert_eq!(cache.lookup(Some("ek_1"), now), Some("ek_1".into()));
        assert_eq!(cache.lookup(None, now), None);
        assert_eq!(cache.lookup(Some("ek_other"), now), None);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_expires_after_ttl() {
        let mut cache = SessionCache::new(CACHE_TTL);
        let now = Instant::now();
        cache.store("ek_1".into(), now);

        let almost = now + CACHE_TTL - Duration::from_millis(1);
        assert!(cache.lookup(Some("ek_1"), almost).is_some());
        assert!(cache.lookup(Some("ek_1"), now + CACHE_TTL).is_none());

        cache.clear();
        assert!(cache.lookup(Some("ek_1"), now).is_none());
    }

    #[tokio::test]
    async fn second_caller_follows_the_leader() {
        let gate = RefreshGate::default();
        let Turn::Leader(lease) = gate.enter().await else {
            panic!("first caller should lead");
        };
        let Turn::Follower(rx) = gate.enter().await else {
            panic!("second caller should follow");
        };

        lease.finish(Ok("ek_shared".into()));
        assert_eq!(follow(rx, WAIT_LIMIT).await.unwrap(), "ek_shared");

        // Finished refresh frees the gate.
        assert!(matches!(gate.enter().await, Turn::Leader(_)));
    }

    #[tokio::test]
    async fn followers_see_leader_failure() {
        let gate = RefreshGate::default();
        let Turn::Leader(lease) = gate.enter().await else {
            panic!("first caller should lead");
        };
        let Turn::Follower(rx) = gate.enter().await else {
            panic!("second caller should follow");
        };

        lease.finish(Err(PanelError::WorkflowNotConfigured));
        assert!(matches!(
            follow(rx, WAIT_LIMIT).await,
            Err(PanelError::WorkflowNotConfigured)
        ));
    }

    #[tokio::test]
    async fn abandoned_lease_releases_followers() {
        let gate = RefreshGate::default();
        let Turn::Leader(lease) = gate.enter().await else {
            panic!("first caller should lead");
        };
        let Turn::Follower(rx) = gate.enter().await else {
            panic!("second caller should follow");
        };

        drop(lease);
        assert!(matches!(
            follow(rx, WAIT_LIMIT).await,
            Err(PanelError::RefreshFailed)
        ));
        assert!(matches!(gate.enter().await, Turn::Leader(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn follower_gives_up_after_wait_limit() {
        let gate = RefreshGate::default();
        let Turn::Leader(_lease) = gate.enter().await else {
            panic!("first caller should lead");
        };
        let Turn::Follower(rx) = gate.enter().await else {
            panic!("second caller should follow");
        };

        let start = Instant::now();
        assert!(matches!(
            follow(rx, WAIT_LIMIT).await,
            Err(PanelError::RefreshTimeout)
        ));
        assert_eq!(start.elapsed(), WAIT_LIMIT);
    }
}
