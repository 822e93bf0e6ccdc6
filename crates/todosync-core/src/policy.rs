//! Live sync policy.
//!
//! The server reads the policy once per request, so a change takes effect on
//! the next session without a restart. A push temporarily forces pulls on
//! through a [`PullOverride`] guard; overrides nest and the base flag is never
//! touched, so the prior value is restored on every exit path.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use crate::config::ServerConfig;

/// Policy flags observed by one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicySnapshot {
    /// Serve pull requests.
    pub allow_pull: bool,
    /// Accept push invitations.
    pub allow_push: bool,
}

/// Shared, mutable allow-pull / allow-push flags.
#[derive(Debug)]
pub struct SyncPolicy {
    allow_pull: AtomicBool,
    allow_push: AtomicBool,
    pull_overrides: AtomicUsize,
}

impl SyncPolicy {
    /// Policy with the given base flags.
    pub fn new(allow_pull: bool, allow_push: bool) -> Self {
        Self {
            allow_pull: AtomicBool::new(allow_pull),
            allow_push: AtomicBool::new(allow_push),
            pull_overrides: AtomicUsize::new(0),
        }
    }

    /// Policy from the `[server]` section.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.allow_pull, config.allow_push)
    }

    /// Effective flags right now.
    pub fn snapshot(&self) -> PolicySnapshot {
        PolicySnapshot {
            allow_pull: self.allow_pull.load(Ordering::SeqCst)
                || self.pull_overrides.load(Ordering::SeqCst) > 0,
            allow_push: self.allow_push.load(Ordering::SeqCst),
        }
    }

    /// Set the base allow-pull flag.
    pub fn set_allow_pull(&self, allow: bool) {
        self.allow_pull.store(allow, Ordering::SeqCst);
    }

    /// Set the allow-push flag.
    pub fn set_allow_push(&self, allow: bool) {
        self.allow_push.store(allow, Ordering::SeqCst);
    }

    /// Force pulls on until the returned guard is dropped.
    pub fn override_pull(self: &Arc<Self>) -> PullOverride {
        let engaged = !self.allow_pull.load(Ordering::SeqCst);
        self.pull_overrides.fetch_add(1, Ordering::SeqCst);
        if engaged {
            tracing::debug!("pull temporarily enabled for push");
        }
        PullOverride { policy: Arc::clone(self), engaged }
    }
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self::new(true, true)
    }
}

/// Keeps pulls enabled while alive.
#[derive(Debug)]
#[must_use = "pulls are only forced on while the guard is alive"]
pub struct PullOverride {
    policy: Arc<SyncPolicy>,
    engaged: bool,
}

impl PullOverride {
    /// True if pulls were disabled when the guard was taken, i.e. the guard
    /// changed the effective policy.
    pub fn engaged(&self) -> bool {
        self.engaged
    }
}

impl Drop for PullOverride {
    fn drop(&mut self) {
        self.policy.pull_overrides.fetch_sub(1, Ordering::SeqCst);
        if self.engaged {
            tracing::debug!("pull override released");
        }
    }
}
