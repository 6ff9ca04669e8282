//! Background session renewal
//!
//! A single task sleeps until the lease is about to expire, renews it and
//! repeats. It stops when its [`RenewalTask`] is shut down or dropped.

use crate::error::KmsError;
use async_trait::async_trait;
use pagevault_core::Deployment;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Shortest sleep between renewals, so a tiny lease cannot spin the loop
const MIN_RENEWAL_DELAY: Duration = Duration::from_secs(1);

/// The parts of a KMS client the renewal loop needs
#[async_trait]
pub trait SessionRenewer: Send + Sync {
    /// Remaining lease, or `None` if the token reports no TTL
    async fn lease_remaining(&self) -> Result<Option<Duration>, KmsError>;

    async fn renew(&self) -> Result<(), KmsError>;

    /// Flag the client as running without a renewable session
    fn mark_degraded(&self);
}

/// What to do when renewal fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalFailureAction {
    /// Exit the process; the supervisor restarts it with a fresh login
    Terminate,
    /// Stop renewing and mark the client degraded
    Degrade,
}

impl From<Deployment> for RenewalFailureAction {
    fn from(deployment: Deployment) -> Self {
        if deployment.is_production() {
            RenewalFailureAction::Terminate
        } else {
            RenewalFailureAction::Degrade
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenewalPolicy {
    /// Renew this long before the lease expires
    pub margin: Duration,
    /// Lease assumed when the token reports no TTL
    pub default_lease: Duration,
    pub on_failure: RenewalFailureAction,
}

impl RenewalPolicy {
    pub fn new(margin: Duration, default_lease: Duration, deployment: Deployment) -> Self {
        Self {
            margin,
            default_lease,
            on_failure: deployment.into(),
        }
    }

    /// How long to sleep before the next renewal
    pub fn delay_for(&self, remaining: Option<Duration>) -> Duration {
        remaining
            .unwrap_or(self.default_lease)
            .saturating_sub(self.margin)
            .max(MIN_RENEWAL_DELAY)
    }
}

/// How the renewal loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalOutcome {
    /// Shut down on request
    Stopped,
    /// Renewal failed and the client was marked degraded
    Degraded(String),
}

/// Handle to the running renewal loop
pub struct RenewalTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<RenewalOutcome>,
}

impl RenewalTask {
    /// Stop the loop and wait for it to finish
    pub async fn shutdown(self) -> RenewalOutcome {
        let _ = self.shutdown.send(true);
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => RenewalOutcome::Degraded(format!("renewal task failed: {}", e)),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Start the renewal loop for `renewer`
pub fn spawn_renewal<R>(renewer: Arc<R>, policy: RenewalPolicy) -> RenewalTask
where
    R: SessionRenewer + 'static,
{
    let (shutdown, rx) = watch::channel(false);
    let handle = tokio::spawn(renewal_loop(renewer, policy, rx));
    RenewalTask { shutdown, handle }
}

async fn renewal_loop<R>(
    renewer: Arc<R>,
    policy: RenewalPolicy,
    mut shutdown: watch::Receiver<bool>,
) -> RenewalOutcome
where
    R: SessionRenewer + ?Sized,
{
    loop {
        let remaining = match renewer.lease_remaining().await {
            Ok(remaining) => remaining,
            Err(e) => return renewal_failed(renewer.as_ref(), &policy, e),
        };

        let delay = policy.delay_for(remaining);
        debug!(delay_secs = delay.as_secs(), "Scheduling KMS session renewal");

        tokio::select! {
            // Also fires when the sender is dropped
            _ = shutdown.changed() => {
                debug!("KMS session renewal stopped");
                return RenewalOutcome::Stopped;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        if let Err(e) = renewer.renew().await {
            return renewal_failed(renewer.as_ref(), &policy, e);
        }
    }
}

fn renewal_failed<R>(renewer: &R, policy: &RenewalPolicy, err: KmsError) -> RenewalOutcome
where
    R: SessionRenewer + ?Sized,
{
    match policy.on_failure {
        RenewalFailureAction::Terminate => {
            error!(error = %err, "KMS session renewal failed, terminating");
            std::process::exit(1);
        }
        RenewalFailureAction::Degrade => {
            warn!(error = %err, "KMS session renewal failed, continuing degraded");
            renewer.mark_degraded();
            RenewalOutcome::Degraded(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct FakeRenewer {
        lease: Option<Duration>,
        renewals: AtomicU32,
        fail_after: Option<u32>,
        degraded: AtomicBool,
    }

    impl FakeRenewer {
        fn new(lease: Option<Duration>, fail_after: Option<u32>) -> Arc<Self> {
            Arc::new(Self {
                lease,
                renewals: AtomicU32::new(0),
                fail_after,
                degraded: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl SessionRenewer for FakeRenewer {
        async fn lease_remaining(&self) -> Result<Option<Duration>, KmsError> {
            Ok(self.lease)
        }

        async fn renew(&self) -> Result<(), KmsError> {
            let n = self.renewals.fetch_add(1, Ordering::SeqCst) + 1;
            match self.fail_after {
                Some(limit) if n > limit => Err(KmsError::Renewal("token expired".into())),
                _ => Ok(()),
            }
        }

        fn mark_degraded(&self) {
            self.degraded.store(true, Ordering::SeqCst);
        }
    }

    fn dev_policy() -> RenewalPolicy {
        RenewalPolicy::new(
            Duration::from_secs(20),
            Duration::from_secs(600),
            Deployment::Development,
        )
    }

    #[test]
    fn test_delay_for() {
        let policy = dev_policy();
        assert_eq!(
            policy.delay_for(Some(Duration::from_secs(120))),
            Duration::from_secs(100)
        );
        assert_eq!(policy.delay_for(None), Duration::from_secs(580));
        assert_eq!(
            policy.delay_for(Some(Duration::from_secs(5))),
            MIN_RENEWAL_DELAY
        );
    }

    #[test]
    fn test_failure_action_follows_deployment() {
        assert_eq!(
            RenewalFailureAction::from(Deployment::Production),
            RenewalFailureAction::Terminate
        );
        assert_eq!(
            RenewalFailureAction::from(Deployment::Development),
            RenewalFailureAction::Degrade
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_renews_before_expiry() {
        let renewer = FakeRenewer::new(Some(Duration::from_secs(120)), None);
        let task = spawn_renewal(renewer.clone(), dev_policy());

        tokio::time::sleep(Duration::from_secs(99)).await;
        assert_eq!(renewer.renewals.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(renewer.renewals.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(renewer.renewals.load(Ordering::SeqCst), 2);

        assert_eq!(task.shutdown().await, RenewalOutcome::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_degrades_in_development() {
        let renewer = FakeRenewer::new(None, Some(1));
        let task = spawn_renewal(renewer.clone(), dev_policy());

        tokio::time::sleep(Duration::from_secs(2 * 580 + 1)).await;
        assert!(task.is_finished());
        assert!(renewer.degraded.load(Ordering::SeqCst));

        let outcome = task.shutdown().await;
        assert!(matches!(outcome, RenewalOutcome::Degraded(ref m) if m.contains("token expired")));
        assert_eq!(renewer.renewals.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_sleep() {
        let renewer = FakeRenewer::new(Some(Duration::from_secs(3600)), None);
        let task = spawn_renewal(renewer.clone(), dev_policy());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(task.shutdown().await, RenewalOutcome::Stopped);
        assert_eq!(renewer.renewals.load(Ordering::SeqCst), 0);
    }
}
