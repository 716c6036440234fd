use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::auth::Claims;

/// What `arm` decided to do with a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    /// Renewal will run after `delay`.
    Armed { delay: Duration },
    /// The credential is already inside the safety margin; renewal was
    /// scheduled to run immediately.
    RenewNow,
}

struct PendingRenewal {
    id: u64,
    delay: Duration,
    handle: JoinHandle<()>,
}

/// Keeps at most one renewal timer armed.
pub struct ExpiryScheduler {
    safety_margin: Duration,
    next_id: u64,
    pending: Option<PendingRenewal>,
}

impl ExpiryScheduler {
    pub fn new(safety_margin: Duration) -> Self {
        Self {
            safety_margin,
            next_id: 0,
            pending: None,
        }
    }

    /// Margin actually applied to `claims`: the configured one, but never
    /// more than half of the token's lifetime. A token shorter than twice
    /// the margin is renewed at its midpoint instead of straight away.
    pub fn effective_margin(&self, claims: &Claims) -> Duration {
        let half_life = claims
            .lifetime()
            .and_then(|lifetime| (lifetime / 2).to_std().ok());
        match half_life {
            Some(half_life) => self.safety_margin.min(half_life),
            None => self.safety_margin,
        }
    }

    /// Time to wait before renewing, or `None` if renewal is due now.
    pub fn renewal_delay(&self, claims: &Claims, now: DateTime<Utc>) -> Option<Duration> {
        let margin = self.effective_margin(claims);
        let margin_ms = i64::try_from(margin.as_millis()).unwrap_or(i64::MAX);
        let remaining_ms = (claims.expires_at - now)
            .num_milliseconds()
            .saturating_sub(margin_ms);
        u64::try_from(remaining_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Arm the renewal timer for `claims`, replacing any pending one.
    ///
    /// `on_fire` receives the timer id and must pass it to [`claim_fired`]
    /// before doing anything else.
    ///
    /// [`claim_fired`]: ExpiryScheduler::claim_fired
    pub fn arm<F, Fut>(&mut self, claims: &Claims, on_fire: F) -> ArmOutcome
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();

        let delay = self.renewal_delay(claims, Utc::now());
        let outcome = match delay {
            Some(delay) => ArmOutcome::Armed { delay },
            None => ArmOutcome::RenewNow,
        };
        let delay = delay.unwrap_or(Duration::ZERO);

        self.next_id += 1;
        let id = self.next_id;
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            on_fire(id).await;
        });

        debug!(
            timer = id,
            delay_secs = delay.as_secs(),
            expires_at = %claims.expires_at,
            "Renewal timer armed"
        );
        self.pending = Some(PendingRenewal { id, delay, handle });
        outcome
    }

    /// Abort the pending timer, if any.
    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.handle.abort();
            debug!(timer = pending.id, "Renewal timer cancelled");
        }
    }

    /// Called by a timer that just fired. Detaches it from the scheduler so
    /// the renewal it drives is no longer "pending". Returns false when the
    /// timer was replaced or cancelled in the meantime.
    pub fn claim_fired(&mut self, id: u64) -> bool {
        match self.pending {
            Some(ref pending) if pending.id == id => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_delay(&self) -> Option<Duration> {
        self.pending.as_ref().map(|p| p.delay)
    }
}

impl Drop for ExpiryScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
