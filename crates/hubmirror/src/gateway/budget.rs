//! Priority-aware rate budget shared per upstream credential.
//!
//! Every request drains one token from a per-credential bucket. Interactive
//! requests (those gating access-control decisions) are served ahead of
//! Background ones when both are queued, without starving Background:
//! Background acquisitions proceed whenever no Interactive acquisition is
//! waiting on the bucket.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::Notify;

use super::RequestPriority;

/// Type alias for the governor rate limiter.
type GovernorRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Default requests per second for one upstream credential.
///
/// The upstream allowance is 5000 requests/hour; ten per second leaves room
/// for bursts while staying far under the hourly cap during steady polling.
pub const DEFAULT_RPS: u32 = 10;

/// A rate budget for one upstream credential.
///
/// All agents acting under the same credential share one budget, however many
/// of them run concurrently.
#[derive(Clone)]
pub struct RateBudget {
    limiter: Arc<GovernorRateLimiter>,
    interactive_queued: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

/// Decrements the interactive-waiter count when the acquisition completes or
/// is cancelled mid-wait.
struct QueuedGuard<'a> {
    queued: &'a AtomicUsize,
    idle: &'a Notify,
}

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        if self.queued.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl RateBudget {
    /// Create a budget allowing `requests_per_second` (clamped to at least 1).
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::new(1).unwrap());
        Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
            interactive_queued: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Wait until the budget allows one request at the given priority.
    pub async fn acquire(&self, priority: RequestPriority) {
        match priority {
            RequestPriority::Interactive => {
                self.interactive_queued.fetch_add(1, Ordering::SeqCst);
                let _guard = QueuedGuard {
                    queued: &self.interactive_queued,
                    idle: &self.idle,
                };
                self.limiter.until_ready().await;
            }
            RequestPriority::Background => {
                loop {
                    if self.interactive_queued.load(Ordering::SeqCst) == 0 {
                        break;
                    }
                    // Register for the wakeup before re-checking so a
                    // notify_waiters between check and await is not missed.
                    let notified = self.idle.notified();
                    if self.interactive_queued.load(Ordering::SeqCst) == 0 {
                        break;
                    }
                    notified.await;
                }
                self.limiter.until_ready().await;
            }
        }
    }
}

/// Per-credential budgets, created lazily on first use.
pub struct BudgetPool {
    requests_per_second: u32,
    budgets: Mutex<HashMap<String, RateBudget>>,
}

impl BudgetPool {
    /// Create a pool handing out budgets of `requests_per_second` each.
    pub fn new(requests_per_second: u32) -> Self {
        Self {
            requests_per_second,
            budgets: Mutex::new(HashMap::new()),
        }
    }

    /// Get the budget for a credential, creating it on first use.
    pub fn for_token(&self, token: &str) -> RateBudget {
        let mut budgets = self.budgets.lock().unwrap_or_else(|e| e.into_inner());
        budgets
            .entry(token.to_string())
            .or_insert_with(|| RateBudget::new(self.requests_per_second))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn background_proceeds_when_no_interactive_queued() {
        let budget = RateBudget::new(1000);
        tokio::time::timeout(
            Duration::from_secs(1),
            budget.acquire(RequestPriority::Background),
        )
        .await
        .expect("background acquisition should not block without contention");
    }

    #[tokio::test]
    async fn interactive_served_ahead_of_background_under_contention() {
        // One token per second: the first acquire drains the bucket, so both
        // contenders queue behind a real wait and ordering is observable.
        let budget = RateBudget::new(1);
        budget.acquire(RequestPriority::Interactive).await;

        let order: Arc<StdMutex<Vec<&'static str>>> = Arc::new(StdMutex::new(Vec::new()));

        let bg_budget = budget.clone();
        let bg_order = Arc::clone(&order);
        let background = tokio::spawn(async move {
            bg_budget.acquire(RequestPriority::Background).await;
            bg_order.lock().unwrap().push("background");
        });

        // Give the background task a chance to park first.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let fg_budget = budget.clone();
        let fg_order = Arc::clone(&order);
        let interactive = tokio::spawn(async move {
            fg_budget.acquire(RequestPriority::Interactive).await;
            fg_order.lock().unwrap().push("interactive");
        });

        let joined = tokio::time::timeout(Duration::from_secs(10), async {
            interactive.await.expect("interactive task");
            background.await.expect("background task");
        })
        .await;
        joined.expect("both acquisitions should complete");

        let order = order.lock().unwrap();
        assert_eq!(
            order.as_slice(),
            &["interactive", "background"],
            "interactive must be served before the queued background request"
        );
    }

    #[tokio::test]
    async fn pool_reuses_budget_per_token() {
        let pool = BudgetPool::new(1000);
        let a = pool.for_token("token-a");
        let b = pool.for_token("token-a");
        assert!(Arc::ptr_eq(&a.limiter, &b.limiter));

        let other = pool.for_token("token-b");
        assert!(!Arc::ptr_eq(&a.limiter, &other.limiter));
    }
}
