//! Deduplicated FIFO queue of verified identifiers awaiting distribution.
//!
//! - `enqueue` inserts only absent ids.
//! - `take_batch` peeks; only `commit_success` / `commit_failure` remove or reorder.
//! - Transient failures move the entry to the tail; non-transient failures, and
//!   any failure that brings the counter to the retry threshold, evict it.

use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use tokio::sync::{Mutex, MutexGuard};

use crate::{
    domain::{FailureReason, Identifier, IdentifierId, IdentifierStatus},
    errors::SchedulerFault,
};

/// What `commit_failure` did with the identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureDisposition {
    Requeued { consecutive_failures: u32 },
    Evicted { consecutive_failures: u32 },
    NotPresent,
}

#[derive(Debug)]
pub struct MemberPool {
    queue: VecDeque<Identifier>,
    ids: HashSet<IdentifierId>,
    retry_threshold: u32,
}

impl MemberPool {
    pub fn new(retry_threshold: u32) -> Self {
        Self {
            queue: VecDeque::new(),
            ids: HashSet::new(),
            retry_threshold: retry_threshold.max(1),
        }
    }

    /// Returns whether the identifier was inserted.
    pub fn enqueue(&mut self, identifier: Identifier) -> bool {
        if !self.ids.insert(identifier.id) {
            return false;
        }
        self.queue.push_back(identifier);
        true
    }

    /// Up to `n` active identifiers in FIFO order. Does not remove anything.
    pub fn take_batch(&self, n: usize) -> Vec<Identifier> {
        self.queue
            .iter()
            .filter(|i| i.status == IdentifierStatus::Active)
            .take(n)
            .cloned()
            .collect()
    }

    /// Remove a delivered identifier.
    pub fn commit_success(&mut self, id: IdentifierId) -> Option<Identifier> {
        let idx = self.position(id)?;
        self.ids.remove(&id);
        self.queue.remove(idx)
    }

    pub fn commit_failure(&mut self, id: IdentifierId, reason: FailureReason) -> FailureDisposition {
        let Some(idx) = self.position(id) else {
            return FailureDisposition::NotPresent;
        };
        let Some(mut entry) = self.queue.remove(idx) else {
            return FailureDisposition::NotPresent;
        };

        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        entry.failure_reason = Some(reason);
        entry.checked_at = Some(Utc::now());
        let consecutive_failures = entry.consecutive_failures;

        if !reason.is_transient() || consecutive_failures >= self.retry_threshold {
            self.ids.remove(&id);
            return FailureDisposition::Evicted {
                consecutive_failures,
            };
        }

        self.queue.push_back(entry);
        FailureDisposition::Requeued {
            consecutive_failures,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn contains(&self, id: IdentifierId) -> bool {
        self.ids.contains(&id)
    }

    pub fn get(&self, id: IdentifierId) -> Option<&Identifier> {
        self.queue.iter().find(|i| i.id == id)
    }

    /// Queue order snapshot.
    pub fn ids(&self) -> Vec<IdentifierId> {
        self.queue.iter().map(|i| i.id).collect()
    }

    pub fn retry_threshold(&self) -> u32 {
        self.retry_threshold
    }

    fn position(&self, id: IdentifierId) -> Option<usize> {
        if !self.ids.contains(&id) {
            return None;
        }
        self.queue.iter().position(|i| i.id == id)
    }
}

/// Shared handle to the pool. Acquisition is bounded so a wedged holder
/// surfaces as `PoolUnavailable` instead of stalling a tick forever.
#[derive(Clone, Debug)]
pub struct SharedPool {
    inner: Arc<Mutex<MemberPool>>,
    lock_timeout: Duration,
}

impl SharedPool {
    pub fn new(pool: MemberPool, lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(pool)),
            lock_timeout,
        }
    }

    pub async fn lock(&self) -> Result<MutexGuard<'_, MemberPool>, SchedulerFault> {
        tokio::time::timeout(self.lock_timeout, self.inner.lock())
            .await
            .map_err(|_| SchedulerFault::PoolUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeliveryFailure, Source};

    fn active(id: i64) -> Identifier {
        Identifier::active(IdentifierId(id), Source::Generated).unwrap()
    }

    fn pool_with(ids: &[i64]) -> MemberPool {
        let mut pool = MemberPool::new(3);
        for id in ids {
            pool.enqueue(active(*id));
        }
        pool
    }

    #[test]
    fn enqueue_dedups_by_id() {
        let mut pool = MemberPool::new(3);
        assert!(pool.enqueue(active(1)));
        assert!(pool.enqueue(active(2)));
        assert!(!pool.enqueue(active(1)));
        assert!(pool.enqueue(active(3)));
        assert!(!pool.enqueue(active(2)));
        assert_eq!(pool.ids(), vec![IdentifierId(1), IdentifierId(2), IdentifierId(3)]);
    }

    #[test]
    fn take_batch_is_a_bounded_fifo_peek() {
        let pool = pool_with(&[10, 20, 30]);
        let batch = pool.take_batch(2);
        assert_eq!(
            batch.iter().map(|i| i.id).collect::<Vec<_>>(),
            vec![IdentifierId(10), IdentifierId(20)]
        );
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.take_batch(10).len(), 3);
        assert!(MemberPool::new(3).take_batch(4).is_empty());
    }

    #[test]
    fn take_batch_skips_non_active_entries() {
        let mut pool = pool_with(&[1]);
        pool.enqueue(Identifier::new(IdentifierId(2), Source::Manual).unwrap());
        pool.enqueue(active(3));
        let ids: Vec<_> = pool.take_batch(5).into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![IdentifierId(1), IdentifierId(3)]);
    }

    #[test]
    fn commit_success_removes_and_allows_reenqueue() {
        let mut pool = pool_with(&[1, 2]);
        assert!(pool.commit_success(IdentifierId(1)).is_some());
        assert!(!pool.contains(IdentifierId(1)));
        assert!(pool.commit_success(IdentifierId(1)).is_none());
        assert!(pool.enqueue(active(1)));
        assert_eq!(pool.ids(), vec![IdentifierId(2), IdentifierId(1)]);
    }

    #[test]
    fn transient_failure_moves_to_tail() {
        let mut pool = pool_with(&[1, 2, 3]);
        let d = pool.commit_failure(IdentifierId(1), DeliveryFailure::RateLimited.into());
        assert_eq!(
            d,
            FailureDisposition::Requeued {
                consecutive_failures: 1
            }
        );
        assert_eq!(pool.ids(), vec![IdentifierId(2), IdentifierId(3), IdentifierId(1)]);
        let entry = pool.get(IdentifierId(1)).unwrap();
        assert_eq!(
            entry.failure_reason,
            Some(FailureReason::Delivery(DeliveryFailure::RateLimited))
        );
    }

    #[test]
    fn evicts_on_threshold_th_transient_failure() {
        let mut pool = pool_with(&[7]);
        let reason: FailureReason = DeliveryFailure::PrivacyRestricted.into();
        assert!(matches!(
            pool.commit_failure(IdentifierId(7), reason),
            FailureDisposition::Requeued { .. }
        ));
        assert!(matches!(
            pool.commit_failure(IdentifierId(7), reason),
            FailureDisposition::Requeued { .. }
        ));
        assert!(pool.contains(IdentifierId(7)));
        assert_eq!(
            pool.commit_failure(IdentifierId(7), reason),
            FailureDisposition::Evicted {
                consecutive_failures: 3
            }
        );
        assert!(pool.is_empty());
    }

    #[test]
    fn non_transient_failure_evicts_immediately() {
        let mut pool = pool_with(&[1, 2]);
        assert_eq!(
            pool.commit_failure(IdentifierId(1), DeliveryFailure::AlreadyMember.into()),
            FailureDisposition::Evicted {
                consecutive_failures: 1
            }
        );
        assert_eq!(pool.ids(), vec![IdentifierId(2)]);
    }

    #[test]
    fn failure_on_absent_id_is_noop() {
        let mut pool = pool_with(&[1]);
        assert_eq!(
            pool.commit_failure(IdentifierId(9), DeliveryFailure::Unknown.into()),
            FailureDisposition::NotPresent
        );
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn size_never_changes_through_take_batch() {
        let pool = pool_with(&[1, 2, 3, 4]);
        for n in 0..6 {
            let batch = pool.take_batch(n);
            assert!(batch.len() <= n.min(pool.len()));
        }
        assert_eq!(pool.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn shared_pool_times_out_when_held() {
        let shared = SharedPool::new(MemberPool::new(3), Duration::from_millis(50));
        let _held = shared.lock().await.unwrap();
        let err = shared.lock().await.unwrap_err();
        assert_eq!(err, SchedulerFault::PoolUnavailable);
    }
}
