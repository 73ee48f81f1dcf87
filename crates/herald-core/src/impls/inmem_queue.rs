//! In-memory dispatch queue.
//!
//! Three lanes, each a min-heap on (not-before, enqueue sequence). A job
//! without a not-before sorts at its enqueue time, so a long past-due job
//! (e.g. one re-enqueued by the reconciler) still goes ahead of newer work.
//! Heap entries are removed lazily: an entry only counts while the pending
//! map still holds the same job id with the same sequence number.
//!
//! Visibility is tracked apart from ordering. `visible_at` is
//! `max(not_before, enqueued_at)` and never sorts before `order_at`, so the
//! first invisible head of a lane means nothing behind it is visible either.
//!
//! Leases expire after the visibility timeout. Expired leases are moved back
//! to pending on the next poll, which gives at-least-once delivery when a
//! worker dies between dequeue and ack.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use crate::domain::{DispatchJob, JobId, JobKey, QueueError};
use crate::observability::QueueCounts;
use crate::ports::{Clock, DispatchQueue, Lane, to_chrono};

pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest sleep between polls, so a clock that never moves cannot spin.
const MIN_POLL_SLEEP: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    /// Sort key: the job's not-before, or its enqueue time.
    order_at: DateTime<Utc>,
    seq: u64,
    visible_at: DateTime<Utc>,
    job_id: JobId,
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest first.
        (other.order_at, other.seq).cmp(&(self.order_at, self.seq))
    }
}

struct Pending {
    job: DispatchJob,
    seq: u64,
    visible_at: DateTime<Utc>,
}

struct Lease {
    job: DispatchJob,
    deadline: DateTime<Utc>,
}

#[derive(Default)]
struct QueueState {
    lanes: [BinaryHeap<Entry>; 3],
    pending: HashMap<JobId, Pending>,
    in_flight: HashMap<JobId, Lease>,
    next_seq: u64,
}

impl QueueState {
    /// Returns the instant the job becomes visible.
    fn push(&mut self, job: DispatchJob, now: DateTime<Utc>) -> DateTime<Utc> {
        let seq = self.next_seq;
        self.next_seq += 1;
        let order_at = job.not_before.unwrap_or(now);
        let visible_at = order_at.max(now);
        let lane = Lane::for_priority(job.priority);
        self.lanes[lane.index()].push(Entry {
            order_at,
            seq,
            visible_at,
            job_id: job.id,
        });
        self.pending.insert(job.id, Pending {
            job,
            seq,
            visible_at,
        });
        visible_at
    }

    fn is_live(&self, entry: &Entry) -> bool {
        self.pending
            .get(&entry.job_id)
            .is_some_and(|p| p.seq == entry.seq)
    }

    /// Return expired leases to their lanes, visible immediately.
    fn reclaim_expired(&mut self, now: DateTime<Utc>) {
        let expired: Vec<JobId> = self
            .in_flight
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(lease) = self.in_flight.remove(&id) {
                tracing::warn!(
                    job_id = %id,
                    notification_id = %lease.job.notification_id,
                    "lease expired without ack, job visible again"
                );
                self.push(lease.job, now);
            }
        }
    }

    /// Lease the first visible job, checking lanes in priority order.
    fn pop_ready(&mut self, now: DateTime<Utc>, visibility: Duration) -> Option<(DispatchJob, Lane)> {
        for lane in Lane::ORDER {
            loop {
                let Some(top) = self.lanes[lane.index()].peek() else {
                    break;
                };
                if !self.is_live(top) {
                    self.lanes[lane.index()].pop();
                    continue;
                }
                if top.visible_at > now {
                    break;
                }
                let Some(entry) = self.lanes[lane.index()].pop() else {
                    break;
                };
                let Some(pending) = self.pending.remove(&entry.job_id) else {
                    continue;
                };
                let job = pending.job;
                self.in_flight.insert(job.id, Lease {
                    job: job.clone(),
                    deadline: now + to_chrono(visibility),
                });
                return Some((job, lane));
            }
        }
        None
    }

    /// Earliest moment something could change: a delayed job becoming
    /// visible or a lease running out.
    fn next_wake(&self) -> Option<DateTime<Utc>> {
        let heads = self.lanes.iter().filter_map(|h| h.peek().map(|e| e.visible_at));
        let deadlines = self.in_flight.values().map(|l| l.deadline);
        heads.chain(deadlines).min()
    }

    fn counts(&self, now: DateTime<Utc>) -> QueueCounts {
        let mut counts = QueueCounts {
            in_flight: self.in_flight.len(),
            ..QueueCounts::default()
        };
        for p in self.pending.values() {
            if p.visible_at > now {
                counts.delayed += 1;
                continue;
            }
            match Lane::for_priority(p.job.priority) {
                Lane::High => counts.ready_high += 1,
                Lane::Default => counts.ready_default += 1,
                Lane::Low => counts.ready_low += 1,
            }
        }
        counts
    }
}

enum Poll {
    Ready(DispatchJob),
    Wait(Duration),
}

/// Single-process [`DispatchQueue`] behind a mutex.
///
/// `dequeue` waits on `notify` and wakes at least every `poll_interval`, so
/// delayed jobs and expired leases are picked up without an enqueue.
pub struct InMemoryDispatchQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    clock: Arc<dyn Clock>,
    visibility_timeout: Duration,
    poll_interval: Duration,
    unavailable: AtomicBool,
}

impl InMemoryDispatchQueue {
    pub fn new(clock: Arc<dyn Clock>, visibility_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            clock,
            visibility_timeout,
            poll_interval,
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn with_defaults(clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, DEFAULT_VISIBILITY_TIMEOUT, DEFAULT_POLL_INTERVAL)
    }

    /// Toggle simulated outage for enqueue.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(QueueError::Unavailable("in-memory queue switched off".into()))
        } else {
            Ok(())
        }
    }

    async fn poll(&self) -> Result<Poll, QueueError> {
        self.check_available()?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.reclaim_expired(now);
        if let Some((job, lane)) = state.pop_ready(now, self.visibility_timeout) {
            tracing::debug!(
                job_id = %job.id,
                notification_id = %job.notification_id,
                channel = %job.channel,
                lane = lane.as_str(),
                "dequeued dispatch job"
            );
            return Ok(Poll::Ready(job));
        }
        let wait = state
            .next_wake()
            .and_then(|at| (at - now).to_std().ok())
            .map_or(self.poll_interval, |d| d.min(self.poll_interval))
            .max(MIN_POLL_SLEEP);
        Ok(Poll::Wait(wait))
    }
}

#[async_trait]
impl DispatchQueue for InMemoryDispatchQueue {
    async fn enqueue(&self, job: DispatchJob) -> Result<(), QueueError> {
        self.check_available()?;
        let now = self.clock.now();
        {
            let mut state = self.state.lock().await;
            if state.pending.contains_key(&job.id) || state.in_flight.contains_key(&job.id) {
                tracing::debug!(job_id = %job.id, "job already queued, ignoring enqueue");
                return Ok(());
            }
            let (job_id, notification_id, channel) = (job.id, job.notification_id, job.channel);
            let lane = Lane::for_priority(job.priority);
            let visible_at = state.push(job, now);
            tracing::debug!(
                job_id = %job_id,
                notification_id = %notification_id,
                %channel,
                lane = lane.as_str(),
                visible_at = %visible_at,
                "enqueued dispatch job"
            );
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn try_dequeue(&self) -> Result<Option<DispatchJob>, QueueError> {
        match self.poll().await? {
            Poll::Ready(job) => Ok(Some(job)),
            Poll::Wait(_) => Ok(None),
        }
    }

    async fn dequeue(&self) -> Result<DispatchJob, QueueError> {
        loop {
            let wait = match self.poll().await? {
                Poll::Ready(job) => return Ok(job),
                Poll::Wait(wait) => wait,
            };
            tokio::select! {
                _ = self.notify.notified() => {},
                _ = tokio::time::sleep(wait) => {},
            }
        }
    }

    async fn ack(&self, job_id: JobId) -> Result<bool, QueueError> {
        let mut state = self.state.lock().await;
        let leased = state.in_flight.remove(&job_id).is_some();
        // The lease may have expired and been put back already.
        let reclaimed = state.pending.remove(&job_id).is_some();
        Ok(leased || reclaimed)
    }

    async fn remove(&self, key: &JobKey) -> Result<usize, QueueError> {
        let mut state = self.state.lock().await;
        let before = state.pending.len();
        state.pending.retain(|_, p| p.job.key() != *key);
        let removed = before - state.pending.len();
        if removed > 0 {
            tracing::debug!(notification_id = %key.notification_id, removed, "removed pending jobs");
        }
        Ok(removed)
    }

    async fn contains(&self, key: &JobKey) -> Result<bool, QueueError> {
        let state = self.state.lock().await;
        Ok(state.pending.values().any(|p| p.job.key() == *key)
            || state.in_flight.values().any(|l| l.job.key() == *key))
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        Ok(state.counts(now))
    }
}
