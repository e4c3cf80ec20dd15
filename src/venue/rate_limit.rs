//! Token-bucket rate limiting for the upstream APIs.
//!
//! One bucket per API, owned by a single task; callers talk to it through
//! a command channel, so token accounting never races. A 1 s tick refills
//! every bucket and serves queued waiters in FIFO order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

pub const BUCKET_CLOB: &str = "clob";
pub const BUCKET_DATA: &str = "data";
pub const BUCKET_GAMMA: &str = "gamma";

/// Default deadline for a blocking acquire.
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 120_000;

const REFILL_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStatus {
    Acquired,
    RateLimited,
}

#[derive(Debug, Clone, Error)]
pub enum RateLimitError {
    #[error("timed out waiting for a {0} token")]
    Timeout(String),
    #[error("rate limiter is gone")]
    Closed,
}

struct Waiter {
    reply: oneshot::Sender<Result<(), RateLimitError>>,
    deadline: Instant,
    bucket: String,
}

struct BucketState {
    capacity: f64,
    refill_per_tick: f64,
    tokens: f64,
    waiters: VecDeque<Waiter>,
}

impl BucketState {
    fn new(capacity: f64, refill_per_tick: f64) -> Self {
        Self {
            capacity,
            refill_per_tick,
            tokens: capacity,
            waiters: VecDeque::new(),
        }
    }
}

/// The bucket table plus the pure accounting rules; the task wraps it.
struct BucketSet {
    buckets: HashMap<String, BucketState>,
    warned_unknown: HashSet<String>,
}

impl BucketSet {
    /// CLOB 120/min, Data 60/min, Gamma 60/min.
    fn standard() -> Self {
        let mut buckets = HashMap::new();
        buckets.insert(BUCKET_CLOB.to_string(), BucketState::new(120.0, 2.0));
        buckets.insert(BUCKET_DATA.to_string(), BucketState::new(60.0, 1.0));
        buckets.insert(BUCKET_GAMMA.to_string(), BucketState::new(60.0, 1.0));
        Self {
            buckets,
            warned_unknown: HashSet::new(),
        }
    }

    /// Unknown buckets are never throttled; that keeps future call sites
    /// safe, at the cost of one warning per name.
    fn is_known(&mut self, bucket: &str) -> bool {
        if self.buckets.contains_key(bucket) {
            return true;
        }
        if self.warned_unknown.insert(bucket.to_string()) {
            warn!(bucket = %bucket, "unknown rate-limit bucket, allowing through");
        }
        false
    }

    fn try_acquire(&mut self, bucket: &str) -> AcquireStatus {
        if !self.is_known(bucket) {
            return AcquireStatus::Acquired;
        }
        let state = self.buckets.get_mut(bucket).expect("known bucket");
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            AcquireStatus::Acquired
        } else {
            AcquireStatus::RateLimited
        }
    }

    fn enqueue(&mut self, waiter: Waiter) {
        let state = self
            .buckets
            .get_mut(&waiter.bucket)
            .expect("waiters only enqueue on known buckets");
        state.waiters.push_back(waiter);
    }

    /// One refill tick: top up each bucket, expire overdue waiters, then
    /// serve the queue head-first while tokens remain.
    fn refill(&mut self, now: Instant) {
        for state in self.buckets.values_mut() {
            state.tokens = (state.tokens + state.refill_per_tick).min(state.capacity);

            let mut remaining = VecDeque::with_capacity(state.waiters.len());
            while let Some(waiter) = state.waiters.pop_front() {
                if waiter.deadline <= now {
                    let _ = waiter
                        .reply
                        .send(Err(RateLimitError::Timeout(waiter.bucket.clone())));
                    continue;
                }
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    let _ = waiter.reply.send(Ok(()));
                } else {
                    remaining.push_back(waiter);
                }
            }
            state.waiters = remaining;
        }
    }
}

enum Command {
    Acquire {
        bucket: String,
        deadline: Instant,
        reply: oneshot::Sender<Result<(), RateLimitError>>,
    },
    TryAcquire {
        bucket: String,
        reply: oneshot::Sender<AcquireStatus>,
    },
}

#[derive(Clone)]
pub struct RateLimiter {
    cmd_tx: mpsc::Sender<Command>,
}

impl RateLimiter {
    pub fn spawn() -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(1024);
        tokio::spawn(run(cmd_rx));
        Self { cmd_tx }
    }

    /// Blocks until a token is available or `timeout_ms` elapses.
    pub async fn acquire(&self, bucket: &str, timeout_ms: u64) -> Result<(), RateLimitError> {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::Acquire {
            bucket: bucket.to_string(),
            deadline: Instant::now() + Duration::from_millis(timeout_ms),
            reply,
        };
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| RateLimitError::Closed)?;
        rx.await.map_err(|_| RateLimitError::Closed)?
    }

    /// Non-blocking; reports `RateLimited` when the bucket is empty.
    pub async fn try_acquire(&self, bucket: &str) -> Result<AcquireStatus, RateLimitError> {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::TryAcquire {
            bucket: bucket.to_string(),
            reply,
        };
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| RateLimitError::Closed)?;
        rx.await.map_err(|_| RateLimitError::Closed)
    }
}

async fn run(mut cmd_rx: mpsc::Receiver<Command>) {
    let mut buckets = BucketSet::standard();
    let mut tick = tokio::time::interval(REFILL_TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                buckets.refill(Instant::now());
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    debug!("rate limiter channel closed, shutting down");
                    return;
                };
                match cmd {
                    Command::Acquire { bucket, deadline, reply } => {
                        if !buckets.is_known(&bucket) {
                            let _ = reply.send(Ok(()));
                            continue;
                        }
                        match buckets.try_acquire(&bucket) {
                            AcquireStatus::Acquired => {
                                let _ = reply.send(Ok(()));
                            }
                            AcquireStatus::RateLimited => {
                                buckets.enqueue(Waiter { reply, deadline, bucket });
                            }
                        }
                    }
                    Command::TryAcquire { bucket, reply } => {
                        let _ = reply.send(buckets.try_acquire(&bucket));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_start_full_and_drain() {
        let mut set = BucketSet::standard();
        for _ in 0..60 {
            assert_eq!(set.try_acquire(BUCKET_DATA), AcquireStatus::Acquired);
        }
        assert_eq!(set.try_acquire(BUCKET_DATA), AcquireStatus::RateLimited);
    }

    #[test]
    fn refill_is_capped_at_capacity() {
        let mut set = BucketSet::standard();
        let now = Instant::now();
        set.refill(now);
        set.refill(now);
        // still only capacity tokens
        let mut served = 0;
        while set.try_acquire(BUCKET_GAMMA) == AcquireStatus::Acquired {
            served += 1;
        }
        assert_eq!(served, 60);
    }

    #[test]
    fn clob_refills_two_per_tick() {
        let mut set = BucketSet::standard();
        while set.try_acquire(BUCKET_CLOB) == AcquireStatus::Acquired {}
        set.refill(Instant::now());
        assert_eq!(set.try_acquire(BUCKET_CLOB), AcquireStatus::Acquired);
        assert_eq!(set.try_acquire(BUCKET_CLOB), AcquireStatus::Acquired);
        assert_eq!(set.try_acquire(BUCKET_CLOB), AcquireStatus::RateLimited);
    }

    #[test]
    fn unknown_bucket_is_never_throttled() {
        let mut set = BucketSet::standard();
        for _ in 0..1000 {
            assert_eq!(set.try_acquire("mystery"), AcquireStatus::Acquired);
        }
    }

    #[test]
    fn waiters_are_served_fifo() {
        let mut set = BucketSet::standard();
        while set.try_acquire(BUCKET_DATA) == AcquireStatus::Acquired {}

        let deadline = Instant::now() + Duration::from_secs(60);
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        set.enqueue(Waiter {
            reply: tx1,
            deadline,
            bucket: BUCKET_DATA.into(),
        });
        set.enqueue(Waiter {
            reply: tx2,
            deadline,
            bucket: BUCKET_DATA.into(),
        });

        // one token refilled -> only the first waiter is served
        set.refill(Instant::now());
        assert!(matches!(rx1.try_recv(), Ok(Ok(()))));
        assert!(rx2.try_recv().is_err());

        set.refill(Instant::now());
        assert!(matches!(rx2.try_recv(), Ok(Ok(()))));
    }

    #[test]
    fn expired_waiters_get_timeout() {
        let mut set = BucketSet::standard();
        while set.try_acquire(BUCKET_DATA) == AcquireStatus::Acquired {}

        let (tx, mut rx) = oneshot::channel();
        set.enqueue(Waiter {
            reply: tx,
            deadline: Instant::now() - Duration::from_millis(1),
            bucket: BUCKET_DATA.into(),
        });
        set.refill(Instant::now());
        assert!(matches!(rx.try_recv(), Ok(Err(RateLimitError::Timeout(_)))));
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_acquire_wakes_on_refill() {
        let limiter = RateLimiter::spawn();

        // drain the data bucket
        for _ in 0..60 {
            assert_eq!(
                limiter.try_acquire(BUCKET_DATA).await.unwrap(),
                AcquireStatus::Acquired
            );
        }
        assert_eq!(
            limiter.try_acquire(BUCKET_DATA).await.unwrap(),
            AcquireStatus::RateLimited
        );

        let waiter = tokio::spawn({
            let limiter = limiter.clone();
            async move { limiter.acquire(BUCKET_DATA, 10_000).await }
        });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        waiter.await.unwrap().unwrap();
    }
}
