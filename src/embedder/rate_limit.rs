//! Sliding-minute rate limiter: bounds requests-per-minute
//! and tokens-per-minute per provider; retries on HTTP 429 follow the
//! fixed schedule `[1s, 2s, 5s, 10s]`.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{CoreError, Result};

pub const RETRY_SCHEDULE: &[Duration] = &[
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
];

struct Window {
    /// (timestamp, tokens) for each admitted call in the last minute.
    calls: VecDeque<(Instant, u32)>,
}

pub struct RateLimiter {
    rpm: u32,
    tpm: u32,
    queue_size: usize,
    queued: Mutex<usize>,
    window: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(rpm: u32, tpm: u32, queue_size: usize) -> Self {
        Self { rpm, tpm, queue_size, queued: Mutex::new(0), window: Mutex::new(Window { calls: VecDeque::new() }) }
    }

    /// Enqueues a call request. Fails fast if the bounded queue is full;
    /// otherwise blocks (sleeping) until both RPM and TPM budgets admit
    /// the call, then records it as admitted.
    pub async fn acquire(&self, tokens: u32) -> Result<()> {
        {
            let mut queued = self.queued.lock().expect("queue mutex poisoned");
            if *queued >= self.queue_size {
                return Err(CoreError::RateLimited { attempts: 0 });
            }
            *queued += 1;
        }

        loop {
            let wait = {
                let mut window = self.window.lock().expect("window mutex poisoned");
                prune(&mut window.calls);
                let call_count = window.calls.len() as u32;
                let token_count: u32 = window.calls.iter().map(|(_, t)| t).sum();

                if call_count < self.rpm && token_count + tokens <= self.tpm {
                    window.calls.push_back((Instant::now(), tokens));
                    None
                } else {
                    let oldest = window.calls.front().map(|(t, _)| *t).unwrap_or_else(Instant::now);
                    let elapsed = oldest.elapsed();
                    Some(Duration::from_secs(60).saturating_sub(elapsed))
                }
            };

            match wait {
                None => break,
                Some(d) => tokio::time::sleep(d.max(Duration::from_millis(10))).await,
            }
        }

        let mut queued = self.queued.lock().expect("queue mutex poisoned");
        *queued = queued.saturating_sub(1);
        Ok(())
    }

    /// Runs `attempt` (expected to return `Err(CoreError::RateLimited)` on
    /// HTTP 429), retrying per `RETRY_SCHEDULE` until it succeeds or the
    /// schedule is exhausted.
    pub async fn with_retry<F, Fut, T>(&self, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_err = None;
        for delay in std::iter::once(Duration::ZERO).chain(RETRY_SCHEDULE.iter().copied()) {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match attempt().await {
                Ok(v) => return Ok(v),
                Err(CoreError::RateLimited { .. }) => {
                    last_err = Some(CoreError::RateLimited { attempts: RETRY_SCHEDULE.len() });
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(CoreError::RateLimited { attempts: RETRY_SCHEDULE.len() }))
    }
}

fn prune(calls: &mut VecDeque<(Instant, u32)>) {
    let cutoff = Instant::now().checked_sub(Duration::from_secs(60)).unwrap_or_else(Instant::now);
    while let Some((t, _)) = calls.front() {
        if *t < cutoff {
            calls.pop_front();
        } else {
            break;
        }
    }
}
