//! Run-wide action budget.
//!
//! A single interval task feeds a one-slot channel; every actor's action loop
//! competes for the same receiver. Each tick is consumed by exactly one
//! waiting loop, so total throughput is bounded by the tick period no matter
//! how many actors run. Ticks nobody is waiting for are dropped. Idle loops
//! queue FIFO on the receiver's lock, so ticks go to waiting actors in the
//! order they started waiting.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Cloneable handle to the shared tick source.
#[derive(Debug, Clone)]
pub struct SharedTicker {
    rx: Arc<Mutex<mpsc::Receiver<Instant>>>,
}

impl SharedTicker {
    /// Start ticking every `period` until `stop` is cancelled. The first tick
    /// fires one period after the call.
    pub fn spawn(period: Duration, stop: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    at = interval.tick() => {
                        if tx.try_send(at).is_err() {
                            trace!("Tick dropped, no action loop was ready");
                        }
                    }
                }
            }
            debug!("Action ticker stopped");
        });

        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Wait for the next tick. Returns `None` once the ticker has stopped and
    /// every buffered tick was consumed.
    pub async fn tick(&self) -> Option<Instant> {
        self.rx.lock().await.recv().await
    }
}
