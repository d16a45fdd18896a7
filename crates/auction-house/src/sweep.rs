//! Periodic background evaluation of all open auctions.
//!
//! The sweep is the correctness anchor of the timing logic: timers make
//! transitions prompt, but even with every timer lost (process restart,
//! abandoned transition) the sweep re-derives the right next step from
//! persisted state within one interval. One auction's failure is logged and
//! never stops the pass or the loop.

use {
    crate::{database::auctions::AuctionStoring, lifecycle::Lifecycle},
    observe::metrics::LivenessChecking,
    std::{
        sync::{Arc, Mutex},
        time::Duration,
    },
    tokio::time::{Instant, MissedTickBehavior},
};

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "sweep")]
struct Metrics {
    /// Completed sweep passes by result.
    #[metric(labels("result"))]
    runs: prometheus::IntCounterVec,

    /// Auctions evaluated in the most recent pass.
    evaluated: prometheus::IntGauge,
}

fn metrics() -> &'static Metrics {
    Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
}

/// Reports the service dead when the sweep has not completed a pass
/// recently.
pub struct Liveness {
    max_age: Duration,
    last_pass: Mutex<Instant>,
}

impl Liveness {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            last_pass: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_pass.lock().unwrap() = Instant::now();
    }
}

#[async_trait::async_trait]
impl LivenessChecking for Liveness {
    async fn is_alive(&self) -> bool {
        self.last_pass.lock().unwrap().elapsed() <= self.max_age
    }
}

pub struct Sweep {
    store: Arc<dyn AuctionStoring>,
    lifecycle: Arc<Lifecycle>,
    liveness: Arc<Liveness>,
    interval: Duration,
    storage_timeout: Duration,
}

impl Sweep {
    pub fn new(
        store: Arc<dyn AuctionStoring>,
        lifecycle: Arc<Lifecycle>,
        liveness: Arc<Liveness>,
        interval: Duration,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            store,
            lifecycle,
            liveness,
            interval,
            storage_timeout,
        }
    }

    pub async fn run_forever(self) -> ! {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.single_pass().await;
        }
    }

    /// Evaluates every open auction once.
    pub async fn single_pass(&self) {
        let auctions = match tokio::time::timeout(self.storage_timeout, self.store.open_auctions())
            .await
        {
            Ok(Ok(auctions)) => auctions,
            Ok(Err(err)) => {
                tracing::warn!(?err, "sweep failed to list open auctions");
                metrics().runs.with_label_values(&["error"]).inc();
                return;
            }
            Err(_) => {
                tracing::warn!("sweep timed out listing open auctions");
                metrics().runs.with_label_values(&["error"]).inc();
                return;
            }
        };
        metrics()
            .evaluated
            .set(i64::try_from(auctions.len()).unwrap_or(i64::MAX));
        for auction in &auctions {
            // Evaluation handles its own failures; a broken auction must not
            // shadow the remaining ones.
            self.lifecycle.evaluate(auction).await;
        }
        metrics().runs.with_label_values(&["success"]).inc();
        self.liveness.touch();
    }
}
