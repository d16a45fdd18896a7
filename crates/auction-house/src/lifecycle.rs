//! Auction lifecycle state machine.
//!
//! Drives active -> ending -> ended, with the ending -> active reset on a
//! new bid. All mutation of one auction is serialized through a per-auction
//! mutex owned here; bid acceptance, timer callbacks and the periodic sweep
//! all funnel through it, which makes the observable status changes of one
//! auction a total order.
//!
//! Transitions persist through compare-and-set store operations. When a
//! persistence call fails the transition is abandoned and logged; the
//! periodic sweep re-derives the correct state from the store on its next
//! pass, so nothing is retried inline.

use {
    crate::{
        database::auctions::{AuctionStoring, Finalization, StatusUpdate},
        events::Broadcaster,
        ledger::BidLedger,
        timers::{TimerKind, TimerRegistry},
    },
    anyhow::{Context, Result},
    chrono::{DateTime, Utc},
    dashmap::DashMap,
    model::{
        auction::{Auction, AuctionId, AuctionStatus},
        event::AuctionEvent,
    },
    std::{sync::Arc, time::Duration},
    tokio::sync::{Mutex, OwnedMutexGuard},
};

#[derive(Clone, Debug)]
pub struct LifecycleConfig {
    /// How long an auction may go without an accepted bid before its ending
    /// countdown starts.
    pub inactivity_timeout: Duration,
    /// Number of countdown ticks between entering the ending state and
    /// finalization.
    pub final_countdown: u32,
    /// Wall-clock length of one countdown tick.
    pub countdown_tick: Duration,
    /// Upper bound on any single persistence operation.
    pub storage_timeout: Duration,
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "lifecycle")]
struct Metrics {
    /// Lifecycle transitions by kind.
    #[metric(labels("transition"))]
    transitions: prometheus::IntCounterVec,

    /// Transitions abandoned because persistence failed.
    abandoned_transitions: prometheus::IntCounter,
}

fn metrics() -> &'static Metrics {
    Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
}

pub struct Lifecycle {
    store: Arc<dyn AuctionStoring>,
    ledger: Arc<BidLedger>,
    timers: Arc<TimerRegistry>,
    broadcaster: Arc<Broadcaster>,
    /// Per-auction critical sections. Everything that mutates an auction
    /// locks its entry first.
    locks: DashMap<AuctionId, Arc<Mutex<()>>>,
    /// Remaining countdown ticks per ending auction. Explicit state that
    /// every tick re-reads, so no countdown progress hides in a task's
    /// captured variables.
    countdowns: DashMap<AuctionId, u32>,
    config: LifecycleConfig,
}

impl Lifecycle {
    pub fn new(
        store: Arc<dyn AuctionStoring>,
        ledger: Arc<BidLedger>,
        timers: Arc<TimerRegistry>,
        broadcaster: Arc<Broadcaster>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            timers,
            broadcaster,
            locks: Default::default(),
            countdowns: Default::default(),
            config,
        }
    }

    /// Acquires the auction's critical section.
    pub async fn lock(&self, id: AuctionId) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// The remaining countdown ticks of an ending auction.
    pub fn remaining_countdown(&self, id: &AuctionId) -> Option<u32> {
        self.countdowns.get(id).map(|remaining| *remaining)
    }

    /// Evaluates one auction against its persisted activity. Entrypoint for
    /// the periodic sweep and for firing inactivity timers; it recomputes
    /// the elapsed time from the record instead of trusting whichever timer
    /// woke it up, so stale timers (e.g. armed before a restart) are
    /// harmless.
    pub async fn evaluate(self: &Arc<Self>, auction: &Auction) {
        match auction.status {
            AuctionStatus::Ended => (),
            AuctionStatus::Ending => {
                // Normally the countdown task owns the progression. After a
                // restart the status is ending but no task exists; resume
                // the countdown from the top.
                if self.timers.armed_kind(&auction.id).is_none() {
                    self.countdowns
                        .entry(auction.id)
                        .or_insert(self.config.final_countdown);
                    self.arm_countdown_tick(auction.id);
                }
            }
            AuctionStatus::Active => {
                if self.timers.armed_kind(&auction.id).is_some() {
                    // A live timer already owns the next step.
                    return;
                }
                match self.remaining_inactivity(auction) {
                    None => self.begin_ending(auction.id).await,
                    Some(remaining) => self.arm_inactivity(auction.id, remaining),
                }
            }
        }
    }

    /// Time left until the auction counts as inactive; `None` when the
    /// timeout already elapsed.
    fn remaining_inactivity(&self, auction: &Auction) -> Option<Duration> {
        let elapsed = (Utc::now() - auction.last_activity())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let remaining = self.config.inactivity_timeout.checked_sub(elapsed)?;
        (remaining > Duration::ZERO).then_some(remaining)
    }

    /// Moves an active auction into the ending state and starts its
    /// countdown.
    pub async fn begin_ending(self: &Arc<Self>, id: AuctionId) {
        let _guard = self.lock(id).await;
        let auction = match self.read(&id).await {
            Ok(Some(auction)) => auction,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(auction = %id, ?err, "failed to read auction, abandoning transition");
                metrics().abandoned_transitions.inc();
                return;
            }
        };
        if auction.status != AuctionStatus::Active {
            return;
        }
        // A bid may have landed between the sweep's snapshot and this lock.
        if let Some(remaining) = self.remaining_inactivity(&auction) {
            self.arm_inactivity(id, remaining);
            return;
        }
        match self
            .bounded(self.store.update_status(
                &id,
                AuctionStatus::Active,
                AuctionStatus::Ending,
            ))
            .await
        {
            Ok(StatusUpdate::Updated(_)) => (),
            // The status moved under us; whoever moved it owns the next step.
            Ok(StatusUpdate::Conflict(_)) | Ok(StatusUpdate::NotFound) => return,
            Err(err) => {
                tracing::warn!(auction = %id, ?err, "failed to persist ending transition");
                metrics().abandoned_transitions.inc();
                return;
            }
        }
        tracing::info!(auction = %id, "auction entering ending countdown");
        metrics().transitions.with_label_values(&["ending"]).inc();
        self.countdowns.insert(id, self.config.final_countdown);
        self.broadcaster.publish(
            &id,
            AuctionEvent::auction_ending(
                self.config.inactivity_timeout.as_secs(),
                self.config.final_countdown,
            ),
        );
        self.arm_countdown_tick(id);
    }

    /// Cancels a pending countdown so no further tick can fire. Called with
    /// the auction lock held, before the accepted bid is persisted.
    pub fn cancel_countdown(&self, id: &AuctionId) {
        self.timers.cancel(id);
        self.countdowns.remove(id);
    }

    /// Completes the ending -> active reset after a bid was accepted and
    /// persisted: announces the cancellation and re-arms the inactivity
    /// timer from the new last bid time. Called with the auction lock held.
    pub fn resume_active(self: &Arc<Self>, auction: &Auction) {
        metrics().transitions.with_label_values(&["reset"]).inc();
        tracing::debug!(auction = %auction.id, "countdown cancelled by new bid");
        self.broadcaster.publish(
            &auction.id,
            AuctionEvent::countdown_cancelled(Some(auction.clone())),
        );
        self.rearm_inactivity(auction.id, auction.last_activity());
    }

    /// (Re)arms the inactivity timer so it fires once the timeout has
    /// passed, measured from `last_activity`.
    pub fn rearm_inactivity(self: &Arc<Self>, id: AuctionId, last_activity: DateTime<Utc>) {
        let elapsed = (Utc::now() - last_activity)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let remaining = self
            .config
            .inactivity_timeout
            .checked_sub(elapsed)
            .unwrap_or(Duration::ZERO);
        self.arm_inactivity(id, remaining);
    }

    fn arm_inactivity(self: &Arc<Self>, id: AuctionId, delay: Duration) {
        let lifecycle = Arc::clone(self);
        self.timers.replace(id, TimerKind::Inactivity, delay, async move {
            lifecycle.evaluate_by_id(id).await;
        });
    }

    async fn evaluate_by_id(self: Arc<Self>, id: AuctionId) {
        match self.read(&id).await {
            Ok(Some(auction)) => self.evaluate(&auction).await,
            Ok(None) => (),
            Err(err) => {
                tracing::warn!(auction = %id, ?err, "failed to evaluate auction");
            }
        }
    }

    fn arm_countdown_tick(self: &Arc<Self>, id: AuctionId) {
        let lifecycle = Arc::clone(self);
        self.timers.replace(
            id,
            TimerKind::Countdown,
            self.config.countdown_tick,
            async move {
                lifecycle.countdown_tick(id).await;
            },
        );
    }

    /// One countdown step. Re-reads both the explicit countdown state and
    /// the persisted status, so a tick that fires after a cancellation or a
    /// raced reset stops idempotently instead of acting on stale captures.
    async fn countdown_tick(self: Arc<Self>, id: AuctionId) {
        let _guard = self.lock(id).await;
        let Some(remaining) = self.remaining_countdown(&id) else {
            // Cancelled between fire and lock acquisition.
            return;
        };
        let auction = match self.read(&id).await {
            Ok(Some(auction)) => auction,
            Ok(None) => {
                self.countdowns.remove(&id);
                return;
            }
            Err(err) => {
                // Abandon the tick; the sweep re-arms the countdown.
                tracing::warn!(auction = %id, ?err, "failed to read auction during countdown");
                self.countdowns.remove(&id);
                return;
            }
        };
        if auction.status != AuctionStatus::Ending {
            // Raced reset: the status moved without this countdown being
            // cancelled first. Announce and stop.
            self.countdowns.remove(&id);
            self.broadcaster
                .publish(&id, AuctionEvent::countdown_cancelled(None));
            return;
        }
        let remaining = remaining.saturating_sub(1);
        if remaining > 0 {
            self.countdowns.insert(id, remaining);
            self.broadcaster
                .publish(&id, AuctionEvent::countdown_tick(remaining));
            self.arm_countdown_tick(id);
        } else {
            self.finalize_locked(&auction).await;
        }
    }

    /// Finalizes an auction: winner selection, terminal status, `auctionEnded`
    /// broadcast. Idempotent; finalizing an ended auction changes nothing
    /// and broadcasts nothing.
    pub async fn finalize(self: &Arc<Self>, id: AuctionId) {
        let _guard = self.lock(id).await;
        match self.read(&id).await {
            Ok(Some(auction)) => self.finalize_locked(&auction).await,
            Ok(None) => (),
            Err(err) => {
                tracing::warn!(auction = %id, ?err, "failed to read auction for finalization");
                metrics().abandoned_transitions.inc();
            }
        }
    }

    async fn finalize_locked(&self, auction: &Auction) {
        if auction.status == AuctionStatus::Ended {
            return;
        }
        let id = auction.id;
        let winner = auction.highest_bid().map(|bid| bid.bidder);
        match self.bounded(self.store.finalize_auction(&id, winner)).await {
            Ok(Finalization::Finalized(ended)) => {
                tracing::info!(auction = %id, winner = ?winner, "auction ended");
                metrics().transitions.with_label_values(&["ended"]).inc();
                self.timers.cancel(&id);
                self.countdowns.remove(&id);
                self.ledger.forget(&id);
                self.broadcaster
                    .publish(&id, AuctionEvent::auction_ended(ended));
                self.broadcaster.drop_room(&id);
                self.locks.remove(&id);
            }
            Ok(Finalization::AlreadyEnded) | Ok(Finalization::NotFound) => (),
            Err(err) => {
                tracing::warn!(auction = %id, ?err, "failed to persist finalization");
                metrics().abandoned_transitions.inc();
            }
        }
    }

    async fn read(&self, id: &AuctionId) -> Result<Option<Auction>> {
        self.bounded(self.store.single_auction(id)).await
    }

    async fn bounded<T>(
        &self,
        operation: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.config.storage_timeout, operation)
            .await
            .context("storage operation timed out")?
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::database::{InMemory, auctions::MockAuctionStoring},
        chrono::Duration as Delta,
        model::{
            auction::{Bid, UserId},
            event::RoomEvent,
        },
        tokio::sync::broadcast,
    };

    struct Fixture {
        store: Arc<InMemory>,
        lifecycle: Arc<Lifecycle>,
        timers: Arc<TimerRegistry>,
        broadcaster: Arc<Broadcaster>,
    }

    fn config() -> LifecycleConfig {
        LifecycleConfig {
            inactivity_timeout: Duration::from_secs(60),
            final_countdown: 15,
            countdown_tick: Duration::from_secs(1),
            storage_timeout: Duration::from_secs(5),
        }
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemory::new());
        let timers = Arc::new(TimerRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(64));
        let lifecycle = Arc::new(Lifecycle::new(
            store.clone(),
            Arc::new(BidLedger::new()),
            timers.clone(),
            broadcaster.clone(),
            config(),
        ));
        Fixture {
            store,
            lifecycle,
            timers,
            broadcaster,
        }
    }

    /// An active auction whose last activity lies `stale_secs` in the past.
    fn auction_with_activity(stale_secs: i64, bids: Vec<Bid>) -> Auction {
        let now = Utc::now();
        Auction {
            id: model::auction::AuctionId::random(),
            product_name: "vintage camera".to_string(),
            description: "working condition".to_string(),
            image_url: "https://img.example/camera.jpg".to_string(),
            starting_price: 100,
            start_date_time: now - Delta::hours(1),
            end_date_time: now + Delta::hours(23),
            seller: UserId::random(),
            bids,
            last_bid_time: Some(now - Delta::seconds(stale_secs)),
            winner: None,
            status: AuctionStatus::Active,
            created_at: now - Delta::hours(1),
        }
    }

    fn bid(amount: i64, seconds_ago: i64) -> Bid {
        Bid {
            bidder: UserId::random(),
            amount,
            timestamp: Utc::now() - Delta::seconds(seconds_ago),
        }
    }

    async fn next_auction_event(events: &mut broadcast::Receiver<RoomEvent>) -> AuctionEvent {
        match events.recv().await.unwrap() {
            RoomEvent::Auction(event) => event,
            other => panic!("expected auction event, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stale_activity_begins_the_ending_countdown() {
        let fixture = fixture();
        let auction = auction_with_activity(120, vec![]);
        fixture.store.insert_auction(&auction).await.unwrap();
        let mut events = fixture.broadcaster.subscribe(auction.id);

        fixture.lifecycle.evaluate(&auction).await;

        let stored = fixture.store.single_auction(&auction.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AuctionStatus::Ending);
        assert_eq!(fixture.lifecycle.remaining_countdown(&auction.id), Some(15));
        assert_eq!(
            fixture.timers.armed_kind(&auction.id),
            Some(TimerKind::Countdown)
        );
        assert_eq!(
            next_auction_event(&mut events).await,
            AuctionEvent::auction_ending(60, 15)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn recent_activity_only_arms_the_inactivity_timer() {
        let fixture = fixture();
        let auction = auction_with_activity(10, vec![]);
        fixture.store.insert_auction(&auction).await.unwrap();

        fixture.lifecycle.evaluate(&auction).await;

        let stored = fixture.store.single_auction(&auction.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AuctionStatus::Active);
        assert_eq!(
            fixture.timers.armed_kind(&auction.id),
            Some(TimerKind::Inactivity)
        );
        assert_eq!(fixture.lifecycle.remaining_countdown(&auction.id), None);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_runs_down_and_finalizes_the_winner() {
        let fixture = fixture();
        // Two bids tie on amount; the earlier one wins.
        let first = bid(200, 90);
        let second = bid(200, 80);
        let auction =
            auction_with_activity(80, vec![bid(150, 100), first.clone(), second.clone()]);
        fixture.store.insert_auction(&auction).await.unwrap();
        let mut events = fixture.broadcaster.subscribe(auction.id);

        fixture.lifecycle.evaluate(&auction).await;
        assert_eq!(
            next_auction_event(&mut events).await,
            AuctionEvent::auction_ending(60, 15)
        );

        tokio::time::sleep(Duration::from_secs(16)).await;

        let stored = fixture.store.single_auction(&auction.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AuctionStatus::Ended);
        assert_eq!(stored.winner, Some(first.bidder));
        assert_eq!(fixture.lifecycle.remaining_countdown(&auction.id), None);
        assert_eq!(fixture.timers.armed_kind(&auction.id), None);

        for countdown in (1..15).rev() {
            assert_eq!(
                next_auction_event(&mut events).await,
                AuctionEvent::countdown_tick(countdown)
            );
        }
        match next_auction_event(&mut events).await {
            AuctionEvent::AuctionEnded {
                auction: ended,
                countdown,
                ..
            } => {
                assert_eq!(ended.winner, Some(first.bidder));
                assert_eq!(countdown, None);
            }
            other => panic!("expected auctionEnded, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn auction_without_bids_ends_without_a_winner() {
        let fixture = fixture();
        let auction = auction_with_activity(61, vec![]);
        fixture.store.insert_auction(&auction).await.unwrap();

        fixture.lifecycle.evaluate(&auction).await;
        tokio::time::sleep(Duration::from_secs(16)).await;

        let stored = fixture.store.single_auction(&auction.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AuctionStatus::Ended);
        assert_eq!(stored.winner, None);
    }

    #[tokio::test(start_paused = true)]
    async fn finalize_is_idempotent_and_broadcasts_once() {
        let fixture = fixture();
        let auction = auction_with_activity(10, vec![]);
        fixture.store.insert_auction(&auction).await.unwrap();
        let mut events = fixture.broadcaster.subscribe(auction.id);

        fixture.lifecycle.finalize(auction.id).await;
        fixture.lifecycle.finalize(auction.id).await;

        assert!(matches!(
            next_auction_event(&mut events).await,
            AuctionEvent::AuctionEnded { .. }
        ));
        // The room was dropped after the single ended event; a duplicate
        // would have arrived before the channel closed.
        assert!(matches!(
            events.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn raced_reset_stops_the_countdown_idempotently() {
        let fixture = fixture();
        let auction = auction_with_activity(120, vec![]);
        fixture.store.insert_auction(&auction).await.unwrap();
        fixture.lifecycle.evaluate(&auction).await;
        let mut events = fixture.broadcaster.subscribe(auction.id);

        // Some external writer resets the status without cancelling the
        // countdown first.
        fixture
            .store
            .update_status(&auction.id, AuctionStatus::Ending, AuctionStatus::Active)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(
            next_auction_event(&mut events).await,
            AuctionEvent::countdown_cancelled(None)
        );
        assert_eq!(fixture.lifecycle.remaining_countdown(&auction.id), None);

        // No finalization happens however long we wait.
        tokio::time::sleep(Duration::from_secs(60)).await;
        let stored = fixture.store.single_auction(&auction.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AuctionStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_countdown_resumes_active_with_fresh_timer() {
        let fixture = fixture();
        let auction = auction_with_activity(120, vec![]);
        fixture.store.insert_auction(&auction).await.unwrap();
        fixture.lifecycle.evaluate(&auction).await;
        let mut events = fixture.broadcaster.subscribe(auction.id);

        // The bid path: cancel the countdown under the lock, persist the
        // accepted bid together with the active status, then resume.
        {
            let _guard = fixture.lifecycle.lock(auction.id).await;
            fixture.lifecycle.cancel_countdown(&auction.id);
            let accepted = bid(250, 0);
            let updated = fixture
                .store
                .append_bid(&auction.id, &accepted, AuctionStatus::Active)
                .await
                .unwrap()
                .unwrap();
            fixture.lifecycle.resume_active(&updated);
        }

        assert!(matches!(
            next_auction_event(&mut events).await,
            AuctionEvent::CountdownCancelled {
                auction: Some(_),
                ..
            }
        ));
        assert_eq!(
            fixture.timers.armed_kind(&auction.id),
            Some(TimerKind::Inactivity)
        );
        assert_eq!(fixture.lifecycle.remaining_countdown(&auction.id), None);

        // The cancelled countdown never finalizes the auction.
        tokio::time::sleep(Duration::from_secs(30)).await;
        let stored = fixture.store.single_auction(&auction.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AuctionStatus::Active);
        assert!(
            events.try_recv().is_err(),
            "no countdown tick may follow a cancellation"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn persistence_failure_abandons_the_transition() {
        let auction = auction_with_activity(120, vec![]);
        let mut store = MockAuctionStoring::new();
        let record = auction.clone();
        store
            .expect_single_auction()
            .returning(move |_| Ok(Some(record.clone())));
        store
            .expect_update_status()
            .returning(|_, _, _| anyhow::bail!("store unavailable"));

        let timers = Arc::new(TimerRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(64));
        let lifecycle = Arc::new(Lifecycle::new(
            Arc::new(store),
            Arc::new(BidLedger::new()),
            timers.clone(),
            broadcaster.clone(),
            config(),
        ));
        let mut events = broadcaster.subscribe(auction.id);

        lifecycle.evaluate(&auction).await;

        // Nothing was announced and no countdown started; the sweep will
        // retry the whole evaluation on its next pass.
        assert!(events.try_recv().is_err());
        assert_eq!(lifecycle.remaining_countdown(&auction.id), None);
        assert_eq!(timers.armed_kind(&auction.id), None);
    }
}
