use {
    crate::{
        api,
        arguments::Arguments,
        auction_house::AuctionHouse,
        database::{InMemory, auctions::AuctionStoring},
        events::Broadcaster,
        ledger::BidLedger,
        lifecycle::{Lifecycle, LifecycleConfig},
        sweep::{Liveness, Sweep},
        timers::TimerRegistry,
    },
    clap::Parser,
    std::{sync::Arc, time::Duration},
    tokio::task,
};

/// How many sweep intervals may pass without a completed pass before the
/// liveness probe reports the service dead.
const MAX_MISSED_SWEEPS: u32 = 4;

pub async fn start(args: impl Iterator<Item = String>) {
    let args = Arguments::parse_from(args);
    observe::tracing::initialize(&args.log_filter, args.log_stderr_threshold);
    observe::metrics::setup_registry(Some("auction_house".into()), None);
    tracing::info!("running auction house with validated arguments:\n{}", args);
    run(args).await
}

/// Assumes tracing and the metrics registry have already been set up.
pub async fn run(args: Arguments) {
    let store: Arc<dyn AuctionStoring> = Arc::new(InMemory::new());
    let ledger = Arc::new(BidLedger::new());
    let timers = Arc::new(TimerRegistry::new());
    let broadcaster = Arc::new(Broadcaster::new(args.event_buffer_size));
    let lifecycle = Arc::new(Lifecycle::new(
        store.clone(),
        ledger.clone(),
        timers.clone(),
        broadcaster.clone(),
        LifecycleConfig {
            inactivity_timeout: args.inactivity_timeout,
            final_countdown: args.final_countdown,
            countdown_tick: args.countdown_tick,
            storage_timeout: args.storage_timeout,
        },
    ));
    let auction_house = Arc::new(AuctionHouse::new(
        store.clone(),
        ledger,
        lifecycle.clone(),
        broadcaster,
        args.storage_timeout,
    ));

    let liveness = Arc::new(Liveness::new(args.sweep_interval * MAX_MISSED_SWEEPS));
    let sweep = Sweep::new(
        store,
        lifecycle,
        liveness.clone(),
        args.sweep_interval,
        args.storage_timeout,
    );

    let (shutdown_sender, shutdown_receiver) = tokio::sync::oneshot::channel();
    let serve_api = api::serve_api(auction_house, args.bind_address, async {
        let _ = shutdown_receiver.await;
    });
    let sweep_task = task::spawn(async move {
        sweep.run_forever().await;
    });
    let metrics_task = observe::metrics::serve_metrics(liveness, args.metrics_address);

    futures::pin_mut!(serve_api);
    tokio::select! {
        result = &mut serve_api => tracing::error!(?result, "API task exited"),
        result = sweep_task => tracing::error!(?result, "sweep task exited"),
        result = metrics_task => tracing::error!(?result, "metrics task exited"),
        _ = shutdown_signal() => {
            tracing::info!("Gracefully shutting down API");
            if shutdown_sender.send(()).is_err() {
                tracing::error!("failed to send shutdown signal");
                return;
            }
            match tokio::time::timeout(Duration::from_secs(10), serve_api).await {
                Ok(Ok(())) => (),
                Ok(Err(err)) => tracing::error!(?err, "API failed during shutdown"),
                Err(_) => tracing::error!("API shutdown exceeded timeout"),
            }
        }
    };
}

#[cfg(unix)]
async fn shutdown_signal() {
    // Intercept main signals for graceful shutdown. Kubernetes sends sigterm,
    // whereas locally sigint (ctrl-c) is most common.
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await
    };
    let sigint = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };
    futures::pin_mut!(sigint);
    futures::pin_mut!(sigterm);
    futures::future::select(sigterm, sigint).await;
}

#[cfg(windows)]
async fn shutdown_signal() {
    // We don't support signal handling on windows.
    std::future::pending().await
}
