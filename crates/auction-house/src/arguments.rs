use {
    std::{fmt, net::SocketAddr, time::Duration},
    tracing::level_filters::LevelFilter,
};

#[derive(clap::Parser)]
pub struct Arguments {
    #[clap(long, env, default_value = "warn,auction_house=debug")]
    pub log_filter: String,

    #[clap(long, env, default_value = "error")]
    pub log_stderr_threshold: LevelFilter,

    #[clap(long, env, default_value = "0.0.0.0:8080")]
    pub bind_address: SocketAddr,

    #[clap(long, env, default_value = "0.0.0.0:9586")]
    pub metrics_address: SocketAddr,

    /// How long an auction may go without an accepted bid before its ending
    /// countdown starts.
    #[clap(
        long,
        env,
        default_value = "1m",
        value_parser = humantime::parse_duration,
    )]
    pub inactivity_timeout: Duration,

    /// Number of countdown ticks between entering the ending state and
    /// finalizing the auction.
    #[clap(long, env, default_value = "15")]
    pub final_countdown: u32,

    /// Wall-clock length of one countdown tick.
    #[clap(
        long,
        env,
        default_value = "1s",
        value_parser = humantime::parse_duration,
    )]
    pub countdown_tick: Duration,

    /// How often the background sweep re-evaluates all open auctions.
    #[clap(
        long,
        env,
        default_value = "5s",
        value_parser = humantime::parse_duration,
    )]
    pub sweep_interval: Duration,

    /// Upper bound on any single storage operation.
    #[clap(
        long,
        env,
        default_value = "5s",
        value_parser = humantime::parse_duration,
    )]
    pub storage_timeout: Duration,

    /// Events buffered per auction room before a slow subscriber starts
    /// losing the oldest ones.
    #[clap(long, env, default_value = "64")]
    pub event_buffer_size: usize,
}

impl fmt::Display for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "log_filter: {}", self.log_filter)?;
        writeln!(f, "log_stderr_threshold: {}", self.log_stderr_threshold)?;
        writeln!(f, "bind_address: {}", self.bind_address)?;
        writeln!(f, "metrics_address: {}", self.metrics_address)?;
        writeln!(f, "inactivity_timeout: {:?}", self.inactivity_timeout)?;
        writeln!(f, "final_countdown: {}", self.final_countdown)?;
        writeln!(f, "countdown_tick: {:?}", self.countdown_tick)?;
        writeln!(f, "sweep_interval: {:?}", self.sweep_interval)?;
        writeln!(f, "storage_timeout: {:?}", self.storage_timeout)?;
        writeln!(f, "event_buffer_size: {}", self.event_buffer_size)?;
        Ok(())
    }
}
