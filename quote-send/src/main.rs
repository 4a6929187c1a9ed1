//! quote-send - Background daemon for periodic quote posting
//!
//! Posts one random quote at startup and then one per interval until it
//! receives SIGINT or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use libquotecast::logging::{LogFormat, LoggingConfig};
use libquotecast::platforms::bluesky::BlueskyClient;
use libquotecast::{Config, QuoteBook, QuotePoster, Result};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "quote-send")]
#[command(version)]
#[command(about = "Post a random quote to Bluesky on a fixed interval")]
#[command(long_about = "\
quote-send - Post a random quote to Bluesky on a fixed interval

DESCRIPTION:
    quote-send is a long-running daemon. At startup it posts one random
    quote from the quotes file, then posts another every interval.

    Session tokens are kept encrypted in memory and refreshed in the
    background. An expired access token is refreshed on demand and the
    post retried once. Failed posts are logged and never stop the daemon.

USAGE:
    # Run in foreground (logs to stderr)
    quote-send

    # Post every 30 minutes
    quote-send --interval 30m

    # JSON logs for a log collector
    quote-send --log-format json

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown

CONFIGURATION:
    Configuration file: ~/.config/quotecast/config.toml
    (override with --config or QUOTECAST_CONFIG)

    [bluesky]
    pds_url = \"https://bsky.social\"
    did = \"did:plc:...\"

    [schedule]
    post_interval = \"1h\"
    token_refresh_interval = \"45m\"

    [quotes]
    file = \"quotes.json\"

    Tokens are normally supplied through QUOTECAST_ACCESS_JWT and
    QUOTECAST_REFRESH_JWT.

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Time between posts (overrides config), e.g. "30m" or "2h"
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    interval: Option<Duration>,

    /// Log output format: text, json or pretty
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Post once and exit (for testing)
    #[arg(long, hide = true)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env();
    if let Some(format) = cli.log_format {
        logging.format = format;
    }
    logging.verbose = cli.verbose;
    logging.init();

    if let Err(e) = run(cli).await {
        error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load_with_override(cli.config.as_deref())?;
    if let Some(interval) = cli.interval {
        config.schedule.post_interval = interval;
        config.validate()?;
    }

    let quotes = QuoteBook::load(&config.quotes.file)?;

    let shutdown = CancellationToken::new();
    let signals = signals::install(shutdown.clone())?;

    info!("quote-send starting for {}", config.bluesky.did);

    let client = Arc::new(BlueskyClient::connect(&config).await?);
    let poster = QuotePoster::new(quotes, client.clone());

    let deadline = config.schedule.operation_timeout;
    post_quote(&poster, &shutdown, deadline).await;

    if cli.once {
        info!("quote-send: posted once, exiting");
    } else {
        run_daemon_loop(&poster, config.schedule.post_interval, deadline, &shutdown).await;
    }

    client.credentials().shutdown_and_wait().await;
    signals.close();

    info!("quote-send stopped");
    Ok(())
}

/// Post on every tick until shutdown is requested
async fn run_daemon_loop(
    poster: &QuotePoster,
    period: Duration,
    deadline: Duration,
    shutdown: &CancellationToken,
) {
    info!(
        "Posting every {}",
        humantime::format_duration(period)
    );

    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("Shutdown requested, stopping daemon loop");
                break;
            }
            _ = ticker.tick() => post_quote(poster, shutdown, deadline).await,
        }
    }
}

/// Post one quote, bounded by `deadline`; failures are only logged
async fn post_quote(poster: &QuotePoster, shutdown: &CancellationToken, deadline: Duration) {
    match tokio::time::timeout(deadline, poster.post_random(shutdown)).await {
        Ok(Ok(result)) if result.success => {}
        Ok(Ok(result)) => warn!(
            "Post to {} failed, next attempt at the following interval: {}",
            result.platform,
            result.error.unwrap_or_default()
        ),
        Ok(Err(e)) => error!("Could not post a quote: {}", e),
        Err(_) => error!(
            "Post did not finish within {}",
            humantime::format_duration(deadline)
        ),
    }
}

#[cfg(unix)]
mod signals {
    use futures::stream::StreamExt;
    use libquotecast::{QuotecastError, Result};
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::{Handle, Signals};
    use tokio_util::sync::CancellationToken;
    use tracing::info;

    pub struct Installed(Handle);

    impl Installed {
        pub fn close(self) {
            self.0.close();
        }
    }

    /// Cancel `shutdown` on SIGINT or SIGTERM
    pub fn install(shutdown: CancellationToken) -> Result<Installed> {
        let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(QuotecastError::Io)?;
        let handle = signals.handle();

        tokio::spawn(async move {
            if let Some(signal) = signals.next().await {
                info!("Received signal {}, stopping gracefully...", signal);
                shutdown.cancel();
            }
        });

        Ok(Installed(handle))
    }
}

#[cfg(not(unix))]
mod signals {
    use libquotecast::Result;
    use tokio_util::sync::CancellationToken;
    use tracing::info;

    pub struct Installed(tokio::task::JoinHandle<()>);

    impl Installed {
        pub fn close(self) {
            self.0.abort();
        }
    }

    /// Cancel `shutdown` on Ctrl-C
    pub fn install(shutdown: CancellationToken) -> Result<Installed> {
        let task = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl-C, stopping gracefully...");
                shutdown.cancel();
            }
        });
        Ok(Installed(task))
    }
}
