use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use pgwarden::admin::format_pool_stats;
use pgwarden::{Config, Driver, FlatPool, PgDriver, TopologyPool};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const APP_NAME: &str = "pgwarden";

// -----------------------------------------------------------------------------
// ----- Main ------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    setup().await;

    let config = Config::snapshot();
    let driver: Arc<dyn Driver> = Arc::new(PgDriver::new().with_application_name(APP_NAME));
    let pools = Pools {
        topology: config.pools.build_topology(driver.clone()),
        flat: config.pools.build_flat(driver),
    };

    info!(
        "{} managing {} endpoint(s) from {}",
        APP_NAME,
        config.pools.endpoint_count(),
        config.config_file_location.display()
    );

    let failures = pools.warm().await;

    if config.once {
        pools.report();
        pools.close().await;
        return if failures == 0 {
            ExitCode::SUCCESS
        } else {
            error!("{failures} endpoint(s) could not be connected");
            ExitCode::FAILURE
        };
    }

    run_forever(&pools, config.pools.refresh_interval).await;
    pools.close().await;
    ExitCode::SUCCESS
}

// -----------------------------------------------------------------------------
// ----- Setup -----------------------------------------------------------------

async fn setup() {
    // This has to be the first thing we do, because it initializes the config
    Config::init().await;

    init_tracing();
}

fn init_tracing() {
    let config = Config::snapshot();
    let filter = EnvFilter::try_new(config.log_level.as_str())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

// -----------------------------------------------------------------------------
// ----- Pools -----------------------------------------------------------------

struct Pools {
    topology: TopologyPool,
    flat: FlatPool,
}

impl Pools {
    /// Opens every endpoint once. Returns how many could not be connected.
    async fn warm(&self) -> usize {
        let topology_failures = self.topology.warm_all().await.len();
        let flat = self.flat.refresh_connections().await;
        topology_failures + flat.failed
    }

    fn report(&self) {
        info!("{}", format_pool_stats("topology", self.topology.stats()));
        info!("{}", format_pool_stats("flat", self.flat.stats()));
    }

    async fn close(&self) {
        if let Err(e) = self.topology.close().await {
            warn!("topology pool: {e}");
        }
        if let Err(e) = self.flat.close().await {
            warn!("flat pool: {e}");
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Run -------------------------------------------------------------------

async fn run_forever(pools: &Pools, refresh_interval: std::time::Duration) {
    let mut ticker = interval(refresh_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // The first tick fires immediately; warm() already covered it.
    ticker.tick().await;

    info!("{} refreshing every {:?}", APP_NAME, refresh_interval);

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("{} shutting down", APP_NAME);
                break;
            }

            _ = ticker.tick() => {
                let report = pools.flat.refresh_connections().await;
                if report.failed > 0 {
                    warn!("{} connection(s) failed to refresh", report.failed);
                }
                pools.report();
            }
        }
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
