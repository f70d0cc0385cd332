use parking_lot::RwLock;
use std::{
    path::PathBuf,
    sync::{Arc, OnceLock},
};

use super::{cli::CliConfig, pools::PoolsFile, types::LogLevel};

// -----------------------------------------------------------------------------
// ----- Global Singleton ------------------------------------------------------

static ROOT_CONFIG: OnceLock<Arc<RwLock<Config>>> = OnceLock::new();

// -----------------------------------------------------------------------------
// ----- Config ----------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Config {
    pub config_file_location: PathBuf,
    pub log_level: LogLevel,
    pub once: bool,
    pub pools: Arc<PoolsFile>,
}

// -----------------------------------------------------------------------------
// ----- Config: Static --------------------------------------------------------

impl Config {
    /// Async because the pool file is read with non-blocking IO.
    pub async fn init() {
        CliConfig::init();

        let cli = CliConfig::snapshot();
        let pools = PoolsFile::from_file_async(&cli.config_file_location)
            .await
            .unwrap_or_else(|e| {
                panic!(
                    "failed to load pool file from {:?}: {e}",
                    cli.config_file_location
                )
            });

        Self::store(Config {
            config_file_location: cli.config_file_location,
            log_level: cli.log_level,
            once: cli.once,
            pools: Arc::new(pools),
        });
    }

    pub fn snapshot() -> Config {
        Self::handle().read().clone()
    }
}

// -----------------------------------------------------------------------------
// ----- Config: Private -------------------------------------------------------

impl Config {
    fn store(next: Config) {
        if let Some(handle) = ROOT_CONFIG.get() {
            *handle.write() = next;
        } else {
            let _ = ROOT_CONFIG.set(Arc::new(RwLock::new(next)));
        }
    }

    fn handle() -> Arc<RwLock<Config>> {
        ROOT_CONFIG
            .get()
            .expect("Config not initialized; call Config::init().await first")
            .clone()
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
