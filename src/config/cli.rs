use clap::Parser;
use parking_lot::RwLock;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use super::types::LogLevel;

// -----------------------------------------------------------------------------
// ----- Global Singleton ------------------------------------------------------

static CLI_CONFIG: OnceLock<Arc<RwLock<CliConfig>>> = OnceLock::new();

// -----------------------------------------------------------------------------
// ----- CliConfig -------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CliConfig {
    pub config_file_location: PathBuf,
    pub log_level: LogLevel,
    pub once: bool,
}

impl CliConfig {
    pub fn init() {
        CLI_CONFIG.get_or_init(|| {
            let cfg = Self::from_args();
            cfg.validate();
            Arc::new(RwLock::new(cfg))
        });
    }

    pub fn snapshot() -> CliConfig {
        handle().read().clone()
    }
}

// -----------------------------------------------------------------------------
// ----- CliConfig: Private ----------------------------------------------------

impl CliConfig {
    fn from_args() -> Self {
        let args = Args::try_parse().unwrap_or_else(|e| e.exit());

        Self {
            config_file_location: args.config_file,
            log_level: args.log_level,
            once: args.once,
        }
    }

    fn validate(&self) {
        must_exist_file(&self.config_file_location, "--config / pgwarden.toml");
    }
}

// -----------------------------------------------------------------------------
// ----- Args ------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "pgwarden",
    version,
    about = "Keeps Postgres master/replica connection pools warm"
)]
struct Args {
    // Must exist; no defaults.
    #[arg(long = "config", env = "PGWARDEN_CONFIG_FILE")]
    config_file: PathBuf,

    // Not required via CLI or ENV (defaults to info).
    #[arg(long = "log", env = "PGWARDEN_LOG", default_value = "info")]
    log_level: LogLevel,

    // Warm every endpoint, report, and exit.
    #[arg(long = "once")]
    once: bool,
}

// -----------------------------------------------------------------------------
// ----- Private Utils ---------------------------------------------------------

fn handle() -> Arc<RwLock<CliConfig>> {
    CLI_CONFIG
        .get()
        .expect("cli config not initialized; call Config::init().await first")
        .clone()
}

fn must_exist_file(path: &Path, hint: &str) {
    let md = fs::metadata(path).unwrap_or_else(|_| {
        panic!("required file missing: {} (from {hint})", path.display());
    });

    if !md.is_file() {
        panic!("path is not a file: {} (from {hint})", path.display());
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse_with_defaults() {
        let args = Args::try_parse_from(["pgwarden", "--config", "pgwarden.toml"]).unwrap();
        assert_eq!(args.config_file, PathBuf::from("pgwarden.toml"));
        assert_eq!(args.log_level, LogLevel::Info);
        assert!(!args.once);
    }

    #[test]
    fn args_parse_explicit() {
        let args =
            Args::try_parse_from(["pgwarden", "--config", "p.toml", "--log", "debug", "--once"])
                .unwrap();
        assert_eq!(args.log_level, LogLevel::Debug);
        assert!(args.once);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
