//! CLI parsing and validated runtime configuration for ttlcached.
//!
//! Every process (acceptor, worker, janitor) is started from the same
//! binary and parses the same [`Cli`]; the acceptor is the only one that
//! reads it directly from `std::env::args()`, and passes the resulting
//! [`Config`] down to forked children as part of their startup state.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Total size, in bytes, of the shared-memory region (`C` in the design).
pub const DEFAULT_REGION_BYTES: u64 = 1_048_576;

/// Command-line surface for the `ttlcached` binary.
#[derive(Debug, Parser)]
#[command(name = "ttlcached", about = "Network-accessible in-memory TTL cache")]
pub struct Cli {
    /// IP address the acceptor listens on.
    #[arg(long, env = "TTLCACHED_LISTEN_IP", default_value = "127.0.0.1")]
    pub listen_ip: String,

    /// TCP port the acceptor listens on.
    #[arg(long, env = "TTLCACHED_LISTEN_PORT", default_value_t = 8080)]
    pub listen_port: u16,

    /// Number of worker processes in the pool.
    #[arg(long, env = "TTLCACHED_WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// Name of the POSIX shared-memory object backing the table.
    #[arg(long, env = "TTLCACHED_SHM_NAME", default_value = "shared_ht")]
    pub shm_name: String,

    /// Name of the POSIX named semaphore guarding the table.
    #[arg(long, env = "TTLCACHED_SEM_NAME", default_value = "mycache_sem")]
    pub sem_name: String,

    /// Maximum key length, in bytes, excluding the terminating NUL.
    #[arg(long, env = "TTLCACHED_KMAX", default_value_t = 32)]
    pub kmax: usize,

    /// Maximum value length, in bytes, excluding the terminating NUL.
    #[arg(long, env = "TTLCACHED_VMAX", default_value_t = 256)]
    pub vmax: usize,

    /// Size of the shared-memory region in bytes. The table's slot count is
    /// derived from this and the slot size implied by `kmax`/`vmax`.
    #[arg(long, env = "TTLCACHED_REGION_BYTES", default_value_t = DEFAULT_REGION_BYTES)]
    pub region_bytes: u64,

    /// Path to a TOML file overriding any of the above. CLI flags and
    /// environment variables still take precedence over file contents that
    /// were left at their clap defaults — see [`Config::load`].
    #[arg(long, env = "TTLCACHED_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,
}

/// Validated runtime configuration threaded into the acceptor, every
/// worker, and the janitor.
///
/// This is the `Cache` handle's "parameters" half described in the
/// design notes: immutable, `Clone`, cheap to pass by value into each
/// forked child's argv or environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub listen_ip: String,
    pub listen_port: u16,
    pub workers: usize,
    pub shm_name: String,
    pub sem_name: String,
    pub kmax: usize,
    pub vmax: usize,
    pub region_bytes: u64,
}

impl Config {
    /// Parse `argv`/environment via [`Cli`], optionally layer in a TOML
    /// file, and validate the result.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = Cli::parse();
        Self::from_cli(cli)
    }

    /// Build and validate a [`Config`] from an already-parsed [`Cli`].
    /// Split out from [`Self::load`] so tests can construct a `Cli`
    /// directly instead of parsing real `argv`.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let mut config = Config {
            listen_ip: cli.listen_ip,
            listen_port: cli.listen_port,
            workers: cli.workers,
            shm_name: cli.shm_name,
            sem_name: cli.sem_name,
            kmax: cli.kmax,
            vmax: cli.vmax,
            region_bytes: cli.region_bytes,
        };

        if let Some(path) = cli.config_file.as_deref() {
            config = config.merge_file(path)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Overlay fields present in a TOML file onto `self`. Only fields the
    /// file actually sets are overridden — this lets a deployment ship a
    /// partial file (say, just `shm_name`/`sem_name`) without having to
    /// restate every default.
    fn merge_file(self, path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.display().to_string(), e.to_string()))?;
        let overrides: PartialConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse(path.display().to_string(), e.to_string()))?;
        Ok(overrides.apply(self))
    }

    /// Byte offset of the tick counter (`ttl`) from the start of a slot:
    /// `busy` + `tomb` (1 byte each) + key buffer + value buffer, rounded
    /// up to the natural alignment of a 32-bit integer.
    pub fn tick_offset(&self) -> usize {
        let unaligned = 2 + (self.kmax + 1) + (self.vmax + 1);
        (unaligned + 3) & !3
    }

    /// Slot size `E`: the tick counter's offset plus its own 4 bytes.
    pub fn slot_size(&self) -> usize {
        self.tick_offset() + std::mem::size_of::<i32>()
    }

    /// Slot count `T = region_bytes / slot_size`.
    pub fn table_capacity(&self) -> usize {
        self.region_bytes as usize / self.slot_size()
    }

    /// Validate cross-field and range constraints that `clap` cannot
    /// express on its own.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Validation("workers must be at least 1".into()));
        }
        if self.kmax == 0 {
            return Err(ConfigError::Validation("kmax must be at least 1".into()));
        }
        if self.vmax == 0 {
            return Err(ConfigError::Validation("vmax must be at least 1".into()));
        }
        if self.shm_name.is_empty() || self.shm_name.contains('/') {
            return Err(ConfigError::Validation("shm_name must be non-empty and contain no '/'".into()));
        }
        if self.sem_name.is_empty() || self.sem_name.contains('/') {
            return Err(ConfigError::Validation("sem_name must be non-empty and contain no '/'".into()));
        }
        if self.table_capacity() == 0 {
            return Err(ConfigError::Validation(format!(
                "region_bytes ({}) is too small to hold even one slot of size {}",
                self.region_bytes,
                self.slot_size()
            )));
        }
        Ok(())
    }
}

/// Mirrors [`Config`] but with every field optional, for TOML overlays.
#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    listen_ip: Option<String>,
    listen_port: Option<u16>,
    workers: Option<usize>,
    shm_name: Option<String>,
    sem_name: Option<String>,
    kmax: Option<usize>,
    vmax: Option<usize>,
    region_bytes: Option<u64>,
}

impl PartialConfig {
    fn apply(self, base: Config) -> Config {
        Config {
            listen_ip: self.listen_ip.unwrap_or(base.listen_ip),
            listen_port: self.listen_port.unwrap_or(base.listen_port),
            workers: self.workers.unwrap_or(base.workers),
            shm_name: self.shm_name.unwrap_or(base.shm_name),
            sem_name: self.sem_name.unwrap_or(base.sem_name),
            kmax: self.kmax.unwrap_or(base.kmax),
            vmax: self.vmax.unwrap_or(base.vmax),
            region_bytes: self.region_bytes.unwrap_or(base.region_bytes),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(String, String),

    #[error("failed to parse config file {0}: {1}")]
    Parse(String, String),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(overrides: impl FnOnce(&mut Cli)) -> Cli {
        let mut cli = Cli::parse_from(["ttlcached"]);
        overrides(&mut cli);
        cli
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::from_cli(cli(|_| {})).unwrap();
        assert_eq!(config.listen_ip, "127.0.0.1");
        assert_eq!(config.listen_port, 8080);
        assert_eq!(config.workers, 4);
        assert_eq!(config.shm_name, "shared_ht");
        assert_eq!(config.sem_name, "mycache_sem");
        assert_eq!(config.kmax, 32);
        assert_eq!(config.vmax, 256);
        assert_eq!(config.region_bytes, DEFAULT_REGION_BYTES);
    }

    #[test]
    fn slot_size_matches_default_layout() {
        let config = Config::from_cli(cli(|_| {})).unwrap();
        // 2 flag bytes + 33-byte key + 257-byte value + 4-byte tick = 296,
        // already 4-byte aligned.
        assert_eq!(config.slot_size(), 296);
    }

    #[test]
    fn table_capacity_divides_region_by_slot_size() {
        let config = Config::from_cli(cli(|_| {})).unwrap();
        assert_eq!(config.table_capacity(), (DEFAULT_REGION_BYTES as usize) / config.slot_size());
        assert!(config.table_capacity() > 0);
    }

    #[test]
    fn rejects_zero_workers() {
        let result = Config::from_cli(cli(|c| c.workers = 0));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn rejects_region_too_small_for_one_slot() {
        let result = Config::from_cli(cli(|c| c.region_bytes = 10));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn rejects_names_containing_slash() {
        let result = Config::from_cli(cli(|c| c.shm_name = "a/b".into()));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn toml_overlay_overrides_only_present_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ttlcached.toml");
        std::fs::write(&path, "shm_name = \"other_ht\"\nworkers = 8\n").unwrap();

        let config = Config::from_cli(cli(|c| c.config_file = Some(path))).unwrap();
        assert_eq!(config.shm_name, "other_ht");
        assert_eq!(config.workers, 8);
        // Untouched fields keep their clap defaults.
        assert_eq!(config.sem_name, "mycache_sem");
    }
}
