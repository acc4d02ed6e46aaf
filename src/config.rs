use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;
use std::{env, path::PathBuf, str::FromStr, time::Duration};

const MIB: u64 = 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub worker_interpreter: String,
    pub scripts_dir: PathBuf,
    pub worker_timeout: Duration,
    pub limits: UploadLimits,
    pub max_body_bytes: usize,
    pub session_ttl: Duration,
    pub sweep_interval: Duration,
    pub orphan_max_age: Duration,
}

/// Server-imposed ceilings applied to every upload batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadLimits {
    /// Per-file ceiling for plain documents.
    pub max_file_bytes: u64,
    /// Per-file ceiling for archive bundles.
    pub max_archive_bytes: u64,
    /// Decompressed bytes all archives of one batch may write.
    pub max_expanded_bytes: u64,
    /// Batches larger than this must be bundled into an archive.
    pub max_batch_items: usize,
    /// Items the transport accepts per request; the rest are dropped.
    pub max_file_uploads: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: 8 * MIB,
            max_archive_bytes: 50 * MIB,
            max_expanded_bytes: 200 * MIB,
            max_batch_items: 500,
            max_file_uploads: 20,
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Tax document batch processing gateway")]
pub struct Args {
    /// Host to bind to (overrides TAXDOC_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides TAXDOC_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Base directory for per-request workspaces (overrides TAXDOC_UPLOAD_DIR)
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Interpreter used to launch worker scripts (overrides TAXDOC_WORKER_INTERPRETER)
    #[arg(long)]
    pub worker_interpreter: Option<String>,

    /// Directory holding the worker scripts (overrides TAXDOC_SCRIPTS_DIR)
    #[arg(long)]
    pub scripts_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        Self::from_env_with(args)
    }

    fn from_env_with(args: Args) -> Result<Self> {
        let defaults = UploadLimits::default();

        // --- Environment fallback ---
        let env_host = env::var("TAXDOC_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_or("TAXDOC_PORT", 3000u16)?;
        let env_upload_dir = env::var("TAXDOC_UPLOAD_DIR").unwrap_or_else(|_| "./data/uploads".into());
        let env_interpreter =
            env::var("TAXDOC_WORKER_INTERPRETER").unwrap_or_else(|_| "python3".into());
        let env_scripts = env::var("TAXDOC_SCRIPTS_DIR").unwrap_or_else(|_| "./scripts".into());

        let limits = UploadLimits {
            max_file_bytes: env_or("TAXDOC_MAX_FILE_BYTES", defaults.max_file_bytes)?,
            max_archive_bytes: env_or("TAXDOC_MAX_ARCHIVE_BYTES", defaults.max_archive_bytes)?,
            max_expanded_bytes: env_or("TAXDOC_MAX_EXPANDED_BYTES", defaults.max_expanded_bytes)?,
            max_batch_items: env_or("TAXDOC_MAX_BATCH_ITEMS", defaults.max_batch_items)?,
            max_file_uploads: env_or("TAXDOC_MAX_FILE_UPLOADS", defaults.max_file_uploads)?,
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            upload_dir: args.upload_dir.unwrap_or_else(|| env_upload_dir.into()),
            worker_interpreter: args.worker_interpreter.unwrap_or(env_interpreter),
            scripts_dir: args.scripts_dir.unwrap_or_else(|| env_scripts.into()),
            worker_timeout: Duration::from_secs(env_or("TAXDOC_WORKER_TIMEOUT_SECS", 300u64)?),
            limits,
            max_body_bytes: env_or("TAXDOC_MAX_BODY_BYTES", 256 * MIB as usize)?,
            session_ttl: Duration::from_secs(env_or("TAXDOC_SESSION_TTL_SECS", 3600u64)?),
            sweep_interval: Duration::from_secs(env_or("TAXDOC_SWEEP_INTERVAL_SECS", 300u64)?),
            orphan_max_age: Duration::from_secs(env_or("TAXDOC_ORPHAN_MAX_AGE_SECS", 7200u64)?),
        };
        cfg.check_timings()?;
        Ok(cfg)
    }

    /// The orphan sweep must never reach a workspace whose worker may still
    /// be running.
    fn check_timings(&self) -> Result<()> {
        if self.orphan_max_age <= self.worker_timeout {
            bail!(
                "TAXDOC_ORPHAN_MAX_AGE_SECS ({}s) must be greater than TAXDOC_WORKER_TIMEOUT_SECS ({}s)",
                self.orphan_max_age.as_secs(),
                self.worker_timeout.as_secs()
            );
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse an environment variable, falling back to `default` when unset.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_limits_match_documented_ceilings() {
        let limits = UploadLimits::default();
        assert_eq!(limits.max_file_bytes, 8 * 1024 * 1024);
        assert_eq!(limits.max_archive_bytes, 50 * 1024 * 1024);
        assert_eq!(limits.max_batch_items, 500);
    }

    #[test]
    fn cli_arguments_override_environment() {
        let args = Args::parse_from([
            "taxdoc-gateway",
            "--host",
            "127.0.0.1",
            "--port",
            "8088",
            "--upload-dir",
            "/srv/uploads",
        ]);
        let cfg = AppConfig::from_env_with(args).unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:8088");
        assert_eq!(cfg.upload_dir, PathBuf::from("/srv/uploads"));
    }

    #[test]
    fn unset_variable_uses_default() {
        let value: u64 = env_or("TAXDOC_TEST_SURELY_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }

    fn reference_config() -> AppConfig {
        AppConfig::from_env_with(Args::parse_from(["taxdoc-gateway"])).unwrap()
    }

    #[test]
    fn default_timings_pass() {
        let cfg = reference_config();
        assert!(cfg.orphan_max_age > cfg.worker_timeout);
        assert!(cfg.check_timings().is_ok());
    }

    #[test]
    fn orphan_age_at_or_below_worker_timeout_is_refused() {
        let mut cfg = reference_config();
        cfg.worker_timeout = Duration::from_secs(600);
        cfg.orphan_max_age = Duration::from_secs(600);
        let err = cfg.check_timings().unwrap_err();
        assert!(err.to_string().contains("TAXDOC_ORPHAN_MAX_AGE_SECS"));

        cfg.orphan_max_age = Duration::from_secs(60);
        assert!(cfg.check_timings().is_err());

        cfg.orphan_max_age = Duration::from_secs(601);
        assert!(cfg.check_timings().is_ok());
    }
}
