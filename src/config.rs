use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

use crate::models::policy::DEFAULT_RETENTION_DAYS;
use crate::services::sweeper::{DEFAULT_MAX_DEPTH, DEFAULT_PAGE_SIZE, TraversalLimits};
use crate::services::storage_service::MAX_LIST_KEYS;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub namespace: String,
    pub sweep: SweepSettings,
}

/// Defaults every invocation starts from before its payload is applied.
#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub default_bucket: Option<String>,
    pub default_retention_days: u32,
    pub limits: TraversalLimits,
    /// Wall-clock budget for one sweep; `None` runs to completion.
    pub deadline: Option<Duration>,
}

/// What the process should do after configuration is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Apply the schema and exit.
    Migrate,
    /// Serve `POST /invoke`, health probes and the store admin API.
    Serve,
    /// Run a single invocation with an optional JSON payload and exit.
    Invoke { payload: Option<String> },
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Deletes objects older than a retention period")]
pub struct Args {
    /// Host to bind to (overrides RETENTION_SWEEPER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides RETENTION_SWEEPER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides RETENTION_SWEEPER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides RETENTION_SWEEPER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Namespace of the local store (overrides RETENTION_SWEEPER_NAMESPACE)
    #[arg(long)]
    pub namespace: Option<String>,

    /// Objects requested per listing page (overrides RETENTION_SWEEPER_PAGE_SIZE)
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Deepest prefix level to descend into (overrides RETENTION_SWEEPER_MAX_DEPTH)
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Stop a sweep after this many seconds (overrides SWEEP_DEADLINE_SECS)
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// JSON payload, e.g. '{"bucketName":"logs","retentionDays":7}'
    #[arg(long, conflicts_with_all = ["serve", "migrate"])]
    pub payload: Option<String>,

    /// Serve invocations over HTTP instead of running once
    #[arg(long, conflicts_with = "migrate")]
    pub serve: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl Args {
    pub fn mode(&self) -> RunMode {
        if self.migrate {
            RunMode::Migrate
        } else if self.serve {
            RunMode::Serve
        } else {
            RunMode::Invoke {
                payload: self.payload.clone(),
            }
        }
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        let args = Args::parse();
        let cfg = Self::from_sources(&args, |key| env::var(key).ok())?;
        Ok((cfg, args.mode()))
    }

    /// Merge `args` over values found through `lookup`.
    pub fn from_sources(args: &Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        let port = match args.port {
            Some(port) => port,
            None => parse_var(&lookup, "RETENTION_SWEEPER_PORT")?.unwrap_or(3000),
        };
        let page_size = match args.page_size {
            Some(size) => size,
            None => parse_var(&lookup, "RETENTION_SWEEPER_PAGE_SIZE")?.unwrap_or(DEFAULT_PAGE_SIZE),
        };
        let max_depth = match args.max_depth {
            Some(depth) => depth,
            None => parse_var(&lookup, "RETENTION_SWEEPER_MAX_DEPTH")?.unwrap_or(DEFAULT_MAX_DEPTH),
        };
        let deadline_secs = match args.deadline_secs {
            Some(secs) => Some(secs),
            None => parse_var(&lookup, "SWEEP_DEADLINE_SECS")?,
        };

        let sweep = SweepSettings {
            default_bucket: lookup("BUCKET_NAME").filter(|name| !name.trim().is_empty()),
            default_retention_days: retention_days_or_default(lookup("RETENTION_DAYS")),
            limits: TraversalLimits {
                page_size: page_size.clamp(1, MAX_LIST_KEYS),
                max_depth,
            },
            deadline: deadline_secs.map(Duration::from_secs),
        };

        Ok(Self {
            host: args
                .host
                .clone()
                .unwrap_or_else(|| env_or("RETENTION_SWEEPER_HOST", "0.0.0.0")),
            port,
            storage_dir: args
                .storage_dir
                .clone()
                .unwrap_or_else(|| env_or("RETENTION_SWEEPER_STORAGE_DIR", "./data/objects")),
            database_url: args.database_url.clone().unwrap_or_else(|| {
                env_or(
                    "RETENTION_SWEEPER_DATABASE_URL",
                    "sqlite://./data/meta/objects.db",
                )
            }),
            namespace: args
                .namespace
                .clone()
                .unwrap_or_else(|| env_or("RETENTION_SWEEPER_NAMESPACE", "local")),
            sweep,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `RETENTION_DAYS` falls back to the default when absent or unparseable.
fn retention_days_or_default(raw: Option<String>) -> u32 {
    match raw.as_deref().map(str::trim) {
        None | Some("") => DEFAULT_RETENTION_DAYS,
        Some(value) => value.parse().unwrap_or_else(|_| {
            tracing::warn!(
                value,
                default = DEFAULT_RETENTION_DAYS,
                "ignoring unparseable RETENTION_DAYS"
            );
            DEFAULT_RETENTION_DAYS
        }),
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", key, value))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(args: &Args, vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_sources(args, |key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let cfg = load(&Args::default(), &[]).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.namespace, "local");
        assert_eq!(cfg.sweep.default_bucket, None);
        assert_eq!(cfg.sweep.default_retention_days, 30);
        assert_eq!(cfg.sweep.limits, TraversalLimits::default());
        assert_eq!(cfg.sweep.deadline, None);
    }

    #[test]
    fn reads_bucket_and_retention_from_environment() {
        let cfg = load(
            &Args::default(),
            &[("BUCKET_NAME", "audit-logs"), ("RETENTION_DAYS", "7")],
        )
        .unwrap();
        assert_eq!(cfg.sweep.default_bucket.as_deref(), Some("audit-logs"));
        assert_eq!(cfg.sweep.default_retention_days, 7);
    }

    #[test]
    fn unparseable_retention_falls_back_to_thirty_days() {
        for raw in ["soon", "-4", "", "1.5"] {
            let cfg = load(&Args::default(), &[("RETENTION_DAYS", raw)]).unwrap();
            assert_eq!(cfg.sweep.default_retention_days, 30, "value {raw:?}");
        }
    }

    #[test]
    fn args_override_environment() {
        let args = Args {
            port: Some(8080),
            page_size: Some(5000),
            deadline_secs: Some(90),
            ..Args::default()
        };
        let cfg = load(
            &args,
            &[("RETENTION_SWEEPER_PORT", "9000"), ("SWEEP_DEADLINE_SECS", "10")],
        )
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.sweep.limits.page_size, MAX_LIST_KEYS);
        assert_eq!(cfg.sweep.deadline, Some(Duration::from_secs(90)));
    }

    #[test]
    fn malformed_port_is_an_error() {
        let err = load(&Args::default(), &[("RETENTION_SWEEPER_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("RETENTION_SWEEPER_PORT"));
    }

    #[test]
    fn run_mode_follows_flags() {
        assert_eq!(
            Args::default().mode(),
            RunMode::Invoke { payload: None }
        );
        let serve = Args {
            serve: true,
            ..Args::default()
        };
        assert_eq!(serve.mode(), RunMode::Serve);
        let migrate = Args {
            migrate: true,
            ..Args::default()
        };
        assert_eq!(migrate.mode(), RunMode::Migrate);
    }

    #[test]
    fn cli_parses_payload() {
        let args = Args::try_parse_from([
            "retention-sweeper",
            "--payload",
            r#"{"bucketName":"x"}"#,
        ])
        .unwrap();
        assert_eq!(
            args.mode(),
            RunMode::Invoke {
                payload: Some(r#"{"bucketName":"x"}"#.into())
            }
        );
        assert!(Args::try_parse_from(["retention-sweeper", "--serve", "--payload", "{}"]).is_err());
    }
}
