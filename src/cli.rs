//! Command line surface.
//!
//! Turns `bucketsync [OPTIONS] SOURCE TARGET` into a validated plan. Exactly
//! one side must be an `s3://bucket/prefix` URI; the source may carry a
//! single `*` whose tail becomes the postfix scope rule.

use clap::Parser;
use std::path::PathBuf;

use crate::config::FileConfig;
use crate::error::{SyncError, SyncResult};
use crate::fs::backend::DEFAULT_PAGE_LIMIT;
use crate::fs::s3::{Credentials, AWS_REGIONS};
use crate::sync::pattern::{is_remote, RemoteTarget, ScopeRules, WildcardExpr};
use crate::sync::scheduler::{Concurrency, DEFAULT_CONCURRENCY};
use crate::sync::{Direction, SyncConfig};

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_RETRIES: u32 = 2;

/// Sync a local directory with an S3 bucket.
#[derive(Parser, Debug, Clone)]
#[command(name = "bucketsync", version, about, long_about = None)]
pub struct Cli {
    /// Local directory or s3://bucket/prefix, optionally with one '*' (e.g. s3://b/logs/*.json)
    pub source: String,

    /// Local directory or s3://bucket/prefix
    pub target: String,

    /// Number of concurrent transfers (0 or less for no limit) [default: 20]
    #[arg(short = 'c', long, allow_negative_numbers = true)]
    pub concurrent: Option<i64>,

    /// Extra attempts for a failed transfer [default: 2]
    #[arg(long)]
    pub retries: Option<u32>,

    /// Delete existing files/keys in TARGET which do not appear in SOURCE
    #[arg(short, long)]
    pub full: bool,

    /// AWS region [default: us-east-1]
    #[arg(short, long)]
    pub region: Option<String>,

    /// AWS access key (falls back to AWS_ACCESS_KEY_ID)
    #[arg(short = 'a', long = "accesskey")]
    pub access_key: Option<String>,

    /// AWS secret key (falls back to AWS_SECRET_ACCESS_KEY)
    #[arg(short = 's', long = "secretkey")]
    pub secret_key: Option<String>,

    /// Endpoint of an S3-compatible service
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Keys requested per listing page [default: 1000]
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Log level, overridden by RUST_LOG [default: info]
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Everything needed to build the store and run the sync.
#[derive(Debug, Clone)]
pub struct Plan {
    pub sync: SyncConfig,
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub credentials: Credentials,
}

impl Cli {
    /// Validate arguments and merge them with file defaults.
    pub fn plan(&self, file: &FileConfig) -> SyncResult<Plan> {
        if self.target.contains('*') {
            return Err(SyncError::Configuration(
                "TARGET cannot contain a wildcard '*'".to_string(),
            ));
        }
        let source = WildcardExpr::parse(&self.source)?;

        let (direction, local, remote) = match (is_remote(&source.prefix), is_remote(&self.target)) {
            (true, true) => {
                return Err(SyncError::Configuration(
                    "SOURCE and TARGET can't both be S3 paths".to_string(),
                ))
            }
            (false, false) => {
                return Err(SyncError::Configuration(
                    "SOURCE (x)or TARGET must be an S3 path".to_string(),
                ))
            }
            (true, false) => (Direction::Download, self.target.as_str(), source.prefix.as_str()),
            (false, true) => (Direction::Upload, source.prefix.as_str(), self.target.as_str()),
        };
        let remote = RemoteTarget::parse(remote)?;

        let endpoint = self.endpoint.clone().or_else(|| file.endpoint.clone());
        let region = self
            .region
            .clone()
            .or_else(|| file.region.clone())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        if endpoint.is_none() && !AWS_REGIONS.contains(&region.as_str()) {
            return Err(SyncError::Configuration(format!(
                "'{}' is not a valid AWS region, select one of: {}",
                region,
                AWS_REGIONS.join(", ")
            )));
        }

        let credentials = resolve_credentials(
            self.access_key
                .clone()
                .or_else(|| std::env::var("AWS_ACCESS_KEY_ID").ok()),
            self.secret_key
                .clone()
                .or_else(|| std::env::var("AWS_SECRET_ACCESS_KEY").ok()),
        )?;

        let limit = self
            .concurrent
            .or(file.concurrent)
            .unwrap_or(DEFAULT_CONCURRENCY as i64);
        let retries = self.retries.or(file.retries).unwrap_or(DEFAULT_RETRIES);

        let mut sync = SyncConfig::new(direction, local, &remote.key_prefix);
        sync.rules = ScopeRules::new(vec![source.postfix_rule()]);
        sync.full_sync = self.full;
        sync.concurrency = Concurrency::from_limit(limit);
        sync.max_attempts = retries.saturating_add(1);
        sync.page_size = self
            .page_size
            .or(file.page_size)
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .max(1);

        Ok(Plan {
            sync,
            bucket: remote.bucket,
            region,
            endpoint,
            credentials,
        })
    }

    /// Effective log level.
    pub fn log_level(&self, file: &FileConfig) -> String {
        self.log_level
            .clone()
            .or_else(|| file.log_level.clone())
            .unwrap_or_else(|| "info".to_string())
    }
}

/// Both keys, or neither (use the provider chain).
pub fn resolve_credentials(
    access_key: Option<String>,
    secret_key: Option<String>,
) -> SyncResult<Credentials> {
    match (access_key, secret_key) {
        (Some(access_key), Some(secret_key)) => Ok(Credentials::Static {
            access_key,
            secret_key,
        }),
        (None, None) => Ok(Credentials::Chain),
        _ => Err(SyncError::Configuration(
            "Please specify both of your AWS keys".to_string(),
        )),
    }
}
