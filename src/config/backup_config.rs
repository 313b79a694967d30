use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::constants::DEFAULT_S3_ENDPOINT;

/// Environment variable names
pub const ENV_SECRET_ID: &str = "SECRET_ID";
pub const ENV_REGION: &str = "REGION";
pub const ENV_BUCKET: &str = "BUCKET";
pub const ENV_S3_ENDPOINT: &str = "S3_ENDPOINT";
pub const ENV_SECRETS_ENDPOINT: &str = "SECRETS_ENDPOINT";
pub const ENV_DUMP_ROOT: &str = "DUMP_ROOT";

/// Everything a backup request needs, loaded and validated once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    /// Secret holding the object storage keys
    pub secret_id: String,
    pub region: String,
    pub bucket: String,
    /// S3-compatible endpoint host or URL
    pub s3_endpoint: String,
    /// Secret store endpoint; the regional AWS endpoint when unset
    pub secrets_endpoint: Option<String>,
    /// Directory tree that gets dumped
    pub root_path: PathBuf,
}

impl BackupConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let mut missing = Vec::new();
        let mut required = |name: &'static str| {
            get(name).unwrap_or_else(|| {
                missing.push(name);
                String::new()
            })
        };
        let secret_id = required(ENV_SECRET_ID);
        let region = required(ENV_REGION);
        let bucket = required(ENV_BUCKET);

        if !missing.is_empty() {
            bail!("Missing required environment variables: {}", missing.join(", "));
        }

        let config = BackupConfig {
            secret_id,
            region,
            bucket,
            s3_endpoint: get(ENV_S3_ENDPOINT).unwrap_or_else(|| DEFAULT_S3_ENDPOINT.to_string()),
            secrets_endpoint: get(ENV_SECRETS_ENDPOINT),
            root_path: get(ENV_DUMP_ROOT)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/")),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.root_path.is_absolute() {
            bail!("{} must be an absolute path, got {}", ENV_DUMP_ROOT, self.root_path.display());
        }
        if self.bucket.contains('/') {
            bail!("{} must be a bucket name, got {}", ENV_BUCKET, self.bucket);
        }
        Ok(())
    }
}
