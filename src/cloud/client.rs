use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use rusoto_core::{HttpClient, Region};
use rusoto_credential::{ChainProvider, ProvideAwsCredentials, StaticProvider};
use rusoto_secretsmanager::SecretsManagerClient;

use crate::cloud::object_store::ObjectStore;
use crate::cloud::s3::{custom_region, S3Storage};
use crate::cloud::secrets::{SecretStore, SecretsManagerStore};
use crate::config::BackupConfig;
use crate::constants::{ACCESS_KEY_NAME, SECRET_KEY_NAME};
use crate::models::CredentialBundle;

/// Builds the per-request cloud clients
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CloudConnector: Send + Sync {
    /// Resolve ambient credentials and open a secret store session
    async fn connect(&self) -> Result<Arc<dyn SecretStore>>;

    /// Build an object store client from a fetched credential bundle
    fn object_store(&self, credentials: &CredentialBundle) -> Result<Arc<dyn ObjectStore>>;
}

/// Connector for AWS-compatible services.
///
/// The secret store uses the ambient credential chain (environment, profile,
/// container, instance metadata). The object store uses the static keys
/// found in the fetched bundle.
pub struct AwsConnector {
    region: String,
    s3_endpoint: String,
    secrets_endpoint: Option<String>,
}

impl AwsConnector {
    pub fn new(config: &BackupConfig) -> Self {
        Self {
            region: config.region.clone(),
            s3_endpoint: config.s3_endpoint.clone(),
            secrets_endpoint: config.secrets_endpoint.clone(),
        }
    }

    fn secrets_region(&self) -> Result<Region> {
        match &self.secrets_endpoint {
            Some(endpoint) => Ok(custom_region(&self.region, endpoint)),
            None => self
                .region
                .parse::<Region>()
                .with_context(|| format!("Invalid region '{}'", self.region)),
        }
    }
}

#[async_trait]
impl CloudConnector for AwsConnector {
    async fn connect(&self) -> Result<Arc<dyn SecretStore>> {
        let region = self.secrets_region()?;
        let credentials = ChainProvider::new()
            .credentials()
            .await
            .context("Failed to resolve ambient credentials")?;
        debug!("Resolved ambient credentials for region {}", region.name());

        let provider = StaticProvider::new(
            credentials.aws_access_key_id().to_string(),
            credentials.aws_secret_access_key().to_string(),
            credentials.token().clone(),
            None,
        );
        let http_client =
            HttpClient::new().map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;
        let client = SecretsManagerClient::new_with(http_client, provider, region);

        Ok(Arc::new(SecretsManagerStore::new(client)))
    }

    fn object_store(&self, credentials: &CredentialBundle) -> Result<Arc<dyn ObjectStore>> {
        let access_key = credentials
            .get(ACCESS_KEY_NAME)
            .ok_or_else(|| anyhow!("Credential bundle has no {}", ACCESS_KEY_NAME))?;
        let secret_key = credentials
            .get(SECRET_KEY_NAME)
            .ok_or_else(|| anyhow!("Credential bundle has no {}", SECRET_KEY_NAME))?;

        let storage = S3Storage::new(access_key, secret_key, &self.region, &self.s3_endpoint)?;
        Ok(Arc::new(storage))
    }
}
