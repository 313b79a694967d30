use std::collections::HashMap;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::info;
use rusoto_secretsmanager::{GetSecretValueRequest, SecretsManager, SecretsManagerClient};
use serde_json::Value;

use crate::models::{CredentialBundle, SecretPayload};

/// Source of per-request credential bundles
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the current version of `secret_id`
    async fn fetch(&self, secret_id: &str) -> Result<SecretPayload>;
}

/// Secret store backed by AWS Secrets Manager (or a compatible endpoint)
pub struct SecretsManagerStore {
    client: SecretsManagerClient,
}

impl SecretsManagerStore {
    pub fn new(client: SecretsManagerClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for SecretsManagerStore {
    async fn fetch(&self, secret_id: &str) -> Result<SecretPayload> {
        let output = self
            .client
            .get_secret_value(GetSecretValueRequest {
                secret_id: secret_id.to_string(),
                ..Default::default()
            })
            .await
            .with_context(|| format!("Failed to get secret value for {}", secret_id))?;

        let version_id = output.version_id.unwrap_or_default();
        let secret_string = output
            .secret_string
            .ok_or_else(|| anyhow!("Secret {} has no string value", secret_id))?;
        let credentials = parse_secret_string(&secret_string)
            .with_context(|| format!("Failed to parse secret {}", secret_id))?;

        info!(
            "Fetched secret {} (version {}, {} entries)",
            secret_id,
            version_id,
            credentials.len()
        );

        Ok(SecretPayload {
            version_id,
            credentials,
        })
    }
}

/// Parse a secret string holding a flat JSON object.
///
/// String values are taken as-is; numbers and booleans are kept in their
/// JSON text form. Nested values are rejected.
pub fn parse_secret_string(secret_string: &str) -> Result<CredentialBundle> {
    let value: Value =
        serde_json::from_str(secret_string).context("Secret value is not valid JSON")?;
    let object = match value {
        Value::Object(object) => object,
        _ => bail!("Secret value is not a JSON object"),
    };

    let mut entries = HashMap::with_capacity(object.len());
    for (key, value) in object {
        let value = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => bail!("Secret entry {} is not a plain value", key),
        };
        entries.insert(key, value);
    }

    Ok(CredentialBundle::new(entries))
}
