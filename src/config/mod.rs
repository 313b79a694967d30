mod backup_config;

pub use backup_config::{
    BackupConfig,
    ENV_BUCKET,
    ENV_DUMP_ROOT,
    ENV_REGION,
    ENV_S3_ENDPOINT,
    ENV_SECRETS_ENDPOINT,
    ENV_SECRET_ID,
};
