//! Builds the artifact store selected by `STORAGE_BACKEND`.

#[cfg(feature = "storage-local")]
use crate::LocalStorage;
#[cfg(feature = "storage-s3")]
use crate::S3Storage;
use crate::{Storage, StorageBackend, StorageError, StorageResult};
use std::sync::Arc;
use trackline_core::Config;

fn required<'a>(value: Option<&'a str>, variable: &str) -> StorageResult<&'a str> {
    value.ok_or_else(|| StorageError::ConfigError(format!("{} not configured", variable)))
}

pub async fn create_storage(config: &Config) -> StorageResult<Arc<dyn Storage>> {
    let backend = config.storage_backend();
    tracing::debug!(backend = %backend, "Creating artifact storage");

    let storage: Arc<dyn Storage> = match backend {
        #[cfg(feature = "storage-s3")]
        StorageBackend::S3 => {
            let bucket = required(config.s3_bucket(), "S3_BUCKET")?;
            let region = required(config.s3_region(), "S3_REGION or AWS_REGION")?;
            Arc::new(
                S3Storage::new(
                    bucket.to_string(),
                    region.to_string(),
                    config.s3_endpoint().map(String::from),
                )
                .await?,
            )
        }
        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            let base_path = required(config.local_storage_path(), "LOCAL_STORAGE_PATH")?;
            let base_url = required(config.local_storage_base_url(), "LOCAL_STORAGE_BASE_URL")?;
            Arc::new(LocalStorage::new(base_path, base_url.to_string()).await?)
        }
        #[allow(unreachable_patterns)]
        other => {
            return Err(StorageError::ConfigError(format!(
                "{} storage backend not compiled in",
                other
            )))
        }
    };

    Ok(storage)
}
