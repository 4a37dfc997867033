use crate::traits::{Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Local filesystem storage implementation
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    base_url: String,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for file storage (e.g., "/var/lib/trackline/media")
    /// * `base_url` - Base URL for serving files (e.g., "http://localhost:3000/media")
    pub async fn new(base_path: impl Into<PathBuf>, base_url: String) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage {
            base_path,
            base_url,
        })
    }

    /// Convert a storage key to a filesystem path.
    ///
    /// Keys may not contain `..` or start with `/`, so they always resolve inside
    /// the base directory.
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        if storage_key.is_empty()
            || storage_key.contains("..")
            || storage_key.starts_with('/')
            || storage_key.contains('\\')
        {
            return Err(StorageError::InvalidKey(
                "Storage key contains invalid characters".to_string(),
            ));
        }

        let path = self.base_path.join(storage_key);
        if path.strip_prefix(&self.base_path).is_err() {
            return Err(StorageError::InvalidKey(
                "Storage key resolves outside storage directory".to_string(),
            ));
        }

        Ok(path)
    }

    fn generate_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }

    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Hidden sibling the object is written to before being renamed into place.
    ///
    /// Every write gets its own name, so concurrent writers to one key never share
    /// an inode and the last rename wins.
    fn partial_path(path: &Path) -> PathBuf {
        let mut name = std::ffi::OsString::from(".");
        name.push(path.file_name().unwrap_or_default());
        name.push(format!(".partial-{}", uuid::Uuid::new_v4()));
        path.with_file_name(name)
    }

    /// Rename a finished partial onto `path`, removing the partial if that fails.
    async fn publish_partial(partial: &Path, path: &Path) -> StorageResult<()> {
        if let Err(e) = fs::rename(partial, path).await {
            let _ = fs::remove_file(partial).await;
            return Err(StorageError::UploadFailed(format!(
                "Failed to move file into {}: {}",
                path.display(),
                e
            )));
        }
        Ok(())
    }

    async fn write_partial<R>(partial: &Path, reader: &mut R) -> StorageResult<u64>
    where
        R: tokio::io::AsyncRead + Unpin + ?Sized,
    {
        let result: StorageResult<u64> = async {
            let mut file = fs::File::create(partial).await.map_err(|e| {
                StorageError::UploadFailed(format!(
                    "Failed to create file {}: {}",
                    partial.display(),
                    e
                ))
            })?;
            let written = tokio::io::copy(reader, &mut file).await.map_err(|e| {
                StorageError::UploadFailed(format!(
                    "Failed to write file {}: {}",
                    partial.display(),
                    e
                ))
            })?;
            file.flush().await?;
            file.sync_all().await.map_err(|e| {
                StorageError::UploadFailed(format!("Failed to sync file {}: {}", partial.display(), e))
            })?;
            Ok(written)
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(partial).await;
        }
        result
    }

    async fn count_files(dir: &Path) -> StorageResult<usize> {
        let mut count = 0;
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            let mut entries = fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    pending.push(entry.path());
                } else {
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload_with_key(
        &self,
        storage_key: &str,
        data: Vec<u8>,
        _content_type: &str,
    ) -> StorageResult<String> {
        let path = self.key_to_path(storage_key)?;
        let partial = Self::partial_path(&path);
        let size = data.len();

        self.ensure_parent_dir(&path).await?;

        let start = std::time::Instant::now();

        Self::write_partial(&partial, &mut data.as_slice()).await?;
        Self::publish_partial(&partial, &path).await?;

        let url = self.generate_url(storage_key);

        tracing::info!(
            path = %path.display(),
            key = %storage_key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage upload_with_key successful"
        );

        Ok(url)
    }

    async fn upload_file(
        &self,
        storage_key: &str,
        source: &Path,
        _content_type: &str,
    ) -> StorageResult<String> {
        let path = self.key_to_path(storage_key)?;
        let partial = Self::partial_path(&path);
        let start = std::time::Instant::now();

        self.ensure_parent_dir(&path).await?;

        let mut reader = fs::File::open(source).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(source.display().to_string())
            } else {
                StorageError::UploadFailed(format!("Failed to open {}: {}", source.display(), e))
            }
        })?;

        let bytes_copied = Self::write_partial(&partial, &mut reader).await?;
        Self::publish_partial(&partial, &path).await?;

        tracing::info!(
            path = %path.display(),
            key = %storage_key,
            size_bytes = bytes_copied,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage file upload successful"
        );

        Ok(self.generate_url(storage_key))
    }

    async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>> {
        let path = self.key_to_path(storage_key)?;
        let start = std::time::Instant::now();

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(storage_key.to_string()));
        }

        let data = fs::read(&path).await.map_err(|e| {
            StorageError::DownloadFailed(format!("Failed to read file {}: {}", path.display(), e))
        })?;

        tracing::debug!(
            key = %storage_key,
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage download successful"
        );

        Ok(data)
    }

    async fn download_to_file(&self, storage_key: &str, dest: &Path) -> StorageResult<u64> {
        let path = self.key_to_path(storage_key)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(storage_key.to_string()));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::copy(&path, dest).await.map_err(|e| {
            StorageError::DownloadFailed(format!(
                "Failed to copy {} to {}: {}",
                path.display(),
                dest.display(),
                e
            ))
        })
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        let path = self.key_to_path(storage_key)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        fs::remove_file(&path).await.map_err(|e| {
            StorageError::DeleteFailed(format!("Failed to delete file {}: {}", path.display(), e))
        })?;

        tracing::info!(key = %storage_key, "Local storage delete successful");

        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let dir = self.key_to_path(prefix.trim_end_matches('/'))?;

        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(0);
        }
        if !fs::metadata(&dir).await?.is_dir() {
            self.delete(prefix.trim_end_matches('/')).await?;
            return Ok(1);
        }

        let removed = Self::count_files(&dir).await?;
        fs::remove_dir_all(&dir).await.map_err(|e| {
            StorageError::DeleteFailed(format!("Failed to delete {}: {}", dir.display(), e))
        })?;

        tracing::info!(prefix = %prefix, removed, "Local storage prefix delete successful");

        Ok(removed)
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(storage_key)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn storage(dir: &Path) -> LocalStorage {
        LocalStorage::new(dir, "http://localhost:3000/media".to_string())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_local_storage_upload_download() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let url = storage
            .upload_with_key("tracks/r/t/manifest.json", b"{}".to_vec(), "application/json")
            .await
            .unwrap();
        assert_eq!(url, "http://localhost:3000/media/tracks/r/t/manifest.json");

        let downloaded = storage.download("tracks/r/t/manifest.json").await.unwrap();
        assert_eq!(downloaded, b"{}");
    }

    #[tokio::test]
    async fn test_upload_overwrites_existing_key() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        storage
            .upload_with_key("tracks/r/t/stream.mp4", b"first".to_vec(), "audio/mp4")
            .await
            .unwrap();
        storage
            .upload_with_key("tracks/r/t/stream.mp4", b"second".to_vec(), "audio/mp4")
            .await
            .unwrap();

        assert_eq!(storage.download("tracks/r/t/stream.mp4").await.unwrap(), b"second");
        let names: Vec<_> = std::fs::read_dir(dir.path().join("tracks/r/t"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("stream.mp4")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_to_one_key_leave_a_whole_object() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let first = vec![b'a'; 4 * 1024 * 1024];
        let second = vec![b'b'; 3 * 1024 * 1024 + 17];
        let second_path = dir.path().join("second.wav");
        std::fs::write(&second_path, &second).unwrap();

        for _ in 0..8 {
            let (a, b) = tokio::join!(
                storage.upload_with_key("tracks/r/t/source.wav", first.clone(), "audio/wav"),
                storage.upload_file("tracks/r/t/source.wav", &second_path, "audio/wav"),
            );
            a.unwrap();
            b.unwrap();

            let stored = storage.download("tracks/r/t/source.wav").await.unwrap();
            assert!(
                stored == first || stored == second,
                "stored object of {} bytes matches neither write",
                stored.len()
            );
        }

        let leftovers = std::fs::read_dir(dir.path().join("tracks/r/t"))
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name() != "source.wav")
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let result = storage.download("../../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.delete("../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.exists("/etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.delete_prefix("tracks/../../").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_local_storage_delete_nonexistent() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        assert!(storage.delete("nonexistent/file.txt").await.is_ok());
        assert_eq!(storage.delete_prefix("tracks/none/").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempdir().unwrap();
        let work = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let source = work.path().join("input.wav");
        tokio::fs::write(&source, b"RIFF....WAVE").await.unwrap();

        storage
            .upload_file("tracks/r/t/source", &source, "audio/wav")
            .await
            .unwrap();
        assert!(storage.exists("tracks/r/t/source").await.unwrap());

        let dest = work.path().join("nested/copy.wav");
        let written = storage
            .download_to_file("tracks/r/t/source", &dest)
            .await
            .unwrap();
        assert_eq!(written, 12);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"RIFF....WAVE");
    }

    #[tokio::test]
    async fn test_upload_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let result = storage
            .upload_file("tracks/r/t/source", Path::new("/definitely/missing"), "audio/wav")
            .await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_prefix_only_removes_that_track() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        for key in [
            "tracks/r/a/source",
            "tracks/r/a/lossless.flac",
            "tracks/r/a/manifest.json",
            "tracks/r/b/source",
        ] {
            storage
                .upload_with_key(key, b"x".to_vec(), "application/octet-stream")
                .await
                .unwrap();
        }

        let removed = storage.delete_prefix("tracks/r/a/").await.unwrap();
        assert_eq!(removed, 3);
        assert!(!storage.exists("tracks/r/a/source").await.unwrap());
        assert!(storage.exists("tracks/r/b/source").await.unwrap());
    }
}
