//! Directory-level upload helpers.

use std::path::{Path, PathBuf};

use futures::stream::{self, TryStreamExt};
use tracing::debug;

use crate::client::ObjectStore;
use crate::error::{StorageError, StorageResult};

/// Content type for an HLS artifact, chosen by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("ts") => "video/mp2t",
        _ => "application/octet-stream",
    }
}

/// A local file and the object key it is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    pub path: PathBuf,
    pub key: String,
}

impl UploadItem {
    pub fn new(path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
        }
    }
}

/// Regular files directly inside `dir`, sorted by name.
pub async fn list_files(dir: &Path) -> StorageResult<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }

    files.sort();
    Ok(files)
}

/// Upload every item with at most `parallel` transfers in flight.
///
/// Stops at the first failure; transfers already running are dropped.
pub async fn upload_files(
    store: &dyn ObjectStore,
    items: &[UploadItem],
    parallel: usize,
) -> StorageResult<usize> {
    stream::iter(items.iter().map(Ok::<_, StorageError>))
        .try_for_each_concurrent(parallel.max(1), |item| async move {
            store
                .upload_file(&item.path, &item.key, content_type_for(&item.path))
                .await?;
            debug!(key = %item.key, "Uploaded object");
            Ok(())
        })
        .await?;

    Ok(items.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        uploads: Mutex<Vec<(String, String)>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn upload_file(
            &self,
            _path: &Path,
            key: &str,
            content_type: &str,
        ) -> StorageResult<()> {
            if self.fail_on.as_deref() == Some(key) {
                return Err(StorageError::upload_failed(key));
            }
            self.uploads
                .lock()
                .unwrap()
                .push((key.to_string(), content_type.to_string()));
            Ok(())
        }

        fn public_url(&self, key: &str) -> String {
            format!("https://cdn.test/{}", key)
        }
    }

    #[test]
    fn test_content_types() {
        assert_eq!(
            content_type_for(Path::new("720p/index.m3u8")),
            "application/vnd.apple.mpegurl"
        );
        assert_eq!(
            content_type_for(Path::new("720p/segment_000.ts")),
            "video/mp2t"
        );
        assert_eq!(
            content_type_for(Path::new("thumb.jpg")),
            "application/octet-stream"
        );
        assert_eq!(content_type_for(Path::new("README")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_list_files_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("segment_001.ts"), b"b").await.unwrap();
        tokio::fs::write(dir.path().join("segment_000.ts"), b"a").await.unwrap();
        tokio::fs::write(dir.path().join("index.m3u8"), b"#EXTM3U").await.unwrap();
        tokio::fs::create_dir(dir.path().join("nested")).await.unwrap();

        let files = list_files(dir.path()).await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(names, vec!["index.m3u8", "segment_000.ts", "segment_001.ts"]);
    }

    #[tokio::test]
    async fn test_list_files_missing_dir_errors() {
        let dir = tempfile::tempdir().unwrap();
        let result = list_files(&dir.path().join("absent")).await;
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[tokio::test]
    async fn test_upload_files_sets_content_types() {
        let store = RecordingStore::default();
        let items = vec![
            UploadItem::new("/out/360p/index.m3u8", "job/360p/index.m3u8"),
            UploadItem::new("/out/360p/segment_000.ts", "job/360p/segment_000.ts"),
        ];

        let count = upload_files(&store, &items, 4).await.unwrap();
        assert_eq!(count, 2);

        let mut uploads = store.uploads.lock().unwrap().clone();
        uploads.sort();
        assert_eq!(
            uploads,
            vec![
                (
                    "job/360p/index.m3u8".to_string(),
                    "application/vnd.apple.mpegurl".to_string()
                ),
                ("job/360p/segment_000.ts".to_string(), "video/mp2t".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_upload_files_fails_on_first_error() {
        let store = RecordingStore {
            fail_on: Some("job/360p/segment_000.ts".to_string()),
            ..Default::default()
        };
        let items = vec![UploadItem::new(
            "/out/360p/segment_000.ts",
            "job/360p/segment_000.ts",
        )];

        let result = upload_files(&store, &items, 0).await;
        assert!(matches!(result, Err(StorageError::UploadFailed(_))));
    }
}
