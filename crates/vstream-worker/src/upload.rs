//! Upload unit.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, Instrument};
use vstream_models::rung::PLAYLIST_FILENAME;
use vstream_models::{Rung, RungUrl, TranscodeJob};
use vstream_storage::{content_type_for, list_files, upload_files, ObjectStore, UploadItem};

use crate::context::PipelineContext;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

/// Object key of a file relative to the job's namespace.
pub fn object_key(job_id: &str, relative: &str) -> String {
    format!("{}/{}", job_id, relative)
}

/// Upload every rung directory in an isolated task and wait for it.
///
/// Returns the public playlist URL of each rung, in rung order.
pub async fn run_upload_unit(
    ctx: &PipelineContext,
    job: &TranscodeJob,
    rungs: &[Rung],
) -> WorkerResult<Vec<RungUrl>> {
    let storage = Arc::clone(&ctx.storage);
    let parallel = ctx.config.max_upload_parallel;
    let job_id = job.job_id.to_string();
    let output_dir = job.output_dir.clone();
    let unit_rungs = rungs.to_vec();
    let started = Instant::now();

    let handle = tokio::spawn(
        async move {
            upload_ladder(storage.as_ref(), &job_id, &output_dir, &unit_rungs, parallel).await
        }
        .in_current_span(),
    );

    let urls = match handle.await {
        Ok(result) => result?,
        Err(join_err) => {
            return Err(WorkerError::upload(format!(
                "upload task aborted: {}",
                join_err
            )))
        }
    };

    metrics::record_upload_duration(started.elapsed().as_secs_f64());
    Ok(urls)
}

/// Upload all files of all rungs under `<job_id>/<h>p/`.
pub async fn upload_ladder(
    store: &dyn ObjectStore,
    job_id: &str,
    output_dir: &Path,
    rungs: &[Rung],
    parallel: usize,
) -> WorkerResult<Vec<RungUrl>> {
    let mut items = Vec::new();

    for rung in rungs {
        let dir = rung.output_dir(output_dir);
        let files = list_files(&dir)
            .await
            .map_err(|e| WorkerError::upload(format!("listing {}: {}", dir.display(), e)))?;

        for path in files {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let key = object_key(job_id, &format!("{}/{}", rung.name(), name));
            items.push(UploadItem::new(path.clone(), key));
        }
    }

    debug!(files = items.len(), "Uploading rung files");
    let count = upload_files(store, &items, parallel).await?;
    metrics::record_files_uploaded(count);

    Ok(rungs
        .iter()
        .map(|rung| RungUrl {
            rung: rung.name(),
            url: store.public_url(&object_key(job_id, &rung.playlist_uri())),
        })
        .collect())
}

/// Upload the master playlist and return its public URL.
pub async fn upload_master(ctx: &PipelineContext, job: &TranscodeJob) -> WorkerResult<String> {
    let path = job.master_playlist_path();
    let key = object_key(job.job_id.as_str(), PLAYLIST_FILENAME);

    ctx.storage
        .upload_file(&path, &key, content_type_for(&path))
        .await?;
    metrics::record_files_uploaded(1);

    Ok(ctx.storage.public_url(&key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use vstream_storage::{StorageError, StorageResult};

    #[derive(Default)]
    struct KeyRecorder {
        keys: Mutex<Vec<String>>,
        reject_segments: bool,
    }

    #[async_trait]
    impl ObjectStore for KeyRecorder {
        async fn upload_file(&self, _path: &Path, key: &str, _ct: &str) -> StorageResult<()> {
            if self.reject_segments && key.ends_with(".ts") {
                return Err(StorageError::upload_failed(key));
            }
            self.keys.lock().unwrap().push(key.to_string());
            Ok(())
        }

        fn public_url(&self, key: &str) -> String {
            format!("https://cdn.test/{}", key)
        }
    }

    async fn write_rung(base: &Path, rung: &Rung) {
        let dir = rung.output_dir(base);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("index.m3u8"), "#EXTM3U\n").await.unwrap();
        tokio::fs::write(dir.join("segment_000.ts"), [0u8; 8]).await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_ladder_keys_and_urls() {
        let out = tempfile::tempdir().unwrap();
        let rungs = [Rung::new(640, 360), Rung::new(854, 480)];
        for rung in &rungs {
            write_rung(out.path(), rung).await;
        }

        let store = KeyRecorder::default();
        let urls = upload_ladder(&store, "job-1", out.path(), &rungs, 2)
            .await
            .unwrap();

        let mut keys = store.keys.lock().unwrap().clone();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "job-1/360p/index.m3u8",
                "job-1/360p/segment_000.ts",
                "job-1/480p/index.m3u8",
                "job-1/480p/segment_000.ts",
            ]
        );
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0].rung, "360p");
        assert_eq!(urls[1].url, "https://cdn.test/job-1/480p/index.m3u8");
    }

    #[tokio::test]
    async fn test_missing_rung_directory_fails() {
        let out = tempfile::tempdir().unwrap();
        let store = KeyRecorder::default();
        let result = upload_ladder(&store, "job-1", out.path(), &[Rung::new(640, 360)], 2).await;
        assert!(matches!(result, Err(WorkerError::Upload(_))));
        assert!(store.keys.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_failed_file_fails_the_unit() {
        let out = tempfile::tempdir().unwrap();
        let rung = Rung::new(640, 360);
        write_rung(out.path(), &rung).await;

        let store = KeyRecorder {
            reject_segments: true,
            ..Default::default()
        };
        let result = upload_ladder(&store, "job-1", out.path(), &[rung], 1).await;
        assert!(matches!(result, Err(WorkerError::Upload(_))));
    }
}
