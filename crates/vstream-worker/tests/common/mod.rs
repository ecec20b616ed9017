//! In-memory stand-ins for the pipeline's collaborators.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use vstream_media::{MediaEngine, MediaError, MediaResult, VideoInfo};
use vstream_models::{JobId, JobStatus, Rung, RungUrl, StatusRecord, TranscodeJob};
use vstream_queue::{QueueError, QueueResult, StatusStore};
use vstream_storage::{ObjectStore, StorageError, StorageResult};
use vstream_worker::{PipelineContext, WorkerConfig};

pub const CDN: &str = "https://cdn.test";

/// Engine reporting a fixed resolution and writing two files per rung.
#[derive(Default)]
pub struct FakeEngine {
    pub width: u32,
    pub height: u32,
    pub probe_error: Option<String>,
    pub transcode_error: Option<String>,
    pub transcode_calls: AtomicUsize,
}

impl FakeEngine {
    pub fn with_resolution(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    pub fn transcode_calls(&self) -> usize {
        self.transcode_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn probe(&self, input: &Path) -> MediaResult<VideoInfo> {
        if let Some(msg) = &self.probe_error {
            return Err(MediaError::InvalidVideo(msg.clone()));
        }
        if !input.exists() {
            return Err(MediaError::FileNotFound(input.to_path_buf()));
        }
        Ok(VideoInfo {
            duration: 12.0,
            width: self.width,
            height: self.height,
            fps: 30.0,
            codec: "h264".to_string(),
            has_audio: true,
            size: 1024,
            bitrate: 800_000,
        })
    }

    async fn transcode(
        &self,
        _input: &Path,
        output_dir: &Path,
        rungs: &[Rung],
        _duration_secs: f64,
    ) -> MediaResult<()> {
        self.transcode_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = &self.transcode_error {
            return Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with an error",
                Some(msg.clone()),
                Some(1),
            ));
        }
        for rung in rungs {
            let dir = rung.output_dir(output_dir);
            tokio::fs::write(dir.join("index.m3u8"), "#EXTM3U\n").await?;
            tokio::fs::write(dir.join("segment_000.ts"), [0u8; 16]).await?;
        }
        Ok(())
    }
}

/// Object store keeping uploaded bytes in memory.
#[derive(Default)]
pub struct MemoryStore {
    pub objects: Mutex<HashMap<String, (String, Vec<u8>)>>,
    pub fail_suffix: Option<String>,
}

impl MemoryStore {
    pub fn failing_on(suffix: &str) -> Self {
        Self {
            fail_suffix: Some(suffix.to_string()),
            ..Default::default()
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn object(&self, key: &str) -> Option<(String, Vec<u8>)> {
        self.objects.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn upload_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()> {
        if let Some(suffix) = &self.fail_suffix {
            if key.ends_with(suffix.as_str()) {
                return Err(StorageError::upload_failed(format!("{}: rejected", key)));
            }
        }
        let body = tokio::fs::read(path).await?;
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (content_type.to_string(), body));
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", CDN, key)
    }
}

/// Status store that enforces the same transition rules as Redis and
/// remembers every status it accepted.
///
/// It can also watch a directory and note whether it ever had entries at the
/// moment of a write, which shows what the runner had created before cleanup.
#[derive(Default)]
pub struct MemoryStatusStore {
    records: Mutex<HashMap<String, StatusRecord>>,
    history: Mutex<Vec<JobStatus>>,
    watched_dir: Mutex<Option<PathBuf>>,
    watched_dir_populated: AtomicBool,
}

impl MemoryStatusStore {
    pub fn history(&self) -> Vec<JobStatus> {
        self.history.lock().unwrap().clone()
    }

    pub fn record(&self, job_id: &JobId) -> Option<StatusRecord> {
        self.records.lock().unwrap().get(job_id.as_str()).cloned()
    }

    pub fn watch_dir(&self, dir: &Path) {
        *self.watched_dir.lock().unwrap() = Some(dir.to_path_buf());
    }

    pub fn saw_populated_dir(&self) -> bool {
        self.watched_dir_populated.load(Ordering::SeqCst)
    }

    fn inspect_watched_dir(&self) {
        if let Some(dir) = self.watched_dir.lock().unwrap().as_ref() {
            let populated = std::fs::read_dir(dir)
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(false);
            if populated {
                self.watched_dir_populated.store(true, Ordering::SeqCst);
            }
        }
    }

    fn update(
        &self,
        job_id: &JobId,
        status: JobStatus,
        f: impl FnOnce(&mut StatusRecord),
    ) -> QueueResult<()> {
        self.inspect_watched_dir();

        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(job_id.as_str()) else {
            return Err(QueueError::rejected_transition(None, status.as_str()));
        };
        if !record.status.can_transition_to(status) {
            return Err(QueueError::rejected_transition(
                Some(record.status.as_str()),
                status.as_str(),
            ));
        }
        f(record);
        self.history.lock().unwrap().push(status);
        Ok(())
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn create(&self, job_id: &JobId, record: &StatusRecord) -> QueueResult<()> {
        self.records
            .lock()
            .unwrap()
            .insert(job_id.to_string(), record.clone());
        self.history.lock().unwrap().push(record.status);
        Ok(())
    }

    async fn set_status(&self, job_id: &JobId, status: JobStatus) -> QueueResult<()> {
        self.update(job_id, status, |r| r.set_status(status))
    }

    async fn complete(
        &self,
        job_id: &JobId,
        master_url: &str,
        urls: &[RungUrl],
    ) -> QueueResult<()> {
        self.update(job_id, JobStatus::Completed, |r| {
            r.complete(master_url, urls.to_vec())
        })
    }

    async fn fail(&self, job_id: &JobId, error: &str) -> QueueResult<()> {
        self.update(job_id, JobStatus::Error, |r| r.fail(error))
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<Option<StatusRecord>> {
        Ok(self.record(job_id))
    }
}

/// A staged job inside a throwaway directory tree.
pub struct Harness {
    pub root: TempDir,
    pub job: TranscodeJob,
    pub engine: Arc<FakeEngine>,
    pub store: Arc<MemoryStore>,
    pub status: Arc<MemoryStatusStore>,
    pub ctx: PipelineContext,
}

impl Harness {
    pub async fn new(engine: FakeEngine, store: MemoryStore) -> Self {
        let root = tempfile::tempdir().unwrap();
        let job_id = JobId::new();

        let input_dir = root.path().join("uploads").join(job_id.as_str());
        let output_dir = root.path().join("outputs").join(job_id.as_str());
        tokio::fs::create_dir_all(&input_dir).await.unwrap();
        tokio::fs::create_dir_all(&output_dir).await.unwrap();

        let input_path = input_dir.join("source.mp4");
        tokio::fs::write(&input_path, b"not really a video").await.unwrap();

        let job = TranscodeJob::new(input_path, input_dir, output_dir, "source.mp4")
            .with_job_id(job_id);

        let config = WorkerConfig {
            work_dir: root.path().join("work"),
            max_upload_parallel: 3,
            ..Default::default()
        };
        tokio::fs::create_dir_all(config.job_scratch_dir(job.job_id.as_str()))
            .await
            .unwrap();

        let engine = Arc::new(engine);
        let store = Arc::new(store);
        let status = Arc::new(MemoryStatusStore::default());
        status.watch_dir(&job.output_dir);
        status
            .create(&job.job_id, &StatusRecord::queued(job.created_at))
            .await
            .unwrap();

        let ctx = PipelineContext::new(
            config,
            Arc::clone(&engine) as Arc<dyn MediaEngine>,
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            Arc::clone(&status) as Arc<dyn StatusStore>,
        );

        Self {
            root,
            job,
            engine,
            store,
            status,
            ctx,
        }
    }

    pub fn record(&self) -> StatusRecord {
        self.status.record(&self.job.job_id).unwrap()
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.ctx.config.job_scratch_dir(self.job.job_id.as_str())
    }

    pub fn working_dirs_removed(&self) -> bool {
        !self.job.input_dir.exists() && !self.job.output_dir.exists() && !self.scratch_dir().exists()
    }
}
