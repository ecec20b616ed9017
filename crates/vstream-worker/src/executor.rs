//! Job executor.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vstream_queue::{JobQueue, QueueJob};

use crate::config::WorkerConfig;
use crate::context::PipelineContext;
use crate::error::{WorkerError, WorkerResult};
use crate::observer::QueueObserver;
use crate::pipeline::run_job;

/// Most jobs pulled from the stream in one read.
const MAX_BATCH: usize = 5;

/// Message ids of the jobs this executor is running.
#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<HashSet<String>>>);

impl InFlight {
    /// Returns `false` when the id was already running.
    fn insert(&self, message_id: &str) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(message_id.to_string())
    }

    fn remove(&self, message_id: &str) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(message_id);
    }

    fn snapshot(&self) -> HashSet<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Removes a message id from [`InFlight`] when its job task ends.
struct InFlightGuard {
    in_flight: InFlight,
    message_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.message_id);
    }
}

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    ctx: Arc<PipelineContext>,
    observer: QueueObserver,
    job_semaphore: Arc<Semaphore>,
    in_flight: InFlight,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(queue: JobQueue, ctx: PipelineContext) -> Self {
        let config = ctx.config.clone();
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let observer = QueueObserver::new(Arc::clone(&ctx.status));

        Self {
            config,
            queue: Arc::new(queue),
            ctx: Arc::new(ctx),
            observer,
            job_semaphore,
            in_flight: InFlight::default(),
            shutdown,
            consumer_name: format!("worker-{}", Uuid::new_v4()),
        }
    }

    /// Consume jobs until [`JobExecutor::shutdown`] is called.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name, self.config.max_concurrent_jobs
        );

        self.queue.init().await?;

        let claim_task = self.spawn_claim_task();
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "In-flight jobs still running after {:?}; they will be reclaimed",
                self.config.shutdown_timeout
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Periodically refresh the leases of running jobs and take over jobs
    /// whose lease expired on a dead consumer.
    fn spawn_claim_task(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let ctx = Arc::clone(&self.ctx);
        let observer = self.observer.clone();
        let semaphore = Arc::clone(&self.job_semaphore);
        let in_flight = self.in_flight.clone();
        let consumer_name = self.consumer_name.clone();
        let claim_interval = self.config.claim_interval;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(claim_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let running = in_flight.snapshot();
                        let owned: Vec<String> = running.iter().cloned().collect();
                        if let Err(e) = queue.refresh_leases(&consumer_name, &owned).await {
                            warn!("Failed to refresh job leases: {}", e);
                        }

                        let free = semaphore.available_permits();
                        if free == 0 {
                            continue;
                        }
                        match queue.claim_pending(&consumer_name, free.min(MAX_BATCH), &running).await {
                            Ok(jobs) if !jobs.is_empty() => {
                                info!("Claimed {} pending jobs", jobs.len());
                                for (message_id, job) in jobs {
                                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                                        break;
                                    };
                                    Self::spawn_job(
                                        permit,
                                        Arc::clone(&ctx),
                                        Arc::clone(&queue),
                                        observer.clone(),
                                        in_flight.clone(),
                                        message_id,
                                        job,
                                    );
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Failed to claim pending jobs: {}", e),
                        }
                    }
                }
            }
        })
    }

    /// Pull as many jobs as there are free slots and start them.
    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(&self.consumer_name, 1000, available.min(MAX_BATCH))
            .await?;

        if jobs.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} jobs from queue", jobs.len());

        for (message_id, job) in jobs {
            let permit = Arc::clone(&self.job_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::config_error("job semaphore closed"))?;

            Self::spawn_job(
                permit,
                Arc::clone(&self.ctx),
                Arc::clone(&self.queue),
                self.observer.clone(),
                self.in_flight.clone(),
                message_id,
                job,
            );
        }

        Ok(())
    }

    fn spawn_job(
        permit: OwnedSemaphorePermit,
        ctx: Arc<PipelineContext>,
        queue: Arc<JobQueue>,
        observer: QueueObserver,
        in_flight: InFlight,
        message_id: String,
        job: QueueJob,
    ) {
        if !in_flight.insert(&message_id) {
            debug!(message_id = %message_id, "Job already running here, not starting it twice");
            return;
        }
        let guard = InFlightGuard {
            in_flight,
            message_id: message_id.clone(),
        };

        tokio::spawn(async move {
            let _permit = permit;
            let _guard = guard;
            Self::execute_job(ctx, queue, observer, message_id, job).await;
        });
    }

    /// Run one job and settle its queue message.
    ///
    /// A job that ran to an outcome is acked either way; the runner already
    /// recorded it. Only a crashed job counts against its attempts.
    async fn execute_job(
        ctx: Arc<PipelineContext>,
        queue: Arc<JobQueue>,
        observer: QueueObserver,
        message_id: String,
        job: QueueJob,
    ) {
        let job_id = job.job_id().clone();
        info!(job_id = %job_id, message_id = %message_id, "Executing job");

        let task_job = job.clone();
        let result = tokio::spawn(async move {
            match &task_job {
                QueueJob::Transcode(j) => run_job(&ctx, j).await,
            }
        })
        .await;

        match result {
            Ok(outcome) => {
                observer.on_outcome(&job_id, &outcome).await;
                if let Err(e) = queue.ack(&message_id).await {
                    error!(job_id = %job_id, "Failed to ack job: {}", e);
                }
                if let Err(e) = queue.clear_dedup(&job).await {
                    warn!(job_id = %job_id, "Failed to clear dedup key: {}", e);
                }
            }
            Err(join_err) => {
                let message = format!("Job crashed: {}", join_err);
                error!(job_id = %job_id, "{}", message);

                let attempts = match queue.increment_attempts(&message_id).await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(job_id = %job_id, "Failed to count attempt: {}", e);
                        u32::MAX
                    }
                };
                let max_attempts = queue.max_attempts();

                if attempts >= max_attempts {
                    warn!(
                        job_id = %job_id,
                        "Job exhausted {} attempts, moving to DLQ", max_attempts
                    );
                    if let Err(e) = queue.dlq(&message_id, &job, &message).await {
                        error!(job_id = %job_id, "Failed to move job to DLQ: {}", e);
                    }
                    observer.on_failed(&job_id, &message).await;
                } else {
                    info!(
                        job_id = %job_id,
                        "Job will be reclaimed (attempt {}/{})", attempts, max_attempts
                    );
                }
            }
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        while self.job_semaphore.available_permits() < self.config.max_concurrent_jobs {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
