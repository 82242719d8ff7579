// Background Job Scheduler
//
// Periodically runs the classification pass, batch assignment, and the
// learning loop. Jobs run under a timeout and report aggregate counts;
// one job's failure never stops the loop or the other jobs.

use crate::batch::BatchAssigner;
use crate::config::JobConfig;
use crate::learning::LearningLoop;
use crate::pipeline::ClassificationPipeline;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::{sleep, timeout};

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("Job execution failed: {0}")]
    ExecutionError(String),

    #[error("Job is disabled")]
    Disabled,
}

/// Report generated after job execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    /// Number of items processed
    pub items_processed: usize,

    /// Number of changes made (classifications written, items assigned,
    /// suggestions packaged)
    pub changes_made: usize,

    /// Duration of job execution
    #[serde(with = "serde_duration_millis")]
    pub duration: Duration,

    /// Number of errors encountered
    pub errors: usize,

    /// Optional error message if the job failed outright
    pub error_message: Option<String>,
}

// Custom serde module for Duration (serialize/deserialize as milliseconds)
mod serde_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Trait for scheduled triage jobs
#[async_trait]
pub trait TriageJob: Send + Sync {
    /// Job name (for logging and history)
    fn name(&self) -> &str;

    /// Run the job with the given configuration
    async fn run(&self, config: &JobConfig) -> Result<JobReport, JobError>;
}

/// Job execution record for history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub report: Option<JobReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Running,
    Success,
    Failed,
    Timeout,
}

const HISTORY_LIMIT: usize = 100;

/// Background job scheduler
pub struct BackgroundScheduler {
    jobs: Vec<(Arc<dyn TriageJob>, JobConfig)>,
    running: Arc<AtomicBool>,
    last_run: Mutex<HashMap<String, Instant>>,
    history: Mutex<Vec<JobRun>>,
}

impl BackgroundScheduler {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
            last_run: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Register a job with its schedule
    pub fn register_job(&mut self, job: Arc<dyn TriageJob>, config: JobConfig) {
        self.jobs.push((job, config));
    }

    /// Run until stopped, executing due jobs in registration order
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Scheduler already running");
            return;
        }

        tracing::info!("Starting background triage scheduler");

        loop {
            if !self.running.load(Ordering::SeqCst) {
                tracing::info!("Stopping background triage scheduler");
                break;
            }

            for (job, config) in &self.jobs {
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }
                if !self.is_due(job.name(), config) {
                    continue;
                }

                tracing::info!("Running triage job: {}", job.name());
                self.mark_run(job.name());
                if let Err(e) = self.run_job(job.as_ref(), config).await {
                    tracing::error!("Job {} failed: {}", job.name(), e);
                }
            }

            sleep(Duration::from_secs(30)).await;
        }
    }

    /// Stop the scheduler after the current tick
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_due(&self, name: &str, config: &JobConfig) -> bool {
        if !config.enabled {
            return false;
        }
        let last_run = self.last_run.lock().unwrap();
        match last_run.get(name) {
            Some(instant) => instant.elapsed() >= config.interval,
            None => true,
        }
    }

    fn mark_run(&self, name: &str) {
        self.last_run
            .lock()
            .unwrap()
            .insert(name.to_string(), Instant::now());
    }

    /// Run a specific job with its timeout, recording the outcome
    pub async fn run_job(
        &self,
        job: &dyn TriageJob,
        config: &JobConfig,
    ) -> Result<JobReport, JobError> {
        if !config.enabled {
            return Err(JobError::Disabled);
        }

        let job_name = job.name().to_string();
        let started_at = Utc::now();

        let result = timeout(config.max_duration, job.run(config)).await;

        let (status, report) = match result {
            Ok(Ok(report)) => {
                tracing::info!(
                    "Job {} completed: {} changes in {:?}",
                    job_name,
                    report.changes_made,
                    report.duration
                );
                (JobStatus::Success, report)
            }
            Ok(Err(e)) => {
                tracing::error!("Job {} failed: {}", job_name, e);
                (
                    JobStatus::Failed,
                    JobReport {
                        items_processed: 0,
                        changes_made: 0,
                        duration: Duration::default(),
                        errors: 1,
                        error_message: Some(e.to_string()),
                    },
                )
            }
            Err(_) => {
                tracing::error!("Job {} timed out after {:?}", job_name, config.max_duration);
                (
                    JobStatus::Timeout,
                    JobReport {
                        items_processed: 0,
                        changes_made: 0,
                        duration: config.max_duration,
                        errors: 1,
                        error_message: Some(format!("Timeout after {:?}", config.max_duration)),
                    },
                )
            }
        };

        self.record_run(JobRun {
            job_name,
            started_at,
            completed_at: Some(Utc::now()),
            status,
            report: Some(report.clone()),
        });

        Ok(report)
    }

    fn record_run(&self, run: JobRun) {
        let mut history = self.history.lock().unwrap();
        history.push(run);
        let len = history.len();
        if len > HISTORY_LIMIT {
            history.drain(0..len - HISTORY_LIMIT);
        }
    }

    /// Recent job runs, newest last
    pub fn job_history(&self, job_name: Option<&str>) -> Vec<JobRun> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|run| job_name.map(|n| run.job_name == n).unwrap_or(true))
            .cloned()
            .collect()
    }
}

impl Default for BackgroundScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Classification pass plus rule-only reclassification
pub struct ClassificationJob {
    pipeline: Arc<ClassificationPipeline>,
}

impl ClassificationJob {
    pub fn new(pipeline: Arc<ClassificationPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl TriageJob for ClassificationJob {
    fn name(&self) -> &str {
        "classification"
    }

    async fn run(&self, config: &JobConfig) -> Result<JobReport, JobError> {
        let start = Instant::now();

        let pass = self
            .pipeline
            .run_batch_pass(config.batch_size)
            .await
            .map_err(|e| JobError::ExecutionError(e.to_string()))?;
        let reclassify = self
            .pipeline
            .reclassify_pass(config.batch_size)
            .await
            .map_err(|e| JobError::ExecutionError(e.to_string()))?;

        Ok(JobReport {
            items_processed: pass.classified + pass.errors + reclassify.reexamined,
            changes_made: pass.classified + reclassify.rematched,
            duration: start.elapsed(),
            errors: pass.errors + reclassify.errors,
            error_message: None,
        })
    }
}

/// Batch card assignment pass
pub struct AssignmentJob {
    assigner: Arc<BatchAssigner>,
}

impl AssignmentJob {
    pub fn new(assigner: Arc<BatchAssigner>) -> Self {
        Self { assigner }
    }
}

#[async_trait]
impl TriageJob for AssignmentJob {
    fn name(&self) -> &str {
        "assignment"
    }

    async fn run(&self, _config: &JobConfig) -> Result<JobReport, JobError> {
        let start = Instant::now();
        let report = self
            .assigner
            .assign()
            .await
            .map_err(|e| JobError::ExecutionError(e.to_string()))?;

        Ok(JobReport {
            items_processed: report.assigned + report.errors,
            changes_made: report.assigned,
            duration: start.elapsed(),
            errors: report.errors,
            error_message: None,
        })
    }
}

/// Learning loop run
pub struct LearningJob {
    learning: Arc<LearningLoop>,
}

impl LearningJob {
    pub fn new(learning: Arc<LearningLoop>) -> Self {
        Self { learning }
    }
}

#[async_trait]
impl TriageJob for LearningJob {
    fn name(&self) -> &str {
        "learning"
    }

    async fn run(&self, _config: &JobConfig) -> Result<JobReport, JobError> {
        let start = Instant::now();
        let report = self
            .learning
            .run()
            .await
            .map_err(|e| JobError::ExecutionError(e.to_string()))?;

        Ok(JobReport {
            items_processed: report.suggestion_count,
            changes_made: if report.proposal_card_id.is_some() { 1 } else { 0 },
            duration: start.elapsed(),
            errors: 0,
            error_message: None,
        })
    }
}
