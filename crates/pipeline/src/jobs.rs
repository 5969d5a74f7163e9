use chrono::{DateTime, Utc};
use dashmap::DashMap;
use index::ProcessingStatus;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// One ingestion request, tracked with the same status shape as a paper.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub arxiv_id: Option<String>,
    pub paper_id: Option<String>,
    pub status: ProcessingStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Finished jobs kept for polling before the oldest are dropped.
pub const DEFAULT_RETAINED_JOBS: usize = 1000;

/// In-process job registry. Cheap to clone; clones share state.
///
/// Running jobs are always kept. Once more than `retained` jobs have
/// finished, the ones that finished earliest are forgotten.
#[derive(Debug, Clone)]
pub struct JobTracker {
    jobs: Arc<DashMap<String, Job>>,
    retained: usize,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_JOBS)
    }
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retained: usize) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            retained,
        }
    }

    pub fn create(&self, arxiv_id: Option<&str>) -> JobHandle {
        self.prune();
        let now = Utc::now();
        let job = Job {
            id: format!("job-{}", Uuid::new_v4()),
            arxiv_id: arxiv_id.map(str::to_string),
            paper_id: None,
            status: ProcessingStatus::Pending,
            progress: 0,
            error: None,
            created_at: now,
            updated_at: now,
        };
        let id = job.id.clone();
        self.jobs.insert(id.clone(), job);
        debug!(job_id = %id, "Created job");

        JobHandle {
            id,
            tracker: self.clone(),
        }
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.get(id).map(|j| j.value().clone())
    }

    /// Newest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.iter().map(|j| j.value().clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn prune(&self) {
        let mut finished: Vec<(DateTime<Utc>, String)> = self
            .jobs
            .iter()
            .filter(|j| j.status.is_terminal())
            .map(|j| (j.updated_at, j.id.clone()))
            .collect();
        if finished.len() <= self.retained {
            return;
        }

        finished.sort();
        let excess = finished.len() - self.retained;
        for (_, id) in finished.into_iter().take(excess) {
            self.jobs.remove(&id);
        }
        debug!(dropped = excess, retained = self.retained, "Pruned finished jobs");
    }

    /// Terminal jobs are frozen.
    fn modify(&self, id: &str, f: impl FnOnce(&mut Job)) {
        match self.jobs.get_mut(id) {
            Some(mut job) if !job.status.is_terminal() => {
                f(job.value_mut());
                job.updated_at = Utc::now();
            }
            Some(_) => debug!(job_id = id, "Ignoring update to finished job"),
            None => warn!(job_id = id, "Update for unknown job"),
        }
    }
}

/// Write access to one job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: String,
    tracker: JobTracker,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self) -> Option<Job> {
        self.tracker.get(&self.id)
    }

    pub fn attach_paper(&self, paper_id: &str) {
        self.tracker.modify(&self.id, |job| job.paper_id = Some(paper_id.to_string()));
    }

    pub fn update(&self, status: ProcessingStatus, progress: u8) {
        self.tracker.modify(&self.id, |job| {
            job.status = status;
            job.progress = progress.min(100);
        });
    }

    pub fn complete(&self) {
        self.update(ProcessingStatus::Completed, 100);
    }

    pub fn fail(&self, error: &str) {
        self.tracker.modify(&self.id, |job| {
            job.status = ProcessingStatus::Failed;
            job.error = Some(error.to_string());
        });
    }
}
