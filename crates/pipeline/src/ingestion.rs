use anyhow::{Context, Result, bail};
use extract::NodeType;
use index::{GraphStore, NewNode, NewPaper, Paper, ProcessingStatus};
use ingest::{TextFetcher, arxiv_pdf_url};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::jobs::{JobHandle, JobTracker};
use crate::processor::{PaperProcessor, ProcessingStats};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub job_id: String,
    pub paper_id: String,
    pub arxiv_id: String,
    /// The paper already existed and was reused.
    pub reused: bool,
    pub page_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ProcessingStats>,
}

/// Registers arXiv papers, pulls their text and optionally processes them.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn GraphStore>,
    fetcher: Arc<dyn TextFetcher>,
    processor: Arc<PaperProcessor>,
    jobs: JobTracker,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn GraphStore>,
        fetcher: Arc<dyn TextFetcher>,
        processor: Arc<PaperProcessor>,
        jobs: JobTracker,
    ) -> Self {
        Self {
            store,
            fetcher,
            processor,
            jobs,
        }
    }

    pub fn jobs(&self) -> &JobTracker {
        &self.jobs
    }

    /// Run one ingestion to completion, recording the outcome on `job`.
    pub async fn ingest_arxiv(&self, arxiv_id: &str, auto_process: bool, job: &JobHandle) -> Result<IngestOutcome> {
        match self.ingest(arxiv_id.trim(), auto_process, job).await {
            Ok(outcome) => {
                job.complete();
                info!(job_id = job.id(), paper_id = %outcome.paper_id, reused = outcome.reused, "Ingestion finished");
                Ok(outcome)
            }
            Err(err) => {
                let message = format!("{err:#}");
                error!(job_id = job.id(), arxiv_id, error = %message, "Ingestion failed");
                job.fail(&message);
                Err(err)
            }
        }
    }

    /// Queue one ingestion in the background; poll the returned job.
    pub fn submit_arxiv(&self, arxiv_id: &str, auto_process: bool) -> JobHandle {
        let arxiv_id = arxiv_id.trim().to_string();
        let job = self.jobs.create(Some(&arxiv_id));
        let queue = vec![(arxiv_id, job.clone())];

        let ingestor = self.clone();
        tokio::spawn(async move { ingestor.drain(queue, auto_process).await });
        job
    }

    /// Ingest each id in turn, one job per id.
    pub async fn ingest_bulk(&self, arxiv_ids: &[String], auto_process: bool) -> Vec<JobHandle> {
        let queue = self.enqueue(arxiv_ids);
        let jobs = queue.iter().map(|(_, job)| job.clone()).collect();
        self.drain(queue, auto_process).await;
        jobs
    }

    /// Background variant of [`Self::ingest_bulk`]. Papers are still handled
    /// one after another.
    pub fn submit_bulk(&self, arxiv_ids: &[String], auto_process: bool) -> Vec<JobHandle> {
        let queue = self.enqueue(arxiv_ids);
        let jobs = queue.iter().map(|(_, job)| job.clone()).collect();

        let ingestor = self.clone();
        tokio::spawn(async move { ingestor.drain(queue, auto_process).await });
        jobs
    }

    fn enqueue(&self, arxiv_ids: &[String]) -> Vec<(String, JobHandle)> {
        arxiv_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .map(|id| (id.to_string(), self.jobs.create(Some(id))))
            .collect()
    }

    async fn drain(&self, queue: Vec<(String, JobHandle)>, auto_process: bool) {
        let total = queue.len();
        for (i, (arxiv_id, job)) in queue.into_iter().enumerate() {
            debug!(arxiv_id = %arxiv_id, position = i + 1, total, "Starting queued ingestion");
            // Failures are already recorded on the job.
            let _ = self.ingest_arxiv(&arxiv_id, auto_process, &job).await;
        }
    }

    async fn ingest(&self, arxiv_id: &str, auto_process: bool, job: &JobHandle) -> Result<IngestOutcome> {
        if arxiv_id.is_empty() {
            bail!("arXiv id is required");
        }

        let (paper, reused) = match self.store.find_paper_by_arxiv_id(arxiv_id).await? {
            Some(paper) => (paper, true),
            None => (self.register(arxiv_id).await?, false),
        };
        job.attach_paper(&paper.id);

        let page_count = if paper.has_text() {
            paper.page_count
        } else {
            Some(self.fetch_text(&paper, arxiv_id, job).await?)
        };

        let stats = if paper.processed {
            // Rerunning would duplicate every edge; reprocessing is explicit.
            debug!(paper_id = %paper.id, "Paper already processed, skipping extraction");
            None
        } else if auto_process {
            Some(self.processor.process_tracked(&paper.id, job).await?)
        } else {
            self.store
                .update_paper_status(&paper.id, ProcessingStatus::Pending, 0, None)
                .await?;
            None
        };

        Ok(IngestOutcome {
            job_id: job.id().to_string(),
            paper_id: paper.id,
            arxiv_id: arxiv_id.to_string(),
            reused,
            page_count,
            stats,
        })
    }

    /// Create the paper row and its `paper` node.
    async fn register(&self, arxiv_id: &str) -> Result<Paper> {
        let paper = self
            .store
            .create_paper(NewPaper {
                title: format!("Paper from arXiv:{arxiv_id}"),
                arxiv_id: Some(arxiv_id.to_string()),
                pdf_url: Some(arxiv_pdf_url(arxiv_id)),
                ..NewPaper::default()
            })
            .await
            .context("Failed to create paper")?;

        self.store
            .create_node(
                NewNode::new(NodeType::Paper, paper.title.as_str())
                    .owned_by(paper.id.clone())
                    .with_description(format!("arXiv:{arxiv_id}")),
            )
            .await
            .context("Failed to create paper node")?;

        info!(paper_id = %paper.id, arxiv_id, "Registered paper");
        Ok(paper)
    }

    async fn fetch_text(&self, paper: &Paper, arxiv_id: &str, job: &JobHandle) -> Result<usize> {
        let url = paper.pdf_url.clone().unwrap_or_else(|| arxiv_pdf_url(arxiv_id));
        self.report(&paper.id, ProcessingStatus::DownloadingPdf, 2, job).await?;

        let extracted = match self.fetcher.fetch_and_extract(&url).await {
            Ok(extracted) => extracted,
            Err(err) => {
                let message = format!("{err:#}");
                self.store
                    .update_paper_status(&paper.id, ProcessingStatus::Failed, 0, Some(&message))
                    .await?;
                return Err(err.context(format!("Failed to fetch {url}")));
            }
        };

        self.report(&paper.id, ProcessingStatus::ExtractingText, 5, job).await?;
        self.store
            .set_paper_text(&paper.id, &extracted.text, extracted.page_count)
            .await?;
        info!(
            paper_id = %paper.id,
            pages = extracted.page_count,
            chars = extracted.text.len(),
            "Stored paper text"
        );
        Ok(extracted.page_count)
    }

    async fn report(&self, paper_id: &str, status: ProcessingStatus, progress: u8, job: &JobHandle) -> Result<()> {
        self.store.update_paper_status(paper_id, status, progress, None).await?;
        job.update(status, progress);
        Ok(())
    }
}
