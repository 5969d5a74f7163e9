use anyhow::Result;
use extract::{
    CompletionCapability, ExtractionInput, ExtractionStage, KnownEntity, NodeType, ResolutionOutput, ResolutionStage,
    ValidationContext, ValidationStage,
};
use index::{ChunkMutation, ChunkOrigin, GraphMutator, GraphStore, Node, NodeFilter, Page, Paper, ProcessingStatus, ResolutionCache};
use ingest::{Chunk, Chunker};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::jobs::JobHandle;

/// Existing edges at or above this confidence are shown to the validator.
const CONTEXT_EDGE_CONFIDENCE: f64 = 0.7;

/// Aggregate outcome of one paper run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    pub paper_id: String,
    pub chunks_total: usize,
    pub chunks_processed: usize,
    pub chunks_failed: usize,
    pub entities_extracted: usize,
    pub entities_created: usize,
    pub entities_matched: usize,
    pub relationships_extracted: usize,
    pub relationships_accepted: usize,
    pub relationships_created: usize,
    pub relationships_rejected: usize,
    pub relationships_unresolved: usize,
    pub confidence_adjustments: usize,
    pub duration_ms: u64,
    /// Set by reprocessing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleared: Option<ClearedGraph>,
}

/// What reprocessing removed before the rerun.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearedGraph {
    pub sources: usize,
    pub edges: usize,
    pub nodes: usize,
}

#[derive(Debug, Default)]
struct ChunkReport {
    entities_extracted: usize,
    relationships_extracted: usize,
    accepted: usize,
    rejected: usize,
    adjustments: usize,
    mutation: ChunkMutation,
}

impl ProcessingStats {
    fn absorb(&mut self, report: &ChunkReport) {
        self.entities_extracted += report.entities_extracted;
        self.relationships_extracted += report.relationships_extracted;
        self.relationships_accepted += report.accepted;
        self.relationships_rejected += report.rejected;
        self.confidence_adjustments += report.adjustments;
        self.entities_created += report.mutation.nodes_created;
        self.entities_matched += report.mutation.entities_matched;
        self.relationships_created += report.mutation.edges_created;
        self.relationships_unresolved += report.mutation.unresolved;
    }
}

/// Runs papers through chunking, extraction, resolution, validation and
/// graph mutation. Chunks of one paper are handled strictly in order.
pub struct PaperProcessor {
    store: Arc<dyn GraphStore>,
    chunker: Chunker,
    extraction: ExtractionStage,
    resolution: ResolutionStage,
    validation: ValidationStage,
    mutator: GraphMutator,
    config: PipelineConfig,
}

impl PaperProcessor {
    pub fn new(store: Arc<dyn GraphStore>, llm: Arc<dyn CompletionCapability>, config: PipelineConfig) -> Self {
        let options = config.stage_options();
        Self {
            chunker: Chunker::new(config.chunker()),
            extraction: ExtractionStage::new(llm.clone(), options),
            resolution: ResolutionStage::new(llm.clone(), options),
            validation: ValidationStage::new(llm, options, config.confidence_floor),
            mutator: GraphMutator::new(store.clone(), config.max_evidence_chars),
            store,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub async fn process_paper(&self, paper_id: &str) -> Result<ProcessingStats, PipelineError> {
        self.process(paper_id, None).await
    }

    /// Like [`Self::process_paper`], mirroring progress onto `job`.
    pub async fn process_tracked(&self, paper_id: &str, job: &JobHandle) -> Result<ProcessingStats, PipelineError> {
        self.process(paper_id, Some(job)).await
    }

    /// Remove what earlier runs derived from this paper, then run it again.
    ///
    /// Deletion order is sources (with any edge they alone supported), edges
    /// touching owned nodes, owned nodes.
    /// The paper's own `paper` node survives.
    pub async fn reprocess_paper(&self, paper_id: &str) -> Result<ProcessingStats, PipelineError> {
        let paper = self.load(paper_id).await?;
        info!(paper_id, title = %paper.title, "Reprocessing paper");

        let cleared = self.clear_paper(paper_id).await?;
        let mut stats = self.process(paper_id, None).await?;
        stats.cleared = Some(cleared);
        Ok(stats)
    }

    async fn clear_paper(&self, paper_id: &str) -> Result<ClearedGraph> {
        let provenance = self.store.delete_sources_for_paper(paper_id).await?;
        let sources = provenance.sources;

        let owned = self.store.nodes_owned_by(paper_id).await?;
        let owned_ids: Vec<String> = owned.iter().map(|n| n.id.clone()).collect();
        let edges = provenance.orphaned_edges + self.store.delete_edges_touching(&owned_ids).await?;

        let doomed: Vec<String> = owned
            .iter()
            .filter(|n| n.node_type != NodeType::Paper)
            .map(|n| n.id.clone())
            .collect();
        let nodes = self.store.delete_nodes(&doomed).await?;

        self.store.reset_paper(paper_id).await?;
        info!(paper_id, sources, edges, nodes, "Cleared previous extraction");
        Ok(ClearedGraph { sources, edges, nodes })
    }

    async fn load(&self, paper_id: &str) -> Result<Paper, PipelineError> {
        let paper = self
            .store
            .get_paper(paper_id)
            .await?
            .ok_or_else(|| PipelineError::PaperNotFound(paper_id.to_string()))?;
        if !paper.has_text() {
            return Err(PipelineError::MissingText(paper_id.to_string()));
        }
        Ok(paper)
    }

    async fn process(&self, paper_id: &str, job: Option<&JobHandle>) -> Result<ProcessingStats, PipelineError> {
        let started = Instant::now();
        let paper = self.load(paper_id).await?;
        info!(paper_id, title = %paper.title, "Processing paper");

        match self.run(&paper, job).await {
            Ok(mut stats) => {
                self.store.mark_paper_processed(paper_id).await?;
                stats.duration_ms = started.elapsed().as_millis() as u64;
                info!(
                    paper_id,
                    chunks = stats.chunks_processed,
                    failed = stats.chunks_failed,
                    entities = stats.entities_created,
                    relationships = stats.relationships_created,
                    duration_ms = stats.duration_ms,
                    "Finished processing paper"
                );
                Ok(stats)
            }
            Err(err) => {
                let message = format!("{err:#}");
                error!(paper_id, error = %message, "Paper processing failed");

                let progress = match self.store.get_paper(paper_id).await {
                    Ok(Some(p)) => p.progress,
                    _ => 0,
                };
                if let Err(e) = self
                    .store
                    .update_paper_status(paper_id, ProcessingStatus::Failed, progress, Some(&message))
                    .await
                {
                    warn!(paper_id, error = %e, "Could not record failure status");
                }
                Err(PipelineError::Store(err))
            }
        }
    }

    async fn run(&self, paper: &Paper, job: Option<&JobHandle>) -> Result<ProcessingStats> {
        self.report(&paper.id, ProcessingStatus::Chunking, 5, job).await?;
        let text = paper.raw_text.as_deref().unwrap_or_default();
        let chunks = self.chunker.chunk_text(&paper.id, text);
        info!(paper_id = %paper.id, chunks = chunks.len(), "Split paper into chunks");

        let mut known = self.sample_nodes(self.config.resolution_sample).await?;
        let context = self.validation_context(paper, &known).await?;

        let mut stats = ProcessingStats {
            paper_id: paper.id.clone(),
            chunks_total: chunks.len(),
            ..ProcessingStats::default()
        };
        let mut cache = ResolutionCache::new();
        let delay = self.config.chunk_delay();

        for chunk in &chunks {
            if chunk.index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let progress = chunk_progress(chunk.index, chunks.len());
            match self
                .process_chunk(paper, chunk, progress, &mut cache, &mut known, &context, job)
                .await
            {
                Ok(report) => stats.absorb(&report),
                Err(err) => {
                    stats.chunks_failed += 1;
                    warn!(
                        paper_id = %paper.id,
                        chunk = chunk.index,
                        error = %format!("{err:#}"),
                        "Chunk failed, continuing with next"
                    );
                }
            }
            stats.chunks_processed += 1;
        }

        Ok(stats)
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_chunk(
        &self,
        paper: &Paper,
        chunk: &Chunk,
        progress: u8,
        cache: &mut ResolutionCache,
        known: &mut Vec<KnownEntity>,
        context: &ValidationContext,
        job: Option<&JobHandle>,
    ) -> Result<ChunkReport> {
        debug!(
            paper_id = %paper.id,
            chunk = chunk.index,
            section = chunk.section.as_str(),
            chars = chunk.char_len(),
            "Processing chunk"
        );

        self.report(&paper.id, ProcessingStatus::ExtractingEntities, progress, job).await?;
        let extracted = self
            .extraction
            .extract(ExtractionInput {
                paper_id: &paper.id,
                chunk_index: chunk.index,
                text: &chunk.text,
                section: chunk.section,
            })
            .await;
        if extracted.is_empty() {
            return Ok(ChunkReport::default());
        }

        self.report(&paper.id, ProcessingStatus::ResolvingEntities, progress, job).await?;
        let resolution = self.resolution.resolve(&extracted, known).await;

        self.report(&paper.id, ProcessingStatus::Validating, progress, job).await?;
        let validation = self.validation.validate(&resolution, context).await;

        let origin = ChunkOrigin {
            paper_id: &paper.id,
            chunk_index: chunk.index,
            section: chunk.section,
        };
        let mutation = self
            .mutator
            .apply_chunk(cache, origin, &resolution, &validation)
            .await?;
        learn(known, &resolution, cache);

        Ok(ChunkReport {
            entities_extracted: extracted.entities.len(),
            relationships_extracted: extracted.relationships.len(),
            accepted: validation.accepted.len(),
            rejected: validation.rejected.len(),
            adjustments: validation.confidence_adjustments.len(),
            mutation,
        })
    }

    async fn report(
        &self,
        paper_id: &str,
        status: ProcessingStatus,
        progress: u8,
        job: Option<&JobHandle>,
    ) -> Result<()> {
        self.store.update_paper_status(paper_id, status, progress, None).await?;
        if let Some(job) = job {
            job.update(status, progress);
        }
        Ok(())
    }

    /// Up to `limit` existing nodes, oldest first.
    async fn sample_nodes(&self, limit: usize) -> Result<Vec<KnownEntity>> {
        let filter = NodeFilter::default();
        let mut sample = Vec::new();
        while sample.len() < limit {
            let page = Page::new((limit - sample.len()).min(Page::MAX_LIMIT), sample.len());
            let batch = self.store.list_nodes(&filter, page).await?;
            let exhausted = batch.len() < page.limit;
            sample.extend(batch.iter().map(Node::summary));
            if exhausted {
                break;
            }
        }
        Ok(sample)
    }

    async fn validation_context(&self, paper: &Paper, known: &[KnownEntity]) -> Result<ValidationContext> {
        let nodes: Vec<KnownEntity> = known.iter().take(self.config.validation_sample).cloned().collect();
        let ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
        let edges = if ids.is_empty() {
            Vec::new()
        } else {
            self.store
                .edges_touching(&ids)
                .await?
                .iter()
                .filter(|e| e.confidence >= CONTEXT_EDGE_CONFIDENCE)
                .take(self.config.validation_sample)
                .map(|e| e.summary())
                .collect()
        };

        Ok(ValidationContext {
            publication_date: paper.publication_date.map(|d| d.to_string()),
            nodes,
            edges,
        })
    }
}

/// Progress for the chunk at `index`, spread over 10..95.
fn chunk_progress(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 95;
    }
    (10 + 85 * index / total).min(95) as u8
}

/// Make entities written by this chunk visible to later resolution prompts.
fn learn(known: &mut Vec<KnownEntity>, resolution: &ResolutionOutput, cache: &ResolutionCache) {
    for entity in &resolution.resolved_entities {
        let Some(id) = cache.get(&entity.canonical_name) else {
            continue;
        };
        if known.iter().any(|k| k.id == id) {
            continue;
        }
        known.push(KnownEntity {
            id: id.to_string(),
            name: entity.canonical_name.clone(),
            entity_type: entity.entity_type,
        });
    }
}
