use anyhow::{Context, Result};
use ingest::Section;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::llm::CompletionCapability;
use crate::prompt::{EXTRACTION_SYSTEM_PROMPT, build_extraction_prompt};
use crate::schema::ExtractionOutput;

/// Sampling settings shared by the three reasoning stages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageOptions {
    pub temperature: f32,
    /// Attempt budget handed to the completion capability.
    pub retries: usize,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            retries: 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExtractionInput<'a> {
    pub paper_id: &'a str,
    pub chunk_index: usize,
    pub text: &'a str,
    pub section: Section,
}

/// Pulls entity mentions and relationship triples out of one chunk.
#[derive(Clone)]
pub struct ExtractionStage {
    llm: Arc<dyn CompletionCapability>,
    options: StageOptions,
}

impl ExtractionStage {
    pub fn new(llm: Arc<dyn CompletionCapability>, options: StageOptions) -> Self {
        Self { llm, options }
    }

    pub async fn try_extract(&self, input: ExtractionInput<'_>) -> Result<ExtractionOutput> {
        let user = build_extraction_prompt(input.paper_id, input.chunk_index, input.text, input.section);
        let value = self
            .llm
            .complete(EXTRACTION_SYSTEM_PROMPT, &user, self.options.temperature, self.options.retries)
            .await
            .context("Extraction completion failed")?;

        let mut output = ExtractionOutput::decode(&value)?;
        output.entities.retain(|e| !e.mention.trim().is_empty());
        output
            .relationships
            .retain(|r| !r.subject.trim().is_empty() && !r.object.trim().is_empty());

        debug!(
            chunk = input.chunk_index,
            entities = output.entities.len(),
            relationships = output.relationships.len(),
            "Extracted chunk"
        );
        Ok(output)
    }

    /// Never fails: a chunk the backend cannot handle yields nothing.
    pub async fn extract(&self, input: ExtractionInput<'_>) -> ExtractionOutput {
        match self.try_extract(input).await {
            Ok(output) => output,
            Err(e) => {
                warn!(
                    paper_id = input.paper_id,
                    chunk = input.chunk_index,
                    error = %format!("{e:#}"),
                    "Extraction failed, continuing with empty result"
                );
                ExtractionOutput::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::PromptKind;
    use crate::schema::MentionType;
    use crate::scripted::ScriptedCompletion;
    use serde_json::json;

    const TEXT: &str =
        "Our method, FastSplat, extends 3D Gaussian Splatting and is evaluated on Mip-NeRF360.";

    fn input() -> ExtractionInput<'static> {
        ExtractionInput {
            paper_id: "paper-1",
            chunk_index: 0,
            text: TEXT,
            section: Section::Abstract,
        }
    }

    #[tokio::test]
    async fn extracts_fastsplat_chunk() {
        let scripted = Arc::new(ScriptedCompletion::new());
        scripted.push(
            PromptKind::Extraction,
            json!({
                "entities": [
                    {"mention": "FastSplat", "type": "method", "confidence": 0.95},
                    {"mention": "3D Gaussian Splatting", "type": "method", "confidence": 0.95},
                    {"mention": "Mip-NeRF360", "type": "dataset", "confidence": 0.9}
                ],
                "relationships": [
                    {"subject": "FastSplat", "predicate": "extends", "object": "3D Gaussian Splatting",
                     "evidenceText": TEXT, "confidence": 0.95},
                    {"subject": "FastSplat", "predicate": "evaluates_on", "object": "Mip-NeRF360",
                     "evidenceText": TEXT, "confidence": 0.9}
                ]
            }),
        );

        let stage = ExtractionStage::new(scripted.clone(), StageOptions::default());
        let out = stage.extract(input()).await;

        assert_eq!(out.entities.len(), 3);
        assert_eq!(out.entities[2].entity_type, MentionType::Dataset);
        assert_eq!(out.relationships.len(), 2);
        assert_eq!(out.relationships[1].predicate, "evaluates_on");

        let calls = scripted.calls();
        assert!(calls[0].user.contains(TEXT));
        assert!(calls[0].user.contains("abstract section"));
    }

    #[tokio::test]
    async fn backend_failure_degrades_to_empty() {
        let scripted = Arc::new(ScriptedCompletion::new());
        scripted.push_failure(PromptKind::Extraction, "connection refused");

        let stage = ExtractionStage::new(scripted, StageOptions::default());
        assert!(stage.extract(input()).await.is_empty());
    }

    #[tokio::test]
    async fn wrong_shape_is_an_error_but_extract_degrades() {
        let scripted = Arc::new(ScriptedCompletion::new());
        scripted
            .push(PromptKind::Extraction, json!({"answer": "FastSplat"}))
            .push(PromptKind::Extraction, json!({"answer": "FastSplat"}));

        let stage = ExtractionStage::new(scripted, StageOptions::default());
        assert!(stage.try_extract(input()).await.is_err());
        assert!(stage.extract(input()).await.is_empty());
    }

    #[tokio::test]
    async fn blank_items_are_dropped() {
        let scripted = Arc::new(ScriptedCompletion::new());
        scripted.push(
            PromptKind::Extraction,
            json!({
                "entities": [{"mention": "  ", "type": "concept"}],
                "relationships": [{"subject": "", "predicate": "uses", "object": "SfM"}]
            }),
        );

        let stage = ExtractionStage::new(scripted, StageOptions::default());
        assert!(stage.extract(input()).await.is_empty());
    }
}
