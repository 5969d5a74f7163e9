use ingest::Section;
use serde::Serialize;

use crate::schema::{ExtractionOutput, KnownEntity, ResolvedRelationship, ValidationContext};

pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are an expert research paper analyzer. You extract structured information from academic paper text:
1. Entity mentions (methods, concepts, datasets, metrics, paper references)
2. Relationships between entities

ENTITY TYPES:
- method: Algorithms, techniques, approaches (e.g. "3D Gaussian Splatting", "NeRF", "SfM")
- concept: Theoretical ideas or principles (e.g. "view synthesis", "radiance fields", "anti-aliasing")
- dataset: Named datasets used for evaluation (e.g. "Mip-NeRF360", "Tanks and Temples", "DTU")
- metric: Performance measures (e.g. "PSNR", "SSIM", "LPIPS", "FPS")
- paper_reference: Citations to other papers (e.g. "Kerbl et al.", "[1]")

RELATIONSHIP TYPES (use EXACTLY these strings):
- extends: Method A extends or builds upon method B
- improves: Method A improves upon method B
- uses: Method A uses technique or component B
- introduces: Paper introduces a new method or concept
- evaluates_on: Method is evaluated on dataset
- compares_to: Method is compared against another method

CONFIDENCE SCORING:
- 0.9-1.0: Explicit statements ("We extend 3DGS by...")
- 0.7-0.9: Strongly implied ("Building on [X]...")
- 0.5-0.7: Weakly implied (related work, indirect references)
- 0.3-0.5: Speculative connections

GUIDELINES:
- Extract every entity mention you find, even if uncertain
- Keep entity names concise but complete
- spanStart and spanEnd are approximate character offsets into the text

Respond with ONLY a JSON object."#;

pub const RESOLUTION_SYSTEM_PROMPT: &str = r#"You are an entity resolution specialist for academic knowledge graphs.

Map extracted entity mentions to canonical entities:
1. Deduplication (same entity mentioned differently)
2. Alias resolution (abbreviations, variations, e.g. "3DGS" is "3D Gaussian Splatting")
3. Disambiguation (different entities with similar names)
4. New entity creation when no match exists

CONFIDENCE SCORING:
- Exact match = 1.0
- Strong fuzzy match = 0.8-0.95
- Acronym match with context = 0.7-0.9
- Weak match = 0.5-0.7
- New entity = 1.0

Relationships refer to entities by canonical NAME. New entities have no id yet.

Return JSON with this structure:
{
  "resolvedEntities": [
    {"mention": "original mention", "canonicalId": "existing id or null", "canonicalName": "standardized name",
     "type": "method|concept|dataset|metric|paper", "isNew": true, "confidence": 0.9}
  ],
  "resolvedRelationships": [
    {"sourceName": "canonical name", "targetName": "canonical name", "type": "relationship type",
     "confidence": 0.8, "evidence": "evidence text"}
  ]
}"#;

pub const VALIDATION_SYSTEM_PROMPT: &str = r#"You are a knowledge graph validation specialist. Quality-check resolved relationships before they are inserted.

VALIDATION CHECKS:
1. Temporal consistency: a paper cannot be extended by a paper published before it
2. Type compatibility: "evaluates_on" requires a dataset target; "extends" and "improves" require compatible method or concept types
3. Logical consistency: look for contradictions with existing high-confidence edges
4. Evidence strength: adjust confidence based on evidence quality

CONFIDENCE ADJUSTMENTS:
- Strong explicit evidence: +0.1 to +0.2
- Weak or indirect evidence: -0.2 to -0.3
- Contradicts existing facts: -0.5 or reject

REJECTION CRITERIA:
- Temporal impossibility
- Type mismatch
- Direct contradiction with a high-confidence existing edge
- Confidence below 0.4 after adjustments

Return JSON with this structure:
{
  "accepted": [
    {"sourceName": "name", "targetName": "name", "type": "relationship type", "confidence": 0.8, "evidence": "text"}
  ],
  "rejected": [
    {"relationship": {"sourceName": "name", "targetName": "name", "type": "relationship type"}, "reason": "explanation"}
  ],
  "confidenceAdjustments": [
    {"relationshipId": "source -> target", "originalConfidence": 0.8, "adjustedConfidence": 0.6, "reason": "explanation"}
  ]
}"#;

/// Appended to every system prompt before it is sent.
pub const STRICT_JSON_SUFFIX: &str = "\n\nCRITICAL: Your response must be ONLY valid JSON. No markdown, no explanations, no text before or after the JSON. Start your response with { and end with }.";

/// Which stage a system prompt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Extraction,
    Resolution,
    Validation,
    Other,
}

impl PromptKind {
    pub fn of(system_prompt: &str) -> Self {
        let base = system_prompt
            .strip_suffix(STRICT_JSON_SUFFIX)
            .unwrap_or(system_prompt);
        match base {
            EXTRACTION_SYSTEM_PROMPT => PromptKind::Extraction,
            RESOLUTION_SYSTEM_PROMPT => PromptKind::Resolution,
            VALIDATION_SYSTEM_PROMPT => PromptKind::Validation,
            _ => PromptKind::Other,
        }
    }
}

pub fn build_extraction_prompt(paper_id: &str, chunk_index: usize, text: &str, section: Section) -> String {
    format!(
        r#"Extract entities and relationships from chunk {chunk_index} ({section} section) of paper {paper_id}.

TEXT TO ANALYZE:
"""
{text}
"""

Respond with this exact JSON structure:
{{
  "entities": [
    {{"mention": "exact text", "type": "method", "spanStart": 0, "spanEnd": 10, "confidence": 0.9}}
  ],
  "relationships": [
    {{"subject": "entity name", "predicate": "extends", "object": "another entity",
      "evidenceText": "the sentence containing this relationship", "confidence": 0.8}}
  ]
}}

If nothing is found, return: {{"entities": [], "relationships": []}}"#
    )
}

pub fn build_resolution_prompt(extracted: &ExtractionOutput, existing: &[KnownEntity]) -> String {
    format!(
        r#"Resolve the following extracted entities against the existing knowledge graph.

Extracted entities and relationships:
{}

Existing entities in the graph:
{}

Map each mention to an existing entity (give its canonicalId, isNew = false) or a new one (canonicalId = null, isNew = true).
Then express every relationship with the canonical names of its endpoints."#,
        pretty(extracted),
        pretty(&existing)
    )
}

pub fn build_validation_prompt(relationships: &[ResolvedRelationship], context: &ValidationContext) -> String {
    let date = context.publication_date.as_deref().unwrap_or("unknown");
    format!(
        r#"Validate the following resolved relationships before graph insertion.
The paper under analysis was published: {date}

Resolved relationships to validate:
{}

Existing graph context (relevant nodes and edges):
{}

For each relationship check temporal consistency, type compatibility and contradictions, adjust confidence for evidence quality, then accept or reject it with a reason."#,
        pretty(&relationships),
        pretty(context)
    )
}

fn pretty<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "[]".to_string())
}
