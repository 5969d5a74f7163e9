use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::extractor::StageOptions;
use crate::llm::CompletionCapability;
use crate::normalizer::normalize_name;
use crate::prompt::{VALIDATION_SYSTEM_PROMPT, build_validation_prompt};
use crate::schema::{
    ConfidenceAdjustment, EdgeType, NodeType, RawValidation, RejectedRelationship, ResolutionOutput,
    ResolvedRelationship, ValidatedRelationship, ValidationContext, ValidationOutput,
};

/// Default type for relationships the backend labels outside the enum.
pub const FALLBACK_EDGE_TYPE: EdgeType = EdgeType::Uses;

type RelationshipKey = (String, String, String);

fn key_of(r: &ResolvedRelationship) -> RelationshipKey {
    (
        normalize_name(&r.source_name),
        normalize_name(&r.target_name),
        normalize_name(&r.relationship_type).replace([' ', '-'], "_"),
    )
}

fn describe(r: &ResolvedRelationship) -> String {
    format!("{} -[{}]-> {}", r.source_name, r.relationship_type, r.target_name)
}

/// Accepts, rejects and re-scores resolved relationships before they reach
/// the graph. The backend's verdicts pass through a local safety net.
#[derive(Clone)]
pub struct ValidationStage {
    llm: Arc<dyn CompletionCapability>,
    options: StageOptions,
    confidence_floor: f64,
}

impl ValidationStage {
    pub fn new(llm: Arc<dyn CompletionCapability>, options: StageOptions, confidence_floor: f64) -> Self {
        Self {
            llm,
            options,
            confidence_floor: confidence_floor.clamp(0.0, 1.0),
        }
    }

    pub fn confidence_floor(&self) -> f64 {
        self.confidence_floor
    }

    pub async fn try_validate(
        &self,
        relationships: &[ResolvedRelationship],
        context: &ValidationContext,
    ) -> Result<RawValidation> {
        let user = build_validation_prompt(relationships, context);
        let value = self
            .llm
            .complete(VALIDATION_SYSTEM_PROMPT, &user, self.options.temperature, self.options.retries)
            .await
            .context("Validation completion failed")?;
        Ok(RawValidation::decode(&value)?)
    }

    /// Validate one chunk's resolved relationships. If the backend fails,
    /// nothing is accepted.
    pub async fn validate(&self, resolution: &ResolutionOutput, context: &ValidationContext) -> ValidationOutput {
        let mut output = ValidationOutput::default();
        if resolution.resolved_relationships.is_empty() {
            return output;
        }

        let types = known_types(resolution, context);
        let mut candidates = Vec::new();
        for relationship in &resolution.resolved_relationships {
            match local_rejection(relationship, &types) {
                Some(reason) => output.rejected.push(RejectedRelationship {
                    relationship: relationship.clone(),
                    reason,
                }),
                None => candidates.push(relationship.clone()),
            }
        }
        if candidates.is_empty() {
            return output;
        }

        let raw = match self.try_validate(&candidates, context).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    relationships = candidates.len(),
                    error = %format!("{e:#}"),
                    "Validation failed, accepting nothing for this chunk"
                );
                return output;
            }
        };

        self.apply_verdicts(raw, &candidates, &types, &mut output);
        debug!(
            accepted = output.accepted.len(),
            rejected = output.rejected.len(),
            adjustments = output.confidence_adjustments.len(),
            "Validated chunk"
        );
        output
    }

    fn apply_verdicts(
        &self,
        raw: RawValidation,
        candidates: &[ResolvedRelationship],
        types: &HashMap<String, NodeType>,
        output: &mut ValidationOutput,
    ) {
        let submitted: HashMap<RelationshipKey, f64> =
            candidates.iter().map(|r| (key_of(r), r.confidence)).collect();
        let rejected_keys: HashSet<RelationshipKey> = raw.rejected.iter().map(|r| key_of(&r.relationship)).collect();
        let reported: HashSet<String> = raw
            .confidence_adjustments
            .iter()
            .map(|a| normalize_name(&a.relationship_id))
            .collect();

        output.rejected.extend(raw.rejected);
        output.confidence_adjustments.extend(raw.confidence_adjustments);

        let mut accepted_keys = HashSet::new();
        for relationship in raw.accepted {
            let key = key_of(&relationship);
            if rejected_keys.contains(&key) || !accepted_keys.insert(key.clone()) {
                continue;
            }

            if let Some(reason) = local_rejection(&relationship, types) {
                output.rejected.push(RejectedRelationship { relationship, reason });
                continue;
            }

            if let Some(&before) = submitted.get(&key) {
                let label = describe(&relationship);
                if (before - relationship.confidence).abs() > f64::EPSILON && !reported.contains(&normalize_name(&label)) {
                    output.confidence_adjustments.push(ConfidenceAdjustment {
                        relationship_id: label,
                        original_confidence: before,
                        adjusted_confidence: relationship.confidence,
                        reason: "confidence revised during validation".to_string(),
                    });
                }
            }

            if relationship.confidence < self.confidence_floor {
                let reason = format!(
                    "confidence {:.2} below floor {:.2}",
                    relationship.confidence, self.confidence_floor
                );
                output.rejected.push(RejectedRelationship { relationship, reason });
                continue;
            }

            output.accepted.push(coerce(relationship));
        }
    }
}

/// Pin the relationship type to the enum, falling back to `uses`.
pub fn coerce(relationship: ResolvedRelationship) -> ValidatedRelationship {
    let (edge_type, original_type) = match EdgeType::parse(&relationship.relationship_type) {
        Some(edge_type) => (edge_type, None),
        None => {
            debug!(
                original = %relationship.relationship_type,
                coerced = %FALLBACK_EDGE_TYPE,
                "Coercing unknown relationship type"
            );
            (FALLBACK_EDGE_TYPE, Some(relationship.relationship_type))
        }
    };

    ValidatedRelationship {
        source_name: relationship.source_name,
        target_name: relationship.target_name,
        edge_type,
        confidence: relationship.confidence,
        evidence: relationship.evidence,
        original_type,
    }
}

fn known_types(resolution: &ResolutionOutput, context: &ValidationContext) -> HashMap<String, NodeType> {
    let mut types: HashMap<String, NodeType> = context
        .nodes
        .iter()
        .map(|n| (normalize_name(&n.name), n.entity_type))
        .collect();
    for entity in &resolution.resolved_entities {
        types.insert(normalize_name(&entity.canonical_name), entity.entity_type);
    }
    types
}

fn local_rejection(relationship: &ResolvedRelationship, types: &HashMap<String, NodeType>) -> Option<String> {
    let source = normalize_name(&relationship.source_name);
    let target = normalize_name(&relationship.target_name);
    if source == target {
        return Some("relationship points to itself".to_string());
    }

    if EdgeType::parse(&relationship.relationship_type) == Some(EdgeType::EvaluatesOn) {
        if let Some(target_type) = types.get(&target).filter(|t| **t != NodeType::Dataset) {
            return Some(format!("evaluates_on requires a dataset target, found {target_type}"));
        }
    }
    None
}
