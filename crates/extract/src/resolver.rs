use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::extractor::StageOptions;
use crate::llm::CompletionCapability;
use crate::normalizer::{NameMatcher, normalize_name};
use crate::prompt::{RESOLUTION_SYSTEM_PROMPT, build_resolution_prompt};
use crate::schema::{ExtractionOutput, KnownEntity, ResolutionOutput, ResolvedEntity, ResolvedRelationship};

/// Maps mentions to canonical entities and rewrites relationships in terms of
/// canonical names.
#[derive(Clone)]
pub struct ResolutionStage {
    llm: Arc<dyn CompletionCapability>,
    options: StageOptions,
    matcher: Arc<NameMatcher>,
}

impl ResolutionStage {
    pub fn new(llm: Arc<dyn CompletionCapability>, options: StageOptions) -> Self {
        Self {
            llm,
            options,
            matcher: Arc::new(NameMatcher::default()),
        }
    }

    pub fn with_matcher(mut self, matcher: NameMatcher) -> Self {
        self.matcher = Arc::new(matcher);
        self
    }

    pub async fn try_resolve(&self, extracted: &ExtractionOutput, existing: &[KnownEntity]) -> Result<ResolutionOutput> {
        let user = build_resolution_prompt(extracted, existing);
        let value = self
            .llm
            .complete(RESOLUTION_SYSTEM_PROMPT, &user, self.options.temperature, self.options.retries)
            .await
            .context("Resolution completion failed")?;

        let mut output = ResolutionOutput::decode(&value)?;
        output.resolved_entities.retain(|e| !e.canonical_name.trim().is_empty());
        output
            .resolved_relationships
            .retain(|r| !r.source_name.trim().is_empty() && !r.target_name.trim().is_empty());
        Ok(output)
    }

    /// Resolve one chunk's extraction. Whatever the backend leaves out is
    /// filled in locally, so mentions are never silently lost.
    pub async fn resolve(&self, extracted: &ExtractionOutput, existing: &[KnownEntity]) -> ResolutionOutput {
        if extracted.is_empty() {
            return ResolutionOutput::default();
        }

        let mut output = match self.try_resolve(extracted, existing).await {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Resolution failed, resolving locally");
                ResolutionOutput::default()
            }
        };

        let claimed: HashSet<String> = output
            .resolved_entities
            .iter()
            .map(|e| normalize_name(&e.mention))
            .collect();
        let local = self.resolve_unclaimed(extracted, existing, claimed);
        if !local.is_empty() {
            info!(
                entities = local.len(),
                from_backend = output.resolved_entities.len(),
                "Resolved entities with local matcher"
            );
            output.resolved_entities.extend(local);
        }
        if output.resolved_relationships.is_empty() && !extracted.relationships.is_empty() {
            output.resolved_relationships = local_relationships(extracted, &output.resolved_entities);
            debug!(
                relationships = output.resolved_relationships.len(),
                "Carried relationships over by mention name"
            );
        }

        output
    }

    /// Match each distinct mention against the node sample.
    pub fn resolve_locally(&self, extracted: &ExtractionOutput, existing: &[KnownEntity]) -> Vec<ResolvedEntity> {
        self.resolve_unclaimed(extracted, existing, HashSet::new())
    }

    /// Local resolution for mentions whose normalized form is not in `seen`.
    fn resolve_unclaimed(
        &self,
        extracted: &ExtractionOutput,
        existing: &[KnownEntity],
        mut seen: HashSet<String>,
    ) -> Vec<ResolvedEntity> {
        let mut resolved = Vec::new();

        for mention in &extracted.entities {
            let key = normalize_name(&mention.mention);
            if key.is_empty() || !seen.insert(key) {
                continue;
            }

            let found = self
                .matcher
                .best_match(&mention.mention, existing.iter().map(|e| e.name.as_str()))
                .and_then(|m| existing.iter().find(|e| e.name == m.candidate).map(|e| (e, m.score)));

            resolved.push(match found {
                Some((entity, score)) => ResolvedEntity {
                    mention: mention.mention.clone(),
                    canonical_id: Some(entity.id.clone()),
                    canonical_name: entity.name.clone(),
                    entity_type: entity.entity_type,
                    is_new: false,
                    confidence: score,
                },
                None => ResolvedEntity {
                    mention: mention.mention.clone(),
                    canonical_id: None,
                    canonical_name: mention.mention.trim().to_string(),
                    entity_type: mention.entity_type.node_type(),
                    is_new: true,
                    confidence: mention.confidence,
                },
            });
        }

        resolved
    }
}

/// Rewrite extracted triples with the canonical names their mentions resolved to.
fn local_relationships(extracted: &ExtractionOutput, entities: &[ResolvedEntity]) -> Vec<ResolvedRelationship> {
    let mut names: HashMap<String, &str> = HashMap::new();
    for entity in entities {
        names.insert(normalize_name(&entity.mention), &entity.canonical_name);
        names.insert(normalize_name(&entity.canonical_name), &entity.canonical_name);
    }
    let canonical = |name: &str| -> String {
        names
            .get(&normalize_name(name))
            .map(|n| n.to_string())
            .unwrap_or_else(|| name.trim().to_string())
    };

    extracted
        .relationships
        .iter()
        .map(|r| ResolvedRelationship {
            source_name: canonical(&r.subject),
            target_name: canonical(&r.object),
            relationship_type: r.predicate.clone(),
            confidence: r.confidence,
            evidence: r.evidence_text.clone(),
        })
        .collect()
}
