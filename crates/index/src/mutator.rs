use anyhow::{Context, Result};
use extract::{EdgeType, NameMatcher, NodeType, ResolutionOutput, ResolvedEntity, ValidationOutput, normalize_name};
use ingest::Section;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::store::{GraphStore, NewEdge, NewNode, NewSource, WriteBatch};

/// Normalized name → node id for everything one processing run has
/// created or matched.
#[derive(Debug, Clone, Default)]
pub struct ResolutionCache {
    ids: HashMap<String, String>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.ids.get(&normalize_name(name)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn extend(&mut self, learned: HashMap<String, String>) {
        self.ids.extend(learned);
    }
}

/// Where the chunk being written came from.
#[derive(Debug, Clone, Copy)]
pub struct ChunkOrigin<'a> {
    pub paper_id: &'a str,
    pub chunk_index: usize,
    pub section: Section,
}

/// What one chunk's writes amounted to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMutation {
    pub nodes_created: usize,
    pub entities_matched: usize,
    pub edges_created: usize,
    pub sources_created: usize,
    pub unresolved: usize,
    pub self_loops: usize,
    pub duplicates_merged: usize,
}

#[derive(Default)]
struct Staging {
    batch: WriteBatch,
    /// Names learned in this chunk; merged into the run cache after commit.
    learned: HashMap<String, String>,
    edges: HashMap<(String, String, EdgeType), usize>,
}

/// Turns validated chunk output into nodes, edges and provenance.
pub struct GraphMutator {
    store: Arc<dyn GraphStore>,
    matcher: NameMatcher,
    max_evidence_chars: usize,
}

impl GraphMutator {
    pub fn new(store: Arc<dyn GraphStore>, max_evidence_chars: usize) -> Self {
        Self {
            store,
            matcher: NameMatcher::default(),
            max_evidence_chars,
        }
    }

    pub fn with_matcher(mut self, matcher: NameMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Stage and commit one chunk. The cache only learns names once the
    /// batch is durable.
    pub async fn apply_chunk(
        &self,
        cache: &mut ResolutionCache,
        origin: ChunkOrigin<'_>,
        resolution: &ResolutionOutput,
        validation: &ValidationOutput,
    ) -> Result<ChunkMutation> {
        let mut stats = ChunkMutation::default();
        let mut staging = Staging::default();

        for entity in &resolution.resolved_entities {
            self.stage_entity(cache, origin, entity, &mut staging, &mut stats).await?;
        }

        for relationship in &validation.accepted {
            let source = self.endpoint(cache, &relationship.source_name, &mut staging).await?;
            let target = self.endpoint(cache, &relationship.target_name, &mut staging).await?;
            let (Some(source_id), Some(target_id)) = (source, target) else {
                debug!(
                    source = %relationship.source_name,
                    target = %relationship.target_name,
                    "Dropping relationship with unresolved endpoint"
                );
                stats.unresolved += 1;
                continue;
            };
            if source_id == target_id {
                stats.self_loops += 1;
                continue;
            }

            let key = (source_id.clone(), target_id.clone(), relationship.edge_type);
            if let Some(&index) = staging.edges.get(&key) {
                let edge = &mut staging.batch.edges[index];
                edge.confidence = edge.confidence.max(relationship.confidence);
                stats.duplicates_merged += 1;
                continue;
            }

            let edge = NewEdge {
                source_id,
                target_id,
                edge_type: relationship.edge_type,
                confidence: relationship.confidence,
                properties: relationship
                    .original_type
                    .as_ref()
                    .map(|original| json!({ "originalType": original })),
            }
            .build();

            let source = NewSource {
                edge_id: edge.id.clone(),
                paper_id: origin.paper_id.to_string(),
                section: Some(origin.section.as_str().to_string()),
                chunk_index: Some(origin.chunk_index),
                page_number: None,
                extracted_text: truncate_chars(&relationship.evidence, self.max_evidence_chars),
                span_start: None,
                span_end: None,
            }
            .build();

            staging.edges.insert(key, staging.batch.edges.len());
            staging.batch.edges.push(edge);
            staging.batch.sources.push(source);
        }

        stats.edges_created = staging.batch.edges.len();
        stats.sources_created = staging.batch.sources.len();

        self.store
            .commit(staging.batch)
            .await
            .context(format!("Failed to commit chunk {}", origin.chunk_index))?;
        cache.extend(staging.learned);

        info!(
            paper_id = origin.paper_id,
            chunk = origin.chunk_index,
            nodes = stats.nodes_created,
            edges = stats.edges_created,
            unresolved = stats.unresolved,
            "Persisted chunk"
        );
        Ok(stats)
    }

    async fn stage_entity(
        &self,
        cache: &ResolutionCache,
        origin: ChunkOrigin<'_>,
        entity: &ResolvedEntity,
        staging: &mut Staging,
        stats: &mut ChunkMutation,
    ) -> Result<()> {
        let key = normalize_name(&entity.canonical_name);
        if key.is_empty() {
            return Ok(());
        }
        let mention = normalize_name(&entity.mention);

        let known = match cache.get(&key).or_else(|| staging.learned.get(&key).map(String::as_str)) {
            Some(id) => Some(id.to_string()),
            None => self.existing_node(entity, &key).await?,
        };

        let id = match known {
            Some(id) => {
                stats.entities_matched += 1;
                id
            }
            None => {
                let mut node = NewNode::new(entity.entity_type, entity.canonical_name.as_str());
                // Paper nodes stand for other papers, not the one being processed.
                if entity.entity_type != NodeType::Paper {
                    node = node.owned_by(origin.paper_id);
                }
                let node = node.build();
                let id = node.id.clone();
                staging.batch.nodes.push(node);
                stats.nodes_created += 1;
                id
            }
        };

        staging.learned.insert(key, id.clone());
        if !mention.is_empty() {
            staging.learned.entry(mention).or_insert(id);
        }
        Ok(())
    }

    /// Resolver-reported id if it really exists, else a stored node with the
    /// same normalized name.
    async fn existing_node(&self, entity: &ResolvedEntity, key: &str) -> Result<Option<String>> {
        if !entity.is_new {
            if let Some(id) = entity.canonical_id.as_deref().filter(|id| !id.is_empty()) {
                if let Some(node) = self.store.get_node(id).await? {
                    return Ok(Some(node.id));
                }
            }
        }
        Ok(self.store.find_node_by_normalized_name(key).await?.map(|n| n.id))
    }

    /// Exact match in this chunk or run, then the store, then the similarity
    /// matcher over every name the run knows.
    async fn endpoint(&self, cache: &ResolutionCache, name: &str, staging: &mut Staging) -> Result<Option<String>> {
        let key = normalize_name(name);
        if key.is_empty() {
            return Ok(None);
        }
        if let Some(id) = staging.learned.get(&key).map(String::as_str).or_else(|| cache.get(&key)) {
            return Ok(Some(id.to_string()));
        }

        if let Some(node) = self.store.find_node_by_normalized_name(&key).await? {
            staging.learned.insert(key, node.id.clone());
            return Ok(Some(node.id));
        }

        let candidates = staging.learned.keys().chain(cache.ids.keys()).map(String::as_str);
        let found = self.matcher.best_match(&key, candidates).and_then(|m| {
            debug!(name, matched = m.candidate, strategy = m.strategy, "Fuzzy endpoint match");
            staging
                .learned
                .get(m.candidate)
                .or_else(|| cache.ids.get(m.candidate))
                .cloned()
        });
        Ok(found)
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryGraphStore;
    use crate::model::{EdgeFilter, NodeFilter, Page};
    use extract::{ResolvedRelationship, ValidatedRelationship};

    const EVIDENCE: &str = "Our method, FastSplat, extends 3D Gaussian Splatting and is evaluated on Mip-NeRF360.";

    fn origin(chunk_index: usize) -> ChunkOrigin<'static> {
        ChunkOrigin {
            paper_id: "paper-1",
            chunk_index,
            section: Section::Abstract,
        }
    }

    fn entity(name: &str, entity_type: NodeType, is_new: bool, id: Option<&str>) -> ResolvedEntity {
        ResolvedEntity {
            mention: name.into(),
            canonical_id: id.map(String::from),
            canonical_name: name.into(),
            entity_type,
            is_new,
            confidence: 1.0,
        }
    }

    fn accepted(source: &str, target: &str, edge_type: EdgeType) -> ValidatedRelationship {
        ValidatedRelationship {
            source_name: source.into(),
            target_name: target.into(),
            edge_type,
            confidence: 0.9,
            evidence: EVIDENCE.into(),
            original_type: None,
        }
    }

    fn validation(accepted: Vec<ValidatedRelationship>) -> ValidationOutput {
        ValidationOutput {
            accepted,
            ..ValidationOutput::default()
        }
    }

    async fn seeded() -> (Arc<InMemoryGraphStore>, String) {
        let store = Arc::new(InMemoryGraphStore::new());
        let gs = store
            .create_node(NewNode::new(NodeType::Method, "3D Gaussian Splatting"))
            .await
            .unwrap();
        (store, gs.id)
    }

    #[tokio::test]
    async fn persists_fastsplat_chunk() {
        let (store, gs_id) = seeded().await;
        let mutator = GraphMutator::new(store.clone(), 1000);
        let mut cache = ResolutionCache::new();

        let resolution = ResolutionOutput {
            resolved_entities: vec![
                entity("FastSplat", NodeType::Method, true, None),
                entity("3D Gaussian Splatting", NodeType::Method, false, Some(&gs_id)),
                entity("Mip-NeRF360", NodeType::Dataset, true, None),
            ],
            resolved_relationships: vec![],
        };
        let validation = validation(vec![
            accepted("FastSplat", "3D Gaussian Splatting", EdgeType::Extends),
            accepted("FastSplat", "Mip-NeRF360", EdgeType::EvaluatesOn),
        ]);

        let stats = mutator
            .apply_chunk(&mut cache, origin(0), &resolution, &validation)
            .await
            .unwrap();
        assert_eq!(stats.nodes_created, 2);
        assert_eq!(stats.entities_matched, 1);
        assert_eq!(stats.edges_created, 2);
        assert_eq!(stats.sources_created, 2);

        let nodes = store.list_nodes(&NodeFilter::default(), Page::default()).await.unwrap();
        assert_eq!(nodes.len(), 3);
        let fast = nodes.iter().find(|n| n.name == "FastSplat").unwrap();
        assert_eq!(fast.paper_id.as_deref(), Some("paper-1"));

        let edges = store.list_edges(&EdgeFilter::default(), Page::default()).await.unwrap();
        assert!(edges.iter().any(|e| e.target_id == gs_id && e.edge_type == EdgeType::Extends));
        for edge in &edges {
            let sources = store.sources_for_edge(&edge.id).await.unwrap();
            assert_eq!(sources.len(), 1);
            assert_eq!(sources[0].extracted_text, EVIDENCE);
            assert_eq!(sources[0].section.as_deref(), Some("abstract"));
        }
        assert_eq!(cache.get("fastsplat"), Some(fast.id.as_str()));
    }

    #[tokio::test]
    async fn same_name_is_created_once_per_run() {
        let store = Arc::new(InMemoryGraphStore::new());
        let mutator = GraphMutator::new(store.clone(), 1000);
        let mut cache = ResolutionCache::new();

        let resolution = ResolutionOutput {
            resolved_entities: vec![
                entity("FastSplat", NodeType::Method, true, None),
                entity("fastsplat ", NodeType::Method, true, None),
            ],
            resolved_relationships: vec![],
        };
        for chunk in 0..3 {
            mutator
                .apply_chunk(&mut cache, origin(chunk), &resolution, &ValidationOutput::default())
                .await
                .unwrap();
        }

        let nodes = store.list_nodes(&NodeFilter::default(), Page::default()).await.unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[tokio::test]
    async fn paper_references_are_not_owned() {
        let store = Arc::new(InMemoryGraphStore::new());
        let mutator = GraphMutator::new(store.clone(), 1000);
        let resolution = ResolutionOutput {
            resolved_entities: vec![entity("Kerbl et al.", NodeType::Paper, true, None)],
            resolved_relationships: vec![],
        };
        mutator
            .apply_chunk(&mut ResolutionCache::new(), origin(0), &resolution, &ValidationOutput::default())
            .await
            .unwrap();

        let nodes = store.list_nodes(&NodeFilter::default(), Page::default()).await.unwrap();
        assert_eq!(nodes[0].node_type, NodeType::Paper);
        assert_eq!(nodes[0].paper_id, None);
    }

    #[tokio::test]
    async fn unresolved_and_self_loops_are_dropped() {
        let (store, _) = seeded().await;
        let mutator = GraphMutator::new(store.clone(), 1000).with_matcher(NameMatcher::exact());
        let resolution = ResolutionOutput {
            resolved_entities: vec![entity("FastSplat", NodeType::Method, true, None)],
            resolved_relationships: vec![],
        };
        let validation = validation(vec![
            accepted("FastSplat", "Nonexistent Method", EdgeType::Improves),
            accepted("FastSplat", "FASTSPLAT", EdgeType::Uses),
        ]);

        let stats = mutator
            .apply_chunk(&mut ResolutionCache::new(), origin(0), &resolution, &validation)
            .await
            .unwrap();
        assert_eq!(stats.unresolved, 1);
        assert_eq!(stats.self_loops, 1);
        assert_eq!(stats.edges_created, 0);
        assert!(store.list_edges(&EdgeFilter::default(), Page::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn endpoints_fall_back_to_store_and_similarity() {
        let (store, gs_id) = seeded().await;
        let mutator = GraphMutator::new(store.clone(), 1000);
        let mut cache = ResolutionCache::new();

        let first = ResolutionOutput {
            resolved_entities: vec![entity("FastSplat Renderer", NodeType::Method, true, None)],
            resolved_relationships: vec![],
        };
        mutator
            .apply_chunk(&mut cache, origin(0), &first, &ValidationOutput::default())
            .await
            .unwrap();

        // Later chunk: no entities, endpoint names only partially match.
        let validation = validation(vec![accepted("FastSplat", "3d gaussian splatting", EdgeType::Extends)]);
        let stats = mutator
            .apply_chunk(&mut cache, origin(1), &ResolutionOutput::default(), &validation)
            .await
            .unwrap();
        assert_eq!(stats.edges_created, 1);

        let edges = store.list_edges(&EdgeFilter::default(), Page::default()).await.unwrap();
        assert_eq!(edges[0].target_id, gs_id);
        assert_eq!(Some(edges[0].source_id.as_str()), cache.get("FastSplat Renderer"));
    }

    #[tokio::test]
    async fn duplicates_merge_and_coercions_are_recorded() {
        let (store, _) = seeded().await;
        let mutator = GraphMutator::new(store.clone(), 10);
        let resolution = ResolutionOutput {
            resolved_entities: vec![entity("FastSplat", NodeType::Method, true, None)],
            resolved_relationships: vec![ResolvedRelationship {
                source_name: "FastSplat".into(),
                target_name: "3D Gaussian Splatting".into(),
                relationship_type: "outperforms".into(),
                confidence: 0.7,
                evidence: String::new(),
            }],
        };
        let mut coerced = accepted("FastSplat", "3D Gaussian Splatting", EdgeType::Uses);
        coerced.original_type = Some("outperforms".into());
        coerced.confidence = 0.6;
        let plain = accepted("FastSplat", "3D Gaussian Splatting", EdgeType::Uses);

        let stats = mutator
            .apply_chunk(&mut ResolutionCache::new(), origin(0), &resolution, &validation(vec![coerced, plain]))
            .await
            .unwrap();
        assert_eq!(stats.edges_created, 1);
        assert_eq!(stats.duplicates_merged, 1);

        let edges = store.list_edges(&EdgeFilter::default(), Page::default()).await.unwrap();
        assert_eq!(edges[0].edge_type, EdgeType::Uses);
        assert_eq!(edges[0].confidence, 0.9);
        assert_eq!(edges[0].properties, Some(json!({"originalType": "outperforms"})));

        let sources = store.sources_for_edge(&edges[0].id).await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].extracted_text.chars().count(), 10);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("naïve café", 4), "naïv");
        assert_eq!(truncate_chars("short", 100), "short");
    }
}
