use anyhow::Result;
use extract::{EdgeType, NodeType, normalize_name};
use index::{CountSummary, Edge, GraphStats, GraphStore, Node, NodeFilter, Page, Source};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Name searches fan out to at most this many matching nodes.
const NAME_MATCH_LIMIT: usize = 10;

/// An edge seen from one of its endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeView {
    #[serde(flatten)]
    pub edge: Edge,
    pub neighbor_id: String,
    pub neighbor_name: Option<String>,
    pub neighbor_type: Option<NodeType>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDetail {
    pub node: Node,
    pub outgoing_edges: Vec<EdgeView>,
    pub incoming_edges: Vec<EdgeView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub edge: Edge,
    pub source_node: Option<Node>,
    pub target_node: Option<Node>,
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetUsage {
    #[serde(flatten)]
    pub node: Node,
    pub evaluation_count: usize,
}

/// Canned read queries over a [`GraphStore`].
#[derive(Clone)]
pub struct GraphQueries {
    store: Arc<dyn GraphStore>,
}

impl GraphQueries {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub async fn node_detail(&self, node_id: &str) -> Result<Option<NodeDetail>> {
        match self.store.get_node(node_id).await? {
            Some(node) => Ok(Some(self.detail(node).await?)),
            None => Ok(None),
        }
    }

    /// The edge, both endpoints, and every source row backing it.
    pub async fn provenance(&self, edge_id: &str) -> Result<Option<Provenance>> {
        let Some(edge) = self.store.get_edge(edge_id).await? else {
            return Ok(None);
        };
        let source_node = self.store.get_node(&edge.source_id).await?;
        let target_node = self.store.get_node(&edge.target_id).await?;
        let sources = self.store.sources_for_edge(&edge.id).await?;

        Ok(Some(Provenance {
            edge,
            source_node,
            target_node,
            sources,
        }))
    }

    /// Nodes whose name contains `name`, each with its adjacent edges.
    pub async fn relationships_of(&self, name: &str) -> Result<Vec<NodeDetail>> {
        let filter = NodeFilter {
            search: Some(name.trim().to_string()),
            ..NodeFilter::default()
        };
        let matches = self.store.list_nodes(&filter, Page::first(NAME_MATCH_LIMIT)).await?;

        let mut details = Vec::with_capacity(matches.len());
        for node in matches {
            details.push(self.detail(node).await?);
        }
        Ok(details)
    }

    /// Dataset nodes ordered by how many `evaluates_on` edges point at them.
    pub async fn datasets(&self) -> Result<Vec<DatasetUsage>> {
        let filter = NodeFilter {
            node_type: Some(NodeType::Dataset),
            ..NodeFilter::default()
        };
        let datasets = self.store.list_nodes(&filter, Page::first(Page::MAX_LIMIT)).await?;
        let ids: Vec<String> = datasets.iter().map(|n| n.id.clone()).collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for edge in self.store.edges_touching(&ids).await? {
            if edge.edge_type == EdgeType::EvaluatesOn {
                *counts.entry(edge.target_id).or_default() += 1;
            }
        }

        let mut usage: Vec<DatasetUsage> = datasets
            .into_iter()
            .map(|node| DatasetUsage {
                evaluation_count: counts.get(&node.id).copied().unwrap_or(0),
                node,
            })
            .collect();
        usage.sort_by(|a, b| b.evaluation_count.cmp(&a.evaluation_count));
        Ok(usage)
    }

    /// Nodes with an `edge_type` edge into the node(s) named `name`.
    /// An exact normalized-name match wins; otherwise substring search.
    pub async fn related_by(&self, name: &str, edge_type: EdgeType) -> Result<Vec<Node>> {
        let anchors = match self.store.find_node_by_normalized_name(&normalize_name(name)).await? {
            Some(node) => vec![node],
            None => {
                let filter = NodeFilter {
                    search: Some(name.trim().to_string()),
                    ..NodeFilter::default()
                };
                self.store.list_nodes(&filter, Page::first(NAME_MATCH_LIMIT)).await?
            }
        };
        if anchors.is_empty() {
            return Ok(Vec::new());
        }

        let anchor_ids: Vec<String> = anchors.iter().map(|n| n.id.clone()).collect();
        let anchor_set: HashSet<&str> = anchor_ids.iter().map(String::as_str).collect();

        let mut seen = HashSet::new();
        let mut related_ids = Vec::new();
        for edge in self.store.edges_touching(&anchor_ids).await? {
            if edge.edge_type == edge_type
                && anchor_set.contains(edge.target_id.as_str())
                && !anchor_set.contains(edge.source_id.as_str())
                && seen.insert(edge.source_id.clone())
            {
                related_ids.push(edge.source_id);
            }
        }
        debug!(name, edge_type = %edge_type, anchors = anchor_ids.len(), related = related_ids.len(), "Related-by query");

        let mut by_id: HashMap<String, Node> = self
            .store
            .get_nodes(&related_ids)
            .await?
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();
        Ok(related_ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    pub async fn stats(&self) -> Result<GraphStats> {
        Ok(GraphStats {
            nodes: CountSummary::new(self.store.count_nodes_by_type().await?),
            edges: CountSummary::new(self.store.count_edges_by_type().await?),
            papers: self.store.count_papers().await?,
        })
    }

    async fn detail(&self, node: Node) -> Result<NodeDetail> {
        let edges = self.store.edges_touching(std::slice::from_ref(&node.id)).await?;

        let neighbor_ids: Vec<String> = edges
            .iter()
            .map(|e| if e.source_id == node.id { e.target_id.clone() } else { e.source_id.clone() })
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let neighbors: HashMap<String, Node> = self
            .store
            .get_nodes(&neighbor_ids)
            .await?
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();

        let mut outgoing_edges = Vec::new();
        let mut incoming_edges = Vec::new();
        for edge in edges {
            let outgoing = edge.source_id == node.id;
            let neighbor_id = if outgoing { edge.target_id.clone() } else { edge.source_id.clone() };
            let neighbor = neighbors.get(&neighbor_id);
            let view = EdgeView {
                neighbor_name: neighbor.map(|n| n.name.clone()),
                neighbor_type: neighbor.map(|n| n.node_type),
                neighbor_id,
                edge,
            };
            if outgoing {
                outgoing_edges.push(view);
            } else {
                incoming_edges.push(view);
            }
        }

        Ok(NodeDetail {
            node,
            outgoing_edges,
            incoming_edges,
        })
    }
}
