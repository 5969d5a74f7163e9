use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use extract::{EdgeType, NodeType, normalize_name};
use uuid::Uuid;

use crate::model::{
    Edge, EdgeFilter, NewPaper, Node, NodeFilter, Page, Paper, PaperCounts, ProcessingStatus, ProvenanceCleanup, Source,
    TypeCount,
};

/// Persistence for papers, nodes, edges and provenance.
///
/// Every method is its own atomic unit except [`GraphStore::commit`], which
/// applies a whole [`WriteBatch`] or nothing.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn create_paper(&self, paper: NewPaper) -> Result<Paper>;
    async fn get_paper(&self, id: &str) -> Result<Option<Paper>>;
    async fn find_paper_by_arxiv_id(&self, arxiv_id: &str) -> Result<Option<Paper>>;
    /// Newest first.
    async fn list_papers(&self, page: Page) -> Result<Vec<Paper>>;
    async fn set_paper_text(&self, id: &str, text: &str, page_count: usize) -> Result<()>;
    async fn update_paper_status(
        &self,
        id: &str,
        status: ProcessingStatus,
        progress: u8,
        error: Option<&str>,
    ) -> Result<()>;
    /// `processed = true`, status `completed`, progress 100.
    async fn mark_paper_processed(&self, id: &str) -> Result<()>;
    /// `processed = false`, status `pending`, progress 0, error cleared.
    async fn reset_paper(&self, id: &str) -> Result<()>;
    async fn count_papers(&self) -> Result<PaperCounts>;

    async fn create_node(&self, node: NewNode) -> Result<Node>;
    async fn get_node(&self, id: &str) -> Result<Option<Node>>;
    async fn get_nodes(&self, ids: &[String]) -> Result<Vec<Node>>;
    /// Oldest node whose normalized name equals `normalized_name`.
    async fn find_node_by_normalized_name(&self, normalized_name: &str) -> Result<Option<Node>>;
    async fn list_nodes(&self, filter: &NodeFilter, page: Page) -> Result<Vec<Node>>;
    async fn nodes_owned_by(&self, paper_id: &str) -> Result<Vec<Node>>;
    /// Callers delete touching edges first.
    async fn delete_nodes(&self, ids: &[String]) -> Result<usize>;
    async fn count_nodes_by_type(&self) -> Result<Vec<TypeCount<NodeType>>>;

    async fn get_edge(&self, id: &str) -> Result<Option<Edge>>;
    async fn list_edges(&self, filter: &EdgeFilter, page: Page) -> Result<Vec<Edge>>;
    /// Edges with either endpoint in `node_ids`.
    async fn edges_touching(&self, node_ids: &[String]) -> Result<Vec<Edge>>;
    /// Removes the edges (and their sources) with either endpoint in `node_ids`.
    async fn delete_edges_touching(&self, node_ids: &[String]) -> Result<usize>;
    async fn count_edges_by_type(&self) -> Result<Vec<TypeCount<EdgeType>>>;

    async fn sources_for_edge(&self, edge_id: &str) -> Result<Vec<Source>>;
    /// Removes the paper's sources, plus any edge left without provenance.
    async fn delete_sources_for_paper(&self, paper_id: &str) -> Result<ProvenanceCleanup>;

    /// Apply a batch atomically.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    pub node_type: NodeType,
    pub name: String,
    pub description: Option<String>,
    pub paper_id: Option<String>,
    pub properties: Option<serde_json::Value>,
}

impl NewNode {
    pub fn new(node_type: NodeType, name: impl Into<String>) -> Self {
        Self {
            node_type,
            name: name.into(),
            description: None,
            paper_id: None,
            properties: None,
        }
    }

    pub fn owned_by(mut self, paper_id: impl Into<String>) -> Self {
        self.paper_id = Some(paper_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Assign an id and derive the dedup key.
    pub fn build(self) -> Node {
        let name = self.name.trim().to_string();
        Node {
            id: Uuid::new_v4().to_string(),
            node_type: self.node_type,
            normalized_name: normalize_name(&name),
            name,
            description: self.description,
            paper_id: self.paper_id,
            properties: self.properties,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewEdge {
    pub source_id: String,
    pub target_id: String,
    pub edge_type: EdgeType,
    pub confidence: f64,
    pub properties: Option<serde_json::Value>,
}

impl NewEdge {
    pub fn build(self) -> Edge {
        Edge {
            id: Uuid::new_v4().to_string(),
            source_id: self.source_id,
            target_id: self.target_id,
            edge_type: self.edge_type,
            confidence: extract::clamp_confidence(self.confidence),
            properties: self.properties,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSource {
    pub edge_id: String,
    pub paper_id: String,
    pub section: Option<String>,
    pub chunk_index: Option<usize>,
    pub page_number: Option<usize>,
    pub extracted_text: String,
    pub span_start: Option<usize>,
    pub span_end: Option<usize>,
}

impl NewSource {
    pub fn build(self) -> Source {
        Source {
            id: Uuid::new_v4().to_string(),
            edge_id: self.edge_id,
            paper_id: self.paper_id,
            page_number: self.page_number,
            section: self.section,
            chunk_index: self.chunk_index,
            extracted_text: self.extracted_text,
            span_start: self.span_start,
            span_end: self.span_end,
            created_at: Utc::now(),
        }
    }
}

/// Writes staged for one chunk: nodes first, then edges, then sources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub sources: Vec<Source>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty() && self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_derives_normalized_name() {
        let node = NewNode::new(NodeType::Method, "  3D  Gaussian Splatting ")
            .owned_by("p1")
            .build();
        assert_eq!(node.name, "3D  Gaussian Splatting");
        assert_eq!(node.normalized_name, "3d gaussian splatting");
        assert_eq!(node.paper_id.as_deref(), Some("p1"));
        assert!(Uuid::parse_str(&node.id).is_ok());
    }

    #[test]
    fn new_edge_clamps_confidence() {
        let edge = NewEdge {
            source_id: "a".into(),
            target_id: "b".into(),
            edge_type: EdgeType::Uses,
            confidence: 3.0,
            properties: None,
        }
        .build();
        assert_eq!(edge.confidence, 1.0);
    }
}
