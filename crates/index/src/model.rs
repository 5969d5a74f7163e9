use chrono::{DateTime, NaiveDate, Utc};
use extract::{EdgeType, KnownEntity, KnownRelationship, NodeType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a paper is in the ingestion/processing lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    DownloadingPdf,
    ExtractingText,
    Chunking,
    ExtractingEntities,
    ResolvingEntities,
    Validating,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::DownloadingPdf => "downloading_pdf",
            ProcessingStatus::ExtractingText => "extracting_text",
            ProcessingStatus::Chunking => "chunking",
            ProcessingStatus::ExtractingEntities => "extracting_entities",
            ProcessingStatus::ResolvingEntities => "resolving_entities",
            ProcessingStatus::Validating => "validating",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| anyhow::anyhow!("unknown processing status: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paper {
    pub id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub arxiv_id: Option<String>,
    pub doi: Option<String>,
    pub pdf_url: Option<String>,
    pub publication_date: Option<NaiveDate>,
    pub venue: Option<String>,
    #[serde(skip_serializing)]
    pub raw_text: Option<String>,
    pub page_count: Option<usize>,
    pub processed: bool,
    pub status: ProcessingStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Paper {
    pub fn has_text(&self) -> bool {
        self.raw_text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// Fields a caller supplies when registering a paper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPaper {
    pub title: String,
    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub arxiv_id: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub pdf_url: Option<String>,
    #[serde(default)]
    pub publication_date: Option<NaiveDate>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub raw_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub name: String,
    pub normalized_name: String,
    pub description: Option<String>,
    /// Owning paper; unset for `paper` nodes discovered as references.
    pub paper_id: Option<String>,
    pub properties: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Node {
    pub fn summary(&self) -> KnownEntity {
        KnownEntity {
            id: self.id.clone(),
            name: self.name.clone(),
            entity_type: self.node_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    pub confidence: f64,
    pub properties: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Edge {
    pub fn touches(&self, node_id: &str) -> bool {
        self.source_id == node_id || self.target_id == node_id
    }

    pub fn summary(&self) -> KnownRelationship {
        KnownRelationship {
            source: self.source_id.clone(),
            target: self.target_id.clone(),
            edge_type: self.edge_type,
            confidence: self.confidence,
        }
    }
}

/// Provenance: the chunk text that justified an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: String,
    pub edge_id: String,
    pub paper_id: String,
    pub page_number: Option<usize>,
    pub section: Option<String>,
    pub chunk_index: Option<usize>,
    pub extracted_text: String,
    pub span_start: Option<usize>,
    pub span_end: Option<usize>,
    pub created_at: DateTime<Utc>,
}

/// What dropping one paper's provenance removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvenanceCleanup {
    pub sources: usize,
    /// Edges whose last source belonged to the paper.
    pub orphaned_edges: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeFilter {
    #[serde(default, rename = "type")]
    pub node_type: Option<NodeType>,
    /// Case-insensitive substring of the display name.
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub paper_id: Option<String>,
}

impl NodeFilter {
    pub fn matches(&self, node: &Node) -> bool {
        if self.node_type.is_some_and(|t| t != node.node_type) {
            return false;
        }
        if let Some(search) = self.search.as_deref().map(str::to_lowercase) {
            if !node.name.to_lowercase().contains(&search) {
                return false;
            }
        }
        if let Some(paper_id) = &self.paper_id {
            if node.paper_id.as_ref() != Some(paper_id) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeFilter {
    #[serde(default, rename = "type")]
    pub edge_type: Option<EdgeType>,
    #[serde(default)]
    pub node_id: Option<String>,
}

impl EdgeFilter {
    pub fn matches(&self, edge: &Edge) -> bool {
        self.edge_type.is_none_or(|t| t == edge.edge_type)
            && self.node_id.as_deref().is_none_or(|id| edge.touches(id))
    }
}

/// Limit/offset pagination, limit clamped to `1..=MAX_LIMIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Page {
    pub const DEFAULT_LIMIT: usize = 100;
    pub const MAX_LIMIT: usize = 500;

    pub fn new(limit: usize, offset: usize) -> Self {
        Self {
            limit: limit.clamp(1, Self::MAX_LIMIT),
            offset,
        }
    }

    pub fn from_query(limit: Option<usize>, offset: Option<usize>) -> Self {
        Self::new(limit.unwrap_or(Self::DEFAULT_LIMIT), offset.unwrap_or(0))
    }

    pub fn first(limit: usize) -> Self {
        Self::new(limit, 0)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LIMIT, 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeCount<T> {
    #[serde(rename = "type")]
    pub kind: T,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperCounts {
    pub total: usize,
    pub processed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountSummary<T> {
    pub total: usize,
    pub by_type: Vec<TypeCount<T>>,
}

impl<T> CountSummary<T> {
    pub fn new(by_type: Vec<TypeCount<T>>) -> Self {
        Self {
            total: by_type.iter().map(|c| c.count).sum(),
            by_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: CountSummary<NodeType>,
    pub edges: CountSummary<EdgeType>,
    pub papers: PaperCounts,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, node_type: NodeType, paper_id: Option<&str>) -> Node {
        Node {
            id: name.to_lowercase(),
            node_type,
            name: name.into(),
            normalized_name: name.to_lowercase(),
            description: None,
            paper_id: paper_id.map(String::from),
            properties: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [ProcessingStatus::DownloadingPdf, ProcessingStatus::Validating] {
            assert_eq!(status.as_str().parse::<ProcessingStatus>().unwrap(), status);
        }
        assert!("exploding".parse::<ProcessingStatus>().is_err());
        assert!(ProcessingStatus::Failed.is_terminal());
        assert!(!ProcessingStatus::Chunking.is_terminal());
    }

    #[test]
    fn page_limits_are_clamped() {
        assert_eq!(Page::from_query(None, None), Page { limit: 100, offset: 0 });
        assert_eq!(Page::new(0, 5).limit, 1);
        assert_eq!(Page::new(10_000, 0).limit, Page::MAX_LIMIT);
    }

    #[test]
    fn node_filter_combines_conditions() {
        let fast = node("FastSplat", NodeType::Method, Some("p1"));
        let filter = NodeFilter {
            node_type: Some(NodeType::Method),
            search: Some("splat".into()),
            paper_id: None,
        };
        assert!(filter.matches(&fast));
        assert!(!NodeFilter { node_type: Some(NodeType::Dataset), ..filter.clone() }.matches(&fast));
        assert!(!NodeFilter { paper_id: Some("p2".into()), ..filter }.matches(&fast));
    }

    #[test]
    fn paper_serializes_camel_case_without_text() {
        let now = Utc::now();
        let paper = Paper {
            id: "p1".into(),
            title: "FastSplat".into(),
            abstract_text: None,
            arxiv_id: Some("2401.00001".into()),
            doi: None,
            pdf_url: None,
            publication_date: NaiveDate::from_ymd_opt(2024, 1, 2),
            venue: None,
            raw_text: Some("secret full text".into()),
            page_count: None,
            processed: false,
            status: ProcessingStatus::ExtractingText,
            progress: 5,
            error: None,
            created_at: now,
            updated_at: now,
        };
        let value = serde_json::to_value(&paper).unwrap();
        assert_eq!(value["arxivId"], "2401.00001");
        assert_eq!(value["status"], "extracting_text");
        assert_eq!(value["publicationDate"], "2024-01-02");
        assert!(value.get("rawText").is_none());
    }
}
