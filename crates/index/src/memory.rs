use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use extract::{EdgeType, NodeType};
use std::collections::HashSet;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::model::{
    Edge, EdgeFilter, NewPaper, Node, NodeFilter, Page, Paper, PaperCounts, ProcessingStatus, ProvenanceCleanup, Source,
    TypeCount,
};
use crate::store::{GraphStore, NewNode, WriteBatch};

#[derive(Default)]
struct Tables {
    papers: Vec<Paper>,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    sources: Vec<Source>,
}

impl Tables {
    fn paper_mut(&mut self, id: &str) -> Result<&mut Paper> {
        match self.papers.iter_mut().find(|p| p.id == id) {
            Some(paper) => Ok(paper),
            None => bail!("Paper not found: {id}"),
        }
    }
}

/// Process-local graph store. Tables keep insertion order.
#[derive(Default)]
pub struct InMemoryGraphStore {
    tables: RwLock<Tables>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate<T: Clone>(items: impl Iterator<Item = T>, page: Page) -> Vec<T> {
    items.skip(page.offset).take(page.limit).collect()
}

fn count_by<T: Copy + PartialEq>(all: &[T], items: impl Iterator<Item = T>) -> Vec<TypeCount<T>> {
    let items: Vec<T> = items.collect();
    all.iter()
        .map(|kind| TypeCount {
            kind: *kind,
            count: items.iter().filter(|i| *i == kind).count(),
        })
        .filter(|c| c.count > 0)
        .collect()
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn create_paper(&self, paper: NewPaper) -> Result<Paper> {
        let mut tables = self.tables.write().await;
        if let Some(arxiv_id) = &paper.arxiv_id {
            if tables.papers.iter().any(|p| p.arxiv_id.as_ref() == Some(arxiv_id)) {
                bail!("Paper with arXiv id {arxiv_id} already exists");
            }
        }

        let now = Utc::now();
        let created = Paper {
            id: Uuid::new_v4().to_string(),
            title: paper.title,
            abstract_text: paper.abstract_text,
            arxiv_id: paper.arxiv_id,
            doi: paper.doi,
            pdf_url: paper.pdf_url,
            publication_date: paper.publication_date,
            venue: paper.venue,
            raw_text: paper.raw_text,
            page_count: None,
            processed: false,
            status: ProcessingStatus::Pending,
            progress: 0,
            error: None,
            created_at: now,
            updated_at: now,
        };
        tables.papers.push(created.clone());
        Ok(created)
    }

    async fn get_paper(&self, id: &str) -> Result<Option<Paper>> {
        let tables = self.tables.read().await;
        Ok(tables.papers.iter().find(|p| p.id == id).cloned())
    }

    async fn find_paper_by_arxiv_id(&self, arxiv_id: &str) -> Result<Option<Paper>> {
        let tables = self.tables.read().await;
        Ok(tables
            .papers
            .iter()
            .find(|p| p.arxiv_id.as_deref() == Some(arxiv_id))
            .cloned())
    }

    async fn list_papers(&self, page: Page) -> Result<Vec<Paper>> {
        let tables = self.tables.read().await;
        Ok(paginate(tables.papers.iter().rev().cloned(), page))
    }

    async fn set_paper_text(&self, id: &str, text: &str, page_count: usize) -> Result<()> {
        let mut tables = self.tables.write().await;
        let paper = tables.paper_mut(id)?;
        paper.raw_text = Some(text.to_string());
        paper.page_count = Some(page_count);
        paper.updated_at = Utc::now();
        Ok(())
    }

    async fn update_paper_status(
        &self,
        id: &str,
        status: ProcessingStatus,
        progress: u8,
        error: Option<&str>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let paper = tables.paper_mut(id)?;
        paper.status = status;
        paper.progress = progress.min(100);
        paper.error = error.map(String::from);
        paper.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_paper_processed(&self, id: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let paper = tables.paper_mut(id)?;
        paper.processed = true;
        paper.status = ProcessingStatus::Completed;
        paper.progress = 100;
        paper.error = None;
        paper.updated_at = Utc::now();
        Ok(())
    }

    async fn reset_paper(&self, id: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let paper = tables.paper_mut(id)?;
        paper.processed = false;
        paper.status = ProcessingStatus::Pending;
        paper.progress = 0;
        paper.error = None;
        paper.updated_at = Utc::now();
        Ok(())
    }

    async fn count_papers(&self) -> Result<PaperCounts> {
        let tables = self.tables.read().await;
        Ok(PaperCounts {
            total: tables.papers.len(),
            processed: tables.papers.iter().filter(|p| p.processed).count(),
        })
    }

    async fn create_node(&self, node: NewNode) -> Result<Node> {
        let node = node.build();
        self.tables.write().await.nodes.push(node.clone());
        Ok(node)
    }

    async fn get_node(&self, id: &str) -> Result<Option<Node>> {
        let tables = self.tables.read().await;
        Ok(tables.nodes.iter().find(|n| n.id == id).cloned())
    }

    async fn get_nodes(&self, ids: &[String]) -> Result<Vec<Node>> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let tables = self.tables.read().await;
        Ok(tables
            .nodes
            .iter()
            .filter(|n| wanted.contains(n.id.as_str()))
            .cloned()
            .collect())
    }

    async fn find_node_by_normalized_name(&self, normalized_name: &str) -> Result<Option<Node>> {
        let tables = self.tables.read().await;
        Ok(tables
            .nodes
            .iter()
            .find(|n| n.normalized_name == normalized_name)
            .cloned())
    }

    async fn list_nodes(&self, filter: &NodeFilter, page: Page) -> Result<Vec<Node>> {
        let tables = self.tables.read().await;
        Ok(paginate(
            tables.nodes.iter().filter(|n| filter.matches(n)).cloned(),
            page,
        ))
    }

    async fn nodes_owned_by(&self, paper_id: &str) -> Result<Vec<Node>> {
        let tables = self.tables.read().await;
        Ok(tables
            .nodes
            .iter()
            .filter(|n| n.paper_id.as_deref() == Some(paper_id))
            .cloned()
            .collect())
    }

    async fn delete_nodes(&self, ids: &[String]) -> Result<usize> {
        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut tables = self.tables.write().await;
        let before = tables.nodes.len();
        tables.nodes.retain(|n| !doomed.contains(n.id.as_str()));
        Ok(before - tables.nodes.len())
    }

    async fn count_nodes_by_type(&self) -> Result<Vec<TypeCount<NodeType>>> {
        let tables = self.tables.read().await;
        Ok(count_by(&NodeType::ALL, tables.nodes.iter().map(|n| n.node_type)))
    }

    async fn get_edge(&self, id: &str) -> Result<Option<Edge>> {
        let tables = self.tables.read().await;
        Ok(tables.edges.iter().find(|e| e.id == id).cloned())
    }

    async fn list_edges(&self, filter: &EdgeFilter, page: Page) -> Result<Vec<Edge>> {
        let tables = self.tables.read().await;
        Ok(paginate(
            tables.edges.iter().filter(|e| filter.matches(e)).cloned(),
            page,
        ))
    }

    async fn edges_touching(&self, node_ids: &[String]) -> Result<Vec<Edge>> {
        let ids: HashSet<&str> = node_ids.iter().map(String::as_str).collect();
        let tables = self.tables.read().await;
        Ok(tables
            .edges
            .iter()
            .filter(|e| ids.contains(e.source_id.as_str()) || ids.contains(e.target_id.as_str()))
            .cloned()
            .collect())
    }

    async fn delete_edges_touching(&self, node_ids: &[String]) -> Result<usize> {
        let ids: HashSet<&str> = node_ids.iter().map(String::as_str).collect();
        let mut tables = self.tables.write().await;

        let doomed: HashSet<String> = tables
            .edges
            .iter()
            .filter(|e| ids.contains(e.source_id.as_str()) || ids.contains(e.target_id.as_str()))
            .map(|e| e.id.clone())
            .collect();

        tables.sources.retain(|s| !doomed.contains(&s.edge_id));
        tables.edges.retain(|e| !doomed.contains(&e.id));
        Ok(doomed.len())
    }

    async fn count_edges_by_type(&self) -> Result<Vec<TypeCount<EdgeType>>> {
        let tables = self.tables.read().await;
        Ok(count_by(&EdgeType::ALL, tables.edges.iter().map(|e| e.edge_type)))
    }

    async fn sources_for_edge(&self, edge_id: &str) -> Result<Vec<Source>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sources
            .iter()
            .filter(|s| s.edge_id == edge_id)
            .cloned()
            .collect())
    }

    async fn delete_sources_for_paper(&self, paper_id: &str) -> Result<ProvenanceCleanup> {
        let mut tables = self.tables.write().await;
        let touched: HashSet<String> = tables
            .sources
            .iter()
            .filter(|s| s.paper_id == paper_id)
            .map(|s| s.edge_id.clone())
            .collect();

        let sources_before = tables.sources.len();
        tables.sources.retain(|s| s.paper_id != paper_id);
        let sources = sources_before - tables.sources.len();

        let still_sourced: HashSet<&str> = tables.sources.iter().map(|s| s.edge_id.as_str()).collect();
        let orphaned: HashSet<String> = touched
            .into_iter()
            .filter(|id| !still_sourced.contains(id.as_str()))
            .collect();

        let edges_before = tables.edges.len();
        tables.edges.retain(|e| !orphaned.contains(&e.id));
        Ok(ProvenanceCleanup {
            sources,
            orphaned_edges: edges_before - tables.edges.len(),
        })
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tables = self.tables.write().await;

        // Validate against the tables plus the batch before touching anything.
        let mut node_ids: HashSet<&str> = tables.nodes.iter().map(|n| n.id.as_str()).collect();
        node_ids.extend(batch.nodes.iter().map(|n| n.id.as_str()));
        for edge in &batch.edges {
            if !node_ids.contains(edge.source_id.as_str()) || !node_ids.contains(edge.target_id.as_str()) {
                bail!("Edge {} references a missing node", edge.id);
            }
        }
        let mut edge_ids: HashSet<&str> = tables.edges.iter().map(|e| e.id.as_str()).collect();
        edge_ids.extend(batch.edges.iter().map(|e| e.id.as_str()));
        for source in &batch.sources {
            if !edge_ids.contains(source.edge_id.as_str()) {
                bail!("Source {} references a missing edge", source.id);
            }
        }

        debug!(
            nodes = batch.nodes.len(),
            edges = batch.edges.len(),
            sources = batch.sources.len(),
            "Committing batch"
        );
        tables.nodes.extend(batch.nodes);
        tables.edges.extend(batch.edges);
        tables.sources.extend(batch.sources);
        Ok(())
    }
}
