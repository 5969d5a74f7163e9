use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use extract::{EdgeType, NodeType};
use neo4rs::{BoltNull, BoltType, Graph, Query, Row, query};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{
    Edge, EdgeFilter, NewPaper, Node, NodeFilter, Page, Paper, PaperCounts, ProcessingStatus, ProvenanceCleanup, Source,
    TypeCount,
};
use crate::store::{GraphStore, NewNode, WriteBatch};

const PAPER_COLUMNS: &str = "p.id AS id, p.title AS title, p.abstract AS abstract, p.arxiv_id AS arxiv_id, \
     p.doi AS doi, p.pdf_url AS pdf_url, p.publication_date AS publication_date, p.venue AS venue, \
     p.raw_text AS raw_text, p.page_count AS page_count, p.processed AS processed, p.status AS status, \
     p.progress AS progress, p.error AS error, p.created_at AS created_at, p.updated_at AS updated_at";

const NODE_COLUMNS: &str = "n.id AS id, n.type AS type, n.name AS name, n.normalized_name AS normalized_name, \
     n.description AS description, n.paper_id AS paper_id, n.properties AS properties, n.created_at AS created_at";

const EDGE_COLUMNS: &str = "r.id AS id, s.id AS source_id, t.id AS target_id, r.type AS type, \
     r.confidence AS confidence, r.properties AS properties, r.created_at AS created_at";

const SOURCE_COLUMNS: &str = "src.id AS id, src.edge_id AS edge_id, src.paper_id AS paper_id, \
     src.page_number AS page_number, src.section AS section, src.chunk_index AS chunk_index, \
     src.extracted_text AS extracted_text, src.span_start AS span_start, src.span_end AS span_end, \
     src.created_at AS created_at";

/// Graph store on Neo4j: `:Paper`, `:Node` and `:Source` vertices, `[:EDGE]`
/// relationships between nodes. JSON properties are stored as strings.
pub struct Neo4jGraphStore {
    graph: Graph,
}

impl Neo4jGraphStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password)
            .await
            .context(format!("Failed to connect to Neo4j at {uri}"))?;
        Ok(Self::new(graph))
    }

    /// Initialize schema: id constraints and lookup indexes.
    pub async fn init_schema(&self) -> Result<()> {
        info!("Creating Neo4j constraints and indexes");

        let statements = [
            "CREATE CONSTRAINT paper_id_unique IF NOT EXISTS FOR (p:Paper) REQUIRE p.id IS UNIQUE",
            "CREATE CONSTRAINT node_id_unique IF NOT EXISTS FOR (n:Node) REQUIRE n.id IS UNIQUE",
            "CREATE CONSTRAINT source_id_unique IF NOT EXISTS FOR (s:Source) REQUIRE s.id IS UNIQUE",
            "CREATE INDEX paper_arxiv_id_index IF NOT EXISTS FOR (p:Paper) ON (p.arxiv_id)",
            "CREATE INDEX node_normalized_name_index IF NOT EXISTS FOR (n:Node) ON (n.normalized_name)",
            "CREATE INDEX node_paper_id_index IF NOT EXISTS FOR (n:Node) ON (n.paper_id)",
            "CREATE INDEX source_edge_id_index IF NOT EXISTS FOR (s:Source) ON (s.edge_id)",
        ];
        for statement in statements {
            self.graph
                .run(query(statement))
                .await
                .context(format!("Failed to run schema statement: {statement}"))?;
        }

        info!("Neo4j schema ready");
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        self.graph.run(query("RETURN 1")).await.context("Neo4j ping failed")?;
        Ok(())
    }

    async fn fetch<T>(&self, q: Query, decode: fn(&Row) -> Result<T>) -> Result<Vec<T>> {
        let mut rows = self.graph.execute(q).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(decode(&row)?);
        }
        Ok(out)
    }

    async fn fetch_count(&self, q: Query) -> Result<usize> {
        let mut rows = self.graph.execute(q).await?;
        let count = if let Some(row) = rows.next().await? {
            row.get::<i64>("count").unwrap_or(0) as usize
        } else {
            0
        };
        Ok(count)
    }

    async fn paper_exists(&self, id: &str) -> Result<()> {
        let count = self
            .fetch_count(query("MATCH (p:Paper {id: $id}) RETURN count(p) AS count").param("id", id))
            .await?;
        if count == 0 {
            bail!("Paper not found: {id}");
        }
        Ok(())
    }
}

fn nullable<T: Into<BoltType>>(value: Option<T>) -> BoltType {
    value.map(Into::into).unwrap_or(BoltType::Null(BoltNull))
}

fn nullable_count(value: Option<usize>) -> BoltType {
    nullable(value.map(|v| v as i64))
}

fn json_text(value: &Option<serde_json::Value>) -> BoltType {
    nullable(value.as_ref().map(|v| v.to_string()))
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn opt_string(row: &Row, key: &str) -> Option<String> {
    row.get::<Option<String>>(key).unwrap_or_default()
}

fn opt_count(row: &Row, key: &str) -> Option<usize> {
    row.get::<Option<i64>>(key)
        .unwrap_or_default()
        .and_then(|v| usize::try_from(v).ok())
}

fn timestamp(row: &Row, key: &str) -> DateTime<Utc> {
    opt_string(row, key)
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

fn json_property(row: &Row, key: &str) -> Option<serde_json::Value> {
    opt_string(row, key).and_then(|s| serde_json::from_str(&s).ok())
}

fn paper_from_row(row: &Row) -> Result<Paper> {
    let status = opt_string(row, "status")
        .and_then(|s| ProcessingStatus::from_str(&s).ok())
        .unwrap_or_default();
    Ok(Paper {
        id: row.get("id")?,
        title: row.get("title")?,
        abstract_text: opt_string(row, "abstract"),
        arxiv_id: opt_string(row, "arxiv_id"),
        doi: opt_string(row, "doi"),
        pdf_url: opt_string(row, "pdf_url"),
        publication_date: opt_string(row, "publication_date").and_then(|d| NaiveDate::from_str(&d).ok()),
        venue: opt_string(row, "venue"),
        raw_text: opt_string(row, "raw_text"),
        page_count: opt_count(row, "page_count"),
        processed: row.get::<bool>("processed").unwrap_or(false),
        status,
        progress: row.get::<i64>("progress").unwrap_or(0).clamp(0, 100) as u8,
        error: opt_string(row, "error"),
        created_at: timestamp(row, "created_at"),
        updated_at: timestamp(row, "updated_at"),
    })
}

fn node_from_row(row: &Row) -> Result<Node> {
    let raw_type: String = row.get("type")?;
    Ok(Node {
        id: row.get("id")?,
        node_type: NodeType::from_str(&raw_type)?,
        name: row.get("name")?,
        normalized_name: row.get("normalized_name").unwrap_or_default(),
        description: opt_string(row, "description"),
        paper_id: opt_string(row, "paper_id"),
        properties: json_property(row, "properties"),
        created_at: timestamp(row, "created_at"),
    })
}

fn edge_from_row(row: &Row) -> Result<Edge> {
    let raw_type: String = row.get("type")?;
    Ok(Edge {
        id: row.get("id")?,
        source_id: row.get("source_id")?,
        target_id: row.get("target_id")?,
        edge_type: EdgeType::from_str(&raw_type)?,
        confidence: row.get::<f64>("confidence").unwrap_or(0.0),
        properties: json_property(row, "properties"),
        created_at: timestamp(row, "created_at"),
    })
}

fn source_from_row(row: &Row) -> Result<Source> {
    Ok(Source {
        id: row.get("id")?,
        edge_id: row.get("edge_id")?,
        paper_id: row.get("paper_id")?,
        page_number: opt_count(row, "page_number"),
        section: opt_string(row, "section"),
        chunk_index: opt_count(row, "chunk_index"),
        extracted_text: row.get("extracted_text").unwrap_or_default(),
        span_start: opt_count(row, "span_start"),
        span_end: opt_count(row, "span_end"),
        created_at: timestamp(row, "created_at"),
    })
}

fn create_node_query(node: &Node) -> Query {
    query(
        "CREATE (n:Node {id: $id, type: $type, name: $name, normalized_name: $normalized_name, \
         description: $description, paper_id: $paper_id, properties: $properties, created_at: $created_at})",
    )
    .param("id", node.id.clone())
    .param("type", node.node_type.as_str())
    .param("name", node.name.clone())
    .param("normalized_name", node.normalized_name.clone())
    .param("description", nullable(node.description.clone()))
    .param("paper_id", nullable(node.paper_id.clone()))
    .param("properties", json_text(&node.properties))
    .param("created_at", node.created_at.to_rfc3339())
}

fn create_edge_query(edge: &Edge) -> Query {
    query(
        "OPTIONAL MATCH (s:Node {id: $source_id}) OPTIONAL MATCH (t:Node {id: $target_id}) \
         CREATE (s)-[:EDGE {id: $id, type: $type, confidence: $confidence, properties: $properties, created_at: $created_at}]->(t)",
    )
    .param("id", edge.id.clone())
    .param("source_id", edge.source_id.clone())
    .param("target_id", edge.target_id.clone())
    .param("type", edge.edge_type.as_str())
    .param("confidence", edge.confidence)
    .param("properties", json_text(&edge.properties))
    .param("created_at", edge.created_at.to_rfc3339())
}

/// Edge endpoints that are not created by the batch itself.
fn external_endpoints(batch: &WriteBatch) -> Vec<String> {
    let local: HashSet<&str> = batch.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut ids: Vec<String> = batch
        .edges
        .iter()
        .flat_map(|e| [e.source_id.as_str(), e.target_id.as_str()])
        .filter(|id| !local.contains(id))
        .map(str::to_string)
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

/// First edge with an endpoint in neither the batch nor `stored`.
fn dangling_edge<'a>(batch: &'a WriteBatch, stored: &HashSet<String>) -> Option<&'a Edge> {
    let local: HashSet<&str> = batch.nodes.iter().map(|n| n.id.as_str()).collect();
    let known = |id: &str| local.contains(id) || stored.contains(id);
    batch
        .edges
        .iter()
        .find(|e| !known(&e.source_id) || !known(&e.target_id))
}

fn create_source_query(source: &Source) -> Query {
    query(
        "CREATE (:Source {id: $id, edge_id: $edge_id, paper_id: $paper_id, page_number: $page_number, \
         section: $section, chunk_index: $chunk_index, extracted_text: $extracted_text, \
         span_start: $span_start, span_end: $span_end, created_at: $created_at})",
    )
    .param("id", source.id.clone())
    .param("edge_id", source.edge_id.clone())
    .param("paper_id", source.paper_id.clone())
    .param("page_number", nullable_count(source.page_number))
    .param("section", nullable(source.section.clone()))
    .param("chunk_index", nullable_count(source.chunk_index))
    .param("extracted_text", source.extracted_text.clone())
    .param("span_start", nullable_count(source.span_start))
    .param("span_end", nullable_count(source.span_end))
    .param("created_at", source.created_at.to_rfc3339())
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn create_paper(&self, paper: NewPaper) -> Result<Paper> {
        if let Some(arxiv_id) = &paper.arxiv_id {
            if self.find_paper_by_arxiv_id(arxiv_id).await?.is_some() {
                bail!("Paper with arXiv id {arxiv_id} already exists");
            }
        }

        let id = Uuid::new_v4().to_string();
        let created_at = now();
        let q = query(&format!(
            "CREATE (p:Paper {{id: $id, title: $title, abstract: $abstract, arxiv_id: $arxiv_id, doi: $doi, \
             pdf_url: $pdf_url, publication_date: $publication_date, venue: $venue, raw_text: $raw_text, \
             processed: false, status: 'pending', progress: 0, created_at: $now, updated_at: $now}}) \
             RETURN {PAPER_COLUMNS}"
        ))
        .param("id", id.clone())
        .param("title", paper.title)
        .param("abstract", nullable(paper.abstract_text))
        .param("arxiv_id", nullable(paper.arxiv_id))
        .param("doi", nullable(paper.doi))
        .param("pdf_url", nullable(paper.pdf_url))
        .param("publication_date", nullable(paper.publication_date.map(|d| d.to_string())))
        .param("venue", nullable(paper.venue))
        .param("raw_text", nullable(paper.raw_text))
        .param("now", created_at);

        self.fetch(q, paper_from_row)
            .await
            .context("Failed to create paper")?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Paper {id} was not returned after creation"))
    }

    async fn get_paper(&self, id: &str) -> Result<Option<Paper>> {
        let q = query(&format!("MATCH (p:Paper {{id: $id}}) RETURN {PAPER_COLUMNS}")).param("id", id);
        Ok(self.fetch(q, paper_from_row).await?.pop())
    }

    async fn find_paper_by_arxiv_id(&self, arxiv_id: &str) -> Result<Option<Paper>> {
        let q = query(&format!(
            "MATCH (p:Paper {{arxiv_id: $arxiv_id}}) RETURN {PAPER_COLUMNS} LIMIT 1"
        ))
        .param("arxiv_id", arxiv_id);
        Ok(self.fetch(q, paper_from_row).await?.pop())
    }

    async fn list_papers(&self, page: Page) -> Result<Vec<Paper>> {
        let q = query(&format!(
            "MATCH (p:Paper) RETURN {PAPER_COLUMNS} ORDER BY p.created_at DESC SKIP $offset LIMIT $limit"
        ))
        .param("offset", page.offset as i64)
        .param("limit", page.limit as i64);
        self.fetch(q, paper_from_row).await
    }

    async fn set_paper_text(&self, id: &str, text: &str, page_count: usize) -> Result<()> {
        self.paper_exists(id).await?;
        let q = query(
            "MATCH (p:Paper {id: $id}) SET p.raw_text = $text, p.page_count = $page_count, p.updated_at = $now",
        )
        .param("id", id)
        .param("text", text)
        .param("page_count", page_count as i64)
        .param("now", now());
        self.graph.run(q).await.context("Failed to store paper text")?;
        Ok(())
    }

    async fn update_paper_status(
        &self,
        id: &str,
        status: ProcessingStatus,
        progress: u8,
        error: Option<&str>,
    ) -> Result<()> {
        self.paper_exists(id).await?;
        let q = query(
            "MATCH (p:Paper {id: $id}) SET p.status = $status, p.progress = $progress, p.error = $error, p.updated_at = $now",
        )
        .param("id", id)
        .param("status", status.as_str())
        .param("progress", i64::from(progress.min(100)))
        .param("error", nullable(error))
        .param("now", now());
        self.graph.run(q).await.context("Failed to update paper status")?;
        Ok(())
    }

    async fn mark_paper_processed(&self, id: &str) -> Result<()> {
        self.paper_exists(id).await?;
        let q = query(
            "MATCH (p:Paper {id: $id}) SET p.processed = true, p.status = 'completed', p.progress = 100, \
             p.error = null, p.updated_at = $now",
        )
        .param("id", id)
        .param("now", now());
        self.graph.run(q).await.context("Failed to mark paper processed")?;
        Ok(())
    }

    async fn reset_paper(&self, id: &str) -> Result<()> {
        self.paper_exists(id).await?;
        let q = query(
            "MATCH (p:Paper {id: $id}) SET p.processed = false, p.status = 'pending', p.progress = 0, \
             p.error = null, p.updated_at = $now",
        )
        .param("id", id)
        .param("now", now());
        self.graph.run(q).await.context("Failed to reset paper")?;
        Ok(())
    }

    async fn count_papers(&self) -> Result<PaperCounts> {
        let total = self
            .fetch_count(query("MATCH (p:Paper) RETURN count(p) AS count"))
            .await?;
        let processed = self
            .fetch_count(query("MATCH (p:Paper) WHERE p.processed = true RETURN count(p) AS count"))
            .await?;
        Ok(PaperCounts { total, processed })
    }

    async fn create_node(&self, node: NewNode) -> Result<Node> {
        let node = node.build();
        self.graph
            .run(create_node_query(&node))
            .await
            .context("Failed to create node")?;
        Ok(node)
    }

    async fn get_node(&self, id: &str) -> Result<Option<Node>> {
        let q = query(&format!("MATCH (n:Node {{id: $id}}) RETURN {NODE_COLUMNS}")).param("id", id);
        Ok(self.fetch(q, node_from_row).await?.pop())
    }

    async fn get_nodes(&self, ids: &[String]) -> Result<Vec<Node>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let q = query(&format!(
            "MATCH (n:Node) WHERE n.id IN $ids RETURN {NODE_COLUMNS} ORDER BY n.created_at"
        ))
        .param("ids", ids.to_vec());
        self.fetch(q, node_from_row).await
    }

    async fn find_node_by_normalized_name(&self, normalized_name: &str) -> Result<Option<Node>> {
        let q = query(&format!(
            "MATCH (n:Node {{normalized_name: $name}}) RETURN {NODE_COLUMNS} ORDER BY n.created_at LIMIT 1"
        ))
        .param("name", normalized_name);
        Ok(self.fetch(q, node_from_row).await?.pop())
    }

    async fn list_nodes(&self, filter: &NodeFilter, page: Page) -> Result<Vec<Node>> {
        let q = query(&format!(
            "MATCH (n:Node) \
             WHERE ($type IS NULL OR n.type = $type) \
               AND ($search IS NULL OR toLower(n.name) CONTAINS toLower($search)) \
               AND ($paper_id IS NULL OR n.paper_id = $paper_id) \
             RETURN {NODE_COLUMNS} ORDER BY n.created_at SKIP $offset LIMIT $limit"
        ))
        .param("type", nullable(filter.node_type.map(|t| t.as_str())))
        .param("search", nullable(filter.search.clone()))
        .param("paper_id", nullable(filter.paper_id.clone()))
        .param("offset", page.offset as i64)
        .param("limit", page.limit as i64);
        self.fetch(q, node_from_row).await
    }

    async fn nodes_owned_by(&self, paper_id: &str) -> Result<Vec<Node>> {
        let q = query(&format!(
            "MATCH (n:Node {{paper_id: $paper_id}}) RETURN {NODE_COLUMNS} ORDER BY n.created_at"
        ))
        .param("paper_id", paper_id);
        self.fetch(q, node_from_row).await
    }

    async fn delete_nodes(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        // Plain DELETE: fails if edges still reference the nodes.
        let q = query("MATCH (n:Node) WHERE n.id IN $ids DELETE n RETURN count(*) AS count")
            .param("ids", ids.to_vec());
        self.fetch_count(q).await.context("Failed to delete nodes")
    }

    async fn count_nodes_by_type(&self) -> Result<Vec<TypeCount<NodeType>>> {
        let q = query("MATCH (n:Node) RETURN n.type AS type, count(n) AS count ORDER BY type");
        let rows = self
            .fetch(q, |row| {
                Ok((row.get::<String>("type")?, row.get::<i64>("count").unwrap_or(0)))
            })
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(kind, count)| match NodeType::from_str(&kind) {
                Ok(kind) => Some(TypeCount { kind, count: count as usize }),
                Err(_) => {
                    warn!(kind = %kind, "Skipping unknown node type");
                    None
                }
            })
            .collect())
    }

    async fn get_edge(&self, id: &str) -> Result<Option<Edge>> {
        let q = query(&format!(
            "MATCH (s:Node)-[r:EDGE {{id: $id}}]->(t:Node) RETURN {EDGE_COLUMNS}"
        ))
        .param("id", id);
        Ok(self.fetch(q, edge_from_row).await?.pop())
    }

    async fn list_edges(&self, filter: &EdgeFilter, page: Page) -> Result<Vec<Edge>> {
        let q = query(&format!(
            "MATCH (s:Node)-[r:EDGE]->(t:Node) \
             WHERE ($type IS NULL OR r.type = $type) \
               AND ($node_id IS NULL OR s.id = $node_id OR t.id = $node_id) \
             RETURN {EDGE_COLUMNS} ORDER BY r.created_at SKIP $offset LIMIT $limit"
        ))
        .param("type", nullable(filter.edge_type.map(|t| t.as_str())))
        .param("node_id", nullable(filter.node_id.clone()))
        .param("offset", page.offset as i64)
        .param("limit", page.limit as i64);
        self.fetch(q, edge_from_row).await
    }

    async fn edges_touching(&self, node_ids: &[String]) -> Result<Vec<Edge>> {
        if node_ids.is_empty() {
            return Ok(Vec::new());
        }
        let q = query(&format!(
            "MATCH (s:Node)-[r:EDGE]->(t:Node) WHERE s.id IN $ids OR t.id IN $ids \
             RETURN {EDGE_COLUMNS} ORDER BY r.created_at"
        ))
        .param("ids", node_ids.to_vec());
        self.fetch(q, edge_from_row).await
    }

    async fn delete_edges_touching(&self, node_ids: &[String]) -> Result<usize> {
        let edge_ids: Vec<String> = self
            .edges_touching(node_ids)
            .await?
            .into_iter()
            .map(|e| e.id)
            .collect();
        if edge_ids.is_empty() {
            return Ok(0);
        }

        let mut txn = self.graph.start_txn().await?;
        txn.run_queries(vec![
            query("MATCH (src:Source) WHERE src.edge_id IN $ids DELETE src").param("ids", edge_ids.clone()),
            query("MATCH ()-[r:EDGE]->() WHERE r.id IN $ids DELETE r").param("ids", edge_ids.clone()),
        ])
        .await
        .context("Failed to delete edges")?;
        txn.commit().await?;

        Ok(edge_ids.len())
    }

    async fn count_edges_by_type(&self) -> Result<Vec<TypeCount<EdgeType>>> {
        let q = query("MATCH ()-[r:EDGE]->() RETURN r.type AS type, count(r) AS count ORDER BY type");
        let rows = self
            .fetch(q, |row| {
                Ok((row.get::<String>("type")?, row.get::<i64>("count").unwrap_or(0)))
            })
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(kind, count)| {
                EdgeType::parse(&kind).map(|kind| TypeCount {
                    kind,
                    count: count as usize,
                })
            })
            .collect())
    }

    async fn sources_for_edge(&self, edge_id: &str) -> Result<Vec<Source>> {
        let q = query(&format!(
            "MATCH (src:Source {{edge_id: $edge_id}}) RETURN {SOURCE_COLUMNS} ORDER BY src.created_at"
        ))
        .param("edge_id", edge_id);
        self.fetch(q, source_from_row).await
    }

    async fn delete_sources_for_paper(&self, paper_id: &str) -> Result<ProvenanceCleanup> {
        let touched = self
            .fetch(
                query("MATCH (src:Source {paper_id: $paper_id}) RETURN DISTINCT src.edge_id AS edge_id")
                    .param("paper_id", paper_id),
                |row| Ok(row.get::<String>("edge_id")?),
            )
            .await?;

        let q = query("MATCH (src:Source {paper_id: $paper_id}) DELETE src RETURN count(*) AS count")
            .param("paper_id", paper_id);
        let sources = self.fetch_count(q).await.context("Failed to delete sources")?;

        let orphaned_edges = if touched.is_empty() {
            0
        } else {
            let q = query(
                "MATCH ()-[r:EDGE]->() WHERE r.id IN $ids \
                 OPTIONAL MATCH (other:Source {edge_id: r.id}) \
                 WITH r, count(other) AS remaining WHERE remaining = 0 \
                 DELETE r RETURN count(*) AS count",
            )
            .param("ids", touched);
            self.fetch_count(q).await.context("Failed to delete unsourced edges")?
        };

        Ok(ProvenanceCleanup { sources, orphaned_edges })
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let external = external_endpoints(&batch);
        if !external.is_empty() {
            let q = query("MATCH (n:Node) WHERE n.id IN $ids RETURN n.id AS id").param("ids", external);
            let stored: HashSet<String> = self
                .fetch(q, |row| Ok(row.get::<String>("id")?))
                .await?
                .into_iter()
                .collect();
            if let Some(edge) = dangling_edge(&batch, &stored) {
                bail!("Edge {} references a missing node", edge.id);
            }
        }

        let queries: Vec<Query> = batch
            .nodes
            .iter()
            .map(create_node_query)
            .chain(batch.edges.iter().map(create_edge_query))
            .chain(batch.sources.iter().map(create_source_query))
            .collect();

        debug!(
            nodes = batch.nodes.len(),
            edges = batch.edges.len(),
            sources = batch.sources.len(),
            "Committing batch to Neo4j"
        );

        let mut txn = self.graph.start_txn().await?;
        txn.run_queries(queries)
            .await
            .context("Failed to apply write batch")?;
        txn.commit().await.context("Failed to commit write batch")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewEdge;

    fn edge(source: &Node, target_id: &str) -> Edge {
        NewEdge {
            source_id: source.id.clone(),
            target_id: target_id.into(),
            edge_type: EdgeType::Uses,
            confidence: 0.9,
            properties: None,
        }
        .build()
    }

    #[test]
    fn endpoints_outside_the_batch_are_checked() {
        let local = NewNode::new(NodeType::Method, "FastSplat").build();
        let batch = WriteBatch {
            edges: vec![edge(&local, "gs-1"), edge(&local, "gs-1"), edge(&local, &local.id)],
            nodes: vec![local],
            sources: vec![],
        };
        assert_eq!(external_endpoints(&batch), vec!["gs-1".to_string()]);

        assert_eq!(dangling_edge(&batch, &HashSet::new()).map(|e| e.id.as_str()), Some(batch.edges[0].id.as_str()));
        let stored: HashSet<String> = ["gs-1".to_string()].into();
        assert!(dangling_edge(&batch, &stored).is_none());
    }

    #[test]
    fn batch_local_edges_need_no_lookup() {
        let a = NewNode::new(NodeType::Method, "A").build();
        let b = NewNode::new(NodeType::Dataset, "B").build();
        let batch = WriteBatch {
            edges: vec![edge(&a, &b.id)],
            nodes: vec![a, b],
            sources: vec![],
        };
        assert!(external_endpoints(&batch).is_empty());
        assert!(dangling_edge(&batch, &HashSet::new()).is_none());
    }
}
