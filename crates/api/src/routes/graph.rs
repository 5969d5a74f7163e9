use axum::Json;
use axum::extract::{Path, Query, State};
use extract::{EdgeType, NodeType};
use index::{Edge, EdgeFilter, GraphStats, Node, NodeFilter, Page};
use query::{DatasetUsage, NodeDetail, Provenance, Subgraph};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use super::papers::Pagination;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_SUBGRAPH_DEPTH: usize = 1;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeQuery {
    #[serde(rename = "type")]
    node_type: Option<String>,
    search: Option<String>,
    paper_id: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeQuery {
    #[serde(rename = "type")]
    edge_type: Option<String>,
    node_id: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubgraphQuery {
    node_id: Option<String>,
    depth: Option<usize>,
}

#[derive(Deserialize)]
pub struct NameQuery {
    name: Option<String>,
}

#[derive(Deserialize)]
pub struct RelatedQuery {
    name: Option<String>,
    #[serde(rename = "type")]
    edge_type: Option<String>,
}

#[derive(Serialize)]
pub struct NodeList {
    nodes: Vec<Node>,
    pagination: Pagination,
}

#[derive(Serialize)]
pub struct EdgeList {
    edges: Vec<Edge>,
    pagination: Pagination,
}

pub async fn list_nodes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NodeQuery>,
) -> ApiResult<Json<NodeList>> {
    let filter = NodeFilter {
        node_type: parse_kind::<NodeType>(query.node_type.as_deref())?,
        search: query.search.filter(|s| !s.trim().is_empty()),
        paper_id: query.paper_id,
    };
    let page = Page::from_query(query.limit, query.offset);
    let nodes = state.store.list_nodes(&filter, page).await?;
    Ok(Json(NodeList {
        nodes,
        pagination: page.into(),
    }))
}

pub async fn get_node(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<NodeDetail>> {
    state
        .queries
        .node_detail(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Node not found".to_string()))
}

pub async fn list_edges(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EdgeQuery>,
) -> ApiResult<Json<EdgeList>> {
    let filter = EdgeFilter {
        edge_type: parse_kind::<EdgeType>(query.edge_type.as_deref())?,
        node_id: query.node_id,
    };
    let page = Page::from_query(query.limit, query.offset);
    let edges = state.store.list_edges(&filter, page).await?;
    Ok(Json(EdgeList {
        edges,
        pagination: page.into(),
    }))
}

pub async fn subgraph(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SubgraphQuery>,
) -> ApiResult<Json<Subgraph>> {
    let node_id = query
        .node_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("nodeId is required".to_string()))?;
    let depth = query.depth.unwrap_or(DEFAULT_SUBGRAPH_DEPTH);

    state
        .subgraph
        .expand(&node_id, depth)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Node not found".to_string()))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<GraphStats>> {
    Ok(Json(state.queries.stats().await?))
}

pub async fn provenance(
    State(state): State<Arc<AppState>>,
    Path(edge_id): Path<String>,
) -> ApiResult<Json<Provenance>> {
    state
        .queries
        .provenance(&edge_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Edge not found".to_string()))
}

pub async fn relationships(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NameQuery>,
) -> ApiResult<Json<Vec<NodeDetail>>> {
    let name = required_name(query.name)?;
    Ok(Json(state.queries.relationships_of(&name).await?))
}

pub async fn datasets(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<DatasetUsage>>> {
    Ok(Json(state.queries.datasets().await?))
}

pub async fn related(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RelatedQuery>,
) -> ApiResult<Json<Vec<Node>>> {
    let name = required_name(query.name)?;
    let edge_type = parse_kind::<EdgeType>(query.edge_type.as_deref())?.unwrap_or(EdgeType::Extends);
    Ok(Json(state.queries.related_by(&name, edge_type).await?))
}

fn required_name(name: Option<String>) -> ApiResult<String> {
    name.filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("name is required".to_string()))
}

fn parse_kind<T>(raw: Option<&str>) -> ApiResult<Option<T>>
where
    T: FromStr<Err = anyhow::Error>,
{
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|e: anyhow::Error| ApiError::BadRequest(e.to_string())),
        None => Ok(None),
    }
}
