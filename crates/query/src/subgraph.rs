use anyhow::Result;
use extract::EdgeType;
use index::{Edge, GraphStore, Node};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Upper bound on traversal depth.
pub const MAX_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subgraph {
    pub center: Node,
    pub depth: usize,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// Undirected breadth-first expansion around a seed node.
#[derive(Clone)]
pub struct SubgraphEngine {
    store: Arc<dyn GraphStore>,
}

impl SubgraphEngine {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Nodes and edges within `depth` hops of `seed_id`, depth clamped to
    /// [`MAX_DEPTH`]. `None` when the seed does not exist. Issues at most
    /// `depth` edge fetches.
    pub async fn expand(&self, seed_id: &str, depth: usize) -> Result<Option<Subgraph>> {
        let Some(center) = self.store.get_node(seed_id).await? else {
            return Ok(None);
        };
        let depth = depth.min(MAX_DEPTH);

        let mut visited: HashSet<String> = HashSet::from([center.id.clone()]);
        let mut order: Vec<String> = vec![center.id.clone()];
        let mut frontier: Vec<String> = vec![center.id.clone()];
        let mut seen_edges: HashSet<(String, String, EdgeType)> = HashSet::new();
        let mut edges = Vec::new();

        for level in 0..depth {
            if frontier.is_empty() {
                break;
            }

            let touching = self.store.edges_touching(&frontier).await?;
            let mut next = Vec::new();
            for edge in touching {
                let key = (edge.source_id.clone(), edge.target_id.clone(), edge.edge_type);
                if !seen_edges.insert(key) {
                    continue;
                }
                for endpoint in [&edge.source_id, &edge.target_id] {
                    if visited.insert(endpoint.clone()) {
                        order.push(endpoint.clone());
                        next.push(endpoint.clone());
                    }
                }
                edges.push(edge);
            }

            debug!(level, frontier = frontier.len(), discovered = next.len(), "Expanded subgraph level");
            frontier = next;
        }

        let mut by_id: HashMap<String, Node> = self
            .store
            .get_nodes(&order)
            .await?
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();
        let nodes = order.iter().filter_map(|id| by_id.remove(id)).collect();

        Ok(Some(Subgraph {
            center,
            depth,
            nodes,
            edges,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::NodeType;
    use index::{InMemoryGraphStore, NewEdge, NewNode, WriteBatch};

    struct Chain {
        store: Arc<InMemoryGraphStore>,
        ids: Vec<String>,
    }

    /// A -> B -> C -> D, plus an isolated node E.
    async fn chain() -> Chain {
        let store = Arc::new(InMemoryGraphStore::new());
        let nodes: Vec<Node> = ["A", "B", "C", "D", "E"]
            .into_iter()
            .map(|name| NewNode::new(NodeType::Method, name).build())
            .collect();
        let ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
        let edge = |from: usize, to: usize| {
            NewEdge {
                source_id: ids[from].clone(),
                target_id: ids[to].clone(),
                edge_type: EdgeType::Extends,
                confidence: 0.9,
                properties: None,
            }
            .build()
        };
        let edges = vec![edge(0, 1), edge(1, 2), edge(2, 3)];
        store
            .commit(WriteBatch {
                nodes,
                edges,
                sources: vec![],
            })
            .await
            .unwrap();
        Chain { store, ids }
    }

    fn names(subgraph: &Subgraph) -> Vec<&str> {
        subgraph.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    #[tokio::test]
    async fn depth_zero_is_the_seed_alone() {
        let chain = chain().await;
        let engine = SubgraphEngine::new(chain.store.clone());

        let sub = engine.expand(&chain.ids[1], 0).await.unwrap().unwrap();
        assert_eq!(names(&sub), vec!["B"]);
        assert!(sub.edges.is_empty());
    }

    #[tokio::test]
    async fn depth_two_from_chain_start() {
        let chain = chain().await;
        let engine = SubgraphEngine::new(chain.store.clone());

        let sub = engine.expand(&chain.ids[0], 2).await.unwrap().unwrap();
        assert_eq!(names(&sub), vec!["A", "B", "C"]);

        let pairs: Vec<(&str, &str)> = sub
            .edges
            .iter()
            .map(|e| (e.source_id.as_str(), e.target_id.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (chain.ids[0].as_str(), chain.ids[1].as_str()),
                (chain.ids[1].as_str(), chain.ids[2].as_str())
            ]
        );
    }

    #[tokio::test]
    async fn expansion_is_undirected() {
        let chain = chain().await;
        let engine = SubgraphEngine::new(chain.store.clone());

        let sub = engine.expand(&chain.ids[3], 1).await.unwrap().unwrap();
        assert_eq!(names(&sub), vec!["D", "C"]);
    }

    #[tokio::test]
    async fn deeper_traversals_are_supersets() {
        let chain = chain().await;
        let engine = SubgraphEngine::new(chain.store.clone());

        let mut previous: Option<Subgraph> = None;
        for depth in 0..=MAX_DEPTH {
            let sub = engine.expand(&chain.ids[0], depth).await.unwrap().unwrap();
            if let Some(prev) = &previous {
                assert!(prev.nodes.iter().all(|n| sub.nodes.contains(n)));
                assert!(prev.edges.iter().all(|e| sub.edges.contains(e)));
            }
            previous = Some(sub);
        }
        assert_eq!(previous.unwrap().nodes.len(), 4);
    }

    #[tokio::test]
    async fn depth_is_clamped_and_isolated_seed_survives() {
        let chain = chain().await;
        let engine = SubgraphEngine::new(chain.store.clone());

        let sub = engine.expand(&chain.ids[4], 50).await.unwrap().unwrap();
        assert_eq!(sub.depth, MAX_DEPTH);
        assert_eq!(names(&sub), vec!["E"]);

        assert!(engine.expand("missing", 1).await.unwrap().is_none());
    }
}
