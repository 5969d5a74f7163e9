pub mod queries;
pub mod subgraph;

pub use queries::{DatasetUsage, EdgeView, GraphQueries, NodeDetail, Provenance};
pub use subgraph::{MAX_DEPTH, Subgraph, SubgraphEngine};
