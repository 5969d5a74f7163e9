pub mod memory;
pub mod model;
pub mod mutator;
pub mod neo4j_index;
pub mod store;

pub use memory::InMemoryGraphStore;
pub use model::{
    CountSummary, Edge, EdgeFilter, GraphStats, NewPaper, Node, NodeFilter, Page, Paper, PaperCounts,
    ProcessingStatus, ProvenanceCleanup, Source, TypeCount,
};
pub use mutator::{ChunkMutation, ChunkOrigin, GraphMutator, ResolutionCache};
pub use neo4j_index::Neo4jGraphStore;
pub use store::{GraphStore, NewEdge, NewNode, NewSource, WriteBatch};
