pub mod error;
pub mod extractor;
pub mod json_repair;
pub mod llm;
pub mod normalizer;
pub mod prompt;
pub mod resolver;
pub mod schema;
pub mod scripted;
pub mod validator;

pub use error::{CompletionError, StageError};
pub use extractor::{ExtractionInput, ExtractionStage, StageOptions};
pub use llm::{CompletionCapability, OllamaClient, OllamaHealth};
pub use normalizer::{
    Containment, NameMatch, NameMatcher, NormalizedEditDistance, SimilarityStrategy, TokenOverlap,
    normalize_name,
};
pub use prompt::PromptKind;
pub use resolver::ResolutionStage;
pub use schema::{
    ConfidenceAdjustment, EdgeType, EntityMention, ExtractedRelationship, ExtractionOutput, KnownEntity,
    KnownRelationship, MentionType, NodeType, RejectedRelationship, ResolutionOutput, ResolvedEntity,
    ResolvedRelationship, ValidatedRelationship, ValidationContext, ValidationOutput, clamp_confidence,
};
pub use scripted::{RecordedCall, ScriptedCompletion};
pub use validator::{FALLBACK_EDGE_TYPE, ValidationStage};
