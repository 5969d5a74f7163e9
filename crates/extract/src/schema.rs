use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::StageError;

/// Kinds of vertex in the knowledge graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    #[serde(alias = "paper_reference")]
    Paper,
    Method,
    Concept,
    Dataset,
    Metric,
}

impl NodeType {
    pub const ALL: [NodeType; 5] = [
        NodeType::Paper,
        NodeType::Method,
        NodeType::Concept,
        NodeType::Dataset,
        NodeType::Metric,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Paper => "paper",
            NodeType::Method => "method",
            NodeType::Concept => "concept",
            NodeType::Dataset => "dataset",
            NodeType::Metric => "metric",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match token(s).as_str() {
            "paper" | "paper_reference" => Ok(NodeType::Paper),
            "method" => Ok(NodeType::Method),
            "concept" => Ok(NodeType::Concept),
            "dataset" => Ok(NodeType::Dataset),
            "metric" => Ok(NodeType::Metric),
            other => anyhow::bail!("unknown node type: {other}"),
        }
    }
}

/// Relationship kinds the graph stores. Extraction never emits `cites` or
/// `authored_by`, but both are valid edge types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Extends,
    Improves,
    Uses,
    Introduces,
    Cites,
    EvaluatesOn,
    ComparesTo,
    AuthoredBy,
}

impl EdgeType {
    pub const ALL: [EdgeType; 8] = [
        EdgeType::Extends,
        EdgeType::Improves,
        EdgeType::Uses,
        EdgeType::Introduces,
        EdgeType::Cites,
        EdgeType::EvaluatesOn,
        EdgeType::ComparesTo,
        EdgeType::AuthoredBy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Extends => "extends",
            EdgeType::Improves => "improves",
            EdgeType::Uses => "uses",
            EdgeType::Introduces => "introduces",
            EdgeType::Cites => "cites",
            EdgeType::EvaluatesOn => "evaluates_on",
            EdgeType::ComparesTo => "compares_to",
            EdgeType::AuthoredBy => "authored_by",
        }
    }

    /// Accepts the canonical spelling with any case and space/hyphen separators.
    pub fn parse(s: &str) -> Option<EdgeType> {
        let t = token(s);
        EdgeType::ALL.into_iter().find(|e| e.as_str() == t)
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EdgeType::parse(s).ok_or_else(|| anyhow::anyhow!("unknown edge type: {s}"))
    }
}

fn token(s: &str) -> String {
    s.trim().to_lowercase().replace([' ', '-'], "_")
}

/// Entity categories the extraction prompt asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MentionType {
    Method,
    Concept,
    Dataset,
    Metric,
    #[serde(alias = "paper")]
    PaperReference,
}

impl MentionType {
    /// Paper references become `paper` nodes.
    pub fn node_type(&self) -> NodeType {
        match self {
            MentionType::Method => NodeType::Method,
            MentionType::Concept => NodeType::Concept,
            MentionType::Dataset => NodeType::Dataset,
            MentionType::Metric => NodeType::Metric,
            MentionType::PaperReference => NodeType::Paper,
        }
    }
}

pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn default_confidence() -> f64 {
    0.5
}

// Models emit numbers, numeric strings or nothing at all.
fn lenient_confidence<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(d)?;
    let raw = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => default_confidence(),
    };
    Ok(clamp_confidence(raw))
}

fn lenient_offset<'de, D: Deserializer<'de>>(d: D) -> Result<Option<usize>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(|v| v as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMention {
    #[serde(alias = "name", alias = "text")]
    pub mention: String,
    #[serde(rename = "type")]
    pub entity_type: MentionType,
    #[serde(default, alias = "span_start", deserialize_with = "lenient_offset")]
    pub span_start: Option<usize>,
    #[serde(default, alias = "span_end", deserialize_with = "lenient_offset")]
    pub span_end: Option<usize>,
    #[serde(default = "default_confidence", deserialize_with = "lenient_confidence")]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedRelationship {
    #[serde(alias = "source")]
    pub subject: String,
    #[serde(alias = "relation", alias = "type")]
    pub predicate: String,
    #[serde(alias = "target")]
    pub object: String,
    #[serde(
        default,
        alias = "evidence",
        alias = "evidence_text",
        deserialize_with = "lenient_string"
    )]
    pub evidence_text: String,
    #[serde(default = "default_confidence", deserialize_with = "lenient_confidence")]
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub entities: Vec<EntityMention>,
    pub relationships: Vec<ExtractedRelationship>,
}

impl ExtractionOutput {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }

    pub fn decode(value: &Value) -> Result<Self, StageError> {
        let object = expect_object("extraction", value, &["entities", "relationships", "relations"])?;
        let relationships = object
            .get("relationships")
            .or_else(|| object.get("relations"));

        Ok(Self {
            entities: decode_items("extraction", object.get("entities")),
            relationships: decode_items("extraction", relationships),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedEntity {
    #[serde(default, deserialize_with = "lenient_string")]
    pub mention: String,
    /// Existing node id as reported by the resolver; unverified until persisted.
    #[serde(default, alias = "canonical_id")]
    pub canonical_id: Option<String>,
    #[serde(alias = "canonical_name", alias = "name")]
    pub canonical_name: String,
    #[serde(rename = "type")]
    pub entity_type: NodeType,
    #[serde(default, alias = "is_new")]
    pub is_new: bool,
    #[serde(default = "default_confidence", deserialize_with = "lenient_confidence")]
    pub confidence: f64,
}

/// A relationship whose endpoints are canonical entity names. Ids are only
/// known once new entities have been written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRelationship {
    #[serde(alias = "source_name", alias = "source", alias = "subject")]
    pub source_name: String,
    #[serde(alias = "target_name", alias = "target", alias = "object")]
    pub target_name: String,
    #[serde(rename = "type", alias = "predicate", alias = "relationship_type")]
    pub relationship_type: String,
    #[serde(default = "default_confidence", deserialize_with = "lenient_confidence")]
    pub confidence: f64,
    #[serde(
        default,
        alias = "evidenceText",
        alias = "evidence_text",
        deserialize_with = "lenient_string"
    )]
    pub evidence: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionOutput {
    pub resolved_entities: Vec<ResolvedEntity>,
    pub resolved_relationships: Vec<ResolvedRelationship>,
}

impl ResolutionOutput {
    pub fn is_empty(&self) -> bool {
        self.resolved_entities.is_empty() && self.resolved_relationships.is_empty()
    }

    pub fn decode(value: &Value) -> Result<Self, StageError> {
        let object = expect_object(
            "resolution",
            value,
            &[
                "resolvedEntities",
                "resolved_entities",
                "resolvedRelationships",
                "resolved_relationships",
            ],
        )?;

        Ok(Self {
            resolved_entities: decode_items(
                "resolution",
                object
                    .get("resolvedEntities")
                    .or_else(|| object.get("resolved_entities")),
            ),
            resolved_relationships: decode_items(
                "resolution",
                object
                    .get("resolvedRelationships")
                    .or_else(|| object.get("resolved_relationships")),
            ),
        })
    }
}

/// A relationship that survived validation, with its type pinned to the enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedRelationship {
    pub source_name: String,
    pub target_name: String,
    pub edge_type: EdgeType,
    pub confidence: f64,
    pub evidence: String,
    /// The type string the model produced when it had to be coerced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRelationship {
    pub relationship: ResolvedRelationship,
    #[serde(default, deserialize_with = "lenient_string")]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceAdjustment {
    #[serde(default, alias = "relationship_id", deserialize_with = "lenient_string")]
    pub relationship_id: String,
    #[serde(alias = "original_confidence", deserialize_with = "lenient_confidence")]
    pub original_confidence: f64,
    #[serde(alias = "adjusted_confidence", deserialize_with = "lenient_confidence")]
    pub adjusted_confidence: f64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub reason: String,
}

/// Validator verdicts exactly as the model returned them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawValidation {
    pub accepted: Vec<ResolvedRelationship>,
    pub rejected: Vec<RejectedRelationship>,
    pub confidence_adjustments: Vec<ConfidenceAdjustment>,
}

impl RawValidation {
    pub fn decode(value: &Value) -> Result<Self, StageError> {
        let object = expect_object("validation", value, &["accepted", "rejected"])?;

        Ok(Self {
            accepted: decode_items("validation", object.get("accepted")),
            rejected: decode_items("validation", object.get("rejected")),
            confidence_adjustments: decode_items(
                "validation",
                object
                    .get("confidenceAdjustments")
                    .or_else(|| object.get("confidence_adjustments")),
            ),
        })
    }
}

/// Accepted, rejected and adjusted relationships; the first two are disjoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutput {
    pub accepted: Vec<ValidatedRelationship>,
    pub rejected: Vec<RejectedRelationship>,
    pub confidence_adjustments: Vec<ConfidenceAdjustment>,
}

/// Compact view of an existing node handed to the resolver and validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownEntity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: NodeType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownRelationship {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    pub confidence: f64,
}

/// What the validator sees of the existing graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationContext {
    pub publication_date: Option<String>,
    pub nodes: Vec<KnownEntity>,
    pub edges: Vec<KnownRelationship>,
}

fn expect_object<'a>(
    stage: &'static str,
    value: &'a Value,
    keys: &[&str],
) -> Result<&'a serde_json::Map<String, Value>, StageError> {
    let object = value
        .as_object()
        .ok_or_else(|| StageError::decode(stage, "expected a JSON object"))?;

    if !keys.iter().any(|k| object.contains_key(*k)) {
        return Err(StageError::decode(
            stage,
            format!("none of the expected keys present: {}", keys.join(", ")),
        ));
    }
    Ok(object)
}

/// Decode an array item by item, dropping entries that do not fit.
fn decode_items<T: DeserializeOwned>(stage: &'static str, value: Option<&Value>) -> Vec<T> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<T>(item.clone()) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                debug!(stage, error = %e, "Skipping malformed item");
                None
            }
        })
        .collect()
}
