use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle state of one content cache row.
///
/// `pending -> generating -> completed | failed`. `quiz_pending` is assigned
/// only at initialization for quiz nodes and is terminal; the generation
/// pipeline never touches those rows again. `failed` is terminal too: the
/// only status reset anywhere is the recovery supervisor's bulk
/// `generating -> pending` demotion after a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Pending,
    Generating,
    Completed,
    Failed,
    QuizPending,
}

impl GenerationStatus {
    /// Whether this status can never change again through normal generation.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::QuizPending)
    }

    /// Whether `from -> to` is an edge of the generation state graph.
    ///
    /// The recovery-only bulk reset (`generating -> pending`) is included;
    /// no edge leaves `failed`, `completed`, or `quiz_pending`.
    pub fn is_valid_transition(from: Self, to: Self) -> bool {
        matches!(
            (from, to),
            (Self::Pending, Self::Generating)
                | (Self::Generating, Self::Completed)
                | (Self::Generating, Self::Failed)
                | (Self::Generating, Self::Pending)
        )
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::QuizPending => "quiz_pending",
        };
        f.write_str(s)
    }
}

impl FromStr for GenerationStatus {
    type Err = GenerationStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "generating" => Ok(Self::Generating),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "quiz_pending" => Ok(Self::QuizPending),
            other => Err(GenerationStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`GenerationStatus`] string.
#[derive(Debug, Clone)]
pub struct GenerationStatusParseError(pub String);

impl fmt::Display for GenerationStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid generation status: {:?}", self.0)
    }
}

impl std::error::Error for GenerationStatusParseError {}

// ---------------------------------------------------------------------------

/// Kind of a curriculum node, copied onto cache rows for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Study,
    Quiz,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Study => "study",
            Self::Quiz => "quiz",
        };
        f.write_str(s)
    }
}

impl FromStr for NodeKind {
    type Err = NodeKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "study" => Ok(Self::Study),
            "quiz" => Ok(Self::Quiz),
            other => Err(NodeKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`NodeKind`] string.
#[derive(Debug, Clone)]
pub struct NodeKindParseError(pub String);

impl fmt::Display for NodeKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid node kind: {:?}", self.0)
    }
}

impl std::error::Error for NodeKindParseError {}

// ---------------------------------------------------------------------------

/// Category of generated material held by a cache row.
///
/// `knowledge_card` is node-level (one per node, null fingerprint);
/// `clarification` is question-scoped (many per node, each keyed by a
/// question fingerprint).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    KnowledgeCard,
    Clarification,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::KnowledgeCard => "knowledge_card",
            Self::Clarification => "clarification",
        };
        f.write_str(s)
    }
}

impl FromStr for ContentKind {
    type Err = ContentKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "knowledge_card" => Ok(Self::KnowledgeCard),
            "clarification" => Ok(Self::Clarification),
            other => Err(ContentKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ContentKind`] string.
#[derive(Debug, Clone)]
pub struct ContentKindParseError(pub String);

impl fmt::Display for ContentKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid content kind: {:?}", self.0)
    }
}

impl std::error::Error for ContentKindParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// One row of generated (or to-be-generated) material.
///
/// Keyed by (curriculum_id, node_id, content_kind, question_fingerprint),
/// where a null fingerprint marks the single node-level entry and non-null
/// fingerprints mark question-scoped entries. The two key shapes are
/// enforced by two partial unique indexes, not one composite key.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContentCacheEntry {
    pub id: Uuid,
    pub curriculum_id: Uuid,
    pub node_id: Uuid,
    pub content_kind: ContentKind,
    pub question_fingerprint: Option<String>,
    pub node_kind: NodeKind,
    pub generation_status: GenerationStatus,
    /// Generated material; empty until the row reaches `completed`.
    pub payload: String,
    /// Failure cause; set only on `failed` rows.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ContentCacheEntry {
    /// Whether this row holds usable material and must not be regenerated.
    pub fn is_satisfied(&self) -> bool {
        self.generation_status == GenerationStatus::Completed && !self.payload.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
