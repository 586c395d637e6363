use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Name of the catch-all category for items that match no catalog entry.
pub const OTHER_CATEGORY: &str = "Other";

// --- Embeddings ---

/// An item's embedding, resolved once at the ingestion boundary.
///
/// Stores hand embeddings back as serialized text (`"[0.1, 0.2, ...]"`).
/// That text is parsed exactly once by [`Embedding::parse`]; everything
/// downstream works with the typed variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Option<Vec<f32>>", into = "Option<Vec<f32>>")]
pub enum Embedding {
    #[default]
    Unresolved,
    Vector(Vec<f32>),
}

impl Embedding {
    /// Parse a serialized embedding. Empty or malformed text resolves to
    /// `Unresolved` so the item can be re-embedded later in the run.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(text) = raw.map(str::trim).filter(|t| !t.is_empty()) else {
            return Embedding::Unresolved;
        };
        match serde_json::from_str::<Vec<f32>>(text) {
            Ok(v) if !v.is_empty() => Embedding::Vector(v),
            Ok(_) => Embedding::Unresolved,
            Err(e) => {
                warn!(error = %e, "Unparseable embedding text, treating as unresolved");
                Embedding::Unresolved
            }
        }
    }

    pub fn vector(&self) -> Option<&[f32]> {
        match self {
            Embedding::Vector(v) => Some(v.as_slice()),
            Embedding::Unresolved => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Embedding::Vector(_))
    }

    /// Serialize for a text column.
    pub fn to_text(&self) -> Option<String> {
        self.vector()
            .and_then(|v| serde_json::to_string(v).ok())
    }
}

impl From<Option<Vec<f32>>> for Embedding {
    fn from(value: Option<Vec<f32>>) -> Self {
        match value {
            Some(v) if !v.is_empty() => Embedding::Vector(v),
            _ => Embedding::Unresolved,
        }
    }
}

impl From<Embedding> for Option<Vec<f32>> {
    fn from(value: Embedding) -> Self {
        match value {
            Embedding::Vector(v) => Some(v),
            Embedding::Unresolved => None,
        }
    }
}

// --- Raw items ---

/// An unprocessed content unit produced by the external collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    pub id: Uuid,
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
    #[serde(default)]
    pub embedding: Embedding,
    #[serde(default)]
    pub category_hint: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub consumed_by: Option<Uuid>,
}

impl RawItem {
    /// Title if present, otherwise the first line of the content.
    pub fn headline(&self) -> &str {
        match self.title.as_deref() {
            Some(t) if !t.trim().is_empty() => t.trim(),
            _ => self.content.lines().next().unwrap_or("").trim(),
        }
    }

    /// Text sent to the embedding service.
    pub fn embedding_text(&self) -> String {
        match self.title.as_deref() {
            Some(t) if !t.trim().is_empty() => format!("{}\n\n{}", t.trim(), self.content),
            _ => self.content.clone(),
        }
    }
}

// --- Clusters & groups ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterKind {
    /// Formed by similarity to a seed item.
    Similarity,
    /// A category with exactly one item, wrapped as-is.
    Singleton,
    /// Fallback: every item of a category that produced no clusters.
    Digest,
}

impl std::fmt::Display for ClusterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterKind::Similarity => write!(f, "similarity"),
            ClusterKind::Singleton => write!(f, "singleton"),
            ClusterKind::Digest => write!(f, "digest"),
        }
    }
}

/// A group of raw items judged to describe the same topic. Lives for one run.
#[derive(Debug, Clone)]
pub struct TopicCluster {
    pub category: String,
    pub members: Vec<RawItem>,
    pub centroid: Vec<f32>,
    pub mean_similarity: f64,
    pub kind: ClusterKind,
}

impl TopicCluster {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn member_ids(&self) -> Vec<Uuid> {
        self.members.iter().map(|m| m.id).collect()
    }

    /// Headline of the seed item, used in logs.
    pub fn lead_headline(&self) -> &str {
        self.members.first().map(|m| m.headline()).unwrap_or("")
    }
}

/// Items partitioned under one category name.
#[derive(Debug, Clone)]
pub struct CategoryGroup {
    pub name: String,
    pub items: Vec<RawItem>,
}

impl CategoryGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
        }
    }

    pub fn is_other(&self) -> bool {
        self.name == OTHER_CATEGORY
    }
}

// --- Topic locks ---

/// Tolerant hash of a cluster centroid (lowercase hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicLock {
    pub fingerprint: Fingerprint,
    pub created_at: DateTime<Utc>,
    pub content_id: Uuid,
}

// --- Duplicate guard ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardCheck {
    RateLimit,
    LexicalOverlap,
    SemanticSimilarity,
}

impl std::fmt::Display for GuardCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardCheck::RateLimit => write!(f, "rate_limit"),
            GuardCheck::LexicalOverlap => write!(f, "lexical_overlap"),
            GuardCheck::SemanticSimilarity => write!(f, "semantic_similarity"),
        }
    }
}

/// The prior record a duplicate verdict points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictingRecord {
    pub content_id: Uuid,
    pub title: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateVerdict {
    pub is_duplicate: bool,
    pub check: Option<GuardCheck>,
    pub reason: String,
    pub conflicting: Option<ConflictingRecord>,
}

impl DuplicateVerdict {
    pub fn unique() -> Self {
        Self {
            is_duplicate: false,
            check: None,
            reason: "no duplicate found".to_string(),
            conflicting: None,
        }
    }

    pub fn duplicate(
        check: GuardCheck,
        reason: impl Into<String>,
        conflicting: Option<ConflictingRecord>,
    ) -> Self {
        Self {
            is_duplicate: true,
            check: Some(check),
            reason: reason.into(),
            conflicting,
        }
    }
}

// --- Generated content ---

/// Structured output of the external writer for one cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedArticle {
    pub title: String,
    pub body: String,
    pub confidence: f64,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl GeneratedArticle {
    pub fn embedding_text(&self) -> String {
        format!("{}\n\n{}", self.title, self.body)
    }
}

/// A committed content record as written to the content store.
#[derive(Debug, Clone)]
pub struct NewContent {
    pub title: String,
    pub body: String,
    pub category: String,
    pub tags: Vec<String>,
    pub source_item_ids: Vec<Uuid>,
    pub embedding: Embedding,
    pub published: bool,
    pub created_at: DateTime<Utc>,
}

/// A recently committed record, as read back for duplicate checks.
#[derive(Debug, Clone)]
pub struct RecentContent {
    pub id: Uuid,
    pub title: String,
    pub category: String,
    pub embedding: Embedding,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_json_array_embedding() {
        let e = Embedding::parse(Some("[0.5, -0.25, 1.0]"));
        assert_eq!(e.vector(), Some(&[0.5f32, -0.25, 1.0][..]));
    }

    #[test]
    fn parse_missing_or_garbage_is_unresolved() {
        assert_eq!(Embedding::parse(None), Embedding::Unresolved);
        assert_eq!(Embedding::parse(Some("  ")), Embedding::Unresolved);
        assert_eq!(Embedding::parse(Some("[]")), Embedding::Unresolved);
        assert_eq!(Embedding::parse(Some("not a vector")), Embedding::Unresolved);
    }

    #[test]
    fn embedding_serializes_as_nullable_array() {
        let json = serde_json::to_string(&Embedding::Vector(vec![1.0, 2.0])).unwrap();
        assert_eq!(json, "[1.0,2.0]");
        let back: Embedding = serde_json::from_str("null").unwrap();
        assert_eq!(back, Embedding::Unresolved);
    }

    #[test]
    fn headline_falls_back_to_first_content_line() {
        let item = RawItem {
            id: Uuid::new_v4(),
            title: None,
            content: "First line\nsecond line".to_string(),
            embedding: Embedding::Unresolved,
            category_hint: None,
            source_url: None,
            published_at: Utc::now(),
            expires_at: Utc::now(),
            consumed_by: None,
        };
        assert_eq!(item.headline(), "First line");
    }
}
