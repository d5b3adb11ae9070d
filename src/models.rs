//! Core entity model: the five record kinds and their shared conventions.
//!
//! Every kind is a fixed-schema struct plus an open extension bag
//! (`#[serde(flatten)]`), so producer fields outside the fixed schema
//! round-trip verbatim through both storage adapters. Each kind has a
//! natural key (URL or identifier) that is independent of the
//! storage-assigned `id`.

use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::VaultError;

/// Current time as an ISO-8601 string with a trailing `Z`.
///
/// Domain timestamps are stored as strings; ISO-8601 compares correctly
/// lexicographically, which the sort policies rely on.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Tolerate explicit JSON `null` where producers send it for a field that
/// has a natural default (counters, flags, tag lists).
fn null_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    T: Default + Deserialize<'de>,
    D: Deserializer<'de>,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

/// The five entity kinds held by the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Article,
    Tool,
    Prompt,
    Rule,
    Resource,
}

impl RecordKind {
    pub const ALL: [RecordKind; 5] = [
        RecordKind::Article,
        RecordKind::Tool,
        RecordKind::Prompt,
        RecordKind::Rule,
        RecordKind::Resource,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Article => "article",
            RecordKind::Tool => "tool",
            RecordKind::Prompt => "prompt",
            RecordKind::Rule => "rule",
            RecordKind::Resource => "resource",
        }
    }

    /// Relational table name for this kind.
    pub fn table(&self) -> &'static str {
        match self {
            RecordKind::Article => "articles",
            RecordKind::Tool => "tools",
            RecordKind::Prompt => "prompts",
            RecordKind::Rule => "rules",
            RecordKind::Resource => "resources",
        }
    }

    /// Fixed-schema field names for this kind. An extension-bag entry may
    /// not use any of these.
    pub fn reserved_fields(&self) -> &'static [&'static str] {
        match self {
            RecordKind::Article => &[
                "id",
                "title",
                "url",
                "summary",
                "source",
                "category",
                "published_time",
                "created_at",
                "archived_at",
                "view_count",
                "score",
                "tags",
                "tool_tags",
            ],
            RecordKind::Tool => &[
                "id",
                "identifier",
                "name",
                "url",
                "description",
                "category",
                "is_featured",
                "view_count",
                "score",
                "created_at",
            ],
            RecordKind::Prompt => &[
                "id",
                "identifier",
                "name",
                "description",
                "content",
                "category",
            ],
            RecordKind::Rule => &["id", "name", "description", "content", "category"],
            RecordKind::Resource => &[
                "id",
                "title",
                "url",
                "description",
                "type",
                "category",
                "subcategory",
                "created_at",
            ],
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "article" | "articles" => Ok(RecordKind::Article),
            "tool" | "tools" => Ok(RecordKind::Tool),
            "prompt" | "prompts" => Ok(RecordKind::Prompt),
            "rule" | "rules" => Ok(RecordKind::Rule),
            "resource" | "resources" => Ok(RecordKind::Resource),
            other => Err(format!(
                "unknown record kind '{}'. Available: article, tool, prompt, rule, resource",
                other
            )),
        }
    }
}

/// A harvested article. Natural key: `url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Article {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "null_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_default")]
    pub url: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub published_time: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub archived_at: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub view_count: i64,
    #[serde(default, deserialize_with = "null_default")]
    pub score: i64,
    #[serde(default, deserialize_with = "null_default")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub tool_tags: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A tool or product entry. Natural key: `identifier`, falling back to `url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Tool {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_default")]
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub is_featured: bool,
    #[serde(default, deserialize_with = "null_default")]
    pub view_count: i64,
    #[serde(default, deserialize_with = "null_default")]
    pub score: i64,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A reusable prompt. Natural key: `identifier`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Prompt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub content: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A coding rule. Natural key: `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub content: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A community resource. Natural key: `url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Resource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "null_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_default")]
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A record of any kind. Query and archival code operates on this enum via
/// the accessors below rather than matching per kind at every call site.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Article(Article),
    Tool(Tool),
    Prompt(Prompt),
    Rule(Rule),
    Resource(Resource),
}

fn trimmed(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

impl Record {
    /// Deserialize a flat record map of the given kind. Unknown fields land
    /// in the extension bag; type mismatches on fixed fields are rejected
    /// as `InvalidRecord`.
    pub fn from_value(kind: RecordKind, value: Value) -> Result<Record, VaultError> {
        let result = match kind {
            RecordKind::Article => serde_json::from_value(value).map(Record::Article),
            RecordKind::Tool => serde_json::from_value(value).map(Record::Tool),
            RecordKind::Prompt => serde_json::from_value(value).map(Record::Prompt),
            RecordKind::Rule => serde_json::from_value(value).map(Record::Rule),
            RecordKind::Resource => serde_json::from_value(value).map(Record::Resource),
        };
        result.map_err(|e| VaultError::InvalidRecord(format!("malformed {} record: {}", kind, e)))
    }

    /// Serialize back to the flat map representation (fixed fields plus the
    /// extension bag, one level).
    pub fn to_map(&self) -> Map<String, Value> {
        let value = match self {
            Record::Article(r) => serde_json::to_value(r),
            Record::Tool(r) => serde_json::to_value(r),
            Record::Prompt(r) => serde_json::to_value(r),
            Record::Rule(r) => serde_json::to_value(r),
            Record::Resource(r) => serde_json::to_value(r),
        };
        match value {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Article(_) => RecordKind::Article,
            Record::Tool(_) => RecordKind::Tool,
            Record::Prompt(_) => RecordKind::Prompt,
            Record::Rule(_) => RecordKind::Rule,
            Record::Resource(_) => RecordKind::Resource,
        }
    }

    pub fn id(&self) -> Option<i64> {
        match self {
            Record::Article(r) => r.id,
            Record::Tool(r) => r.id,
            Record::Prompt(r) => r.id,
            Record::Rule(r) => r.id,
            Record::Resource(r) => r.id,
        }
    }

    pub fn set_id(&mut self, id: i64) {
        match self {
            Record::Article(r) => r.id = Some(id),
            Record::Tool(r) => r.id = Some(id),
            Record::Prompt(r) => r.id = Some(id),
            Record::Rule(r) => r.id = Some(id),
            Record::Resource(r) => r.id = Some(id),
        }
    }

    /// The trimmed natural key, if the record carries one.
    pub fn natural_key(&self) -> Option<String> {
        match self {
            Record::Article(r) => trimmed(&r.url),
            Record::Tool(r) => r
                .identifier
                .as_deref()
                .and_then(trimmed)
                .or_else(|| trimmed(&r.url)),
            Record::Prompt(r) => r.identifier.as_deref().and_then(trimmed),
            Record::Rule(r) => trimmed(&r.name),
            Record::Resource(r) => trimmed(&r.url),
        }
    }

    /// True when `key` matches this record's identity. For tools either the
    /// identifier or the URL matches, so point lookups work with whichever
    /// the caller has.
    pub fn matches_key(&self, key: &str) -> bool {
        let key = key.trim();
        if key.is_empty() {
            return false;
        }
        match self {
            Record::Tool(r) => {
                r.identifier.as_deref().map(str::trim) == Some(key) || r.url.trim() == key
            }
            _ => self.natural_key().as_deref() == Some(key),
        }
    }

    pub fn category(&self) -> Option<&str> {
        match self {
            Record::Article(r) => r.category.as_deref(),
            Record::Tool(r) => r.category.as_deref(),
            Record::Prompt(r) => r.category.as_deref(),
            Record::Rule(r) => r.category.as_deref(),
            Record::Resource(r) => r.category.as_deref(),
        }
    }

    pub fn score(&self) -> i64 {
        match self {
            Record::Article(r) => r.score,
            Record::Tool(r) => r.score,
            _ => 0,
        }
    }

    pub fn view_count(&self) -> i64 {
        match self {
            Record::Article(r) => r.view_count,
            Record::Tool(r) => r.view_count,
            _ => 0,
        }
    }

    pub fn increment_views(&mut self) {
        match self {
            Record::Article(r) => r.view_count += 1,
            Record::Tool(r) => r.view_count += 1,
            _ => {}
        }
    }

    pub fn is_featured(&self) -> bool {
        matches!(self, Record::Tool(r) if r.is_featured)
    }

    pub fn created_at(&self) -> Option<&str> {
        match self {
            Record::Article(r) => r.created_at.as_deref(),
            Record::Tool(r) => r.created_at.as_deref(),
            Record::Resource(r) => r.created_at.as_deref(),
            _ => None,
        }
    }

    pub fn published_time(&self) -> Option<&str> {
        match self {
            Record::Article(r) => r.published_time.as_deref(),
            _ => None,
        }
    }

    pub fn archived_at(&self) -> Option<&str> {
        match self {
            Record::Article(r) => r.archived_at.as_deref(),
            _ => None,
        }
    }

    pub fn resource_type(&self) -> Option<&str> {
        match self {
            Record::Resource(r) => r.resource_type.as_deref(),
            _ => None,
        }
    }

    pub fn subcategory(&self) -> Option<&str> {
        match self {
            Record::Resource(r) => r.subcategory.as_deref(),
            _ => None,
        }
    }

    /// Display title for CLI output.
    pub fn display_name(&self) -> &str {
        match self {
            Record::Article(r) => &r.title,
            Record::Tool(r) => &r.name,
            Record::Prompt(r) => &r.name,
            Record::Rule(r) => &r.name,
            Record::Resource(r) => &r.title,
        }
    }

    /// Kind-specific field set used for substring search.
    pub fn search_fields(&self) -> Vec<&str> {
        match self {
            Record::Article(r) => {
                let mut fields = vec![r.title.as_str()];
                fields.extend(r.summary.as_deref());
                fields
            }
            Record::Tool(r) => {
                let mut fields = vec![r.name.as_str()];
                fields.extend(r.description.as_deref());
                fields
            }
            Record::Prompt(r) => {
                let mut fields = vec![r.name.as_str()];
                fields.extend(r.description.as_deref());
                fields
            }
            Record::Rule(r) => {
                let mut fields = vec![r.name.as_str(), r.content.as_str()];
                fields.extend(r.description.as_deref());
                fields
            }
            Record::Resource(r) => {
                let mut fields = vec![r.title.as_str()];
                fields.extend(r.description.as_deref());
                fields
            }
        }
    }

    fn extra_mut(&mut self) -> &mut Map<String, Value> {
        match self {
            Record::Article(r) => &mut r.extra,
            Record::Tool(r) => &mut r.extra,
            Record::Prompt(r) => &mut r.extra,
            Record::Rule(r) => &mut r.extra,
            Record::Resource(r) => &mut r.extra,
        }
    }

    pub fn extra(&self) -> &Map<String, Value> {
        match self {
            Record::Article(r) => &r.extra,
            Record::Tool(r) => &r.extra,
            Record::Prompt(r) => &r.extra,
            Record::Rule(r) => &r.extra,
            Record::Resource(r) => &r.extra,
        }
    }

    /// Add a field to the extension bag. Names taken by the fixed schema of
    /// this kind are rejected with `SchemaConflict`.
    pub fn insert_extra(&mut self, key: &str, value: Value) -> Result<(), VaultError> {
        if self.kind().reserved_fields().contains(&key) {
            return Err(VaultError::SchemaConflict {
                kind: self.kind(),
                field: key.to_string(),
            });
        }
        self.extra_mut().insert(key.to_string(), value);
        Ok(())
    }

    /// Validate the constructor invariants: a non-empty natural key and the
    /// required display/content fields for the kind.
    pub fn validate(&self) -> Result<(), VaultError> {
        if self.natural_key().is_none() {
            return Err(VaultError::InvalidRecord(format!(
                "{} record has an empty natural key",
                self.kind()
            )));
        }
        let missing = match self {
            Record::Article(r) => r.title.trim().is_empty().then_some("title"),
            Record::Tool(r) => r.name.trim().is_empty().then_some("name"),
            Record::Prompt(r) => {
                if r.name.trim().is_empty() {
                    Some("name")
                } else if r.content.is_empty() {
                    Some("content")
                } else {
                    None
                }
            }
            Record::Rule(r) => {
                if r.name.trim().is_empty() {
                    Some("name")
                } else if r.content.is_empty() {
                    Some("content")
                } else {
                    None
                }
            }
            Record::Resource(r) => r.title.trim().is_empty().then_some("title"),
        };
        if let Some(field) = missing {
            return Err(VaultError::InvalidRecord(format!(
                "{} record is missing required field '{}'",
                self.kind(),
                field
            )));
        }
        Ok(())
    }
}
