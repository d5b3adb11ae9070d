//! Archival merge semantics, shared by both storage adapters.
//!
//! Archival is an idempotent upsert keyed by the natural key: re-importing a
//! record overlays its present fields over the stored copy instead of
//! duplicating or blanking it. The merge operates on the flat map
//! representation so extension-bag fields participate on the same footing as
//! fixed-schema ones.

use serde_json::{Map, Value};

use crate::error::VaultError;
use crate::models::{Record, RecordKind};

fn string_field(map: &Map<String, Value>, field: &str) -> Option<String> {
    map.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Extract the trimmed natural key from a raw record map, before any merge.
/// Tools fall back from `identifier` to `url`.
pub fn natural_key_of(kind: RecordKind, map: &Map<String, Value>) -> Result<String, VaultError> {
    let key = match kind {
        RecordKind::Article | RecordKind::Resource => string_field(map, "url"),
        RecordKind::Tool => string_field(map, "identifier").or_else(|| string_field(map, "url")),
        RecordKind::Prompt => string_field(map, "identifier"),
        RecordKind::Rule => string_field(map, "name"),
    };
    key.ok_or_else(|| {
        VaultError::InvalidRecord(format!("{} record has an empty natural key", kind))
    })
}

/// Order-preserving union: `base` first, then anything new from `additions`.
fn union_tags(base: &[String], additions: &[String]) -> Vec<String> {
    let mut out: Vec<String> = base.to_vec();
    for tag in additions {
        if !out.contains(tag) {
            out.push(tag.clone());
        }
    }
    out
}

fn tags_of(map: &Map<String, Value>, field: &str) -> Vec<String> {
    map.get(field)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Merge an incoming raw record over its stored copy (if any) and produce the
/// validated record to persist.
///
/// Rules, in order:
/// - start from the stored map, or empty for a first import;
/// - overlay every non-null field present in `raw` (absent and null fields
///   leave the stored value untouched);
/// - stamp `category`;
/// - backfill `created_at` with `now` on kinds that carry it;
/// - articles additionally default `published_time` to `created_at`, refresh
///   `archived_at` to `now` on every import, union `tags` with the stored
///   set and with `extra_tags`, and take `tool_tags` from `extra_tags` when
///   any were supplied.
pub fn merge(
    kind: RecordKind,
    raw: &Map<String, Value>,
    existing: Option<&Map<String, Value>>,
    category: &str,
    extra_tags: &[String],
    now: &str,
) -> Result<Record, VaultError> {
    let mut merged = existing.cloned().unwrap_or_default();

    let stored_tags = tags_of(&merged, "tags");

    for (field, value) in raw {
        if field == "id" || value.is_null() {
            continue;
        }
        merged.insert(field.clone(), value.clone());
    }

    merged.insert("category".into(), Value::String(category.to_string()));

    let carries_created_at = matches!(
        kind,
        RecordKind::Article | RecordKind::Tool | RecordKind::Resource
    );
    if carries_created_at && string_field(&merged, "created_at").is_none() {
        merged.insert("created_at".into(), Value::String(now.to_string()));
    }

    if kind == RecordKind::Article {
        if string_field(&merged, "published_time").is_none() {
            let created = string_field(&merged, "created_at").unwrap_or_else(|| now.to_string());
            merged.insert("published_time".into(), Value::String(created));
        }
        merged.insert("archived_at".into(), Value::String(now.to_string()));

        let incoming_tags = tags_of(raw, "tags");
        let mut tags = union_tags(&stored_tags, &incoming_tags);
        tags = union_tags(&tags, extra_tags);
        merged.insert(
            "tags".into(),
            Value::Array(tags.into_iter().map(Value::String).collect()),
        );
        if !extra_tags.is_empty() {
            merged.insert(
                "tool_tags".into(),
                Value::Array(
                    extra_tags
                        .iter()
                        .cloned()
                        .map(Value::String)
                        .collect(),
                ),
            );
        }
    }

    let record = Record::from_value(kind, Value::Object(merged))?;
    record.validate()?;
    Ok(record)
}
