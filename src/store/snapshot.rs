//! Flat-file snapshot backend.
//!
//! The snapshot mirrors the relational content as pretty-printed JSON
//! collections, one array of records per file:
//!
//! ```text
//! <root>/articles/<category>.json
//! <root>/tools/featured.json        featured tools, first in read order
//! <root>/tools/<category>.json
//! <root>/prompts/prompts.json
//! <root>/rules.json
//! <root>/resources.json
//! ```
//!
//! Reads union the collections of a kind in order, so when a record appears
//! in more than one file the query engine's first-wins dedup keeps the copy
//! from the earlier file (featured tools shadow their category copy).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::archive;
use crate::error::VaultError;
use crate::models::{now_iso, Record, RecordKind};
use crate::store::{ArchiveOutcome, Store};

pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn collection_path(&self, kind: RecordKind, name: &str) -> PathBuf {
        match kind {
            RecordKind::Article => self.root.join("articles").join(format!("{}.json", name)),
            RecordKind::Tool => self.root.join("tools").join(format!("{}.json", name)),
            RecordKind::Prompt => self.root.join("prompts").join("prompts.json"),
            RecordKind::Rule => self.root.join("rules.json"),
            RecordKind::Resource => self.root.join("resources.json"),
        }
    }

    /// Collection names of a kind, in read order. Tools list `featured`
    /// first; single-file kinds have exactly one fixed collection.
    pub fn collection_names(&self, kind: RecordKind) -> Result<Vec<String>, VaultError> {
        let dir = match kind {
            RecordKind::Article => self.root.join("articles"),
            RecordKind::Tool => self.root.join("tools"),
            RecordKind::Prompt => return Ok(vec!["prompts".into()]),
            RecordKind::Rule => return Ok(vec!["rules".into()]),
            RecordKind::Resource => return Ok(vec!["resources".into()]),
        };
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        if kind == RecordKind::Tool {
            if let Some(pos) = names.iter().position(|n| n == "featured") {
                let featured = names.remove(pos);
                names.insert(0, featured);
            }
        }
        Ok(names)
    }

    pub fn load_collection(
        &self,
        kind: RecordKind,
        name: &str,
    ) -> Result<Vec<Record>, VaultError> {
        let path = self.collection_path(kind, name);
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&path)?;
        let values: Vec<Value> = serde_json::from_str(&text)?;
        values
            .into_iter()
            .map(|v| Record::from_value(kind, v))
            .collect()
    }

    pub fn write_collection(
        &self,
        kind: RecordKind,
        name: &str,
        records: &[Record],
    ) -> Result<(), VaultError> {
        let path = self.collection_path(kind, name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let values: Vec<Value> = records.iter().map(|r| Value::Object(r.to_map())).collect();
        let mut text = serde_json::to_string_pretty(&values)?;
        text.push('\n');
        std::fs::write(&path, text)?;
        Ok(())
    }

    /// Next storage id for a kind: one past the maximum across every
    /// collection of that kind, starting at 1 for an empty snapshot.
    fn next_id(&self, kind: RecordKind) -> Result<i64, VaultError> {
        let mut max = 0;
        for name in self.collection_names(kind)? {
            for record in self.load_collection(kind, &name)? {
                if let Some(id) = record.id() {
                    max = max.max(id);
                }
            }
        }
        Ok(max + 1)
    }

    fn load_all(&self, kind: RecordKind) -> Result<Vec<Record>, VaultError> {
        let mut out = Vec::new();
        for name in self.collection_names(kind)? {
            out.extend(self.load_collection(kind, &name)?);
        }
        Ok(out)
    }

    /// Collection file an incoming record of `category` lands in.
    fn target_collection(kind: RecordKind, category: &str) -> String {
        match kind {
            RecordKind::Article | RecordKind::Tool => category.to_string(),
            RecordKind::Prompt => "prompts".into(),
            RecordKind::Rule => "rules".into(),
            RecordKind::Resource => "resources".into(),
        }
    }
}

#[async_trait]
impl Store for SnapshotStore {
    async fn fetch(
        &self,
        kind: RecordKind,
        category: Option<&str>,
    ) -> Result<Vec<Record>, VaultError> {
        match (kind, category) {
            // Category-sharded kinds can skip unrelated files. Featured
            // tools are always read so their copy wins the dedup.
            (RecordKind::Article, Some(cat)) => self.load_collection(kind, cat),
            (RecordKind::Tool, Some(cat)) => {
                let mut out = self.load_collection(kind, "featured")?;
                if cat != "featured" {
                    out.extend(self.load_collection(kind, cat)?);
                }
                Ok(out)
            }
            _ => self.load_all(kind),
        }
    }

    async fn archive(
        &self,
        kind: RecordKind,
        raw: Map<String, Value>,
        category: &str,
        extra_tags: &[String],
    ) -> Result<ArchiveOutcome, VaultError> {
        let key = archive::natural_key_of(kind, &raw)?;
        let collection = Self::target_collection(kind, category);
        let mut records = self.load_collection(kind, &collection)?;

        // Flat files never merge in place. A key already present in the
        // target collection rejects the incoming copy.
        if records.iter().any(|r| r.matches_key(&key)) {
            debug!(kind = %kind, key = %key, "duplicate rejected by snapshot");
            return Ok(ArchiveOutcome::Duplicate);
        }

        let mut record = archive::merge(kind, &raw, None, category, extra_tags, &now_iso())?;
        record.set_id(self.next_id(kind)?);
        records.push(record);
        self.write_collection(kind, &collection, &records)?;
        Ok(ArchiveOutcome::Inserted)
    }

    async fn get_by_natural_key(
        &self,
        kind: RecordKind,
        key: &str,
    ) -> Result<Option<Record>, VaultError> {
        for name in self.collection_names(kind)? {
            if let Some(found) = self
                .load_collection(kind, &name)?
                .into_iter()
                .find(|r| r.matches_key(key))
            {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    async fn increment_view_count(
        &self,
        kind: RecordKind,
        key: &str,
    ) -> Result<bool, VaultError> {
        if !matches!(kind, RecordKind::Article | RecordKind::Tool) {
            return Ok(false);
        }
        for name in self.collection_names(kind)? {
            let mut records = self.load_collection(kind, &name)?;
            if let Some(record) = records.iter_mut().find(|r| r.matches_key(key)) {
                record.increment_views();
                self.write_collection(kind, &name, &records)?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}
