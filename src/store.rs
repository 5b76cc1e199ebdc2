use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::form::TIMESTAMP_FORMAT;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("report {0} not found")]
    NotFound(i64),
    #[error("corrupt report store: {0}")]
    Corrupt(#[from] bincode::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A persisted report. `values_json` is a flat JSON object mapping field id
/// to string value — all values are strings, numeric-looking or not.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedReport {
    pub id: i64,
    pub title: String,
    pub last_edited_at: String,
    pub created_at: String,
    pub preview_text: String,
    pub values_json: String,
    pub template_id: String,
}

/// What a form hands the store on save. The store assigns the id and the
/// created-at stamp.
#[derive(Clone, Debug)]
pub struct ReportDraft {
    pub title: String,
    pub last_edited_at: String,
    pub preview_text: String,
    pub values_json: String,
    pub template_id: String,
}

#[derive(Default, Serialize, Deserialize)]
struct StoreData {
    last_id: i64,
    records: Vec<SavedReport>,
}

/// File-backed saved-report store: one gzip-compressed bincode file, loaded
/// on open and rewritten after every mutation. Ids are monotonic from 1 and
/// never reused.
pub struct ReportStore {
    path: PathBuf,
    data: StoreData,
}

impl ReportStore {
    /// Opens the store at `path`. A missing file yields an empty store; the
    /// file is only created on the first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = if path.exists() {
            read_store(&path)?
        } else {
            StoreData::default()
        };
        Ok(ReportStore { path, data })
    }

    pub fn insert(&mut self, draft: ReportDraft) -> Result<i64, StoreError> {
        self.data.last_id += 1;
        let id = self.data.last_id;
        self.data.records.push(SavedReport {
            id,
            title: draft.title,
            last_edited_at: draft.last_edited_at.clone(),
            created_at: draft.last_edited_at,
            preview_text: draft.preview_text,
            values_json: draft.values_json,
            template_id: draft.template_id,
        });
        self.persist()?;
        Ok(id)
    }

    /// Overwrites everything except the id and the created-at stamp.
    pub fn update(&mut self, id: i64, draft: ReportDraft) -> Result<(), StoreError> {
        let record = self
            .data
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        record.title = draft.title;
        record.last_edited_at = draft.last_edited_at;
        record.preview_text = draft.preview_text;
        record.values_json = draft.values_json;
        record.template_id = draft.template_id;
        self.persist()
    }

    pub fn get(&self, id: i64) -> Option<&SavedReport> {
        self.data.records.iter().find(|r| r.id == id)
    }

    /// All reports, most recently edited first. Records whose timestamp does
    /// not parse sort last, in insertion order.
    pub fn list(&self) -> Vec<&SavedReport> {
        let mut records: Vec<&SavedReport> = self.data.records.iter().collect();
        records.sort_by_key(|r| std::cmp::Reverse(parse_timestamp(&r.last_edited_at)));
        records
    }

    pub fn delete(&mut self, id: i64) -> Result<(), StoreError> {
        let before = self.data.records.len();
        self.data.records.retain(|r| r.id != id);
        if self.data.records.len() == before {
            return Err(StoreError::NotFound(id));
        }
        self.persist()
    }

    /// Whether any saved report still references `template_id`. Fed into
    /// [`TemplateRegistry::delete`](crate::registry::TemplateRegistry::delete)
    /// as its referential-integrity predicate.
    pub fn has_reports_using_template(&self, template_id: &str) -> bool {
        self.data.records.iter().any(|r| r.template_id == template_id)
    }

    pub fn len(&self) -> usize {
        self.data.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.records.is_empty()
    }

    fn persist(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&self.path)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut writer = BufWriter::new(encoder);
        bincode::serialize_into(&mut writer, &self.data)?;
        Ok(())
    }
}

fn read_store(path: &Path) -> Result<StoreData, StoreError> {
    let file = File::open(path)?;
    let decoder = GzDecoder::new(file);
    let mut reader = BufReader::new(decoder);
    Ok(bincode::deserialize_from(&mut reader)?)
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT).ok()
}
