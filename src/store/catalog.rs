//! Message catalogue
//!
//! Two sled trees: `main` keyed by content filename, and `subject_index`
//! keyed by `subject NUL filename` so duplicate subjects coexist.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub filename: String,
    pub from: String,
    pub subject: String,
    pub folder: String,
    /// Posting instant as minutes since the Unix epoch, UTC.
    pub posted: i64,
    pub size: u64,
}

pub struct Catalog {
    db: sled::Db,
    main: sled::Tree,
    subjects: sled::Tree,
}

fn subject_key(subject: &str, filename: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(subject.len() + 1 + filename.len());
    key.extend_from_slice(subject.as_bytes());
    key.push(0);
    key.extend_from_slice(filename.as_bytes());
    key
}

impl Catalog {
    pub fn open(path: &Path) -> Result<Catalog> {
        let db = sled::Config::new()
            .path(path)
            .open()
            .with_context(|| format!("opening catalogue at {}", path.display()))?;

        let main = db.open_tree("main")?;
        let subjects = db.open_tree("subject_index")?;

        Ok(Catalog { db, main, subjects })
    }

    pub fn insert(&self, record: &MessageRecord) -> Result<()> {
        let data = serde_json::to_vec(record)?;
        self.main.insert(record.filename.as_bytes(), data)?;
        self.subjects
            .insert(subject_key(&record.subject, &record.filename), record.filename.as_bytes())?;
        Ok(())
    }

    pub fn get(&self, filename: &str) -> Result<Option<MessageRecord>> {
        match self.main.get(filename.as_bytes())? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    pub fn remove(&self, filename: &str) -> Result<()> {
        if let Some(record) = self.get(filename)? {
            self.subjects.remove(subject_key(&record.subject, &record.filename))?;
        }
        self.main.remove(filename.as_bytes())?;
        Ok(())
    }

    /// All records filed under exactly this subject.
    pub fn by_subject(&self, subject: &str) -> Result<Vec<MessageRecord>> {
        let mut prefix = subject.as_bytes().to_vec();
        prefix.push(0);

        let mut records = vec![];
        for entry in self.subjects.scan_prefix(&prefix) {
            let (_, filename) = entry?;
            let filename = String::from_utf8_lossy(&filename).into_owned();
            if let Some(record) = self.get(&filename)? {
                records.push(record);
            }
        }

        Ok(records)
    }

    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}
