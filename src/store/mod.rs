// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! On-disk mail storage
//!
//! One file per message body under the content directory. New bodies are
//! staged in a sibling `tmp/` directory and promoted by hardlink+unlink, so a
//! reader never observes a partial file and an abandoned draft disappears on
//! drop.

use anyhow::{Context, Result};
use rand::Rng;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::util;

pub use self::catalog::{Catalog, MessageRecord};

pub mod catalog;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message exceeds maximum size")]
    Full,
    #[error("invalid % escape in message body")]
    Encoding,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

const FILENAME_LENGTH: usize = 10;

fn generate_filename(length: usize) -> String {
    const CHARSET: &[u8] =
        b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_";

    let mut rng = rand::thread_rng();
    (0..length).map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char).collect()
}

pub struct MailStore {
    path: PathBuf,
    tmp_path: PathBuf,
    max_size: u64,
    pub catalog: Catalog,
}

impl MailStore {
    pub fn max_message_size(&self) -> u64 {
        self.max_size
    }

    pub fn open(path: impl Into<PathBuf>, max_size: u64) -> Result<MailStore> {
        let path = path.into();
        let tmp_path = path.join("tmp");

        std::fs::create_dir_all(&tmp_path)
            .with_context(|| format!("creating mail store at {}", path.display()))?;

        let catalog = Catalog::open(&path.join("db"))?;

        Ok(MailStore { path, tmp_path, max_size, catalog })
    }

    /// Stage a new message body under a fresh random name.
    pub async fn create_file(&self) -> Result<MailFile, StoreError> {
        let filename = generate_filename(FILENAME_LENGTH);
        let tmp_path = self.tmp_path.join(&filename);
        let final_path = self.path.join(&filename);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .await?;

        Ok(MailFile {
            file,
            filename,
            tmp_path,
            final_path,
            max_size: self.max_size,
            size: 0,
            new: true,
            finished: false,
            leftover: Vec::new(),
        })
    }

    /// Open an existing, committed message body for reading.
    pub async fn open_file(&self, filename: &str) -> Result<MailFile, StoreError> {
        let final_path = self.path.join(filename);
        let file = File::open(&final_path).await?;

        Ok(MailFile {
            file,
            filename: filename.to_owned(),
            tmp_path: PathBuf::new(),
            final_path,
            max_size: 0,
            size: 0,
            new: false,
            finished: false,
            leftover: Vec::new(),
        })
    }
}

pub struct MailFile {
    file: File,
    filename: String,
    tmp_path: PathBuf,
    final_path: PathBuf,
    max_size: u64,
    size: u64,
    new: bool,
    finished: bool,
    /// Tail of the previous chunk when a % escape straddles a chunk boundary.
    leftover: Vec<u8>,
}

impl MailFile {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Bytes written so far (after decoding, for encoded writes).
    pub fn size(&self) -> u64 {
        self.size
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<usize, StoreError> {
        self.size += data.len() as u64;
        if self.max_size > 0 && self.size > self.max_size {
            return Err(StoreError::Full);
        }

        self.file.write_all(data).await?;
        Ok(data.len())
    }

    /// Write body bytes arriving in the wire encoding, resolving `%HH`
    /// escapes and dropping `%CRLF` folds as they stream past.
    pub async fn write_encoded(&mut self, data: &[u8]) -> Result<usize, StoreError> {
        let decoded = self.decode_chunk(data)?;

        self.size += decoded.len() as u64;
        if self.max_size > 0 && self.size > self.max_size {
            return Err(StoreError::Full);
        }

        self.file.write_all(&decoded).await?;
        Ok(data.len())
    }

    fn decode_chunk(&mut self, input: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut combined = std::mem::take(&mut self.leftover);
        combined.extend_from_slice(input);

        let mut out = Vec::with_capacity(combined.len());
        let mut i = 0;

        while i < combined.len() {
            if combined[i] != b'%' {
                out.push(combined[i]);
                i += 1;
                continue;
            }

            if i + 2 >= combined.len() {
                // Escape split across chunks; keep it for the next write
                break;
            }

            if combined[i + 1] == b'\r' && combined[i + 2] == b'\n' {
                i += 3;
                continue;
            }

            let high = util::hex_value(combined[i + 1]).ok_or(StoreError::Encoding)?;
            let low = util::hex_value(combined[i + 2]).ok_or(StoreError::Encoding)?;
            out.push(high << 4 | low);
            i += 3;
        }

        self.leftover = combined.split_off(i);
        Ok(out)
    }

    pub async fn read(&mut self, size: usize) -> Result<Vec<u8>, StoreError> {
        let mut data = vec![0; size];
        let mut filled = 0;

        while filled < size {
            let count = self.file.read(&mut data[filled..]).await?;
            if count == 0 {
                break;
            }
            filled += count;
        }

        data.truncate(filled);
        Ok(data)
    }

    /// Promote the staged file to its final location.
    pub async fn commit(mut self) -> Result<(), StoreError> {
        if self.finished {
            return Ok(());
        }

        if self.new {
            self.file.flush().await?;
            tokio::fs::hard_link(&self.tmp_path, &self.final_path).await?;
            tokio::fs::remove_file(&self.tmp_path).await?;
        }

        self.finished = true;
        Ok(())
    }
}

impl Drop for MailFile {
    fn drop(&mut self) {
        // An uncommitted staging file must not outlive its handle
        if self.new && !self.finished {
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        let tag: u32 = rand::thread_rng().gen();
        std::env::temp_dir().join(format!("mep2d-store-{tag:08x}"))
    }

    #[tokio::test]
    async fn write_commit_read() {
        let dir = scratch_dir();
        let store = MailStore::open(&dir, 1024).unwrap();

        let data = b"This is some file data\r\n";
        let mut file = store.create_file().await.unwrap();
        let filename = file.filename().to_owned();
        assert_eq!(filename.len(), FILENAME_LENGTH);

        assert_eq!(file.write(data).await.unwrap(), data.len());
        file.commit().await.unwrap();

        let mut file = store.open_file(&filename).await.unwrap();
        assert_eq!(file.read(1024).await.unwrap(), data);

        // The staging entry is gone once promoted
        assert!(!dir.join("tmp").join(&filename).exists());

        drop(store);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn uncommitted_file_is_unlinked() {
        let dir = scratch_dir();
        let store = MailStore::open(&dir, 1024).unwrap();

        let filename = {
            let mut file = store.create_file().await.unwrap();
            file.write(b"doomed").await.unwrap();
            file.filename().to_owned()
        };

        assert!(!dir.join("tmp").join(&filename).exists());
        assert!(!dir.join(&filename).exists());

        drop(store);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn size_limit() {
        let dir = scratch_dir();
        let store = MailStore::open(&dir, 16).unwrap();

        let mut file = store.create_file().await.unwrap();
        file.write(b"0123456789").await.unwrap();
        assert!(matches!(file.write(b"0123456789").await, Err(StoreError::Full)));

        drop(file);
        drop(store);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn encoded_writes_across_chunks() {
        let dir = scratch_dir();
        let store = MailStore::open(&dir, 1024).unwrap();

        let mut file = store.create_file().await.unwrap();
        let filename = file.filename().to_owned();

        // A %HH escape and a transparent fold, both split mid-escape
        file.write_encoded(b"abc%4").await.unwrap();
        file.write_encoded(b"1def%").await.unwrap();
        file.write_encoded(b"\r\nghi").await.unwrap();
        file.commit().await.unwrap();

        let mut file = store.open_file(&filename).await.unwrap();
        assert_eq!(file.read(1024).await.unwrap(), b"abcAdefghi");

        drop(store);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn encoded_write_rejects_bad_escape() {
        let dir = scratch_dir();
        let store = MailStore::open(&dir, 1024).unwrap();

        let mut file = store.create_file().await.unwrap();
        assert!(matches!(
            file.write_encoded(b"bad %zz escape").await,
            Err(StoreError::Encoding),
        ));

        drop(file);
        drop(store);
        std::fs::remove_dir_all(dir).unwrap();
    }
}
