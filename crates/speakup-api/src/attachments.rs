use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use rand::Rng;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::error::ApiError;

/// 5 MB per file.
pub const MAX_FILE_SIZE: usize = 5 * 1024 * 1024;

/// Most files one feedback record (and one request) may carry.
pub const MAX_FILES: usize = 5;

/// Accepted MIME types and the extensions each may arrive with.
const ALLOWED_TYPES: &[(&str, &[&str])] = &[
    ("image/jpeg", &["jpg", "jpeg"]),
    ("image/png", &["png"]),
    ("application/pdf", &["pdf"]),
];

/// One file taken off a multipart request.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

/// Filesystem collaborator: a flat namespace of named blobs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, name: &str, data: Bytes) -> Result<()>;

    /// Returns false when there was nothing to delete.
    async fn delete(&self, name: &str) -> Result<bool>;

    async fn exists(&self, name: &str) -> Result<bool>;
}

/// Stores every attachment as `{dir}/{stored_name}`.
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Attachment directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

#[async_trait]
impl BlobStore for DiskStore {
    async fn put(&self, name: &str, data: Bytes) -> Result<()> {
        let path = self.file_path(name);
        let mut file = fs::File::create(&path).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        match fs::remove_file(self.file_path(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(fs::try_exists(self.file_path(name)).await?)
    }
}

/// In-process store. Backs tests and lets the manager run without a disk.
#[derive(Default)]
pub struct MemoryStore {
    files: Mutex<HashMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .files
            .lock()
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.files.lock().map(|files| files.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put(&self, name: &str, data: Bytes) -> Result<()> {
        let mut files = self
            .files
            .lock()
            .map_err(|e| anyhow::anyhow!("MemoryStore lock poisoned: {}", e))?;
        files.insert(name.to_string(), data);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut files = self
            .files
            .lock()
            .map_err(|e| anyhow::anyhow!("MemoryStore lock poisoned: {}", e))?;
        Ok(files.remove(name).is_some())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let files = self
            .files
            .lock()
            .map_err(|e| anyhow::anyhow!("MemoryStore lock poisoned: {}", e))?;
        Ok(files.contains_key(name))
    }
}

/// Files written for one request that no record references yet. Either
/// `commit` them once the record is saved or `rollback` to delete them.
#[derive(Debug, Default)]
#[must_use = "staged files must be committed or rolled back"]
pub struct StagedFiles {
    names: Vec<String>,
}

impl StagedFiles {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Validates, stores and removes feedback attachments.
#[derive(Clone)]
pub struct AttachmentManager {
    store: Arc<dyn BlobStore>,
}

impl AttachmentManager {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Check the whole batch before anything touches the store. Too many
    /// files is an error, never a silent truncation.
    pub fn validate_batch(uploads: &[Upload]) -> Result<(), ApiError> {
        if uploads.len() > MAX_FILES {
            return Err(ApiError::InvalidFile(format!(
                "At most {} files may be attached",
                MAX_FILES
            )));
        }
        uploads.iter().try_for_each(validate_upload)
    }

    /// Write one validated upload under a fresh collision-resistant name.
    pub async fn store(&self, upload: &Upload) -> Result<String, ApiError> {
        let ext = extension(&upload.file_name).unwrap_or_default();

        let mut name = stored_name(&ext);
        // Same millisecond and same random draw is unlikely; re-roll anyway.
        for _ in 0..3 {
            if !self.store.exists(&name).await? {
                break;
            }
            name = stored_name(&ext);
        }

        self.store.put(&name, upload.data.clone()).await?;
        info!("Stored attachment {} ({} bytes)", name, upload.data.len());
        Ok(name)
    }

    /// Best-effort delete. A file that is already gone counts as removed.
    pub async fn remove(&self, name: &str) -> Result<()> {
        if !is_stored_name(name) {
            warn!("Refusing to remove non-attachment name {:?}", name);
            return Ok(());
        }
        if !self.store.delete(name).await? {
            warn!("Attachment {} already gone", name);
        }
        Ok(())
    }

    /// Remove every name, logging failures. Returns how many could not be
    /// removed.
    pub async fn remove_all(&self, names: &[String]) -> usize {
        let mut failed = 0;
        for name in names {
            if let Err(e) = self.remove(name).await {
                error!("Failed to remove attachment {}: {}", name, e);
                failed += 1;
            }
        }
        failed
    }

    /// Phase one: validate the batch and write every file. If any write
    /// fails, the files already written for this batch are removed before the
    /// error is returned.
    pub async fn stage(&self, uploads: &[Upload]) -> Result<StagedFiles, ApiError> {
        Self::validate_batch(uploads)?;

        let mut staged = StagedFiles::default();
        for upload in uploads {
            match self.store(upload).await {
                Ok(name) => staged.names.push(name),
                Err(e) => {
                    self.rollback(&staged).await;
                    return Err(e);
                }
            }
        }
        Ok(staged)
    }

    /// Phase two: the record now references the files; hand back their names.
    pub fn commit(&self, staged: StagedFiles) -> Vec<String> {
        staged.names
    }

    /// Undo a stage. Idempotent: already-removed files are skipped, and
    /// failures are logged rather than returned so they never mask the error
    /// that triggered the rollback.
    pub async fn rollback(&self, staged: &StagedFiles) {
        if staged.is_empty() {
            return;
        }
        let failed = self.remove_all(&staged.names).await;
        if failed > 0 {
            error!("Rollback left {} of {} staged attachments behind", failed, staged.len());
        } else {
            info!("Rolled back {} staged attachments", staged.len());
        }
    }
}

/// Accept only the allowed MIME types, with an extension that belongs to the
/// declared type, and at most `MAX_FILE_SIZE` bytes.
pub fn validate_upload(upload: &Upload) -> Result<(), ApiError> {
    let mime = upload
        .content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let Some((_, extensions)) = ALLOWED_TYPES.iter().find(|(allowed, _)| *allowed == mime) else {
        return Err(ApiError::InvalidFile(format!(
            "{}: only JPEG, PNG and PDF files are allowed",
            upload.file_name
        )));
    };

    match extension(&upload.file_name) {
        Some(ext) if extensions.contains(&ext.as_str()) => {}
        _ => {
            return Err(ApiError::InvalidFile(format!(
                "{}: file extension does not match {}",
                upload.file_name, mime
            )));
        }
    }

    if upload.data.is_empty() {
        return Err(ApiError::InvalidFile(format!("{}: file is empty", upload.file_name)));
    }
    if upload.data.len() > MAX_FILE_SIZE {
        return Err(ApiError::InvalidFile(format!(
            "{}: file exceeds the {} MB limit",
            upload.file_name,
            MAX_FILE_SIZE / (1024 * 1024)
        )));
    }

    Ok(())
}

/// True for names of the form `{millis}-{digits}.{ext}` this manager
/// generates. Anything else (paths, dots, separators) is rejected before it
/// reaches the store.
pub fn is_stored_name(name: &str) -> bool {
    let Some((millis, rest)) = name.split_once('-') else {
        return false;
    };
    let Some((random, ext)) = rest.split_once('.') else {
        return false;
    };
    !millis.is_empty()
        && millis.bytes().all(|b| b.is_ascii_digit())
        && !random.is_empty()
        && random.bytes().all(|b| b.is_ascii_digit())
        && ALLOWED_TYPES.iter().any(|(_, exts)| exts.contains(&ext))
}

fn extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn stored_name(ext: &str) -> String {
    let random: u32 = rand::rng().random_range(0..1_000_000_000);
    if ext.is_empty() {
        format!("{}-{}", Utc::now().timestamp_millis(), random)
    } else {
        format!("{}-{}.{}", Utc::now().timestamp_millis(), random, ext)
    }
}
