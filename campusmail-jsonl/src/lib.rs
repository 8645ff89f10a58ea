//! JSONL adapters for `campusmail`.
//!
//! - [`JsonlSink`]: appends one telemetry event per line.
//! - [`JsonlMailStore`]: a file-backed [`MailStore`] holding one record per line.

use async_trait::async_trait;
use campusmail::error::StoreError;
use campusmail::store::{DispatchClaim, MailStore};
use campusmail::telemetry::{event_to_json, MailEvent, TelemetrySink};
use campusmail::{DigestEntry, ScheduledMessage};
use chrono::{DateTime, FixedOffset};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl tower_service::Service<MailEvent> for JsonlSink {
    type Response = ();
    type Error = io::Error;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: MailEvent) -> Self::Future {
        let path = self.path.clone();
        let line = event_to_json(&event).to_string() + "\n";
        Box::pin(async move {
            let mut file =
                tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
            Ok(())
        })
    }
}

impl TelemetrySink for JsonlSink {
    type SinkError = io::Error;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Record {
    Scheduled(ScheduledMessage),
    Digest(DigestEntry),
}

/// A [`MailStore`] persisted as JSON lines.
///
/// Every operation re-reads the file, so separate processes (the server and
/// the dispatch binary) observe each other's writes. Reads hold a shared
/// advisory lock on `<path>.lock` and read-modify-write cycles hold it
/// exclusively. Writes go to a fresh temporary file in the same directory,
/// which is then persisted over the original.
///
/// File work runs on the blocking pool and completes even when the calling
/// future is dropped, so a timed-out caller never leaves a half-written file.
#[derive(Clone, Debug)]
pub struct JsonlMailStore {
    path: PathBuf,
}

impl JsonlMailStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Advisory lock file guarding the records.
    pub fn lock_path(&self) -> PathBuf {
        suffixed(&self.path, ".lock")
    }

    /// Lock file held for the length of a dispatch scan.
    pub fn dispatch_lock_path(&self) -> PathBuf {
        suffixed(&self.path, ".dispatch.lock")
    }

    async fn read<T, F>(&self, view: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&[Record]) -> T + Send + 'static,
    {
        let path = self.path.clone();
        let lock = self.lock_path();
        on_blocking_pool(move || {
            let _lock = FileLock::shared(&lock)?;
            Ok(view(&load(&path)?))
        })
        .await
    }

    /// Load, apply `change`, and save when the record count moved, all under
    /// the exclusive lock.
    async fn update<T, F>(&self, change: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Vec<Record>) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.path.clone();
        let lock = self.lock_path();
        on_blocking_pool(move || {
            let _lock = FileLock::exclusive(&lock)?;
            let mut records = load(&path)?;
            let before = records.len();
            let outcome = change(&mut records)?;
            if records.len() != before {
                save(&path, &records)?;
            }
            Ok(outcome)
        })
        .await
    }
}

/// An `fs2` advisory lock, released when dropped.
struct FileLock {
    file: File,
}

impl FileLock {
    fn open(path: &Path) -> Result<File, StoreError> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|err| unavailable(path, err))
    }

    fn shared(path: &Path) -> Result<Self, StoreError> {
        let file = Self::open(path)?;
        FileExt::lock_shared(&file).map_err(|err| unavailable(path, err))?;
        Ok(Self { file })
    }

    fn exclusive(path: &Path) -> Result<Self, StoreError> {
        let file = Self::open(path)?;
        FileExt::lock_exclusive(&file).map_err(|err| unavailable(path, err))?;
        Ok(Self { file })
    }

    /// `Ok(None)` when another holder has it.
    fn try_exclusive(path: &Path) -> Result<Option<Self>, StoreError> {
        let file = Self::open(path)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(Self { file })),
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(err) => Err(unavailable(path, err)),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

async fn on_blocking_pool<T, F>(work: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| StoreError::Unavailable(format!("store task failed: {err}")))?
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn load(path: &Path) -> Result<Vec<Record>, StoreError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(unavailable(path, err)),
    };
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|err| {
                StoreError::Corrupt(format!("{}:{}: {}", path.display(), index + 1, err))
            })
        })
        .collect()
}

fn save(path: &Path, records: &[Record]) -> Result<(), StoreError> {
    let mut buf = String::new();
    for record in records {
        let line =
            serde_json::to_string(record).map_err(|err| StoreError::Corrupt(err.to_string()))?;
        buf.push_str(&line);
        buf.push('\n');
    }
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(|err| unavailable(dir, err))?;
    tmp.write_all(buf.as_bytes()).map_err(|err| unavailable(tmp.path(), err))?;
    tmp.as_file().sync_all().map_err(|err| unavailable(tmp.path(), err))?;
    tmp.persist(path).map_err(|err| unavailable(path, err.error))?;
    Ok(())
}

fn scheduled(records: &[Record]) -> impl Iterator<Item = &ScheduledMessage> {
    records.iter().filter_map(|r| match r {
        Record::Scheduled(m) => Some(m),
        Record::Digest(_) => None,
    })
}

fn digests(records: &[Record]) -> impl Iterator<Item = &DigestEntry> {
    records.iter().filter_map(|r| match r {
        Record::Digest(d) => Some(d),
        Record::Scheduled(_) => None,
    })
}

fn unavailable(path: &Path, err: io::Error) -> StoreError {
    tracing::warn!(path = %path.display(), error = %err, "jsonl store I/O failed");
    StoreError::Unavailable(format!("{}: {}", path.display(), err))
}

fn sorted(mut messages: Vec<ScheduledMessage>) -> Vec<ScheduledMessage> {
    messages.sort_by_key(|m| m.send_at);
    messages
}

#[async_trait]
impl MailStore for JsonlMailStore {
    async fn find_scheduled(
        &self,
        identity: &str,
        send_at: &DateTime<FixedOffset>,
    ) -> Result<Option<ScheduledMessage>, StoreError> {
        let identity = identity.to_string();
        let send_at = *send_at;
        self.read(move |records| {
            scheduled(records).find(|m| m.identity == identity && m.send_at == send_at).cloned()
        })
        .await
    }

    async fn list_scheduled(&self, identity: &str) -> Result<Vec<ScheduledMessage>, StoreError> {
        let identity = identity.to_string();
        self.read(move |records| {
            sorted(scheduled(records).filter(|m| m.identity == identity).cloned().collect())
        })
        .await
    }

    async fn insert_scheduled(&self, message: ScheduledMessage) -> Result<(), StoreError> {
        self.update(move |records| {
            if scheduled(records)
                .any(|m| m.identity == message.identity && m.send_at == message.send_at)
            {
                return Err(StoreError::Duplicate {
                    identity: message.identity,
                    key: message.send_at.to_rfc3339(),
                });
            }
            records.push(Record::Scheduled(message));
            Ok(())
        })
        .await
    }

    async fn delete_scheduled(&self, id: Uuid) -> Result<bool, StoreError> {
        self.update(move |records| {
            let before = records.len();
            records.retain(|r| !matches!(r, Record::Scheduled(m) if m.id == id));
            Ok(records.len() != before)
        })
        .await
    }

    async fn due_scheduled(
        &self,
        cutoff: &DateTime<FixedOffset>,
    ) -> Result<Vec<ScheduledMessage>, StoreError> {
        let cutoff = *cutoff;
        self.read(move |records| {
            sorted(scheduled(records).filter(|m| m.send_at <= cutoff).cloned().collect())
        })
        .await
    }

    async fn find_digest(&self, identity: &str) -> Result<Option<DigestEntry>, StoreError> {
        let identity = identity.to_string();
        self.read(move |records| digests(records).find(|d| d.identity == identity).cloned()).await
    }

    async fn insert_digest(&self, entry: DigestEntry) -> Result<(), StoreError> {
        self.update(move |records| {
            if digests(records).any(|d| d.identity == entry.identity) {
                return Err(StoreError::Duplicate { identity: entry.identity, key: "digest".into() });
            }
            records.push(Record::Digest(entry));
            Ok(())
        })
        .await
    }

    async fn delete_digest(&self, identity: &str) -> Result<bool, StoreError> {
        let identity = identity.to_string();
        self.update(move |records| {
            let before = records.len();
            records.retain(|r| !matches!(r, Record::Digest(d) if d.identity == identity));
            Ok(records.len() != before)
        })
        .await
    }

    async fn claim_dispatch(&self) -> Result<Option<DispatchClaim>, StoreError> {
        let lock = self.dispatch_lock_path();
        let held = on_blocking_pool(move || FileLock::try_exclusive(&lock)).await?;
        Ok(held.map(DispatchClaim::holding))
    }
}
