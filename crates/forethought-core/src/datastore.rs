use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{Span, debug, info};
use uuid::Uuid;

use crate::auth::Credential;
use crate::error::StoreError;
use crate::store::TaskStore;
use crate::task::{CompletionChange, FieldPatch, Task};

/// File-backed [`TaskStore`]: one JSON-lines file per user subject.
///
/// Clones share the same directory and write lock. File I/O runs on the
/// blocking pool so async callers never stall their executor.
#[derive(Debug, Clone)]
pub struct DataStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    data_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened datastore");

        Ok(Self {
            inner: Arc::new(Inner {
                data_dir,
                write_lock: Mutex::new(()),
            }),
        })
    }

    pub fn tasks_path(&self, credential: &Credential) -> PathBuf {
        self.inner.tasks_path(credential)
    }

    /// Synchronous read of every record for `credential`.
    pub fn load(&self, credential: &Credential) -> anyhow::Result<Vec<Task>> {
        self.inner.load(credential)
    }

    pub fn save(&self, credential: &Credential, tasks: &[Task]) -> anyhow::Result<()> {
        self.inner.save(credential, tasks)
    }

    /// Run `op` on the blocking pool inside the caller's span.
    async fn blocking<T, F>(&self, credential: &Credential, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Inner, &Credential) -> Result<T, StoreError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let credential = credential.clone();
        let span = Span::current();
        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            op(&inner, &credential)
        })
        .await
        .map_err(|err| StoreError::Backend(anyhow!("datastore worker failed: {err}")))?
    }
}

impl Inner {
    fn tasks_path(&self, credential: &Credential) -> PathBuf {
        self.data_dir
            .join(format!("tasks.{}.data", sanitize_subject(credential.subject())))
    }

    #[tracing::instrument(skip(self, credential), fields(subject = credential.subject()))]
    fn load(&self, credential: &Credential) -> anyhow::Result<Vec<Task>> {
        let path = self.tasks_path(credential);
        if !path.exists() {
            debug!(file = %path.display(), "no task file yet");
            return Ok(Vec::new());
        }
        load_jsonl(&path).with_context(|| format!("failed to load {}", path.display()))
    }

    #[tracing::instrument(skip(self, credential, tasks), fields(subject = credential.subject()))]
    fn save(&self, credential: &Credential, tasks: &[Task]) -> anyhow::Result<()> {
        let path = self.tasks_path(credential);
        save_jsonl_atomic(&path, tasks).with_context(|| format!("failed to save {}", path.display()))
    }

    /// Load, edit one record in place, save. Serialized per store.
    fn modify<F>(&self, credential: &Credential, uuid: Uuid, edit: F) -> Result<Task, StoreError>
    where
        F: FnOnce(&mut Task),
    {
        let _guard = self.write_lock.lock();
        let mut tasks = self.load(credential)?;
        let task = tasks
            .iter_mut()
            .find(|task| task.uuid == uuid)
            .ok_or(StoreError::NotFound(uuid))?;
        edit(task);
        let updated = task.clone();
        self.save(credential, &tasks)?;
        Ok(updated)
    }
}

#[async_trait]
impl TaskStore for DataStore {
    async fn list_all(&self, credential: &Credential) -> Result<Vec<Task>, StoreError> {
        self.blocking(credential, |inner, credential| Ok(inner.load(credential)?))
            .await
    }

    #[tracing::instrument(skip(self, credential, task), fields(uuid = %task.uuid))]
    async fn create(&self, credential: &Credential, task: Task) -> Result<Task, StoreError> {
        self.blocking(credential, move |inner, credential| {
            let _guard = inner.write_lock.lock();
            let mut tasks = inner.load(credential)?;
            if tasks.iter().any(|existing| existing.uuid == task.uuid) {
                return Err(anyhow!("duplicate task uuid: {}", task.uuid).into());
            }
            tasks.push(task.clone());
            inner.save(credential, &tasks)?;
            Ok(task)
        })
        .await
    }

    #[tracing::instrument(skip(self, credential, change), fields(uuid = %uuid, completed = change.completed))]
    async fn update_completion(
        &self,
        credential: &Credential,
        uuid: Uuid,
        change: CompletionChange,
    ) -> Result<Task, StoreError> {
        self.blocking(credential, move |inner, credential| {
            inner.modify(credential, uuid, |task| task.apply_completion(&change))
        })
        .await
    }

    #[tracing::instrument(skip(self, credential, patch), fields(uuid = %uuid))]
    async fn update_fields(
        &self,
        credential: &Credential,
        uuid: Uuid,
        patch: FieldPatch,
    ) -> Result<Task, StoreError> {
        self.blocking(credential, move |inner, credential| {
            inner.modify(credential, uuid, |task| task.apply_patch(&patch))
        })
        .await
    }

    #[tracing::instrument(skip(self, credential), fields(uuid = %uuid))]
    async fn delete(&self, credential: &Credential, uuid: Uuid) -> Result<(), StoreError> {
        self.blocking(credential, move |inner, credential| {
            let _guard = inner.write_lock.lock();
            let mut tasks = inner.load(credential)?;
            let before_count = tasks.len();
            tasks.retain(|task| task.uuid != uuid);
            if tasks.len() == before_count {
                return Err(StoreError::NotFound(uuid));
            }
            inner.save(credential, &tasks)?;
            info!(remaining = tasks.len(), "deleted task");
            Ok(())
        })
        .await
    }
}

fn sanitize_subject(subject: &str) -> String {
    subject
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> anyhow::Result<Vec<Task>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let task: Task = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(task);
    }

    debug!(count = out.len(), "loaded tasks from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, tasks))]
fn save_jsonl_atomic(path: &Path, tasks: &[Task]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = tasks.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for task in tasks {
        let serialized = serde_json::to_string(task)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::sanitize_subject;

    #[test]
    fn subjects_become_safe_file_stems() {
        assert_eq!(sanitize_subject("user_2abc-XY"), "user_2abc-XY");
        assert_eq!(sanitize_subject("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_subject("a@b.c"), "a_b_c");
    }
}
