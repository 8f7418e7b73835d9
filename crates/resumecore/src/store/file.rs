use super::RunStore;
use crate::{IndexedChunk, RunId, RunRecord, StoreError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const RUN_FILE: &str = "run.json";
const CHUNKS_FILE: &str = "chunks.jsonl";

/// Directory-backed store: `<root>/<run id>/run.json` plus `chunks.jsonl`.
///
/// The run record is replaced atomically (temp file, fsync, rename). Chunks are
/// appended one JSON document per line.
pub struct FileRunStore {
    root: PathBuf,
}

impl FileRunStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, id: RunId) -> PathBuf {
        self.root.join(id.to_string())
    }
}

async fn atomic_write_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("path has no parent"))?;
    let tmp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name().and_then(|v| v.to_str()).unwrap_or("state"),
        std::process::id(),
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    );
    let tmp_path = parent.join(tmp_name);

    {
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp_path)
            .await?;
        file.write_all(content).await?;
        file.sync_all().await?;
    }

    fs::rename(&tmp_path, path).await
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn save_run(&self, run: &RunRecord) -> Result<(), StoreError> {
        let dir = self.run_dir(run.id);
        fs::create_dir_all(&dir).await?;
        let body = serde_json::to_vec_pretty(run)?;
        atomic_write_file(&dir.join(RUN_FILE), &body).await?;
        Ok(())
    }

    async fn load_run(&self, id: RunId) -> Result<Option<RunRecord>, StoreError> {
        let path = self.run_dir(id).join(RUN_FILE);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_runs(&self) -> Result<Vec<RunId>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Ok(id) = name.parse::<RunId>() {
                if fs::try_exists(entry.path().join(RUN_FILE)).await? {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn append_chunk(&self, id: RunId, chunk: &IndexedChunk) -> Result<(), StoreError> {
        let dir = self.run_dir(id);
        fs::create_dir_all(&dir).await?;
        let mut line = serde_json::to_vec(chunk)?;
        line.push(b'\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(CHUNKS_FILE))
            .await?;
        file.write_all(&line).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn load_chunks(&self, id: RunId) -> Result<Vec<IndexedChunk>, StoreError> {
        let path = self.run_dir(id).join(CHUNKS_FILE);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut chunks = Vec::with_capacity(lines.len());
        let mut torn = false;
        for (n, line) in lines.iter().enumerate() {
            match serde_json::from_str::<IndexedChunk>(line) {
                Ok(chunk) => chunks.push(chunk),
                // A torn final line is a write interrupted by a crash; it was never published.
                Err(e) if n + 1 == lines.len() => {
                    tracing::warn!("Dropping torn chunk line for run {}: {}", id, e);
                    torn = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
        if torn {
            let mut body = Vec::new();
            for chunk in &chunks {
                body.extend(serde_json::to_vec(chunk)?);
                body.push(b'\n');
            }
            atomic_write_file(&path, &body).await?;
        }

        for (expected, chunk) in chunks.iter().enumerate() {
            if chunk.index != expected as u64 {
                return Err(StoreError::Corrupt {
                    run_id: id,
                    reason: format!("expected chunk {}, found {}", expected, chunk.index),
                });
            }
        }
        Ok(chunks)
    }

    async fn delete_run(&self, id: RunId) -> Result<(), StoreError> {
        match fs::remove_dir_all(self.run_dir(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
