//! Durable on-disk spool (spec §4.B)
//!
//! A directory per kind (`msgs`, `statuses`, `events`). Writes are
//! atomic: stage into a temp file in the same directory, then rename
//! into place, so a reader never observes a partial write.

use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpoolKind {
    Msgs,
    Statuses,
    Events,
}

impl SpoolKind {
    fn dirname(self) -> &'static str {
        match self {
            SpoolKind::Msgs => "msgs",
            SpoolKind::Statuses => "statuses",
            SpoolKind::Events => "events",
        }
    }
}

pub struct Spool {
    root: PathBuf,
}

impl Spool {
    /// Ensures all three kind subdirectories exist and are writable
    /// (spec §4.M `Start`).
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for kind in [SpoolKind::Msgs, SpoolKind::Statuses, SpoolKind::Events] {
            std::fs::create_dir_all(root.join(kind.dirname()))?;
        }
        Ok(Self { root })
    }

    fn dir(&self, kind: SpoolKind) -> PathBuf {
        self.root.join(kind.dirname())
    }

    /// `{ts}-{rand}.json`, written to a temp file then renamed into
    /// place so partial writes are never visible.
    pub fn write(&self, kind: SpoolKind, payload: &[u8]) -> Result<PathBuf> {
        let dir = self.dir(kind);
        let ts = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let rand_suffix: u32 = rand::thread_rng().gen();
        let final_path = dir.join(format!("{ts}-{rand_suffix:08x}.json"));
        let tmp_path = dir.join(format!(".{ts}-{rand_suffix:08x}.json.tmp"));

        {
            use std::io::Write;
            let mut f = std::fs::File::create(&tmp_path)?;
            f.write_all(payload)?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(final_path)
    }

    /// Files in age order (oldest first), for flushers to replay.
    pub fn list(&self, kind: SpoolKind) -> Result<Vec<PathBuf>> {
        let mut entries: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(self.dir(kind))? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            entries.push((modified, path));
        }
        entries.sort_by_key(|(t, _)| *t);
        Ok(entries.into_iter().map(|(_, p)| p).collect())
    }

    pub fn read(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(std::fs::read(path)?)
    }

    pub fn remove(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Rename to `*.error` so a flusher pass can skip it without
    /// retrying it forever.
    pub fn mark_errored(&self, path: &Path) -> Result<()> {
        let errored = path.with_extension("json.error");
        match std::fs::rename(path, &errored) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to mark spool file as errored");
                Err(e.into())
            }
        }
    }
}

/// Outcome a spool replay callback returns for a single file.
pub enum ReplayOutcome {
    /// Row persisted; delete the file.
    Success,
    /// Unmarshal failure; file has been renamed to `*.error`, continue.
    Malformed,
    /// Transient failure; stop this pass and retry next tick.
    Retry,
}

/// Iterates files in age order and invokes `callback(path, bytes)`.
/// On `Malformed` the file is already renamed by the callback; on
/// `Retry` the whole pass stops so the next tick starts from the same
/// file (spec §4.B).
pub async fn replay<F, Fut>(spool: &Spool, kind: SpoolKind, callback: F) -> Result<()>
where
    F: Fn(PathBuf, Vec<u8>) -> Fut,
    Fut: std::future::Future<Output = ReplayOutcome>,
{
    for path in spool.list(kind)? {
        let bytes = match spool.read(&path) {
            Ok(b) => b,
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to read spool file");
                break;
            }
        };
        match callback(path.clone(), bytes).await {
            ReplayOutcome::Success => {
                spool.remove(&path)?;
            }
            ReplayOutcome::Malformed => continue,
            ReplayOutcome::Retry => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_list_then_read_round_trips() {
        let dir = std::env::temp_dir().join(format!("courier-spool-test-{}", std::process::id()));
        let spool = Spool::open(&dir).unwrap();
        spool.write(SpoolKind::Msgs, b"{\"hello\":true}").unwrap();
        let files = spool.list(SpoolKind::Msgs).unwrap();
        assert_eq!(files.len(), 1);
        let bytes = spool.read(&files[0]).unwrap();
        assert_eq!(bytes, b"{\"hello\":true}");
        spool.remove(&files[0]).unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn replay_deletes_on_success() {
        let dir = std::env::temp_dir().join(format!("courier-spool-replay-{}", std::process::id()));
        let spool = Spool::open(&dir).unwrap();
        spool.write(SpoolKind::Statuses, b"{}").unwrap();

        replay(&spool, SpoolKind::Statuses, |_path, _bytes| async {
            ReplayOutcome::Success
        })
        .await
        .unwrap();

        assert!(spool.list(SpoolKind::Statuses).unwrap().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }
}
