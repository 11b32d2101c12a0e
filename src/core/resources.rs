//! Scoped ownership of files, SQLite connections, and spawned tasks.
//!
//! Everything ephemeral a job acquires goes through one manager instance, so
//! a single `cancel_all` at shutdown releases it deterministically. Scoped
//! acquisition hands the resource to a closure and wires the release path
//! before the caller ever sees it: release happens exactly once per
//! acquisition, on every exit path.

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use parking_lot::Mutex;
use rusqlite::Connection;
use tokio::fs::{File, OpenOptions};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::error::{AppResult, RuntimeError};

/// How a scoped file should be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Open an existing file read-only.
    Read,
    /// Create or truncate for writing.
    Write,
    /// Create if missing, append to the end.
    Append,
}

/// Scope-counting guard: increments on acquisition, decrements on any exit.
struct Gauge<'a>(&'a AtomicUsize);

impl<'a> Gauge<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Gauge<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Single point of ownership for ephemeral OS resources and spawned tasks.
#[derive(Default)]
pub struct ResourceManager {
    tasks: Mutex<Vec<JoinHandle<()>>>,
    open_files: AtomicUsize,
    open_connections: AtomicUsize,
}

impl ResourceManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `path` and run `scope` with ownership of the handle.
    ///
    /// The handle is dropped (closed) when the scope's future completes,
    /// whether it returns `Ok` or `Err`. Callers that buffer writes should
    /// flush inside the scope.
    ///
    /// # Errors
    ///
    /// Open failures propagate to the caller before the scope runs; nothing
    /// is registered for a failed acquisition. Scope errors pass through
    /// unchanged.
    pub async fn with_file<F, Fut, T>(
        &self,
        path: impl AsRef<Path>,
        mode: FileMode,
        scope: F,
    ) -> AppResult<T>
    where
        F: FnOnce(File) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let path = path.as_ref();
        let file = match mode {
            FileMode::Read => File::open(path).await,
            FileMode::Write => File::create(path).await,
            FileMode::Append => {
                OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(path)
                    .await
            }
        }
        .map_err(RuntimeError::Io)
        .with_context(|| format!("opening {}", path.display()))?;

        let _gauge = Gauge::new(&self.open_files);
        scope(file).await
    }

    /// Open a SQLite connection at `path` and run `scope` against it.
    ///
    /// On scope exit the connection is rolled back if a transaction was left
    /// open, then closed, so an interrupted transaction never dangles. The
    /// closure is synchronous; callers inside async contexts should wrap the
    /// whole call in `spawn_blocking` when the work is heavy.
    ///
    /// # Errors
    ///
    /// Connection-open failures propagate before the scope runs; scope
    /// errors pass through unchanged (after the rollback).
    pub fn with_db<T>(
        &self,
        path: impl AsRef<Path>,
        scope: impl FnOnce(&mut Connection) -> AppResult<T>,
    ) -> AppResult<T> {
        let path = path.as_ref();
        let mut conn = Connection::open(path)
            .map_err(RuntimeError::Database)
            .with_context(|| format!("opening database {}", path.display()))?;

        let _gauge = Gauge::new(&self.open_connections);
        let result = scope(&mut conn);

        if !conn.is_autocommit() {
            // The scope bailed out mid-transaction.
            if let Err(err) = conn.execute_batch("ROLLBACK") {
                warn!(error = %err, "rollback of dangling transaction failed");
            }
        }
        result
    }

    /// Track a running task for later bulk cancellation.
    ///
    /// Registration does not change the task's scheduling.
    pub fn add_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    /// Abort every tracked task and wait for each to reach a terminal state.
    ///
    /// Tasks that already completed are tolerated; cancellation is a normal
    /// exit, not an error. A no-op when nothing is tracked.
    pub async fn cancel_all(&self) {
        let handles = std::mem::take(&mut *self.tasks.lock());
        if handles.is_empty() {
            return;
        }
        debug!(count = handles.len(), "cancelling tracked tasks");
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            match handle.await {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => {}
                Err(err) => warn!(error = %err, "tracked task ended abnormally"),
            }
        }
    }

    /// Files currently held by active [`with_file`](Self::with_file) scopes.
    #[must_use]
    pub fn open_files(&self) -> usize {
        self.open_files.load(Ordering::SeqCst)
    }

    /// Connections currently held by active [`with_db`](Self::with_db) scopes.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::SeqCst)
    }

    /// Tasks registered and not yet released by `cancel_all`.
    #[must_use]
    pub fn tracked_tasks(&self) -> usize {
        self.tasks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn file_scope_writes_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.log");
        let manager = ResourceManager::new();

        manager
            .with_file(&path, FileMode::Write, |mut file| async move {
                file.write_all(b"bssid=aa:bb capture ok\n").await?;
                file.flush().await?;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(manager.open_files(), 0);

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, "bssid=aa:bb capture ok\n");
    }

    #[tokio::test]
    async fn file_scope_error_still_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.log");
        let manager = ResourceManager::new();

        let result: AppResult<()> = manager
            .with_file(&path, FileMode::Write, |_file| async {
                Err(anyhow::anyhow!("disk full"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(manager.open_files(), 0);
    }

    #[tokio::test]
    async fn failed_open_registers_nothing() {
        let manager = ResourceManager::new();
        let result: AppResult<()> = manager
            .with_file("/nonexistent/dir/missing", FileMode::Read, |_f| async {
                Ok(())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(manager.open_files(), 0);
    }

    #[tokio::test]
    async fn db_scope_commits_normally() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scans.db");
        let manager = ResourceManager::new();

        manager
            .with_db(&path, |conn| {
                conn.execute_batch(
                    "CREATE TABLE sightings (bssid TEXT);
                     INSERT INTO sightings VALUES ('aa:bb:cc');",
                )?;
                Ok(())
            })
            .unwrap();
        assert_eq!(manager.open_connections(), 0);

        let count: i64 = manager
            .with_db(&path, |conn| {
                let n = conn.query_row("SELECT COUNT(*) FROM sightings", [], |row| row.get(0))?;
                Ok(n)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn interrupted_transaction_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scans.db");
        let manager = ResourceManager::new();

        manager
            .with_db(&path, |conn| {
                conn.execute_batch("CREATE TABLE sightings (bssid TEXT);")?;
                Ok(())
            })
            .unwrap();

        // Leave a transaction open by erroring before COMMIT.
        let result: AppResult<()> = manager.with_db(&path, |conn| {
            conn.execute_batch("BEGIN; INSERT INTO sightings VALUES ('dd:ee:ff');")?;
            Err(anyhow::anyhow!("validation failed mid-batch"))
        });
        assert!(result.is_err());
        assert_eq!(manager.open_connections(), 0);

        let count: i64 = manager
            .with_db(&path, |conn| {
                let n = conn.query_row("SELECT COUNT(*) FROM sightings", [], |row| row.get(0))?;
                Ok(n)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn cancel_all_reaches_terminal_state_for_every_task() {
        let manager = ResourceManager::new();
        for _ in 0..3 {
            manager.add_task(tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }));
        }
        // One task that finishes on its own before cancellation lands.
        manager.add_task(tokio::spawn(async {}));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.tracked_tasks(), 4);

        manager.cancel_all().await;
        assert_eq!(manager.tracked_tasks(), 0);
    }

    #[tokio::test]
    async fn cancel_all_with_nothing_tracked_is_a_noop() {
        let manager = ResourceManager::new();
        manager.cancel_all().await;
        assert_eq!(manager.tracked_tasks(), 0);
    }
}
