//! Durable snapshot persistence and single-instance locking (C2).
//!
//! Mirrors the source project's `scoop.json` / `scoop.json.lock` pair: the
//! snapshot is a self-describing JSON document, the lock file's presence
//! asserts single-instance ownership of the data directory.

use crate::graph::Graph;
use chrono::Utc;
use eyre::{eyre, Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const SNAPSHOT_FILE: &str = "scoop.json";
const LOCK_FILE: &str = "scoop.json.lock";

#[cfg(unix)]
const DIR_MODE: u32 = 0o700;
#[cfg(unix)]
const FILE_MODE: u32 = 0o700;

pub struct SnapshotStore {
    dir: PathBuf,
    // Held for the lifetime of the process: both the advisory OS-level lock
    // and the file descriptor itself keep the lock file meaningfully "ours".
    _lock_guard: File,
}

impl SnapshotStore {
    fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    fn lock_path_for(dir: &Path) -> PathBuf {
        dir.join(LOCK_FILE)
    }

    /// Loads (or initializes) the graph for `dir`, taking single-instance
    /// ownership of it in the process.
    ///
    /// Fails if another instance already owns `dir`, if the directory can't
    /// be created/locked, or if an existing snapshot fails to parse — all of
    /// these are startup-fatal per SPEC_FULL.md §7.
    pub fn load(dir: impl Into<PathBuf>) -> Result<(Self, Graph)> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .wrap_err_with(|| format!("failed to create data directory {}", dir.display()))?;
        set_permissions(&dir, DIR_MODE)?;

        let lock_path = Self::lock_path_for(&dir);
        let lock_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| {
                eyre!(
                    "data directory {} is already locked by another instance ({}: {e})",
                    dir.display(),
                    lock_path.display()
                )
            })?;
        lock_file
            .try_lock_exclusive()
            .map_err(|e| eyre!("failed to take exclusive lock on {}: {e}", lock_path.display()))?;

        use std::io::Write;
        let mut pid_writer = &lock_file;
        write!(pid_writer, "{}", std::process::id())
            .wrap_err_with(|| format!("failed to write pid to {}", lock_path.display()))?;
        set_permissions(&lock_path, FILE_MODE)?;

        let store = SnapshotStore {
            dir,
            _lock_guard: lock_file,
        };

        let snapshot_path = store.snapshot_path();
        let graph = if snapshot_path.exists() {
            let raw = fs::read_to_string(&snapshot_path)
                .wrap_err_with(|| format!("failed to read snapshot {}", snapshot_path.display()))?;
            serde_json::from_str(&raw)
                .wrap_err_with(|| format!("failed to parse snapshot {}", snapshot_path.display()))?
        } else {
            Graph::new(Utc::now())
        };

        tracing::info!(
            dir = %store.dir.display(),
            pkgs = graph.pkgs.len(),
            loaded_from_disk = snapshot_path.exists(),
            "store loaded"
        );

        Ok((store, graph))
    }

    /// Persists `graph`, stamping `updated_at`, then releases the instance
    /// lock. Consumes `self`: once unloaded, this handle is no longer a
    /// valid owner of the data directory.
    ///
    /// An I/O failure here is surfaced to the caller (who logs it) but is
    /// non-fatal to the shutdown sequence; the lock file is intentionally
    /// left behind on failure so a crashed/interrupted write leaves evidence.
    pub fn unload(self, mut graph: Graph) -> Result<()> {
        graph.updated_at = Utc::now();

        let snapshot_path = self.snapshot_path();
        let json = serde_json::to_string_pretty(&graph)
            .wrap_err("failed to serialize snapshot")?;

        let tmp_path = snapshot_path.with_extension("json.tmp");
        fs::write(&tmp_path, &json)
            .wrap_err_with(|| format!("failed to write temp snapshot {}", tmp_path.display()))?;
        set_permissions(&tmp_path, FILE_MODE)?;

        if let Err(err) = fs::rename(&tmp_path, &snapshot_path) {
            if cfg!(windows) {
                let _ = fs::remove_file(&snapshot_path);
                fs::rename(&tmp_path, &snapshot_path).wrap_err_with(|| {
                    format!("failed to replace snapshot {}", snapshot_path.display())
                })?;
            } else {
                return Err(eyre!(
                    "failed to replace snapshot {}: {err}",
                    snapshot_path.display()
                ));
            }
        }

        let lock_path = Self::lock_path_for(&self.dir);
        fs::remove_file(&lock_path)
            .wrap_err_with(|| format!("failed to remove lock file {}", lock_path.display()))?;

        tracing::info!(
            dir = %self.dir.display(),
            pkgs = graph.pkgs.len(),
            "store unloaded"
        );
        Ok(())
    }
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .wrap_err_with(|| format!("failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
