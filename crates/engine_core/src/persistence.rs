//! Disk snapshotting of the job store (spec §6 "Persistence format",
//! supplementing the distilled spec with the original's on-restart
//! recovery behavior).
//!
//! A snapshot captures each job's identity, status, timestamps, and —
//! for a terminal job — its outcome: a string rendering of the result
//! for `done`, the error's `Display` for `failed`. It never captures
//! the callable, engine back-reference, or backend handle, none of
//! which survive a process restart. Restoring a snapshot therefore
//! never auto-resumes an active job: `pending` and `running` entries
//! come back as inert historical records an operator can inspect or
//! explicitly `rerun`, per the Open Question resolution in DESIGN.md.
//!
//! The result string is not a type-preserving round trip: `JobOutput`
//! is `Arc<dyn Any + Send + Sync>`, which carries no generic `Debug` or
//! `Serialize` impl to call, only a whitelist of common concrete types
//! this module knows how to downcast (see [`describe_result`]). A
//! result of an unrecognized type persists as an opaque marker rather
//! than being silently dropped.
//!
//! On disk, `<cache_path>/<status>/<job-id>.bin` mirrors the status
//! store layout from spec §6 — one subdirectory per status, one
//! bincode-serialized entry per job id. The per-entry wire format is
//! `bincode`, matching the crate's other binary-serialization uses; it
//! carries no cross-version compatibility guarantee (the other Open
//! Question spec §9 leaves implementation-defined).

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::{DateTime, Utc};
use engine_ids::JobId;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::job::{JobOutput, Status};
use crate::manager::Jobs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub name: String,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    /// Present only when `status == Done`: a string rendering of the
    /// result (spec §8 "preserves... final result").
    pub result: Option<String>,
    /// Present only when `status == Failed`: the error's `Display`.
    pub error: Option<String>,
}

/// Render a job's type-erased result as a string, for the common
/// concrete types jobs in this codebase actually return. Falls back to
/// an opaque marker for anything else, rather than guessing.
fn describe_result(output: &JobOutput) -> String {
    if output.downcast_ref::<()>().is_some() {
        return "()".to_string();
    }
    if let Some(v) = output.downcast_ref::<i64>() {
        return v.to_string();
    }
    if let Some(v) = output.downcast_ref::<i32>() {
        return v.to_string();
    }
    if let Some(v) = output.downcast_ref::<u64>() {
        return v.to_string();
    }
    if let Some(v) = output.downcast_ref::<f64>() {
        return v.to_string();
    }
    if let Some(v) = output.downcast_ref::<bool>() {
        return v.to_string();
    }
    if let Some(v) = output.downcast_ref::<String>() {
        return v.clone();
    }
    if let Some(v) = output.downcast_ref::<std::path::PathBuf>() {
        return v.display().to_string();
    }
    "<opaque result: type not representable on disk>".to_string()
}

fn status_dir_name(status: Status) -> &'static str {
    match status {
        Status::Created => "created",
        Status::Pending => "pending",
        Status::Running => "running",
        Status::Done => "done",
        Status::Failed => "failed",
        Status::Cancelled => "cancelled",
    }
}

pub fn snapshot_of(jobs: &Jobs) -> Vec<JobSnapshot> {
    jobs.all_jobs()
        .into_iter()
        .map(|job| {
            let result = if job.status() == Status::Done {
                job.result().ok().as_ref().map(describe_result)
            } else {
                None
            };
            let error = job.exception().map(|e| format!("{e:#}"));
            JobSnapshot {
                id: job.id().clone(),
                name: job.name().to_string(),
                status: job.status(),
                created_at: job.created_at(),
                stopped_at: job.stopped_at(),
                result,
                error,
            }
        })
        .collect()
}

/// Write one file per job under `<cache_path>/<status>/<job-id>.bin`,
/// clearing any status subdirectories from a prior save first so a job
/// that changed status doesn't leave a stale duplicate behind.
pub fn save_snapshot(cache_path: &Path, snapshots: &[JobSnapshot]) -> Result<()> {
    for status in Status::STORE_STATUSES {
        let dir = cache_path.join(status_dir_name(status));
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
    }
    for snapshot in snapshots {
        let dir = cache_path.join(status_dir_name(snapshot.status));
        std::fs::create_dir_all(&dir)?;
        let file = File::create(dir.join(format!("{}.bin", snapshot.id.as_str())))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, snapshot)?;
    }
    Ok(())
}

/// Load every job snapshot found under any status subdirectory of
/// `cache_path`. Returns an empty vector if `cache_path` itself does
/// not exist yet (a fresh engine with no prior run).
pub fn load_snapshot(cache_path: &Path) -> Result<Vec<JobSnapshot>> {
    let mut snapshots = Vec::new();
    if !cache_path.exists() {
        return Ok(snapshots);
    }
    for status in Status::STORE_STATUSES {
        let dir = cache_path.join(status_dir_name(status));
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            let file = File::open(entry.path())?;
            let reader = BufReader::new(file);
            let snapshot: JobSnapshot = bincode::deserialize_from(reader)?;
            snapshots.push(snapshot);
        }
    }
    Ok(snapshots)
}
