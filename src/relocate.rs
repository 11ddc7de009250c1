//! Moves clustered files into folders and keeps a history of the moves.
//!
//! This is a consumer of run results; nothing in the clustering modules
//! touches the filesystem. Item ids are file names relative to the root
//! directory.

use crate::dedupe::DedupeGroup;
use crate::nearest::NearestRun;
use crate::pachinko::Bucket;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub const HISTORY_FILE: &str = ".history.jsonl";
pub const DUPES_DIR: &str = "__.dupes";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFolder {
    pub folder: PathBuf,
    pub moves: Vec<Move>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationPlan {
    pub root: PathBuf,
    pub folders: Vec<PlannedFolder>,
}

impl RelocationPlan {
    pub fn move_count(&self) -> usize {
        self.folders.iter().map(|f| f.moves.len()).sum()
    }
}

/// One applied folder, as stored in the history file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RelocationRecord {
    pub timestamp: String,
    pub folder: String,
    pub moved: Vec<Move>,
    pub action: String,
}

/// Number each bucket that meets `min_size` into the next free folder
/// `root/1`, `root/2`, ... Existing folders are skipped, never reused.
pub fn plan_buckets(root: &Path, buckets: &[Bucket], min_size: usize) -> RelocationPlan {
    let mut folders = Vec::new();
    let mut next = 0usize;

    for bucket in buckets.iter().filter(|b| b.len() >= min_size) {
        let folder = loop {
            next += 1;
            let candidate = root.join(next.to_string());
            if !candidate.exists() {
                break candidate;
            }
        };
        let moves = bucket
            .members()
            .iter()
            .map(|id| Move {
                from: root.join(id),
                to: folder.join(id),
            })
            .collect();
        folders.push(PlannedFolder { folder, moves });
    }

    RelocationPlan {
        root: root.to_path_buf(),
        folders,
    }
}

/// Move every file of every group aside into `root/__.dupes`, largest file
/// of each group first in the naming sequence.
pub fn plan_dupes(root: &Path, groups: &[DedupeGroup]) -> Result<RelocationPlan> {
    let folder = root.join(DUPES_DIR);
    let mut moves = Vec::new();

    for (group_idx, group) in groups.iter().enumerate() {
        let mut files: Vec<(PathBuf, u64)> = group
            .all()
            .map(|id| -> Result<(PathBuf, u64)> {
                let path = root.join(id);
                let size = fs::metadata(&path)
                    .with_context(|| format!("Failed to stat {:?}", path))?
                    .len();
                Ok((path, size))
            })
            .collect::<Result<_>>()?;
        files.sort_by(|a, b| b.1.cmp(&a.1));

        for (rank, (path, _)) in files.into_iter().enumerate() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let to = folder.join(format!("__.dupe.{}_{}_._{}", group_idx, rank, name));
            moves.push(Move { from: path, to });
        }
    }

    let folders = if moves.is_empty() {
        Vec::new()
    } else {
        vec![PlannedFolder { folder, moves }]
    };
    Ok(RelocationPlan {
        root: root.to_path_buf(),
        folders,
    })
}

/// Move each item into a folder named after its center.
pub fn plan_labels(root: &Path, run: &NearestRun) -> RelocationPlan {
    let folders = run
        .buckets
        .iter()
        .map(|bucket| {
            let folder = root.join(&bucket.label);
            let moves = bucket
                .members
                .iter()
                .map(|(id, _)| Move {
                    from: root.join(id),
                    to: folder.join(id),
                })
                .collect();
            PlannedFolder { folder, moves }
        })
        .collect();

    RelocationPlan {
        root: root.to_path_buf(),
        folders,
    }
}

/// Carry out `plan`, appending one history record per folder. With
/// `dry_run` nothing is touched and the would-be records are returned.
///
/// If a move fails, the moves already made into that folder are recorded
/// with action `"partial"` before the error is returned, so they can still
/// be restored.
pub fn apply(plan: &RelocationPlan, dry_run: bool) -> Result<Vec<RelocationRecord>> {
    let history_file = plan.root.join(HISTORY_FILE);
    let mut history_out = if dry_run {
        None
    } else {
        Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&history_file)
                .with_context(|| format!("Failed to open history file {:?}", history_file))?,
        )
    };

    let mut records = Vec::new();
    for planned in &plan.folders {
        let Some(out) = history_out.as_mut() else {
            for m in &planned.moves {
                log::info!("[dry-run] MOVE {} -> {}", m.from.display(), m.to.display());
            }
            records.push(history_record(&planned.folder, planned.moves.clone(), "moved"));
            continue;
        };

        fs::create_dir_all(&planned.folder)
            .with_context(|| format!("Failed to create directory {:?}", planned.folder))?;

        let mut moved = Vec::with_capacity(planned.moves.len());
        for m in &planned.moves {
            if let Err(err) = fs::rename(&m.from, &m.to) {
                // Whatever already moved must stay restorable.
                if !moved.is_empty() {
                    let partial = history_record(&planned.folder, moved, "partial");
                    writeln!(out, "{}", serde_json::to_string(&partial)?)?;
                    log::warn!(
                        "Recorded {} moves into {} before failing",
                        partial.moved.len(),
                        partial.folder
                    );
                }
                return Err(err)
                    .with_context(|| format!("Failed to move {:?} -> {:?}", m.from, m.to));
            }
            log::debug!("Moved {} -> {}", m.from.display(), m.to.display());
            moved.push(m.clone());
        }

        let record = history_record(&planned.folder, moved, "moved");
        writeln!(out, "{}", serde_json::to_string(&record)?)?;
        records.push(record);
    }

    log::info!(
        "{} {} files into {} folders",
        if dry_run { "Would move" } else { "Moved" },
        plan.move_count(),
        plan.folders.len()
    );
    Ok(records)
}

fn history_record(folder: &Path, moved: Vec<Move>, action: &str) -> RelocationRecord {
    RelocationRecord {
        timestamp: Utc::now().to_rfc3339(),
        folder: folder.to_string_lossy().into_owned(),
        moved,
        action: action.to_string(),
    }
}

/// Read the history under `root`. Malformed lines are skipped.
pub fn read_history(root: &Path) -> Result<Vec<RelocationRecord>> {
    let history_file = root.join(HISTORY_FILE);
    let f = File::open(&history_file)
        .with_context(|| format!("Could not open history file {:?}", history_file))?;
    let reader = BufReader::new(f);

    let mut records = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        match serde_json::from_str::<RelocationRecord>(&line) {
            Ok(rec) => records.push(rec),
            Err(err) => log::warn!("Skipping malformed history entry {}: {}", i, err),
        }
    }
    Ok(records)
}

/// Undo the moves of one record. Files no longer at their destination
/// are skipped. Returns the number of files put back.
pub fn restore(record: &RelocationRecord) -> Result<usize> {
    let mut restored = 0;
    for m in &record.moved {
        if !m.to.exists() {
            log::warn!("{:?} no longer exists; skipping", m.to);
            continue;
        }
        fs::rename(&m.to, &m.from)
            .with_context(|| format!("Failed to restore {:?} -> {:?}", m.to, m.from))?;
        restored += 1;
    }
    Ok(restored)
}
