//! Read-time location of recorded files.
//!
//! File rows keep the path the file was stored under at upload time. The
//! stage-relative part of that path is stable across transitions, so the
//! current location is recomputed by probing each stage root for it.

use serde::Serialize;
use std::path::{Component, Path, PathBuf};

use crate::pipeline::paths::{Stage, StagePaths};
use crate::pipeline::store::FileRecord;

#[derive(Debug, Clone, Serialize)]
pub struct LocatedFile {
    pub record: FileRecord,
    /// Stage named by the stored path, when it names one.
    pub recorded_stage: Option<Stage>,
    /// Every stage currently holding the file, in pipeline order.
    pub present_in: Vec<Stage>,
}

impl LocatedFile {
    /// The stored path no longer points at a file.
    pub fn is_stale(&self) -> bool {
        match self.recorded_stage {
            Some(stage) => !self.present_in.contains(&stage),
            None => true,
        }
    }

    /// The most advanced stage holding the file.
    pub fn current(&self) -> Option<Stage> {
        self.present_in.last().copied()
    }
}

/// Split a stored `stage_dir/rest..` path into its stage and remainder.
fn split_stored(path: &str) -> (Option<Stage>, PathBuf) {
    let mut components = Path::new(path).components().filter_map(|c| match c {
        Component::Normal(part) => Some(part),
        _ => None,
    });
    let first = components.next().and_then(|c| c.to_str());
    match first.and_then(Stage::from_dir_name) {
        Some(stage) => (Some(stage), components.collect()),
        None => (None, Path::new(path).to_path_buf()),
    }
}

pub fn locate(paths: &StagePaths, record: &FileRecord) -> LocatedFile {
    let (recorded_stage, rest) = split_stored(&record.path);
    let present_in = if rest.as_os_str().is_empty() {
        Vec::new()
    } else {
        Stage::ALL
            .into_iter()
            .filter(|stage| paths.root_for(*stage).join(&rest).is_file())
            .collect()
    };
    LocatedFile {
        record: record.clone(),
        recorded_stage,
        present_in,
    }
}

pub fn locate_all(paths: &StagePaths, records: &[FileRecord]) -> Vec<LocatedFile> {
    records.iter().map(|record| locate(paths, record)).collect()
}
