use anyhow::Result;
use serde::Serialize;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{StageError, StageResult};
use crate::pipeline::util::normalize_path;

/// Fixed stage roots, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Intake,
    Archive,
    Processing,
    Processed,
    Uploaded,
    UploadedVideo,
    Uploaded3d,
    Tools,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Intake,
        Stage::Archive,
        Stage::Processing,
        Stage::Processed,
        Stage::Uploaded,
        Stage::UploadedVideo,
        Stage::Uploaded3d,
        Stage::Tools,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Intake => "01_DataDump",
            Self::Archive => "02_Archive",
            Self::Processing => "03_Processing",
            Self::Processed => "04_Processed",
            Self::Uploaded => "05_Uploaded",
            Self::UploadedVideo => "06_VideosNeedProcessed",
            Self::Uploaded3d => "07_Uploaded_3D",
            Self::Tools => "zzz_360_TOOLS",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Intake => "data_dump",
            Self::Archive => "archive",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Uploaded => "uploaded",
            Self::UploadedVideo => "videos_need_processed",
            Self::Uploaded3d => "uploaded_3d",
            Self::Tools => "360_tools",
        }
    }

    pub fn from_dir_name(name: &str) -> Option<Stage> {
        Self::ALL.into_iter().find(|stage| stage.dir_name() == name)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let needle = raw.trim().to_ascii_lowercase().replace('-', "_");
        let found = match needle.as_str() {
            "intake" | "data_dump" | "datadump" => Some(Self::Intake),
            "uploaded_video" | "videos" => Some(Self::UploadedVideo),
            "tools" => Some(Self::Tools),
            other => Self::ALL.into_iter().find(|stage| {
                stage.key() == other || stage.dir_name().eq_ignore_ascii_case(other)
            }),
        };
        found.ok_or_else(|| format!("unknown stage `{raw}`"))
    }
}

/// Fixed folders nested under the processed stage.
pub const PROCESSED_SUB_ROOTS: [&str; 2] = ["Pano_Scans", "3D_Viewers"];

#[derive(Debug, Clone)]
pub struct StagePaths {
    pub root: PathBuf,
    pub database: PathBuf,
    pub state_dir: PathBuf,
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<StagePaths> {
    let root = normalize_path(&env_or_default_path("FIELDSTAGE_ROOT", PathBuf::from("data")));
    let defaults = StagePaths::from_root(&root);

    Ok(StagePaths {
        database: env_or_default_path("FIELDSTAGE_DB", defaults.database),
        state_dir: env_or_default_path("FIELDSTAGE_STATE_DIR", defaults.state_dir),
        root,
    })
}

impl StagePaths {
    pub fn from_root(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            database: root.join("data.db"),
            state_dir: root.join(".fieldstage"),
        }
    }

    pub fn root_for(&self, stage: Stage) -> PathBuf {
        self.root.join(stage.dir_name())
    }

    pub fn processed_sub_roots(&self) -> Vec<PathBuf> {
        let processed = self.root_for(Stage::Processed);
        PROCESSED_SUB_ROOTS
            .iter()
            .map(|name| processed.join(name))
            .collect()
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.state_dir.join("locks")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.state_dir.join("audit.log")
    }

    /// Resolve a tools-relative file name, leaving absolute paths untouched.
    pub fn tool_file(&self, name: &str) -> PathBuf {
        let candidate = Path::new(name);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root_for(Stage::Tools).join(candidate)
        }
    }

    /// Create every stage root, the processed sub-roots and the state dir.
    ///
    /// Safe to call on every start; existing directories are left alone.
    pub fn bootstrap(&self) -> StageResult<Vec<PathBuf>> {
        let mut dirs = vec![self.root.clone()];
        dirs.extend(Stage::ALL.iter().map(|stage| self.root_for(*stage)));
        dirs.extend(self.processed_sub_roots());
        dirs.push(self.locks_dir());

        for dir in &dirs {
            fs::create_dir_all(dir).map_err(|err| {
                StageError::Configuration(format!("failed to create {}: {err}", dir.display()))
            })?;
        }
        Ok(dirs)
    }
}
