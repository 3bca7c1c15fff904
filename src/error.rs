use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::lifecycle::{Action, UnitState};

#[derive(Debug, Error)]
pub enum StageError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("{what} does not exist: {}", path.display())]
    NotFound { what: &'static str, path: PathBuf },
    #[error("destination already exists: {}", path.display())]
    Collision { path: PathBuf },
    #[error("path {} is not inside storage root {}", path.display(), root.display())]
    PathOutsideRoot { path: PathBuf, root: PathBuf },
    #[error("{op} failed for {}: {source}", path.display())]
    Transition {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("external tool exited with {status}: {}", stderr.trim())]
    ExternalTool {
        status: String,
        stdout: String,
        stderr: String,
    },
    #[error("cannot {action} `{unit}` while it is {state}")]
    InvalidTransition {
        unit: String,
        state: UnitState,
        action: Action,
    },
    #[error("invalid name {0:?}: must be a non-empty single path component")]
    InvalidName(String),
    #[error("metadata store error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl StageError {
    pub fn transition(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Transition {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn not_found(what: &'static str, path: impl Into<PathBuf>) -> Self {
        Self::NotFound {
            what,
            path: path.into(),
        }
    }

    pub fn code(&self) -> StageErrorCode {
        match self {
            Self::Configuration(_) => StageErrorCode::E101Configuration,
            Self::NotFound { .. } => StageErrorCode::E102NotFound,
            Self::Collision { .. } => StageErrorCode::E103Collision,
            Self::PathOutsideRoot { .. } => StageErrorCode::E104PathOutsideRoot,
            Self::Transition { .. } => StageErrorCode::E105Transition,
            Self::ExternalTool { .. } => StageErrorCode::E106ExternalTool,
            Self::InvalidTransition { .. } => StageErrorCode::E107InvalidTransition,
            Self::InvalidName(_) => StageErrorCode::E108InvalidName,
            Self::Store(_) => StageErrorCode::E109Store,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageErrorCode {
    E101Configuration,
    E102NotFound,
    E103Collision,
    E104PathOutsideRoot,
    E105Transition,
    E106ExternalTool,
    E107InvalidTransition,
    E108InvalidName,
    E109Store,
}

impl StageErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E101Configuration => "E101_CONFIGURATION",
            Self::E102NotFound => "E102_NOT_FOUND",
            Self::E103Collision => "E103_COLLISION",
            Self::E104PathOutsideRoot => "E104_PATH_OUTSIDE_ROOT",
            Self::E105Transition => "E105_TRANSITION",
            Self::E106ExternalTool => "E106_EXTERNAL_TOOL",
            Self::E107InvalidTransition => "E107_INVALID_TRANSITION",
            Self::E108InvalidName => "E108_INVALID_NAME",
            Self::E109Store => "E109_STORE",
        }
    }
}

pub type StageResult<T> = Result<T, StageError>;
