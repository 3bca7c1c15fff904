//! Explicit lifecycle for project folders moving through the stage roots.
//!
//! The state is never stored; it is observed from where the folder sits on
//! disk at call time. The archive copy is the retained pristine copy, so it
//! may sit alongside a processing or processed copy. A folder that is still
//! in intake must not exist in any later stage.

use serde::Serialize;
use std::fmt;

use crate::error::{StageError, StageResult};
use crate::pipeline::paths::{Stage, StagePaths};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Intake,
    Archived,
    Processing,
    ProcessingPurged,
    Processed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Archive,
    CopyToProcessing,
    CopyToProcessingPurgeVideo,
    Process,
}

impl UnitState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Archived => "archived",
            Self::Processing => "processing",
            Self::ProcessingPurged => "processing-purged",
            Self::Processed => "processed",
        }
    }

    /// Look up the transition table; `None` means the action is rejected.
    pub fn next(self, action: Action) -> Option<UnitState> {
        match (self, action) {
            (Self::Intake, Action::Archive) => Some(Self::Archived),
            (Self::Archived, Action::CopyToProcessing) => Some(Self::Processing),
            (Self::Archived, Action::CopyToProcessingPurgeVideo) => Some(Self::ProcessingPurged),
            (Self::Processing | Self::ProcessingPurged, Action::Process) => Some(Self::Processed),
            _ => None,
        }
    }
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Archive => "archive",
            Self::CopyToProcessing => "copy-to-processing",
            Self::CopyToProcessingPurgeVideo => "copy-to-processing-purge-video",
            Self::Process => "process",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stages a project folder can live in while it moves through the pipeline.
pub const LIFECYCLE_STAGES: [Stage; 4] = [
    Stage::Intake,
    Stage::Archive,
    Stage::Processing,
    Stage::Processed,
];

fn state_for(stage: Stage) -> Option<UnitState> {
    match stage {
        Stage::Intake => Some(UnitState::Intake),
        Stage::Archive => Some(UnitState::Archived),
        Stage::Processing => Some(UnitState::Processing),
        Stage::Processed => Some(UnitState::Processed),
        _ => None,
    }
}

/// Every lifecycle stage currently holding a folder named `unit`.
pub fn placements(paths: &StagePaths, unit: &str) -> Vec<Stage> {
    LIFECYCLE_STAGES
        .into_iter()
        .filter(|stage| paths.root_for(*stage).join(unit).is_dir())
        .collect()
}

/// Observe the current state of `unit`, or `None` when it is nowhere.
///
/// A processing copy cannot tell whether its videos were purged, so a purged
/// copy is observed as `Processing`; both allow the same next actions.
pub fn observe(paths: &StagePaths, unit: &str) -> StageResult<Option<UnitState>> {
    let found = placements(paths, unit);
    if found.contains(&Stage::Intake) && found.len() > 1 {
        let duplicate = found[1];
        return Err(StageError::Collision {
            path: paths.root_for(duplicate).join(unit),
        });
    }
    Ok(found.last().and_then(|stage| state_for(*stage)))
}

/// Check `action` against the table for the observed state of `unit`.
pub fn check(unit: &str, state: UnitState, action: Action) -> StageResult<UnitState> {
    state
        .next(action)
        .ok_or_else(|| StageError::InvalidTransition {
            unit: unit.to_string(),
            state,
            action,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn table_allows_only_forward_edges() {
        assert_eq!(UnitState::Intake.next(Action::Archive), Some(UnitState::Archived));
        assert_eq!(
            UnitState::Archived.next(Action::CopyToProcessing),
            Some(UnitState::Processing)
        );
        assert_eq!(
            UnitState::Archived.next(Action::CopyToProcessingPurgeVideo),
            Some(UnitState::ProcessingPurged)
        );
        assert_eq!(
            UnitState::ProcessingPurged.next(Action::Process),
            Some(UnitState::Processed)
        );
        assert_eq!(UnitState::Intake.next(Action::CopyToProcessing), None);
        assert_eq!(UnitState::Archived.next(Action::Archive), None);
        assert_eq!(UnitState::Processed.next(Action::CopyToProcessing), None);
        assert_eq!(UnitState::Archived.next(Action::Process), None);
    }

    #[test]
    fn check_names_the_rejected_action() {
        let err = check("P1", UnitState::Processed, Action::Archive).expect_err("rejected");
        assert_eq!(err.to_string(), "cannot archive `P1` while it is processed");
    }

    #[test]
    fn observe_picks_most_advanced_stage() {
        let tmp = tempdir().expect("tempdir");
        let paths = StagePaths::from_root(tmp.path());
        assert_eq!(observe(&paths, "P1").expect("observe"), None);

        fs::create_dir_all(paths.root_for(Stage::Archive).join("P1")).expect("mkdir");
        assert_eq!(
            observe(&paths, "P1").expect("observe"),
            Some(UnitState::Archived)
        );

        fs::create_dir_all(paths.root_for(Stage::Processing).join("P1")).expect("mkdir");
        assert_eq!(
            observe(&paths, "P1").expect("observe"),
            Some(UnitState::Processing)
        );
    }

    #[test]
    fn observe_rejects_intake_duplicates() {
        let tmp = tempdir().expect("tempdir");
        let paths = StagePaths::from_root(tmp.path());
        fs::create_dir_all(paths.root_for(Stage::Intake).join("P1")).expect("mkdir");
        fs::create_dir_all(paths.root_for(Stage::Archive).join("P1")).expect("mkdir");

        let err = observe(&paths, "P1").expect_err("duplicate");
        assert!(matches!(err, StageError::Collision { .. }));
    }
}
