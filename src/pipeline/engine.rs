//! Stage transitions for project folders and single files.
//!
//! The free functions take explicit stage roots and enforce only their local
//! preconditions (source exists, destination absent). [`StageEngine`] wraps
//! them with the registry roots, the per-destination lock, the lifecycle
//! table and the audit log.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{StageError, StageResult};
use crate::pipeline::audit;
use crate::pipeline::config::TransitionConfig;
use crate::pipeline::lifecycle::{self, Action, UnitState};
use crate::pipeline::lock::DestinationLock;
use crate::pipeline::paths::{Stage, StagePaths};
use crate::pipeline::processor::{self, ExternalProcessor, ProcessOutput};
use crate::pipeline::transfer::{self, ItemFailure, PurgeOutcome, SweepPolicy};
use crate::pipeline::util::{validate_component, validate_relative};
use crate::pipeline::warn::{self, WarnEvent};

/// Identity of one project/structure folder pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitKey {
    project_number: String,
    date: String,
    crew_initials: String,
    location: String,
    structure_id: String,
}

impl UnitKey {
    pub fn new(
        project_number: &str,
        date: &str,
        crew_initials: &str,
        location: &str,
        structure_id: &str,
    ) -> StageResult<Self> {
        Ok(Self {
            project_number: validate_component(project_number)?.to_string(),
            date: validate_component(date)?.to_string(),
            crew_initials: validate_component(crew_initials)?.to_string(),
            location: validate_component(location)?.to_string(),
            structure_id: validate_component(structure_id)?.to_string(),
        })
    }

    pub fn project_number(&self) -> &str {
        &self.project_number
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn crew_initials(&self) -> &str {
        &self.crew_initials
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn structure_id(&self) -> &str {
        &self.structure_id
    }

    /// `{project_number}_{date}_{crew}`
    pub fn project_folder(&self) -> String {
        format!(
            "{}_{}_{}",
            self.project_number, self.date, self.crew_initials
        )
    }

    /// `{location}_{structure}_{date}`
    pub fn structure_folder(&self) -> String {
        format!("{}_{}_{}", self.location, self.structure_id, self.date)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SweepOutcome {
    pub moved: Vec<PathBuf>,
    pub failed: Vec<ItemFailure>,
}

#[derive(Debug, Clone)]
pub struct CopyOutcome {
    pub destination: PathBuf,
    pub files: u64,
}

#[derive(Debug, Clone)]
pub struct PurgeCopyOutcome {
    pub copy: CopyOutcome,
    pub purge: PurgeOutcome,
}

#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub unit: String,
    pub from: UnitState,
    pub to: UnitState,
    pub source: PathBuf,
    pub destination: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub transition: TransitionOutcome,
    pub output: ProcessOutput,
}

fn require_dir(what: &'static str, path: &Path) -> StageResult<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(StageError::not_found(what, path))
    }
}

fn require_absent(path: &Path) -> StageResult<()> {
    if path.exists() {
        Err(StageError::Collision {
            path: path.to_path_buf(),
        })
    } else {
        Ok(())
    }
}

/// Create `{intake}/{project}/{structure}` if needed and return it.
pub fn materialize_intake(intake_root: &Path, key: &UnitKey) -> StageResult<PathBuf> {
    let dir = intake_root
        .join(key.project_folder())
        .join(key.structure_folder());
    fs::create_dir_all(&dir).map_err(|err| StageError::transition("create intake dir", &dir, err))?;
    Ok(dir)
}

/// Move every direct file child of the intake root into the archive root.
/// Best effort: failing items are reported and skipped unless the policy
/// says to stop.
pub fn archive_all(
    intake_root: &Path,
    archive_root: &Path,
    policy: SweepPolicy,
) -> StageResult<SweepOutcome> {
    require_dir("intake root", intake_root)?;
    fs::create_dir_all(archive_root)
        .map_err(|err| StageError::transition("create archive root", archive_root, err))?;

    let entries = fs::read_dir(intake_root)
        .map_err(|err| StageError::transition("read intake root", intake_root, err))?;
    let mut out = SweepOutcome::default();
    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(err) => {
                if policy.stop_on_first_error {
                    return Err(StageError::transition("read intake entry", intake_root, err));
                }
                out.failed.push(ItemFailure {
                    path: intake_root.to_path_buf(),
                    error: err.to_string(),
                });
                continue;
            }
        };
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name() else {
            continue;
        };
        let destination = archive_root.join(name);
        let result = require_absent(&destination).and_then(|_| transfer::move_file(&path, &destination));
        match result {
            Ok(()) => out.moved.push(destination),
            Err(err) => {
                if policy.stop_on_first_error {
                    return Err(err);
                }
                warn::emit(WarnEvent {
                    code: "SWEEP_ITEM_FAILED",
                    stage: Stage::Intake.key(),
                    action: "archive-all",
                    unit: "-",
                    path: &path.display().to_string(),
                    reason: "item-skipped",
                    err: &err.to_string(),
                });
                out.failed.push(ItemFailure {
                    path,
                    error: err.to_string(),
                });
            }
        }
    }
    Ok(out)
}

/// Move one project folder, with its contents, from intake to archive.
pub fn archive_project(
    intake_root: &Path,
    archive_root: &Path,
    project_folder: &str,
) -> StageResult<PathBuf> {
    let name = validate_component(project_folder)?;
    let source = intake_root.join(name);
    let destination = archive_root.join(name);
    require_dir("project folder", &source)?;
    require_absent(&destination)?;
    transfer::move_dir(&source, &destination)?;
    Ok(destination)
}

/// Copy a folder from archive to processing; the archive copy stays.
pub fn copy_to_processing(
    archive_root: &Path,
    processing_root: &Path,
    directory: &str,
    verify: bool,
) -> StageResult<CopyOutcome> {
    let name = validate_component(directory)?;
    let source = archive_root.join(name);
    let destination = processing_root.join(name);
    require_dir("archive folder", &source)?;
    require_absent(&destination)?;
    let files = transfer::copy_tree_staged(&source, &destination, verify)?;
    Ok(CopyOutcome { destination, files })
}

/// Copy a folder from archive to processing, then delete the video files in
/// the processing copy. Success means the copy succeeded; purge failures
/// are reported in the outcome.
pub fn move_to_processing_and_purge_video(
    archive_root: &Path,
    processing_root: &Path,
    directory: &str,
    extensions: &[String],
    policy: SweepPolicy,
    verify: bool,
) -> StageResult<PurgeCopyOutcome> {
    copy_and_purge_with(
        archive_root,
        processing_root,
        directory,
        extensions,
        policy,
        verify,
        |path| fs::remove_file(path),
    )
}

fn copy_and_purge_with(
    archive_root: &Path,
    processing_root: &Path,
    directory: &str,
    extensions: &[String],
    policy: SweepPolicy,
    verify: bool,
    remove: impl FnMut(&Path) -> std::io::Result<()>,
) -> StageResult<PurgeCopyOutcome> {
    let copy = copy_to_processing(archive_root, processing_root, directory, verify)?;
    let purge = transfer::purge_extensions_with(&copy.destination, extensions, policy, remove)?;
    for failure in &purge.failed {
        warn::emit(WarnEvent {
            code: "PURGE_ITEM_FAILED",
            stage: Stage::Processing.key(),
            action: "purge-video",
            unit: directory,
            path: &failure.path.display().to_string(),
            reason: "delete-skipped",
            err: &failure.error,
        });
    }
    Ok(PurgeCopyOutcome { copy, purge })
}

fn move_one_file(
    what: &'static str,
    from_root: &Path,
    to_root: &Path,
    relative_file: &str,
) -> StageResult<PathBuf> {
    let rel = validate_relative(relative_file)?;
    let source = from_root.join(&rel);
    if !source.is_file() {
        return Err(StageError::not_found(what, source));
    }
    let destination = to_root.join(&rel);
    require_absent(&destination)?;
    transfer::move_file(&source, &destination)?;
    Ok(destination)
}

/// Archive exactly one file from intake, keeping its relative path.
pub fn relocate_single_file(
    data_dump_root: &Path,
    archive_root: &Path,
    relative_file: &str,
) -> StageResult<PathBuf> {
    move_one_file("intake file", data_dump_root, archive_root, relative_file)
}

/// Move one finished file from processing to processed.
pub fn move_processed_file(
    processing_root: &Path,
    processed_root: &Path,
    relative_file: &str,
) -> StageResult<PathBuf> {
    move_one_file("processing file", processing_root, processed_root, relative_file)
}

pub struct StageEngine<'a> {
    paths: &'a StagePaths,
    settings: TransitionConfig,
}

impl<'a> StageEngine<'a> {
    pub fn new(paths: &'a StagePaths, settings: &TransitionConfig) -> Self {
        Self {
            paths,
            settings: settings.clone(),
        }
    }

    pub fn paths(&self) -> &StagePaths {
        self.paths
    }

    fn policy(&self) -> SweepPolicy {
        SweepPolicy {
            stop_on_first_error: self.settings.stop_on_first_error,
        }
    }

    fn root(&self, stage: Stage) -> PathBuf {
        self.paths.root_for(stage)
    }

    pub(crate) fn lock(&self, destination: &Path) -> StageResult<DestinationLock> {
        DestinationLock::acquire(&self.paths.locks_dir(), destination)
    }

    pub(crate) fn audited<T>(
        &self,
        action: &str,
        unit: &str,
        result: StageResult<T>,
        describe: impl Fn(&T) -> String,
    ) -> StageResult<T> {
        let (status, message) = match &result {
            Ok(value) => ("ok", describe(value)),
            Err(err) => ("error", format!("{}: {err}", err.code().as_str())),
        };
        if let Err(err) = audit::append_event(self.paths, action, status, unit, &message) {
            warn::emit(WarnEvent {
                code: "AUDIT_WRITE_FAILED",
                stage: "audit",
                action,
                unit,
                path: &self.paths.audit_log().display().to_string(),
                reason: "append-failed",
                err: &format!("{err:#}"),
            });
        }
        result
    }

    /// Run the full precondition chain for a project-folder transition.
    fn guard(
        &self,
        unit: &str,
        action: Action,
        from: Stage,
        to: Stage,
    ) -> StageResult<(UnitState, UnitState)> {
        require_dir("project folder", &self.root(from).join(unit))?;
        require_absent(&self.root(to).join(unit))?;
        let state = lifecycle::observe(self.paths, unit)?.ok_or_else(|| {
            StageError::not_found("project folder", self.root(from).join(unit))
        })?;
        let next = lifecycle::check(unit, state, action)?;
        Ok((state, next))
    }

    pub fn observe(&self, unit: &str) -> StageResult<Option<UnitState>> {
        lifecycle::observe(self.paths, validate_component(unit)?)
    }

    /// Fail with `Collision` when the project folder has already left intake.
    pub(crate) fn ensure_intake_open(&self, key: &UnitKey) -> StageResult<()> {
        let unit = key.project_folder();
        match lifecycle::placements(self.paths, &unit)
            .into_iter()
            .find(|stage| *stage != Stage::Intake)
        {
            Some(stage) => Err(StageError::Collision {
                path: self.root(stage).join(&unit),
            }),
            None => Ok(()),
        }
    }

    pub fn materialize_intake(&self, key: &UnitKey) -> StageResult<PathBuf> {
        self.ensure_intake_open(key)?;
        materialize_intake(&self.root(Stage::Intake), key)
    }

    pub fn archive_all(&self) -> StageResult<SweepOutcome> {
        let archive_root = self.root(Stage::Archive);
        let result = self
            .lock(&archive_root)
            .and_then(|_guard| archive_all(&self.root(Stage::Intake), &archive_root, self.policy()));
        self.audited("archive-all", "-", result, |out| {
            format!("moved={} failed={}", out.moved.len(), out.failed.len())
        })
    }

    pub fn archive_project(&self, unit: &str) -> StageResult<TransitionOutcome> {
        let result = validate_component(unit).and_then(|unit| {
            let destination = self.root(Stage::Archive).join(unit);
            let _guard = self.lock(&destination)?;
            let (from, to) = self.guard(unit, Action::Archive, Stage::Intake, Stage::Archive)?;
            let destination =
                archive_project(&self.root(Stage::Intake), &self.root(Stage::Archive), unit)?;
            Ok(TransitionOutcome {
                unit: unit.to_string(),
                from,
                to,
                source: self.root(Stage::Intake).join(unit),
                destination,
            })
        });
        self.audited(Action::Archive.as_str(), unit, result, describe_transition)
    }

    pub fn copy_to_processing(&self, unit: &str) -> StageResult<(TransitionOutcome, CopyOutcome)> {
        let result = validate_component(unit).and_then(|unit| {
            let destination = self.root(Stage::Processing).join(unit);
            let _guard = self.lock(&destination)?;
            let (from, to) = self.guard(
                unit,
                Action::CopyToProcessing,
                Stage::Archive,
                Stage::Processing,
            )?;
            let copy = copy_to_processing(
                &self.root(Stage::Archive),
                &self.root(Stage::Processing),
                unit,
                self.settings.verify_copies,
            )?;
            Ok((
                TransitionOutcome {
                    unit: unit.to_string(),
                    from,
                    to,
                    source: self.root(Stage::Archive).join(unit),
                    destination: copy.destination.clone(),
                },
                copy,
            ))
        });
        self.audited(
            Action::CopyToProcessing.as_str(),
            unit,
            result,
            |(transition, copy)| format!("{} files={}", describe_transition(transition), copy.files),
        )
    }

    pub fn move_to_processing_and_purge_video(
        &self,
        unit: &str,
    ) -> StageResult<(TransitionOutcome, PurgeCopyOutcome)> {
        let result = validate_component(unit).and_then(|unit| {
            let destination = self.root(Stage::Processing).join(unit);
            let _guard = self.lock(&destination)?;
            let (from, to) = self.guard(
                unit,
                Action::CopyToProcessingPurgeVideo,
                Stage::Archive,
                Stage::Processing,
            )?;
            let out = move_to_processing_and_purge_video(
                &self.root(Stage::Archive),
                &self.root(Stage::Processing),
                unit,
                &self.settings.purge_extensions,
                self.policy(),
                self.settings.verify_copies,
            )?;
            Ok((
                TransitionOutcome {
                    unit: unit.to_string(),
                    from,
                    to,
                    source: self.root(Stage::Archive).join(unit),
                    destination: out.copy.destination.clone(),
                },
                out,
            ))
        });
        self.audited(
            Action::CopyToProcessingPurgeVideo.as_str(),
            unit,
            result,
            |(transition, out)| {
                format!(
                    "{} files={} purged={} purge_failed={}",
                    describe_transition(transition),
                    out.copy.files,
                    out.purge.deleted.len(),
                    out.purge.failed.len()
                )
            },
        )
    }

    pub fn relocate_single_file(&self, relative_file: &str) -> StageResult<PathBuf> {
        let archive_root = self.root(Stage::Archive);
        let result = validate_relative(relative_file).and_then(|rel| {
            let _guard = self.lock(&archive_root.join(rel))?;
            relocate_single_file(&self.root(Stage::Intake), &archive_root, relative_file)
        });
        self.audited("archive-file", relative_file, result, |dest| {
            format!("moved to {}", dest.display())
        })
    }

    pub fn move_processed_file(&self, relative_file: &str) -> StageResult<PathBuf> {
        let processed_root = self.root(Stage::Processed);
        let result = validate_relative(relative_file).and_then(|rel| {
            let _guard = self.lock(&processed_root.join(rel))?;
            move_processed_file(&self.root(Stage::Processing), &processed_root, relative_file)
        });
        self.audited("process-file", relative_file, result, |dest| {
            format!("moved to {}", dest.display())
        })
    }

    /// Run the external tool from `processing/{unit}` into `processed/{unit}`.
    pub fn process_directory(
        &self,
        processor: &dyn ExternalProcessor,
        unit: &str,
        template: Option<&Path>,
    ) -> StageResult<ProcessOutcome> {
        let result = validate_component(unit).and_then(|unit| {
            let destination = self.root(Stage::Processed).join(unit);
            let _guard = self.lock(&destination)?;
            let (from, to) =
                self.guard(unit, Action::Process, Stage::Processing, Stage::Processed)?;
            if let Some(template) = template
                && !template.is_file()
            {
                return Err(StageError::not_found("settings template", template));
            }
            let source = self.root(Stage::Processing).join(unit);
            let output = processor::invoke(processor, &source, &destination, template)?;
            Ok(ProcessOutcome {
                transition: TransitionOutcome {
                    unit: unit.to_string(),
                    from,
                    to,
                    source,
                    destination,
                },
                output,
            })
        });
        self.audited(Action::Process.as_str(), unit, result, |out| {
            describe_transition(&out.transition)
        })
    }
}

fn describe_transition(out: &TransitionOutcome) -> String {
    format!(
        "{} -> {} ({} -> {})",
        out.from,
        out.to,
        out.source.display(),
        out.destination.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processor::testing::RecordingProcessor;
    use crate::pipeline::transfer::tree_manifest;
    use tempfile::{TempDir, tempdir};

    const UNIT: &str = "P100_2024-01-01_JD";
    const SITE: &str = "SiteA_S1_2024-01-01";

    fn setup() -> (TempDir, StagePaths) {
        let tmp = tempdir().expect("tempdir");
        let paths = StagePaths::from_root(&tmp.path().join("data"));
        paths.bootstrap().expect("bootstrap");
        (tmp, paths)
    }

    fn seed(root: &Path) {
        let site = root.join(UNIT).join(SITE);
        fs::create_dir_all(&site).expect("mkdir");
        fs::write(site.join("IMG_0001.jpg"), b"one").expect("write");
        fs::write(site.join("IMG_0002.jpg"), b"two").expect("write");
    }

    #[test]
    fn materialize_intake_is_idempotent() {
        let (_tmp, paths) = setup();
        let key = UnitKey::new("P100", "2024-01-01", "JD", "SiteA", "S1").expect("key");
        let engine = StageEngine::new(&paths, &TransitionConfig::default());

        let first = engine.materialize_intake(&key).expect("first");
        fs::write(first.join("a.jpg"), b"a").expect("write");
        let second = engine.materialize_intake(&key).expect("second");

        assert_eq!(first, second);
        assert_eq!(first, paths.root_for(Stage::Intake).join(UNIT).join(SITE));
        assert!(second.join("a.jpg").exists());
    }

    #[test]
    fn unit_key_rejects_separators() {
        assert!(UnitKey::new("P1/..", "2024-01-01", "JD", "SiteA", "S1").is_err());
        assert!(UnitKey::new("P1", "2024-01-01", "", "SiteA", "S1").is_err());
    }

    #[test]
    fn archive_project_moves_whole_tree() {
        let (_tmp, paths) = setup();
        seed(&paths.root_for(Stage::Intake));
        let before = tree_manifest(&paths.root_for(Stage::Intake).join(UNIT)).expect("manifest");
        let engine = StageEngine::new(&paths, &TransitionConfig::default());

        let out = engine.archive_project(UNIT).expect("archive");
        assert_eq!(out.from, UnitState::Intake);
        assert_eq!(out.to, UnitState::Archived);
        assert!(!paths.root_for(Stage::Intake).join(UNIT).exists());
        assert_eq!(
            tree_manifest(&paths.root_for(Stage::Archive).join(UNIT)).expect("manifest"),
            before
        );
        assert_eq!(engine.observe(UNIT).expect("observe"), Some(UnitState::Archived));
    }

    #[test]
    fn archive_project_missing_source_is_not_found() {
        let (_tmp, paths) = setup();
        let engine = StageEngine::new(&paths, &TransitionConfig::default());

        let err = engine.archive_project(UNIT).expect_err("missing");
        assert!(matches!(err, StageError::NotFound { .. }));
        assert!(!paths.root_for(Stage::Archive).join(UNIT).exists());
    }

    #[test]
    fn archive_project_refuses_existing_archive_copy() {
        let (_tmp, paths) = setup();
        seed(&paths.root_for(Stage::Intake));
        fs::create_dir_all(paths.root_for(Stage::Archive).join(UNIT)).expect("mkdir");
        let engine = StageEngine::new(&paths, &TransitionConfig::default());

        let err = engine.archive_project(UNIT).expect_err("collision");
        assert!(matches!(err, StageError::Collision { .. }));
        assert!(paths.root_for(Stage::Intake).join(UNIT).join(SITE).is_dir());
    }

    #[test]
    fn copy_to_processing_keeps_archive_and_duplicates_files() {
        let (_tmp, paths) = setup();
        seed(&paths.root_for(Stage::Archive));
        let engine = StageEngine::new(&paths, &TransitionConfig::default());

        let (transition, copy) = engine.copy_to_processing(UNIT).expect("copy");
        assert_eq!(transition.to, UnitState::Processing);
        assert_eq!(copy.files, 2);
        let archived = tree_manifest(&paths.root_for(Stage::Archive).join(UNIT)).expect("a");
        let processing = tree_manifest(&paths.root_for(Stage::Processing).join(UNIT)).expect("p");
        assert_eq!(archived, processing);
        assert_eq!(archived.len(), 2);
    }

    #[test]
    fn copy_to_processing_collision_leaves_both_sides_untouched() {
        let (_tmp, paths) = setup();
        seed(&paths.root_for(Stage::Archive));
        let existing = paths.root_for(Stage::Processing).join(UNIT);
        fs::create_dir_all(&existing).expect("mkdir");
        fs::write(existing.join("work.txt"), b"in progress").expect("write");
        let before = tree_manifest(&paths.root_for(Stage::Archive).join(UNIT)).expect("a");
        let engine = StageEngine::new(&paths, &TransitionConfig::default());

        let err = engine.copy_to_processing(UNIT).expect_err("collision");
        assert!(matches!(err, StageError::Collision { .. }));
        assert_eq!(
            tree_manifest(&paths.root_for(Stage::Archive).join(UNIT)).expect("a"),
            before
        );
        let after = tree_manifest(&existing).expect("p");
        assert_eq!(after.len(), 1);
        assert!(after.contains_key("work.txt"));
    }

    #[test]
    fn copy_to_processing_missing_source_creates_nothing() {
        let (_tmp, paths) = setup();
        let engine = StageEngine::new(&paths, &TransitionConfig::default());

        let err = engine.copy_to_processing(UNIT).expect_err("missing");
        assert!(matches!(err, StageError::NotFound { .. }));
        assert!(!paths.root_for(Stage::Processing).join(UNIT).exists());
    }

    #[test]
    fn copy_after_processing_is_rejected_by_lifecycle() {
        let (_tmp, paths) = setup();
        seed(&paths.root_for(Stage::Archive));
        fs::create_dir_all(paths.root_for(Stage::Processed).join(UNIT)).expect("mkdir");
        let engine = StageEngine::new(&paths, &TransitionConfig::default());

        let err = engine.copy_to_processing(UNIT).expect_err("already processed");
        assert!(matches!(
            err,
            StageError::InvalidTransition {
                state: UnitState::Processed,
                action: Action::CopyToProcessing,
                ..
            }
        ));
        assert!(!paths.root_for(Stage::Processing).join(UNIT).exists());
    }

    #[test]
    fn purge_variant_drops_only_videos() {
        let (_tmp, paths) = setup();
        seed(&paths.root_for(Stage::Archive));
        let site = paths.root_for(Stage::Archive).join(UNIT).join(SITE);
        fs::write(site.join("walk.MP4"), b"video").expect("write");
        fs::write(site.join("walk2.mp4"), b"video").expect("write");
        let engine = StageEngine::new(&paths, &TransitionConfig::default());

        let (transition, out) = engine
            .move_to_processing_and_purge_video(UNIT)
            .expect("purge copy");
        assert_eq!(transition.to, UnitState::ProcessingPurged);
        assert_eq!(out.purge.deleted.len(), 2);

        let archived = tree_manifest(&paths.root_for(Stage::Archive).join(UNIT)).expect("a");
        let processing = tree_manifest(&paths.root_for(Stage::Processing).join(UNIT)).expect("p");
        assert_eq!(archived.len(), 4);
        assert_eq!(processing.len(), 2);
        for (rel, digest) in &processing {
            assert_eq!(archived.get(rel), Some(digest));
            assert!(!rel.to_ascii_lowercase().ends_with(".mp4"));
        }
    }

    fn seed_videos(paths: &StagePaths) -> PathBuf {
        seed(&paths.root_for(Stage::Archive));
        let site = paths.root_for(Stage::Archive).join(UNIT).join(SITE);
        fs::write(site.join("a.mp4"), b"video").expect("write");
        fs::write(site.join("b.mp4"), b"video").expect("write");
        paths.root_for(Stage::Processing).join(UNIT).join(SITE)
    }

    fn refuse_a(path: &Path) -> std::io::Result<()> {
        if path.ends_with("a.mp4") {
            Err(std::io::Error::other("sharing violation"))
        } else {
            fs::remove_file(path)
        }
    }

    #[test]
    fn failed_video_deletion_is_reported_and_copy_still_succeeds() {
        let (_tmp, paths) = setup();
        let processing_site = seed_videos(&paths);
        let exts = vec!["mp4".to_string()];

        let out = copy_and_purge_with(
            &paths.root_for(Stage::Archive),
            &paths.root_for(Stage::Processing),
            UNIT,
            &exts,
            SweepPolicy::default(),
            true,
            refuse_a,
        )
        .expect("copy succeeded");
        assert_eq!(out.copy.files, 4);
        assert_eq!(out.purge.deleted, vec![processing_site.join("b.mp4")]);
        assert_eq!(out.purge.failed.len(), 1);
        assert_eq!(out.purge.failed[0].path, processing_site.join("a.mp4"));
        assert!(out.purge.failed[0].error.contains("sharing violation"));
        assert!(processing_site.join("a.mp4").is_file());
        assert!(processing_site.join("IMG_0001.jpg").is_file());
    }

    #[test]
    fn failed_video_deletion_is_an_error_when_stopping_on_first_error() {
        let (_tmp, paths) = setup();
        let processing_site = seed_videos(&paths);
        let policy = SweepPolicy {
            stop_on_first_error: true,
        };

        let err = copy_and_purge_with(
            &paths.root_for(Stage::Archive),
            &paths.root_for(Stage::Processing),
            UNIT,
            &["mp4".to_string()],
            policy,
            true,
            refuse_a,
        )
        .expect_err("stop on first error");
        assert!(matches!(err, StageError::Transition { op: "delete file", .. }));
        assert!(processing_site.join("a.mp4").is_file());
    }

    #[test]
    fn archive_all_sweeps_only_loose_files_and_skips_collisions() {
        let (_tmp, paths) = setup();
        let intake = paths.root_for(Stage::Intake);
        seed(&intake);
        fs::write(intake.join("loose1.jpg"), b"1").expect("write");
        fs::write(intake.join("loose2.jpg"), b"2").expect("write");
        fs::write(paths.root_for(Stage::Archive).join("loose2.jpg"), b"old").expect("write");
        let engine = StageEngine::new(&paths, &TransitionConfig::default());

        let out = engine.archive_all().expect("sweep");
        assert_eq!(out.moved.len(), 1);
        assert_eq!(out.failed.len(), 1);
        assert!(!intake.join("loose1.jpg").exists());
        assert!(intake.join("loose2.jpg").exists());
        assert_eq!(
            fs::read(paths.root_for(Stage::Archive).join("loose2.jpg")).expect("read"),
            b"old"
        );
        assert!(intake.join(UNIT).is_dir());
    }

    #[test]
    fn archive_all_can_stop_on_first_error() {
        let (_tmp, paths) = setup();
        let intake = paths.root_for(Stage::Intake);
        fs::write(intake.join("loose.jpg"), b"1").expect("write");
        fs::write(paths.root_for(Stage::Archive).join("loose.jpg"), b"old").expect("write");
        let settings = TransitionConfig {
            stop_on_first_error: true,
            ..TransitionConfig::default()
        };
        let engine = StageEngine::new(&paths, &settings);

        let err = engine.archive_all().expect_err("stop");
        assert!(matches!(err, StageError::Collision { .. }));
    }

    #[test]
    fn single_file_moves_create_parents_and_check_sources() {
        let (_tmp, paths) = setup();
        seed(&paths.root_for(Stage::Intake));
        let rel = format!("{UNIT}/{SITE}/IMG_0001.jpg");
        let engine = StageEngine::new(&paths, &TransitionConfig::default());

        let dest = engine.relocate_single_file(&rel).expect("relocate");
        assert_eq!(dest, paths.root_for(Stage::Archive).join(&rel));
        assert!(dest.is_file());

        let err = engine.relocate_single_file(&rel).expect_err("gone");
        assert!(matches!(err, StageError::NotFound { .. }));

        let err = engine
            .move_processed_file(&format!("{UNIT}/{SITE}"))
            .expect_err("not a file");
        assert!(matches!(err, StageError::NotFound { .. }));

        let err = engine.relocate_single_file("../escape.jpg").expect_err("escape");
        assert!(matches!(err, StageError::InvalidName(_)));
    }

    #[test]
    fn move_processed_file_moves_from_processing() {
        let (_tmp, paths) = setup();
        seed(&paths.root_for(Stage::Processing));
        let rel = format!("{UNIT}/{SITE}/IMG_0002.jpg");
        let engine = StageEngine::new(&paths, &TransitionConfig::default());

        let dest = engine.move_processed_file(&rel).expect("move");
        assert_eq!(fs::read(&dest).expect("read"), b"two");
        assert!(!paths.root_for(Stage::Processing).join(&rel).exists());
    }

    #[test]
    fn process_directory_runs_tool_into_processed() {
        let (_tmp, paths) = setup();
        seed(&paths.root_for(Stage::Archive));
        let engine = StageEngine::new(&paths, &TransitionConfig::default());
        engine.copy_to_processing(UNIT).expect("copy");
        let template = paths.tool_file("panosettings.p2vr");
        fs::write(&template, b"<settings/>").expect("template");
        let tool = RecordingProcessor::succeeding();

        let out = engine
            .process_directory(&tool, UNIT, Some(&template))
            .expect("process");
        assert_eq!(out.transition.to, UnitState::Processed);
        assert_eq!(out.output.stdout, "processed");
        let calls = tool.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0][0],
            paths.root_for(Stage::Processing).join(UNIT).into_os_string()
        );
        assert_eq!(
            calls[0][1],
            paths.root_for(Stage::Processed).join(UNIT).into_os_string()
        );
        assert_eq!(engine.observe(UNIT).expect("observe"), Some(UnitState::Processed));
    }

    #[test]
    fn process_directory_surfaces_tool_failure() {
        let (_tmp, paths) = setup();
        seed(&paths.root_for(Stage::Archive));
        let engine = StageEngine::new(&paths, &TransitionConfig::default());
        engine.copy_to_processing(UNIT).expect("copy");
        let tool = RecordingProcessor::failing(1, "license missing");

        let err = engine
            .process_directory(&tool, UNIT, None)
            .expect_err("fails");
        assert!(matches!(err, StageError::ExternalTool { .. }));
        assert!(err.to_string().contains("license missing"));
    }

    #[test]
    fn process_directory_requires_processing_copy() {
        let (_tmp, paths) = setup();
        seed(&paths.root_for(Stage::Archive));
        let engine = StageEngine::new(&paths, &TransitionConfig::default());
        let tool = RecordingProcessor::succeeding();

        let err = engine
            .process_directory(&tool, UNIT, None)
            .expect_err("not in processing");
        assert!(matches!(err, StageError::NotFound { .. }));
        assert!(tool.calls.borrow().is_empty());
    }

    #[test]
    fn transitions_are_audited() {
        let (_tmp, paths) = setup();
        seed(&paths.root_for(Stage::Intake));
        let engine = StageEngine::new(&paths, &TransitionConfig::default());

        engine.archive_project(UNIT).expect("archive");
        let _ = engine.archive_project(UNIT);

        let events = audit::read_events(&paths).expect("events");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, "ok");
        assert_eq!(events[1].status, "error");
        assert!(events[1].message.starts_with("E102_NOT_FOUND"));
    }
}
