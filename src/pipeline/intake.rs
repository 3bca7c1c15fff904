//! Getting files into the intake stage and into the metadata store.

use serde::Serialize;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{StageError, StageResult};
use crate::pipeline::engine::{StageEngine, UnitKey};
use crate::pipeline::paths::Stage;
use crate::pipeline::store::{FileId, MetadataStore, ProjectId, StructureDbId};
use crate::pipeline::util::{is_hidden, validate_component};

#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    pub id: FileId,
    pub filename: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntakeOutcome {
    pub project_id: ProjectId,
    pub structure_db_id: StructureDbId,
    pub directory: PathBuf,
    pub files: Vec<StoredFile>,
}

fn file_name_of(path: &Path) -> StageResult<String> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| StageError::InvalidName(path.display().to_string()))?;
    Ok(validate_component(&name)?.to_string())
}

/// Pair every source with its destination inside `directory`, rejecting
/// missing sources and name clashes before anything is written.
fn plan(sources: &[PathBuf], directory: &Path) -> StageResult<Vec<(PathBuf, String, PathBuf)>> {
    let mut planned: Vec<(PathBuf, String, PathBuf)> = Vec::with_capacity(sources.len());
    for source in sources {
        if !source.is_file() {
            return Err(StageError::not_found("upload source", source));
        }
        let name = file_name_of(source)?;
        let destination = directory.join(&name);
        if destination.exists() || planned.iter().any(|(_, n, _)| *n == name) {
            return Err(StageError::Collision { path: destination });
        }
        planned.push((source.clone(), name, destination));
    }
    Ok(planned)
}

/// Write `source` to `destination` through a temp file in the same
/// directory, refusing to replace an existing file.
fn write_new_file(source: &Path, destination: &Path) -> StageResult<()> {
    let dir = destination
        .parent()
        .ok_or_else(|| StageError::InvalidName(destination.display().to_string()))?;
    let mut reader =
        File::open(source).map_err(|err| StageError::transition("open upload", source, err))?;
    let mut staged = tempfile::Builder::new()
        .prefix(".fieldstage-upload-")
        .tempfile_in(dir)
        .map_err(|err| StageError::transition("create temp file", dir, err))?;
    io::copy(&mut reader, staged.as_file_mut())
        .map_err(|err| StageError::transition("write upload", destination, err))?;
    staged.persist_noclobber(destination).map_err(|err| {
        if err.error.kind() == io::ErrorKind::AlreadyExists {
            StageError::Collision {
                path: destination.to_path_buf(),
            }
        } else {
            StageError::transition("publish upload", destination, err.error)
        }
    })?;
    Ok(())
}

fn register(
    store: &dyn MetadataStore,
    key: &UnitKey,
) -> StageResult<(ProjectId, StructureDbId)> {
    let project_id =
        store.insert_or_get_project(key.project_number(), key.date(), key.crew_initials())?;
    let structure_db_id =
        store.insert_or_get_structure(project_id, key.location(), key.structure_id(), key.date())?;
    Ok((project_id, structure_db_id))
}

/// Register the project and structure, materialize the intake folder and
/// copy `sources` into it, recording one file row per stored file.
pub fn upload(
    store: &dyn MetadataStore,
    engine: &StageEngine<'_>,
    key: &UnitKey,
    sources: &[PathBuf],
) -> StageResult<IntakeOutcome> {
    let directory = engine
        .paths()
        .root_for(Stage::Intake)
        .join(key.project_folder())
        .join(key.structure_folder());

    let result = (|| -> StageResult<IntakeOutcome> {
        let _guard = engine.lock(&directory)?;
        engine.ensure_intake_open(key)?;
        let planned = plan(sources, &directory)?;
        let (project_id, structure_db_id) = register(store, key)?;
        let directory = engine.materialize_intake(key)?;

        let mut files = Vec::with_capacity(planned.len());
        for (source, name, destination) in planned {
            write_new_file(&source, &destination)?;
            let id = store.insert_file(structure_db_id, &name, &destination)?;
            files.push(StoredFile {
                id,
                filename: name,
                path: destination,
            });
        }
        Ok(IntakeOutcome {
            project_id,
            structure_db_id,
            directory,
            files,
        })
    })();

    engine.audited("upload", &key.project_folder(), result, |out| {
        format!("stored {} file(s) in {}", out.files.len(), out.directory.display())
    })
}

/// Move loose files sitting directly in the intake root into the unit's
/// structure folder. An empty `names` list takes every visible loose file.
pub fn organize(
    store: &dyn MetadataStore,
    engine: &StageEngine<'_>,
    key: &UnitKey,
    names: &[String],
) -> StageResult<IntakeOutcome> {
    let intake_root = engine.paths().root_for(Stage::Intake);
    let directory = intake_root
        .join(key.project_folder())
        .join(key.structure_folder());

    let result = (|| -> StageResult<IntakeOutcome> {
        let _guard = engine.lock(&directory)?;
        engine.ensure_intake_open(key)?;
        let sources = if names.is_empty() {
            loose_files(&intake_root)?
        } else {
            names
                .iter()
                .map(|name| validate_component(name).map(|n| intake_root.join(n)))
                .collect::<StageResult<Vec<_>>>()?
        };
        let planned = plan(&sources, &directory)?;
        let (project_id, structure_db_id) = register(store, key)?;
        let directory = engine.materialize_intake(key)?;

        let mut files = Vec::with_capacity(planned.len());
        for (source, name, destination) in planned {
            crate::pipeline::transfer::move_file(&source, &destination)?;
            let id = store.insert_file(structure_db_id, &name, &destination)?;
            files.push(StoredFile {
                id,
                filename: name,
                path: destination,
            });
        }
        Ok(IntakeOutcome {
            project_id,
            structure_db_id,
            directory,
            files,
        })
    })();

    engine.audited("organize", &key.project_folder(), result, |out| {
        format!("organized {} file(s) into {}", out.files.len(), out.directory.display())
    })
}

fn loose_files(intake_root: &Path) -> StageResult<Vec<PathBuf>> {
    if !intake_root.is_dir() {
        return Err(StageError::not_found("intake root", intake_root));
    }
    let mut out = Vec::new();
    for entry in
        fs::read_dir(intake_root).map_err(|err| StageError::transition("read dir", intake_root, err))?
    {
        let entry = entry.map_err(|err| StageError::transition("read dir entry", intake_root, err))?;
        let path = entry.path();
        if path.is_file() && !is_hidden(&entry.file_name().to_string_lossy()) {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}
