//! Read-only project → site → files views over the stage roots.
//!
//! Always built from the filesystem, never from the metadata store.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::{StageError, StageResult};
use crate::pipeline::paths::{Stage, StagePaths};
use crate::pipeline::store::storage_relative;
use crate::pipeline::util::is_hidden;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub filename: String,
    /// Relative to the storage root, `/` separated.
    pub path: String,
}

/// project → site → files. The `""` site holds files sitting directly in
/// the project folder.
pub type StageCatalog = BTreeMap<String, BTreeMap<String, Vec<CatalogEntry>>>;

fn hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(is_hidden)
}

fn sorted_children(dir: &Path) -> StageResult<Vec<fs::DirEntry>> {
    let mut children = fs::read_dir(dir)
        .map_err(|err| StageError::transition("read dir", dir, err))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| StageError::transition("read dir entry", dir, err))?;
    children.retain(|entry| !hidden(&entry.path()));
    children.sort_by_key(|entry| entry.file_name());
    Ok(children)
}

fn entry(storage_root: &Path, path: &Path) -> StageResult<CatalogEntry> {
    Ok(CatalogEntry {
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path: storage_relative(storage_root, path)?,
    })
}

fn site_files(storage_root: &Path, site: &Path) -> StageResult<Vec<CatalogEntry>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(site)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !hidden(e.path()));
    for item in walker {
        let item = item.map_err(|err| {
            let path = err.path().unwrap_or(site).to_path_buf();
            let io_err = err
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
            StageError::transition("walk site", path, io_err)
        })?;
        if item.file_type().is_file() {
            files.push(entry(storage_root, item.path())?);
        }
    }
    Ok(files)
}

/// Group the files under one stage root. A missing root yields an empty
/// catalog.
pub fn collect_stage(stage_root: &Path, storage_root: &Path) -> StageResult<StageCatalog> {
    let mut catalog = StageCatalog::new();
    if !stage_root.is_dir() {
        return Ok(catalog);
    }

    for project in sorted_children(stage_root)? {
        let project_path = project.path();
        if !project_path.is_dir() {
            continue;
        }
        let project_name = project.file_name().to_string_lossy().into_owned();
        let mut sites = BTreeMap::new();
        let mut loose = Vec::new();

        for item in sorted_children(&project_path)? {
            let item_path = item.path();
            if item_path.is_dir() {
                let site_name = item.file_name().to_string_lossy().into_owned();
                sites.insert(site_name, site_files(storage_root, &item_path)?);
            } else if item_path.is_file() {
                loose.push(entry(storage_root, &item_path)?);
            }
        }
        if !loose.is_empty() {
            sites.insert(String::new(), loose);
        }
        catalog.insert(project_name, sites);
    }
    Ok(catalog)
}

/// Catalog every stage root, keyed by its directory name.
pub fn overview(paths: &StagePaths) -> StageResult<BTreeMap<String, StageCatalog>> {
    let mut out = BTreeMap::new();
    for stage in Stage::ALL {
        out.insert(
            stage.dir_name().to_string(),
            collect_stage(&paths.root_for(stage), &paths.root)?,
        );
    }
    Ok(out)
}

/// Total number of files in a catalog.
pub fn file_count(catalog: &StageCatalog) -> usize {
    catalog
        .values()
        .flat_map(|sites| sites.values())
        .map(Vec::len)
        .sum()
}
