//! Direct access to the metadata store.

use anyhow::Result;
use std::path::Path;

use crate::commands::{CommandReport, StageContext};
use crate::pipeline::reconcile;
use crate::pipeline::store::{MetadataStore, ProjectId, ProjectStatus, StructureDbId};
use crate::pipeline::util::{normalize_path, validate_component};

pub fn create_project(number: &str, date: &str, crew: &str) -> Result<CommandReport> {
    let ctx = StageContext::load()?;
    let store = ctx.open_store()?;
    let mut report = CommandReport::new("create-project");

    let result = validate_component(number)
        .and_then(|_| validate_component(date))
        .and_then(|_| validate_component(crew))
        .and_then(|_| store.insert_or_get_project(number.trim(), date.trim(), crew.trim()));
    match result {
        Ok(id) => {
            report.detail(format!("project_id={id}"));
            report.set_data(serde_json::json!({ "project_id": id }))?;
        }
        Err(err) => report.stage_issue(&err),
    }
    Ok(report)
}

pub fn create_structure(
    project_id: ProjectId,
    location: &str,
    structure_id: &str,
    date: &str,
) -> Result<CommandReport> {
    let ctx = StageContext::load()?;
    let store = ctx.open_store()?;
    let mut report = CommandReport::new("create-structure");

    match store.get_project(project_id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            report.issue(format!("project {project_id} does not exist"));
            return Ok(report);
        }
        Err(err) => {
            report.stage_issue(&err);
            return Ok(report);
        }
    }

    let result = validate_component(location)
        .and_then(|_| validate_component(structure_id))
        .and_then(|_| validate_component(date))
        .and_then(|_| {
            store.insert_or_get_structure(
                project_id,
                location.trim(),
                structure_id.trim(),
                date.trim(),
            )
        });
    match result {
        Ok(id) => {
            report.detail(format!("structure_db_id={id}"));
            report.set_data(serde_json::json!({ "structure_db_id": id }))?;
        }
        Err(err) => report.stage_issue(&err),
    }
    Ok(report)
}

/// Record an already stored file. Relative paths resolve against the
/// working directory and must land under the storage root.
pub fn add_file(
    structure_db_id: StructureDbId,
    filename: &str,
    path: &Path,
) -> Result<CommandReport> {
    let ctx = StageContext::load()?;
    let store = ctx.open_store()?;
    let mut report = CommandReport::new("add-file");

    match store.get_structure(structure_db_id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            report.issue(format!("structure {structure_db_id} does not exist"));
            return Ok(report);
        }
        Err(err) => {
            report.stage_issue(&err);
            return Ok(report);
        }
    }

    match store.insert_file(structure_db_id, filename, &normalize_path(path)) {
        Ok(id) => {
            report.detail(format!("file_id={id}"));
            report.set_data(serde_json::json!({ "file_id": id }))?;
        }
        Err(err) => report.stage_issue(&err),
    }
    Ok(report)
}

pub fn set_status(project_id: ProjectId, status: ProjectStatus) -> Result<CommandReport> {
    let ctx = StageContext::load()?;
    let store = ctx.open_store()?;
    let mut report = CommandReport::new("set-status");

    match store.update_project_status(project_id, status) {
        Ok(true) => report.detail(format!("project {project_id} is now {status}")),
        Ok(false) => report.issue(format!("project {project_id} does not exist")),
        Err(err) => report.stage_issue(&err),
    }
    Ok(report)
}

pub fn list_projects() -> Result<CommandReport> {
    let ctx = StageContext::load()?;
    let store = ctx.open_store()?;
    let mut report = CommandReport::new("projects");

    let projects = match store.list_projects() {
        Ok(projects) => projects,
        Err(err) => {
            report.stage_issue(&err);
            return Ok(report);
        }
    };
    let sites = match store.list_projects_with_sites_and_dates() {
        Ok(sites) => sites,
        Err(err) => {
            report.stage_issue(&err);
            return Ok(report);
        }
    };

    for project in &projects {
        report.detail(format!(
            "project id={} number={} date={} crew={} status={}",
            project.id, project.project_number, project.date, project.crew_initials, project.status
        ));
    }
    for (number, by_site) in &sites {
        for (site, structures) in by_site {
            for s in structures {
                report.detail(format!(
                    "site project={number} location={site} structure={} date={} structure_db_id={}",
                    s.structure_id, s.date, s.structure_db_id
                ));
            }
        }
    }
    report.set_data(serde_json::json!({ "projects": projects, "sites": sites }))?;
    Ok(report)
}

pub fn list_structures(project_id: ProjectId) -> Result<CommandReport> {
    let ctx = StageContext::load()?;
    let store = ctx.open_store()?;
    let mut report = CommandReport::new("structures");

    match store.list_structures_for_project(project_id) {
        Ok(structures) => {
            for s in &structures {
                report.detail(format!(
                    "structure id={} location={} structure={} date={}",
                    s.id, s.project_location, s.structure_id, s.collection_date
                ));
            }
            report.set_data(&structures)?;
        }
        Err(err) => report.stage_issue(&err),
    }
    Ok(report)
}

#[derive(Debug, Clone, Default)]
pub struct FilesOptions {
    pub structure_db_id: StructureDbId,
    pub date: Option<String>,
    pub locate: bool,
}

pub fn list_files(opts: &FilesOptions) -> Result<CommandReport> {
    let ctx = StageContext::load()?;
    let store = ctx.open_store()?;
    let mut report = CommandReport::new("files");

    let records = match &opts.date {
        Some(date) => store.list_files_for_structure_and_date(opts.structure_db_id, date),
        None => store.list_files_for_structure(opts.structure_db_id),
    };
    let records = match records {
        Ok(records) => records,
        Err(err) => {
            report.stage_issue(&err);
            return Ok(report);
        }
    };

    if !opts.locate {
        for record in &records {
            report.detail(format!(
                "file id={} name={} path={}",
                record.id, record.filename, record.path
            ));
        }
        report.set_data(&records)?;
        return Ok(report);
    }

    let located = reconcile::locate_all(&ctx.paths, &records);
    for item in &located {
        let current = item
            .current()
            .map(|stage| stage.dir_name())
            .unwrap_or("missing");
        report.detail(format!(
            "file id={} name={} recorded={} current={current} stale={}",
            item.record.id,
            item.record.filename,
            item.record.path,
            item.is_stale()
        ));
    }
    report.set_data(&located)?;
    Ok(report)
}
