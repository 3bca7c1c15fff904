use anyhow::Result;
use std::path::PathBuf;

use crate::commands::{CommandReport, StageContext};
use crate::error::StageResult;
use crate::pipeline::engine::UnitKey;
use crate::pipeline::intake::{self, IntakeOutcome};

#[derive(Debug, Clone, Default)]
pub struct UnitOptions {
    pub project_number: String,
    pub date: String,
    pub crew_initials: String,
    pub location: String,
    pub structure_id: String,
}

impl UnitOptions {
    fn key(&self) -> StageResult<UnitKey> {
        UnitKey::new(
            &self.project_number,
            &self.date,
            &self.crew_initials,
            &self.location,
            &self.structure_id,
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub unit: UnitOptions,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct OrganizeOptions {
    pub unit: UnitOptions,
    pub names: Vec<String>,
}

fn describe(report: &mut CommandReport, ctx: &StageContext, out: &IntakeOutcome) -> Result<()> {
    report.detail(format!("project_id={}", out.project_id));
    report.detail(format!("structure_db_id={}", out.structure_db_id));
    report.detail(format!("directory={}", out.directory.display()));
    for file in &out.files {
        let shown = file
            .path
            .strip_prefix(&ctx.paths.root)
            .unwrap_or(&file.path);
        report.detail(format!("file id={} path={}", file.id, shown.display()));
    }
    report.set_data(out)
}

pub fn run(opts: &UploadOptions) -> Result<CommandReport> {
    let ctx = StageContext::load()?;
    let mut report = CommandReport::new("upload");
    if opts.files.is_empty() {
        report.issue("no files given");
        return Ok(report);
    }

    let store = ctx.open_store()?;
    let engine = ctx.engine();
    let result = opts
        .unit
        .key()
        .and_then(|key| intake::upload(&store, &engine, &key, &opts.files));
    match result {
        Ok(out) => describe(&mut report, &ctx, &out)?,
        Err(err) => report.stage_issue(&err),
    }
    Ok(report)
}

pub fn run_organize(opts: &OrganizeOptions) -> Result<CommandReport> {
    let ctx = StageContext::load()?;
    let mut report = CommandReport::new("organize");

    let store = ctx.open_store()?;
    let engine = ctx.engine();
    let result = opts
        .unit
        .key()
        .and_then(|key| intake::organize(&store, &engine, &key, &opts.names));
    match result {
        Ok(out) => {
            if out.files.is_empty() {
                report.detail("no loose files in intake root");
            }
            describe(&mut report, &ctx, &out)?;
        }
        Err(err) => report.stage_issue(&err),
    }
    Ok(report)
}
