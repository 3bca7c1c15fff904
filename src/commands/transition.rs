//! Operator-driven stage transitions.

use anyhow::Result;

use crate::commands::process::{self, ProcessOptions};
use crate::commands::{CommandReport, StageContext};
use crate::pipeline::engine::TransitionOutcome;

fn describe(report: &mut CommandReport, out: &TransitionOutcome) {
    report.detail(format!("unit={}", out.unit));
    report.detail(format!("state={} -> {}", out.from, out.to));
    report.detail(format!("source={}", out.source.display()));
    report.detail(format!("destination={}", out.destination.display()));
}

pub fn archive_all() -> Result<CommandReport> {
    let ctx = StageContext::load()?;
    let mut report = CommandReport::new("archive-all");

    match ctx.engine().archive_all() {
        Ok(out) => {
            report.detail(format!("moved={}", out.moved.len()));
            for path in &out.moved {
                report.detail(format!("archived {}", path.display()));
            }
            for failure in &out.failed {
                report.issue(format!(
                    "skipped {}: {}",
                    failure.path.display(),
                    failure.error
                ));
            }
        }
        Err(err) => report.stage_issue(&err),
    }
    Ok(report)
}

pub fn archive_project(unit: &str) -> Result<CommandReport> {
    let ctx = StageContext::load()?;
    let mut report = CommandReport::new("archive");

    match ctx.engine().archive_project(unit) {
        Ok(out) => describe(&mut report, &out),
        Err(err) => report.stage_issue(&err),
    }
    Ok(report)
}

pub fn archive_file(relative_file: &str) -> Result<CommandReport> {
    let ctx = StageContext::load()?;
    let mut report = CommandReport::new("archive-file");

    match ctx.engine().relocate_single_file(relative_file) {
        Ok(dest) => report.detail(format!("archived {}", dest.display())),
        Err(err) => report.stage_issue(&err),
    }
    Ok(report)
}

#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    pub unit: String,
    /// Run the external processor on the new processing copy.
    pub process: bool,
    pub template: bool,
}

pub fn copy_to_processing(opts: &CopyOptions) -> Result<CommandReport> {
    let ctx = StageContext::load()?;
    let mut report = CommandReport::new("copy-to-processing");

    match ctx.engine().copy_to_processing(&opts.unit) {
        Ok((transition, copy)) => {
            describe(&mut report, &transition);
            report.detail(format!("files={}", copy.files));
        }
        Err(err) => {
            report.stage_issue(&err);
            return Ok(report);
        }
    }

    if opts.process {
        process::run_in(
            &ctx,
            &ProcessOptions {
                unit: opts.unit.clone(),
                template: opts.template,
                template_file: None,
            },
            &mut report,
        )?;
    }
    Ok(report)
}

pub fn stage_video(unit: &str) -> Result<CommandReport> {
    let ctx = StageContext::load()?;
    let mut report = CommandReport::new("stage-video");

    match ctx.engine().move_to_processing_and_purge_video(unit) {
        Ok((transition, out)) => {
            describe(&mut report, &transition);
            report.detail(format!("files={}", out.copy.files));
            report.detail(format!("purged={}", out.purge.deleted.len()));
            for path in &out.purge.deleted {
                report.detail(format!("deleted {}", path.display()));
            }
            // The copy succeeded; leftover videos are reported but do not
            // fail the command.
            for failure in &out.purge.failed {
                report.detail(format!(
                    "purge skipped {}: {}",
                    failure.path.display(),
                    failure.error
                ));
            }
        }
        Err(err) => report.stage_issue(&err),
    }
    Ok(report)
}

pub fn process_file(relative_file: &str) -> Result<CommandReport> {
    let ctx = StageContext::load()?;
    let mut report = CommandReport::new("process-file");

    match ctx.engine().move_processed_file(relative_file) {
        Ok(dest) => report.detail(format!("moved to {}", dest.display())),
        Err(err) => report.stage_issue(&err),
    }
    Ok(report)
}
