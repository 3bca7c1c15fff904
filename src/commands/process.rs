use anyhow::Result;
use std::path::PathBuf;

use crate::commands::{CommandReport, StageContext};
use crate::error::{StageError, StageResult};
use crate::pipeline::engine::ProcessOutcome;
use crate::pipeline::processor::{CommandProcessor, ProcessOutput};

#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub unit: String,
    /// Pass the configured settings template as the third argument.
    pub template: bool,
    /// Pass this template instead of the configured one.
    pub template_file: Option<PathBuf>,
}

fn template_path(ctx: &StageContext, opts: &ProcessOptions) -> Option<PathBuf> {
    match &opts.template_file {
        Some(path) => Some(path.clone()),
        None if opts.template => Some(ctx.paths.tool_file(&ctx.config.processor.template)),
        None => None,
    }
}

fn push_output(report: &mut CommandReport, output: &ProcessOutput) {
    for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
        report.detail(format!("stdout: {line}"));
    }
    for line in output.stderr.lines().filter(|l| !l.trim().is_empty()) {
        report.detail(format!("stderr: {line}"));
    }
}

/// Record a processing attempt, including the captured output of a failed
/// tool run.
fn describe(report: &mut CommandReport, result: StageResult<ProcessOutcome>) -> Result<()> {
    match result {
        Ok(out) => {
            report.detail(format!(
                "processed {} -> {}",
                out.transition.source.display(),
                out.transition.destination.display()
            ));
            report.detail(format!("state={}", out.transition.to));
            push_output(report, &out.output);
            report.set_data(serde_json::json!({
                "unit": out.transition.unit,
                "state": out.transition.to,
                "destination": out.transition.destination,
                "exit_code": out.output.exit_code,
            }))?;
        }
        Err(err) => {
            if let StageError::ExternalTool { stdout, stderr, .. } = &err {
                push_output(
                    report,
                    &ProcessOutput {
                        exit_code: None,
                        stdout: stdout.clone(),
                        stderr: stderr.clone(),
                    },
                );
            }
            report.stage_issue(&err);
        }
    }
    Ok(())
}

pub fn run_in(ctx: &StageContext, opts: &ProcessOptions, report: &mut CommandReport) -> Result<()> {
    let processor = match CommandProcessor::from_config(&ctx.paths, &ctx.config.processor) {
        Ok(processor) => processor,
        Err(err) => {
            report.stage_issue(&err);
            return Ok(());
        }
    };
    let template = template_path(ctx, opts);
    let result = ctx
        .engine()
        .process_directory(&processor, &opts.unit, template.as_deref());
    describe(report, result)
}

pub fn run(opts: &ProcessOptions) -> Result<CommandReport> {
    let ctx = StageContext::load()?;
    let mut report = CommandReport::new("process");
    run_in(&ctx, opts, &mut report)?;
    Ok(report)
}
