use anyhow::Result;

use crate::commands::{CommandReport, StageContext};
use crate::pipeline::catalog::{self, StageCatalog};
use crate::pipeline::paths::Stage;

fn describe(report: &mut CommandReport, prefix: &str, catalog: &StageCatalog) {
    for (project, sites) in catalog {
        for (site, files) in sites {
            let site = if site.is_empty() { "-" } else { site.as_str() };
            for file in files {
                report.detail(format!(
                    "{prefix}project={project} site={site} file={} path={}",
                    file.filename, file.path
                ));
            }
        }
    }
}

/// One stage when `stage` is given, otherwise every stage.
pub fn run(stage: Option<Stage>) -> Result<CommandReport> {
    let ctx = StageContext::load()?;
    let mut report = CommandReport::new("catalog");

    match stage {
        Some(stage) => {
            match catalog::collect_stage(&ctx.paths.root_for(stage), &ctx.paths.root) {
                Ok(view) => {
                    report.detail(format!(
                        "stage={} files={}",
                        stage.dir_name(),
                        catalog::file_count(&view)
                    ));
                    describe(&mut report, "", &view);
                    report.set_data(&view)?;
                }
                Err(err) => report.stage_issue(&err),
            }
        }
        None => match catalog::overview(&ctx.paths) {
            Ok(all) => {
                for (dir, view) in &all {
                    report.detail(format!("stage={dir} files={}", catalog::file_count(view)));
                    describe(&mut report, &format!("stage={dir} "), view);
                }
                report.set_data(&all)?;
            }
            Err(err) => report.stage_issue(&err),
        },
    }
    Ok(report)
}
