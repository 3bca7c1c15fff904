use anyhow::Result;

use crate::commands::{CommandReport, StageContext};

pub fn run() -> Result<CommandReport> {
    let ctx = StageContext::load()?;
    let mut report = CommandReport::new("setup");

    let dirs = ctx.paths.bootstrap()?;
    for dir in &dirs {
        report.detail(format!("dir={}", dir.display()));
    }
    ctx.open_store()?;
    report.detail(format!("database={}", ctx.paths.database.display()));

    Ok(report)
}
