use anyhow::Result;

use crate::commands::{CommandReport, StageContext};
use crate::pipeline::lifecycle;

pub fn run(unit: &str) -> Result<CommandReport> {
    let ctx = StageContext::load()?;
    let mut report = CommandReport::new("state");

    match ctx.engine().observe(unit) {
        Ok(Some(state)) => {
            report.detail(format!("unit={unit}"));
            report.detail(format!("state={state}"));
            let stages = lifecycle::placements(&ctx.paths, unit);
            let names: Vec<&str> = stages.iter().map(|s| s.dir_name()).collect();
            report.detail(format!("present_in={}", names.join(",")));
            report.set_data(serde_json::json!({
                "unit": unit,
                "state": state,
                "present_in": stages,
            }))?;
        }
        Ok(None) => report.issue(format!("`{unit}` is not in any lifecycle stage")),
        Err(err) => report.stage_issue(&err),
    }

    Ok(report)
}
