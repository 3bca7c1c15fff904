use anyhow::Result;
use std::env;

use crate::commands::CommandReport;
use crate::pipeline::audit;
use crate::pipeline::config::load_config;
use crate::pipeline::paths::{Stage, resolve_paths};

mod generated {
    include!(concat!(env!("OUT_DIR"), "/fieldstage_env_allowlist.rs"));
}

/// Allow-listed settings currently set in the environment, as `KEY(module)`.
pub fn set_env_keys() -> Vec<String> {
    generated::GENERATED_ENV_ALLOWLIST
        .iter()
        .filter(|(key, _)| env::var_os(key).is_some())
        .map(|(key, owner)| format!("{key}({owner})"))
        .collect()
}

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("build={}", env!("BUILD_UUID")));
    report.detail(format!("root={}", paths.root.display()));
    report.detail(format!("database={}", paths.database.display()));
    report.detail(format!("state_dir={}", paths.state_dir.display()));

    for stage in Stage::ALL {
        let dir = paths.root_for(stage);
        let present = dir.is_dir();
        report.detail(format!("stage.{}={} present={present}", stage.key(), dir.display()));
        if !present {
            report.issue(format!(
                "missing stage root {} (run `fieldstage setup`)",
                dir.display()
            ));
        }
    }
    if !paths.database.exists() {
        report.issue(format!(
            "missing metadata store {} (run `fieldstage setup`)",
            paths.database.display()
        ));
    }

    match load_config() {
        Ok(cfg) => {
            report.detail(format!("processor.program={}", cfg.processor.program));
            report.detail(format!(
                "processor.script={}",
                paths.tool_file(&cfg.processor.script).display()
            ));
            report.detail(format!(
                "transitions.purge_extensions={}",
                cfg.transitions.purge_extensions.join(",")
            ));
            report.detail(format!(
                "transitions.stop_on_first_error={}",
                cfg.transitions.stop_on_first_error
            ));
            report.detail(format!(
                "transitions.verify_copies={}",
                cfg.transitions.verify_copies
            ));
        }
        Err(err) => report.issue(format!("invalid config: {err:#}")),
    }

    let keys = set_env_keys();
    report.detail(format!(
        "env_set={}",
        if keys.is_empty() {
            "-".to_string()
        } else {
            keys.join(",")
        }
    ));

    match audit::read_events(&paths) {
        Ok(events) => report.detail(format!("audit_events={}", events.len())),
        Err(err) => report.issue(format!("unreadable audit log: {err:#}")),
    }

    Ok(report)
}
