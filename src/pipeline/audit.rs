use crate::pipeline::paths::StagePaths;
use crate::pipeline::util::now_epoch_secs;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub at_epoch_secs: u64,
    pub at: String,
    pub action: String,
    pub status: String,
    pub unit: String,
    pub message: String,
}

pub fn append_event(
    paths: &StagePaths,
    action: &str,
    status: &str,
    unit: &str,
    message: &str,
) -> Result<()> {
    fs::create_dir_all(&paths.state_dir)
        .with_context(|| format!("failed to create {}", paths.state_dir.display()))?;
    let event = AuditEvent {
        at_epoch_secs: now_epoch_secs()?,
        at: chrono::Local::now().to_rfc3339(),
        action: action.to_string(),
        status: status.to_string(),
        unit: unit.to_string(),
        message: message.to_string(),
    };

    let line = format!("{}\n", serde_json::to_string(&event)?);
    let path = paths.audit_log();
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

pub fn read_events(paths: &StagePaths) -> Result<Vec<AuditEvent>> {
    let path = paths.audit_log();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut out = Vec::new();
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        let event: AuditEvent = serde_json::from_str(line)
            .with_context(|| format!("failed to parse audit line in {}", path.display()))?;
        out.push(event);
    }
    Ok(out)
}
