pub mod catalog;
pub mod process;
pub mod records;
pub mod setup;
pub mod state;
pub mod status;
pub mod transition;
pub mod upload;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::error::StageError;
use crate::pipeline::config::{StageConfig, load_config};
use crate::pipeline::engine::StageEngine;
use crate::pipeline::paths::{StagePaths, resolve_paths};
use crate::pipeline::store::SqliteStore;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
            data: None,
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    /// Report a core failure as `CODE: message`.
    pub fn stage_issue(&mut self, err: &StageError) {
        self.issue(format!("{}: {err}", err.code().as_str()));
    }

    pub fn set_data(&mut self, value: impl Serialize) -> Result<()> {
        self.data = Some(serde_json::to_value(value).context("failed to encode report data")?);
        Ok(())
    }
}

/// Resolved paths and behavioural config shared by every command.
pub struct StageContext {
    pub paths: StagePaths,
    pub config: StageConfig,
}

impl StageContext {
    /// Resolve paths and config, then make sure every stage root exists.
    pub fn load() -> Result<Self> {
        let paths = resolve_paths()?;
        let config = load_config()?;
        paths.bootstrap()?;
        Ok(Self { paths, config })
    }

    pub fn engine(&self) -> StageEngine<'_> {
        StageEngine::new(&self.paths, &self.config.transitions)
    }

    pub fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.paths.database, &self.paths.root).with_context(|| {
            format!(
                "failed to open metadata store {}",
                self.paths.database.display()
            )
        })
    }
}
