use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub program: String,
    pub leading_args: Vec<String>,
    pub script: String,
    pub template: String,
    pub timeout_secs: Option<u64>,
}

fn default_leading_args() -> Vec<String> {
    ["-ExecutionPolicy", "Bypass", "-File"]
        .into_iter()
        .map(ToOwned::to_owned)
        .collect()
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            program: "powershell".to_string(),
            leading_args: default_leading_args(),
            script: "ProcessPan2vrImages.ps1".to_string(),
            template: "panosettings.p2vr".to_string(),
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionConfig {
    pub purge_extensions: Vec<String>,
    pub stop_on_first_error: bool,
    pub verify_copies: bool,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            purge_extensions: vec!["mp4".to_string()],
            stop_on_first_error: false,
            verify_copies: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StageConfig {
    pub processor: ProcessorConfig,
    pub transitions: TransitionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialStageConfig {
    processor: Option<ProcessorConfig>,
    transitions: Option<TransitionConfig>,
}

fn env_or_u64_opt(var: &str, fallback: Option<u64>) -> Option<u64> {
    match env::var(var) {
        Ok(v) if v.trim().is_empty() || v.trim() == "0" => None,
        Ok(v) => v.trim().parse::<u64>().ok().or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "on" => true,
            "0" | "false" | "FALSE" | "no" | "off" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

/// Comma separated list; an explicitly empty value clears the list.
fn env_or_csv(var: &str, fallback: &[String]) -> Vec<String> {
    match env::var(var) {
        Ok(v) => v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .collect(),
        Err(_) => fallback.to_vec(),
    }
}

fn normalize_extensions(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

fn validate(cfg: &StageConfig) -> Result<()> {
    if cfg.processor.program.trim().is_empty() {
        return Err(anyhow!("invalid processor program: cannot be empty"));
    }
    if cfg.processor.script.trim().is_empty() {
        return Err(anyhow!("invalid processor script: cannot be empty"));
    }
    if cfg.transitions.purge_extensions.is_empty() {
        return Err(anyhow!(
            "invalid purge extensions: at least one video extension is required"
        ));
    }
    if cfg
        .transitions
        .purge_extensions
        .iter()
        .any(|ext| ext.contains(['/', '\\']))
    {
        return Err(anyhow!(
            "invalid purge extension: must not contain path separators"
        ));
    }
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("FIELDSTAGE_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let base = dirs::config_dir()?;
    Some(base.join("fieldstage").join("config.toml"))
}

fn merge_file_config(base: &mut StageConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    let parsed: PartialStageConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse fieldstage config {}: {err}", path.display()))?;
    if let Some(processor) = parsed.processor {
        base.processor = processor;
    }
    if let Some(transitions) = parsed.transitions {
        base.transitions = transitions;
    }
    Ok(())
}

pub fn load_config() -> Result<StageConfig> {
    let mut cfg = StageConfig::default();
    merge_file_config(&mut cfg)?;

    cfg.processor.program = env_or_string("FIELDSTAGE_PROCESSOR_BIN", &cfg.processor.program);
    cfg.processor.leading_args =
        env_or_csv("FIELDSTAGE_PROCESSOR_ARGS", &cfg.processor.leading_args);
    cfg.processor.script = env_or_string("FIELDSTAGE_PROCESSOR_SCRIPT", &cfg.processor.script);
    cfg.processor.template =
        env_or_string("FIELDSTAGE_PROCESSOR_TEMPLATE", &cfg.processor.template);
    cfg.processor.timeout_secs = env_or_u64_opt(
        "FIELDSTAGE_PROCESSOR_TIMEOUT_SECS",
        cfg.processor.timeout_secs,
    );
    cfg.transitions.purge_extensions = normalize_extensions(&env_or_csv(
        "FIELDSTAGE_PURGE_EXTENSIONS",
        &cfg.transitions.purge_extensions,
    ));
    cfg.transitions.stop_on_first_error = env_or_bool(
        "FIELDSTAGE_STOP_ON_FIRST_ERROR",
        cfg.transitions.stop_on_first_error,
    );
    cfg.transitions.verify_copies =
        env_or_bool("FIELDSTAGE_VERIFY_COPIES", cfg.transitions.verify_copies);

    validate(&cfg)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pan2vr_invocation() {
        let cfg = StageConfig::default();
        assert_eq!(cfg.processor.program, "powershell");
        assert_eq!(
            cfg.processor.leading_args,
            vec!["-ExecutionPolicy", "Bypass", "-File"]
        );
        assert_eq!(cfg.processor.timeout_secs, None);
        assert_eq!(cfg.transitions.purge_extensions, vec!["mp4"]);
        assert!(!cfg.transitions.stop_on_first_error);
        assert!(cfg.transitions.verify_copies);
    }

    #[test]
    fn partial_file_config_keeps_missing_sections_default() {
        let parsed: PartialStageConfig = toml::from_str(
            r#"
[transitions]
purge_extensions = ["mp4", "mov"]
stop_on_first_error = true
"#,
        )
        .expect("parse");
        let mut cfg = StageConfig::default();
        if let Some(transitions) = parsed.transitions {
            cfg.transitions = transitions;
        }
        assert!(parsed.processor.is_none());
        assert_eq!(cfg.processor.program, "powershell");
        assert_eq!(cfg.transitions.purge_extensions, vec!["mp4", "mov"]);
        assert!(cfg.transitions.stop_on_first_error);
        assert!(cfg.transitions.verify_copies);
    }

    #[test]
    fn extensions_are_normalized() {
        let got = normalize_extensions(&[".MP4".to_string(), " mov ".to_string(), "".to_string()]);
        assert_eq!(got, vec!["mp4", "mov"]);
    }

    #[test]
    fn validate_rejects_empty_program() {
        let mut cfg = StageConfig::default();
        cfg.processor.program = " ".to_string();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn validate_rejects_empty_purge_extensions() {
        let mut cfg = StageConfig::default();
        cfg.transitions.purge_extensions = normalize_extensions(&[" ".to_string()]);
        let err = validate(&cfg).expect_err("empty purge list");
        assert!(err.to_string().contains("purge extensions"));
    }
}
