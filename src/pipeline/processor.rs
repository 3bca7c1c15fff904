use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{StageError, StageResult};
use crate::pipeline::config::ProcessorConfig;
use crate::pipeline::paths::StagePaths;
use crate::pipeline::util::run_command_with_optional_timeout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Narrow seam around the external batch tool. `args` are the positional
/// arguments `(source_dir, dest_dir[, settings_template])`.
pub trait ExternalProcessor {
    fn run(&self, args: &[OsString]) -> StageResult<ProcessOutput>;
}

/// Runs `program [leading_args..] script args..` and waits for it.
#[derive(Debug, Clone)]
pub struct CommandProcessor {
    pub program: PathBuf,
    pub leading_args: Vec<String>,
    pub script: PathBuf,
    pub timeout_secs: Option<u64>,
}

fn resolve_program(program: &str) -> StageResult<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        if candidate.is_file() {
            return Ok(candidate.to_path_buf());
        }
        return Err(StageError::Configuration(format!(
            "processor program not found: {}",
            candidate.display()
        )));
    }
    which::which(program).map_err(|err| {
        StageError::Configuration(format!("processor program `{program}` not on PATH: {err}"))
    })
}

impl CommandProcessor {
    pub fn from_config(paths: &StagePaths, cfg: &ProcessorConfig) -> StageResult<Self> {
        let program = resolve_program(&cfg.program)?;
        let script = paths.tool_file(&cfg.script);
        if !script.is_file() {
            return Err(StageError::Configuration(format!(
                "processor script does not exist: {}",
                script.display()
            )));
        }
        Ok(Self {
            program,
            leading_args: cfg.leading_args.clone(),
            script,
            timeout_secs: cfg.timeout_secs,
        })
    }
}

impl ExternalProcessor for CommandProcessor {
    fn run(&self, args: &[OsString]) -> StageResult<ProcessOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args).arg(&self.script).args(args);
        let output = run_command_with_optional_timeout(&mut cmd, self.timeout_secs).map_err(
            |err| StageError::ExternalTool {
                status: "spawn failure".to_string(),
                stdout: String::new(),
                stderr: format!("failed to run `{}`: {err:#}", self.program.display()),
            },
        )?;
        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Invoke the tool on `source → destination` and turn a non-zero exit into
/// `ExternalTool`. No retries.
pub fn invoke(
    processor: &dyn ExternalProcessor,
    source: &Path,
    destination: &Path,
    template: Option<&Path>,
) -> StageResult<ProcessOutput> {
    let mut args = vec![
        source.as_os_str().to_os_string(),
        destination.as_os_str().to_os_string(),
    ];
    if let Some(template) = template {
        args.push(template.as_os_str().to_os_string());
    }

    let output = processor.run(&args)?;
    if output.success() {
        return Ok(output);
    }
    Err(StageError::ExternalTool {
        status: output
            .exit_code
            .map(|code| format!("exit code {code}"))
            .unwrap_or_else(|| "signal".to_string()),
        stdout: output.stdout,
        stderr: output.stderr,
    })
}
