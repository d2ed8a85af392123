//! # Platform-specific utilities
//!
//! Questo modulo centralizza la risoluzione cross-platform dei binari
//! esterni (ffmpeg, ffprobe, tool degli acceleratori) e l'esecuzione dei
//! sottoprocessi con gestione uniforme degli errori.

use crate::error::PipelineError;
use crate::tool_resolver::ToolPathResolver;
use anyhow::Result;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::OnceLock;
use tokio::process::Command;
use tracing::debug;

/// Platform-specific command manager with tool resolution
pub struct PlatformCommands {
    which_command: &'static str,
    tool_resolver: ToolPathResolver,
}

impl PlatformCommands {
    /// Get the singleton instance
    pub fn instance() -> &'static Self {
        static INSTANCE: OnceLock<PlatformCommands> = OnceLock::new();
        INSTANCE.get_or_init(Self::new)
    }

    fn new() -> Self {
        Self {
            which_command: if cfg!(windows) { "where" } else { "which" },
            tool_resolver: ToolPathResolver::new(),
        }
    }

    /// Resolved program for a tool, falling back to the bare name
    pub fn get_command(&self, base_name: &str) -> OsString {
        self.tool_resolver
            .resolve_tool(base_name)
            .map(PathBuf::into_os_string)
            .unwrap_or_else(|| OsString::from(base_name))
    }

    /// Check if a command is available on the system or bundled
    pub async fn is_command_available(&self, base_name: &str) -> bool {
        if self.tool_resolver.is_tool_available(base_name) {
            return true;
        }

        // Fallback to which/where for shell-resolved commands
        Command::new(self.which_command)
            .arg(base_name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Verify ffmpeg/ffprobe, with install instructions on failure
    pub fn verify_required_tools(&self) -> Result<()> {
        self.tool_resolver
            .verify_tools()
            .map_err(|msg| PipelineError::MissingDependency(msg).into())
    }
}

/// One external process invocation.
///
/// Children are spawned with `kill_on_drop`, so dropping the future that
/// awaits them (Ctrl-C, or an aborted sibling worker) terminates the process.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    label: String,
    program: OsString,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    working_dir: Option<PathBuf>,
}

impl ToolCommand {
    /// Command for a tool resolved through `PlatformCommands` (ffmpeg, ffprobe)
    pub fn tool(name: &str) -> Self {
        let program = PlatformCommands::instance().get_command(name);
        Self::program(name, program)
    }

    /// Command for an arbitrary program, labelled for error messages
    pub fn program(label: impl Into<String>, program: impl Into<OsString>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            working_dir: None,
        }
    }

    /// Build from a `[program, args...]` vector
    pub fn from_argv(label: impl Into<String>, argv: &[String]) -> Result<Self> {
        let label = label.into();
        let (program, rest) = argv
            .split_first()
            .ok_or_else(|| PipelineError::Validation(format!("empty command for {}", label)))?;
        Ok(Self::program(label, program.as_str()).args(rest.iter().cloned()))
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, envs: &[(String, String)]) -> Self {
        self.envs.extend(envs.iter().cloned());
        self
    }

    pub fn current_dir(mut self, dir: Option<&Path>) -> Self {
        self.working_dir = dir.map(Path::to_path_buf);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Run to completion, capturing output. Nonzero exit is an error.
    pub async fn output(&self) -> Result<Output> {
        debug!("Running {}: {:?} {:?}", self.label, self.program, self.args);

        let output = self
            .build()
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to execute {} ({:?}): {}", self.label, self.program, e))?;

        if !output.status.success() {
            return Err(PipelineError::ToolFailed {
                tool: self.label.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        Ok(output)
    }

    /// Run to completion, only the exit status matters
    pub async fn status_ok(&self) -> Result<bool> {
        debug!("Checking {}: {:?} {:?}", self.label, self.program, self.args);
        let status = self
            .build()
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to execute {} ({:?}): {}", self.label, self.program, e))?;
        Ok(status.success())
    }
}

/// `ffmpeg` with the flags every invocation shares
pub fn ffmpeg() -> ToolCommand {
    let loglevel = if tracing::enabled!(tracing::Level::DEBUG) { "info" } else { "error" };
    ToolCommand::tool("ffmpeg").args(["-hide_banner", "-loglevel", loglevel, "-y"])
}

/// `ffprobe` emitting JSON
pub fn ffprobe() -> ToolCommand {
    ToolCommand::tool("ffprobe").args(["-v", "error", "-print_format", "json"])
}
