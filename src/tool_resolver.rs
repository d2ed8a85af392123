//! # Tool Path Resolver
//!
//! Finds the external binaries the pipeline shells out to:
//! - a bundled tools directory (`TOOLS_DIR`, optionally per platform)
//! - the system `PATH`

use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Tools the pipeline itself depends on (the swap worker and batch stages are configured separately)
pub const REQUIRED_TOOLS: [&str; 2] = ["ffmpeg", "ffprobe"];

/// Tool path resolver for bundled and system-installed binaries
pub struct ToolPathResolver {
    /// Directory where tools are bundled
    tools_dir: Option<PathBuf>,
}

impl ToolPathResolver {
    /// Create a new path resolver
    pub fn new() -> Self {
        Self {
            tools_dir: Self::detect_bundled_tools_dir(),
        }
    }

    /// Create a resolver bound to an explicit tools directory
    pub fn with_tools_dir(tools_dir: impl Into<PathBuf>) -> Self {
        Self {
            tools_dir: Some(tools_dir.into()),
        }
    }

    fn detect_bundled_tools_dir() -> Option<PathBuf> {
        if let Ok(tools_dir) = env::var("TOOLS_DIR") {
            let tools_path = PathBuf::from(tools_dir);
            debug!("Checking TOOLS_DIR environment variable: {:?}", tools_path);
            if tools_path.exists() {
                return Some(tools_path);
            }
            warn!("TOOLS_DIR is set but does not exist: {:?}", tools_path);
        }

        // Tools shipped next to the executable
        let exe_path = env::current_exe().ok()?;
        let tools_path = exe_path.parent()?.join("tools");
        if tools_path.exists() {
            debug!("Found bundled tools directory: {:?}", tools_path);
            return Some(tools_path);
        }

        None
    }

    /// Resolve the path to a specific tool, bundled copy first
    pub fn resolve_tool(&self, tool_name: &str) -> Option<PathBuf> {
        if let Some(ref tools_dir) = self.tools_dir {
            if let Some(bundled) = self.find_bundled_tool(tools_dir, tool_name) {
                debug!("Using bundled tool: {} -> {:?}", tool_name, bundled);
                return Some(bundled);
            }
        }

        if let Some(system_path) = self.find_in_system_path(tool_name) {
            debug!("Using system tool: {} -> {:?}", tool_name, system_path);
            return Some(system_path);
        }

        debug!("Tool not found: {}", tool_name);
        None
    }

    /// Bundled layouts: `tools/{platform}/{tool}` or `tools/{tool}`
    fn find_bundled_tool(&self, tools_dir: &Path, tool_name: &str) -> Option<PathBuf> {
        let platform = if cfg!(target_os = "macos") {
            "darwin"
        } else {
            env::consts::OS
        };
        let file_name = Self::executable_name(tool_name);

        [tools_dir.join(platform).join(&file_name), tools_dir.join(&file_name)]
            .into_iter()
            .find(|path| path.is_file())
    }

    fn find_in_system_path(&self, tool_name: &str) -> Option<PathBuf> {
        let file_name = Self::executable_name(tool_name);
        let paths = env::var_os("PATH")?;
        env::split_paths(&paths)
            .map(|dir| dir.join(&file_name))
            .find(|path| path.is_file())
    }

    fn executable_name(tool_name: &str) -> String {
        if cfg!(windows) && !tool_name.ends_with(".exe") {
            format!("{}.exe", tool_name)
        } else {
            tool_name.to_string()
        }
    }

    /// Check if a specific tool is available
    pub fn is_tool_available(&self, tool_name: &str) -> bool {
        self.resolve_tool(tool_name).is_some()
    }

    /// Check that every required tool is available
    pub fn verify_tools(&self) -> Result<(), String> {
        let missing_messages: Vec<String> = REQUIRED_TOOLS
            .iter()
            .filter_map(|tool| self.check_tool_with_instructions(tool).err())
            .collect();

        if missing_messages.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "Some required tools are missing:\n\n{}",
                missing_messages.join("\n\n")
            ))
        }
    }

    /// Installation hint for a tool on Linux
    fn get_linux_install_instructions(&self, tool_name: &str) -> String {
        match tool_name {
            "ffmpeg" | "ffprobe" => "sudo apt-get install ffmpeg".to_string(),
            "nvidia-smi" => "install the NVIDIA driver for your distribution".to_string(),
            "rocm-smi" => "sudo apt-get install rocm-smi".to_string(),
            _ => format!("sudo apt-get install {}", tool_name),
        }
    }

    /// Resolve a tool or explain how to install it
    pub fn check_tool_with_instructions(&self, tool_name: &str) -> Result<PathBuf, String> {
        if let Some(path) = self.resolve_tool(tool_name) {
            return Ok(path);
        }

        if cfg!(target_os = "linux") {
            Err(format!(
                "Tool '{}' not found in system PATH.\n\
                To install on Linux, run:\n  {}",
                tool_name,
                self.get_linux_install_instructions(tool_name)
            ))
        } else {
            Err(format!(
                "Tool '{}' not found. Please ensure it's installed or placed in TOOLS_DIR.",
                tool_name
            ))
        }
    }
}

impl Default for ToolPathResolver {
    fn default() -> Self {
        Self::new()
    }
}
