use serde::{Deserialize, Serialize};
use std::process::Command;

use crate::util::shell_quote;

/// Host checks for the executables a backend depends on.
pub trait CommandProbe {
    fn command_exists(&self, executable: &str) -> bool;
    fn command_version(&self, executable: &str, flag: &str) -> Result<String, String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessCommandProbe;

impl CommandProbe for ProcessCommandProbe {
    fn command_exists(&self, executable: &str) -> bool {
        Command::new("bash")
            .arg("-lc")
            .arg(format!("command -v -- {}", shell_quote(executable)))
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    fn command_version(&self, executable: &str, flag: &str) -> Result<String, String> {
        let output = Command::new(executable)
            .arg(flag)
            .output()
            .map_err(|err| err.to_string())?;

        if !output.status.success() {
            return Err(format!(
                "non-zero exit {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("")
            .trim()
            .to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRequirement {
    /// Role in the setup, e.g. `multiplexer` or `agent`.
    pub role: String,
    pub executable: String,
    pub version_flag: String,
}

impl ToolRequirement {
    pub fn new(role: impl Into<String>, executable: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            executable: executable.into(),
            version_flag: "--version".to_string(),
        }
    }

    pub fn with_version_flag(mut self, flag: impl Into<String>) -> Self {
        self.version_flag = flag.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolProbeResult {
    pub role: String,
    pub executable: String,
    pub installed: bool,
    pub version_ok: bool,
    pub version_output: Option<String>,
}

impl ToolProbeResult {
    pub fn healthy(&self) -> bool {
        self.installed && self.version_ok
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ToolProbeReport {
    pub tools: Vec<ToolProbeResult>,
}

impl ToolProbeReport {
    pub fn all_healthy(&self) -> bool {
        self.tools.iter().all(ToolProbeResult::healthy)
    }

    pub fn unhealthy(&self) -> impl Iterator<Item = &ToolProbeResult> {
        self.tools.iter().filter(|tool| !tool.healthy())
    }

    /// One line per unhealthy tool, for error messages.
    pub fn describe_problems(&self) -> Vec<String> {
        self.unhealthy()
            .map(|tool| {
                if !tool.installed {
                    format!("{} '{}' not found on PATH", tool.role, tool.executable)
                } else {
                    format!(
                        "{} '{}' failed its version check: {}",
                        tool.role,
                        tool.executable,
                        tool.version_output.as_deref().unwrap_or("no output")
                    )
                }
            })
            .collect()
    }
}

pub fn probe_tools(requirements: &[ToolRequirement], probe: &dyn CommandProbe) -> ToolProbeReport {
    let tools = requirements
        .iter()
        .map(|requirement| {
            let installed = probe.command_exists(&requirement.executable);
            let (version_ok, version_output) = if installed {
                match probe.command_version(&requirement.executable, &requirement.version_flag) {
                    Ok(text) => (true, Some(text)),
                    Err(err) => (false, Some(err)),
                }
            } else {
                (false, None)
            };
            tracing::debug!(
                executable = %requirement.executable,
                installed,
                version_ok,
                "probed tool"
            );
            ToolProbeResult {
                role: requirement.role.clone(),
                executable: requirement.executable.clone(),
                installed,
                version_ok,
                version_output,
            }
        })
        .collect();
    ToolProbeReport { tools }
}
