//! Optional external merge tool for manual conflict resolution.
//!
//! When a merge leaves markers behind and the user configured a tool, the
//! orchestrator writes the three versions to temporary files and hands them
//! to the tool. The tool's absence is never an error; conflict-marked files
//! on disk remain the fallback.

use crate::error::SyncError;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Interactive tools get a long leash; people resolve conflicts slowly.
const TOOL_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Command templates for the tools we know. Placeholders: {LOCAL} {BASE}
/// {REMOTE} {OUTPUT}.
const KNOWN_TOOLS: &[(&str, &str, &str)] = &[
    ("vscode", "code", "code --wait --diff {LOCAL} {REMOTE}"),
    ("vim", "vim", "vim -d {LOCAL} {BASE} {REMOTE}"),
    ("meld", "meld", "meld {LOCAL} {BASE} {REMOTE} --output {OUTPUT}"),
    ("kdiff3", "kdiff3", "kdiff3 {BASE} {LOCAL} {REMOTE} -o {OUTPUT}"),
];

#[derive(Debug, Clone)]
pub struct MergeTool {
    name: String,
    template: String,
    executable: String,
}

impl MergeTool {
    /// Build a tool from its name, or from a custom command template of the
    /// form `mytool {BASE} {LOCAL} {REMOTE} -o {OUTPUT}`.
    pub fn new(name: &str, custom_command: Option<&str>) -> Result<Self, SyncError> {
        if name == "custom" {
            let template = custom_command.ok_or_else(|| SyncError::MergeTool {
                tool: "custom".into(),
                message: "a custom merge tool requires a command template".into(),
            })?;
            let executable = template
                .split_whitespace()
                .next()
                .ok_or_else(|| SyncError::MergeTool {
                    tool: "custom".into(),
                    message: "empty command template".into(),
                })?
                .to_string();
            return Ok(Self {
                name: name.to_string(),
                template: template.to_string(),
                executable,
            });
        }

        for (tool_name, executable, template) in KNOWN_TOOLS {
            if *tool_name == name {
                return Ok(Self {
                    name: name.to_string(),
                    template: template.to_string(),
                    executable: executable.to_string(),
                });
            }
        }

        Err(SyncError::MergeTool {
            tool: name.to_string(),
            message: format!(
                "unknown merge tool; supported: {}, custom",
                KNOWN_TOOLS
                    .iter()
                    .map(|(n, _, _)| *n)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// PATH probe; a missing tool downgrades to conflict files on disk.
    pub fn is_available(&self) -> bool {
        let Some(paths) = std::env::var_os("PATH") else {
            return false;
        };
        std::env::split_paths(&paths).any(|dir| dir.join(&self.executable).is_file())
    }

    /// Run the tool over the three versions and harvest the resolved text,
    /// either from the output file or (for in-place tools) the local file.
    pub fn launch(
        &self,
        local: &Path,
        base: &Path,
        remote: &Path,
        output: &Path,
    ) -> Result<String, SyncError> {
        for (path, role) in [(local, "local"), (base, "base"), (remote, "remote")] {
            if !path.exists() {
                return Err(SyncError::MergeTool {
                    tool: self.name.clone(),
                    message: format!("{role} file not found: {}", path.display()),
                });
            }
        }

        let command_line = self
            .template
            .replace("{LOCAL}", &local.to_string_lossy())
            .replace("{BASE}", &base.to_string_lossy())
            .replace("{REMOTE}", &remote.to_string_lossy())
            .replace("{OUTPUT}", &output.to_string_lossy());

        tracing::info!(tool = %self.name, command = %command_line, "launching merge tool");

        let mut parts = command_line.split_whitespace();
        let program = parts.next().expect("template has an executable");
        let mut child = Command::new(program)
            .args(parts)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SyncError::MergeTool {
                tool: self.name.clone(),
                message: format!("failed to launch: {e}"),
            })?;

        let status = self.wait_with_timeout(&mut child)?;
        if !status.success() {
            return Err(SyncError::MergeTool {
                tool: self.name.clone(),
                message: format!("tool exited with {status}"),
            });
        }

        let result_path: PathBuf = if output.exists() {
            output.to_path_buf()
        } else {
            // vscode-style tools edit the local file in place
            local.to_path_buf()
        };

        std::fs::read_to_string(&result_path).map_err(|e| SyncError::MergeTool {
            tool: self.name.clone(),
            message: format!("failed to read resolved file {}: {e}", result_path.display()),
        })
    }

    fn wait_with_timeout(
        &self,
        child: &mut std::process::Child,
    ) -> Result<std::process::ExitStatus, SyncError> {
        let deadline = Instant::now() + TOOL_TIMEOUT;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        return Err(SyncError::MergeTool {
                            tool: self.name.clone(),
                            message: format!("timed out after {}s", TOOL_TIMEOUT.as_secs()),
                        });
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(SyncError::MergeTool {
                        tool: self.name.clone(),
                        message: format!("wait failed: {e}"),
                    });
                }
            }
        }
    }
}
