// Local channel for control nodes that are this machine

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use walkdir::WalkDir;

use super::commands::{module_command, parse_module_output, CommandResult};
use super::{ChannelError, EntryKind, ModuleArgs, RemoteChannel, TreeDescriptor, TreeEntry};
use crate::hosts::ManagedHost;
use crate::registry::normalize_path;

/// Executes channel operations on the local machine
#[derive(Debug, Clone, Default)]
pub struct LocalChannel;

impl LocalChannel {
    pub fn new() -> Self {
        LocalChannel
    }

    /// Execute a command using sh -c
    pub async fn exec(&self, cmd: &str) -> Result<CommandResult, ChannelError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ChannelError::Unreachable(format!("failed to spawn local shell: {}", e)))?;

        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

/// Walk `root` following links; walkdir reports loops as errors, which are skipped
fn walk_tree(root: &str) -> Result<TreeDescriptor, ChannelError> {
    let root = normalize_path(root);
    let root_path = Path::new(&root);

    if !root_path.is_dir() {
        return Err(ChannelError::Remote(format!("{}: not a directory", root)));
    }

    let mut tree = TreeDescriptor::new(root.clone());
    if let Ok(canonical) = std::fs::canonicalize(root_path) {
        tree.canonical_root = canonical.to_string_lossy().to_string();
    }

    for entry in WalkDir::new(root_path).follow_links(true).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                if let Some(ancestor) = e.loop_ancestor() {
                    debug!(path = ?e.path(), ancestor = %ancestor.display(), "skipping symlink loop");
                } else {
                    debug!(error = %e, "skipping unreadable entry");
                }
                continue;
            }
        };

        let kind = if entry.file_type().is_dir() {
            EntryKind::Directory
        } else if entry.file_type().is_file() {
            EntryKind::File
        } else {
            continue;
        };

        let Ok(relative) = entry.path().strip_prefix(root_path) else {
            continue;
        };
        let canonical = std::fs::canonicalize(entry.path())
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| entry.path().to_string_lossy().to_string());

        tree.entries.push(TreeEntry {
            path: relative.to_string_lossy().replace('\\', "/"),
            kind,
            canonical,
        });
    }

    Ok(tree)
}

#[async_trait]
impl RemoteChannel for LocalChannel {
    async fn read_file(&self, _host: &ManagedHost, path: &str) -> Result<Vec<u8>, ChannelError> {
        tokio::fs::read(path)
            .await
            .map_err(|e| ChannelError::Remote(format!("{}: {}", path, e)))
    }

    async fn list_tree(&self, _host: &ManagedHost, path: &str) -> Result<TreeDescriptor, ChannelError> {
        let root = path.to_string();
        tokio::task::spawn_blocking(move || walk_tree(&root))
            .await
            .map_err(|e| ChannelError::Unreachable(format!("directory walk failed: {}", e)))?
    }

    async fn run_module(
        &self,
        _host: &ManagedHost,
        module: &str,
        args: &ModuleArgs,
    ) -> Result<serde_json::Value, ChannelError> {
        let command = module_command(module, args)?;
        let stdout = self.exec(&command).await?.into_stdout()?;
        parse_module_output(module, &stdout)
    }
}
