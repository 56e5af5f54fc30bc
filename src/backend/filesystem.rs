//! Built-in filesystem tools, one sandboxed workspace per bot
//!
//! Each bot sees only `root/<bot_id>`. Paths are relative to that directory;
//! absolute paths and `..` components are refused. Failures are reported in
//! the payload (`{"error": "..."}`) rather than as transport errors.

use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::protocol::ToolDescriptor;
use crate::{Error, Result};

/// Largest file `read_file` returns in full
const MAX_READ_BYTES: usize = 1024 * 1024;

/// Filesystem tool provider
#[derive(Debug, Clone)]
pub struct FilesystemTools {
    root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct PathArgs {
    #[serde(default)]
    path: String,
}

#[derive(Debug, Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
    #[serde(default)]
    append: bool,
}

impl FilesystemTools {
    /// Provider rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root under which bot workspaces live
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Workspace directory of a bot
    pub fn workspace(&self, bot_id: &str) -> Result<PathBuf> {
        let valid = !bot_id.is_empty()
            && bot_id != "."
            && bot_id != ".."
            && !bot_id.contains(['/', '\\', '\0']);
        if !valid {
            return Err(Error::Config(format!("Invalid bot id for workspace: {bot_id:?}")));
        }
        Ok(self.root.join(bot_id))
    }

    /// Tools offered to every bot
    pub fn list_tools(&self, bot_id: &str) -> Result<Vec<ToolDescriptor>> {
        self.workspace(bot_id)?;
        Ok(tool_descriptors())
    }

    /// Run a filesystem tool for a bot
    pub async fn call(&self, bot_id: &str, name: &str, args: Value) -> Result<Value> {
        let workspace = self.workspace(bot_id)?;
        debug!(bot_id = %bot_id, tool = %name, "Filesystem tool call");

        let outcome = match name {
            "read_file" => read_file(&workspace, parse(args)?).await,
            "write_file" => write_file(&workspace, parse(args)?).await,
            "list_dir" => list_dir(&workspace, parse(args)?).await,
            "delete_file" => delete_file(&workspace, parse(args)?).await,
            other => Err(format!("unknown filesystem tool: {other}")),
        };

        Ok(outcome.unwrap_or_else(|message| json!({ "error": message })))
    }
}

fn parse<T: for<'de> Deserialize<'de>>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| Error::Protocol(format!("invalid arguments: {e}")))
}

/// Relative path with no root, prefix or parent components
pub(crate) fn sanitize_relative_path(raw: &str) -> Option<PathBuf> {
    let normalized = raw.trim().replace('\\', "/");
    let stripped = normalized.strip_prefix("./").unwrap_or(&normalized);
    if stripped.is_empty() {
        return None;
    }
    let path = PathBuf::from(stripped);
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::ParentDir => return None,
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Some(path)
}

fn resolve(workspace: &Path, raw: &str) -> std::result::Result<PathBuf, String> {
    sanitize_relative_path(raw)
        .map(|relative| workspace.join(relative))
        .ok_or_else(|| format!("path must be relative to the workspace: {raw:?}"))
}

async fn read_file(workspace: &Path, args: PathArgs) -> std::result::Result<Value, String> {
    let path = resolve(workspace, &args.path)?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| format!("cannot read {}: {e}", args.path))?;
    let truncated = bytes.len() > MAX_READ_BYTES;
    let content = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_READ_BYTES)]).into_owned();
    Ok(json!({ "path": args.path, "content": content, "truncated": truncated }))
}

async fn write_file(workspace: &Path, args: WriteArgs) -> std::result::Result<Value, String> {
    let path = resolve(workspace, &args.path)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("cannot create directory for {}: {e}", args.path))?;
    }

    let written = if args.append {
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| format!("cannot open {}: {e}", args.path))?;
        file.write_all(args.content.as_bytes()).await
    } else {
        tokio::fs::write(&path, args.content.as_bytes()).await
    };
    written.map_err(|e| format!("cannot write {}: {e}", args.path))?;

    Ok(json!({ "result": { "path": args.path, "bytes": args.content.len() } }))
}

async fn list_dir(workspace: &Path, args: PathArgs) -> std::result::Result<Value, String> {
    let dir = if args.path.trim().is_empty() || args.path.trim() == "." {
        workspace.to_path_buf()
    } else {
        resolve(workspace, &args.path)?
    };

    if dir == workspace {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| format!("cannot create workspace: {e}"))?;
    }

    let mut reader = tokio::fs::read_dir(&dir)
        .await
        .map_err(|e| format!("cannot list {}: {e}", args.path))?;
    let mut entries = Vec::new();
    while let Some(entry) = reader
        .next_entry()
        .await
        .map_err(|e| format!("cannot list {}: {e}", args.path))?
    {
        let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
        entries.push(json!({
            "name": entry.file_name().to_string_lossy(),
            "type": if is_dir { "dir" } else { "file" },
        }));
    }
    entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

    Ok(json!({ "path": args.path, "entries": entries }))
}

async fn delete_file(workspace: &Path, args: PathArgs) -> std::result::Result<Value, String> {
    let path = resolve(workspace, &args.path)?;
    tokio::fs::remove_file(&path)
        .await
        .map_err(|e| format!("cannot delete {}: {e}", args.path))?;
    Ok(json!({ "result": { "deleted": args.path } }))
}

fn tool_descriptors() -> Vec<ToolDescriptor> {
    let path_only = |description: &str| {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string", "description": description } },
            "required": ["path"]
        })
    };

    vec![
        ToolDescriptor::new(
            "read_file",
            "Read a UTF-8 text file from the bot workspace",
            path_only("File path relative to the workspace"),
        ),
        ToolDescriptor::new(
            "write_file",
            "Create or overwrite a file in the bot workspace",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path relative to the workspace" },
                    "content": { "type": "string" },
                    "append": { "type": "boolean", "default": false }
                },
                "required": ["path", "content"]
            }),
        ),
        ToolDescriptor::new(
            "list_dir",
            "List the entries of a workspace directory",
            json!({
                "type": "object",
                "properties": { "path": { "type": "string", "description": "Directory relative to the workspace; empty for the root" } }
            }),
        ),
        ToolDescriptor::new(
            "delete_file",
            "Delete a file from the bot workspace",
            path_only("File path relative to the workspace"),
        ),
    ]
}
