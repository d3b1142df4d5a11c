use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use hopper_core::error::{HopperError, Result};
use hopper_core::tool::{
    string_arg, ArgType, Tool, ToolArguments, ToolContext, ToolParam, ToolSchema,
};

const MAX_READ_BYTES: usize = 64 * 1024;
const MAX_LISTED: usize = 200;

/// Directory the file tools are confined to.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| HopperError::Config(format!("cannot create sandbox {}: {e}", self.root.display())))
    }

    /// Maps a relative path into the sandbox. Absolute paths, `..` and paths
    /// that resolve outside the root through a symlink are refused.
    pub async fn resolve(&self, tool: &str, relative: &str) -> Result<PathBuf> {
        let relative = relative.trim();
        if relative.is_empty() {
            return Err(HopperError::tool(tool, "path is empty"));
        }
        let rel = Path::new(relative);
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => {
                    return Err(HopperError::tool(tool, format!("'{relative}' leaves the sandbox")))
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(HopperError::tool(tool, format!("'{relative}' is absolute")))
                }
            }
        }

        let joined = self.root.join(rel);
        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|e| HopperError::tool(tool, format!("sandbox unavailable: {e}")))?;

        // Check the deepest existing ancestor so symlinks cannot escape.
        let mut cursor = joined.as_path();
        loop {
            if let Ok(real) = tokio::fs::canonicalize(cursor).await {
                if !real.starts_with(&root) {
                    return Err(HopperError::tool(tool, format!("'{relative}' leaves the sandbox")));
                }
                break;
            }
            match cursor.parent() {
                Some(parent) => cursor = parent,
                None => break,
            }
        }
        Ok(joined)
    }
}

fn io_error(tool: &str, path: &str, e: std::io::Error) -> HopperError {
    HopperError::tool(tool, format!("{path}: {e}"))
}

// ---------------------------------------------------------------------------
// read_file
// ---------------------------------------------------------------------------

pub struct ReadFileTool {
    sandbox: Arc<Sandbox>,
    schema: ToolSchema,
}

impl ReadFileTool {
    pub const NAME: &'static str = "read_file";

    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self {
            sandbox,
            schema: ToolSchema::new(
                Self::NAME,
                "Read a text file from the workspace",
                vec![ToolParam::required("path", ArgType::String, "path relative to the workspace")],
            ),
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn invoke(&self, args: &ToolArguments, _ctx: &ToolContext) -> Result<String> {
        let path = string_arg(Self::NAME, args, "path")?;
        let full = self.sandbox.resolve(Self::NAME, path).await?;
        let bytes = tokio::fs::read(&full).await.map_err(|e| io_error(Self::NAME, path, e))?;

        let truncated = bytes.len() > MAX_READ_BYTES;
        let mut text = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_READ_BYTES)]).into_owned();
        if truncated {
            text.push_str(&format!("\n[truncated, {} bytes total]", bytes.len()));
        }
        debug!(path, bytes = bytes.len(), "File read");
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// write_file
// ---------------------------------------------------------------------------

pub struct WriteFileTool {
    sandbox: Arc<Sandbox>,
    schema: ToolSchema,
}

impl WriteFileTool {
    pub const NAME: &'static str = "write_file";

    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self {
            sandbox,
            schema: ToolSchema::new(
                Self::NAME,
                "Write text to a file in the workspace, creating folders as needed",
                vec![
                    ToolParam::required("path", ArgType::String, "path relative to the workspace"),
                    ToolParam::required("content", ArgType::String, "text to write"),
                    ToolParam::optional("append", ArgType::Boolean, "append instead of replacing"),
                ],
            ),
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn invoke(&self, args: &ToolArguments, _ctx: &ToolContext) -> Result<String> {
        let path = string_arg(Self::NAME, args, "path")?;
        let content = string_arg(Self::NAME, args, "content")?;
        let append = args.get("append").and_then(|v| v.as_bool()).unwrap_or(false);

        let full = self.sandbox.resolve(Self::NAME, path).await?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(Self::NAME, path, e))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&full)
            .await
            .map_err(|e| io_error(Self::NAME, path, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| io_error(Self::NAME, path, e))?;
        file.flush().await.map_err(|e| io_error(Self::NAME, path, e))?;

        debug!(path, bytes = content.len(), append, "File written");
        Ok(format!("Wrote {} bytes to {path}", content.len()))
    }
}

// ---------------------------------------------------------------------------
// list_files
// ---------------------------------------------------------------------------

pub struct ListFilesTool {
    sandbox: Arc<Sandbox>,
    schema: ToolSchema,
}

impl ListFilesTool {
    pub const NAME: &'static str = "list_files";

    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self {
            sandbox,
            schema: ToolSchema::new(
                Self::NAME,
                "List a workspace folder; folders end with '/'",
                vec![ToolParam::optional("path", ArgType::String, "folder, defaults to the workspace root")],
            ),
        }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn invoke(&self, args: &ToolArguments, _ctx: &ToolContext) -> Result<String> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let full = self.sandbox.resolve(Self::NAME, path).await?;

        let mut entries = tokio::fs::read_dir(&full)
            .await
            .map_err(|e| io_error(Self::NAME, path, e))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(Self::NAME, path, e))?
        {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();

        if names.is_empty() {
            return Ok(format!("{path} is empty"));
        }
        let total = names.len();
        names.truncate(MAX_LISTED);
        let mut listing = names.join("\n");
        if total > MAX_LISTED {
            listing.push_str(&format!("\n[{} more]", total - MAX_LISTED));
        }
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ToolContext {
        ToolContext::for_user("alice")
    }

    fn args(v: serde_json::Value) -> ToolArguments {
        v.as_object().cloned().unwrap()
    }

    fn sandbox(dir: &tempfile::TempDir) -> Arc<Sandbox> {
        Arc::new(Sandbox::new(dir.path()))
    }

    #[tokio::test]
    async fn write_then_read_inside_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let sb = sandbox(&dir);
        WriteFileTool::new(sb.clone())
            .invoke(&args(json!({"path": "notes/todo.txt", "content": "acheter du pain"})), &ctx())
            .await
            .unwrap();
        WriteFileTool::new(sb.clone())
            .invoke(&args(json!({"path": "notes/todo.txt", "content": "\nappeler Paul", "append": true})), &ctx())
            .await
            .unwrap();

        let text = ReadFileTool::new(sb.clone())
            .invoke(&args(json!({"path": "notes/todo.txt"})), &ctx())
            .await
            .unwrap();
        assert_eq!(text, "acheter du pain\nappeler Paul");

        let listing = ListFilesTool::new(sb).invoke(&ToolArguments::new(), &ctx()).await.unwrap();
        assert_eq!(listing, "notes/");
    }

    #[tokio::test]
    async fn traversal_and_absolute_paths_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let read = ReadFileTool::new(sandbox(&dir));
        for path in ["../secret", "a/../../b", "/etc/passwd", ""] {
            let err = read.invoke(&args(json!({ "path": path })), &ctx()).await.unwrap_err();
            assert!(matches!(err, HopperError::Tool { .. }), "{path}");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_escape_is_refused() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "x").unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let err = ReadFileTool::new(sandbox(&dir))
            .invoke(&args(json!({"path": "link/secret.txt"})), &ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("leaves the sandbox"));
    }

    #[tokio::test]
    async fn missing_file_is_a_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReadFileTool::new(sandbox(&dir))
            .invoke(&args(json!({"path": "nope.txt"})), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, HopperError::Tool { .. }));
    }
}
