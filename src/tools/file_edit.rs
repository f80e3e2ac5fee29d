//! Exact search-and-replace edits

use async_trait::async_trait;

use super::path::{ensure_writable, resolve_workspace_path};
use super::{ParamSpec, ParamType, Tool, ToolArgs, ToolContext, ToolError, ToolResult, ToolSpec};

const MAX_FILE_BYTES: u64 = 5 * 1024 * 1024;

pub struct FileEditTool {
    spec: ToolSpec,
}

impl FileEditTool {
    pub fn new() -> Self {
        let spec = ToolSpec::new(
            "file_edit",
            "Replace one exact occurrence of 'old_content' with 'new_content' in an existing file. \
             The match must be exact, including whitespace, and must occur exactly once.",
        )
        .param(ParamSpec::required("path", ParamType::String, "Path to the file to edit"))
        .param(ParamSpec::required(
            "old_content",
            ParamType::String,
            "Content to search for (must match exactly)",
        ))
        .param(ParamSpec::required("new_content", ParamType::String, "Replacement content"));
        Self { spec }
    }
}

impl Default for FileEditTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileEditTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let path = resolve_workspace_path(args.require_str("path")?)?;
        ensure_writable(&path)?;
        let old_content = args.require_str("old_content")?;
        let new_content = args.require_str("new_content")?;

        let current = ctx.read_text(&path, MAX_FILE_BYTES).await?;
        let updated = replace_once(&current, old_content, new_content).map_err(|e| match e {
            ReplaceError::NotFound => ToolError::Invalid(format!("Content to replace not found in file: {}", path)),
            ReplaceError::Ambiguous(count) => ToolError::Invalid(format!(
                "Content appears {} times in file. Please make old_content more specific.",
                count
            )),
        })?;

        ctx.write_file(&path, updated.as_bytes()).await?;
        Ok(ToolResult::ok(format!("Successfully edited {}", path)))
    }
}

#[derive(Debug, PartialEq)]
enum ReplaceError {
    NotFound,
    Ambiguous(usize),
}

fn replace_once(text: &str, old: &str, new: &str) -> Result<String, ReplaceError> {
    if old.is_empty() {
        return Err(ReplaceError::NotFound);
    }
    match text.matches(old).count() {
        0 => Err(ReplaceError::NotFound),
        1 => Ok(text.replacen(old, new, 1)),
        n => Err(ReplaceError::Ambiguous(n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_once() {
        assert_eq!(replace_once("a = 1\nb = 2\n", "b = 2", "b = 3").unwrap(), "a = 1\nb = 3\n");
        assert_eq!(replace_once("x x", "x", "y"), Err(ReplaceError::Ambiguous(2)));
        assert_eq!(replace_once("abc", "z", "y"), Err(ReplaceError::NotFound));
        assert_eq!(replace_once("abc", "", "y"), Err(ReplaceError::NotFound));
    }
}
