//! Write a file into the output directory

use async_trait::async_trait;

use super::{ParamSpec, ParamType, Tool, ToolArgs, ToolContext, ToolError, ToolResult, ToolSpec};
use crate::sandbox::OUTPUT_DIR;

pub struct FileWriteTool {
    spec: ToolSpec,
}

impl FileWriteTool {
    pub fn new() -> Self {
        let spec = ToolSpec::new(
            "file_write",
            "Create or overwrite a file in /workspace/out. Only a simple filename is accepted, \
             not a path. This replaces the whole file; use file_edit or edit_lines for targeted changes.",
        )
        .param(ParamSpec::required(
            "filename",
            ParamType::String,
            "Filename to write (e.g. 'script.py'); no path separators",
        ))
        .param(ParamSpec::required("content", ParamType::String, "Content to write"))
        .idempotent();
        Self { spec }
    }
}

impl Default for FileWriteTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let filename = args.require_str("filename")?;
        let content = args.require_str("content")?;
        check_filename(filename)?;

        let path = format!("{}/{}", OUTPUT_DIR, filename);
        ctx.write_file(&path, content.as_bytes()).await?;

        Ok(ToolResult::ok(format!(
            "Successfully wrote {} bytes to {} in {}",
            content.len(),
            filename,
            OUTPUT_DIR
        )))
    }
}

fn check_filename(filename: &str) -> Result<(), ToolError> {
    if filename.is_empty() || filename.contains('/') || filename.contains('\\') || filename.starts_with('.') {
        return Err(ToolError::Invalid(format!(
            "Invalid filename: {}. Only simple filenames are allowed (no path separators or leading dots).",
            filename
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_rules() {
        assert!(check_filename("script.py").is_ok());
        assert!(check_filename("sub/script.py").is_err());
        assert!(check_filename("..\\x").is_err());
        assert!(check_filename(".bashrc").is_err());
        assert!(check_filename("").is_err());
    }
}
