//! Read a file from the sandbox

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::path::resolve_workspace_path;
use super::{
    truncate_output, Attachment, ParamSpec, ParamType, Tool, ToolArgs, ToolContext, ToolError, ToolResult, ToolSpec,
};

/// Files larger than this are refused
const MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

const MAX_TEXT_CHARS: usize = 50_000;

pub struct FileReadTool {
    spec: ToolSpec,
}

impl FileReadTool {
    pub fn new() -> Self {
        let spec = ToolSpec::new(
            "file_read",
            "Read a file from the sandbox. Text files are returned with line numbers; images and other \
             binary files are attached for the user. Use paths like /workspace/out/script.py \
             or /workspace/project_files/data.csv.",
        )
        .param(ParamSpec::required(
            "path",
            ParamType::String,
            "Full path to the file (e.g. '/workspace/project_files/data.csv')",
        ))
        .idempotent();
        Self { spec }
    }
}

impl Default for FileReadTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let path = resolve_workspace_path(args.require_str("path")?)?;
        let bytes = ctx.read_file(&path, MAX_FILE_BYTES).await?;

        let mime = mime_for(&path);
        match String::from_utf8(bytes) {
            Ok(text) if !mime.starts_with("image/") => Ok(ToolResult::ok(truncate_output(
                &number_lines(&text),
                MAX_TEXT_CHARS,
            ))),
            Ok(text) => Ok(binary_result(&path, mime, text.into_bytes())),
            Err(e) => Ok(binary_result(&path, mime, e.into_bytes())),
        }
    }
}

/// `cat -n` style numbering, matching the line numbers `edit_lines` expects
fn number_lines(text: &str) -> String {
    if text.is_empty() {
        return "(empty file)".to_string();
    }
    text.strip_suffix('\n')
        .unwrap_or(text)
        .split('\n')
        .enumerate()
        .map(|(i, line)| format!("{:>6}\t{}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn binary_result(path: &str, mime: &str, bytes: Vec<u8>) -> ToolResult {
    let size_kb = bytes.len() / 1024;
    let marker = if mime.starts_with("image/") { "[IMAGE]" } else { "[BINARY]" };
    let output = format!(
        "{} Read {} ({}KB, {})\nThe file will be displayed to the user in the chat.",
        marker, path, size_kb, mime
    );
    ToolResult::ok(output).with_attachment(Attachment {
        mime_type: mime.to_string(),
        data_uri: format!("data:{};base64,{}", mime, STANDARD.encode(&bytes)),
    })
}

fn mime_for(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        _ => "application/octet-stream",
    }
}
