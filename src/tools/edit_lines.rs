//! Line-number based edits with automatic indentation
//!
//! Line numbers are 1-based and ranges are inclusive. Edits to `.py` files
//! are syntax-checked inside the container before they replace the original.

use async_trait::async_trait;
use serde_json::json;

use super::path::{ensure_writable, resolve_workspace_path};
use super::{ParamSpec, ParamType, Tool, ToolArgs, ToolContext, ToolError, ToolResult, ToolSpec};

const MAX_FILE_BYTES: u64 = 5 * 1024 * 1024;

/// Exit code of [`COMMIT_SCRIPT`] when the candidate does not parse
const EXIT_SYNTAX: i64 = 65;

/// `$1` candidate file, `$2` destination. Python candidates must parse;
/// the check is skipped when the image has no python3.
const COMMIT_SCRIPT: &str = r#"tmp="$1"; dest="$2"
case "$dest" in
  *.py)
    if command -v python3 >/dev/null 2>&1; then
      python3 - "$tmp" <<'PYEOF' || { rm -f "$tmp"; exit 65; }
import ast, sys
try:
    ast.parse(open(sys.argv[1]).read())
except SyntaxError as e:
    print(e.lineno or 0)
    print((e.text or "").rstrip())
    print(e.offset or 0)
    print(e.msg)
    sys.exit(1)
PYEOF
    fi
    ;;
esac
mv "$tmp" "$dest""#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Replace,
    Insert,
    Delete,
}

impl Command {
    fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Command::Replace),
            "insert" => Ok(Command::Insert),
            "delete" => Ok(Command::Delete),
            other => Err(format!(
                "Unknown command: {}. Use 'replace', 'insert', or 'delete'.",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct EditRequest {
    start_line: Option<i64>,
    end_line: Option<i64>,
    insert_line: Option<i64>,
    new_content: Option<String>,
    auto_indent: bool,
}

/// Result of applying an edit to a file's lines
#[derive(Debug, Clone, PartialEq)]
struct EditPlan {
    lines: Vec<String>,
    removed: Vec<String>,
    added: Vec<String>,
    /// Line number of the first removed line
    removed_from: usize,
    /// Line number of the first added line
    added_from: usize,
    action: String,
}

pub struct EditLinesTool {
    spec: ToolSpec,
}

impl EditLinesTool {
    pub fn new() -> Self {
        let spec = ToolSpec::new(
            "edit_lines",
            "Line-based file editing using line numbers from file_read output. Always read the \
             file first.\n\
             - replace: replace lines start_line..end_line (INCLUSIVE) with new_content\n\
             - insert: insert new_content after insert_line (0 = file start)\n\
             - delete: delete lines start_line..end_line (INCLUSIVE)\n\
             To edit only line 7 use start_line=7, end_line=7.",
        )
        .param(ParamSpec::required(
            "command",
            ParamType::String,
            "Action: 'replace', 'insert', or 'delete'",
        ))
        .param(ParamSpec::required(
            "path",
            ParamType::String,
            "File path to edit (e.g. '/workspace/out/main.py')",
        ))
        .param(ParamSpec::optional(
            "start_line",
            ParamType::Integer,
            "Start line number (1-indexed). Required for replace/delete.",
        ))
        .param(ParamSpec::optional(
            "end_line",
            ParamType::Integer,
            "End line number (inclusive). Required for replace/delete.",
        ))
        .param(ParamSpec::optional(
            "insert_line",
            ParamType::Integer,
            "Line number after which to insert (0 = beginning). Required for insert.",
        ))
        .param(ParamSpec::optional(
            "new_content",
            ParamType::String,
            "New content to insert/replace. Required for replace/insert.",
        ))
        .param(
            ParamSpec::optional(
                "auto_indent",
                ParamType::Boolean,
                "Adjust indentation to match the surrounding code (default: true)",
            )
            .with_default(json!(true)),
        );
        Self { spec }
    }
}

impl Default for EditLinesTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for EditLinesTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let command = Command::parse(args.require_str("command")?).map_err(ToolError::Invalid)?;
        let path = resolve_workspace_path(args.require_str("path")?)?;
        ensure_writable(&path)?;

        let request = EditRequest {
            start_line: args.i64("start_line"),
            end_line: args.i64("end_line"),
            insert_line: args.i64("insert_line"),
            new_content: args.str("new_content").map(str::to_string),
            auto_indent: args.bool("auto_indent").unwrap_or(true),
        };

        let content = ctx.read_text(&path, MAX_FILE_BYTES).await?;
        let lines: Vec<String> = content.split('\n').map(str::to_string).collect();
        let plan = plan_edit(command, &lines, &request).map_err(ToolError::Invalid)?;

        let candidate = format!("{}.codebox-edit", path);
        ctx.write_file(&candidate, plan.lines.join("\n").as_bytes()).await?;
        let output = ctx.exec(COMMIT_SCRIPT, &[candidate, path.clone()]).await?;
        match output.exit_code {
            0 => Ok(ToolResult::ok(render_summary(&path, command, &plan))),
            EXIT_SYNTAX => Err(ToolError::Invalid(syntax_error_message(&output.stdout))),
            code => Err(ToolError::Failed(format!(
                "Failed to write {} (exit code {}): {}",
                path,
                code,
                output.stderr.trim()
            ))),
        }
    }
}

fn plan_edit(command: Command, lines: &[String], req: &EditRequest) -> Result<EditPlan, String> {
    let total = lines.len();
    match command {
        Command::Replace => {
            let (start, end) = line_range("Replace", req, total)?;
            let new_content = req
                .new_content
                .as_deref()
                .ok_or("Replace command requires new_content parameter.")?;
            let new_content = if req.auto_indent {
                apply_auto_indent(new_content, lines, start)
            } else {
                new_content.to_string()
            };
            let added = split_content(&new_content);
            let end = end.min(total);
            let mut result = lines[..start - 1].to_vec();
            result.extend(added.iter().cloned());
            result.extend_from_slice(&lines[end..]);
            Ok(EditPlan {
                lines: result,
                removed: lines[start - 1..end].to_vec(),
                added,
                removed_from: start,
                added_from: start,
                action: format!("Replaced lines {}-{}", start, end),
            })
        }
        Command::Insert => {
            let after = req.insert_line.ok_or(
                "Insert command requires insert_line parameter.\n\
                 Use file_read() first to see line numbers, then specify insert_line.\n\
                 Example: insert_line=10 to insert after line 10, insert_line=0 for file start.",
            )?;
            let new_content = req
                .new_content
                .as_deref()
                .ok_or("Insert command requires new_content parameter.")?;
            if after < 0 {
                return Err(format!("insert_line must be >= 0, got {}", after));
            }
            let after = after as usize;
            if after > total {
                return Err(format!(
                    "insert_line ({}) exceeds file length ({} lines). Use {} to append.",
                    after, total, total
                ));
            }
            let new_content = if req.auto_indent {
                let target = if after < total { after + 1 } else { after };
                apply_auto_indent(new_content, lines, target)
            } else {
                new_content.to_string()
            };
            let added = split_content(&new_content);
            let mut result = lines[..after].to_vec();
            result.extend(added.iter().cloned());
            result.extend_from_slice(&lines[after..]);
            Ok(EditPlan {
                lines: result,
                removed: Vec::new(),
                added,
                removed_from: after + 1,
                added_from: after + 1,
                action: format!("Inserted after line {}", after),
            })
        }
        Command::Delete => {
            let (start, end) = line_range("Delete", req, total)?;
            let end = end.min(total);
            let mut result = lines[..start - 1].to_vec();
            result.extend_from_slice(&lines[end..]);
            Ok(EditPlan {
                lines: result,
                removed: lines[start - 1..end].to_vec(),
                added: Vec::new(),
                removed_from: start,
                added_from: start,
                action: format!("Deleted lines {}-{}", start, end),
            })
        }
    }
}

/// Validated inclusive `(start, end)`; `end` may run past the file
fn line_range(verb: &str, req: &EditRequest, total: usize) -> Result<(usize, usize), String> {
    let (Some(start), Some(end)) = (req.start_line, req.end_line) else {
        return Err(format!(
            "{} command requires both start_line and end_line parameters.",
            verb
        ));
    };
    if verb == "Replace" && req.new_content.is_none() {
        return Err("Replace command requires new_content parameter.".to_string());
    }
    if start < 1 {
        return Err(format!("start_line must be >= 1, got {}", start));
    }
    if end < start {
        return Err(format!("end_line ({}) must be >= start_line ({})", end, start));
    }
    if start as usize > total {
        return Err(format!(
            "start_line ({}) exceeds file length ({} lines)",
            start, total
        ));
    }
    Ok((start as usize, end as usize))
}

fn split_content(content: &str) -> Vec<String> {
    if content.is_empty() {
        Vec::new()
    } else {
        content.split('\n').map(str::to_string).collect()
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Re-base `content` onto the indentation of the code around `target_line`
fn apply_auto_indent(content: &str, lines: &[String], target_line: usize) -> String {
    if content.trim().is_empty() {
        return content.to_string();
    }
    let target = context_indent(lines, target_line) as i64;
    let new_lines: Vec<&str> = content.split('\n').collect();
    let base = new_lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| indent_of(l))
        .min()
        .unwrap_or(0) as i64;

    new_lines
        .iter()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                let indent = (target + indent_of(line) as i64 - base).max(0) as usize;
                format!("{}{}", " ".repeat(indent), line.trim_start())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Indentation expected at `target_line` (1-based), judged from nearby lines
fn context_indent(lines: &[String], target_line: usize) -> usize {
    let target = target_line as i64 - 1;
    for offset in [-1i64, 0, 1, -2, 2] {
        let idx = target + offset;
        if idx < 0 || idx as usize >= lines.len() {
            continue;
        }
        let line = &lines[idx as usize];
        if line.trim().is_empty() {
            continue;
        }
        let indent = indent_of(line);
        if offset < 0 && line.trim_end().ends_with(':') {
            return indent + 4;
        }
        return indent;
    }
    0
}

fn render_summary(path: &str, command: Command, plan: &EditPlan) -> String {
    let mut out = vec![
        format!("Successfully edited {}", path),
        plan.action.clone(),
        format!("File now has {} lines.", plan.lines.len()),
        String::new(),
    ];

    if !plan.removed.is_empty() {
        out.push("--- Removed:".to_string());
        for (i, line) in plan.removed.iter().enumerate() {
            out.push(format!("  {:>4}: {}", plan.removed_from + i, line));
        }
    }
    if !plan.added.is_empty() {
        out.push("+++ Added:".to_string());
        for (i, line) in plan.added.iter().enumerate() {
            out.push(format!("  {:>4}: {}", plan.added_from + i, line));
        }
    }

    if command == Command::Replace && !plan.removed.is_empty() && !plan.added.is_empty() {
        let (removed, added) = (plan.removed.len(), plan.added.len());
        if removed != added {
            out.push(String::new());
            out.push(format!("NOTE: Removed {} line(s), added {} line(s).", removed, added));
            if removed > added {
                out.push("      If unintended, you may have specified too large a line range.".to_string());
            }
        }
    }
    out.join("\n")
}

/// Format the four lines printed by the syntax check
fn syntax_error_message(report: &str) -> String {
    let mut parts = report.lines();
    let lineno = parts.next().unwrap_or("?").trim().to_string();
    let text = parts.next().unwrap_or("").to_string();
    let offset: usize = parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(0);
    let msg = parts.next().unwrap_or("invalid syntax").to_string();
    let pointer = if offset > 0 {
        format!("{}^", " ".repeat(offset - 1))
    } else {
        String::new()
    };
    format!(
        "Edit would create syntax error at line {}:\n  {}\n  {}\nError: {}\n\nEdit NOT applied. Please fix the syntax and try again.",
        lineno, text, pointer, msg
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.split('\n').map(str::to_string).collect()
    }

    fn request(start: Option<i64>, end: Option<i64>, content: Option<&str>) -> EditRequest {
        EditRequest {
            start_line: start,
            end_line: end,
            insert_line: None,
            new_content: content.map(str::to_string),
            auto_indent: true,
        }
    }

    #[test]
    fn test_replace_single_line_reindents() {
        let file = lines("def f():\n    x = 1\n    return x");
        let plan = plan_edit(Command::Replace, &file, &request(Some(2), Some(2), Some("x = 2"))).unwrap();
        assert_eq!(plan.lines, lines("def f():\n    x = 2\n    return x"));
        assert_eq!(plan.removed, vec!["    x = 1"]);
        assert_eq!(plan.action, "Replaced lines 2-2");
    }

    #[test]
    fn test_insert_at_start_and_end() {
        let file = lines("a\nb");
        let mut req = request(None, None, Some("z"));
        req.insert_line = Some(0);
        let plan = plan_edit(Command::Insert, &file, &req).unwrap();
        assert_eq!(plan.lines, lines("z\na\nb"));

        req.insert_line = Some(2);
        let plan = plan_edit(Command::Insert, &file, &req).unwrap();
        assert_eq!(plan.lines, lines("a\nb\nz"));
        assert_eq!(plan.added_from, 3);

        req.insert_line = Some(3);
        let err = plan_edit(Command::Insert, &file, &req).unwrap_err();
        assert!(err.contains("Use 2 to append"));
    }

    #[test]
    fn test_delete_range() {
        let file = lines("1\n2\n3\n4");
        let plan = plan_edit(Command::Delete, &file, &request(Some(2), Some(3), None)).unwrap();
        assert_eq!(plan.lines, lines("1\n4"));
        assert_eq!(plan.removed, vec!["2", "3"]);
    }

    #[test]
    fn test_parameter_validation_messages() {
        let file = lines("a\nb");
        let err = plan_edit(Command::Replace, &file, &request(Some(1), None, Some("x"))).unwrap_err();
        assert_eq!(err, "Replace command requires both start_line and end_line parameters.");
        let err = plan_edit(Command::Replace, &file, &request(Some(1), Some(1), None)).unwrap_err();
        assert_eq!(err, "Replace command requires new_content parameter.");
        let err = plan_edit(Command::Delete, &file, &request(Some(2), Some(1), None)).unwrap_err();
        assert_eq!(err, "end_line (1) must be >= start_line (2)");
        let err = plan_edit(Command::Delete, &file, &request(Some(5), Some(6), None)).unwrap_err();
        assert_eq!(err, "start_line (5) exceeds file length (2 lines)");
        assert!(Command::parse("append").is_err());
    }

    #[test]
    fn test_context_indent_after_colon() {
        let file = lines("if x:\n    pass");
        assert_eq!(context_indent(&file, 2), 4);
        assert_eq!(apply_auto_indent("  a\n    b", &file, 2), "    a\n      b");
    }

    #[test]
    fn test_summary_notes_line_count_change() {
        let file = lines("a\nb\nc");
        let mut req = request(Some(1), Some(3), Some("z"));
        req.auto_indent = false;
        let plan = plan_edit(Command::Replace, &file, &req).unwrap();
        let summary = render_summary("/workspace/out/x.txt", Command::Replace, &plan);
        assert!(summary.contains("File now has 1 lines."));
        assert!(summary.contains("     1: a"));
        assert!(summary.contains("NOTE: Removed 3 line(s), added 1 line(s)."));
    }

    #[test]
    fn test_syntax_error_message() {
        let msg = syntax_error_message("3\ndef f(:\n7\ninvalid syntax\n");
        assert!(msg.starts_with("Edit would create syntax error at line 3:"));
        assert!(msg.contains("      ^"));
        assert!(msg.ends_with("Edit NOT applied. Please fix the syntax and try again."));
    }
}
