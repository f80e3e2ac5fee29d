//! Unified search: code structure, text content or file names
//!
//! The mode is inferred from the query: pattern shortcuts (`functions`,
//! `classes`, ...) and `$METAVAR` patterns go to ast-grep, globs go to
//! `find`, anything else to `grep`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::path::resolve_workspace_path;
use super::{ParamSpec, ParamType, Tool, ToolArgs, ToolContext, ToolError, ToolResult, ToolSpec};
use crate::sandbox::{AGENT_WORKSPACE_DIR, WORKSPACE_ROOT};

const DEFAULT_MAX_RESULTS: i64 = 50;

/// Context lines shown per file in text mode
const CONTEXT_LINES: usize = 3;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Exit code of [`CODE_SCRIPT`] when ast-grep is not installed
const EXIT_NO_AST_GREP: i64 = 127;

/// `$1` pattern, `$2` path, `$3` language (may be empty)
const CODE_SCRIPT: &str = r#"command -v ast-grep >/dev/null 2>&1 || exit 127
if [ -n "$3" ]; then
  ast-grep run -p "$1" -l "$3" --json "$2"
else
  ast-grep run -p "$1" --json "$2"
fi"#;

/// `$1` query, `$2` path, `$3` max files, `$4` context lines
const TEXT_SCRIPT: &str = r#"grep -rl -e "$1" "$2" 2>/dev/null | head -n "$3" | while IFS= read -r f; do
  printf '\001%s\n' "$f"
  grep -n -e "$1" "$f" 2>/dev/null | head -n "$4"
done"#;

/// `$1` name pattern, `$2` path, `$3` max results
const FILENAME_SCRIPT: &str = r#"find "$2" -type f -name "$1" 2>/dev/null | head -n "$3""#;

const PATH_CHECK_SCRIPT: &str = r#"[ -e "$1" ]"#;

const LANGUAGES: &str = "python, javascript, typescript, go, rust, java, c, cpp";

/// Shortcut name → (language, ast-grep pattern)
const PATTERN_SHORTCUTS: &[(&str, &[(&str, &str)])] = &[
    (
        "functions",
        &[
            ("python", "def $NAME($$$)"),
            ("javascript", "function $NAME($$$)"),
            ("typescript", "function $NAME($$$)"),
            ("go", "func $NAME($$$)"),
            ("rust", "fn $NAME($$$)"),
            ("java", "$RET $NAME($$$) {$$$}"),
            ("c", "$RET $NAME($$$)"),
            ("cpp", "$RET $NAME($$$)"),
        ],
    ),
    (
        "async_functions",
        &[
            ("python", "async def $NAME($$$)"),
            ("javascript", "async function $NAME($$$)"),
            ("typescript", "async function $NAME($$$)"),
            ("rust", "async fn $NAME($$$)"),
        ],
    ),
    (
        "classes",
        &[
            ("python", "class $NAME"),
            ("javascript", "class $NAME"),
            ("typescript", "class $NAME"),
            ("go", "type $NAME struct"),
            ("rust", "struct $NAME"),
            ("java", "class $NAME"),
            ("c", "struct $NAME"),
            ("cpp", "class $NAME"),
        ],
    ),
    (
        "imports",
        &[
            ("python", "import $$$"),
            ("javascript", "import $$$"),
            ("typescript", "import $$$"),
            ("go", "import $$$"),
            ("rust", "use $$$"),
            ("java", "import $$$"),
            ("c", "#include $$$"),
            ("cpp", "#include $$$"),
        ],
    ),
    (
        "exports",
        &[
            ("javascript", "export $$$"),
            ("typescript", "export $$$"),
            ("rust", "pub $$$"),
            ("java", "public $$$"),
        ],
    ),
    (
        "tests",
        &[
            ("python", "def test_$NAME($$$)"),
            ("javascript", "test($$$)"),
            ("typescript", "test($$$)"),
            ("go", "func Test$NAME($$$)"),
            ("rust", "#[test]"),
            ("java", "@Test"),
        ],
    ),
    (
        "methods",
        &[
            ("python", "def $NAME(self, $$$)"),
            ("javascript", "$NAME($$$) {"),
            ("typescript", "$NAME($$$) {"),
            ("go", "func ($R $TYPE) $NAME($$$)"),
            ("rust", "fn $NAME(&self, $$$)"),
            ("java", "$MOD $RET $NAME($$$)"),
            ("cpp", "$RET $CLASS::$NAME($$$)"),
        ],
    ),
];

const LANGUAGE_ALIASES: &[(&str, &str)] = &[
    ("py", "python"),
    ("js", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("jsx", "javascript"),
    ("rs", "rust"),
    ("c++", "cpp"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Code,
    Filename,
    Text,
}

#[derive(Debug, Deserialize)]
struct AstMatch {
    #[serde(default)]
    file: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    range: AstRange,
}

#[derive(Debug, Default, Deserialize)]
struct AstRange {
    #[serde(default)]
    start: AstPosition,
}

#[derive(Debug, Default, Deserialize)]
struct AstPosition {
    /// 0-based
    #[serde(default)]
    line: u64,
}

pub struct SearchTool {
    spec: ToolSpec,
}

impl SearchTool {
    pub fn new() -> Self {
        let spec = ToolSpec::new(
            "search",
            "Search for code, text or files in the workspace.\n\
             - Find functions: query='functions', language='python'\n\
             - Find classes: query='classes', language='python'\n\
             - Find text: query='error message' (searches file contents)\n\
             - Find files: query='*.py'\n\
             The 'language' parameter is required for code structure searches.",
        )
        .param(ParamSpec::required(
            "query",
            ParamType::String,
            "What to search for: 'functions', 'classes', 'imports' for code; any text for grep; '*.py' for files",
        ))
        .param(ParamSpec::optional(
            "language",
            ParamType::String,
            "Required for code search. Options: python, javascript, typescript, go, rust, java, c, cpp",
        ))
        .param(
            ParamSpec::optional(
                "path",
                ParamType::String,
                "Directory to search (default: /workspace/agent_workspace)",
            )
            .with_default(json!(AGENT_WORKSPACE_DIR)),
        )
        .param(
            ParamSpec::optional("max_results", ParamType::Integer, "Max results (default: 50)")
                .with_default(json!(DEFAULT_MAX_RESULTS)),
        )
        .idempotent();
        Self { spec }
    }
}

impl Default for SearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let query = args.require_str("query")?;
        let language = args.str("language").filter(|l| !l.trim().is_empty()).map(normalize_language);
        let raw_path = args.str("path").unwrap_or(AGENT_WORKSPACE_DIR);
        let path = if raw_path.starts_with('/') {
            resolve_workspace_path(raw_path)?
        } else {
            resolve_workspace_path(&format!("{}/{}", WORKSPACE_ROOT, raw_path))?
        };
        let max_results = args.i64("max_results").unwrap_or(DEFAULT_MAX_RESULTS).clamp(1, 500) as usize;
        let ctx = ctx.with_timeout(SEARCH_TIMEOUT);

        let exists = ctx.exec(PATH_CHECK_SCRIPT, &[path.clone()]).await?;
        if exists.exit_code != 0 {
            return Err(ToolError::Invalid(format!("Path not found: {}", path)));
        }

        match detect_mode(query) {
            Mode::Code => search_code(&ctx, query, language.as_deref(), &path, max_results).await,
            Mode::Filename => search_filename(&ctx, query, &path, max_results).await,
            Mode::Text => search_text(&ctx, query, &path, max_results).await,
        }
    }
}

async fn search_code(
    ctx: &ToolContext,
    query: &str,
    language: Option<&str>,
    path: &str,
    max_results: usize,
) -> Result<ToolResult, ToolError> {
    let shortcut = is_shortcut(query);
    if shortcut && language.is_none() {
        return Err(ToolError::Invalid(format!(
            "The 'language' parameter is required when searching for '{}'. Please specify language='python' (or {}).",
            query, LANGUAGES
        )));
    }

    let pattern = resolve_pattern(query, language);
    let args = vec![pattern.clone(), path.to_string(), language.unwrap_or("").to_string()];
    let output = ctx.exec(CODE_SCRIPT, &args).await?;

    if output.exit_code == EXIT_NO_AST_GREP {
        return search_text(ctx, query, path, max_results).await;
    }
    if output.exit_code != 0 && output.stdout.trim().is_empty() {
        if output.exit_code == 1 || output.stderr.to_lowercase().contains("no matches") {
            return Ok(ToolResult::ok(format!("No code matches found for: {}", query)));
        }
        return search_text(ctx, query, path, max_results).await;
    }

    let matches = parse_ast_results(&output.stdout, max_results);
    if matches.is_empty() {
        return Ok(ToolResult::ok(format!("No code matches found for: {}", query)));
    }
    Ok(ToolResult::ok(format_code_results(&matches, query, &pattern, shortcut)))
}

async fn search_text(ctx: &ToolContext, query: &str, path: &str, max_results: usize) -> Result<ToolResult, ToolError> {
    let args = vec![
        query.to_string(),
        path.to_string(),
        max_results.to_string(),
        CONTEXT_LINES.to_string(),
    ];
    let output = ctx.exec(TEXT_SCRIPT, &args).await?;
    let files = parse_text_results(&output.stdout);
    if files.is_empty() {
        return Ok(ToolResult::ok(format!("No files found containing: {}", query)));
    }

    let mut out = format!("Found '{}' in {} file(s):\n\n", query, files.len());
    for (file, lines) in &files {
        out.push_str(&format!("{}\n", file));
        for line in lines {
            out.push_str(&format!("   {}\n", line.chars().take(100).collect::<String>()));
        }
        out.push('\n');
    }
    Ok(ToolResult::ok(out.trim_end().to_string()))
}

async fn search_filename(
    ctx: &ToolContext,
    query: &str,
    path: &str,
    max_results: usize,
) -> Result<ToolResult, ToolError> {
    let name = match query.rsplit_once("**") {
        Some((_, rest)) => rest.trim_start_matches('/'),
        None => query,
    };
    let args = vec![name.to_string(), path.to_string(), max_results.to_string()];
    let output = ctx.exec(FILENAME_SCRIPT, &args).await?;

    let files: Vec<&str> = output.stdout.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if files.is_empty() {
        return Ok(ToolResult::ok(format!("No files found matching: {}", query)));
    }
    let mut out = format!("Found {} file(s) matching '{}':\n", files.len(), query);
    for file in &files {
        out.push_str(&format!("  - {}\n", file));
    }
    Ok(ToolResult::ok(out.trim_end().to_string()))
}

fn is_shortcut(query: &str) -> bool {
    let q = query.trim().to_lowercase();
    PATTERN_SHORTCUTS.iter().any(|(name, _)| *name == q)
}

fn detect_mode(query: &str) -> Mode {
    if is_shortcut(query) || query.contains('$') {
        return Mode::Code;
    }
    if query.starts_with('*') || looks_like_filename(query) {
        return Mode::Filename;
    }
    Mode::Text
}

/// `config.json`, `.gitignore.bak`, `test_*.py`: word characters, then an extension
fn looks_like_filename(query: &str) -> bool {
    let Some((stem, ext)) = query.rsplit_once('.') else {
        return false;
    };
    !stem.is_empty()
        && !ext.is_empty()
        && ext.chars().all(|c| c.is_alphanumeric() || c == '_')
        && stem
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '*' | '?'))
}

fn normalize_language(language: &str) -> String {
    let lang = language.trim().to_lowercase();
    LANGUAGE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lang)
        .map(|(_, name)| name.to_string())
        .unwrap_or(lang)
}

fn resolve_pattern(query: &str, language: Option<&str>) -> String {
    let q = query.trim().to_lowercase();
    let Some((_, patterns)) = PATTERN_SHORTCUTS.iter().find(|(name, _)| *name == q) else {
        return query.to_string();
    };
    let by_language = language.and_then(|lang| patterns.iter().find(|(l, _)| *l == lang));
    by_language
        .or_else(|| patterns.iter().find(|(l, _)| *l == "python"))
        .or_else(|| patterns.first())
        .map(|(_, p)| p.to_string())
        .unwrap_or_else(|| query.to_string())
}

/// ast-grep prints a JSON array; older versions print one object per line
fn parse_ast_results(stdout: &str, max_results: usize) -> Vec<AstMatch> {
    let text = stdout.trim();
    if text.is_empty() {
        return Vec::new();
    }
    let mut matches: Vec<AstMatch> = match serde_json::from_str::<Vec<AstMatch>>(text) {
        Ok(all) => all,
        Err(_) => match serde_json::from_str::<AstMatch>(text) {
            Ok(one) => vec![one],
            Err(_) => text
                .lines()
                .filter_map(|line| serde_json::from_str::<AstMatch>(line).ok())
                .collect(),
        },
    };
    matches.truncate(max_results);
    matches
}

fn format_code_results(matches: &[AstMatch], query: &str, pattern: &str, shortcut: bool) -> String {
    let mut out = if shortcut {
        format!("Found {} match(es) for '{}' (pattern: {}):\n\n", matches.len(), query, pattern)
    } else {
        format!("Found {} match(es) for pattern '{}':\n\n", matches.len(), pattern)
    };

    let mut by_file: BTreeMap<&str, Vec<&AstMatch>> = BTreeMap::new();
    for m in matches {
        by_file.entry(m.file.as_str()).or_default().push(m);
    }
    for (file, file_matches) in by_file {
        out.push_str(&format!("{}\n", file));
        for m in file_matches {
            let first_line: String = m.text.trim().lines().next().unwrap_or("").chars().take(80).collect();
            out.push_str(&format!("   Line {}: {}\n", m.range.start.line + 1, first_line));
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// Split [`TEXT_SCRIPT`] output into (file, matching lines)
fn parse_text_results(stdout: &str) -> Vec<(String, Vec<String>)> {
    let mut files: Vec<(String, Vec<String>)> = Vec::new();
    for line in stdout.lines() {
        if let Some(file) = line.strip_prefix('\u{1}') {
            files.push((file.to_string(), Vec::new()));
        } else if let Some((_, lines)) = files.last_mut() {
            if !line.trim().is_empty() {
                lines.push(line.to_string());
            }
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_mode() {
        assert_eq!(detect_mode("functions"), Mode::Code);
        assert_eq!(detect_mode("def $NAME($$$)"), Mode::Code);
        assert_eq!(detect_mode("*.py"), Mode::Filename);
        assert_eq!(detect_mode("config.json"), Mode::Filename);
        assert_eq!(detect_mode("connection refused"), Mode::Text);
        assert_eq!(detect_mode("self.value"), Mode::Filename);
        assert_eq!(detect_mode("foo(bar)"), Mode::Text);
    }

    #[test]
    fn test_resolve_pattern_per_language() {
        assert_eq!(resolve_pattern("functions", Some("rust")), "fn $NAME($$$)");
        assert_eq!(resolve_pattern("Classes", Some("go")), "type $NAME struct");
        assert_eq!(resolve_pattern("exports", Some("python")), "export $$$");
        assert_eq!(resolve_pattern("def $F()", Some("python")), "def $F()");
        assert_eq!(normalize_language("TS"), "typescript");
        assert_eq!(normalize_language("c++"), "cpp");
    }

    #[test]
    fn test_parse_ast_results_array_and_lines() {
        let array = r#"[{"file":"a.py","text":"def f():\n    pass","range":{"start":{"line":4}}}]"#;
        let parsed = parse_ast_results(array, 10);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].range.start.line, 4);

        let ndjson = "{\"file\":\"a.py\",\"text\":\"x\"}\n{\"file\":\"b.py\",\"text\":\"y\"}";
        assert_eq!(parse_ast_results(ndjson, 1).len(), 1);

        let formatted = format_code_results(&parsed, "functions", "def $NAME($$$)", true);
        assert!(formatted.contains("Line 5: def f():"));
    }

    #[test]
    fn test_parse_text_results() {
        let out = "\u{1}/w/a.py\n3:import os\n9:os.path\n\u{1}/w/b.py\n1:import os\n";
        let files = parse_text_results(out);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].1, vec!["3:import os", "9:os.path"]);
    }
}
