//! Project inspection: `xcodebuild` queries and builds, `nm` symbol tables.

use std::collections::BTreeMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{CatalogContext, Entry};
use crate::capabilities::{
    ArgSchema, ArgType, Args, Capability, Category, InputSchema, PlanError, ProfileId, SchemaError,
};
use crate::execution::{ExecutionPlan, RawResult};
use crate::normalize::{self, NormalizeError};

/// Builds get a longer default deadline than queries.
const BUILD_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// xcodebuild's exit status for a build that ran and failed.
const XCODEBUILD_BUILD_FAILED: i32 = 65;
const DEFAULT_SYMBOL_LIMIT: u64 = 1000;

static SETTINGS_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^Build settings for action (\S+) and target "?(.+?)"?:\s*$"#).unwrap()
});
static SETTING_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s+([A-Za-z_][A-Za-z0-9_]*) = ?(.*)$").unwrap());
static LOCATED_DIAGNOSTIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+?):(\d+):(?:(\d+):)? (error|warning): (.+)$").unwrap()
});
static BARE_DIAGNOSTIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[\w.\-]+: )?(error|warning): (.+)$").unwrap());
static NM_SYMBOL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\S+) ([A-Za-z?\-])(?: +([0-9a-fA-F]+))?(?: +([0-9a-fA-F]+))? *$").unwrap()
});
static NM_OBJECT_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+):$").unwrap());

pub(super) fn capabilities(ctx: &CatalogContext<'_>) -> Result<Vec<Entry>, SchemaError> {
    Ok(vec![
        (ProfileId::Minimal, list_schemes(ctx)?),
        (ProfileId::Full, show_build_settings(ctx)?),
        (ProfileId::Minimal, build_project(ctx)?),
        (ProfileId::Full, list_symbols(ctx)?),
    ])
}

fn container_args() -> Vec<ArgSchema> {
    vec![
        ArgSchema::string("project", "Path to an .xcodeproj (exclusive with 'workspace')"),
        ArgSchema::string("workspace", "Path to an .xcworkspace (exclusive with 'project')"),
        ArgSchema::string("directory", "Working directory for xcodebuild").non_empty(),
    ]
}

fn with_container(plan: ExecutionPlan, args: Args<'_>) -> Result<ExecutionPlan, PlanError> {
    let plan = match (args.str("project"), args.str("workspace")) {
        (Some(_), Some(_)) => {
            return Err(PlanError(
                "'project' and 'workspace' are mutually exclusive".to_string(),
            ))
        }
        (Some(project), None) => plan.arg("-project").arg(project),
        (None, Some(workspace)) => plan.arg("-workspace").arg(workspace),
        (None, None) => plan,
    };
    Ok(match args.str("directory") {
        Some(dir) => plan.current_dir(dir),
        None => plan,
    })
}

fn with_flag(plan: ExecutionPlan, flag: &str, value: Option<&str>) -> ExecutionPlan {
    match value {
        Some(value) => plan.arg(flag).arg(value),
        None => plan,
    }
}

// ---------------------------------------------------------------------------
// list_schemes
// ---------------------------------------------------------------------------

fn list_schemes(ctx: &CatalogContext<'_>) -> Result<Capability, SchemaError> {
    let program = ctx.tools().xcodebuild.clone();
    let limits = ctx.limits("list_schemes", None);
    Ok(Capability::new(
        "list_schemes",
        "List the targets, schemes and build configurations of an Xcode project or workspace.",
        Category::ProjectInspection,
        InputSchema::new(container_args())?,
        move |args| {
            let plan = limits.apply(ExecutionPlan::new(&program).args(["-list", "-json"]));
            with_container(plan, Args::new(args))
        },
        |raw, _| normalize_scheme_list(raw),
    ))
}

#[derive(Deserialize)]
struct ListOutput {
    project: Option<ListContainer>,
    workspace: Option<ListContainer>,
}

#[derive(Deserialize)]
struct ListContainer {
    name: String,
    #[serde(default)]
    targets: Vec<String>,
    #[serde(default)]
    schemes: Vec<String>,
    #[serde(default)]
    configurations: Vec<String>,
}

#[derive(Serialize)]
struct SchemeList {
    kind: &'static str,
    name: String,
    targets: Vec<String>,
    schemes: Vec<String>,
    configurations: Vec<String>,
}

/// `xcodebuild -list -json` emits one document keyed by `project` or
/// `workspace`. Anything else, including a truncated document, is malformed.
pub fn normalize_scheme_list(raw: &RawResult) -> Result<Value, NormalizeError> {
    normalize::require_success(raw)?;
    let parsed: ListOutput = normalize::parse_json(raw)?;
    let (kind, container) = match (parsed.project, parsed.workspace) {
        (Some(project), _) => ("project", project),
        (None, Some(workspace)) => ("workspace", workspace),
        (None, None) => {
            return Err(NormalizeError::malformed(
                "expected a 'project' or 'workspace' member",
            ))
        }
    };
    normalize::to_payload(&SchemeList {
        kind,
        name: container.name,
        targets: container.targets,
        schemes: container.schemes,
        configurations: container.configurations,
    })
}

// ---------------------------------------------------------------------------
// show_build_settings
// ---------------------------------------------------------------------------

fn show_build_settings(ctx: &CatalogContext<'_>) -> Result<Capability, SchemaError> {
    let program = ctx.tools().xcodebuild.clone();
    let limits = ctx.limits("show_build_settings", None);
    let mut schema = container_args();
    schema.extend([
        ArgSchema::string("scheme", "Scheme to resolve settings for").non_empty(),
        ArgSchema::string("target", "Target to resolve settings for").non_empty(),
        ArgSchema::string("configuration", "Build configuration, e.g. Debug").non_empty(),
        ArgSchema::array_of("keys", ArgType::String, "Only return these setting names"),
    ]);
    Ok(Capability::new(
        "show_build_settings",
        "Show resolved build settings per target.",
        Category::ProjectInspection,
        InputSchema::new(schema)?,
        move |args| {
            let args = Args::new(args);
            let plan = limits.apply(ExecutionPlan::new(&program).arg("-showBuildSettings"));
            let plan = with_container(plan, args)?;
            let plan = with_flag(plan, "-scheme", args.str("scheme"));
            let plan = with_flag(plan, "-target", args.str("target"));
            Ok(with_flag(plan, "-configuration", args.str("configuration")))
        },
        normalize_build_settings,
    ))
}

#[derive(Debug, Serialize)]
struct TargetSettings {
    target: String,
    action: String,
    settings: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct BuildSettings {
    targets: Vec<TargetSettings>,
    truncated: bool,
}

/// Lines before the first target header are preamble and skipped. After it,
/// every non-blank line must be a `KEY = value` setting. Truncated output
/// keeps its complete lines and reports `truncated: true`.
pub fn normalize_build_settings(raw: &RawResult, args: &Value) -> Result<Value, NormalizeError> {
    normalize::require_success(raw)?;
    let text = normalize::stdout_text(raw)?;
    let keys = Args::new(args).strings("keys");

    let mut targets: Vec<TargetSettings> = Vec::new();
    for (index, line) in normalize::complete_lines(&text, raw.stdout_truncated)
        .into_iter()
        .enumerate()
    {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(caps) = SETTINGS_HEADER.captures(line) {
            targets.push(TargetSettings {
                target: caps[2].to_string(),
                action: caps[1].to_string(),
                settings: BTreeMap::new(),
            });
            continue;
        }
        let Some(current) = targets.last_mut() else {
            continue;
        };
        let caps = SETTING_LINE.captures(line).ok_or_else(|| {
            NormalizeError::malformed(format!("line {}: not a build setting", index + 1))
        })?;
        let key = &caps[1];
        if keys.is_empty() || keys.contains(&key) {
            current.settings.insert(key.to_string(), caps[2].to_string());
        }
    }

    if targets.is_empty() && !text.trim().is_empty() && !raw.stdout_truncated {
        return Err(NormalizeError::malformed("no 'Build settings for' section found"));
    }
    normalize::to_payload(&BuildSettings {
        targets,
        truncated: raw.stdout_truncated,
    })
}

// ---------------------------------------------------------------------------
// build_project
// ---------------------------------------------------------------------------

fn build_project(ctx: &CatalogContext<'_>) -> Result<Capability, SchemaError> {
    let program = ctx.tools().xcodebuild.clone();
    let limits = ctx.limits("build_project", Some(BUILD_TIMEOUT));
    let mut schema = container_args();
    schema.extend([
        ArgSchema::string("scheme", "Scheme to build").required().non_empty(),
        ArgSchema::string("configuration", "Build configuration, e.g. Debug").non_empty(),
        ArgSchema::string("destination", "xcodebuild destination specifier").non_empty(),
        ArgSchema::string("sdk", "SDK name or path").non_empty(),
        ArgSchema::string("derived_data_path", "Derived data directory").non_empty(),
        ArgSchema::boolean("clean", "Clean before building").default_value(json!(false)),
    ]);
    Ok(Capability::new(
        "build_project",
        "Build a scheme and report errors and warnings. A failed build is a result, not an error.",
        Category::ProjectInspection,
        InputSchema::new(schema)?,
        move |args| {
            let args = Args::new(args);
            let plan = with_container(limits.apply(ExecutionPlan::new(&program)), args)?;
            let plan = plan.arg("-scheme").arg(args.required_str("scheme")?);
            let plan = with_flag(plan, "-configuration", args.str("configuration"));
            let plan = with_flag(plan, "-destination", args.str("destination"));
            let plan = with_flag(plan, "-sdk", args.str("sdk"));
            let plan = with_flag(plan, "-derivedDataPath", args.str("derived_data_path"));
            let plan = if args.bool_or("clean", false) { plan.arg("clean") } else { plan };
            Ok(plan.arg("build"))
        },
        |raw, _| normalize_build(raw),
    ))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Diagnostic {
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    column: Option<u32>,
    message: String,
}

#[derive(Debug, Serialize)]
struct BuildReport {
    succeeded: bool,
    errors: Vec<Diagnostic>,
    warnings: Vec<Diagnostic>,
    truncated: bool,
}

fn parse_diagnostic(line: &str) -> Option<(bool, Diagnostic)> {
    if let Some(caps) = LOCATED_DIAGNOSTIC.captures(line) {
        let diagnostic = Diagnostic {
            file: Some(caps[1].to_string()),
            line: caps[2].parse().ok(),
            column: caps.get(3).and_then(|m| m.as_str().parse().ok()),
            message: caps[5].trim().to_string(),
        };
        return Some((&caps[4] == "error", diagnostic));
    }
    let caps = BARE_DIAGNOSTIC.captures(line)?;
    let diagnostic = Diagnostic {
        file: None,
        line: None,
        column: None,
        message: caps[2].trim().to_string(),
    };
    Some((&caps[1] == "error", diagnostic))
}

/// Exit 0 must carry the `** BUILD SUCCEEDED **` marker unless output was
/// cut. Exit 65 is a failed build and becomes `succeeded: false` when at
/// least one error was recognized; without one it is a tool failure. Any
/// other status is a tool failure. Diagnostics are collected from complete
/// lines of both streams, first occurrence wins.
pub fn normalize_build(raw: &RawResult) -> Result<Value, NormalizeError> {
    let code = normalize::require_exit(raw, &[0, XCODEBUILD_BUILD_FAILED])?;
    let stdout = normalize::stdout_text(raw)?;
    let stderr = raw.stderr_lossy();
    let truncated = raw.stdout_truncated || raw.stderr_truncated;

    let mut errors: Vec<Diagnostic> = Vec::new();
    let mut warnings: Vec<Diagnostic> = Vec::new();
    let mut saw_success_marker = false;
    let lines = normalize::complete_lines(&stdout, raw.stdout_truncated)
        .into_iter()
        .chain(normalize::complete_lines(&stderr, raw.stderr_truncated));
    for line in lines {
        let line = line.trim_end();
        if line.contains("** BUILD SUCCEEDED **") {
            saw_success_marker = true;
            continue;
        }
        let Some((is_error, diagnostic)) = parse_diagnostic(line) else {
            continue;
        };
        let bucket = if is_error { &mut errors } else { &mut warnings };
        if !bucket.contains(&diagnostic) {
            bucket.push(diagnostic);
        }
    }

    match code {
        0 if !saw_success_marker && !truncated => Err(NormalizeError::malformed(
            "xcodebuild exited 0 without a BUILD SUCCEEDED marker",
        )),
        XCODEBUILD_BUILD_FAILED if errors.is_empty() => Err(normalize::tool_failed(raw)),
        _ => normalize::to_payload(&BuildReport {
            succeeded: code == 0,
            errors,
            warnings,
            truncated,
        }),
    }
}

// ---------------------------------------------------------------------------
// list_symbols
// ---------------------------------------------------------------------------

fn list_symbols(ctx: &CatalogContext<'_>) -> Result<Capability, SchemaError> {
    let program = ctx.tools().nm.clone();
    let limits = ctx.limits("list_symbols", None);
    let schema = vec![
        ArgSchema::string("binary", "Path to a Mach-O binary, object file or archive")
            .required()
            .non_empty(),
        ArgSchema::boolean("external_only", "Only external (global) symbols")
            .default_value(json!(false)),
        ArgSchema::string("filter", "Only symbols whose name contains this text"),
        ArgSchema::integer("limit", "Maximum number of symbols returned")
            .default_value(json!(DEFAULT_SYMBOL_LIMIT))
            .range(Some(1.0), Some(100_000.0)),
    ];
    Ok(Capability::new(
        "list_symbols",
        "List the symbol table of a binary.",
        Category::ProjectInspection,
        InputSchema::new(schema)?,
        move |args| {
            let args = Args::new(args);
            let plan = limits.apply(ExecutionPlan::new(&program).arg("-P"));
            let plan = if args.bool_or("external_only", false) { plan.arg("-g") } else { plan };
            Ok(plan.arg(args.required_str("binary")?))
        },
        normalize_symbols,
    ))
}

#[derive(Debug, Serialize)]
struct Symbol {
    name: String,
    kind: &'static str,
    external: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    object: Option<String>,
}

#[derive(Debug, Serialize)]
struct SymbolTable {
    symbols: Vec<Symbol>,
    /// Matching symbols before `limit` was applied.
    total: usize,
    limited: bool,
    truncated: bool,
}

fn symbol_kind(code: char) -> &'static str {
    match code.to_ascii_uppercase() {
        'T' => "text",
        'D' => "data",
        'B' => "bss",
        'R' => "read_only",
        'U' => "undefined",
        'C' => "common",
        'S' => "section",
        'I' => "indirect",
        'A' => "absolute",
        'W' | 'V' => "weak",
        _ => "other",
    }
}

/// Parses `nm -P` lines (`name type [value [size]]`). Object headers
/// (`file.o:` or `lib.a[member.o]:`) attribute following symbols to that
/// object. Any other non-blank line is malformed. Truncated output keeps its
/// complete lines.
pub fn normalize_symbols(raw: &RawResult, args: &Value) -> Result<Value, NormalizeError> {
    normalize::require_success(raw)?;
    let text = normalize::stdout_text(raw)?;
    let args = Args::new(args);
    let filter = args.str("filter").filter(|f| !f.is_empty());
    let limit = args.u64("limit").unwrap_or(DEFAULT_SYMBOL_LIMIT) as usize;

    let mut object: Option<String> = None;
    let mut symbols = Vec::new();
    let mut total = 0;
    for (index, line) in normalize::complete_lines(&text, raw.stdout_truncated)
        .into_iter()
        .enumerate()
    {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(caps) = NM_SYMBOL.captures(line) {
            let name = &caps[1];
            if filter.is_some_and(|f| !name.contains(f)) {
                continue;
            }
            total += 1;
            if symbols.len() >= limit {
                continue;
            }
            let code = caps[2].chars().next().unwrap_or('?');
            symbols.push(Symbol {
                name: name.to_string(),
                kind: symbol_kind(code),
                external: code.is_ascii_uppercase(),
                address: caps.get(3).map(|m| m.as_str().to_string()),
                size: caps.get(4).and_then(|m| u64::from_str_radix(m.as_str(), 16).ok()),
                object: object.clone(),
            });
        } else if let Some(caps) = NM_OBJECT_HEADER.captures(line) {
            object = Some(caps[1].to_string());
        } else {
            return Err(NormalizeError::malformed(format!(
                "line {}: not an nm symbol line",
                index + 1
            )));
        }
    }

    normalize::to_payload(&SymbolTable {
        limited: total > symbols.len(),
        symbols,
        total,
        truncated: raw.stdout_truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn capability(name: &str) -> Capability {
        let config = ServerConfig::default();
        let ctx = CatalogContext::new(&config);
        capabilities(&ctx)
            .unwrap()
            .into_iter()
            .map(|(_, c)| c)
            .find(|c| c.name == name)
            .unwrap()
    }

    #[test]
    fn test_list_schemes_plan() {
        let cap = capability("list_schemes");
        let plan = cap
            .plan(&json!({"workspace": "App.xcworkspace", "directory": "/tmp"}))
            .unwrap();
        assert_eq!(plan.program, "xcodebuild");
        assert_eq!(plan.args, vec!["-list", "-json", "-workspace", "App.xcworkspace"]);
        assert_eq!(plan.working_dir.as_deref(), Some(std::path::Path::new("/tmp")));

        let err = cap
            .plan(&json!({"workspace": "A.xcworkspace", "project": "A.xcodeproj"}))
            .unwrap_err();
        assert!(err.0.contains("mutually exclusive"));
    }

    #[test]
    fn test_normalize_scheme_list() {
        let raw = RawResult::exited(
            0,
            r#"{"project":{"name":"App","targets":["App","AppTests"],"schemes":["App"],"configurations":["Debug","Release"]}}"#,
            "",
        );
        let value = normalize_scheme_list(&raw).unwrap();
        assert_eq!(value["kind"], "project");
        assert_eq!(value["name"], "App");
        assert_eq!(value["targets"], json!(["App", "AppTests"]));
        assert_eq!(value["configurations"], json!(["Debug", "Release"]));

        let raw = RawResult::exited(0, r#"{"workspace":{"name":"W","schemes":["A","B"]}}"#, "");
        let value = normalize_scheme_list(&raw).unwrap();
        assert_eq!(value["kind"], "workspace");
        assert_eq!(value["targets"], json!([]));
    }

    #[test]
    fn test_scheme_list_rejects_unexpected_shapes() {
        let raw = RawResult::exited(0, r#"{"something":"else"}"#, "");
        assert!(matches!(normalize_scheme_list(&raw), Err(NormalizeError::Malformed(_))));

        let raw = RawResult::exited(0, r#"{"project":{"name":"App","tar"#, "").with_truncated_stdout();
        assert!(matches!(normalize_scheme_list(&raw), Err(NormalizeError::Malformed(_))));

        let raw = RawResult::exited(
            66,
            "",
            "xcodebuild: error: 'Nope.xcodeproj' does not exist.",
        );
        match normalize_scheme_list(&raw) {
            Err(NormalizeError::ToolFailed { status, detail }) => {
                assert_eq!(status, "exit status 66");
                assert!(detail.contains("does not exist"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    const SETTINGS: &str = "Command line invocation:\n    /usr/bin/xcodebuild -showBuildSettings\n\nBuild settings for action build and target App:\n    ARCHS = arm64\n    PRODUCT_NAME = App\n    SDKROOT = /Applications/Xcode.app/SDKs/iPhoneOS.sdk\n\nBuild settings for action build and target \"App Tests\":\n    PRODUCT_NAME = AppTests\n    EMPTY_VALUE =\n";

    #[test]
    fn test_normalize_build_settings() {
        let raw = RawResult::exited(0, SETTINGS, "");
        let value = normalize_build_settings(&raw, &json!({})).unwrap();
        let targets = value["targets"].as_array().unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0]["target"], "App");
        assert_eq!(targets[0]["action"], "build");
        assert_eq!(targets[0]["settings"]["ARCHS"], "arm64");
        assert_eq!(targets[1]["target"], "App Tests");
        assert_eq!(targets[1]["settings"]["EMPTY_VALUE"], "");
        assert_eq!(value["truncated"], false);
    }

    #[test]
    fn test_build_settings_key_filter_and_truncation() {
        let value =
            normalize_build_settings(&RawResult::exited(0, SETTINGS, ""), &json!({"keys": ["PRODUCT_NAME"]}))
                .unwrap();
        assert_eq!(value["targets"][0]["settings"], json!({"PRODUCT_NAME": "App"}));

        let cut = &SETTINGS[..SETTINGS.find("SDKROOT").unwrap() + 10];
        let raw = RawResult::exited(0, cut, "").with_truncated_stdout();
        let value = normalize_build_settings(&raw, &json!({})).unwrap();
        assert_eq!(value["truncated"], true);
        let settings = value["targets"][0]["settings"].as_object().unwrap();
        assert_eq!(settings.len(), 2);
        assert!(!settings.contains_key("SDKROOT"));
    }

    #[test]
    fn test_build_settings_malformed() {
        let raw = RawResult::exited(0, "Build settings for action build and target App:\nGARBAGE\n", "");
        assert!(matches!(
            normalize_build_settings(&raw, &json!({})),
            Err(NormalizeError::Malformed(_))
        ));

        let raw = RawResult::exited(0, "hello\n", "");
        assert!(matches!(
            normalize_build_settings(&raw, &json!({})),
            Err(NormalizeError::Malformed(_))
        ));
    }

    #[test]
    fn test_build_project_plan() {
        let cap = capability("build_project");
        let plan = cap
            .plan(&json!({"project": "App.xcodeproj", "scheme": "App", "sdk": "iphonesimulator", "clean": true}))
            .unwrap();
        assert_eq!(
            plan.args,
            vec!["-project", "App.xcodeproj", "-scheme", "App", "-sdk", "iphonesimulator", "clean", "build"]
        );
        assert_eq!(plan.timeout(), BUILD_TIMEOUT);
    }

    #[test]
    fn test_build_succeeded() {
        let stdout = "CompileSwift normal arm64 /src/App.swift\n/src/App.swift:10:5: warning: variable 'x' was never used\n/src/App.swift:10:5: warning: variable 'x' was never used\n** BUILD SUCCEEDED **\n";
        let value = normalize_build(&RawResult::exited(0, stdout, "")).unwrap();
        assert_eq!(value["succeeded"], true);
        assert_eq!(value["errors"], json!([]));
        assert_eq!(
            value["warnings"],
            json!([{"file": "/src/App.swift", "line": 10, "column": 5, "message": "variable 'x' was never used"}])
        );
    }

    #[test]
    fn test_build_failed_is_result() {
        let stdout = "/src/App.swift:3:1: error: cannot find 'foo' in scope\n** BUILD FAILED **\n";
        let stderr = "error: linker command failed with exit code 1\n";
        let value = normalize_build(&RawResult::exited(65, stdout, stderr)).unwrap();
        assert_eq!(value["succeeded"], false);
        let errors = value["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0]["line"], 3);
        assert_eq!(errors[1]["message"], "linker command failed with exit code 1");
        assert!(errors[1].get("file").is_none());
    }

    #[test]
    fn test_build_failure_modes() {
        let raw = RawResult::exited(65, "", "xcodebuild: something unexpected\n");
        assert!(matches!(normalize_build(&raw), Err(NormalizeError::ToolFailed { .. })));

        let raw = RawResult::exited(70, "", "xcodebuild: error: Unable to find a destination\n");
        assert!(matches!(normalize_build(&raw), Err(NormalizeError::ToolFailed { .. })));

        let raw = RawResult::exited(0, "nothing to see\n", "");
        assert!(matches!(normalize_build(&raw), Err(NormalizeError::Malformed(_))));

        let raw = RawResult::exited(0, "CompileSwift a\nCompileSw", "").with_truncated_stdout();
        let value = normalize_build(&raw).unwrap();
        assert_eq!(value["truncated"], true);
        assert_eq!(value["succeeded"], true);
    }

    const NM_OUTPUT: &str = "libdemo.a[a.o]:\n_main T 0000000100003f50 0000000000000020\n_helper t 0000000100003f70 8\n_printf U\n\nlibdemo.a[b.o]:\n_counter D 0000000100008000 4\n";

    #[test]
    fn test_normalize_symbols() {
        let raw = RawResult::exited(0, NM_OUTPUT, "");
        let value = normalize_symbols(&raw, &json!({})).unwrap();
        let symbols = value["symbols"].as_array().unwrap();
        assert_eq!(symbols.len(), 4);
        assert_eq!(symbols[0]["name"], "_main");
        assert_eq!(symbols[0]["kind"], "text");
        assert_eq!(symbols[0]["external"], true);
        assert_eq!(symbols[0]["size"], 32);
        assert_eq!(symbols[0]["object"], "libdemo.a[a.o]");
        assert_eq!(symbols[1]["external"], false);
        assert_eq!(symbols[2]["kind"], "undefined");
        assert!(symbols[2].get("address").is_none());
        assert_eq!(symbols[3]["object"], "libdemo.a[b.o]");
        assert_eq!(value["total"], 4);
        assert_eq!(value["limited"], false);
    }

    #[test]
    fn test_symbols_filter_and_limit() {
        let raw = RawResult::exited(0, NM_OUTPUT, "");
        let value = normalize_symbols(&raw, &json!({"filter": "_", "limit": 2})).unwrap();
        assert_eq!(value["symbols"].as_array().unwrap().len(), 2);
        assert_eq!(value["total"], 4);
        assert_eq!(value["limited"], true);

        let value = normalize_symbols(&raw, &json!({"filter": "help"})).unwrap();
        assert_eq!(value["symbols"][0]["name"], "_helper");
        assert_eq!(value["total"], 1);
    }

    #[test]
    fn test_symbols_empty_and_malformed() {
        let value = normalize_symbols(&RawResult::exited(0, "", "nm: no symbols"), &json!({})).unwrap();
        assert_eq!(value["symbols"], json!([]));

        let raw = RawResult::exited(0, "this is not nm output\n", "");
        assert!(matches!(
            normalize_symbols(&raw, &json!({})),
            Err(NormalizeError::Malformed(_))
        ));
    }

    #[test]
    fn test_symbols_plan() {
        let plan = capability("list_symbols")
            .plan(&json!({"binary": "/bin/ls", "external_only": true}))
            .unwrap();
        assert_eq!(plan.program, "nm");
        assert_eq!(plan.args, vec!["-P", "-g", "/bin/ls"]);
    }
}
