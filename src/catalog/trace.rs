//! Performance tracing through `xcrun xctrace`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{CatalogContext, Entry};
use crate::capabilities::{
    ArgSchema, ArgType, Args, Capability, Category, InputSchema, PlanError, ProfileId, SchemaError,
};
use crate::execution::{ExecutionPlan, RawResult};
use crate::normalize::{self, NormalizeError};

const DEFAULT_TEMPLATE: &str = "Time Profiler";
const DEFAULT_TIME_LIMIT_SECS: u64 = 10;
const MAX_TIME_LIMIT_SECS: u64 = 60 * 60;
/// Added to the recording time limit to cover xctrace startup and trace
/// finalization.
const RECORD_MARGIN: Duration = Duration::from_secs(120);

static TEMPLATE_SECTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^==\s*(.+?)\s*==$").unwrap());
static SAVED_AS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*Output file saved as:\s*(.+?)\s*$").unwrap());
static RUN_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<run[\s/>]").unwrap());
static RUN_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<run(\s[^>]*)?>(.*?)</run>").unwrap());
static TABLE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<table[\s/>]").unwrap());
static TABLE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<table(\s[^>]*?)?\s*/?>").unwrap());
static XML_ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_][\w\-.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});
static TEMPLATE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<template-name>([^<]*)</template-name>").unwrap());
static DURATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"<duration>([^<]*)</duration>").unwrap());
static TARGET_PROCESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<target>.*?<process(\s[^>]*)>").unwrap());

pub(super) fn capabilities(ctx: &CatalogContext<'_>) -> Result<Vec<Entry>, SchemaError> {
    Ok(vec![
        (ProfileId::Full, list_trace_templates(ctx)?),
        (ProfileId::Minimal, record_trace(ctx)?),
        (ProfileId::Minimal, summarize_trace(ctx)?),
    ])
}

// ---------------------------------------------------------------------------
// list_trace_templates
// ---------------------------------------------------------------------------

fn list_trace_templates(ctx: &CatalogContext<'_>) -> Result<Capability, SchemaError> {
    let program = ctx.tools().xcrun.clone();
    let limits = ctx.limits("list_trace_templates", None);
    Ok(Capability::new(
        "list_trace_templates",
        "List the Instruments templates available for recording, grouped by origin.",
        Category::Performance,
        InputSchema::empty(),
        move |_| Ok(limits.apply(ExecutionPlan::new(&program).args(["xctrace", "list", "templates"]))),
        |raw, _| normalize_templates(raw),
    ))
}

#[derive(Debug, Serialize)]
struct TemplateGroup {
    name: String,
    templates: Vec<String>,
}

/// Output is `== Group ==` headers each followed by template names. A name
/// before any header is malformed.
pub fn normalize_templates(raw: &RawResult) -> Result<Value, NormalizeError> {
    normalize::require_success(raw)?;
    let text = normalize::stdout_text(raw)?;
    let mut groups: Vec<TemplateGroup> = Vec::new();
    for (index, line) in normalize::complete_lines(&text, raw.stdout_truncated)
        .into_iter()
        .enumerate()
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(caps) = TEMPLATE_SECTION.captures(line) {
            groups.push(TemplateGroup {
                name: caps[1].to_string(),
                templates: Vec::new(),
            });
            continue;
        }
        let group = groups.last_mut().ok_or_else(|| {
            NormalizeError::malformed(format!("line {}: template outside of a section", index + 1))
        })?;
        group.templates.push(line.to_string());
    }
    Ok(json!({
        "groups": normalize::to_payload(&groups)?,
        "truncated": raw.stdout_truncated,
    }))
}

// ---------------------------------------------------------------------------
// record_trace
// ---------------------------------------------------------------------------

fn record_trace(ctx: &CatalogContext<'_>) -> Result<Capability, SchemaError> {
    let program = ctx.tools().xcrun.clone();
    // A configured deadline for record_trace replaces the margin, not the total.
    let limits = ctx.limits("record_trace", Some(RECORD_MARGIN));
    let schema = vec![
        ArgSchema::string("template", "Instruments template name or path")
            .default_value(json!(DEFAULT_TEMPLATE))
            .non_empty(),
        ArgSchema::integer("time_limit_secs", "Recording length in seconds")
            .default_value(json!(DEFAULT_TIME_LIMIT_SECS))
            .range(Some(1.0), Some(MAX_TIME_LIMIT_SECS as f64)),
        ArgSchema::string("output", "Path of the .trace bundle to write").non_empty(),
        ArgSchema::string("device", "Device name or UDID").non_empty(),
        ArgSchema::string("launch", "Executable or app to launch and record").non_empty(),
        ArgSchema::array_of("launch_args", ArgType::String, "Arguments for the launched process"),
        ArgSchema::string("attach", "Process name or pid to attach to").non_empty(),
        ArgSchema::boolean("all_processes", "Record every process on the device"),
    ];
    Ok(Capability::new(
        "record_trace",
        "Record a performance trace of one process or the whole device for a fixed time.",
        Category::Performance,
        InputSchema::new(schema)?,
        move |args| {
            let args = Args::new(args);
            let time_limit = args.u64("time_limit_secs").unwrap_or(DEFAULT_TIME_LIMIT_SECS);
            let output = match args.str("output") {
                Some(path) => PathBuf::from(path),
                None => default_trace_path(),
            };
            let timeout = Duration::from_secs(time_limit)
                .checked_add(limits.timeout)
                .ok_or_else(|| PlanError("recording deadline is out of range".to_string()))?;
            let plan = ExecutionPlan::new(&program)
                .args(["xctrace", "record", "--template"])
                .arg(args.str("template").unwrap_or(DEFAULT_TEMPLATE))
                .arg("--time-limit")
                .arg(format!("{}s", time_limit))
                .arg("--output")
                .arg(output.to_string_lossy())
                .with_max_output_bytes(limits.max_output_bytes)
                .with_timeout(timeout);
            let plan = match args.str("device") {
                Some(device) => plan.arg("--device").arg(device),
                None => plan,
            };
            with_target(plan, args)
        },
        |raw, args| normalize_recording(raw, args),
    ))
}

fn default_trace_path() -> PathBuf {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");
    let id = Uuid::new_v4().simple().to_string();
    std::env::temp_dir().join(format!("xcprobe-{}-{}.trace", stamp, &id[..8]))
}

fn with_target(plan: ExecutionPlan, args: Args<'_>) -> Result<ExecutionPlan, PlanError> {
    let launch = args.str("launch");
    let attach = args.str("attach");
    let all = args.bool_or("all_processes", false);
    match (launch, attach, all) {
        (Some(launch), None, false) => Ok(plan
            .args(["--launch", "--", launch])
            .args(args.strings("launch_args"))),
        (None, Some(attach), false) => Ok(plan.arg("--attach").arg(attach)),
        (None, None, true) => Ok(plan.arg("--all-processes")),
        _ => Err(PlanError(
            "exactly one of 'launch', 'attach' or 'all_processes' must be given".to_string(),
        )),
    }
}

fn target_kind(args: Args<'_>) -> &'static str {
    if args.str("launch").is_some() {
        "launch"
    } else if args.str("attach").is_some() {
        "attach"
    } else {
        "all_processes"
    }
}

/// The saved bundle path is taken from xctrace's own report, on either
/// stream. A zero exit without that report is malformed.
pub fn normalize_recording(raw: &RawResult, args: &Value) -> Result<Value, NormalizeError> {
    normalize::require_success(raw)?;
    let stdout = normalize::stdout_text(raw)?;
    let stderr = raw.stderr_lossy();
    let path = SAVED_AS
        .captures(&stdout)
        .or_else(|| SAVED_AS.captures(&stderr))
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| NormalizeError::malformed("xctrace did not report a saved trace file"))?;

    let args = Args::new(args);
    Ok(json!({
        "trace_path": path,
        "template": args.str("template").unwrap_or(DEFAULT_TEMPLATE),
        "time_limit_secs": args.u64("time_limit_secs").unwrap_or(DEFAULT_TIME_LIMIT_SECS),
        "target": target_kind(args),
    }))
}

// ---------------------------------------------------------------------------
// summarize_trace
// ---------------------------------------------------------------------------

fn summarize_trace(ctx: &CatalogContext<'_>) -> Result<Capability, SchemaError> {
    let program = ctx.tools().xcrun.clone();
    let limits = ctx.limits("summarize_trace", None);
    let schema = vec![ArgSchema::string("trace_path", "Path of a recorded .trace bundle")
        .required()
        .non_empty()];
    Ok(Capability::new(
        "summarize_trace",
        "Summarize the runs and recorded data tables of a trace bundle.",
        Category::Performance,
        InputSchema::new(schema)?,
        move |args| {
            let path = Args::new(args).required_str("trace_path")?;
            Ok(limits.apply(
                ExecutionPlan::new(&program)
                    .args(["xctrace", "export", "--input", path, "--toc"]),
            ))
        },
        |raw, _| normalize_toc(raw),
    ))
}

#[derive(Debug, Serialize)]
struct RunSummary {
    number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    process: Option<String>,
    tables: usize,
}

#[derive(Debug, Default, Serialize)]
struct InstrumentSummary {
    tables: usize,
    runs: Vec<u32>,
    /// Table attributes other than `schema`; first value seen wins.
    attributes: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct TraceSummary {
    runs: Vec<RunSummary>,
    instruments: BTreeMap<String, InstrumentSummary>,
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Attributes of one start tag, either quote style, any order.
fn attributes(tag: Option<&str>) -> BTreeMap<String, String> {
    XML_ATTRIBUTE
        .captures_iter(tag.unwrap_or_default())
        .map(|a| {
            let value = a.get(2).or_else(|| a.get(3)).map_or("", |m| m.as_str());
            (a[1].to_string(), unescape(value))
        })
        .collect()
}

/// The table of contents is one XML document; a truncated one is never
/// partially read. Every `<run>` must carry a `number` and every `<table>` a
/// `schema`, and a tag the parser could not read fails the whole document.
pub fn normalize_toc(raw: &RawResult) -> Result<Value, NormalizeError> {
    normalize::require_success(raw)?;
    if raw.stdout_truncated {
        return Err(NormalizeError::malformed(format!(
            "trace table of contents truncated at {} bytes",
            raw.stdout.len()
        )));
    }
    let text = normalize::stdout_text(raw)?;
    if !text.contains("<trace-toc") || !text.contains("</trace-toc>") {
        return Err(NormalizeError::malformed("expected a <trace-toc> document"));
    }

    let mut runs = Vec::new();
    let mut instruments: BTreeMap<String, InstrumentSummary> = BTreeMap::new();
    for caps in RUN_BLOCK.captures_iter(&text) {
        let number = attributes(caps.get(1).map(|m| m.as_str()))
            .remove("number")
            .ok_or_else(|| NormalizeError::malformed("run without a number"))?;
        let number: u32 = number
            .trim()
            .parse()
            .map_err(|_| NormalizeError::malformed(format!("bad run number '{}'", number)))?;
        let body = &caps[2];

        let mut tables = 0;
        for table in TABLE_TAG.captures_iter(body) {
            let mut table_attributes = attributes(table.get(1).map(|m| m.as_str()));
            let schema = table_attributes.remove("schema").ok_or_else(|| {
                NormalizeError::malformed(format!("run {}: table without a schema", number))
            })?;
            let summary = instruments.entry(schema).or_default();
            summary.tables += 1;
            if !summary.runs.contains(&number) {
                summary.runs.push(number);
            }
            for (key, value) in table_attributes {
                summary.attributes.entry(key).or_insert(value);
            }
            tables += 1;
        }
        if tables != TABLE_OPEN.find_iter(body).count() {
            return Err(NormalizeError::malformed(format!(
                "run {}: unreadable <table> element",
                number
            )));
        }

        runs.push(RunSummary {
            number,
            template: TEMPLATE_NAME.captures(body).map(|c| unescape(c[1].trim())),
            duration_secs: DURATION.captures(body).and_then(|c| c[1].trim().parse().ok()),
            process: TARGET_PROCESS
                .captures(body)
                .and_then(|c| attributes(c.get(1).map(|m| m.as_str())).remove("name")),
            tables,
        });
    }
    if runs.len() != RUN_OPEN.find_iter(&text).count() {
        return Err(NormalizeError::malformed("unreadable <run> element"));
    }

    normalize::to_payload(&TraceSummary { runs, instruments })
}
