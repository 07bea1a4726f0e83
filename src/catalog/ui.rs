//! On-screen UI inspection and input through `idb` and the text-recognition
//! probe.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{CatalogContext, Entry};
use crate::capabilities::{
    ArgSchema, Args, Capability, Category, InputSchema, ProfileId, SchemaError,
};
use crate::execution::{ExecutionPlan, RawResult};
use crate::normalize::{self, NormalizeError};

pub(super) fn capabilities(ctx: &CatalogContext<'_>) -> Result<Vec<Entry>, SchemaError> {
    Ok(vec![
        (ProfileId::Full, describe_ui(ctx)?),
        (ProfileId::Minimal, find_text(ctx)?),
        (ProfileId::Minimal, tap(ctx)?),
        (ProfileId::Full, type_text(ctx)?),
    ])
}

fn udid_arg() -> ArgSchema {
    ArgSchema::string("udid", "Target device UDID; idb's default target when omitted").non_empty()
}

fn with_udid(plan: ExecutionPlan, args: Args<'_>) -> ExecutionPlan {
    match args.str("udid") {
        Some(udid) => plan.arg("--udid").arg(udid),
        None => plan,
    }
}

/// Axis-aligned rectangle in screen points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A screen coordinate suitable for `tap`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Rect {
    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    fn scaled(&self, scale: f64) -> Rect {
        Rect {
            x: self.x / scale,
            y: self.y / scale,
            width: self.width / scale,
            height: self.height / scale,
        }
    }
}

// ---------------------------------------------------------------------------
// describe_ui
// ---------------------------------------------------------------------------

fn describe_ui(ctx: &CatalogContext<'_>) -> Result<Capability, SchemaError> {
    let program = ctx.tools().idb.clone();
    let limits = ctx.limits("describe_ui", None);
    let schema = vec![
        udid_arg(),
        ArgSchema::string("label", "Only elements whose label contains this text"),
        ArgSchema::string("role", "Only elements of this accessibility type, e.g. Button"),
    ];
    Ok(Capability::new(
        "describe_ui",
        "Describe the accessibility elements on screen with frames and tap points.",
        Category::UiAutomation,
        InputSchema::new(schema)?,
        move |args| {
            let plan = limits.apply(ExecutionPlan::new(&program).args(["ui", "describe-all", "--json"]));
            Ok(with_udid(plan, Args::new(args)))
        },
        normalize_elements,
    ))
}

#[derive(Deserialize)]
struct IdbElement {
    #[serde(rename = "AXLabel", default)]
    label: Option<String>,
    #[serde(rename = "AXValue", default)]
    value: Option<String>,
    #[serde(rename = "AXUniqueId", default)]
    identifier: Option<String>,
    #[serde(rename = "type", default)]
    role: Option<String>,
    #[serde(default)]
    frame: Option<Rect>,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct Element {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    identifier: Option<String>,
    enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    frame: Option<Rect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tap: Option<Point>,
}

/// One JSON array document; a truncated one is malformed. Elements without a
/// frame are kept but carry no tap point.
pub fn normalize_elements(raw: &RawResult, args: &Value) -> Result<Value, NormalizeError> {
    normalize::require_success(raw)?;
    let parsed: Vec<IdbElement> = normalize::parse_json(raw)?;
    let args = Args::new(args);
    let label_filter = args.str("label");
    let role_filter = args.str("role");

    let elements: Vec<Element> = parsed
        .into_iter()
        .filter(|e| match label_filter {
            Some(f) => e.label.as_deref().is_some_and(|l| l.contains(f)),
            None => true,
        })
        .filter(|e| match role_filter {
            Some(r) => e.role.as_deref() == Some(r),
            None => true,
        })
        .map(|e| Element {
            tap: e.frame.map(|f| f.center()),
            role: e.role,
            label: e.label,
            value: e.value,
            identifier: e.identifier,
            enabled: e.enabled,
            frame: e.frame,
        })
        .collect();
    Ok(json!({
        "count": elements.len(),
        "elements": normalize::to_payload(&elements)?,
    }))
}

// ---------------------------------------------------------------------------
// find_text
// ---------------------------------------------------------------------------

fn find_text(ctx: &CatalogContext<'_>) -> Result<Capability, SchemaError> {
    let program = ctx.tools().ocr.clone();
    let limits = ctx.limits("find_text", None);
    let schema = vec![
        udid_arg(),
        ArgSchema::string("query", "Only items containing this text"),
        ArgSchema::boolean("case_sensitive", "Match 'query' case-sensitively")
            .default_value(json!(false)),
        ArgSchema::number("min_confidence", "Drop items recognized with lower confidence")
            .default_value(json!(0.0))
            .range(Some(0.0), Some(1.0)),
        ArgSchema::number("scale", "Screen pixels per point, used to convert boxes to points")
            .default_value(json!(1.0))
            .range(Some(0.1), Some(10.0)),
    ];
    Ok(Capability::new(
        "find_text",
        "Recognize text on screen and return matching items with bounding boxes and tap points.",
        Category::UiAutomation,
        InputSchema::new(schema)?,
        move |args| Ok(with_udid(limits.apply(ExecutionPlan::new(&program)), Args::new(args))),
        normalize_text_items,
    ))
}

#[derive(Deserialize)]
struct RecognizedText {
    text: String,
    confidence: f64,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

#[derive(Debug, Serialize)]
struct TextItem {
    text: String,
    confidence: f64,
    bounds: Rect,
    tap: Point,
}

/// The probe prints one JSON object per recognized item. Truncated output
/// keeps its complete lines; an unparseable complete line is malformed.
pub fn normalize_text_items(raw: &RawResult, args: &Value) -> Result<Value, NormalizeError> {
    normalize::require_success(raw)?;
    let text = normalize::stdout_text(raw)?;
    let args = Args::new(args);
    let case_sensitive = args.bool_or("case_sensitive", false);
    let query = args.str("query").filter(|q| !q.is_empty()).map(|q| {
        if case_sensitive {
            q.to_string()
        } else {
            q.to_lowercase()
        }
    });
    let min_confidence = args.f64("min_confidence").unwrap_or(0.0);
    let scale = args.f64("scale").unwrap_or(1.0);

    let mut items = Vec::new();
    for (index, line) in normalize::complete_lines(&text, raw.stdout_truncated)
        .into_iter()
        .enumerate()
    {
        if line.trim().is_empty() {
            continue;
        }
        let item: RecognizedText = serde_json::from_str(line).map_err(|e| {
            NormalizeError::malformed(format!("line {}: {}", index + 1, e))
        })?;
        if item.confidence < min_confidence {
            continue;
        }
        if let Some(query) = &query {
            let matches = if case_sensitive {
                item.text.contains(query.as_str())
            } else {
                item.text.to_lowercase().contains(query.as_str())
            };
            if !matches {
                continue;
            }
        }
        let bounds = Rect {
            x: item.x,
            y: item.y,
            width: item.width,
            height: item.height,
        }
        .scaled(scale);
        items.push(TextItem {
            text: item.text,
            confidence: item.confidence,
            tap: bounds.center(),
            bounds,
        });
    }
    Ok(json!({
        "count": items.len(),
        "items": normalize::to_payload(&items)?,
        "truncated": raw.stdout_truncated,
    }))
}

// ---------------------------------------------------------------------------
// tap / type_text
// ---------------------------------------------------------------------------

fn tap(ctx: &CatalogContext<'_>) -> Result<Capability, SchemaError> {
    let program = ctx.tools().idb.clone();
    let limits = ctx.limits("tap", None);
    let schema = vec![
        ArgSchema::number("x", "Horizontal position in points").required().range(Some(0.0), None),
        ArgSchema::number("y", "Vertical position in points").required().range(Some(0.0), None),
        ArgSchema::number("duration", "Press duration in seconds").range(Some(0.0), Some(10.0)),
        udid_arg(),
    ];
    Ok(Capability::new(
        "tap",
        "Tap the screen at a point.",
        Category::UiAutomation,
        InputSchema::new(schema)?,
        move |args| {
            let args = Args::new(args);
            let (x, y) = (args.required_f64("x")?, args.required_f64("y")?);
            let plan = with_udid(limits.apply(ExecutionPlan::new(&program).args(["ui", "tap"])), args);
            let plan = match args.f64("duration") {
                Some(duration) => plan.arg("--duration").arg(duration.to_string()),
                None => plan,
            };
            Ok(plan.arg(rounded(x).to_string()).arg(rounded(y).to_string()))
        },
        normalize_tap,
    ))
}

fn rounded(coordinate: f64) -> i64 {
    coordinate.round() as i64
}

pub fn normalize_tap(raw: &RawResult, args: &Value) -> Result<Value, NormalizeError> {
    normalize::require_success(raw)?;
    let args = Args::new(args);
    let coordinate = |name: &str| {
        args.f64(name)
            .map(rounded)
            .ok_or_else(|| NormalizeError::malformed(format!("tap without '{}'", name)))
    };
    Ok(json!({ "tapped": { "x": coordinate("x")?, "y": coordinate("y")? } }))
}

fn type_text(ctx: &CatalogContext<'_>) -> Result<Capability, SchemaError> {
    let program = ctx.tools().idb.clone();
    let limits = ctx.limits("type_text", None);
    let schema = vec![
        ArgSchema::string("text", "Text to type into the focused element").required().non_empty(),
        udid_arg(),
    ];
    Ok(Capability::new(
        "type_text",
        "Type text into the focused element.",
        Category::UiAutomation,
        InputSchema::new(schema)?,
        move |args| {
            let args = Args::new(args);
            let plan = with_udid(limits.apply(ExecutionPlan::new(&program).args(["ui", "text"])), args);
            Ok(plan.arg("--").arg(args.required_str("text")?))
        },
        |raw, args| {
            normalize::require_success(raw)?;
            let typed = Args::new(args).str("text").map_or(0, |t| t.chars().count());
            Ok(json!({ "typed_characters": typed }))
        },
    ))
}
