//! Simulator control through `xcrun simctl`.

use std::collections::BTreeMap;

use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{CatalogContext, Entry};
use crate::capabilities::{
    ArgSchema, ArgType, Args, Capability, Category, InputSchema, ProfileId, SchemaError,
};
use crate::execution::{ExecutionPlan, RawResult};
use crate::normalize::{self, NormalizeError};

const BOOTED: &str = "booted";
const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
const BUNDLE_ID_PATTERN: &str = r"^[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)+$";
/// simctl takes the device positionally, so it must never look like a flag.
const DEVICE_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9\-]*$";

static LAUNCHED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(\S+): (\d+)\s*$").unwrap());

pub(super) fn capabilities(ctx: &CatalogContext<'_>) -> Result<Vec<Entry>, SchemaError> {
    Ok(vec![
        (ProfileId::Full, list_simulators(ctx)?),
        (ProfileId::Full, launch_app(ctx)?),
        (ProfileId::Minimal, screenshot(ctx)?),
    ])
}

fn device_arg() -> ArgSchema {
    ArgSchema::string("device", "Simulator UDID, or 'booted'")
        .default_value(json!(BOOTED))
        .pattern(DEVICE_PATTERN)
}

// ---------------------------------------------------------------------------
// list_simulators
// ---------------------------------------------------------------------------

fn list_simulators(ctx: &CatalogContext<'_>) -> Result<Capability, SchemaError> {
    let program = ctx.tools().xcrun.clone();
    let limits = ctx.limits("list_simulators", None);
    let schema = vec![
        ArgSchema::string("state", "Only devices in this state").one_of(&["Booted", "Shutdown"]),
        ArgSchema::string("runtime", "Only runtimes whose name contains this text"),
        ArgSchema::boolean("available_only", "Skip unavailable devices").default_value(json!(true)),
    ];
    Ok(Capability::new(
        "list_simulators",
        "List simulator devices with their runtime and state.",
        Category::UiAutomation,
        InputSchema::new(schema)?,
        move |_| {
            Ok(limits.apply(
                ExecutionPlan::new(&program).args(["simctl", "list", "devices", "--json"]),
            ))
        },
        normalize_simulators,
    ))
}

#[derive(Deserialize)]
struct SimctlDevices {
    devices: BTreeMap<String, Vec<SimctlDevice>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimctlDevice {
    name: String,
    udid: String,
    state: String,
    #[serde(default = "available_by_default")]
    is_available: bool,
}

fn available_by_default() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct Simulator {
    name: String,
    udid: String,
    state: String,
    runtime: String,
    available: bool,
}

/// `com.apple.CoreSimulator.SimRuntime.iOS-17-0` becomes `iOS 17.0`.
fn runtime_label(identifier: &str) -> String {
    let tail = identifier.rsplit('.').next().unwrap_or(identifier);
    match tail.split_once('-') {
        Some((os, version)) => format!("{} {}", os, version.replace('-', ".")),
        None => tail.to_string(),
    }
}

pub fn normalize_simulators(raw: &RawResult, args: &Value) -> Result<Value, NormalizeError> {
    normalize::require_success(raw)?;
    let parsed: SimctlDevices = normalize::parse_json(raw)?;
    let args = Args::new(args);
    let state = args.str("state");
    let runtime_filter = args.str("runtime");
    let available_only = args.bool_or("available_only", true);

    let mut devices = Vec::new();
    for (runtime, entries) in parsed.devices {
        let runtime = runtime_label(&runtime);
        if runtime_filter.is_some_and(|f| !runtime.contains(f)) {
            continue;
        }
        for device in entries {
            if available_only && !device.is_available {
                continue;
            }
            if state.is_some_and(|s| s != device.state) {
                continue;
            }
            devices.push(Simulator {
                name: device.name,
                udid: device.udid,
                state: device.state,
                runtime: runtime.clone(),
                available: device.is_available,
            });
        }
    }
    Ok(json!({
        "count": devices.len(),
        "devices": normalize::to_payload(&devices)?,
    }))
}

// ---------------------------------------------------------------------------
// launch_app
// ---------------------------------------------------------------------------

fn launch_app(ctx: &CatalogContext<'_>) -> Result<Capability, SchemaError> {
    let program = ctx.tools().xcrun.clone();
    let limits = ctx.limits("launch_app", None);
    let schema = vec![
        ArgSchema::string("bundle_id", "Bundle identifier of an installed app")
            .required()
            .pattern(BUNDLE_ID_PATTERN),
        device_arg(),
        ArgSchema::array_of("arguments", ArgType::String, "Launch arguments passed to the app"),
        ArgSchema::boolean("terminate_running", "Terminate a running instance first")
            .default_value(json!(false)),
    ];
    Ok(Capability::new(
        "launch_app",
        "Launch an installed app on a simulator and report its process id.",
        Category::UiAutomation,
        InputSchema::new(schema)?,
        move |args| {
            let args = Args::new(args);
            let plan = limits.apply(ExecutionPlan::new(&program).args(["simctl", "launch"]));
            let plan = if args.bool_or("terminate_running", false) {
                plan.arg("--terminate-running-process")
            } else {
                plan
            };
            Ok(plan
                .arg(args.str("device").unwrap_or(BOOTED))
                .arg(args.required_str("bundle_id")?)
                .args(args.strings("arguments")))
        },
        |raw, _| normalize_launch(raw),
    ))
}

/// simctl reports `<bundle id>: <pid>` on success.
pub fn normalize_launch(raw: &RawResult) -> Result<Value, NormalizeError> {
    normalize::require_success(raw)?;
    let text = normalize::stdout_text(raw)?;
    let caps = LAUNCHED
        .captures(&text)
        .ok_or_else(|| NormalizeError::malformed("simctl did not report '<bundle id>: <pid>'"))?;
    let pid: u32 = caps[2]
        .parse()
        .map_err(|_| NormalizeError::malformed(format!("pid out of range: {}", &caps[2])))?;
    Ok(json!({ "bundle_id": &caps[1], "pid": pid }))
}

// ---------------------------------------------------------------------------
// screenshot
// ---------------------------------------------------------------------------

fn screenshot(ctx: &CatalogContext<'_>) -> Result<Capability, SchemaError> {
    let program = ctx.tools().xcrun.clone();
    let limits = ctx.image_limits("screenshot");
    Ok(Capability::new(
        "screenshot",
        "Capture the simulator screen as a base64-encoded PNG.",
        Category::UiAutomation,
        InputSchema::new(vec![device_arg()])?,
        move |args| {
            let device = Args::new(args).str("device").unwrap_or(BOOTED);
            Ok(limits.apply(
                ExecutionPlan::new(&program)
                    .args(["simctl", "io", device, "screenshot", "--type=png", "-"]),
            ))
        },
        |raw, _| normalize_screenshot(raw),
    ))
}

/// The image is written to stdout. A cut image is never returned.
pub fn normalize_screenshot(raw: &RawResult) -> Result<Value, NormalizeError> {
    normalize::require_success(raw)?;
    if raw.stdout_truncated {
        return Err(NormalizeError::malformed(format!(
            "image exceeded the {} byte capture limit",
            raw.stdout.len()
        )));
    }
    let bytes = &raw.stdout;
    // Signature, IHDR length and type, then width and height.
    if bytes.len() < 24 || bytes[..8] != PNG_SIGNATURE || &bytes[12..16] != b"IHDR" {
        return Err(NormalizeError::malformed("output is not a PNG image"));
    }
    let width = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
    let height = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
    Ok(json!({
        "mime_type": "image/png",
        "width": width,
        "height": height,
        "bytes": bytes.len(),
        "data": base64::engine::general_purpose::STANDARD.encode(bytes),
    }))
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

    const DEVICES: &str = r#"{"devices":{
        "com.apple.CoreSimulator.SimRuntime.iOS-17-0":[
            {"name":"iPhone 15","udid":"AAA","state":"Booted","isAvailable":true},
            {"name":"iPhone 14","udid":"BBB","state":"Shutdown","isAvailable":false}
        ],
        "com.apple.CoreSimulator.SimRuntime.watchOS-10-2":[
            {"name":"Apple Watch","udid":"CCC","state":"Shutdown","isAvailable":true}
        ]
    }}"#;

    #[test]
    fn test_runtime_label() {
        assert_eq!(runtime_label("com.apple.CoreSimulator.SimRuntime.iOS-17-0"), "iOS 17.0");
        assert_eq!(runtime_label("com.apple.CoreSimulator.SimRuntime.xrOS-1-0"), "xrOS 1.0");
        assert_eq!(runtime_label("custom"), "custom");
    }

    #[test]
    fn test_normalize_simulators() {
        let raw = RawResult::exited(0, DEVICES, "");
        let value = normalize_simulators(&raw, &json!({})).unwrap();
        assert_eq!(value["count"], 2);
        assert_eq!(value["devices"][0]["name"], "iPhone 15");
        assert_eq!(value["devices"][0]["runtime"], "iOS 17.0");
        assert_eq!(value["devices"][1]["runtime"], "watchOS 10.2");

        let value = normalize_simulators(&raw, &json!({"available_only": false, "state": "Shutdown"})).unwrap();
        assert_eq!(value["count"], 2);

        let value = normalize_simulators(&raw, &json!({"runtime": "iOS"})).unwrap();
        assert_eq!(value["count"], 1);
    }

    #[test]
    fn test_simulators_malformed() {
        let raw = RawResult::exited(0, r#"{"devices": 3}"#, "");
        assert!(matches!(normalize_simulators(&raw, &json!({})), Err(NormalizeError::Malformed(_))));
    }

    #[test]
    fn test_launch() {
        let plan = capability("launch_app")
            .plan(&json!({"bundle_id": "com.example.Demo", "arguments": ["-reset"]}))
            .unwrap();
        assert_eq!(plan.args, vec!["simctl", "launch", "booted", "com.example.Demo", "-reset"]);

        let value = normalize_launch(&RawResult::exited(0, "com.example.Demo: 5123\n", "")).unwrap();
        assert_eq!(value, json!({"bundle_id": "com.example.Demo", "pid": 5123}));

        let raw = RawResult::exited(0, "launched\n", "");
        assert!(matches!(normalize_launch(&raw), Err(NormalizeError::Malformed(_))));
    }

    #[test]
    fn test_launch_rejects_bad_bundle_id() {
        let cap = capability("launch_app");
        assert!(cap.input_schema.validate(&json!({"bundle_id": "not a bundle"})).is_err());
        assert!(cap.input_schema.validate(&json!({"bundle_id": "com.example.app"})).is_ok());
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(&13u32.to_be_bytes());
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&[8, 6, 0, 0, 0]);
        bytes
    }

    #[test]
    fn test_normalize_screenshot() {
        let image = png(1179, 2556);
        let value = normalize_screenshot(&RawResult::exited(0, image.clone(), "")).unwrap();
        assert_eq!(value["width"], 1179);
        assert_eq!(value["height"], 2556);
        assert_eq!(value["bytes"], image.len());
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(value["data"].as_str().unwrap())
            .unwrap();
        assert_eq!(decoded, image);
    }

    #[test]
    fn test_screenshot_rejects_partial_or_foreign_data() {
        let raw = RawResult::exited(0, png(10, 10), "").with_truncated_stdout();
        assert!(matches!(normalize_screenshot(&raw), Err(NormalizeError::Malformed(_))));

        let raw = RawResult::exited(0, "GIF89a not a png at all", "");
        assert!(matches!(normalize_screenshot(&raw), Err(NormalizeError::Malformed(_))));

        let raw = RawResult::exited(0, Vec::<u8>::new(), "");
        assert!(matches!(normalize_screenshot(&raw), Err(NormalizeError::Malformed(_))));
    }

    #[test]
    fn test_screenshot_uses_image_limit() {
        let config = ServerConfig::default();
        let plan = capability("screenshot").plan(&json!({"device": "AAA"})).unwrap();
        assert_eq!(plan.max_output_bytes, config.limits.image_max_output_bytes);
        assert_eq!(plan.args, vec!["simctl", "io", "AAA", "screenshot", "--type=png", "-"]);
    }

    #[test]
    fn test_device_cannot_be_a_flag() {
        let cap = capability("screenshot");
        assert!(cap.input_schema.validate(&json!({"device": "--help"})).is_err());
        assert!(cap.input_schema.validate(&json!({"device": ""})).is_err());
        assert!(cap
            .input_schema
            .validate(&json!({"device": "8A1C2F4E-0B6D-4E52-9F3A-1D2C3B4A5E6F"}))
            .is_ok());
    }
}
