//! Capability definition: a named unit pairing an input schema, a plan
//! builder and an output normalizer.
//!
//! Capabilities are built in code by the catalog and handed to the
//! `CapabilityRegistry`, which owns them for the rest of the process.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::schema::InputSchema;
use crate::execution::{ExecutionPlan, RawResult};
use crate::normalize::NormalizeError;

/// Builds the execution plan for validated arguments.
pub type PlanFn = Arc<dyn Fn(&Value) -> Result<ExecutionPlan, PlanError> + Send + Sync>;

/// Turns a raw result into a success payload or a typed failure. Receives
/// the call arguments too, for filters and echoes. Must be pure.
pub type NormalizeFn =
    Arc<dyn Fn(&RawResult, &Value) -> Result<Value, NormalizeError> + Send + Sync>;

/// Arguments passed schema validation but cannot form a plan
/// (e.g. mutually exclusive options both set).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PlanError(pub String);

/// Task category a capability serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    ProjectInspection,
    Performance,
    UiAutomation,
}

/// What discovery reports for one capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A registered capability. Immutable once built.
#[derive(Clone)]
pub struct Capability {
    pub name: String,
    pub description: String,
    pub category: Category,
    pub input_schema: InputSchema,
    planner: PlanFn,
    normalizer: NormalizeFn,
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("args", &self.input_schema.args().len())
            .finish()
    }
}

impl Capability {
    pub fn new<P, N>(
        name: impl Into<String>,
        description: impl Into<String>,
        category: Category,
        input_schema: InputSchema,
        planner: P,
        normalizer: N,
    ) -> Self
    where
        P: Fn(&Value) -> Result<ExecutionPlan, PlanError> + Send + Sync + 'static,
        N: Fn(&RawResult, &Value) -> Result<Value, NormalizeError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            category,
            input_schema,
            planner: Arc::new(planner),
            normalizer: Arc::new(normalizer),
        }
    }

    /// Build the plan for one call.
    pub fn plan(&self, args: &Value) -> Result<ExecutionPlan, PlanError> {
        (self.planner)(args)
    }

    /// Normalize the raw outcome of one call.
    pub fn normalize(&self, raw: &RawResult, args: &Value) -> Result<Value, NormalizeError> {
        (self.normalizer)(raw, args)
    }

    pub fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.to_json_schema(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::schema::ArgSchema;
    use serde_json::json;

    fn echo() -> Capability {
        Capability::new(
            "echo",
            "Echo a word",
            Category::ProjectInspection,
            InputSchema::new(vec![ArgSchema::string("word", "Word to echo").required()]).unwrap(),
            |args| {
                let word = args["word"].as_str().unwrap_or_default();
                Ok(ExecutionPlan::new("echo").arg(word))
            },
            |raw, _| Ok(json!({ "echoed": raw.stdout_lossy().trim() })),
        )
    }

    #[test]
    fn test_plan_and_normalize() {
        let cap = echo();
        let plan = cap.plan(&json!({"word": "hi"})).unwrap();
        assert_eq!(plan.command_line(), "echo hi");

        let payload = cap.normalize(&RawResult::exited(0, "hi\n", ""), &json!({})).unwrap();
        assert_eq!(payload, json!({"echoed": "hi"}));
    }

    #[test]
    fn test_descriptor() {
        let descriptor = echo().descriptor();
        assert_eq!(descriptor.name, "echo");
        assert_eq!(descriptor.input_schema["required"], json!(["word"]));

        let rendered = serde_json::to_value(&descriptor).unwrap();
        assert!(rendered.get("inputSchema").is_some());
    }
}
