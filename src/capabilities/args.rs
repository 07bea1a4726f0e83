//! Typed read access to already-validated call arguments.

use serde_json::Value;

use super::capability::PlanError;

/// View over a call's argument object. Missing and `null` members read as
/// absent.
#[derive(Debug, Clone, Copy)]
pub struct Args<'a>(&'a Value);

impl<'a> Args<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self(value)
    }

    fn get(&self, name: &str) -> Option<&'a Value> {
        self.0.get(name).filter(|v| !v.is_null())
    }

    pub fn str(&self, name: &str) -> Option<&'a str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn required_str(&self, name: &str) -> Result<&'a str, PlanError> {
        self.str(name)
            .ok_or_else(|| PlanError(format!("missing required argument '{}'", name)))
    }

    pub fn u64(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(Value::as_u64)
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn required_f64(&self, name: &str) -> Result<f64, PlanError> {
        self.f64(name)
            .ok_or_else(|| PlanError(format!("missing required argument '{}'", name)))
    }

    pub fn bool_or(&self, name: &str, default: bool) -> bool {
        self.get(name).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn strings(&self, name: &str) -> Vec<&'a str> {
        self.get(name)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}
