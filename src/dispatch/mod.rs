//! Dispatch Engine: turns one [`CallRequest`] into exactly one terminal
//! [`Completion`].
//!
//! Each call walks `Received -> Validated -> Executing -> Normalizing ->
//! Completed`, short-circuiting to `Completed` with an [`ErrorEnvelope`] at
//! the first failing stage. Calls share nothing but the read-only
//! [`ActiveProfile`] and the adapter handle, so the engine is `Clone` and
//! takes no locks.

pub mod error;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::capabilities::{ActiveProfile, CapabilityDescriptor};
use crate::execution::ExecutionAdapter;
use crate::normalize::NormalizeError;

pub use error::{ErrorEnvelope, ErrorKind, RequestId};

/// Extra time granted to the adapter past the plan's own deadline before the
/// engine abandons it.
pub const DEFAULT_BACKSTOP_GRACE: Duration = Duration::from_secs(5);

/// One inbound invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub capability_name: String,
    pub arguments: Value,
    pub request_id: Option<RequestId>,
}

impl CallRequest {
    pub fn new(capability_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            capability_name: capability_name.into(),
            arguments,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<RequestId>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Stage of a call's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallState {
    Received,
    Validated,
    Executing,
    Normalizing,
    Completed,
}

/// Terminal outcome of a call: a result or an error, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Result(Value),
    Error(ErrorEnvelope),
}

#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub request_id: Option<RequestId>,
    pub capability_name: String,
    pub completion: Completion,
    /// States visited, in order; always ends with `Completed`.
    pub trail: Vec<CallState>,
    pub elapsed: Duration,
}

impl CallOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self.completion, Completion::Error(_))
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.completion {
            Completion::Result(value) => Some(value),
            Completion::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorEnvelope> {
        match &self.completion {
            Completion::Result(_) => None,
            Completion::Error(envelope) => Some(envelope),
        }
    }

    pub fn into_result(self) -> Result<Value, ErrorEnvelope> {
        match self.completion {
            Completion::Result(value) => Ok(value),
            Completion::Error(envelope) => Err(envelope),
        }
    }
}

struct Failure {
    kind: ErrorKind,
    message: String,
}

fn fail(kind: ErrorKind, message: impl Into<String>) -> Failure {
    Failure {
        kind,
        message: message.into(),
    }
}

/// Routes calls to the capabilities of one active profile.
#[derive(Clone)]
pub struct DispatchEngine {
    profile: Arc<ActiveProfile>,
    adapter: Arc<dyn ExecutionAdapter>,
    backstop_grace: Duration,
}

impl DispatchEngine {
    pub fn new(profile: ActiveProfile, adapter: Arc<dyn ExecutionAdapter>) -> Self {
        Self {
            profile: Arc::new(profile),
            adapter,
            backstop_grace: DEFAULT_BACKSTOP_GRACE,
        }
    }

    pub fn with_backstop_grace(mut self, grace: Duration) -> Self {
        self.backstop_grace = grace;
        self
    }

    pub fn profile(&self) -> &ActiveProfile {
        &self.profile
    }

    /// Descriptors of every capability visible to callers.
    pub fn discover(&self) -> &[CapabilityDescriptor] {
        self.profile.list()
    }

    /// Run one call to completion. Never panics and never returns without a
    /// terminal outcome.
    pub async fn dispatch(&self, request: CallRequest) -> CallOutcome {
        let started = Instant::now();
        let mut trail = vec![CallState::Received];
        let completion = match self.execute(&request, &mut trail).await {
            Ok(value) => Completion::Result(value),
            Err(failure) => Completion::Error(ErrorEnvelope::new(
                failure.kind,
                failure.message,
                request.capability_name.clone(),
                request.request_id.clone(),
            )),
        };
        trail.push(CallState::Completed);

        let elapsed = started.elapsed();
        match &completion {
            Completion::Result(_) => debug!(
                capability = %request.capability_name,
                elapsed_ms = elapsed.as_millis() as u64,
                "call completed"
            ),
            Completion::Error(envelope) => debug!(
                capability = %request.capability_name,
                kind = %envelope.kind,
                elapsed_ms = elapsed.as_millis() as u64,
                "call failed"
            ),
        }
        CallOutcome {
            request_id: request.request_id,
            capability_name: request.capability_name,
            completion,
            trail,
            elapsed,
        }
    }

    async fn execute(&self, request: &CallRequest, trail: &mut Vec<CallState>) -> Result<Value, Failure> {
        let name = request.capability_name.as_str();
        let capability = self.profile.resolve(name).cloned().ok_or_else(|| {
            fail(ErrorKind::UnknownCapability, format!("unknown capability '{}'", name))
        })?;

        let arguments = match &request.arguments {
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        };
        capability
            .input_schema
            .validate(&arguments)
            .map_err(|e| fail(ErrorKind::InvalidArguments, e.to_string()))?;
        trail.push(CallState::Validated);

        let plan = match panic::catch_unwind(AssertUnwindSafe(|| capability.plan(&arguments))) {
            Ok(Ok(plan)) => plan,
            Ok(Err(e)) => return Err(fail(ErrorKind::InvalidArguments, e.to_string())),
            Err(_) => {
                error!(capability = name, "planner panicked");
                return Err(fail(ErrorKind::ExecutionStartFailed, "capability could not build its action"));
            }
        };
        trail.push(CallState::Executing);

        let deadline = plan.timeout();
        let run = AssertUnwindSafe(self.adapter.run(plan)).catch_unwind();
        let raw = match tokio::time::timeout(deadline + self.backstop_grace, run).await {
            Ok(Ok(Ok(raw))) => raw,
            Ok(Ok(Err(e))) => {
                error!(capability = name, adapter = self.adapter.name(), error = %e, "action failed to start");
                return Err(fail(ErrorKind::ExecutionStartFailed, e.to_string()));
            }
            Ok(Err(_)) => {
                error!(capability = name, adapter = self.adapter.name(), "execution adapter panicked");
                return Err(fail(ErrorKind::ExecutionStartFailed, "execution adapter panicked"));
            }
            Err(_) => {
                error!(capability = name, deadline = ?deadline, "adapter overran its deadline, abandoning");
                return Err(fail(
                    ErrorKind::TimedOut,
                    format!("no result within the {:?} deadline", deadline),
                ));
            }
        };
        if raw.timed_out() {
            return Err(fail(
                ErrorKind::TimedOut,
                format!("action killed after the {:?} deadline", deadline),
            ));
        }
        trail.push(CallState::Normalizing);

        match panic::catch_unwind(AssertUnwindSafe(|| capability.normalize(&raw, &arguments))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e @ NormalizeError::ToolFailed { .. })) => Err(fail(ErrorKind::ToolFailed, e.to_string())),
            Ok(Err(NormalizeError::Malformed(message))) => {
                warn!(
                    capability = name,
                    stdout_bytes = raw.stdout.len(),
                    truncated = raw.stdout_truncated,
                    "output not recognized: {}",
                    message
                );
                Err(fail(ErrorKind::NormalizationFailed, message))
            }
            Err(_) => {
                error!(capability = name, "normalizer panicked");
                Err(fail(ErrorKind::NormalizationFailed, "normalizer panicked on this output"))
            }
        }
    }
}
