//! # xcprobe
//!
//! A local tool-invocation server that lets a coding agent drive native
//! developer tooling (project inspection, performance tracing, simulator and
//! UI automation) through a small, schema-described capability surface.
//!
//! ## Architecture
//!
//! - [`transport`] delivers whole JSON messages (newline-delimited on stdio).
//! - [`server`] maps JSON-RPC methods onto the dispatch engine.
//! - [`dispatch`] validates, plans, executes and normalizes each call.
//! - [`capabilities`] holds the registry and its "minimal"/"full" profiles.
//! - [`catalog`] defines the built-in capabilities.
//! - [`execution`] runs external actions under deadlines and output caps.
//! - [`normalize`] shares the building blocks of per-capability parsers.
//! - [`config`] loads YAML configuration.

pub mod capabilities;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod execution;
pub mod normalize;
pub mod server;
pub mod transport;

pub use capabilities::{ActiveProfile, Capability, CapabilityRegistry, ProfileId};
pub use config::ServerConfig;
pub use dispatch::{CallOutcome, CallRequest, DispatchEngine, ErrorEnvelope, ErrorKind};
pub use execution::{ExecutionAdapter, ExecutionPlan, ProcessAdapter, RawResult};
pub use server::Server;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
