//! Compiler, reference resolver, and wrapper pipeline for MicroQL.
//!
//! This crate turns a `Config` document into a `Plan` — a dependency-waved
//! tree of compiled nodes ready for a scheduler to drive — and supplies the
//! `Service` trait that callable units implement.

pub mod compile;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod node;
pub mod resolve;
pub mod results;
pub mod service;
pub mod settings;
pub mod snapshot;
pub mod validate;
pub mod value;
pub mod wrap;

pub use compile::{compile, Plan, ServiceRegistry};
pub use config::{Config, Select};
pub use context::ContextStack;
pub use error::{MicroQlError, MicroQlResult};
pub use node::{AliasNode, BoundCallable, ChainNode, FunctionArg, Invokable, Node, NodeKind, ServiceNode};
pub use results::ResultsMap;
pub use service::{args_to_json, ArgType, ArgValue, Args, Service, Validators};
pub use settings::{CallSettings, GlobalSettings};
pub use snapshot::Snapshot;
