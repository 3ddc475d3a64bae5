use serde_json::Value;
use std::fmt;

/// Where an error originated inside a single query's wrapper pipeline.
///
/// Carried alongside every runtime error variant so the `[queryName - service:action]`
/// prefix (§7) can be rendered exactly once, at the innermost boundary that first
/// attaches it.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub query_name: Option<String>,
    pub service_name: Option<String>,
    pub action: Option<String>,
    pub args: Option<Value>,
}

impl ErrorContext {
    pub fn new(query_name: impl Into<String>, service_name: impl Into<String>, action: impl Into<String>) -> Self {
        ErrorContext {
            query_name: Some(query_name.into()),
            service_name: Some(service_name.into()),
            action: Some(action.into()),
            args: None,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = Some(args);
        self
    }

    /// Fill in fields that are not already set. Used so that an error bubbling
    /// up through nested service wrappers keeps attribution to the *innermost*
    /// service (§7: "nested service wrappers do not rewrite this attribution
    /// once set").
    fn fill_missing(&mut self, other: &ErrorContext) {
        if self.query_name.is_none() {
            self.query_name = other.query_name.clone();
        }
        if self.service_name.is_none() {
            self.service_name = other.service_name.clone();
        }
        if self.action.is_none() {
            self.action = other.action.clone();
        }
        if self.args.is_none() {
            self.args = other.args.clone();
        }
    }

    fn prefix(&self) -> Option<String> {
        match (&self.query_name, &self.service_name, &self.action) {
            (Some(q), Some(s), Some(a)) => Some(format!("[{q} - {s}:{a}]")),
            _ => None,
        }
    }
}

/// The closed error taxonomy for MicroQL (§7).
#[derive(Debug, thiserror::Error)]
pub enum MicroQlError {
    /// Errors detected while compiling a config: missing service/action,
    /// circular dependency, invalid reference, raw-callable argument, etc.
    #[error("{message}")]
    Compile { message: String },

    /// A `_validators` precheck/postcheck failure.
    #[error("{ctx_prefix}Validation failed: {message}")]
    Validation {
        message: String,
        ctx: ErrorContext,
        ctx_prefix: DisplayPrefix,
    },

    /// The inner call exceeded its configured timeout budget.
    #[error("{ctx_prefix}Timed out after {millis}ms")]
    Timeout { millis: u64, ctx: ErrorContext, ctx_prefix: DisplayPrefix },

    /// A service action returned an error.
    #[error("{ctx_prefix}{message}")]
    Service { message: String, ctx: ErrorContext, ctx_prefix: DisplayPrefix },

    /// An `onError` handler itself threw.
    #[error("{ctx_prefix}handler error: {message}")]
    Handler { message: String, ctx: ErrorContext, ctx_prefix: DisplayPrefix },

    /// An internal scheduler invariant was violated (e.g. an unknown `select` name).
    #[error("{message}")]
    Scheduler { message: String },
}

/// Helper newtype so `#[error(...)]` can format the context prefix inline
/// without re-deriving Display logic per variant.
#[derive(Debug, Default, Clone)]
pub struct DisplayPrefix(pub Option<String>);

impl fmt::Display for DisplayPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(p) => write!(f, "{p} "),
            None => Ok(()),
        }
    }
}

impl MicroQlError {
    pub fn compile(message: impl Into<String>) -> Self {
        MicroQlError::Compile { message: message.into() }
    }

    pub fn service(message: impl Into<String>) -> Self {
        MicroQlError::Service {
            message: message.into(),
            ctx: ErrorContext::default(),
            ctx_prefix: DisplayPrefix::default(),
        }
    }

    pub fn timeout(millis: u64) -> Self {
        MicroQlError::Timeout { millis, ctx: ErrorContext::default(), ctx_prefix: DisplayPrefix::default() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        MicroQlError::Validation {
            message: message.into(),
            ctx: ErrorContext::default(),
            ctx_prefix: DisplayPrefix::default(),
        }
    }

    pub fn handler(message: impl Into<String>) -> Self {
        MicroQlError::Handler {
            message: message.into(),
            ctx: ErrorContext::default(),
            ctx_prefix: DisplayPrefix::default(),
        }
    }

    pub fn scheduler(message: impl Into<String>) -> Self {
        MicroQlError::Scheduler { message: message.into() }
    }

    /// Attach `[queryName - service:action]` context, but only where a field
    /// isn't already set — the first (innermost) wrapper to attribute the
    /// error wins, per §7.
    pub fn attribute(mut self, new_ctx: ErrorContext) -> Self {
        if let Some(ctx) = self.ctx_mut() {
            ctx.fill_missing(&new_ctx);
            let prefix = ctx.prefix();
            if let Some(p) = self.prefix_mut() {
                *p = DisplayPrefix(prefix);
            }
        }
        self
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            MicroQlError::Validation { ctx, .. }
            | MicroQlError::Timeout { ctx, .. }
            | MicroQlError::Service { ctx, .. }
            | MicroQlError::Handler { ctx, .. } => Some(ctx),
            _ => None,
        }
    }

    fn ctx_mut(&mut self) -> Option<&mut ErrorContext> {
        match self {
            MicroQlError::Validation { ctx, .. }
            | MicroQlError::Timeout { ctx, .. }
            | MicroQlError::Service { ctx, .. }
            | MicroQlError::Handler { ctx, .. } => Some(ctx),
            _ => None,
        }
    }

    fn prefix_mut(&mut self) -> Option<&mut DisplayPrefix> {
        match self {
            MicroQlError::Validation { ctx_prefix, .. }
            | MicroQlError::Timeout { ctx_prefix, .. }
            | MicroQlError::Service { ctx_prefix, .. }
            | MicroQlError::Handler { ctx_prefix, .. } => Some(ctx_prefix),
            _ => None,
        }
    }

    pub fn is_compile(&self) -> bool {
        matches!(self, MicroQlError::Compile { .. })
    }

    /// Render this error as the JSON value pushed onto the context stack for
    /// an `onError` handler to see via `@`/`@@` (§8 scenario 6).
    pub fn to_context_value(&self) -> Value {
        let ctx = self.context();
        serde_json::json!({
            "message": self.to_string(),
            "queryName": ctx.and_then(|c| c.query_name.clone()),
            "serviceName": ctx.and_then(|c| c.service_name.clone()),
            "action": ctx.and_then(|c| c.action.clone()),
        })
    }
}

pub type MicroQlResult<T> = Result<T, MicroQlError>;
