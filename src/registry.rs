//! Tool Registry & Dispatcher (C6, spec.md §4.5).
//!
//! Grounded in the `ToolHandler`-trait pattern observed in the retrieved
//! `Amari-mcp` MCP server source (`async_trait`, `handle(args, extra) ->
//! Result<Value, Error>`): this crate defines its own trait rather than
//! depending on that crate's transport, since framing is out of scope here.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::domain::InstanceId;
use crate::error::{ErrorKind, GgbError, GgbResult};
use crate::metrics::PerformanceMonitor;
use crate::pool::Pool;

/// One named, typed argument a tool accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParamKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Number => value.is_number(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
            ParamKind::Any => true,
        }
    }

    fn schema_type(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Number => "number",
            ParamKind::Integer => "integer",
            ParamKind::Boolean => "boolean",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
            ParamKind::Any => "any",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamSchema {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamSchema {
    pub const fn required(name: &'static str, kind: ParamKind) -> Self {
        ParamSchema {
            name,
            kind,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, kind: ParamKind) -> Self {
        ParamSchema {
            name,
            kind,
            required: false,
        }
    }
}

/// A JSON-Schema-like shape: types, required fields (spec.md §4.5).
#[derive(Debug, Clone, Default)]
pub struct ToolSchema {
    pub params: Vec<ParamSchema>,
}

impl ToolSchema {
    pub fn new(params: Vec<ParamSchema>) -> Self {
        ToolSchema { params }
    }

    /// Every violation found, empty if `args` satisfies the schema.
    pub fn validate(&self, args: &Value) -> Vec<String> {
        let mut violations = Vec::new();
        let obj = match args.as_object() {
            Some(obj) => obj,
            None => {
                violations.push("arguments must be a JSON object".to_string());
                return violations;
            }
        };
        for param in &self.params {
            match obj.get(param.name) {
                None => {
                    if param.required {
                        violations.push(format!("missing required field '{}'", param.name));
                    }
                }
                Some(value) => {
                    if !param.kind.matches(value) {
                        violations.push(format!(
                            "field '{}' must be of type {}",
                            param.name,
                            param.kind.schema_type()
                        ));
                    }
                }
            }
        }
        violations
    }

    /// Renders the schema as a JSON-Schema-ish object for `tools/list`.
    pub fn to_json(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.params {
            properties.insert(
                param.name.to_string(),
                serde_json::json!({ "type": param.kind.schema_type() }),
            );
            if param.required {
                required.push(Value::String(param.name.to_string()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": Value::Object(properties),
            "required": required,
        })
    }
}

/// What `tools/list` reports for one registered tool (spec.md §6.1).
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// What a handler returns before the Dispatcher wraps it as a full
/// [`Envelope`]. `success = false` here is the DSL-level "not success" case
/// (spec.md §7 `COMMAND_FAILED`) — not an error return.
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    pub success: bool,
    pub command: Option<String>,
    pub data: Map<String, Value>,
}

impl HandlerOutcome {
    pub fn success(data: Map<String, Value>) -> Self {
        HandlerOutcome {
            success: true,
            command: None,
            data,
        }
    }

    pub fn success_with_command(command: impl Into<String>, data: Map<String, Value>) -> Self {
        HandlerOutcome {
            success: true,
            command: Some(command.into()),
            data,
        }
    }

    pub fn failure(command: impl Into<String>, data: Map<String, Value>) -> Self {
        HandlerOutcome {
            success: false,
            command: Some(command.into()),
            data,
        }
    }
}

/// Everything a handler needs: the pool (to reach its acquired driver), the
/// performance monitor (for tools that query stats directly), the already
/// acquired instance (when `needs_instance()` is true), and the raw
/// arguments.
pub struct HandlerContext<'a> {
    pub pool: &'a Pool,
    pub monitor: &'a PerformanceMonitor,
    pub instance: Option<InstanceId>,
    pub args: Value,
    /// Path to the `ffmpeg` binary (§6.5 `FFMPEG_PATH`), handed down for the
    /// one handler (`geogebra_export_animation`) that drives C7 directly.
    pub ffmpeg_path: &'a str,
}

impl<'a> HandlerContext<'a> {
    /// The acquired instance id, or `INTERNAL_ERROR` if a handler that
    /// declared `needs_instance()` was somehow called without one.
    pub fn instance_id(&self) -> GgbResult<InstanceId> {
        self.instance
            .ok_or_else(|| GgbError::Internal("handler requires an instance but none was acquired".to_string()))
    }
}

/// One entry in the tool catalogue (spec.md §6.2).
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn description(&self) -> &'static str;
    fn schema(&self) -> ToolSchema;

    /// Whether the dispatcher must acquire a driver from the pool before
    /// calling `handle`. `false` for liveness/meta and performance-reporting
    /// tools that only touch the pool/monitor directly.
    fn needs_instance(&self) -> bool {
        true
    }

    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome>;
}

struct RegisteredTool {
    handler: Arc<dyn ToolHandler>,
}

/// Name → `{schema, handler}` map (spec.md §4.5).
#[derive(Default)]
pub struct Registry {
    tools: HashMap<&'static str, RegisteredTool>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn register(&mut self, name: &'static str, handler: Arc<dyn ToolHandler>) {
        self.tools.insert(name, RegisteredTool { handler });
    }

    pub fn list(&self) -> Vec<ToolDescriptor> {
        let mut tools: Vec<ToolDescriptor> = self
            .tools
            .iter()
            .map(|(name, entry)| ToolDescriptor {
                name,
                description: entry.handler.description(),
                input_schema: entry.handler.schema().to_json(),
            })
            .collect();
        tools.sort_by_key(|t| t.name);
        tools
    }
}

/// The uniform result shape every tool call returns (spec.md §6.4).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

fn error_code(kind: ErrorKind) -> String {
    serde_json::to_value(kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "INTERNAL_ERROR".to_string())
}

impl Envelope {
    fn from_outcome(outcome: HandlerOutcome) -> Self {
        let error = if outcome.success {
            None
        } else {
            Some(ErrorPayload {
                code: error_code(ErrorKind::CommandFailed),
                message: "command did not succeed".to_string(),
                context: None,
            })
        };
        Envelope {
            success: outcome.success,
            command: outcome.command,
            error,
            data: outcome.data,
        }
    }

    fn from_error(err: &GgbError) -> Self {
        Envelope {
            success: false,
            command: None,
            error: Some(ErrorPayload {
                code: error_code(err.kind()),
                message: err.to_string(),
                context: err.hint().map(|hint| Value::String(hint.to_string())),
            }),
            data: Map::new(),
        }
    }

    fn tool_not_found(name: &str) -> Self {
        Self::from_error(&GgbError::ToolNotFound(name.to_string()))
    }

    fn invalid_arguments(violations: Vec<String>) -> Self {
        Self::from_error(&GgbError::InvalidToolArguments(violations))
    }

    /// Wraps as the MCP `tools/call` content block (spec.md §6.1).
    pub fn into_mcp_content(self) -> Value {
        let is_error = !self.success;
        let text = serde_json::to_string(&self).unwrap_or_else(|_| "{}".to_string());
        serde_json::json!({
            "content": [{ "type": "text", "text": text }],
            "isError": is_error,
        })
    }
}

/// Executes the dispatch sequence (spec.md §4.5, steps 1-5).
pub struct Dispatcher {
    registry: Registry,
    pool: Arc<Pool>,
    monitor: Arc<PerformanceMonitor>,
    ffmpeg_path: String,
}

impl Dispatcher {
    pub fn new(
        registry: Registry,
        pool: Arc<Pool>,
        monitor: Arc<PerformanceMonitor>,
        ffmpeg_path: impl Into<String>,
    ) -> Self {
        Dispatcher {
            registry,
            pool,
            monitor,
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.registry.list()
    }

    pub async fn call(&self, name: &str, args: Value) -> Envelope {
        let Some(entry) = self.registry.tools.get(name) else {
            return Envelope::tool_not_found(name);
        };

        let schema = entry.handler.schema();
        let violations = schema.validate(&args);
        if !violations.is_empty() {
            return Envelope::invalid_arguments(violations);
        }

        let instance = if entry.handler.needs_instance() {
            match self.pool.acquire().await {
                Ok(acquired) => Some(acquired.id),
                Err(err) => return Envelope::from_error(&err),
            }
        } else {
            None
        };

        let metadata = serde_json::json!({ "tool": name });
        let handler = Arc::clone(&entry.handler);
        let ctx = HandlerContext {
            pool: &self.pool,
            monitor: &self.monitor,
            instance,
            args: args.clone(),
            ffmpeg_path: &self.ffmpeg_path,
        };
        let result = self
            .monitor
            .measure(name, metadata, handler.handle(ctx))
            .await;

        if let Some(id) = instance {
            self.pool.release(id).await;
        }

        // Unlike a generic exception boundary, errors are not blanket-wrapped
        // here: the driver layer already folds transport faults into
        // `ToolExecutionError` (spec.md §7), so whatever kind a handler
        // returns — `VALIDATION_ERROR`, `INSTANCE_NOT_READY`, etc. — is the
        // one the caller should see.
        match result {
            Ok(outcome) => Envelope::from_outcome(outcome),
            Err(err) => Envelope::from_error(&err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::driver::fake::FakeDriver;
    use crate::driver::{DriverFactory, InstanceDriver};
    use crate::domain::InstanceConfig;

    struct FakeFactory;

    #[async_trait]
    impl DriverFactory for FakeFactory {
        async fn create(&self, _config: &InstanceConfig) -> GgbResult<Box<dyn InstanceDriver>> {
            Ok(Box::new(FakeDriver::new()))
        }
    }

    struct PingHandler;

    #[async_trait]
    impl ToolHandler for PingHandler {
        fn description(&self) -> &'static str {
            "liveness check"
        }
        fn schema(&self) -> ToolSchema {
            ToolSchema::default()
        }
        fn needs_instance(&self) -> bool {
            false
        }
        async fn handle(&self, _ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
            let mut data = Map::new();
            data.insert("pong".to_string(), Value::Bool(true));
            Ok(HandlerOutcome::success(data))
        }
    }

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        fn description(&self) -> &'static str {
            "echoes its argument"
        }
        fn schema(&self) -> ToolSchema {
            ToolSchema::new(vec![ParamSchema::required("message", ParamKind::String)])
        }
        fn needs_instance(&self) -> bool {
            false
        }
        async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
            let mut data = Map::new();
            data.insert("message".to_string(), ctx.args["message"].clone());
            Ok(HandlerOutcome::success(data))
        }
    }

    struct CreatePointHandler;

    #[async_trait]
    impl ToolHandler for CreatePointHandler {
        fn description(&self) -> &'static str {
            "creates a point"
        }
        fn schema(&self) -> ToolSchema {
            ToolSchema::new(vec![
                ParamSchema::required("name", ParamKind::String),
                ParamSchema::required("x", ParamKind::Number),
                ParamSchema::required("y", ParamKind::Number),
            ])
        }
        async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
            let id = ctx.instance_id()?;
            let name = ctx.args["name"].as_str().unwrap_or_default().to_string();
            let x = ctx.args["x"].as_f64().unwrap_or_default();
            let y = ctx.args["y"].as_f64().unwrap_or_default();
            let cmd = crate::translator::point(&name, x, y, None)
                .remove(0)
                .0;
            let outcome = ctx
                .pool
                .with_driver(id, |driver| {
                    let cmd = cmd.clone();
                    Box::pin(async move { driver.eval_command(&cmd).await })
                })
                .await?;
            Ok(HandlerOutcome {
                success: outcome.success,
                command: Some(cmd),
                data: Map::new(),
            })
        }
    }

    fn build_dispatcher() -> Dispatcher {
        let pool = Pool::new(ServiceConfig::default(), Box::new(FakeFactory));
        let monitor = Arc::new(PerformanceMonitor::new());
        let mut registry = Registry::new();
        registry.register("ping", Arc::new(PingHandler));
        registry.register("echo", Arc::new(EchoHandler));
        registry.register("geogebra_create_point", Arc::new(CreatePointHandler));
        Dispatcher::new(registry, pool, monitor, "ffmpeg")
    }

    #[tokio::test]
    async fn unknown_tool_reports_tool_not_found() {
        let dispatcher = build_dispatcher();
        let envelope = dispatcher.call("does_not_exist", Value::Null).await;
        assert!(!envelope.success);
        assert_eq!(envelope.error.unwrap().code, "TOOL_NOT_FOUND");
    }

    #[tokio::test]
    async fn missing_required_argument_reports_invalid_arguments() {
        let dispatcher = build_dispatcher();
        let envelope = dispatcher.call("echo", serde_json::json!({})).await;
        assert!(!envelope.success);
        assert_eq!(envelope.error.unwrap().code, "INVALID_TOOL_ARGUMENTS");
    }

    #[tokio::test]
    async fn ping_does_not_touch_the_pool() {
        let dispatcher = build_dispatcher();
        let envelope = dispatcher.call("ping", serde_json::json!({})).await;
        assert!(envelope.success);
        assert_eq!(envelope.data.get("pong").unwrap(), &Value::Bool(true));
    }

    #[tokio::test]
    async fn create_point_acquires_and_releases_an_instance() {
        let dispatcher = build_dispatcher();
        let envelope = dispatcher
            .call(
                "geogebra_create_point",
                serde_json::json!({"name": "A", "x": 1.0, "y": 2.0}),
            )
            .await;
        assert!(envelope.success);
        assert_eq!(dispatcher.pool.stats().await.active, 0);
    }

    #[tokio::test]
    async fn list_tools_is_sorted_by_name() {
        let dispatcher = build_dispatcher();
        let names: Vec<&str> = dispatcher.list_tools().iter().map(|t| t.name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
