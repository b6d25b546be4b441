//! Template Runtime (C9, spec.md §4.8).
//!
//! A named script is a list of tool calls with defaults; invoking it
//! sequentially dispatches those calls against the shared pool through the
//! same [`Dispatcher`] every other tool call goes through.

use std::collections::HashMap;

use serde_json::Value;

use crate::registry::{Dispatcher, Envelope};

#[derive(Debug, Clone)]
pub struct TemplateStep {
    pub tool: String,
    pub args: Value,
}

impl TemplateStep {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        TemplateStep {
            tool: tool.into(),
            args,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    pub description: String,
    pub steps: Vec<TemplateStep>,
}

/// Registry of named educational templates. Content (which scripts exist,
/// what they draw) is an external collaborator's concern (spec.md §1); this
/// crate only provides the mechanism to register and run one.
#[derive(Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, Template>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        TemplateRegistry::default()
    }

    pub fn register(&mut self, template: Template) {
        self.templates.insert(template.name.clone(), template);
    }

    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Dispatches every step in order, always running the full sequence:
    /// a step reporting `success:false` is recorded and execution continues,
    /// since spec.md does not define early-abort semantics for templates
    /// (see DESIGN.md).
    pub async fn run(&self, name: &str, dispatcher: &Dispatcher) -> Option<Vec<Envelope>> {
        let template = self.templates.get(name)?;
        let mut results = Vec::with_capacity(template.steps.len());
        for step in &template.steps {
            let envelope = dispatcher.call(&step.tool, step.args.clone()).await;
            results.push(envelope);
        }
        Some(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::driver::fake::FakeDriver;
    use crate::driver::{DriverFactory, InstanceDriver};
    use crate::domain::InstanceConfig;
    use crate::error::GgbResult;
    use crate::metrics::PerformanceMonitor;
    use crate::pool::Pool;
    use crate::registry::{
        HandlerContext, HandlerOutcome, ParamKind, ParamSchema, Registry, ToolHandler, ToolSchema,
    };
    use async_trait::async_trait;
    use std::sync::Arc;

    struct FakeFactory;

    #[async_trait]
    impl DriverFactory for FakeFactory {
        async fn create(&self, _config: &InstanceConfig) -> GgbResult<Box<dyn InstanceDriver>> {
            Ok(Box::new(FakeDriver::new()))
        }
    }

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        fn description(&self) -> &'static str {
            "echo"
        }
        fn schema(&self) -> ToolSchema {
            ToolSchema::new(vec![ParamSchema::required("message", ParamKind::String)])
        }
        fn needs_instance(&self) -> bool {
            false
        }
        async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
            let mut data = serde_json::Map::new();
            data.insert("message".to_string(), ctx.args["message"].clone());
            Ok(HandlerOutcome::success(data))
        }
    }

    fn build_dispatcher() -> Dispatcher {
        let pool = Pool::new(ServiceConfig::default(), Box::new(FakeFactory));
        let monitor = Arc::new(PerformanceMonitor::new());
        let mut registry = Registry::new();
        registry.register("echo", Arc::new(EchoHandler));
        Dispatcher::new(registry, pool, monitor, "ffmpeg")
    }

    #[tokio::test]
    async fn runs_every_step_in_order() {
        let dispatcher = build_dispatcher();
        let mut templates = TemplateRegistry::new();
        templates.register(Template {
            name: "greet_twice".to_string(),
            description: "says hi twice".to_string(),
            steps: vec![
                TemplateStep::new("echo", serde_json::json!({"message": "hi"})),
                TemplateStep::new("echo", serde_json::json!({"message": "there"})),
            ],
        });

        let results = templates.run("greet_twice", &dispatcher).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].data["message"], "hi");
        assert_eq!(results[1].data["message"], "there");
    }

    #[tokio::test]
    async fn unknown_template_returns_none() {
        let dispatcher = build_dispatcher();
        let templates = TemplateRegistry::new();
        assert!(templates.run("nope", &dispatcher).await.is_none());
    }
}
