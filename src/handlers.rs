//! Tool handlers: one [`ToolHandler`] per entry in the tool catalogue
//! (spec.md §6.2). Each handler turns its JSON arguments into a translator
//! call (C3), runs the resulting commands against the acquired driver (C4),
//! and folds the outcome into a [`HandlerOutcome`]. Schema/type checking
//! happens in the dispatcher (C6) before `handle` ever runs; what's
//! validated here is the DSL-specific stuff only C1 knows about (expression
//! safety, color/thickness/range bounds).

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::domain::{AnimationArtifact, Command, InstanceId, ObjectKind};
use crate::driver::{capture_animation, AnimationRequest, CancellationToken, PngOptions};
use crate::encoder::{AnimationEncoder, EncodeRequest, OutputFormat};
use crate::error::{GgbError, GgbResult};
use crate::export::{self, ExportFormat, ExportMetadata, ViewSettings};
use crate::registry::{HandlerContext, HandlerOutcome, ParamKind, ParamSchema, Registry, ToolHandler, ToolSchema};
use crate::translator::{self, CircleSpec, SliderSpec, Styling};
use crate::validator::{self, ExpressionClass};

// ---------------------------------------------------------------------
// Argument extraction helpers. The dispatcher has already schema-checked
// required/typed fields by the time a handler runs, so these are for
// reading what schema validation confirmed is present, plus optional ones.
// ---------------------------------------------------------------------

fn req_str<'a>(args: &'a Value, key: &str) -> GgbResult<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| GgbError::Internal(format!("'{key}' missing after schema validation")))
}

fn req_f64(args: &Value, key: &str) -> GgbResult<f64> {
    args.get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| GgbError::Internal(format!("'{key}' missing after schema validation")))
}

fn req_vec_str(args: &Value, key: &str) -> GgbResult<Vec<String>> {
    args.get(key)
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .ok_or_else(|| GgbError::Internal(format!("'{key}' missing after schema validation")))
}

fn opt_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn opt_f64(args: &Value, key: &str) -> Option<f64> {
    args.get(key).and_then(Value::as_f64)
}

fn opt_u64(args: &Value, key: &str) -> Option<u64> {
    args.get(key).and_then(Value::as_u64)
}

fn opt_bool(args: &Value, key: &str) -> Option<bool> {
    args.get(key).and_then(Value::as_bool)
}

/// Builds and validates the shared `color`/`thickness`/`style` trio (spec.md
/// §4.1 "Styling" rules) present on most creation/plotting tools.
fn styling_from_args(args: &Value) -> GgbResult<Styling> {
    let color = match opt_str(args, "color") {
        Some(c) => {
            let outcome = validator::validate_color(c);
            if !outcome.valid {
                return Err(GgbError::Validation(outcome.reason.unwrap_or_default()));
            }
            Some(c.to_string())
        }
        None => None,
    };
    let thickness = match args.get("thickness").and_then(Value::as_i64) {
        Some(t) => {
            let outcome = validator::validate_thickness(t);
            if !outcome.valid {
                return Err(GgbError::Validation(outcome.reason.unwrap_or_default()));
            }
            Some(t as u8)
        }
        None => None,
    };
    let line_style = match opt_str(args, "style") {
        Some(s) => Some(validator::parse_line_style(s).map_err(|o| GgbError::Validation(o.reason.unwrap_or_default()))?),
        None => None,
    };
    Ok(Styling {
        color,
        thickness,
        line_style,
    })
}

static SYNTH_NAME_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Synthesizes a unique object name for tools whose name argument is
/// optional (spec.md §6.2 `geogebra_create_text`).
fn synth_name(prefix: &str) -> String {
    format!("{prefix}{}", SYNTH_NAME_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Runs an ordered list of DSL [`Command`]s against the acquired Instance,
/// stopping at the first that reports `success:false` (spec.md §5.3
/// ordering: a creation failure should not run its own styling
/// side-commands against a nonexistent object). The returned envelope's
/// `command` field is every attempted command joined with `; `.
async fn run_commands(
    ctx: &HandlerContext<'_>,
    id: InstanceId,
    commands: Vec<Command>,
) -> GgbResult<HandlerOutcome> {
    let joined = commands
        .iter()
        .map(|c| c.0.clone())
        .collect::<Vec<_>>()
        .join("; ");
    let mut success = true;
    for command in &commands {
        let text = command.0.clone();
        let outcome = ctx
            .pool
            .with_driver(id, |driver| {
                let text = text.clone();
                Box::pin(async move { driver.eval_command(&text).await })
            })
            .await?;
        if !outcome.success {
            success = false;
            break;
        }
    }
    Ok(HandlerOutcome {
        success,
        command: Some(joined),
        data: Map::new(),
    })
}

// ---------------------------------------------------------------------
// Liveness / meta
// ---------------------------------------------------------------------

struct PingHandler;

#[async_trait]
impl ToolHandler for PingHandler {
    fn description(&self) -> &'static str {
        "Liveness check."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::default()
    }
    fn needs_instance(&self) -> bool {
        false
    }
    async fn handle(&self, _ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let mut data = Map::new();
        data.insert("message".to_string(), Value::String("pong".to_string()));
        Ok(HandlerOutcome::success(data))
    }
}

struct EchoHandler;

#[async_trait]
impl ToolHandler for EchoHandler {
    fn description(&self) -> &'static str {
        "Echoes the given message back, prefixed with 'Echo: '."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![ParamSchema::required("message", ParamKind::String)])
    }
    fn needs_instance(&self) -> bool {
        false
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let message = req_str(&ctx.args, "message")?;
        let mut data = Map::new();
        data.insert(
            "message".to_string(),
            Value::String(format!("Echo: {message}")),
        );
        Ok(HandlerOutcome::success(data))
    }
}

struct ServerInfoHandler;

#[async_trait]
impl ToolHandler for ServerInfoHandler {
    fn description(&self) -> &'static str {
        "Reports service name, version, and pool capacity."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::default()
    }
    fn needs_instance(&self) -> bool {
        false
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let stats = ctx.pool.stats().await;
        let mut data = Map::new();
        data.insert("name".to_string(), Value::String("gebrai-orchestrator".to_string()));
        data.insert(
            "version".to_string(),
            Value::String(env!("CARGO_PKG_VERSION").to_string()),
        );
        data.insert("maxInstances".to_string(), serde_json::json!(stats.max_instances));
        Ok(HandlerOutcome::success(data))
    }
}

// ---------------------------------------------------------------------
// Construction control
// ---------------------------------------------------------------------

struct ClearConstructionHandler;

#[async_trait]
impl ToolHandler for ClearConstructionHandler {
    fn description(&self) -> &'static str {
        "Clears every Object in the acquired Instance's Construction and resets the view."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::default()
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        ctx.pool
            .with_driver(id, |driver| Box::pin(async move { driver.new_construction().await }))
            .await?;
        Ok(HandlerOutcome::success(Map::new()))
    }
}

struct InstanceStatusHandler;

#[async_trait]
impl ToolHandler for InstanceStatusHandler {
    fn description(&self) -> &'static str {
        "Reports the acquired Instance's lifecycle snapshot."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::default()
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        let snapshot = ctx.pool.snapshot(id).await?;
        let value = serde_json::to_value(&snapshot).map_err(|e| GgbError::Internal(e.to_string()))?;
        let data = value.as_object().cloned().unwrap_or_default();
        Ok(HandlerOutcome::success(data))
    }
}

struct GetObjectsHandler;

#[async_trait]
impl ToolHandler for GetObjectsHandler {
    fn description(&self) -> &'static str {
        "Lists Objects in the Construction, optionally filtered by kind."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![ParamSchema::optional("type", ParamKind::String)])
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        let kind = opt_str(&ctx.args, "type").map(|s| ObjectKind::from_ggb_str(&s.to_lowercase()));
        let names = ctx
            .pool
            .with_driver(id, |driver| {
                Box::pin(async move { driver.get_all_object_names(kind).await })
            })
            .await?;

        let mut objects = Vec::with_capacity(names.len());
        for name in names {
            let object = ctx
                .pool
                .with_driver(id, |driver| {
                    let name = name.clone();
                    Box::pin(async move { driver.get_object(&name).await })
                })
                .await?;
            objects.push(serde_json::to_value(&object).map_err(|e| GgbError::Internal(e.to_string()))?);
        }

        let mut data = Map::new();
        data.insert("objects".to_string(), Value::Array(objects));
        Ok(HandlerOutcome::success(data))
    }
}

struct EvalCommandHandler;

#[async_trait]
impl ToolHandler for EvalCommandHandler {
    fn description(&self) -> &'static str {
        "Evaluates a raw GeoGebra DSL command against the Construction."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![ParamSchema::required("command", ParamKind::String)])
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        let command = req_str(&ctx.args, "command")?;
        let screen = validator::screen_raw_command(command);
        if !screen.valid {
            return Err(GgbError::Validation(screen.reason.unwrap_or_default()));
        }
        let command = command.to_string();
        let outcome = ctx
            .pool
            .with_driver(id, |driver| {
                let command = command.clone();
                Box::pin(async move { driver.eval_command(&command).await })
            })
            .await?;
        Ok(HandlerOutcome {
            success: outcome.success,
            command: Some(command),
            data: Map::new(),
        })
    }
}

// ---------------------------------------------------------------------
// Object creation
// ---------------------------------------------------------------------

struct CreatePointHandler;

#[async_trait]
impl ToolHandler for CreatePointHandler {
    fn description(&self) -> &'static str {
        "Creates a point at (x, y[, z])."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSchema::required("name", ParamKind::String),
            ParamSchema::required("x", ParamKind::Number),
            ParamSchema::required("y", ParamKind::Number),
            ParamSchema::optional("z", ParamKind::Number),
        ])
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        let name = req_str(&ctx.args, "name")?;
        let x = req_f64(&ctx.args, "x")?;
        let y = req_f64(&ctx.args, "y")?;
        let z = opt_f64(&ctx.args, "z");
        run_commands(&ctx, id, translator::point(name, x, y, z)).await
    }
}

struct CreateLineHandler;

#[async_trait]
impl ToolHandler for CreateLineHandler {
    fn description(&self) -> &'static str {
        "Creates a line through two existing points."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSchema::required("name", ParamKind::String),
            ParamSchema::required("point1", ParamKind::String),
            ParamSchema::required("point2", ParamKind::String),
        ])
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        let name = req_str(&ctx.args, "name")?;
        let p1 = req_str(&ctx.args, "point1")?;
        let p2 = req_str(&ctx.args, "point2")?;
        run_commands(&ctx, id, translator::line(name, p1, p2)).await
    }
}

struct CreateLineSegmentHandler;

#[async_trait]
impl ToolHandler for CreateLineSegmentHandler {
    fn description(&self) -> &'static str {
        "Creates a line segment between two existing points."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSchema::required("name", ParamKind::String),
            ParamSchema::required("point1", ParamKind::String),
            ParamSchema::required("point2", ParamKind::String),
        ])
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        let name = req_str(&ctx.args, "name")?;
        let p1 = req_str(&ctx.args, "point1")?;
        let p2 = req_str(&ctx.args, "point2")?;
        run_commands(&ctx, id, translator::segment(name, p1, p2)).await
    }
}

struct CreateCircleHandler;

#[async_trait]
impl ToolHandler for CreateCircleHandler {
    fn description(&self) -> &'static str {
        "Creates a circle: center+radius, center+point, or three points (spec.md §4.2)."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSchema::required("name", ParamKind::String),
            ParamSchema::optional("center", ParamKind::String),
            ParamSchema::optional("radius", ParamKind::Number),
            ParamSchema::optional("point", ParamKind::String),
            ParamSchema::optional("pointA", ParamKind::String),
            ParamSchema::optional("pointB", ParamKind::String),
            ParamSchema::optional("pointC", ParamKind::String),
        ])
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        let name = req_str(&ctx.args, "name")?;
        let spec = if let (Some(a), Some(b), Some(c)) = (
            opt_str(&ctx.args, "pointA"),
            opt_str(&ctx.args, "pointB"),
            opt_str(&ctx.args, "pointC"),
        ) {
            CircleSpec::ThreePoints { a, b, c }
        } else if let (Some(center), Some(point)) = (opt_str(&ctx.args, "center"), opt_str(&ctx.args, "point")) {
            CircleSpec::CenterPoint { center, point }
        } else if let (Some(center), Some(radius)) = (opt_str(&ctx.args, "center"), opt_f64(&ctx.args, "radius")) {
            CircleSpec::CenterRadius { center, radius }
        } else {
            return Err(GgbError::Validation(
                "circle requires center+radius, center+point, or three points".to_string(),
            ));
        };
        run_commands(&ctx, id, translator::circle(name, &spec)).await
    }
}

struct CreatePolygonHandler;

#[async_trait]
impl ToolHandler for CreatePolygonHandler {
    fn description(&self) -> &'static str {
        "Creates a polygon from an ordered list of existing point names."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSchema::required("vertices", ParamKind::Array),
            ParamSchema::optional("name", ParamKind::String),
        ])
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        let vertices = req_vec_str(&ctx.args, "vertices")?;
        if vertices.len() < 3 {
            return Err(GgbError::Validation("polygon requires at least 3 vertices".to_string()));
        }
        let name = opt_str(&ctx.args, "name");
        run_commands(&ctx, id, translator::polygon(name, &vertices)).await
    }
}

struct CreateSliderHandler;

#[async_trait]
impl ToolHandler for CreateSliderHandler {
    fn description(&self) -> &'static str {
        "Creates a numeric slider positioned on-screen."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSchema::required("name", ParamKind::String),
            ParamSchema::required("min", ParamKind::Number),
            ParamSchema::required("max", ParamKind::Number),
            ParamSchema::required("value", ParamKind::Number),
            ParamSchema::required("increment", ParamKind::Number),
            ParamSchema::required("x", ParamKind::Number),
            ParamSchema::required("y", ParamKind::Number),
            ParamSchema::required("width", ParamKind::Number),
            ParamSchema::optional("caption", ParamKind::String),
        ])
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        let name = req_str(&ctx.args, "name")?;
        let min = req_f64(&ctx.args, "min")?;
        let max = req_f64(&ctx.args, "max")?;
        let range = validator::validate_range(min, max);
        if !range.valid {
            return Err(GgbError::Validation(range.reason.unwrap_or_default()));
        }
        let value = req_f64(&ctx.args, "value")?;
        let increment = req_f64(&ctx.args, "increment")?;
        let x = req_f64(&ctx.args, "x")?;
        let y = req_f64(&ctx.args, "y")?;
        let width = req_f64(&ctx.args, "width")?;
        let caption = opt_str(&ctx.args, "caption");
        let spec = SliderSpec {
            min,
            max,
            increment,
            initial: value,
            width,
            is_angle: false,
            horizontal: true,
            animating: false,
            random: false,
        };
        run_commands(&ctx, id, translator::slider_placed(name, &spec, x, y, caption)).await
    }
}

struct CreateTextHandler;

#[async_trait]
impl ToolHandler for CreateTextHandler {
    fn description(&self) -> &'static str {
        "Places a text object at (x, y)."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSchema::required("text", ParamKind::String),
            ParamSchema::required("x", ParamKind::Number),
            ParamSchema::required("y", ParamKind::Number),
            ParamSchema::optional("name", ParamKind::String),
            ParamSchema::optional("color", ParamKind::String),
            ParamSchema::optional("fontSize", ParamKind::Integer),
            ParamSchema::optional("fontStyle", ParamKind::String),
        ])
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        let content = req_str(&ctx.args, "text")?;
        let x = req_f64(&ctx.args, "x")?;
        let y = req_f64(&ctx.args, "y")?;
        let owned_name;
        let name: &str = match opt_str(&ctx.args, "name") {
            Some(n) => n,
            None => {
                owned_name = synth_name("text");
                &owned_name
            }
        };
        let color = match opt_str(&ctx.args, "color") {
            Some(c) => {
                let outcome = validator::validate_color(c);
                if !outcome.valid {
                    return Err(GgbError::Validation(outcome.reason.unwrap_or_default()));
                }
                Some(c)
            }
            None => None,
        };
        let font_size = opt_u64(&ctx.args, "fontSize").map(|v| v as u32);
        run_commands(&ctx, id, translator::text_styled(name, content, x, y, color, font_size)).await
    }
}

// ---------------------------------------------------------------------
// Plotting
// ---------------------------------------------------------------------

struct PlotFunctionHandler;

#[async_trait]
impl ToolHandler for PlotFunctionHandler {
    fn description(&self) -> &'static str {
        "Plots f(x) = expression, optionally restricted to [xMin, xMax]."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSchema::required("name", ParamKind::String),
            ParamSchema::required("expression", ParamKind::String),
            ParamSchema::optional("xMin", ParamKind::Number),
            ParamSchema::optional("xMax", ParamKind::Number),
            ParamSchema::optional("color", ParamKind::String),
            ParamSchema::optional("thickness", ParamKind::Integer),
            ParamSchema::optional("style", ParamKind::String),
        ])
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        let name = req_str(&ctx.args, "name")?;
        let expression = req_str(&ctx.args, "expression")?;
        let check = validator::validate_expression(&ExpressionClass::StandardFunction { body: expression });
        if !check.valid {
            return Err(GgbError::Validation(check.reason.unwrap_or_default()));
        }
        let domain = match (opt_f64(&ctx.args, "xMin"), opt_f64(&ctx.args, "xMax")) {
            (Some(min), Some(max)) => {
                let range = validator::validate_range(min, max);
                if !range.valid {
                    return Err(GgbError::Validation(range.reason.unwrap_or_default()));
                }
                Some((min, max))
            }
            (None, None) => None,
            _ => return Err(GgbError::Validation("xMin and xMax must be given together".to_string())),
        };
        let styling = styling_from_args(&ctx.args)?;
        run_commands(&ctx, id, translator::function_plot(name, expression, domain, &styling)).await
    }
}

struct PlotParametricHandler;

#[async_trait]
impl ToolHandler for PlotParametricHandler {
    fn description(&self) -> &'static str {
        "Plots a parametric curve (xExpression(p), yExpression(p)) over [tMin, tMax]."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSchema::required("name", ParamKind::String),
            ParamSchema::required("xExpression", ParamKind::String),
            ParamSchema::required("yExpression", ParamKind::String),
            ParamSchema::optional("parameter", ParamKind::String),
            ParamSchema::required("tMin", ParamKind::Number),
            ParamSchema::required("tMax", ParamKind::Number),
            ParamSchema::optional("color", ParamKind::String),
            ParamSchema::optional("thickness", ParamKind::Integer),
            ParamSchema::optional("style", ParamKind::String),
        ])
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        let name = req_str(&ctx.args, "name")?;
        let x_expr = req_str(&ctx.args, "xExpression")?;
        let y_expr = req_str(&ctx.args, "yExpression")?;
        let parameter = opt_str(&ctx.args, "parameter").unwrap_or("t");
        let t_min = req_f64(&ctx.args, "tMin")?;
        let t_max = req_f64(&ctx.args, "tMax")?;

        let check = validator::validate_expression(&ExpressionClass::Parametric {
            x_expr,
            y_expr,
            parameter,
        });
        if !check.valid {
            return Err(GgbError::Validation(check.reason.unwrap_or_default()));
        }
        let range = validator::validate_range(t_min, t_max);
        if !range.valid {
            return Err(GgbError::Validation(range.reason.unwrap_or_default()));
        }
        let styling = styling_from_args(&ctx.args)?;
        run_commands(
            &ctx,
            id,
            translator::parametric_plot(name, x_expr, y_expr, parameter, t_min, t_max, &styling),
        )
        .await
    }
}

struct PlotImplicitHandler;

#[async_trait]
impl ToolHandler for PlotImplicitHandler {
    fn description(&self) -> &'static str {
        "Plots the implicit curve F(x, y) = 0."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSchema::required("name", ParamKind::String),
            ParamSchema::required("expression", ParamKind::String),
            ParamSchema::optional("color", ParamKind::String),
            ParamSchema::optional("thickness", ParamKind::Integer),
            ParamSchema::optional("style", ParamKind::String),
        ])
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        let name = req_str(&ctx.args, "name")?;
        let expression = req_str(&ctx.args, "expression")?;
        let check = validator::validate_expression(&ExpressionClass::Implicit { body: expression });
        if !check.valid {
            return Err(GgbError::Validation(check.reason.unwrap_or_default()));
        }
        let styling = styling_from_args(&ctx.args)?;
        run_commands(&ctx, id, translator::implicit_plot(name, expression, &styling)).await
    }
}

// ---------------------------------------------------------------------
// Styling / view
// ---------------------------------------------------------------------

struct SetObjectStyleHandler;

#[async_trait]
impl ToolHandler for SetObjectStyleHandler {
    fn description(&self) -> &'static str {
        "Applies color/thickness/line-style to an existing Object."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSchema::required("objectName", ParamKind::String),
            ParamSchema::optional("color", ParamKind::String),
            ParamSchema::optional("thickness", ParamKind::Integer),
            ParamSchema::optional("style", ParamKind::String),
        ])
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        let object_name = req_str(&ctx.args, "objectName")?;
        let styling = styling_from_args(&ctx.args)?;
        let commands = translator::set_object_style(object_name, &styling);
        if commands.is_empty() {
            return Ok(HandlerOutcome::success(Map::new()));
        }
        run_commands(&ctx, id, commands).await
    }
}

struct SetAxesLabelsHandler;

#[async_trait]
impl ToolHandler for SetAxesLabelsHandler {
    fn description(&self) -> &'static str {
        "Sets the x/y axis labels."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSchema::required("xLabel", ParamKind::String),
            ParamSchema::required("yLabel", ParamKind::String),
        ])
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        let x_label = req_str(&ctx.args, "xLabel")?;
        let y_label = req_str(&ctx.args, "yLabel")?;
        let cmd = format!("SetAxesLabels(\"{x_label}\", \"{y_label}\")");
        run_commands(&ctx, id, translator::raw(&cmd)).await
    }
}

struct SetAxesVisibleHandler;

#[async_trait]
impl ToolHandler for SetAxesVisibleHandler {
    fn description(&self) -> &'static str {
        "Shows or hides the x and y axes."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSchema::required("xVisible", ParamKind::Boolean),
            ParamSchema::required("yVisible", ParamKind::Boolean),
        ])
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        let x = opt_bool(&ctx.args, "xVisible").unwrap_or(true);
        let y = opt_bool(&ctx.args, "yVisible").unwrap_or(true);
        ctx.pool
            .with_driver(id, |driver| Box::pin(async move { driver.set_axes_visible(x, y).await }))
            .await?;
        Ok(HandlerOutcome::success(Map::new()))
    }
}

struct SetGridVisibleHandler;

#[async_trait]
impl ToolHandler for SetGridVisibleHandler {
    fn description(&self) -> &'static str {
        "Shows or hides the background grid."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![ParamSchema::required("visible", ParamKind::Boolean)])
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        let visible = opt_bool(&ctx.args, "visible").unwrap_or(true);
        ctx.pool
            .with_driver(id, |driver| Box::pin(async move { driver.set_grid_visible(visible).await }))
            .await?;
        Ok(HandlerOutcome::success(Map::new()))
    }
}

struct SetCoordSystemHandler;

#[async_trait]
impl ToolHandler for SetCoordSystemHandler {
    fn description(&self) -> &'static str {
        "Sets the visible coordinate bounds."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSchema::required("xmin", ParamKind::Number),
            ParamSchema::required("xmax", ParamKind::Number),
            ParamSchema::required("ymin", ParamKind::Number),
            ParamSchema::required("ymax", ParamKind::Number),
        ])
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        let xmin = req_f64(&ctx.args, "xmin")?;
        let xmax = req_f64(&ctx.args, "xmax")?;
        let ymin = req_f64(&ctx.args, "ymin")?;
        let ymax = req_f64(&ctx.args, "ymax")?;
        for range in [validator::validate_range(xmin, xmax), validator::validate_range(ymin, ymax)] {
            if !range.valid {
                return Err(GgbError::Validation(range.reason.unwrap_or_default()));
            }
        }
        ctx.pool
            .with_driver(id, |driver| {
                Box::pin(async move { driver.set_coord_system(xmin, xmax, ymin, ymax).await })
            })
            .await?;
        Ok(HandlerOutcome::success(Map::new()))
    }
}

// ---------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------

/// Applies whatever view-affecting args a handler was given before an
/// export, matching spec.md §6.2's `export_png`'s optional `xmin..showGrid`
/// parameters.
async fn apply_view_settings(ctx: &HandlerContext<'_>, id: InstanceId, args: &Value) -> GgbResult<ViewSettings> {
    let settings = ViewSettings {
        xmin: opt_f64(args, "xmin"),
        xmax: opt_f64(args, "xmax"),
        ymin: opt_f64(args, "ymin"),
        ymax: opt_f64(args, "ymax"),
        show_axes: opt_bool(args, "showAxes"),
        show_grid: opt_bool(args, "showGrid"),
    };

    if let (Some(xmin), Some(xmax), Some(ymin), Some(ymax)) = (settings.xmin, settings.xmax, settings.ymin, settings.ymax) {
        for range in [validator::validate_range(xmin, xmax), validator::validate_range(ymin, ymax)] {
            if !range.valid {
                return Err(GgbError::Validation(range.reason.unwrap_or_default()));
            }
        }
        ctx.pool
            .with_driver(id, |driver| {
                Box::pin(async move { driver.set_coord_system(xmin, xmax, ymin, ymax).await })
            })
            .await?;
    }
    if let Some(show_axes) = settings.show_axes {
        ctx.pool
            .with_driver(id, |driver| {
                Box::pin(async move { driver.set_axes_visible(show_axes, show_axes).await })
            })
            .await?;
    }
    if let Some(show_grid) = settings.show_grid {
        ctx.pool
            .with_driver(id, |driver| Box::pin(async move { driver.set_grid_visible(show_grid).await }))
            .await?;
    }
    Ok(settings)
}

struct ExportPngHandler;

#[async_trait]
impl ToolHandler for ExportPngHandler {
    fn description(&self) -> &'static str {
        "Exports the current view as a base64 PNG."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSchema::optional("scale", ParamKind::Number),
            ParamSchema::optional("transparent", ParamKind::Boolean),
            ParamSchema::optional("dpi", ParamKind::Integer),
            ParamSchema::optional("width", ParamKind::Integer),
            ParamSchema::optional("height", ParamKind::Integer),
            ParamSchema::optional("xmin", ParamKind::Number),
            ParamSchema::optional("xmax", ParamKind::Number),
            ParamSchema::optional("ymin", ParamKind::Number),
            ParamSchema::optional("ymax", ParamKind::Number),
            ParamSchema::optional("showAxes", ParamKind::Boolean),
            ParamSchema::optional("showGrid", ParamKind::Boolean),
        ])
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        let view_settings = apply_view_settings(&ctx, id, &ctx.args).await?;

        let opts = PngOptions {
            scale: opt_f64(&ctx.args, "scale").unwrap_or(1.0),
            transparent: opt_bool(&ctx.args, "transparent").unwrap_or(false),
            dpi: opt_u64(&ctx.args, "dpi").unwrap_or(72) as u32,
            width: opt_u64(&ctx.args, "width").unwrap_or(800) as u32,
            height: opt_u64(&ctx.args, "height").unwrap_or(600) as u32,
        };
        opts.validate()?;

        let raw = ctx
            .pool
            .with_driver(id, |driver| Box::pin(async move { driver.export_png(opts).await }))
            .await?;

        let metadata = ExportMetadata {
            scale: Some(opts.scale),
            transparent: Some(opts.transparent),
            dpi: Some(opts.dpi),
            width: Some(opts.width),
            height: Some(opts.height),
            view_settings,
        };
        Ok(HandlerOutcome {
            success: true,
            command: None,
            data: export::wrap(ExportFormat::Png, raw, &metadata),
        })
    }
}

struct ExportSvgHandler;

#[async_trait]
impl ToolHandler for ExportSvgHandler {
    fn description(&self) -> &'static str {
        "Exports the current view as SVG markup."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSchema::optional("xmin", ParamKind::Number),
            ParamSchema::optional("xmax", ParamKind::Number),
            ParamSchema::optional("ymin", ParamKind::Number),
            ParamSchema::optional("ymax", ParamKind::Number),
            ParamSchema::optional("showAxes", ParamKind::Boolean),
            ParamSchema::optional("showGrid", ParamKind::Boolean),
        ])
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        let view_settings = apply_view_settings(&ctx, id, &ctx.args).await?;
        let raw = ctx
            .pool
            .with_driver(id, |driver| Box::pin(async move { driver.export_svg().await }))
            .await?;
        let metadata = ExportMetadata {
            view_settings,
            ..Default::default()
        };
        Ok(HandlerOutcome {
            success: true,
            command: None,
            data: export::wrap(ExportFormat::Svg, raw, &metadata),
        })
    }
}

struct ExportPdfHandler;

#[async_trait]
impl ToolHandler for ExportPdfHandler {
    fn description(&self) -> &'static str {
        "Exports the current view as a base64 PDF. No view parameters are documented for PDF (spec.md §9)."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::default()
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        let raw = ctx
            .pool
            .with_driver(id, |driver| Box::pin(async move { driver.export_pdf().await }))
            .await?;
        Ok(HandlerOutcome {
            success: true,
            command: None,
            data: export::wrap(ExportFormat::Pdf, raw, &ExportMetadata::default()),
        })
    }
}

struct ExportAnimationHandler;

#[async_trait]
impl ToolHandler for ExportAnimationHandler {
    fn description(&self) -> &'static str {
        "Captures a time-sampled animation and encodes it to GIF or MP4 via the external media encoder."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSchema::required("durationMs", ParamKind::Integer),
            ParamSchema::required("frameRate", ParamKind::Integer),
            ParamSchema::required("width", ParamKind::Integer),
            ParamSchema::required("height", ParamKind::Integer),
            ParamSchema::required("format", ParamKind::String),
            ParamSchema::required("quality", ParamKind::Integer),
            ParamSchema::required("outputPath", ParamKind::String),
        ])
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let id = ctx.instance_id()?;
        let duration_ms = opt_u64(&ctx.args, "durationMs").unwrap_or(0);
        let frame_rate = opt_u64(&ctx.args, "frameRate").unwrap_or(10) as u32;
        let width = opt_u64(&ctx.args, "width").unwrap_or(320) as u32;
        let height = opt_u64(&ctx.args, "height").unwrap_or(240) as u32;
        let format_str = req_str(&ctx.args, "format")?;
        let format = match format_str {
            "gif" => OutputFormat::Gif,
            "mp4" => OutputFormat::Mp4,
            other => return Err(GgbError::Validation(format!("unknown animation format '{other}'"))),
        };
        let quality = opt_u64(&ctx.args, "quality").unwrap_or(23) as u32;
        let output_path = std::path::PathBuf::from(req_str(&ctx.args, "outputPath")?);

        let req = AnimationRequest {
            duration_ms,
            frame_rate,
            width,
            height,
        };
        let token = CancellationToken::new();
        let (frames, cancelled) = ctx
            .pool
            .with_driver(id, |driver| {
                let token = token.clone();
                Box::pin(async move { capture_animation(driver, req, &token).await })
            })
            .await?;

        let frame_count = frames.len();
        let artifact = AnimationArtifact {
            frames,
            frame_rate,
            width,
            height,
            cancelled,
        };

        let encoder = AnimationEncoder::new(ctx.ffmpeg_path);
        let encoded = encoder
            .encode(
                &artifact,
                &EncodeRequest {
                    format,
                    quality,
                    output_path,
                },
            )
            .await?;

        let mut data = Map::new();
        data.insert(
            "outputPath".to_string(),
            Value::String(encoded.output_path.to_string_lossy().to_string()),
        );
        data.insert("byteSize".to_string(), serde_json::json!(encoded.byte_size));
        data.insert("frameCount".to_string(), serde_json::json!(frame_count));
        data.insert("cancelled".to_string(), Value::Bool(cancelled));
        Ok(HandlerOutcome {
            success: true,
            command: None,
            data,
        })
    }
}

// ---------------------------------------------------------------------
// Performance
// ---------------------------------------------------------------------

struct PerformanceGetStatsHandler;

#[async_trait]
impl ToolHandler for PerformanceGetStatsHandler {
    fn description(&self) -> &'static str {
        "Reports timing percentiles and success rate for one operation, or overall."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![ParamSchema::optional("operationName", ParamKind::String)])
    }
    fn needs_instance(&self) -> bool {
        false
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let operation = opt_str(&ctx.args, "operationName");
        let stats = ctx.monitor.stats(operation);
        let value = serde_json::to_value(&stats).map_err(|e| GgbError::Internal(e.to_string()))?;
        Ok(HandlerOutcome::success(value.as_object().cloned().unwrap_or_default()))
    }
}

struct PerformanceGetPoolStatsHandler;

#[async_trait]
impl ToolHandler for PerformanceGetPoolStatsHandler {
    fn description(&self) -> &'static str {
        "Reports pool occupancy: total/active/idle counts, usage, age, memory estimate."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::default()
    }
    fn needs_instance(&self) -> bool {
        false
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let stats = ctx.pool.stats().await;
        let mut data = Map::new();
        data.insert("totalInstances".to_string(), serde_json::json!(stats.total));
        data.insert("activeInstances".to_string(), serde_json::json!(stats.active));
        data.insert("idleInstances".to_string(), serde_json::json!(stats.idle));
        data.insert("maxInstances".to_string(), serde_json::json!(stats.max_instances));
        data.insert(
            "averageUsageCount".to_string(),
            serde_json::json!(stats.average_usage_count),
        );
        data.insert("oldestAgeMs".to_string(), serde_json::json!(stats.oldest_age_ms));
        data.insert(
            "estimatedMemoryMb".to_string(),
            serde_json::json!(stats.estimated_memory_mb),
        );
        Ok(HandlerOutcome::success(data))
    }
}

struct PerformanceWarmUpPoolHandler;

#[async_trait]
impl ToolHandler for PerformanceWarmUpPoolHandler {
    fn description(&self) -> &'static str {
        "Creates and immediately releases up to `count` Instances ahead of demand."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![ParamSchema::optional("count", ParamKind::Integer)])
    }
    fn needs_instance(&self) -> bool {
        false
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let count = opt_u64(&ctx.args, "count").unwrap_or(3) as usize;
        ctx.pool.warm_up(count).await?;
        let stats = ctx.pool.stats().await;
        let mut data = Map::new();
        data.insert("totalInstances".to_string(), serde_json::json!(stats.total));
        data.insert("activeInstances".to_string(), serde_json::json!(stats.active));
        Ok(HandlerOutcome::success(data))
    }
}

struct PerformanceClearMetricsHandler;

#[async_trait]
impl ToolHandler for PerformanceClearMetricsHandler {
    fn description(&self) -> &'static str {
        "Empties the performance monitor's metric ring buffer."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::default()
    }
    fn needs_instance(&self) -> bool {
        false
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        ctx.monitor.clear();
        Ok(HandlerOutcome::success(Map::new()))
    }
}

struct PerformanceMonitorComplianceHandler;

#[async_trait]
impl ToolHandler for PerformanceMonitorComplianceHandler {
    fn description(&self) -> &'static str {
        "Reports, per operation, whether p95 duration stays within threshold."
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![ParamSchema::optional("thresholdMs", ParamKind::Integer)])
    }
    fn needs_instance(&self) -> bool {
        false
    }
    async fn handle(&self, ctx: HandlerContext<'_>) -> GgbResult<HandlerOutcome> {
        let threshold = opt_u64(&ctx.args, "thresholdMs");
        let report = ctx.monitor.compliance_report(threshold);
        let value = serde_json::to_value(&report).map_err(|e| GgbError::Internal(e.to_string()))?;
        let mut data = Map::new();
        data.insert("operations".to_string(), value);
        Ok(HandlerOutcome::success(data))
    }
}

/// Registers every tool in the catalogue (spec.md §6.2) into `registry`.
pub fn register_all(registry: &mut Registry) {
    registry.register("ping", std::sync::Arc::new(PingHandler));
    registry.register("echo", std::sync::Arc::new(EchoHandler));
    registry.register("server_info", std::sync::Arc::new(ServerInfoHandler));

    registry.register("geogebra_clear_construction", std::sync::Arc::new(ClearConstructionHandler));
    registry.register("geogebra_instance_status", std::sync::Arc::new(InstanceStatusHandler));
    registry.register("geogebra_get_objects", std::sync::Arc::new(GetObjectsHandler));
    registry.register("geogebra_eval_command", std::sync::Arc::new(EvalCommandHandler));

    registry.register("geogebra_create_point", std::sync::Arc::new(CreatePointHandler));
    registry.register("geogebra_create_line", std::sync::Arc::new(CreateLineHandler));
    registry.register("geogebra_create_line_segment", std::sync::Arc::new(CreateLineSegmentHandler));
    registry.register("geogebra_create_circle", std::sync::Arc::new(CreateCircleHandler));
    registry.register("geogebra_create_polygon", std::sync::Arc::new(CreatePolygonHandler));
    registry.register("geogebra_create_slider", std::sync::Arc::new(CreateSliderHandler));
    registry.register("geogebra_create_text", std::sync::Arc::new(CreateTextHandler));

    registry.register("geogebra_plot_function", std::sync::Arc::new(PlotFunctionHandler));
    registry.register("geogebra_plot_parametric", std::sync::Arc::new(PlotParametricHandler));
    registry.register("geogebra_plot_implicit", std::sync::Arc::new(PlotImplicitHandler));

    registry.register("geogebra_set_object_style", std::sync::Arc::new(SetObjectStyleHandler));
    registry.register("geogebra_set_axes_labels", std::sync::Arc::new(SetAxesLabelsHandler));
    registry.register("geogebra_set_axes_visible", std::sync::Arc::new(SetAxesVisibleHandler));
    registry.register("geogebra_set_grid_visible", std::sync::Arc::new(SetGridVisibleHandler));
    registry.register("geogebra_set_coord_system", std::sync::Arc::new(SetCoordSystemHandler));

    registry.register("geogebra_export_png", std::sync::Arc::new(ExportPngHandler));
    registry.register("geogebra_export_svg", std::sync::Arc::new(ExportSvgHandler));
    registry.register("geogebra_export_pdf", std::sync::Arc::new(ExportPdfHandler));
    registry.register("geogebra_export_animation", std::sync::Arc::new(ExportAnimationHandler));

    registry.register("performance_get_stats", std::sync::Arc::new(PerformanceGetStatsHandler));
    registry.register("performance_get_pool_stats", std::sync::Arc::new(PerformanceGetPoolStatsHandler));
    registry.register("performance_warm_up_pool", std::sync::Arc::new(PerformanceWarmUpPoolHandler));
    registry.register("performance_clear_metrics", std::sync::Arc::new(PerformanceClearMetricsHandler));
    registry.register(
        "performance_monitor_compliance",
        std::sync::Arc::new(PerformanceMonitorComplianceHandler),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::domain::InstanceConfig;
    use crate::driver::fake::FakeDriver;
    use crate::driver::{DriverFactory, InstanceDriver};
    use crate::metrics::PerformanceMonitor;
    use crate::pool::Pool;
    use crate::registry::Dispatcher;

    struct FakeFactory;

    #[async_trait]
    impl DriverFactory for FakeFactory {
        async fn create(&self, _config: &InstanceConfig) -> GgbResult<Box<dyn InstanceDriver>> {
            Ok(Box::new(FakeDriver::new()))
        }
    }

    fn build_dispatcher() -> Dispatcher {
        let pool = Pool::new(ServiceConfig::default(), Box::new(FakeFactory));
        let monitor = std::sync::Arc::new(PerformanceMonitor::new());
        let mut registry = Registry::new();
        register_all(&mut registry);
        Dispatcher::new(registry, pool, monitor, "ffmpeg")
    }

    #[tokio::test]
    async fn ping_reports_pong() {
        let dispatcher = build_dispatcher();
        let envelope = dispatcher.call("ping", serde_json::json!({})).await;
        assert!(envelope.success);
        assert_eq!(envelope.data["message"], "pong");
    }

    #[tokio::test]
    async fn echo_prefixes_message() {
        let dispatcher = build_dispatcher();
        let envelope = dispatcher
            .call("echo", serde_json::json!({"message": "Hello"}))
            .await;
        assert!(envelope.success);
        assert_eq!(envelope.data["message"], "Echo: Hello");
    }

    #[tokio::test]
    async fn scenario_create_points_and_segment() {
        let dispatcher = build_dispatcher();
        dispatcher.call("geogebra_clear_construction", serde_json::json!({})).await;
        dispatcher
            .call("geogebra_create_point", serde_json::json!({"name": "A", "x": 0.0, "y": 0.0}))
            .await;
        dispatcher
            .call("geogebra_create_point", serde_json::json!({"name": "B", "x": 3.0, "y": 0.0}))
            .await;
        dispatcher
            .call("geogebra_create_point", serde_json::json!({"name": "C", "x": 1.5, "y": 2.6}))
            .await;
        let envelope = dispatcher
            .call("geogebra_eval_command", serde_json::json!({"command": "Segment(A,B)"}))
            .await;
        assert!(envelope.success);

        let objects = dispatcher.call("geogebra_get_objects", serde_json::json!({})).await;
        let names: Vec<String> = objects.data["objects"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names.len(), 4);
        assert!(names.contains(&"A".to_string()));
        assert!(names.contains(&"B".to_string()));
        assert!(names.contains(&"C".to_string()));
    }

    #[tokio::test]
    async fn plot_parametric_matches_scenario_5() {
        let dispatcher = build_dispatcher();
        let envelope = dispatcher
            .call(
                "geogebra_plot_parametric",
                serde_json::json!({
                    "name": "c",
                    "xExpression": "cos(t)",
                    "yExpression": "sin(t)",
                    "parameter": "t",
                    "tMin": 0.0,
                    "tMax": 6.283185307179586
                }),
            )
            .await;
        assert!(envelope.success);
        assert!(envelope.command.unwrap().starts_with("c = Curve(cos(t), sin(t), t, 0, 6.283"));
    }

    #[tokio::test]
    async fn create_text_matches_scenario_6() {
        let dispatcher = build_dispatcher();
        let envelope = dispatcher
            .call(
                "geogebra_create_text",
                serde_json::json!({
                    "text": "\"Value: \" + 5 + 3",
                    "x": 1.0,
                    "y": 2.0,
                    "name": "t"
                }),
            )
            .await;
        assert!(envelope.success);
        assert_eq!(envelope.command.unwrap(), "t = Text(\"Value: \" + 5 + 3, (1, 2))");
    }

    #[tokio::test]
    async fn eval_command_rejects_unsafe_construct() {
        let dispatcher = build_dispatcher();
        let envelope = dispatcher
            .call("geogebra_eval_command", serde_json::json!({"command": "window.alert(1)"}))
            .await;
        assert!(!envelope.success);
        assert_eq!(envelope.error.unwrap().code, "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn export_png_rejects_out_of_range_scale() {
        let dispatcher = build_dispatcher();
        let envelope = dispatcher
            .call("geogebra_export_png", serde_json::json!({"scale": 10.01}))
            .await;
        assert!(!envelope.success);
        assert_eq!(envelope.error.unwrap().code, "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn warm_up_pool_then_stats_reports_totals() {
        let dispatcher = build_dispatcher();
        dispatcher
            .call("performance_warm_up_pool", serde_json::json!({"count": 3}))
            .await;
        let envelope = dispatcher.call("performance_get_pool_stats", serde_json::json!({})).await;
        assert_eq!(envelope.data["totalInstances"], 3);
        assert_eq!(envelope.data["activeInstances"], 0);
    }

    #[tokio::test]
    async fn duplicate_point_name_is_not_retried_and_reports_failure() {
        let dispatcher = build_dispatcher();
        dispatcher
            .call("geogebra_create_point", serde_json::json!({"name": "A", "x": 0.0, "y": 0.0}))
            .await;
        let envelope = dispatcher
            .call("geogebra_create_point", serde_json::json!({"name": "A", "x": 1.0, "y": 1.0}))
            .await;
        assert!(!envelope.success);
        assert_eq!(envelope.error.unwrap().code, "COMMAND_FAILED");
    }
}
