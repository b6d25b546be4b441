//! Instance Driver (C4, spec.md §4.3).
//!
//! Owns exactly one headless-browser page hosting one GeoGebra applet and
//! exposes a typed facade over its in-page JS bridge. The state machine
//! (§4.3.1) is a plain enum with an explicit `transition`, in the same spirit
//! as the teacher's small, explicit control fields (`time_step`,
//! `active_timer: Option<Sender<bool>>`) rather than a generic FSM crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;

use crate::config::{AppVariant, ServiceConfig};
use crate::domain::{now_ms, Frame, GgbObject, InstanceConfig, ObjectKind};
use crate::error::{GgbError, GgbResult};

/// spec.md §4.3.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Uninit,
    LaunchingBrowser,
    LoadingPage,
    WaitingReady,
    Ready,
    Cleaning,
    Disposed,
    Failed,
}

impl InstanceState {
    pub fn is_usable(self) -> bool {
        matches!(self, InstanceState::Ready)
    }
}

/// The result of one DSL command evaluation (spec.md §4.3.3): a GeoGebra-level
/// failure is data, never an exception.
#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub success: bool,
    pub result: Option<String>,
}

/// Options for `exportPNG` (spec.md §4.3.3 bounds).
#[derive(Debug, Clone, Copy)]
pub struct PngOptions {
    pub scale: f64,
    pub transparent: bool,
    pub dpi: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for PngOptions {
    fn default() -> Self {
        PngOptions {
            scale: 1.0,
            transparent: false,
            dpi: 72,
            width: 800,
            height: 600,
        }
    }
}

impl PngOptions {
    pub fn validate(&self) -> GgbResult<()> {
        if !(0.1..=10.0).contains(&self.scale) {
            return Err(GgbError::Validation(format!(
                "scale {} out of range [0.1, 10]",
                self.scale
            )));
        }
        if !(72..=300).contains(&self.dpi) {
            return Err(GgbError::Validation(format!(
                "dpi {} out of range [72, 300]",
                self.dpi
            )));
        }
        if !(100..=5000).contains(&self.width) || !(100..=5000).contains(&self.height) {
            return Err(GgbError::Validation(
                "width/height out of range [100, 5000]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Request shape for `export_animation` (spec.md §4.3.2).
#[derive(Debug, Clone, Copy)]
pub struct AnimationRequest {
    pub duration_ms: u64,
    pub frame_rate: u32,
    pub width: u32,
    pub height: u32,
}

/// Cooperative cancellation handle shared between a capture loop and whoever
/// wants to stop it early (spec.md §5.4). The paired `Notify` lets
/// `capture_animation` race a cancellation against the wait for the next
/// frame's simulated time, the same `tokio::select!` shape the teacher's
/// `advance_timer` races a sleep against its stop channel.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<(AtomicBool, tokio::sync::Notify)>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Arc::new((AtomicBool::new(false), tokio::sync::Notify::new())))
    }

    pub fn cancel(&self) {
        self.0 .0.store(true, Ordering::SeqCst);
        self.0 .1.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0 .0.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel()` is called; resolves immediately if already
    /// cancelled. The `notified()` future is created before the flag check
    /// so a `cancel()` landing in between is never missed.
    async fn cancelled(&self) {
        let notified = self.0 .1.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// The typed facade over an Instance's in-page bridge (spec.md §4.3).
///
/// Implemented once for real by [`ChromiumDriver`] and once by the
/// `#[cfg(test)]`-gated [`fake::FakeDriver`] so Pool/Dispatcher logic can run
/// without a real browser — the pattern matches the corpus-wide habit of
/// trait-based fakes for I/O-heavy subsystems.
#[async_trait]
pub trait InstanceDriver: Send + Sync {
    fn state(&self) -> InstanceState;

    async fn initialize(&mut self, config: &InstanceConfig) -> GgbResult<()>;
    async fn cleanup(&mut self);

    async fn eval_command(&self, cmd: &str) -> GgbResult<EvalOutcome>;
    async fn exists(&self, name: &str) -> GgbResult<bool>;
    async fn is_defined(&self, name: &str) -> GgbResult<bool>;
    async fn get_all_object_names(&self, kind: Option<ObjectKind>) -> GgbResult<Vec<String>>;
    async fn get_object(&self, name: &str) -> GgbResult<GgbObject>;
    async fn get_xcoord(&self, name: &str) -> GgbResult<f64>;
    async fn get_ycoord(&self, name: &str) -> GgbResult<f64>;
    async fn get_zcoord(&self, name: &str) -> GgbResult<f64>;
    async fn get_color(&self, name: &str) -> GgbResult<String>;
    async fn delete_object(&self, name: &str) -> GgbResult<()>;

    async fn new_construction(&self) -> GgbResult<()>;
    async fn refresh_views(&self) -> GgbResult<()>;
    async fn set_coord_system(&self, xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> GgbResult<()>;
    async fn set_axes_visible(&self, x: bool, y: bool) -> GgbResult<()>;
    async fn set_grid_visible(&self, visible: bool) -> GgbResult<()>;

    async fn export_png(&self, opts: PngOptions) -> GgbResult<String>;
    async fn export_svg(&self) -> GgbResult<String>;
    async fn export_pdf(&self) -> GgbResult<String>;

    async fn set_animating(&self, name: &str, on: bool) -> GgbResult<()>;
    async fn start_animation(&self) -> GgbResult<()>;
    async fn stop_animation(&self) -> GgbResult<()>;
    async fn is_animation_running(&self) -> GgbResult<bool>;
}

/// Drives a single captured animation to completion, cooperatively
/// cancellable between frames (spec.md §4.3.2). Generic over any
/// `InstanceDriver` so it is exercised against the fake driver in tests.
/// Paces each frame to its simulated time by racing a `tokio::time::sleep`
/// against the cancellation token, the same `tokio::select!` shape the
/// teacher's `advance_timer` races a sleep against its stop channel.
pub async fn capture_animation(
    driver: &dyn InstanceDriver,
    req: AnimationRequest,
    token: &CancellationToken,
) -> GgbResult<(Vec<Frame>, bool)> {
    driver.start_animation().await?;

    let total_frames = ((req.duration_ms as u128 * req.frame_rate as u128) as f64 / 1000.0).ceil() as u64;
    let mut frames = Vec::with_capacity(total_frames as usize);
    let mut cancelled = false;
    let start = tokio::time::Instant::now();

    for i in 0..total_frames {
        if token.is_cancelled() {
            cancelled = true;
            break;
        }
        let t_ms = (i as u128 * 1000 / req.frame_rate as u128) as u64;
        let deadline = start + Duration::from_millis(t_ms);

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            _ = token.cancelled() => {
                cancelled = true;
                break;
            }
        }

        let png_options = PngOptions {
            scale: 1.0,
            transparent: false,
            dpi: 72,
            width: req.width,
            height: req.height,
        };
        let png_base64 = driver.export_png(png_options).await?;
        frames.push(Frame { t_ms, png_base64 });
    }

    driver.stop_animation().await?;
    Ok((frames, cancelled))
}

/// Real, `chromiumoxide`-backed implementation of [`InstanceDriver`].
pub struct ChromiumDriver {
    state: InstanceState,
    browser: Option<Browser>,
    handler_task: Option<tokio::task::JoinHandle<()>>,
    page: Option<Page>,
}

impl ChromiumDriver {
    pub fn new() -> Self {
        ChromiumDriver {
            state: InstanceState::Uninit,
            browser: None,
            handler_task: None,
            page: None,
        }
    }

    fn page(&self) -> GgbResult<&Page> {
        if !self.state.is_usable() {
            return Err(GgbError::InstanceNotReady(format!("{:?}", self.state)));
        }
        self.page
            .as_ref()
            .ok_or_else(|| GgbError::InstanceNotReady(format!("{:?}", self.state)))
    }

    /// Evaluates a JS expression against the page and returns the raw JSON
    /// result. Exceptions here are transport faults (spec.md §4.3.3) — a
    /// crashed page or vanished bridge — never DSL failures.
    async fn eval_js(&self, expr: &str) -> GgbResult<Value> {
        let page = self.page()?;
        let result = page
            .evaluate(expr)
            .await
            .map_err(|e| GgbError::ToolExecutionError(anyhow::anyhow!(e)))?;
        result
            .into_value::<Value>()
            .map_err(|e| GgbError::ToolExecutionError(anyhow::anyhow!(e)))
    }

    fn app_name(variant: AppVariant) -> &'static str {
        match variant {
            AppVariant::Classic => "classic",
            AppVariant::Graphing => "graphing",
            AppVariant::Geometry => "geometry",
            AppVariant::ThreeD => "3d",
            AppVariant::Suite => "suite",
        }
    }

    fn embed_html(config: &InstanceConfig) -> String {
        format!(
            r#"<!doctype html><html><head><meta charset="utf-8"></head><body>
<div id="ggb-element"></div>
<script src="https://www.geogebra.org/apps/deployggb.js"></script>
<script>
window.ggbReady = false;
var params = {{
  appName: "{app}",
  width: {w},
  height: {h},
  showMenuBar: {menu},
  showToolBar: {tool},
  showAlgebraInput: {algebra},
  appletOnLoad: function(api) {{ window.ggbApplet = api; window.ggbReady = true; }}
}};
var applet = new GGBApplet(params, true);
applet.inject('ggb-element');
</script>
</body></html>"#,
            app = Self::app_name(config.app_variant),
            w = config.canvas_width,
            h = config.canvas_height,
            menu = config.show_menu_bar,
            tool = config.show_tool_bar,
            algebra = config.show_algebra_input,
        )
    }
}

impl Default for ChromiumDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstanceDriver for ChromiumDriver {
    fn state(&self) -> InstanceState {
        self.state
    }

    async fn initialize(&mut self, config: &InstanceConfig) -> GgbResult<()> {
        self.state = InstanceState::LaunchingBrowser;

        let browser_config = BrowserConfig::builder()
            .no_sandbox()
            .args(vec![
                "--disable-dev-shm-usage",
                "--disable-gpu",
                "--disable-extensions",
            ])
            .build()
            .map_err(|e| GgbError::Internal(format!("invalid browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| GgbError::ToolExecutionError(anyhow::anyhow!(e)))?;

        self.handler_task = Some(tokio::spawn(async move {
            while handler.next().await.is_some() {}
        }));

        self.state = InstanceState::LoadingPage;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| GgbError::ToolExecutionError(anyhow::anyhow!(e)))?;

        page.set_content(Self::embed_html(config))
            .await
            .map_err(|e| GgbError::ToolExecutionError(anyhow::anyhow!(e)))?;

        self.browser = Some(browser);
        self.page = Some(page);
        self.state = InstanceState::WaitingReady;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
        loop {
            let ready: bool = self
                .page
                .as_ref()
                .expect("page set above")
                .evaluate("window.ggbReady === true")
                .await
                .ok()
                .and_then(|r| r.into_value().ok())
                .unwrap_or(false);
            if ready {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                self.state = InstanceState::Failed;
                return Err(GgbError::Internal(
                    "timed out waiting for ggbOnInit callback".to_string(),
                ));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        self.state = InstanceState::Ready;
        Ok(())
    }

    async fn cleanup(&mut self) {
        self.state = InstanceState::Cleaning;
        if let Some(page) = self.page.take() {
            let _ = page.close().await;
        }
        if let Some(mut browser) = self.browser.take() {
            let _ = browser.close().await;
            let _ = browser.wait().await;
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        self.state = InstanceState::Disposed;
    }

    async fn eval_command(&self, cmd: &str) -> GgbResult<EvalOutcome> {
        let escaped = cmd.replace('\\', "\\\\").replace('"', "\\\"");
        let expr = format!(
            "(function() {{ try {{ var ok = ggbApplet.evalCommand(\"{escaped}\"); return {{success: !!ok}}; }} catch (e) {{ return {{success: false, result: String(e)}}; }} }})()"
        );
        let value = self.eval_js(&expr).await?;
        Ok(EvalOutcome {
            success: value.get("success").and_then(Value::as_bool).unwrap_or(false),
            result: value
                .get("result")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    async fn exists(&self, name: &str) -> GgbResult<bool> {
        let expr = format!("ggbApplet.exists(\"{name}\")");
        Ok(self.eval_js(&expr).await?.as_bool().unwrap_or(false))
    }

    async fn is_defined(&self, name: &str) -> GgbResult<bool> {
        let expr = format!("ggbApplet.isDefined(\"{name}\")");
        Ok(self.eval_js(&expr).await?.as_bool().unwrap_or(false))
    }

    async fn get_all_object_names(&self, kind: Option<ObjectKind>) -> GgbResult<Vec<String>> {
        let expr = match kind {
            Some(k) => format!(
                "ggbApplet.getAllObjectNames(\"{}\")",
                format!("{k:?}").to_lowercase()
            ),
            None => "ggbApplet.getAllObjectNames()".to_string(),
        };
        let value = self.eval_js(&expr).await?;
        Ok(value
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_object(&self, name: &str) -> GgbResult<GgbObject> {
        let defined = self.is_defined(name).await?;
        let expr = format!(
            "(function() {{ return {{ kind: ggbApplet.getObjectType(\"{name}\"), visible: ggbApplet.getVisible(\"{name}\"), value: ggbApplet.getValueString(\"{name}\") }}; }})()"
        );
        let value = self.eval_js(&expr).await?;
        let kind_str = value.get("kind").and_then(Value::as_str).unwrap_or("");
        Ok(GgbObject {
            name: name.to_string(),
            kind: ObjectKind::from_ggb_str(kind_str),
            visible: value.get("visible").and_then(Value::as_bool).unwrap_or(true),
            defined,
            value_string: value
                .get("value")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    async fn get_xcoord(&self, name: &str) -> GgbResult<f64> {
        if !self.exists(name).await? {
            return Ok(f64::NAN);
        }
        let expr = format!("ggbApplet.getXcoord(\"{name}\")");
        Ok(self.eval_js(&expr).await?.as_f64().unwrap_or(f64::NAN))
    }

    async fn get_ycoord(&self, name: &str) -> GgbResult<f64> {
        if !self.exists(name).await? {
            return Ok(f64::NAN);
        }
        let expr = format!("ggbApplet.getYcoord(\"{name}\")");
        Ok(self.eval_js(&expr).await?.as_f64().unwrap_or(f64::NAN))
    }

    async fn get_zcoord(&self, name: &str) -> GgbResult<f64> {
        if !self.exists(name).await? {
            return Ok(f64::NAN);
        }
        let expr = format!("ggbApplet.getZcoord(\"{name}\")");
        Ok(self.eval_js(&expr).await?.as_f64().unwrap_or(f64::NAN))
    }

    async fn get_color(&self, name: &str) -> GgbResult<String> {
        let expr = format!("ggbApplet.getColor(\"{name}\")");
        Ok(self
            .eval_js(&expr)
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn delete_object(&self, name: &str) -> GgbResult<()> {
        self.eval_js(&format!("ggbApplet.deleteObject(\"{name}\")")).await?;
        Ok(())
    }

    async fn new_construction(&self) -> GgbResult<()> {
        self.eval_js("ggbApplet.newConstruction()").await?;
        Ok(())
    }

    async fn refresh_views(&self) -> GgbResult<()> {
        self.eval_js("ggbApplet.refreshViews()").await?;
        Ok(())
    }

    async fn set_coord_system(&self, xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> GgbResult<()> {
        self.eval_js(&format!(
            "ggbApplet.setCoordSystem({xmin}, {xmax}, {ymin}, {ymax})"
        ))
        .await?;
        Ok(())
    }

    async fn set_axes_visible(&self, x: bool, y: bool) -> GgbResult<()> {
        self.eval_js(&format!("ggbApplet.setAxesVisible({x}, {y})")).await?;
        Ok(())
    }

    async fn set_grid_visible(&self, visible: bool) -> GgbResult<()> {
        self.eval_js(&format!("ggbApplet.setGridVisible({visible})")).await?;
        Ok(())
    }

    async fn export_png(&self, opts: PngOptions) -> GgbResult<String> {
        opts.validate()?;
        let expr = format!(
            "ggbApplet.exportPNG({}, {}, {}, {}, {})",
            opts.scale, opts.transparent, opts.dpi, opts.width, opts.height
        );
        Ok(self
            .eval_js(&expr)
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn export_svg(&self) -> GgbResult<String> {
        Ok(self
            .eval_js("ggbApplet.exportSVG()")
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn export_pdf(&self) -> GgbResult<String> {
        // No documented parameterization (spec.md §9 Open Question) — view
        // settings applied to PNG/SVG are not forwarded here.
        Ok(self
            .eval_js("ggbApplet.exportPDF()")
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn set_animating(&self, name: &str, on: bool) -> GgbResult<()> {
        self.eval_js(&format!("ggbApplet.setAnimating(\"{name}\", {on})")).await?;
        Ok(())
    }

    async fn start_animation(&self) -> GgbResult<()> {
        self.eval_js("ggbApplet.startAnimation()").await?;
        Ok(())
    }

    async fn stop_animation(&self) -> GgbResult<()> {
        self.eval_js("ggbApplet.stopAnimation()").await?;
        Ok(())
    }

    async fn is_animation_running(&self) -> GgbResult<bool> {
        Ok(self
            .eval_js("ggbApplet.isAnimationRunning()")
            .await?
            .as_bool()
            .unwrap_or(false))
    }
}

/// Builds a new, already-`initialize`d driver for the Pool (spec.md §4.3.1,
/// §4.4 acquire path). Factored out so the Pool can be generic over how an
/// Instance comes into being (real browser vs. test double).
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn create(&self, config: &InstanceConfig) -> GgbResult<Box<dyn InstanceDriver>>;
}

pub struct ChromiumDriverFactory;

#[async_trait]
impl DriverFactory for ChromiumDriverFactory {
    async fn create(&self, config: &InstanceConfig) -> GgbResult<Box<dyn InstanceDriver>> {
        let mut driver = ChromiumDriver::new();
        driver.initialize(config).await?;
        Ok(Box::new(driver))
    }
}

/// Builds the default [`InstanceConfig`] for a freshly-created Instance from
/// process-wide configuration.
pub fn instance_config_from_service(config: &ServiceConfig) -> InstanceConfig {
    InstanceConfig {
        app_variant: config.app_variant,
        ..InstanceConfig::default()
    }
}

/// Ensures a call arriving before READY (or after DISPOSED) fails with the
/// dedicated kind rather than panicking (spec.md §4.3.1).
pub fn require_ready(state: InstanceState) -> GgbResult<()> {
    if state.is_usable() {
        Ok(())
    } else {
        Err(GgbError::InstanceNotReady(format!("{state:?}")))
    }
}

/// Timestamp helper re-exported for driver-adjacent call sites that want a
/// consistent "now" without importing `domain` directly.
pub fn timestamp() -> u64 {
    now_ms()
}

#[cfg(test)]
pub mod fake {
    //! A fully in-memory [`InstanceDriver`] used by pool/dispatcher tests
    //! (SPEC_FULL.md §8). Mirrors GeoGebra's semantics closely enough to
    //! exercise the contract without a real browser.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Inner {
        objects: HashMap<String, (ObjectKind, String)>,
        animating: bool,
    }

    pub struct FakeDriver {
        state: Mutex<InstanceState>,
        inner: Mutex<Inner>,
    }

    impl FakeDriver {
        pub fn new() -> Self {
            FakeDriver {
                state: Mutex::new(InstanceState::Ready),
                inner: Mutex::new(Inner::default()),
            }
        }
    }

    impl Default for FakeDriver {
        fn default() -> Self {
            Self::new()
        }
    }

    fn parse_point_assignment(cmd: &str) -> Option<(String, String)> {
        let (name, rest) = cmd.split_once('=')?;
        Some((name.trim().to_string(), rest.trim().to_string()))
    }

    #[async_trait]
    impl InstanceDriver for FakeDriver {
        fn state(&self) -> InstanceState {
            *self.state.lock().unwrap()
        }

        async fn initialize(&mut self, _config: &InstanceConfig) -> GgbResult<()> {
            *self.state.lock().unwrap() = InstanceState::Ready;
            Ok(())
        }

        async fn cleanup(&mut self) {
            *self.state.lock().unwrap() = InstanceState::Disposed;
        }

        async fn eval_command(&self, cmd: &str) -> GgbResult<EvalOutcome> {
            require_ready(self.state())?;
            let mut inner = self.inner.lock().unwrap();
            if let Some((name, rhs)) = parse_point_assignment(cmd) {
                if inner.objects.contains_key(&name) {
                    return Ok(EvalOutcome {
                        success: false,
                        result: Some("name already in use".to_string()),
                    });
                }
                let kind = if rhs.starts_with('(') {
                    ObjectKind::Point
                } else if rhs.contains("Segment(") {
                    ObjectKind::Segment
                } else if rhs.contains("Line(") {
                    ObjectKind::Line
                } else if rhs.contains("Curve(") {
                    ObjectKind::Curve
                } else if rhs.contains("ImplicitCurve(") {
                    ObjectKind::ImplicitCurve
                } else if name.ends_with("(x)") || name.contains('(') {
                    ObjectKind::Function
                } else {
                    ObjectKind::Other
                };
                let clean_name = name.split('(').next().unwrap_or(&name).to_string();
                inner.objects.insert(clean_name, (kind, rhs));
                return Ok(EvalOutcome {
                    success: true,
                    result: None,
                });
            }
            Ok(EvalOutcome {
                success: true,
                result: None,
            })
        }

        async fn exists(&self, name: &str) -> GgbResult<bool> {
            Ok(self.inner.lock().unwrap().objects.contains_key(name))
        }

        async fn is_defined(&self, name: &str) -> GgbResult<bool> {
            self.exists(name).await
        }

        async fn get_all_object_names(&self, kind: Option<ObjectKind>) -> GgbResult<Vec<String>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .objects
                .iter()
                .filter(|(_, (k, _))| kind.map_or(true, |want| *k == want))
                .map(|(n, _)| n.clone())
                .collect())
        }

        async fn get_object(&self, name: &str) -> GgbResult<GgbObject> {
            let inner = self.inner.lock().unwrap();
            let (kind, value) = inner
                .objects
                .get(name)
                .cloned()
                .unwrap_or((ObjectKind::Other, String::new()));
            Ok(GgbObject {
                name: name.to_string(),
                kind,
                visible: true,
                defined: inner.objects.contains_key(name),
                value_string: Some(value),
            })
        }

        async fn get_xcoord(&self, name: &str) -> GgbResult<f64> {
            let inner = self.inner.lock().unwrap();
            let Some((_, rhs)) = inner.objects.get(name) else {
                return Ok(f64::NAN);
            };
            Ok(parse_coords(rhs).map(|c| c.0).unwrap_or(f64::NAN))
        }

        async fn get_ycoord(&self, name: &str) -> GgbResult<f64> {
            let inner = self.inner.lock().unwrap();
            let Some((_, rhs)) = inner.objects.get(name) else {
                return Ok(f64::NAN);
            };
            Ok(parse_coords(rhs).map(|c| c.1).unwrap_or(f64::NAN))
        }

        async fn get_zcoord(&self, _name: &str) -> GgbResult<f64> {
            Ok(0.0)
        }

        async fn get_color(&self, _name: &str) -> GgbResult<String> {
            Ok("#000000".to_string())
        }

        async fn delete_object(&self, name: &str) -> GgbResult<()> {
            self.inner.lock().unwrap().objects.remove(name);
            Ok(())
        }

        async fn new_construction(&self) -> GgbResult<()> {
            let mut inner = self.inner.lock().unwrap();
            inner.objects.clear();
            inner.animating = false;
            Ok(())
        }

        async fn refresh_views(&self) -> GgbResult<()> {
            Ok(())
        }

        async fn set_coord_system(&self, _: f64, _: f64, _: f64, _: f64) -> GgbResult<()> {
            Ok(())
        }

        async fn set_axes_visible(&self, _: bool, _: bool) -> GgbResult<()> {
            Ok(())
        }

        async fn set_grid_visible(&self, _: bool) -> GgbResult<()> {
            Ok(())
        }

        async fn export_png(&self, opts: PngOptions) -> GgbResult<String> {
            opts.validate()?;
            Ok("ZmFrZS1wbmc=".to_string())
        }

        async fn export_svg(&self) -> GgbResult<String> {
            Ok("<svg/>".to_string())
        }

        async fn export_pdf(&self) -> GgbResult<String> {
            Ok("ZmFrZS1wZGY=".to_string())
        }

        async fn set_animating(&self, _name: &str, on: bool) -> GgbResult<()> {
            self.inner.lock().unwrap().animating = on;
            Ok(())
        }

        async fn start_animation(&self) -> GgbResult<()> {
            self.inner.lock().unwrap().animating = true;
            Ok(())
        }

        async fn stop_animation(&self) -> GgbResult<()> {
            self.inner.lock().unwrap().animating = false;
            Ok(())
        }

        async fn is_animation_running(&self) -> GgbResult<bool> {
            Ok(self.inner.lock().unwrap().animating)
        }
    }

    fn parse_coords(rhs: &str) -> Option<(f64, f64)> {
        let inner = rhs.trim().strip_prefix('(')?.strip_suffix(')')?;
        let mut parts = inner.split(',').map(|s| s.trim().parse::<f64>());
        let x = parts.next()?.ok()?;
        let y = parts.next()?.ok()?;
        Some((x, y))
    }

    #[tokio::test]
    async fn round_trips_point_coordinates() {
        let mut driver = FakeDriver::new();
        driver.initialize(&InstanceConfig::default()).await.unwrap();
        driver.eval_command("A = (1, 2)").await.unwrap();
        assert_eq!(driver.get_xcoord("A").await.unwrap(), 1.0);
        assert_eq!(driver.get_ycoord("A").await.unwrap(), 2.0);
    }

    #[tokio::test]
    async fn duplicate_name_reports_not_success() {
        let mut driver = FakeDriver::new();
        driver.initialize(&InstanceConfig::default()).await.unwrap();
        driver.eval_command("A = (1, 2)").await.unwrap();
        let outcome = driver.eval_command("A = (3, 4)").await.unwrap();
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn new_construction_clears_objects() {
        let mut driver = FakeDriver::new();
        driver.initialize(&InstanceConfig::default()).await.unwrap();
        driver.eval_command("A = (1, 2)").await.unwrap();
        driver.new_construction().await.unwrap();
        assert!(driver.get_all_object_names(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn animation_capture_yields_frames_in_order() {
        let driver = FakeDriver::new();
        let token = CancellationToken::new();
        let (frames, cancelled) = capture_animation(
            &driver,
            AnimationRequest {
                duration_ms: 200,
                frame_rate: 10,
                width: 320,
                height: 240,
            },
            &token,
        )
        .await
        .unwrap();
        assert!(!cancelled);
        assert_eq!(frames.len(), 2);
        assert!(frames.windows(2).all(|w| w[0].t_ms < w[1].t_ms));
    }

    #[tokio::test]
    async fn animation_capture_zero_duration_returns_empty() {
        let driver = FakeDriver::new();
        let token = CancellationToken::new();
        let (frames, cancelled) = capture_animation(
            &driver,
            AnimationRequest {
                duration_ms: 0,
                frame_rate: 10,
                width: 320,
                height: 240,
            },
            &token,
        )
        .await
        .unwrap();
        assert!(!cancelled);
        assert!(frames.is_empty());
    }

    #[tokio::test]
    async fn cancellation_returns_partial_sequence() {
        let driver = FakeDriver::new();
        let token = CancellationToken::new();
        token.cancel();
        let (frames, cancelled) = capture_animation(
            &driver,
            AnimationRequest {
                duration_ms: 1000,
                frame_rate: 10,
                width: 320,
                height: 240,
            },
            &token,
        )
        .await
        .unwrap();
        assert!(cancelled);
        assert!(frames.is_empty());
    }
}
