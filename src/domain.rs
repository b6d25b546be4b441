//! Shared vocabulary for the construction engine (spec.md §3).
//!
//! These types cross the tool-dispatch boundary as JSON, so every public type
//! here derives `Serialize`/`Deserialize`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppVariant;

/// Stable identifier for one pooled Instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    pub fn new() -> Self {
        InstanceId(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Config an Instance was launched with; part of its snapshot (spec.md §3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub app_variant: AppVariant,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub show_menu_bar: bool,
    pub show_tool_bar: bool,
    pub show_algebra_input: bool,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        InstanceConfig {
            app_variant: AppVariant::Classic,
            canvas_width: 800,
            canvas_height: 600,
            show_menu_bar: false,
            show_tool_bar: false,
            show_algebra_input: false,
        }
    }
}

/// Point-in-time snapshot of one Instance for the pool stats surface (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub id: InstanceId,
    pub created_at_ms: u64,
    pub last_used_at_ms: u64,
    pub usage_count: u64,
    pub active: bool,
    pub ready: bool,
    pub config: InstanceConfig,
}

/// Current wall-clock time in milliseconds since the epoch.
///
/// Centralized so every "now" in the pool/driver goes through one place.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A GeoGebra DSL command string, e.g. `A = (1, 2)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command(pub String);

impl Command {
    pub fn new(s: impl Into<String>) -> Self {
        Command(s.into())
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of a Construction Object (spec.md §3.1), as reported by the
/// bridge's `getObjectType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Point,
    Line,
    Segment,
    Conic,
    Function,
    Curve,
    ImplicitCurve,
    Polygon,
    Text,
    Slider,
    List,
    Image,
    Angle,
    Vector,
    Other,
}

impl ObjectKind {
    /// Parses the string GeoGebra's bridge reports back from `getObjectType`.
    pub fn from_ggb_str(s: &str) -> Self {
        match s {
            "point" => ObjectKind::Point,
            "line" => ObjectKind::Line,
            "segment" => ObjectKind::Segment,
            "conic" | "circle" => ObjectKind::Conic,
            "function" => ObjectKind::Function,
            "curve" => ObjectKind::Curve,
            "implicitpoly" | "implicitcurve" => ObjectKind::ImplicitCurve,
            "polygon" => ObjectKind::Polygon,
            "text" => ObjectKind::Text,
            "numeric" | "slider" => ObjectKind::Slider,
            "list" => ObjectKind::List,
            "image" => ObjectKind::Image,
            "angle" => ObjectKind::Angle,
            "vector" => ObjectKind::Vector,
            _ => ObjectKind::Other,
        }
    }
}

/// Style attributes attached to an Object (spec.md §3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStyle {
    pub color: Option<String>,
    pub thickness: Option<u8>,
    pub line_style: Option<LineStyle>,
    pub filling: Option<f64>,
    pub label_visible: Option<bool>,
    pub point_size: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStyle {
    Solid,
    Dashed,
    Dotted,
}

impl LineStyle {
    /// GeoGebra's `SetLineStyle` integer code (spec.md §4.2/§6.3).
    pub fn code(self) -> u32 {
        match self {
            LineStyle::Solid => 0,
            LineStyle::Dashed => 10,
            LineStyle::Dotted => 20,
        }
    }
}

/// One Construction Object, as reported back through the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GgbObject {
    pub name: String,
    pub kind: ObjectKind,
    pub visible: bool,
    pub defined: bool,
    pub value_string: Option<String>,
}

/// A single timing/outcome record pushed by the Performance Monitor (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub operation: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub duration_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
    pub memory_delta_bytes: i64,
    pub metadata: serde_json::Value,
}

/// One captured animation frame: base64 PNG at simulated time `t_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub t_ms: u64,
    pub png_base64: String,
}

/// An ordered, finite sequence of Frames plus encoding parameters (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimationArtifact {
    pub frames: Vec<Frame>,
    pub frame_rate: u32,
    pub width: u32,
    pub height: u32,
    pub cancelled: bool,
}
