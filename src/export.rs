//! Export Post-processor (C8, spec.md §4.8).
//!
//! Normalizes whatever a driver's `export_png`/`export_svg`/`export_pdf`
//! handed back into the envelope shape tools hand to the dispatcher:
//! `{format, data, encoding, metadata}`.

use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Png,
    Svg,
    Pdf,
}

impl ExportFormat {
    fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Svg => "svg",
            ExportFormat::Pdf => "pdf",
        }
    }

    fn encoding(self) -> &'static str {
        match self {
            ExportFormat::Png | ExportFormat::Pdf => "base64",
            ExportFormat::Svg => "utf8",
        }
    }
}

/// View-affecting parameters recorded in the envelope's metadata, when the
/// caller supplied them (spec.md §6.2 `geogebra_export_png`).
#[derive(Debug, Clone, Default)]
pub struct ViewSettings {
    pub xmin: Option<f64>,
    pub xmax: Option<f64>,
    pub ymin: Option<f64>,
    pub ymax: Option<f64>,
    pub show_axes: Option<bool>,
    pub show_grid: Option<bool>,
}

impl ViewSettings {
    fn to_json(&self) -> Value {
        let mut map = Map::new();
        if let Some(v) = self.xmin {
            map.insert("xmin".to_string(), serde_json::json!(v));
        }
        if let Some(v) = self.xmax {
            map.insert("xmax".to_string(), serde_json::json!(v));
        }
        if let Some(v) = self.ymin {
            map.insert("ymin".to_string(), serde_json::json!(v));
        }
        if let Some(v) = self.ymax {
            map.insert("ymax".to_string(), serde_json::json!(v));
        }
        if let Some(v) = self.show_axes {
            map.insert("showAxes".to_string(), Value::Bool(v));
        }
        if let Some(v) = self.show_grid {
            map.insert("showGrid".to_string(), Value::Bool(v));
        }
        Value::Object(map)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportMetadata {
    pub scale: Option<f64>,
    pub transparent: Option<bool>,
    pub dpi: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub view_settings: ViewSettings,
}

/// Normalizes a raw facade export into the fields a handler merges into its
/// [`HandlerOutcome`](crate::registry::HandlerOutcome).
pub fn wrap(format: ExportFormat, raw: String, metadata: &ExportMetadata) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("format".to_string(), Value::String(format.as_str().to_string()));
    out.insert("data".to_string(), Value::String(raw));
    out.insert(
        "encoding".to_string(),
        Value::String(format.encoding().to_string()),
    );

    let mut meta = Map::new();
    if let Some(v) = metadata.scale {
        meta.insert("scale".to_string(), serde_json::json!(v));
    }
    if let Some(v) = metadata.transparent {
        meta.insert("transparent".to_string(), Value::Bool(v));
    }
    if let Some(v) = metadata.dpi {
        meta.insert("dpi".to_string(), serde_json::json!(v));
    }
    if let Some(v) = metadata.width {
        meta.insert("width".to_string(), serde_json::json!(v));
    }
    if let Some(v) = metadata.height {
        meta.insert("height".to_string(), serde_json::json!(v));
    }
    meta.insert("viewSettings".to_string(), metadata.view_settings.to_json());
    out.insert("metadata".to_string(), Value::Object(meta));

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_export_is_base64_encoded() {
        let wrapped = wrap(
            ExportFormat::Png,
            "aGVsbG8=".to_string(),
            &ExportMetadata::default(),
        );
        assert_eq!(wrapped["encoding"], "base64");
        assert_eq!(wrapped["format"], "png");
    }

    #[test]
    fn svg_export_is_utf8() {
        let wrapped = wrap(
            ExportFormat::Svg,
            "<svg/>".to_string(),
            &ExportMetadata::default(),
        );
        assert_eq!(wrapped["encoding"], "utf8");
    }

    #[test]
    fn metadata_carries_view_settings_when_present() {
        let metadata = ExportMetadata {
            scale: Some(2.0),
            view_settings: ViewSettings {
                xmin: Some(-5.0),
                xmax: Some(5.0),
                ..Default::default()
            },
            ..Default::default()
        };
        let wrapped = wrap(ExportFormat::Png, "x".to_string(), &metadata);
        let view = &wrapped["metadata"]["viewSettings"];
        assert_eq!(view["xmin"], -5.0);
        assert_eq!(view["xmax"], 5.0);
    }
}
