//! Command Translator (C3, spec.md §4.2).
//!
//! Pure functions: structured tool arguments in, an ordered list of DSL
//! `Command`s out. No I/O, no validation (that is C1's job, run by the
//! dispatcher before translation).

use crate::domain::{Command, LineStyle};

/// Styling to apply as side-commands after an object is created (spec.md
/// §4.2, §9 "Styling as post-commands").
#[derive(Debug, Clone, Default)]
pub struct Styling {
    pub color: Option<String>,
    pub thickness: Option<u8>,
    pub line_style: Option<LineStyle>,
}

fn styling_commands(name: &str, styling: &Styling) -> Vec<Command> {
    let mut out = Vec::new();
    if let Some(color) = &styling.color {
        out.push(Command::new(format!("SetColor({name}, \"{color}\")")));
    }
    if let Some(thickness) = styling.thickness {
        out.push(Command::new(format!("SetLineThickness({name}, {thickness})")));
    }
    if let Some(style) = styling.line_style {
        out.push(Command::new(format!("SetLineStyle({name}, {})", style.code())));
    }
    out
}

/// `name = (x, y)` or `name = (x, y, z)` (spec.md §4.2).
pub fn point(name: &str, x: f64, y: f64, z: Option<f64>) -> Vec<Command> {
    let coords = match z {
        Some(z) => format!("({x}, {y}, {z})"),
        None => format!("({x}, {y})"),
    };
    vec![Command::new(format!("{name} = {coords}"))]
}

/// `name = Line(P, Q)`.
pub fn line(name: &str, p: &str, q: &str) -> Vec<Command> {
    vec![Command::new(format!("{name} = Line({p}, {q})"))]
}

/// `name = Segment(P, Q)`.
pub fn segment(name: &str, p: &str, q: &str) -> Vec<Command> {
    vec![Command::new(format!("{name} = Segment({p}, {q})"))]
}

/// `name = Vector(P, Q)`.
pub fn vector(name: &str, p: &str, q: &str) -> Vec<Command> {
    vec![Command::new(format!("{name} = Vector({p}, {q})"))]
}

/// The three circle constructions spec.md §4.2 names.
pub enum CircleSpec<'a> {
    CenterRadius { center: &'a str, radius: f64 },
    CenterPoint { center: &'a str, point: &'a str },
    ThreePoints { a: &'a str, b: &'a str, c: &'a str },
}

pub fn circle(name: &str, spec: &CircleSpec) -> Vec<Command> {
    let args = match spec {
        CircleSpec::CenterRadius { center, radius } => format!("{center}, {radius}"),
        CircleSpec::CenterPoint { center, point } => format!("{center}, {point}"),
        CircleSpec::ThreePoints { a, b, c } => format!("{a}, {b}, {c}"),
    };
    vec![Command::new(format!("{name} = Circle({args})"))]
}

/// `name = Polygon(v1, v2, ...)`, or a bare `Polygon(v1, v2, ...)` when no
/// name is given — GeoGebra assigns its own labels to the resulting polygon
/// and its sides in that case (spec.md §6.2 `geogebra_create_polygon` takes
/// only a vertex list).
pub fn polygon(name: Option<&str>, vertices: &[String]) -> Vec<Command> {
    let call = format!("Polygon({})", vertices.join(", "));
    let cmd = match name {
        Some(name) => format!("{name} = {call}"),
        None => call,
    };
    vec![Command::new(cmd)]
}

/// Unrestricted-domain `name(x) = expr`, or the restricted-domain `If(...)`
/// form when `x_min`/`x_max` are given (spec.md §4.2).
pub fn function_plot(
    name: &str,
    expr: &str,
    domain: Option<(f64, f64)>,
    styling: &Styling,
) -> Vec<Command> {
    let mut out = vec![match domain {
        Some((x_min, x_max)) => Command::new(format!(
            "{name}(x) = If({x_min} <= x <= {x_max}, {expr}, ?)"
        )),
        None => Command::new(format!("{name}(x) = {expr}")),
    }];
    out.extend(styling_commands(name, styling));
    out
}

/// `name = Curve(xExpr, yExpr, p, tMin, tMax)`.
pub fn parametric_plot(
    name: &str,
    x_expr: &str,
    y_expr: &str,
    parameter: &str,
    t_min: f64,
    t_max: f64,
    styling: &Styling,
) -> Vec<Command> {
    let mut out = vec![Command::new(format!(
        "{name} = Curve({x_expr}, {y_expr}, {parameter}, {t_min}, {t_max})"
    ))];
    out.extend(styling_commands(name, styling));
    out
}

/// `name = ImplicitCurve(expr)` — `expr` is treated as `=0` (spec.md §4.2).
pub fn implicit_plot(name: &str, expr: &str, styling: &Styling) -> Vec<Command> {
    let mut out = vec![Command::new(format!("{name} = ImplicitCurve({expr})"))];
    out.extend(styling_commands(name, styling));
    out
}

/// Emits the styling side-commands for an already-existing object (spec.md
/// §6.2 `geogebra_set_object_style`).
pub fn set_object_style(name: &str, styling: &Styling) -> Vec<Command> {
    styling_commands(name, styling)
}

/// Decides whether `content` is "already quoted" by spec.md §4.2's rule:
/// starts and ends with `"`, or contains a dynamic-concat ` + `. No
/// unescaping is performed in either case (Open Question, spec.md §9,
/// preserved as-is).
fn is_already_quoted(content: &str) -> bool {
    (content.starts_with('"') && content.ends_with('"') && content.len() >= 2)
        || content.contains(" + ")
}

/// `name = Text(contentExpr, (x, y))` (spec.md §4.2, scenario 6 in §8).
pub fn text(name: &str, content: &str, x: f64, y: f64) -> Vec<Command> {
    let content_expr = if is_already_quoted(content) {
        content.to_string()
    } else {
        format!("\"{content}\"")
    };
    vec![Command::new(format!(
        "{name} = Text({content_expr}, ({x}, {y}))"
    ))]
}

/// `geogebra_create_text`'s optional `color`/`fontSize` styling, applied as
/// side-commands after the `Text(...)` call (spec.md §6.2, §9).
pub fn text_styled(
    name: &str,
    content: &str,
    x: f64,
    y: f64,
    color: Option<&str>,
    font_size: Option<u32>,
) -> Vec<Command> {
    let mut out = text(name, content, x, y);
    if let Some(color) = color {
        out.push(Command::new(format!("SetColor({name}, \"{color}\")")));
    }
    if let Some(size) = font_size {
        out.push(Command::new(format!("SetFontSize({name}, {size})")));
    }
    out
}

/// `name = Slider(min, max, increment, initial, width, isAngle, horizontal,
/// animating, random)` (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct SliderSpec {
    pub min: f64,
    pub max: f64,
    pub increment: f64,
    pub initial: f64,
    pub width: f64,
    pub is_angle: bool,
    pub horizontal: bool,
    pub animating: bool,
    pub random: bool,
}

pub fn slider(name: &str, spec: &SliderSpec) -> Vec<Command> {
    vec![Command::new(format!(
        "{name} = Slider({}, {}, {}, {}, {}, {}, {}, {}, {})",
        spec.min,
        spec.max,
        spec.increment,
        spec.initial,
        spec.width,
        spec.is_angle,
        spec.horizontal,
        spec.animating,
        spec.random,
    ))]
}

/// `geogebra_create_slider` additionally places the slider at an on-screen
/// position and may attach a caption — both are applied as side-commands
/// after the `Slider(...)` call itself (spec.md §9 "Styling as
/// post-commands").
pub fn slider_placed(
    name: &str,
    spec: &SliderSpec,
    x: f64,
    y: f64,
    caption: Option<&str>,
) -> Vec<Command> {
    let mut out = slider(name, spec);
    out.push(Command::new(format!("SetCoords({name}, {x}, {y})")));
    if let Some(caption) = caption {
        out.push(Command::new(format!("SetCaption({name}, \"{caption}\")")));
    }
    out
}

/// A bare `eval_command` passthrough — already a full DSL command.
pub fn raw(cmd: &str) -> Vec<Command> {
    vec![Command::new(cmd.to_string())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_2d_and_3d() {
        assert_eq!(point("A", 1.0, 2.0, None)[0].0, "A = (1, 2)");
        assert_eq!(point("A", 1.0, 2.0, Some(3.0))[0].0, "A = (1, 2, 3)");
    }

    #[test]
    fn function_plot_restricted_domain_uses_if() {
        let cmds = function_plot("f", "x^2", Some((0.0, 5.0)), &Styling::default());
        assert_eq!(cmds[0].0, "f(x) = If(0 <= x <= 5, x^2, ?)");
    }

    #[test]
    fn function_plot_unrestricted() {
        let cmds = function_plot("f", "x^2", None, &Styling::default());
        assert_eq!(cmds[0].0, "f(x) = x^2");
    }

    #[test]
    fn styling_follows_creation_command() {
        let styling = Styling {
            color: Some("#FF0000".to_string()),
            thickness: Some(3),
            line_style: Some(LineStyle::Dashed),
        };
        let cmds = function_plot("f", "x", None, &styling);
        assert_eq!(cmds.len(), 4);
        assert_eq!(cmds[1].0, "SetColor(f, \"#FF0000\")");
        assert_eq!(cmds[2].0, "SetLineThickness(f, 3)");
        assert_eq!(cmds[3].0, "SetLineStyle(f, 10)");
    }

    #[test]
    fn parametric_plot_matches_scenario_5() {
        let cmds = parametric_plot(
            "c",
            "cos(t)",
            "sin(t)",
            "t",
            0.0,
            6.283185307179586,
            &Styling::default(),
        );
        assert!(cmds[0].0.starts_with("c = Curve(cos(t), sin(t), t, 0, 6.283"));
    }

    #[test]
    fn text_quoting_matches_scenario_6() {
        let cmds = text("t", "\"Value: \" + 5 + 3", 1.0, 2.0);
        assert_eq!(cmds[0].0, "t = Text(\"Value: \" + 5 + 3, (1, 2))");
    }

    #[test]
    fn text_wraps_plain_content() {
        let cmds = text("t", "hello", 1.0, 2.0);
        assert_eq!(cmds[0].0, "t = Text(\"hello\", (1, 2))");
    }

    #[test]
    fn text_already_quoted_is_preserved_verbatim() {
        let cmds = text("t", "\"already quoted\"", 0.0, 0.0);
        assert_eq!(cmds[0].0, "t = Text(\"already quoted\", (0, 0))");
    }
}
