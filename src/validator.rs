//! Expression Validator (C1, spec.md §4.1).
//!
//! Guards the DSL surface before a command ever reaches a driver. This module
//! does no evaluation — only syntactic/semantic screening.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::LineStyle;

/// The expression classes the validator knows how to check (spec.md §4.1).
#[derive(Debug, Clone)]
pub enum ExpressionClass<'a> {
    /// `f(x) = ...`
    StandardFunction { body: &'a str },
    /// `x(t), y(t)` with an explicit parameter name (defaults to `t`).
    Parametric {
        x_expr: &'a str,
        y_expr: &'a str,
        parameter: &'a str,
    },
    /// `F(x, y) = 0`
    Implicit { body: &'a str },
    /// A one-`=` equation, e.g. for `Solve`.
    Equation { body: &'a str, target_var: &'a str },
}

const FUNCTION_WHITELIST: &[&str] = &[
    "sin", "cos", "tan", "asin", "acos", "atan", "sinh", "cosh", "tanh", "log", "ln", "exp",
    "sqrt", "abs", "floor", "ceil", "round", "sign", "max", "min", "pow", "mod",
];

fn safety_patterns() -> &'static Regex {
    static SAFETY: OnceLock<Regex> = OnceLock::new();
    SAFETY.get_or_init(|| {
        Regex::new(
            r"(?i)eval\(|setTimeout\(|setInterval\(|Function\(|new\s+Function|require\(|import\(|process|global|window|document|console|\.__proto__|constructor\(",
        )
        .expect("safety pattern set is a fixed, valid regex")
    })
}

fn function_call_token() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"[A-Za-z]+\(").expect("fixed regex"))
}

fn identifier_regex() -> &'static Regex {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("fixed regex"))
}

fn double_operator_regex() -> &'static Regex {
    static OP: OnceLock<Regex> = OnceLock::new();
    OP.get_or_init(|| Regex::new(r"[+\-*/^]\s*[+\-*/^]").expect("fixed regex"))
}

const ALLOWED_CHARS: &str = "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ \t+-*/^().,_";

/// The result of a validation check (spec.md §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub reason: Option<String>,
}

impl ValidationOutcome {
    fn ok() -> Self {
        ValidationOutcome {
            valid: true,
            reason: None,
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        ValidationOutcome {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Applied before every other rule, regardless of expression class.
fn safety_screen(raw: &str) -> Option<String> {
    if safety_patterns().is_match(raw) {
        Some(format!("input matches a disallowed construct: {raw:?}"))
    } else {
        None
    }
}

fn balanced_parens(s: &str) -> bool {
    let mut depth = 0i32;
    for c in s.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Checks the common body of a `f(x) = ...`-shaped function rule, without
/// the safety screen (callers run that separately up front).
fn check_function_rule(body: &str) -> Option<String> {
    if !body.chars().all(|c| ALLOWED_CHARS.contains(c)) {
        return Some("expression contains a disallowed character".to_string());
    }
    if !balanced_parens(body) {
        return Some("unbalanced parentheses".to_string());
    }
    for m in function_call_token().find_iter(body) {
        let name = &m.as_str()[..m.as_str().len() - 1];
        if !FUNCTION_WHITELIST.contains(&name) {
            return Some(format!("function `{name}` is not in the allowed set"));
        }
    }
    if double_operator_regex().is_match(body) {
        return Some("two operators may not appear in a row".to_string());
    }
    None
}

fn check_free_identifier(body: &str, ident: &str) -> bool {
    let token = Regex::new(&format!(r"\b{}\b", regex::escape(ident))).expect("fixed regex");
    token.is_match(body)
}

/// Validates a classified expression (spec.md §4.1).
pub fn validate_expression(class: &ExpressionClass) -> ValidationOutcome {
    let raw_for_safety: &str = match class {
        ExpressionClass::StandardFunction { body } => body,
        ExpressionClass::Parametric { x_expr, y_expr, .. } => {
            if let Some(reason) = safety_screen(x_expr).or_else(|| safety_screen(y_expr)) {
                return ValidationOutcome::fail(reason);
            }
            return validate_parametric(class);
        }
        ExpressionClass::Implicit { body } => body,
        ExpressionClass::Equation { body, .. } => body,
    };

    if let Some(reason) = safety_screen(raw_for_safety) {
        return ValidationOutcome::fail(reason);
    }

    match class {
        ExpressionClass::StandardFunction { body } => match check_function_rule(body) {
            Some(reason) => ValidationOutcome::fail(reason),
            None => ValidationOutcome::ok(),
        },
        ExpressionClass::Implicit { body } => {
            if let Some(reason) = check_function_rule(body) {
                return ValidationOutcome::fail(reason);
            }
            if !check_free_identifier(body, "x") || !check_free_identifier(body, "y") {
                return ValidationOutcome::fail("implicit expression must mention both x and y");
            }
            ValidationOutcome::ok()
        }
        ExpressionClass::Equation { body, target_var } => {
            if !identifier_regex().is_match(target_var) {
                return ValidationOutcome::fail("target variable is not a valid identifier");
            }
            if body.matches('=').count() != 1 {
                return ValidationOutcome::fail("equation must contain exactly one `=`");
            }
            if !check_free_identifier(body, target_var) {
                return ValidationOutcome::fail(format!(
                    "equation does not mention target variable `{target_var}`"
                ));
            }
            ValidationOutcome::ok()
        }
        ExpressionClass::Parametric { .. } => unreachable!("handled above"),
    }
}

fn validate_parametric(class: &ExpressionClass) -> ValidationOutcome {
    let ExpressionClass::Parametric {
        x_expr,
        y_expr,
        parameter,
    } = class
    else {
        unreachable!()
    };

    if !identifier_regex().is_match(parameter) {
        return ValidationOutcome::fail("parameter name is not a valid identifier");
    }
    for (side, expr) in [("x", *x_expr), ("y", *y_expr)] {
        if let Some(reason) = check_function_rule(expr) {
            return ValidationOutcome::fail(format!("{side}(t): {reason}"));
        }
        if !check_free_identifier(expr, parameter) {
            return ValidationOutcome::fail(format!(
                "{side}(t) does not reference parameter `{parameter}`"
            ));
        }
    }
    ValidationOutcome::ok()
}

/// Screens a raw DSL command string (the `geogebra_eval_command` surface)
/// against the same safety patterns applied to every classified expression —
/// this is the one tool that hands arbitrary DSL text straight to the
/// bridge, so it gets the guard even though it is never classified.
pub fn screen_raw_command(raw: &str) -> ValidationOutcome {
    match safety_screen(raw) {
        Some(reason) => ValidationOutcome::fail(reason),
        None => ValidationOutcome::ok(),
    }
}

/// Validates a numeric domain/range pair (spec.md §4.1).
pub fn validate_range(min: f64, max: f64) -> ValidationOutcome {
    if !min.is_finite() || !max.is_finite() {
        return ValidationOutcome::fail("bounds must be finite");
    }
    if min >= max {
        return ValidationOutcome::fail("min must be strictly less than max");
    }
    ValidationOutcome::ok()
}

const NAMED_COLORS: &[&str] = &[
    "black", "white", "red", "green", "blue", "yellow", "orange", "purple", "gray", "grey",
    "cyan", "magenta", "brown", "pink",
];

fn hex_color_regex() -> &'static Regex {
    static HEX: OnceLock<Regex> = OnceLock::new();
    HEX.get_or_init(|| Regex::new(r"^#([0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").expect("fixed regex"))
}

fn rgb_color_regex() -> &'static Regex {
    static RGB: OnceLock<Regex> = OnceLock::new();
    RGB.get_or_init(|| {
        Regex::new(r"^rgb\(\s*\d{1,3}\s*,\s*\d{1,3}\s*,\s*\d{1,3}\s*\)$").expect("fixed regex")
    })
}

/// Validates a color token: `#RRGGBB`, `#RGB`, `rgb(r,g,b)`, or a named color.
pub fn validate_color(raw: &str) -> ValidationOutcome {
    if hex_color_regex().is_match(raw)
        || rgb_color_regex().is_match(raw)
        || NAMED_COLORS.contains(&raw.to_ascii_lowercase().as_str())
    {
        ValidationOutcome::ok()
    } else {
        ValidationOutcome::fail(format!("`{raw}` is not a recognized color"))
    }
}

/// Validates a line thickness (spec.md §4.1: integer in [1, 10]).
pub fn validate_thickness(t: i64) -> ValidationOutcome {
    if (1..=10).contains(&t) {
        ValidationOutcome::ok()
    } else {
        ValidationOutcome::fail("thickness must be between 1 and 10")
    }
}

/// Parses and validates a line style name into the typed `LineStyle`.
pub fn parse_line_style(raw: &str) -> Result<LineStyle, ValidationOutcome> {
    match raw {
        "solid" => Ok(LineStyle::Solid),
        "dashed" => Ok(LineStyle::Dashed),
        "dotted" => Ok(LineStyle::Dotted),
        other => Err(ValidationOutcome::fail(format!(
            "`{other}` is not one of solid, dashed, dotted"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_whitelisted_function() {
        let r = validate_expression(&ExpressionClass::StandardFunction {
            body: "sin(x) + sqrt(x^2 - 2*x - 3)",
        });
        assert!(r.valid, "{r:?}");
    }

    #[test]
    fn rejects_unknown_function() {
        let r = validate_expression(&ExpressionClass::StandardFunction { body: "hack(x)" });
        assert!(!r.valid);
    }

    #[test]
    fn rejects_double_operator() {
        let r = validate_expression(&ExpressionClass::StandardFunction { body: "x ** 2" });
        assert!(!r.valid);
    }

    #[test]
    fn rejects_unbalanced_parens() {
        let r = validate_expression(&ExpressionClass::StandardFunction { body: "sin(x" });
        assert!(!r.valid);
    }

    #[test]
    fn safety_screen_rejects_eval() {
        let r = validate_expression(&ExpressionClass::StandardFunction {
            body: "eval(x)",
        });
        assert!(!r.valid);
    }

    #[test]
    fn safety_screen_is_case_insensitive() {
        let r = validate_expression(&ExpressionClass::StandardFunction {
            body: "EVAL(x)",
        });
        assert!(!r.valid);
    }

    #[test]
    fn parametric_requires_parameter_reference() {
        let r = validate_expression(&ExpressionClass::Parametric {
            x_expr: "cos(t)",
            y_expr: "sin(t)",
            parameter: "t",
        });
        assert!(r.valid, "{r:?}");

        let r = validate_expression(&ExpressionClass::Parametric {
            x_expr: "cos(s)",
            y_expr: "sin(t)",
            parameter: "t",
        });
        assert!(!r.valid);
    }

    #[test]
    fn implicit_requires_both_x_and_y() {
        let r = validate_expression(&ExpressionClass::Implicit {
            body: "x^2 + y^2 - 1",
        });
        assert!(r.valid, "{r:?}");

        let r = validate_expression(&ExpressionClass::Implicit { body: "x^2 - 1" });
        assert!(!r.valid);
    }

    #[test]
    fn equation_requires_exactly_one_equals() {
        let r = validate_expression(&ExpressionClass::Equation {
            body: "x + y = 5",
            target_var: "x",
        });
        assert!(r.valid, "{r:?}");

        let r = validate_expression(&ExpressionClass::Equation {
            body: "x = y = 5",
            target_var: "x",
        });
        assert!(!r.valid);
    }

    #[test]
    fn range_requires_min_less_than_max() {
        assert!(validate_range(0.0, 1.0).valid);
        assert!(!validate_range(1.0, 1.0).valid);
        assert!(!validate_range(2.0, 1.0).valid);
        assert!(!validate_range(f64::NAN, 1.0).valid);
    }

    #[test]
    fn colors_accept_hex_rgb_and_named() {
        assert!(validate_color("#FF00AA").valid);
        assert!(validate_color("#f0a").valid);
        assert!(validate_color("rgb(10, 20, 30)").valid);
        assert!(validate_color("blue").valid);
        assert!(!validate_color("notacolor").valid);
    }

    #[test]
    fn screen_raw_command_rejects_disallowed_constructs() {
        assert!(screen_raw_command("A = (1, 2)").valid);
        assert!(!screen_raw_command("window.alert(1)").valid);
    }

    #[test]
    fn thickness_bounds() {
        assert!(validate_thickness(1).valid);
        assert!(validate_thickness(10).valid);
        assert!(!validate_thickness(0).valid);
        assert!(!validate_thickness(11).valid);
    }
}
