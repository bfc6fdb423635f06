#![allow(dead_code)]
//! Timing primitives: duration/delay/easing resolution and parameter
//! interpolation. Pure and stateless.

use hashbrown::HashMap;

use motive_api_core::ast::{Timing, TimingAst, TimingValue};
use motive_api_core::error::BuildError;
use motive_api_core::style::StyleValue;

/// The minimal schedulable unit: one frame.
pub const ONE_FRAME_IN_MS: f32 = 16.0;

/// Round an offset to 3 decimals; all emitted keyframe offsets go through
/// this so recomputing `time / duration` stays within tolerance.
#[inline]
pub fn round_offset(offset: f32) -> f32 {
    (offset * 1000.0).round() / 1000.0
}

/// Parse `"1s"`, `"250ms"` or a bare number (milliseconds).
fn parse_time_ms(token: &str) -> Option<f32> {
    let token = token.trim();
    let (digits, scale) = if let Some(d) = token.strip_suffix("ms") {
        (d, 1.0)
    } else if let Some(d) = token.strip_suffix('s') {
        (d, 1000.0)
    } else {
        (token, 1.0)
    };
    digits.trim().parse::<f32>().ok().map(|v| v * scale)
}

/// Resolve an option-level timing value to milliseconds.
pub fn resolve_timing_value(value: &TimingValue, errors: &mut Vec<BuildError>) -> f32 {
    match value {
        TimingValue::Number(n) => *n,
        TimingValue::Expr(expr) => match parse_time_ms(expr) {
            Some(ms) => ms,
            None => {
                errors.push(BuildError::InvalidTiming { expr: expr.clone() });
                0.0
            }
        },
    }
}

/// Parse a full timing expression: `"<duration> [<delay>] [<easing>]"`.
/// Malformed input records an error and yields a zero timing so the compile
/// pass can continue best-effort.
pub fn parse_timing_expr(expr: &str, errors: &mut Vec<BuildError>) -> Timing {
    let mut tokens = expr.split_whitespace();
    let invalid = |errors: &mut Vec<BuildError>| {
        errors.push(BuildError::InvalidTiming {
            expr: expr.to_string(),
        });
        Timing::default()
    };

    let duration = match tokens.next().and_then(parse_time_ms) {
        Some(d) => d,
        None => return invalid(errors),
    };

    let mut delay = 0.0;
    let mut easing: Option<String> = None;
    if let Some(second) = tokens.next() {
        match parse_time_ms(second) {
            Some(d) => delay = d,
            None => easing = Some(second.to_string()),
        }
    }
    if let Some(third) = tokens.next() {
        if easing.is_some() {
            return invalid(errors);
        }
        easing = Some(third.to_string());
    }
    if tokens.next().is_some() {
        return invalid(errors);
    }

    Timing {
        duration,
        delay,
        easing,
    }
}

/// Substitute `{{ name }}` templates in a text value against runtime params.
/// A missing parameter is reported to the error sink, never thrown.
pub fn interpolate_params(
    value: &StyleValue,
    params: &HashMap<String, StyleValue>,
    errors: &mut Vec<BuildError>,
) -> StyleValue {
    let text = match value {
        StyleValue::Number(_) => return value.clone(),
        StyleValue::Text(t) => t,
    };
    if !text.contains("{{") {
        return value.clone();
    }

    let mut out = String::new();
    let mut rest = text.as_str();
    let mut only_param: Option<&StyleValue> = None;
    let mut pieces = 0;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        if !rest[..start].trim().is_empty() {
            pieces += 1;
        }
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let name = after[..end].trim();
        match params.get(name) {
            Some(sub) => {
                only_param = Some(sub);
                pieces += 1;
                out.push_str(&sub.as_text());
            }
            None => {
                errors.push(BuildError::MissingParameter {
                    name: name.to_string(),
                });
                pieces += 1;
            }
        }
        rest = &after[end + 2..];
    }
    if !rest.is_empty() {
        if !rest.trim().is_empty() {
            pieces += 1;
        }
        out.push_str(rest);
    }

    // A value that is exactly one numeric param stays numeric.
    if pieces == 1 {
        if let Some(StyleValue::Number(n)) = only_param {
            return StyleValue::Number(*n);
        }
    }
    StyleValue::Text(out)
}

/// Resolve an animate timing, substituting params into the dynamic form.
pub fn resolve_timing(
    ast: &TimingAst,
    params: &HashMap<String, StyleValue>,
    errors: &mut Vec<BuildError>,
) -> Timing {
    match ast {
        TimingAst::Fixed(t) => t.clone(),
        TimingAst::Dynamic { expr } => {
            let substituted =
                interpolate_params(&StyleValue::Text(expr.clone()), params, errors).as_text();
            parse_timing_expr(&substituted, errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// it should parse seconds, milliseconds and bare numbers
    #[test]
    fn timing_expr_units() {
        let mut errors = Vec::new();
        let t = parse_timing_expr("1s 500ms ease-out", &mut errors);
        assert!(errors.is_empty());
        assert_eq!(t.duration, 1000.0);
        assert_eq!(t.delay, 500.0);
        assert_eq!(t.easing.as_deref(), Some("ease-out"));

        let t = parse_timing_expr("250", &mut errors);
        assert_eq!(t.duration, 250.0);
        assert_eq!(t.delay, 0.0);
        assert!(t.easing.is_none());

        let t = parse_timing_expr("100ms linear", &mut errors);
        assert_eq!(t.duration, 100.0);
        assert_eq!(t.easing.as_deref(), Some("linear"));
        assert!(errors.is_empty());
    }

    /// it should record an error for malformed expressions
    #[test]
    fn timing_expr_invalid() {
        let mut errors = Vec::new();
        let t = parse_timing_expr("fast", &mut errors);
        assert_eq!(t.duration, 0.0);
        assert_eq!(errors.len(), 1);
    }

    /// it should substitute params and keep single numeric params numeric
    #[test]
    fn param_interpolation() {
        let mut params = HashMap::new();
        params.insert("w".to_string(), StyleValue::Number(120.0));
        params.insert("color".to_string(), StyleValue::Text("red".into()));
        let mut errors = Vec::new();

        let v = interpolate_params(&StyleValue::Text("{{ w }}".into()), &params, &mut errors);
        assert_eq!(v, StyleValue::Number(120.0));

        let v = interpolate_params(
            &StyleValue::Text("{{ w }}px solid {{ color }}".into()),
            &params,
            &mut errors,
        );
        assert_eq!(v, StyleValue::Text("120px solid red".into()));
        assert!(errors.is_empty());
    }

    /// it should report missing params to the error sink
    #[test]
    fn param_missing() {
        let params = HashMap::new();
        let mut errors = Vec::new();
        interpolate_params(&StyleValue::Text("{{ nope }}".into()), &params, &mut errors);
        assert_eq!(
            errors,
            vec![BuildError::MissingParameter {
                name: "nope".into()
            }]
        );
    }

    /// it should resolve dynamic timings against params per invocation
    #[test]
    fn dynamic_timing() {
        let mut params = HashMap::new();
        params.insert("time".to_string(), StyleValue::Text("2s".into()));
        let mut errors = Vec::new();
        let t = resolve_timing(
            &TimingAst::Dynamic {
                expr: "{{ time }} ease-in".into(),
            },
            &params,
            &mut errors,
        );
        assert_eq!(t.duration, 2000.0);
        assert_eq!(t.easing.as_deref(), Some("ease-in"));
    }
}
