use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

lazy_static! {
    static ref PLACEHOLDER_RE: Regex = Regex::new(r"\{([^}]+)\}").unwrap();
    static ref MUL_DIV_RE: Regex =
        Regex::new(r"(-?\d+(?:\.\d+)?)\s*([*/])\s*(-?\d+(?:\.\d+)?)").unwrap();
    static ref NUMBER_RE: Regex = Regex::new(r"^-?\d+(?:\.\d+)?$").unwrap();
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("invalid numeric token `{0}`")]
    BadNumber(String),
}

/// Whether `s` is a plain signed decimal number (the only value shape the
/// calculation engine accepts as formula input).
pub fn is_numeric(s: &str) -> bool {
    NUMBER_RE.is_match(s)
}

/// Evaluates a flat arithmetic expression over `+ - * /`.
///
/// The expression must already be free of field placeholders. Evaluation is
/// deliberately NOT standard-precedence: a first pass repeatedly collapses the
/// leftmost `<number> * <number>` / `<number> / <number>` pair until none
/// remains, then a second pass folds the rest left-to-right across `+`/`-`.
/// `10 + 5 * 2` happens to give 20, but longer chains follow the two-pass
/// collapse, not precedence climbing — e.g. `10 - 3 * -2` collapses to
/// `10--6` and folds to 4. Templates in the field rely on this traversal, so
/// it is pinned by golden tests rather than fixed.
pub fn evaluate(expression: &str) -> Result<f64, EvalError> {
    let collapsed = collapse_mul_div(expression)?;

    let mut total = 0.0;
    let mut op = '+';
    let mut start = 0;
    for (i, c) in collapsed.char_indices() {
        if c == '+' || c == '-' {
            apply(&mut total, op, collapsed[start..i].trim())?;
            op = c;
            start = i + 1;
        }
    }
    apply(&mut total, op, collapsed[start..].trim())?;
    Ok(total)
}

fn apply(total: &mut f64, op: char, token: &str) -> Result<(), EvalError> {
    if token.is_empty() {
        return Ok(());
    }
    let value: f64 = token
        .parse()
        .map_err(|_| EvalError::BadNumber(token.to_string()))?;
    match op {
        '-' => *total -= value,
        _ => *total += value,
    }
    Ok(())
}

fn collapse_mul_div(expression: &str) -> Result<String, EvalError> {
    let mut expr = expression.to_string();
    while let Some(caps) = MUL_DIV_RE.captures(&expr) {
        let lhs: f64 = caps[1]
            .parse()
            .map_err(|_| EvalError::BadNumber(caps[1].to_string()))?;
        let rhs: f64 = caps[3]
            .parse()
            .map_err(|_| EvalError::BadNumber(caps[3].to_string()))?;
        let value = match &caps[2] {
            "*" => lhs * rhs,
            _ => {
                if rhs == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                lhs / rhs
            }
        };
        let range = caps.get(0).map(|m| m.range()).unwrap_or_default();
        expr.replace_range(range, &value.to_string());
    }
    Ok(expr)
}

#[derive(Clone, Debug, PartialEq)]
enum Segment {
    Literal(String),
    Reference(String),
}

/// A format string parsed once into literal/reference segments.
///
/// Both calculation formulas and the report/preview output formats use the
/// same `{fieldId}` token grammar, so they share this representation instead
/// of re-scanning the raw string on every render.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextTemplate {
    segments: Vec<Segment>,
}

impl TextTemplate {
    pub fn parse(format: &str) -> Self {
        let mut segments = Vec::new();
        let mut last = 0;
        for caps in PLACEHOLDER_RE.captures_iter(format) {
            let token = caps.get(0).map(|m| m.range()).unwrap_or_default();
            if token.start > last {
                segments.push(Segment::Literal(format[last..token.start].to_string()));
            }
            segments.push(Segment::Reference(caps[1].to_string()));
            last = token.end;
        }
        if last < format.len() {
            segments.push(Segment::Literal(format[last..].to_string()));
        }
        TextTemplate { segments }
    }

    /// Referenced field ids in token order. Repeated references repeat.
    pub fn refs(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Reference(id) => Some(id.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Renders the template, replacing each reference with its value from
    /// `values`, or the literal `"0"` when the key is absent. Single pass:
    /// replacement text is never re-scanned for tokens.
    pub fn render(&self, values: &HashMap<String, String>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Reference(id) => {
                    out.push_str(values.get(id).map(String::as_str).unwrap_or("0"));
                }
            }
        }
        out
    }

    /// Like [`render`](Self::render), but drops every reference to `omit`
    /// entirely, swallowing one newline that immediately follows the dropped
    /// token. Used for optional fields whose absence must not leave a stray
    /// `0` or blank line in the output.
    pub fn render_omitting(&self, values: &HashMap<String, String>, omit: &str) -> String {
        let mut out = String::new();
        let mut swallow_newline = false;
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => {
                    let text = if swallow_newline {
                        text.strip_prefix('\n').unwrap_or(text)
                    } else {
                        text.as_str()
                    };
                    out.push_str(text);
                    swallow_newline = false;
                }
                Segment::Reference(id) if id == omit => swallow_newline = true,
                Segment::Reference(id) => {
                    out.push_str(values.get(id).map(String::as_str).unwrap_or("0"));
                    swallow_newline = false;
                }
            }
        }
        out
    }
}

/// One-shot convenience over [`TextTemplate`] for callers that do not keep
/// the parsed form around.
pub fn substitute(format: &str, values: &HashMap<String, String>) -> String {
    TextTemplate::parse(format).render(values)
}
