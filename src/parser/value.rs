//! Attribute values recovered from one-shot `read` invocations.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Serialize, Serializer};

use super::ansi::strip_control;

/// Prefix carried by values that could not be parsed out of the tool output.
pub const RAW_PREFIX: &str = "Raw: ";

static VALUE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bValue = (.*)$").expect("value pattern is valid"));

/// A dynamically typed attribute value.
///
/// The concrete variant is decided per line from what the tool printed, not
/// declared ahead of time. [`AttributeValue::Raw`] wraps tool output that held
/// no recognisable value and serializes with the [`RAW_PREFIX`] sentinel so
/// clients can tell a parse failure from a genuine string attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Raw(String),
}

impl AttributeValue {
    /// Interpret a trimmed value in priority order: boolean, integer, float,
    /// quoted string, bare string.
    pub fn interpret(text: &str) -> Self {
        let text = text.trim();
        if let Some(b) = parse_bool(text) {
            return AttributeValue::Bool(b);
        }
        if let Ok(i) = text.parse::<i64>() {
            return AttributeValue::Int(i);
        }
        if let Some(f) = parse_finite_float(text) {
            return AttributeValue::Float(f);
        }
        AttributeValue::Text(unquote(text).to_string())
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, AttributeValue::Raw(_))
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bool(b) => write!(f, "{b}"),
            AttributeValue::Int(i) => write!(f, "{i}"),
            AttributeValue::Float(x) => write!(f, "{x}"),
            AttributeValue::Text(s) => f.write_str(s),
            AttributeValue::Raw(s) => write!(f, "{RAW_PREFIX}{s}"),
        }
    }
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AttributeValue::Bool(b) => serializer.serialize_bool(*b),
            AttributeValue::Int(i) => serializer.serialize_i64(*i),
            AttributeValue::Float(x) => serializer.serialize_f64(*x),
            AttributeValue::Text(s) => serializer.serialize_str(s),
            AttributeValue::Raw(_) => serializer.collect_str(self),
        }
    }
}

/// Extract the attribute value from the captured stdout of a `read`.
///
/// Never fails: when no `Value = ...` line exists, the whole stdout comes
/// back as [`AttributeValue::Raw`].
pub fn parse_read_output(stdout: &str) -> AttributeValue {
    for line in stdout.lines() {
        let clean = strip_control(line);
        if let Some(caps) = VALUE_LINE.captures(&clean) {
            return AttributeValue::interpret(&caps[1]);
        }
    }
    AttributeValue::Raw(stdout.to_string())
}

pub(crate) fn parse_bool(text: &str) -> Option<bool> {
    if text.eq_ignore_ascii_case("true") {
        Some(true)
    } else if text.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// `f64::from_str` accepts `inf` and `NaN`, neither of which survive JSON.
pub(crate) fn parse_finite_float(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|f| f.is_finite())
}

pub(crate) fn unquote(text: &str) -> &str {
    text.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(text)
}
