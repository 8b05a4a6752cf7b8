//! Line-at-a-time recognizer for subscription report blocks.
//!
//! A long-lived `subscribe` process prints a `ReportDataMessage =` block per
//! report. Inside a block the first `Data = <value> (<TYPE>)` line carries the
//! new attribute value; the parser then returns to idle. The block's own
//! closing brace also returns to idle so a block without data never swallows
//! the next one. Nested braces inside the block do not.

use std::sync::LazyLock;

use regex::Regex;

use super::ansi::strip_control;
use super::value::{parse_bool, parse_finite_float, unquote, AttributeValue};

const REPORT_MARKER: &str = "ReportDataMessage =";
const DMG_TERMINATOR: &str = "CHIP:DMG: }";

static DATA_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bData = (.*?)\s*\(([A-Za-z0-9_]+)\),?\s*$").expect("data pattern is valid")
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportState {
    #[default]
    Idle,
    InsideReportBlock,
}

/// A value pulled out of a report block.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedValue {
    pub value: AttributeValue,
    pub type_tag: String,
}

#[derive(Debug, Default)]
pub struct ReportParser {
    state: ReportState,
}

impl ReportParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ReportState {
        self.state
    }

    /// Advance the recognizer by one line, yielding a value when a data line
    /// completes the current block.
    pub fn feed_line(&mut self, raw: &str) -> Option<ReportedValue> {
        let clean = strip_control(raw);

        if clean.contains(REPORT_MARKER) {
            self.state = ReportState::InsideReportBlock;
            return None;
        }
        if self.state == ReportState::Idle {
            return None;
        }

        if let Some(caps) = DATA_LINE.captures(&clean) {
            self.state = ReportState::Idle;
            let type_tag = caps[2].to_string();
            return Some(ReportedValue {
                value: decode_typed(&caps[1], &type_tag),
                type_tag,
            });
        }
        let trimmed = clean.trim();
        if clean.contains(DMG_TERMINATOR) || trimmed.ends_with("[DMG] }") {
            self.state = ReportState::Idle;
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeFamily {
    Boolean,
    Integer,
    Float,
    Text,
    Other,
}

fn family(tag: &str) -> TypeFamily {
    let tag = tag.to_ascii_uppercase();
    if tag == "BOOLEAN" {
        TypeFamily::Boolean
    } else if ["INT", "UINT", "ENUM", "BITMAP"]
        .iter()
        .any(|p| tag.starts_with(p))
    {
        TypeFamily::Integer
    } else if matches!(tag.as_str(), "FLOAT" | "DOUBLE" | "SINGLE") {
        TypeFamily::Float
    } else if matches!(
        tag.as_str(),
        "UTF8S" | "CHAR_STRING" | "OCTET_STRING" | "LONG_CHAR_STRING" | "LONG_OCTET_STRING"
    ) {
        TypeFamily::Text
    } else {
        TypeFamily::Other
    }
}

/// Decode `value` according to its declared type tag.
///
/// When the value does not parse as its declared family, the raw text is kept
/// as a string.
pub fn decode_typed(value: &str, type_tag: &str) -> AttributeValue {
    let value = value.trim();
    let decoded = match family(type_tag) {
        TypeFamily::Boolean => parse_bool(value).map(AttributeValue::Bool),
        TypeFamily::Integer => value.parse::<i64>().ok().map(AttributeValue::Int),
        TypeFamily::Float => parse_finite_float(value).map(AttributeValue::Float),
        TypeFamily::Text => Some(AttributeValue::Text(unquote(value).to_string())),
        TypeFamily::Other => None,
    };
    decoded.unwrap_or_else(|| {
        tracing::debug!(value, type_tag, "report value kept as text");
        AttributeValue::Text(value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
[1700000000.1] [1:2] [DMG] ReportDataMessage =
[1700000000.1] [1:2] [DMG] {
[1700000000.1] [1:2] [DMG] \tAttributeReportIBs =
[1700000000.1] [1:2] [DMG] \t\t\tData = true (BOOLEAN),
[1700000000.1] [1:2] [DMG] }
";

    fn values(text: &str) -> Vec<ReportedValue> {
        let mut parser = ReportParser::new();
        text.lines().filter_map(|l| parser.feed_line(l)).collect()
    }

    #[test]
    fn single_boolean_report() {
        let got = values(REPORT);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].value, AttributeValue::Bool(true));
        assert_eq!(got[0].type_tag, "BOOLEAN");
    }

    #[test]
    fn consecutive_reports_each_yield() {
        let text = REPORT.replace("true", "false");
        let both = format!("{REPORT}{text}");
        let got = values(&both);
        assert_eq!(got.len(), 2);
        assert_eq!(got[1].value, AttributeValue::Bool(false));
    }

    #[test]
    fn data_outside_block_is_ignored() {
        assert!(values("Data = 5 (UINT8)\n").is_empty());
    }

    #[test]
    fn terminator_resets_state() {
        let mut parser = ReportParser::new();
        parser.feed_line("ReportDataMessage =");
        assert_eq!(parser.state(), ReportState::InsideReportBlock);
        parser.feed_line("[DMG] CHIP:DMG: }");
        assert_eq!(parser.state(), ReportState::Idle);
        assert_eq!(parser.feed_line("Data = 9 (UINT8)"), None);
    }

    #[test]
    fn nested_brace_does_not_close_block() {
        let text = "\
ReportDataMessage =
{
\tAttributeReportIBs =
\t[
\t\tAttributeDataIB =
\t\t{
\t\t\tAttributePathIB =
\t\t\t{
\t\t\t\tEndpoint = 0x1,
\t\t\t}
\t\t\tData = 42 (UINT8),
\t\t}
\t]
}
";
        let got = values(text);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].value, AttributeValue::Int(42));
    }

    #[test]
    fn integer_families() {
        assert_eq!(decode_typed("254", "UINT8"), AttributeValue::Int(254));
        assert_eq!(decode_typed("-3", "INT16S"), AttributeValue::Int(-3));
        assert_eq!(decode_typed("2", "ENUM8"), AttributeValue::Int(2));
        assert_eq!(decode_typed("1", "BITMAP32"), AttributeValue::Int(1));
    }

    #[test]
    fn float_and_string_families() {
        assert_eq!(decode_typed("21.5", "FLOAT"), AttributeValue::Float(21.5));
        assert_eq!(
            decode_typed("\"Kitchen\"", "UTF8S"),
            AttributeValue::Text("Kitchen".into())
        );
    }

    #[test]
    fn mismatched_value_falls_back_to_text() {
        assert_eq!(
            decode_typed("maybe", "BOOLEAN"),
            AttributeValue::Text("maybe".into())
        );
        assert_eq!(
            decode_typed("abc", "STRUCT"),
            AttributeValue::Text("abc".into())
        );
    }

    #[test]
    fn string_value_containing_parentheses() {
        let text = "ReportDataMessage =\nData = \"a (b)\" (UTF8S),\n";
        assert_eq!(values(text)[0].value, AttributeValue::Text("a (b)".into()));
    }
}
