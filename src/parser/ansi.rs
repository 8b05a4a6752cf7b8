//! Strip terminal control sequences from tool output lines.
//!
//! chip-tool colours its log prefixes when it thinks it is attached to a
//! terminal, and some builds emit carriage returns. Every parser runs its
//! input through [`strip_control`] before matching markers.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// CSI sequences, OSC sequences (BEL or ST terminated), two-byte escapes and
/// the remaining C0 controls except tab and newline.
static CONTROL_SEQUENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]|[\x00-\x08\x0b-\x1f\x7f]",
    )
    .expect("control sequence pattern is valid")
});

/// Remove terminal control sequences from `line`.
///
/// Borrows when there is nothing to strip.
pub fn strip_control(line: &str) -> Cow<'_, str> {
    CONTROL_SEQUENCE.replace_all(line, "")
}
