//! Output parsers for chip-tool transcripts.
//!
//! Everything here is pure text scraping over captured or streamed lines. No
//! parser performs I/O, and none of them fail: unrecognised input yields an
//! empty or sentinel result so the dispatcher can always answer the client.

pub mod ansi;
pub mod commissioning;
pub mod discovery;
pub mod report;
pub mod value;

pub use commissioning::{normalize_node_id, parse_pairing_output, parse_parts_list, PairingResult};
pub use discovery::{parse_discovery, DiscoveredDevice, DiscoveryParser};
pub use report::{ReportParser, ReportState, ReportedValue};
pub use value::{parse_read_output, AttributeValue};

const ERROR_MARKER: &str = "CHIP Error";
const STDERR_ERROR_MARKER: &str = "Error:";

/// Whether a run that exited cleanly still reported a failure in its output.
pub fn reports_error(stdout: &str, stderr: &str) -> bool {
    stdout.contains(ERROR_MARKER)
        || stderr.contains(ERROR_MARKER)
        || stderr.contains(STDERR_ERROR_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_markers() {
        assert!(reports_error("CHIP Error 0x32: Timeout", ""));
        assert!(reports_error("", "Error: bad argument"));
        assert!(!reports_error("Error: in stdout only", ""));
        assert!(!reports_error("Status=0x0", ""));
    }
}
