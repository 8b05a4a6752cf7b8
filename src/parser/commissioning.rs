//! Interpret `pairing` and `descriptor read parts-list` output.

use std::sync::LazyLock;

use regex::Regex;

use super::ansi::strip_control;

static COMMISSIONED_NODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:Successfully commissioned device with node ID|Commissioning complete for node ID) (0x[0-9a-fA-F]+|\d+)",
    )
    .expect("commissioned node pattern is valid")
});

static PARTS_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\d+\]:\s*(\d+)\s*$").expect("parts entry pattern is valid"));

const SUCCESS_MARKERS: [&str; 2] = [
    "Device commissioning completed with success",
    "Commissioning success",
];

/// What the pairing transcript says about the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingResult {
    /// The tool named the node id it commissioned, normalized to decimal.
    Commissioned { node_id: String },
    /// Success was reported without a node id.
    ReportedSuccess,
    Unclear,
}

pub fn parse_pairing_output(stdout: &str) -> PairingResult {
    let mut reported_success = false;
    for line in stdout.lines() {
        let clean = strip_control(line);
        if let Some(caps) = COMMISSIONED_NODE.captures(&clean) {
            return PairingResult::Commissioned {
                node_id: normalize_node_id(&caps[1]),
            };
        }
        if SUCCESS_MARKERS.iter().any(|m| clean.contains(m)) {
            reported_success = true;
        }
    }
    if reported_success {
        PairingResult::ReportedSuccess
    } else {
        PairingResult::Unclear
    }
}

/// Render a node id as decimal. Hex ids (`0x...`) are converted; anything that
/// fails to convert is returned unchanged.
pub fn normalize_node_id(raw: &str) -> String {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16)
            .map(|n| n.to_string())
            .unwrap_or_else(|_| raw.to_string()),
        None => raw.to_string(),
    }
}

/// Endpoints listed in a `PartsList` read, in the order printed.
pub fn parse_parts_list(stdout: &str) -> Vec<u16> {
    let mut endpoints = Vec::new();
    let mut in_list = false;
    for line in stdout.lines() {
        let clean = strip_control(line);
        if clean.contains("PartsList") {
            in_list = true;
            continue;
        }
        if !in_list {
            continue;
        }
        match PARTS_ENTRY.captures(&clean) {
            Some(caps) => {
                if let Ok(ep) = caps[1].parse() {
                    endpoints.push(ep);
                }
            }
            None => in_list = false,
        }
    }
    endpoints
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_node_id() {
        let out = "[1.0] [1:2] [CTL] Successfully commissioned device with node ID 4242\n";
        assert_eq!(
            parse_pairing_output(out),
            PairingResult::Commissioned {
                node_id: "4242".into()
            }
        );
    }

    #[test]
    fn hex_node_id_is_normalized() {
        let out = "[CTL] Commissioning complete for node ID 0x000000000001B669: success\n";
        assert_eq!(
            parse_pairing_output(out),
            PairingResult::Commissioned {
                node_id: "112233".into()
            }
        );
    }

    #[test]
    fn success_marker_without_id() {
        let out = "noise\n[CTL] Device commissioning completed with success\n";
        assert_eq!(parse_pairing_output(out), PairingResult::ReportedSuccess);
    }

    #[test]
    fn no_markers_is_unclear() {
        assert_eq!(
            parse_pairing_output("[BLE] scanning...\n"),
            PairingResult::Unclear
        );
    }

    #[test]
    fn normalize_leaves_garbage_alone() {
        assert_eq!(normalize_node_id("0xZZ"), "0xZZ");
        assert_eq!(normalize_node_id(" 17 "), "17");
    }

    #[test]
    fn parts_list_entries() {
        let out = "\
[TOO] Endpoint: 0 Cluster: 0x0000_001D Attribute 0x0000_0003 DataVersion: 1
[TOO]   PartsList: 2 entries
[TOO]     [1]: 1
[TOO]     [2]: 2
[DMG] done
[TOO]     [3]: 9
";
        assert_eq!(parse_parts_list(out), vec![1, 2]);
    }

    #[test]
    fn empty_parts_list() {
        assert!(parse_parts_list("[TOO]   PartsList: 0 entries\n").is_empty());
    }
}
