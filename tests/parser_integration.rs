//! Parsers run over longer, noisier transcripts than the unit tests use.

use chiplink::parser::{
    parse_discovery, parse_pairing_output, parse_parts_list, parse_read_output, reports_error,
    AttributeValue, PairingResult, ReportParser, ReportState,
};

/// A discovery run with colour codes, unrelated log domains, and a truncated
/// final block.
const DISCOVERY_TRANSCRIPT: &str = "\
\x1b[0;32m[1700000000.001] [4242:4243] [DL] ChipLinuxStorage::Init: Using KVS config file\x1b[0m
[1700000000.050] [4242:4243] [CTL] System State Initialized...
\x1b[0;32m[1700000000.100] [4242:4243] [DIS] Discovered commissionable/commissioner node:\x1b[0m
[1700000000.100] [4242:4243] [DIS] \tHostname: 0E6A9B1C2D3E4F50
[1700000000.100] [4242:4243] [DIS] \tIP Address #1: fd00::12
[1700000000.100] [4242:4243] [DIS] \tIP Address #2: 192.168.1.40
[1700000000.100] [4242:4243] [DIS] \tPort: 5540
[1700000000.100] [4242:4243] [DIS] \tMrp Interval idle: 500 ms
[1700000000.100] [4242:4243] [DIS] \tVendor ID: 65521
[1700000000.100] [4242:4243] [DIS] \tProduct ID: 32769
[1700000000.100] [4242:4243] [DIS] \tLong Discriminator: 3840
[1700000000.100] [4242:4243] [DIS] \tPairing Hint: 33
[1700000000.100] [4242:4243] [DIS] \tInstance Name: 5A1B2C3D4E5F6071
[1700000000.100] [4242:4243] [DIS] \tCommissioning Mode: 1
[1700000000.150] [4242:4243] [TOO] Some unrelated line: with a colon
[1700000000.200] [4242:4243] [DIS] Discovered commissionable/commissioner node:
[1700000000.200] [4242:4243] [DIS] \tVendor ID: 4447
[1700000000.200] [4242:4243] [DIS] \tProduct ID: 1
[1700000000.200] [4242:4243] [DIS] \tLong Discriminator: 1234
[1700000000.300] [4242:4243] [DIS] Discovered commissionable/commissioner node:
[1700000000.300] [4242:4243] [DIS] \tVendor ID: 1
";

#[test]
fn discovery_transcript_yields_complete_devices_only() {
    let devices = parse_discovery(DISCOVERY_TRANSCRIPT);
    assert_eq!(devices.len(), 2);

    let first = &devices[0];
    assert_eq!(first.id, "dnsd_instance_5A1B2C3D4E5F6071");
    assert_eq!(first.name, "0E6A9B1C2D3E4F50");
    assert_eq!(first.ip_address.as_deref(), Some("fd00::12"));
    assert_eq!(first.port, Some(5540));
    assert_eq!(first.discriminator, Some(3840));
    assert_eq!(first.pairing_hint, Some(33));
    assert_eq!(first.mrp_interval_idle_ms, Some(500));
    assert_eq!(first.transport.as_deref(), Some("BLE"));

    let second = &devices[1];
    assert_eq!(second.id, "dnsd_vid4447_pid1_disc1234");
    assert_eq!(second.transport, None);

    let json = serde_json::to_value(first).unwrap();
    assert_eq!(json["vendorId"], "65521");
    assert_eq!(json["productId"], "32769");
    assert_eq!(json["type"], "BLE");
}

#[test]
fn discovery_of_nothing_is_empty() {
    let quiet = "[1700000000.001] [1:2] [DL] nothing advertised\n";
    assert!(parse_discovery(quiet).is_empty());
    assert!(parse_discovery("").is_empty());
}

#[test]
fn subscription_transcript_reports_each_block_once() {
    let transcript = [
        "[1700000002.000] [11:12] [DMG] ReportDataMessage =",
        "[1700000002.000] [11:12] [DMG] {",
        "[1700000002.000] [11:12] [DMG] \tAttributeReportIBs =",
        "[1700000002.000] [11:12] [DMG] \t\tAttributeDataIB =",
        "[1700000002.000] [11:12] [DMG] \t\t\tData = 254 (UINT8),",
        "[1700000002.000] [11:12] [DMG] \t\t\tData = 99 (UINT8),",
        "[1700000002.000] [11:12] [DMG] }",
        "[1700000003.000] [11:12] [DMG] Refresh LivenessCheckTime for 42000 milliseconds",
        "[1700000003.000] [11:12] [DMG] \t\t\tData = 1 (UINT8),",
        "[1700000004.000] [11:12] [DMG] ReportDataMessage =",
        "[1700000004.000] [11:12] [DMG] {",
        "[1700000004.000] [11:12] [DMG] }",
        "[1700000005.000] [11:12] [DMG] ReportDataMessage =",
        "[1700000005.000] [11:12] [DMG] \t\t\tData = \"kitchen\" (UTF8S),",
    ];

    let mut parser = ReportParser::new();
    let values: Vec<AttributeValue> = transcript
        .iter()
        .filter_map(|line| parser.feed_line(line))
        .map(|report| report.value)
        .collect();

    assert_eq!(
        values,
        vec![AttributeValue::Int(254), AttributeValue::Text("kitchen".into())]
    );
    assert_eq!(parser.state(), ReportState::Idle);
}

#[test]
fn pairing_transcript_with_hex_node_id() {
    let transcript = "\
[1700000010.000] [7:8] [BLE] Scanning for BLE devices...
[1700000012.000] [7:8] [CTL] Commissioning stage next step: 'SendComplete' -> 'Cleanup'
[1700000012.100] [7:8] [CTL] Successfully commissioned device with node ID 0x000000000001B669
[1700000012.200] [7:8] [TOO] Device commissioning completed with success
";
    assert_eq!(
        parse_pairing_output(transcript),
        PairingResult::Commissioned {
            node_id: "112233".into()
        }
    );
    assert!(!reports_error(transcript, ""));
}

#[test]
fn failed_pairing_is_unclear_and_errors() {
    let stdout = "[1700000010.000] [7:8] [BLE] Scanning for BLE devices...\n";
    let stderr = "[1700000040.000] [7:8] [CTL] CHIP Error 0x00000032: Timeout\n";
    assert_eq!(parse_pairing_output(stdout), PairingResult::Unclear);
    assert!(reports_error(stdout, stderr));
}

#[test]
fn descriptor_read_lists_endpoints() {
    let transcript = "\
[1700000020.000] [7:8] [TOO] Endpoint: 0 Cluster: 0x0000_001D Attribute 0x0000_0003 DataVersion: 2847
[1700000020.000] [7:8] [TOO]   PartsList: 2 entries
[1700000020.000] [7:8] [TOO]     [1]: 1
[1700000020.000] [7:8] [TOO]     [2]: 2
";
    assert_eq!(parse_parts_list(transcript), vec![1, 2]);
}

#[test]
fn read_transcript_values() {
    let on = "[1700000030.000] [7:8] [TOO] Endpoint: 1 Cluster: 0x0000_0006\n[1700000030.000] [7:8] [TOO]   Value = TRUE\n";
    assert_eq!(parse_read_output(on), AttributeValue::Bool(true));

    let level = "[TOO]   Value = 1\n";
    assert_eq!(parse_read_output(level), AttributeValue::Int(1));

    let unknown = "[TOO]   OnOff: TRUE\n";
    let value = parse_read_output(unknown);
    assert!(value.is_raw());
    assert_eq!(
        serde_json::to_value(&value).unwrap(),
        serde_json::json!("Raw: [TOO]   OnOff: TRUE\n")
    );
}
