//! Recover commissionable device records from `discover commissionables`.
//!
//! The tool prints one block per advertised node:
//!
//! ```text
//! [1700000000.100] [1:2] [DIS] Discovered commissionable/commissioner node:
//! [1700000000.100] [1:2] [DIS]    Hostname: 0E6A9B1C2D3E4F50
//! [1700000000.100] [1:2] [DIS]    Vendor ID: 65521
//! [1700000000.100] [1:2] [DIS]    Long Discriminator: 3840
//! ```
//!
//! A block starts at the node marker and runs until the next marker or the
//! end of input. Log lines without the discovery tag are ignored.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use super::ansi::strip_control;

const NODE_MARKER: &str = "Discovered commissionable/commissioner node";
const LOG_TAGS: [&str; 2] = ["[DIS]", "CHIP:DIS:"];

/// One device recovered from a discovery run.
///
/// Discriminator, vendor id and product id serialize as decimal strings for
/// compatibility with existing clients; other numerics stay numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredDevice {
    pub id: String,
    pub name: String,
    /// Transport label derived from the commissioning mode.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(serialize_with = "display_opt", skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<u16>,
    #[serde(serialize_with = "display_opt", skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<u16>,
    #[serde(serialize_with = "display_opt", skip_serializing_if = "Option::is_none")]
    pub product_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing_hint: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commissioning_mode: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icd: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mrp_interval_idle_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mrp_interval_active_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mrp_active_threshold_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_client_supported: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_server_supported: Option<bool>,
}

impl DiscoveredDevice {
    fn is_complete(&self) -> bool {
        self.discriminator.is_some() || self.instance_name.is_some()
    }

    fn finalize(&mut self) {
        self.id = match &self.instance_name {
            Some(instance) => format!("dnsd_instance_{instance}"),
            None => format!(
                "dnsd_vid{}_pid{}_disc{}",
                opt_str(&self.vendor_id),
                opt_str(&self.product_id),
                opt_str(&self.discriminator)
            ),
        };
        self.name = match (&self.hostname, &self.instance_name) {
            (Some(host), _) => host.clone(),
            (None, Some(instance)) => format!("MatterDevice-{instance}"),
            (None, None) => format!(
                "MatterDevice-VID{}-PID{}",
                opt_str(&self.vendor_id),
                opt_str(&self.product_id)
            ),
        };
        if let Some(mode) = self.commissioning_mode {
            self.transport = Some(commissioning_mode_label(mode));
        }
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "Hostname" => self.hostname = non_empty(value),
            "Port" => self.port = number(key, value),
            "Vendor ID" => self.vendor_id = number(key, value),
            "Product ID" => self.product_id = number(key, value),
            "Long Discriminator" => self.discriminator = number(key, value),
            "Pairing Hint" => self.pairing_hint = number(key, value),
            "Instance Name" => self.instance_name = non_empty(value),
            "Commissioning Mode" => self.commissioning_mode = number(key, value),
            "Device Type" => self.device_type = number(key, value),
            "Device Name" => self.device_name = non_empty(value),
            "ICD" => self.icd = flag(key, value),
            "Mrp Interval idle" => self.mrp_interval_idle_ms = millis(key, value),
            "Mrp Interval active" => self.mrp_interval_active_ms = millis(key, value),
            "Mrp Active Threshold" => self.mrp_active_threshold_ms = millis(key, value),
            "TCP Client Supported" => self.tcp_client_supported = flag(key, value),
            "TCP Server Supported" => self.tcp_server_supported = flag(key, value),
            k if k.starts_with("IP Address") => {
                if self.ip_address.is_none() {
                    self.ip_address = non_empty(value);
                }
            }
            _ => {}
        }
    }
}

/// Human-readable label for a commissioning mode value.
pub fn commissioning_mode_label(mode: u8) -> String {
    match mode {
        1 => "BLE".to_string(),
        2 => "OnNetwork".to_string(),
        other => format!("CM:{other}"),
    }
}

/// Incremental discovery parser. Feed lines, then [`finish`](Self::finish).
#[derive(Debug, Default)]
pub struct DiscoveryParser {
    current: Option<DiscoveredDevice>,
    devices: Vec<DiscoveredDevice>,
}

impl DiscoveryParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed_line(&mut self, raw: &str) {
        let clean = strip_control(raw);
        let Some(body) = tagged_body(&clean) else {
            return;
        };

        if body.starts_with(NODE_MARKER) {
            self.flush();
            self.current = Some(DiscoveredDevice::default());
            return;
        }

        let Some(device) = self.current.as_mut() else {
            return;
        };
        if let Some((key, value)) = body.split_once(':') {
            device.apply(key.trim(), value.trim());
        }
    }

    /// Flush the open block and return devices in the order they appeared.
    pub fn finish(mut self) -> Vec<DiscoveredDevice> {
        self.flush();
        self.devices
    }

    fn flush(&mut self) {
        let Some(mut device) = self.current.take() else {
            return;
        };
        if device.is_complete() {
            device.finalize();
            self.devices.push(device);
        } else {
            tracing::debug!("dropping discovery block with no discriminator or instance name");
        }
    }
}

/// Parse an entire captured discovery transcript.
pub fn parse_discovery(output: &str) -> Vec<DiscoveredDevice> {
    let mut parser = DiscoveryParser::new();
    for line in output.lines() {
        parser.feed_line(line);
    }
    parser.finish()
}

fn tagged_body(line: &str) -> Option<&str> {
    LOG_TAGS.iter().find_map(|tag| {
        line.find(tag)
            .map(|idx| line[idx + tag.len()..].trim())
    })
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn number<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::debug!(key, value, "unparseable numeric discovery field");
            None
        }
    }
}

fn millis(key: &str, value: &str) -> Option<u32> {
    let value = value.trim_end_matches("ms").trim();
    if value.eq_ignore_ascii_case("not present") {
        return None;
    }
    number(key, value)
}

fn flag(key: &str, value: &str) -> Option<bool> {
    match value {
        "1" => Some(true),
        "0" => Some(false),
        v if v.eq_ignore_ascii_case("true") => Some(true),
        v if v.eq_ignore_ascii_case("false") => Some(false),
        v if v.eq_ignore_ascii_case("not present") => None,
        _ => {
            tracing::debug!(key, value, "unrecognised flag value in discovery field");
            None
        }
    }
}

fn opt_str<T: Display>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

fn display_opt<T: Display, S: Serializer>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.collect_str(v),
        None => serializer.serialize_none(),
    }
}
