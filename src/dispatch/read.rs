//! One-shot attribute reads: follow-up refreshes and `get_status`.

use std::sync::Arc;

use super::Dispatcher;
use crate::parser::{self, parse_read_output};
use crate::protocol::{AttributeUpdate, LogCategory, OutboundEvent, StatusRequest, StatusReport};
use crate::session::Session;

/// A single attribute on a single endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeTarget {
    pub node_id: String,
    pub endpoint_id: String,
    pub cluster: String,
    pub attribute: String,
}

impl AttributeTarget {
    /// `<cluster> read <attribute> <node> <endpoint>`
    pub fn read_args(&self) -> Vec<String> {
        vec![
            self.cluster.to_lowercase(),
            "read".to_string(),
            self.attribute.to_lowercase(),
            self.node_id.clone(),
            self.endpoint_id.clone(),
        ]
    }
}

impl Dispatcher {
    /// Read `target` in the background on behalf of `session`.
    pub(crate) fn spawn_read(self: &Arc<Self>, session: &Session, target: AttributeTarget, category: LogCategory) {
        let this = Arc::clone(self);
        let owner = session.clone();
        session.spawn_tracked("attribute-read", async move {
            this.read_attribute(&owner, &target, category).await;
        });
    }

    /// Read `target` and emit an `attribute_update`. Failures are logged to
    /// the client and otherwise swallowed.
    pub(crate) async fn read_attribute(&self, session: &Session, target: &AttributeTarget, category: LogCategory) {
        let args = target.read_args();
        session.send_log(
            category,
            format!(
                "Reading attribute {}.{} for Node {} EP{}...",
                target.cluster, target.attribute, target.node_id, target.endpoint_id
            ),
        );

        let output = self.tool.run(args, self.config.command_timeout).await;
        if let Some(err) = &output.error {
            tracing::warn!(node = %target.node_id, cluster = %target.cluster, attribute = %target.attribute, "attribute read failed: {err}");
            session.send_log(
                category,
                format!(
                    "Failed to read {}.{} on Node {}: {err}",
                    target.cluster, target.attribute, target.node_id
                ),
            );
            return;
        }

        let value = parse_read_output(&output.stdout);
        if value.is_raw() {
            session.send_log(
                category,
                format!("Could not parse a value for {}.{}", target.cluster, target.attribute),
            );
        }
        session.send(OutboundEvent::AttributeUpdate(AttributeUpdate {
            node_id: target.node_id.clone(),
            endpoint_id: target.endpoint_id.clone(),
            cluster: target.cluster.clone(),
            attribute: target.attribute.clone(),
            value,
        }));
    }

    /// Reachability probe: read `OnOff.OnOff` and report what came back.
    pub(super) async fn status(&self, session: &Session, req: StatusRequest) {
        let endpoint_id = self.endpoint_or_default(&req.endpoint_id);
        if req.node_id.is_empty() {
            session.send(OutboundEvent::Status(StatusReport {
                endpoint_id,
                error: Some("Missing nodeId for get_status.".to_string()),
                ..StatusReport::default()
            }));
            return;
        }

        let target = AttributeTarget {
            node_id: req.node_id.clone(),
            endpoint_id: endpoint_id.clone(),
            cluster: "OnOff".to_string(),
            attribute: "OnOff".to_string(),
        };
        let output = self.tool.run(target.read_args(), self.config.command_timeout).await;

        let report = match &output.error {
            Some(err) => StatusReport {
                node_id: req.node_id,
                endpoint_id,
                reachable: false,
                value: None,
                error: Some(format!("Status read failed: {err}")),
            },
            None if parser::reports_error(&output.stdout, &output.stderr) => StatusReport {
                node_id: req.node_id,
                endpoint_id,
                reachable: false,
                value: None,
                error: Some("chip-tool reported an error while reading status.".to_string()),
            },
            None => {
                let value = parse_read_output(&output.stdout);
                StatusReport {
                    node_id: req.node_id,
                    endpoint_id,
                    reachable: true,
                    value: Some(value),
                    error: None,
                }
            }
        };
        tracing::debug!(node = %report.node_id, reachable = report.reachable, "status probe finished");
        session.send(OutboundEvent::Status(report));
    }
}
