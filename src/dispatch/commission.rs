use std::sync::Arc;

use super::read::AttributeTarget;
use super::Dispatcher;
use crate::parser::{parse_pairing_output, parse_parts_list, PairingResult};
use crate::protocol::{CommissionRequest, CommissioningOutcome, LogCategory, OutboundEvent};
use crate::session::Session;

impl Dispatcher {
    pub(super) async fn commission(self: &Arc<Self>, session: &Session, req: CommissionRequest) {
        let discriminator = req.discriminator.as_str();
        if req.setup_code.is_empty() || discriminator.is_empty() {
            let message = "Missing discriminator or setupCode for commissioning.";
            session.send_log(LogCategory::Commissioning, message);
            session.send(OutboundEvent::CommissioningStatus(CommissioningOutcome::failed(
                message,
                discriminator,
            )));
            return;
        }

        let node_id = if req.node_id_to_assign.is_empty() {
            self.config.commissioning_node_id.clone()
        } else {
            req.node_id_to_assign.clone()
        };
        session.send_log(
            LogCategory::Commissioning,
            format!("Starting commissioning for discriminator {discriminator}, proposed Node ID {node_id}"),
        );

        let args = vec![
            "pairing".to_string(),
            "ble-discriminator".to_string(),
            discriminator.to_string(),
            req.setup_code.clone(),
            node_id.clone(),
        ];
        session.send_log(
            LogCategory::Commissioning,
            format!("Executing: {}", self.tool.describe(&args)),
        );

        let output = self.tool.run(args, self.config.command_timeout).await;
        let combined = output.combined();
        tracing::debug!(discriminator, "{combined}");
        session.send_log(
            LogCategory::Commissioning,
            format!("Commissioning command output:\n{combined}"),
        );

        if let Some(err) = &output.error {
            tracing::warn!(discriminator, "commissioning failed: {err}");
            let mut outcome =
                CommissioningOutcome::failed(format!("Error commissioning device: {err}"), discriminator);
            outcome.details = Some(combined);
            session.send(OutboundEvent::CommissioningStatus(outcome));
            return;
        }

        let (assigned, details) = match parse_pairing_output(&output.stdout) {
            PairingResult::Commissioned { node_id } => {
                (node_id, "Device commissioned successfully.".to_string())
            }
            PairingResult::ReportedSuccess => (
                node_id,
                "Commissioning reported success; node id taken from the request.".to_string(),
            ),
            PairingResult::Unclear => {
                let mut outcome = CommissioningOutcome::failed(
                    "Commissioning finished, but success or node id unclear. Check logs.",
                    discriminator,
                );
                outcome.details = Some(combined);
                session.send(OutboundEvent::CommissioningStatus(outcome));
                return;
            }
        };

        let endpoint_id = self.resolve_endpoint(session, &assigned).await;
        tracing::info!(discriminator, node = %assigned, endpoint = %endpoint_id, "device commissioned");
        session.send(OutboundEvent::CommissioningStatus(CommissioningOutcome {
            success: true,
            node_id: Some(assigned.clone()),
            endpoint_id: Some(endpoint_id),
            details: Some(details),
            error: None,
            correlation_discriminator: Some(discriminator.to_string()),
        }));

        self.spawn_read(
            session,
            AttributeTarget {
                node_id: assigned,
                endpoint_id: "0".to_string(),
                cluster: "BasicInformation".to_string(),
                attribute: "NodeLabel".to_string(),
            },
            LogCategory::Commissioning,
        );
    }

    /// First application endpoint from the root descriptor's parts list, or
    /// the configured default when it cannot be determined.
    async fn resolve_endpoint(&self, session: &Session, node_id: &str) -> String {
        let args = vec![
            "descriptor".to_string(),
            "read".to_string(),
            "parts-list".to_string(),
            node_id.to_string(),
            "0".to_string(),
        ];
        let output = self.tool.run(args, self.config.command_timeout).await;
        if let Some(err) = &output.error {
            session.send_log(
                LogCategory::Commissioning,
                format!(
                    "Could not read endpoints of Node {node_id} ({err}); using endpoint {}",
                    self.config.default_endpoint
                ),
            );
            return self.config.default_endpoint.clone();
        }
        match parse_parts_list(&output.stdout).first() {
            Some(endpoint) => endpoint.to_string(),
            None => self.config.default_endpoint.clone(),
        }
    }
}
