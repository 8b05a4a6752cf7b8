use std::sync::Arc;

use tokio_stream::StreamExt;

use super::Dispatcher;
use crate::parser::ReportParser;
use crate::protocol::{AttributeUpdate, LogCategory, OutboundEvent, SubscribeRequest};
use crate::session::Session;
use crate::tool::StreamExit;

impl Dispatcher {
    /// Start a long-lived subscription and forward every reported value.
    ///
    /// Runs until the process exits or the subscription is cancelled, either
    /// by a duplicate request for the same key or by the session closing.
    pub(super) async fn subscribe(self: &Arc<Self>, session: &Session, req: SubscribeRequest) {
        let intervals = match (req.min_interval.parse::<u32>(), req.max_interval.parse::<u32>()) {
            (Ok(min), Ok(max)) if min <= max => Some((min, max)),
            _ => None,
        };
        let required = !req.node_id.is_empty() && !req.cluster.is_empty() && !req.attribute.is_empty();
        let Some((min, max)) = intervals.filter(|_| required) else {
            let message = "Missing or invalid parameters for subscribe_attribute \
                (nodeId, cluster, attribute, minInterval <= maxInterval required).";
            session.send_log(LogCategory::Subscription, message);
            session.send(OutboundEvent::Error(message.to_string()));
            return;
        };

        let endpoint_id = self.endpoint_or_default(&req.endpoint_id);
        let key = format!(
            "sub-{}-{}-{}-{}",
            req.node_id, endpoint_id, req.cluster, req.attribute
        );
        let handle = session.register_subscription(&key);

        let args = vec![
            req.cluster.to_lowercase(),
            "subscribe".to_string(),
            req.attribute.to_lowercase(),
            min.to_string(),
            max.to_string(),
            req.node_id.clone(),
            endpoint_id.clone(),
        ];
        session.send_log(
            LogCategory::Subscription,
            format!(
                "Attempting to subscribe to {}/{} on Node {} EP{}",
                req.cluster, req.attribute, req.node_id, endpoint_id
            ),
        );
        session.send_log(
            LogCategory::Subscription,
            format!("Executing: {}", self.tool.describe(&args)),
        );

        let streams = match self.tool.stream(args, handle.cancel.clone()) {
            Ok(streams) => streams,
            Err(e) => {
                tracing::warn!(subscription = %key, "failed to start subscription: {e}");
                session.send_log(
                    LogCategory::Subscription,
                    format!("Failed to start subscription {key}: {e}"),
                );
                session.release_subscription(&handle);
                return;
            }
        };
        tracing::info!(session = %session.id(), subscription = %key, "subscription started");
        session.send_log(LogCategory::Subscription, format!("Subscription {key} started."));

        let mut stderr = streams.stderr;
        let log_owner = session.clone();
        let stderr_key = key.clone();
        session.spawn_tracked("subscription-stderr", async move {
            while let Some(line) = stderr.next().await {
                tracing::debug!(subscription = %stderr_key, "stderr: {line}");
                log_owner.send_log(LogCategory::Subscription, format!("[{stderr_key}] {line}"));
            }
        });

        let mut stdout = streams.stdout;
        let mut parser = ReportParser::new();
        while let Some(line) = stdout.next().await {
            tracing::debug!(subscription = %key, "{line}");
            if let Some(report) = parser.feed_line(&line) {
                tracing::debug!(subscription = %key, value = %report.value, type_tag = %report.type_tag, "attribute report");
                session.send(OutboundEvent::AttributeUpdate(AttributeUpdate {
                    node_id: req.node_id.clone(),
                    endpoint_id: endpoint_id.clone(),
                    cluster: req.cluster.clone(),
                    attribute: req.attribute.clone(),
                    value: report.value,
                }));
            }
        }

        let exit = streams
            .completion
            .await
            .unwrap_or_else(|_| StreamExit::WaitFailed("process monitor went away".to_string()));
        session.release_subscription(&handle);
        tracing::info!(session = %session.id(), subscription = %key, %exit, "subscription ended");
        session.send_log(
            LogCategory::Subscription,
            format!(
                "Subscription to {}/{} on Node {} ended: {exit}",
                req.cluster, req.attribute, req.node_id
            ),
        );
    }
}
