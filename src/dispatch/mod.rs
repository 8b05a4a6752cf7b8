//! Turn decoded client intents into tool invocations and reply events.
//!
//! Every intent runs as its own task tracked on the originating session, so
//! a slow discovery never delays a command from the same client. Replies go
//! only to the session that asked.

mod commission;
mod discover;
mod invoke;
mod read;
mod subscribe;


use std::sync::Arc;
use std::time::Duration;

use crate::protocol::{
    CommandResponse, CommissioningOutcome, DecodeError, Intent, IntentKind, LogCategory, OutboundEvent,
};
use crate::session::Session;
use crate::tool::ToolRunner;

pub use invoke::{command_arguments, refresh_target, CommandArgs, ParamError};
pub use read::AttributeTarget;

/// Tunables for tool invocations.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub discovery_timeout: Duration,
    /// `None` lets commands run until the tool gives up on its own.
    pub command_timeout: Option<Duration>,
    /// Node id proposed when a commissioning request does not name one.
    pub commissioning_node_id: String,
    pub default_endpoint: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(60),
            command_timeout: None,
            commissioning_node_id: "112233".to_string(),
            default_endpoint: "1".to_string(),
        }
    }
}

pub struct Dispatcher {
    tool: Arc<dyn ToolRunner>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(tool: Arc<dyn ToolRunner>, config: DispatchConfig) -> Self {
        Self { tool, config }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Run `intent` in the background on behalf of `session`. Returns the
    /// tracked task id.
    pub fn dispatch(self: &Arc<Self>, session: &Session, intent: Intent) -> u64 {
        let kind = intent.kind();
        tracing::debug!(session = %session.id(), %kind, "dispatching intent");
        let this = Arc::clone(self);
        let owner = session.clone();
        session.spawn_tracked(kind.as_str(), async move {
            this.handle(&owner, intent).await;
        })
    }

    /// Run `intent` to completion on the current task.
    pub async fn handle(self: &Arc<Self>, session: &Session, intent: Intent) {
        match intent {
            Intent::Discover => self.discover(session).await,
            Intent::Commission(req) => self.commission(session, req).await,
            Intent::Invoke(req) => self.invoke(session, req).await,
            Intent::Subscribe(req) => self.subscribe(session, req).await,
            Intent::GetStatus(req) => self.status(session, req).await,
        }
    }

    /// Answer a frame that could not be decoded. The reply uses the event
    /// family of the intended request where one is known.
    pub fn reject(&self, session: &Session, error: &DecodeError) {
        let message = error.to_string();
        tracing::warn!(session = %session.id(), "rejecting frame: {message}");
        match error {
            DecodeError::InvalidPayload {
                kind: IntentKind::Commission,
                ..
            } => {
                session.send_log(LogCategory::Commissioning, message.clone());
                session.send(OutboundEvent::CommissioningStatus(CommissioningOutcome::failed(
                    message, "",
                )));
            }
            DecodeError::InvalidPayload {
                kind: IntentKind::Invoke,
                ..
            } => {
                session.send_log(LogCategory::Command, message.clone());
                session.send(OutboundEvent::CommandResponse(CommandResponse::failed("", message)));
            }
            DecodeError::InvalidPayload {
                kind: IntentKind::Subscribe,
                ..
            } => {
                session.send_log(LogCategory::Subscription, message.clone());
                session.send(OutboundEvent::Error(message));
            }
            _ => {
                session.send(OutboundEvent::Error(message));
            }
        }
    }

    fn endpoint_or_default(&self, endpoint: &str) -> String {
        if endpoint.is_empty() {
            self.config.default_endpoint.clone()
        } else {
            endpoint.to_string()
        }
    }
}
