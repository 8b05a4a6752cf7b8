use super::Dispatcher;
use crate::parser::parse_discovery;
use crate::protocol::{DiscoveryResult, LogCategory, OutboundEvent};
use crate::session::Session;

impl Dispatcher {
    /// Run `discover commissionables` and report every device it found.
    ///
    /// The run is bounded by the discovery timeout. Whatever was printed
    /// before a timeout or failure is still parsed, so a partial list comes
    /// back together with the error.
    pub(super) async fn discover(&self, session: &Session) {
        session.send_log(LogCategory::Discovery, "Starting device discovery via chip-tool...");
        let args = vec!["discover".to_string(), "commissionables".to_string()];
        session.send_log(
            LogCategory::Discovery,
            format!("Executing: {}", self.tool.describe(&args)),
        );

        let output = self.tool.run(args, Some(self.config.discovery_timeout)).await;
        tracing::debug!(stdout = %output.stdout, stderr = %output.stderr, "discovery output");

        let devices = parse_discovery(&output.stdout);
        let error = output.error.as_ref().map(|err| {
            let mut message = format!("Error running chip-tool discover: {err}");
            let stderr = output.stderr.trim();
            if !stderr.is_empty() {
                message.push_str(". Stderr: ");
                message.push_str(stderr);
            }
            message
        });

        match &error {
            Some(message) => {
                tracing::warn!(found = devices.len(), "{message}");
                session.send_log(LogCategory::Discovery, format!("Error during discovery: {message}"));
            }
            None => {
                session.send_log(
                    LogCategory::Discovery,
                    format!("Discovery command finished. Output:\n{}", output.stdout),
                );
            }
        }
        session.send_log(
            LogCategory::Discovery,
            format!("Parsed {} device(s) from discovery output.", devices.len()),
        );
        tracing::info!(session = %session.id(), found = devices.len(), "discovery finished");

        session.send(OutboundEvent::DiscoveryResult(DiscoveryResult { devices, error }));
    }
}
