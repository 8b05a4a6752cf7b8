//! Cluster command invocation and its parameter schema.

use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use super::read::AttributeTarget;
use super::Dispatcher;
use crate::parser;
use crate::protocol::{CommandResponse, InvokeRequest, LogCategory, OutboundEvent};
use crate::session::Session;

/// How one positional argument is filled from the request params.
#[derive(Debug, Clone, Copy)]
enum Param {
    Required(&'static str),
    Optional(&'static str, i64),
    Fixed(&'static str),
}

struct CommandSchema {
    cluster: &'static str,
    command: &'static str,
    params: &'static [Param],
    trailing: &'static [&'static str],
    /// Attribute to read back after a successful invoke.
    refresh: Option<&'static str>,
}

const TRANSITION: Param = Param::Optional("transitionTime", 0);
/// Option mask and override, always zero.
const ZERO: Param = Param::Fixed("0");

const SCHEMAS: &[CommandSchema] = &[
    CommandSchema { cluster: "OnOff", command: "On", params: &[], trailing: &[], refresh: Some("OnOff") },
    CommandSchema { cluster: "OnOff", command: "Off", params: &[], trailing: &[], refresh: Some("OnOff") },
    CommandSchema { cluster: "OnOff", command: "Toggle", params: &[], trailing: &[], refresh: Some("OnOff") },
    CommandSchema {
        cluster: "LevelControl",
        command: "MoveToLevel",
        params: &[Param::Required("level"), TRANSITION, ZERO, ZERO],
        trailing: &[],
        refresh: Some("CurrentLevel"),
    },
    CommandSchema {
        cluster: "LevelControl",
        command: "MoveToLevelWithOnOff",
        params: &[Param::Required("level"), TRANSITION, ZERO, ZERO],
        trailing: &[],
        refresh: Some("CurrentLevel"),
    },
    CommandSchema {
        cluster: "ColorControl",
        command: "MoveToHue",
        params: &[Param::Required("hue"), Param::Optional("direction", 0), TRANSITION, ZERO, ZERO],
        trailing: &[],
        refresh: None,
    },
    CommandSchema {
        cluster: "ColorControl",
        command: "MoveToSaturation",
        params: &[Param::Required("saturation"), TRANSITION, ZERO, ZERO],
        trailing: &[],
        refresh: None,
    },
    CommandSchema {
        cluster: "ColorControl",
        command: "MoveToColorTemperature",
        params: &[Param::Required("colorTemperatureMireds"), TRANSITION, ZERO, ZERO],
        trailing: &[],
        refresh: Some("ColorTemperatureMireds"),
    },
    CommandSchema {
        cluster: "Identify",
        command: "Identify",
        params: &[Param::Required("identifyTime")],
        trailing: &[],
        refresh: None,
    },
    CommandSchema { cluster: "WindowCovering", command: "UpOrOpen", params: &[], trailing: &[], refresh: None },
    CommandSchema { cluster: "WindowCovering", command: "DownOrClose", params: &[], trailing: &[], refresh: None },
    CommandSchema { cluster: "WindowCovering", command: "StopMotion", params: &[], trailing: &[], refresh: None },
    CommandSchema {
        cluster: "WindowCovering",
        command: "GoToLiftPercentage",
        params: &[Param::Required("liftPercent100thsValue")],
        trailing: &[],
        refresh: None,
    },
    CommandSchema {
        cluster: "DoorLock",
        command: "LockDoor",
        params: &[],
        trailing: &["--timedInteractionTimeoutMs", "1000"],
        refresh: None,
    },
    CommandSchema {
        cluster: "DoorLock",
        command: "UnlockDoor",
        params: &[],
        trailing: &["--timedInteractionTimeoutMs", "1000"],
        refresh: None,
    },
];

fn lookup(cluster: &str, command: &str) -> Option<&'static CommandSchema> {
    SCHEMAS
        .iter()
        .find(|s| s.cluster.eq_ignore_ascii_case(cluster) && s.command.eq_ignore_ascii_case(command))
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParamError {
    #[error("Missing or invalid '{param}' parameter for {command}")]
    Missing { param: &'static str, command: String },

    #[error("No parameter mapping for {cluster}.{command}; pass positional values as an ordered 'args' array")]
    Unordered { cluster: String, command: String },

    #[error("'args' must be an array of strings, numbers or booleans")]
    BadArgs,
}

/// Positional values for the command line, plus flags that follow the
/// node and endpoint.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CommandArgs {
    pub positional: Vec<String>,
    pub trailing: Vec<String>,
}

/// Map request params onto the tool's positional arguments.
pub fn command_arguments(
    cluster: &str,
    command: &str,
    params: &Map<String, Value>,
) -> Result<CommandArgs, ParamError> {
    let Some(schema) = lookup(cluster, command) else {
        return unmapped_arguments(cluster, command, params);
    };

    let mut positional = Vec::with_capacity(schema.params.len());
    for param in schema.params {
        let value = match *param {
            Param::Required(name) => params
                .get(name)
                .and_then(integer_param)
                .ok_or_else(|| ParamError::Missing {
                    param: name,
                    command: schema.command.to_string(),
                })?,
            Param::Optional(name, default) => match params.get(name) {
                None | Some(Value::Null) => default,
                Some(v) => integer_param(v).ok_or_else(|| ParamError::Missing {
                    param: name,
                    command: schema.command.to_string(),
                })?,
            },
            Param::Fixed(text) => {
                positional.push(text.to_string());
                continue;
            }
        };
        positional.push(value.to_string());
    }

    Ok(CommandArgs {
        positional,
        trailing: schema.trailing.iter().map(|s| s.to_string()).collect(),
    })
}

fn unmapped_arguments(
    cluster: &str,
    command: &str,
    params: &Map<String, Value>,
) -> Result<CommandArgs, ParamError> {
    if params.is_empty() {
        return Ok(CommandArgs::default());
    }
    let (Some(Value::Array(args)), 1) = (params.get("args"), params.len()) else {
        return Err(ParamError::Unordered {
            cluster: cluster.to_string(),
            command: command.to_string(),
        });
    };
    let positional = args
        .iter()
        .map(|v| match v {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            _ => Err(ParamError::BadArgs),
        })
        .collect::<Result<Vec<_>, _>>()?;
    tracing::warn!(cluster, command, ?positional, "passing unmapped command arguments through in client order");
    Ok(CommandArgs {
        positional,
        trailing: Vec::new(),
    })
}

/// JSON numbers (fractions truncated toward zero) or numeric strings.
fn integer_param(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// The attribute refreshed after a successful invoke, if any.
pub fn refresh_target(cluster: &str, command: &str) -> Option<(&'static str, &'static str)> {
    lookup(cluster, command).and_then(|s| s.refresh.map(|attr| (s.cluster, attr)))
}

impl Dispatcher {
    pub(super) async fn invoke(self: &Arc<Self>, session: &Session, req: InvokeRequest) {
        if req.node_id.is_empty() || req.cluster.is_empty() || req.command.is_empty() {
            let message = "Missing nodeId, cluster, or command for device_command.";
            session.send_log(LogCategory::Command, message);
            session.send(OutboundEvent::CommandResponse(CommandResponse::failed(&req.node_id, message)));
            return;
        }

        let args = match command_arguments(&req.cluster, &req.command, &req.params) {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(cluster = %req.cluster, command = %req.command, "rejecting command: {e}");
                session.send_log(LogCategory::Command, e.to_string());
                session.send(OutboundEvent::CommandResponse(CommandResponse::failed(
                    &req.node_id,
                    e.to_string(),
                )));
                return;
            }
        };
        let endpoint = self.endpoint_or_default(&req.endpoint_id);

        let mut argv = vec![req.cluster.to_lowercase(), req.command.to_lowercase()];
        argv.extend(args.positional);
        argv.push(req.node_id.clone());
        argv.push(endpoint.clone());
        argv.extend(args.trailing);

        session.send_log(
            LogCategory::Command,
            format!(
                "Sending command {}.{} to Node {} EP{}",
                req.cluster, req.command, req.node_id, endpoint
            ),
        );
        session.send_log(LogCategory::Command, format!("Executing: {}", self.tool.describe(&argv)));

        let output = self.tool.run(argv, self.config.command_timeout).await;
        let combined = output.combined();
        tracing::debug!(node = %req.node_id, cluster = %req.cluster, command = %req.command, "{combined}");

        let response = if let Some(err) = &output.error {
            CommandResponse {
                success: false,
                node_id: req.node_id.clone(),
                details: Some(combined),
                error: Some(format!(
                    "Error executing {}.{} on node {}: {err}",
                    req.cluster, req.command, req.node_id
                )),
            }
        } else if parser::reports_error(&output.stdout, &output.stderr) {
            CommandResponse {
                success: false,
                node_id: req.node_id.clone(),
                details: Some(combined),
                error: Some("Command executed but chip-tool reported an error in its output.".to_string()),
            }
        } else {
            CommandResponse {
                success: true,
                node_id: req.node_id.clone(),
                details: Some(format!(
                    "Command {}.{} executed successfully.\n{combined}",
                    req.cluster, req.command
                )),
                error: None,
            }
        };

        let succeeded = response.success;
        match &response.error {
            Some(e) => session.send_log(LogCategory::Command, e.clone()),
            None => session.send_log(LogCategory::Command, "Command executed successfully."),
        };
        session.send(OutboundEvent::CommandResponse(response));

        if !succeeded {
            return;
        }
        if let Some((cluster, attribute)) = refresh_target(&req.cluster, &req.command) {
            let target = AttributeTarget {
                node_id: req.node_id.clone(),
                endpoint_id: endpoint,
                cluster: cluster.to_string(),
                attribute: attribute.to_string(),
            };
            self.spawn_read(session, target, LogCategory::Command);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("params must be an object"),
        }
    }

    #[test]
    fn on_off_has_no_arguments() {
        let args = command_arguments("OnOff", "On", &Map::new()).unwrap();
        assert_eq!(args, CommandArgs::default());
    }

    #[test]
    fn move_to_level_defaults_transition_time() {
        let args = command_arguments("LevelControl", "MoveToLevel", &params(json!({"level": 128}))).unwrap();
        assert_eq!(args.positional, vec!["128", "0", "0", "0"]);
    }

    #[test]
    fn fractional_numbers_are_truncated() {
        let args = command_arguments(
            "LevelControl",
            "MoveToLevelWithOnOff",
            &params(json!({"level": 99.7, "transitionTime": "5"})),
        )
        .unwrap();
        assert_eq!(args.positional, vec!["99", "5", "0", "0"]);
    }

    #[test]
    fn move_to_hue_orders_arguments() {
        let args = command_arguments(
            "ColorControl",
            "MoveToHue",
            &params(json!({"transitionTime": 10, "hue": 200, "direction": 1})),
        )
        .unwrap();
        assert_eq!(args.positional, vec!["200", "1", "10", "0", "0"]);
    }

    #[test]
    fn missing_required_parameter() {
        let err = command_arguments("Identify", "Identify", &Map::new()).unwrap_err();
        assert_eq!(
            err,
            ParamError::Missing {
                param: "identifyTime",
                command: "Identify".into()
            }
        );
    }

    #[test]
    fn door_lock_carries_timed_flag() {
        let args = command_arguments("DoorLock", "LockDoor", &Map::new()).unwrap();
        assert_eq!(args.trailing, vec!["--timedInteractionTimeoutMs", "1000"]);
    }

    #[test]
    fn lookup_ignores_case() {
        assert!(command_arguments("onoff", "toggle", &Map::new()).is_ok());
        assert_eq!(refresh_target("onoff", "on"), Some(("OnOff", "OnOff")));
    }

    #[test]
    fn unmapped_without_params_is_accepted() {
        assert_eq!(
            command_arguments("Thermostat", "SetpointRaiseLower", &Map::new()).unwrap(),
            CommandArgs::default()
        );
    }

    #[test]
    fn unmapped_with_ordered_args_passes_through() {
        let args = command_arguments(
            "Thermostat",
            "SetpointRaiseLower",
            &params(json!({"args": [0, "10"]})),
        )
        .unwrap();
        assert_eq!(args.positional, vec!["0", "10"]);
    }

    #[test]
    fn unmapped_with_named_params_is_rejected() {
        let err = command_arguments(
            "Thermostat",
            "SetpointRaiseLower",
            &params(json!({"mode": 0, "amount": 10})),
        )
        .unwrap_err();
        assert!(matches!(err, ParamError::Unordered { .. }));
    }

    #[test]
    fn refresh_targets() {
        assert_eq!(
            refresh_target("LevelControl", "MoveToLevelWithOnOff"),
            Some(("LevelControl", "CurrentLevel"))
        );
        assert_eq!(
            refresh_target("ColorControl", "MoveToColorTemperature"),
            Some(("ColorControl", "ColorTemperatureMireds"))
        );
        assert_eq!(refresh_target("ColorControl", "MoveToHue"), None);
        assert_eq!(refresh_target("Identify", "Identify"), None);
    }
}
