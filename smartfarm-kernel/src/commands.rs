/**
 * COMMANDES - Traduction et exécution des commandes actionneurs
 *
 * RÔLE : Les commandes entrantes (topic `commands` du broker, API HTTP locale,
 * automatisation) sont parsées en CommandRequest, traduites en
 * ActuatorDirective ou en demande de status, puis exécutées par CommandService.
 *
 * FONCTIONNEMENT :
 * - commande malformée ou inconnue → ignorée, sans réponse
 * - directive réussie → alerte COMMAND_EXECUTED via le gate
 */

use crate::alerts::AlertEvent;
use crate::gate::{PublishGate, PublishKind, StatusKind};
use crate::ports::{Actuator, Clock, EventSink, SystemStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Actuator { target: String, action: String },
    SystemQuery { action: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub command_id: String,
    pub kind: CommandKind,
    /// Champs supplémentaires de l'émetteur, conservés pour le journal
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct WireCommand {
    #[serde(default)]
    id: Option<Value>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    actuator: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl CommandRequest {
    pub fn actuator(command_id: impl Into<String>, target: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            kind: CommandKind::Actuator {
                target: target.into(),
                action: action.into(),
            },
            extra: Map::new(),
        }
    }

    pub fn system(command_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            kind: CommandKind::SystemQuery { action: action.into() },
            extra: Map::new(),
        }
    }

    /// Parse `{id, type: "actuator"|"system", actuator?, action?}`.
    ///
    /// `None` pour tout ce qui n'est pas une commande exploitable (`type`
    /// inconnu, `action` ou `actuator` absent). `default_id` fournit l'id
    /// quand l'émetteur n'en donne pas.
    pub fn from_value(value: Value, default_id: impl FnOnce() -> String) -> Option<Self> {
        let wire: WireCommand = match serde_json::from_value(value) {
            Ok(w) => w,
            Err(e) => {
                debug!("command payload rejected: {}", e);
                return None;
            }
        };

        let command_id = match wire.id {
            Some(Value::String(s)) if !s.is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => default_id(),
        };

        let action = wire.action?;
        let kind = match wire.kind.as_deref() {
            Some("actuator") => CommandKind::Actuator {
                target: wire.actuator?,
                action,
            },
            Some("system") => CommandKind::SystemQuery { action },
            other => {
                debug!(id = %command_id, "ignoring command type {:?}", other);
                return None;
            }
        };

        Some(Self {
            command_id,
            kind,
            extra: wire.extra,
        })
    }

    pub fn from_slice(bytes: &[u8], default_id: impl FnOnce() -> String) -> Option<Self> {
        let value = serde_json::from_slice::<Value>(bytes).ok()?;
        Self::from_value(value, default_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorTarget {
    Irrigation,
    Gate,
    Buzzer,
}

impl ActuatorTarget {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "irrigation" => Some(Self::Irrigation),
            "gate" => Some(Self::Gate),
            "buzzer" => Some(Self::Buzzer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectiveAction {
    On,
    Off,
    Open,
    Close,
}

/// Directive prête pour la liaison série du contrôleur
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActuatorDirective {
    pub target: ActuatorTarget,
    pub action: DirectiveAction,
}

impl ActuatorDirective {
    /// Directive, ou `None` si l'action ne s'applique pas à la cible
    pub fn new(target: ActuatorTarget, action: &str) -> Option<Self> {
        let action = match (target, action.trim().to_ascii_lowercase().as_str()) {
            (ActuatorTarget::Irrigation | ActuatorTarget::Buzzer, "on") => DirectiveAction::On,
            (ActuatorTarget::Irrigation | ActuatorTarget::Buzzer, "off") => DirectiveAction::Off,
            (ActuatorTarget::Gate, "open") => DirectiveAction::Open,
            (ActuatorTarget::Gate, "close") => DirectiveAction::Close,
            _ => return None,
        };
        Some(Self { target, action })
    }

    pub fn irrigation_on() -> Self {
        Self {
            target: ActuatorTarget::Irrigation,
            action: DirectiveAction::On,
        }
    }

    /// Texte du protocole ligne compris par le contrôleur des nœuds
    pub fn to_line(&self) -> &'static str {
        match (self.target, self.action) {
            (ActuatorTarget::Irrigation, DirectiveAction::On) => "RELAY:1",
            (ActuatorTarget::Irrigation, _) => "RELAY:0",
            (ActuatorTarget::Gate, DirectiveAction::Open) => "GATE:OPEN",
            (ActuatorTarget::Gate, _) => "GATE:CLOSE",
            (ActuatorTarget::Buzzer, DirectiveAction::On) => "BUZZER:1",
            (ActuatorTarget::Buzzer, _) => "BUZZER:0",
        }
    }
}

impl fmt::Display for ActuatorDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_line())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Translation {
    Directive(ActuatorDirective),
    StatusQuery,
    Ignored,
}

pub fn translate(request: &CommandRequest) -> Translation {
    match &request.kind {
        CommandKind::Actuator { target, action } => ActuatorTarget::parse(target)
            .and_then(|t| ActuatorDirective::new(t, action))
            .map(Translation::Directive)
            .unwrap_or(Translation::Ignored),
        CommandKind::SystemQuery { action } if action.trim().eq_ignore_ascii_case("get_status") => {
            Translation::StatusQuery
        }
        CommandKind::SystemQuery { .. } => Translation::Ignored,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandSource {
    #[serde(rename = "cloud_command")]
    Cloud,
    #[serde(rename = "local_api")]
    LocalApi,
    #[serde(rename = "system_automation")]
    Automation,
}

impl CommandSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandSource::Cloud => "cloud_command",
            CommandSource::LocalApi => "local_api",
            CommandSource::Automation => "system_automation",
        }
    }
}

/// Trace d'une commande exécutée, remise aux EventSinks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandRecord {
    pub command_id: String,
    pub source: CommandSource,
    pub command: String,
    pub success: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct InboundCommand {
    pub request: CommandRequest,
    pub source: CommandSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Dispatched { directive: ActuatorDirective, success: bool },
    StatusReported,
    Ignored,
}

pub struct CommandService {
    actuator: Arc<dyn Actuator>,
    gate: Arc<PublishGate>,
    status: Arc<dyn SystemStatus>,
    sinks: Vec<Arc<dyn EventSink>>,
    clock: Arc<dyn Clock>,
}

impl CommandService {
    pub fn new(
        actuator: Arc<dyn Actuator>,
        gate: Arc<PublishGate>,
        status: Arc<dyn SystemStatus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            actuator,
            gate,
            status,
            sinks: Vec::new(),
            clock,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub async fn handle(&self, request: &CommandRequest, source: CommandSource) -> CommandOutcome {
        match translate(request) {
            Translation::Directive(directive) => {
                let success = self.dispatch(directive, source, &request.command_id).await;
                if let CommandKind::Actuator { target, action } = &request.kind {
                    let response = json!({
                        "command_id": request.command_id,
                        "status": if success { "success" } else { "failed" },
                        "actuator": target,
                        "action": action,
                        "timestamp": self.clock.now().format(&Rfc3339).ok(),
                    });
                    self.gate.publish(PublishKind::Status, response);
                }
                CommandOutcome::Dispatched { directive, success }
            }
            Translation::StatusQuery => {
                let snapshot = self.status.snapshot();
                self.gate.publish_status_report(StatusKind::Snapshot, snapshot);
                CommandOutcome::StatusReported
            }
            Translation::Ignored => {
                debug!(id = %request.command_id, "command ignored: {:?}", request.kind);
                CommandOutcome::Ignored
            }
        }
    }

    /// Envoie une directive à l'actionneur. Le succès vient de son retour ;
    /// seules les directives réussies sont accusées par COMMAND_EXECUTED.
    pub async fn dispatch(&self, directive: ActuatorDirective, source: CommandSource, command_id: &str) -> bool {
        let success = self.actuator.dispatch(&directive).await;
        let now = self.clock.now();

        if success {
            info!(id = command_id, source = source.as_str(), "directive {} executed", directive);
            self.gate
                .publish_alert(&AlertEvent::command_executed(directive.to_line(), source.as_str(), now));
        } else {
            warn!(id = command_id, source = source.as_str(), "directive {} failed", directive);
        }

        let record = CommandRecord {
            command_id: command_id.to_string(),
            source,
            command: directive.to_line().to_string(),
            success,
            timestamp: now,
        };
        for sink in &self.sinks {
            sink.on_command(&record);
        }
        success
    }
}

/// Traite les commandes entrantes une par une, dans l'ordre d'arrivée
pub fn spawn_command_worker(service: Arc<CommandService>, mut rx: mpsc::Receiver<InboundCommand>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(inbound) = rx.recv().await {
            service.handle(&inbound.request, inbound.source).await;
        }
        debug!("command queue closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(v: Value) -> Option<CommandRequest> {
        CommandRequest::from_value(v, || "unknown".to_string())
    }

    #[test]
    fn test_irrigation_on_maps_to_relay() {
        let req = parse(json!({"id": "c1", "type": "actuator", "actuator": "irrigation", "action": "on"})).unwrap();
        let Translation::Directive(d) = translate(&req) else { panic!("expected directive") };
        assert_eq!(d.to_line(), "RELAY:1");
    }

    #[test]
    fn test_directive_lines() {
        let cases = [
            ("irrigation", "OFF", "RELAY:0"),
            ("gate", "open", "GATE:OPEN"),
            ("gate", "Close", "GATE:CLOSE"),
            ("buzzer", "on", "BUZZER:1"),
            ("buzzer", "off", "BUZZER:0"),
        ];
        for (target, action, line) in cases {
            let req = CommandRequest::actuator("x", target, action);
            let Translation::Directive(d) = translate(&req) else { panic!("{target} {action}") };
            assert_eq!(d.to_line(), line);
        }
    }

    #[test]
    fn test_unknown_actuator_is_noop() {
        let req = parse(json!({"type": "actuator", "actuator": "unknown_device", "action": "on"})).unwrap();
        assert_eq!(translate(&req), Translation::Ignored);
        assert_eq!(req.command_id, "unknown");
    }

    #[test]
    fn test_invalid_action_for_target() {
        assert_eq!(translate(&CommandRequest::actuator("x", "gate", "on")), Translation::Ignored);
        assert_eq!(translate(&CommandRequest::actuator("x", "irrigation", "open")), Translation::Ignored);
    }

    #[test]
    fn test_system_query() {
        let req = parse(json!({"id": 42, "type": "system", "action": "get_status"})).unwrap();
        assert_eq!(req.command_id, "42");
        assert_eq!(translate(&req), Translation::StatusQuery);
        assert_eq!(translate(&CommandRequest::system("x", "reboot")), Translation::Ignored);
    }

    #[test]
    fn test_malformed_commands_rejected() {
        assert!(parse(json!({"type": "firmware", "action": "flash"})).is_none());
        assert!(parse(json!({"type": "actuator", "actuator": "gate"})).is_none());
        assert!(parse(json!({"type": "actuator", "action": "on"})).is_none());
        assert!(parse(json!("not an object")).is_none());
        assert!(CommandRequest::from_slice(b"{broken", || "x".into()).is_none());
    }

    #[test]
    fn test_extra_fields_kept() {
        let req = parse(json!({"type": "system", "action": "get_status", "requested_by": "console"})).unwrap();
        assert_eq!(req.extra["requested_by"], "console");
    }
}
