/**
 * MQTT - Adaptateur Transport vers le broker (rumqttc)
 *
 * RÔLE : publication non bloquante des messages du gate (try_publish, QoS 1)
 * et boucle d'événements qui tient à jour le drapeau de connectivité et
 * remonte les commandes cloud vers le worker de commandes.
 *
 * TOPICS : `{prefix}/{device_id}/{telemetry|alerts|status|commands}`
 *
 * CONNEXION : ConnAck OK → connecté + subscribe commands + status CONNECTED.
 * Erreur réseau → déconnecté, compteur de reconnexions, pause 2s (rumqttc
 * relance la connexion au poll suivant).
 */

use crate::commands::{CommandRequest, CommandSource, InboundCommand};
use crate::config::KernelConfig;
use crate::gate::{PublishGate, PublishKind, StatusKind};
use crate::health::HealthTracker;
use crate::ports::Transport;
use crate::state::Connectivity;
use anyhow::Context;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS,
    TlsConfiguration, Transport as MqttWire,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub telemetry: String,
    pub alerts: String,
    pub status: String,
    pub commands: String,
}

impl Topics {
    pub fn new(prefix: &str, device_id: &str) -> Self {
        let base = format!("{}/{}", prefix.trim_end_matches('/'), device_id);
        Self {
            telemetry: format!("{base}/telemetry"),
            alerts: format!("{base}/alerts"),
            status: format!("{base}/status"),
            commands: format!("{base}/commands"),
        }
    }

    pub fn for_kind(&self, kind: PublishKind) -> &str {
        match kind {
            PublishKind::Telemetry => &self.telemetry,
            PublishKind::Alert => &self.alerts,
            PublishKind::Status => &self.status,
        }
    }
}

pub struct MqttTransport {
    client: AsyncClient,
    topics: Topics,
}

impl MqttTransport {
    pub fn new(client: AsyncClient, topics: Topics) -> Self {
        Self { client, topics }
    }
}

impl Transport for MqttTransport {
    fn send_outbound(&self, kind: PublishKind, payload: &serde_json::Value) -> bool {
        let bytes = match serde_json::to_vec(payload) {
            Ok(b) => b,
            Err(e) => {
                warn!("payload for {} not serializable: {}", kind.channel(), e);
                return false;
            }
        };
        let topic = self.topics.for_kind(kind);
        match self.client.try_publish(topic, QoS::AtLeastOnce, false, bytes) {
            Ok(()) => true,
            Err(e) => {
                warn!("publish to {} failed: {}", topic, e);
                false
            }
        }
    }
}

/// Construit client + event loop depuis la config (TLS mutuel optionnel)
pub fn create_mqtt_client(cfg: &KernelConfig) -> anyhow::Result<(AsyncClient, EventLoop)> {
    let mut opts = MqttOptions::new(cfg.client_id(), &cfg.mqtt.host, cfg.mqtt.port);
    opts.set_keep_alive(Duration::from_secs(cfg.mqtt.keep_alive_secs.max(5)));

    if let Some(tls) = &cfg.mqtt.tls {
        let ca = std::fs::read(&tls.ca_path).with_context(|| format!("reading CA {:?}", tls.ca_path))?;
        let client_auth = match (&tls.cert_path, &tls.key_path) {
            (Some(cert), Some(key)) => {
                let cert = std::fs::read(cert).with_context(|| format!("reading client cert {:?}", cert))?;
                let key = std::fs::read(key).with_context(|| format!("reading client key {:?}", key))?;
                Some((cert, key))
            }
            (None, None) => None,
            _ => anyhow::bail!("mqtt.tls needs both cert_path and key_path"),
        };
        opts.set_transport(MqttWire::tls_with_config(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth,
        }));
    }

    Ok(AsyncClient::new(opts, 64))
}

/// Commande cloud reçue sur le topic commands, `None` si inexploitable
pub fn parse_cloud_command(topics: &Topics, topic: &str, payload: &[u8]) -> Option<InboundCommand> {
    if topic != topics.commands {
        return None;
    }
    CommandRequest::from_slice(payload, || "unknown".to_string()).map(|request| InboundCommand {
        request,
        source: CommandSource::Cloud,
    })
}

pub struct MqttLoop {
    pub client: AsyncClient,
    pub topics: Topics,
    pub connectivity: Connectivity,
    pub health: HealthTracker,
    pub gate: Arc<PublishGate>,
    pub commands_tx: mpsc::Sender<InboundCommand>,
}

impl MqttLoop {
    pub fn spawn(self, mut eventloop: EventLoop) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                        if ack.code != ConnectReturnCode::Success {
                            error!("broker refused connection: {:?}", ack.code);
                            self.connectivity.mark_disconnected();
                            self.health.mark_mqtt_disconnected();
                            continue;
                        }
                        self.connectivity.mark_connected();
                        self.health.mark_mqtt_connected();
                        info!("connected to broker");
                        if let Err(e) = self.client.try_subscribe(&self.topics.commands, QoS::AtLeastOnce) {
                            warn!("subscribe {} failed: {}", self.topics.commands, e);
                        }
                        self.gate.publish_status(StatusKind::Connected);
                    }
                    Ok(Event::Incoming(Incoming::Publish(p))) => {
                        match parse_cloud_command(&self.topics, &p.topic, &p.payload) {
                            Some(cmd) => {
                                if let Err(e) = self.commands_tx.try_send(cmd) {
                                    warn!("command queue full, dropped: {}", e);
                                }
                            }
                            None => debug!("ignored message on {}", p.topic),
                        }
                    }
                    Ok(Event::Incoming(Incoming::Disconnect)) => {
                        warn!("broker closed the session");
                        self.connectivity.mark_disconnected();
                        self.health.mark_mqtt_disconnected();
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        info!("mqtt client disconnected");
                        self.connectivity.mark_disconnected();
                        self.health.mark_mqtt_disconnected();
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if self.connectivity.is_connected() {
                            warn!("connection lost: {}", e);
                        } else {
                            debug!("mqtt error: {}", e);
                        }
                        self.connectivity.mark_disconnected();
                        self.health.increment_reconnects();
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        })
    }
}
