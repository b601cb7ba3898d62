/**
 * SMARTFARM KERNEL - Point d'entrée du service
 *
 * RÔLE : Bootstrap complet : config, logs, pipeline et sinks, worker
 * d'ingestion, worker de commandes, MQTT, météo, API HTTP locale, arrêt propre.
 *
 * ARRÊT (Ctrl-C) : status SHUTTING_DOWN, puis DISCONNECTING (passe même
 * déconnecté), drapeau déconnecté, courte pause, disconnect MQTT.
 */

use anyhow::Context;
use smartfarm_kernel::actuator::{LineActuator, NullActuator};
use smartfarm_kernel::config::load_config;
use smartfarm_kernel::health::{HealthTracker, KernelStatus};
use smartfarm_kernel::http::{build_router, AppState};
use smartfarm_kernel::mqtt::{create_mqtt_client, MqttLoop, MqttTransport, Topics};
use smartfarm_kernel::nodes::NodeRegistry;
use smartfarm_kernel::pipeline::spawn_ingest_worker;
use smartfarm_kernel::commands::spawn_command_worker;
use smartfarm_kernel::ports::journal::JournalSink;
use smartfarm_kernel::ports::{Actuator, Clock, SystemClock, Transport};
use smartfarm_kernel::weather::OpenWeatherClient;
use smartfarm_kernel::{AlertEngine, CloudSink, CommandService, Connectivity, Pipeline, PublishGate, PublishKind, StatusKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Transport utilisé quand MQTT est désactivé : tout envoi échoue
struct OfflineTransport;

impl Transport for OfflineTransport {
    fn send_outbound(&self, _kind: PublishKind, _payload: &serde_json::Value) -> bool {
        false
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("smartfarm_kernel=info")),
        )
        .init();

    let cfg = load_config().await;
    info!(device = %cfg.device.id, "starting smartfarm kernel");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::with_offset_hours(cfg.device.utc_offset_hours));
    let connectivity = Connectivity::new();
    let health = HealthTracker::new();
    let nodes = NodeRegistry::new();
    let engine = Arc::new(AlertEngine::new(cfg.alert_settings()));

    let status = Arc::new(KernelStatus::new(
        cfg.device.id.clone(),
        format!("{}:{}", cfg.mqtt.host, cfg.mqtt.port),
        health.clone(),
        connectivity.clone(),
        nodes.clone(),
        engine.clone(),
    ));

    // transport MQTT (ou hors ligne)
    let topics = Topics::new(&cfg.mqtt.topic_prefix, &cfg.device.id);
    let mqtt = if cfg.mqtt.enabled {
        Some(create_mqtt_client(&cfg).context("creating MQTT client")?)
    } else {
        health.mark_mqtt_disabled();
        warn!("mqtt disabled, cloud publishing off");
        None
    };
    let transport: Arc<dyn Transport> = match &mqtt {
        Some((client, _)) => Arc::new(MqttTransport::new(client.clone(), topics.clone())),
        None => Arc::new(OfflineTransport),
    };

    // gate + météo optionnelle
    let mut gate = PublishGate::new(
        transport,
        connectivity.clone(),
        clock.clone(),
        cfg.device.id.clone(),
        cfg.site_location(),
    )
    .with_status(status.clone());
    let mut weather_task = None;
    if let Some(key) = cfg.weather_api_key() {
        let client = OpenWeatherClient::new(key, cfg.device.location.lat, cfg.device.location.lng)
            .context("creating weather client")?;
        weather_task = Some(client.spawn_refresher(Duration::from_secs(cfg.weather_refresh_secs())));
        gate = gate.with_weather(Arc::new(client));
        info!("weather enrichment enabled");
    }
    let gate = Arc::new(gate);

    // journal local optionnel
    let (journal, journal_writer) = match &cfg.journal {
        Some(j) => match JournalSink::spawn(&j.path).await {
            Ok((sink, writer)) => (Some(Arc::new(sink)), Some(writer)),
            Err(e) => {
                warn!("journal disabled: {}", e);
                (None, None)
            }
        },
        None => (None, None),
    };

    let actuator: Arc<dyn Actuator> = match &cfg.actuator.device_path {
        Some(path) => Arc::new(LineActuator::new(path)),
        None => Arc::new(NullActuator),
    };

    let mut commands = CommandService::new(actuator, gate.clone(), status.clone(), clock.clone())
        .with_sink(Arc::new(health.clone()));
    let mut pipeline = Pipeline::new(engine.clone(), clock.clone())
        .with_sink(Arc::new(nodes.clone()))
        .with_sink(Arc::new(health.clone()))
        .with_sink(Arc::new(CloudSink::new(gate.clone())));
    if let Some(journal) = &journal {
        pipeline = pipeline.with_sink(journal.clone());
        commands = commands.with_sink(journal.clone());
    }
    let commands = Arc::new(commands);
    let pipeline = Arc::new(pipeline);

    let (readings_tx, readings_rx) = mpsc::channel(256);
    let (commands_tx, commands_rx) = mpsc::channel(64);
    let ingest_task = spawn_ingest_worker(pipeline, commands.clone(), readings_rx);
    let command_task = spawn_command_worker(commands, commands_rx);

    let mqtt_client = match mqtt {
        Some((client, eventloop)) => {
            MqttLoop {
                client: client.clone(),
                topics,
                connectivity: connectivity.clone(),
                health: health.clone(),
                gate: gate.clone(),
                commands_tx: commands_tx.clone(),
            }
            .spawn(eventloop);
            Some(client)
        }
        None => None,
    };

    // HTTP
    let app = build_router(AppState {
        nodes,
        status,
        clock,
        readings_tx,
        commands_tx,
        api_key: std::env::var("SMARTFARM_API_KEY").ok(),
    });
    let listener = TcpListener::bind(cfg.http.bind.as_str())
        .await
        .with_context(|| format!("binding {}", cfg.http.bind))?;
    info!("listening on http://{}", cfg.http.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("ctrl-c handler failed: {}", e);
            }
            info!("shutdown requested");
        })
        .await
        .context("http server")?;

    // arrêt propre
    gate.publish_status(StatusKind::ShuttingDown);
    gate.publish_status(StatusKind::Disconnecting);
    connectivity.mark_disconnected();
    tokio::time::sleep(Duration::from_secs(1)).await;
    if let Some(client) = mqtt_client {
        if let Err(e) = client.disconnect().await {
            warn!("mqtt disconnect failed: {}", e);
        }
    }
    if let Some(task) = weather_task {
        task.abort();
    }
    ingest_task.abort();
    command_task.abort();
    // les workers lâchent leurs sinks ; le journal vide sa file puis se ferme
    let _ = ingest_task.await;
    let _ = command_task.await;
    drop(journal);
    if let Some(writer) = journal_writer {
        if tokio::time::timeout(Duration::from_secs(2), writer).await.is_err() {
            warn!("journal writer did not finish in time");
        }
    }

    info!("smartfarm kernel stopped");
    Ok(())
}
