use smartfarm_devkit::{ReadingBuilder, TestHarness};
use smartfarm_kernel::commands::{spawn_command_worker, CommandRequest, CommandSource, InboundCommand};
use smartfarm_kernel::pipeline::spawn_ingest_worker;
use smartfarm_kernel::{PublishKind, SensorKey};
use std::time::Duration;
use time::macros::datetime;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[tokio::test]
async fn test_workers_drain_queues_in_order_and_exit() {
    let harness = TestHarness::new();
    harness.connect();

    let (readings_tx, readings_rx) = mpsc::channel(16);
    let (commands_tx, commands_rx) = mpsc::channel(16);
    let ingest = spawn_ingest_worker(harness.pipeline.clone(), harness.commands.clone(), readings_rx);
    let commands = spawn_command_worker(harness.commands.clone(), commands_rx);

    // deux nœuds entrelacés, températures croissantes pour NODE1
    let batches = [
        ReadingBuilder::garden().temp(21.0).at(datetime!(2025-06-01 09:59:00 UTC)),
        ReadingBuilder::security().motion(false).at(datetime!(2025-06-01 09:59:05 UTC)),
        ReadingBuilder::garden().temp(22.0).soil_percent(5.0).at(datetime!(2025-06-01 09:59:10 UTC)),
        ReadingBuilder::security().motion(true).at(datetime!(2025-06-01 09:59:15 UTC)),
        ReadingBuilder::garden().temp(23.0).at(datetime!(2025-06-01 09:59:20 UTC)),
    ];
    for batch in &batches {
        readings_tx.send(batch.batch()).await.unwrap();
    }
    commands_tx
        .send(InboundCommand {
            request: CommandRequest::actuator("cmd-1", "gate", "open"),
            source: CommandSource::Cloud,
        })
        .await
        .unwrap();

    drop(readings_tx);
    drop(commands_tx);
    timeout(Duration::from_secs(5), ingest).await.unwrap().unwrap();
    timeout(Duration::from_secs(5), commands).await.unwrap().unwrap();

    // passes d'un même nœud appliquées dans l'ordre de la file
    let node1_temps: Vec<f64> = harness
        .transport
        .sent_of(PublishKind::Telemetry)
        .iter()
        .filter(|t| t["node_id"] == "NODE1")
        .filter_map(|t| t["readings"]["TEMP"].as_f64())
        .collect();
    assert_eq!(node1_temps, vec![21.0, 22.0, 23.0]);

    let node1 = harness.nodes.get("NODE1").unwrap();
    assert_eq!(node1.readings.timestamp, datetime!(2025-06-01 09:59:20 UTC));
    assert_eq!(node1.readings.get(SensorKey::Temp), Some(23.0));
    let node2 = harness.nodes.get("NODE2").unwrap();
    assert_eq!(node2.readings.get(SensorKey::Pir), Some(1.0));

    // automatisation une seule fois, commande cloud traitée à part
    let lines = harness.actuator.lines();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines.iter().filter(|l| *l == "RELAY:1").count(), 1);
    assert_eq!(lines.iter().filter(|l| *l == "GATE:OPEN").count(), 1);

    let executed = harness.transport.alerts_of_type("COMMAND_EXECUTED");
    let automation: Vec<_> = executed
        .iter()
        .filter(|a| a["data"]["source"] == "system_automation")
        .collect();
    assert_eq!(automation.len(), 1);
    assert_eq!(automation[0]["data"]["command"], "RELAY:1");
    assert_eq!(executed.len(), 2);

    assert_eq!(harness.transport.alerts_of_type("CRITICAL_SOIL_MOISTURE").len(), 1);
    assert_eq!(harness.transport.alerts_of_type("MOTION_DETECTED").len(), 1);
    assert_eq!(harness.health.get_health().passes_processed, 5);
}
