/**
 * JOURNAL - Persistance locale des passes et des commandes
 *
 * RÔLE : EventSink qui ajoute une ligne JSON par passe de mesures et par
 * commande exécutée dans un fichier (JSON lines, append-only).
 *
 * FONCTIONNEMENT :
 * - on_pass / on_command ne font qu'un envoi sur un canal non borné
 * - une tâche de fond écrit et flush chaque ligne
 * - une écriture en échec est loggée puis ignorée, le pipeline n'attend jamais
 *
 * LIGNE EXEMPLE :
 * ```json
 * {"id":"0c1e...","timestamp":"2025-06-01T10:00:00Z","kind":"reading","node_id":"NODE1","data":{...}}
 * ```
 */

use super::EventSink;
use crate::commands::CommandRecord;
use crate::pipeline::PassReport;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Reading,
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub node_id: Option<String>,
    pub data: Value,
}

pub struct JournalSink {
    tx: mpsc::UnboundedSender<JournalEntry>,
}

impl JournalSink {
    /// Ouvre (ou crée) le journal et démarre la tâche d'écriture
    pub async fn spawn(path: impl AsRef<Path>) -> Result<(Self, JoinHandle<()>), JournalError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| JournalError::Io { path: path.clone(), source };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err)?;
        info!("journal opened at {:?}", path);

        let (tx, mut rx) = mpsc::unbounded_channel::<JournalEntry>();
        let handle = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                let mut line = match serde_json::to_vec(&entry) {
                    Ok(l) => l,
                    Err(e) => {
                        warn!("journal entry {} skipped: {}", entry.id, e);
                        continue;
                    }
                };
                line.push(b'\n');
                if let Err(e) = file.write_all(&line).await {
                    warn!("journal write failed: {}", e);
                    continue;
                }
                if let Err(e) = file.flush().await {
                    warn!("journal flush failed: {}", e);
                }
            }
        });

        Ok((Self { tx }, handle))
    }

    fn push(&self, entry: JournalEntry) {
        if self.tx.send(entry).is_err() {
            warn!("journal writer stopped, entry dropped");
        }
    }
}

impl EventSink for JournalSink {
    fn name(&self) -> &'static str {
        "journal"
    }

    fn on_pass(&self, report: &PassReport) {
        if report.readings.is_empty() {
            return;
        }
        self.push(JournalEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: report.readings.timestamp,
            kind: EntryKind::Reading,
            node_id: Some(report.node_id.clone()),
            data: json!({
                "readings": report.readings.values,
                "analytics": report.analytics,
                "alerts": report.alerts.iter().map(|a| a.alert_type).collect::<Vec<_>>(),
            }),
        });
    }

    fn on_command(&self, record: &CommandRecord) {
        let data = match serde_json::to_value(record) {
            Ok(v) => v,
            Err(e) => {
                warn!("command record not serializable: {}", e);
                return;
            }
        };
        self.push(JournalEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: record.timestamp,
            kind: EntryKind::Command,
            node_id: None,
            data,
        });
    }
}

/// Relit un journal complet (outil de diagnostic et tests)
pub async fn read_journal(path: impl AsRef<Path>) -> Result<Vec<JournalEntry>, JournalError> {
    let path = path.as_ref();
    let txt = tokio::fs::read_to_string(path).await.map_err(|source| JournalError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    txt.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(JournalError::from))
        .collect()
}
