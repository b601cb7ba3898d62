/**
 * ACTUATOR - Sortie des directives vers le contrôleur terrain
 *
 * RÔLE : LineActuator écrit une directive par ligne (`RELAY:1\n`) sur le
 * périphérique de la liaison série (ou tout fichier/pipe configuré).
 * NullActuator sert quand aucun périphérique n'est configuré : chaque
 * directive est loggée et signalée en échec.
 */

use crate::commands::ActuatorDirective;
use crate::ports::Actuator;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct LineActuator {
    device_path: PathBuf,
    // une seule directive à la fois sur la ligne
    lock: Mutex<()>,
}

impl LineActuator {
    pub fn new(device_path: impl Into<PathBuf>) -> Self {
        Self {
            device_path: device_path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let _guard = self.lock.lock().await;
        let mut device = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.device_path)
            .await?;
        device.write_all(format!("{line}\n").as_bytes()).await?;
        device.flush().await
    }
}

#[async_trait]
impl Actuator for LineActuator {
    async fn dispatch(&self, directive: &ActuatorDirective) -> bool {
        match self.write_line(directive.to_line()).await {
            Ok(()) => {
                debug!("sent {} to {:?}", directive, self.device_path);
                true
            }
            Err(e) => {
                warn!("actuator write to {:?} failed: {}", self.device_path, e);
                false
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct NullActuator;

#[async_trait]
impl Actuator for NullActuator {
    async fn dispatch(&self, directive: &ActuatorDirective) -> bool {
        warn!("no actuator device configured, {} not sent", directive);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{ActuatorTarget, ActuatorDirective};

    #[tokio::test]
    async fn test_line_actuator_appends_directives() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ttyACM0");
        let actuator = LineActuator::new(&path);

        assert!(actuator.dispatch(&ActuatorDirective::irrigation_on()).await);
        let gate = ActuatorDirective::new(ActuatorTarget::Gate, "open").unwrap();
        assert!(actuator.dispatch(&gate).await);

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "RELAY:1\nGATE:OPEN\n");
    }

    #[tokio::test]
    async fn test_line_actuator_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let actuator = LineActuator::new(dir.path().join("missing").join("tty"));
        assert!(!actuator.dispatch(&ActuatorDirective::irrigation_on()).await);
        assert!(!NullActuator.dispatch(&ActuatorDirective::irrigation_on()).await);
    }
}
