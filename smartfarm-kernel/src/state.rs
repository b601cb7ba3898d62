use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Drapeau de connectivité broker, unique état partagé à l'échelle du process.
///
/// Écrit uniquement par les callbacks connect/disconnect du transport MQTT,
/// lu (jamais écrit) par le publish gate. Injecté, pas global.
#[derive(Debug, Clone, Default)]
pub struct Connectivity {
    connected: Arc<AtomicBool>,
}

impl Connectivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn mark_connected(&self) {
        self.connected.store(true, Ordering::Release);
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }
}
