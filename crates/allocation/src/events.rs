// Archivo: events.rs
// Propósito: notificaciones del motor hacia la interfaz (cambio de modo,
// reposiciones, informes diferidos) sin que la interfaz tenga que sondear.
use crate::policy::Mode;
use correlativo_domain::Origin;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Eventos publicados por un `AllocationEngine`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EngineEvent {
    ModeChanged { from: Mode, to: Mode },
    Replenished { inserted: usize, available: usize },
    Issued { value: String, origin: Origin },
    Voided { value: String, reason: String },
    /// Un informe al central falló y quedó pendiente.
    ReportDeferred { value: String, error: String },
    /// El central detectó un choque con un correlativo manual.
    ConflictRecorded { value: String, detail: String },
}

/// Canal de eventos propio de cada motor (no global).
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publica un evento; sin suscriptores no hace nada.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
