// Archivo: errors.rs
// Propósito: errores del dominio de correlativos.
use crate::CorrelativeState;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CorrelativeError {
  #[error("Correlativo duplicado: {0}")]
  DuplicateValue(String),
  #[error("Transición inválida para {value}: {from} -> {to}")]
  InvalidTransition { value: String, from: CorrelativeState, to: CorrelativeState },
  #[error("Correlativo no encontrado: {0}")]
  NotFound(String),
  #[error("El motivo de anulación no puede estar vacío")]
  EmptyReason,
  #[error("Faltan datos de la orden: {0}")]
  MissingMetadata(String),
  #[error("Valor de correlativo inválido: {0}")]
  InvalidValue(String),
  #[error("Error de almacenamiento: {0}")]
  Storage(String),
}

impl From<serde_json::Error> for CorrelativeError {
  fn from(e: serde_json::Error) -> Self {
    Self::Storage(format!("serialización: {}", e))
  }
}
