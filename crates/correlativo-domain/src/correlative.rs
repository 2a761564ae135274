// Archivo: correlative.rs
// Propósito: fila del cache local, sus estados y la validación del valor.
use crate::{CorrelativeError, OrderMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Longitud máxima aceptada para el valor impreso en la hoja.
const MAX_VALUE_LEN: usize = 64;

/// Estado de un correlativo en el cache local.
///
/// Las transiciones válidas son `Reserved -> Issued`, `Reserved -> Void` e
/// `Issued -> Void`. `Void` es terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrelativeState {
  Reserved,
  Issued,
  Void,
}

impl CorrelativeState {
  pub fn as_str(&self) -> &'static str {
    match self {
      CorrelativeState::Reserved => "RESERVED",
      CorrelativeState::Issued => "ISSUED",
      CorrelativeState::Void => "VOID",
    }
  }

  pub fn can_transition_to(&self, next: CorrelativeState) -> bool {
    matches!((self, next),
             (CorrelativeState::Reserved, CorrelativeState::Issued)
             | (CorrelativeState::Reserved, CorrelativeState::Void)
             | (CorrelativeState::Issued, CorrelativeState::Void))
  }
}

impl fmt::Display for CorrelativeState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for CorrelativeState {
  type Err = CorrelativeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "RESERVED" => Ok(CorrelativeState::Reserved),
      "ISSUED" => Ok(CorrelativeState::Issued),
      "VOID" => Ok(CorrelativeState::Void),
      other => Err(CorrelativeError::Storage(format!("estado desconocido: {}", other))),
    }
  }
}

/// Procedencia del correlativo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Origin {
  /// Llegó en un bloque reservado desde el servidor central.
  Authority,
  /// Lo digitó el operador mientras el puesto estaba sin conexión.
  Manual,
}

impl Origin {
  pub fn as_str(&self) -> &'static str {
    match self {
      Origin::Authority => "AUTHORITY",
      Origin::Manual => "MANUAL",
    }
  }
}

impl fmt::Display for Origin {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Origin {
  type Err = CorrelativeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "AUTHORITY" => Ok(Origin::Authority),
      "MANUAL" => Ok(Origin::Manual),
      other => Err(CorrelativeError::Storage(format!("origen desconocido: {}", other))),
    }
  }
}

/// Fila del cache local: un número de hoja RDP y su historia.
///
/// `reconciled` indica si una fila manual ya fue aceptada por el central
/// (`report_manual`); las filas del central nacen reconciliadas.
///
/// `synced` indica si el último cambio de estado ya fue informado al
/// servidor central; las filas `Reserved` recién traídas nacen sincronizadas
/// porque el central ya sabe que las entregó.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlative {
  pub value: String,
  pub state: CorrelativeState,
  pub origin: Origin,
  pub batch_id: Option<Uuid>,
  pub reserved_at: Option<DateTime<Utc>>,
  pub issued_at: Option<DateTime<Utc>>,
  pub voided_at: Option<DateTime<Utc>>,
  pub void_reason: Option<String>,
  pub metadata: Option<OrderMetadata>,
  pub synced: bool,
  pub reconciled: bool,
  pub conflict: Option<String>,
}

impl Correlative {
  /// Crea una fila `Reserved` para un valor recibido del central.
  pub fn reserved(value: &str, origin: Origin, batch_id: Option<Uuid>) -> Result<Self, CorrelativeError> {
    Ok(Self { value: normalize_value(value)?,
              state: CorrelativeState::Reserved,
              origin,
              batch_id,
              reserved_at: Some(Utc::now()),
              issued_at: None,
              voided_at: None,
              void_reason: None,
              metadata: None,
              synced: true,
              reconciled: true,
              conflict: None })
  }

  /// Crea una fila emitida a mano (modo sin conexión).
  pub fn manual(value: &str, metadata: OrderMetadata) -> Result<Self, CorrelativeError> {
    Ok(Self { value: normalize_value(value)?,
              state: CorrelativeState::Issued,
              origin: Origin::Manual,
              batch_id: None,
              reserved_at: None,
              issued_at: Some(Utc::now()),
              voided_at: None,
              void_reason: None,
              metadata: Some(metadata),
              synced: false,
              reconciled: false,
              conflict: None })
  }

  /// `Reserved -> Issued`, asociando los datos de la orden.
  pub fn issue(&mut self, metadata: OrderMetadata) -> Result<(), CorrelativeError> {
    self.check_transition(CorrelativeState::Issued)?;
    self.state = CorrelativeState::Issued;
    self.issued_at = Some(Utc::now());
    self.metadata = Some(metadata);
    self.synced = false;
    Ok(())
  }

  /// `{Reserved, Issued} -> Void` con motivo obligatorio.
  pub fn void(&mut self, reason: &str) -> Result<(), CorrelativeError> {
    let reason = reason.trim();
    if reason.is_empty() {
      return Err(CorrelativeError::EmptyReason);
    }
    self.check_transition(CorrelativeState::Void)?;
    self.state = CorrelativeState::Void;
    self.voided_at = Some(Utc::now());
    self.void_reason = Some(reason.to_string());
    self.synced = false;
    Ok(())
  }

  /// Registra un conflicto de reconciliación. La fila queda marcada como
  /// informada: el conflicto se revisa a mano, no se reenvía.
  pub fn record_conflict(&mut self, detail: &str) {
    self.conflict = Some(detail.to_string());
    self.synced = true;
    self.reconciled = true;
  }

  pub fn is_available(&self) -> bool {
    self.state == CorrelativeState::Reserved
  }

  fn check_transition(&self, next: CorrelativeState) -> Result<(), CorrelativeError> {
    if self.state.can_transition_to(next) {
      Ok(())
    } else {
      Err(CorrelativeError::InvalidTransition { value: self.value.clone(), from: self.state, to: next })
    }
  }
}

/// Normaliza el valor impreso: sin espacios en los extremos, no vacío, sin
/// caracteres de control y de largo acotado.
pub fn normalize_value(raw: &str) -> Result<String, CorrelativeError> {
  let value = raw.trim();
  if value.is_empty() {
    return Err(CorrelativeError::InvalidValue("el correlativo no puede estar vacío".to_string()));
  }
  if value.chars().count() > MAX_VALUE_LEN {
    return Err(CorrelativeError::InvalidValue(format!("'{}' supera {} caracteres", value, MAX_VALUE_LEN)));
  }
  if value.chars().any(|c| c.is_control()) {
    return Err(CorrelativeError::InvalidValue(format!("'{}' contiene caracteres de control", value.escape_debug())));
  }
  Ok(value.to_string())
}
