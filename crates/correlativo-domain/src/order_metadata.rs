// Archivo: order_metadata.rs
// Propósito: datos de la orden de trabajo asociados a una emisión.
use crate::CorrelativeError;
use serde::{Deserialize, Serialize};

/// Datos de la orden de trabajo impresos junto al correlativo.
///
/// El motor de asignación no interpreta estos campos; sólo exige que los
/// obligatorios estén presentes antes de emitir.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderMetadata {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub nro_op: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub molde: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub maquina: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub turno: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub fecha: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub operador: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub color: Option<String>,
}

impl OrderMetadata {
  /// Verifica que los campos obligatorios no estén vacíos.
  pub fn validate(&self) -> Result<(), CorrelativeError> {
    let missing: Vec<&str> = [("nro_op", &self.nro_op), ("molde", &self.molde)].into_iter()
                                                                              .filter(|(_, v)| {
                                                                                v.as_deref()
                                                                                 .map(|s| s.trim().is_empty())
                                                                                 .unwrap_or(true)
                                                                              })
                                                                              .map(|(name, _)| name)
                                                                              .collect();
    if missing.is_empty() {
      Ok(())
    } else {
      Err(CorrelativeError::MissingMetadata(missing.join(", ")))
    }
  }
}
