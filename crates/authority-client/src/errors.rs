use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthorityError {
  /// Error de red o timeout. Nunca es fatal para el puesto.
  #[error("Sin conexión con el central: {0}")]
  Unreachable(String),
  /// El central rechazó la solicitud (por ejemplo, talonario agotado).
  #[error("El central rechazó la solicitud: {0}")]
  AuthorityRejected(String),
  /// El correlativo manual choca con la secuencia del central.
  #[error("Conflicto de reconciliación para {value}: {detail}")]
  ReconciliationConflict { value: String, detail: String },
  /// Respuesta con formato inesperado.
  #[error("Respuesta inválida del central: {0}")]
  InvalidResponse(String),
}

impl AuthorityError {
  pub fn is_unreachable(&self) -> bool {
    matches!(self, AuthorityError::Unreachable(_))
  }
}
