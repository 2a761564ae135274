//! Crate `authority-client`: frontera de red con el servidor central de
//! talonarios.
//!
//! Expone el contrato `AuthorityClient` (reservar bloques de correlativos e
//! informar emisiones, anulaciones y correlativos manuales) y una
//! implementación HTTP bloqueante con timeout corto. No reintenta: quien
//! llama decide qué hacer ante `AuthorityError::Unreachable`.
mod errors;
mod http;

pub use errors::AuthorityError;
pub use http::{HttpAuthorityClient, DEFAULT_TIMEOUT};

use correlativo_domain::OrderMetadata;

/// Contrato con el servidor central de numeración.
pub trait AuthorityClient: Send + Sync {
  /// Pide `requested_count` correlativos nuevos. Puede devolver menos si el
  /// central tiene un pool menor. Cada llamada consume una porción del
  /// talonario que el central no vuelve a entregar.
  fn fetch_block(&self, requested_count: usize) -> Result<Vec<String>, AuthorityError>;

  /// Informa una emisión confirmada.
  fn report_issued(&self, value: &str, metadata: &OrderMetadata) -> Result<(), AuthorityError>;

  /// Informa una anulación con su motivo.
  fn report_void(&self, value: &str, reason: &str) -> Result<(), AuthorityError>;

  /// Sube un correlativo digitado sin conexión. El central puede responder
  /// `ReconciliationConflict` si choca con su propia secuencia.
  fn report_manual(&self, value: &str, metadata: &OrderMetadata) -> Result<(), AuthorityError>;
}
