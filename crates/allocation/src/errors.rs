// Archivo: errors.rs
// Propósito: taxonomía de errores del motor de asignación y el alias
// Result<T> usado por las APIs del crate.
use authority_client::AuthorityError;
use correlativo_domain::{CorrelativeError, CorrelativeState};
use thiserror::Error;

/// Errores del motor de asignación.
///
/// - Red: `Unreachable` (nunca fatal), `AuthorityRejected`.
/// - Invariantes locales: `DuplicateValue`, `InvalidTransition`, `NotFound`.
/// - Validación de entrada: `EmptyReason`, `MissingMetadata`, `InvalidValue`.
/// - Reconciliación: `ReconciliationConflict`, sólo al reconectar.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("Sin conexión con el central: {0}")]
    Unreachable(String),
    #[error("El central rechazó la solicitud: {0}")]
    AuthorityRejected(String),
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
    /// El correlativo ya fue emitido (doble envío desde la interfaz).
    #[error("El correlativo {0} ya fue emitido")]
    AlreadyIssued(String),
    /// Modo sin conexión y no se indicó un correlativo manual.
    #[error("Modo sin conexión: ingrese el correlativo manualmente")]
    ManualEntryRequired,
    #[error("Conflicto de reconciliación para {value}: {detail}")]
    ReconciliationConflict { value: String, detail: String },
    #[error("Error de almacenamiento: {0}")]
    Storage(String),
    #[error("Configuración inválida: {0}")]
    Config(String),
}

impl AllocationError {
    /// Código HTTP equivalente para la fachada de servicio.
    pub fn status_code(&self) -> u16 {
        match self {
            AllocationError::EmptyReason | AllocationError::MissingMetadata(_) | AllocationError::InvalidValue(_) => 400,
            AllocationError::NotFound(_) => 404,
            AllocationError::DuplicateValue(_)
            | AllocationError::InvalidTransition { .. }
            | AllocationError::AlreadyIssued(_)
            | AllocationError::ManualEntryRequired
            | AllocationError::ReconciliationConflict { .. } => 409,
            AllocationError::AuthorityRejected(_) => 422,
            AllocationError::Unreachable(_) => 503,
            AllocationError::Storage(_) | AllocationError::Config(_) => 500,
        }
    }
}

impl From<CorrelativeError> for AllocationError {
    fn from(e: CorrelativeError) -> Self {
        match e {
            CorrelativeError::DuplicateValue(v) => AllocationError::DuplicateValue(v),
            CorrelativeError::InvalidTransition { value, from, to } => AllocationError::InvalidTransition { value, from, to },
            CorrelativeError::NotFound(v) => AllocationError::NotFound(v),
            CorrelativeError::EmptyReason => AllocationError::EmptyReason,
            CorrelativeError::MissingMetadata(m) => AllocationError::MissingMetadata(m),
            CorrelativeError::InvalidValue(m) => AllocationError::InvalidValue(m),
            CorrelativeError::Storage(m) => AllocationError::Storage(m),
        }
    }
}

impl From<AuthorityError> for AllocationError {
    fn from(e: AuthorityError) -> Self {
        match e {
            AuthorityError::Unreachable(m) => AllocationError::Unreachable(m),
            AuthorityError::AuthorityRejected(m) => AllocationError::AuthorityRejected(m),
            AuthorityError::InvalidResponse(m) => AllocationError::AuthorityRejected(format!("respuesta inválida: {}", m)),
            AuthorityError::ReconciliationConflict { value, detail } => {
                AllocationError::ReconciliationConflict { value, detail }
            }
        }
    }
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, AllocationError>;
