// Archivo: service.rs
// Propósito: implementar `CorrelativeService`, la fachada que usan los
// handlers HTTP o la CLI del puesto. Traduce DTOs serializables a llamadas
// del `AllocationEngine` y los errores a `(status, { "error": ... })`.
use crate::engine::{AllocationEngine, SyncReport};
use crate::errors::AllocationError;
use crate::policy::Mode;
use crate::print::PrintBridge;
use authority_client::AuthorityClient;
use chrono::{DateTime, Utc};
use correlativo_domain::{Correlative, CorrelativeStore, OrderMetadata, Origin};
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextCorrelativeResponse {
    pub siguiente: Option<String>,
    pub disponibles: usize,
    pub mode: Mode,
}

/// Pedido de emisión: los campos de la orden van planos junto al
/// correlativo manual opcional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRequest {
    #[serde(flatten)]
    pub metadata: OrderMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlativo_manual: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueResponse {
    pub correlativo: String,
    /// Sólo refleja la confirmación de la impresora, no la emisión.
    pub impreso: bool,
    pub origin: Origin,
    pub disponibles: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidRequest {
    /// Sin valor se anula el próximo disponible.
    #[serde(default)]
    pub correlativo: Option<String>,
    #[serde(default)]
    pub motivo: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidResponse {
    pub correlativo: String,
    pub motivo: String,
    pub fecha: Option<DateTime<Utc>>,
}

impl From<Correlative> for VoidResponse {
    fn from(c: Correlative) -> Self {
        Self { correlativo: c.value, motivo: c.void_reason.unwrap_or_default(), fecha: c.voided_at }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatusResponse {
    pub disponibles: usize,
    pub mode: Mode,
    pub last_authority_contact: Option<DateTime<Utc>>,
    pub siguiente: Option<String>,
    /// Umbral de reposición anticipada, si está configurado.
    pub umbral: Option<usize>,
    pub necesita_reponer: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplenishRequest {
    #[serde(default)]
    pub target_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplenishResponse {
    pub inserted_count: usize,
    pub disponibles: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub correlativo: String,
    pub detalle: String,
}

/// Cuerpo de error expuesto a los clientes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl From<&AllocationError> for ErrorBody {
    fn from(e: &AllocationError) -> Self {
        Self { error: e.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    pub status: u16,
    pub body: ErrorBody,
}

impl From<AllocationError> for ServiceError {
    fn from(e: AllocationError) -> Self {
        Self { status: e.status_code(), body: ErrorBody::from(&e) }
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Fachada de alto nivel sobre el motor y la impresora.
pub struct CorrelativeService<S, A, P>
    where S: CorrelativeStore + 'static,
          A: AuthorityClient + 'static,
          P: PrintBridge
{
    engine: Arc<AllocationEngine<S, A>>,
    printer: Arc<P>,
}

impl<S, A, P> CorrelativeService<S, A, P>
    where S: CorrelativeStore + 'static,
          A: AuthorityClient + 'static,
          P: PrintBridge
{
    pub fn new(engine: Arc<AllocationEngine<S, A>>, printer: Arc<P>) -> Self {
        Self { engine, printer }
    }

    pub fn engine(&self) -> &Arc<AllocationEngine<S, A>> {
        &self.engine
    }

    pub fn next_correlative(&self) -> ServiceResult<NextCorrelativeResponse> {
        let next = self.engine.get_next()?;
        Ok(NextCorrelativeResponse { siguiente: next.value, disponibles: next.available_count, mode: next.mode })
    }

    /// Emite el próximo disponible, o `correlativo_manual` si viene, y
    /// manda la hoja a imprimir.
    pub fn issue_correlative(&self, req: IssueRequest) -> ServiceResult<IssueResponse> {
        req.metadata.validate().map_err(AllocationError::from)?;
        let manual = req.correlativo_manual
                        .as_deref()
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                        .map(str::to_string);
        let value = match manual {
            Some(v) => v,
            None => self.engine.get_next()?.value.ok_or(AllocationError::ManualEntryRequired)?,
        };
        let issued = self.engine.issue(&value, &req.metadata)?;
        let impreso = match self.printer.print(&issued) {
            Ok(printed) => printed,
            Err(e) => {
                warn!("no se pudo imprimir {}: {}", issued.value, e);
                false
            }
        };
        Ok(IssueResponse { correlativo: issued.value,
                           impreso,
                           origin: issued.origin,
                           disponibles: self.engine.status()?.available_count })
    }

    pub fn void_correlative(&self, req: VoidRequest) -> ServiceResult<VoidResponse> {
        let voided = match req.correlativo.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            Some(value) => self.engine.void(value, &req.motivo)?,
            None => self.engine.void_next(&req.motivo)?,
        };
        Ok(voided.into())
    }

    pub fn cache_status(&self) -> ServiceResult<CacheStatusResponse> {
        let status = self.engine.status()?;
        let umbral = self.engine.config().low_water_mark;
        let necesita_reponer = match umbral {
            Some(mark) => status.available_count <= mark,
            None => status.available_count == 0,
        };
        Ok(CacheStatusResponse { disponibles: status.available_count,
                                 mode: status.mode,
                                 last_authority_contact: status.last_authority_contact,
                                 siguiente: status.next,
                                 umbral,
                                 necesita_reponer })
    }

    pub fn cache_replenish(&self, req: ReplenishRequest) -> ServiceResult<ReplenishResponse> {
        let target = req.target_count.unwrap_or(self.engine.config().replenish_target);
        let inserted_count = self.engine.replenish(target)?;
        Ok(ReplenishResponse { inserted_count, disponibles: self.engine.status()?.available_count })
    }

    pub fn reconnect(&self) -> ServiceResult<ReplenishResponse> {
        let inserted_count = self.engine.reconnect()?;
        Ok(ReplenishResponse { inserted_count, disponibles: self.engine.status()?.available_count })
    }

    pub fn list_voided(&self) -> ServiceResult<Vec<VoidResponse>> {
        Ok(self.engine.list_voided()?.into_iter().map(VoidResponse::from).collect())
    }

    pub fn list_conflicts(&self) -> ServiceResult<Vec<ConflictEntry>> {
        Ok(self.engine
               .list_conflicts()?
               .into_iter()
               .map(|c| ConflictEntry { correlativo: c.value, detalle: c.conflict.unwrap_or_default() })
               .collect())
    }

    pub fn sync(&self) -> ServiceResult<SyncReport> {
        Ok(self.engine.sync_pending()?)
    }
}
