// Archivo: http.rs
// Propósito: implementación HTTP (reqwest bloqueante) de `AuthorityClient`
// contra los endpoints de talonarios del servidor central.
use crate::{AuthorityClient, AuthorityError};
use correlativo_domain::OrderMetadata;
use log::{debug, warn};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct ReserveRequest {
  cantidad: usize,
}

#[derive(Deserialize)]
struct ReserveResponse {
  #[serde(default)]
  correlativos: Vec<JsonValue>,
}

#[derive(Serialize)]
struct IssuedPayload<'a> {
  correlativo: &'a str,
  #[serde(flatten)]
  metadata: &'a OrderMetadata,
}

#[derive(Serialize)]
struct VoidPayload<'a> {
  correlativo: &'a str,
  motivo: &'a str,
}

#[derive(Deserialize)]
struct ErrorPayload {
  error: Option<String>,
}

/// Cliente HTTP del central.
pub struct HttpAuthorityClient {
  client: Client,
  base_url: String,
}

impl HttpAuthorityClient {
  /// Crea el cliente. `base_url` puede terminar en `/` o `/api`; ambos se
  /// quitan porque las rutas ya incluyen `/api`.
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AuthorityError> {
    let client = Client::builder().timeout(timeout)
                                  .connect_timeout(timeout)
                                  .build()
                                  .map_err(|e| AuthorityError::Unreachable(format!("cliente http: {}", e)))?;
    Ok(Self { client, base_url: normalize_base_url(base_url) })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  fn url(&self, path: &str) -> String {
    format!("{}/api/talonarios/{}", self.base_url, path)
  }

  fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Response, AuthorityError> {
    let url = self.url(path);
    debug!("POST {}", url);
    self.client.post(&url).json(body).send().map_err(|e| {
                                                warn!("central inalcanzable en {}: {}", url, e);
                                                AuthorityError::Unreachable(e.to_string())
                                              })
  }

  fn expect_ack(&self, res: Response) -> Result<(), AuthorityError> {
    let status = res.status();
    if status.is_success() {
      return Ok(());
    }
    let body = res.text().unwrap_or_default();
    Err(classify_status(status, &body))
  }
}

impl AuthorityClient for HttpAuthorityClient {
  fn fetch_block(&self, requested_count: usize) -> Result<Vec<String>, AuthorityError> {
    let res = self.post("reservar", &ReserveRequest { cantidad: requested_count })?;
    let status = res.status();
    let body = res.text().map_err(|e| AuthorityError::Unreachable(e.to_string()))?;
    if !status.is_success() {
      return Err(classify_status(status, &body));
    }
    parse_block(&body)
  }

  fn report_issued(&self, value: &str, metadata: &OrderMetadata) -> Result<(), AuthorityError> {
    let res = self.post("emitidos", &IssuedPayload { correlativo: value, metadata })?;
    self.expect_ack(res)
  }

  fn report_void(&self, value: &str, reason: &str) -> Result<(), AuthorityError> {
    let res = self.post("anulados", &VoidPayload { correlativo: value, motivo: reason })?;
    self.expect_ack(res)
  }

  fn report_manual(&self, value: &str, metadata: &OrderMetadata) -> Result<(), AuthorityError> {
    let res = self.post("manuales", &IssuedPayload { correlativo: value, metadata })?;
    if res.status() == StatusCode::CONFLICT {
      let body = res.text().unwrap_or_default();
      return Err(AuthorityError::ReconciliationConflict { value: value.to_string(),
                                                          detail: error_message(&body) });
    }
    self.expect_ack(res)
  }
}

fn normalize_base_url(raw: &str) -> String {
  let trimmed = raw.trim().trim_end_matches('/');
  trimmed.strip_suffix("/api").unwrap_or(trimmed).to_string()
}

/// Traduce un status HTTP no exitoso a la taxonomía de errores.
fn classify_status(status: StatusCode, body: &str) -> AuthorityError {
  match status {
    StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
      AuthorityError::Unreachable(format!("HTTP {}", status.as_u16()))
    }
    _ => AuthorityError::AuthorityRejected(format!("HTTP {}: {}", status.as_u16(), error_message(body))),
  }
}

fn error_message(body: &str) -> String {
  serde_json::from_str::<ErrorPayload>(body).ok()
                                            .and_then(|p| p.error)
                                            .unwrap_or_else(|| body.trim().to_string())
}

/// Extrae la lista de correlativos; acepta números o cadenas.
fn parse_block(body: &str) -> Result<Vec<String>, AuthorityError> {
  let parsed: ReserveResponse =
    serde_json::from_str(body).map_err(|e| AuthorityError::InvalidResponse(format!("json: {}", e)))?;
  parsed.correlativos
        .into_iter()
        .map(|v| match v {
          JsonValue::Number(n) => Ok(n.to_string()),
          JsonValue::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
          other => Err(AuthorityError::InvalidResponse(format!("correlativo inesperado: {}", other))),
        })
        .collect()
}
