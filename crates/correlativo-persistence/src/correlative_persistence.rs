// Archivo: correlative_persistence.rs
// Propósito: cache local durable sobre SQLite (Diesel + pool r2d2).
use crate::schema::correlativos;
use crate::schema::correlativos::dsl;
use chrono::{DateTime, Utc};
use correlativo_domain::{Correlative, CorrelativeError, CorrelativeState, CorrelativeStore, OrderMetadata, Origin};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{debug, info};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");
type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;
/// Pragmas aplicados a cada conexión del pool. `synchronous = FULL` asegura
/// que un commit está en disco antes de responder al motor.
#[derive(Debug)]
struct SqlitePragmas;
impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
  fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
    conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL; PRAGMA synchronous = FULL;")
        .map_err(diesel::r2d2::Error::QueryError)
  }
}
/// Repo Diesel que implementa `CorrelativeStore` sobre SQLite.
///
/// Toda secuencia leer-modificar-escribir corre dentro de una transacción
/// `BEGIN IMMEDIATE`, que toma el lock de escritura de la base al inicio:
/// dos procesos del mismo puesto no pueden emitir el mismo correlativo.
pub struct DieselCorrelativeStore {
  pool: Arc<DbPool>,
}
/// Error interno de las transacciones: Diesel exige `From<DieselError>`.
enum TxError {
  Db(DieselError),
  Domain(CorrelativeError),
}
impl From<DieselError> for TxError {
  fn from(e: DieselError) -> Self {
    TxError::Db(e)
  }
}
impl From<CorrelativeError> for TxError {
  fn from(e: CorrelativeError) -> Self {
    TxError::Domain(e)
  }
}
impl From<TxError> for CorrelativeError {
  fn from(e: TxError) -> Self {
    match e {
      TxError::Db(e) => db_err(e),
      TxError::Domain(e) => e,
    }
  }
}
fn db_err(e: DieselError) -> CorrelativeError {
  CorrelativeError::Storage(format!("db: {}", e))
}
#[derive(Debug, Queryable)]
struct CorrelativeRow {
  pub seq: i64,
  pub value: String,
  pub state: String,
  pub origin: String,
  pub batch_id: Option<String>,
  pub reserved_at_ts: Option<i64>,
  pub issued_at_ts: Option<i64>,
  pub voided_at_ts: Option<i64>,
  pub void_reason: Option<String>,
  pub metadata: Option<String>,
  pub synced: bool,
  pub reconciled: bool,
  pub conflict: Option<String>,
}
#[derive(Debug, Insertable, AsChangeset)]
#[diesel(table_name = correlativos)]
#[diesel(treat_none_as_null = true)]
struct CorrelativeFields {
  pub value: String,
  pub state: String,
  pub origin: String,
  pub batch_id: Option<String>,
  pub reserved_at_ts: Option<i64>,
  pub issued_at_ts: Option<i64>,
  pub voided_at_ts: Option<i64>,
  pub void_reason: Option<String>,
  pub metadata: Option<String>,
  pub synced: bool,
  pub reconciled: bool,
  pub conflict: Option<String>,
}
fn to_ts(t: Option<DateTime<Utc>>) -> Option<i64> {
  t.map(|t| t.timestamp_millis())
}
fn from_ts(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, CorrelativeError> {
  match ms {
    None => Ok(None),
    Some(ms) => DateTime::<Utc>::from_timestamp_millis(ms).map(Some)
                                                         .ok_or_else(|| {
                                                           CorrelativeError::Storage(format!("timestamp inválido: {}", ms))
                                                         }),
  }
}
impl CorrelativeFields {
  fn from_domain(c: &Correlative) -> Result<Self, CorrelativeError> {
    let metadata = match &c.metadata {
      Some(m) => Some(serde_json::to_string(m)?),
      None => None,
    };
    Ok(Self { value: c.value.clone(),
              state: c.state.as_str().to_string(),
              origin: c.origin.as_str().to_string(),
              batch_id: c.batch_id.map(|u| u.to_string()),
              reserved_at_ts: to_ts(c.reserved_at),
              issued_at_ts: to_ts(c.issued_at),
              voided_at_ts: to_ts(c.voided_at),
              void_reason: c.void_reason.clone(),
              metadata,
              synced: c.synced,
              reconciled: c.reconciled,
              conflict: c.conflict.clone() })
  }
}
impl CorrelativeRow {
  fn into_domain(self) -> Result<Correlative, CorrelativeError> {
    let batch_id = match self.batch_id {
      Some(s) => {
        Some(Uuid::parse_str(&s).map_err(|e| CorrelativeError::Storage(format!("batch_id inválido: {}", e)))?)
      }
      None => None,
    };
    let metadata = match self.metadata {
      Some(s) => Some(serde_json::from_str::<OrderMetadata>(&s)?),
      None => None,
    };
    Ok(Correlative { value: self.value,
                     state: self.state.parse::<CorrelativeState>()?,
                     origin: self.origin.parse::<Origin>()?,
                     batch_id,
                     reserved_at: from_ts(self.reserved_at_ts)?,
                     issued_at: from_ts(self.issued_at_ts)?,
                     voided_at: from_ts(self.voided_at_ts)?,
                     void_reason: self.void_reason,
                     metadata,
                     synced: self.synced,
                     reconciled: self.reconciled,
                     conflict: self.conflict })
  }
}
fn rows_into_domain(rows: Vec<CorrelativeRow>) -> Result<Vec<Correlative>, CorrelativeError> {
  rows.into_iter().map(CorrelativeRow::into_domain).collect()
}
impl DieselCorrelativeStore {
  /// Abre (o crea) la base en `database_url` y aplica las migraciones
  /// embebidas.
  pub fn open(database_url: &str) -> Result<Self, CorrelativeError> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder().max_size(4)
                              .connection_customizer(Box::new(SqlitePragmas))
                              .build(manager)
                              .map_err(|e| CorrelativeError::Storage(format!("pool: {}", e)))?;
    let store = DieselCorrelativeStore { pool: Arc::new(pool) };
    let mut conn = store.conn()?;
    let applied = conn.run_pending_migrations(MIGRATIONS)
                      .map_err(|e| CorrelativeError::Storage(format!("migraciones: {}", e)))?;
    if !applied.is_empty() {
      info!("cache local {}: {} migraciones aplicadas", database_url, applied.len());
    }
    Ok(store)
  }
  fn conn(&self) -> Result<DbConn, CorrelativeError> {
    self.pool.get().map_err(|e| CorrelativeError::Storage(format!("pool: {}", e)))
  }
  /// Carga la fila, aplica `f` sobre el modelo de dominio y la reescribe,
  /// todo bajo el lock de escritura.
  fn update_row<F>(&self, value: &str, f: F) -> Result<Correlative, CorrelativeError>
    where F: FnOnce(&mut Correlative) -> Result<(), CorrelativeError>
  {
    let value = value.trim();
    let mut conn = self.conn()?;
    let updated = conn.immediate_transaction::<_, TxError, _>(|conn| {
                        let row = dsl::correlativos.filter(dsl::value.eq(value))
                                                   .first::<CorrelativeRow>(conn)
                                                   .optional()?
                                                   .ok_or_else(|| CorrelativeError::NotFound(value.to_string()))?;
                        let seq = row.seq;
                        let mut c = row.into_domain()?;
                        f(&mut c)?;
                        let fields = CorrelativeFields::from_domain(&c)?;
                        diesel::update(dsl::correlativos.filter(dsl::seq.eq(seq))).set(&fields)
                                                                                 .execute(conn)?;
                        Ok(c)
                      })?;
    Ok(updated)
  }
}
impl CorrelativeStore for DieselCorrelativeStore {
  fn count_available(&self) -> Result<usize, CorrelativeError> {
    let mut conn = self.conn()?;
    let n = dsl::correlativos.filter(dsl::state.eq(CorrelativeState::Reserved.as_str()))
                             .count()
                             .get_result::<i64>(&mut conn)
                             .map_err(db_err)?;
    usize::try_from(n).map_err(|_| CorrelativeError::Storage(format!("conteo inválido: {}", n)))
  }
  fn peek_next(&self) -> Result<Option<Correlative>, CorrelativeError> {
    let mut conn = self.conn()?;
    let row = dsl::correlativos.filter(dsl::state.eq(CorrelativeState::Reserved.as_str()))
                               .order(dsl::seq.asc())
                               .first::<CorrelativeRow>(&mut conn)
                               .optional()
                               .map_err(db_err)?;
    row.map(CorrelativeRow::into_domain).transpose()
  }
  fn reserve_many(&self, values: &[String], origin: Origin) -> Result<usize, CorrelativeError> {
    let batch_id = Uuid::new_v4();
    let mut batch = Vec::with_capacity(values.len());
    let mut seen = HashSet::with_capacity(values.len());
    for v in values {
      let c = Correlative::reserved(v, origin, Some(batch_id))?;
      if !seen.insert(c.value.clone()) {
        return Err(CorrelativeError::DuplicateValue(c.value));
      }
      batch.push(CorrelativeFields::from_domain(&c)?);
    }
    if batch.is_empty() {
      return Ok(0);
    }
    let mut conn = self.conn()?;
    let inserted = conn.immediate_transaction::<_, TxError, _>(|conn| {
                         let wanted: Vec<&str> = batch.iter().map(|f| f.value.as_str()).collect();
                         let existing = dsl::correlativos.filter(dsl::value.eq_any(wanted))
                                                         .select(dsl::value)
                                                         .first::<String>(conn)
                                                         .optional()?;
                         if let Some(dup) = existing {
                           return Err(CorrelativeError::DuplicateValue(dup).into());
                         }
                         let mut n = 0usize;
                         for f in &batch {
                           n += diesel::insert_into(correlativos::table).values(f).execute(conn)?;
                         }
                         Ok(n)
                       })
                       .map_err(|e| match e {
                         TxError::Db(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info)) => {
                           CorrelativeError::DuplicateValue(info.message().to_string())
                         }
                         other => other.into(),
                       })?;
    debug!("bloque {} reservado: {} correlativos ({})", batch_id, inserted, origin);
    Ok(inserted)
  }
  fn mark_issued(&self, value: &str, metadata: &OrderMetadata) -> Result<Correlative, CorrelativeError> {
    self.update_row(value, |c| c.issue(metadata.clone()))
  }
  fn mark_void(&self, value: &str, reason: &str) -> Result<Correlative, CorrelativeError> {
    if reason.trim().is_empty() {
      return Err(CorrelativeError::EmptyReason);
    }
    self.update_row(value, |c| c.void(reason))
  }
  fn insert_manual(&self, value: &str, metadata: &OrderMetadata) -> Result<Correlative, CorrelativeError> {
    let c = Correlative::manual(value, metadata.clone())?;
    let fields = CorrelativeFields::from_domain(&c)?;
    let mut conn = self.conn()?;
    conn.immediate_transaction::<_, TxError, _>(|conn| {
          let exists = dsl::correlativos.filter(dsl::value.eq(&fields.value))
                                        .select(dsl::seq)
                                        .first::<i64>(conn)
                                        .optional()?;
          if exists.is_some() {
            return Err(CorrelativeError::DuplicateValue(fields.value.clone()).into());
          }
          diesel::insert_into(correlativos::table).values(&fields).execute(conn)?;
          Ok(())
        })?;
    Ok(c)
  }
  fn get(&self, value: &str) -> Result<Option<Correlative>, CorrelativeError> {
    let mut conn = self.conn()?;
    let row = dsl::correlativos.filter(dsl::value.eq(value.trim()))
                               .first::<CorrelativeRow>(&mut conn)
                               .optional()
                               .map_err(db_err)?;
    row.map(CorrelativeRow::into_domain).transpose()
  }
  fn list_by_state(&self, state: CorrelativeState) -> Result<Vec<Correlative>, CorrelativeError> {
    let mut conn = self.conn()?;
    let rows = dsl::correlativos.filter(dsl::state.eq(state.as_str()))
                                .order(dsl::seq.asc())
                                .load::<CorrelativeRow>(&mut conn)
                                .map_err(db_err)?;
    rows_into_domain(rows)
  }
  fn list_voided(&self) -> Result<Vec<Correlative>, CorrelativeError> {
    let mut conn = self.conn()?;
    let rows = dsl::correlativos.filter(dsl::state.eq(CorrelativeState::Void.as_str()))
                                .order((dsl::voided_at_ts.desc(), dsl::seq.desc()))
                                .load::<CorrelativeRow>(&mut conn)
                                .map_err(db_err)?;
    rows_into_domain(rows)
  }
  fn list_unsynced(&self) -> Result<Vec<Correlative>, CorrelativeError> {
    let mut conn = self.conn()?;
    let rows = dsl::correlativos.filter(dsl::synced.eq(false))
                                .order(dsl::seq.asc())
                                .load::<CorrelativeRow>(&mut conn)
                                .map_err(db_err)?;
    rows_into_domain(rows)
  }
  fn mark_synced(&self, value: &str, state: CorrelativeState) -> Result<bool, CorrelativeError> {
    let value = value.trim();
    let mut conn = self.conn()?;
    let marked = conn.immediate_transaction::<_, TxError, _>(|conn| {
                       let current = dsl::correlativos.filter(dsl::value.eq(value))
                                                      .select(dsl::state)
                                                      .first::<String>(conn)
                                                      .optional()?
                                                      .ok_or_else(|| CorrelativeError::NotFound(value.to_string()))?;
                       if current != state.as_str() {
                         return Ok(false);
                       }
                       diesel::update(dsl::correlativos.filter(dsl::value.eq(value))).set(dsl::synced.eq(true))
                                                                                     .execute(conn)?;
                       Ok(true)
                     })?;
    Ok(marked)
  }
  fn mark_reconciled(&self, value: &str) -> Result<(), CorrelativeError> {
    let mut conn = self.conn()?;
    let n = diesel::update(dsl::correlativos.filter(dsl::value.eq(value.trim()))).set(dsl::reconciled.eq(true))
                                                                                .execute(&mut conn)
                                                                                .map_err(db_err)?;
    if n == 0 {
      return Err(CorrelativeError::NotFound(value.trim().to_string()));
    }
    Ok(())
  }
  fn record_conflict(&self, value: &str, detail: &str) -> Result<Correlative, CorrelativeError> {
    self.update_row(value, |c| {
          c.record_conflict(detail);
          Ok(())
        })
  }
  fn list_conflicts(&self) -> Result<Vec<Correlative>, CorrelativeError> {
    let mut conn = self.conn()?;
    let rows = dsl::correlativos.filter(dsl::conflict.is_not_null())
                                .order(dsl::seq.asc())
                                .load::<CorrelativeRow>(&mut conn)
                                .map_err(db_err)?;
    rows_into_domain(rows)
  }
}
/// Abre el cache local según el entorno (`.env` incluido):
/// `CORRELATIVOS_DB_URL`, luego `DATABASE_URL`, y por defecto el archivo
/// `correlativos.db` en el directorio de trabajo.
pub fn new_from_env() -> Result<DieselCorrelativeStore, CorrelativeError> {
  dotenvy::dotenv().ok();
  let url = std::env::var("CORRELATIVOS_DB_URL").or_else(|_| std::env::var("DATABASE_URL"))
                                                .unwrap_or_else(|_| "correlativos.db".into());
  let l = url.to_lowercase();
  if l.starts_with("postgres") || l.starts_with("mysql") {
    return Err(CorrelativeError::Storage(format!("el cache local requiere SQLite; URL no soportada: {}", url)));
  }
  DieselCorrelativeStore::open(&url)
}
