// Archivo: correlative_store.rs
// Propósito: contrato del cache local y su implementación en memoria.
use crate::{Correlative, CorrelativeError, CorrelativeState, OrderMetadata, Origin};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Contrato del cache local de correlativos.
///
/// Cada operación que modifica es atómica: o se aplica completa o no deja
/// rastro. Las implementaciones deben serializar internamente las secuencias
/// leer-modificar-escribir, de modo que dos llamadas concurrentes a
/// `mark_issued` sobre el mismo valor no puedan tener éxito ambas.
pub trait CorrelativeStore: Send + Sync {
  /// Cantidad de filas `Reserved` ("disponibles").
  fn count_available(&self) -> Result<usize, CorrelativeError>;

  /// Fila `Reserved` más antigua (orden de inserción), sin modificarla.
  fn peek_next(&self) -> Result<Option<Correlative>, CorrelativeError>;

  /// Inserta un bloque de filas `Reserved`. Si algún valor ya existe (en
  /// cualquier estado) o se repite dentro del bloque, falla con
  /// `DuplicateValue` y no inserta nada.
  fn reserve_many(&self, values: &[String], origin: Origin) -> Result<usize, CorrelativeError>;

  /// `Reserved -> Issued`.
  fn mark_issued(&self, value: &str, metadata: &OrderMetadata) -> Result<Correlative, CorrelativeError>;

  /// `{Reserved, Issued} -> Void` con motivo no vacío.
  fn mark_void(&self, value: &str, reason: &str) -> Result<Correlative, CorrelativeError>;

  /// Crea directamente una fila `Issued` de origen `Manual`.
  fn insert_manual(&self, value: &str, metadata: &OrderMetadata) -> Result<Correlative, CorrelativeError>;

  /// Busca un correlativo por valor.
  fn get(&self, value: &str) -> Result<Option<Correlative>, CorrelativeError>;

  /// Filas en el estado dado, en orden de inserción.
  fn list_by_state(&self, state: CorrelativeState) -> Result<Vec<Correlative>, CorrelativeError>;

  /// Filas anuladas, la anulación más reciente primero.
  fn list_voided(&self) -> Result<Vec<Correlative>, CorrelativeError> {
    let mut rows = self.list_by_state(CorrelativeState::Void)?;
    rows.sort_by(|a, b| b.voided_at.cmp(&a.voided_at));
    Ok(rows)
  }

  /// Filas cuyo último cambio aún no fue informado al central.
  fn list_unsynced(&self) -> Result<Vec<Correlative>, CorrelativeError>;

  /// Marca la fila como informada al central, sólo si sigue en `state`.
  /// Devuelve `false` si la fila cambió de estado mientras se informaba:
  /// ese cambio queda pendiente.
  fn mark_synced(&self, value: &str, state: CorrelativeState) -> Result<bool, CorrelativeError>;

  /// Registra que el central aceptó el correlativo manual.
  fn mark_reconciled(&self, value: &str) -> Result<(), CorrelativeError>;

  /// Registra un conflicto de reconciliación para revisión manual.
  fn record_conflict(&self, value: &str, detail: &str) -> Result<Correlative, CorrelativeError>;

  /// Filas con conflicto de reconciliación pendiente de revisión.
  fn list_conflicts(&self) -> Result<Vec<Correlative>, CorrelativeError>;
}

/// Implementación en memoria para tests y desarrollo. No es durable.
///
/// Un único `Mutex` protege todo el mapa, así que cada operación es atómica
/// frente a las demás. `IndexMap` conserva el orden de inserción que usa
/// `peek_next`.
pub struct InMemoryCorrelativeStore {
  rows: Mutex<IndexMap<String, Correlative>>,
}

impl InMemoryCorrelativeStore {
  pub fn new() -> Self {
    Self { rows: Mutex::new(IndexMap::new()) }
  }

  fn lock(&self) -> Result<MutexGuard<'_, IndexMap<String, Correlative>>, CorrelativeError> {
    self.rows.lock().map_err(|e| CorrelativeError::Storage(format!("mutex poisoned: {:?}", e)))
  }

  fn update<F>(&self, value: &str, f: F) -> Result<Correlative, CorrelativeError>
    where F: FnOnce(&mut Correlative) -> Result<(), CorrelativeError>
  {
    let mut rows = self.lock()?;
    let row = rows.get_mut(value.trim()).ok_or_else(|| CorrelativeError::NotFound(value.trim().to_string()))?;
    // Se trabaja sobre una copia para no dejar la fila a medio modificar.
    let mut next = row.clone();
    f(&mut next)?;
    *row = next.clone();
    Ok(next)
  }
}

impl Default for InMemoryCorrelativeStore {
  fn default() -> Self {
    Self::new()
  }
}

impl CorrelativeStore for InMemoryCorrelativeStore {
  fn count_available(&self) -> Result<usize, CorrelativeError> {
    Ok(self.lock()?.values().filter(|c| c.is_available()).count())
  }

  fn peek_next(&self) -> Result<Option<Correlative>, CorrelativeError> {
    Ok(self.lock()?.values().find(|c| c.is_available()).cloned())
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
      batch.push(c);
    }
    let mut rows = self.lock()?;
    if let Some(dup) = batch.iter().find(|c| rows.contains_key(&c.value)) {
      return Err(CorrelativeError::DuplicateValue(dup.value.clone()));
    }
    let inserted = batch.len();
    for c in batch {
      rows.insert(c.value.clone(), c);
    }
    Ok(inserted)
  }

  fn mark_issued(&self, value: &str, metadata: &OrderMetadata) -> Result<Correlative, CorrelativeError> {
    self.update(value, |c| c.issue(metadata.clone()))
  }

  fn mark_void(&self, value: &str, reason: &str) -> Result<Correlative, CorrelativeError> {
    if reason.trim().is_empty() {
      return Err(CorrelativeError::EmptyReason);
    }
    self.update(value, |c| c.void(reason))
  }

  fn insert_manual(&self, value: &str, metadata: &OrderMetadata) -> Result<Correlative, CorrelativeError> {
    let c = Correlative::manual(value, metadata.clone())?;
    let mut rows = self.lock()?;
    if rows.contains_key(&c.value) {
      return Err(CorrelativeError::DuplicateValue(c.value));
    }
    rows.insert(c.value.clone(), c.clone());
    Ok(c)
  }

  fn get(&self, value: &str) -> Result<Option<Correlative>, CorrelativeError> {
    Ok(self.lock()?.get(value.trim()).cloned())
  }

  fn list_by_state(&self, state: CorrelativeState) -> Result<Vec<Correlative>, CorrelativeError> {
    Ok(self.lock()?.values().filter(|c| c.state == state).cloned().collect())
  }

  fn list_unsynced(&self) -> Result<Vec<Correlative>, CorrelativeError> {
    Ok(self.lock()?.values().filter(|c| !c.synced).cloned().collect())
  }

  fn mark_synced(&self, value: &str, state: CorrelativeState) -> Result<bool, CorrelativeError> {
    let mut marked = false;
    self.update(value, |c| {
          if c.state == state {
            c.synced = true;
            marked = true;
          }
          Ok(())
        })?;
    Ok(marked)
  }

  fn mark_reconciled(&self, value: &str) -> Result<(), CorrelativeError> {
    self.update(value, |c| {
          c.reconciled = true;
          Ok(())
        })
        .map(|_| ())
  }

  fn record_conflict(&self, value: &str, detail: &str) -> Result<Correlative, CorrelativeError> {
    self.update(value, |c| {
          c.record_conflict(detail);
          Ok(())
        })
  }

  fn list_conflicts(&self) -> Result<Vec<Correlative>, CorrelativeError> {
    Ok(self.lock()?.values().filter(|c| c.conflict.is_some()).cloned().collect())
  }
}
