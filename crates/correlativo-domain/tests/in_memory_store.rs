use correlativo_domain::{CorrelativeError, CorrelativeState, CorrelativeStore, InMemoryCorrelativeStore, OrderMetadata,
                         Origin};
use std::sync::Arc;
use std::thread;

fn values(v: &[&str]) -> Vec<String> {
  v.iter().map(|s| s.to_string()).collect()
}

fn meta(op: &str) -> OrderMetadata {
  OrderMetadata { nro_op: Some(op.into()), molde: Some("BALDE".into()), ..Default::default() }
}

#[test]
fn reserve_and_consume_in_insertion_order() {
  let store = InMemoryCorrelativeStore::new();
  let n = store.reserve_many(&values(&["30003", "30001", "30002"]), Origin::Authority).unwrap();
  assert_eq!(n, 3);
  assert_eq!(store.count_available().unwrap(), 3);

  // peek no modifica
  assert_eq!(store.peek_next().unwrap().unwrap().value, "30003");
  assert_eq!(store.peek_next().unwrap().unwrap().value, "30003");

  let issued = store.mark_issued("30003", &meta("OP-1322")).unwrap();
  assert_eq!(issued.state, CorrelativeState::Issued);
  assert_eq!(issued.metadata.unwrap().nro_op.as_deref(), Some("OP-1322"));
  assert_eq!(store.count_available().unwrap(), 2);
  assert_eq!(store.peek_next().unwrap().unwrap().value, "30001");
}

#[test]
fn duplicate_in_batch_rejects_whole_batch() {
  let store = InMemoryCorrelativeStore::new();
  store.reserve_many(&values(&["A-1", "A-2"]), Origin::Authority).unwrap();

  let err = store.reserve_many(&values(&["A-3", "A-2", "A-4"]), Origin::Authority).unwrap_err();
  assert_eq!(err, CorrelativeError::DuplicateValue("A-2".into()));
  assert!(store.get("A-3").unwrap().is_none());
  assert_eq!(store.count_available().unwrap(), 2);

  let err = store.reserve_many(&values(&["B-1", "B-1"]), Origin::Authority).unwrap_err();
  assert_eq!(err, CorrelativeError::DuplicateValue("B-1".into()));
  assert!(store.get("B-1").unwrap().is_none());
}

#[test]
fn voided_value_stays_retired() {
  let store = InMemoryCorrelativeStore::new();
  store.reserve_many(&values(&["OT-100"]), Origin::Authority).unwrap();

  assert_eq!(store.mark_void("OT-100", "").unwrap_err(), CorrelativeError::EmptyReason);
  let v = store.mark_void("OT-100", "hoja destruida").unwrap();
  assert_eq!(v.state, CorrelativeState::Void);

  assert!(matches!(store.mark_issued("OT-100", &meta("OP-1")), Err(CorrelativeError::InvalidTransition { .. })));
  assert!(matches!(store.mark_void("OT-100", "de nuevo"), Err(CorrelativeError::InvalidTransition { .. })));
  assert_eq!(store.insert_manual("OT-100", &meta("OP-1")).unwrap_err(),
             CorrelativeError::DuplicateValue("OT-100".into()));
  assert_eq!(store.reserve_many(&values(&["OT-100"]), Origin::Authority).unwrap_err(),
             CorrelativeError::DuplicateValue("OT-100".into()));
  assert_eq!(store.count_available().unwrap(), 0);
}

#[test]
fn unknown_value_is_not_found() {
  let store = InMemoryCorrelativeStore::new();
  assert_eq!(store.mark_issued("X", &meta("OP")).unwrap_err(), CorrelativeError::NotFound("X".into()));
  assert_eq!(store.mark_void("X", "motivo").unwrap_err(), CorrelativeError::NotFound("X".into()));
}

#[test]
fn manual_rows_are_issued_and_pending_sync() {
  let store = InMemoryCorrelativeStore::new();
  let c = store.insert_manual("OT-9001", &meta("OP-9")).unwrap();
  assert_eq!(c.state, CorrelativeState::Issued);
  assert_eq!(c.origin, Origin::Manual);
  assert_eq!(store.count_available().unwrap(), 0);

  let pending = store.list_unsynced().unwrap();
  assert_eq!(pending.len(), 1);
  // un informe viejo no tapa un cambio de estado posterior
  assert!(!store.mark_synced("OT-9001", CorrelativeState::Void).unwrap());
  assert!(store.mark_synced("OT-9001", CorrelativeState::Issued).unwrap());
  assert!(store.list_unsynced().unwrap().is_empty());
  assert!(!store.get("OT-9001").unwrap().unwrap().reconciled);
  store.mark_reconciled("OT-9001").unwrap();
  assert!(store.get("OT-9001").unwrap().unwrap().reconciled);

  store.record_conflict("OT-9001", "ya emitido por el central").unwrap();
  let conflicts = store.list_conflicts().unwrap();
  assert_eq!(conflicts[0].conflict.as_deref(), Some("ya emitido por el central"));
}

#[test]
fn list_voided_most_recent_first() {
  let store = InMemoryCorrelativeStore::new();
  store.reserve_many(&values(&["1", "2", "3"]), Origin::Authority).unwrap();
  store.mark_void("1", "Motivo 1").unwrap();
  std::thread::sleep(std::time::Duration::from_millis(5));
  store.mark_void("2", "Motivo 2").unwrap();
  let voided = store.list_voided().unwrap();
  assert_eq!(voided.len(), 2);
  assert_eq!(voided[0].value, "2");
  assert_eq!(voided[1].value, "1");
}

#[test]
fn concurrent_issue_of_same_value_succeeds_once() {
  let store = Arc::new(InMemoryCorrelativeStore::new());
  store.reserve_many(&values(&["OT-1"]), Origin::Authority).unwrap();
  let handles: Vec<_> = (0..8).map(|i| {
                                 let s = store.clone();
                                 thread::spawn(move || s.mark_issued("OT-1", &meta(&format!("OP-{}", i))).is_ok())
                               })
                               .collect();
  let ok = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
  assert_eq!(ok, 1);
}
