use correlativo_domain::{CorrelativeError, CorrelativeState, CorrelativeStore, OrderMetadata, Origin};
use correlativo_persistence::DieselCorrelativeStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use uuid::Uuid;

struct TempDb {
  path: PathBuf,
}

impl TempDb {
  fn new() -> Self {
    Self { path: std::env::temp_dir().join(format!("correlativos_test_{}.db", Uuid::new_v4())) }
  }

  fn url(&self) -> String {
    self.path.to_str().unwrap().to_string()
  }

  fn open(&self) -> DieselCorrelativeStore {
    DieselCorrelativeStore::open(&self.url()).expect("open store")
  }
}

impl Drop for TempDb {
  fn drop(&mut self) {
    let _ = std::fs::remove_file(&self.path);
    let _ = std::fs::remove_file(self.path.with_extension("db-wal"));
    let _ = std::fs::remove_file(self.path.with_extension("db-shm"));
  }
}

fn values(v: &[&str]) -> Vec<String> {
  v.iter().map(|s| s.to_string()).collect()
}

fn meta(op: &str) -> OrderMetadata {
  OrderMetadata { nro_op: Some(op.into()),
                  molde: Some("BALDE REAL".into()),
                  maquina: Some("HT-320A".into()),
                  turno: Some("Diurno".into()),
                  ..Default::default() }
}

#[test]
fn lifecycle_against_sqlite() {
  let db = TempDb::new();
  let store = db.open();

  assert_eq!(store.count_available().unwrap(), 0);
  assert!(store.peek_next().unwrap().is_none());

  assert_eq!(store.reserve_many(&values(&["OT-001", "OT-002", "OT-003"]), Origin::Authority).unwrap(), 3);
  let next = store.peek_next().unwrap().unwrap();
  assert_eq!(next.value, "OT-001");
  assert_eq!(next.state, CorrelativeState::Reserved);
  assert!(next.batch_id.is_some());
  assert_eq!(store.count_available().unwrap(), 3);

  let issued = store.mark_issued("OT-001", &meta("OP1353")).unwrap();
  assert_eq!(issued.state, CorrelativeState::Issued);
  assert!(issued.issued_at.is_some());
  assert_eq!(store.count_available().unwrap(), 2);

  let reread = store.get("OT-001").unwrap().unwrap();
  assert_eq!(reread.metadata.unwrap().maquina.as_deref(), Some("HT-320A"));
  assert!(!reread.synced);

  assert_eq!(store.mark_issued("OT-001", &meta("OP1353")).unwrap_err(),
             CorrelativeError::InvalidTransition { value: "OT-001".into(),
                                                   from: CorrelativeState::Issued,
                                                   to: CorrelativeState::Issued });
  assert_eq!(store.mark_issued("OT-999", &meta("OP1")).unwrap_err(), CorrelativeError::NotFound("OT-999".into()));

  assert_eq!(store.mark_void("OT-002", "  ").unwrap_err(), CorrelativeError::EmptyReason);
  let voided = store.mark_void("OT-002", "Hoja destruida por agua").unwrap();
  assert_eq!(voided.void_reason.as_deref(), Some("Hoja destruida por agua"));
  assert_eq!(store.peek_next().unwrap().unwrap().value, "OT-003");
  assert_eq!(store.count_available().unwrap(), 1);
}

#[test]
fn batch_with_existing_value_is_rejected_atomically() {
  let db = TempDb::new();
  let store = db.open();
  store.reserve_many(&values(&["30001", "30002"]), Origin::Authority).unwrap();
  store.mark_void("30002", "rota").unwrap();

  let err = store.reserve_many(&values(&["30003", "30002"]), Origin::Authority).unwrap_err();
  assert_eq!(err, CorrelativeError::DuplicateValue("30002".into()));
  assert!(store.get("30003").unwrap().is_none());
  assert_eq!(store.count_available().unwrap(), 1);

  assert_eq!(store.insert_manual("30001", &meta("OP")).unwrap_err(), CorrelativeError::DuplicateValue("30001".into()));
}

#[test]
fn committed_state_survives_reopen() {
  let db = TempDb::new();
  {
    let store = db.open();
    store.reserve_many(&values(&["A1", "A2", "A3"]), Origin::Authority).unwrap();
    store.mark_issued("A1", &meta("OP-1")).unwrap();
    store.mark_void("A2", "sheet destroyed before printing").unwrap();
    store.insert_manual("M-77", &meta("OP-2")).unwrap();
  }
  let store = db.open();
  assert_eq!(store.count_available().unwrap(), 1);
  assert_eq!(store.peek_next().unwrap().unwrap().value, "A3");
  assert_eq!(store.get("A1").unwrap().unwrap().state, CorrelativeState::Issued);
  assert_eq!(store.get("A2").unwrap().unwrap().state, CorrelativeState::Void);
  let manual = store.get("M-77").unwrap().unwrap();
  assert_eq!(manual.origin, Origin::Manual);
  assert_eq!(manual.state, CorrelativeState::Issued);

  let unsynced: Vec<String> = store.list_unsynced().unwrap().into_iter().map(|c| c.value).collect();
  assert_eq!(unsynced, vec!["A1", "A2", "M-77"]);
}

#[test]
fn sync_flags_and_conflicts() {
  let db = TempDb::new();
  let store = db.open();
  store.insert_manual("9001", &meta("OP-9")).unwrap();
  store.insert_manual("9002", &meta("OP-9")).unwrap();

  assert!(!store.mark_synced("9001", CorrelativeState::Void).unwrap());
  assert!(store.mark_synced("9001", CorrelativeState::Issued).unwrap());
  assert!(!store.get("9002").unwrap().unwrap().reconciled);
  store.mark_reconciled("9001").unwrap();
  assert!(store.get("9001").unwrap().unwrap().reconciled);
  assert_eq!(store.mark_reconciled("nope").unwrap_err(), CorrelativeError::NotFound("nope".into()));
  let c = store.record_conflict("9002", "el central ya emitió 9002").unwrap();
  assert!(c.synced);
  assert!(c.reconciled);
  assert!(store.list_unsynced().unwrap().is_empty());

  let conflicts = store.list_conflicts().unwrap();
  assert_eq!(conflicts.len(), 1);
  assert_eq!(conflicts[0].value, "9002");
  assert_eq!(store.mark_synced("nope", CorrelativeState::Issued).unwrap_err(),
             CorrelativeError::NotFound("nope".into()));
}

#[test]
fn voided_listing_most_recent_first() {
  let db = TempDb::new();
  let store = db.open();
  store.reserve_many(&values(&["1", "2", "3"]), Origin::Authority).unwrap();
  store.mark_void("1", "Motivo 1").unwrap();
  thread::sleep(std::time::Duration::from_millis(5));
  store.mark_void("2", "Motivo 2").unwrap();
  let voided: Vec<String> = store.list_voided().unwrap().into_iter().map(|c| c.value).collect();
  assert_eq!(voided, vec!["2", "1"]);
}

#[test]
fn two_stores_on_same_file_never_issue_twice() {
  let db = TempDb::new();
  let a = Arc::new(db.open());
  let b = Arc::new(db.open());
  a.reserve_many(&values(&["OT-1", "OT-2"]), Origin::Authority).unwrap();

  let handles: Vec<_> = (0..8).map(|i| {
                                 let s = if i % 2 == 0 { a.clone() } else { b.clone() };
                                 thread::spawn(move || {
                                   let next = s.peek_next().unwrap();
                                   match next {
                                     Some(c) => s.mark_issued(&c.value, &meta(&format!("OP-{}", i))).ok().map(|c| c.value),
                                     None => None,
                                   }
                                 })
                               })
                               .collect();
  let mut issued: Vec<String> = handles.into_iter().filter_map(|h| h.join().unwrap()).collect();
  issued.sort();
  let before = issued.len();
  issued.dedup();
  assert_eq!(before, issued.len(), "un correlativo fue emitido dos veces");
  assert!(issued.len() <= 2);
  assert_eq!(a.count_available().unwrap() + issued.len(), 2);
}
