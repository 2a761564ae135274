// Archivo: stubs.rs
// Propósito: implementaciones en memoria del central y de la impresora para
// pruebas y demos locales. No son durables.
use crate::print::PrintBridge;
use authority_client::{AuthorityClient, AuthorityError};
use correlativo_domain::{Correlative, OrderMetadata};
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Central simulado que entrega valores `{prefix}{n}` con `n` rellenado a
/// `width` dígitos, empezando en 1.
///
/// Cada llamada a `fetch_block` consume valores nuevos, igual que el central
/// real: ningún valor se entrega dos veces aunque varios puestos compartan
/// la misma instancia.
pub struct InMemoryAuthority {
    prefix: String,
    width: usize,
    next: Mutex<u64>,
    limit: Option<u64>,
    reachable: AtomicBool,
    rejection: Mutex<Option<String>>,
    handed_out: DashSet<String>,
    issued: DashMap<String, OrderMetadata>,
    voided: DashMap<String, String>,
    manual: DashMap<String, OrderMetadata>,
    fetch_calls: AtomicUsize,
}

impl InMemoryAuthority {
    pub fn new(prefix: &str, width: usize) -> Self {
        Self { prefix: prefix.to_string(),
               width,
               next: Mutex::new(1),
               limit: None,
               reachable: AtomicBool::new(true),
               rejection: Mutex::new(None),
               handed_out: DashSet::new(),
               issued: DashMap::new(),
               voided: DashMap::new(),
               manual: DashMap::new(),
               fetch_calls: AtomicUsize::new(0) }
    }

    /// Empieza la secuencia en `first` en lugar de 1.
    pub fn starting_at(self, first: u64) -> Self {
        *self.next.lock().unwrap_or_else(|e| e.into_inner()) = first;
        self
    }

    /// Talonario finito: el último número que puede entregar es `last`.
    pub fn with_limit(mut self, last: u64) -> Self {
        self.limit = Some(last);
        self
    }

    /// Simula la caída o el regreso de la red.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Hace que `fetch_block` responda con un rechazo del central.
    pub fn reject_with(&self, reason: Option<&str>) {
        *self.rejection.lock().unwrap_or_else(|e| e.into_inner()) = reason.map(str::to_string);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn handed_out_count(&self) -> usize {
        self.handed_out.len()
    }

    pub fn was_reported_issued(&self, value: &str) -> bool {
        self.issued.contains_key(value)
    }

    pub fn reported_void_reason(&self, value: &str) -> Option<String> {
        self.voided.get(value).map(|r| r.value().clone())
    }

    pub fn was_reported_manual(&self, value: &str) -> bool {
        self.manual.contains_key(value)
    }

    fn format(&self, n: u64) -> String {
        format!("{}{:0width$}", self.prefix, n, width = self.width)
    }

    fn check_reachable(&self) -> Result<(), AuthorityError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AuthorityError::Unreachable("connection refused (simulado)".into()))
        }
    }
}

impl AuthorityClient for InMemoryAuthority {
    fn fetch_block(&self, requested_count: usize) -> Result<Vec<String>, AuthorityError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        if let Some(reason) = self.rejection.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return Err(AuthorityError::AuthorityRejected(reason));
        }
        let mut next = self.next.lock().unwrap_or_else(|e| e.into_inner());
        let mut block = Vec::with_capacity(requested_count);
        while block.len() < requested_count && self.limit.map(|last| *next <= last).unwrap_or(true) {
            let value = self.format(*next);
            self.handed_out.insert(value.clone());
            block.push(value);
            *next += 1;
        }
        Ok(block)
    }

    fn report_issued(&self, value: &str, metadata: &OrderMetadata) -> Result<(), AuthorityError> {
        self.check_reachable()?;
        self.issued.insert(value.to_string(), metadata.clone());
        Ok(())
    }

    fn report_void(&self, value: &str, reason: &str) -> Result<(), AuthorityError> {
        self.check_reachable()?;
        self.voided.insert(value.to_string(), reason.to_string());
        Ok(())
    }

    fn report_manual(&self, value: &str, metadata: &OrderMetadata) -> Result<(), AuthorityError> {
        self.check_reachable()?;
        if self.handed_out.contains(value) {
            return Err(AuthorityError::ReconciliationConflict { value: value.to_string(),
                                                                detail: "el valor ya fue entregado a otro puesto".into() });
        }
        if self.manual.insert(value.to_string(), metadata.clone()).is_some() {
            return Err(AuthorityError::ReconciliationConflict { value: value.to_string(),
                                                                detail: "el valor manual ya fue informado".into() });
        }
        Ok(())
    }
}

/// Impresora simulada que recuerda lo impreso y puede fallar a pedido.
#[derive(Default)]
pub struct RecordingPrintBridge {
    printed: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingPrintBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn printed(&self) -> Vec<String> {
        self.printed.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl PrintBridge for RecordingPrintBridge {
    fn print(&self, correlative: &Correlative) -> Result<bool, String> {
        if self.failing.load(Ordering::SeqCst) {
            return Err("impresora sin papel".into());
        }
        self.printed.lock().unwrap_or_else(|e| e.into_inner()).push(correlative.value.clone());
        Ok(true)
    }
}
