// Archivo: engine.rs
// Propósito: implementar el `AllocationEngine`, único punto de entrada para
// pedir, emitir y anular correlativos.
//
// Nota: las llamadas al central nunca se hacen con un lock tomado. Primero
// se pide el bloque (sin lock) y después se inserta en el cache con una
// transacción atómica del store. Los informes de emisión y anulación y la
// reposición anticipada corren en un hilo propio del motor: `issue` y
// `void` vuelven apenas el store confirma el commit.
use crate::config::EngineConfig;
use crate::errors::{AllocationError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::policy::Mode;
use authority_client::{AuthorityClient, AuthorityError};
use chrono::{DateTime, Utc};
use correlativo_domain::{normalize_value, Correlative, CorrelativeState, CorrelativeStore, OrderMetadata, Origin};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Resultado de `get_next`: el próximo valor (si hay) y el estado del cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextCorrelative {
    /// `None` en modo sin conexión: el operador debe digitar el valor.
    pub value: Option<String>,
    pub available_count: usize,
    pub mode: Mode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub available_count: usize,
    pub mode: Mode,
    pub last_authority_contact: Option<DateTime<Utc>>,
    pub next: Option<String>,
}

/// Resumen de un barrido de `sync_pending`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
    pub conflicts: usize,
}

/// Quién pidió el bloque. Sólo las reposiciones pedidas por el operador o
/// por un cache vacío pueden llevar al modo sin conexión.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchTrigger {
    Allocation,
    Replenish,
    TopUp,
}

/// Trabajo encolado para el hilo de informes.
enum Job {
    Report(String),
    TopUp,
    Flush(oneshot::Sender<()>),
}

enum PushOutcome {
    Synced,
    Conflict,
    Deferred(AuthorityError),
}

struct EngineState {
    mode: Mode,
    last_authority_contact: Option<DateTime<Utc>>,
}

/// Estado compartido entre el motor y su hilo de informes.
struct EngineCore<S, A> {
    store: Arc<S>,
    authority: Arc<A>,
    config: EngineConfig,
    state: Mutex<EngineState>,
    events: EventBus,
    /// El hilo y `sync_pending` nunca suben la misma fila a la vez.
    report_lock: Mutex<()>,
}

/// Motor de asignación de correlativos.
///
/// El modo (`Online`/`Offline`) es estado de cada instancia, de modo que
/// varios motores pueden convivir en un mismo proceso (tests, varios
/// talonarios) sin interferir. Cada motor lleva un hilo que informa al
/// central en segundo plano; al soltar el motor se vacía la cola y se
/// espera al hilo.
pub struct AllocationEngine<S, A>
    where S: CorrelativeStore + 'static,
          A: AuthorityClient + 'static
{
    core: Arc<EngineCore<S, A>>,
    jobs: Option<mpsc::UnboundedSender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl<S, A> AllocationEngine<S, A>
    where S: CorrelativeStore + 'static,
          A: AuthorityClient + 'static
{
    pub fn new(store: Arc<S>, authority: Arc<A>, config: EngineConfig) -> Self {
        let core = Arc::new(EngineCore { store,
                                         authority,
                                         config,
                                         state: Mutex::new(EngineState { mode: Mode::Online,
                                                                         last_authority_contact: None }),
                                         events: EventBus::default(),
                                         report_lock: Mutex::new(()) });
        let (tx, rx) = mpsc::unbounded_channel();
        let worker_core = Arc::clone(&core);
        let spawned = std::thread::Builder::new().name("correlativos-informes".into())
                                                 .spawn(move || run_worker(worker_core, rx));
        match spawned {
            Ok(handle) => Self { core,
                                 jobs: Some(tx),
                                 worker: Some(handle) },
            Err(e) => {
                // Sin hilo los trabajos corren en el llamador.
                warn!("no se pudo iniciar el hilo de informes: {}", e);
                Self { core,
                       jobs: None,
                       worker: None }
            }
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.core.store
    }

    /// Suscripción a los eventos de este motor.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.core.events.subscribe()
    }

    pub fn mode(&self) -> Result<Mode> {
        Ok(self.core.state()?.mode)
    }

    /// Próximo correlativo disponible, sin consumirlo.
    ///
    /// Con el cache vacío intenta una reposición del tamaño configurado. Si
    /// el central no responde el motor pasa a modo sin conexión y devuelve
    /// `value: None`. En modo sin conexión no se contacta al central: sólo
    /// `replenish`/`reconnect` vuelven al modo normal.
    pub fn get_next(&self) -> Result<NextCorrelative> {
        let core = &self.core;
        if self.mode()? == Mode::Offline {
            return Ok(NextCorrelative { value: None,
                                        available_count: core.store.count_available()?,
                                        mode: Mode::Offline });
        }
        if let Some(next) = core.store.peek_next()? {
            return Ok(NextCorrelative { value: Some(next.value),
                                        available_count: core.store.count_available()?,
                                        mode: Mode::Online });
        }
        match core.fetch_and_reserve(core.config.replenish_target, FetchTrigger::Allocation) {
            Ok(_) => {}
            // Sin conexión: el modo ya quedó decidido por la política.
            Err(AllocationError::Unreachable(_)) => {}
            Err(e) => return Err(e),
        }
        let mode = self.mode()?;
        let value = match mode {
            Mode::Online => core.store.peek_next()?.map(|c| c.value),
            Mode::Offline => None,
        };
        Ok(NextCorrelative { value, available_count: core.store.count_available()?, mode })
    }

    /// Emite un correlativo con los datos de la orden.
    ///
    /// - Valor reservado en el cache: `Reserved -> Issued`.
    /// - Valor desconocido en modo sin conexión: alta manual (`Origin::Manual`).
    /// - Valor ya emitido: `AlreadyIssued` (doble envío desde la interfaz).
    ///
    /// Devuelve la fila tal como quedó en el commit (`synced: false`). El
    /// informe al central se encola y nunca hace fallar la emisión.
    pub fn issue(&self, value: &str, metadata: &OrderMetadata) -> Result<Correlative> {
        metadata.validate()?;
        let value = normalize_value(value)?;
        let mode = self.mode()?;
        let store = &self.core.store;
        let issued = match store.get(&value)? {
            Some(existing) => match existing.state {
                CorrelativeState::Reserved => store.mark_issued(&value, metadata)?,
                CorrelativeState::Issued => return Err(AllocationError::AlreadyIssued(value)),
                CorrelativeState::Void => {
                    return Err(AllocationError::InvalidTransition { value,
                                                                    from: CorrelativeState::Void,
                                                                    to: CorrelativeState::Issued })
                }
            },
            None if mode == Mode::Offline => store.insert_manual(&value, metadata)?,
            None => return Err(AllocationError::NotFound(value)),
        };
        info!("correlativo {} emitido ({})", issued.value, issued.origin);
        self.core.events.publish(EngineEvent::Issued { value: issued.value.clone(), origin: issued.origin });
        self.dispatch(Job::Report(issued.value.clone()));
        if mode == Mode::Online && self.core.config.low_water_mark.is_some() {
            self.dispatch(Job::TopUp);
        }
        Ok(issued)
    }

    /// Anula un correlativo `Reserved` o `Issued` con motivo obligatorio.
    pub fn void(&self, value: &str, reason: &str) -> Result<Correlative> {
        if reason.trim().is_empty() {
            return Err(AllocationError::EmptyReason);
        }
        let value = normalize_value(value)?;
        let voided = self.core.store.mark_void(&value, reason)?;
        info!("correlativo {} anulado: {}", voided.value, voided.void_reason.as_deref().unwrap_or_default());
        self.core.events.publish(EngineEvent::Voided { value: voided.value.clone(),
                                                       reason: voided.void_reason.clone().unwrap_or_default() });
        self.dispatch(Job::Report(voided.value.clone()));
        Ok(voided)
    }

    /// Anula el próximo disponible (hoja destruida antes de imprimir).
    pub fn void_next(&self, reason: &str) -> Result<Correlative> {
        if reason.trim().is_empty() {
            return Err(AllocationError::EmptyReason);
        }
        let next = self.core
                       .store
                       .peek_next()?
                       .ok_or_else(|| AllocationError::NotFound("no hay correlativos disponibles".into()))?;
        self.void(&next.value, reason)
    }

    /// Repone el cache hasta `target_count` disponibles. Si ya hay al menos
    /// esa cantidad no contacta al central y devuelve 0.
    pub fn replenish(&self, target_count: usize) -> Result<usize> {
        let available = self.core.store.count_available()?;
        if available >= target_count {
            debug!("reposición omitida: {} disponibles, objetivo {}", available, target_count);
            return Ok(0);
        }
        self.core.fetch_and_reserve(target_count - available, FetchTrigger::Replenish)
    }

    /// Reconexión pedida por el operador. A diferencia de `replenish`
    /// siempre contacta al central, aunque el cache esté lleno.
    pub fn reconnect(&self) -> Result<usize> {
        let available = self.core.store.count_available()?;
        let wanted = self.core.config.replenish_target.saturating_sub(available).max(1);
        self.core.fetch_and_reserve(wanted, FetchTrigger::Replenish)
    }

    pub fn status(&self) -> Result<EngineStatus> {
        let (mode, last_authority_contact) = {
            let st = self.core.state()?;
            (st.mode, st.last_authority_contact)
        };
        Ok(EngineStatus { available_count: self.core.store.count_available()?,
                          mode,
                          last_authority_contact,
                          next: self.core.store.peek_next()?.map(|c| c.value) })
    }

    /// Sube al central todo lo que quedó pendiente de informar.
    ///
    /// Se detiene en el primer `Unreachable`: el resto queda en la cola
    /// para el próximo barrido.
    pub fn sync_pending(&self) -> Result<SyncReport> {
        self.core.sync_pending()
    }

    /// Espera a que el hilo de informes termine todo lo encolado hasta
    /// ahora. Bloquea: no llamar desde un contexto async.
    pub fn flush_reports(&self) {
        let (done, wait) = oneshot::channel();
        self.dispatch(Job::Flush(done));
        let _ = wait.blocking_recv();
    }

    pub fn list_voided(&self) -> Result<Vec<Correlative>> {
        Ok(self.core.store.list_voided()?)
    }

    pub fn list_conflicts(&self) -> Result<Vec<Correlative>> {
        Ok(self.core.store.list_conflicts()?)
    }

    fn dispatch(&self, job: Job) {
        let job = match &self.jobs {
            Some(tx) => match tx.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };
        self.core.run(job);
    }
}

impl<S, A> Drop for AllocationEngine<S, A>
    where S: CorrelativeStore + 'static,
          A: AuthorityClient + 'static
{
    fn drop(&mut self) {
        // Cerrar el canal deja que el hilo vacíe la cola y termine.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("el hilo de informes terminó con pánico");
            }
        }
    }
}

fn run_worker<S, A>(core: Arc<EngineCore<S, A>>, mut jobs: mpsc::UnboundedReceiver<Job>)
    where S: CorrelativeStore,
          A: AuthorityClient
{
    while let Some(job) = jobs.blocking_recv() {
        core.run(job);
    }
    debug!("hilo de informes detenido");
}

impl<S, A> EngineCore<S, A>
    where S: CorrelativeStore,
          A: AuthorityClient
{
    fn run(&self, job: Job) {
        match job {
            Job::Report(value) => self.try_report(&value),
            Job::TopUp => self.top_up_if_low(),
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, EngineState>> {
        self.state
            .lock()
            .map_err(|e| AllocationError::Storage(format!("mutex poisoned: {:?}", e)))
    }

    fn report_guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.report_lock
            .lock()
            .map_err(|e| AllocationError::Storage(format!("mutex poisoned: {:?}", e)))
    }

    fn touch_contact(&self) -> Result<()> {
        self.state()?.last_authority_contact = Some(Utc::now());
        Ok(())
    }

    /// Cambia el modo y avisa. Devuelve el modo anterior.
    fn set_mode(&self, to: Mode) -> Result<Mode> {
        let from = {
            let mut st = self.state()?;
            std::mem::replace(&mut st.mode, to)
        };
        if from != to {
            match to {
                Mode::Offline => warn!("central inaccesible y cache vacío: modo sin conexión"),
                Mode::Online => info!("conexión con el central restablecida"),
            }
            self.events.publish(EngineEvent::ModeChanged { from, to });
        }
        Ok(from)
    }

    fn fetch_and_reserve(&self, count: usize, trigger: FetchTrigger) -> Result<usize> {
        debug!("pidiendo {} correlativos al central ({:?})", count, trigger);
        match self.authority.fetch_block(count) {
            Ok(values) if values.is_empty() => {
                self.touch_contact()?;
                Err(AllocationError::AuthorityRejected("el central no entregó correlativos".into()))
            }
            Ok(values) => {
                self.touch_contact()?;
                let inserted = self.store.reserve_many(&values, Origin::Authority)?;
                let available = self.store.count_available()?;
                info!("{} correlativos reservados, {} disponibles", inserted, available);
                self.events.publish(EngineEvent::Replenished { inserted, available });
                if self.set_mode(Mode::Online)? == Mode::Offline {
                    // Lo emitido a mano se sube apenas vuelve la conexión.
                    if let Err(e) = self.sync_pending() {
                        warn!("sincronización tras reconectar falló: {}", e);
                    }
                }
                Ok(inserted)
            }
            Err(e) if e.is_unreachable() => {
                warn!("no se pudo reponer el cache: {}", e);
                if trigger != FetchTrigger::TopUp {
                    let available = self.store.count_available()?;
                    // El regreso al modo normal sólo ocurre con una reposición
                    // exitosa; una falla nunca lo produce.
                    if self.config.policy.decide(available, Some(&e)) == Mode::Offline {
                        self.set_mode(Mode::Offline)?;
                    }
                }
                Err(e.into())
            }
            Err(e) => {
                warn!("el central rechazó la reposición: {}", e);
                self.touch_contact()?;
                Err(e.into())
            }
        }
    }

    fn top_up_if_low(&self) {
        let Some(mark) = self.config.low_water_mark else {
            return;
        };
        let available = match self.store.count_available() {
            Ok(n) => n,
            Err(e) => {
                warn!("no se pudo contar el cache: {}", e);
                return;
            }
        };
        if available > mark || available >= self.config.replenish_target {
            return;
        }
        if let Err(e) = self.fetch_and_reserve(self.config.replenish_target - available, FetchTrigger::TopUp) {
            warn!("reposición automática fallida ({} disponibles): {}", available, e);
        }
    }

    fn sync_pending(&self) -> Result<SyncReport> {
        let _guard = self.report_guard()?;
        let mut report = SyncReport::default();
        for row in self.store.list_unsynced()? {
            match self.push_row(&row)? {
                PushOutcome::Synced => report.synced += 1,
                PushOutcome::Conflict => report.conflicts += 1,
                PushOutcome::Deferred(e) if e.is_unreachable() => {
                    warn!("sincronización interrumpida en {}: {}", row.value, e);
                    report.failed += 1;
                    break;
                }
                PushOutcome::Deferred(e) => {
                    warn!("el central no aceptó {}: {}", row.value, e);
                    report.failed += 1;
                }
            }
        }
        info!("sincronización: {} informados, {} fallidos, {} conflictos",
              report.synced, report.failed, report.conflicts);
        Ok(report)
    }

    /// Informa una fila pendiente.
    ///
    /// Una fila manual que el central todavía no aceptó pasa primero por
    /// `report_manual`, aunque ya esté anulada: así una colisión con un
    /// valor que el central entregó a otro puesto queda registrada como
    /// conflicto. Después se informa el estado actual. `synced` sólo se
    /// marca si la fila sigue en el estado informado.
    fn push_row(&self, row: &Correlative) -> Result<PushOutcome> {
        if row.origin == Origin::Manual && !row.reconciled {
            let metadata = row.metadata.clone().unwrap_or_default();
            match self.authority.report_manual(&row.value, &metadata) {
                Ok(()) => {
                    self.store.mark_reconciled(&row.value)?;
                    self.touch_contact()?;
                }
                Err(AuthorityError::ReconciliationConflict { value, detail }) => {
                    self.store_conflict(&value, &detail)?;
                    return Ok(PushOutcome::Conflict);
                }
                Err(e) => return Ok(PushOutcome::Deferred(e)),
            }
        }
        let sent = match (row.state, row.origin) {
            (CorrelativeState::Void, _) => {
                self.authority.report_void(&row.value, row.void_reason.as_deref().unwrap_or_default())
            }
            (CorrelativeState::Issued, Origin::Authority) => {
                self.authority.report_issued(&row.value, &row.metadata.clone().unwrap_or_default())
            }
            // Manual emitido: `report_manual` ya lo dejó informado.
            (CorrelativeState::Issued, Origin::Manual) => Ok(()),
            // Una fila reservada ya es conocida por el central.
            (CorrelativeState::Reserved, _) => Ok(()),
        };
        match sent {
            Ok(()) => {
                if !self.store.mark_synced(&row.value, row.state)? {
                    debug!("{} cambió de estado durante el informe; queda pendiente", row.value);
                }
                self.touch_contact()?;
                Ok(PushOutcome::Synced)
            }
            Err(AuthorityError::ReconciliationConflict { value, detail }) => {
                self.store_conflict(&value, &detail)?;
                Ok(PushOutcome::Conflict)
            }
            Err(e) => Ok(PushOutcome::Deferred(e)),
        }
    }

    fn store_conflict(&self, value: &str, detail: &str) -> Result<()> {
        warn!("conflicto de reconciliación en {}: {}", value, detail);
        self.store.record_conflict(value, detail)?;
        self.events.publish(EngineEvent::ConflictRecorded { value: value.to_string(), detail: detail.to_string() });
        Ok(())
    }

    /// Informa el último cambio de la fila. Las fallas se absorben: la fila
    /// queda pendiente en el store y se avisa con `ReportDeferred`.
    fn try_report(&self, value: &str) {
        match self.report_one(value) {
            Ok(Some(PushOutcome::Deferred(e))) => {
                warn!("informe de {} pendiente: {}", value, e);
                self.events.publish(EngineEvent::ReportDeferred { value: value.to_string(), error: e.to_string() });
            }
            Ok(_) => {}
            Err(e) => warn!("no se pudo registrar el informe de {}: {}", value, e),
        }
    }

    fn report_one(&self, value: &str) -> Result<Option<PushOutcome>> {
        let _guard = self.report_guard()?;
        match self.store.get(value)? {
            Some(row) if !row.synced => Ok(Some(self.push_row(&row)?)),
            // Ya la subió un barrido de `sync_pending`.
            _ => Ok(None),
        }
    }
}
