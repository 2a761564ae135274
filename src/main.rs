use allocation::{AllocatorConfig, CorrelativeService, EngineEvent, IssueRequest, Mode, NoopPrintBridge,
                 ReplenishRequest, ServiceError, VoidRequest};
use authority_client::HttpAuthorityClient;
use correlativo_domain::OrderMetadata;
use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// Menú interactivo del puesto de impresión de hojas RDP.
///
/// Opciones soportadas:
/// 1) Ver próximo correlativo
/// 2) Emitir correlativo (manual si no hay conexión)
/// 3) Anular correlativo
/// 4) Estado del cache
/// 5) Reponer cache
/// 6) Reconectar con el central
/// 7) Ver anulados
/// 8) Ver conflictos
/// 9) Sincronizar pendientes
/// 0) Salir
fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init().map_err(|e| e as Box<dyn Error>)?;

    let config = AllocatorConfig::from_env()?;
    // Cache local (aplica migraciones embebidas si procede)
    let store = Arc::new(correlativo_persistence::new_from_env()?);
    let authority = Arc::new(HttpAuthorityClient::new(&config.authority_url, config.authority_timeout)?);
    let engine = Arc::new(allocation::AllocationEngine::new(store, authority, config.engine.clone()));
    let service = CorrelativeService::new(engine.clone(), Arc::new(NoopPrintBridge));

    let mut events = engine.subscribe();
    std::thread::spawn(move || {
        loop {
            let event = match events.blocking_recv() {
                Ok(event) => event,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };
            match event {
                EngineEvent::ModeChanged { to: Mode::Offline, .. } => {
                    println!("\n*** MODO SIN CONEXIÓN: ingrese el correlativo impreso en la hoja ***")
                }
                EngineEvent::ModeChanged { to: Mode::Online, .. } => println!("\n*** Conexión con el central restablecida ***"),
                EngineEvent::ConflictRecorded { value, detail } => {
                    println!("\n!!! Conflicto en {}: {} (revisar a mano)", value, detail)
                }
                _ => {}
            }
        }
    });

    log::info!("puesto iniciado: central {}, cache {}", config.authority_url, config.database_url);
    loop {
        println!("\n== Correlativos RDP ==");
        println!("1) Ver próximo correlativo");
        println!("2) Emitir correlativo");
        println!("3) Anular correlativo");
        println!("4) Estado del cache");
        println!("5) Reponer cache");
        println!("6) Reconectar con el central");
        println!("7) Ver anulados");
        println!("8) Ver conflictos");
        println!("9) Sincronizar pendientes");
        println!("0) Salir");
        print!("Elige una opción: ");
        io::stdout().flush().ok();

        let mut choice = String::new();
        if io::stdin().read_line(&mut choice)? == 0 {
            break;
        }
        match choice.trim() {
            "1" => match service.next_correlative() {
                Ok(next) => match next.siguiente {
                    Some(v) => println!("Siguiente: {} ({} disponibles)", v, next.disponibles),
                    None => println!("Sin conexión: el correlativo se ingresa a mano"),
                },
                Err(e) => report_error(&e),
            },
            "2" => {
                let mode = engine.mode()?;
                let manual = if mode == Mode::Offline {
                    let v = prompt("Correlativo impreso en la hoja: ")?;
                    if v.trim().is_empty() {
                        eprintln!("En modo sin conexión el correlativo es obligatorio");
                        continue;
                    }
                    Some(v.trim().to_string())
                } else {
                    None
                };
                let metadata = OrderMetadata { nro_op: optional(prompt("Nro OP: ")?),
                                               molde: optional(prompt("Molde: ")?),
                                               maquina: optional(prompt("Máquina (enter para vacío): ")?),
                                               turno: optional(prompt("Turno (enter para vacío): ")?),
                                               operador: optional(prompt("Operador (enter para vacío): ")?),
                                               ..Default::default() };
                match service.issue_correlative(IssueRequest { metadata, correlativo_manual: manual }) {
                    Ok(resp) => println!("Emitido {} ({}), {} disponibles", resp.correlativo, resp.origin, resp.disponibles),
                    Err(e) => report_error(&e),
                }
            }
            "3" => {
                let value = prompt("Correlativo a anular (enter para el próximo disponible): ")?;
                let motivo = prompt("Motivo: ")?;
                match service.void_correlative(VoidRequest { correlativo: optional(value), motivo }) {
                    Ok(resp) => println!("Anulado {}: {}", resp.correlativo, resp.motivo),
                    Err(e) => report_error(&e),
                }
            }
            "4" => match service.cache_status() {
                Ok(st) => {
                    let contacto = st.last_authority_contact
                                     .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                                     .unwrap_or_else(|| "-".into());
                    println!("Modo: {} | disponibles: {} | umbral: {} | siguiente: {} | último contacto: {}",
                             st.mode,
                             st.disponibles,
                             st.umbral.map_or_else(|| "-".to_string(), |m| m.to_string()),
                             st.siguiente.as_deref().unwrap_or("-"),
                             contacto);
                    if st.necesita_reponer {
                        println!("El cache está bajo: conviene reponer");
                    }
                }
                Err(e) => report_error(&e),
            },
            "5" => {
                let target = prompt(&format!("Objetivo (enter para {}): ", config.engine.replenish_target))?;
                let target_count = match target.trim() {
                    "" => None,
                    t => match t.parse::<usize>() {
                        Ok(n) => Some(n),
                        Err(_) => {
                            eprintln!("Número inválido");
                            continue;
                        }
                    },
                };
                match service.cache_replenish(ReplenishRequest { target_count }) {
                    Ok(resp) => println!("Insertados: {} | disponibles: {}", resp.inserted_count, resp.disponibles),
                    Err(e) => report_error(&e),
                }
            }
            "6" => match service.reconnect() {
                Ok(resp) => println!("Conectado. Insertados: {} | disponibles: {}", resp.inserted_count, resp.disponibles),
                Err(e) => report_error(&e),
            },
            "7" => match service.list_voided() {
                Ok(rows) => {
                    println!("\nCORRELATIVO | FECHA               | MOTIVO");
                    println!("------------------------------------------------------------");
                    for r in rows {
                        let fecha = r.fecha
                                     .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                                     .unwrap_or_else(|| "-".into());
                        println!("{} | {} | {}", r.correlativo, fecha, r.motivo);
                    }
                }
                Err(e) => report_error(&e),
            },
            "8" => match service.list_conflicts() {
                Ok(rows) if rows.is_empty() => println!("Sin conflictos pendientes"),
                Ok(rows) => {
                    for r in rows {
                        println!("{} | {}", r.correlativo, r.detalle);
                    }
                }
                Err(e) => report_error(&e),
            },
            "9" => match service.sync() {
                Ok(r) => println!("Informados: {} | fallidos: {} | conflictos: {}", r.synced, r.failed, r.conflicts),
                Err(e) => report_error(&e),
            },
            "0" => {
                println!("Saliendo...");
                break;
            }
            other => {
                println!("Opción inválida: {}", other);
            }
        }
    }

    Ok(())
}

fn report_error(e: &ServiceError) {
    eprintln!("Error ({}): {}", e.status, serde_json::to_string(&e.body).unwrap_or_default());
}

fn optional(s: String) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

fn prompt(msg: &str) -> io::Result<String> {
    print!("{}", msg);
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s)
}
