//! Crate `allocation`: motor de asignación de correlativos con cache local
//! y modo sin conexión.
//!
//! Este crate compone el cache local (`CorrelativeStore`), el cliente del
//! central (`AuthorityClient`) y la política de respaldo (`FallbackPolicy`)
//! en un único `AllocationEngine`, que es lo único que usan los callers.
//! Encima expone `CorrelativeService`, una fachada con DTOs serializables
//! pensada para handlers HTTP o para la CLI del puesto.
//!
//! Diseño resumido:
//! - Unicidad: ningún valor se emite dos veces; un valor anulado queda
//!   retirado para siempre.
//! - Red fuera del lock: primero se pide el bloque al central, después se
//!   inserta en el cache en una transacción atómica.
//! - Modo sin conexión explícito: si el cache está vacío y el central no
//!   responde, el motor pasa a `Mode::Offline` y pide ingreso manual. Sólo
//!   una reposición exitosa lo devuelve a `Mode::Online`.
//! - Informes al central best-effort: corren en un hilo propio del motor,
//!   nunca hacen fallar ni demoran la emisión o la anulación; lo no
//!   informado queda pendiente para `sync_pending`.
//! - Reposición anticipada opcional (`EngineConfig::low_water_mark`): sin
//!   ella cada emisión baja en uno los disponibles.
//!
//! Ejemplo rápido:
//! ```rust
//! use allocation::stubs::InMemoryAuthority;
//! use allocation::{AllocationEngine, EngineConfig};
//! use correlativo_domain::InMemoryCorrelativeStore;
//! use std::sync::Arc;
//! let store = Arc::new(InMemoryCorrelativeStore::new());
//! let authority = Arc::new(InMemoryAuthority::new("OT-", 3));
//! let engine = AllocationEngine::new(store, authority, EngineConfig::default());
//! let next = engine.get_next().unwrap();
//! assert_eq!(next.value.as_deref(), Some("OT-001"));
//! ```
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod policy;
pub mod print;
pub mod service;
pub mod stubs;

pub use config::*;
pub use engine::*;
pub use errors::*;
pub use events::*;
pub use policy::*;
pub use print::*;
pub use service::*;
